//! Diagnostics for the compiler pipeline.
//!
//! Every stage reports failures through a [`DiagContext`] threaded into it
//! by the driver. Diagnostics carry the source location and, inside a
//! function body, the enclosing function name, and render as
//! `file:line:col[: function]: message`.

use std::fmt;
use std::rc::Rc;

/// A position in an original source file.
///
/// Line and column are 1-indexed for display. The file name refers back to
/// the pre-preprocessing source when the input carries `# line "file"`
/// markers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceLoc {
    pub file: Rc<str>,
    pub line: u32,
    pub column: u32,
}

impl SourceLoc {
    pub fn new(file: Rc<str>, line: u32, column: u32) -> Self {
        SourceLoc { file, line, column }
    }

    /// Placeholder location for synthesized nodes (no source counterpart).
    pub fn none() -> Self {
        SourceLoc {
            file: Rc::from(""),
            line: 0,
            column: 0,
        }
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.file, self.line, self.column)
    }
}

/// Classification of a reported failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagKind {
    /// Unexpected token during parsing
    Parse,
    /// Incompatible types, undeclared identifier, wrong arity
    Type,
    /// Non-constant expression where a constant is required
    ConstEval,
    /// Bad alignment, duplicate case label, flexible member misuse
    Layout,
    /// Function redeclared with a different signature
    Redeclaration,
    /// Allocation failure
    OutOfMemory,
}

/// A single rendered-ready diagnostic.
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub kind: DiagKind,
    pub loc: SourceLoc,
    /// Enclosing function, when the failure occurred inside a body
    pub function: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.function {
            Some(func) => write!(f, "{}: {}: {}", self.loc, func, self.message),
            None => write!(f, "{}: {}", self.loc, self.message),
        }
    }
}

/// Mutable diagnostic state threaded through the analyzer.
///
/// Replaces what would otherwise be process-global "current function"
/// bookkeeping: every error helper takes the context explicitly, and the
/// driver decides where the collected diagnostics go.
#[derive(Debug, Default)]
pub struct DiagContext {
    /// Function currently being analyzed, attached to new diagnostics
    function: Option<String>,
    diags: Vec<Diagnostic>,
}

impl DiagContext {
    pub fn new() -> Self {
        DiagContext::default()
    }

    /// Enter a function body; subsequent diagnostics name it.
    pub fn set_function(&mut self, name: Option<&str>) {
        self.function = name.map(|s| s.to_string());
    }

    /// Record a diagnostic at `loc`.
    pub fn error(&mut self, kind: DiagKind, loc: &SourceLoc, message: impl Into<String>) {
        self.diags.push(Diagnostic {
            kind,
            loc: loc.clone(),
            function: self.function.clone(),
            message: message.into(),
        });
    }

    pub fn has_errors(&self) -> bool {
        !self.diags.is_empty()
    }

    /// Mark the current diagnostic count for a speculative check.
    pub fn checkpoint(&self) -> usize {
        self.diags.len()
    }

    /// Drop diagnostics recorded after `checkpoint`; used when a failed
    /// check has a fallback (a non-constant array size becoming a VLA).
    pub fn rollback(&mut self, checkpoint: usize) {
        self.diags.truncate(checkpoint);
    }

    pub fn diagnostics(&self) -> &[Diagnostic] {
        &self.diags
    }

    /// Write all collected diagnostics to `sink`, one per line.
    pub fn report(&self, sink: &mut dyn std::io::Write) -> std::io::Result<()> {
        for d in &self.diags {
            writeln!(sink, "{}", d)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_format_with_function() {
        let loc = SourceLoc::new(Rc::from("main.c"), 12, 5);
        let mut ctx = DiagContext::new();
        ctx.set_function(Some("main"));
        ctx.error(DiagKind::Type, &loc, "incompatible types in assignment");

        let rendered = ctx.diagnostics()[0].to_string();
        assert_eq!(rendered, "main.c:12:5: main: incompatible types in assignment");
    }

    #[test]
    fn test_diagnostic_format_at_toplevel() {
        let loc = SourceLoc::new(Rc::from("lib.c"), 3, 1);
        let mut ctx = DiagContext::new();
        ctx.error(DiagKind::Redeclaration, &loc, "conflicting types for 'f'");

        let rendered = ctx.diagnostics()[0].to_string();
        assert_eq!(rendered, "lib.c:3:1: conflicting types for 'f'");
    }
}
