//! rcc compiler library.
//!
//! Compiles a C-subset translation unit to x86 assembly, and optionally
//! drives the system toolchain to assemble and link the result.
//!
//! The pipeline for one unit is a straight chain with no feedback
//! edges:
//!
//! ```text
//! preprocessed text -> tokens -> AST -> LIR -> optimized LIR
//!                   -> register map -> assembly text
//! ```
//!
//! # Example
//!
//! ```rust,ignore
//! use rcc::{compile_source, CompilerConfig};
//!
//! let config = CompilerConfig::new().with_target(true);
//! let asm = compile_source("int main(void) { return 0; }", "main.c", &config)?;
//! ```

pub mod ast;
pub mod config;
pub mod diag;
pub mod emit;
pub mod lexer;
pub mod lir;
pub mod opt;
pub mod parser;
pub mod regalloc;
pub mod sema;
pub mod symtab;
pub mod types;

pub use config::CompilerConfig;
pub use diag::{DiagContext, DiagKind, Diagnostic, SourceLoc};
pub use emit::{AsmSyntax, EmitOptions};
pub use lexer::tokenize;
pub use opt::OptFlags;
pub use parser::Parser;
pub use sema::{analyze_unit, LoweredUnit};
pub use symtab::SymbolTable;
pub use types::{Target, Type};

use std::fmt;
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

/// Failure anywhere in the pipeline.
#[derive(Debug)]
pub enum CompileError {
    Lex(lexer::LexError),
    Parse(parser::ParseError),
    /// Semantic failure; the diagnostics carry the details
    Sema(Vec<Diagnostic>),
    Emit(emit::EmitError),
    Io(std::io::Error),
    Toolchain(String),
}

impl fmt::Display for CompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompileError::Lex(e) => write!(f, "{}: {}", e.loc, e.message),
            CompileError::Parse(e) => write!(f, "{}: {}", e.loc, e.message),
            CompileError::Sema(diags) => {
                for (i, d) in diags.iter().enumerate() {
                    if i > 0 {
                        writeln!(f)?;
                    }
                    write!(f, "{}", d)?;
                }
                Ok(())
            }
            CompileError::Emit(e) => write!(f, "{}", e),
            CompileError::Io(e) => write!(f, "{}", e),
            CompileError::Toolchain(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for CompileError {}

impl From<std::io::Error> for CompileError {
    fn from(e: std::io::Error) -> Self {
        CompileError::Io(e)
    }
}

/// Compile preprocessed source text to assembly.
pub fn compile_source(
    source: &str,
    file_name: &str,
    config: &CompilerConfig,
) -> Result<String, CompileError> {
    let tokens = tokenize(source, file_name).map_err(CompileError::Lex)?;
    debug!(tokens = tokens.len(), file = file_name, "lexed");

    let symtab = SymbolTable::new();
    let mut parser = Parser::new(tokens, &symtab);
    let unit = parser
        .parse_translation_unit()
        .map_err(CompileError::Parse)?;
    debug!(
        functions = unit.funcs.len(),
        globals = unit.globals.len(),
        "parsed"
    );

    let mut diag_ctx = DiagContext::new();
    let lowered = analyze_unit(&unit, config.target, config.pack, &mut diag_ctx);
    let mut lowered = match lowered {
        Ok(lowered) => lowered,
        Err(_) => return Err(CompileError::Sema(diag_ctx.diagnostics().to_vec())),
    };
    debug!(instructions = lowered.insts.len(), "lowered");

    opt::optimize(&mut lowered.insts, config.opt);
    debug!(instructions = lowered.insts.len(), "optimized");

    let alloc = regalloc::allocate(&lowered.insts, config.target.x86_64);
    debug!(stack_slots = alloc.stack_slots, "allocated registers");

    let opts = EmitOptions {
        target: config.target,
        syntax: config.syntax,
        export: config.export_symbols,
        debug: config.debug_info,
        source_file: Some(file_name.to_string()),
    };
    emit::emit(&lowered.insts, &alloc, &lowered.object_sizes, &opts).map_err(CompileError::Emit)
}

/// Read and hand back a source file untouched.
///
/// Stands in for an external preprocessor; a real `cpp` can be slotted
/// into [`compile_file`] in its place.
pub fn preprocess_identity(path: &Path) -> std::io::Result<String> {
    fs::read_to_string(path)
}

/// Compile one source file to an assembly file.
///
/// The output is written through a sibling temporary and renamed into
/// place, so a failed compile leaves no partial artifact behind.
pub fn compile_file(
    input: &Path,
    output: &Path,
    config: &CompilerConfig,
    preprocess: fn(&Path) -> std::io::Result<String>,
) -> Result<(), CompileError> {
    let source = preprocess(input)?;
    let file_name = input.to_string_lossy().into_owned();
    let asm = compile_source(&source, &file_name, config)?;

    let tmp = output.with_extension("s.tmp");
    {
        let mut f = fs::File::create(&tmp)?;
        f.write_all(asm.as_bytes())?;
    }
    fs::rename(&tmp, output)?;
    Ok(())
}

/// Cache for the system-compiler availability check.
static CC_CHECKED: OnceLock<Result<(), String>> = OnceLock::new();

/// Check that a `cc` capable of assembling and linking exists. The
/// check runs once per process.
fn check_cc() -> Result<(), String> {
    CC_CHECKED
        .get_or_init(|| {
            let output = Command::new("cc").arg("--version").output().map_err(|e| {
                format!(
                    "failed to run cc: {}. A system C toolchain is required \
                     for assembling and linking.",
                    e
                )
            })?;
            if !output.status.success() {
                return Err(format!(
                    "cc --version failed with exit code {:?}",
                    output.status.code()
                ));
            }
            Ok(())
        })
        .clone()
}

fn arch_flag(config: &CompilerConfig) -> &'static str {
    if config.target.x86_64 {
        "-m64"
    } else {
        "-m32"
    }
}

/// Assemble a `.s` file into an object file with the system toolchain.
pub fn assemble(asm: &Path, object: &Path, config: &CompilerConfig) -> Result<(), CompileError> {
    check_cc().map_err(CompileError::Toolchain)?;
    debug!(input = %asm.display(), output = %object.display(), "assembling");
    let output = Command::new("cc")
        .arg(arch_flag(config))
        .arg("-c")
        .arg(asm)
        .arg("-o")
        .arg(object)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompileError::Toolchain(format!(
            "assembler failed:\n{}",
            stderr
        )));
    }
    Ok(())
}

/// Link object files into an executable.
pub fn link(objects: &[PathBuf], out: &Path, config: &CompilerConfig) -> Result<(), CompileError> {
    check_cc().map_err(CompileError::Toolchain)?;
    debug!(output = %out.display(), "linking");
    let output = Command::new("cc")
        .arg(arch_flag(config))
        .args(objects)
        .arg("-o")
        .arg(out)
        .output()?;
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompileError::Toolchain(format!("linker failed:\n{}", stderr)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compile_source_end_to_end() {
        let config = CompilerConfig::new().with_target(false);
        let asm = compile_source("int main(void) { return 2 + 3; }", "t.c", &config).unwrap();
        assert!(asm.contains(".globl main"));
        assert!(asm.contains("movl $5, %eax"));
    }

    #[test]
    fn test_semantic_errors_surface_with_location() {
        let config = CompilerConfig::new().with_target(false);
        let err = compile_source("int f(void) { return x; }", "t.c", &config).unwrap_err();
        let text = err.to_string();
        assert!(text.contains("t.c:1:"), "error was: {}", text);
        assert!(text.contains("undeclared identifier 'x'"));
    }

    #[test]
    fn test_parse_error_has_position() {
        let config = CompilerConfig::new();
        let err = compile_source("int f(void { return 0; }", "t.c", &config).unwrap_err();
        assert!(matches!(err, CompileError::Parse(_)));
    }

    #[test]
    fn test_compile_file_writes_no_partial_output() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("bad.c");
        let output = dir.path().join("bad.s");
        fs::write(&input, "int f(void) { return x; }").unwrap();

        let config = CompilerConfig::new();
        let result = compile_file(&input, &output, &config, preprocess_identity);
        assert!(result.is_err());
        assert!(!output.exists(), "partial artifact left behind");
    }

    #[test]
    fn test_compile_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("ok.c");
        let output = dir.path().join("ok.s");
        fs::write(&input, "int answer(void) { return 42; }").unwrap();

        let config = CompilerConfig::new().with_target(false);
        compile_file(&input, &output, &config, preprocess_identity).unwrap();
        let asm = fs::read_to_string(&output).unwrap();
        assert!(asm.contains("answer:"));
        assert!(asm.contains("movl $42, %eax"));
    }
}
