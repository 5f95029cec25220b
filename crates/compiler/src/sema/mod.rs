//! Semantic analysis and LIR lowering.
//!
//! The analyzer walks the parsed translation unit, validates every
//! construct against the symbol table, and emits LIR through a
//! [`Builder`]. Work proceeds in three phases:
//!
//! 1. Register every function prototype and definition, checking
//!    redeclarations for signature equality.
//! 2. Process global declarations in source order, emitting `Glob*`
//!    data directives with constant-folded initializers.
//! 3. Lower each function body: install parameters, emit `FuncBegin`,
//!    walk the statements, emit `FuncEnd`.
//!
//! Any failure records a diagnostic in the threaded [`DiagContext`] and
//! aborts the unit; no partial LIR escapes.
//!
//! # Module structure
//!
//! - `layout.rs`: struct/union/bit-field layout
//! - `consteval.rs`: constant-expression evaluator
//! - `globals.rs`: global declarations and initializers
//! - `expr.rs`: expression checking and lowering
//! - `stmt.rs`: statement lowering and control flow

mod consteval;
mod expr;
mod globals;
mod layout;
mod stmt;

use crate::ast::{Function, Stmt};
use crate::diag::{DiagContext, DiagKind, SourceLoc};
use crate::lir::{Builder, Inst, Op, ValKind, ValueId};
use crate::parser::ParseResult;
use crate::symtab::{FuncSig, Storage, Symbol, SymbolKind, SymbolTable};
use crate::types::{Target, Type};
use std::collections::HashMap;
use std::rc::Rc;

/// Marker error; the diagnostic itself lives in the [`DiagContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaError;

pub(crate) type SemaResult<T> = Result<T, SemaError>;

/// Semantic analyzer state for one translation unit.
pub struct Analyzer<'a> {
    pub(crate) symtab: SymbolTable,
    pub(crate) builder: Builder,
    pub(crate) diag: &'a mut DiagContext,
    pub(crate) target: Target,
    /// Struct-pack alignment; 0 means natural
    pub(crate) pack: u64,

    // Per-function lowering state
    pub(crate) stack_offset: i64,
    pub(crate) next_label: u32,
    pub(crate) next_static: u32,
    pub(crate) next_string: u32,
    pub(crate) break_labels: Vec<Rc<str>>,
    pub(crate) continue_labels: Vec<Rc<str>>,
    /// User goto labels, lazily minted as `Luser<id>`
    pub(crate) user_labels: HashMap<String, Rc<str>>,
    pub(crate) next_user_label: u32,
    pub(crate) cur_ret: Type,
    /// Hidden aggregate-return pointer, loaded at function entry
    pub(crate) agg_ret_ptr: Option<ValueId>,
    /// Extra parameter slot shift when an aggregate return is in play
    pub(crate) param_shift: u32,
    /// Byte sizes of named data objects, for the emitter's `.lcomm` pass
    pub(crate) object_sizes: HashMap<Rc<str>, u64>,
}

/// Result of lowering one translation unit.
#[derive(Debug, Default)]
pub struct LoweredUnit {
    pub insts: Vec<Inst>,
    /// Sizes of named globals and statics, keyed by their IR names
    pub object_sizes: HashMap<Rc<str>, u64>,
}

impl<'a> Analyzer<'a> {
    pub fn new(target: Target, pack: u64, diag: &'a mut DiagContext) -> Self {
        Analyzer {
            symtab: SymbolTable::new(),
            builder: Builder::new(),
            diag,
            target,
            pack,
            stack_offset: 0,
            next_label: 0,
            next_static: 0,
            next_string: 0,
            break_labels: Vec::new(),
            continue_labels: Vec::new(),
            user_labels: HashMap::new(),
            next_user_label: 0,
            cur_ret: Type::Void,
            agg_ret_ptr: None,
            param_shift: 0,
            object_sizes: HashMap::new(),
        }
    }

    /// Record an error and return the marker.
    pub(crate) fn err<T>(
        &mut self,
        kind: DiagKind,
        loc: &SourceLoc,
        msg: impl Into<String>,
    ) -> SemaResult<T> {
        self.diag.error(kind, loc, msg);
        Err(SemaError)
    }

    pub(crate) fn fresh_label(&mut self, suffix: &str) -> Rc<str> {
        self.next_label += 1;
        self.builder.intern(&format!("L{}_{}", self.next_label, suffix))
    }

    /// Map a source type to the value class LIR instructions carry.
    pub(crate) fn val_kind(&self, ty: &Type) -> ValKind {
        match ty {
            Type::Void => ValKind::Void,
            Type::Bool | Type::UChar => ValKind::U8,
            Type::Char => ValKind::I8,
            Type::Short => ValKind::I16,
            Type::UShort => ValKind::U16,
            Type::Int | Type::Enum(_) => ValKind::I32,
            Type::UInt => ValKind::U32,
            Type::Long => {
                if self.target.x86_64 {
                    ValKind::I64
                } else {
                    ValKind::I32
                }
            }
            Type::ULong => {
                if self.target.x86_64 {
                    ValKind::U64
                } else {
                    ValKind::U32
                }
            }
            Type::LLong => ValKind::I64,
            Type::ULLong => ValKind::U64,
            Type::Float => ValKind::F32,
            Type::Double => ValKind::F64,
            Type::LDouble => ValKind::F80,
            Type::FloatComplex | Type::DoubleComplex | Type::LDoubleComplex => ValKind::Ptr,
            Type::Ptr(_) | Type::Array { .. } | Type::Func { .. } => ValKind::Ptr,
            Type::Struct(_) | Type::Union(_) => ValKind::Ptr,
        }
    }

    /// Analyze a parsed unit, producing the LIR instruction list.
    pub fn analyze(mut self, unit: &ParseResult) -> SemaResult<LoweredUnit> {
        self.register_functions(&unit.funcs)?;
        self.process_globals(&unit.globals)?;
        for func in &unit.funcs {
            if func.body.is_some() {
                self.lower_function(func)?;
            }
        }
        Ok(LoweredUnit {
            insts: self.builder.finish(),
            object_sizes: self.object_sizes,
        })
    }

    /// Phase 1: declare every function, enforcing signature equality on
    /// redeclaration. Inline and noreturn flags merge monotonically.
    fn register_functions(&mut self, funcs: &[Function]) -> SemaResult<()> {
        for func in funcs {
            let sig = FuncSig {
                ret: func.return_type.clone(),
                params: func.params.iter().map(|p| p.ty.clone()).collect(),
                variadic: func.variadic,
            };
            if let Some(idx) = self.symtab.lookup_idx(&func.name) {
                let existing = self.symtab.sym(idx);
                if existing.kind != SymbolKind::Function {
                    return self.err(
                        DiagKind::Redeclaration,
                        &func.loc,
                        format!("'{}' redeclared as a different kind of symbol", func.name),
                    );
                }
                let old_sig = existing.sig.clone().unwrap_or(FuncSig {
                    ret: Type::Void,
                    params: Vec::new(),
                    variadic: false,
                });
                if old_sig.ret != sig.ret
                    || old_sig.params != sig.params
                    || old_sig.variadic != sig.variadic
                {
                    return self.err(
                        DiagKind::Redeclaration,
                        &func.loc,
                        format!("conflicting types for '{}'", func.name),
                    );
                }
                let sym = self.symtab.sym_mut(idx);
                sym.is_inline |= func.is_inline;
                sym.is_noreturn |= func.is_noreturn;
                if !func.is_prototype() {
                    sym.is_prototype = false;
                }
            } else {
                let ir_name = self.builder.intern(&func.name);
                let mut sym = Symbol::new(
                    func.name.clone(),
                    SymbolKind::Function,
                    Type::Func {
                        ret: Box::new(sig.ret.clone()),
                        params: sig.params.clone(),
                        variadic: sig.variadic,
                    },
                );
                sym.storage = if func.is_static {
                    Storage::Static
                } else {
                    Storage::Global
                };
                sym.ir_name = Some(ir_name);
                sym.sig = Some(sig);
                sym.is_prototype = func.is_prototype();
                sym.is_inline = func.is_inline;
                sym.is_noreturn = func.is_noreturn;
                self.symtab.add(sym);
            }
        }
        Ok(())
    }

    /// Phase 3 for one function definition.
    fn lower_function(&mut self, func: &Function) -> SemaResult<()> {
        self.diag.set_function(Some(&func.name));
        self.stack_offset = 0;
        self.user_labels.clear();
        self.cur_ret = func.return_type.clone();
        self.agg_ret_ptr = None;

        let snap = self.symtab.snapshot();
        let name = self.builder.intern(&func.name);
        self.builder.set_loc(&func.loc);

        let returns_agg = func.return_type.is_aggregate();
        self.param_shift = if returns_agg { 1 } else { 0 };

        let mut begin = Inst::new(Op::FuncBegin).name(name);
        // src1 marks file-local linkage, mirrored by the data directives
        if func.is_static {
            begin = begin.src1(1);
        }
        if func.is_inline {
            begin = begin.imm(1);
        }
        self.builder.emit(begin);

        if returns_agg {
            let ptr = self
                .builder
                .emit_value(Inst::new(Op::LoadParam).imm(0).ty(ValKind::Ptr));
            self.agg_ret_ptr = Some(ptr);
        }

        for (i, param) in func.params.iter().enumerate() {
            if param.name.is_empty() {
                continue;
            }
            let mut sym = Symbol::new(param.name.clone(), SymbolKind::Parameter, param.ty.clone());
            sym.param_index = Some(i as u32 + self.param_shift);
            sym.is_const = param.quals.is_const;
            sym.is_volatile = param.quals.is_volatile;
            sym.is_restrict = param.quals.is_restrict;
            self.symtab.add(sym);
        }

        let body = func.body.as_ref().expect("definition has a body");
        let mut failed = false;
        for stmt in body {
            if self.lower_stmt(stmt).is_err() {
                failed = true;
                break;
            }
        }

        // Resolve goto targets: every referenced label must be defined.
        if !failed {
            for (user, ir) in self.user_labels.clone() {
                let defined = self
                    .builder
                    .insts()
                    .iter()
                    .any(|i| i.op == Op::Label && i.name.as_deref() == Some(&*ir));
                if !defined {
                    self.diag.error(
                        DiagKind::Type,
                        &func.loc,
                        format!("label '{}' used but not defined", user),
                    );
                    failed = true;
                }
            }
        }

        self.builder.emit(Inst::new(Op::FuncEnd));
        self.symtab.pop_to(snap);
        self.diag.set_function(None);

        if failed {
            return Err(SemaError);
        }
        Ok(())
    }

    /// Phase 2 dispatch; the heavy lifting lives in `globals.rs`.
    fn process_globals(&mut self, globals: &[Stmt]) -> SemaResult<()> {
        for stmt in globals {
            self.lower_global_stmt(stmt)?;
        }
        Ok(())
    }

    /// IR name for a user goto label, minted on first use.
    pub(crate) fn user_label(&mut self, name: &str) -> Rc<str> {
        if let Some(l) = self.user_labels.get(name) {
            return l.clone();
        }
        self.next_user_label += 1;
        let ir = self.builder.intern(&format!("Luser{}", self.next_user_label));
        self.user_labels.insert(name.to_string(), ir.clone());
        ir
    }
}

/// Convenience entry: analyze a parsed unit with a fresh analyzer.
pub fn analyze_unit(
    unit: &ParseResult,
    target: Target,
    pack: u64,
    diag: &mut DiagContext,
) -> SemaResult<LoweredUnit> {
    Analyzer::new(target, pack, diag).analyze(unit)
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::lexer::tokenize;
    use crate::parser::Parser;

    /// Compile source to LIR on the 32-bit target, panicking on failure.
    pub fn lower(src: &str) -> Vec<Inst> {
        lower_on(src, Target { x86_64: false })
    }

    pub fn lower_on(src: &str, target: Target) -> Vec<Inst> {
        let mut diag = DiagContext::new();
        let result = try_lower(src, target, &mut diag);
        match result {
            Ok(unit) => unit.insts,
            Err(_) => {
                let msgs: Vec<String> =
                    diag.diagnostics().iter().map(|d| d.to_string()).collect();
                panic!("semantic analysis failed: {}", msgs.join("; "))
            }
        }
    }

    pub fn try_lower(
        src: &str,
        target: Target,
        diag: &mut DiagContext,
    ) -> SemaResult<LoweredUnit> {
        let outer = SymbolTable::new();
        let tokens = tokenize(src, "test.c").expect("lex");
        let mut parser = Parser::new(tokens, &outer);
        let unit = parser.parse_translation_unit().expect("parse");
        analyze_unit(&unit, target, 0, diag)
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::*;
    use super::*;

    #[test]
    fn test_function_boundaries_emitted() {
        let insts = lower("int f(void) { return 1; }");
        assert_eq!(insts[0].op, Op::FuncBegin);
        assert_eq!(insts[0].name.as_deref(), Some("f"));
        assert_eq!(insts.last().unwrap().op, Op::FuncEnd);
    }

    #[test]
    fn test_prototype_mismatch_is_redeclaration_error() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(int x);\nlong f(int x) { return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
        assert_eq!(diag.diagnostics()[0].kind, DiagKind::Redeclaration);
    }

    #[test]
    fn test_matching_prototype_and_definition() {
        let insts = lower("int f(int x);\nint f(int x) { return x; }");
        assert!(insts.iter().any(|i| i.op == Op::FuncBegin));
    }

    #[test]
    fn test_aggregate_return_loads_hidden_pointer() {
        let insts = lower(
            "struct s { int a; int b; };\nstruct s g(void) { struct s v; return v; }",
        );
        let begin = insts.iter().position(|i| i.op == Op::FuncBegin).unwrap();
        assert_eq!(insts[begin + 1].op, Op::LoadParam);
        assert_eq!(insts[begin + 1].imm, 0);
        assert!(insts.iter().any(|i| i.op == Op::ReturnAgg));
    }

    #[test]
    fn test_lir_invariants_hold() {
        let insts = lower(
            "int f(int n) { int total; total = 0; while (n > 0) { total = total + n; n = n - 1; } return total; }",
        );
        crate::lir::verify(&insts).unwrap();
    }
}
