//! Global declarations.
//!
//! File-scope objects lower to `Glob*` data directives. Every
//! initializer must fold to a constant; array and struct designators are
//! resolved by name or index and missing slots zero-fill. Objects
//! without initializers emit no directive at all: the emitter's `.bss`
//! pass reserves storage for any referenced name that has none.
//!
//! Aggregate payloads travel as interned strings: arrays as a
//! comma-separated value list, structs and unions as sparse
//! `offset:size:value` triples (an empty payload means all-zero).

use super::{Analyzer, SemaResult};
use crate::ast::{Designator, Expr, Initializer, Stmt, StorageClass, VarDecl};
use crate::diag::{DiagKind, SourceLoc};
use crate::lir::{Inst, Op, ValKind};
use crate::symtab::{Storage, Symbol, SymbolKind};
use crate::types::Type;
use std::rc::Rc;

impl Analyzer<'_> {
    /// Lower one file-scope statement.
    pub(crate) fn lower_global_stmt(&mut self, stmt: &Stmt) -> SemaResult<()> {
        match stmt {
            Stmt::VarDecl(decl) => self.lower_global_decl(decl),
            Stmt::Typedef { name, ty, loc } => {
                let resolved = self.resolve_decl_type(ty.clone(), loc)?;
                self.symtab
                    .add(Symbol::new(name.clone(), SymbolKind::Typedef, resolved));
                Ok(())
            }
            Stmt::EnumDecl {
                tag, enumerators, ..
            } => self.declare_enum(tag.as_deref(), enumerators),
            Stmt::StructDecl { tag, members, loc } => {
                self.declare_aggregate(tag, false, members.as_deref(), loc)
            }
            Stmt::UnionDecl { tag, members, loc } => {
                self.declare_aggregate(tag, true, members.as_deref(), loc)
            }
            Stmt::StaticAssert { .. } => {
                // Reuse the statement path; it only consults the
                // constant evaluator.
                self.lower_stmt(stmt)
            }
            other => {
                let loc = match other {
                    Stmt::Expr(e) => e.loc().clone(),
                    _ => SourceLoc::none(),
                };
                self.err(DiagKind::Type, &loc, "statement not allowed at file scope")
            }
        }
    }

    fn lower_global_decl(&mut self, decl: &VarDecl) -> SemaResult<()> {
        self.builder.set_loc(&decl.loc);
        let mut ty = self.resolve_decl_type(decl.ty.clone(), &decl.loc)?;

        // Incomplete arrays take their length from the initializer.
        if let Type::Array {
            len: len @ None,
            size_expr: None,
            ..
        } = &mut ty
        {
            match &decl.init {
                Some(Initializer::List(items)) => {
                    let mut count = 0i64;
                    let mut max = 0i64;
                    for item in items {
                        if let Some(Designator::Index(e)) = &item.designator {
                            count = self.eval_const_expr(e)?;
                        }
                        count += 1;
                        max = max.max(count);
                    }
                    *len = Some(max as u64)
                }
                Some(Initializer::Expr(Expr::StrLit { value, .. })) => {
                    *len = Some(value.len() as u64 + 1)
                }
                _ => {}
            }
        }

        if decl.storage == StorageClass::Extern {
            let ir = self.builder.intern(&decl.name);
            let mut sym = Symbol::new(decl.name.clone(), SymbolKind::Variable, ty);
            sym.storage = Storage::Extern;
            sym.ir_name = Some(ir);
            sym.is_const = decl.quals.is_const;
            sym.is_volatile = decl.quals.is_volatile;
            self.symtab.add(sym);
            return Ok(());
        }

        let is_local = decl.storage == StorageClass::Static;
        let ir = self.builder.intern(&decl.name);
        if let Some(size) = self.symtab.size_of(&ty, self.target) {
            self.object_sizes.insert(ir.clone(), size);
        }
        self.emit_global_object(ir.clone(), &ty, decl.init.as_ref(), is_local, &decl.loc)?;

        let mut sym = Symbol::new(decl.name.clone(), SymbolKind::Variable, ty.clone());
        sym.storage = if is_local {
            Storage::Static
        } else {
            Storage::Global
        };
        sym.ir_name = Some(ir);
        sym.elem_size = match &ty {
            Type::Array { elem, .. } => self.symtab.size_of(elem, self.target),
            _ => None,
        };
        sym.array_size = match &ty {
            Type::Array { len, .. } => *len,
            _ => None,
        };
        sym.is_const = decl.quals.is_const;
        sym.is_volatile = decl.quals.is_volatile;
        self.symtab.add(sym);
        Ok(())
    }

    /// Emit the data directive for an initialized global object. An
    /// object without an initializer emits nothing; the `.bss` pass
    /// picks it up by name.
    pub(crate) fn emit_global_object(
        &mut self,
        name: Rc<str>,
        ty: &Type,
        init: Option<&Initializer>,
        is_local: bool,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        let init = match init {
            Some(init) => init,
            None => return Ok(()),
        };
        let local_flag = if is_local { 1 } else { 0 };

        match ty {
            Type::Array { elem, len, .. } => {
                self.emit_global_array(name, elem, *len, init, local_flag, loc)
            }
            Type::Struct(_) => {
                let layout = match self.symtab.layout_of(ty) {
                    Some(l) if l.complete => l.clone(),
                    _ => return self.err(DiagKind::Type, loc, "initializer for incomplete type"),
                };
                let items = match init {
                    Initializer::List(items) => items.as_slice(),
                    Initializer::Expr(_) => {
                        return self.err(
                            DiagKind::ConstEval,
                            loc,
                            "global struct initializer must be a braced list",
                        )
                    }
                };
                let mut triples: Vec<String> = Vec::new();
                let mut index = 0usize;
                for item in items {
                    if let Some(Designator::Field(field)) = &item.designator {
                        match layout.members.iter().position(|m| m.name == *field) {
                            Some(i) => index = i,
                            None => {
                                return self.err(
                                    DiagKind::Type,
                                    loc,
                                    format!("no member '{}' in initializer", field),
                                )
                            }
                        }
                    }
                    let m = match layout.members.get(index) {
                        Some(m) => m.clone(),
                        None => {
                            return self.err(DiagKind::Type, loc, "too many initializers for struct")
                        }
                    };
                    if m.bit_width > 0 {
                        return self.err(
                            DiagKind::ConstEval,
                            loc,
                            "bit-field initializer in global aggregate",
                        );
                    }
                    let expr = match &item.init {
                        Initializer::Expr(e) => e,
                        Initializer::List(_) => {
                            return self.err(
                                DiagKind::ConstEval,
                                loc,
                                "nested braces in global struct initializer",
                            )
                        }
                    };
                    let value = self.const_scalar_init(&m.ty, expr, loc)?;
                    if value != 0 {
                        triples.push(format!("{}:{}:{}", m.offset, m.elem_size, value));
                    }
                    index += 1;
                }
                let mut inst = Inst::new(Op::GlobStruct)
                    .name(name)
                    .src1(local_flag)
                    .imm(layout.size as i64);
                if !triples.is_empty() {
                    let data = self.builder.intern(&triples.join(","));
                    inst = inst.data(data);
                }
                self.builder.emit(inst);
                Ok(())
            }
            Type::Union(_) => {
                let layout = match self.symtab.layout_of(ty) {
                    Some(l) if l.complete => l.clone(),
                    _ => return self.err(DiagKind::Type, loc, "initializer for incomplete type"),
                };
                let item = match init {
                    Initializer::List(items) => items.first(),
                    Initializer::Expr(_) => {
                        return self.err(
                            DiagKind::ConstEval,
                            loc,
                            "global union initializer must be a braced list",
                        )
                    }
                };
                let mut inst = Inst::new(Op::GlobUnion)
                    .name(name)
                    .src1(local_flag)
                    .imm(layout.size as i64);
                if let Some(item) = item {
                    let m = match &item.designator {
                        Some(Designator::Field(field)) => layout.member(field).cloned(),
                        _ => layout.members.first().cloned(),
                    };
                    if let Some(m) = m {
                        if let Initializer::Expr(e) = &item.init {
                            let value = self.const_scalar_init(&m.ty, e, loc)?;
                            if value != 0 {
                                let data =
                                    self.builder.intern(&format!("0:{}:{}", m.elem_size, value));
                                inst = inst.data(data);
                            }
                        }
                    }
                }
                self.builder.emit(inst);
                Ok(())
            }
            Type::Ptr(_) => {
                let expr = match init {
                    Initializer::Expr(e) => e,
                    Initializer::List(_) => {
                        return self.err(DiagKind::ConstEval, loc, "braced pointer initializer")
                    }
                };
                match expr {
                    // `&symbol` or a plain function name
                    Expr::Unary {
                        op: crate::ast::UnaryOp::AddrOf,
                        operand,
                        ..
                    } => {
                        if let Expr::Ident { name: target, .. } = operand.as_ref() {
                            let data = self.builder.intern(target);
                            self.builder.emit(
                                Inst::new(Op::GlobAddr)
                                    .name(name)
                                    .data(data)
                                    .src1(local_flag),
                            );
                            return Ok(());
                        }
                        self.err(DiagKind::ConstEval, loc, "pointer initializer is not constant")
                    }
                    Expr::StrLit { value, wide, .. } => {
                        self.next_string += 1;
                        let lit_name =
                            self.builder.intern(&format!("__str{}", self.next_string));
                        let data = self.builder.intern(value);
                        let op = if *wide { Op::GlobWString } else { Op::GlobString };
                        self.builder.emit(
                            Inst::new(op)
                                .name(lit_name.clone())
                                .data(data)
                                .src1(1)
                                .imm(if *wide { 4 } else { 1 }),
                        );
                        self.builder.emit(
                            Inst::new(Op::GlobAddr)
                                .name(name)
                                .data(lit_name)
                                .src1(local_flag),
                        );
                        Ok(())
                    }
                    other => {
                        let v = self.eval_const_expr(other)?;
                        self.builder.emit(
                            Inst::new(Op::GlobVar)
                                .name(name)
                                .imm(v)
                                .src1(local_flag)
                                .ty(ValKind::Ptr),
                        );
                        Ok(())
                    }
                }
            }
            _ => {
                // Scalar
                let expr = match init {
                    Initializer::Expr(e) => e,
                    Initializer::List(items) => match items.first() {
                        Some(item) => match &item.init {
                            Initializer::Expr(e) => e,
                            Initializer::List(_) => {
                                return self.err(
                                    DiagKind::ConstEval,
                                    loc,
                                    "too many braces around scalar initializer",
                                )
                            }
                        },
                        None => return Ok(()),
                    },
                };
                let value = self.const_scalar_init(ty, expr, loc)?;
                let kind = self.val_kind(ty);
                self.builder.emit(
                    Inst::new(Op::GlobVar)
                        .name(name)
                        .imm(value)
                        .src1(local_flag)
                        .ty(kind),
                );
                Ok(())
            }
        }
    }

    fn emit_global_array(
        &mut self,
        name: Rc<str>,
        elem: &Type,
        len: Option<u64>,
        init: &Initializer,
        local_flag: u32,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        match init {
            Initializer::Expr(Expr::StrLit { value, wide, .. }) => {
                let data = self.builder.intern(value);
                let op = if *wide { Op::GlobWString } else { Op::GlobString };
                self.builder.emit(
                    Inst::new(op)
                        .name(name)
                        .data(data)
                        .src1(local_flag)
                        .imm(if *wide { 4 } else { 1 }),
                );
                Ok(())
            }
            Initializer::List(items) => {
                let n = match len {
                    Some(n) => n as usize,
                    None => items.len(),
                };
                let elem_size = match self.symtab.size_of(elem, self.target) {
                    Some(s) => s,
                    None => {
                        return self.err(DiagKind::Type, loc, "array of incomplete element type")
                    }
                };
                // Designators position values; missing slots zero-fill.
                let mut values = vec![0i64; n];
                let mut index = 0usize;
                for item in items {
                    if let Some(Designator::Index(e)) = &item.designator {
                        let idx = self.eval_const_expr(e)?;
                        if idx < 0 {
                            return self.err(DiagKind::Layout, loc, "negative array designator");
                        }
                        index = idx as usize;
                    }
                    if index >= n {
                        return self.err(
                            DiagKind::Layout,
                            loc,
                            format!("initializer index {} out of bounds", index),
                        );
                    }
                    let expr = match &item.init {
                        Initializer::Expr(e) => e,
                        Initializer::List(_) => {
                            return self.err(
                                DiagKind::ConstEval,
                                loc,
                                "nested braces in global array initializer",
                            )
                        }
                    };
                    values[index] = self.const_scalar_init(elem, expr, loc)?;
                    index += 1;
                }
                let text: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                let data = self.builder.intern(&text.join(","));
                let kind = self.val_kind(elem);
                self.builder.emit(
                    Inst::new(Op::GlobArray)
                        .name(name)
                        .data(data)
                        .src1(local_flag)
                        .imm(elem_size as i64)
                        .ty(kind),
                );
                Ok(())
            }
            Initializer::Expr(other) => self.err(
                DiagKind::ConstEval,
                other.loc(),
                "array initializer must be a braced list or string literal",
            ),
        }
    }

    /// Constant value for one scalar slot. Floats accept literal forms
    /// (optionally negated) and travel as their bit pattern.
    fn const_scalar_init(&mut self, ty: &Type, expr: &Expr, loc: &SourceLoc) -> SemaResult<i64> {
        if ty.is_float() {
            let (neg, inner) = match expr {
                Expr::Unary {
                    op: crate::ast::UnaryOp::Neg,
                    operand,
                    ..
                } => (true, operand.as_ref()),
                other => (false, other),
            };
            let value = match inner {
                Expr::Number { lit, .. } => lit.float.unwrap_or(lit.value as f64),
                _ => {
                    return self.err(
                        DiagKind::ConstEval,
                        loc,
                        "floating initializer must be a literal",
                    )
                }
            };
            let value = if neg { -value } else { value };
            return Ok(match ty {
                Type::Float => (value as f32).to_bits() as i64,
                _ => value.to_bits() as i64,
            });
        }
        self.eval_const_expr(expr)
    }
}

#[cfg(test)]
mod tests {
    use crate::diag::{DiagContext, DiagKind};
    use crate::lir::Op;
    use crate::sema::test_util::{lower, try_lower};
    use crate::types::Target;

    #[test]
    fn test_static_array_directive() {
        let insts = lower("static int a[3] = {1, 2, 3};\nint f(void) { return a[0]; }");
        let g = insts.iter().find(|i| i.op == Op::GlobArray).unwrap();
        assert_eq!(g.name.as_deref(), Some("a"));
        assert_eq!(g.data.as_deref(), Some("1,2,3"));
        assert_eq!(g.src1, 1, "static linkage sets the .local flag");
        assert_eq!(g.imm, 4);
    }

    #[test]
    fn test_designated_slots_zero_fill() {
        let insts = lower("int a[5] = { [1] = 7, [4] = 9 };\nint f(void) { return a[1]; }");
        let g = insts.iter().find(|i| i.op == Op::GlobArray).unwrap();
        assert_eq!(g.data.as_deref(), Some("0,7,0,0,9"));
        assert_eq!(g.src1, 0, "external linkage leaves the .local flag clear");
    }

    #[test]
    fn test_global_string_and_pointer() {
        let insts = lower("char msg[] = \"hi\";\nchar *p = \"yo\";\nint f(void) { return 0; }");
        assert!(insts
            .iter()
            .any(|i| i.op == Op::GlobString && i.data.as_deref() == Some("hi")));
        assert!(insts
            .iter()
            .any(|i| i.op == Op::GlobAddr && i.name.as_deref() == Some("p")));
    }

    #[test]
    fn test_global_struct_with_field_designator() {
        let insts = lower(
            "struct s { int a; int b; };\nstruct s v = { .b = 5 };\nint f(void) { return v.b; }",
        );
        let g = insts.iter().find(|i| i.op == Op::GlobStruct).unwrap();
        assert_eq!(g.imm, 8);
        assert_eq!(g.data.as_deref(), Some("4:4:5"));
    }

    #[test]
    fn test_zero_struct_has_empty_payload() {
        let insts =
            lower("struct s { int a; int b; };\nstruct s v = { 0, 0 };\nint f(void) { return 0; }");
        let g = insts.iter().find(|i| i.op == Op::GlobStruct).unwrap();
        assert!(g.data.is_none());
    }

    #[test]
    fn test_nonconstant_global_initializer_fails() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int g(void);\nint x = g();\nint f(void) { return x; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
        assert_eq!(diag.diagnostics()[0].kind, DiagKind::ConstEval);
    }

    #[test]
    fn test_uninitialized_global_emits_no_directive() {
        let insts = lower("int counter;\nint f(void) { return counter; }");
        assert!(!insts.iter().any(|i| i.op.is_global_directive()));
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Load && i.name.as_deref() == Some("counter")));
    }

    #[test]
    fn test_function_address_global() {
        let insts = lower("int f(void);\nint (*fp)(void) = &f;\nint g(void) { return 0; }");
        let a = insts.iter().find(|i| i.op == Op::GlobAddr).unwrap();
        assert_eq!(a.name.as_deref(), Some("fp"));
        assert_eq!(a.data.as_deref(), Some("f"));
    }
}
