//! Statement lowering.
//!
//! Control flow becomes labels and branches in the shapes the emitter
//! expects: `BCond` with `imm == 0` branches when its operand is zero
//! (the if/loop exit sense), `imm == 1` branches when it is nonzero
//! (the switch dispatch sense). Locals receive frame offsets here;
//! block-scope statics are renamed `__staticN` and emitted as global
//! data.

use super::{Analyzer, SemaResult};
use crate::ast::{Expr, Initializer, Stmt, StorageClass, SwitchCase, VarDecl};
use crate::diag::{DiagKind, SourceLoc};
use crate::lir::{Inst, Op, ValKind, ValueId};
use crate::symtab::{Storage, Symbol, SymbolKind};
use crate::types::Type;
use std::collections::HashSet;
use std::rc::Rc;

impl Analyzer<'_> {
    pub(crate) fn lower_stmt(&mut self, stmt: &Stmt) -> SemaResult<()> {
        match stmt {
            Stmt::Expr(e) => {
                self.check_expr(e)?;
                Ok(())
            }
            Stmt::Return { value, loc } => self.lower_return(value.as_ref(), loc),
            Stmt::VarDecl(decl) => self.lower_local_decl(decl),
            Stmt::If {
                cond,
                then_branch,
                else_branch,
                loc,
            } => self.lower_if(cond, then_branch, else_branch.as_deref(), loc),
            Stmt::While { cond, body, loc } => self.lower_while(cond, body, loc),
            Stmt::DoWhile { body, cond, loc } => self.lower_do_while(body, cond, loc),
            Stmt::For {
                init,
                cond,
                step,
                body,
                loc,
            } => self.lower_for(init.as_deref(), cond.as_ref(), step.as_ref(), body, loc),
            Stmt::Switch {
                cond,
                cases,
                default,
                loc,
            } => self.lower_switch(cond, cases, default.as_deref(), loc),
            Stmt::Break { loc } => match self.break_labels.last().cloned() {
                Some(label) => {
                    self.builder.set_loc(loc);
                    self.builder.emit(Inst::new(Op::Br).name(label));
                    Ok(())
                }
                None => self.err(DiagKind::Type, loc, "'break' outside of a loop or switch"),
            },
            Stmt::Continue { loc } => match self.continue_labels.last().cloned() {
                Some(label) => {
                    self.builder.set_loc(loc);
                    self.builder.emit(Inst::new(Op::Br).name(label));
                    Ok(())
                }
                None => self.err(DiagKind::Type, loc, "'continue' outside of a loop"),
            },
            Stmt::Label { name, loc } => {
                self.builder.set_loc(loc);
                let ir = self.user_label(name);
                self.builder.emit(Inst::new(Op::Label).name(ir));
                Ok(())
            }
            Stmt::Goto { name, loc } => {
                self.builder.set_loc(loc);
                let ir = self.user_label(name);
                self.builder.emit(Inst::new(Op::Br).name(ir));
                Ok(())
            }
            Stmt::StaticAssert { cond, message, loc } => {
                let v = self.eval_const_expr(cond)?;
                if v == 0 {
                    let msg = match message {
                        Some(m) => format!("static assertion failed: {}", m),
                        None => "static assertion failed".to_string(),
                    };
                    return self.err(DiagKind::ConstEval, loc, msg);
                }
                Ok(())
            }
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
            Stmt::Block(stmts) => {
                let snap = self.symtab.snapshot();
                for s in stmts {
                    self.lower_stmt(s)?;
                }
                self.symtab.pop_to(snap);
                Ok(())
            }
        }
    }

    pub(crate) fn declare_enum(
        &mut self,
        tag: Option<&str>,
        enumerators: &[(String, Option<Expr>, SourceLoc)],
    ) -> SemaResult<()> {
        let tag_name = tag.unwrap_or("__anon_enum").to_string();
        if self.symtab.lookup_tag(&tag_name).is_none() {
            self.symtab.add_tag(Symbol::new(
                tag_name.clone(),
                SymbolKind::EnumTag,
                Type::Enum(tag_name.clone()),
            ));
        }
        let mut next = 0i64;
        for (name, value, _loc) in enumerators {
            if let Some(e) = value {
                next = self.eval_const_expr(e)?;
            }
            let mut sym = Symbol::new(name.clone(), SymbolKind::EnumConst, Type::Int);
            sym.enum_value = next;
            self.symtab.add(sym);
            next = next.wrapping_add(1);
        }
        Ok(())
    }

    fn lower_return(&mut self, value: Option<&Expr>, loc: &SourceLoc) -> SemaResult<()> {
        self.builder.set_loc(loc);
        match value {
            None => {
                if self.cur_ret != Type::Void {
                    return self.err(DiagKind::Type, loc, "return with no value in non-void function");
                }
                self.builder.emit(Inst::new(Op::Return));
                Ok(())
            }
            Some(e) => {
                let (ty, val) = self.check_expr(e)?;
                let ret = self.cur_ret.clone();
                if ret.is_aggregate() {
                    if ty != ret {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("returning '{}' from a function returning '{}'", ty, ret),
                        );
                    }
                    let size = self.symtab.size_of(&ret, self.target).unwrap_or(0);
                    let hidden = self.agg_ret_ptr.expect("aggregate return pointer loaded");
                    self.builder.emit(
                        Inst::new(Op::ReturnAgg)
                            .src1(val)
                            .src2(hidden)
                            .imm(size as i64),
                    );
                    return Ok(());
                }
                if ret == Type::Void {
                    return self.err(DiagKind::Type, loc, "return with a value in void function");
                }
                let val = self.assignment_convert(&ret, &ty, val, loc)?;
                let kind = self.val_kind(&ret);
                self.builder.emit(Inst::new(Op::Return).src1(val).ty(kind));
                Ok(())
            }
        }
    }

    fn lower_if(
        &mut self,
        cond: &Expr,
        then_branch: &Stmt,
        else_branch: Option<&Stmt>,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        self.builder.set_loc(loc);
        let (ct, cv) = self.check_expr(cond)?;
        let ck = self.val_kind(&ct);
        let end_label = self.fresh_label("end");

        match else_branch {
            None => {
                self.builder
                    .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(end_label.clone()));
                self.lower_stmt(then_branch)?;
                self.builder.emit(Inst::new(Op::Label).name(end_label));
            }
            Some(else_stmt) => {
                let else_label = self.fresh_label("else");
                self.builder
                    .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(else_label.clone()));
                self.lower_stmt(then_branch)?;
                self.builder.emit(Inst::new(Op::Br).name(end_label.clone()));
                self.builder.emit(Inst::new(Op::Label).name(else_label));
                self.lower_stmt(else_stmt)?;
                self.builder.emit(Inst::new(Op::Label).name(end_label));
            }
        }
        Ok(())
    }

    fn lower_while(&mut self, cond: &Expr, body: &Stmt, loc: &SourceLoc) -> SemaResult<()> {
        self.builder.set_loc(loc);
        let start = self.fresh_label("while_start");
        let end = self.fresh_label("while_end");

        self.builder.emit(Inst::new(Op::Label).name(start.clone()));
        let (ct, cv) = self.check_expr(cond)?;
        let ck = self.val_kind(&ct);
        self.builder
            .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(end.clone()));

        self.break_labels.push(end.clone());
        self.continue_labels.push(start.clone());
        let body_result = self.lower_stmt(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        body_result?;

        self.builder.emit(Inst::new(Op::Br).name(start));
        self.builder.emit(Inst::new(Op::Label).name(end));
        Ok(())
    }

    fn lower_do_while(&mut self, body: &Stmt, cond: &Expr, loc: &SourceLoc) -> SemaResult<()> {
        self.builder.set_loc(loc);
        let start = self.fresh_label("do_start");
        let cont = self.fresh_label("do_cont");
        let end = self.fresh_label("do_end");

        self.builder.emit(Inst::new(Op::Label).name(start.clone()));

        self.break_labels.push(end.clone());
        self.continue_labels.push(cont.clone());
        let body_result = self.lower_stmt(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        body_result?;

        self.builder.emit(Inst::new(Op::Label).name(cont));
        let (ct, cv) = self.check_expr(cond)?;
        let ck = self.val_kind(&ct);
        self.builder
            .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(end.clone()));
        self.builder.emit(Inst::new(Op::Br).name(start));
        self.builder.emit(Inst::new(Op::Label).name(end));
        Ok(())
    }

    fn lower_for(
        &mut self,
        init: Option<&Stmt>,
        cond: Option<&Expr>,
        step: Option<&Expr>,
        body: &Stmt,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        self.builder.set_loc(loc);
        let snap = self.symtab.snapshot();

        if let Some(init_stmt) = init {
            self.lower_stmt(init_stmt)?;
        }

        let start = self.fresh_label("for_start");
        let cont = self.fresh_label("for_cont");
        let end = self.fresh_label("for_end");

        self.builder.emit(Inst::new(Op::Label).name(start.clone()));
        if let Some(c) = cond {
            let (ct, cv) = self.check_expr(c)?;
            let ck = self.val_kind(&ct);
            self.builder
                .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(end.clone()));
        }

        self.break_labels.push(end.clone());
        self.continue_labels.push(cont.clone());
        let body_result = self.lower_stmt(body);
        self.break_labels.pop();
        self.continue_labels.pop();
        body_result?;

        self.builder.emit(Inst::new(Op::Label).name(cont));
        if let Some(s) = step {
            self.check_expr(s)?;
        }
        self.builder.emit(Inst::new(Op::Br).name(start));
        self.builder.emit(Inst::new(Op::Label).name(end));

        self.symtab.pop_to(snap);
        Ok(())
    }

    fn lower_switch(
        &mut self,
        cond: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        self.builder.set_loc(loc);
        let (dt, dv) = self.check_expr(cond)?;
        if !dt.is_integer() {
            return self.err(DiagKind::Type, loc, "switch on non-integer value");
        }
        let kind = self.val_kind(&dt);

        let end = self.fresh_label("switch_end");
        let mut seen: HashSet<i64> = HashSet::new();
        let mut case_labels: Vec<(Rc<str>, i64)> = Vec::new();

        // Dispatch chain: one compare-and-branch per case value.
        for case in cases {
            let value = self.eval_const_expr(&case.value)?;
            if !seen.insert(value) {
                return self.err(
                    DiagKind::Layout,
                    &case.loc,
                    format!("duplicate case value {}", value),
                );
            }
            let label = self.fresh_label("case");
            let cval = self
                .builder
                .emit_value(Inst::new(Op::Const).imm(value).ty(kind));
            let eq = self
                .builder
                .emit_value(Inst::new(Op::CmpEq).src1(dv).src2(cval).ty(kind));
            self.builder
                .emit(Inst::new(Op::BCond).src1(eq).imm(1).ty(kind).name(label.clone()));
            case_labels.push((label, value));
        }

        let default_label = default.map(|_| self.fresh_label("default"));
        match &default_label {
            Some(label) => self.builder.emit(Inst::new(Op::Br).name(label.clone())),
            None => self.builder.emit(Inst::new(Op::Br).name(end.clone())),
        }

        self.break_labels.push(end.clone());
        let mut result = Ok(());
        for (case, (label, _)) in cases.iter().zip(&case_labels) {
            self.builder.emit(Inst::new(Op::Label).name(label.clone()));
            for s in &case.body {
                if let Err(e) = self.lower_stmt(s) {
                    result = Err(e);
                    break;
                }
            }
            if result.is_err() {
                break;
            }
            self.builder.emit(Inst::new(Op::Br).name(end.clone()));
        }
        if result.is_ok() {
            if let (Some(body), Some(label)) = (default, &default_label) {
                self.builder.emit(Inst::new(Op::Label).name(label.clone()));
                for s in body {
                    if let Err(e) = self.lower_stmt(s) {
                        result = Err(e);
                        break;
                    }
                }
            }
        }
        self.break_labels.pop();
        result?;

        self.builder.emit(Inst::new(Op::Label).name(end));
        Ok(())
    }

    /// Resolve array size expressions in a declared type; a non-constant
    /// size marks a VLA and is left for the declaration site to handle.
    pub(crate) fn resolve_decl_type(&mut self, mut ty: Type, loc: &SourceLoc) -> SemaResult<Type> {
        if let Type::Array { elem, len, size_expr } = &mut ty {
            let resolved = self.resolve_decl_type((**elem).clone(), loc)?;
            **elem = resolved;
            if len.is_none() {
                if let Some(size) = size_expr.clone() {
                    // Constant size when foldable; otherwise a VLA
                    let cp = self.diag.checkpoint();
                    match self.eval_const_expr(&size) {
                        Ok(n) => {
                            if n <= 0 {
                                return self.err(
                                    DiagKind::Layout,
                                    loc,
                                    "array has non-positive size",
                                );
                            }
                            *len = Some(n as u64);
                            *size_expr = None;
                        }
                        Err(_) => self.diag.rollback(cp),
                    }
                }
            }
        }
        Ok(ty)
    }

    fn lower_local_decl(&mut self, decl: &VarDecl) -> SemaResult<()> {
        self.builder.set_loc(&decl.loc);
        let ty = self.resolve_decl_type(decl.ty.clone(), &decl.loc)?;

        match decl.storage {
            StorageClass::Extern => {
                let ir = self.builder.intern(&decl.name);
                let mut sym = Symbol::new(decl.name.clone(), SymbolKind::Variable, ty);
                sym.storage = Storage::Extern;
                sym.ir_name = Some(ir);
                sym.is_const = decl.quals.is_const;
                sym.is_volatile = decl.quals.is_volatile;
                sym.is_restrict = decl.quals.is_restrict;
                self.symtab.add(sym);
                Ok(())
            }
            StorageClass::Static => {
                // Block-scope statics live in the data section under a
                // synthesized globally-unique name.
                self.next_static += 1;
                let unique = format!("__static{}", self.next_static);
                let ir = self.builder.intern(&unique);
                if let Some(size) = self.symtab.size_of(&ty, self.target) {
                    self.object_sizes.insert(ir.clone(), size);
                }
                self.emit_global_object(ir.clone(), &ty, decl.init.as_ref(), true, &decl.loc)?;
                let mut sym = Symbol::new(decl.name.clone(), SymbolKind::Variable, ty);
                sym.storage = Storage::Static;
                sym.ir_name = Some(ir);
                sym.is_const = decl.quals.is_const;
                sym.is_volatile = decl.quals.is_volatile;
                self.symtab.add(sym);
                Ok(())
            }
            StorageClass::Typedef => {
                self.symtab
                    .add(Symbol::new(decl.name.clone(), SymbolKind::Typedef, ty));
                Ok(())
            }
            StorageClass::None => self.lower_auto_decl(decl, ty),
        }
    }

    /// Plain local: assign a frame slot, lower any initializer.
    fn lower_auto_decl(&mut self, decl: &VarDecl, ty: Type) -> SemaResult<()> {
        // Runtime-sized array: allocate dynamically, bind a pointer slot.
        if let Type::Array {
            elem,
            len: None,
            size_expr: Some(size),
        } = &ty
        {
            let elem_ty = (**elem).clone();
            let size = (**size).clone();
            let elem_size = match self.symtab.size_of(&elem_ty, self.target) {
                Some(s) => s,
                None => {
                    return self.err(DiagKind::Type, &decl.loc, "array of incomplete element type")
                }
            };
            let (ct, cv) = self.check_expr(&size)?;
            if !ct.is_integer() {
                return self.err(DiagKind::Type, &decl.loc, "array size is not an integer");
            }
            let es = self
                .builder
                .emit_value(Inst::new(Op::Const).imm(elem_size as i64).ty(ValKind::I32));
            let bytes = self
                .builder
                .emit_value(Inst::new(Op::Mul).src1(cv).src2(es).ty(ValKind::I32));
            let addr = self
                .builder
                .emit_value(Inst::new(Op::Alloca).src1(bytes).ty(ValKind::Ptr));

            let word = self.target.word_size() as i64;
            self.stack_offset += word.max(4);
            let slot = self.builder.intern(&format!("stack:{}", self.stack_offset));
            self.builder.emit(
                Inst::new(Op::Store)
                    .name(slot.clone())
                    .src1(addr)
                    .ty(ValKind::Ptr),
            );
            let mut sym = Symbol::new(
                decl.name.clone(),
                SymbolKind::Variable,
                Type::ptr_to(elem_ty),
            );
            sym.storage = Storage::Auto;
            sym.ir_name = Some(slot);
            sym.stack_offset = Some(self.stack_offset);
            self.symtab.add(sym);
            return Ok(());
        }

        // Arrays with an unknown length take it from the initializer.
        let mut ty = ty;
        if let Type::Array {
            len: len @ None,
            size_expr: None,
            ..
        } = &mut ty
        {
            match &decl.init {
                Some(Initializer::List(items)) => *len = Some(items.len() as u64),
                Some(Initializer::Expr(Expr::StrLit { value, .. })) => {
                    *len = Some(value.len() as u64 + 1)
                }
                _ => {
                    return self.err(
                        DiagKind::Type,
                        &decl.loc,
                        format!("array '{}' has no size", decl.name),
                    )
                }
            }
        }

        let size = match self.symtab.size_of(&ty, self.target) {
            Some(s) => s,
            None => {
                return self.err(
                    DiagKind::Type,
                    &decl.loc,
                    format!("variable '{}' has incomplete type", decl.name),
                )
            }
        };
        self.stack_offset += size.div_ceil(4).max(1) as i64 * 4;
        let slot = self.builder.intern(&format!("stack:{}", self.stack_offset));

        let mut sym = Symbol::new(decl.name.clone(), SymbolKind::Variable, ty.clone());
        sym.storage = Storage::Auto;
        sym.ir_name = Some(slot.clone());
        sym.stack_offset = Some(self.stack_offset);
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
        sym.is_restrict = decl.quals.is_restrict;
        self.symtab.add(sym);

        if let Some(init) = &decl.init {
            self.init_local_object(&ty, slot, init, &decl.loc)?;
        }
        Ok(())
    }

    /// Initialize a local object named `name` of type `ty`.
    pub(crate) fn init_local_object(
        &mut self,
        ty: &Type,
        name: Rc<str>,
        init: &Initializer,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        // Scalars store through their name so constant propagation can
        // track them.
        if !ty.is_array() && !ty.is_aggregate() {
            let expr = match init {
                Initializer::Expr(e) => e,
                Initializer::List(items) => match items.first() {
                    Some(item) => match &item.init {
                        Initializer::Expr(e) => e,
                        Initializer::List(_) => {
                            return self.err(DiagKind::Type, loc, "too many braces around scalar")
                        }
                    },
                    None => return Ok(()),
                },
            };
            let (vt, vv) = self.check_expr(expr)?;
            let vv = self.assignment_convert(ty, &vt, vv, loc)?;
            let kind = self.val_kind(ty);
            self.builder
                .emit(Inst::new(Op::Store).name(name).src1(vv).ty(kind));
            return Ok(());
        }

        let addr = self
            .builder
            .emit_value(Inst::new(Op::AddrOf).name(name).ty(ValKind::Ptr));
        self.init_at_addr(addr, ty, init, loc)
    }

    /// Recursive initializer walk writing through a base address.
    fn init_at_addr(
        &mut self,
        addr: ValueId,
        ty: &Type,
        init: &Initializer,
        loc: &SourceLoc,
    ) -> SemaResult<()> {
        match (ty, init) {
            (Type::Array { elem, len, .. }, Initializer::List(items)) => {
                let elem_ty = (**elem).clone();
                let elem_size = match self.symtab.size_of(&elem_ty, self.target) {
                    Some(s) => s,
                    None => return self.err(DiagKind::Type, loc, "array of incomplete element type"),
                };
                let mut index: i64 = 0;
                for item in items {
                    if let Some(crate::ast::Designator::Index(e)) = &item.designator {
                        index = self.eval_const_expr(e)?;
                    }
                    if let Some(n) = len {
                        if index as u64 >= *n {
                            return self.err(
                                DiagKind::Type,
                                loc,
                                format!("initializer index {} out of bounds", index),
                            );
                        }
                    }
                    let iv = self.word_const(index);
                    let elem_addr = self.builder.emit_value(
                        Inst::new(Op::PtrAdd)
                            .src1(addr)
                            .src2(iv)
                            .imm(elem_size as i64)
                            .ty(ValKind::Ptr),
                    );
                    self.init_at_addr(elem_addr, &elem_ty, &item.init, loc)?;
                    index += 1;
                }
                Ok(())
            }
            (Type::Array { elem, len, .. }, Initializer::Expr(Expr::StrLit { value, .. })) => {
                // Character array initialized from a string literal
                if !matches!(**elem, Type::Char | Type::UChar) {
                    return self.err(DiagKind::Type, loc, "string initializer for non-char array");
                }
                let limit = len.unwrap_or(value.len() as u64 + 1);
                for (i, byte) in value
                    .bytes()
                    .chain(std::iter::once(0))
                    .take(limit as usize)
                    .enumerate()
                {
                    let bv = self
                        .builder
                        .emit_value(Inst::new(Op::Const).imm(byte as i64).ty(ValKind::I8));
                    let iv = self.word_const(i as i64);
                    let ea = self.builder.emit_value(
                        Inst::new(Op::PtrAdd)
                            .src1(addr)
                            .src2(iv)
                            .imm(1)
                            .ty(ValKind::Ptr),
                    );
                    self.builder
                        .emit(Inst::new(Op::StorePtr).src1(ea).src2(bv).ty(ValKind::I8));
                }
                Ok(())
            }
            (Type::Struct(_), Initializer::List(items)) => {
                let layout = match self.symtab.layout_of(ty) {
                    Some(l) if l.complete => l.clone(),
                    _ => return self.err(DiagKind::Type, loc, "initializer for incomplete type"),
                };
                let mut index = 0usize;
                for item in items {
                    if let Some(crate::ast::Designator::Field(field)) = &item.designator {
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
                    let off = self.word_const(m.offset as i64);
                    let maddr = self.builder.emit_value(
                        Inst::new(Op::PtrAdd)
                            .src1(addr)
                            .src2(off)
                            .imm(1)
                            .ty(ValKind::Ptr),
                    );
                    if m.bit_width > 0 {
                        let expr = match &item.init {
                            Initializer::Expr(e) => e.clone(),
                            _ => {
                                return self.err(DiagKind::Type, loc, "braced bit-field initializer")
                            }
                        };
                        let (vt, vv) = self.check_expr(&expr)?;
                        if !vt.is_integer() {
                            return self.err(DiagKind::Type, loc, "bit-field initializer not integer");
                        }
                        self.builder.emit(
                            Inst::new(Op::BfStore)
                                .src1(maddr)
                                .src2(vv)
                                .imm(((m.bit_offset as i64) << 8) | m.bit_width as i64)
                                .ty(ValKind::U8),
                        );
                    } else {
                        self.init_at_addr(maddr, &m.ty, &item.init, loc)?;
                    }
                    index += 1;
                }
                Ok(())
            }
            (Type::Union(_), Initializer::List(items)) => {
                let layout = match self.symtab.layout_of(ty) {
                    Some(l) if l.complete => l.clone(),
                    _ => return self.err(DiagKind::Type, loc, "initializer for incomplete type"),
                };
                // Only the first member (or the designated one) applies.
                if let Some(item) = items.first() {
                    let member = match &item.designator {
                        Some(crate::ast::Designator::Field(field)) => {
                            layout.member(field).cloned()
                        }
                        _ => layout.members.first().cloned(),
                    };
                    let m = match member {
                        Some(m) => m,
                        None => return Ok(()),
                    };
                    self.init_at_addr(addr, &m.ty, &item.init, loc)?;
                }
                Ok(())
            }
            (_, Initializer::Expr(e)) => {
                let (vt, vv) = self.check_expr(e)?;
                if ty.is_aggregate() {
                    if vt != *ty {
                        return self.err(DiagKind::Type, loc, "incompatible aggregate initializer");
                    }
                    let size = self.symtab.size_of(ty, self.target).unwrap_or(0);
                    self.emit_agg_copy(addr, vv, size);
                    return Ok(());
                }
                let vv = self.assignment_convert(ty, &vt, vv, loc)?;
                let kind = self.val_kind(ty);
                self.builder
                    .emit(Inst::new(Op::StorePtr).src1(addr).src2(vv).ty(kind));
                Ok(())
            }
            _ => self.err(DiagKind::Type, loc, "invalid initializer"),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::diag::{DiagContext, DiagKind};
    use crate::lir::{Op, ValKind};
    use crate::sema::test_util::{lower, try_lower};
    use crate::types::Target;

    #[test]
    fn test_if_lowering_shape() {
        let insts = lower("int f(int x) { if (x) { return 1; } return 0; }");
        let bcond = insts.iter().position(|i| i.op == Op::BCond).unwrap();
        let target = insts[bcond].name.clone().unwrap();
        // The branch target label exists after the then-body
        assert!(insts[bcond..]
            .iter()
            .any(|i| i.op == Op::Label && i.name.as_deref() == Some(&*target)));
    }

    #[test]
    fn test_while_loop_shape() {
        let insts = lower("int f(int n) { while (n) { n = n - 1; } return n; }");
        // label start; ...; bcond end; ...; br start; label end
        let labels: Vec<_> = insts.iter().filter(|i| i.op == Op::Label).collect();
        assert!(labels.len() >= 2);
        let start = labels[0].name.clone().unwrap();
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Br && i.name.as_deref() == Some(&*start)));
    }

    #[test]
    fn test_for_continue_targets_step_label() {
        let insts = lower(
            "int f(void) { int s; s = 0; for (int i = 0; i < 4; i = i + 1) { continue; } return s; }",
        );
        assert!(crate::lir::verify(&insts).is_ok());
    }

    #[test]
    fn test_switch_emits_dispatch_chain() {
        let insts = lower(
            "int f(int x) { switch (x) { case 1: return 1; case 2: return 2; } return 0; }",
        );
        let eqs = insts.iter().filter(|i| i.op == Op::CmpEq).count();
        assert_eq!(eqs, 2);
        // Dispatch branches take the branch-if-true sense
        let bconds: Vec<_> = insts.iter().filter(|i| i.op == Op::BCond).collect();
        assert!(bconds.iter().all(|i| i.imm == 1));
    }

    #[test]
    fn test_duplicate_case_is_layout_error() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(int x) { switch (x) { case 1: return 1; case 1: return 2; } return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
        assert_eq!(diag.diagnostics()[0].kind, DiagKind::Layout);
    }

    #[test]
    fn test_break_outside_loop_is_error() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(void) { break; return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_static_local_renamed() {
        let insts = lower("int f(void) { static int x = 7; return x; }");
        assert!(insts
            .iter()
            .any(|i| i.op == Op::GlobVar && i.name.as_deref() == Some("__static1") && i.imm == 7));
        // Loads refer to the synthesized name, not a stack slot
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Load && i.name.as_deref() == Some("__static1")));
        assert!(!insts
            .iter()
            .any(|i| i.op == Op::Load && i.name.as_deref().is_some_and(|n| n.starts_with("stack:"))));
    }

    #[test]
    fn test_locals_get_distinct_stack_slots() {
        let insts = lower("int f(void) { int a; int b; a = 1; b = 2; return a; }");
        let stores: Vec<_> = insts
            .iter()
            .filter(|i| i.op == Op::Store)
            .filter_map(|i| i.name.clone())
            .collect();
        assert_eq!(stores.len(), 2);
        assert_ne!(stores[0], stores[1]);
        assert!(stores.iter().all(|n| n.starts_with("stack:")));
    }

    #[test]
    fn test_goto_forward_reference() {
        let insts = lower("int f(void) { goto out; out: return 1; }");
        let br = insts.iter().find(|i| i.op == Op::Br).unwrap();
        assert!(br.name.as_deref().unwrap().starts_with("Luser"));
        assert!(crate::lir::verify(&insts).is_ok());
    }

    #[test]
    fn test_undefined_goto_label_is_error() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(void) { goto nowhere; return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_vla_allocates_dynamically() {
        let insts = lower("int f(int n) { int buf[n]; buf[0] = 1; return buf[0]; }");
        assert!(insts.iter().any(|i| i.op == Op::Alloca));
    }

    #[test]
    fn test_string_array_initializer() {
        let insts = lower("void f(void) { char msg[4] = \"hey\"; }");
        // Three characters plus the terminator stored bytewise
        let byte_stores = insts
            .iter()
            .filter(|i| i.op == Op::StorePtr && i.ty == ValKind::I8)
            .count();
        assert_eq!(byte_stores, 4);
    }
}
