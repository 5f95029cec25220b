//! Expression checking and lowering.
//!
//! Every checker returns the expression's type together with the value
//! ID of the instruction that produced it. Integer operands go through
//! the usual arithmetic conversions; pointer arithmetic scales by the
//! element size; aggregates are represented by their address.

use super::{Analyzer, SemaResult};
use crate::ast::{BinaryOp, Expr, Initializer, SizeofArg, UnaryOp};
use crate::diag::{DiagKind, SourceLoc};
use crate::lexer::NumLit;
use crate::lir::{Inst, Op, ValKind, ValueId};
use crate::symtab::{Member, SymbolKind};
use crate::types::Type;
use std::rc::Rc;

/// Address of an lvalue plus the symbol name backing it, when the base
/// is a named variable (used for alias tagging of bit-field accesses).
pub(crate) struct LvalueAddr {
    pub ty: Type,
    pub addr: ValueId,
    pub base_name: Option<Rc<str>>,
}

impl Analyzer<'_> {
    /// Type of a numeric literal from its suffixes.
    fn lit_type(lit: &NumLit) -> Type {
        if lit.float.is_some() {
            if lit.float_suffix {
                Type::Float
            } else if lit.longs > 0 {
                Type::LDouble
            } else {
                Type::Double
            }
        } else {
            match (lit.unsigned, lit.longs) {
                (false, 0) => Type::Int,
                (true, 0) => Type::UInt,
                (false, 1) => Type::Long,
                (true, 1) => Type::ULong,
                (false, _) => Type::LLong,
                (true, _) => Type::ULLong,
            }
        }
    }

    /// Emit a conversion when the value classes differ.
    pub(crate) fn convert(&mut self, val: ValueId, from: &Type, to: &Type) -> ValueId {
        let from_kind = self.val_kind(from);
        let to_kind = self.val_kind(to);
        if from_kind == to_kind {
            return val;
        }
        self.builder.emit_value(
            Inst::new(Op::Cast)
                .src1(val)
                .imm(from_kind.code())
                .ty(to_kind),
        )
    }

    /// Element size for pointer arithmetic over `ty`'s pointee.
    pub(crate) fn elem_size_of(&mut self, ty: &Type, loc: &SourceLoc) -> SemaResult<u64> {
        let pointee = match ty.decay() {
            Type::Ptr(p) => *p,
            _ => return self.err(DiagKind::Type, loc, "pointer operation on non-pointer"),
        };
        match self.symtab.size_of(&pointee, self.target) {
            Some(s) => Ok(s),
            None => self.err(
                DiagKind::Type,
                loc,
                format!("pointer arithmetic on incomplete type '{}'", pointee),
            ),
        }
    }

    /// Widen an index or byte offset to the word size before pointer
    /// arithmetic.
    pub(crate) fn word_index(&mut self, ty: &Type, val: ValueId) -> ValueId {
        self.convert(val, ty, &Type::Long)
    }

    /// Word-sized integer constant.
    pub(crate) fn word_const(&mut self, v: i64) -> ValueId {
        let kind = self.val_kind(&Type::Long);
        self.builder.emit_value(Inst::new(Op::Const).imm(v).ty(kind))
    }

    /// Convert `val` for assignment into `target`. Narrowing to char is
    /// always permitted from integer types; other arithmetic pairs get
    /// an implicit conversion; pointers demand matching pointees (with
    /// `void *` as the wildcard).
    pub(crate) fn assignment_convert(
        &mut self,
        target: &Type,
        ty: &Type,
        val: ValueId,
        loc: &SourceLoc,
    ) -> SemaResult<ValueId> {
        if target == ty {
            return Ok(val);
        }
        let decayed = ty.decay();
        if *target == decayed {
            return Ok(val);
        }
        if matches!(target, Type::Char | Type::UChar | Type::Bool) && ty.is_integer() {
            return Ok(self.convert(val, ty, target));
        }
        if target.is_arith() && ty.is_arith() {
            return Ok(self.convert(val, ty, target));
        }
        if let Type::Ptr(want) = target {
            match &decayed {
                Type::Ptr(have) => {
                    if want == have
                        || **want == Type::Void
                        || **have == Type::Void
                        || have.is_func()
                    {
                        return Ok(val);
                    }
                }
                _ if ty.is_integer() => {
                    // Old-style integer-to-pointer assignment, kept for
                    // null constants.
                    return Ok(val);
                }
                _ => {}
            }
        }
        if target.is_integer() && decayed.is_pointer() {
            return Ok(val);
        }
        self.err(
            DiagKind::Type,
            loc,
            format!("incompatible types in assignment: '{}' from '{}'", target, ty),
        )
    }

    /// Check and lower one expression.
    pub(crate) fn check_expr(&mut self, e: &Expr) -> SemaResult<(Type, ValueId)> {
        self.builder.set_loc(e.loc());
        match e {
            Expr::Number { lit, .. } => {
                let ty = Self::lit_type(lit);
                let kind = self.val_kind(&ty);
                let id = if let Some(f) = lit.float {
                    self.builder
                        .emit_value(Inst::new(Op::FConst).imm(f.to_bits() as i64).ty(kind))
                } else {
                    self.builder
                        .emit_value(Inst::new(Op::Const).imm(lit.value as i64).ty(kind))
                };
                Ok((ty, id))
            }
            Expr::CharLit { value, wide, .. } => {
                let ty = if *wide { Type::Int } else { Type::Char };
                let kind = self.val_kind(&ty);
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::Const).imm(*value).ty(kind));
                Ok((ty, id))
            }
            Expr::StrLit { value, wide, .. } => {
                let (_, addr) = self.string_literal_addr(value, *wide)?;
                let elem = if *wide { Type::Int } else { Type::Char };
                Ok((Type::ptr_to(elem), addr))
            }
            Expr::ComplexLit { re, im, loc } => self.lower_complex_literal(re, im, loc),
            Expr::Ident { name, loc } => self.lower_ident(name, loc),
            Expr::Unary { op, operand, loc } => self.lower_unary(*op, operand, loc),
            Expr::Binary { op, lhs, rhs, loc } => self.lower_binary(*op, lhs, rhs, loc),
            Expr::Cond {
                cond,
                then_expr,
                else_expr,
                loc,
            } => self.lower_conditional(cond, then_expr, else_expr, loc),
            Expr::Assign { target, value, loc } => self.lower_assign(target, value, loc),
            Expr::AssignIndex {
                array,
                index,
                value,
                loc,
            } => self.lower_assign_index(array, index, value, loc),
            Expr::AssignMember {
                object,
                member,
                arrow,
                value,
                loc,
            } => self.lower_assign_member(object, member, *arrow, value, loc),
            Expr::Call { callee, args, loc } => self.lower_call(callee, args, loc),
            Expr::Index { array, index, loc } => self.lower_index(array, index, loc),
            Expr::Member {
                object,
                member,
                arrow,
                loc,
            } => self.lower_member(object, member, *arrow, loc),
            Expr::Sizeof { arg, loc } => {
                let ty = match arg.as_ref() {
                    SizeofArg::Type(ty) => ty.clone(),
                    SizeofArg::Expr(inner) => self.static_type_of(inner)?,
                };
                let size = match self.symtab.size_of(&ty, self.target) {
                    Some(s) => s,
                    None => {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("sizeof incomplete type '{}'", ty),
                        )
                    }
                };
                let kind = self.val_kind(&Type::ULong);
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::Const).imm(size as i64).ty(kind));
                Ok((Type::ULong, id))
            }
            Expr::Alignof { .. } | Expr::Offsetof { .. } => {
                let v = self.eval_const_expr(e)?;
                let kind = self.val_kind(&Type::ULong);
                let id = self.builder.emit_value(Inst::new(Op::Const).imm(v).ty(kind));
                Ok((Type::ULong, id))
            }
            Expr::Cast { ty, operand, loc } => {
                let (from, val) = self.check_expr(operand)?;
                if *ty == Type::Void {
                    return Ok((Type::Void, val));
                }
                if !(ty.is_arith() || ty.is_pointer())
                    || !(from.is_arith() || from.decay().is_pointer())
                {
                    return self.err(
                        DiagKind::Type,
                        loc,
                        format!("invalid cast from '{}' to '{}'", from, ty),
                    );
                }
                let id = self.convert(val, &from, ty);
                Ok((ty.clone(), id))
            }
            Expr::CompoundLit { ty, init, loc } => self.lower_compound_literal(ty, init, loc),
        }
    }

    /// Emit the data directive for a string literal and return its
    /// address.
    pub(crate) fn string_literal_addr(
        &mut self,
        value: &str,
        wide: bool,
    ) -> SemaResult<(Rc<str>, ValueId)> {
        self.next_string += 1;
        let name = self.builder.intern(&format!("__str{}", self.next_string));
        let data = self.builder.intern(value);
        let op = if wide { Op::GlobWString } else { Op::GlobString };
        let imm = if wide { 4 } else { 1 };
        self.builder.emit(
            Inst::new(op)
                .name(name.clone())
                .data(data)
                .src1(1)
                .imm(imm),
        );
        let addr = self
            .builder
            .emit_value(Inst::new(Op::AddrOf).name(name.clone()).ty(ValKind::Ptr));
        Ok((name, addr))
    }

    fn lower_ident(&mut self, name: &str, loc: &SourceLoc) -> SemaResult<(Type, ValueId)> {
        let sym = match self.symtab.lookup(name) {
            Some(sym) => sym.clone(),
            None => {
                return self.err(
                    DiagKind::Type,
                    loc,
                    format!("undeclared identifier '{}'", name),
                )
            }
        };
        match sym.kind {
            SymbolKind::EnumConst => {
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::Const).imm(sym.enum_value).ty(ValKind::I32));
                Ok((Type::Int, id))
            }
            SymbolKind::Function => {
                let ir = sym.ir_name.clone().expect("function has an IR name");
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::AddrOf).name(ir).ty(ValKind::Ptr));
                Ok((sym.ty.clone(), id))
            }
            SymbolKind::Parameter => {
                let idx = sym.param_index.expect("parameter has an index");
                let kind = self.val_kind(&sym.ty);
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::LoadParam).imm(idx as i64).ty(kind));
                Ok((sym.ty.clone(), id))
            }
            SymbolKind::Variable => {
                let ir = sym.ir_name.clone().expect("variable has an IR name");
                if sym.ty.is_array() || sym.ty.is_aggregate() {
                    let id = self
                        .builder
                        .emit_value(Inst::new(Op::AddrOf).name(ir).ty(ValKind::Ptr));
                    return Ok((sym.ty.clone(), id));
                }
                let kind = self.val_kind(&sym.ty);
                let id = self.builder.emit_value(
                    Inst::new(Op::Load)
                        .name(ir)
                        .ty(kind)
                        .volatile(sym.is_volatile),
                );
                Ok((sym.ty.clone(), id))
            }
            _ => self.err(
                DiagKind::Type,
                loc,
                format!("'{}' is not usable in an expression", name),
            ),
        }
    }

    fn lower_unary(
        &mut self,
        op: UnaryOp,
        operand: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        match op {
            UnaryOp::AddrOf => {
                let lv = self.lvalue_addr(operand)?;
                Ok((Type::ptr_to(lv.ty), lv.addr))
            }
            UnaryOp::Deref => {
                let (ty, val) = self.check_expr(operand)?;
                let pointee = match ty.decay() {
                    Type::Ptr(p) => *p,
                    _ => return self.err(DiagKind::Type, loc, "dereference of non-pointer"),
                };
                if pointee.is_aggregate() || pointee.is_array() || pointee.is_func() {
                    return Ok((pointee, val));
                }
                let restrict = self.expr_is_restrict_ptr(operand);
                let kind = self.val_kind(&pointee);
                let id = self.builder.emit_value(
                    Inst::new(Op::LoadPtr).src1(val).ty(kind).restrict(restrict),
                );
                Ok((pointee, id))
            }
            UnaryOp::Neg => {
                let (ty, val) = self.check_expr(operand)?;
                if ty.is_float() {
                    let kind = self.val_kind(&ty);
                    let id = self
                        .builder
                        .emit_value(Inst::new(Op::FNeg).src1(val).ty(kind));
                    return Ok((ty, id));
                }
                if !ty.is_integer() {
                    return self.err(DiagKind::Type, loc, "negation of non-arithmetic operand");
                }
                let pty = ty.promoted();
                let val = self.convert(val, &ty, &pty);
                let kind = self.val_kind(&pty);
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::Neg).src1(val).ty(kind));
                Ok((pty, id))
            }
            UnaryOp::Plus => {
                let (ty, val) = self.check_expr(operand)?;
                if !ty.is_arith() {
                    return self.err(DiagKind::Type, loc, "unary plus on non-arithmetic operand");
                }
                Ok((ty.promoted(), val))
            }
            UnaryOp::BitNot => {
                let (ty, val) = self.check_expr(operand)?;
                if !ty.is_integer() {
                    return self.err(DiagKind::Type, loc, "bitwise not of non-integer operand");
                }
                let pty = ty.promoted();
                let val = self.convert(val, &ty, &pty);
                let kind = self.val_kind(&pty);
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::Not).src1(val).ty(kind));
                Ok((pty, id))
            }
            UnaryOp::LogNot => {
                let (ty, val) = self.check_expr(operand)?;
                if !ty.is_arith() && !ty.decay().is_pointer() {
                    return self.err(DiagKind::Type, loc, "logical not of non-scalar operand");
                }
                let kind = self.val_kind(&ty);
                let zero = self
                    .builder
                    .emit_value(Inst::new(Op::Const).imm(0).ty(kind));
                let id = self
                    .builder
                    .emit_value(Inst::new(Op::CmpEq).src1(val).src2(zero).ty(kind));
                Ok((Type::Int, id))
            }
        }
    }

    /// True when the expression is a restrict-qualified pointer variable.
    fn expr_is_restrict_ptr(&self, e: &Expr) -> bool {
        if let Expr::Ident { name, .. } = e {
            return self
                .symtab
                .lookup(name)
                .map(|s| s.is_restrict)
                .unwrap_or(false);
        }
        false
    }

    fn lower_binary(
        &mut self,
        op: BinaryOp,
        lhs: &Expr,
        rhs: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let (lt, lv) = self.check_expr(lhs)?;
        let (rt, rv) = self.check_expr(rhs)?;
        let ld = lt.decay();
        let rd = rt.decay();

        match op {
            BinaryOp::LogAnd | BinaryOp::LogOr => {
                let code = if op == BinaryOp::LogAnd {
                    Op::LogAnd
                } else {
                    Op::LogOr
                };
                let id = self
                    .builder
                    .emit_value(Inst::new(code).src1(lv).src2(rv).ty(ValKind::I32));
                Ok((Type::Int, id))
            }
            BinaryOp::Eq | BinaryOp::Ne | BinaryOp::Lt | BinaryOp::Gt | BinaryOp::Le | BinaryOp::Ge => {
                let code = match op {
                    BinaryOp::Eq => Op::CmpEq,
                    BinaryOp::Ne => Op::CmpNe,
                    BinaryOp::Lt => Op::CmpLt,
                    BinaryOp::Le => Op::CmpLe,
                    BinaryOp::Gt => Op::CmpGt,
                    _ => Op::CmpGe,
                };
                if ld.is_pointer() || rd.is_pointer() {
                    let id = self
                        .builder
                        .emit_value(Inst::new(code).src1(lv).src2(rv).ty(ValKind::Ptr));
                    return Ok((Type::Int, id));
                }
                if !lt.is_arith() || !rt.is_arith() {
                    return self.err(DiagKind::Type, loc, "comparison of non-scalar operands");
                }
                let common = Type::usual_arith(&lt, &rt);
                let lv = self.convert(lv, &lt, &common);
                let rv = self.convert(rv, &rt, &common);
                let kind = self.val_kind(&common);
                let id = self
                    .builder
                    .emit_value(Inst::new(code).src1(lv).src2(rv).ty(kind));
                Ok((Type::Int, id))
            }
            BinaryOp::Add | BinaryOp::Sub => {
                // Pointer arithmetic first
                if ld.is_pointer() && rt.is_integer() {
                    let elem = self.elem_size_of(&lt, loc)?;
                    let rv = self.word_index(&rt, rv);
                    let idx = if op == BinaryOp::Sub {
                        let kind = self.val_kind(&Type::Long);
                        self.builder
                            .emit_value(Inst::new(Op::Neg).src1(rv).ty(kind))
                    } else {
                        rv
                    };
                    let id = self.builder.emit_value(
                        Inst::new(Op::PtrAdd)
                            .src1(lv)
                            .src2(idx)
                            .imm(elem as i64)
                            .ty(ValKind::Ptr),
                    );
                    return Ok((ld, id));
                }
                if rd.is_pointer() && lt.is_integer() && op == BinaryOp::Add {
                    let elem = self.elem_size_of(&rt, loc)?;
                    let lv = self.word_index(&lt, lv);
                    let id = self.builder.emit_value(
                        Inst::new(Op::PtrAdd)
                            .src1(rv)
                            .src2(lv)
                            .imm(elem as i64)
                            .ty(ValKind::Ptr),
                    );
                    return Ok((rd, id));
                }
                if ld.is_pointer() && rd.is_pointer() && op == BinaryOp::Sub {
                    let elem = self.elem_size_of(&lt, loc)?;
                    let kind = self.val_kind(&Type::Long);
                    let id = self.builder.emit_value(
                        Inst::new(Op::PtrDiff)
                            .src1(lv)
                            .src2(rv)
                            .imm(elem as i64)
                            .ty(kind),
                    );
                    return Ok((Type::Long, id));
                }
                self.lower_arith(op, (lt, lv), (rt, rv), loc)
            }
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
                self.lower_arith(op, (lt, lv), (rt, rv), loc)
            }
            BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor => {
                if !lt.is_integer() || !rt.is_integer() {
                    return self.err(DiagKind::Type, loc, "bitwise operator on non-integer operand");
                }
                self.lower_arith(op, (lt, lv), (rt, rv), loc)
            }
            BinaryOp::Shl | BinaryOp::Shr => {
                if !lt.is_integer() || !rt.is_integer() {
                    return self.err(DiagKind::Type, loc, "shift of non-integer operand");
                }
                let pty = lt.promoted();
                let lv = self.convert(lv, &lt, &pty);
                let code = if op == BinaryOp::Shl { Op::Shl } else { Op::Shr };
                let kind = self.val_kind(&pty);
                let id = self
                    .builder
                    .emit_value(Inst::new(code).src1(lv).src2(rv).ty(kind));
                Ok((pty, id))
            }
        }
    }

    /// Arithmetic over converted operands, integer/float/complex.
    fn lower_arith(
        &mut self,
        op: BinaryOp,
        (lt, lv): (Type, ValueId),
        (rt, rv): (Type, ValueId),
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        if !lt.is_arith() || !rt.is_arith() {
            return self.err(DiagKind::Type, loc, "arithmetic on non-arithmetic operand");
        }
        let common = Type::usual_arith(&lt, &rt);
        if common.is_complex() {
            let lv = self.to_complex(lv, &lt)?;
            let rv = self.to_complex(rv, &rt)?;
            let code = match op {
                BinaryOp::Add => Op::CAdd,
                BinaryOp::Sub => Op::CSub,
                BinaryOp::Mul => Op::CMul,
                BinaryOp::Div => Op::CDiv,
                _ => return self.err(DiagKind::Type, loc, "invalid operator on complex operands"),
            };
            let out = self.complex_temp();
            let id = self.builder.emit_value(
                Inst::new(code)
                    .src1(lv)
                    .src2(rv)
                    .imm(out)
                    .ty(ValKind::Ptr),
            );
            return Ok((Type::DoubleComplex, id));
        }
        let lv = self.convert(lv, &lt, &common);
        let rv = self.convert(rv, &rt, &common);
        let kind = self.val_kind(&common);
        let code = if common.is_float() {
            match op {
                BinaryOp::Add => Op::FAdd,
                BinaryOp::Sub => Op::FSub,
                BinaryOp::Mul => Op::FMul,
                BinaryOp::Div => Op::FDiv,
                _ => return self.err(DiagKind::Type, loc, "invalid operator on float operands"),
            }
        } else {
            match op {
                BinaryOp::Add => Op::Add,
                BinaryOp::Sub => Op::Sub,
                BinaryOp::Mul => Op::Mul,
                BinaryOp::Div => Op::Div,
                BinaryOp::Mod => Op::Mod,
                BinaryOp::BitAnd => Op::And,
                BinaryOp::BitOr => Op::Or,
                BinaryOp::BitXor => Op::Xor,
                _ => unreachable!("shift and logical handled by caller"),
            }
        };
        let id = self
            .builder
            .emit_value(Inst::new(code).src1(lv).src2(rv).ty(kind));
        Ok((common, id))
    }

    /// Allocate a stack temporary for a complex pair and return the
    /// frame offset stashed in the producing instruction's `imm`.
    fn complex_temp(&mut self) -> i64 {
        self.stack_offset += 16;
        self.stack_offset
    }

    /// Materialize a value as the address of a (re, im) pair of doubles.
    fn to_complex(&mut self, val: ValueId, ty: &Type) -> SemaResult<ValueId> {
        if ty.is_complex() {
            return Ok(val);
        }
        let fval = self.convert(val, ty, &Type::Double);
        let off = self.complex_temp();
        let name = self.builder.intern(&format!("stack:{}", off));
        let addr = self
            .builder
            .emit_value(Inst::new(Op::AddrOf).name(name.clone()).ty(ValKind::Ptr));
        self.builder.emit(
            Inst::new(Op::StorePtr)
                .src1(addr)
                .src2(fval)
                .ty(ValKind::F64),
        );
        let one = self.word_const(1);
        let im_addr = self.builder.emit_value(
            Inst::new(Op::PtrAdd)
                .src1(addr)
                .src2(one)
                .imm(8)
                .ty(ValKind::Ptr),
        );
        let zero = self
            .builder
            .emit_value(Inst::new(Op::FConst).imm(0f64.to_bits() as i64).ty(ValKind::F64));
        self.builder.emit(
            Inst::new(Op::StorePtr)
                .src1(im_addr)
                .src2(zero)
                .ty(ValKind::F64),
        );
        Ok(addr)
    }

    fn lower_complex_literal(
        &mut self,
        re: &Expr,
        im: &Expr,
        _loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let (rt, rv) = self.check_expr(re)?;
        let (it, iv) = self.check_expr(im)?;
        let rv = self.convert(rv, &rt, &Type::Double);
        let iv = self.convert(iv, &it, &Type::Double);
        let off = self.complex_temp();
        let name = self.builder.intern(&format!("stack:{}", off));
        let addr = self
            .builder
            .emit_value(Inst::new(Op::AddrOf).name(name).ty(ValKind::Ptr));
        self.builder.emit(
            Inst::new(Op::StorePtr)
                .src1(addr)
                .src2(rv)
                .ty(ValKind::F64),
        );
        let one = self.word_const(1);
        let im_addr = self.builder.emit_value(
            Inst::new(Op::PtrAdd)
                .src1(addr)
                .src2(one)
                .imm(8)
                .ty(ValKind::Ptr),
        );
        self.builder.emit(
            Inst::new(Op::StorePtr)
                .src1(im_addr)
                .src2(iv)
                .ty(ValKind::F64),
        );
        Ok((Type::DoubleComplex, addr))
    }

    fn lower_conditional(
        &mut self,
        cond: &Expr,
        then_expr: &Expr,
        else_expr: &Expr,
        _loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let (ct, cv) = self.check_expr(cond)?;
        let ck = self.val_kind(&ct);
        let else_label = self.fresh_label("cond_else");
        let end_label = self.fresh_label("cond_end");

        // Result travels through a hidden stack slot; no SSA merge here.
        self.stack_offset += 8;
        let slot = self.builder.intern(&format!("stack:{}", self.stack_offset));

        self.builder
            .emit(Inst::new(Op::BCond).src1(cv).ty(ck).name(else_label.clone()));

        let (tt, tv) = self.check_expr(then_expr)?;
        let kind = self.val_kind(&tt);
        self.builder
            .emit(Inst::new(Op::Store).name(slot.clone()).src1(tv).ty(kind));
        self.builder.emit(Inst::new(Op::Br).name(end_label.clone()));

        self.builder.emit(Inst::new(Op::Label).name(else_label));
        let (et, ev) = self.check_expr(else_expr)?;
        let ev = self.convert(ev, &et, &tt);
        self.builder
            .emit(Inst::new(Op::Store).name(slot.clone()).src1(ev).ty(kind));
        self.builder.emit(Inst::new(Op::Label).name(end_label));

        let id = self
            .builder
            .emit_value(Inst::new(Op::Load).name(slot).ty(kind));
        Ok((tt, id))
    }

    fn lower_assign(
        &mut self,
        target: &Expr,
        value: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        match target {
            Expr::Ident { name, loc: iloc } => {
                let sym = match self.symtab.lookup(name) {
                    Some(sym) => sym.clone(),
                    None => {
                        return self.err(
                            DiagKind::Type,
                            iloc,
                            format!("undeclared identifier '{}'", name),
                        )
                    }
                };
                if sym.is_const {
                    return self.err(
                        DiagKind::Type,
                        loc,
                        format!("assignment of read-only variable '{}'", name),
                    );
                }
                let (vt, vv) = self.check_expr(value)?;

                if sym.ty.is_aggregate() {
                    if vt != sym.ty {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("incompatible types in assignment: '{}' from '{}'", sym.ty, vt),
                        );
                    }
                    let size = self
                        .symtab
                        .size_of(&sym.ty, self.target)
                        .unwrap_or(0);
                    let ir = sym.ir_name.clone().expect("variable has an IR name");
                    let dst = self
                        .builder
                        .emit_value(Inst::new(Op::AddrOf).name(ir).ty(ValKind::Ptr));
                    self.emit_agg_copy(dst, vv, size);
                    return Ok((sym.ty.clone(), vv));
                }

                let vv = self.assignment_convert(&sym.ty.clone(), &vt, vv, loc)?;
                match sym.kind {
                    SymbolKind::Parameter => {
                        let idx = sym.param_index.expect("parameter has an index");
                        let kind = self.val_kind(&sym.ty);
                        self.builder.emit(
                            Inst::new(Op::StoreParam).src1(vv).imm(idx as i64).ty(kind),
                        );
                    }
                    SymbolKind::Variable => {
                        let ir = sym.ir_name.clone().expect("variable has an IR name");
                        let kind = self.val_kind(&sym.ty);
                        self.builder.emit(
                            Inst::new(Op::Store)
                                .name(ir)
                                .src1(vv)
                                .ty(kind)
                                .volatile(sym.is_volatile),
                        );
                    }
                    _ => {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("'{}' is not assignable", name),
                        )
                    }
                }
                Ok((sym.ty.clone(), vv))
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
                ..
            } => {
                let (pty, pv) = self.check_expr(operand)?;
                let pointee = match pty.decay() {
                    Type::Ptr(p) => *p,
                    _ => return self.err(DiagKind::Type, loc, "dereference of non-pointer"),
                };
                let (vt, vv) = self.check_expr(value)?;
                if pointee.is_aggregate() {
                    let size = self.symtab.size_of(&pointee, self.target).unwrap_or(0);
                    self.emit_agg_copy(pv, vv, size);
                    return Ok((pointee, vv));
                }
                let vv = self.assignment_convert(&pointee, &vt, vv, loc)?;
                let restrict = self.expr_is_restrict_ptr(operand);
                let kind = self.val_kind(&pointee);
                self.builder.emit(
                    Inst::new(Op::StorePtr)
                        .src1(pv)
                        .src2(vv)
                        .ty(kind)
                        .restrict(restrict),
                );
                Ok((pointee, vv))
            }
            _ => self.err(DiagKind::Type, loc, "expression is not assignable"),
        }
    }

    fn lower_assign_index(
        &mut self,
        array: &Expr,
        index: &Expr,
        value: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        // Simple named arrays keep their name on the store for alias
        // analysis; everything else goes through a computed pointer.
        if let Expr::Ident { name, .. } = array {
            if let Some(sym) = self.symtab.lookup(name).cloned() {
                if sym.kind == SymbolKind::Variable && sym.ty.is_array() {
                    let elem = match &sym.ty {
                        Type::Array { elem, .. } => (**elem).clone(),
                        _ => unreachable!(),
                    };
                    let elem_size = match self.symtab.size_of(&elem, self.target) {
                        Some(s) => s,
                        None => {
                            return self.err(DiagKind::Type, loc, "array of incomplete element type")
                        }
                    };
                    let (it, iv) = self.check_expr(index)?;
                    if !it.is_integer() {
                        return self.err(DiagKind::Type, loc, "array subscript is not an integer");
                    }
                    let iv = self.word_index(&it, iv);
                    let (vt, vv) = self.check_expr(value)?;
                    if elem.is_aggregate() {
                        let ir = sym.ir_name.clone().expect("variable has an IR name");
                        let base = self
                            .builder
                            .emit_value(Inst::new(Op::AddrOf).name(ir).ty(ValKind::Ptr));
                        let addr = self.builder.emit_value(
                            Inst::new(Op::PtrAdd)
                                .src1(base)
                                .src2(iv)
                                .imm(elem_size as i64)
                                .ty(ValKind::Ptr),
                        );
                        self.emit_agg_copy(addr, vv, elem_size);
                        return Ok((elem, vv));
                    }
                    let vv = self.assignment_convert(&elem, &vt, vv, loc)?;
                    let ir = sym.ir_name.clone().expect("variable has an IR name");
                    let kind = self.val_kind(&elem);
                    self.builder.emit(
                        Inst::new(Op::StoreIdx)
                            .name(ir)
                            .src1(iv)
                            .src2(vv)
                            .imm(elem_size as i64)
                            .ty(kind)
                            .volatile(sym.is_volatile),
                    );
                    return Ok((elem, vv));
                }
            }
        }

        let (at, av) = self.check_expr(array)?;
        let elem = match at.decay() {
            Type::Ptr(p) => *p,
            _ => return self.err(DiagKind::Type, loc, "subscript of non-array"),
        };
        let elem_size = self.elem_size_of(&at, loc)?;
        let (it, iv) = self.check_expr(index)?;
        if !it.is_integer() {
            return self.err(DiagKind::Type, loc, "array subscript is not an integer");
        }
        let iv = self.word_index(&it, iv);
        let addr = self.builder.emit_value(
            Inst::new(Op::PtrAdd)
                .src1(av)
                .src2(iv)
                .imm(elem_size as i64)
                .ty(ValKind::Ptr),
        );
        let (vt, vv) = self.check_expr(value)?;
        if elem.is_aggregate() {
            self.emit_agg_copy(addr, vv, elem_size);
            return Ok((elem, vv));
        }
        let vv = self.assignment_convert(&elem, &vt, vv, loc)?;
        let kind = self.val_kind(&elem);
        self.builder
            .emit(Inst::new(Op::StorePtr).src1(addr).src2(vv).ty(kind));
        Ok((elem, vv))
    }

    /// Resolve a member access into its layout entry and byte address.
    fn member_addr(
        &mut self,
        object: &Expr,
        member: &str,
        arrow: bool,
        loc: &SourceLoc,
    ) -> SemaResult<(Member, ValueId, Option<Rc<str>>)> {
        let (oty, oval, base_name) = if arrow {
            let (ty, val) = self.check_expr(object)?;
            let pointee = match ty.decay() {
                Type::Ptr(p) => *p,
                _ => return self.err(DiagKind::Type, loc, "'->' on non-pointer"),
            };
            (pointee, val, None)
        } else {
            let lv = self.lvalue_addr(object)?;
            (lv.ty, lv.addr, lv.base_name)
        };

        let layout = match self.symtab.layout_of(&oty) {
            Some(l) if l.complete => l.clone(),
            _ => {
                return self.err(
                    DiagKind::Type,
                    loc,
                    format!("member access on incomplete type '{}'", oty),
                )
            }
        };
        let m = match layout.member(member) {
            Some(m) => m.clone(),
            None => {
                return self.err(
                    DiagKind::Type,
                    loc,
                    format!("no member '{}' in '{}'", member, oty),
                )
            }
        };

        let addr = if m.offset == 0 {
            oval
        } else {
            let off = self.word_const(m.offset as i64);
            self.builder.emit_value(
                Inst::new(Op::PtrAdd)
                    .src1(oval)
                    .src2(off)
                    .imm(1)
                    .ty(ValKind::Ptr),
            )
        };
        Ok((m, addr, base_name))
    }

    fn lower_member(
        &mut self,
        object: &Expr,
        member: &str,
        arrow: bool,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let (m, addr, base_name) = self.member_addr(object, member, arrow, loc)?;
        if m.bit_width > 0 {
            let mut inst = Inst::new(Op::BfLoad)
                .src1(addr)
                .imm(((m.bit_offset as i64) << 8) | m.bit_width as i64)
                .ty(ValKind::U8);
            if let Some(name) = base_name {
                inst = inst.name(name);
            }
            let id = self.builder.emit_value(inst);
            return Ok((Type::Int, id));
        }
        if m.ty.is_aggregate() || m.ty.is_array() {
            return Ok((m.ty.clone(), addr));
        }
        let kind = self.val_kind(&m.ty);
        let id = self
            .builder
            .emit_value(Inst::new(Op::LoadPtr).src1(addr).ty(kind));
        Ok((m.ty.clone(), id))
    }

    fn lower_assign_member(
        &mut self,
        object: &Expr,
        member: &str,
        arrow: bool,
        value: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let (m, addr, base_name) = self.member_addr(object, member, arrow, loc)?;
        let (vt, vv) = self.check_expr(value)?;
        if m.bit_width > 0 {
            if !vt.is_integer() {
                return self.err(DiagKind::Type, loc, "bit-field assigned non-integer value");
            }
            let mut inst = Inst::new(Op::BfStore)
                .src1(addr)
                .src2(vv)
                .imm(((m.bit_offset as i64) << 8) | m.bit_width as i64)
                .ty(ValKind::U8);
            if let Some(name) = base_name {
                inst = inst.name(name);
            }
            self.builder.emit(inst);
            return Ok((Type::Int, vv));
        }
        if m.ty.is_aggregate() {
            let size = self.symtab.size_of(&m.ty, self.target).unwrap_or(0);
            self.emit_agg_copy(addr, vv, size);
            return Ok((m.ty.clone(), vv));
        }
        let vv = self.assignment_convert(&m.ty.clone(), &vt, vv, loc)?;
        let kind = self.val_kind(&m.ty);
        self.builder
            .emit(Inst::new(Op::StorePtr).src1(addr).src2(vv).ty(kind));
        Ok((m.ty.clone(), vv))
    }

    fn lower_index(
        &mut self,
        array: &Expr,
        index: &Expr,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        // Named arrays load through LoadIdx, keeping the name visible to
        // alias analysis.
        if let Expr::Ident { name, .. } = array {
            if let Some(sym) = self.symtab.lookup(name).cloned() {
                if sym.kind == SymbolKind::Variable && sym.ty.is_array() {
                    let elem = match &sym.ty {
                        Type::Array { elem, .. } => (**elem).clone(),
                        _ => unreachable!(),
                    };
                    let elem_size = match self.symtab.size_of(&elem, self.target) {
                        Some(s) => s,
                        None => {
                            return self.err(DiagKind::Type, loc, "array of incomplete element type")
                        }
                    };
                    let (it, iv) = self.check_expr(index)?;
                    if !it.is_integer() {
                        return self.err(DiagKind::Type, loc, "array subscript is not an integer");
                    }
                    let iv = self.word_index(&it, iv);
                    let ir = sym.ir_name.clone().expect("variable has an IR name");
                    if elem.is_aggregate() || elem.is_array() {
                        let base = self
                            .builder
                            .emit_value(Inst::new(Op::AddrOf).name(ir).ty(ValKind::Ptr));
                        let addr = self.builder.emit_value(
                            Inst::new(Op::PtrAdd)
                                .src1(base)
                                .src2(iv)
                                .imm(elem_size as i64)
                                .ty(ValKind::Ptr),
                        );
                        return Ok((elem, addr));
                    }
                    let kind = self.val_kind(&elem);
                    let id = self.builder.emit_value(
                        Inst::new(Op::LoadIdx)
                            .name(ir)
                            .src1(iv)
                            .imm(elem_size as i64)
                            .ty(kind)
                            .volatile(sym.is_volatile),
                    );
                    return Ok((elem, id));
                }
            }
        }

        let (at, av) = self.check_expr(array)?;
        let elem = match at.decay() {
            Type::Ptr(p) => *p,
            _ => return self.err(DiagKind::Type, loc, "subscript of non-array"),
        };
        let elem_size = self.elem_size_of(&at, loc)?;
        let (it, iv) = self.check_expr(index)?;
        if !it.is_integer() {
            return self.err(DiagKind::Type, loc, "array subscript is not an integer");
        }
        let iv = self.word_index(&it, iv);
        let addr = self.builder.emit_value(
            Inst::new(Op::PtrAdd)
                .src1(av)
                .src2(iv)
                .imm(elem_size as i64)
                .ty(ValKind::Ptr),
        );
        if elem.is_aggregate() || elem.is_array() {
            return Ok((elem, addr));
        }
        let kind = self.val_kind(&elem);
        let id = self
            .builder
            .emit_value(Inst::new(Op::LoadPtr).src1(addr).ty(kind));
        Ok((elem, id))
    }

    fn lower_call(
        &mut self,
        callee: &Expr,
        args: &[Expr],
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        // Direct call through a function symbol
        if let Expr::Ident { name, .. } = callee {
            if let Some(sym) = self.symtab.lookup(name).cloned() {
                if sym.kind == SymbolKind::Function {
                    let sig = sym.sig.clone().expect("function has a signature");
                    if args.len() < sig.params.len()
                        || (!sig.variadic && args.len() > sig.params.len())
                    {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!(
                                "wrong number of arguments to '{}': expected {}, got {}",
                                name,
                                sig.params.len(),
                                args.len()
                            ),
                        );
                    }
                    return self.emit_call_common(
                        Some(sym.ir_name.clone().expect("function has an IR name")),
                        None,
                        &sig.ret,
                        &sig.params,
                        args,
                        loc,
                    );
                }
            }
        }

        // Indirect call through a function pointer value
        let (cty, cv) = self.check_expr(callee)?;
        let fnty = match cty.decay() {
            Type::Ptr(inner) if inner.is_func() => *inner,
            Type::Func { .. } => cty.clone(),
            _ => return self.err(DiagKind::Type, loc, "call of non-function"),
        };
        let (ret, params, variadic) = match &fnty {
            Type::Func {
                ret,
                params,
                variadic,
            } => ((**ret).clone(), params.clone(), *variadic),
            _ => unreachable!(),
        };
        if args.len() < params.len() || (!variadic && args.len() > params.len()) {
            return self.err(
                DiagKind::Type,
                loc,
                format!(
                    "wrong number of arguments: expected {}, got {}",
                    params.len(),
                    args.len()
                ),
            );
        }
        self.emit_call_common(None, Some(cv), &ret, &params, args, loc)
    }

    /// Shared tail of direct and indirect calls: arguments pushed
    /// right-to-left, hidden aggregate-return pointer in slot 0.
    fn emit_call_common(
        &mut self,
        direct: Option<Rc<str>>,
        indirect: Option<ValueId>,
        ret: &Type,
        params: &[Type],
        args: &[Expr],
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let returns_agg = ret.is_aggregate();
        let shift = if returns_agg { 1 } else { 0 };

        let mut values = Vec::with_capacity(args.len());
        for (i, arg) in args.iter().enumerate() {
            let (at, av) = self.check_expr(arg)?;
            if at.is_aggregate() {
                return self.err(
                    DiagKind::Type,
                    arg.loc(),
                    "passing aggregates by value is not supported",
                );
            }
            let (av, kind) = if let Some(pty) = params.get(i) {
                let pty = pty.clone();
                let av = self.assignment_convert(&pty, &at, av, arg.loc())?;
                (av, self.val_kind(&pty))
            } else {
                // Variadic tail: default argument promotions
                let promoted = if at == Type::Float {
                    Type::Double
                } else {
                    at.promoted()
                };
                let av = self.convert(av, &at, &promoted);
                (av, self.val_kind(&promoted))
            };
            values.push((av, kind));
        }

        // Hidden return buffer for aggregate-returning callees
        let ret_buf = if returns_agg {
            let size = match self.symtab.size_of(ret, self.target) {
                Some(s) => s,
                None => return self.err(DiagKind::Type, loc, "call returning incomplete type"),
            };
            self.stack_offset += size.div_ceil(4).max(1) as i64 * 4;
            let name = self.builder.intern(&format!("stack:{}", self.stack_offset));
            let addr = self
                .builder
                .emit_value(Inst::new(Op::AddrOf).name(name).ty(ValKind::Ptr));
            Some(addr)
        } else {
            None
        };

        // Push right-to-left so slot 0 lands on top of the stack.
        for (i, (val, kind)) in values.iter().enumerate().rev() {
            self.builder.emit(
                Inst::new(Op::Arg)
                    .src1(*val)
                    .imm((i + shift) as i64)
                    .ty(*kind),
            );
        }
        if let Some(buf) = ret_buf {
            self.builder
                .emit(Inst::new(Op::Arg).src1(buf).imm(0).ty(ValKind::Ptr));
        }

        let total_args = args.len() + shift;
        let ret_kind = self.val_kind(ret);

        let id = match (direct, indirect) {
            (Some(name), _) => {
                let inst = Inst::new(Op::Call).name(name).imm(total_args as i64);
                if *ret == Type::Void || returns_agg {
                    self.builder.emit(inst.ty(ValKind::Void));
                    0
                } else {
                    self.builder.emit_value(inst.ty(ret_kind))
                }
            }
            (None, Some(fv)) => {
                let inst = Inst::new(Op::CallIndirect)
                    .src1(fv)
                    .imm(total_args as i64);
                if *ret == Type::Void || returns_agg {
                    self.builder.emit(inst.ty(ValKind::Void));
                    0
                } else {
                    self.builder.emit_value(inst.ty(ret_kind))
                }
            }
            _ => unreachable!("one callee form is always present"),
        };

        if let Some(buf) = ret_buf {
            return Ok((ret.clone(), buf));
        }
        Ok((ret.clone(), id))
    }

    /// Unrolled word-at-a-time aggregate copy.
    pub(crate) fn emit_agg_copy(&mut self, dst: ValueId, src: ValueId, size: u64) {
        let word = self.target.word_size();
        let mut offset = 0u64;
        while offset < size {
            let chunk = if size - offset >= word { word } else { 1 };
            let kind = match chunk {
                8 => ValKind::I64,
                4 => ValKind::I32,
                _ => ValKind::I8,
            };
            let idx = self.word_const(offset as i64);
            let sp = self.builder.emit_value(
                Inst::new(Op::PtrAdd)
                    .src1(src)
                    .src2(idx)
                    .imm(1)
                    .ty(ValKind::Ptr),
            );
            let v = self
                .builder
                .emit_value(Inst::new(Op::LoadPtr).src1(sp).ty(kind));
            let idx2 = self.word_const(offset as i64);
            let dp = self.builder.emit_value(
                Inst::new(Op::PtrAdd)
                    .src1(dst)
                    .src2(idx2)
                    .imm(1)
                    .ty(ValKind::Ptr),
            );
            self.builder
                .emit(Inst::new(Op::StorePtr).src1(dp).src2(v).ty(kind));
            offset += chunk;
        }
    }

    /// Address of an lvalue expression.
    pub(crate) fn lvalue_addr(&mut self, e: &Expr) -> SemaResult<LvalueAddr> {
        match e {
            Expr::Ident { name, loc } => {
                let sym = match self.symtab.lookup(name) {
                    Some(sym) => sym.clone(),
                    None => {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("undeclared identifier '{}'", name),
                        )
                    }
                };
                match sym.kind {
                    SymbolKind::Variable | SymbolKind::Function => {
                        let ir = sym.ir_name.clone().expect("symbol has an IR name");
                        let addr = self
                            .builder
                            .emit_value(Inst::new(Op::AddrOf).name(ir.clone()).ty(ValKind::Ptr));
                        Ok(LvalueAddr {
                            ty: sym.ty.clone(),
                            addr,
                            base_name: Some(ir),
                        })
                    }
                    SymbolKind::Parameter => self.err(
                        DiagKind::Type,
                        loc,
                        format!("cannot take the address of parameter '{}'", name),
                    ),
                    _ => self.err(
                        DiagKind::Type,
                        loc,
                        format!("cannot take the address of '{}'", name),
                    ),
                }
            }
            Expr::Unary {
                op: UnaryOp::Deref,
                operand,
                loc,
            } => {
                let (ty, val) = self.check_expr(operand)?;
                match ty.decay() {
                    Type::Ptr(p) => Ok(LvalueAddr {
                        ty: *p,
                        addr: val,
                        base_name: None,
                    }),
                    _ => self.err(DiagKind::Type, loc, "dereference of non-pointer"),
                }
            }
            Expr::Index { array, index, loc } => {
                let (at, av) = self.check_expr(array)?;
                let elem = match at.decay() {
                    Type::Ptr(p) => *p,
                    _ => return self.err(DiagKind::Type, loc, "subscript of non-array"),
                };
                let elem_size = self.elem_size_of(&at, loc)?;
                let (it, iv) = self.check_expr(index)?;
                if !it.is_integer() {
                    return self.err(DiagKind::Type, loc, "array subscript is not an integer");
                }
                let iv = self.word_index(&it, iv);
                let addr = self.builder.emit_value(
                    Inst::new(Op::PtrAdd)
                        .src1(av)
                        .src2(iv)
                        .imm(elem_size as i64)
                        .ty(ValKind::Ptr),
                );
                Ok(LvalueAddr {
                    ty: elem,
                    addr,
                    base_name: None,
                })
            }
            Expr::Member {
                object,
                member,
                arrow,
                loc,
            } => {
                let (m, addr, base_name) = self.member_addr(object, member, *arrow, loc)?;
                if m.bit_width > 0 {
                    return self.err(
                        DiagKind::Type,
                        loc,
                        format!("cannot take the address of bit-field '{}'", member),
                    );
                }
                Ok(LvalueAddr {
                    ty: m.ty.clone(),
                    addr,
                    base_name,
                })
            }
            Expr::StrLit { value, wide, .. } => {
                let (name, addr) = self.string_literal_addr(value, *wide)?;
                let elem = if *wide { Type::Int } else { Type::Char };
                Ok(LvalueAddr {
                    ty: Type::array_of(elem, Some(value.len() as u64 + 1)),
                    addr,
                    base_name: Some(name),
                })
            }
            Expr::CompoundLit { ty, init, loc } => {
                let (ty, addr) = self.lower_compound_literal(ty, init, loc)?;
                Ok(LvalueAddr {
                    ty,
                    addr,
                    base_name: None,
                })
            }
            other => self.err(DiagKind::Type, other.loc(), "expression is not an lvalue"),
        }
    }

    /// `(type){ ... }` materialized into an anonymous stack object.
    fn lower_compound_literal(
        &mut self,
        ty: &Type,
        init: &Initializer,
        loc: &SourceLoc,
    ) -> SemaResult<(Type, ValueId)> {
        let mut ty = ty.clone();
        if let Type::Array { len, size_expr, .. } = &mut ty {
            if len.is_none() {
                if let Some(size) = size_expr.clone() {
                    let n = self.eval_const_expr(&size)?;
                    *len = Some(n as u64);
                } else if let Initializer::List(items) = init {
                    *len = Some(items.len() as u64);
                }
            }
        }
        let size = match self.symtab.size_of(&ty, self.target) {
            Some(s) => s,
            None => {
                return self.err(
                    DiagKind::Type,
                    loc,
                    format!("compound literal of incomplete type '{}'", ty),
                )
            }
        };
        self.stack_offset += size.div_ceil(4).max(1) as i64 * 4;
        let name = self.builder.intern(&format!("stack:{}", self.stack_offset));
        self.init_local_object(&ty, name.clone(), init, loc)?;
        let addr = self
            .builder
            .emit_value(Inst::new(Op::AddrOf).name(name).ty(ValKind::Ptr));
        Ok((ty, addr))
    }
}

#[cfg(test)]
mod tests {
    use crate::lir::Op;
    use crate::sema::test_util::{lower, lower_on};
    use crate::types::Target;

    #[test]
    fn test_pointer_arithmetic_scales_by_element_size() {
        // int is four bytes on both targets, so the scale is 4 either way
        let src = "int *shift(int *p) { return p + 2; }";
        let insts32 = lower(src);
        let pa32 = insts32.iter().find(|i| i.op == Op::PtrAdd).unwrap();
        assert_eq!(pa32.imm, 4);

        let insts64 = lower_on(src, Target { x86_64: true });
        let pa64 = insts64.iter().find(|i| i.op == Op::PtrAdd).unwrap();
        assert_eq!(pa64.imm, 4);
    }

    #[test]
    fn test_pointer_difference_scales_too() {
        let insts = lower("long gap(int *a, int *b) { return a - b; }");
        let pd = insts.iter().find(|i| i.op == Op::PtrDiff).unwrap();
        assert_eq!(pd.imm, 4);
    }

    #[test]
    fn test_short_circuit_becomes_pseudo_op() {
        let insts = lower("int f(int a, int b) { return a && b; }");
        assert!(insts.iter().any(|i| i.op == Op::LogAnd));
        let or = lower("int f(int a, int b) { return a || b; }");
        assert!(or.iter().any(|i| i.op == Op::LogOr));
    }

    #[test]
    fn test_member_access_adds_offset() {
        let insts = lower(
            "struct pt { int x; int y; };\nint get_y(struct pt *p) { return p->y; }",
        );
        // y sits at offset 4; the address comes from a byte-scaled add
        let pa = insts.iter().find(|i| i.op == Op::PtrAdd).unwrap();
        assert_eq!(pa.imm, 1);
        let off = insts.iter().find(|i| i.dest == pa.src2).unwrap();
        assert_eq!(off.op, Op::Const);
        assert_eq!(off.imm, 4);
    }

    #[test]
    fn test_string_literal_produces_directive_and_address() {
        let insts = lower("char *s(void) { return \"abc\"; }");
        let gs = insts.iter().find(|i| i.op == Op::GlobString).unwrap();
        assert_eq!(gs.data.as_deref(), Some("abc"));
        let name = gs.name.clone().unwrap();
        assert!(insts
            .iter()
            .any(|i| i.op == Op::AddrOf && i.name.as_ref() == Some(&name)));
    }

    #[test]
    fn test_assignment_narrowing_to_char_is_allowed() {
        let insts = lower("void f(int n) { char c; c = n; }");
        assert!(insts.iter().any(|i| i.op == Op::Cast));
        assert!(insts.iter().any(|i| i.op == Op::Store));
    }

    #[test]
    fn test_wrong_arity_is_type_error() {
        use crate::diag::{DiagContext, DiagKind};
        use crate::sema::test_util::try_lower;
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int add(int a, int b) { return a + b; }\nint f(void) { return add(1); }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
        assert_eq!(diag.diagnostics()[0].kind, DiagKind::Type);
    }

    #[test]
    fn test_call_pushes_args_right_to_left() {
        let insts = lower("int g(int a, int b);\nint f(void) { return g(1, 2); }");
        let args: Vec<i64> = insts
            .iter()
            .filter(|i| i.op == Op::Arg)
            .map(|i| i.imm)
            .collect();
        assert_eq!(args, vec![1, 0], "slot 1 is pushed before slot 0");
    }
}
