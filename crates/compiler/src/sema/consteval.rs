//! Constant-expression evaluation.
//!
//! Used wherever the language demands a compile-time constant: global
//! initializers, case labels, static assertions, enum values, array
//! sizes, and bit-field widths. Evaluation is recursive and free of side
//! effects; any subexpression that is not constant fails with the
//! location of the offending node. Signed arithmetic wraps; division by
//! zero is an error here (the optimizer's folder, which must not fail,
//! folds it to zero instead).

use super::{Analyzer, SemaResult};
use crate::ast::{BinaryOp, Expr, SizeofArg, UnaryOp};
use crate::diag::DiagKind;
use crate::symtab::SymbolKind;
use crate::types::Type;

impl Analyzer<'_> {
    /// Evaluate a constant integer expression.
    pub(crate) fn eval_const_expr(&mut self, e: &Expr) -> SemaResult<i64> {
        match e {
            Expr::Number { lit, loc } => {
                if lit.float.is_some() {
                    return self.err(
                        DiagKind::ConstEval,
                        loc,
                        "floating literal in integer constant expression",
                    );
                }
                Ok(lit.value as i64)
            }
            Expr::CharLit { value, .. } => Ok(*value),
            Expr::Ident { name, loc } => {
                match self.symtab.lookup(name) {
                    Some(sym) if sym.kind == SymbolKind::EnumConst => Ok(sym.enum_value),
                    Some(_) => self.err(
                        DiagKind::ConstEval,
                        loc,
                        format!("'{}' is not a constant", name),
                    ),
                    None => self.err(
                        DiagKind::ConstEval,
                        loc,
                        format!("undeclared identifier '{}'", name),
                    ),
                }
            }
            Expr::Unary { op, operand, loc } => {
                let v = self.eval_const_expr(operand)?;
                match op {
                    UnaryOp::Neg => Ok(v.wrapping_neg()),
                    UnaryOp::Plus => Ok(v),
                    UnaryOp::BitNot => Ok(!v),
                    UnaryOp::LogNot => Ok((v == 0) as i64),
                    UnaryOp::Deref | UnaryOp::AddrOf => self.err(
                        DiagKind::ConstEval,
                        loc,
                        "pointer operation in constant expression",
                    ),
                }
            }
            Expr::Binary { op, lhs, rhs, loc } => {
                let l = self.eval_const_expr(lhs)?;
                // Logical operators short-circuit even at compile time.
                match op {
                    BinaryOp::LogAnd => {
                        if l == 0 {
                            return Ok(0);
                        }
                        let r = self.eval_const_expr(rhs)?;
                        return Ok((r != 0) as i64);
                    }
                    BinaryOp::LogOr => {
                        if l != 0 {
                            return Ok(1);
                        }
                        let r = self.eval_const_expr(rhs)?;
                        return Ok((r != 0) as i64);
                    }
                    _ => {}
                }
                let r = self.eval_const_expr(rhs)?;
                match op {
                    BinaryOp::Add => Ok(l.wrapping_add(r)),
                    BinaryOp::Sub => Ok(l.wrapping_sub(r)),
                    BinaryOp::Mul => Ok(l.wrapping_mul(r)),
                    BinaryOp::Div => {
                        if r == 0 {
                            self.err(DiagKind::ConstEval, loc, "division by zero in constant expression")
                        } else {
                            Ok(l.wrapping_div(r))
                        }
                    }
                    BinaryOp::Mod => {
                        if r == 0 {
                            self.err(DiagKind::ConstEval, loc, "division by zero in constant expression")
                        } else {
                            Ok(l.wrapping_rem(r))
                        }
                    }
                    BinaryOp::BitAnd => Ok(l & r),
                    BinaryOp::BitOr => Ok(l | r),
                    BinaryOp::BitXor => Ok(l ^ r),
                    BinaryOp::Shl => Ok(l.wrapping_shl(self.shift_amount(r))),
                    BinaryOp::Shr => Ok(l.wrapping_shr(self.shift_amount(r))),
                    BinaryOp::Lt => Ok((l < r) as i64),
                    BinaryOp::Gt => Ok((l > r) as i64),
                    BinaryOp::Le => Ok((l <= r) as i64),
                    BinaryOp::Ge => Ok((l >= r) as i64),
                    BinaryOp::Eq => Ok((l == r) as i64),
                    BinaryOp::Ne => Ok((l != r) as i64),
                    BinaryOp::LogAnd | BinaryOp::LogOr => unreachable!("handled above"),
                }
            }
            Expr::Cond {
                cond,
                then_expr,
                else_expr,
                ..
            } => {
                let c = self.eval_const_expr(cond)?;
                if c != 0 {
                    self.eval_const_expr(then_expr)
                } else {
                    self.eval_const_expr(else_expr)
                }
            }
            Expr::Cast { ty, operand, loc } => {
                let v = self.eval_const_expr(operand)?;
                self.truncate_to(ty, v, loc)
            }
            Expr::Sizeof { arg, loc } => {
                let ty = match arg.as_ref() {
                    SizeofArg::Type(ty) => ty.clone(),
                    SizeofArg::Expr(inner) => self.static_type_of(inner)?,
                };
                match self.symtab.size_of(&ty, self.target) {
                    Some(s) => Ok(s as i64),
                    None => self.err(
                        DiagKind::ConstEval,
                        loc,
                        format!("sizeof incomplete type '{}'", ty),
                    ),
                }
            }
            Expr::Alignof { ty, loc } => match self.symtab.align_of(ty, self.target) {
                Some(a) => Ok(a as i64),
                None => self.err(
                    DiagKind::ConstEval,
                    loc,
                    format!("alignof incomplete type '{}'", ty),
                ),
            },
            Expr::Offsetof { ty, member, loc } => {
                let layout = match self.symtab.layout_of(ty) {
                    Some(l) if l.complete => l.clone(),
                    _ => {
                        return self.err(
                            DiagKind::ConstEval,
                            loc,
                            format!("offsetof incomplete type '{}'", ty),
                        )
                    }
                };
                match layout.member(member) {
                    Some(m) => Ok(m.offset as i64),
                    None => self.err(
                        DiagKind::ConstEval,
                        loc,
                        format!("no member '{}' in '{}'", member, ty),
                    ),
                }
            }
            other => self.err(
                DiagKind::ConstEval,
                other.loc(),
                "expression is not constant",
            ),
        }
    }

    /// Shift counts respect the platform word width.
    fn shift_amount(&self, r: i64) -> u32 {
        let width = if self.target.x86_64 { 64 } else { 32 };
        (r as u32) % width
    }

    /// Truncate a constant through an integer cast.
    fn truncate_to(&mut self, ty: &Type, v: i64, loc: &crate::diag::SourceLoc) -> SemaResult<i64> {
        let size = match ty.scalar_size(self.target) {
            Some(s) if ty.is_integer() || ty.is_pointer() => s,
            _ => {
                return self.err(
                    DiagKind::ConstEval,
                    loc,
                    format!("cast to '{}' in constant expression", ty),
                )
            }
        };
        let v = match size {
            1 => {
                if ty.is_unsigned() {
                    (v as u8) as i64
                } else {
                    (v as i8) as i64
                }
            }
            2 => {
                if ty.is_unsigned() {
                    (v as u16) as i64
                } else {
                    (v as i16) as i64
                }
            }
            4 => {
                if ty.is_unsigned() {
                    (v as u32) as i64
                } else {
                    (v as i32) as i64
                }
            }
            _ => v,
        };
        Ok(v)
    }

    /// Type of an expression without lowering it; used by `sizeof` on
    /// expression operands.
    pub(crate) fn static_type_of(&mut self, e: &Expr) -> SemaResult<Type> {
        match e {
            Expr::Number { lit, .. } => Ok(if lit.float.is_some() {
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
            }),
            Expr::CharLit { wide, .. } => Ok(if *wide { Type::Int } else { Type::Char }),
            Expr::StrLit { value, wide, .. } => {
                let elem = if *wide { Type::Int } else { Type::Char };
                Ok(Type::array_of(elem, Some(value.len() as u64 + 1)))
            }
            Expr::ComplexLit { .. } => Ok(Type::DoubleComplex),
            Expr::Ident { name, loc } => match self.symtab.lookup(name) {
                Some(sym) => Ok(sym.ty.clone()),
                None => self.err(
                    DiagKind::Type,
                    loc,
                    format!("undeclared identifier '{}'", name),
                ),
            },
            Expr::Unary { op, operand, loc } => {
                let inner = self.static_type_of(operand)?;
                match op {
                    UnaryOp::Deref => match inner.decay() {
                        Type::Ptr(p) => Ok(*p),
                        _ => self.err(DiagKind::Type, loc, "dereference of non-pointer"),
                    },
                    UnaryOp::AddrOf => Ok(Type::ptr_to(inner)),
                    UnaryOp::LogNot => Ok(Type::Int),
                    _ => Ok(inner.promoted()),
                }
            }
            Expr::Binary { op, lhs, rhs, .. } => {
                let l = self.static_type_of(lhs)?;
                let r = self.static_type_of(rhs)?;
                match op {
                    BinaryOp::Lt
                    | BinaryOp::Gt
                    | BinaryOp::Le
                    | BinaryOp::Ge
                    | BinaryOp::Eq
                    | BinaryOp::Ne
                    | BinaryOp::LogAnd
                    | BinaryOp::LogOr => Ok(Type::Int),
                    _ => {
                        if l.decay().is_pointer() {
                            Ok(l.decay())
                        } else if r.decay().is_pointer() {
                            Ok(r.decay())
                        } else {
                            Ok(Type::usual_arith(&l, &r))
                        }
                    }
                }
            }
            Expr::Cond { then_expr, .. } => self.static_type_of(then_expr),
            Expr::Assign { target, .. } => self.static_type_of(target),
            Expr::AssignIndex { array, .. } => {
                let at = self.static_type_of(array)?;
                match at.decay() {
                    Type::Ptr(p) => Ok(*p),
                    _ => Ok(Type::Int),
                }
            }
            Expr::AssignMember {
                object,
                member,
                arrow,
                loc,
                ..
            }
            | Expr::Member {
                object,
                member,
                arrow,
                loc,
            } => {
                let mut oty = self.static_type_of(object)?;
                if *arrow {
                    oty = match oty.decay() {
                        Type::Ptr(p) => *p,
                        _ => return self.err(DiagKind::Type, loc, "'->' on non-pointer"),
                    };
                }
                let layout = match self.symtab.layout_of(&oty) {
                    Some(l) => l.clone(),
                    None => {
                        return self.err(
                            DiagKind::Type,
                            loc,
                            format!("member access on non-aggregate '{}'", oty),
                        )
                    }
                };
                match layout.member(member) {
                    Some(m) => Ok(m.ty.clone()),
                    None => self.err(
                        DiagKind::Type,
                        loc,
                        format!("no member '{}' in '{}'", member, oty),
                    ),
                }
            }
            Expr::Call { callee, loc, .. } => {
                let cty = self.static_type_of(callee)?;
                match cty {
                    Type::Func { ret, .. } => Ok(*ret),
                    Type::Ptr(inner) => match *inner {
                        Type::Func { ret, .. } => Ok(*ret),
                        _ => self.err(DiagKind::Type, loc, "call of non-function"),
                    },
                    _ => self.err(DiagKind::Type, loc, "call of non-function"),
                }
            }
            Expr::Index { array, loc, .. } => {
                let at = self.static_type_of(array)?;
                match at.decay() {
                    Type::Ptr(p) => Ok(*p),
                    _ => self.err(DiagKind::Type, loc, "subscript of non-array"),
                }
            }
            Expr::Sizeof { .. } | Expr::Alignof { .. } | Expr::Offsetof { .. } => Ok(Type::ULong),
            Expr::Cast { ty, .. } => Ok(ty.clone()),
            Expr::CompoundLit { ty, .. } => Ok(ty.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::diag::{DiagContext, DiagKind};
    use crate::lir::Op;
    use crate::sema::test_util::{lower, lower_on, try_lower};
    use crate::types::Target;

    fn first_const(src: &str) -> i64 {
        lower(src)
            .iter()
            .find(|i| i.op == Op::Const)
            .expect("const")
            .imm
    }

    #[test]
    fn test_enum_constants_resolve() {
        let v = first_const("enum e { A = 3, B };\nint f(void) { return B; }");
        assert_eq!(v, 4);
    }

    #[test]
    fn test_static_assert_passes_and_fails() {
        lower("int f(void) { _Static_assert(1 + 1 == 2, \"arith\"); return 0; }");

        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(void) { _Static_assert(0, \"no\"); return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_nonconstant_case_label_is_error() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "int f(int x) { switch (x) { case x: return 1; } return 0; }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
        assert_eq!(diag.diagnostics()[0].kind, DiagKind::ConstEval);
    }

    #[test]
    fn test_sizeof_tracks_platform() {
        let v32 = first_const("int f(void) { return (int)sizeof(long); }");
        assert_eq!(v32, 4);
        let insts = lower_on(
            "int f(void) { return (int)sizeof(long); }",
            Target { x86_64: true },
        );
        let v64 = insts.iter().find(|i| i.op == Op::Const).unwrap().imm;
        assert_eq!(v64, 8);
    }

    #[test]
    fn test_signed_overflow_wraps() {
        // 2147483647 + 1 wraps once cast back to a 32-bit int
        let v = first_const("enum e { M = (int)(2147483647 + 1) };\nint f(void) { return M; }");
        assert_eq!(v, -2147483648);
    }

    #[test]
    fn test_conditional_and_logic_fold() {
        let v = first_const("enum e { V = (1 && 2) ? 10 : 20 };\nint f(void) { return V; }");
        assert_eq!(v, 10);
    }
}
