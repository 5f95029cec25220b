//! Constant folding.
//!
//! Rewrites pure operations whose operands are known constants into
//! `Const`/`FConst` in place. Signed integer arithmetic wraps at the
//! operation's width; division by zero folds to zero; shift counts are
//! taken modulo the operand width. Running the pass twice produces the
//! same list as running it once.

use crate::lir::{Inst, Op, ValKind, ValueId};
use std::collections::HashMap;

/// Wrap a 64-bit intermediate to the value kind's width and signedness.
fn wrap(kind: ValKind, v: i64) -> i64 {
    match kind {
        ValKind::I8 => (v as i8) as i64,
        ValKind::U8 => (v as u8) as i64,
        ValKind::I16 => (v as i16) as i64,
        ValKind::U16 => (v as u16) as i64,
        ValKind::I32 => (v as i32) as i64,
        ValKind::U32 => (v as u32) as i64,
        _ => v,
    }
}

fn shift_mask(kind: ValKind) -> u32 {
    match kind {
        ValKind::I64 | ValKind::U64 => 63,
        _ => 31,
    }
}

fn rewrite_to_const(inst: &mut Inst, value: i64) {
    let dest = inst.dest;
    let ty = inst.ty;
    let loc = inst.loc.clone();
    *inst = Inst {
        dest,
        ty,
        loc,
        ..Inst::new(Op::Const).imm(value)
    };
}

fn rewrite_to_fconst(inst: &mut Inst, value: f64) {
    let dest = inst.dest;
    let ty = inst.ty;
    let loc = inst.loc.clone();
    *inst = Inst {
        dest,
        ty,
        loc,
        ..Inst::new(Op::FConst).imm(value.to_bits() as i64)
    };
}

pub(super) fn run(insts: &mut [Inst]) {
    let mut ints: HashMap<ValueId, i64> = HashMap::new();
    let mut floats: HashMap<ValueId, f64> = HashMap::new();

    for idx in 0..insts.len() {
        let inst = &insts[idx];
        let op = inst.op;
        let kind = inst.ty;

        match op {
            Op::Const => {
                ints.insert(inst.dest, inst.imm);
                continue;
            }
            Op::FConst => {
                floats.insert(inst.dest, f64::from_bits(inst.imm as u64));
                continue;
            }
            _ => {}
        }
        if !op.is_pure() {
            continue;
        }

        let i1 = ints.get(&inst.src1).copied();
        let i2 = ints.get(&inst.src2).copied();
        let f1 = floats.get(&inst.src1).copied();
        let f2 = floats.get(&inst.src2).copied();
        let unsigned = kind.is_unsigned();

        let folded: Option<i64> = match op {
            Op::Add => i1.zip(i2).map(|(a, b)| a.wrapping_add(b)),
            Op::Sub => i1.zip(i2).map(|(a, b)| a.wrapping_sub(b)),
            Op::Mul => i1.zip(i2).map(|(a, b)| a.wrapping_mul(b)),
            Op::Div => i1.zip(i2).map(|(a, b)| {
                if b == 0 {
                    0
                } else if unsigned {
                    ((wrap(kind, a) as u64) / (wrap(kind, b) as u64)) as i64
                } else {
                    a.wrapping_div(b)
                }
            }),
            Op::Mod => i1.zip(i2).map(|(a, b)| {
                if b == 0 {
                    0
                } else if unsigned {
                    ((wrap(kind, a) as u64) % (wrap(kind, b) as u64)) as i64
                } else {
                    a.wrapping_rem(b)
                }
            }),
            Op::Neg => i1.map(|a| a.wrapping_neg()),
            Op::And => i1.zip(i2).map(|(a, b)| a & b),
            Op::Or => i1.zip(i2).map(|(a, b)| a | b),
            Op::Xor => i1.zip(i2).map(|(a, b)| a ^ b),
            Op::Not => i1.map(|a| !a),
            Op::Shl => i1
                .zip(i2)
                .map(|(a, b)| a.wrapping_shl((b as u32) & shift_mask(kind))),
            Op::Shr => i1.zip(i2).map(|(a, b)| {
                let count = (b as u32) & shift_mask(kind);
                if unsigned {
                    ((wrap(kind, a) as u64).wrapping_shr(count)) as i64
                } else {
                    a.wrapping_shr(count)
                }
            }),
            Op::CmpEq | Op::CmpNe | Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe => {
                if kind.is_float() {
                    f1.zip(f2).map(|(a, b)| {
                        let r = match op {
                            Op::CmpEq => a == b,
                            Op::CmpNe => a != b,
                            Op::CmpLt => a < b,
                            Op::CmpLe => a <= b,
                            Op::CmpGt => a > b,
                            _ => a >= b,
                        };
                        r as i64
                    })
                } else {
                    i1.zip(i2).map(|(a, b)| {
                        let r = if unsigned {
                            let (a, b) = (wrap(kind, a) as u64, wrap(kind, b) as u64);
                            match op {
                                Op::CmpEq => a == b,
                                Op::CmpNe => a != b,
                                Op::CmpLt => a < b,
                                Op::CmpLe => a <= b,
                                Op::CmpGt => a > b,
                                _ => a >= b,
                            }
                        } else {
                            match op {
                                Op::CmpEq => a == b,
                                Op::CmpNe => a != b,
                                Op::CmpLt => a < b,
                                Op::CmpLe => a <= b,
                                Op::CmpGt => a > b,
                                _ => a >= b,
                            }
                        };
                        r as i64
                    })
                }
            }
            Op::LogAnd => i1.zip(i2).map(|(a, b)| ((a != 0) && (b != 0)) as i64),
            Op::LogOr => i1.zip(i2).map(|(a, b)| ((a != 0) || (b != 0)) as i64),
            Op::PtrAdd => i1
                .zip(i2)
                .map(|(a, b)| a.wrapping_add(b.wrapping_mul(insts[idx].imm))),
            Op::PtrDiff => i1.zip(i2).and_then(|(a, b)| {
                let elem = insts[idx].imm;
                if elem == 0 {
                    None
                } else {
                    Some(a.wrapping_sub(b) / elem)
                }
            }),
            Op::Cast => {
                let from = ValKind::from_code(insts[idx].imm);
                if from.is_float() || kind.is_float() {
                    None // handled below in the float path
                } else {
                    i1.map(|a| wrap(kind, a))
                }
            }
            _ => None,
        };

        if let Some(value) = folded {
            let value = if matches!(op, Op::PtrAdd | Op::PtrDiff | Op::Cast) {
                value
            } else {
                wrap(kind, value)
            };
            let inst = &mut insts[idx];
            rewrite_to_const(inst, value);
            ints.insert(inst.dest, value);
            continue;
        }

        // Float arithmetic and float-involved casts
        let ffolded: Option<f64> = match op {
            Op::FAdd => f1.zip(f2).map(|(a, b)| a + b),
            Op::FSub => f1.zip(f2).map(|(a, b)| a - b),
            Op::FMul => f1.zip(f2).map(|(a, b)| a * b),
            Op::FDiv => f1.zip(f2).map(|(a, b)| if b == 0.0 { 0.0 } else { a / b }),
            Op::FNeg => f1.map(|a| -a),
            Op::Cast => {
                let from = ValKind::from_code(insts[idx].imm);
                if from.is_float() && kind.is_float() {
                    f1
                } else if !from.is_float() && kind.is_float() {
                    i1.map(|a| {
                        if from.is_unsigned() {
                            (a as u64) as f64
                        } else {
                            a as f64
                        }
                    })
                } else {
                    None
                }
            }
            _ => None,
        };
        if let Some(value) = ffolded {
            if kind.is_float() {
                let inst = &mut insts[idx];
                rewrite_to_fconst(inst, value);
                floats.insert(inst.dest, value);
                continue;
            }
        }
        // Float-to-int cast with a known operand
        if op == Op::Cast && !kind.is_float() {
            let from = ValKind::from_code(insts[idx].imm);
            if from.is_float() {
                if let Some(a) = f1 {
                    let value = wrap(kind, a as i64);
                    let inst = &mut insts[idx];
                    rewrite_to_const(inst, value);
                    ints.insert(inst.dest, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Builder;

    fn fold_two(a: i64, b: i64, op: Op, kind: ValKind) -> Inst {
        let mut builder = Builder::new();
        let x = builder.emit_value(Inst::new(Op::Const).imm(a).ty(kind));
        let y = builder.emit_value(Inst::new(Op::Const).imm(b).ty(kind));
        builder.emit_value(Inst::new(op).src1(x).src2(y).ty(kind));
        let mut insts = builder.finish();
        run(&mut insts);
        insts[2].clone()
    }

    #[test]
    fn test_add_folds() {
        let inst = fold_two(2, 3, Op::Add, ValKind::I32);
        assert_eq!(inst.op, Op::Const);
        assert_eq!(inst.imm, 5);
    }

    #[test]
    fn test_division_by_zero_folds_to_zero() {
        let inst = fold_two(9, 0, Op::Div, ValKind::I32);
        assert_eq!(inst.op, Op::Const);
        assert_eq!(inst.imm, 0);
    }

    #[test]
    fn test_signed_wrap_at_32_bits() {
        let inst = fold_two(i32::MAX as i64, 1, Op::Add, ValKind::I32);
        assert_eq!(inst.imm, i32::MIN as i64);
    }

    #[test]
    fn test_unsigned_comparison() {
        // 0xffffffff > 1 as unsigned, but -1 < 1 as signed
        let unsigned = fold_two(-1, 1, Op::CmpGt, ValKind::U32);
        assert_eq!(unsigned.imm, 1);
        let signed = fold_two(-1, 1, Op::CmpGt, ValKind::I32);
        assert_eq!(signed.imm, 0);
    }

    #[test]
    fn test_shift_respects_width() {
        let inst = fold_two(1, 33, Op::Shl, ValKind::I32);
        assert_eq!(inst.imm, 2, "count is taken mod 32");
        let wide = fold_two(1, 33, Op::Shl, ValKind::I64);
        assert_eq!(wide.imm, 1i64 << 33);
    }

    #[test]
    fn test_float_arith_folds() {
        let mut builder = Builder::new();
        let x = builder.emit_value(Inst::new(Op::FConst).imm(1.5f64.to_bits() as i64).ty(ValKind::F64));
        let y = builder.emit_value(Inst::new(Op::FConst).imm(2.25f64.to_bits() as i64).ty(ValKind::F64));
        builder.emit_value(Inst::new(Op::FAdd).src1(x).src2(y).ty(ValKind::F64));
        let mut insts = builder.finish();
        run(&mut insts);
        assert_eq!(insts[2].op, Op::FConst);
        assert_eq!(f64::from_bits(insts[2].imm as u64), 3.75);
    }
}
