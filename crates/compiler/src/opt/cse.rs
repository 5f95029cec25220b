//! Common subexpression elimination.
//!
//! Keeps a table of pure-operation signatures `(op, src1, src2, imm,
//! ty)`; commutative operations normalize operand order first. When a
//! signature repeats, later uses of the duplicate's result are rewritten
//! to the original value; the duplicate itself is left for dead-code
//! elimination. The table clears at every label, so a value computed on
//! one branch is never reused past a join it does not dominate.

use crate::lir::{Inst, Op, ValKind, ValueId};
use std::collections::HashMap;

#[derive(PartialEq, Eq, Hash)]
struct Signature {
    op: Op,
    src1: ValueId,
    src2: ValueId,
    imm: i64,
    ty: ValKind,
}

pub(super) fn run(insts: &mut [Inst]) {
    let mut available: HashMap<Signature, ValueId> = HashMap::new();
    let mut replace: HashMap<ValueId, ValueId> = HashMap::new();

    for inst in insts.iter_mut() {
        // Apply pending operand rewrites first.
        if let Some(&r) = replace.get(&inst.src1) {
            inst.src1 = r;
        }
        if let Some(&r) = replace.get(&inst.src2) {
            inst.src2 = r;
        }

        match inst.op {
            Op::Label | Op::FuncBegin | Op::FuncEnd => {
                available.clear();
                continue;
            }
            op if !op.is_pure() => continue,
            _ => {}
        }

        let (src1, src2) = if inst.op.is_commutative() && inst.src2 < inst.src1 {
            (inst.src2, inst.src1)
        } else {
            (inst.src1, inst.src2)
        };
        let sig = Signature {
            op: inst.op,
            src1,
            src2,
            imm: inst.imm,
            ty: inst.ty,
        };
        match available.get(&sig) {
            Some(&orig) => {
                replace.insert(inst.dest, orig);
            }
            None => {
                available.insert(sig, inst.dest);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Builder;

    #[test]
    fn test_duplicate_add_rewrites_uses() {
        let mut b = Builder::new();
        let a = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
        let c = b.emit_value(Inst::new(Op::Const).imm(2).ty(ValKind::I32));
        let s1 = b.emit_value(Inst::new(Op::Add).src1(a).src2(c).ty(ValKind::I32));
        let s2 = b.emit_value(Inst::new(Op::Add).src1(c).src2(a).ty(ValKind::I32));
        b.emit(Inst::new(Op::Return).src1(s2).ty(ValKind::I32));
        let mut insts = b.finish();
        run(&mut insts);

        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        assert_eq!(ret.src1, s1, "use of the duplicate rewrites to the original");
        let _ = s2;
    }

    #[test]
    fn test_table_clears_at_labels() {
        let mut b = Builder::new();
        let l = b.intern("L1");
        let a = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
        let s1 = b.emit_value(Inst::new(Op::Add).src1(a).src2(a).ty(ValKind::I32));
        b.emit(Inst::new(Op::Label).name(l));
        let s2 = b.emit_value(Inst::new(Op::Add).src1(a).src2(a).ty(ValKind::I32));
        b.emit(Inst::new(Op::Return).src1(s2).ty(ValKind::I32));
        let mut insts = b.finish();
        run(&mut insts);

        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        assert_eq!(ret.src1, s2, "value from before the label is not reused");
        let _ = s1;
    }

    #[test]
    fn test_noncommutative_order_matters() {
        let mut b = Builder::new();
        let a = b.emit_value(Inst::new(Op::Const).imm(8).ty(ValKind::I32));
        let c = b.emit_value(Inst::new(Op::Const).imm(2).ty(ValKind::I32));
        let d1 = b.emit_value(Inst::new(Op::Sub).src1(a).src2(c).ty(ValKind::I32));
        let d2 = b.emit_value(Inst::new(Op::Sub).src1(c).src2(a).ty(ValKind::I32));
        b.emit(Inst::new(Op::Return).src1(d2).ty(ValKind::I32));
        let mut insts = b.finish();
        run(&mut insts);

        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        assert_eq!(ret.src1, d2, "8-2 and 2-8 stay distinct");
        let _ = d1;
    }
}
