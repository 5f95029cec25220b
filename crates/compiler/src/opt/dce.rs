//! Unreachable-block pruning and dead-code elimination.
//!
//! Pruning removes everything between an unconditional branch or return
//! and the next label. DCE sweeps backward: instructions with side
//! effects (and volatile loads) are roots whose sources stay live; a
//! pure instruction whose result is never read disappears.

use crate::lir::{Inst, Op, ValueId};
use std::collections::HashSet;

/// Remove instructions that can never execute: anything after `Br`,
/// `Return`, or `ReturnAgg` up to the next label or function boundary.
pub(super) fn prune_unreachable(insts: &mut Vec<Inst>) {
    let mut keep = vec![true; insts.len()];
    let mut dead = false;
    for (i, inst) in insts.iter().enumerate() {
        match inst.op {
            Op::Label | Op::FuncBegin | Op::FuncEnd => dead = false,
            _ if dead => keep[i] = false,
            Op::Br | Op::Return | Op::ReturnAgg => dead = true,
            _ => {}
        }
    }
    let mut it = keep.iter();
    insts.retain(|_| *it.next().unwrap());
}

pub(super) fn run(insts: &mut Vec<Inst>) {
    let mut used: HashSet<ValueId> = HashSet::new();
    let mut keep = vec![false; insts.len()];

    for (i, inst) in insts.iter().enumerate().rev() {
        let is_root = inst.op.has_side_effect() || inst.is_volatile;
        if is_root || (inst.dest != 0 && used.contains(&inst.dest)) {
            keep[i] = true;
            if inst.src1 != 0 {
                used.insert(inst.src1);
            }
            if inst.src2 != 0 {
                used.insert(inst.src2);
            }
        }
    }

    let mut it = keep.iter();
    insts.retain(|_| *it.next().unwrap());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Builder, ValKind};

    #[test]
    fn test_unused_pure_value_removed() {
        let mut b = Builder::new();
        let f = b.intern("f");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        let a = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
        let c = b.emit_value(Inst::new(Op::Const).imm(2).ty(ValKind::I32));
        b.emit_value(Inst::new(Op::Add).src1(a).src2(c).ty(ValKind::I32));
        let kept = b.emit_value(Inst::new(Op::Const).imm(3).ty(ValKind::I32));
        b.emit(Inst::new(Op::Return).src1(kept).ty(ValKind::I32));
        b.emit(Inst::new(Op::FuncEnd));
        let mut insts = b.finish();
        run(&mut insts);

        assert!(!insts.iter().any(|i| i.op == Op::Add));
        assert!(insts.iter().any(|i| i.dest == kept));
        assert!(!insts.iter().any(|i| i.dest == a));
    }

    #[test]
    fn test_store_sources_stay_live() {
        let mut b = Builder::new();
        let x = b.intern("x");
        let v = b.emit_value(Inst::new(Op::Const).imm(9).ty(ValKind::I32));
        b.emit(Inst::new(Op::Store).name(x).src1(v).ty(ValKind::I32));
        let mut insts = b.finish();
        run(&mut insts);
        assert_eq!(insts.len(), 2);
    }

    #[test]
    fn test_prune_after_unconditional_branch() {
        let mut b = Builder::new();
        let l = b.intern("L");
        b.emit(Inst::new(Op::Br).name(l.clone()));
        b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
        b.emit(Inst::new(Op::Label).name(l));
        let mut insts = b.finish();
        prune_unreachable(&mut insts);

        assert_eq!(insts.len(), 2);
        assert_eq!(insts[0].op, Op::Br);
        assert_eq!(insts[1].op, Op::Label);
    }

    #[test]
    fn test_func_end_survives_pruning() {
        let mut b = Builder::new();
        let f = b.intern("f");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        b.emit(Inst::new(Op::Return));
        b.emit(Inst::new(Op::FuncEnd));
        let mut insts = b.finish();
        prune_unreachable(&mut insts);
        assert_eq!(insts.len(), 3);
    }
}
