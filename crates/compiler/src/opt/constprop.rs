//! Constant propagation.
//!
//! Tracks the constant value of every SSA ID, plus a per-variable "last
//! known constant store" table. A non-volatile store of a constant
//! remembers the variable; a later non-volatile load of it rewrites into
//! a `Const`. Any store through a pointer, indexed store, call, or
//! argument push invalidates every entry.
//!
//! The walk is linear, so join points must be treated conservatively:
//! at any label the variable table is cleared, except at the head of a
//! recognized simple loop, where only the names stored inside the loop
//! body are dropped (stores inside a loop body never record constants;
//! the backward edge would replay them with different values).

use crate::lir::{Inst, Op, ValueId};
use std::collections::{HashMap, HashSet};
use std::ops::Range;
use std::rc::Rc;

/// A simple loop: `Label L; …; BCond …; …; Br L` with no other labels
/// in between.
struct Loop {
    body: Range<usize>,
    stored_names: HashSet<Rc<str>>,
}

fn find_simple_loops(insts: &[Inst]) -> Vec<Loop> {
    let mut loops = Vec::new();
    for (i, inst) in insts.iter().enumerate() {
        if inst.op != Op::Label {
            continue;
        }
        let head = match &inst.name {
            Some(n) => n.clone(),
            None => continue,
        };
        let mut saw_bcond = false;
        for (j, other) in insts.iter().enumerate().skip(i + 1) {
            match other.op {
                Op::Label | Op::FuncBegin | Op::FuncEnd => break,
                Op::BCond => saw_bcond = true,
                Op::Br if other.name.as_ref() == Some(&head) => {
                    if saw_bcond {
                        let stored_names = insts[i..=j]
                            .iter()
                            .filter(|x| x.op == Op::Store || x.op == Op::StoreIdx)
                            .filter_map(|x| x.name.clone())
                            .collect();
                        loops.push(Loop {
                            body: i..j + 1,
                            stored_names,
                        });
                    }
                    break;
                }
                _ => {}
            }
        }
    }
    loops
}

pub(super) fn run(insts: &mut [Inst]) {
    let loops = find_simple_loops(insts);
    let in_loop =
        |idx: usize| -> Option<&Loop> { loops.iter().find(|l| l.body.contains(&idx)) };

    let mut const_vals: HashMap<ValueId, i64> = HashMap::new();
    let mut var_const: HashMap<Rc<str>, i64> = HashMap::new();

    for idx in 0..insts.len() {
        let op = insts[idx].op;
        match op {
            Op::FuncBegin | Op::FuncEnd => {
                var_const.clear();
            }
            Op::Label => {
                match loops.iter().find(|l| l.body.start == idx) {
                    // Loop head: only names mutated inside the body are
                    // stale on the backward edge.
                    Some(l) => {
                        for name in &l.stored_names {
                            var_const.remove(name);
                        }
                    }
                    // Any other label is a join with unknown state.
                    None => var_const.clear(),
                }
            }
            Op::Const => {
                const_vals.insert(insts[idx].dest, insts[idx].imm);
            }
            Op::Store => {
                let inst = &insts[idx];
                if inst.is_volatile {
                    if let Some(name) = &inst.name {
                        var_const.remove(name);
                    }
                } else if let Some(name) = inst.name.clone() {
                    match const_vals.get(&inst.src1) {
                        Some(&v) if in_loop(idx).is_none() => {
                            var_const.insert(name, v);
                        }
                        _ => {
                            var_const.remove(&name);
                        }
                    }
                }
            }
            Op::Load => {
                let inst = &insts[idx];
                if !inst.is_volatile {
                    if let Some(v) = inst.name.as_ref().and_then(|n| var_const.get(n)).copied() {
                        let dest = inst.dest;
                        let ty = inst.ty;
                        let loc = inst.loc.clone();
                        insts[idx] = Inst {
                            dest,
                            ty,
                            loc,
                            ..Inst::new(Op::Const).imm(v)
                        };
                        const_vals.insert(dest, v);
                    }
                }
            }
            Op::StorePtr | Op::StoreIdx | Op::BfStore | Op::Call | Op::CallIndirect | Op::Arg => {
                var_const.clear();
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::OptFlags;
    use crate::sema::test_util::lower;

    #[test]
    fn test_store_then_load_becomes_const() {
        let mut insts = lower("int f(void) { int x; x = 42; return x; }");
        run(&mut insts);
        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        let producer = insts.iter().find(|i| i.dest == ret.src1).unwrap();
        assert_eq!(producer.op, Op::Const);
        assert_eq!(producer.imm, 42);
    }

    #[test]
    fn test_call_invalidates_tracked_stores() {
        let mut insts = lower(
            "int g(void);\nint x;\nint f(void) { x = 1; g(); return x; }",
        );
        run(&mut insts);
        // The load after the call must remain a load.
        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        let producer = insts.iter().find(|i| i.dest == ret.src1).unwrap();
        assert_eq!(producer.op, Op::Load);
    }

    #[test]
    fn test_loop_body_does_not_record_constants() {
        let src = "int f(int n) { int i; i = 0; while (i < n) { i = i + 1; } return i; }";
        let mut insts = lower(src);
        run(&mut insts);
        // `i` is mutated in the loop; its load inside the loop head must
        // not fold to 0.
        crate::lir::verify(&insts).unwrap();
        let mut full = lower(src);
        crate::opt::optimize(&mut full, OptFlags::default());
        assert!(full.iter().any(|i| i.op == Op::Load));
    }

    #[test]
    fn test_volatile_store_never_recorded() {
        let mut insts = lower("volatile int hw;\nint f(void) { hw = 3; return hw; }");
        run(&mut insts);
        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        let producer = insts.iter().find(|i| i.dest == ret.src1).unwrap();
        assert_eq!(producer.op, Op::Load);
    }
}
