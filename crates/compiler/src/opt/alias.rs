//! Alias-set assignment.
//!
//! Every named memory operation gets an integer alias set from a
//! name-to-set table, so later passes can tell which accesses may touch
//! the same storage. Accesses through `restrict`-qualified pointers are
//! promised disjoint from everything else and receive a unique set per
//! site.

use crate::lir::Inst;
use std::collections::HashMap;
use std::rc::Rc;

pub(super) fn run(insts: &mut [Inst]) {
    let mut sets: HashMap<Rc<str>, u32> = HashMap::new();
    let mut next_set: u32 = 1;

    for inst in insts.iter_mut() {
        if !inst.op.is_named_memory() {
            continue;
        }
        if inst.is_restrict {
            inst.alias_set = next_set;
            next_set += 1;
            continue;
        }
        let name = match &inst.name {
            Some(name) => name.clone(),
            None => continue,
        };
        let set = *sets.entry(name).or_insert_with(|| {
            let s = next_set;
            next_set += 1;
            s
        });
        inst.alias_set = set;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Builder, Inst, Op};

    #[test]
    fn test_same_name_same_set() {
        let mut b = Builder::new();
        let x = b.intern("x");
        let y = b.intern("y");
        b.emit_value(Inst::new(Op::Load).name(x.clone()));
        b.emit_value(Inst::new(Op::Load).name(y));
        b.emit(Inst::new(Op::Store).name(x).src1(1));
        let mut insts = b.finish();
        run(&mut insts);

        assert_eq!(insts[0].alias_set, insts[2].alias_set);
        assert_ne!(insts[0].alias_set, insts[1].alias_set);
    }

    #[test]
    fn test_restrict_sites_are_unique() {
        let mut b = Builder::new();
        let p = b.intern("p");
        b.emit_value(Inst::new(Op::Load).name(p.clone()).restrict(true));
        b.emit_value(Inst::new(Op::Load).name(p).restrict(true));
        let mut insts = b.finish();
        run(&mut insts);

        assert_ne!(insts[0].alias_set, insts[1].alias_set);
        assert_ne!(insts[0].alias_set, 0);
    }
}
