//! Optimizer pass manager.
//!
//! A fixed sequence of in-place passes over the LIR vector. Alias
//! analysis, CSE, and unreachable-block pruning always run; constant
//! propagation, inline expansion, constant folding, and dead-code
//! elimination can each be switched off independently.
//!
//! Passes iterate by index and compact the vector at pass end; no pass
//! holds pointers into the list while rewriting it.

mod alias;
mod constprop;
mod cse;
mod dce;
mod fold;
mod inline;

use crate::lir::Inst;

/// Which optional passes run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OptFlags {
    pub const_prop: bool,
    pub inline: bool,
    pub fold: bool,
    pub dce: bool,
}

impl Default for OptFlags {
    fn default() -> Self {
        OptFlags {
            const_prop: true,
            inline: true,
            fold: true,
            dce: true,
        }
    }
}

impl OptFlags {
    /// Everything off; the pipeline still runs the mandatory passes.
    pub fn none() -> Self {
        OptFlags {
            const_prop: false,
            inline: false,
            fold: false,
            dce: false,
        }
    }
}

/// Run the pass sequence over a translation unit's LIR.
pub fn optimize(insts: &mut Vec<Inst>, flags: OptFlags) {
    alias::run(insts);
    if flags.const_prop {
        constprop::run(insts);
    }
    cse::run(insts);
    if flags.inline {
        inline::run(insts);
    }
    if flags.fold {
        fold::run(insts);
    }
    dce::prune_unreachable(insts);
    if flags.dce {
        dce::run(insts);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::{Op, ValKind};
    use crate::sema::test_util::lower;

    #[test]
    fn test_constant_return_folds_to_single_const() {
        let mut insts = lower("int f(void) { return 2 + 3; }");
        optimize(&mut insts, OptFlags::default());

        assert!(!insts.iter().any(|i| i.op == Op::Add));
        let ret = insts.iter().find(|i| i.op == Op::Return).unwrap();
        let producer = insts.iter().find(|i| i.dest == ret.src1).unwrap();
        assert_eq!(producer.op, Op::Const);
        assert_eq!(producer.imm, 5);
    }

    #[test]
    fn test_folding_is_idempotent() {
        let mut once = lower("int f(void) { return (4 * 5 - 2) / 3; }");
        optimize(&mut once, OptFlags::default());
        let mut twice = once.clone();
        fold::run(&mut twice);
        assert_eq!(once, twice);
    }

    #[test]
    fn test_dce_preserves_side_effect_order() {
        let src = "int g(int x);\nint f(int a) { int unused; unused = a * 2; g(1); g(2); return 0; }";
        let mut insts = lower(src);
        let before: Vec<_> = insts
            .iter()
            .filter(|i| i.op.has_side_effect())
            .cloned()
            .collect();
        optimize(&mut insts, OptFlags::default());
        let after: Vec<_> = insts
            .iter()
            .filter(|i| i.op.has_side_effect())
            .cloned()
            .collect();
        // Stores to the dead local may go, but calls/args/returns keep
        // their relative order.
        let calls_before: Vec<_> = before.iter().filter(|i| i.op == Op::Call).collect();
        let calls_after: Vec<_> = after.iter().filter(|i| i.op == Op::Call).collect();
        assert_eq!(calls_before, calls_after);
    }

    #[test]
    fn test_cse_is_operand_order_independent() {
        let a = {
            let mut insts = lower("int f(int x, int y) { return x + y + (y + x); }");
            optimize(&mut insts, OptFlags::none());
            insts.iter().filter(|i| i.op == Op::Add).count()
        };
        let b = {
            let mut insts = lower("int f(int x, int y) { return y + x + (x + y); }");
            optimize(&mut insts, OptFlags::none());
            insts.iter().filter(|i| i.op == Op::Add).count()
        };
        assert_eq!(a, b);
    }

    #[test]
    fn test_disabled_fold_leaves_arith() {
        let mut insts = lower("int f(void) { return 2 + 3; }");
        let flags = OptFlags {
            fold: false,
            const_prop: false,
            ..OptFlags::default()
        };
        optimize(&mut insts, flags);
        assert!(insts.iter().any(|i| i.op == Op::Add));
    }

    #[test]
    fn test_unreachable_after_return_is_pruned() {
        let mut insts = lower("int f(void) { return 1; return 2; }");
        optimize(&mut insts, OptFlags::default());
        let returns = insts.iter().filter(|i| i.op == Op::Return).count();
        assert_eq!(returns, 1);
    }

    #[test]
    fn test_pipeline_keeps_lir_invariants() {
        let mut insts = lower(
            "int f(int n) { int s; s = 0; for (int i = 0; i < n; i = i + 1) { s = s + i; } return s; }",
        );
        optimize(&mut insts, OptFlags::default());
        crate::lir::verify(&insts).unwrap();
    }

    #[test]
    fn test_volatile_load_survives_dce() {
        let mut insts = lower("volatile int hw;\nvoid f(void) { hw; }");
        optimize(&mut insts, OptFlags::default());
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Load && i.is_volatile && i.ty == ValKind::I32));
    }
}
