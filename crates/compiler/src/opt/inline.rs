//! Inline expansion of small functions.
//!
//! A callee is expanded when its definition carries the `inline` hint
//! and its body is small: nothing but `LoadParam`, constants, a final
//! `Return`, and at most four simple arithmetic or bit operations. At
//! an eligible call site the pushed arguments substitute for the
//! parameter loads and the cloned body's result replaces the call's.
//! Anything bigger, recursive, or aggregate-returning stays a call.

use crate::lir::{Inst, Op, ValueId};
use std::collections::HashMap;
use std::rc::Rc;

/// Arithmetic the "small" heuristic counts toward its budget of four.
fn is_simple_arith(op: Op) -> bool {
    matches!(
        op,
        Op::Add
            | Op::Sub
            | Op::Mul
            | Op::Div
            | Op::Mod
            | Op::Neg
            | Op::And
            | Op::Or
            | Op::Xor
            | Op::Shl
            | Op::Shr
            | Op::Not
    )
}

const MAX_ARITH_OPS: usize = 4;

/// Bodies of inline-hinted functions that pass the heuristic.
fn collect_candidates(insts: &[Inst]) -> HashMap<Rc<str>, Vec<Inst>> {
    let mut candidates = HashMap::new();
    let mut i = 0;
    while i < insts.len() {
        if insts[i].op != Op::FuncBegin {
            i += 1;
            continue;
        }
        let begin = &insts[i];
        let name = begin.name.clone();
        let inline_hint = begin.imm == 1;
        let end = insts[i + 1..]
            .iter()
            .position(|x| x.op == Op::FuncEnd)
            .map(|p| i + 1 + p);
        let end = match end {
            Some(e) => e,
            None => break,
        };
        if inline_hint {
            let body = &insts[i + 1..end];
            let mut arith = 0usize;
            let mut ok = !body.is_empty();
            for inst in body {
                match inst.op {
                    Op::LoadParam | Op::Const | Op::FConst | Op::Return => {}
                    op if is_simple_arith(op) => arith += 1,
                    _ => {
                        ok = false;
                        break;
                    }
                }
            }
            if ok && arith <= MAX_ARITH_OPS {
                if let Some(name) = name {
                    candidates.insert(name, body.to_vec());
                }
            }
        }
        i = end + 1;
    }
    candidates
}

pub(super) fn run(insts: &mut Vec<Inst>) {
    let candidates = collect_candidates(insts);
    if candidates.is_empty() {
        return;
    }

    let mut next_id: ValueId = insts.iter().map(|i| i.dest).max().unwrap_or(0) + 1;
    let mut out: Vec<Inst> = Vec::with_capacity(insts.len());
    // Call results replaced by inlined values
    let mut replace: HashMap<ValueId, ValueId> = HashMap::new();
    let mut current_fn: Option<Rc<str>> = None;

    let mut i = 0;
    while i < insts.len() {
        let mut inst = insts[i].clone();
        if let Some(&r) = replace.get(&inst.src1) {
            inst.src1 = r;
        }
        if let Some(&r) = replace.get(&inst.src2) {
            inst.src2 = r;
        }

        if inst.op == Op::FuncBegin {
            current_fn = inst.name.clone();
        }

        // A run of Arg pushes may feed an inlinable call.
        if inst.op == Op::Arg {
            let mut j = i;
            let mut args: HashMap<i64, ValueId> = HashMap::new();
            while j < insts.len() && insts[j].op == Op::Arg {
                let mut a = insts[j].clone();
                if let Some(&r) = replace.get(&a.src1) {
                    a.src1 = r;
                }
                args.insert(a.imm, a.src1);
                j += 1;
            }
            let callee = insts.get(j).filter(|c| c.op == Op::Call);
            let inlinable = callee
                .and_then(|c| c.name.clone())
                .filter(|n| Some(n) != current_fn.as_ref())
                .and_then(|n| candidates.get(&n).cloned());
            if let Some(body) = inlinable {
                let call = insts[j].clone();
                expand(&body, &args, &call, &mut out, &mut next_id, &mut replace);
                i = j + 1;
                continue;
            }
        }

        out.push(inst);
        i += 1;
    }

    *insts = out;
}

/// Splice one cloned body in place of a call.
fn expand(
    body: &[Inst],
    args: &HashMap<i64, ValueId>,
    call: &Inst,
    out: &mut Vec<Inst>,
    next_id: &mut ValueId,
    replace: &mut HashMap<ValueId, ValueId>,
) {
    // Callee value IDs to caller value IDs
    let mut map: HashMap<ValueId, ValueId> = HashMap::new();
    for inst in body {
        match inst.op {
            Op::LoadParam => {
                if let Some(&arg) = args.get(&inst.imm) {
                    map.insert(inst.dest, arg);
                }
            }
            Op::Return => {
                if call.dest != 0 && inst.src1 != 0 {
                    let value = map.get(&inst.src1).copied().unwrap_or(inst.src1);
                    replace.insert(call.dest, value);
                }
            }
            _ => {
                let mut clone = inst.clone();
                clone.src1 = map.get(&clone.src1).copied().unwrap_or(clone.src1);
                clone.src2 = map.get(&clone.src2).copied().unwrap_or(clone.src2);
                let fresh = *next_id;
                *next_id += 1;
                map.insert(clone.dest, fresh);
                clone.dest = fresh;
                clone.loc = call.loc.clone();
                out.push(clone);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::opt::OptFlags;
    use crate::sema::test_util::lower;

    #[test]
    fn test_small_inline_function_is_expanded() {
        let src = "inline int twice(int x) { return x + x; }\n\
                   int f(int a) { return twice(a); }";
        let mut insts = lower(src);
        run(&mut insts);

        // The call inside f is gone; twice's own body still exists.
        let f_begin = insts
            .iter()
            .position(|i| i.op == Op::FuncBegin && i.name.as_deref() == Some("f"))
            .unwrap();
        assert!(!insts[f_begin..]
            .iter()
            .any(|i| i.op == Op::Call && i.name.as_deref() == Some("twice")));
        crate::lir::verify(&insts).unwrap();
    }

    #[test]
    fn test_inline_result_feeds_return() {
        let src = "inline int five(void) { return 5; }\n\
                   int f(void) { return five(); }";
        let mut insts = lower(src);
        crate::opt::optimize(&mut insts, OptFlags::default());

        let f_begin = insts
            .iter()
            .position(|i| i.op == Op::FuncBegin && i.name.as_deref() == Some("f"))
            .unwrap();
        let ret = insts[f_begin..]
            .iter()
            .find(|i| i.op == Op::Return)
            .unwrap();
        let producer = insts.iter().find(|i| i.dest == ret.src1).unwrap();
        assert_eq!(producer.op, Op::Const);
        assert_eq!(producer.imm, 5);
    }

    #[test]
    fn test_large_function_stays_a_call() {
        // Five arithmetic operations exceed the budget.
        let src = "inline int big(int x) { return ((((x + 1) * 2) - 3) ^ 4) + 5; }\n\
                   int f(int a) { return big(a); }";
        let mut insts = lower(src);
        run(&mut insts);
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Call && i.name.as_deref() == Some("big")));
    }

    #[test]
    fn test_non_inline_function_stays_a_call() {
        let src = "int plain(int x) { return x; }\n\
                   int f(int a) { return plain(a); }";
        let mut insts = lower(src);
        run(&mut insts);
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Call && i.name.as_deref() == Some("plain")));
    }

    #[test]
    fn test_function_with_store_not_inlined() {
        let src = "inline int effectful(int x) { int t; t = x; return t; }\n\
                   int f(int a) { return effectful(a); }";
        let mut insts = lower(src);
        run(&mut insts);
        assert!(insts
            .iter()
            .any(|i| i.op == Op::Call && i.name.as_deref() == Some("effectful")));
    }
}
