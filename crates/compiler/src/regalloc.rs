//! Linear register allocation.
//!
//! One forward pass computes the last use of every value ID; a second
//! walks the instructions assigning each result either a physical
//! register index or a negative stack-slot index (slot `-n` lives `n`
//! words below the frame locals). On exhaustion the active value whose
//! last use lies furthest in the future is spilled to a fresh slot.
//!
//! Six general-purpose registers are allocatable, but several carry
//! fixed roles the emitter relies on and are withheld per function:
//! `%eax` always (compare results land in `%al`, returns and scratch
//! moves go through the accumulator), `%edx` when the function divides,
//! `%ecx` when it shifts, and every caller-saved register when the
//! function makes calls. Floating-point and long-double values always
//! take stack slots; the x87 unit works out of memory.

use crate::lir::{Inst, Op, ValKind, ValueId};
use std::collections::HashMap;

/// Number of allocatable general-purpose registers.
pub const REGALLOC_NUM_REGS: usize = 6;

/// Register index assignments into the architecture name tables.
pub const REG_AX: usize = 0;
pub const REG_BX: usize = 1;
pub const REG_CX: usize = 2;
pub const REG_DX: usize = 3;
pub const REG_SI: usize = 4;
pub const REG_DI: usize = 5;

/// 32-bit register names, indexed by allocator register number.
pub const REGS32: [&str; REGALLOC_NUM_REGS] = ["eax", "ebx", "ecx", "edx", "esi", "edi"];
/// 64-bit register names.
pub const REGS64: [&str; REGALLOC_NUM_REGS] = ["rax", "rbx", "rcx", "rdx", "rsi", "rdi"];

/// Where a value lives: register index (>= 0) or stack slot (< 0,
/// `-n` meaning `n` word-sized slots below the frame locals).
pub type Location = i32;

#[derive(Debug, Default)]
pub struct Allocation {
    pub loc: HashMap<ValueId, Location>,
    /// High-water count of spill slots across the unit
    pub stack_slots: u32,
}

impl Allocation {
    pub fn location(&self, value: ValueId) -> Option<Location> {
        self.loc.get(&value).copied()
    }
}

/// Registers withheld from allocation in one function.
fn reserved_mask(body: &[Inst], x86_64: bool) -> [bool; REGALLOC_NUM_REGS] {
    let mut reserved = [false; REGALLOC_NUM_REGS];
    // The accumulator is the emitter's scratch and result register.
    reserved[REG_AX] = true;
    for inst in body {
        match inst.op {
            Op::Div | Op::Mod | Op::PtrDiff => {
                reserved[REG_DX] = true;
            }
            Op::Shl | Op::Shr => {
                reserved[REG_CX] = true;
            }
            Op::Call | Op::CallIndirect => {
                // Only callee-saved registers survive a call.
                reserved[REG_CX] = true;
                reserved[REG_DX] = true;
                if x86_64 {
                    // rsi/rdi are caller-saved (and argument) registers
                    // in the 64-bit convention.
                    reserved[REG_SI] = true;
                    reserved[REG_DI] = true;
                }
            }
            _ => {}
        }
    }
    reserved
}

pub fn allocate(insts: &[Inst], x86_64: bool) -> Allocation {
    let mut last_use: HashMap<ValueId, usize> = HashMap::new();
    for (i, inst) in insts.iter().enumerate() {
        if inst.src1 != 0 {
            last_use.insert(inst.src1, i);
        }
        if inst.src2 != 0 {
            last_use.insert(inst.src2, i);
        }
    }

    let mut alloc = Allocation::default();
    let mut active: [Option<ValueId>; REGALLOC_NUM_REGS] = [None; REGALLOC_NUM_REGS];
    let mut reserved = [true; REGALLOC_NUM_REGS];
    let mut next_slot: u32 = 0;

    for (i, inst) in insts.iter().enumerate() {
        if inst.op == Op::FuncBegin {
            // Function boundary: fresh active set and slot counter.
            active = [None; REGALLOC_NUM_REGS];
            next_slot = 0;
            let end = insts[i..]
                .iter()
                .position(|x| x.op == Op::FuncEnd)
                .map(|p| i + p)
                .unwrap_or(insts.len());
            reserved = reserved_mask(&insts[i..end], x86_64);
            continue;
        }

        // Retire values whose last use has passed.
        for slot in active.iter_mut() {
            if let Some(v) = *slot {
                if last_use.get(&v).map(|&u| u <= i).unwrap_or(true) {
                    *slot = None;
                }
            }
        }

        if inst.dest == 0 {
            continue;
        }
        // Results never read still need a location for the emitter.
        let dest_last = last_use.get(&inst.dest).copied().unwrap_or(i);

        // Floating values live in memory for the x87 unit; wide ones
        // take as many word slots as they need.
        if inst.ty.is_float() {
            let word = if x86_64 { 8u64 } else { 4 };
            let width = match inst.ty {
                ValKind::F32 => 4u64,
                ValKind::F64 => 8,
                _ => 16,
            };
            next_slot += width.div_ceil(word).max(1) as u32;
            alloc.stack_slots = alloc.stack_slots.max(next_slot);
            alloc.loc.insert(inst.dest, -(next_slot as i32));
            continue;
        }

        // Free register?
        let free = (0..REGALLOC_NUM_REGS).find(|&r| !reserved[r] && active[r].is_none());
        if let Some(r) = free {
            active[r] = Some(inst.dest);
            alloc.loc.insert(inst.dest, r as i32);
            continue;
        }

        // Exhausted: spill whichever value is needed furthest away.
        let victim = (0..REGALLOC_NUM_REGS)
            .filter(|&r| !reserved[r])
            .filter_map(|r| active[r].map(|v| (r, v, last_use.get(&v).copied().unwrap_or(0))))
            .max_by_key(|&(_, _, use_at)| use_at);

        match victim {
            Some((r, victim_id, victim_use)) if victim_use > dest_last => {
                next_slot += 1;
                alloc.stack_slots = alloc.stack_slots.max(next_slot);
                alloc.loc.insert(victim_id, -(next_slot as i32));
                active[r] = Some(inst.dest);
                alloc.loc.insert(inst.dest, r as i32);
            }
            _ => {
                // The new value itself is the furthest use (or no
                // register is allocatable at all).
                next_slot += 1;
                alloc.stack_slots = alloc.stack_slots.max(next_slot);
                alloc.loc.insert(inst.dest, -(next_slot as i32));
            }
        }
    }

    alloc
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lir::Builder;

    fn with_func(build: impl FnOnce(&mut Builder)) -> Vec<Inst> {
        let mut b = Builder::new();
        let f = b.intern("f");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        build(&mut b);
        b.emit(Inst::new(Op::FuncEnd));
        b.finish()
    }

    #[test]
    fn test_values_get_registers() {
        let insts = with_func(|b| {
            let a = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
            let c = b.emit_value(Inst::new(Op::Const).imm(2).ty(ValKind::I32));
            let s = b.emit_value(Inst::new(Op::Add).src1(a).src2(c).ty(ValKind::I32));
            b.emit(Inst::new(Op::Return).src1(s).ty(ValKind::I32));
        });
        let alloc = allocate(&insts, false);
        for v in 1..=3u32 {
            let loc = alloc.location(v).unwrap();
            assert!(loc >= 0, "value {} should be in a register", v);
            assert_ne!(loc, REG_AX as i32, "accumulator is withheld");
        }
    }

    #[test]
    fn test_spill_on_exhaustion() {
        // Ten simultaneously live values cannot fit five registers.
        let insts = with_func(|b| {
            let vals: Vec<_> = (0..10)
                .map(|k| b.emit_value(Inst::new(Op::Const).imm(k).ty(ValKind::I32)))
                .collect();
            let mut acc = vals[0];
            for &v in &vals[1..] {
                acc = b.emit_value(Inst::new(Op::Add).src1(acc).src2(v).ty(ValKind::I32));
            }
            b.emit(Inst::new(Op::Return).src1(acc).ty(ValKind::I32));
        });
        let alloc = allocate(&insts, false);
        assert!(alloc.stack_slots > 0);
        assert!(alloc.loc.values().any(|&l| l < 0));
    }

    #[test]
    fn test_div_reserves_edx() {
        let insts = with_func(|b| {
            let a = b.emit_value(Inst::new(Op::Const).imm(10).ty(ValKind::I32));
            let c = b.emit_value(Inst::new(Op::Const).imm(3).ty(ValKind::I32));
            let d = b.emit_value(Inst::new(Op::Div).src1(a).src2(c).ty(ValKind::I32));
            b.emit(Inst::new(Op::Return).src1(d).ty(ValKind::I32));
        });
        let alloc = allocate(&insts, false);
        for (&v, &loc) in &alloc.loc {
            assert_ne!(loc, REG_DX as i32, "value {} landed in reserved %edx", v);
        }
    }

    #[test]
    fn test_calls_restrict_to_callee_saved() {
        let insts = with_func(|b| {
            let g = b.intern("g");
            let a = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
            b.emit(Inst::new(Op::Arg).src1(a).ty(ValKind::I32));
            let r = b.emit_value(Inst::new(Op::Call).name(g).imm(1).ty(ValKind::I32));
            b.emit(Inst::new(Op::Return).src1(r).ty(ValKind::I32));
        });
        let alloc = allocate(&insts, false);
        for &loc in alloc.loc.values() {
            if loc >= 0 {
                assert!(
                    matches!(loc as usize, REG_BX | REG_SI | REG_DI),
                    "caller-saved register {} handed out across a call",
                    loc
                );
            }
        }
    }

    #[test]
    fn test_float_values_always_spill() {
        let insts = with_func(|b| {
            let a = b.emit_value(
                Inst::new(Op::FConst)
                    .imm(1.0f64.to_bits() as i64)
                    .ty(ValKind::F64),
            );
            b.emit(Inst::new(Op::Return).src1(a).ty(ValKind::F64));
        });
        let alloc = allocate(&insts, false);
        assert!(alloc.location(1).unwrap() < 0);
    }

    #[test]
    fn test_function_boundary_resets_slots() {
        let mut b = Builder::new();
        let f = b.intern("f");
        let g = b.intern("g");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        let a = b.emit_value(
            Inst::new(Op::FConst)
                .imm(1.0f64.to_bits() as i64)
                .ty(ValKind::F64),
        );
        b.emit(Inst::new(Op::Return).src1(a).ty(ValKind::F64));
        b.emit(Inst::new(Op::FuncEnd));
        b.emit(Inst::new(Op::FuncBegin).name(g));
        let c = b.emit_value(
            Inst::new(Op::FConst)
                .imm(2.0f64.to_bits() as i64)
                .ty(ValKind::F64),
        );
        b.emit(Inst::new(Op::Return).src1(c).ty(ValKind::F64));
        b.emit(Inst::new(Op::FuncEnd));
        let insts = b.finish();

        let alloc = allocate(&insts, false);
        // Both functions reuse the same double-wide slot; the published
        // high water covers one such value.
        assert_eq!(alloc.location(a).unwrap(), -2);
        assert_eq!(alloc.location(c).unwrap(), -2);
        assert_eq!(alloc.stack_slots, 2);
    }
}
