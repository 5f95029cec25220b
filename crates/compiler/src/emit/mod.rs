//! x86 assembly emission.
//!
//! Two-phase walk over the optimized LIR: the data phase renders
//! `Glob*` directives into `.data` and reserves `.bss` storage for
//! referenced names that have neither a directive nor a frame slot;
//! the text phase dispatches every remaining instruction through the
//! register-allocator map.
//!
//! AT&T is the native syntax. Intel output reorders operands (dest
//! first), drops the `%` and `$` sigils, and annotates memory operands
//! with size qualifiers; both flow through the same operand helpers so
//! the two stay in step.
//!
//! # Frame layout
//!
//! Below the saved `%ebp`/`%rbp`, in order: the analyzer's named locals
//! (`stack:<offset>` names), the allocator's spill slots, parameter
//! home slots (64-bit only; incoming argument registers are stashed
//! there by the prologue), and finally homes for any callee-saved
//! registers the allocator handed out. The prologue reserves the whole
//! frame at once, rounded to 16 bytes on x86-64.

mod data;
mod text;

use crate::lir::{Inst, Op, ValKind, ValueId};
use crate::regalloc::{Allocation, REGS32, REGS64, REG_BX, REG_DI, REG_SI};
use crate::types::Target;
use std::collections::HashMap;
use std::fmt;

/// Equivalent to the standard library's (unstable) `i64::div_ceil`.
fn div_ceil_i64(a: i64, b: i64) -> i64 {
    let d = a / b;
    let r = a % b;
    if (r > 0 && b > 0) || (r < 0 && b < 0) {
        d + 1
    } else {
        d
    }
}
use std::fmt::Write as _;
use std::rc::Rc;

/// Output assembly dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AsmSyntax {
    #[default]
    Att,
    Intel,
}

/// Knobs the driver sets before emission.
#[derive(Debug, Clone)]
pub struct EmitOptions {
    pub target: Target,
    pub syntax: AsmSyntax,
    /// Emit `.globl` for externally visible functions
    pub export: bool,
    /// Emit `.file`/`.loc` debug directives
    pub debug: bool,
    pub source_file: Option<String>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        EmitOptions {
            target: Target { x86_64: false },
            syntax: AsmSyntax::Att,
            export: true,
            debug: false,
            source_file: None,
        }
    }
}

/// Emission failure.
///
/// Logical problems (a value without a location, malformed payloads)
/// and formatting failures both surface here so `?` propagates cleanly.
#[derive(Debug)]
pub enum EmitError {
    Logic(String),
    Format(fmt::Error),
}

impl fmt::Display for EmitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EmitError::Logic(s) => write!(f, "{}", s),
            EmitError::Format(e) => write!(f, "assembly generation error: {}", e),
        }
    }
}

impl std::error::Error for EmitError {}

impl From<String> for EmitError {
    fn from(s: String) -> Self {
        EmitError::Logic(s)
    }
}

impl From<fmt::Error> for EmitError {
    fn from(e: fmt::Error) -> Self {
        EmitError::Format(e)
    }
}

/// One formatted operand in both dialects.
#[derive(Debug, Clone)]
pub(super) struct Od {
    att: String,
    intel: String,
}

/// Per-function frame measurements computed at `FuncBegin`.
#[derive(Debug, Default, Clone)]
struct Frame {
    spill_base: i64,
    param_home_base: i64,
    save_base: i64,
    size: i64,
    saved_regs: Vec<usize>,
    param_homes: i64,
}

pub struct Emitter<'a> {
    insts: &'a [Inst],
    alloc: &'a Allocation,
    object_sizes: &'a HashMap<Rc<str>, u64>,
    opts: EmitOptions,
    out: String,
    next_label: u32,
    frame: Frame,
    /// Pending argument pushes between `Arg` and the owning call
    pending_args: Vec<(i64, ValueId, ValKind)>,
    /// Whether the last text line was a `ret`
    just_returned: bool,
}

/// Render a lowered unit to assembly text.
pub fn emit(
    insts: &[Inst],
    alloc: &Allocation,
    object_sizes: &HashMap<Rc<str>, u64>,
    opts: &EmitOptions,
) -> Result<String, EmitError> {
    let mut emitter = Emitter {
        insts,
        alloc,
        object_sizes,
        opts: opts.clone(),
        out: String::new(),
        next_label: 0,
        frame: Frame::default(),
        pending_args: Vec::new(),
        just_returned: false,
    };
    emitter.run()?;
    Ok(emitter.out)
}

impl<'a> Emitter<'a> {
    fn run(&mut self) -> Result<(), EmitError> {
        if self.opts.syntax == AsmSyntax::Intel {
            writeln!(self.out, ".intel_syntax noprefix")?;
        }
        if self.opts.debug {
            if let Some(file) = self.opts.source_file.clone() {
                writeln!(self.out, ".file 1 \"{}\"", file)?;
            }
        }
        self.emit_data_section()?;
        self.emit_text_section()?;
        self.emit_bss_section()?;
        Ok(())
    }

    // ----- small target helpers -------------------------------------------

    pub(super) fn word(&self) -> i64 {
        self.opts.target.word_size() as i64
    }

    fn x64(&self) -> bool {
        self.opts.target.x86_64
    }

    /// AT&T mnemonic suffix for a value kind.
    fn suffix(&self, kind: ValKind) -> &'static str {
        match kind.width(self.word() as u64) {
            1 => "b",
            2 => "w",
            8 if self.x64() => "q",
            _ => "l",
        }
    }

    /// Word-sized suffix for addresses and spills.
    fn wsuffix(&self) -> &'static str {
        if self.x64() {
            "q"
        } else {
            "l"
        }
    }

    fn frame_reg(&self) -> &'static str {
        if self.x64() {
            "rbp"
        } else {
            "ebp"
        }
    }

    fn stack_reg(&self) -> &'static str {
        if self.x64() {
            "rsp"
        } else {
            "esp"
        }
    }

    /// Name of allocator register `idx` at the full word width.
    fn reg_name(&self, idx: usize) -> &'static str {
        if self.x64() {
            REGS64[idx]
        } else {
            REGS32[idx]
        }
    }

    /// Register name sized for a value kind: 64-bit names only for
    /// eight-byte values on x86-64, 32-bit names otherwise (narrow
    /// values are held widened to 32 bits).
    fn reg_for(&self, idx: usize, kind: ValKind) -> &'static str {
        if self.x64() && kind.width(8) == 8 {
            REGS64[idx]
        } else {
            REGS32[idx]
        }
    }

    /// Width class a value occupies in registers and spill slots.
    pub(super) fn reg_kind(&self, kind: ValKind) -> ValKind {
        if self.x64() && kind.width(8) == 8 {
            ValKind::I64
        } else {
            ValKind::I32
        }
    }

    /// The accumulator at a given operand width.
    fn acc(&self, kind: ValKind) -> &'static str {
        match kind.width(self.word() as u64) {
            1 => "al",
            2 => "ax",
            8 if self.x64() => "rax",
            _ => "eax",
        }
    }

    fn acc_word(&self) -> &'static str {
        if self.x64() {
            "rax"
        } else {
            "eax"
        }
    }

    // ----- operand construction -------------------------------------------

    fn intel_size(&self, kind: ValKind) -> &'static str {
        match kind.width(self.word() as u64) {
            1 => "byte ptr",
            2 => "word ptr",
            4 => "dword ptr",
            8 => "qword ptr",
            _ => "tbyte ptr",
        }
    }

    pub(super) fn od_reg(&self, name: &str) -> Od {
        Od {
            att: format!("%{}", name),
            intel: name.to_string(),
        }
    }

    pub(super) fn od_imm(&self, v: i64) -> Od {
        Od {
            att: format!("${}", v),
            intel: v.to_string(),
        }
    }

    /// Address of a symbol as an immediate.
    fn od_sym_imm(&self, name: &str) -> Od {
        Od {
            att: format!("${}", name),
            intel: format!("OFFSET {}", name),
        }
    }

    /// Direct memory reference to a global symbol.
    fn od_global(&self, name: &str, kind: ValKind) -> Od {
        Od {
            att: name.to_string(),
            intel: format!("{} [{}]", self.intel_size(kind), name),
        }
    }

    /// Frame-relative memory operand at `-offset(%ebp)`.
    pub(super) fn od_frame(&self, offset: i64, kind: ValKind) -> Od {
        Od {
            att: format!("-{}(%{})", offset, self.frame_reg()),
            intel: format!("{} [{}-{}]", self.intel_size(kind), self.frame_reg(), offset),
        }
    }

    /// Positive frame offset, for incoming parameters.
    fn od_frame_pos(&self, offset: i64, kind: ValKind) -> Od {
        Od {
            att: format!("{}(%{})", offset, self.frame_reg()),
            intel: format!("{} [{}+{}]", self.intel_size(kind), self.frame_reg(), offset),
        }
    }

    /// Memory through a register: `(%eax)` with optional displacement.
    fn od_mem(&self, reg: &str, disp: i64, kind: ValKind) -> Od {
        let att = if disp == 0 {
            format!("(%{})", reg)
        } else {
            format!("{}(%{})", disp, reg)
        };
        let intel = if disp == 0 {
            format!("{} [{}]", self.intel_size(kind), reg)
        } else {
            format!("{} [{}+{}]", self.intel_size(kind), reg, disp)
        };
        Od { att, intel }
    }

    /// Location of an allocated value: register or spill slot.
    pub(super) fn od_value(&self, value: ValueId, kind: ValKind) -> Result<Od, EmitError> {
        match self.alloc.location(value) {
            Some(loc) if loc >= 0 => Ok(self.od_reg(self.reg_for(loc as usize, kind))),
            Some(slot) => {
                let offset = self.frame.spill_base + i64::from(-slot) * self.word();
                Ok(self.od_frame(offset, self.reg_kind(kind)))
            }
            None => Err(EmitError::Logic(format!(
                "value v{} has no allocated location",
                value
            ))),
        }
    }

    /// Frame offset of a value pinned to a stack slot.
    fn float_slot_offset(&self, value: ValueId) -> Result<i64, EmitError> {
        match self.alloc.location(value) {
            Some(slot) if slot < 0 => {
                Ok(self.frame.spill_base + i64::from(-slot) * self.word())
            }
            _ => Err(EmitError::Logic(format!(
                "float value v{} is not in a stack slot",
                value
            ))),
        }
    }

    /// Spill-slot frame operand for a float value (always in memory).
    fn od_float_slot(&self, value: ValueId, kind: ValKind) -> Result<Od, EmitError> {
        let offset = self.float_slot_offset(value)?;
        Ok(self.od_frame(offset, kind))
    }

    // ----- line emission --------------------------------------------------

    fn label_line(&mut self, name: &str) -> Result<(), EmitError> {
        writeln!(self.out, "{}:", name)?;
        self.just_returned = false;
        Ok(())
    }

    /// Zero-operand instruction.
    fn ins0(&mut self, mnem: &str) -> Result<(), EmitError> {
        writeln!(self.out, "    {}", mnem)?;
        self.just_returned = mnem == "ret";
        Ok(())
    }

    /// One-operand instruction with an AT&T width suffix.
    fn ins1(&mut self, mnem: &str, kind: ValKind, op: &Od) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => writeln!(self.out, "    {}{} {}", mnem, self.suffix(kind), op.att)?,
            AsmSyntax::Intel => writeln!(self.out, "    {} {}", mnem, op.intel)?,
        }
        self.just_returned = false;
        Ok(())
    }

    /// Two-operand instruction; AT&T source first, Intel dest first.
    fn ins2(&mut self, mnem: &str, kind: ValKind, src: &Od, dst: &Od) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => writeln!(
                self.out,
                "    {}{} {}, {}",
                mnem,
                self.suffix(kind),
                src.att,
                dst.att
            )?,
            AsmSyntax::Intel => writeln!(self.out, "    {} {}, {}", mnem, dst.intel, src.intel)?,
        }
        self.just_returned = false;
        Ok(())
    }

    /// Two-operand instruction at the full word width.
    fn ins2w(&mut self, mnem: &str, src: &Od, dst: &Od) -> Result<(), EmitError> {
        let kind = if self.x64() { ValKind::I64 } else { ValKind::I32 };
        self.ins2(mnem, kind, src, dst)
    }

    /// Raw mnemonic with explicit operand text (same in both dialects).
    fn ins_raw(&mut self, text: &str) -> Result<(), EmitError> {
        writeln!(self.out, "    {}", text)?;
        self.just_returned = false;
        Ok(())
    }

    fn fresh_cc_label(&mut self) -> u32 {
        self.next_label += 1;
        self.next_label
    }

    // ----- frame bookkeeping ----------------------------------------------

    /// Measure the frame for the function starting at `begin`.
    fn compute_frame(&self, begin: usize) -> Frame {
        let word = self.word();
        let end = self.insts[begin..]
            .iter()
            .position(|x| x.op == Op::FuncEnd)
            .map(|p| begin + p)
            .unwrap_or(self.insts.len());
        let body = &self.insts[begin..end];

        let mut locals_size: i64 = 0;
        let mut param_homes: i64 = 0;
        let mut saved: Vec<usize> = Vec::new();
        for inst in body {
            if let Some(name) = &inst.name {
                if let Some(off) = name.strip_prefix("stack:") {
                    if let Ok(n) = off.parse::<i64>() {
                        locals_size = locals_size.max(n);
                    }
                }
            }
            if matches!(inst.op, Op::LoadParam | Op::StoreParam) {
                param_homes = param_homes.max(inst.imm + 1);
            }
            if inst.dest != 0 {
                if let Some(loc) = self.alloc.location(inst.dest) {
                    if loc >= 0 {
                        let r = loc as usize;
                        let callee_saved = if self.x64() {
                            r == REG_BX
                        } else {
                            matches!(r, REG_BX | REG_SI | REG_DI)
                        };
                        if callee_saved && !saved.contains(&r) {
                            saved.push(r);
                        }
                    }
                }
            }
        }
        saved.sort_unstable();

        let spill_base = div_ceil_i64(locals_size, word) * word;
        let spill_size = i64::from(self.alloc.stack_slots) * word;
        let param_home_base = spill_base + spill_size;
        // Parameter homes are only materialized on x86-64, where the
        // prologue stashes incoming argument registers.
        let home_size = if self.x64() { param_homes.min(6) * 8 } else { 0 };
        let save_base = param_home_base + home_size;
        let mut size = save_base + saved.len() as i64 * word;
        if self.x64() {
            size = div_ceil_i64(size, 16) * 16;
        }
        Frame {
            spill_base,
            param_home_base,
            save_base,
            size,
            saved_regs: saved,
            param_homes: param_homes.min(6),
        }
    }

    /// `-offset(%rbp)` of 64-bit parameter home `i`.
    fn param_home(&self, i: i64) -> i64 {
        self.frame.param_home_base + (i + 1) * 8
    }

    fn save_slot(&self, j: usize) -> i64 {
        self.frame.save_base + (j as i64 + 1) * self.word()
    }

    fn emit_prologue(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let name = inst
            .name
            .as_deref()
            .ok_or_else(|| EmitError::Logic("unnamed function".to_string()))?
            .to_string();
        let is_static = inst.src1 == 1;

        writeln!(self.out)?;
        if self.opts.export && !is_static {
            writeln!(self.out, ".globl {}", name)?;
        }
        self.label_line(&name)?;

        let fr = self.od_reg(self.frame_reg());
        let sr = self.od_reg(self.stack_reg());
        let push = if self.x64() { "pushq" } else { "pushl" };
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(&format!("{} %{}", push, self.frame_reg()))?,
            AsmSyntax::Intel => self.ins_raw(&format!("push {}", self.frame_reg()))?,
        }
        self.ins2w("mov", &sr, &fr)?;
        if self.frame.size > 0 {
            let imm = self.od_imm(self.frame.size);
            self.ins2w("sub", &imm, &sr)?;
        }

        // Stash incoming argument registers in their home slots.
        if self.x64() {
            const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
            for i in 0..self.frame.param_homes {
                let src = self.od_reg(ARG_REGS[i as usize]);
                let dst = self.od_frame(self.param_home(i), ValKind::I64);
                self.ins2w("mov", &src, &dst)?;
            }
        }
        // Save any callee-saved registers the allocator uses.
        for (j, &r) in self.frame.saved_regs.clone().iter().enumerate() {
            let src = self.od_reg(self.reg_name(r));
            let dst = self.od_frame(self.save_slot(j), ValKind::I32);
            self.ins2w("mov", &src, &dst)?;
        }
        Ok(())
    }

    fn emit_epilogue(&mut self) -> Result<(), EmitError> {
        for (j, &r) in self.frame.saved_regs.clone().iter().enumerate() {
            let src = self.od_frame(self.save_slot(j), ValKind::I32);
            let dst = self.od_reg(self.reg_name(r));
            self.ins2w("mov", &src, &dst)?;
        }
        self.ins0("leave")?;
        self.ins0("ret")
    }

    /// `.loc` directive ahead of an instruction carrying a location.
    fn emit_loc(&mut self, inst: &Inst) -> Result<(), EmitError> {
        if self.opts.debug {
            if let Some(loc) = &inst.loc {
                if loc.line > 0 {
                    writeln!(self.out, ".loc 1 {} {}", loc.line, loc.column)?;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::*;
    use crate::opt::OptFlags;
    use crate::regalloc;
    use crate::sema::test_util as sema_util;
    use crate::types::Target;

    /// Full pipeline to assembly text with default optimization.
    pub fn compile(src: &str, opts: &EmitOptions) -> String {
        let mut diag = crate::diag::DiagContext::new();
        let mut unit = sema_util::try_lower(src, opts.target, &mut diag).unwrap_or_else(|_| {
            let msgs: Vec<String> = diag.diagnostics().iter().map(|d| d.to_string()).collect();
            panic!("lowering failed: {}", msgs.join("; "))
        });
        crate::opt::optimize(&mut unit.insts, OptFlags::default());
        let alloc = regalloc::allocate(&unit.insts, opts.target.x86_64);
        emit(&unit.insts, &alloc, &unit.object_sizes, opts).expect("emission")
    }

    pub fn compile32(src: &str) -> String {
        compile(src, &EmitOptions::default())
    }

    pub fn compile64(src: &str) -> String {
        compile(
            src,
            &EmitOptions {
                target: Target { x86_64: true },
                ..EmitOptions::default()
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::test_util::{compile, compile32, compile64};
    use super::*;

    #[test]
    fn test_constant_return_folds_into_mov() {
        let asm = compile32("int f(void) { return 2 + 3; }");
        assert!(asm.contains("movl $5, %eax"), "asm was:\n{}", asm);
        assert!(asm.contains("ret"));
        assert!(!asm.contains("addl"), "folded add survived:\n{}", asm);
    }

    #[test]
    fn test_static_array_data_section() {
        let asm = compile32("static int a[3] = {1, 2, 3};\nint f(void) { return a[0]; }");
        assert!(asm.contains(".local a"), "asm was:\n{}", asm);
        assert!(asm.contains("a:"));
        assert!(asm.contains(".long 1"));
        assert!(asm.contains(".long 2"));
        assert!(asm.contains(".long 3"));
    }

    #[test]
    fn test_globl_on_exported_function() {
        let asm = compile32("int f(void) { return 0; }");
        assert!(asm.contains(".globl f"));
        let static_asm = compile32("static int g(void) { return 0; }\nint f(void) { return g(); }");
        assert!(!static_asm.contains(".globl g"), "asm was:\n{}", static_asm);
    }

    #[test]
    fn test_frame_setup_32_and_64() {
        let asm32 = compile32("int f(void) { int x; x = 1; return x; }");
        assert!(asm32.contains("pushl %ebp"));
        assert!(asm32.contains("movl %esp, %ebp"));

        let asm64 = compile64("int f(void) { int x; x = 1; return x; }");
        assert!(asm64.contains("pushq %rbp"));
        assert!(asm64.contains("movq %rsp, %rbp"));
    }

    #[test]
    fn test_intel_syntax_reorders_and_drops_sigils() {
        let asm = compile(
            "int f(void) { return 7; }",
            &EmitOptions {
                syntax: AsmSyntax::Intel,
                ..EmitOptions::default()
            },
        );
        assert!(asm.contains(".intel_syntax noprefix"));
        assert!(asm.contains("mov eax, 7"), "asm was:\n{}", asm);
        assert!(!asm.contains("%eax"));
    }

    #[test]
    fn test_debug_directives() {
        let opts = EmitOptions {
            debug: true,
            source_file: Some("unit.c".to_string()),
            ..EmitOptions::default()
        };
        let asm = compile("int f(void) { return 1; }", &opts);
        assert!(asm.contains(".file 1 \"unit.c\""));
        assert!(asm.contains(".loc 1 "), "asm was:\n{}", asm);
    }

    #[test]
    fn test_uninitialized_global_gets_lcomm() {
        let asm = compile32("int counter;\nint f(void) { return counter; }");
        assert!(asm.contains(".lcomm counter, 4"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_switch_compiles_to_cmp_je_chain() {
        let asm = compile32(
            "int f(int x) { switch (x) { case 1: return 1; case 2: return 2; } return 0; }",
        );
        // One fused cmp/je pair per case, branching to distinct labels
        let targets: Vec<&str> = asm
            .lines()
            .filter_map(|l| l.trim().strip_prefix("je "))
            .collect();
        assert_eq!(targets.len(), 2, "asm was:\n{}", asm);
        assert_ne!(targets[0], targets[1]);
        assert!(asm.contains("jmp "), "missing dispatch fall-through:\n{}", asm);
    }

    #[test]
    fn test_logical_and_lowers_to_branch_and_set() {
        let asm = compile32("int f(int a, int b) { return a && b; }");
        assert!(asm.contains("_false"), "asm was:\n{}", asm);
        assert!(asm.contains("_end"));
        assert!(asm.contains("je "));
    }

    #[test]
    fn test_call_cleans_up_pushed_arguments() {
        let asm = compile32("int g(int a, int b);\nint f(void) { return g(1, 2); }");
        assert!(asm.contains("call g"), "asm was:\n{}", asm);
        assert!(asm.contains("addl $8, %esp"), "asm was:\n{}", asm);
    }
}
