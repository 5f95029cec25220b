//! Text-section emission: one dispatch per LIR instruction.
//!
//! Integer values move through the accumulator; the allocator keeps it
//! free for exactly that. A second scratch register is borrowed with a
//! push/pop pair on x86-32 and taken from `%r11` on x86-64. Floating
//! point goes through the x87 stack, reading and writing the spill
//! slots the allocator pins float values to.

use super::{AsmSyntax, EmitError, Emitter, Od};
use crate::lir::{Inst, Op, ValKind, ValueId};
use std::fmt::Write as _;

impl Emitter<'_> {
    pub(super) fn emit_text_section(&mut self) -> Result<(), EmitError> {
        writeln!(self.out, ".text")?;
        let mut i = 0;
        while i < self.insts.len() {
            i += self.emit_inst(i)?;
        }
        Ok(())
    }

    /// Emit instruction `i`; returns how many instructions were
    /// consumed (two when a compare fuses into its branch).
    fn emit_inst(&mut self, i: usize) -> Result<usize, EmitError> {
        let inst = self.insts[i].clone();
        if inst.op.is_global_directive() {
            return Ok(1);
        }
        self.emit_loc(&inst)?;

        match inst.op {
            Op::FuncBegin => {
                self.frame = self.compute_frame(i);
                self.pending_args.clear();
                self.emit_prologue(&inst)?;
            }
            Op::FuncEnd => {
                if !self.just_returned {
                    self.emit_epilogue()?;
                }
            }
            Op::Label => {
                let name = inst.name.as_deref().unwrap_or("");
                self.label_line(name)?;
            }
            Op::Br => {
                let name = inst.name.as_deref().unwrap_or("");
                self.ins_raw(&format!("jmp {}", name))?;
            }
            Op::BCond => self.emit_bcond_generic(&inst)?,

            Op::Const => {
                let kind = self.reg_kind(inst.ty);
                // A constant consumed only by the next return moves
                // straight into the result register.
                if let Some(next) = self.insts.get(i + 1) {
                    if next.op == Op::Return
                        && next.src1 == inst.dest
                        && !next.ty.is_float()
                        && !self.value_used_after(i + 2, inst.dest)
                    {
                        if kind == ValKind::I64 && i64::from(inst.imm as i32) != inst.imm {
                            self.ins_raw(&self.movabs_line(inst.imm, self.acc_word()))?;
                        } else {
                            let imm = self.od_imm(inst.imm);
                            let acc = self.od_reg(self.acc(kind));
                            self.ins2("mov", kind, &imm, &acc)?;
                        }
                        self.emit_epilogue()?;
                        return Ok(2);
                    }
                }
                if kind == ValKind::I64 && i64::from(inst.imm as i32) != inst.imm {
                    // Needs the 64-bit immediate form
                    self.ins_raw(&self.movabs_line(inst.imm, self.acc_word()))?;
                    self.store_acc(inst.dest, inst.ty)?;
                } else {
                    let dst = self.od_value(inst.dest, inst.ty)?;
                    let imm = self.od_imm(inst.imm);
                    self.ins2("mov", kind, &imm, &dst)?;
                }
            }
            Op::FConst => self.emit_fconst(&inst)?,

            Op::Add | Op::Sub | Op::And | Op::Or | Op::Xor | Op::Mul => {
                let mnem = match inst.op {
                    Op::Add => "add",
                    Op::Sub => "sub",
                    Op::And => "and",
                    Op::Or => "or",
                    Op::Xor => "xor",
                    _ => "imul",
                };
                self.load_acc(inst.src1, inst.ty)?;
                let rhs = self.od_value(inst.src2, inst.ty)?;
                let acc = self.od_reg(self.acc(self.reg_kind(inst.ty)));
                self.ins2(mnem, self.reg_kind(inst.ty), &rhs, &acc)?;
                self.store_acc(inst.dest, inst.ty)?;
            }
            Op::Neg | Op::Not => {
                let mnem = if inst.op == Op::Neg { "neg" } else { "not" };
                self.load_acc(inst.src1, inst.ty)?;
                let acc = self.od_reg(self.acc(self.reg_kind(inst.ty)));
                self.ins1(mnem, self.reg_kind(inst.ty), &acc)?;
                self.store_acc(inst.dest, inst.ty)?;
            }
            Op::Div | Op::Mod => self.emit_divmod(&inst)?,
            Op::Shl | Op::Shr => self.emit_shift(&inst)?,

            Op::FAdd | Op::FSub | Op::FMul | Op::FDiv => {
                let mnem = match inst.op {
                    Op::FAdd => "faddp",
                    Op::FSub => "fsubp",
                    Op::FMul => "fmulp",
                    _ => "fdivp",
                };
                self.fld_value(inst.src1, inst.ty)?;
                self.fld_value(inst.src2, inst.ty)?;
                self.ins_raw(mnem)?;
                self.fstp_value(inst.dest, inst.ty)?;
            }
            Op::FNeg => {
                self.fld_value(inst.src1, inst.ty)?;
                self.ins_raw("fchs")?;
                self.fstp_value(inst.dest, inst.ty)?;
            }

            Op::CAdd | Op::CSub | Op::CMul | Op::CDiv => self.emit_complex(&inst)?,

            Op::Cast => self.emit_cast(&inst)?,
            Op::PtrAdd => self.emit_ptr_add(&inst)?,
            Op::PtrDiff => self.emit_ptr_diff(&inst)?,

            Op::CmpEq | Op::CmpNe | Op::CmpLt | Op::CmpLe | Op::CmpGt | Op::CmpGe => {
                // A compare feeding only the next conditional branch
                // fuses into a cmp/jcc pair.
                if let Some(next) = self.insts.get(i + 1) {
                    if next.op == Op::BCond
                        && next.src1 == inst.dest
                        && !self.value_used_after(i + 2, inst.dest)
                    {
                        let next = next.clone();
                        self.emit_fused_cmp_branch(&inst, &next)?;
                        return Ok(2);
                    }
                }
                self.emit_compare(&inst)?;
            }
            Op::LogAnd | Op::LogOr => self.emit_logical(&inst)?,

            Op::Load => {
                let name = self.name_of(&inst)?;
                let src = self.named_operand(&name, inst.ty);
                self.load_extend(&src, inst.ty)?;
                self.store_acc(inst.dest, inst.ty)?;
            }
            Op::Store => {
                let name = self.name_of(&inst)?;
                if inst.ty.is_float() {
                    self.fld_value(inst.src1, inst.ty)?;
                    let dst = self.named_operand(&name, inst.ty);
                    self.fstp_mem(&dst, inst.ty)?;
                } else {
                    self.load_acc(inst.src1, inst.ty)?;
                    let dst = self.named_operand(&name, inst.ty);
                    let acc = self.od_reg(self.acc(inst.ty));
                    self.ins2("mov", inst.ty, &acc, &dst)?;
                }
            }
            Op::LoadParam => self.emit_load_param(&inst)?,
            Op::StoreParam => self.emit_store_param(&inst)?,
            Op::LoadPtr => {
                self.load_acc_word(inst.src1)?;
                if inst.ty.is_float() {
                    let mem = self.od_mem(self.acc_word(), 0, inst.ty);
                    self.fld_mem(&mem, inst.ty)?;
                    self.fstp_value(inst.dest, inst.ty)?;
                } else {
                    let mem = self.od_mem(self.acc_word(), 0, inst.ty);
                    self.load_extend(&mem, inst.ty)?;
                    self.store_acc(inst.dest, inst.ty)?;
                }
            }
            Op::StorePtr => self.emit_store_ptr(&inst)?,
            Op::LoadIdx => self.emit_load_idx(&inst)?,
            Op::StoreIdx => self.emit_store_idx(&inst)?,
            Op::BfLoad => self.emit_bf_load(&inst)?,
            Op::BfStore => self.emit_bf_store(&inst)?,

            Op::AddrOf => {
                let name = self.name_of(&inst)?;
                if let Some(offset) = name.strip_prefix("stack:") {
                    let offset: i64 = offset
                        .parse()
                        .map_err(|_| EmitError::Logic(format!("bad stack name '{}'", name)))?;
                    let src = self.od_frame(offset, ValKind::Ptr);
                    let acc = self.od_reg(self.acc_word());
                    self.ins2w("lea", &src, &acc)?;
                } else {
                    let imm = self.od_sym_imm(&name);
                    let acc = self.od_reg(self.acc_word());
                    self.ins2w("mov", &imm, &acc)?;
                }
                self.store_acc(inst.dest, ValKind::Ptr)?;
            }
            Op::Alloca => {
                self.load_acc(inst.src1, ValKind::I32)?;
                let acc = self.od_reg(self.acc_word());
                let fifteen = self.od_imm(15);
                let mask = self.od_imm(-16);
                self.ins2w("add", &fifteen, &acc)?;
                self.ins2w("and", &mask, &acc)?;
                let sp = self.od_reg(self.stack_reg());
                self.ins2w("sub", &acc, &sp)?;
                self.ins2w("mov", &sp, &acc)?;
                self.store_acc(inst.dest, ValKind::Ptr)?;
            }

            Op::Arg => {
                self.pending_args.push((inst.imm, inst.src1, inst.ty));
            }
            Op::Call | Op::CallIndirect => self.emit_call(&inst)?,

            Op::Return => {
                if inst.src1 != 0 {
                    if inst.ty.is_float() {
                        if self.x64() {
                            // %xmm0 carries float returns
                            let src = self.od_float_slot(inst.src1, inst.ty)?;
                            let mnem = if inst.ty == ValKind::F32 { "movss" } else { "movsd" };
                            match self.opts.syntax {
                                AsmSyntax::Att => {
                                    self.ins_raw(&format!("{} {}, %xmm0", mnem, src.att))?
                                }
                                AsmSyntax::Intel => {
                                    self.ins_raw(&format!("{} xmm0, {}", mnem, src.intel))?
                                }
                            }
                        } else {
                            // st(0) carries float returns
                            self.fld_value(inst.src1, inst.ty)?;
                        }
                    } else {
                        self.load_acc(inst.src1, inst.ty)?;
                    }
                }
                self.emit_epilogue()?;
            }
            Op::ReturnAgg => self.emit_return_agg(&inst)?,

            _ => {
                return Err(EmitError::Logic(format!(
                    "unhandled instruction {:?}",
                    inst.op
                )))
            }
        }
        Ok(1)
    }

    // ----- shared move helpers --------------------------------------------

    fn name_of(&self, inst: &Inst) -> Result<String, EmitError> {
        inst.name
            .as_deref()
            .map(|s| s.to_string())
            .ok_or_else(|| EmitError::Logic(format!("{:?} without a name", inst.op)))
    }

    /// Operand for a named location: frame slot or global symbol.
    fn named_operand(&self, name: &str, kind: ValKind) -> Od {
        if let Some(offset) = name.strip_prefix("stack:") {
            if let Ok(off) = offset.parse::<i64>() {
                return self.od_frame(off, kind);
            }
        }
        self.od_global(name, kind)
    }

    /// Move a value into the accumulator at its register width.
    fn load_acc(&mut self, value: ValueId, kind: ValKind) -> Result<(), EmitError> {
        let rk = self.reg_kind(kind);
        let src = self.od_value(value, kind)?;
        let acc = self.od_reg(self.acc(rk));
        self.ins2("mov", rk, &src, &acc)
    }

    /// Move a value into the accumulator at full word width (addresses).
    fn load_acc_word(&mut self, value: ValueId) -> Result<(), EmitError> {
        let src = self.od_value(value, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        self.ins2w("mov", &src, &acc)
    }

    /// Store the accumulator into a value's location.
    fn store_acc(&mut self, value: ValueId, kind: ValKind) -> Result<(), EmitError> {
        let rk = self.reg_kind(kind);
        let dst = self.od_value(value, kind)?;
        let acc = self.od_reg(self.acc(rk));
        self.ins2("mov", rk, &acc, &dst)
    }

    /// Load from memory into the accumulator, extending narrow values
    /// to 32 bits by signedness.
    fn load_extend(&mut self, src: &Od, kind: ValKind) -> Result<(), EmitError> {
        let mnem = match (kind.width(self.word() as u64), kind.is_unsigned()) {
            (1, true) => "movzb",
            (1, false) => "movsb",
            (2, true) => "movzw",
            (2, false) => "movsw",
            _ => {
                let rk = self.reg_kind(kind);
                let acc = self.od_reg(self.acc(rk));
                return self.ins2("mov", rk, src, &acc);
            }
        };
        let acc = self.od_reg("eax");
        match self.opts.syntax {
            AsmSyntax::Att => {
                self.ins_raw(&format!("{}l {}, {}", mnem, src.att, acc.att))
            }
            AsmSyntax::Intel => {
                let m = if mnem.starts_with("movz") { "movzx" } else { "movsx" };
                self.ins_raw(&format!("{} {}, {}", m, acc.intel, src.intel))
            }
        }
    }

    /// Scan forward for another use of `value`.
    fn value_used_after(&self, from: usize, value: ValueId) -> bool {
        self.insts[from.min(self.insts.len())..]
            .iter()
            .any(|x| x.src1 == value || x.src2 == value)
    }

    fn movabs_line(&self, imm: i64, reg: &str) -> String {
        match self.opts.syntax {
            AsmSyntax::Att => format!("movabsq ${}, %{}", imm, reg),
            AsmSyntax::Intel => format!("mov {}, {}", reg, imm),
        }
    }

    // ----- scratch register discipline ------------------------------------

    /// Borrow a second scratch register. On x86-32 `%edx` is saved and
    /// restored around the closure; on x86-64 `%r11` is free.
    fn with_scratch2<F>(&mut self, f: F) -> Result<(), EmitError>
    where
        F: FnOnce(&mut Self, &'static str) -> Result<(), EmitError>,
    {
        if self.x64() {
            f(self, "r11")
        } else {
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw("pushl %edx")?,
                AsmSyntax::Intel => self.ins_raw("push edx")?,
            }
            f(self, "edx")?;
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw("popl %edx"),
                AsmSyntax::Intel => self.ins_raw("pop edx"),
            }
        }
    }

    /// Scratch register name at word width.
    fn scratch2_word(&self, base: &'static str) -> &'static str {
        base
    }

    // ----- arithmetic helpers ---------------------------------------------

    fn emit_divmod(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let rk = self.reg_kind(inst.ty);
        self.load_acc(inst.src1, inst.ty)?;
        if inst.ty.is_unsigned() {
            // Zero the high half for unsigned division
            let dx = if rk == ValKind::I64 { "rdx" } else { "edx" };
            let dxo = self.od_reg(dx);
            self.ins2("xor", rk, &dxo.clone(), &dxo)?;
            let rhs = self.od_value(inst.src2, inst.ty)?;
            self.ins1("div", rk, &rhs)?;
        } else {
            self.ins_raw(if rk == ValKind::I64 { "cqto" } else { "cltd" })?;
            let rhs = self.od_value(inst.src2, inst.ty)?;
            self.ins1("idiv", rk, &rhs)?;
        }
        if inst.op == Op::Mod {
            // Remainder lands in %edx
            let dx = if rk == ValKind::I64 { "rdx" } else { "edx" };
            let src = self.od_reg(dx);
            let acc = self.od_reg(self.acc(rk));
            self.ins2("mov", rk, &src, &acc)?;
        }
        self.store_acc(inst.dest, inst.ty)
    }

    fn emit_shift(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let rk = self.reg_kind(inst.ty);
        // Count goes through %cl; the allocator keeps %ecx free here.
        let count = self.od_value(inst.src2, inst.ty)?;
        let cx = if rk == ValKind::I64 { "rcx" } else { "ecx" };
        let cxo = self.od_reg(cx);
        self.ins2("mov", rk, &count, &cxo)?;
        self.load_acc(inst.src1, inst.ty)?;
        let mnem = if inst.op == Op::Shl {
            "shl"
        } else if inst.ty.is_unsigned() {
            "shr"
        } else {
            "sar"
        };
        let acc = self.od_reg(self.acc(rk));
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(&format!(
                "{}{} %cl, {}",
                mnem,
                if rk == ValKind::I64 { "q" } else { "l" },
                acc.att
            ))?,
            AsmSyntax::Intel => self.ins_raw(&format!("{} {}, cl", mnem, acc.intel))?,
        }
        self.store_acc(inst.dest, inst.ty)
    }

    fn emit_ptr_add(&mut self, inst: &Inst) -> Result<(), EmitError> {
        // dest = src1 + src2 * elem_size
        self.load_acc(inst.src2, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        if inst.imm != 1 {
            let imm = self.od_imm(inst.imm);
            self.ins2w("imul", &imm, &acc)?;
        }
        let base = self.od_value(inst.src1, ValKind::Ptr)?;
        self.ins2w("add", &base, &acc)?;
        self.store_acc(inst.dest, ValKind::Ptr)
    }

    fn emit_ptr_diff(&mut self, inst: &Inst) -> Result<(), EmitError> {
        self.load_acc(inst.src1, ValKind::Ptr)?;
        let rhs = self.od_value(inst.src2, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        self.ins2w("sub", &rhs, &acc)?;
        let elem = inst.imm.max(1);
        if elem > 1 {
            if elem.count_ones() == 1 {
                let shift = self.od_imm(elem.trailing_zeros() as i64);
                self.ins2w("sar", &shift, &acc)?;
            } else {
                // %edx is reserved whenever a PtrDiff divides
                self.ins_raw(if self.x64() { "cqto" } else { "cltd" })?;
                if self.x64() {
                    self.ins_raw(&self.movabs_line(elem, "r11"))?;
                    match self.opts.syntax {
                        AsmSyntax::Att => self.ins_raw("idivq %r11")?,
                        AsmSyntax::Intel => self.ins_raw("idiv r11")?,
                    }
                } else {
                    match self.opts.syntax {
                        AsmSyntax::Att => {
                            self.ins_raw(&format!("pushl ${}", elem))?;
                            self.ins_raw("idivl (%esp)")?;
                            self.ins_raw("addl $4, %esp")?;
                        }
                        AsmSyntax::Intel => {
                            self.ins_raw(&format!("push {}", elem))?;
                            self.ins_raw("idiv dword ptr [esp]")?;
                            self.ins_raw("add esp, 4")?;
                        }
                    }
                }
            }
        }
        self.store_acc(inst.dest, inst.ty)
    }

    // ----- comparisons and branches ---------------------------------------

    /// Condition-code mnemonic for a comparison.
    fn cc_for(op: Op, unsigned: bool) -> &'static str {
        match (op, unsigned) {
            (Op::CmpEq, _) => "e",
            (Op::CmpNe, _) => "ne",
            (Op::CmpLt, false) => "l",
            (Op::CmpLe, false) => "le",
            (Op::CmpGt, false) => "g",
            (Op::CmpGe, false) => "ge",
            (Op::CmpLt, true) => "b",
            (Op::CmpLe, true) => "be",
            (Op::CmpGt, true) => "a",
            (Op::CmpGe, true) => "ae",
            _ => "e",
        }
    }

    fn invert_cc(cc: &str) -> &'static str {
        match cc {
            "e" => "ne",
            "ne" => "e",
            "l" => "ge",
            "le" => "g",
            "g" => "le",
            "ge" => "l",
            "b" => "ae",
            "be" => "a",
            "a" => "be",
            "ae" => "b",
            _ => "ne",
        }
    }

    /// `cmp` the two operands of a comparison, leaving flags set.
    fn emit_cmp_flags(&mut self, inst: &Inst) -> Result<(), EmitError> {
        if inst.ty.is_float() {
            self.fld_value(inst.src2, inst.ty)?;
            self.fld_value(inst.src1, inst.ty)?;
            match self.opts.syntax {
                AsmSyntax::Att => {
                    self.ins_raw("fucomip %st(1), %st")?;
                    self.ins_raw("fstp %st(0)")?;
                }
                AsmSyntax::Intel => {
                    self.ins_raw("fucomip st(1)")?;
                    self.ins_raw("fstp st(0)")?;
                }
            }
            return Ok(());
        }
        let rk = self.reg_kind(inst.ty);
        self.load_acc(inst.src1, inst.ty)?;
        let rhs = self.od_value(inst.src2, inst.ty)?;
        let acc = self.od_reg(self.acc(rk));
        self.ins2("cmp", rk, &rhs, &acc)
    }

    fn emit_compare(&mut self, inst: &Inst) -> Result<(), EmitError> {
        self.emit_cmp_flags(inst)?;
        // Floats compare like unsigned quantities
        let unsigned = inst.ty.is_unsigned() || inst.ty.is_float();
        let cc = Self::cc_for(inst.op, unsigned);
        match self.opts.syntax {
            AsmSyntax::Att => {
                self.ins_raw(&format!("set{} %al", cc))?;
                self.ins_raw("movzbl %al, %eax")?;
            }
            AsmSyntax::Intel => {
                self.ins_raw(&format!("set{} al", cc))?;
                self.ins_raw("movzx eax, al")?;
            }
        }
        self.store_acc(inst.dest, ValKind::I32)
    }

    /// `cmp` + `jcc` for a compare whose only consumer is the branch.
    fn emit_fused_cmp_branch(&mut self, cmp: &Inst, bcond: &Inst) -> Result<(), EmitError> {
        self.emit_cmp_flags(cmp)?;
        let unsigned = cmp.ty.is_unsigned() || cmp.ty.is_float();
        let mut cc = Self::cc_for(cmp.op, unsigned);
        if bcond.imm == 0 {
            // Branch taken when the comparison is false
            cc = Self::invert_cc(cc);
        }
        let target = bcond.name.as_deref().unwrap_or("");
        self.ins_raw(&format!("j{} {}", cc, target))
    }

    /// Unfused conditional branch: test the value against zero.
    fn emit_bcond_generic(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let kind = if inst.ty == ValKind::Void {
            ValKind::I32
        } else {
            inst.ty
        };
        let rk = self.reg_kind(kind);
        let zero = self.od_imm(0);
        let opnd = self.od_value(inst.src1, kind)?;
        self.ins2("cmp", rk, &zero, &opnd)?;
        let jcc = if inst.imm == 0 { "je" } else { "jne" };
        let target = inst.name.as_deref().unwrap_or("");
        self.ins_raw(&format!("{} {}", jcc, target))
    }

    /// Short-circuit `&&`/`||` via compare + branch + set sequences.
    fn emit_logical(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let id = self.fresh_cc_label();
        let zero = self.od_imm(0);
        let a = self.od_value(inst.src1, ValKind::I32)?;
        let b = self.od_value(inst.src2, ValKind::I32)?;
        if inst.op == Op::LogAnd {
            self.ins2("cmp", ValKind::I32, &zero, &a)?;
            self.ins_raw(&format!("je L{}_false", id))?;
            self.ins2("cmp", ValKind::I32, &zero, &b)?;
            self.ins_raw(&format!("je L{}_false", id))?;
            let one = self.od_imm(1);
            let acc = self.od_reg("eax");
            self.ins2("mov", ValKind::I32, &one, &acc)?;
            self.ins_raw(&format!("jmp L{}_end", id))?;
            self.label_line(&format!("L{}_false", id))?;
            let z = self.od_imm(0);
            self.ins2("mov", ValKind::I32, &z, &acc)?;
            self.label_line(&format!("L{}_end", id))?;
        } else {
            self.ins2("cmp", ValKind::I32, &zero, &a)?;
            self.ins_raw(&format!("jne L{}_true", id))?;
            self.ins2("cmp", ValKind::I32, &zero, &b)?;
            self.ins_raw(&format!("jne L{}_true", id))?;
            let z = self.od_imm(0);
            let acc = self.od_reg("eax");
            self.ins2("mov", ValKind::I32, &z, &acc)?;
            self.ins_raw(&format!("jmp L{}_end", id))?;
            self.label_line(&format!("L{}_true", id))?;
            let one = self.od_imm(1);
            self.ins2("mov", ValKind::I32, &one, &acc)?;
            self.label_line(&format!("L{}_end", id))?;
        }
        self.store_acc(inst.dest, ValKind::I32)
    }

    // ----- float plumbing -------------------------------------------------

    /// Duplicate the x87 stack top.
    fn fld_top(&mut self) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw("fld %st(0)"),
            AsmSyntax::Intel => self.ins_raw("fld st(0)"),
        }
    }

    fn fld_suffix(&self, kind: ValKind) -> &'static str {
        match kind {
            ValKind::F32 => "s",
            ValKind::F80 => "t",
            _ => "l",
        }
    }

    fn fld_mem(&mut self, src: &Od, kind: ValKind) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(&format!("fld{} {}", self.fld_suffix(kind), src.att)),
            AsmSyntax::Intel => self.ins_raw(&format!("fld {}", src.intel)),
        }
    }

    fn fstp_mem(&mut self, dst: &Od, kind: ValKind) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => {
                self.ins_raw(&format!("fstp{} {}", self.fld_suffix(kind), dst.att))
            }
            AsmSyntax::Intel => self.ins_raw(&format!("fstp {}", dst.intel)),
        }
    }

    fn fld_value(&mut self, value: ValueId, kind: ValKind) -> Result<(), EmitError> {
        let src = self.od_float_slot(value, kind)?;
        self.fld_mem(&src, kind)
    }

    fn fstp_value(&mut self, value: ValueId, kind: ValKind) -> Result<(), EmitError> {
        let dst = self.od_float_slot(value, kind)?;
        self.fstp_mem(&dst, kind)
    }

    fn emit_fconst(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let dst_slot = self.od_float_slot(inst.dest, inst.ty)?;
        if inst.ty == ValKind::F32 {
            // The slot is one word; store the single-precision pattern
            let bits = (f64::from_bits(inst.imm as u64) as f32).to_bits() as i64;
            let imm = self.od_imm(bits);
            let dst = self.od_float_slot(inst.dest, ValKind::F32)?;
            return self.ins2("mov", ValKind::I32, &imm, &dst);
        }
        if self.x64() {
            self.ins_raw(&self.movabs_line(inst.imm, "r11"))?;
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw(&format!("movq %r11, {}", dst_slot.att))?,
                AsmSyntax::Intel => {
                    self.ins_raw(&format!("mov {}, r11", dst_slot.intel))?
                }
            }
        } else {
            // Two word stores carry the 64-bit pattern
            let off = self.float_slot_offset(inst.dest)?;
            let lo = (inst.imm as u64 & 0xffff_ffff) as i64;
            let hi = ((inst.imm as u64) >> 32) as i64;
            let lo_od = self.od_imm(lo);
            let hi_od = self.od_imm(hi);
            let dst_lo = self.od_frame(off, ValKind::I32);
            let dst_hi = self.od_frame(off - 4, ValKind::I32);
            self.ins2("mov", ValKind::I32, &lo_od, &dst_lo)?;
            self.ins2("mov", ValKind::I32, &hi_od, &dst_hi)?;
        }
        // Widen in place for long-double destinations
        if inst.ty == ValKind::F80 {
            self.fld_mem(&dst_slot, ValKind::F64)?;
            self.fstp_mem(&dst_slot, ValKind::F80)?;
        }
        Ok(())
    }

    // ----- casts ----------------------------------------------------------

    fn emit_cast(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let from = ValKind::from_code(inst.imm);
        let to = inst.ty;

        match (from.is_float(), to.is_float()) {
            (false, false) => {
                // Integer-to-integer: load at source width, re-extend at
                // the destination width.
                self.load_acc(inst.src1, from)?;
                match (to.width(self.word() as u64), to.is_unsigned()) {
                    (1, true) => self.raw_extend("movzbl %al, %eax", "movzx eax, al")?,
                    (1, false) => self.raw_extend("movsbl %al, %eax", "movsx eax, al")?,
                    (2, true) => self.raw_extend("movzwl %ax, %eax", "movzx eax, ax")?,
                    (2, false) => self.raw_extend("movswl %ax, %eax", "movsx eax, ax")?,
                    (8, _) if self.x64() => {
                        if from.width(8) <= 4 && !from.is_unsigned() {
                            self.raw_extend("movslq %eax, %rax", "movsxd rax, eax")?;
                        } else if from.width(8) <= 4 {
                            // mov eax, eax zero-extends
                            self.raw_extend("movl %eax, %eax", "mov eax, eax")?;
                        }
                    }
                    _ => {}
                }
                self.store_acc(inst.dest, to)
            }
            (false, true) => {
                // Integer to float through a temporary in the dest slot
                let rk = self.reg_kind(from);
                let int_dst = self.od_float_slot(inst.dest, rk)?;
                let dst = self.od_float_slot(inst.dest, to)?;
                self.load_acc(inst.src1, from)?;
                let acc = self.od_reg(self.acc(rk));
                self.ins2("mov", rk, &acc, &int_dst)?;
                match self.opts.syntax {
                    AsmSyntax::Att => self.ins_raw(&format!(
                        "fild{} {}",
                        if rk == ValKind::I64 { "q" } else { "l" },
                        int_dst.att
                    ))?,
                    AsmSyntax::Intel => self.ins_raw(&format!("fild {}", int_dst.intel))?,
                }
                self.fstp_mem(&dst, to)
            }
            (true, false) => {
                // Float to integer, truncating; fisttp only takes a
                // memory operand, so bounce through the stack
                let src = self.od_float_slot(inst.src1, from)?;
                self.fld_mem(&src, from)?;
                let rk = self.reg_kind(to);
                let sp = self.stack_reg();
                match self.opts.syntax {
                    AsmSyntax::Att => {
                        self.ins_raw(&format!("sub{} $8, %{}", self.wsuffix(), sp))?;
                        self.ins_raw(&format!(
                            "fisttp{} (%{})",
                            if rk == ValKind::I64 { "q" } else { "l" },
                            sp
                        ))?;
                        self.ins_raw(&format!(
                            "mov{} (%{}), %{}",
                            if rk == ValKind::I64 { "q" } else { "l" },
                            sp,
                            self.acc(rk)
                        ))?;
                        self.ins_raw(&format!("add{} $8, %{}", self.wsuffix(), sp))?;
                    }
                    AsmSyntax::Intel => {
                        self.ins_raw(&format!("sub {}, 8", sp))?;
                        let size = if rk == ValKind::I64 { "qword" } else { "dword" };
                        self.ins_raw(&format!("fisttp {} ptr [{}]", size, sp))?;
                        self.ins_raw(&format!("mov {}, {} ptr [{}]", self.acc(rk), size, sp))?;
                        self.ins_raw(&format!("add {}, 8", sp))?;
                    }
                }
                self.store_acc(inst.dest, to)
            }
            (true, true) => {
                let src = self.od_float_slot(inst.src1, from)?;
                self.fld_mem(&src, from)?;
                self.fstp_value(inst.dest, to)
            }
        }
    }

    fn raw_extend(&mut self, att: &str, intel: &str) -> Result<(), EmitError> {
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(att),
            AsmSyntax::Intel => self.ins_raw(intel),
        }
    }

    // ----- parameters -----------------------------------------------------

    fn emit_load_param(&mut self, inst: &Inst) -> Result<(), EmitError> {
        if self.x64() {
            if inst.imm < 6 {
                let src = self.od_frame(self.param_home(inst.imm), ValKind::I64);
                let acc = self.od_reg(self.acc_word());
                self.ins2w("mov", &src, &acc)?;
            } else {
                let off = 16 + (inst.imm - 6) * 8;
                let src = self.od_frame_pos(off, ValKind::I64);
                let acc = self.od_reg(self.acc_word());
                self.ins2w("mov", &src, &acc)?;
            }
        } else {
            let off = 8 + inst.imm * 4;
            let src = self.od_frame_pos(off, ValKind::I32);
            let acc = self.od_reg("eax");
            self.ins2("mov", ValKind::I32, &src, &acc)?;
        }
        self.store_acc(inst.dest, inst.ty)
    }

    fn emit_store_param(&mut self, inst: &Inst) -> Result<(), EmitError> {
        self.load_acc(inst.src1, inst.ty)?;
        if self.x64() {
            let dst = if inst.imm < 6 {
                self.od_frame(self.param_home(inst.imm), ValKind::I64)
            } else {
                self.od_frame_pos(16 + (inst.imm - 6) * 8, ValKind::I64)
            };
            let acc = self.od_reg(self.acc_word());
            self.ins2w("mov", &acc, &dst)
        } else {
            let dst = self.od_frame_pos(8 + inst.imm * 4, ValKind::I32);
            let acc = self.od_reg("eax");
            self.ins2("mov", ValKind::I32, &acc, &dst)
        }
    }

    // ----- memory through pointers and indices ----------------------------

    fn emit_store_ptr(&mut self, inst: &Inst) -> Result<(), EmitError> {
        if inst.ty.is_float() {
            self.fld_value(inst.src2, inst.ty)?;
            self.load_acc_word(inst.src1)?;
            let mem = self.od_mem(self.acc_word(), 0, inst.ty);
            return self.fstp_mem(&mem, inst.ty);
        }
        let val = self.od_value(inst.src2, inst.ty)?;
        let kind = inst.ty;
        self.load_acc_word(inst.src1)?;
        self.with_scratch2(|e, s2| {
            let sreg = e.scratch2_sized(s2, kind);
            let s2w = e.scratch2_word(s2);
            let vod = val.clone();
            let s2od = e.od_reg(s2w);
            e.ins2("mov", e.reg_kind(kind), &vod, &s2od)?;
            let mem = e.od_mem(e.acc_word(), 0, kind);
            let sod = e.od_reg(sreg);
            e.ins2("mov", kind, &sod, &mem)
        })
    }

    /// Sub-register of the scratch at a narrow width.
    fn scratch2_sized(&self, base: &'static str, kind: ValKind) -> &'static str {
        let w = kind.width(self.word() as u64);
        match (base, w) {
            ("edx", 1) => "dl",
            ("edx", 2) => "dx",
            ("edx", _) => "edx",
            ("r11", 1) => "r11b",
            ("r11", 2) => "r11w",
            ("r11", 4) => "r11d",
            _ => "r11",
        }
    }

    fn emit_load_idx(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let name = self.name_of(inst)?;
        // eax = index * elem_size + base address
        self.load_acc(inst.src1, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        if inst.imm != 1 {
            let imm = self.od_imm(inst.imm);
            self.ins2w("imul", &imm, &acc)?;
        }
        self.add_symbol_base(&name)?;
        if inst.ty.is_float() {
            let mem = self.od_mem(self.acc_word(), 0, inst.ty);
            self.fld_mem(&mem, inst.ty)?;
            return self.fstp_value(inst.dest, inst.ty);
        }
        let mem = self.od_mem(self.acc_word(), 0, inst.ty);
        self.load_extend(&mem, inst.ty)?;
        self.store_acc(inst.dest, inst.ty)
    }

    fn emit_store_idx(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let name = self.name_of(inst)?;
        if inst.ty.is_float() {
            self.fld_value(inst.src2, inst.ty)?;
            self.load_acc(inst.src1, ValKind::Ptr)?;
            let acc = self.od_reg(self.acc_word());
            if inst.imm != 1 {
                let imm = self.od_imm(inst.imm);
                self.ins2w("imul", &imm, &acc)?;
            }
            self.add_symbol_base(&name)?;
            let mem = self.od_mem(self.acc_word(), 0, inst.ty);
            return self.fstp_mem(&mem, inst.ty);
        }
        self.load_acc(inst.src1, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        if inst.imm != 1 {
            let imm = self.od_imm(inst.imm);
            self.ins2w("imul", &imm, &acc)?;
        }
        self.add_symbol_base(&name)?;
        let kind = inst.ty;
        let val = self.od_value(inst.src2, kind)?;
        self.with_scratch2(|e, s2| {
            let sreg = e.scratch2_sized(s2, kind);
            let s2od = e.od_reg(e.scratch2_word(s2));
            e.ins2("mov", e.reg_kind(kind), &val, &s2od)?;
            let mem = e.od_mem(e.acc_word(), 0, kind);
            let sod = e.od_reg(sreg);
            e.ins2("mov", kind, &sod, &mem)
        })
    }

    /// Add the address of a named base (frame local or global symbol)
    /// to the accumulator.
    fn add_symbol_base(&mut self, name: &str) -> Result<(), EmitError> {
        let acc = self.od_reg(self.acc_word());
        if let Some(offset) = name.strip_prefix("stack:") {
            let off: i64 = offset
                .parse()
                .map_err(|_| EmitError::Logic(format!("bad stack name '{}'", name)))?;
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw(&format!(
                    "lea{} -{}(%{},%{}), {}",
                    if self.x64() { "q" } else { "l" },
                    off,
                    self.frame_reg(),
                    self.acc_word(),
                    acc.att
                )),
                AsmSyntax::Intel => self.ins_raw(&format!(
                    "lea {}, [{}+{}-{}]",
                    acc.intel,
                    self.frame_reg(),
                    self.acc_word(),
                    off
                )),
            }
        } else {
            let sym = self.od_sym_imm(name);
            self.ins2w("add", &sym, &acc)
        }
    }

    // ----- bit-fields -----------------------------------------------------

    fn emit_bf_load(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let bit_offset = (inst.imm >> 8) & 0xff;
        let width = inst.imm & 0xff;
        let mask = (1i64 << width) - 1;
        self.load_acc_word(inst.src1)?;
        let mem = self.od_mem(self.acc_word(), 0, ValKind::U8);
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(&format!("movzbl {}, %eax", mem.att))?,
            AsmSyntax::Intel => self.ins_raw(&format!("movzx eax, {}", mem.intel))?,
        }
        if bit_offset > 0 {
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw(&format!("shrl ${}, %eax", bit_offset))?,
                AsmSyntax::Intel => self.ins_raw(&format!("shr eax, {}", bit_offset))?,
            }
        }
        let m = self.od_imm(mask);
        let acc = self.od_reg("eax");
        self.ins2("and", ValKind::I32, &m, &acc)?;
        self.store_acc(inst.dest, ValKind::I32)
    }

    fn emit_bf_store(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let bit_offset = (inst.imm >> 8) & 0xff;
        let width = inst.imm & 0xff;
        let mask = (1i64 << width) - 1;
        let clear = !((mask << bit_offset) as u8);
        self.load_acc_word(inst.src1)?;
        // Clear the field bits, then OR the shifted value in
        let mem_b = self.od_mem(self.acc_word(), 0, ValKind::U8);
        match self.opts.syntax {
            AsmSyntax::Att => self.ins_raw(&format!("andb ${}, {}", clear, mem_b.att))?,
            AsmSyntax::Intel => self.ins_raw(&format!("and {}, {}", mem_b.intel, clear))?,
        }
        let val = self.od_value(inst.src2, ValKind::I32)?;
        self.with_scratch2(move |e, s2| {
            let s2od = e.od_reg(e.scratch2_word(s2));
            e.ins2("mov", ValKind::I32, &val, &s2od)?;
            let m = e.od_imm(mask);
            e.ins2("and", ValKind::I32, &m, &s2od)?;
            if bit_offset > 0 {
                match e.opts.syntax {
                    AsmSyntax::Att => {
                        e.ins_raw(&format!("shll ${}, %{}", bit_offset, s2))?;
                    }
                    AsmSyntax::Intel => e.ins_raw(&format!("shl {}, {}", s2, bit_offset))?,
                }
            }
            let low = e.scratch2_sized(s2, ValKind::U8);
            let mem = e.od_mem(e.acc_word(), 0, ValKind::U8);
            match e.opts.syntax {
                AsmSyntax::Att => e.ins_raw(&format!("orb %{}, {}", low, mem.att)),
                AsmSyntax::Intel => e.ins_raw(&format!("or {}, {}", mem.intel, low)),
            }
        })
    }

    // ----- complex arithmetic ---------------------------------------------

    /// Component-wise complex arithmetic through the x87 stack. The
    /// operands are addresses of (re, im) double pairs; `imm` carries
    /// the frame offset of the result pair.
    fn emit_complex(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let out = inst.imm;
        let re = self.od_frame(out, ValKind::F64);
        let im = self.od_frame(out - 8, ValKind::F64);

        let load_part = |e: &mut Self, v: ValueId, disp: i64| -> Result<(), EmitError> {
            e.load_acc_word(v)?;
            let mem = e.od_mem(e.acc_word(), disp, ValKind::F64);
            e.fld_mem(&mem, ValKind::F64)
        };

        match inst.op {
            Op::CAdd | Op::CSub => {
                let mnem = if inst.op == Op::CAdd { "faddp" } else { "fsubp" };
                load_part(self, inst.src1, 0)?;
                load_part(self, inst.src2, 0)?;
                self.ins_raw(mnem)?;
                self.fstp_mem(&re, ValKind::F64)?;
                load_part(self, inst.src1, 8)?;
                load_part(self, inst.src2, 8)?;
                self.ins_raw(mnem)?;
                self.fstp_mem(&im, ValKind::F64)?;
            }
            Op::CMul => {
                // re = a.re*b.re - a.im*b.im
                load_part(self, inst.src1, 0)?;
                load_part(self, inst.src2, 0)?;
                self.ins_raw("fmulp")?;
                load_part(self, inst.src1, 8)?;
                load_part(self, inst.src2, 8)?;
                self.ins_raw("fmulp")?;
                self.ins_raw("fsubp")?;
                self.fstp_mem(&re, ValKind::F64)?;
                // im = a.re*b.im + a.im*b.re
                load_part(self, inst.src1, 0)?;
                load_part(self, inst.src2, 8)?;
                self.ins_raw("fmulp")?;
                load_part(self, inst.src1, 8)?;
                load_part(self, inst.src2, 0)?;
                self.ins_raw("fmulp")?;
                self.ins_raw("faddp")?;
                self.fstp_mem(&im, ValKind::F64)?;
            }
            _ => {
                // denom = b.re^2 + b.im^2
                load_part(self, inst.src2, 0)?;
                self.fld_top()?;
                self.ins_raw("fmulp")?;
                load_part(self, inst.src2, 8)?;
                self.fld_top()?;
                self.ins_raw("fmulp")?;
                self.ins_raw("faddp")?;
                self.fstp_mem(&im, ValKind::F64)?; // borrow the im slot for denom
                // re = (a.re*b.re + a.im*b.im) / denom
                load_part(self, inst.src1, 0)?;
                load_part(self, inst.src2, 0)?;
                self.ins_raw("fmulp")?;
                load_part(self, inst.src1, 8)?;
                load_part(self, inst.src2, 8)?;
                self.ins_raw("fmulp")?;
                self.ins_raw("faddp")?;
                self.fld_mem(&im, ValKind::F64)?;
                self.ins_raw("fdivp")?;
                self.fstp_mem(&re, ValKind::F64)?;
                // im = (a.im*b.re - a.re*b.im) / denom
                load_part(self, inst.src1, 8)?;
                load_part(self, inst.src2, 0)?;
                self.ins_raw("fmulp")?;
                load_part(self, inst.src1, 0)?;
                load_part(self, inst.src2, 8)?;
                self.ins_raw("fmulp")?;
                self.ins_raw("fsubp")?;
                self.fld_mem(&im, ValKind::F64)?;
                self.ins_raw("fdivp")?;
                self.fstp_mem(&im, ValKind::F64)?;
            }
        }

        // The result value is the address of the output pair.
        let acc = self.od_reg(self.acc_word());
        let slot = self.od_frame(out, ValKind::Ptr);
        self.ins2w("lea", &slot, &acc)?;
        self.store_acc(inst.dest, ValKind::Ptr)
    }

    // ----- calls ----------------------------------------------------------

    fn emit_call(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let args = std::mem::take(&mut self.pending_args);
        let mut cleanup: i64 = 0;

        if self.x64() {
            const ARG_REGS: [&str; 6] = ["rdi", "rsi", "rdx", "rcx", "r8", "r9"];
            let mut float_count = 0u32;
            // Stack arguments first (they arrive right-to-left)
            for &(slot, value, kind) in &args {
                if slot >= 6 && !kind.is_float() {
                    let src = self.od_value(value, kind)?;
                    match self.opts.syntax {
                        AsmSyntax::Att => self.ins_raw(&format!("pushq {}", src.att))?,
                        AsmSyntax::Intel => self.ins_raw(&format!("push {}", src.intel))?,
                    }
                    cleanup += 8;
                }
            }
            for &(slot, value, kind) in args.iter().rev() {
                if kind.is_float() {
                    let src = self.od_float_slot(value, kind)?;
                    let mnem = if kind == ValKind::F32 { "movss" } else { "movsd" };
                    match self.opts.syntax {
                        AsmSyntax::Att => self.ins_raw(&format!(
                            "{} {}, %xmm{}",
                            mnem,
                            src.att,
                            float_count
                        ))?,
                        AsmSyntax::Intel => self.ins_raw(&format!(
                            "{} xmm{}, {}",
                            mnem, float_count, src.intel
                        ))?,
                    }
                    float_count += 1;
                } else if slot < 6 {
                    const ARG_REGS32: [&str; 6] = ["edi", "esi", "edx", "ecx", "r8d", "r9d"];
                    let rk = self.reg_kind(kind);
                    let src = self.od_value(value, kind)?;
                    let dst = if rk == ValKind::I64 {
                        self.od_reg(ARG_REGS[slot as usize])
                    } else {
                        self.od_reg(ARG_REGS32[slot as usize])
                    };
                    self.ins2("mov", rk, &src, &dst)?;
                }
            }
            // Variadic convention: %al carries the vector-register count
            match self.opts.syntax {
                AsmSyntax::Att => self.ins_raw(&format!("movb ${}, %al", float_count))?,
                AsmSyntax::Intel => self.ins_raw(&format!("mov al, {}", float_count))?,
            }
        } else {
            for &(_, value, kind) in &args {
                if kind == ValKind::F64 || kind == ValKind::F80 {
                    let off = self.float_slot_offset(value)?;
                    let src = self.od_frame(off, ValKind::I32);
                    let hi = self.od_frame(off - 4, ValKind::I32);
                    match self.opts.syntax {
                        AsmSyntax::Att => {
                            self.ins_raw(&format!("pushl {}", hi.att))?;
                            self.ins_raw(&format!("pushl {}", src.att))?;
                        }
                        AsmSyntax::Intel => {
                            self.ins_raw(&format!("push {}", hi.intel))?;
                            self.ins_raw(&format!("push {}", src.intel))?;
                        }
                    }
                    cleanup += 8;
                } else {
                    let src = self.od_value(value, ValKind::I32)?;
                    match self.opts.syntax {
                        AsmSyntax::Att => self.ins_raw(&format!("pushl {}", src.att))?,
                        AsmSyntax::Intel => self.ins_raw(&format!("push {}", src.intel))?,
                    }
                    cleanup += 4;
                }
            }
        }

        match inst.op {
            Op::Call => {
                let name = self.name_of(inst)?;
                self.ins_raw(&format!("call {}", name))?;
            }
            _ => {
                let target = self.od_value(inst.src1, ValKind::Ptr)?;
                match self.opts.syntax {
                    AsmSyntax::Att => self.ins_raw(&format!("call *{}", target.att))?,
                    AsmSyntax::Intel => self.ins_raw(&format!("call {}", target.intel))?,
                }
            }
        }

        if cleanup > 0 {
            let imm = self.od_imm(cleanup);
            let sp = self.od_reg(self.stack_reg());
            self.ins2w("add", &imm, &sp)?;
        }

        if inst.dest != 0 {
            if inst.ty.is_float() {
                // 32-bit: result arrives in st(0); 64-bit: in %xmm0
                let dst = self.od_float_slot(inst.dest, inst.ty)?;
                if self.x64() {
                    let mnem = if inst.ty == ValKind::F32 { "movss" } else { "movsd" };
                    match self.opts.syntax {
                        AsmSyntax::Att => {
                            self.ins_raw(&format!("{} %xmm0, {}", mnem, dst.att))?
                        }
                        AsmSyntax::Intel => {
                            self.ins_raw(&format!("{} {}, xmm0", mnem, dst.intel))?
                        }
                    }
                } else {
                    self.fstp_mem(&dst, inst.ty)?;
                }
            } else {
                self.store_acc(inst.dest, inst.ty)?;
            }
        }
        Ok(())
    }

    fn emit_return_agg(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let size = inst.imm.max(0);
        let word = self.word();
        // src1 = source address, src2 = hidden destination pointer
        self.load_acc_word(inst.src1)?;
        let src2 = self.od_value(inst.src2, ValKind::Ptr)?;
        self.with_scratch2(|e, s2| {
            let s2od = e.od_reg(e.scratch2_word(s2));
            e.ins2w("mov", &src2, &s2od)?;
            let mut off = 0i64;
            while off + word <= size {
                let from = e.od_mem(e.acc_word(), off, ValKind::Ptr);
                let to = e.od_mem(s2, off, ValKind::Ptr);
                // Word bounce through the low half of the scratch pair
                match e.opts.syntax {
                    AsmSyntax::Att => {
                        e.ins_raw(&format!(
                            "push{} {}",
                            if e.x64() { "q" } else { "l" },
                            from.att
                        ))?;
                        e.ins_raw(&format!(
                            "pop{} {}",
                            if e.x64() { "q" } else { "l" },
                            to.att
                        ))?;
                    }
                    AsmSyntax::Intel => {
                        e.ins_raw(&format!("push {}", from.intel))?;
                        e.ins_raw(&format!("pop {}", to.intel))?;
                    }
                }
                off += word;
            }
            while off < size {
                let from = e.od_mem(e.acc_word(), off, ValKind::U8);
                let to = e.od_mem(s2, off, ValKind::U8);
                match e.opts.syntax {
                    AsmSyntax::Att => {
                        e.ins_raw(&format!("movb {}, %al", from.att))?;
                        e.ins_raw(&format!("movb %al, {}", to.att))?;
                    }
                    AsmSyntax::Intel => {
                        e.ins_raw(&format!("mov al, {}", from.intel))?;
                        e.ins_raw(&format!("mov {}, al", to.intel))?;
                    }
                }
                off += 1;
            }
            Ok(())
        })?;
        // Hidden pointer is also the return value
        let src2 = self.od_value(inst.src2, ValKind::Ptr)?;
        let acc = self.od_reg(self.acc_word());
        self.ins2w("mov", &src2, &acc)?;
        self.emit_epilogue()
    }
}
