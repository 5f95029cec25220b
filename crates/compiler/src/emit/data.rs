//! Data-section and bss emission.
//!
//! One walk collects the `Glob*` directives in program order: a
//! `.local` line for file-local linkage, an `.align` line when an
//! explicit alignment was requested, the label, then the payload.
//! Afterwards every referenced object name that received no directive
//! gets its storage reserved with `.lcomm`.

use super::{EmitError, Emitter};
use crate::lir::{Op, ValKind};
use std::collections::HashSet;
use std::fmt::Write as _;

/// Escape a byte string for a GAS `.asciz` literal.
fn escape_asm_string(s: &str) -> String {
    let mut out = String::new();
    for byte in s.bytes() {
        match byte {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            b'\n' => out.push_str("\\n"),
            b'\t' => out.push_str("\\t"),
            b'\r' => out.push_str("\\r"),
            0x20..=0x7e => out.push(byte as char),
            other => {
                out.push('\\');
                out.push_str(&format!("{:03o}", other));
            }
        }
    }
    out
}

impl Emitter<'_> {
    /// Directive for an integer payload of `width` bytes.
    fn int_directive(width: u64) -> &'static str {
        match width {
            1 => ".byte",
            2 => ".value",
            8 => ".quad",
            _ => ".long",
        }
    }

    fn payload_width(&self, kind: ValKind) -> u64 {
        let w = kind.width(self.word() as u64);
        if w == 0 {
            4
        } else {
            w
        }
    }

    pub(super) fn emit_data_section(&mut self) -> Result<(), EmitError> {
        if !self.insts.iter().any(|i| i.op.is_global_directive()) {
            return Ok(());
        }
        writeln!(self.out, ".data")?;

        for idx in 0..self.insts.len() {
            let inst = self.insts[idx].clone();
            if !inst.op.is_global_directive() {
                continue;
            }
            let name = inst
                .name
                .as_deref()
                .ok_or_else(|| EmitError::Logic("unnamed global directive".to_string()))?
                .to_string();

            if inst.src1 == 1 {
                writeln!(self.out, ".local {}", name)?;
            }
            if inst.src2 > 1 {
                writeln!(self.out, ".align {}", inst.src2)?;
            }
            writeln!(self.out, "{}:", name)?;

            match inst.op {
                Op::GlobVar => {
                    let width = self.payload_width(inst.ty);
                    writeln!(self.out, "    {} {}", Self::int_directive(width), inst.imm)?;
                }
                Op::GlobString => {
                    let data = inst.data.as_deref().unwrap_or("");
                    writeln!(self.out, "    .asciz \"{}\"", escape_asm_string(data))?;
                }
                Op::GlobWString => {
                    let data = inst.data.as_deref().unwrap_or("");
                    for ch in data.chars() {
                        writeln!(self.out, "    .long {}", ch as u32)?;
                    }
                    writeln!(self.out, "    .long 0")?;
                }
                Op::GlobArray => {
                    let width = self.payload_width(inst.ty);
                    let directive = Self::int_directive(width);
                    let data = inst.data.as_deref().unwrap_or("");
                    for value in data.split(',').filter(|v| !v.is_empty()) {
                        writeln!(self.out, "    {} {}", directive, value)?;
                    }
                }
                Op::GlobStruct | Op::GlobUnion => {
                    self.emit_aggregate_payload(&inst)?;
                }
                Op::GlobAddr => {
                    let target = inst
                        .data
                        .as_deref()
                        .ok_or_else(|| EmitError::Logic("glob_addr without a target".to_string()))?;
                    let directive = Self::int_directive(self.word() as u64);
                    writeln!(self.out, "    {} {}", directive, target)?;
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Struct/union payload: either all-zero storage or sparse
    /// `offset:size:value` triples separated by `.zero` gaps.
    fn emit_aggregate_payload(&mut self, inst: &crate::lir::Inst) -> Result<(), EmitError> {
        let size = inst.imm.max(0);
        let data = match inst.data.as_deref() {
            None | Some("") => {
                writeln!(self.out, "    .zero {}", size)?;
                return Ok(());
            }
            Some(d) => d.to_string(),
        };

        let mut triples: Vec<(i64, i64, i64)> = Vec::new();
        for part in data.split(',') {
            let mut fields = part.splitn(3, ':');
            let offset = fields.next().and_then(|f| f.parse().ok());
            let width = fields.next().and_then(|f| f.parse().ok());
            let value = fields.next().and_then(|f| f.parse().ok());
            match (offset, width, value) {
                (Some(o), Some(w), Some(v)) => triples.push((o, w, v)),
                _ => {
                    return Err(EmitError::Logic(format!(
                        "malformed aggregate payload '{}'",
                        part
                    )))
                }
            }
        }
        triples.sort_unstable_by_key(|&(o, _, _)| o);

        let mut pos: i64 = 0;
        for (offset, width, value) in triples {
            if offset > pos {
                writeln!(self.out, "    .zero {}", offset - pos)?;
            }
            writeln!(
                self.out,
                "    {} {}",
                Self::int_directive(width as u64),
                value
            )?;
            pos = offset + width;
        }
        if pos < size {
            writeln!(self.out, "    .zero {}", size - pos)?;
        }
        Ok(())
    }

    /// Reserve storage for referenced objects that have no directive.
    pub(super) fn emit_bss_section(&mut self) -> Result<(), EmitError> {
        let insts = self.insts;
        let defined: HashSet<&str> = insts
            .iter()
            .filter(|i| i.op.is_global_directive())
            .filter_map(|i| i.name.as_deref())
            .collect();

        let mut referenced: Vec<&str> = Vec::new();
        for inst in insts {
            let relevant = matches!(
                inst.op,
                Op::Load
                    | Op::Store
                    | Op::LoadIdx
                    | Op::StoreIdx
                    | Op::BfLoad
                    | Op::BfStore
                    | Op::AddrOf
            );
            if !relevant {
                continue;
            }
            if let Some(name) = inst.name.as_deref() {
                if name.starts_with("stack:") || defined.contains(name) {
                    continue;
                }
                if !referenced.contains(&name) {
                    referenced.push(name);
                }
            }
        }

        let mut lines = Vec::new();
        for name in referenced {
            // Only objects this unit defines; extern names belong to
            // the linker.
            if let Some(&size) = self.object_sizes.get(name) {
                lines.push(format!(".lcomm {}, {}", name, size.max(1)));
            }
        }
        if lines.is_empty() {
            return Ok(());
        }
        writeln!(self.out, ".bss")?;
        for line in lines {
            writeln!(self.out, "{}", line)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_util::compile32;
    use super::*;

    #[test]
    fn test_escape_asm_string() {
        assert_eq!(escape_asm_string("hi\n"), "hi\\n");
        assert_eq!(escape_asm_string("a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape_asm_string("\x01"), "\\001");
    }

    #[test]
    fn test_string_literal_in_data_section() {
        let asm = compile32(
            "char *greet(void) { return \"hello\\n\"; }",
        );
        assert!(asm.contains(".asciz \"hello\\n\""), "asm was:\n{}", asm);
        assert!(asm.contains(".local __str1"));
    }

    #[test]
    fn test_struct_payload_with_gaps() {
        let asm = compile32(
            "struct s { int a; int b; int c; };\nstruct s v = { .c = 9 };\nint f(void) { return v.c; }",
        );
        // Eight zero bytes, then the initialized word
        assert!(asm.contains(".zero 8"), "asm was:\n{}", asm);
        assert!(asm.contains(".long 9"));
    }

    #[test]
    fn test_zero_union_payload() {
        let asm = compile32(
            "union u { int a; char c[8]; };\nunion u v = { 0 };\nint f(void) { return v.a; }",
        );
        assert!(asm.contains(".zero 8"), "asm was:\n{}", asm);
    }

    #[test]
    fn test_wide_string_word_array() {
        let asm = compile32("int *w = L\"ab\";\nint f(void) { return 0; }");
        assert!(asm.contains(".long 97"), "asm was:\n{}", asm);
        assert!(asm.contains(".long 98"));
        assert!(asm.contains(".long 0"));
    }

    #[test]
    fn test_global_pointer_directive() {
        let asm = compile32("int x = 3;\nint *p = &x;\nint f(void) { return *p; }");
        assert!(asm.contains("p:"), "asm was:\n{}", asm);
        assert!(asm.contains("    .long x"));
    }
}
