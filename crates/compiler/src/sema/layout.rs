//! Struct and union layout.
//!
//! Structs lay members out sequentially at natural alignment, capped by
//! the unit-wide pack alignment when one is set. Bit-fields pack
//! consecutively within the current byte; a field that would cross the
//! byte boundary starts the next byte. Unions place every member at
//! offset 0 and size to the largest member.

use super::{Analyzer, SemaResult};
use crate::ast::MemberDecl;
use crate::diag::DiagKind;
use crate::symtab::{AggLayout, Member, Symbol, SymbolKind};
use crate::types::Type;

fn align_up(value: u64, align: u64) -> u64 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

impl Analyzer<'_> {
    /// Effective member alignment under the active pack setting.
    fn packed_align(&self, natural: u64) -> u64 {
        if self.pack == 0 {
            natural
        } else {
            natural.min(self.pack)
        }
    }

    /// Member type with array size expressions evaluated to lengths.
    fn resolved_member_ty(&mut self, decl: &MemberDecl) -> SemaResult<Type> {
        let mut ty = decl.ty.clone();
        if let Type::Array { len, size_expr, .. } = &mut ty {
            if len.is_none() {
                if let Some(size) = size_expr {
                    let expr = (**size).clone();
                    let n = self.eval_const_expr(&expr)?;
                    if n <= 0 {
                        return self.err(
                            DiagKind::Layout,
                            &decl.loc,
                            "array member has non-positive size",
                        );
                    }
                    *len = Some(n as u64);
                }
            }
        }
        Ok(ty)
    }

    /// Size and alignment of a resolved member type.
    fn member_size_align(&mut self, decl: &MemberDecl, ty: &Type) -> SemaResult<(u64, u64)> {
        if decl.is_flexible {
            // Flexible array members contribute their element alignment
            // but no storage.
            let elem = match ty {
                Type::Array { elem, .. } => elem.clone(),
                _ => {
                    return self.err(
                        DiagKind::Layout,
                        &decl.loc,
                        "flexible member must have array type",
                    )
                }
            };
            let align = match self.symtab.align_of(&elem, self.target) {
                Some(a) => a,
                None => {
                    return self.err(
                        DiagKind::Layout,
                        &decl.loc,
                        "flexible member of incomplete type",
                    )
                }
            };
            return Ok((0, align));
        }

        let size = match self.symtab.size_of(ty, self.target) {
            Some(s) => s,
            None => {
                return self.err(
                    DiagKind::Layout,
                    &decl.loc,
                    format!("member '{}' has incomplete type", decl.name),
                )
            }
        };
        let align = self.symtab.align_of(ty, self.target).unwrap_or(1);
        if !align.is_power_of_two() {
            return self.err(
                DiagKind::Layout,
                &decl.loc,
                format!("alignment {} is not a power of two", align),
            );
        }
        Ok((size, align))
    }

    /// Lay out a struct body.
    pub(crate) fn layout_struct(&mut self, decls: &[MemberDecl]) -> SemaResult<AggLayout> {
        let mut members = Vec::new();
        let mut offset: u64 = 0;
        let mut bit_offset: u32 = 0;
        let mut max_align: u64 = 1;

        for (i, decl) in decls.iter().enumerate() {
            if decl.is_flexible && i != decls.len() - 1 {
                return self.err(
                    DiagKind::Layout,
                    &decl.loc,
                    format!("flexible member '{}' is not the last member", decl.name),
                );
            }

            if let Some(width_expr) = &decl.bit_width {
                let width = self.eval_const_expr(width_expr)?;
                if width <= 0 || width > 8 {
                    return self.err(
                        DiagKind::Layout,
                        &decl.loc,
                        format!("bit-field width {} out of range 1..=8", width),
                    );
                }
                let width = width as u32;
                if bit_offset + width > 8 {
                    offset += 1;
                    bit_offset = 0;
                }
                if !decl.name.is_empty() {
                    members.push(Member {
                        name: decl.name.clone(),
                        ty: decl.ty.clone(),
                        elem_size: 1,
                        offset,
                        bit_offset,
                        bit_width: width,
                        is_flexible: false,
                    });
                }
                bit_offset += width;
                if bit_offset == 8 {
                    offset += 1;
                    bit_offset = 0;
                }
                continue;
            }

            // Close out a partially filled byte before a plain member.
            if bit_offset > 0 {
                offset += 1;
                bit_offset = 0;
            }

            let ty = self.resolved_member_ty(decl)?;
            let (size, align) = self.member_size_align(decl, &ty)?;
            let eff_align = self.packed_align(align);
            max_align = max_align.max(eff_align);
            offset = align_up(offset, eff_align);

            members.push(Member {
                name: decl.name.clone(),
                ty,
                elem_size: size,
                offset,
                bit_offset: 0,
                bit_width: 0,
                is_flexible: decl.is_flexible,
            });
            if !decl.is_flexible {
                offset += size;
            }
        }

        if bit_offset > 0 {
            offset += 1;
        }

        let size = align_up(offset, max_align);
        Ok(AggLayout {
            members,
            size,
            align: max_align,
            complete: true,
        })
    }

    /// Lay out a union body: every member at offset 0.
    pub(crate) fn layout_union(&mut self, decls: &[MemberDecl]) -> SemaResult<AggLayout> {
        let mut members = Vec::new();
        let mut size: u64 = 0;
        let mut max_align: u64 = 1;

        for decl in decls {
            if decl.is_flexible {
                return self.err(
                    DiagKind::Layout,
                    &decl.loc,
                    "flexible member not allowed in a union",
                );
            }
            if decl.bit_width.is_some() {
                return self.err(
                    DiagKind::Layout,
                    &decl.loc,
                    "bit-field not supported in a union",
                );
            }
            let ty = self.resolved_member_ty(decl)?;
            let (msize, align) = self.member_size_align(decl, &ty)?;
            let eff_align = self.packed_align(align);
            max_align = max_align.max(eff_align);
            size = size.max(msize);
            members.push(Member {
                name: decl.name.clone(),
                ty,
                elem_size: msize,
                offset: 0,
                bit_offset: 0,
                bit_width: 0,
                is_flexible: false,
            });
        }

        Ok(AggLayout {
            members,
            size: align_up(size, max_align),
            align: max_align,
            complete: true,
        })
    }

    /// Declare or complete an aggregate tag.
    pub(crate) fn declare_aggregate(
        &mut self,
        tag: &str,
        is_union: bool,
        members: Option<&[MemberDecl]>,
        loc: &crate::diag::SourceLoc,
    ) -> SemaResult<()> {
        let kind = if is_union {
            SymbolKind::UnionTag
        } else {
            SymbolKind::StructTag
        };
        let ty = if is_union {
            Type::Union(tag.to_string())
        } else {
            Type::Struct(tag.to_string())
        };

        match members {
            None => {
                // Forward declaration; only add if the tag is unknown.
                if self.symtab.lookup_tag(tag).is_none() {
                    let mut sym = Symbol::new(tag, kind, ty);
                    sym.layout = Some(AggLayout::default());
                    self.symtab.add_tag(sym);
                }
                Ok(())
            }
            Some(decls) => {
                let layout = if is_union {
                    self.layout_union(decls)?
                } else {
                    self.layout_struct(decls)?
                };
                if let Some(idx) = self.symtab.lookup_tag_idx(tag) {
                    let sym = self.symtab.tag_mut(idx);
                    if sym.kind != kind {
                        return self.err(
                            DiagKind::Redeclaration,
                            loc,
                            format!("tag '{}' redeclared as a different aggregate kind", tag),
                        );
                    }
                    if sym
                        .layout
                        .as_ref()
                        .map(|l| l.complete)
                        .unwrap_or(false)
                    {
                        return self.err(
                            DiagKind::Redeclaration,
                            loc,
                            format!("redefinition of '{}'", tag),
                        );
                    }
                    sym.layout = Some(layout);
                } else {
                    let mut sym = Symbol::new(tag, kind, ty);
                    sym.alignment = layout.align;
                    sym.layout = Some(layout);
                    self.symtab.add_tag(sym);
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::sema::test_util::lower;
    use crate::diag::DiagContext;
    use crate::sema::test_util::try_lower;
    use crate::types::Target;

    // Layouts are observed through sizeof folded into constants.
    fn const_of_return(src: &str) -> i64 {
        let insts = lower(src);
        insts
            .iter()
            .find(|i| i.op == crate::lir::Op::Const)
            .expect("const")
            .imm
    }

    #[test]
    fn test_struct_layout_sequential_alignment() {
        // char at 0, int aligned to 4, size padded to 8
        let size = const_of_return(
            "struct s { char c; int n; };\nint f(void) { return sizeof(struct s); }",
        );
        assert_eq!(size, 8);
    }

    #[test]
    fn test_union_size_is_max_member() {
        let size = const_of_return(
            "union u { char c; int n; short h; };\nint f(void) { return sizeof(union u); }",
        );
        assert_eq!(size, 4);
    }

    #[test]
    fn test_bitfields_share_a_byte() {
        // 3 + 5 bits fit in one byte; with the int member the struct
        // rounds to 8.
        let size = const_of_return(
            "struct b { unsigned a : 3; unsigned c : 5; int n; };\nint f(void) { return sizeof(struct b); }",
        );
        assert_eq!(size, 8);
    }

    #[test]
    fn test_bitfield_overflow_starts_next_byte() {
        // 6 + 6 bits cannot share a byte
        let size = const_of_return(
            "struct b { unsigned a : 6; unsigned c : 6; };\nint f(void) { return sizeof(struct b); }",
        );
        assert_eq!(size, 2);
    }

    #[test]
    fn test_flexible_member_takes_no_storage() {
        let size = const_of_return(
            "struct v { int n; int data[]; };\nint f(void) { return sizeof(struct v); }",
        );
        assert_eq!(size, 4);
    }

    #[test]
    fn test_flexible_member_must_be_last() {
        let mut diag = DiagContext::new();
        let result = try_lower(
            "struct v { int data[]; int n; };\nint f(void) { return sizeof(struct v); }",
            Target { x86_64: false },
            &mut diag,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_offsets_are_monotonic_and_aligned() {
        let off = const_of_return(
            "struct s { char a; short b; char c; int d; };\nint f(void) { return offsetof(struct s, d); }",
        );
        assert_eq!(off, 8);
    }

    #[test]
    fn test_pack_alignment_caps_member_padding() {
        use crate::lexer::tokenize;
        use crate::parser::Parser;
        use crate::sema::analyze_unit;
        use crate::symtab::SymbolTable;

        let src = "struct s { char c; int n; };\nint f(void) { return sizeof(struct s); }";
        let outer = SymbolTable::new();
        let tokens = tokenize(src, "t.c").unwrap();
        let mut parser = Parser::new(tokens, &outer);
        let unit = parser.parse_translation_unit().unwrap();

        let mut diag = DiagContext::new();
        let lowered = analyze_unit(&unit, Target { x86_64: false }, 1, &mut diag).unwrap();
        let c = lowered
            .insts
            .iter()
            .find(|i| i.op == crate::lir::Op::Const)
            .unwrap();
        // pack(1) removes all padding: 1 + 4 bytes
        assert_eq!(c.imm, 5);
    }
}
