//! Linear intermediate representation.
//!
//! The analyzer lowers the AST into a flat vector of fixed-shape
//! instructions. Results are named by monotonically increasing value IDs;
//! `dest == 0` means the instruction produces nothing. Control flow is
//! linear with named labels and branches. Optimizer passes iterate the
//! vector by index and compact it at pass end; nothing holds pointers
//! into the list.

use crate::diag::SourceLoc;
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;

/// Result name of an instruction; 0 when the instruction produces none.
pub type ValueId = u32;

/// Width and class of the value an instruction operates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ValKind {
    #[default]
    Void,
    I8,
    U8,
    I16,
    U16,
    I32,
    U32,
    I64,
    U64,
    F32,
    F64,
    F80,
    Ptr,
}

impl ValKind {
    pub fn is_unsigned(self) -> bool {
        matches!(self, ValKind::U8 | ValKind::U16 | ValKind::U32 | ValKind::U64)
    }

    pub fn is_float(self) -> bool {
        matches!(self, ValKind::F32 | ValKind::F64 | ValKind::F80)
    }

    /// Stable code for stashing a kind in an instruction's `imm` field,
    /// as `Cast` does for its source kind.
    pub fn code(self) -> i64 {
        match self {
            ValKind::Void => 0,
            ValKind::I8 => 1,
            ValKind::U8 => 2,
            ValKind::I16 => 3,
            ValKind::U16 => 4,
            ValKind::I32 => 5,
            ValKind::U32 => 6,
            ValKind::I64 => 7,
            ValKind::U64 => 8,
            ValKind::F32 => 9,
            ValKind::F64 => 10,
            ValKind::F80 => 11,
            ValKind::Ptr => 12,
        }
    }

    pub fn from_code(code: i64) -> ValKind {
        match code {
            1 => ValKind::I8,
            2 => ValKind::U8,
            3 => ValKind::I16,
            4 => ValKind::U16,
            5 => ValKind::I32,
            6 => ValKind::U32,
            7 => ValKind::I64,
            8 => ValKind::U64,
            9 => ValKind::F32,
            10 => ValKind::F64,
            11 => ValKind::F80,
            12 => ValKind::Ptr,
            _ => ValKind::Void,
        }
    }

    /// Byte width of a value of this kind; pointers take `word`.
    pub fn width(self, word: u64) -> u64 {
        match self {
            ValKind::Void => 0,
            ValKind::I8 | ValKind::U8 => 1,
            ValKind::I16 | ValKind::U16 => 2,
            ValKind::I32 | ValKind::U32 | ValKind::F32 => 4,
            ValKind::I64 | ValKind::U64 | ValKind::F64 => 8,
            ValKind::F80 => 16,
            ValKind::Ptr => word,
        }
    }
}

/// Operation codes, grouped the way the emitter dispatches them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    // Constants
    Const,
    FConst,

    // Integer arithmetic
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Bit operations
    And,
    Or,
    Xor,
    Shl,
    Shr,
    Not,

    // Float / long double arithmetic (width selected by `ty`)
    FAdd,
    FSub,
    FMul,
    FDiv,
    FNeg,

    // Complex arithmetic
    CAdd,
    CSub,
    CMul,
    CDiv,

    // Casts: `imm` holds the source kind, `ty` the destination kind
    Cast,

    // Pointer arithmetic: PtrAdd scales src2 by `imm` (element size)
    PtrAdd,
    PtrDiff,

    // Comparisons (signedness from `ty`)
    CmpEq,
    CmpNe,
    CmpLt,
    CmpLe,
    CmpGt,
    CmpGe,

    // Short-circuit logical; lowered to compare/branch/set by the emitter
    LogAnd,
    LogOr,

    // Memory, named storage
    Load,
    Store,
    LoadParam,
    StoreParam,
    LoadPtr,
    StorePtr,
    LoadIdx,
    StoreIdx,
    BfLoad,
    BfStore,

    // Addressing
    AddrOf,
    Alloca,

    // Calls
    Call,
    CallIndirect,
    Arg,

    // Function boundaries
    FuncBegin,
    FuncEnd,

    // Branches
    Br,
    BCond,
    Label,

    // Returns
    Return,
    ReturnAgg,

    // Global data directives
    GlobVar,
    GlobArray,
    GlobUnion,
    GlobStruct,
    GlobString,
    GlobWString,
    GlobAddr,
}

impl Op {
    /// Pure value computations eligible for CSE and DCE.
    pub fn is_pure(self) -> bool {
        matches!(
            self,
            Op::Const
                | Op::FConst
                | Op::Add
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
                | Op::FAdd
                | Op::FSub
                | Op::FMul
                | Op::FDiv
                | Op::FNeg
                | Op::CAdd
                | Op::CSub
                | Op::CMul
                | Op::CDiv
                | Op::Cast
                | Op::PtrAdd
                | Op::PtrDiff
                | Op::CmpEq
                | Op::CmpNe
                | Op::CmpLt
                | Op::CmpLe
                | Op::CmpGt
                | Op::CmpGe
                | Op::LogAnd
                | Op::LogOr
        )
    }

    /// Operands commute, so CSE may normalize their order.
    pub fn is_commutative(self) -> bool {
        matches!(
            self,
            Op::Add
                | Op::Mul
                | Op::And
                | Op::Or
                | Op::Xor
                | Op::FAdd
                | Op::FMul
                | Op::CAdd
                | Op::CMul
                | Op::CmpEq
                | Op::CmpNe
        )
    }

    /// Instructions that must survive dead-code elimination even when
    /// their `dest` is never read.
    pub fn has_side_effect(self) -> bool {
        matches!(
            self,
            Op::Store
                | Op::StoreParam
                | Op::StorePtr
                | Op::StoreIdx
                | Op::BfStore
                | Op::Alloca
                | Op::Call
                | Op::CallIndirect
                | Op::Arg
                | Op::FuncBegin
                | Op::FuncEnd
                | Op::Br
                | Op::BCond
                | Op::Label
                | Op::Return
                | Op::ReturnAgg
        ) || self.is_global_directive()
    }

    /// Named memory accesses that participate in alias analysis.
    pub fn is_named_memory(self) -> bool {
        matches!(
            self,
            Op::Load | Op::Store | Op::LoadIdx | Op::StoreIdx | Op::BfLoad | Op::BfStore
        )
    }

    pub fn is_global_directive(self) -> bool {
        matches!(
            self,
            Op::GlobVar
                | Op::GlobArray
                | Op::GlobUnion
                | Op::GlobStruct
                | Op::GlobString
                | Op::GlobWString
                | Op::GlobAddr
        )
    }
}

/// One LIR instruction. Every operation uses the same shape; unused
/// fields stay at their defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Inst {
    pub op: Op,
    pub dest: ValueId,
    pub src1: ValueId,
    pub src2: ValueId,
    pub imm: i64,
    /// Variable, label, or function name
    pub name: Option<Rc<str>>,
    /// Initializer payload for global directives
    pub data: Option<Rc<str>>,
    pub ty: ValKind,
    pub is_volatile: bool,
    pub is_restrict: bool,
    pub alias_set: u32,
    pub loc: Option<SourceLoc>,
}

impl Inst {
    pub fn new(op: Op) -> Inst {
        Inst {
            op,
            dest: 0,
            src1: 0,
            src2: 0,
            imm: 0,
            name: None,
            data: None,
            ty: ValKind::Void,
            is_volatile: false,
            is_restrict: false,
            alias_set: 0,
            loc: None,
        }
    }

    pub fn src1(mut self, v: ValueId) -> Inst {
        self.src1 = v;
        self
    }

    pub fn src2(mut self, v: ValueId) -> Inst {
        self.src2 = v;
        self
    }

    pub fn imm(mut self, v: i64) -> Inst {
        self.imm = v;
        self
    }

    pub fn name(mut self, n: Rc<str>) -> Inst {
        self.name = Some(n);
        self
    }

    pub fn data(mut self, d: Rc<str>) -> Inst {
        self.data = Some(d);
        self
    }

    pub fn ty(mut self, k: ValKind) -> Inst {
        self.ty = k;
        self
    }

    pub fn volatile(mut self, flag: bool) -> Inst {
        self.is_volatile = flag;
        self
    }

    pub fn restrict(mut self, flag: bool) -> Inst {
        self.is_restrict = flag;
        self
    }
}

impl fmt::Display for Inst {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.dest != 0 {
            write!(f, "v{} = ", self.dest)?;
        }
        write!(f, "{:?}", self.op)?;
        if self.src1 != 0 {
            write!(f, " v{}", self.src1)?;
        }
        if self.src2 != 0 {
            write!(f, " v{}", self.src2)?;
        }
        if self.imm != 0 || matches!(self.op, Op::Const) {
            write!(f, " #{}", self.imm)?;
        }
        if let Some(name) = &self.name {
            write!(f, " {}", name)?;
        }
        Ok(())
    }
}

/// Interner deduplicating identifier and label strings; instructions hold
/// cheap `Rc<str>` handles.
#[derive(Debug, Default)]
pub struct StringInterner {
    strings: HashSet<Rc<str>>,
}

impl StringInterner {
    pub fn new() -> Self {
        StringInterner::default()
    }

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        if let Some(existing) = self.strings.get(s) {
            return existing.clone();
        }
        let handle: Rc<str> = Rc::from(s);
        self.strings.insert(handle.clone());
        handle
    }
}

/// Owner of the instruction list during lowering.
///
/// Tracks the next value ID, the source location stamped onto appended
/// instructions, and the names that participate in alias analysis.
#[derive(Debug, Default)]
pub struct Builder {
    insts: Vec<Inst>,
    next_value: ValueId,
    cur_loc: Option<SourceLoc>,
    interner: StringInterner,
    alias_names: Vec<Rc<str>>,
}

impl Builder {
    pub fn new() -> Self {
        Builder {
            insts: Vec::new(),
            next_value: 1,
            cur_loc: None,
            interner: StringInterner::new(),
            alias_names: Vec::new(),
        }
    }

    /// Set the location stamped onto subsequently appended instructions.
    pub fn set_loc(&mut self, loc: &SourceLoc) {
        self.cur_loc = Some(loc.clone());
    }

    pub fn intern(&mut self, s: &str) -> Rc<str> {
        self.interner.intern(s)
    }

    /// Append an instruction producing no value.
    pub fn emit(&mut self, mut inst: Inst) {
        inst.loc = self.cur_loc.clone();
        self.note_alias_name(&inst);
        self.insts.push(inst);
    }

    /// Append an instruction and assign it a fresh result ID.
    pub fn emit_value(&mut self, mut inst: Inst) -> ValueId {
        let id = self.next_value;
        self.next_value += 1;
        inst.dest = id;
        inst.loc = self.cur_loc.clone();
        self.note_alias_name(&inst);
        self.insts.push(inst);
        id
    }

    fn note_alias_name(&mut self, inst: &Inst) {
        if inst.op.is_named_memory() {
            if let Some(name) = &inst.name {
                if !self.alias_names.iter().any(|n| n == name) {
                    self.alias_names.push(name.clone());
                }
            }
        }
    }

    pub fn insts(&self) -> &[Inst] {
        &self.insts
    }

    pub fn insts_mut(&mut self) -> &mut Vec<Inst> {
        &mut self.insts
    }

    pub fn alias_names(&self) -> &[Rc<str>] {
        &self.alias_names
    }

    pub fn next_value_id(&self) -> ValueId {
        self.next_value
    }

    /// Tear the builder down into its instruction list.
    pub fn finish(self) -> Vec<Inst> {
        self.insts
    }
}

/// Check structural invariants: every `dest > 0` assigned exactly once,
/// and every branch target labeled within the same function.
pub fn verify(insts: &[Inst]) -> Result<(), String> {
    let mut assigned: HashSet<ValueId> = HashSet::new();
    for inst in insts {
        if inst.dest != 0 && !assigned.insert(inst.dest) {
            return Err(format!("value v{} assigned more than once", inst.dest));
        }
    }

    let mut func_start = 0usize;
    for (i, inst) in insts.iter().enumerate() {
        match inst.op {
            Op::FuncBegin => func_start = i,
            Op::FuncEnd => {
                let body = &insts[func_start..=i];
                let labels: HashSet<&str> = body
                    .iter()
                    .filter(|x| x.op == Op::Label)
                    .filter_map(|x| x.name.as_deref())
                    .collect();
                for x in body {
                    if matches!(x.op, Op::Br | Op::BCond) {
                        let target = x.name.as_deref().unwrap_or("");
                        if !labels.contains(target) {
                            return Err(format!("branch to unknown label '{}'", target));
                        }
                    }
                }
            }
            _ => {}
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_ids_are_single_assignment() {
        let mut b = Builder::new();
        let one = b.emit_value(Inst::new(Op::Const).imm(1).ty(ValKind::I32));
        let two = b.emit_value(Inst::new(Op::Const).imm(2).ty(ValKind::I32));
        let sum = b.emit_value(Inst::new(Op::Add).src1(one).src2(two).ty(ValKind::I32));
        assert_eq!((one, two, sum), (1, 2, 3));
        assert!(verify(b.insts()).is_ok());
    }

    #[test]
    fn test_verify_rejects_duplicate_dest() {
        let mut insts = vec![Inst::new(Op::Const).imm(1), Inst::new(Op::Const).imm(2)];
        insts[0].dest = 1;
        insts[1].dest = 1;
        assert!(verify(&insts).is_err());
    }

    #[test]
    fn test_verify_checks_branch_targets() {
        let mut b = Builder::new();
        let f = b.intern("f");
        let l = b.intern("L1");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        b.emit(Inst::new(Op::Br).name(l.clone()));
        b.emit(Inst::new(Op::FuncEnd));
        assert!(verify(b.insts()).is_err());

        let mut b = Builder::new();
        let f = b.intern("f");
        let l = b.intern("L1");
        b.emit(Inst::new(Op::FuncBegin).name(f));
        b.emit(Inst::new(Op::Br).name(l.clone()));
        b.emit(Inst::new(Op::Label).name(l));
        b.emit(Inst::new(Op::FuncEnd));
        assert!(verify(b.insts()).is_ok());
    }

    #[test]
    fn test_interner_deduplicates() {
        let mut interner = StringInterner::new();
        let a = interner.intern("counter");
        let b = interner.intern("counter");
        assert!(Rc::ptr_eq(&a, &b));
    }

    #[test]
    fn test_builder_tracks_alias_names() {
        let mut b = Builder::new();
        let x = b.intern("x");
        b.emit_value(Inst::new(Op::Load).name(x.clone()));
        b.emit(Inst::new(Op::Store).name(x).src1(1));
        assert_eq!(b.alias_names().len(), 1);
    }
}
