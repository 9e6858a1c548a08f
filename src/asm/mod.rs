//! Abstract x86-64 assembly.
//!
//! Instructions mirror the subset of x86-64 the compiler emits, over
//! operands that may still be pseudoregisters. Code generation produces
//! this form with virtual registers; the register allocator assigns
//! physical registers or stack slots; the fixup pass legalizes operand
//! combinations the hardware does not accept; the emitter prints it.

pub mod abi;
pub mod lower;
pub mod symbols;

use crate::opt::cfg::{BranchInfo, Branching};
use crate::symbols::Sym;
use crate::tac::Label;

/// A physical x86-64 register, of either register class.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
#[allow(missing_docs)]
pub enum Reg {
    AX,
    BX,
    CX,
    DX,
    DI,
    SI,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
    SP,
    BP,
    XMM0,
    XMM1,
    XMM2,
    XMM3,
    XMM4,
    XMM5,
    XMM6,
    XMM7,
    XMM8,
    XMM9,
    XMM10,
    XMM11,
    XMM12,
    XMM13,
    XMM14,
    XMM15,
}

impl Reg {
    /// Does this register belong to the SSE class?
    pub fn is_sse(self) -> bool {
        self >= Reg::XMM0
    }

    /// Is this register preserved across calls by the callee?
    pub fn is_callee_saved(self) -> bool {
        matches!(self, Reg::BX | Reg::R12 | Reg::R13 | Reg::R14 | Reg::R15)
    }
}

/// Integer argument registers, in assignment order.
pub const INT_ARG_REGS: [Reg; 6] = [Reg::DI, Reg::SI, Reg::DX, Reg::CX, Reg::R8, Reg::R9];

/// SSE argument registers, in assignment order.
pub const SSE_ARG_REGS: [Reg; 8] = [
    Reg::XMM0,
    Reg::XMM1,
    Reg::XMM2,
    Reg::XMM3,
    Reg::XMM4,
    Reg::XMM5,
    Reg::XMM6,
    Reg::XMM7,
];

/// Integer return registers, in classification order.
pub const INT_RET_REGS: [Reg; 2] = [Reg::AX, Reg::DX];

/// SSE return registers, in classification order.
pub const SSE_RET_REGS: [Reg; 2] = [Reg::XMM0, Reg::XMM1];

/// General-purpose registers the allocator may assign, caller-saved first
/// so low colors prefer registers with no save/restore cost. `%rsp`/`%rbp`
/// frame the stack and `%r10`/`%r11` are reserved as fixup scratch
/// registers, so K = 12 for this class.
pub const GP_ALLOCATABLE: [Reg; 12] = [
    Reg::AX,
    Reg::CX,
    Reg::DX,
    Reg::SI,
    Reg::DI,
    Reg::R8,
    Reg::R9,
    Reg::BX,
    Reg::R12,
    Reg::R13,
    Reg::R14,
    Reg::R15,
];

/// SSE registers the allocator may assign. `%xmm14`/`%xmm15` are reserved
/// as fixup scratch registers, so K = 14 for this class.
pub const SSE_ALLOCATABLE: [Reg; 14] = [
    Reg::XMM0,
    Reg::XMM1,
    Reg::XMM2,
    Reg::XMM3,
    Reg::XMM4,
    Reg::XMM5,
    Reg::XMM6,
    Reg::XMM7,
    Reg::XMM8,
    Reg::XMM9,
    Reg::XMM10,
    Reg::XMM11,
    Reg::XMM12,
    Reg::XMM13,
];

/// Registers a call may clobber, across both classes.
pub const CALLER_SAVED: [Reg; 25] = [
    Reg::AX,
    Reg::CX,
    Reg::DX,
    Reg::DI,
    Reg::SI,
    Reg::R8,
    Reg::R9,
    Reg::R10,
    Reg::R11,
    Reg::XMM0,
    Reg::XMM1,
    Reg::XMM2,
    Reg::XMM3,
    Reg::XMM4,
    Reg::XMM5,
    Reg::XMM6,
    Reg::XMM7,
    Reg::XMM8,
    Reg::XMM9,
    Reg::XMM10,
    Reg::XMM11,
    Reg::XMM12,
    Reg::XMM13,
    Reg::XMM14,
    Reg::XMM15,
];

/// The operand width or shape an instruction operates at.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AsmType {
    /// 8 bits.
    Byte,
    /// 16 bits.
    Word,
    /// 32 bits.
    Longword,
    /// 64 bits.
    Quadword,
    /// An IEEE binary64 value in an SSE register or memory.
    Double,
    /// An aggregate of the given size and alignment; always lives in
    /// memory.
    ByteArray {
        /// Size in bytes.
        size: u64,
        /// Alignment in bytes.
        alignment: u64,
    },
}

impl AsmType {
    /// Size of a value of this type, in bytes.
    pub fn size(self) -> u64 {
        match self {
            AsmType::Byte => 1,
            AsmType::Word => 2,
            AsmType::Longword => 4,
            AsmType::Quadword | AsmType::Double => 8,
            AsmType::ByteArray { size, .. } => size,
        }
    }

    /// Required alignment for a stack slot of this type.
    pub fn alignment(self) -> u64 {
        match self {
            AsmType::ByteArray { alignment, .. } => alignment,
            other => other.size(),
        }
    }

    /// Is this the SSE scalar type?
    pub fn is_sse(self) -> bool {
        self == AsmType::Double
    }
}

/// An instruction operand.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Operand {
    /// An immediate value (bit pattern, sign-extended to 64 bits).
    Imm(i64),
    /// A physical register.
    Reg(Reg),
    /// A scalar pseudoregister, replaced by the allocator.
    Pseudo(Sym),
    /// Base + displacement memory.
    Memory(Reg, i64),
    /// A static object, PC-relative, plus a byte offset.
    Data(Sym, i64),
    /// A byte offset into an aggregate pseudoregister; becomes `Memory`
    /// once the aggregate has a stack slot.
    PseudoMem(Sym, i64),
    /// Base + index * scale memory.
    Indexed {
        /// Base address register.
        base: Reg,
        /// Index register.
        index: Reg,
        /// Scale: 1, 2, 4, or 8.
        scale: u64,
    },
}

impl Operand {
    /// Is this operand a memory reference (after allocation)?
    pub fn is_memory(&self) -> bool {
        matches!(
            self,
            Operand::Memory(..) | Operand::Data(..) | Operand::PseudoMem(..) | Operand::Indexed { .. }
        )
    }

    /// The physical register inside, if any.
    pub fn as_reg(&self) -> Option<Reg> {
        match self {
            Operand::Reg(r) => Some(*r),
            _ => None,
        }
    }

    /// The same location `delta` bytes further on. Only meaningful for
    /// memory-shaped operands.
    pub fn with_offset(&self, delta: i64) -> Operand {
        match self {
            Operand::Memory(r, o) => Operand::Memory(*r, o + delta),
            Operand::Data(s, o) => Operand::Data(*s, o + delta),
            Operand::PseudoMem(s, o) => Operand::PseudoMem(*s, o + delta),
            other => panic!("byte offset into non-memory operand {other:?}"),
        }
    }
}

/// Unary instruction operators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum UnaryOp {
    /// `neg`
    Neg,
    /// `not`
    Not,
}

/// Binary instruction operators. `Mult` is `imul`/`mulsd`; `DivDouble` is
/// `divsd` (integer division goes through `idiv`/`div`).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum BinaryOp {
    Add,
    Sub,
    Mult,
    DivDouble,
    And,
    Or,
    Xor,
    Shl,
    Sar,
    Shr,
}

/// A condition code, as used by `j{cc}` and `set{cc}`.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[allow(missing_docs)]
pub enum CondCode {
    E,
    NE,
    G,
    GE,
    L,
    LE,
    A,
    AE,
    B,
    BE,
    /// Parity: set on unordered double comparisons.
    P,
}

/// An abstract assembly instruction.
#[derive(Clone, PartialEq, Debug)]
pub enum Instruction {
    /// `mov` at the given width: `Mov(t, src, dst)`.
    Mov(AsmType, Operand, Operand),
    /// Sign-extending move between the two widths.
    Movsx {
        /// The width of the source operand.
        src_ty: AsmType,
        /// The width of the destination operand.
        dst_ty: AsmType,
        /// The source operand.
        src: Operand,
        /// The destination operand.
        dst: Operand,
    },
    /// Zero-extending move between the two widths.
    MovZeroExtend {
        /// The width of the source operand.
        src_ty: AsmType,
        /// The width of the destination operand.
        dst_ty: AsmType,
        /// The source operand.
        src: Operand,
        /// The destination operand.
        dst: Operand,
    },
    /// `lea src, dst`.
    Lea(Operand, Operand),
    /// `cvttsd2si` to an integer of the given width.
    Cvttsd2si(AsmType, Operand, Operand),
    /// `cvtsi2sd` from an integer of the given width.
    Cvtsi2sd(AsmType, Operand, Operand),
    /// A unary operation in place.
    Unary(UnaryOp, AsmType, Operand),
    /// `op src, dst`.
    Binary(BinaryOp, AsmType, Operand, Operand),
    /// `cmp src, dst` (flags from `dst - src`); `comisd` for doubles.
    Cmp(AsmType, Operand, Operand),
    /// `test src, dst` (flags from `dst & src`).
    Test(AsmType, Operand, Operand),
    /// Signed division; dividend in `%rax`/`%rdx`.
    Idiv(AsmType, Operand),
    /// Unsigned division; dividend in `%rax` with zeroed `%rdx`.
    Div(AsmType, Operand),
    /// `cdq` (Longword) or `cqo` (Quadword).
    Cdq(AsmType),
    /// `jmp`.
    Jmp(Label),
    /// `j{cc}`.
    JmpCC(CondCode, Label),
    /// `set{cc}` on the byte of the operand.
    SetCC(CondCode, Operand),
    /// A local label.
    Label(Label),
    /// `push`.
    Push(Operand),
    /// `pop` into a register.
    Pop(Reg),
    /// `call`.
    Call(Sym),
    /// Reserve the stack frame; invisible to the register allocator and
    /// printed as a `sub` on `%rsp`.
    AllocateStack(u64),
    /// Return: restores the frame and `ret`s.
    Ret,
}

impl Branching for Instruction {
    fn label(&self) -> Option<Label> {
        match self {
            Instruction::Label(l) => Some(*l),
            _ => None,
        }
    }

    fn branch(&self) -> BranchInfo {
        match self {
            Instruction::Jmp(l) => BranchInfo::Unconditional(*l),
            Instruction::JmpCC(_, l) => BranchInfo::Conditional(*l),
            Instruction::Ret => BranchInfo::Terminator,
            _ => BranchInfo::Fallthrough,
        }
    }
}

/// An assembly function.
#[derive(Clone, Debug)]
pub struct Function {
    /// The function's symbol.
    pub sym: Sym,
    /// Whether the symbol is exported.
    pub global: bool,
    /// The instruction sequence.
    pub instructions: Vec<Instruction>,
    /// Stack frame bytes for spills and aggregates; set by the register
    /// allocator, already adjusted so calls stay 16-byte aligned.
    pub frame_size: u64,
    /// Callee-saved registers the function writes; saved in the prologue
    /// and restored before `ret`.
    pub callee_saved: Vec<Reg>,
}

/// The assembly form of a translation unit.
#[derive(Clone, Debug)]
pub struct Module {
    /// Functions in source order.
    pub funcs: Vec<Function>,
    /// Static objects, forwarded from TAC.
    pub statics: Vec<crate::tac::StaticVar>,
    /// Scalar locals whose address is taken; they must keep stack slots.
    pub aliased: crate::fx::FxHashSet<Sym>,
}
