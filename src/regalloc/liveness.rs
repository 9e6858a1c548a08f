//! Register liveness over abstract assembly.
//!
//! Iterative backward dataflow on the shared CFG, over physical registers
//! and pseudoregisters together. `idiv`/`div` read and write `%rax` and
//! `%rdx` implicitly, `cdq`/`cqo` reads `%rax` and writes `%rdx`, a call
//! reads the argument registers its callee was loaded with and clobbers
//! every caller-saved register, and `ret` reads the current function's
//! return registers.

use super::Loc;
use crate::asm::symbols::AsmSymbols;
use crate::asm::{Instruction, Operand, Reg, CALLER_SAVED};
use crate::fx::FxHashSet;
use crate::opt::cfg::{Cfg, NodeId};
use smallvec::SmallVec;

type Locs = SmallVec<[Loc; 4]>;

/// Locations an operand reads when used as a source.
fn reads(op: &Operand, out: &mut Locs) {
    match op {
        Operand::Reg(r) => out.push(Loc::Reg(*r)),
        Operand::Pseudo(s) => out.push(Loc::Pseudo(*s)),
        Operand::Memory(base, _) => out.push(Loc::Reg(*base)),
        Operand::Indexed { base, index, .. } => {
            out.push(Loc::Reg(*base));
            out.push(Loc::Reg(*index));
        }
        Operand::Imm(_) | Operand::Data(..) | Operand::PseudoMem(..) => {}
    }
}

/// Locations an operand writes when used as a destination; memory-shaped
/// destinations read their address registers instead.
fn writes(op: &Operand, written: &mut Locs, used: &mut Locs) {
    match op {
        Operand::Reg(r) => written.push(Loc::Reg(*r)),
        Operand::Pseudo(s) => written.push(Loc::Pseudo(*s)),
        other => reads(other, used),
    }
}

/// The `(used, written)` location sets of one instruction.
pub fn used_written(
    instr: &Instruction,
    asm_syms: &AsmSymbols,
    return_regs: &[Reg],
) -> (Locs, Locs) {
    use Instruction::*;
    let mut used = Locs::new();
    let mut written = Locs::new();
    match instr {
        Mov(_, src, dst)
        | Movsx { src, dst, .. }
        | MovZeroExtend { src, dst, .. }
        | Cvttsd2si(_, src, dst)
        | Cvtsi2sd(_, src, dst)
        | Lea(src, dst) => {
            reads(src, &mut used);
            writes(dst, &mut written, &mut used);
        }
        Binary(_, _, src, dst) => {
            reads(src, &mut used);
            reads(dst, &mut used);
            writes(dst, &mut written, &mut used);
        }
        Unary(_, _, dst) => {
            reads(dst, &mut used);
            writes(dst, &mut written, &mut used);
        }
        Cmp(_, a, b) | Test(_, a, b) => {
            reads(a, &mut used);
            reads(b, &mut used);
        }
        SetCC(_, dst) => writes(dst, &mut written, &mut used),
        Push(op) => reads(op, &mut used),
        Pop(r) => written.push(Loc::Reg(*r)),
        Idiv(_, op) | Div(_, op) => {
            reads(op, &mut used);
            used.push(Loc::Reg(Reg::AX));
            used.push(Loc::Reg(Reg::DX));
            written.push(Loc::Reg(Reg::AX));
            written.push(Loc::Reg(Reg::DX));
        }
        Cdq(_) => {
            used.push(Loc::Reg(Reg::AX));
            written.push(Loc::Reg(Reg::DX));
        }
        Call(f) => {
            if let Some(info) = asm_syms.fun(*f) {
                for r in &info.param_regs {
                    used.push(Loc::Reg(*r));
                }
            }
            for r in CALLER_SAVED {
                written.push(Loc::Reg(r));
            }
        }
        Ret => {
            for r in return_regs {
                used.push(Loc::Reg(*r));
            }
        }
        Jmp(_) | JmpCC(..) | Label(_) | AllocateStack(_) => {}
    }
    (used, written)
}

/// Per-block live-out sets for `cfg`.
pub fn live_out_sets(
    cfg: &Cfg<Instruction>,
    asm_syms: &AsmSymbols,
    return_regs: &[Reg],
) -> Vec<FxHashSet<Loc>> {
    let n = cfg.blocks.len();
    let mut live_in: Vec<FxHashSet<Loc>> = vec![FxHashSet::default(); n];
    let mut live_out: Vec<FxHashSet<Loc>> = vec![FxHashSet::default(); n];
    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..n).rev() {
            let mut out = FxHashSet::default();
            for &s in cfg.successors(NodeId::Block(i)) {
                if let NodeId::Block(j) = s {
                    out.extend(live_in[j].iter().copied());
                }
            }
            let mut live = out.clone();
            for instr in cfg.blocks[i].instrs.iter().rev() {
                let (used, written) = used_written(instr, asm_syms, return_regs);
                for w in &written {
                    live.remove(w);
                }
                for u in used {
                    live.insert(u);
                }
            }
            if out != live_out[i] {
                live_out[i] = out;
                changed = true;
            }
            if live != live_in[i] {
                live_in[i] = live;
                changed = true;
            }
        }
    }
    live_out
}
