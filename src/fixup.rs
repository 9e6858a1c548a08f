//! Instruction legalization after register allocation.
//!
//! x86 refuses several operand combinations the abstract IR allows: two
//! memory operands, memory destinations on `imul` and `lea`, immediate
//! operands on `idiv`/`div`, 64-bit immediates anywhere but a register
//! `mov`, and pushes of XMM registers. This pass routes the offending
//! operand through the reserved scratch registers (`%r10`/`%r11` for the
//! general class, `%xmm14`/`%xmm15` for SSE) and expands the rest.
//!
//! It also materializes the frame: the reserved stack allocation and the
//! callee-saved pushes go in at the top, and the matching pops go in
//! before every `ret`.

use crate::asm::{AsmType, BinaryOp, Function, Instruction, Operand, Reg};

/// The integer scratch register for rewritten sources.
const SCRATCH_SRC: Reg = Reg::R10;
/// The integer scratch register for rewritten destinations.
const SCRATCH_DST: Reg = Reg::R11;
/// The SSE scratch register for rewritten sources.
const SSE_SCRATCH_SRC: Reg = Reg::XMM14;
/// The SSE scratch register for rewritten destinations.
const SSE_SCRATCH_DST: Reg = Reg::XMM15;

fn fits_in_i32(v: i64) -> bool {
    i64::from(v as i32) == v
}

fn is_large_imm(op: &Operand) -> bool {
    matches!(op, Operand::Imm(v) if !fits_in_i32(*v))
}

/// Legalize `func` in place.
pub fn run(func: &mut Function) {
    let body = core::mem::take(&mut func.instructions);
    let mut out = Vec::with_capacity(body.len() + 8);
    if func.frame_size > 0 {
        out.push(Instruction::AllocateStack(func.frame_size));
    }
    for &r in &func.callee_saved {
        out.push(Instruction::Push(Operand::Reg(r)));
    }
    for instr in body {
        match instr {
            Instruction::Ret => {
                for &r in func.callee_saved.iter().rev() {
                    out.push(Instruction::Pop(r));
                }
                out.push(Instruction::Ret);
            }
            other => legalize(other, &mut out),
        }
    }
    func.instructions = out;
}

fn legalize(instr: Instruction, out: &mut Vec<Instruction>) {
    use Instruction::*;
    match instr {
        Mov(AsmType::Double, src, dst) => {
            if src.is_memory() && dst.is_memory() {
                out.push(Mov(
                    AsmType::Double,
                    src,
                    Operand::Reg(SSE_SCRATCH_SRC),
                ));
                out.push(Mov(AsmType::Double, Operand::Reg(SSE_SCRATCH_SRC), dst));
            } else {
                out.push(Mov(AsmType::Double, src, dst));
            }
        }
        Mov(ty, src, dst) => {
            let src = if ty == AsmType::Quadword && is_large_imm(&src) && dst.is_memory() {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                Operand::Reg(SCRATCH_SRC)
            } else {
                src
            };
            if src.is_memory() && dst.is_memory() {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                out.push(Mov(ty, Operand::Reg(SCRATCH_SRC), dst));
            } else {
                out.push(Mov(ty, src, dst));
            }
        }
        Movsx {
            src_ty,
            dst_ty,
            src,
            dst,
        } => {
            let src = if matches!(src, Operand::Imm(_)) {
                out.push(Mov(src_ty, src, Operand::Reg(SCRATCH_SRC)));
                Operand::Reg(SCRATCH_SRC)
            } else {
                src
            };
            if dst.is_memory() {
                out.push(Movsx {
                    src_ty,
                    dst_ty,
                    src,
                    dst: Operand::Reg(SCRATCH_DST),
                });
                out.push(Mov(dst_ty, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(Movsx {
                    src_ty,
                    dst_ty,
                    src,
                    dst,
                });
            }
        }
        MovZeroExtend {
            src_ty: AsmType::Longword,
            dst_ty,
            src,
            dst,
        } => {
            // A 32-bit move zeroes the upper half for free.
            if dst.is_memory() {
                out.push(Mov(AsmType::Longword, src, Operand::Reg(SCRATCH_DST)));
                out.push(Mov(dst_ty, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(Mov(AsmType::Longword, src, dst));
            }
        }
        MovZeroExtend {
            src_ty,
            dst_ty,
            src,
            dst,
        } => {
            let src = if matches!(src, Operand::Imm(_)) {
                out.push(Mov(src_ty, src, Operand::Reg(SCRATCH_SRC)));
                Operand::Reg(SCRATCH_SRC)
            } else {
                src
            };
            if dst.is_memory() {
                out.push(MovZeroExtend {
                    src_ty,
                    dst_ty,
                    src,
                    dst: Operand::Reg(SCRATCH_DST),
                });
                out.push(Mov(dst_ty, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(MovZeroExtend {
                    src_ty,
                    dst_ty,
                    src,
                    dst,
                });
            }
        }
        Lea(src, dst) => {
            if dst.is_memory() {
                out.push(Lea(src, Operand::Reg(SCRATCH_DST)));
                out.push(Mov(AsmType::Quadword, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(Lea(src, dst));
            }
        }
        Cvttsd2si(ty, src, dst) => {
            if dst.is_memory() {
                out.push(Cvttsd2si(ty, src, Operand::Reg(SCRATCH_DST)));
                out.push(Mov(ty, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(Cvttsd2si(ty, src, dst));
            }
        }
        Cvtsi2sd(ty, src, dst) => {
            let src = if matches!(src, Operand::Imm(_)) {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                Operand::Reg(SCRATCH_SRC)
            } else {
                src
            };
            if dst.is_memory() {
                out.push(Cvtsi2sd(ty, src, Operand::Reg(SSE_SCRATCH_DST)));
                out.push(Mov(
                    AsmType::Double,
                    Operand::Reg(SSE_SCRATCH_DST),
                    dst,
                ));
            } else {
                out.push(Cvtsi2sd(ty, src, dst));
            }
        }
        Binary(op, AsmType::Double, src, dst) => {
            // SSE arithmetic writes a register.
            if dst.is_memory() {
                out.push(Mov(
                    AsmType::Double,
                    dst.clone(),
                    Operand::Reg(SSE_SCRATCH_DST),
                ));
                out.push(Binary(
                    op,
                    AsmType::Double,
                    src,
                    Operand::Reg(SSE_SCRATCH_DST),
                ));
                out.push(Mov(AsmType::Double, Operand::Reg(SSE_SCRATCH_DST), dst));
            } else {
                out.push(Binary(op, AsmType::Double, src, dst));
            }
        }
        Binary(op @ BinaryOp::Mult, ty, src, dst) => {
            let src = route_large_imm(ty, src, out);
            if dst.is_memory() {
                out.push(Mov(ty, dst.clone(), Operand::Reg(SCRATCH_DST)));
                out.push(Binary(op, ty, src, Operand::Reg(SCRATCH_DST)));
                out.push(Mov(ty, Operand::Reg(SCRATCH_DST), dst));
            } else {
                out.push(Binary(op, ty, src, dst));
            }
        }
        Binary(op, ty, src, dst)
            if matches!(
                op,
                BinaryOp::Add | BinaryOp::Sub | BinaryOp::And | BinaryOp::Or | BinaryOp::Xor
            ) =>
        {
            let src = route_large_imm(ty, src, out);
            if src.is_memory() && dst.is_memory() {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                out.push(Binary(op, ty, Operand::Reg(SCRATCH_SRC), dst));
            } else {
                out.push(Binary(op, ty, src, dst));
            }
        }
        Cmp(AsmType::Double, src, dst) => {
            // comisd reads its second operand from a register.
            if dst.as_reg().is_none() {
                out.push(Mov(
                    AsmType::Double,
                    dst,
                    Operand::Reg(SSE_SCRATCH_DST),
                ));
                out.push(Cmp(AsmType::Double, src, Operand::Reg(SSE_SCRATCH_DST)));
            } else {
                out.push(Cmp(AsmType::Double, src, dst));
            }
        }
        Cmp(ty, src, dst) => {
            let src = route_large_imm(ty, src, out);
            let src = if src.is_memory() && dst.is_memory() {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                Operand::Reg(SCRATCH_SRC)
            } else {
                src
            };
            if matches!(dst, Operand::Imm(_)) {
                out.push(Mov(ty, dst, Operand::Reg(SCRATCH_DST)));
                out.push(Cmp(ty, src, Operand::Reg(SCRATCH_DST)));
            } else {
                out.push(Cmp(ty, src, dst));
            }
        }
        Test(ty, src, dst) => {
            // test takes at most one memory operand and no immediate
            // destination; it is symmetric, so swap before spilling.
            let (src, dst) = if matches!(dst, Operand::Imm(_)) {
                (dst, src)
            } else {
                (src, dst)
            };
            let src = route_large_imm(ty, src, out);
            let (src, dst) = if matches!(dst, Operand::Imm(_)) {
                // Both were immediates.
                out.push(Mov(ty, dst, Operand::Reg(SCRATCH_DST)));
                (src, Operand::Reg(SCRATCH_DST))
            } else if src.is_memory() && dst.is_memory() {
                out.push(Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
                (Operand::Reg(SCRATCH_SRC), dst)
            } else {
                (src, dst)
            };
            out.push(Test(ty, src, dst));
        }
        Idiv(ty, op) => {
            if matches!(op, Operand::Imm(_)) {
                out.push(Mov(ty, op, Operand::Reg(SCRATCH_SRC)));
                out.push(Idiv(ty, Operand::Reg(SCRATCH_SRC)));
            } else {
                out.push(Idiv(ty, op));
            }
        }
        Div(ty, op) => {
            if matches!(op, Operand::Imm(_)) {
                out.push(Mov(ty, op, Operand::Reg(SCRATCH_SRC)));
                out.push(Div(ty, Operand::Reg(SCRATCH_SRC)));
            } else {
                out.push(Div(ty, op));
            }
        }
        Push(Operand::Reg(r)) if r.is_sse() => {
            out.push(Binary(
                BinaryOp::Sub,
                AsmType::Quadword,
                Operand::Imm(8),
                Operand::Reg(Reg::SP),
            ));
            out.push(Mov(
                AsmType::Double,
                Operand::Reg(r),
                Operand::Memory(Reg::SP, 0),
            ));
        }
        Push(op) => {
            if is_large_imm(&op) {
                out.push(Mov(AsmType::Quadword, op, Operand::Reg(SCRATCH_SRC)));
                out.push(Push(Operand::Reg(SCRATCH_SRC)));
            } else {
                out.push(Push(op));
            }
        }
        other => out.push(other),
    }
}

/// Load a 64-bit immediate into the source scratch register when the
/// instruction cannot encode it.
fn route_large_imm(ty: AsmType, src: Operand, out: &mut Vec<Instruction>) -> Operand {
    if ty == AsmType::Quadword && is_large_imm(&src) {
        out.push(Instruction::Mov(ty, src, Operand::Reg(SCRATCH_SRC)));
        Operand::Reg(SCRATCH_SRC)
    } else {
        src
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::asm::Reg;

    fn legalized(instr: Instruction) -> Vec<Instruction> {
        let mut out = Vec::new();
        legalize(instr, &mut out);
        out
    }

    #[test]
    fn memory_to_memory_mov_uses_scratch() {
        let out = legalized(Instruction::Mov(
            AsmType::Longword,
            Operand::Memory(Reg::BP, -4),
            Operand::Memory(Reg::BP, -8),
        ));
        assert_eq!(
            out,
            vec![
                Instruction::Mov(
                    AsmType::Longword,
                    Operand::Memory(Reg::BP, -4),
                    Operand::Reg(Reg::R10),
                ),
                Instruction::Mov(
                    AsmType::Longword,
                    Operand::Reg(Reg::R10),
                    Operand::Memory(Reg::BP, -8),
                ),
            ]
        );
    }

    #[test]
    fn imul_with_memory_destination() {
        let out = legalized(Instruction::Binary(
            BinaryOp::Mult,
            AsmType::Longword,
            Operand::Imm(3),
            Operand::Memory(Reg::BP, -4),
        ));
        assert_eq!(out.len(), 3);
        assert!(matches!(
            out[1],
            Instruction::Binary(BinaryOp::Mult, _, _, Operand::Reg(Reg::R11))
        ));
    }

    #[test]
    fn division_by_immediate() {
        let out = legalized(Instruction::Idiv(AsmType::Longword, Operand::Imm(7)));
        assert_eq!(
            out,
            vec![
                Instruction::Mov(AsmType::Longword, Operand::Imm(7), Operand::Reg(Reg::R10)),
                Instruction::Idiv(AsmType::Longword, Operand::Reg(Reg::R10)),
            ]
        );
    }

    #[test]
    fn push_of_xmm_register_expands() {
        let out = legalized(Instruction::Push(Operand::Reg(Reg::XMM3)));
        assert_eq!(
            out,
            vec![
                Instruction::Binary(
                    BinaryOp::Sub,
                    AsmType::Quadword,
                    Operand::Imm(8),
                    Operand::Reg(Reg::SP),
                ),
                Instruction::Mov(
                    AsmType::Double,
                    Operand::Reg(Reg::XMM3),
                    Operand::Memory(Reg::SP, 0),
                ),
            ]
        );
    }

    #[test]
    fn large_immediate_store_goes_through_scratch() {
        let big = 8_589_934_592i64;
        let out = legalized(Instruction::Mov(
            AsmType::Quadword,
            Operand::Imm(big),
            Operand::Memory(Reg::BP, -8),
        ));
        assert_eq!(
            out,
            vec![
                Instruction::Mov(AsmType::Quadword, Operand::Imm(big), Operand::Reg(Reg::R10)),
                Instruction::Mov(
                    AsmType::Quadword,
                    Operand::Reg(Reg::R10),
                    Operand::Memory(Reg::BP, -8),
                ),
            ]
        );
    }
}
