//! Text assembly emission.
//!
//! Prints legalized abstract assembly as AT&T-syntax x86-64 for the system
//! assembler. Linux and macOS differ only in decoration: macOS prefixes
//! symbols with an underscore and uses `L` local labels, Linux uses `.L`
//! local labels, routes calls to undefined symbols through the PLT, and
//! wants the GNU-stack note at the end of the file.

use crate::asm::symbols::AsmSymbols;
use crate::asm::{
    AsmType, BinaryOp, CondCode, Function, Instruction, Module, Operand, Reg, UnaryOp,
};
use crate::error::{CompileError, CompileResult};
use crate::symbols::{Attrs, StaticInit, Sym, SymbolTable};
use crate::tac::{Label, StaticVar};
use crate::types::TypeTable;
use core::fmt::Write;
use target_lexicon::{Architecture, OperatingSystem, Triple};

/// Platform flavor of label and relocation syntax.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum Flavor {
    Linux,
    MacOs,
}

impl Flavor {
    fn from_triple(target: &Triple) -> CompileResult<Self> {
        if target.architecture != Architecture::X86_64 {
            return Err(CompileError::internal(format!(
                "unsupported architecture `{}`",
                target.architecture
            )));
        }
        match target.operating_system {
            OperatingSystem::Linux => Ok(Flavor::Linux),
            OperatingSystem::Darwin(_) | OperatingSystem::MacOSX(_) => Ok(Flavor::MacOs),
            ref os => Err(CompileError::internal(format!(
                "unsupported operating system `{os}`"
            ))),
        }
    }

    fn local_prefix(self) -> &'static str {
        match self {
            Flavor::Linux => ".L",
            Flavor::MacOs => "L",
        }
    }
}

/// Print `module` as assembly text.
pub fn emit(
    module: &Module,
    symbols: &SymbolTable,
    asm_syms: &AsmSymbols,
    types: &TypeTable,
    target: &Triple,
) -> CompileResult<String> {
    let flavor = Flavor::from_triple(target)?;
    for f in &module.funcs {
        for instr in &f.instructions {
            let mut bad = false;
            let mut probe = instr.clone();
            crate::regalloc::for_each_operand(&mut probe, |op| {
                bad |= matches!(op, Operand::Pseudo(_) | Operand::PseudoMem(..));
            });
            if bad {
                return Err(CompileError::internal(format!(
                    "pseudoregister survived allocation in `{}`",
                    symbols.name(f.sym)
                )));
            }
        }
    }

    let mut e = Emitter {
        out: String::new(),
        flavor,
        symbols,
        asm_syms,
        types,
    };
    for f in &module.funcs {
        e.function(f).map_err(fmt_failure)?;
    }
    for sv in &module.statics {
        e.static_var(sv).map_err(fmt_failure)?;
    }
    e.constants().map_err(fmt_failure)?;
    if flavor == Flavor::Linux {
        e.out
            .push_str("\t.section .note.GNU-stack,\"\",@progbits\n");
    }
    Ok(e.out)
}

fn fmt_failure(_: core::fmt::Error) -> CompileError {
    CompileError::internal("formatting failure during emission")
}

struct Emitter<'a> {
    out: String,
    flavor: Flavor,
    symbols: &'a SymbolTable,
    asm_syms: &'a AsmSymbols,
    types: &'a TypeTable,
}

impl Emitter<'_> {
    /// The assembler-visible name of a symbol.
    fn name(&self, sym: Sym) -> String {
        let data = &self.symbols[sym];
        if matches!(data.attrs, Attrs::Constant { .. }) {
            format!("{}{}", self.flavor.local_prefix(), data.name)
        } else {
            match self.flavor {
                Flavor::Linux => data.name.clone(),
                Flavor::MacOs => format!("_{}", data.name),
            }
        }
    }

    fn code_label(&self, l: Label) -> String {
        format!("{}{}", self.flavor.local_prefix(), l.0)
    }

    fn function(&mut self, f: &Function) -> core::fmt::Result {
        let name = self.name(f.sym);
        if f.global {
            writeln!(self.out, "\t.globl\t{name}")?;
        }
        writeln!(self.out, "\t.text")?;
        writeln!(self.out, "{name}:")?;
        writeln!(self.out, "\tpushq\t%rbp")?;
        writeln!(self.out, "\tmovq\t%rsp, %rbp")?;
        for instr in &f.instructions {
            self.instruction(instr)?;
        }
        Ok(())
    }

    fn instruction(&mut self, instr: &Instruction) -> core::fmt::Result {
        use Instruction::*;
        match instr {
            Mov(ty, src, dst) => {
                let m = match ty {
                    AsmType::Double => "movsd".to_string(),
                    _ => format!("mov{}", suffix(*ty)),
                };
                writeln!(
                    self.out,
                    "\t{m}\t{}, {}",
                    self.operand(src, *ty),
                    self.operand(dst, *ty)
                )
            }
            Movsx {
                src_ty,
                dst_ty,
                src,
                dst,
            } => writeln!(
                self.out,
                "\tmovs{}{}\t{}, {}",
                suffix(*src_ty),
                suffix(*dst_ty),
                self.operand(src, *src_ty),
                self.operand(dst, *dst_ty)
            ),
            MovZeroExtend {
                src_ty,
                dst_ty,
                src,
                dst,
            } => writeln!(
                self.out,
                "\tmovz{}{}\t{}, {}",
                suffix(*src_ty),
                suffix(*dst_ty),
                self.operand(src, *src_ty),
                self.operand(dst, *dst_ty)
            ),
            Lea(src, dst) => writeln!(
                self.out,
                "\tleaq\t{}, {}",
                self.operand(src, AsmType::Quadword),
                self.operand(dst, AsmType::Quadword)
            ),
            Cvttsd2si(ty, src, dst) => writeln!(
                self.out,
                "\tcvttsd2si{}\t{}, {}",
                suffix(*ty),
                self.operand(src, AsmType::Double),
                self.operand(dst, *ty)
            ),
            Cvtsi2sd(ty, src, dst) => writeln!(
                self.out,
                "\tcvtsi2sd{}\t{}, {}",
                suffix(*ty),
                self.operand(src, *ty),
                self.operand(dst, AsmType::Double)
            ),
            Unary(op, ty, operand) => {
                let m = match op {
                    UnaryOp::Neg => "neg",
                    UnaryOp::Not => "not",
                };
                writeln!(
                    self.out,
                    "\t{m}{}\t{}",
                    suffix(*ty),
                    self.operand(operand, *ty)
                )
            }
            Binary(op, ty, src, dst) => self.binary(*op, *ty, src, dst),
            Cmp(AsmType::Double, src, dst) => writeln!(
                self.out,
                "\tcomisd\t{}, {}",
                self.operand(src, AsmType::Double),
                self.operand(dst, AsmType::Double)
            ),
            Cmp(ty, src, dst) => writeln!(
                self.out,
                "\tcmp{}\t{}, {}",
                suffix(*ty),
                self.operand(src, *ty),
                self.operand(dst, *ty)
            ),
            Test(ty, src, dst) => writeln!(
                self.out,
                "\ttest{}\t{}, {}",
                suffix(*ty),
                self.operand(src, *ty),
                self.operand(dst, *ty)
            ),
            Idiv(ty, op) => {
                writeln!(self.out, "\tidiv{}\t{}", suffix(*ty), self.operand(op, *ty))
            }
            Div(ty, op) => {
                writeln!(self.out, "\tdiv{}\t{}", suffix(*ty), self.operand(op, *ty))
            }
            Cdq(AsmType::Quadword) => writeln!(self.out, "\tcqo"),
            Cdq(_) => writeln!(self.out, "\tcdq"),
            Jmp(l) => writeln!(self.out, "\tjmp\t{}", self.code_label(*l)),
            JmpCC(cc, l) => writeln!(self.out, "\tj{}\t{}", cond(*cc), self.code_label(*l)),
            SetCC(cc, op) => writeln!(
                self.out,
                "\tset{}\t{}",
                cond(*cc),
                self.operand(op, AsmType::Byte)
            ),
            Label(l) => writeln!(self.out, "{}:", self.code_label(*l)),
            Push(op) => writeln!(self.out, "\tpushq\t{}", self.operand(op, AsmType::Quadword)),
            Pop(r) => writeln!(self.out, "\tpopq\t{}", reg_name(*r, AsmType::Quadword)),
            Call(f) => {
                let name = self.name(*f);
                let defined = self
                    .asm_syms
                    .fun(*f)
                    .map(|info| info.defined)
                    .unwrap_or(false);
                if self.flavor == Flavor::Linux && !defined {
                    writeln!(self.out, "\tcall\t{name}@PLT")
                } else {
                    writeln!(self.out, "\tcall\t{name}")
                }
            }
            AllocateStack(n) => writeln!(self.out, "\tsubq\t${n}, %rsp"),
            Ret => {
                writeln!(self.out, "\tmovq\t%rbp, %rsp")?;
                writeln!(self.out, "\tpopq\t%rbp")?;
                writeln!(self.out, "\tret")
            }
        }
    }

    fn binary(
        &mut self,
        op: BinaryOp,
        ty: AsmType,
        src: &Operand,
        dst: &Operand,
    ) -> core::fmt::Result {
        if ty == AsmType::Double {
            let m = match op {
                BinaryOp::Add => "addsd",
                BinaryOp::Sub => "subsd",
                BinaryOp::Mult => "mulsd",
                BinaryOp::DivDouble => "divsd",
                BinaryOp::Xor => "xorpd",
                other => panic!("{other:?} on doubles"),
            };
            return writeln!(
                self.out,
                "\t{m}\t{}, {}",
                self.operand(src, AsmType::Double),
                self.operand(dst, AsmType::Double)
            );
        }
        let m = match op {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mult => "imul",
            BinaryOp::And => "and",
            BinaryOp::Or => "or",
            BinaryOp::Xor => "xor",
            BinaryOp::Shl => "shl",
            BinaryOp::Sar => "sar",
            BinaryOp::Shr => "shr",
            BinaryOp::DivDouble => panic!("divsd on integers"),
        };
        // Variable shift counts live in %cl.
        let src_text = match (op, src) {
            (BinaryOp::Shl | BinaryOp::Sar | BinaryOp::Shr, Operand::Reg(Reg::CX)) => {
                "%cl".to_string()
            }
            _ => self.operand(src, ty),
        };
        writeln!(
            self.out,
            "\t{m}{}\t{src_text}, {}",
            suffix(ty),
            self.operand(dst, ty)
        )
    }

    fn operand(&self, op: &Operand, ty: AsmType) -> String {
        match op {
            Operand::Imm(v) => match ty {
                AsmType::Byte => format!("${}", *v as i8),
                AsmType::Word => format!("${}", *v as i16),
                AsmType::Longword => format!("${}", *v as i32),
                _ => format!("${v}"),
            },
            Operand::Reg(r) => reg_name(*r, ty).to_string(),
            Operand::Memory(base, 0) => format!("({})", reg_name(*base, AsmType::Quadword)),
            Operand::Memory(base, off) => {
                format!("{off}({})", reg_name(*base, AsmType::Quadword))
            }
            Operand::Data(sym, off) => {
                let name = self.name(*sym);
                match off {
                    0 => format!("{name}(%rip)"),
                    o if *o > 0 => format!("{name}+{o}(%rip)"),
                    o => format!("{name}{o}(%rip)"),
                }
            }
            Operand::Indexed { base, index, scale } => format!(
                "({}, {}, {scale})",
                reg_name(*base, AsmType::Quadword),
                reg_name(*index, AsmType::Quadword)
            ),
            Operand::Pseudo(_) | Operand::PseudoMem(..) => {
                unreachable!("pseudoregisters are rejected before emission")
            }
        }
    }

    fn static_var(&mut self, sv: &StaticVar) -> core::fmt::Result {
        let name = self.name(sv.sym);
        let align = sv.ty.alignment(self.types);
        let size = sv.ty.size(self.types);
        if sv.global {
            writeln!(self.out, "\t.globl\t{name}")?;
        }
        if sv.init.iter().all(StaticInit::is_zero) {
            writeln!(self.out, "\t.bss")?;
            writeln!(self.out, "\t.balign {align}")?;
            writeln!(self.out, "{name}:")?;
            writeln!(self.out, "\t.zero {size}")?;
        } else {
            writeln!(self.out, "\t.data")?;
            writeln!(self.out, "\t.balign {align}")?;
            writeln!(self.out, "{name}:")?;
            for piece in &sv.init {
                self.piece(piece)?;
            }
        }
        Ok(())
    }

    fn constants(&mut self) -> core::fmt::Result {
        for (sym, data) in self.symbols.iter() {
            let Attrs::Constant { init, alignment } = &data.attrs else {
                continue;
            };
            let name = self.name(sym);
            match (self.flavor, init) {
                (Flavor::Linux, _) => {
                    writeln!(self.out, "\t.section .rodata")?;
                    writeln!(self.out, "\t.balign {alignment}")?;
                }
                (Flavor::MacOs, StaticInit::String { .. }) => {
                    writeln!(self.out, "\t.cstring")?;
                }
                (Flavor::MacOs, _) if *alignment == 16 => {
                    writeln!(self.out, "\t.literal16")?;
                    writeln!(self.out, "\t.balign 16")?;
                }
                (Flavor::MacOs, _) => {
                    writeln!(self.out, "\t.literal8")?;
                    writeln!(self.out, "\t.balign 8")?;
                }
            }
            writeln!(self.out, "{name}:")?;
            self.piece(init)?;
            // A 16-byte literal pool entry pads out to its full width.
            if *alignment == 16 && matches!(init, StaticInit::Double(_)) {
                writeln!(self.out, "\t.quad 0")?;
            }
        }
        Ok(())
    }

    fn piece(&mut self, piece: &StaticInit) -> core::fmt::Result {
        match piece {
            StaticInit::Char(v) => writeln!(self.out, "\t.byte {v}"),
            StaticInit::UChar(v) => writeln!(self.out, "\t.byte {v}"),
            StaticInit::Short(v) => writeln!(self.out, "\t.word {v}"),
            StaticInit::UShort(v) => writeln!(self.out, "\t.word {v}"),
            StaticInit::Int(v) => writeln!(self.out, "\t.long {v}"),
            StaticInit::UInt(v) => writeln!(self.out, "\t.long {v}"),
            StaticInit::Long(v) => writeln!(self.out, "\t.quad {v}"),
            StaticInit::ULong(v) => writeln!(self.out, "\t.quad {v}"),
            StaticInit::Double(d) => {
                if d.is_finite() {
                    writeln!(self.out, "\t.double {d:?}")
                } else {
                    // Infinities and NaN are emitted bit-exactly.
                    writeln!(self.out, "\t.quad {}", d.to_bits())
                }
            }
            StaticInit::Zero(n) => writeln!(self.out, "\t.zero {n}"),
            StaticInit::String {
                bytes,
                null_terminated,
            } => {
                let directive = if *null_terminated { ".asciz" } else { ".ascii" };
                writeln!(self.out, "\t{directive} \"{}\"", escape(bytes))
            }
            StaticInit::Pointer(sym) => writeln!(self.out, "\t.quad {}", self.name(*sym)),
        }
    }
}

fn suffix(ty: AsmType) -> &'static str {
    match ty {
        AsmType::Byte => "b",
        AsmType::Word => "w",
        AsmType::Longword => "l",
        AsmType::Quadword => "q",
        AsmType::Double | AsmType::ByteArray { .. } => {
            panic!("no operation suffix for {ty:?}")
        }
    }
}

fn cond(cc: CondCode) -> &'static str {
    match cc {
        CondCode::E => "e",
        CondCode::NE => "ne",
        CondCode::G => "g",
        CondCode::GE => "ge",
        CondCode::L => "l",
        CondCode::LE => "le",
        CondCode::A => "a",
        CondCode::AE => "ae",
        CondCode::B => "b",
        CondCode::BE => "be",
        CondCode::P => "p",
    }
}

fn reg_name(r: Reg, ty: AsmType) -> &'static str {
    use Reg::*;
    if r.is_sse() {
        return match r {
            XMM0 => "%xmm0",
            XMM1 => "%xmm1",
            XMM2 => "%xmm2",
            XMM3 => "%xmm3",
            XMM4 => "%xmm4",
            XMM5 => "%xmm5",
            XMM6 => "%xmm6",
            XMM7 => "%xmm7",
            XMM8 => "%xmm8",
            XMM9 => "%xmm9",
            XMM10 => "%xmm10",
            XMM11 => "%xmm11",
            XMM12 => "%xmm12",
            XMM13 => "%xmm13",
            XMM14 => "%xmm14",
            XMM15 => "%xmm15",
            _ => unreachable!(),
        };
    }
    match ty {
        AsmType::Byte => match r {
            AX => "%al",
            BX => "%bl",
            CX => "%cl",
            DX => "%dl",
            DI => "%dil",
            SI => "%sil",
            R8 => "%r8b",
            R9 => "%r9b",
            R10 => "%r10b",
            R11 => "%r11b",
            R12 => "%r12b",
            R13 => "%r13b",
            R14 => "%r14b",
            R15 => "%r15b",
            SP => "%spl",
            BP => "%bpl",
            _ => unreachable!(),
        },
        AsmType::Word => match r {
            AX => "%ax",
            BX => "%bx",
            CX => "%cx",
            DX => "%dx",
            DI => "%di",
            SI => "%si",
            R8 => "%r8w",
            R9 => "%r9w",
            R10 => "%r10w",
            R11 => "%r11w",
            R12 => "%r12w",
            R13 => "%r13w",
            R14 => "%r14w",
            R15 => "%r15w",
            SP => "%sp",
            BP => "%bp",
            _ => unreachable!(),
        },
        AsmType::Longword => match r {
            AX => "%eax",
            BX => "%ebx",
            CX => "%ecx",
            DX => "%edx",
            DI => "%edi",
            SI => "%esi",
            R8 => "%r8d",
            R9 => "%r9d",
            R10 => "%r10d",
            R11 => "%r11d",
            R12 => "%r12d",
            R13 => "%r13d",
            R14 => "%r14d",
            R15 => "%r15d",
            SP => "%esp",
            BP => "%ebp",
            _ => unreachable!(),
        },
        _ => match r {
            AX => "%rax",
            BX => "%rbx",
            CX => "%rcx",
            DX => "%rdx",
            DI => "%rdi",
            SI => "%rsi",
            R8 => "%r8",
            R9 => "%r9",
            R10 => "%r10",
            R11 => "%r11",
            R12 => "%r12",
            R13 => "%r13",
            R14 => "%r14",
            R15 => "%r15",
            SP => "%rsp",
            BP => "%rbp",
            _ => unreachable!(),
        },
    }
}

fn escape(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len());
    for &b in bytes {
        match b {
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_names() {
        assert_eq!(reg_name(Reg::AX, AsmType::Byte), "%al");
        assert_eq!(reg_name(Reg::R8, AsmType::Longword), "%r8d");
        assert_eq!(reg_name(Reg::DI, AsmType::Quadword), "%rdi");
        assert_eq!(reg_name(Reg::XMM14, AsmType::Double), "%xmm14");
    }

    #[test]
    fn string_escaping() {
        assert_eq!(escape(b"hi"), "hi");
        assert_eq!(escape(b"a\"b\\c"), "a\\\"b\\\\c");
        assert_eq!(escape(b"line\nfeed"), "line\\012feed");
    }
}
