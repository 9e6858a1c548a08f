//! Lowering from TAC to abstract assembly.
//!
//! The instruction mapping is mechanical except for calls and returns,
//! which implement the System V AMD64 calling convention: aggregates are
//! classified into eightbytes (see [`super::abi`]), INTEGER eightbytes ride
//! in `%rdi %rsi %rdx %rcx %r8 %r9`, SSE eightbytes in `%xmm0`-`%xmm7`,
//! MEMORY aggregates travel on the stack, and memory-returned values go
//! through a hidden pointer handed to the callee in `%rdi` and returned in
//! `%rax`.
//!
//! Double comparison and conversion sequences account for NaN and for the
//! missing unsigned forms of `cvttsd2si`/`cvtsi2sd`.

use super::abi::{self, Class};
use super::symbols::AsmSymbols;
use super::{
    AsmType, BinaryOp, CondCode, Function, Instruction, Module, Operand, Reg, UnaryOp,
    INT_ARG_REGS, INT_RET_REGS, SSE_ARG_REGS, SSE_RET_REGS,
};
use crate::fx::FxHashSet;
use crate::symbols::{Sym, SymbolTable};
use crate::tac::{self, Label, Value};
use crate::types::{align_to, Const, Type, TypeTable};

/// Lower a TAC module to abstract assembly.
pub fn lower(
    module: &tac::Module,
    symbols: &mut SymbolTable,
    types: &TypeTable,
) -> (Module, AsmSymbols) {
    let mut aliased = FxHashSet::default();
    for f in &module.funcs {
        for instr in &f.body {
            if let tac::Instr::GetAddress { src, .. } = instr {
                aliased.insert(*src);
            }
        }
    }

    let mut gen = CodeGen {
        symbols,
        types,
        asm_syms: AsmSymbols::new(),
        instrs: Vec::new(),
        next_label: module.next_label,
        retptr: None,
    };
    gen.seed_symbols();
    let funcs: Vec<Function> = module.funcs.iter().map(|f| gen.function(f)).collect();
    let asm_syms = gen.asm_syms;

    (
        Module {
            funcs,
            statics: module.statics.clone(),
            aliased,
        },
        asm_syms,
    )
}

struct CodeGen<'a> {
    symbols: &'a mut SymbolTable,
    types: &'a TypeTable,
    asm_syms: AsmSymbols,
    instrs: Vec<Instruction>,
    next_label: u32,
    retptr: Option<Sym>,
}

/// Where a return value travels.
struct RetPlan {
    in_memory: bool,
    int_pieces: Vec<(AsmType, Operand)>,
    sse_pieces: Vec<Operand>,
}

/// Where a call's arguments travel.
struct ArgPlan {
    int_args: Vec<(AsmType, Operand)>,
    sse_args: Vec<Operand>,
    stack_args: Vec<(AsmType, Operand)>,
}

impl ArgPlan {
    fn stack_bytes(&self) -> u64 {
        self.stack_args
            .iter()
            .map(|(ty, _)| match ty {
                AsmType::ByteArray { size, .. } => align_to(*size, 8),
                _ => 8,
            })
            .sum()
    }
}

/// The assembly type of the eightbyte at `offset` in an aggregate of
/// `total` bytes.
fn eightbyte_type(offset: u64, total: u64) -> AsmType {
    if offset + 8 <= total {
        AsmType::Quadword
    } else {
        AsmType::ByteArray {
            size: total - offset,
            alignment: 8,
        }
    }
}

impl CodeGen<'_> {
    fn emit(&mut self, i: Instruction) {
        self.instrs.push(i);
    }

    fn fresh_label(&mut self) -> Label {
        let l = Label(self.next_label);
        self.next_label += 1;
        l
    }

    /// Record backend entries for every symbol known before code
    /// generation; temporaries made later register themselves.
    fn seed_symbols(&mut self) {
        let mut objs = Vec::new();
        let mut funs = Vec::new();
        for (sym, data) in self.symbols.iter() {
            match &data.attrs {
                crate::symbols::Attrs::Fun { defined, .. } => funs.push((sym, *defined)),
                crate::symbols::Attrs::Static { .. } => {
                    objs.push((sym, self.asm_type(&data.ty), true, false));
                }
                crate::symbols::Attrs::Constant { init, .. } => {
                    let ty = match init {
                        crate::symbols::StaticInit::Double(_) => AsmType::Double,
                        _ => self.asm_type(&data.ty),
                    };
                    objs.push((sym, ty, true, true));
                }
                crate::symbols::Attrs::Local => {
                    objs.push((sym, self.asm_type(&data.ty), false, false));
                }
            }
        }
        for (sym, ty, is_static, is_constant) in objs {
            self.asm_syms.add_obj(sym, ty, is_static, is_constant);
        }
        for (sym, defined) in funs {
            self.asm_syms.fun_mut(sym).defined = defined;
        }
    }

    fn asm_type(&self, ty: &Type) -> AsmType {
        match ty {
            Type::Char | Type::SChar | Type::UChar => AsmType::Byte,
            Type::Short | Type::UShort => AsmType::Word,
            Type::Int | Type::UInt => AsmType::Longword,
            Type::Long | Type::ULong | Type::Pointer(_) => AsmType::Quadword,
            Type::Double => AsmType::Double,
            Type::Array(..) | Type::Struct(_) => AsmType::ByteArray {
                size: ty.size(self.types),
                alignment: ty.alignment(self.types),
            },
            Type::Function(_) | Type::Void => panic!("assembly type of function or void"),
        }
    }

    fn value_ty(&self, v: &Value) -> Type {
        v.ty(self.symbols)
    }

    fn value_asm_ty(&self, v: &Value) -> AsmType {
        self.asm_type(&self.value_ty(v))
    }

    fn make_temp(&mut self, ty: Type) -> Sym {
        let asm_ty = self.asm_type(&ty);
        let sym = self.symbols.make_temp(ty);
        self.asm_syms.add_obj(sym, asm_ty, false, false);
        sym
    }

    fn double_constant(&mut self, bits: u64, alignment: u64) -> Operand {
        let sym = self.symbols.double_constant(bits, alignment);
        self.asm_syms.add_obj(sym, AsmType::Double, true, true);
        Operand::Data(sym, 0)
    }

    fn operand(&mut self, v: &Value) -> Operand {
        match v {
            Value::Constant(Const::Double(d)) => self.double_constant(d.to_bits(), 8),
            Value::Constant(c) => Operand::Imm(c.as_bits() as i64),
            Value::Var(sym) => self.sym_operand(*sym, 0),
        }
    }

    fn sym_operand(&mut self, sym: Sym, offset: i64) -> Operand {
        let info = self.asm_syms.obj(sym);
        let aggregate = matches!(info.ty, AsmType::ByteArray { .. });
        if info.is_static {
            Operand::Data(sym, offset)
        } else if aggregate {
            Operand::PseudoMem(sym, offset)
        } else {
            debug_assert_eq!(offset, 0);
            Operand::Pseudo(sym)
        }
    }

    /// Copy `size` bytes between memory operands in 8/4/1-byte chunks.
    fn copy_bytes(&mut self, src: Operand, dst: Operand, size: u64) {
        let mut offset = 0i64;
        let mut remaining = size;
        while remaining > 0 {
            let (chunk_ty, chunk) = if remaining >= 8 {
                (AsmType::Quadword, 8)
            } else if remaining >= 4 {
                (AsmType::Longword, 4)
            } else {
                (AsmType::Byte, 1)
            };
            self.emit(Instruction::Mov(
                chunk_ty,
                src.with_offset(offset),
                dst.with_offset(offset),
            ));
            offset += chunk;
            remaining -= chunk as u64;
        }
    }

    /// Load the `size` trailing bytes of an eightbyte into `reg`, last byte
    /// first, shifting between loads.
    fn copy_bytes_to_reg(&mut self, src: Operand, size: u64, reg: Reg) {
        for i in (0..size as i64).rev() {
            self.emit(Instruction::Mov(
                AsmType::Byte,
                src.with_offset(i),
                Operand::Reg(reg),
            ));
            if i > 0 {
                self.emit(Instruction::Binary(
                    BinaryOp::Shl,
                    AsmType::Quadword,
                    Operand::Imm(8),
                    Operand::Reg(reg),
                ));
            }
        }
    }

    /// Store the low `size` bytes of `reg` into memory, shifting the next
    /// byte down after each store.
    fn copy_bytes_from_reg(&mut self, reg: Reg, dst: Operand, size: u64) {
        for i in 0..size as i64 {
            self.emit(Instruction::Mov(
                AsmType::Byte,
                Operand::Reg(reg),
                dst.with_offset(i),
            ));
            if i < size as i64 - 1 {
                self.emit(Instruction::Binary(
                    BinaryOp::Shr,
                    AsmType::Quadword,
                    Operand::Imm(8),
                    Operand::Reg(reg),
                ));
            }
        }
    }

    fn classify_return_value(&mut self, v: &Value) -> RetPlan {
        let ty = self.value_ty(v);
        match &ty {
            Type::Double => RetPlan {
                in_memory: false,
                int_pieces: Vec::new(),
                sse_pieces: vec![self.operand(v)],
            },
            Type::Struct(id) => {
                let classes = abi::classify_struct(self.types, *id);
                if classes[0] == Class::Memory {
                    return RetPlan {
                        in_memory: true,
                        int_pieces: Vec::new(),
                        sse_pieces: Vec::new(),
                    };
                }
                let total = ty.size(self.types);
                let base = self.operand(v);
                let mut plan = RetPlan {
                    in_memory: false,
                    int_pieces: Vec::new(),
                    sse_pieces: Vec::new(),
                };
                for (i, class) in classes.iter().enumerate() {
                    let off = i as u64 * 8;
                    let op = base.with_offset(off as i64);
                    match class {
                        Class::Integer => plan.int_pieces.push((eightbyte_type(off, total), op)),
                        Class::Sse => plan.sse_pieces.push(op),
                        Class::Memory => unreachable!(),
                    }
                }
                plan
            }
            _ => {
                let asm_ty = self.asm_type(&ty);
                let op = self.operand(v);
                RetPlan {
                    in_memory: false,
                    int_pieces: vec![(asm_ty, op)],
                    sse_pieces: Vec::new(),
                }
            }
        }
    }

    fn return_regs_for(&self, ret: &Type, in_memory: bool) -> Vec<Reg> {
        if in_memory {
            return vec![Reg::AX];
        }
        match ret {
            Type::Void => Vec::new(),
            Type::Double => vec![Reg::XMM0],
            Type::Struct(id) => {
                let classes = abi::classify_struct(self.types, *id);
                let mut regs = Vec::new();
                let (mut ints, mut sses) = (0, 0);
                for class in classes {
                    match class {
                        Class::Integer => {
                            regs.push(INT_RET_REGS[ints]);
                            ints += 1;
                        }
                        Class::Sse => {
                            regs.push(SSE_RET_REGS[sses]);
                            sses += 1;
                        }
                        Class::Memory => unreachable!(),
                    }
                }
                regs
            }
            _ => vec![Reg::AX],
        }
    }

    fn classify_args(&mut self, args: &[Value], return_in_memory: bool) -> ArgPlan {
        let int_limit = INT_ARG_REGS.len() - usize::from(return_in_memory);
        let mut plan = ArgPlan {
            int_args: Vec::new(),
            sse_args: Vec::new(),
            stack_args: Vec::new(),
        };
        for arg in args {
            let ty = self.value_ty(arg);
            match &ty {
                Type::Double => {
                    let op = self.operand(arg);
                    if plan.sse_args.len() < SSE_ARG_REGS.len() {
                        plan.sse_args.push(op);
                    } else {
                        plan.stack_args.push((AsmType::Double, op));
                    }
                }
                Type::Struct(id) => {
                    let classes = abi::classify_struct(self.types, *id);
                    let total = ty.size(self.types);
                    let base = self.operand(arg);
                    let full = AsmType::ByteArray {
                        size: total,
                        alignment: ty.alignment(self.types),
                    };
                    if classes[0] == Class::Memory {
                        plan.stack_args.push((full, base));
                        continue;
                    }
                    let need_int = classes.iter().filter(|c| **c == Class::Integer).count();
                    let need_sse = classes.iter().filter(|c| **c == Class::Sse).count();
                    if plan.int_args.len() + need_int <= int_limit
                        && plan.sse_args.len() + need_sse <= SSE_ARG_REGS.len()
                    {
                        for (i, class) in classes.iter().enumerate() {
                            let off = i as u64 * 8;
                            let op = base.with_offset(off as i64);
                            match class {
                                Class::Integer => {
                                    plan.int_args.push((eightbyte_type(off, total), op));
                                }
                                Class::Sse => plan.sse_args.push(op),
                                Class::Memory => unreachable!(),
                            }
                        }
                    } else {
                        plan.stack_args.push((full, base));
                    }
                }
                _ => {
                    let asm_ty = self.asm_type(&ty);
                    let op = self.operand(arg);
                    if plan.int_args.len() < int_limit {
                        plan.int_args.push((asm_ty, op));
                    } else {
                        plan.stack_args.push((asm_ty, op));
                    }
                }
            }
        }
        plan
    }

    fn param_regs_for(&self, plan: &ArgPlan, return_in_memory: bool) -> Vec<Reg> {
        let start = usize::from(return_in_memory);
        let mut regs = Vec::new();
        if return_in_memory {
            regs.push(Reg::DI);
        }
        regs.extend_from_slice(&INT_ARG_REGS[start..start + plan.int_args.len()]);
        regs.extend_from_slice(&SSE_ARG_REGS[..plan.sse_args.len()]);
        regs
    }

    fn function(&mut self, f: &tac::Function) -> Function {
        self.instrs.clear();
        let ft = match self.symbols.ty(f.sym) {
            Type::Function(ft) => (**ft).clone(),
            _ => panic!("function symbol without function type"),
        };
        let ret_mem = abi::returns_in_memory(self.types, &ft.ret);

        self.retptr = None;
        if ret_mem {
            let rp = self.make_temp(Type::ULong);
            self.emit(Instruction::Mov(
                AsmType::Quadword,
                Operand::Reg(Reg::DI),
                Operand::Pseudo(rp),
            ));
            self.retptr = Some(rp);
        }

        let param_vals: Vec<Value> = f.params.iter().map(|s| Value::Var(*s)).collect();
        let plan = self.classify_args(&param_vals, ret_mem);
        {
            let param_regs = self.param_regs_for(&plan, ret_mem);
            let return_regs = self.return_regs_for(&ft.ret, ret_mem);
            let e = self.asm_syms.fun_mut(f.sym);
            e.defined = true;
            e.returns_on_stack = ret_mem;
            e.param_regs = param_regs;
            e.return_regs = return_regs;
        }

        let start = usize::from(ret_mem);
        for (i, (ty, op)) in plan.int_args.iter().enumerate() {
            let r = INT_ARG_REGS[start + i];
            match ty {
                AsmType::ByteArray { size, .. } => {
                    self.copy_bytes_from_reg(r, op.clone(), *size);
                }
                _ => self.emit(Instruction::Mov(*ty, Operand::Reg(r), op.clone())),
            }
        }
        for (i, op) in plan.sse_args.iter().enumerate() {
            self.emit(Instruction::Mov(
                AsmType::Double,
                Operand::Reg(SSE_ARG_REGS[i]),
                op.clone(),
            ));
        }
        let mut stack_offset = 16i64;
        for (ty, op) in &plan.stack_args {
            match ty {
                AsmType::ByteArray { size, .. } => {
                    self.copy_bytes(
                        Operand::Memory(Reg::BP, stack_offset),
                        op.clone(),
                        *size,
                    );
                    stack_offset += align_to(*size, 8) as i64;
                }
                _ => {
                    self.emit(Instruction::Mov(
                        *ty,
                        Operand::Memory(Reg::BP, stack_offset),
                        op.clone(),
                    ));
                    stack_offset += 8;
                }
            }
        }

        for instr in &f.body {
            self.instr(instr);
        }

        Function {
            sym: f.sym,
            global: f.global,
            instructions: core::mem::take(&mut self.instrs),
            frame_size: 0,
            callee_saved: Vec::new(),
        }
    }

    fn instr(&mut self, instr: &tac::Instr) {
        use tac::Instr as I;
        match instr {
            I::Return(v) => self.lower_return(v),
            I::SignExtend { src, dst } => {
                let (s, d) = (self.operand(src), self.operand(dst));
                self.emit(Instruction::Movsx {
                    src_ty: self.value_asm_ty(src),
                    dst_ty: self.value_asm_ty(dst),
                    src: s,
                    dst: d,
                });
            }
            I::Truncate { src, dst } => {
                let ty = self.value_asm_ty(dst);
                let (s, d) = (self.operand(src), self.operand(dst));
                self.emit(Instruction::Mov(ty, s, d));
            }
            I::ZeroExtend { src, dst } => {
                let (s, d) = (self.operand(src), self.operand(dst));
                self.emit(Instruction::MovZeroExtend {
                    src_ty: self.value_asm_ty(src),
                    dst_ty: self.value_asm_ty(dst),
                    src: s,
                    dst: d,
                });
            }
            I::IntToDouble { src, dst } => self.int_to_double(src, dst),
            I::UIntToDouble { src, dst } => self.uint_to_double(src, dst),
            I::DoubleToInt { src, dst } => self.double_to_int(src, dst),
            I::DoubleToUInt { src, dst } => self.double_to_uint(src, dst),
            I::Unary { op, src, dst } => self.unary(*op, src, dst),
            I::Binary { op, lhs, rhs, dst } => self.binary(*op, lhs, rhs, dst),
            I::Copy { src, dst } => {
                let ty = self.value_asm_ty(src);
                let (s, d) = (self.operand(src), self.operand(dst));
                match ty {
                    AsmType::ByteArray { size, .. } => self.copy_bytes(s, d, size),
                    _ => self.emit(Instruction::Mov(ty, s, d)),
                }
            }
            I::GetAddress { src, dst } => {
                let s = self.sym_operand(*src, 0);
                let d = self.operand(dst);
                self.emit(Instruction::Lea(s, d));
            }
            I::Load { ptr, dst } => {
                let p = self.operand(ptr);
                self.emit(Instruction::Mov(
                    AsmType::Quadword,
                    p,
                    Operand::Reg(Reg::R9),
                ));
                let ty = self.value_asm_ty(dst);
                let d = self.operand(dst);
                match ty {
                    AsmType::ByteArray { size, .. } => {
                        self.copy_bytes(Operand::Memory(Reg::R9, 0), d, size);
                    }
                    _ => self.emit(Instruction::Mov(ty, Operand::Memory(Reg::R9, 0), d)),
                }
            }
            I::Store { src, ptr } => {
                let p = self.operand(ptr);
                self.emit(Instruction::Mov(
                    AsmType::Quadword,
                    p,
                    Operand::Reg(Reg::R9),
                ));
                let ty = self.value_asm_ty(src);
                let s = self.operand(src);
                match ty {
                    AsmType::ByteArray { size, .. } => {
                        self.copy_bytes(s, Operand::Memory(Reg::R9, 0), size);
                    }
                    _ => self.emit(Instruction::Mov(ty, s, Operand::Memory(Reg::R9, 0))),
                }
            }
            I::AddPtr {
                ptr,
                index,
                scale,
                dst,
            } => self.add_ptr(ptr, index, *scale, dst),
            I::CopyToOffset { src, dst, offset } => {
                let ty = self.value_asm_ty(src);
                let s = self.operand(src);
                let d = self.sym_operand(*dst, *offset as i64);
                match ty {
                    AsmType::ByteArray { size, .. } => self.copy_bytes(s, d, size),
                    _ => self.emit(Instruction::Mov(ty, s, d)),
                }
            }
            I::CopyFromOffset { src, offset, dst } => {
                let ty = self.value_asm_ty(dst);
                let s = self.sym_operand(*src, *offset as i64);
                let d = self.operand(dst);
                match ty {
                    AsmType::ByteArray { size, .. } => self.copy_bytes(s, d, size),
                    _ => self.emit(Instruction::Mov(ty, s, d)),
                }
            }
            I::Jump(l) => self.emit(Instruction::Jmp(*l)),
            I::JumpIfZero { cond, target } => self.cond_jump(cond, *target, true),
            I::JumpIfNotZero { cond, target } => self.cond_jump(cond, *target, false),
            I::Label(l) => self.emit(Instruction::Label(*l)),
            I::Call { f, args, dst } => self.call(*f, args, dst),
        }
    }

    fn lower_return(&mut self, v: &Option<Value>) {
        match (v, self.retptr) {
            (Some(v), Some(rp)) => {
                self.emit(Instruction::Mov(
                    AsmType::Quadword,
                    Operand::Pseudo(rp),
                    Operand::Reg(Reg::AX),
                ));
                let size = self.value_ty(v).size(self.types);
                let src = self.operand(v);
                self.copy_bytes(src, Operand::Memory(Reg::AX, 0), size);
            }
            (Some(v), None) => {
                let plan = self.classify_return_value(v);
                debug_assert!(!plan.in_memory);
                for (i, (ty, op)) in plan.int_pieces.iter().enumerate() {
                    let r = INT_RET_REGS[i];
                    match ty {
                        AsmType::ByteArray { size, .. } => {
                            self.copy_bytes_to_reg(op.clone(), *size, r);
                        }
                        _ => self.emit(Instruction::Mov(*ty, op.clone(), Operand::Reg(r))),
                    }
                }
                for (i, op) in plan.sse_pieces.iter().enumerate() {
                    self.emit(Instruction::Mov(
                        AsmType::Double,
                        op.clone(),
                        Operand::Reg(SSE_RET_REGS[i]),
                    ));
                }
            }
            (None, _) => {}
        }
        self.emit(Instruction::Ret);
    }

    fn cond_jump(&mut self, cond: &Value, target: Label, jump_if_zero: bool) {
        let ty = self.value_asm_ty(cond);
        if ty == AsmType::Double {
            let zero = self.double_constant(0, 8);
            let c = self.operand(cond);
            self.emit(Instruction::Cmp(AsmType::Double, zero, c));
            if jump_if_zero {
                // Unordered means nonzero: skip the jump on parity.
                let end = self.fresh_label();
                self.emit(Instruction::JmpCC(CondCode::P, end));
                self.emit(Instruction::JmpCC(CondCode::E, target));
                self.emit(Instruction::Label(end));
            } else {
                self.emit(Instruction::JmpCC(CondCode::P, target));
                self.emit(Instruction::JmpCC(CondCode::NE, target));
            }
        } else {
            let c = self.operand(cond);
            self.emit(Instruction::Test(ty, c.clone(), c));
            let cc = if jump_if_zero { CondCode::E } else { CondCode::NE };
            self.emit(Instruction::JmpCC(cc, target));
        }
    }

    fn unary(&mut self, op: tac::UnaryOp, src: &Value, dst: &Value) {
        let src_ty = self.value_asm_ty(src);
        match op {
            tac::UnaryOp::Not => {
                let d = self.operand(dst);
                if src_ty == AsmType::Double {
                    let zero = self.double_constant(0, 8);
                    let s = self.operand(src);
                    self.emit(Instruction::Cmp(AsmType::Double, zero, s));
                    self.emit(Instruction::Mov(AsmType::Longword, Operand::Imm(0), d.clone()));
                    // NaN is truthy: leave 0 on unordered.
                    let end = self.fresh_label();
                    self.emit(Instruction::JmpCC(CondCode::P, end));
                    self.emit(Instruction::SetCC(CondCode::E, d));
                    self.emit(Instruction::Label(end));
                } else {
                    let s = self.operand(src);
                    self.emit(Instruction::Test(src_ty, s.clone(), s));
                    self.emit(Instruction::Mov(AsmType::Longword, Operand::Imm(0), d.clone()));
                    self.emit(Instruction::SetCC(CondCode::E, d));
                }
            }
            tac::UnaryOp::Negate if src_ty == AsmType::Double => {
                let mask = self.double_constant((-0.0f64).to_bits(), 16);
                let (s, d) = (self.operand(src), self.operand(dst));
                self.emit(Instruction::Mov(AsmType::Double, s, d.clone()));
                self.emit(Instruction::Binary(BinaryOp::Xor, AsmType::Double, mask, d));
            }
            tac::UnaryOp::Negate | tac::UnaryOp::Complement => {
                let op = match op {
                    tac::UnaryOp::Negate => UnaryOp::Neg,
                    _ => UnaryOp::Not,
                };
                let (s, d) = (self.operand(src), self.operand(dst));
                self.emit(Instruction::Mov(src_ty, s, d.clone()));
                self.emit(Instruction::Unary(op, src_ty, d));
            }
        }
    }

    fn binary(&mut self, op: tac::BinaryOp, lhs: &Value, rhs: &Value, dst: &Value) {
        use tac::BinaryOp as B;
        let operand_ty = self.value_asm_ty(lhs);
        if op.is_comparison() {
            return self.comparison(op, lhs, rhs, dst);
        }
        match op {
            B::Divide | B::Remainder if operand_ty != AsmType::Double => {
                let signed = self.value_ty(lhs).is_signed();
                let (l, r) = (self.operand(lhs), self.operand(rhs));
                self.emit(Instruction::Mov(operand_ty, l, Operand::Reg(Reg::AX)));
                if signed {
                    self.emit(Instruction::Cdq(operand_ty));
                    self.emit(Instruction::Idiv(operand_ty, r));
                } else {
                    self.emit(Instruction::Mov(
                        operand_ty,
                        Operand::Imm(0),
                        Operand::Reg(Reg::DX),
                    ));
                    self.emit(Instruction::Div(operand_ty, r));
                }
                let result = if op == B::Divide { Reg::AX } else { Reg::DX };
                let d = self.operand(dst);
                self.emit(Instruction::Mov(operand_ty, Operand::Reg(result), d));
            }
            B::Divide => {
                // Double division.
                let (l, r, d) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
                self.emit(Instruction::Mov(AsmType::Double, l, d.clone()));
                self.emit(Instruction::Binary(
                    BinaryOp::DivDouble,
                    AsmType::Double,
                    r,
                    d,
                ));
            }
            B::ShiftLeft | B::ShiftRight => {
                let signed = self.value_ty(lhs).is_signed();
                let asm_op = match (op, signed) {
                    (B::ShiftLeft, _) => BinaryOp::Shl,
                    (B::ShiftRight, true) => BinaryOp::Sar,
                    (B::ShiftRight, false) => BinaryOp::Shr,
                    _ => unreachable!(),
                };
                let (l, d) = (self.operand(lhs), self.operand(dst));
                self.emit(Instruction::Mov(operand_ty, l, d.clone()));
                match self.operand(rhs) {
                    imm @ Operand::Imm(_) => {
                        self.emit(Instruction::Binary(asm_op, operand_ty, imm, d));
                    }
                    count => {
                        let count_ty = self.value_asm_ty(rhs);
                        self.emit(Instruction::Mov(count_ty, count, Operand::Reg(Reg::CX)));
                        self.emit(Instruction::Binary(
                            asm_op,
                            operand_ty,
                            Operand::Reg(Reg::CX),
                            d,
                        ));
                    }
                }
            }
            _ => {
                let asm_op = match op {
                    B::Add => BinaryOp::Add,
                    B::Subtract => BinaryOp::Sub,
                    B::Multiply => BinaryOp::Mult,
                    B::BitAnd => BinaryOp::And,
                    B::BitOr => BinaryOp::Or,
                    B::BitXor => BinaryOp::Xor,
                    _ => unreachable!(),
                };
                let (l, r, d) = (self.operand(lhs), self.operand(rhs), self.operand(dst));
                self.emit(Instruction::Mov(operand_ty, l, d.clone()));
                self.emit(Instruction::Binary(asm_op, operand_ty, r, d));
            }
        }
    }

    fn comparison(&mut self, op: tac::BinaryOp, lhs: &Value, rhs: &Value, dst: &Value) {
        use tac::BinaryOp as B;
        let operand_ty = self.value_asm_ty(lhs);
        let d = self.operand(dst);
        if operand_ty == AsmType::Double {
            // Ordered comparisons use the unsigned condition codes so an
            // unordered result (CF=ZF=1) reads as false; less-than swaps
            // operands to stay in the `A`/`AE` family.
            let (cmp_src, cmp_dst, cc) = match op {
                B::GreaterThan => (rhs, lhs, CondCode::A),
                B::GreaterOrEqual => (rhs, lhs, CondCode::AE),
                B::LessThan => (lhs, rhs, CondCode::A),
                B::LessOrEqual => (lhs, rhs, CondCode::AE),
                B::Equal => (rhs, lhs, CondCode::E),
                B::NotEqual => (rhs, lhs, CondCode::NE),
                _ => unreachable!(),
            };
            let (s, t) = (self.operand(cmp_src), self.operand(cmp_dst));
            self.emit(Instruction::Cmp(AsmType::Double, s, t));
            let init = if op == B::NotEqual { 1 } else { 0 };
            self.emit(Instruction::Mov(
                AsmType::Longword,
                Operand::Imm(init),
                d.clone(),
            ));
            match op {
                B::Equal | B::NotEqual => {
                    // On NaN the initial value already holds the answer.
                    let end = self.fresh_label();
                    self.emit(Instruction::JmpCC(CondCode::P, end));
                    self.emit(Instruction::SetCC(cc, d));
                    self.emit(Instruction::Label(end));
                }
                _ => self.emit(Instruction::SetCC(cc, d)),
            }
        } else {
            let signed = self.value_ty(lhs).is_signed();
            let cc = match (op, signed) {
                (B::Equal, _) => CondCode::E,
                (B::NotEqual, _) => CondCode::NE,
                (B::GreaterThan, true) => CondCode::G,
                (B::GreaterOrEqual, true) => CondCode::GE,
                (B::LessThan, true) => CondCode::L,
                (B::LessOrEqual, true) => CondCode::LE,
                (B::GreaterThan, false) => CondCode::A,
                (B::GreaterOrEqual, false) => CondCode::AE,
                (B::LessThan, false) => CondCode::B,
                (B::LessOrEqual, false) => CondCode::BE,
                _ => unreachable!(),
            };
            let (l, r) = (self.operand(lhs), self.operand(rhs));
            self.emit(Instruction::Cmp(operand_ty, r, l));
            self.emit(Instruction::Mov(AsmType::Longword, Operand::Imm(0), d.clone()));
            self.emit(Instruction::SetCC(cc, d));
        }
    }

    fn add_ptr(&mut self, ptr: &Value, index: &Value, scale: u64, dst: &Value) {
        let p = self.operand(ptr);
        self.emit(Instruction::Mov(
            AsmType::Quadword,
            p,
            Operand::Reg(Reg::R9),
        ));
        let d = self.operand(dst);
        if let Some(c) = index.as_constant() {
            let disp = c.as_wide_int() as i64 * scale as i64;
            self.emit(Instruction::Lea(Operand::Memory(Reg::R9, disp), d));
            return;
        }
        let i = self.operand(index);
        self.emit(Instruction::Mov(
            AsmType::Quadword,
            i,
            Operand::Reg(Reg::DX),
        ));
        let scale = if matches!(scale, 1 | 2 | 4 | 8) {
            scale
        } else {
            self.emit(Instruction::Binary(
                BinaryOp::Mult,
                AsmType::Quadword,
                Operand::Imm(scale as i64),
                Operand::Reg(Reg::DX),
            ));
            1
        };
        self.emit(Instruction::Lea(
            Operand::Indexed {
                base: Reg::R9,
                index: Reg::DX,
                scale,
            },
            d,
        ));
    }

    fn int_to_double(&mut self, src: &Value, dst: &Value) {
        let src_ty = self.value_asm_ty(src);
        let (s, d) = (self.operand(src), self.operand(dst));
        match src_ty {
            AsmType::Byte | AsmType::Word => {
                self.emit(Instruction::Movsx {
                    src_ty,
                    dst_ty: AsmType::Longword,
                    src: s,
                    dst: Operand::Reg(Reg::R10),
                });
                self.emit(Instruction::Cvtsi2sd(
                    AsmType::Longword,
                    Operand::Reg(Reg::R10),
                    d,
                ));
            }
            _ => self.emit(Instruction::Cvtsi2sd(src_ty, s, d)),
        }
    }

    fn uint_to_double(&mut self, src: &Value, dst: &Value) {
        let src_ty = self.value_asm_ty(src);
        let (s, d) = (self.operand(src), self.operand(dst));
        match src_ty {
            AsmType::Byte | AsmType::Word => {
                self.emit(Instruction::MovZeroExtend {
                    src_ty,
                    dst_ty: AsmType::Longword,
                    src: s,
                    dst: Operand::Reg(Reg::R10),
                });
                self.emit(Instruction::Cvtsi2sd(
                    AsmType::Longword,
                    Operand::Reg(Reg::R10),
                    d,
                ));
            }
            AsmType::Longword => {
                // Zero-extend to 64 bits; the value is then exact.
                self.emit(Instruction::MovZeroExtend {
                    src_ty: AsmType::Longword,
                    dst_ty: AsmType::Quadword,
                    src: s,
                    dst: Operand::Reg(Reg::R10),
                });
                self.emit(Instruction::Cvtsi2sd(
                    AsmType::Quadword,
                    Operand::Reg(Reg::R10),
                    d,
                ));
            }
            _ => {
                // 64-bit: values with the high bit set halve with a
                // round-to-odd sticky bit, convert, and double.
                let negative = self.fresh_label();
                let end = self.fresh_label();
                let t1 = Operand::Pseudo(self.make_temp(Type::ULong));
                let t2 = Operand::Pseudo(self.make_temp(Type::ULong));
                self.emit(Instruction::Cmp(AsmType::Quadword, Operand::Imm(0), s.clone()));
                self.emit(Instruction::JmpCC(CondCode::L, negative));
                self.emit(Instruction::Cvtsi2sd(AsmType::Quadword, s.clone(), d.clone()));
                self.emit(Instruction::Jmp(end));
                self.emit(Instruction::Label(negative));
                self.emit(Instruction::Mov(AsmType::Quadword, s.clone(), t1.clone()));
                self.emit(Instruction::Mov(AsmType::Quadword, t1.clone(), t2.clone()));
                self.emit(Instruction::Binary(
                    BinaryOp::Shr,
                    AsmType::Quadword,
                    Operand::Imm(1),
                    t2.clone(),
                ));
                self.emit(Instruction::Binary(
                    BinaryOp::And,
                    AsmType::Quadword,
                    Operand::Imm(1),
                    t1.clone(),
                ));
                self.emit(Instruction::Binary(
                    BinaryOp::Or,
                    AsmType::Quadword,
                    t1,
                    t2.clone(),
                ));
                self.emit(Instruction::Cvtsi2sd(AsmType::Quadword, t2, d.clone()));
                self.emit(Instruction::Binary(
                    BinaryOp::Add,
                    AsmType::Double,
                    d.clone(),
                    d,
                ));
                self.emit(Instruction::Label(end));
            }
        }
    }

    fn double_to_int(&mut self, src: &Value, dst: &Value) {
        let dst_ty = self.value_asm_ty(dst);
        let (s, d) = (self.operand(src), self.operand(dst));
        match dst_ty {
            AsmType::Byte | AsmType::Word => {
                self.emit(Instruction::Cvttsd2si(
                    AsmType::Longword,
                    s,
                    Operand::Reg(Reg::R10),
                ));
                self.emit(Instruction::Mov(dst_ty, Operand::Reg(Reg::R10), d));
            }
            _ => self.emit(Instruction::Cvttsd2si(dst_ty, s, d)),
        }
    }

    fn double_to_uint(&mut self, src: &Value, dst: &Value) {
        let dst_ty = self.value_asm_ty(dst);
        let (s, d) = (self.operand(src), self.operand(dst));
        match dst_ty {
            AsmType::Byte | AsmType::Word => {
                self.emit(Instruction::Cvttsd2si(
                    AsmType::Longword,
                    s,
                    Operand::Reg(Reg::R10),
                ));
                self.emit(Instruction::Mov(dst_ty, Operand::Reg(Reg::R10), d));
            }
            AsmType::Longword => {
                // Truncate through the 64-bit form.
                self.emit(Instruction::Cvttsd2si(
                    AsmType::Quadword,
                    s,
                    Operand::Reg(Reg::R10),
                ));
                self.emit(Instruction::Mov(AsmType::Longword, Operand::Reg(Reg::R10), d));
            }
            _ => {
                // Values at or above 2^63 convert after subtracting 2^63,
                // then add it back in the integer domain.
                let upper_bound = self.double_constant(9_223_372_036_854_775_808.0f64.to_bits(), 8);
                let out_of_range = self.fresh_label();
                let end = self.fresh_label();
                let tmp_d = Operand::Pseudo(self.make_temp(Type::Double));
                self.emit(Instruction::Cmp(
                    AsmType::Double,
                    upper_bound.clone(),
                    s.clone(),
                ));
                self.emit(Instruction::JmpCC(CondCode::AE, out_of_range));
                self.emit(Instruction::Cvttsd2si(AsmType::Quadword, s.clone(), d.clone()));
                self.emit(Instruction::Jmp(end));
                self.emit(Instruction::Label(out_of_range));
                self.emit(Instruction::Mov(AsmType::Double, s, tmp_d.clone()));
                self.emit(Instruction::Binary(
                    BinaryOp::Sub,
                    AsmType::Double,
                    upper_bound,
                    tmp_d.clone(),
                ));
                self.emit(Instruction::Cvttsd2si(AsmType::Quadword, tmp_d, d.clone()));
                self.emit(Instruction::Binary(
                    BinaryOp::Add,
                    AsmType::Quadword,
                    Operand::Imm(i64::MIN),
                    d,
                ));
                self.emit(Instruction::Label(end));
            }
        }
    }

    fn call(&mut self, f: Sym, args: &[Value], dst: &Option<Value>) {
        let ft = match self.symbols.ty(f) {
            Type::Function(ft) => (**ft).clone(),
            _ => panic!("call to non-function symbol"),
        };
        let ret_mem = abi::returns_in_memory(self.types, &ft.ret);
        let plan = self.classify_args(args, ret_mem);
        {
            let param_regs = self.param_regs_for(&plan, ret_mem);
            let return_regs = self.return_regs_for(&ft.ret, ret_mem);
            let e = self.asm_syms.fun_mut(f);
            e.returns_on_stack = ret_mem;
            e.param_regs = param_regs;
            e.return_regs = return_regs;
        }

        let stack_bytes = plan.stack_bytes();
        let padding = (16 - stack_bytes % 16) % 16;
        if padding > 0 {
            self.emit(Instruction::Binary(
                BinaryOp::Sub,
                AsmType::Quadword,
                Operand::Imm(padding as i64),
                Operand::Reg(Reg::SP),
            ));
        }

        if ret_mem {
            let d = dst.as_ref().expect("memory-returned call has a result");
            let d = self.operand(d);
            self.emit(Instruction::Lea(d, Operand::Reg(Reg::DI)));
        }
        let start = usize::from(ret_mem);
        for (i, (ty, op)) in plan.int_args.iter().enumerate() {
            let r = INT_ARG_REGS[start + i];
            match ty {
                AsmType::ByteArray { size, .. } => self.copy_bytes_to_reg(op.clone(), *size, r),
                _ => self.emit(Instruction::Mov(*ty, op.clone(), Operand::Reg(r))),
            }
        }
        for (i, op) in plan.sse_args.iter().enumerate() {
            self.emit(Instruction::Mov(
                AsmType::Double,
                op.clone(),
                Operand::Reg(SSE_ARG_REGS[i]),
            ));
        }
        for (ty, op) in plan.stack_args.iter().rev() {
            match ty {
                AsmType::ByteArray { size, .. } => {
                    let rounded = align_to(*size, 8);
                    self.emit(Instruction::Binary(
                        BinaryOp::Sub,
                        AsmType::Quadword,
                        Operand::Imm(rounded as i64),
                        Operand::Reg(Reg::SP),
                    ));
                    self.copy_bytes(op.clone(), Operand::Memory(Reg::SP, 0), *size);
                }
                AsmType::Quadword | AsmType::Double => {
                    self.emit(Instruction::Push(op.clone()));
                }
                _ => {
                    // Narrow stack arguments go through a register so the
                    // push never reads past a short object.
                    self.emit(Instruction::Mov(*ty, op.clone(), Operand::Reg(Reg::AX)));
                    self.emit(Instruction::Push(Operand::Reg(Reg::AX)));
                }
            }
        }

        self.emit(Instruction::Call(f));

        let to_free = stack_bytes + padding;
        if to_free > 0 {
            self.emit(Instruction::Binary(
                BinaryOp::Add,
                AsmType::Quadword,
                Operand::Imm(to_free as i64),
                Operand::Reg(Reg::SP),
            ));
        }

        if let Some(d) = dst {
            if !ret_mem {
                let plan = self.classify_return_value(d);
                for (i, (ty, op)) in plan.int_pieces.iter().enumerate() {
                    let r = INT_RET_REGS[i];
                    match ty {
                        AsmType::ByteArray { size, .. } => {
                            self.copy_bytes_from_reg(r, op.clone(), *size);
                        }
                        _ => self.emit(Instruction::Mov(*ty, Operand::Reg(r), op.clone())),
                    }
                }
                for (i, op) in plan.sse_pieces.iter().enumerate() {
                    self.emit(Instruction::Mov(
                        AsmType::Double,
                        Operand::Reg(SSE_RET_REGS[i]),
                        op.clone(),
                    ));
                }
            }
        }
    }
}
