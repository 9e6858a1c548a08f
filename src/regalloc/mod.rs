//! Register allocation by Chaitin–Briggs graph coloring.
//!
//! The general-purpose and SSE classes are colored independently. Each
//! round builds an interference graph from iterative liveness, runs
//! conservative Briggs/George coalescing over the move instructions, and
//! rebuilds until no coalesce applies; then the graph is colored with
//! optimistic spilling. Colored pseudoregisters become physical registers;
//! the rest (actual spills, aggregates, and address-taken locals) get
//! stack slots in a final rewrite, and the frame is sized so `%rsp` stays
//! 16-byte aligned at calls after the callee-saved pushes.

mod coloring;
mod graph;
mod liveness;

use crate::asm::symbols::AsmSymbols;
use crate::asm::{
    AsmType, Function, Instruction, Operand, Reg, GP_ALLOCATABLE, SSE_ALLOCATABLE,
};
use crate::fx::{FxHashMap, FxHashSet};
use crate::symbols::Sym;
use crate::types::align_to;

/// A node in the interference graph: a physical register or a scalar
/// pseudoregister.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub enum Loc {
    /// A physical register.
    Reg(Reg),
    /// A pseudoregister.
    Pseudo(Sym),
}

impl Loc {
    /// The location an operand reads or writes, if it is register-shaped.
    fn of_operand(op: &Operand) -> Option<Loc> {
        match op {
            Operand::Reg(r) => Some(Loc::Reg(*r)),
            Operand::Pseudo(s) => Some(Loc::Pseudo(*s)),
            _ => None,
        }
    }
}

/// The two register classes, allocated independently.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegClass {
    /// General-purpose registers.
    Gp,
    /// SSE registers.
    Sse,
}

impl RegClass {
    fn registers(self) -> &'static [Reg] {
        match self {
            RegClass::Gp => &GP_ALLOCATABLE,
            RegClass::Sse => &SSE_ALLOCATABLE,
        }
    }

    fn holds(self, ty: AsmType) -> bool {
        match self {
            RegClass::Gp => matches!(
                ty,
                AsmType::Byte | AsmType::Word | AsmType::Longword | AsmType::Quadword
            ),
            RegClass::Sse => ty == AsmType::Double,
        }
    }
}

/// Allocate registers in `func` and assign stack slots to what remains.
pub fn run(func: &mut Function, asm_syms: &AsmSymbols, aliased: &FxHashSet<Sym>) {
    for class in [RegClass::Gp, RegClass::Sse] {
        allocate_class(func, asm_syms, aliased, class);
    }
    collect_callee_saved(func);
    assign_stack_slots(func, asm_syms);
}

fn allocate_class(
    func: &mut Function,
    asm_syms: &AsmSymbols,
    aliased: &FxHashSet<Sym>,
    class: RegClass,
) {
    let k = class.registers().len();
    loop {
        let mut graph = graph::build(func, asm_syms, aliased, class);
        if graph.pseudo_count() == 0 {
            return;
        }
        let coalesced = coloring::coalesce(&mut graph, &func.instructions, k);
        if !coalesced.is_empty() {
            rewrite_coalesced(func, &coalesced);
            continue;
        }
        coloring::color(&mut graph, class.registers());

        // Map each color to its register through the precolored nodes, then
        // rewrite colored pseudos. Uncolored pseudos are real spills and
        // fall through to the stack-slot rewrite.
        let mut color_to_reg: FxHashMap<usize, Reg> = FxHashMap::default();
        for &r in class.registers() {
            if let Some(c) = graph.color_of(Loc::Reg(r)) {
                color_to_reg.insert(c, r);
            }
        }
        let mut assignment: FxHashMap<Sym, Reg> = FxHashMap::default();
        let mut spills = 0usize;
        for (loc, color) in graph.pseudo_colors() {
            let Loc::Pseudo(sym) = loc else { continue };
            match color {
                Some(c) => {
                    assignment.insert(sym, color_to_reg[&c]);
                }
                None => spills += 1,
            }
        }
        log::debug!(
            "allocated {} pseudos in class {class:?} ({spills} spilled)",
            assignment.len()
        );
        for instr in &mut func.instructions {
            for_each_operand(instr, |op| {
                if let Operand::Pseudo(s) = op {
                    if let Some(r) = assignment.get(s) {
                        *op = Operand::Reg(*r);
                    }
                }
            });
        }
        return;
    }
}

/// Apply a coalescing map: rewrite operands to their representatives and
/// drop moves that became `mov x, x`.
fn rewrite_coalesced(func: &mut Function, map: &FxHashMap<Loc, Loc>) {
    let mut resolve = |op: &mut Operand| {
        if let Some(loc) = Loc::of_operand(op) {
            if let Some(rep) = map.get(&loc) {
                *op = match rep {
                    Loc::Reg(r) => Operand::Reg(*r),
                    Loc::Pseudo(s) => Operand::Pseudo(*s),
                };
            }
        }
    };
    let old = core::mem::take(&mut func.instructions);
    for mut instr in old {
        for_each_operand(&mut instr, &mut resolve);
        if let Instruction::Mov(_, src, dst) = &instr {
            if src == dst {
                continue;
            }
        }
        func.instructions.push(instr);
    }
}

/// Visit every operand of an instruction.
pub(crate) fn for_each_operand(instr: &mut Instruction, mut f: impl FnMut(&mut Operand)) {
    use Instruction::*;
    match instr {
        Mov(_, a, b)
        | Movsx {
            src: a, dst: b, ..
        }
        | MovZeroExtend {
            src: a, dst: b, ..
        }
        | Lea(a, b)
        | Cvttsd2si(_, a, b)
        | Cvtsi2sd(_, a, b)
        | Binary(_, _, a, b)
        | Cmp(_, a, b)
        | Test(_, a, b) => {
            f(a);
            f(b);
        }
        Unary(_, _, a) | SetCC(_, a) | Idiv(_, a) | Div(_, a) | Push(a) => f(a),
        Pop(_) | Cdq(_) | Jmp(_) | JmpCC(..) | Label(_) | Call(_) | AllocateStack(_) | Ret => {}
    }
}

/// Record which callee-saved registers the function writes.
fn collect_callee_saved(func: &mut Function) {
    let mut used: Vec<Reg> = Vec::new();
    for instr in &mut func.instructions {
        let mut written: Vec<Reg> = Vec::new();
        {
            use Instruction::*;
            match instr {
                Mov(_, _, dst)
                | Movsx { dst, .. }
                | MovZeroExtend { dst, .. }
                | Lea(_, dst)
                | Cvttsd2si(_, _, dst)
                | Cvtsi2sd(_, _, dst)
                | Binary(_, _, _, dst)
                | Unary(_, _, dst)
                | SetCC(_, dst) => {
                    if let Operand::Reg(r) = dst {
                        written.push(*r);
                    }
                }
                Pop(r) => written.push(*r),
                _ => {}
            }
        }
        for r in written {
            if r.is_callee_saved() && !used.contains(&r) {
                used.push(r);
            }
        }
    }
    used.sort();
    func.callee_saved = used;
}

/// Give every remaining pseudoregister a stack slot and size the frame.
fn assign_stack_slots(func: &mut Function, asm_syms: &AsmSymbols) {
    let mut offsets: FxHashMap<Sym, i64> = FxHashMap::default();
    let mut frame: u64 = 0;
    let mut slot = |sym: Sym, frame: &mut u64, offsets: &mut FxHashMap<Sym, i64>| -> i64 {
        if let Some(off) = offsets.get(&sym) {
            return *off;
        }
        let ty = asm_syms.ty_of(sym);
        *frame = align_to(*frame + ty.size(), ty.alignment());
        let off = -(*frame as i64);
        offsets.insert(sym, off);
        off
    };
    for instr in &mut func.instructions {
        for_each_operand(instr, |op| match op {
            Operand::Pseudo(s) => {
                let off = slot(*s, &mut frame, &mut offsets);
                *op = Operand::Memory(Reg::BP, off);
            }
            Operand::PseudoMem(s, extra) => {
                let off = slot(*s, &mut frame, &mut offsets);
                *op = Operand::Memory(Reg::BP, off + *extra);
            }
            _ => {}
        });
    }
    // Round so that rsp is 16-byte aligned at calls once the prologue's
    // callee-saved pushes land.
    let mut frame = align_to(frame, 8);
    if (frame + 8 * func.callee_saved.len() as u64) % 16 != 0 {
        frame += 8;
    }
    func.frame_size = frame;
}
