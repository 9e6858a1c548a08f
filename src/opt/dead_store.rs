//! Dead-store elimination.
//!
//! Backward liveness over variables; the meet is set union. At function
//! exit, every variable reachable through memory (aliased or static) is
//! live. A call makes its arguments and every memory-reachable variable
//! live; a load makes its pointer and every memory-reachable variable live.
//! An instruction whose destination is dead afterwards and which has no
//! side effects is deleted; stores through pointers, calls, and returns are
//! never dead.

use super::cfg::{Cfg, NodeId};
use crate::fx::FxHashSet;
use crate::symbols::Sym;
use crate::tac::{Instr, Value};

type Live = FxHashSet<Sym>;

/// Remove dead stores from `cfg`.
pub fn run(cfg: &mut Cfg<Instr>, aliased: &FxHashSet<Sym>) {
    let n = cfg.blocks.len();
    let mut live_in: Vec<Live> = vec![Live::default(); n];
    let mut live_out: Vec<Live> = vec![Live::default(); n];

    let mut changed = true;
    while changed {
        changed = false;
        for i in (0..n).rev() {
            let mut out = Live::default();
            for &s in cfg.successors(NodeId::Block(i)) {
                match s {
                    NodeId::Exit => out.extend(aliased.iter().copied()),
                    NodeId::Block(j) => out.extend(live_in[j].iter().copied()),
                    NodeId::Entry => {}
                }
            }
            let mut live = out.clone();
            for instr in cfg.blocks[i].instrs.iter().rev() {
                transfer(instr, &mut live, aliased);
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

    for i in 0..n {
        let mut live = live_out[i].clone();
        let instrs = core::mem::take(&mut cfg.blocks[i].instrs);
        let mut kept_rev = Vec::with_capacity(instrs.len());
        for instr in instrs.into_iter().rev() {
            if is_dead(&instr, &live) {
                continue;
            }
            transfer(&instr, &mut live, aliased);
            kept_rev.push(instr);
        }
        kept_rev.reverse();
        cfg.blocks[i].instrs = kept_rev;
    }
}

/// Is this instruction a side-effect-free write to a dead variable?
fn is_dead(instr: &Instr, live: &Live) -> bool {
    match instr {
        // Calls, stores through pointers, returns, and control flow are
        // never dead.
        Instr::Call { .. }
        | Instr::Store { .. }
        | Instr::Return(_)
        | Instr::Jump(_)
        | Instr::JumpIfZero { .. }
        | Instr::JumpIfNotZero { .. }
        | Instr::Label(_) => false,
        Instr::CopyToOffset { dst, .. } => !live.contains(dst),
        other => match other.dst() {
            Some(Value::Var(d)) => !live.contains(d),
            _ => false,
        },
    }
}

fn gen_value(v: &Value, live: &mut Live) {
    if let Value::Var(s) = v {
        live.insert(*s);
    }
}

fn transfer(instr: &Instr, live: &mut Live, aliased: &FxHashSet<Sym>) {
    // Kill the definition first, then generate the uses.
    match instr {
        Instr::CopyToOffset { .. } => {
            // A partial write does not kill the whole aggregate.
        }
        other => {
            if let Some(Value::Var(d)) = other.dst() {
                live.remove(d);
            }
        }
    }
    use Instr::*;
    match instr {
        Return(Some(v)) => gen_value(v, live),
        Return(None) | Jump(_) | Label(_) => {}
        SignExtend { src, .. }
        | Truncate { src, .. }
        | ZeroExtend { src, .. }
        | DoubleToInt { src, .. }
        | DoubleToUInt { src, .. }
        | IntToDouble { src, .. }
        | UIntToDouble { src, .. }
        | Unary { src, .. }
        | Copy { src, .. }
        | CopyToOffset { src, .. } => gen_value(src, live),
        Binary { lhs, rhs, .. } => {
            gen_value(lhs, live);
            gen_value(rhs, live);
        }
        GetAddress { .. } => {}
        Load { ptr, .. } => {
            gen_value(ptr, live);
            live.extend(aliased.iter().copied());
        }
        Store { src, ptr } => {
            gen_value(src, live);
            gen_value(ptr, live);
        }
        AddPtr { ptr, index, .. } => {
            gen_value(ptr, live);
            gen_value(index, live);
        }
        CopyFromOffset { src, .. } => {
            live.insert(*src);
        }
        JumpIfZero { cond, .. } | JumpIfNotZero { cond, .. } => gen_value(cond, live),
        Call { args, .. } => {
            for a in args {
                gen_value(a, live);
            }
            live.extend(aliased.iter().copied());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::symbols::SymbolTable;
    use crate::tac::BinaryOp;
    use crate::types::{Const, Type};

    #[test]
    fn dead_arithmetic_removed() {
        let mut symbols = SymbolTable::new();
        let x = symbols.make_temp(Type::Int);
        let mut cfg = Cfg::build(vec![
            Instr::Copy {
                src: Value::Constant(Const::Int(10)),
                dst: Value::Var(x),
            },
            Instr::Binary {
                op: BinaryOp::Add,
                lhs: Value::Var(x),
                rhs: Value::Constant(Const::Int(1)),
                dst: Value::Var(x),
            },
            Instr::Return(Some(Value::Constant(Const::Int(5)))),
        ]);
        run(&mut cfg, &FxHashSet::default());
        assert_eq!(
            cfg.to_instructions(),
            vec![Instr::Return(Some(Value::Constant(Const::Int(5))))]
        );
    }

    #[test]
    fn stores_to_aliased_vars_survive() {
        let mut symbols = SymbolTable::new();
        let x = symbols.make_temp(Type::Int);
        let mut aliased = FxHashSet::default();
        aliased.insert(x);
        let body = vec![
            Instr::Copy {
                src: Value::Constant(Const::Int(1)),
                dst: Value::Var(x),
            },
            Instr::Return(None),
        ];
        let mut cfg = Cfg::build(body.clone());
        run(&mut cfg, &aliased);
        assert_eq!(cfg.to_instructions(), body);
    }

    #[test]
    fn loads_keep_aliased_stores_alive() {
        let mut symbols = SymbolTable::new();
        let x = symbols.make_temp(Type::Int);
        let p = symbols.make_temp(Type::Int.pointer_to());
        let v = symbols.make_temp(Type::Int);
        let mut aliased = FxHashSet::default();
        aliased.insert(x);
        let body = vec![
            Instr::Copy {
                src: Value::Constant(Const::Int(7)),
                dst: Value::Var(x),
            },
            Instr::GetAddress {
                src: x,
                dst: Value::Var(p),
            },
            Instr::Load {
                ptr: Value::Var(p),
                dst: Value::Var(v),
            },
            Instr::Return(Some(Value::Var(v))),
        ];
        let mut cfg = Cfg::build(body.clone());
        run(&mut cfg, &aliased);
        assert_eq!(cfg.to_instructions(), body);
    }
}
