//! Unreachable-code elimination.
//!
//! Three cleanups over the CFG: drop blocks not reachable from entry, drop
//! trailing jumps whose every target is the next block in layout order, and
//! drop labels no remaining jump references. Constant folding rewrites
//! constant-condition jumps first, so this pass is what actually deletes the
//! arms they cut off.

use super::cfg::{Cfg, NodeId};
use crate::fx::FxHashSet;
use crate::tac::{Instr, Label};

/// Remove unreachable blocks, redundant jumps, and useless labels.
pub fn run(cfg: &mut Cfg<Instr>) {
    remove_unreachable_blocks(cfg);
    remove_redundant_jumps(cfg);
    remove_useless_labels(cfg);
}

fn remove_unreachable_blocks(cfg: &mut Cfg<Instr>) {
    let mut reachable = FxHashSet::default();
    let mut stack = vec![NodeId::Entry];
    while let Some(node) = stack.pop() {
        if !reachable.insert(node) {
            continue;
        }
        for &s in cfg.successors(node) {
            stack.push(s);
        }
    }
    for i in 0..cfg.blocks.len() {
        if !reachable.contains(&NodeId::Block(i)) {
            cfg.blocks[i].instrs.clear();
            cfg.blocks[i].succs.clear();
            cfg.blocks[i].preds.clear();
        }
    }
    // Prune edges from removed predecessors.
    for i in 0..cfg.blocks.len() {
        cfg.blocks[i]
            .preds
            .retain(|p| *p == NodeId::Entry || reachable.contains(p));
    }
}

/// The next block in layout order that still holds instructions, as a node.
fn next_live_block(cfg: &Cfg<Instr>, from: usize) -> NodeId {
    for j in from + 1..cfg.blocks.len() {
        if !cfg.blocks[j].instrs.is_empty() {
            return NodeId::Block(j);
        }
    }
    NodeId::Exit
}

fn remove_redundant_jumps(cfg: &mut Cfg<Instr>) {
    for i in 0..cfg.blocks.len() {
        if cfg.blocks[i].instrs.is_empty() {
            continue;
        }
        let next = next_live_block(cfg, i);
        let redundant = match cfg.blocks[i].instrs.last() {
            Some(Instr::Jump(_) | Instr::JumpIfZero { .. } | Instr::JumpIfNotZero { .. }) => {
                // A jump is redundant when every way out of this block lands
                // on the next block anyway. Condition operands are values,
                // so dropping a conditional jump loses no side effects.
                cfg.blocks[i].succs.iter().all(|&s| s == next)
            }
            _ => false,
        };
        if redundant {
            cfg.blocks[i].instrs.pop();
        }
    }
}

fn remove_useless_labels(cfg: &mut Cfg<Instr>) {
    let mut referenced: FxHashSet<Label> = FxHashSet::default();
    for b in &cfg.blocks {
        for instr in &b.instrs {
            match instr {
                Instr::Jump(l)
                | Instr::JumpIfZero { target: l, .. }
                | Instr::JumpIfNotZero { target: l, .. } => {
                    referenced.insert(*l);
                }
                _ => {}
            }
        }
    }
    for b in &mut cfg.blocks {
        b.instrs
            .retain(|i| !matches!(i, Instr::Label(l) if !referenced.contains(l)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::{Label, Value};
    use crate::types::Const;

    #[test]
    fn drops_code_after_jump() {
        let end = Label(0);
        let cfg_instrs = vec![
            Instr::Jump(end),
            // Unreachable arm.
            Instr::Return(Some(Value::Constant(Const::Int(1)))),
            Instr::Label(end),
            Instr::Return(Some(Value::Constant(Const::Int(2)))),
        ];
        let mut cfg = Cfg::build(cfg_instrs);
        run(&mut cfg);
        let out = cfg.to_instructions();
        assert_eq!(
            out,
            vec![Instr::Return(Some(Value::Constant(Const::Int(2))))]
        );
    }

    #[test]
    fn drops_jump_to_next_block() {
        let l = Label(3);
        let mut cfg = Cfg::build(vec![
            Instr::Jump(l),
            Instr::Label(l),
            Instr::Return(None),
        ]);
        run(&mut cfg);
        assert_eq!(cfg.to_instructions(), vec![Instr::Return(None)]);
    }
}
