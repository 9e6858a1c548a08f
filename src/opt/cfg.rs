//! A control flow graph over a flat instruction sequence, with mappings from
//! basic blocks to their predecessors and successors.
//!
//! The graph is generic over the instruction type: the optimizer builds it
//! over TAC and the register allocator builds it over abstract assembly for
//! liveness, so both share one partition-and-edge algorithm. An instruction
//! type describes its control behavior through the [`Branching`] trait.
//!
//! Two synthetic nodes, `Entry` and `Exit`, bracket the block list; dataflow
//! boundary conditions attach there.

use crate::fx::FxHashMap;
use crate::tac::Label;

/// How an instruction participates in control flow.
pub enum BranchInfo {
    /// Control continues to the next instruction.
    Fallthrough,
    /// An unconditional jump to a label.
    Unconditional(Label),
    /// A conditional jump: to the label, or through to the next instruction.
    Conditional(Label),
    /// A return: control leaves the function.
    Terminator,
}

/// Implemented by instruction types a CFG can be built over.
pub trait Branching {
    /// The label this instruction defines, if it is a label marker.
    fn label(&self) -> Option<Label>;
    /// This instruction's control behavior.
    fn branch(&self) -> BranchInfo;
}

/// A node in the graph: the synthetic entry, a numbered block, or the
/// synthetic exit.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum NodeId {
    /// Before the first block.
    Entry,
    /// The block at this index.
    Block(usize),
    /// After every return.
    Exit,
}

/// A basic block: a maximal straight-line instruction run.
pub struct BasicBlock<I> {
    /// Instructions in order. May become empty as passes delete code.
    pub instrs: Vec<I>,
    /// Predecessor nodes.
    pub preds: Vec<NodeId>,
    /// Successor nodes.
    pub succs: Vec<NodeId>,
}

/// The control flow graph.
pub struct Cfg<I> {
    /// Blocks in layout order.
    pub blocks: Vec<BasicBlock<I>>,
    /// Successors of the entry node (the first block, when there is one).
    pub entry_succs: Vec<NodeId>,
}

impl<I: Branching> Cfg<I> {
    /// Partition `instrs` into basic blocks and compute the edges.
    ///
    /// Leaders are the first instruction, every label, and every instruction
    /// following a jump or return.
    pub fn build(instrs: Vec<I>) -> Self {
        let mut blocks: Vec<BasicBlock<I>> = Vec::new();
        let mut current: Vec<I> = Vec::new();
        for instr in instrs {
            if instr.label().is_some() && !current.is_empty() {
                blocks.push(BasicBlock {
                    instrs: core::mem::take(&mut current),
                    preds: Vec::new(),
                    succs: Vec::new(),
                });
            }
            let ends_block = !matches!(instr.branch(), BranchInfo::Fallthrough);
            current.push(instr);
            if ends_block {
                blocks.push(BasicBlock {
                    instrs: core::mem::take(&mut current),
                    preds: Vec::new(),
                    succs: Vec::new(),
                });
            }
        }
        if !current.is_empty() {
            blocks.push(BasicBlock {
                instrs: current,
                preds: Vec::new(),
                succs: Vec::new(),
            });
        }

        let mut label_blocks = FxHashMap::default();
        for (i, b) in blocks.iter().enumerate() {
            if let Some(l) = b.instrs.first().and_then(|ins| ins.label()) {
                label_blocks.insert(l, i);
            }
        }

        let mut cfg = Cfg {
            blocks,
            entry_succs: Vec::new(),
        };
        if cfg.blocks.is_empty() {
            cfg.entry_succs.push(NodeId::Exit);
            return cfg;
        }
        cfg.add_edge(NodeId::Entry, NodeId::Block(0));
        for i in 0..cfg.blocks.len() {
            let next = if i + 1 < cfg.blocks.len() {
                NodeId::Block(i + 1)
            } else {
                NodeId::Exit
            };
            let branch = match cfg.blocks[i].instrs.last() {
                Some(last) => last.branch(),
                None => BranchInfo::Fallthrough,
            };
            match branch {
                BranchInfo::Fallthrough => cfg.add_edge(NodeId::Block(i), next),
                BranchInfo::Unconditional(l) => {
                    let t = NodeId::Block(label_blocks[&l]);
                    cfg.add_edge(NodeId::Block(i), t);
                }
                BranchInfo::Conditional(l) => {
                    let t = NodeId::Block(label_blocks[&l]);
                    cfg.add_edge(NodeId::Block(i), t);
                    cfg.add_edge(NodeId::Block(i), next);
                }
                BranchInfo::Terminator => cfg.add_edge(NodeId::Block(i), NodeId::Exit),
            }
        }
        cfg
    }

    /// Flatten the graph back into an instruction sequence, dropping emptied
    /// blocks.
    pub fn to_instructions(self) -> Vec<I> {
        let mut out = Vec::new();
        for b in self.blocks {
            out.extend(b.instrs);
        }
        out
    }

    /// Successors of `node`.
    pub fn successors(&self, node: NodeId) -> &[NodeId] {
        match node {
            NodeId::Entry => &self.entry_succs,
            NodeId::Block(i) => &self.blocks[i].succs,
            NodeId::Exit => &[],
        }
    }

    /// Predecessors of `node`. The entry has none; exit predecessors are not
    /// tracked (no pass needs them).
    pub fn predecessors(&self, node: NodeId) -> &[NodeId] {
        match node {
            NodeId::Block(i) => &self.blocks[i].preds,
            _ => &[],
        }
    }

    fn add_edge(&mut self, from: NodeId, to: NodeId) {
        let succs = match from {
            NodeId::Entry => &mut self.entry_succs,
            NodeId::Block(i) => &mut self.blocks[i].succs,
            NodeId::Exit => return,
        };
        if !succs.contains(&to) {
            succs.push(to);
        }
        if let NodeId::Block(i) = to {
            if !self.blocks[i].preds.contains(&from) {
                self.blocks[i].preds.push(from);
            }
        }
    }
}

impl Branching for crate::tac::Instr {
    fn label(&self) -> Option<Label> {
        match self {
            crate::tac::Instr::Label(l) => Some(*l),
            _ => None,
        }
    }

    fn branch(&self) -> BranchInfo {
        use crate::tac::Instr::*;
        match self {
            Jump(l) => BranchInfo::Unconditional(*l),
            JumpIfZero { target, .. } | JumpIfNotZero { target, .. } => {
                BranchInfo::Conditional(*target)
            }
            Return(_) => BranchInfo::Terminator,
            _ => BranchInfo::Fallthrough,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::{Instr, Label, Value};
    use crate::types::Const;

    fn jump_if_zero(target: Label) -> Instr {
        Instr::JumpIfZero {
            cond: Value::Constant(Const::Int(1)),
            target,
        }
    }

    #[test]
    fn straight_line() {
        let cfg = Cfg::build(vec![Instr::Return(None)]);
        assert_eq!(cfg.blocks.len(), 1);
        assert_eq!(cfg.entry_succs, vec![NodeId::Block(0)]);
        assert_eq!(cfg.blocks[0].succs, vec![NodeId::Exit]);
    }

    #[test]
    fn diamond() {
        let (else_l, end) = (Label(0), Label(1));
        let cfg = Cfg::build(vec![
            jump_if_zero(else_l),             // block 0
            Instr::Jump(end),                 // block 1
            Instr::Label(else_l),             // block 2
            Instr::Label(end),                // block 3
            Instr::Return(None),
        ]);
        assert_eq!(cfg.blocks.len(), 4);
        assert_eq!(
            cfg.blocks[0].succs,
            vec![NodeId::Block(2), NodeId::Block(1)]
        );
        assert_eq!(cfg.blocks[1].succs, vec![NodeId::Block(3)]);
        assert_eq!(cfg.blocks[2].succs, vec![NodeId::Block(3)]);
        assert_eq!(
            cfg.blocks[3].preds,
            vec![NodeId::Block(1), NodeId::Block(2)]
        );
        // Label(end) and Return fall into one block that reaches Exit.
        assert_eq!(cfg.blocks[3].succs, vec![NodeId::Exit]);
    }

    #[test]
    fn round_trips() {
        let l = Label(7);
        let instrs = vec![
            Instr::Jump(l),
            Instr::Label(l),
            Instr::Return(Some(Value::Constant(Const::Int(3)))),
        ];
        let cfg = Cfg::build(instrs.clone());
        assert_eq!(cfg.to_instructions(), instrs);
    }
}
