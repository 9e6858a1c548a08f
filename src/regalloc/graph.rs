//! The interference graph.
//!
//! Nodes are the allocatable physical registers of one class plus every
//! eligible pseudoregister of that class (scalar, non-static, and not
//! address-taken). An instruction's written locations interfere with every
//! location live after it, except that the two sides of a `mov` do not
//! interfere with each other through that `mov` alone.

use super::liveness::{self, used_written};
use super::{Loc, RegClass};
use crate::asm::symbols::AsmSymbols;
use crate::asm::{Function, Instruction, Operand};
use crate::fx::{FxHashMap, FxHashSet};
use crate::opt::cfg::Cfg;
use crate::symbols::Sym;

/// One node's state.
pub struct Node {
    /// Adjacent nodes.
    pub neighbors: FxHashSet<Loc>,
    /// `(uses + defs) / degree` is the spill metric; this is the numerator.
    pub weight: f64,
    /// Assigned color, when selected (physical registers are precolored).
    pub color: Option<usize>,
    /// Removed from the graph during simplification.
    pub pruned: bool,
}

/// The interference graph for one register class.
pub struct Graph {
    /// All nodes, keyed by location.
    pub nodes: FxHashMap<Loc, Node>,
}

impl Graph {
    /// Number of pseudoregister nodes.
    pub fn pseudo_count(&self) -> usize {
        self.nodes
            .keys()
            .filter(|l| matches!(l, Loc::Pseudo(_)))
            .count()
    }

    /// Is `loc` a node?
    pub fn contains(&self, loc: Loc) -> bool {
        self.nodes.contains_key(&loc)
    }

    /// Do two nodes interfere?
    pub fn interferes(&self, a: Loc, b: Loc) -> bool {
        self.nodes
            .get(&a)
            .map(|n| n.neighbors.contains(&b))
            .unwrap_or(false)
    }

    /// Unpruned degree of `loc`.
    pub fn degree(&self, loc: Loc) -> usize {
        self.nodes[&loc]
            .neighbors
            .iter()
            .filter(|n| !self.nodes[*n].pruned)
            .count()
    }

    /// The color assigned to `loc`, if any.
    pub fn color_of(&self, loc: Loc) -> Option<usize> {
        self.nodes.get(&loc).and_then(|n| n.color)
    }

    /// Colors of pseudoregister nodes, after selection.
    pub fn pseudo_colors(&self) -> impl Iterator<Item = (Loc, Option<usize>)> + '_ {
        self.nodes
            .iter()
            .filter(|(l, _)| matches!(l, Loc::Pseudo(_)))
            .map(|(l, n)| (*l, n.color))
    }

    pub fn add_edge(&mut self, a: Loc, b: Loc) {
        if a == b {
            return;
        }
        if !self.contains(a) || !self.contains(b) {
            return;
        }
        self.nodes.get_mut(&a).unwrap().neighbors.insert(b);
        self.nodes.get_mut(&b).unwrap().neighbors.insert(a);
    }

    /// Merge `dying` into `kept`: union the adjacency and drop the node.
    pub fn merge(&mut self, kept: Loc, dying: Loc) {
        let dead = self.nodes.remove(&dying).expect("merged node exists");
        for n in dead.neighbors {
            if let Some(node) = self.nodes.get_mut(&n) {
                node.neighbors.remove(&dying);
            }
            self.add_edge(kept, n);
        }
        if let Some(node) = self.nodes.get_mut(&kept) {
            node.weight += dead.weight;
        }
    }
}

/// Build the interference graph for `func` in the given class.
pub fn build(
    func: &Function,
    asm_syms: &AsmSymbols,
    aliased: &FxHashSet<Sym>,
    class: RegClass,
) -> Graph {
    let mut graph = Graph {
        nodes: FxHashMap::default(),
    };
    // Physical registers of the class, pairwise interfering.
    for &r in class.registers() {
        graph.nodes.insert(
            Loc::Reg(r),
            Node {
                neighbors: FxHashSet::default(),
                weight: f64::INFINITY,
                color: None,
                pruned: false,
            },
        );
    }
    let regs: Vec<Loc> = class.registers().iter().map(|r| Loc::Reg(*r)).collect();
    for (i, &a) in regs.iter().enumerate() {
        for &b in &regs[i + 1..] {
            graph.add_edge(a, b);
        }
    }

    // Eligible pseudoregisters, weighted by use/def counts.
    let eligible = |sym: Sym| -> bool {
        let info = asm_syms.obj(sym);
        !info.is_static && !aliased.contains(&sym) && class.holds(info.ty)
    };
    for instr in &func.instructions {
        let mut clone = instr.clone();
        super::for_each_operand(&mut clone, |op| {
            if let Operand::Pseudo(s) = op {
                if eligible(*s) {
                    graph
                        .nodes
                        .entry(Loc::Pseudo(*s))
                        .or_insert_with(|| Node {
                            neighbors: FxHashSet::default(),
                            weight: 0.0,
                            color: None,
                            pruned: false,
                        })
                        .weight += 1.0;
                }
            }
        });
    }

    // Interference from liveness: each written location conflicts with
    // everything live after the instruction, minus the move-source
    // exemption.
    let return_regs = asm_syms
        .fun(func.sym)
        .map(|f| f.return_regs.clone())
        .unwrap_or_default();
    let cfg: Cfg<Instruction> = Cfg::build(func.instructions.clone());
    let live_out = liveness::live_out_sets(&cfg, asm_syms, &return_regs);
    for (i, block) in cfg.blocks.iter().enumerate() {
        let mut live = live_out[i].clone();
        for instr in block.instrs.iter().rev() {
            let (used, written) = used_written(instr, asm_syms, &return_regs);
            let move_src = match instr {
                Instruction::Mov(_, src, _) => Loc::of_operand(src),
                _ => None,
            };
            for &w in &written {
                if !graph.contains(w) {
                    continue;
                }
                for &l in &live {
                    if Some(l) == move_src || l == w {
                        continue;
                    }
                    graph.add_edge(w, l);
                }
            }
            for w in &written {
                live.remove(w);
            }
            for u in used {
                live.insert(u);
            }
        }
    }
    graph
}
