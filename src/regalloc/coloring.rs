//! Graph simplification, selection, and conservative coalescing.
//!
//! Physical registers are precolored with their index in the class's
//! register order (caller-saved registers first, so selection prefers
//! them). Simplification repeatedly removes pseudo nodes of insignificant
//! degree; when none remains it optimistically removes the candidate with
//! the best spill metric, `(uses + defs) / degree`. Selection then pops
//! the stack, giving each node the lowest color its colored neighbors do
//! not use; a node with no free color is a real spill.
//!
//! Coalescing merges the two ends of a move when the Briggs test (the
//! merged node has fewer than K significant-degree neighbors) or, against
//! a physical register, the George test (every neighbor of the pseudo
//! either already interferes with the register or has insignificant
//! degree) guarantees the merge cannot turn a colorable graph uncolorable.

use super::graph::Graph;
use super::Loc;
use crate::asm::{Instruction, Reg};
use crate::fx::FxHashMap;
use crate::fx::FxHashSet;

/// Precolor the physical registers and color the pseudoregisters.
pub fn color(graph: &mut Graph, regs: &[Reg]) {
    let k = regs.len();
    for (i, &r) in regs.iter().enumerate() {
        if let Some(n) = graph.nodes.get_mut(&Loc::Reg(r)) {
            n.color = Some(i);
        }
    }

    let mut pseudos: Vec<Loc> = graph
        .nodes
        .keys()
        .filter(|l| matches!(l, Loc::Pseudo(_)))
        .copied()
        .collect();
    pseudos.sort();

    let mut stack: Vec<Loc> = Vec::new();
    loop {
        let remaining: Vec<Loc> = pseudos
            .iter()
            .filter(|l| !graph.nodes[*l].pruned)
            .copied()
            .collect();
        if remaining.is_empty() {
            break;
        }
        let next = match remaining.iter().find(|l| graph.degree(**l) < k) {
            Some(&l) => l,
            None => {
                // No low-degree node: optimistically remove the cheapest
                // spill candidate and keep going.
                *remaining
                    .iter()
                    .min_by(|a, b| {
                        let ma = spill_metric(graph, **a);
                        let mb = spill_metric(graph, **b);
                        ma.partial_cmp(&mb).expect("spill metrics are ordered")
                    })
                    .expect("a candidate remains")
            }
        };
        graph.nodes.get_mut(&next).expect("node exists").pruned = true;
        stack.push(next);
    }

    while let Some(loc) = stack.pop() {
        let used: FxHashSet<usize> = graph.nodes[&loc]
            .neighbors
            .iter()
            .filter_map(|n| graph.nodes.get(n).and_then(|node| node.color))
            .collect();
        let color = (0..k).find(|c| !used.contains(c));
        let node = graph.nodes.get_mut(&loc).expect("node exists");
        node.pruned = false;
        node.color = color;
    }
}

fn spill_metric(graph: &Graph, loc: Loc) -> f64 {
    let degree = graph.degree(loc).max(1) as f64;
    graph.nodes[&loc].weight / degree
}

/// Coalesce move-related nodes conservatively. Returns the map from dead
/// nodes to their representatives; empty when nothing coalesced.
pub fn coalesce(
    graph: &mut Graph,
    instructions: &[Instruction],
    k: usize,
) -> FxHashMap<Loc, Loc> {
    let mut parent: FxHashMap<Loc, Loc> = FxHashMap::default();
    let find = |parent: &FxHashMap<Loc, Loc>, mut l: Loc| -> Loc {
        while let Some(&p) = parent.get(&l) {
            l = p;
        }
        l
    };

    for instr in instructions {
        let Instruction::Mov(_, src, dst) = instr else {
            continue;
        };
        let (Some(s0), Some(d0)) = (Loc::of_operand(src), Loc::of_operand(dst)) else {
            continue;
        };
        let s = find(&parent, s0);
        let d = find(&parent, d0);
        if s == d || !graph.contains(s) || !graph.contains(d) || graph.interferes(s, d) {
            continue;
        }
        if matches!(s, Loc::Reg(_)) && matches!(d, Loc::Reg(_)) {
            continue;
        }
        let (kept, dying) = if matches!(d, Loc::Reg(_)) { (d, s) } else { (s, d) };
        let safe = briggs_test(graph, s, d, k)
            || match kept {
                Loc::Reg(_) => george_test(graph, kept, dying, k),
                Loc::Pseudo(_) => false,
            };
        if !safe {
            continue;
        }
        graph.merge(kept, dying);
        parent.insert(dying, kept);
    }

    // Flatten chains so callers can rewrite in one lookup.
    let keys: Vec<Loc> = parent.keys().copied().collect();
    let mut resolved = FxHashMap::default();
    for key in keys {
        resolved.insert(key, find(&parent, key));
    }
    resolved
}

/// Would the node merged from `a` and `b` still have fewer than `k`
/// significant-degree neighbors?
fn briggs_test(graph: &Graph, a: Loc, b: Loc, k: usize) -> bool {
    let mut significant = 0;
    let na = &graph.nodes[&a].neighbors;
    let nb = &graph.nodes[&b].neighbors;
    for &n in na.union(nb) {
        if n == a || n == b {
            continue;
        }
        let mut degree = graph.degree(n);
        if na.contains(&n) && nb.contains(&n) {
            // A shared neighbor loses one edge in the merge.
            degree -= 1;
        }
        if degree >= k {
            significant += 1;
        }
    }
    significant < k
}

/// Does every neighbor of `pseudo` already interfere with `hard` or have
/// insignificant degree?
fn george_test(graph: &Graph, hard: Loc, pseudo: Loc, k: usize) -> bool {
    graph.nodes[&pseudo]
        .neighbors
        .iter()
        .all(|&n| graph.interferes(n, hard) || graph.degree(n) < k)
}
