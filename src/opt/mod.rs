//! The TAC optimizer.
//!
//! Four passes run over each function's control flow graph: constant
//! folding, unreachable-code elimination, copy propagation, and dead-store
//! elimination. The pipeline repeats all enabled passes until a full round
//! leaves the body unchanged; each pass is deterministic, so the loop
//! terminates at the first stable round.

pub mod cfg;

mod alias;
mod constant_fold;
mod copy_prop;
mod dead_store;
mod unreachable;

use crate::options::OptFlags;
use crate::symbols::SymbolTable;
use crate::tac::Function;
use cfg::Cfg;

/// Optimize `func` to a fixed point under the enabled passes.
pub fn optimize(func: &mut Function, symbols: &SymbolTable, flags: &OptFlags) {
    if !flags.any() || func.body.is_empty() {
        return;
    }
    let mut round = 0;
    loop {
        let before = func.body.clone();

        if flags.fold_constants {
            constant_fold::run(&mut func.body, symbols);
        }
        let aliased = alias::aliased_vars(&func.body, symbols);
        let mut graph = Cfg::build(core::mem::take(&mut func.body));
        if flags.eliminate_unreachable_code {
            unreachable::run(&mut graph);
        }
        if flags.propagate_copies {
            copy_prop::run(&mut graph, symbols, &aliased);
        }
        if flags.eliminate_dead_stores {
            dead_store::run(&mut graph, &aliased);
        }
        func.body = graph.to_instructions();

        round += 1;
        if func.body == before {
            log::debug!(
                "optimized {} to a fixed point in {round} round(s)",
                symbols.name(func.sym)
            );
            return;
        }
    }
}
