//! Flow-insensitive aliasing analysis.
//!
//! A variable is aliased if the program anywhere takes its address; a store
//! through any pointer may then modify it and a load may read it. Statics
//! are folded into the same set: their addresses can escape through static
//! pointer initializers and other translation units, so every pass that
//! must be conservative about memory treats them identically.

use crate::fx::FxHashSet;
use crate::symbols::{Sym, SymbolTable};
use crate::tac::Instr;

/// The set of variables the optimizer must assume reachable through memory.
pub fn aliased_vars(body: &[Instr], symbols: &SymbolTable) -> FxHashSet<Sym> {
    let mut set = FxHashSet::default();
    for (sym, data) in symbols.iter() {
        if data.is_static() {
            set.insert(sym);
        }
    }
    for instr in body {
        if let Instr::GetAddress { src, .. } = instr {
            set.insert(*src);
        }
    }
    set
}
