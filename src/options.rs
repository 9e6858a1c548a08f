//! Compilation options.

use target_lexicon::Triple;

/// Which optimizer passes run. Any combination is sound; the pipeline
/// produces observably identical programs with or without them.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct OptFlags {
    /// Evaluate instructions with constant operands.
    pub fold_constants: bool,
    /// Delete blocks unreachable from function entry, redundant jumps, and
    /// unreferenced labels.
    pub eliminate_unreachable_code: bool,
    /// Forward copies to their uses.
    pub propagate_copies: bool,
    /// Delete side-effect-free writes to dead variables.
    pub eliminate_dead_stores: bool,
}

impl OptFlags {
    /// Every pass enabled.
    pub fn all() -> Self {
        Self {
            fold_constants: true,
            eliminate_unreachable_code: true,
            propagate_copies: true,
            eliminate_dead_stores: true,
        }
    }

    /// No passes enabled.
    pub fn none() -> Self {
        Self {
            fold_constants: false,
            eliminate_unreachable_code: false,
            propagate_copies: false,
            eliminate_dead_stores: false,
        }
    }

    /// Is any pass enabled?
    pub fn any(&self) -> bool {
        self.fold_constants
            || self.eliminate_unreachable_code
            || self.propagate_copies
            || self.eliminate_dead_stores
    }
}

impl Default for OptFlags {
    fn default() -> Self {
        Self::all()
    }
}

/// Options for one compilation.
#[derive(Clone, Debug)]
pub struct Options {
    /// The target triple. Only x86-64 Linux and macOS are accepted; they
    /// differ in symbol decoration, not ABI.
    pub target: Triple,
    /// Optimizer pass selection.
    pub opt: OptFlags,
}

impl Options {
    /// Options for the given target with all optimizations on.
    pub fn new(target: Triple) -> Self {
        Self {
            target,
            opt: OptFlags::all(),
        }
    }

    /// Options for the host target.
    pub fn host() -> Self {
        Self::new(Triple::host())
    }
}
