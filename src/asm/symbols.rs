//! Backend symbol information.
//!
//! A side table keyed by [`Sym`] that the register allocator, fixup pass,
//! and emitter consult: the assembly type and storage of every object, and
//! the register footprint of every function (which argument registers its
//! calls load, and which registers its return value arrives in).

use super::{AsmType, Reg};
use crate::fx::FxHashMap;
use crate::symbols::Sym;

/// What the backend knows about one object symbol.
#[derive(Clone, Debug)]
pub struct ObjInfo {
    /// The object's assembly type.
    pub ty: AsmType,
    /// Whether it has static storage (emitted as a label, not a slot).
    pub is_static: bool,
    /// Whether it is a pooled read-only literal.
    pub is_constant: bool,
}

/// What the backend knows about one function symbol.
#[derive(Clone, Debug, Default)]
pub struct FunInfo {
    /// Whether this translation unit defines it.
    pub defined: bool,
    /// Whether its return value travels through a hidden pointer.
    pub returns_on_stack: bool,
    /// The registers loaded with arguments at a call to it (including the
    /// hidden return pointer in `%rdi` when applicable).
    pub param_regs: Vec<Reg>,
    /// The registers its return value occupies.
    pub return_regs: Vec<Reg>,
}

/// One backend symbol entry.
#[derive(Clone, Debug)]
pub enum AsmEntry {
    /// An object.
    Obj(ObjInfo),
    /// A function.
    Fun(FunInfo),
}

/// The backend symbol table.
#[derive(Default)]
pub struct AsmSymbols {
    map: FxHashMap<Sym, AsmEntry>,
}

impl AsmSymbols {
    /// Create an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an object.
    pub fn add_obj(&mut self, sym: Sym, ty: AsmType, is_static: bool, is_constant: bool) {
        self.map.insert(
            sym,
            AsmEntry::Obj(ObjInfo {
                ty,
                is_static,
                is_constant,
            }),
        );
    }

    /// Record a function (or return the existing record).
    pub fn fun_mut(&mut self, sym: Sym) -> &mut FunInfo {
        let entry = self
            .map
            .entry(sym)
            .or_insert_with(|| AsmEntry::Fun(FunInfo::default()));
        match entry {
            AsmEntry::Fun(f) => f,
            AsmEntry::Obj(_) => panic!("object symbol used as a function"),
        }
    }

    /// The function record for `sym`, if it is one.
    pub fn fun(&self, sym: Sym) -> Option<&FunInfo> {
        match self.map.get(&sym) {
            Some(AsmEntry::Fun(f)) => Some(f),
            _ => None,
        }
    }

    /// The object record for `sym`.
    pub fn obj(&self, sym: Sym) -> &ObjInfo {
        match self.map.get(&sym) {
            Some(AsmEntry::Obj(o)) => o,
            _ => panic!("missing backend entry for object symbol"),
        }
    }

    /// The assembly type of object `sym`.
    pub fn ty_of(&self, sym: Sym) -> AsmType {
        self.obj(sym).ty
    }
}
