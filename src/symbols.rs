//! The symbol table.
//!
//! Every declared function, object, compiler temporary, and pooled literal
//! gets one entry, keyed by a [`Sym`] entity reference. The table is
//! populated during semantic analysis (user symbols) and by later stages
//! (temporaries and literal-pool constants, via the fresh-name generator it
//! owns); user entries are never modified once semantic analysis finishes.
//!
//! Cross-stage references always go through `Sym` rather than owned pointers,
//! so IRs stay cheap to clone and free of reference cycles.

use crate::error::SourceLoc;
use crate::fx::FxHashMap;
use crate::types::Type;
use core::fmt;
use cranelift_entity::{entity_impl, PrimaryMap};

/// An opaque reference to a symbol table entry.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Sym(u32);
entity_impl!(Sym, "sym");

/// One scalar piece of a static object's compile-time initializer, at an
/// implicit byte offset given by the sum of the preceding pieces' sizes.
#[derive(Clone, Debug, PartialEq)]
pub enum StaticInit {
    /// One byte, signed.
    Char(i8),
    /// One byte, unsigned.
    UChar(u8),
    /// Two bytes, signed.
    Short(i16),
    /// Two bytes, unsigned.
    UShort(u16),
    /// Four bytes, signed.
    Int(i32),
    /// Four bytes, unsigned.
    UInt(u32),
    /// Eight bytes, signed.
    Long(i64),
    /// Eight bytes, unsigned.
    ULong(u64),
    /// Eight bytes holding an IEEE binary64 value, emitted bit-exactly.
    Double(f64),
    /// A run of zero bytes of the given length.
    Zero(u64),
    /// The bytes of a string literal, optionally with a trailing NUL.
    String {
        /// Literal bytes, not including any terminator.
        bytes: Vec<u8>,
        /// Whether a NUL byte follows (dropped when a literal exactly fills
        /// a char array).
        null_terminated: bool,
    },
    /// The address of another static object.
    Pointer(Sym),
}

impl StaticInit {
    /// The number of bytes this piece occupies.
    pub fn size(&self) -> u64 {
        match self {
            StaticInit::Char(_) | StaticInit::UChar(_) => 1,
            StaticInit::Short(_) | StaticInit::UShort(_) => 2,
            StaticInit::Int(_) | StaticInit::UInt(_) => 4,
            StaticInit::Long(_) | StaticInit::ULong(_) => 8,
            StaticInit::Double(_) => 8,
            StaticInit::Pointer(_) => 8,
            StaticInit::Zero(n) => *n,
            StaticInit::String {
                bytes,
                null_terminated,
            } => bytes.len() as u64 + u64::from(*null_terminated),
        }
    }

    /// Is this piece all zero bytes?
    pub fn is_zero(&self) -> bool {
        match self {
            StaticInit::Char(v) => *v == 0,
            StaticInit::UChar(v) => *v == 0,
            StaticInit::Short(v) => *v == 0,
            StaticInit::UShort(v) => *v == 0,
            StaticInit::Int(v) => *v == 0,
            StaticInit::UInt(v) => *v == 0,
            StaticInit::Long(v) => *v == 0,
            StaticInit::ULong(v) => *v == 0,
            // -0.0 has a nonzero bit pattern, so compare bits, not values.
            StaticInit::Double(d) => d.to_bits() == 0,
            StaticInit::Zero(_) => true,
            StaticInit::String { .. } | StaticInit::Pointer(_) => false,
        }
    }
}

/// The initializer state of an object with static storage duration.
#[derive(Clone, Debug, PartialEq)]
pub enum InitValue {
    /// Defined with an explicit initializer.
    Initialized(Vec<StaticInit>),
    /// Declared without `extern` and without an initializer: defined as zero
    /// unless a later declaration initializes it.
    Tentative,
    /// Declared `extern` with no initializer: not defined here.
    None,
}

/// What kind of entity a symbol is, and the facts later stages need about it.
#[derive(Clone, Debug)]
pub enum Attrs {
    /// A function.
    Fun {
        /// Whether this translation unit contains its body.
        defined: bool,
        /// Whether the symbol has external linkage.
        global: bool,
    },
    /// An object with static storage duration.
    Static {
        /// Compile-time initializer state.
        init: InitValue,
        /// Whether the symbol has external linkage.
        global: bool,
    },
    /// A pooled literal (double constant or string), emitted into read-only
    /// data under a local label.
    Constant {
        /// The literal's value.
        init: StaticInit,
        /// Required alignment (16 for the SSE constants used as masks).
        alignment: u64,
    },
    /// An object with automatic storage duration, or a compiler temporary.
    Local,
}

/// A symbol table entry.
#[derive(Clone, Debug)]
pub struct SymbolData {
    /// Unique name. Objects with linkage keep their source spelling; scoped
    /// locals and temporaries carry a numbered suffix.
    pub name: String,
    /// The symbol's resolved type.
    pub ty: Type,
    /// Entity kind and storage facts.
    pub attrs: Attrs,
    /// Declaration site, for diagnostics.
    pub loc: SourceLoc,
}

impl SymbolData {
    /// Does this symbol name an object with static storage duration?
    pub fn is_static(&self) -> bool {
        matches!(self.attrs, Attrs::Static { .. } | Attrs::Constant { .. })
    }

    /// Does this symbol have external linkage?
    pub fn is_global(&self) -> bool {
        match self.attrs {
            Attrs::Fun { global, .. } | Attrs::Static { global, .. } => global,
            _ => false,
        }
    }
}

/// The process-wide symbol table and fresh-name generator.
#[derive(Default)]
pub struct SymbolTable {
    data: PrimaryMap<Sym, SymbolData>,
    next_tmp: u32,
    doubles: FxHashMap<(u64, u64), Sym>,
    strings: FxHashMap<Vec<u8>, Sym>,
}

impl SymbolTable {
    /// Create an empty symbol table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an entry, returning its key.
    pub fn add(&mut self, data: SymbolData) -> Sym {
        self.data.push(data)
    }

    /// Mint a unique suffixed name for a scoped declaration of `base`.
    pub fn unique_name(&mut self, base: &str) -> String {
        let n = self.next_tmp;
        self.next_tmp += 1;
        format!("{base}.{n}")
    }

    /// Create a fresh temporary of the given type.
    pub fn make_temp(&mut self, ty: Type) -> Sym {
        let name = self.unique_name("tmp");
        self.add(SymbolData {
            name,
            ty,
            attrs: Attrs::Local,
            loc: SourceLoc::default(),
        })
    }

    /// The pooled read-only constant holding `bits` as a double, at the given
    /// alignment. Constants are deduplicated by bit pattern and alignment.
    pub fn double_constant(&mut self, bits: u64, alignment: u64) -> Sym {
        if let Some(&sym) = self.doubles.get(&(bits, alignment)) {
            return sym;
        }
        let name = self.unique_name("dbl");
        let sym = self.add(SymbolData {
            name,
            ty: Type::Double,
            attrs: Attrs::Constant {
                init: StaticInit::Double(f64::from_bits(bits)),
                alignment,
            },
            loc: SourceLoc::default(),
        });
        self.doubles.insert((bits, alignment), sym);
        sym
    }

    /// The pooled read-only constant holding the NUL-terminated string
    /// literal `bytes`. Literals are deduplicated by value.
    pub fn string_constant(&mut self, bytes: &[u8]) -> Sym {
        if let Some(&sym) = self.strings.get(bytes) {
            return sym;
        }
        let name = self.unique_name("str");
        let ty = Type::Char.array_of(bytes.len() as u64 + 1);
        let sym = self.add(SymbolData {
            name,
            ty,
            attrs: Attrs::Constant {
                init: StaticInit::String {
                    bytes: bytes.to_vec(),
                    null_terminated: true,
                },
                alignment: 1,
            },
            loc: SourceLoc::default(),
        });
        self.strings.insert(bytes.to_vec(), sym);
        sym
    }

    /// Iterate over all entries.
    pub fn iter(&self) -> impl Iterator<Item = (Sym, &SymbolData)> {
        self.data.iter()
    }

    /// The type of `sym`.
    pub fn ty(&self, sym: Sym) -> &Type {
        &self.data[sym].ty
    }

    /// The unique name of `sym`.
    pub fn name(&self, sym: Sym) -> &str {
        &self.data[sym].name
    }
}

impl core::ops::Index<Sym> for SymbolTable {
    type Output = SymbolData;

    fn index(&self, sym: Sym) -> &SymbolData {
        &self.data[sym]
    }
}

impl core::ops::IndexMut<Sym> for SymbolTable {
    fn index_mut(&mut self, sym: Sym) -> &mut SymbolData {
        &mut self.data[sym]
    }
}

impl fmt::Debug for SymbolTable {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_map()
            .entries(self.data.iter().map(|(k, v)| (k, &v.name)))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temps_are_unique() {
        let mut table = SymbolTable::new();
        let a = table.make_temp(Type::Int);
        let b = table.make_temp(Type::Int);
        assert_ne!(a, b);
        assert_ne!(table.name(a), table.name(b));
        assert!(matches!(table[a].attrs, Attrs::Local));
    }

    #[test]
    fn literal_pools_deduplicate() {
        let mut table = SymbolTable::new();
        let a = table.double_constant((-0.0f64).to_bits(), 16);
        let b = table.double_constant((-0.0f64).to_bits(), 16);
        assert_eq!(a, b);
        // Same bits at a different alignment is a distinct constant.
        let c = table.double_constant((-0.0f64).to_bits(), 8);
        assert_ne!(a, c);

        let s1 = table.string_constant(b"hello");
        let s2 = table.string_constant(b"hello");
        let s3 = table.string_constant(b"world");
        assert_eq!(s1, s2);
        assert_ne!(s1, s3);
        assert_eq!(*table.ty(s1), Type::Char.array_of(6));
    }
}
