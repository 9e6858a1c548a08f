//! Fast hash maps and sets keyed by the `rustc-hash` hasher.
//!
//! Compiler workloads hash small keys (entity references, short strings) in
//! hot loops, where the default SipHash is measurably slower.

pub use rustc_hash::{FxHashMap, FxHashSet};
