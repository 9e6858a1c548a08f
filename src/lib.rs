//! Core compilation pipeline for a small C compiler targeting x86-64
//! System V.
//!
//! The crate consumes the untyped AST an external parser produces (see
//! [`ast`]) and emits text assembly. The pipeline runs in fixed stages:
//! semantic analysis ([`sema`]) builds the typed AST plus the symbol and
//! type tables; [`tac`] lowers to three-address code; [`opt`] runs constant
//! folding, unreachable-code elimination, copy propagation, and dead-store
//! elimination to a fixed point; [`asm`] lowers to abstract x86-64 under
//! the System V calling convention; [`regalloc`] colors pseudoregisters
//! with Chaitin–Briggs graph coloring; [`fixup`] legalizes what the
//! hardware won't encode; and [`emit`] prints the result.
//!
//! [`Context`] drives the stages and owns the state shared between them.

#![deny(missing_docs, trivial_numeric_casts, unused_extern_crates)]
#![warn(unused_import_braces)]

pub mod asm;
pub mod ast;
pub mod emit;
pub mod error;
pub mod fixup;
pub mod opt;
pub mod options;
pub mod regalloc;
pub mod sema;
pub mod symbols;
pub mod tac;
pub mod types;

mod context;
mod fx;
mod scoped_map;

pub use crate::context::Context;
pub use crate::error::{CompileError, CompileResult, ErrorKind, SourceLoc};
pub use crate::options::{OptFlags, Options};

/// Version number of this crate.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
