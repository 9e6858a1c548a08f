//! Compilation errors.
//!
//! The compiler exposes a small, closed error taxonomy. Every fallible stage
//! returns a [`CompileResult`]; the first error aborts the pipeline with no
//! partial output. Semantic analysis raises the user-facing kinds; later
//! stages only ever raise [`ErrorKind::Internal`], which indicates a bug in
//! the compiler rather than in the program being compiled.

use core::fmt;
use thiserror::Error;

/// A source location.
///
/// This is an opaque line number provided by the external parser. The default
/// location is the invalid one, used for errors that cannot be pinned to a
/// line (and for compiler-generated nodes).
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct SourceLoc(u32);

impl SourceLoc {
    /// Create a new source location for line number `line`.
    pub fn new(line: u32) -> Self {
        Self(line)
    }

    /// Is this the invalid source location?
    pub fn is_default(self) -> bool {
        self.0 == u32::MAX
    }
}

impl Default for SourceLoc {
    fn default() -> Self {
        Self(u32::MAX)
    }
}

impl fmt::Display for SourceLoc {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.is_default() {
            write!(f, "@-")
        } else {
            write!(f, "line {}", self.0)
        }
    }
}

/// The kind of a compilation failure.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ErrorKind {
    /// An identifier was used without a visible declaration.
    Undeclared,
    /// Incompatible redeclaration of the same identifier (type, storage
    /// class, or duplicate definition).
    RedeclarationConflict,
    /// Declarations of one entity disagree about its linkage.
    LinkageConflict,
    /// An operator, assignment, call, or return was applied to operands of
    /// incompatible types.
    TypeMismatch,
    /// `sizeof`, member access, or dereference of an incomplete type.
    IncompleteType,
    /// `&`, `++`, `--`, or the left side of an assignment applied to an
    /// expression that does not designate an object.
    NotAnLvalue,
    /// An initializer whose kind or shape is incompatible with the declared
    /// type.
    InvalidInitializer,
    /// A cast between types the language does not permit.
    InvalidCast,
    /// An invariant was violated in a stage past semantic analysis. This is a
    /// compiler bug, not a problem with the input program.
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match self {
            Self::Undeclared => "undeclared identifier",
            Self::RedeclarationConflict => "conflicting redeclaration",
            Self::LinkageConflict => "conflicting linkage",
            Self::TypeMismatch => "type mismatch",
            Self::IncompleteType => "incomplete type",
            Self::NotAnLvalue => "not an lvalue",
            Self::InvalidInitializer => "invalid initializer",
            Self::InvalidCast => "invalid cast",
            Self::Internal => "internal error",
        };
        f.write_str(s)
    }
}

/// A compilation failure: an error kind, the source location it was detected
/// at, and a human-readable message.
#[derive(Clone, PartialEq, Eq, Debug, Error)]
#[error("{loc}: {kind}: {message}")]
pub struct CompileError {
    /// What went wrong.
    pub kind: ErrorKind,
    /// Where it was detected.
    pub loc: SourceLoc,
    /// Details for the diagnostic formatter.
    pub message: String,
}

impl CompileError {
    /// Create a new error.
    pub fn new(kind: ErrorKind, loc: SourceLoc, message: impl Into<String>) -> Self {
        Self {
            kind,
            loc,
            message: message.into(),
        }
    }

    /// Create an internal error with no meaningful source location.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, SourceLoc::default(), message)
    }
}

/// The result of any compilation stage.
pub type CompileResult<T> = Result<T, CompileError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display() {
        let err = CompileError::new(
            ErrorKind::Undeclared,
            SourceLoc::new(12),
            "use of `x` before declaration",
        );
        assert_eq!(
            err.to_string(),
            "line 12: undeclared identifier: use of `x` before declaration"
        );
        assert!(CompileError::internal("oops").loc.is_default());
    }
}
