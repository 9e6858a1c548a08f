//! Initializer checking for automatic objects.
//!
//! Compound initializers are validated against the declared type and kept as
//! a tree annotated with target types; TAC lowering walks the tree, emitting
//! stores for the given items and zero fills for the elements a brace list
//! omits. Static initializers take the compile-time path in
//! [`super::consteval`] instead.

use super::Analyzer;
use crate::ast;
use crate::error::{CompileResult, ErrorKind};
use crate::sema::typed;
use crate::types::Type;

impl Analyzer<'_> {
    pub(super) fn check_initializer(
        &mut self,
        target: &Type,
        init: &ast::Initializer,
    ) -> CompileResult<typed::Initializer> {
        match (init, target) {
            (ast::Initializer::Single(e), Type::Array(elem, n)) => {
                let ast::ExprKind::String(bytes) = &e.kind else {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        e.loc,
                        "array initializer must be a brace list or string literal",
                    );
                };
                if !elem.is_character() {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        e.loc,
                        "string literal initializing a non-character array",
                    );
                }
                // Kept with the array type; lowering copies the bytes into
                // the array (dropping any excess) and zero-fills the tail.
                Ok(typed::Initializer::Single(typed::Expr::new(
                    typed::ExprKind::String(bytes.clone()),
                    target.clone(),
                    e.loc,
                )))
            }
            (ast::Initializer::Single(e), _) => {
                let t = self.check_and_convert(e)?;
                let t = self.convert_by_assignment(t, target, e.loc)?;
                Ok(typed::Initializer::Single(t))
            }
            (ast::Initializer::Compound(items, loc), Type::Array(elem, n)) => {
                if items.len() as u64 > *n {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        *loc,
                        "too many initializers for array",
                    );
                }
                let elem = (**elem).clone();
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.push(self.check_initializer(&elem, item)?);
                }
                Ok(typed::Initializer::Compound {
                    ty: target.clone(),
                    items: out,
                })
            }
            (ast::Initializer::Compound(items, loc), Type::Struct(id)) => {
                let Some(layout) = self.types.layout(*id) else {
                    return self.err(
                        ErrorKind::IncompleteType,
                        *loc,
                        "initializer for an incomplete structure type",
                    );
                };
                if items.len() > layout.members.len() {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        *loc,
                        "too many initializers for structure",
                    );
                }
                let member_tys: Vec<Type> =
                    layout.members.iter().map(|m| m.ty.clone()).collect();
                let mut out = Vec::with_capacity(items.len());
                for (item, mty) in items.iter().zip(&member_tys) {
                    out.push(self.check_initializer(mty, item)?);
                }
                Ok(typed::Initializer::Compound {
                    ty: target.clone(),
                    items: out,
                })
            }
            (ast::Initializer::Compound(items, loc), _) => {
                if items.len() == 1 {
                    self.check_initializer(target, &items[0])
                } else {
                    self.err(
                        ErrorKind::InvalidInitializer,
                        *loc,
                        "cannot initialize a scalar with a brace list",
                    )
                }
            }
        }
    }
}
