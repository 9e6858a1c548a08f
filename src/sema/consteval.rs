//! Compile-time constant evaluation.
//!
//! Used for static initializers and `case` values during semantic analysis,
//! and reused by the optimizer's constant-folding pass, so the values
//! computed here and the values the optimizer produces can never disagree.
//! Integer arithmetic wraps at the operand width; double arithmetic follows
//! IEEE semantics, including NaN comparisons and signed zeros.

use super::Analyzer;
use crate::ast::{self, BinaryOp, UnaryOp};
use crate::error::{CompileResult, ErrorKind};
use crate::sema::typed::{self, ExprKind};
use crate::symbols::{StaticInit, Sym};
use crate::types::{Const, Type};

/// Fold a typed expression to a constant, if it is one.
pub(crate) fn fold(e: &typed::Expr) -> Option<Const> {
    match &e.kind {
        ExprKind::Constant(c) => Some(*c),
        ExprKind::Cast { target, expr } => {
            let c = fold(expr)?;
            if target.is_pointer() {
                // Only the null pointer constant folds to a pointer value.
                if c.is_null_constant() {
                    Some(Const::ULong(0))
                } else {
                    None
                }
            } else if target.is_arithmetic() {
                Some(c.convert_to(target))
            } else {
                None
            }
        }
        ExprKind::Unary { op, expr } => eval_unary_const(*op, fold(expr)?),
        ExprKind::Binary { op, lhs, rhs } => eval_binary_const(*op, fold(lhs)?, fold(rhs)?),
        _ => None,
    }
}

/// Evaluate a unary operator on a constant operand.
pub(crate) fn eval_unary_const(op: UnaryOp, c: Const) -> Option<Const> {
    match op {
        UnaryOp::Not => Some(Const::Int(c.is_zero() as i32)),
        UnaryOp::Negate => match c {
            Const::Double(d) => Some(Const::Double(-d)),
            c if c.ty().is_integer() => Some(truncate_const(&c.ty(), -c.as_wide_int())),
            _ => None,
        },
        UnaryOp::Complement => match c {
            Const::Double(_) => None,
            c => Some(truncate_const(&c.ty(), !c.as_wide_int())),
        },
    }
}

/// Evaluate a binary operator on constant operands of the common type
/// (shift counts may have a different type than the shifted operand).
pub(crate) fn eval_binary_const(op: BinaryOp, a: Const, b: Const) -> Option<Const> {
    use BinaryOp::*;
    match op {
        LogicalAnd => return Some(Const::Int((!a.is_zero() && !b.is_zero()) as i32)),
        LogicalOr => return Some(Const::Int((!a.is_zero() || !b.is_zero()) as i32)),
        _ => {}
    }
    if let (Const::Double(x), Const::Double(y)) = (a, b) {
        return match op {
            Add => Some(Const::Double(x + y)),
            Subtract => Some(Const::Double(x - y)),
            Multiply => Some(Const::Double(x * y)),
            // IEEE division: x/0.0 is an infinity or NaN, not an error.
            Divide => Some(Const::Double(x / y)),
            Equal => Some(Const::Int((x == y) as i32)),
            NotEqual => Some(Const::Int((x != y) as i32)),
            LessThan => Some(Const::Int((x < y) as i32)),
            LessOrEqual => Some(Const::Int((x <= y) as i32)),
            GreaterThan => Some(Const::Int((x > y) as i32)),
            GreaterOrEqual => Some(Const::Int((x >= y) as i32)),
            _ => None,
        };
    }
    if !a.ty().is_integer() || !b.ty().is_integer() {
        return None;
    }
    let (x, y) = (a.as_wide_int(), b.as_wide_int());
    match op {
        Equal => return Some(Const::Int((x == y) as i32)),
        NotEqual => return Some(Const::Int((x != y) as i32)),
        LessThan => return Some(Const::Int((x < y) as i32)),
        LessOrEqual => return Some(Const::Int((x <= y) as i32)),
        GreaterThan => return Some(Const::Int((x > y) as i32)),
        GreaterOrEqual => return Some(Const::Int((x >= y) as i32)),
        _ => {}
    }
    let ty = a.ty();
    let width_bits: u32 = match ty {
        Type::Char | Type::SChar | Type::UChar => 8,
        Type::Short | Type::UShort => 16,
        Type::Int | Type::UInt => 32,
        _ => 64,
    };
    let v: i128 = match op {
        Add => x.wrapping_add(y),
        Subtract => x.wrapping_sub(y),
        Multiply => x.wrapping_mul(y),
        // Division by a constant zero traps at run time; leave it alone.
        Divide => {
            if y == 0 {
                return None;
            }
            x.wrapping_div(y)
        }
        Remainder => {
            if y == 0 {
                return None;
            }
            x.wrapping_rem(y)
        }
        BitAnd => x & y,
        BitOr => x | y,
        BitXor => x ^ y,
        // The hardware masks shift counts to the operand width.
        ShiftLeft => x.wrapping_shl((y as u32) & (width_bits - 1)),
        // Unsigned operands are non-negative in the widened form, so `>>`
        // is logical for them and arithmetic for signed operands.
        ShiftRight => x >> ((y as u32) & (width_bits - 1)),
        _ => return None,
    };
    Some(truncate_const(&ty, v))
}

/// Wrap a widened value to the width and signedness of `ty`.
fn truncate_const(ty: &Type, v: i128) -> Const {
    match ty {
        Type::Char | Type::SChar => Const::Char(v as i8),
        Type::UChar => Const::UChar(v as u8),
        Type::Short => Const::Short(v as i16),
        Type::UShort => Const::UShort(v as u16),
        Type::Int => Const::Int(v as i32),
        Type::UInt => Const::UInt(v as u32),
        Type::Long => Const::Long(v as i64),
        Type::ULong | Type::Pointer(_) => Const::ULong(v as u64),
        _ => panic!("integer truncation to non-integer type"),
    }
}

impl Analyzer<'_> {
    /// Evaluate an initializer for a static object into its byte layout:
    /// typed scalar pieces at increasing offsets with explicit zero runs for
    /// padding and omitted elements.
    pub(super) fn static_initializer(
        &mut self,
        target: &Type,
        init: &ast::Initializer,
        _loc: crate::error::SourceLoc,
    ) -> CompileResult<Vec<StaticInit>> {
        let mut out = Vec::new();
        self.static_init_into(target, init, &mut out)?;
        Ok(out)
    }

    fn static_init_into(
        &mut self,
        target: &Type,
        init: &ast::Initializer,
        out: &mut Vec<StaticInit>,
    ) -> CompileResult<()> {
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
                let len = bytes.len() as u64;
                if len >= *n {
                    // The literal fills (or overfills) the array; excess
                    // bytes and the NUL are discarded.
                    push_piece(
                        out,
                        StaticInit::String {
                            bytes: bytes[..*n as usize].to_vec(),
                            null_terminated: false,
                        },
                    );
                } else {
                    push_piece(
                        out,
                        StaticInit::String {
                            bytes: bytes.clone(),
                            null_terminated: true,
                        },
                    );
                    if *n > len + 1 {
                        push_piece(out, StaticInit::Zero(*n - len - 1));
                    }
                }
                Ok(())
            }
            (ast::Initializer::Single(e), _) => {
                let piece = self.static_scalar(target, e)?;
                push_piece(out, piece);
                Ok(())
            }
            (ast::Initializer::Compound(items, loc), Type::Array(elem, n)) => {
                if items.len() as u64 > *n {
                    return self.err(
                        ErrorKind::InvalidInitializer,
                        *loc,
                        "too many initializers for array",
                    );
                }
                for item in items {
                    self.static_init_into(elem, item, out)?;
                }
                let rest = (*n - items.len() as u64) * elem.size(self.types);
                if rest > 0 {
                    push_piece(out, StaticInit::Zero(rest));
                }
                Ok(())
            }
            (ast::Initializer::Compound(items, loc), Type::Struct(id)) => {
                let Some(layout) = self.types.layout(*id).cloned() else {
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
                let mut offset = 0u64;
                for (item, m) in items.iter().zip(&layout.members) {
                    if m.offset > offset {
                        push_piece(out, StaticInit::Zero(m.offset - offset));
                    }
                    self.static_init_into(&m.ty, item, out)?;
                    offset = m.offset + m.ty.size(self.types);
                }
                if layout.size > offset {
                    push_piece(out, StaticInit::Zero(layout.size - offset));
                }
                Ok(())
            }
            (ast::Initializer::Compound(items, loc), _) => {
                if items.len() == 1 {
                    self.static_init_into(target, &items[0], out)
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

    fn static_scalar(&mut self, target: &Type, e: &ast::Expr) -> CompileResult<StaticInit> {
        let t = self.check_and_convert(e)?;
        let t = self.convert_by_assignment(t, target, e.loc)?;
        if let Some(c) = fold(&t) {
            return Ok(scalar_piece(target, c));
        }
        if target.is_pointer() {
            if let Some(sym) = self.eval_static_addr(&t) {
                return Ok(StaticInit::Pointer(sym));
            }
        }
        self.err(
            ErrorKind::InvalidInitializer,
            e.loc,
            "initializer is not a compile-time constant",
        )
    }

    /// Evaluate an address constant: `&` of a static object, or a string
    /// literal (which decays to the address of its pooled copy).
    fn eval_static_addr(&mut self, e: &typed::Expr) -> Option<Sym> {
        match &e.kind {
            ExprKind::AddrOf(inner) => match &inner.kind {
                ExprKind::Var(sym) if self.symbols[*sym].is_static() => Some(*sym),
                ExprKind::String(bytes) => Some(self.symbols.string_constant(bytes)),
                _ => None,
            },
            ExprKind::Cast { target, expr } if target.is_pointer() => self.eval_static_addr(expr),
            _ => None,
        }
    }
}

/// Turn a converted constant into the static-initializer piece for `target`.
fn scalar_piece(target: &Type, c: Const) -> StaticInit {
    let c = c.convert_to(target);
    match c {
        Const::Char(v) => StaticInit::Char(v),
        Const::UChar(v) => StaticInit::UChar(v),
        Const::Short(v) => StaticInit::Short(v),
        Const::UShort(v) => StaticInit::UShort(v),
        Const::Int(v) => StaticInit::Int(v),
        Const::UInt(v) => StaticInit::UInt(v),
        Const::Long(v) => StaticInit::Long(v),
        Const::ULong(v) => StaticInit::ULong(v),
        Const::Double(d) => StaticInit::Double(d),
    }
}

/// Append a piece, merging adjacent zero runs so that trailing implicit
/// zeros come out as one directive.
fn push_piece(out: &mut Vec<StaticInit>, piece: StaticInit) {
    if let StaticInit::Zero(n) = piece {
        if n == 0 {
            return;
        }
        if let Some(StaticInit::Zero(prev)) = out.last_mut() {
            *prev += n;
            return;
        }
    }
    out.push(piece);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_folding_wraps() {
        // Signed overflow wraps two's-complement.
        let max = Const::Int(i32::MAX);
        assert_eq!(
            eval_binary_const(BinaryOp::Add, max, Const::Int(1)),
            Some(Const::Int(i32::MIN))
        );
        assert_eq!(
            eval_unary_const(UnaryOp::Negate, Const::Int(i32::MIN)),
            Some(Const::Int(i32::MIN))
        );
        // Unsigned wraparound.
        assert_eq!(
            eval_binary_const(BinaryOp::Subtract, Const::UInt(0), Const::UInt(1)),
            Some(Const::UInt(u32::MAX))
        );
    }

    #[test]
    fn division_by_zero_does_not_fold() {
        assert_eq!(
            eval_binary_const(BinaryOp::Divide, Const::Int(1), Const::Int(0)),
            None
        );
        // Double division by zero folds to infinity.
        assert_eq!(
            eval_binary_const(BinaryOp::Divide, Const::Double(1.0), Const::Double(0.0)),
            Some(Const::Double(f64::INFINITY))
        );
    }

    #[test]
    fn nan_comparisons() {
        let nan = Const::Double(f64::NAN);
        assert_eq!(
            eval_binary_const(BinaryOp::Equal, nan, nan),
            Some(Const::Int(0))
        );
        assert_eq!(
            eval_binary_const(BinaryOp::NotEqual, nan, nan),
            Some(Const::Int(1))
        );
        assert_eq!(
            eval_binary_const(BinaryOp::LessOrEqual, nan, Const::Double(1.0)),
            Some(Const::Int(0))
        );
    }

    #[test]
    fn unsigned_comparison() {
        let big = Const::UInt(4_000_000_000);
        assert_eq!(
            eval_binary_const(BinaryOp::GreaterThan, big, Const::UInt(1)),
            Some(Const::Int(1))
        );
    }

    #[test]
    fn shifts() {
        assert_eq!(
            eval_binary_const(BinaryOp::ShiftLeft, Const::Int(1), Const::Int(33)),
            // Count masked to the operand width.
            Some(Const::Int(2))
        );
        assert_eq!(
            eval_binary_const(BinaryOp::ShiftRight, Const::Int(-8), Const::Int(1)),
            Some(Const::Int(-4))
        );
        assert_eq!(
            eval_binary_const(BinaryOp::ShiftRight, Const::UInt(0x8000_0000), Const::Int(31)),
            Some(Const::UInt(1))
        );
    }

    #[test]
    fn zero_runs_merge() {
        let mut out = vec![StaticInit::Int(1)];
        push_piece(&mut out, StaticInit::Zero(4));
        push_piece(&mut out, StaticInit::Zero(8));
        push_piece(&mut out, StaticInit::Zero(0));
        assert_eq!(out, vec![StaticInit::Int(1), StaticInit::Zero(12)]);
    }
}
