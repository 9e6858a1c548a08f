//! Local constant folding.
//!
//! Evaluates every instruction whose operands are constants, reusing the
//! evaluator from semantic analysis so folded values always match what a
//! static initializer would have produced: two's-complement wraparound for
//! integers, IEEE semantics (NaN, signed zeros, infinities) for doubles,
//! and no folding of integer division by zero. Conditional jumps on
//! constants become unconditional jumps or disappear, which is what later
//! feeds unreachable-code elimination.

use crate::ast;
use crate::sema::consteval::{eval_binary_const, eval_unary_const};
use crate::symbols::SymbolTable;
use crate::tac::{BinaryOp, Instr, UnaryOp, Value};
use crate::types::Const;

/// Fold constants throughout `body`.
pub fn run(body: &mut Vec<Instr>, symbols: &SymbolTable) {
    let old = core::mem::take(body);
    for instr in old {
        match fold_instr(instr, symbols) {
            Some(instr) => body.push(instr),
            None => {}
        }
    }
}

/// Fold one instruction: `Some` keeps (possibly rewritten), `None` deletes.
fn fold_instr(instr: Instr, symbols: &SymbolTable) -> Option<Instr> {
    match instr {
        Instr::Unary {
            op,
            src: Value::Constant(c),
            dst,
        } => match eval_unary_const(unary_op(op), c) {
            Some(v) => Some(Instr::Copy {
                src: Value::Constant(v),
                dst,
            }),
            None => Some(Instr::Unary {
                op,
                src: Value::Constant(c),
                dst,
            }),
        },
        Instr::Binary {
            op,
            lhs: Value::Constant(a),
            rhs: Value::Constant(b),
            dst,
        } => match eval_binary_const(binary_op(op), a, b) {
            Some(v) => Some(Instr::Copy {
                src: Value::Constant(v),
                dst,
            }),
            None => Some(Instr::Binary {
                op,
                lhs: Value::Constant(a),
                rhs: Value::Constant(b),
                dst,
            }),
        },
        Instr::SignExtend {
            src: Value::Constant(c),
            dst,
        }
        | Instr::Truncate {
            src: Value::Constant(c),
            dst,
        }
        | Instr::ZeroExtend {
            src: Value::Constant(c),
            dst,
        }
        | Instr::DoubleToInt {
            src: Value::Constant(c),
            dst,
        }
        | Instr::DoubleToUInt {
            src: Value::Constant(c),
            dst,
        }
        | Instr::IntToDouble {
            src: Value::Constant(c),
            dst,
        }
        | Instr::UIntToDouble {
            src: Value::Constant(c),
            dst,
        } => {
            let target = dst.ty(symbols);
            Some(Instr::Copy {
                src: Value::Constant(c.convert_to(&target)),
                dst,
            })
        }
        Instr::JumpIfZero {
            cond: Value::Constant(c),
            target,
        } => {
            if c.is_zero() {
                Some(Instr::Jump(target))
            } else {
                None
            }
        }
        Instr::JumpIfNotZero {
            cond: Value::Constant(c),
            target,
        } => {
            if c.is_zero() {
                None
            } else {
                Some(Instr::Jump(target))
            }
        }
        other => Some(other),
    }
}

fn unary_op(op: UnaryOp) -> ast::UnaryOp {
    match op {
        UnaryOp::Complement => ast::UnaryOp::Complement,
        UnaryOp::Negate => ast::UnaryOp::Negate,
        UnaryOp::Not => ast::UnaryOp::Not,
    }
}

fn binary_op(op: BinaryOp) -> ast::BinaryOp {
    use ast::BinaryOp as A;
    match op {
        BinaryOp::Add => A::Add,
        BinaryOp::Subtract => A::Subtract,
        BinaryOp::Multiply => A::Multiply,
        BinaryOp::Divide => A::Divide,
        BinaryOp::Remainder => A::Remainder,
        BinaryOp::BitAnd => A::BitAnd,
        BinaryOp::BitOr => A::BitOr,
        BinaryOp::BitXor => A::BitXor,
        BinaryOp::ShiftLeft => A::ShiftLeft,
        BinaryOp::ShiftRight => A::ShiftRight,
        BinaryOp::Equal => A::Equal,
        BinaryOp::NotEqual => A::NotEqual,
        BinaryOp::LessThan => A::LessThan,
        BinaryOp::LessOrEqual => A::LessOrEqual,
        BinaryOp::GreaterThan => A::GreaterThan,
        BinaryOp::GreaterOrEqual => A::GreaterOrEqual,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tac::Label;
    use crate::types::Type;

    #[test]
    fn folds_arithmetic_to_copies() {
        let mut symbols = SymbolTable::new();
        let t = symbols.make_temp(Type::Int);
        let mut body = vec![Instr::Binary {
            op: BinaryOp::Add,
            lhs: Value::Constant(Const::Int(2)),
            rhs: Value::Constant(Const::Int(3)),
            dst: Value::Var(t),
        }];
        run(&mut body, &symbols);
        assert_eq!(
            body,
            vec![Instr::Copy {
                src: Value::Constant(Const::Int(5)),
                dst: Value::Var(t),
            }]
        );
    }

    #[test]
    fn folds_conversions_by_destination_type() {
        let mut symbols = SymbolTable::new();
        let t = symbols.make_temp(Type::Int);
        let mut body = vec![Instr::Truncate {
            src: Value::Constant(Const::Long(8_589_934_597)),
            dst: Value::Var(t),
        }];
        run(&mut body, &symbols);
        assert_eq!(
            body,
            vec![Instr::Copy {
                src: Value::Constant(Const::Int(5)),
                dst: Value::Var(t),
            }]
        );
    }

    #[test]
    fn rewrites_constant_conditions() {
        let symbols = SymbolTable::new();
        let mut body = vec![
            Instr::JumpIfZero {
                cond: Value::Constant(Const::Int(0)),
                target: Label(1),
            },
            Instr::JumpIfNotZero {
                cond: Value::Constant(Const::Int(0)),
                target: Label(2),
            },
        ];
        run(&mut body, &symbols);
        assert_eq!(body, vec![Instr::Jump(Label(1))]);
    }

    #[test]
    fn division_by_zero_is_left_alone() {
        let mut symbols = SymbolTable::new();
        let t = symbols.make_temp(Type::Int);
        let div = Instr::Binary {
            op: BinaryOp::Divide,
            lhs: Value::Constant(Const::Int(1)),
            rhs: Value::Constant(Const::Int(0)),
            dst: Value::Var(t),
        };
        let mut body = vec![div.clone()];
        run(&mut body, &symbols);
        assert_eq!(body, vec![div]);
    }

    #[test]
    fn negative_zero_keeps_its_sign() {
        let mut symbols = SymbolTable::new();
        let t = symbols.make_temp(Type::Double);
        let mut body = vec![Instr::Unary {
            op: UnaryOp::Negate,
            src: Value::Constant(Const::Double(0.0)),
            dst: Value::Var(t),
        }];
        run(&mut body, &symbols);
        match &body[0] {
            Instr::Copy {
                src: Value::Constant(Const::Double(d)),
                ..
            } => assert_eq!(d.to_bits(), (-0.0f64).to_bits()),
            other => panic!("expected folded copy, got {other:?}"),
        }
    }
}
