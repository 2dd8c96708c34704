//! Exact evaluation of operators on literal operands
//!
//! Integers are unbounded. Floor division and modulo follow the source
//! language (`-7 // 2 == -4`, `-7 % 2 == 1`).

use num_integer::Integer;
use num_traits::Zero;

use crate::ast::{BinOp, UniOp};
use crate::error::CompileError;
use crate::ir::types::Value;
use crate::Result;

/// Whether `left op right` can be evaluated at compile time with the
/// runtime's exact semantics
pub fn is_foldable_binary(op: BinOp, left: &Value, right: &Value) -> bool {
    use BinOp::*;
    match (op, left, right) {
        (Plus | Minus | Mul | Lt | Lte | Gt | Gte, Value::Num(_), Value::Num(_)) => true,
        // A zero divisor stays unfolded so the runtime guard still fires
        (IDiv | Mod, Value::Num(_), Value::Num(d)) => !d.is_zero(),
        (Eq | Neq, Value::Num(_), Value::Num(_)) => true,
        (Eq | Neq, Value::Bool(_), Value::Bool(_)) => true,
        (And | Or, Value::Bool(_), Value::Bool(_)) => true,
        (Is, Value::None, Value::None) => true,
        _ => false,
    }
}

pub fn is_foldable_unary(op: UniOp, operand: &Value) -> bool {
    matches!(
        (op, operand),
        (UniOp::Neg, Value::Num(_)) | (UniOp::Not, Value::Bool(_))
    )
}

pub fn eval_binary(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    use BinOp::*;
    let value = match (op, left, right) {
        (Plus, Value::Num(a), Value::Num(b)) => Value::Num(a + b),
        (Minus, Value::Num(a), Value::Num(b)) => Value::Num(a - b),
        (Mul, Value::Num(a), Value::Num(b)) => Value::Num(a * b),
        (IDiv, Value::Num(a), Value::Num(b)) if !b.is_zero() => Value::Num(a.div_floor(b)),
        (Mod, Value::Num(a), Value::Num(b)) if !b.is_zero() => Value::Num(a.mod_floor(b)),
        (Lt, Value::Num(a), Value::Num(b)) => Value::Bool(a < b),
        (Lte, Value::Num(a), Value::Num(b)) => Value::Bool(a <= b),
        (Gt, Value::Num(a), Value::Num(b)) => Value::Bool(a > b),
        (Gte, Value::Num(a), Value::Num(b)) => Value::Bool(a >= b),
        (Eq, Value::Num(a), Value::Num(b)) => Value::Bool(a == b),
        (Neq, Value::Num(a), Value::Num(b)) => Value::Bool(a != b),
        (Eq, Value::Bool(a), Value::Bool(b)) => Value::Bool(a == b),
        (Neq, Value::Bool(a), Value::Bool(b)) => Value::Bool(a != b),
        (And, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a && *b),
        (Or, Value::Bool(a), Value::Bool(b)) => Value::Bool(*a || *b),
        (Is, Value::None, Value::None) => Value::Bool(true),
        _ => {
            return Err(CompileError::Unfoldable {
                op: op.to_string(),
                left: left.to_string(),
                right: right.to_string(),
            })
        }
    };
    Ok(value)
}

pub fn eval_unary(op: UniOp, operand: &Value) -> Result<Value> {
    match (op, operand) {
        (UniOp::Neg, Value::Num(n)) => Ok(Value::Num(-n)),
        (UniOp::Not, Value::Bool(b)) => Ok(Value::Bool(!b)),
        _ => Err(CompileError::Unfoldable {
            op: op.to_string().trim().to_string(),
            left: String::new(),
            right: operand.to_string(),
        }),
    }
}
