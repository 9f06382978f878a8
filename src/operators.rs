//! Operator semantics and numeric promotion.
//!
//! `bool` promotes to `int`, `int` promotes to `float`. Integer arithmetic
//! wraps at 32 bits.

use crate::ast::{BinaryOp, UnaryOp, UpdateOp};
use crate::error::{FloError, Span};
use crate::value::Value;
use std::cmp::Ordering;
use std::rc::Rc;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Number {
    Int(i32),
    Float(f64),
}

impl Number {
    fn from_value(value: &Value) -> Option<Number> {
        match value {
            Value::Bool(b) => Some(Number::Int(i32::from(*b))),
            Value::Int(n) => Some(Number::Int(*n)),
            Value::Float(n) => Some(Number::Float(*n)),
            _ => None,
        }
    }

    fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => f64::from(n),
            Number::Float(n) => n,
        }
    }

    fn is_zero(self) -> bool {
        match self {
            Number::Int(n) => n == 0,
            Number::Float(n) => n == 0.0,
        }
    }
}

pub fn binary(op: BinaryOp, left: &Value, right: &Value, span: Span) -> Result<Value, FloError> {
    match op {
        BinaryOp::Equal => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEqual => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Less | BinaryOp::LessEqual | BinaryOp::Greater | BinaryOp::GreaterEqual => {
            let ordering = compare(op, left, right, span)?;
            Ok(Value::Bool(match op {
                BinaryOp::Less => ordering == Some(Ordering::Less),
                BinaryOp::LessEqual => matches!(ordering, Some(Ordering::Less | Ordering::Equal)),
                BinaryOp::Greater => ordering == Some(Ordering::Greater),
                _ => matches!(ordering, Some(Ordering::Greater | Ordering::Equal)),
            }))
        }
        BinaryOp::BitAnd | BinaryOp::BitOr | BinaryOp::BitXor | BinaryOp::ShiftLeft | BinaryOp::ShiftRight => {
            let a = int_operand(op.symbol(), left, span)?;
            let b = int_operand(op.symbol(), right, span)?;
            Ok(Value::Int(match op {
                BinaryOp::BitAnd => a & b,
                BinaryOp::BitOr => a | b,
                BinaryOp::BitXor => a ^ b,
                // shift amounts are taken mod 32
                BinaryOp::ShiftLeft => a.wrapping_shl(b as u32),
                _ => a.wrapping_shr(b as u32),
            }))
        }
        BinaryOp::Add => {
            if let (Value::Str(a), Value::Str(b)) = (left, right) {
                return Ok(Value::Str(format!("{}{}", a, b)));
            }
            arithmetic(op, left, right, span)
        }
        _ => arithmetic(op, left, right, span),
    }
}

fn arithmetic(op: BinaryOp, left: &Value, right: &Value, span: Span) -> Result<Value, FloError> {
    let (Some(a), Some(b)) = (Number::from_value(left), Number::from_value(right)) else {
        return Err(unsupported(op.symbol(), left, right, span));
    };

    if matches!(op, BinaryOp::Divide | BinaryOp::FloorDivide | BinaryOp::Modulo) && b.is_zero() {
        let message = if op == BinaryOp::Modulo {
            "Modulo by zero"
        } else {
            "Division by zero"
        };
        return Err(FloError::runtime_error(span, message.to_string()));
    }

    if let (Number::Int(a), Number::Int(b)) = (a, b) {
        let result = match op {
            BinaryOp::Add => Value::Int(a.wrapping_add(b)),
            BinaryOp::Subtract => Value::Int(a.wrapping_sub(b)),
            BinaryOp::Multiply => Value::Int(a.wrapping_mul(b)),
            BinaryOp::Divide => Value::Float(f64::from(a) / f64::from(b)),
            BinaryOp::FloorDivide => Value::Int(floor_div(a, b)),
            BinaryOp::Modulo => Value::Int(floor_mod(a, b)),
            BinaryOp::Power if b >= 0 => Value::Int(a.wrapping_pow(b as u32)),
            BinaryOp::Power => Value::Float(f64::from(a).powf(f64::from(b))),
            _ => return Err(unsupported(op.symbol(), left, right, span)),
        };
        return Ok(result);
    }

    let (a, b) = (a.to_f64(), b.to_f64());
    let result = match op {
        BinaryOp::Add => a + b,
        BinaryOp::Subtract => a - b,
        BinaryOp::Multiply => a * b,
        BinaryOp::Divide => a / b,
        BinaryOp::FloorDivide => (a / b).floor(),
        BinaryOp::Modulo => {
            let r = a % b;
            if r != 0.0 && (r < 0.0) != (b < 0.0) {
                r + b
            } else {
                r
            }
        }
        BinaryOp::Power => a.powf(b),
        _ => return Err(unsupported(op.symbol(), left, right, span)),
    };
    Ok(Value::Float(result))
}

/// Integer division rounding towards negative infinity.
fn floor_div(a: i32, b: i32) -> i32 {
    let q = a.wrapping_div(b);
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        q.wrapping_sub(1)
    } else {
        q
    }
}

/// Remainder with the sign of the divisor.
fn floor_mod(a: i32, b: i32) -> i32 {
    let r = a.wrapping_rem(b);
    if r != 0 && ((r < 0) != (b < 0)) {
        r.wrapping_add(b)
    } else {
        r
    }
}

fn int_operand(symbol: &str, value: &Value, span: Span) -> Result<i32, FloError> {
    match value {
        Value::Bool(b) => Ok(i32::from(*b)),
        Value::Int(n) => Ok(*n),
        other => Err(FloError::runtime_error(
            span,
            format!("Operator '{}' needs int operands, found '{}'", symbol, other.type_name()),
        )),
    }
}

fn unsupported(symbol: &str, left: &Value, right: &Value, span: Span) -> FloError {
    FloError::runtime_error(
        span,
        format!(
            "Unsupported operand types for {}: '{}' and '{}'",
            symbol,
            left.type_name(),
            right.type_name()
        ),
    )
}

/// `None` only when a float comparison involves NaN.
fn compare(op: BinaryOp, left: &Value, right: &Value, span: Span) -> Result<Option<Ordering>, FloError> {
    if let (Value::Str(a), Value::Str(b)) = (left, right) {
        return Ok(Some(a.cmp(b)));
    }
    match (Number::from_value(left), Number::from_value(right)) {
        (Some(Number::Int(a)), Some(Number::Int(b))) => Ok(Some(a.cmp(&b))),
        (Some(a), Some(b)) => Ok(a.to_f64().partial_cmp(&b.to_f64())),
        _ => Err(FloError::runtime_error(
            span,
            format!(
                "'{}' is not supported between '{}' and '{}'",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        )),
    }
}

/// Language-level `==`: numbers compare by value across `int` and `float`,
/// containers compare element-wise, functions by identity. Never fails.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    equal_guarded(left, right, &mut Vec::new())
}

/// `seen` holds the container pairs currently being compared; meeting one
/// again means both sides cycle the same way.
fn equal_guarded(left: &Value, right: &Value, seen: &mut Vec<(usize, usize)>) -> bool {
    if let (Some(a), Some(b)) = (Number::from_value(left), Number::from_value(right)) {
        return match (a, b) {
            (Number::Int(a), Number::Int(b)) => a == b,
            (a, b) => a.to_f64() == b.to_f64(),
        };
    }

    match (left, right) {
        (Value::None, Value::None) => true,
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::List(a), Value::List(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
            if seen.contains(&pair) {
                return true;
            }
            seen.push(pair);
            let (a, b) = (a.borrow(), b.borrow());
            let equal = a.len() == b.len()
                && a.iter().zip(b.iter()).all(|(x, y)| equal_guarded(x, y, seen));
            seen.pop();
            equal
        }
        (Value::Object(a), Value::Object(b)) => {
            if Rc::ptr_eq(a, b) {
                return true;
            }
            let pair = (Rc::as_ptr(a) as usize, Rc::as_ptr(b) as usize);
            if seen.contains(&pair) {
                return true;
            }
            seen.push(pair);
            let (a, b) = (a.borrow(), b.borrow());
            let equal = a.len() == b.len()
                && a.iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| equal_guarded(x, y, seen)));
            seen.pop();
            equal
        }
        (Value::NativeFunction(a), Value::NativeFunction(b)) => Rc::ptr_eq(a, b),
        (Value::RuntimeFunction(a), Value::RuntimeFunction(b)) => Rc::ptr_eq(a, b),
        _ => false,
    }
}

pub fn unary(op: UnaryOp, operand: &Value, span: Span) -> Result<Value, FloError> {
    if op == UnaryOp::Not {
        return Ok(Value::Bool(!operand.is_truthy()));
    }
    if op == UnaryOp::BitNot {
        return Ok(Value::Int(!int_operand("~", operand, span)?));
    }

    match Number::from_value(operand) {
        Some(Number::Int(n)) if op == UnaryOp::Negate => Ok(Value::Int(n.wrapping_neg())),
        Some(Number::Float(n)) if op == UnaryOp::Negate => Ok(Value::Float(-n)),
        Some(Number::Int(n)) => Ok(Value::Int(n)),
        Some(Number::Float(n)) => Ok(Value::Float(n)),
        None => Err(FloError::runtime_error(
            span,
            format!(
                "Bad operand type for unary {}: '{}'",
                op.symbol(),
                operand.type_name()
            ),
        )),
    }
}

/// The value after `++` or `--`.
pub fn step(op: UpdateOp, value: &Value, span: Span) -> Result<Value, FloError> {
    let symbol = match op {
        UpdateOp::Increment => "++",
        UpdateOp::Decrement => "--",
    };
    let delta = if op == UpdateOp::Increment { 1 } else { -1 };

    match Number::from_value(value) {
        Some(Number::Int(n)) => Ok(Value::Int(n.wrapping_add(delta))),
        Some(Number::Float(n)) => Ok(Value::Float(n + f64::from(delta))),
        None => Err(FloError::runtime_error(
            span,
            format!("Bad operand type for {}: '{}'", symbol, value.type_name()),
        )),
    }
}
