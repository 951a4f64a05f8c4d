//=====================================================
// File: strata_core/src/ops.rs
//=====================================================
// Author: ZobieLabs
// License: Duality Public License (DPL v1.0)
// Goal: Operator semantics
// Objective: Single definition of arithmetic, comparison and set operators
//            used by the VM at runtime and by the compiler when folding
//=====================================================

use std::cmp::Ordering;

use thiserror::Error;

use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    BitAnd,
    BitOr,
    BitXor,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Compare,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum OpError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("operator '{op}' cannot be applied to {lhs} and {rhs}")]
    Unsupported {
        op: &'static str,
        lhs: String,
        rhs: String,
    },
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Mod => "%",
            BinaryOp::Pow => "**",
            BinaryOp::BitAnd => "&",
            BinaryOp::BitOr => "|",
            BinaryOp::BitXor => "^",
            BinaryOp::Equal => "==",
            BinaryOp::NotEqual => "!=",
            BinaryOp::Less => "<",
            BinaryOp::LessEqual => "<=",
            BinaryOp::Greater => ">",
            BinaryOp::GreaterEqual => ">=",
            BinaryOp::Compare => "<=>",
        }
    }
}

fn unsupported(op: BinaryOp, lhs: &Value, rhs: &Value) -> OpError {
    OpError::Unsupported {
        op: op.symbol(),
        lhs: lhs.type_name().to_string(),
        rhs: rhs.type_name().to_string(),
    }
}

/// Applies a binary operator. Integer arithmetic wraps, integer division
/// truncates toward zero and faults on a zero divisor; floats follow IEEE-754.
pub fn binary(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
    use BinaryOp::*;
    match op {
        Equal => Ok(Value::Boolean(lhs == rhs)),
        NotEqual => Ok(Value::Boolean(lhs != rhs)),
        Less | LessEqual | Greater | GreaterEqual => {
            let Some(ordering) = compare(lhs, rhs) else {
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Boolean(false));
                }
                return Err(unsupported(op, lhs, rhs));
            };
            let result = match op {
                Less => ordering == Ordering::Less,
                LessEqual => ordering != Ordering::Greater,
                Greater => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            };
            Ok(Value::Boolean(result))
        }
        Compare => {
            let ordering = compare(lhs, rhs).ok_or_else(|| unsupported(op, lhs, rhs))?;
            Ok(Value::Integer(match ordering {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            }))
        }
        Add => match (lhs, rhs) {
            (Value::String(_), _) | (_, Value::String(_)) => {
                Ok(Value::string(format!("{lhs}{rhs}")))
            }
            (Value::Array(a), Value::Array(b)) => {
                let mut items = a.borrow().clone();
                items.extend(b.borrow().iter().cloned());
                Ok(Value::array(items))
            }
            _ => arithmetic(op, lhs, rhs),
        },
        Sub | Mul | Div | Mod | Pow => arithmetic(op, lhs, rhs),
        BitAnd | BitOr | BitXor => match (lhs, rhs) {
            (Value::Integer(a), Value::Integer(b)) => Ok(Value::Integer(match op {
                BitAnd => a & b,
                BitOr => a | b,
                _ => a ^ b,
            })),
            (Value::Boolean(a), Value::Boolean(b)) => Ok(Value::Boolean(match op {
                BitAnd => a & b,
                BitOr => a | b,
                _ => a ^ b,
            })),
            _ => Err(unsupported(op, lhs, rhs)),
        },
    }
}

fn arithmetic(op: BinaryOp, lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => integer_arithmetic(op, *a, *b),
        (Value::Integer(_) | Value::Float(_), Value::Integer(_) | Value::Float(_)) => {
            let a = lhs.as_number().unwrap_or_default();
            let b = rhs.as_number().unwrap_or_default();
            Ok(Value::Float(float_arithmetic(op, a, b)))
        }
        _ => Err(unsupported(op, lhs, rhs)),
    }
}

fn integer_arithmetic(op: BinaryOp, lhs: i64, rhs: i64) -> Result<Value, OpError> {
    use BinaryOp::*;
    let value = match op {
        Add => lhs.wrapping_add(rhs),
        Sub => lhs.wrapping_sub(rhs),
        Mul => lhs.wrapping_mul(rhs),
        Div => {
            if rhs == 0 {
                return Err(OpError::DivisionByZero);
            }
            lhs.wrapping_div(rhs)
        }
        Mod => {
            if rhs == 0 {
                return Err(OpError::DivisionByZero);
            }
            lhs.wrapping_rem(rhs)
        }
        Pow => return Ok(integer_power(lhs, rhs)),
        _ => unreachable!("non-arithmetic operator routed to integer arithmetic"),
    };
    Ok(Value::Integer(value))
}

/// Exact for a non-negative exponent whose result fits in an i64; anything
/// else is computed in floating point.
fn integer_power(base: i64, exponent: i64) -> Value {
    if exponent >= 0 {
        if let Ok(exp) = u32::try_from(exponent) {
            if let Some(value) = base.checked_pow(exp) {
                return Value::Integer(value);
            }
        }
    }
    Value::Float((base as f64).powf(exponent as f64))
}

fn float_arithmetic(op: BinaryOp, lhs: f64, rhs: f64) -> f64 {
    use BinaryOp::*;
    match op {
        Add => lhs + rhs,
        Sub => lhs - rhs,
        Mul => lhs * rhs,
        Div => lhs / rhs,
        Mod => lhs % rhs,
        Pow => lhs.powf(rhs),
        _ => f64::NAN,
    }
}

pub fn unary(op: UnaryOp, operand: &Value) -> Result<Value, OpError> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Integer(v)) => Ok(Value::Integer(v.wrapping_neg())),
        (UnaryOp::Neg, Value::Float(v)) => Ok(Value::Float(-v)),
        (UnaryOp::Not, value) => Ok(Value::Boolean(!value.is_truthy())),
        (UnaryOp::BitNot, Value::Integer(v)) => Ok(Value::Integer(!v)),
        (op, value) => Err(OpError::Unsupported {
            op: match op {
                UnaryOp::Neg => "-",
                UnaryOp::Not => "!",
                UnaryOp::BitNot => "~",
            },
            lhs: value.type_name().to_string(),
            rhs: String::new(),
        }),
    }
}

pub fn compare(lhs: &Value, rhs: &Value) -> Option<Ordering> {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Boolean(a), Value::Boolean(b)) => Some(a.cmp(b)),
        _ => {
            let a = lhs.as_number()?;
            let b = rhs.as_number()?;
            a.partial_cmp(&b)
        }
    }
}

/// `x ∈ collection`: array membership or substring test.
pub fn contains(collection: &Value, item: &Value) -> Result<bool, OpError> {
    match (collection, item) {
        (Value::Array(items), _) => Ok(items.borrow().iter().any(|value| value == item)),
        (Value::String(text), Value::String(needle)) => Ok(text.contains(needle.as_ref())),
        _ => Err(OpError::Unsupported {
            op: "∈",
            lhs: item.type_name().to_string(),
            rhs: collection.type_name().to_string(),
        }),
    }
}

fn array_items(op: &'static str, lhs: &Value, rhs: &Value) -> Result<(Vec<Value>, Vec<Value>), OpError> {
    match (lhs, rhs) {
        (Value::Array(a), Value::Array(b)) => Ok((a.borrow().clone(), b.borrow().clone())),
        _ => Err(OpError::Unsupported {
            op,
            lhs: lhs.type_name().to_string(),
            rhs: rhs.type_name().to_string(),
        }),
    }
}

pub fn subset(lhs: &Value, rhs: &Value) -> Result<bool, OpError> {
    let (a, b) = array_items("⊂", lhs, rhs)?;
    Ok(a.iter().all(|item| b.contains(item)))
}

pub fn union(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
    let (mut a, b) = array_items("∪", lhs, rhs)?;
    for item in b {
        if !a.contains(&item) {
            a.push(item);
        }
    }
    Ok(Value::array(a))
}

pub fn intersect(lhs: &Value, rhs: &Value) -> Result<Value, OpError> {
    let (a, b) = array_items("∩", lhs, rhs)?;
    let mut out: Vec<Value> = Vec::new();
    for item in a {
        if b.contains(&item) && !out.contains(&item) {
            out.push(item);
        }
    }
    Ok(Value::array(out))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_division_truncates() {
        let value = binary(BinaryOp::Div, &Value::Integer(-7), &Value::Integer(2)).unwrap();
        assert_eq!(value, Value::Integer(-3));
    }

    #[test]
    fn integer_division_by_zero_faults() {
        let err = binary(BinaryOp::Div, &Value::Integer(1), &Value::Integer(0)).unwrap_err();
        assert_eq!(err, OpError::DivisionByZero);
    }

    #[test]
    fn float_division_by_zero_is_infinite() {
        let value = binary(BinaryOp::Div, &Value::Float(1.0), &Value::Integer(0)).unwrap();
        assert!(matches!(value, Value::Float(v) if v.is_infinite()));
    }

    #[test]
    fn power_is_exact_for_small_integer_exponents() {
        let value = binary(BinaryOp::Pow, &Value::Integer(3), &Value::Integer(4)).unwrap();
        assert!(matches!(value, Value::Integer(81)));
        let value = binary(BinaryOp::Pow, &Value::Integer(2), &Value::Integer(-1)).unwrap();
        assert!(matches!(value, Value::Float(v) if v == 0.5));
    }

    #[test]
    fn string_concatenation_formats_operands() {
        let value = binary(BinaryOp::Add, &Value::string("n="), &Value::Integer(4)).unwrap();
        assert_eq!(value, Value::string("n=4"));
    }

    #[test]
    fn spaceship_orders_values() {
        let value = binary(BinaryOp::Compare, &Value::Integer(1), &Value::Float(2.5)).unwrap();
        assert_eq!(value, Value::Integer(-1));
    }

    #[test]
    fn set_operators_on_arrays() {
        let a = Value::array(vec![Value::Integer(1), Value::Integer(2)]);
        let b = Value::array(vec![Value::Integer(2), Value::Integer(3)]);
        assert_eq!(union(&a, &b).unwrap().to_string(), "[1, 2, 3]");
        assert_eq!(intersect(&a, &b).unwrap().to_string(), "[2]");
        assert!(!subset(&a, &b).unwrap());
        assert!(contains(&a, &Value::Integer(1)).unwrap());
    }
}
