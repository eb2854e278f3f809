//! Generic operators over dynamic values. These are the terminal fallbacks
//! the compiler routes to when operand types are not known statically.

use crate::array::PhpArray;
use crate::convert::{to_long, to_number};
use crate::error::RuntimeError;
use crate::number::Number;
use crate::value::Value;

fn operand(op: &'static str, a: &Value, b: &Value, v: &Value) -> Result<Number, RuntimeError> {
    to_number(v).map_err(|_| RuntimeError::unsupported(op, &a.type_name(), &b.type_name()))
}

/// `+`: array union for two arrays, numeric addition otherwise.
pub fn add(a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (a.deref(), b.deref());
    if let (Value::Array(x), Value::Array(y)) = (&a, &b) {
        return Ok(Value::new_array(x.borrow().union(&y.borrow())));
    }
    let x = operand("+", &a, &b, &a)?;
    let y = operand("+", &a, &b, &b)?;
    Ok(number_value(x.add(y)))
}

pub fn add_number(a: &Value, b: &Value) -> Result<Number, RuntimeError> {
    Ok(operand("+", a, b, a)?.add(operand("+", a, b, b)?))
}

pub fn sub(a: &Value, b: &Value) -> Result<Number, RuntimeError> {
    Ok(operand("-", a, b, a)?.sub(operand("-", a, b, b)?))
}

pub fn mul(a: &Value, b: &Value) -> Result<Number, RuntimeError> {
    Ok(operand("*", a, b, a)?.mul(operand("*", a, b, b)?))
}

pub fn div(a: &Value, b: &Value) -> Result<Number, RuntimeError> {
    operand("/", a, b, a)?.div(operand("/", a, b, b)?)
}

pub fn rem(a: &Value, b: &Value) -> Result<i64, RuntimeError> {
    operand("%", a, b, a)?.rem(operand("%", a, b, b)?)
}

pub fn pow(a: &Value, b: &Value) -> Result<Number, RuntimeError> {
    Ok(operand("**", a, b, a)?.pow(operand("**", a, b, b)?))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BitOp {
    And,
    Or,
    Xor,
}

/// Bitwise operators: two strings combine bytewise, anything else as integers.
pub fn bitwise(op: BitOp, a: &Value, b: &Value) -> Result<Value, RuntimeError> {
    let (a, b) = (a.deref(), b.deref());
    if a.is_string() && b.is_string() {
        let x = a.string_bytes().unwrap_or_default();
        let y = b.string_bytes().unwrap_or_default();
        let bytes: Vec<u8> = match op {
            BitOp::And => x.iter().zip(y.iter()).map(|(p, q)| p & q).collect(),
            BitOp::Xor => x.iter().zip(y.iter()).map(|(p, q)| p ^ q).collect(),
            BitOp::Or => {
                let (long, short) = if x.len() >= y.len() { (&x, &y) } else { (&y, &x) };
                long.iter()
                    .enumerate()
                    .map(|(i, p)| p | short.get(i).copied().unwrap_or(0))
                    .collect()
            }
        };
        return Ok(Value::from_bytes(bytes));
    }
    let symbol = match op {
        BitOp::And => "&",
        BitOp::Or => "|",
        BitOp::Xor => "^",
    };
    if matches!(a, Value::Array(_)) || matches!(b, Value::Array(_)) {
        return Err(RuntimeError::unsupported(symbol, &a.type_name(), &b.type_name()));
    }
    let (x, y) = (to_long(&a), to_long(&b));
    Ok(Value::Int(match op {
        BitOp::And => x & y,
        BitOp::Or => x | y,
        BitOp::Xor => x ^ y,
    }))
}

pub fn bit_not(v: &Value) -> Result<Value, RuntimeError> {
    match v.deref() {
        Value::Int(n) => Ok(Value::Int(!n)),
        Value::Float(f) => Ok(Value::Int(!crate::number::float_to_long(f))),
        s @ (Value::String(_) | Value::MutableString(_)) => {
            let bytes = s.string_bytes().unwrap_or_default().into_iter().map(|b| !b).collect();
            Ok(Value::from_bytes(bytes))
        }
        other => Err(RuntimeError::unsupported("~", &other.type_name(), "")),
    }
}

pub fn shift_left(a: i64, count: i64) -> Result<i64, RuntimeError> {
    match count {
        c if c < 0 => Err(RuntimeError::NegativeShift),
        c if c >= 64 => Ok(0),
        c => Ok(a.wrapping_shl(c as u32)),
    }
}

pub fn shift_right(a: i64, count: i64) -> Result<i64, RuntimeError> {
    match count {
        c if c < 0 => Err(RuntimeError::NegativeShift),
        c if c >= 64 => Ok(if a < 0 { -1 } else { 0 }),
        c => Ok(a >> c),
    }
}

pub fn number_value(n: Number) -> Value {
    match n {
        Number::Int(i) => Value::Int(i),
        Number::Float(f) => Value::Float(f),
    }
}

/// `[...] + [...]` without going through values.
pub fn array_union(a: &PhpArray, b: &PhpArray) -> PhpArray {
    a.union(b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_numeric_strings() {
        let r = add(&Value::string("2"), &Value::Int(3)).unwrap();
        assert!(matches!(r, Value::Int(5)));
        let r = add(&Value::string("1.5"), &Value::Int(1)).unwrap();
        assert!(matches!(r, Value::Float(f) if f == 2.5));
    }

    #[test]
    fn test_add_array_to_int_is_type_error() {
        let err = add(&Value::new_array(PhpArray::new()), &Value::Int(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::UnsupportedOperands { op: "+", .. }));
    }

    #[test]
    fn test_string_bitwise() {
        let r = bitwise(BitOp::Xor, &Value::string("a"), &Value::string(" ")).unwrap();
        assert_eq!(r.to_string(), "A");
        let r = bitwise(BitOp::Or, &Value::Int(4), &Value::string("1")).unwrap();
        assert!(matches!(r, Value::Int(5)));
    }

    #[test]
    fn test_string_bitwise_keeps_high_bytes() {
        let once = bit_not(&Value::string("A")).unwrap();
        assert_eq!(once.string_bytes(), Some(vec![0xBE]));
        let twice = bit_not(&once).unwrap();
        assert!(crate::compare::strict_eq(&twice, &Value::string("A")));

        let masked = bitwise(BitOp::And, &once, &Value::string("\u{7f}")).unwrap();
        assert_eq!(masked.string_bytes(), Some(vec![0x3E]));
        let flipped = bitwise(BitOp::Xor, &once, &Value::string("\u{1}")).unwrap();
        assert_eq!(flipped.string_bytes(), Some(vec![0xBF]));
    }

    #[test]
    fn test_shifts() {
        assert_eq!(shift_left(1, 3).unwrap(), 8);
        assert_eq!(shift_left(1, 64).unwrap(), 0);
        assert_eq!(shift_right(-8, 70).unwrap(), -1);
        assert_eq!(shift_left(1, -1), Err(RuntimeError::NegativeShift));
    }
}
