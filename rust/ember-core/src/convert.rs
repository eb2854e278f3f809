//! Conversions between runtime values: truthiness, numeric parsing of
//! strings, string formatting and key normalization.

use crate::array::PhpArray;
use crate::error::RuntimeError;
use crate::key::ArrayKey;
use crate::number::{float_to_long, Number};
use crate::value::{PhpObject, Value, ObjectRef};
use once_cell::sync::Lazy;
use regex::Regex;
use std::rc::Rc;

static NUMERIC_PREFIX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[ \t\n\r\x0B\x0C]*[+-]?(?:[0-9]+(?:\.[0-9]*)?|\.[0-9]+)(?:[eE][+-]?[0-9]+)?")
        .expect("numeric prefix pattern")
});

/// How much of a string is numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Numericity {
    /// The whole string (modulo surrounding whitespace) is a number.
    Numeric,
    /// A numeric prefix followed by other characters.
    Leading,
    NonNumeric,
}

/// Parses the numeric prefix of `s`. Non-numeric strings yield `Int(0)`.
pub fn str_to_number(s: &str) -> (Number, Numericity) {
    let Some(m) = NUMERIC_PREFIX.find(s) else {
        return (Number::Int(0), Numericity::NonNumeric);
    };
    let text = m.as_str().trim_start();
    let rest = &s[m.end()..];
    let kind = if rest.trim_end_matches([' ', '\t', '\n', '\r', '\x0B', '\x0C']).is_empty() {
        Numericity::Numeric
    } else {
        Numericity::Leading
    };
    let is_float = text.contains(['.', 'e', 'E']);
    let number = if is_float {
        Number::Float(text.parse::<f64>().unwrap_or(0.0))
    } else {
        match text.parse::<i64>() {
            Ok(n) => Number::Int(n),
            Err(_) => Number::Float(text.parse::<f64>().unwrap_or(0.0)),
        }
    };
    (number, kind)
}

pub fn is_numeric_str(s: &str) -> bool {
    str_to_number(s).1 == Numericity::Numeric
}

pub fn to_bool(v: &Value) -> bool {
    match v {
        Value::Void | Value::Null => false,
        Value::Bool(b) => *b,
        Value::Int(n) => *n != 0,
        Value::Float(f) => *f != 0.0,
        Value::String(s) => !(s.is_empty() || &**s == "0"),
        Value::MutableString(s) => {
            let bytes = s.bytes();
            !(bytes.is_empty() || bytes == b"0")
        }
        Value::Array(arr) => !arr.borrow().is_empty(),
        Value::Alias(alias) => to_bool(&alias.get()),
        Value::Object(_) => true,
    }
}

pub fn str_to_bool(s: &str) -> bool {
    !(s.is_empty() || s == "0")
}

/// Numeric value of `v`. Arrays and objects are rejected for arithmetic.
pub fn to_number(v: &Value) -> Result<Number, RuntimeError> {
    match v {
        Value::Void | Value::Null => Ok(Number::Int(0)),
        Value::Bool(b) => Ok(Number::Int(*b as i64)),
        Value::Int(n) => Ok(Number::Int(*n)),
        Value::Float(f) => Ok(Number::Float(*f)),
        Value::String(s) => Ok(str_to_number(s).0),
        Value::MutableString(s) => Ok(str_to_number(&s.to_string_lossy()).0),
        Value::Alias(alias) => to_number(&alias.get()),
        Value::Array(_) | Value::Object(_) => Err(RuntimeError::NotConvertible {
            from: v.type_name(),
            to: "number",
        }),
    }
}

pub fn to_long(v: &Value) -> i64 {
    match v {
        Value::Void | Value::Null => 0,
        Value::Bool(b) => *b as i64,
        Value::Int(n) => *n,
        Value::Float(f) => float_to_long(*f),
        Value::String(s) => str_to_number(s).0.to_i64(),
        Value::MutableString(s) => str_to_number(&s.to_string_lossy()).0.to_i64(),
        Value::Array(arr) => !arr.borrow().is_empty() as i64,
        Value::Alias(alias) => to_long(&alias.get()),
        Value::Object(_) => 1,
    }
}

pub fn to_double(v: &Value) -> f64 {
    match v {
        Value::Float(f) => *f,
        Value::Alias(alias) => to_double(&alias.get()),
        Value::String(s) => str_to_number(s).0.to_f64(),
        Value::MutableString(s) => str_to_number(&s.to_string_lossy()).0.to_f64(),
        other => to_long(other) as f64,
    }
}

/// String form of `v`. Arrays convert to `"Array"`; objects cannot be converted.
pub fn to_php_string(v: &Value) -> Result<String, RuntimeError> {
    Ok(match v {
        Value::Void | Value::Null => String::new(),
        Value::Bool(true) => "1".into(),
        Value::Bool(false) => String::new(),
        Value::Int(n) => n.to_string(),
        Value::Float(f) => float_to_string(*f),
        Value::String(s) => s.to_string(),
        Value::MutableString(s) => s.to_string_lossy(),
        Value::Array(_) => "Array".into(),
        Value::Alias(alias) => return to_php_string(&alias.get()),
        Value::Object(obj) => {
            return Err(RuntimeError::NotConvertible {
                from: format!("object of class {}", obj.class_name()),
                to: "string",
            })
        }
    })
}

/// Formats a float the way `echo` does: 14 significant digits, exponent
/// notation outside `[1e-5, 1e15)`.
pub fn float_to_string(f: f64) -> String {
    if f.is_nan() {
        return "NAN".into();
    }
    if f.is_infinite() {
        return if f > 0.0 { "INF".into() } else { "-INF".into() };
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0".into() } else { "0".into() };
    }
    let sci = format!("{:.13e}", f);
    let (mantissa, exp) = sci.split_once('e').unwrap_or((sci.as_str(), "0"));
    let exp: i32 = exp.parse().unwrap_or(0);
    if !(-5..15).contains(&exp) {
        let mut m = trim_fraction(mantissa);
        if !m.contains('.') {
            m.push_str(".0");
        }
        let sign = if exp < 0 { '-' } else { '+' };
        format!("{}E{}{}", m, sign, exp.abs())
    } else {
        let decimals = (13 - exp).max(0) as usize;
        trim_fraction(&format!("{:.*}", decimals, f))
    }
}

fn trim_fraction(s: &str) -> String {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.').to_string()
    } else {
        s.to_string()
    }
}

/// Normalizes a value used as an array key.
pub fn to_array_key(v: &Value) -> Result<ArrayKey, RuntimeError> {
    match v {
        Value::Int(n) => Ok(ArrayKey::Int(*n)),
        Value::String(s) => Ok(ArrayKey::from_str_key(s)),
        Value::MutableString(s) => Ok(ArrayKey::from_str_key(&s.to_string_lossy())),
        Value::Bool(b) => Ok(ArrayKey::Int(*b as i64)),
        Value::Float(f) => Ok(ArrayKey::Int(float_to_long(*f))),
        Value::Void | Value::Null => Ok(ArrayKey::Str(Rc::from(""))),
        Value::Alias(alias) => to_array_key(&alias.get()),
        Value::Array(_) | Value::Object(_) => Err(RuntimeError::IllegalOffset(v.type_name())),
    }
}

/// `(array)` cast.
pub fn to_array(v: &Value) -> Value {
    match v {
        Value::Void | Value::Null => Value::new_array(PhpArray::new()),
        Value::Array(_) => v.clone(),
        Value::Alias(alias) => to_array(&alias.get()),
        Value::Object(obj) => Value::new_array(
            obj.properties()
                .into_iter()
                .map(|(k, v)| (ArrayKey::from_str_key(&k), v))
                .collect(),
        ),
        scalar => Value::new_array(std::iter::once(scalar.clone()).collect()),
    }
}

/// `(object)` cast.
pub fn to_object(v: &Value) -> ObjectRef {
    match v {
        Value::Object(obj) => obj.clone(),
        Value::Alias(alias) => to_object(&alias.get()),
        Value::Void | Value::Null => PhpObject::std_class(),
        Value::Array(arr) => {
            let obj = PhpObject::std_class();
            for (k, v) in arr.borrow().iter() {
                obj.set_property(&k.to_string(), v.deep_copy());
            }
            obj
        }
        scalar => {
            let obj = PhpObject::std_class();
            obj.set_property("scalar", scalar.clone());
            obj
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_str_to_number_kinds() {
        assert_eq!(str_to_number("42"), (Number::Int(42), Numericity::Numeric));
        assert_eq!(str_to_number("  1.5  "), (Number::Float(1.5), Numericity::Numeric));
        assert_eq!(str_to_number("12abc"), (Number::Int(12), Numericity::Leading));
        assert_eq!(str_to_number("abc"), (Number::Int(0), Numericity::NonNumeric));
        assert_eq!(str_to_number("1e3"), (Number::Float(1000.0), Numericity::Numeric));
        assert!(matches!(str_to_number("99999999999999999999").0, Number::Float(_)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!to_bool(&Value::string("0")));
        assert!(!to_bool(&Value::string("")));
        assert!(to_bool(&Value::string("0.0")));
        assert!(!to_bool(&Value::new_array(PhpArray::new())));
        assert!(!to_bool(&Value::Void));
    }

    #[test]
    fn test_float_formatting() {
        assert_eq!(float_to_string(1.0), "1");
        assert_eq!(float_to_string(0.1 + 0.2), "0.3");
        assert_eq!(float_to_string(-2.5), "-2.5");
        assert_eq!(float_to_string(1e15), "1.0E+15");
        assert_eq!(float_to_string(1.5e-7), "1.5E-7");
        assert_eq!(float_to_string(123456.789), "123456.789");
    }

    #[test]
    fn test_array_keys() {
        assert_eq!(to_array_key(&Value::string("7")).unwrap(), ArrayKey::Int(7));
        assert_eq!(to_array_key(&Value::Float(2.9)).unwrap(), ArrayKey::Int(2));
        assert_eq!(to_array_key(&Value::Bool(true)).unwrap(), ArrayKey::Int(1));
        assert_eq!(to_array_key(&Value::Null).unwrap(), ArrayKey::from(""));
        assert!(to_array_key(&Value::new_array(PhpArray::new())).is_err());
    }

    #[test]
    fn test_casts() {
        match to_array(&Value::Int(3)) {
            Value::Array(arr) => assert_eq!(arr.borrow().len(), 1),
            other => panic!("expected array, got {:?}", other),
        }
        let obj = to_object(&Value::Int(3));
        assert!(matches!(obj.get_property("scalar"), Value::Int(3)));
    }
}
