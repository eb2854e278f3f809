//! Loose (`==`, `<=>`) and strict (`===`) comparison.

use crate::array::PhpArray;
use crate::convert::{is_numeric_str, str_to_number, to_bool, Numericity};
use crate::number::{ordering_to_i32, Number};
use crate::value::Value;

fn text_of(v: &Value) -> Option<String> {
    match v {
        Value::String(s) => Some(s.to_string()),
        Value::MutableString(s) => Some(s.to_string_lossy()),
        _ => None,
    }
}

fn number_of(v: &Value) -> Option<Number> {
    match v {
        Value::Int(n) => Some(Number::Int(*n)),
        Value::Float(f) => Some(Number::Float(*f)),
        _ => None,
    }
}

/// Compares two strings: numerically when both are numeric, bytewise otherwise.
pub fn compare_strings(a: &str, b: &str) -> i32 {
    if is_numeric_str(a) && is_numeric_str(b) {
        return str_to_number(a).0.compare(str_to_number(b).0);
    }
    ordering_to_i32(a.as_bytes().cmp(b.as_bytes()))
}

/// Number against string: numeric when the string is numeric, otherwise the
/// number is formatted and compared as text.
pub fn compare_number_string(n: Number, s: &str) -> i32 {
    let (parsed, kind) = str_to_number(s);
    if kind == Numericity::Numeric {
        n.compare(parsed)
    } else {
        ordering_to_i32(n.to_string().as_bytes().cmp(s.as_bytes()))
    }
}

/// Three-way loose comparison, `-1`, `0` or `1`.
pub fn compare(a: &Value, b: &Value) -> i32 {
    let (a, b) = (a.deref(), b.deref());
    match (&a, &b) {
        (Value::Void | Value::Null, Value::Void | Value::Null) => 0,
        (Value::Bool(_), _) | (_, Value::Bool(_)) => {
            ordering_to_i32(to_bool(&a).cmp(&to_bool(&b)))
        }
        (Value::Void | Value::Null, _) => match text_of(&b) {
            Some(s) => compare_strings("", &s),
            None => ordering_to_i32(false.cmp(&to_bool(&b))),
        },
        (_, Value::Void | Value::Null) => match text_of(&a) {
            Some(s) => compare_strings(&s, ""),
            None => ordering_to_i32(to_bool(&a).cmp(&false)),
        },
        _ => {
            if let (Some(x), Some(y)) = (number_of(&a), number_of(&b)) {
                return x.compare(y);
            }
            if let (Some(x), Some(y)) = (text_of(&a), text_of(&b)) {
                return compare_strings(&x, &y);
            }
            if let (Some(x), Some(s)) = (number_of(&a), text_of(&b)) {
                return compare_number_string(x, &s);
            }
            if let (Some(s), Some(y)) = (text_of(&a), number_of(&b)) {
                return -compare_number_string(y, &s);
            }
            match (&a, &b) {
                (Value::Array(x), Value::Array(y)) => compare_arrays(&x.borrow(), &y.borrow()),
                (Value::Array(_), _) => 1,
                (_, Value::Array(_)) => -1,
                (Value::Object(x), Value::Object(y)) => {
                    if std::rc::Rc::ptr_eq(x, y) {
                        0
                    } else if x.class_name() == y.class_name() {
                        let xs = x.properties();
                        let ys = y.properties();
                        if xs.len() != ys.len() {
                            return ordering_to_i32(xs.len().cmp(&ys.len()));
                        }
                        for ((_, xv), (_, yv)) in xs.iter().zip(ys.iter()) {
                            let c = compare(xv, yv);
                            if c != 0 {
                                return c;
                            }
                        }
                        0
                    } else {
                        1
                    }
                }
                (Value::Object(_), _) => 1,
                (_, Value::Object(_)) => -1,
                _ => 0,
            }
        }
    }
}

fn compare_arrays(a: &PhpArray, b: &PhpArray) -> i32 {
    if a.len() != b.len() {
        return ordering_to_i32(a.len().cmp(&b.len()));
    }
    for (k, av) in a.iter() {
        match b.get(k) {
            Some(bv) => {
                let c = compare(av, bv);
                if c != 0 {
                    return c;
                }
            }
            // uncomparable
            None => return 1,
        }
    }
    0
}

/// `==`.
pub fn loose_eq(a: &Value, b: &Value) -> bool {
    let (a, b) = (a.deref(), b.deref());
    match (&a, &b) {
        (Value::Array(x), Value::Array(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x.iter().all(|(k, v)| y.get(k).is_some_and(|w| loose_eq(v, w)))
        }
        _ => compare(&a, &b) == 0,
    }
}

/// `===`: same type and same value; arrays by ordered pairs, objects by identity.
pub fn strict_eq(a: &Value, b: &Value) -> bool {
    let (a, b) = (a.deref(), b.deref());
    match (&a, &b) {
        (Value::Void | Value::Null, Value::Void | Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Array(x), Value::Array(y)) => {
            if std::rc::Rc::ptr_eq(x, y) {
                return true;
            }
            let (x, y) = (x.borrow(), y.borrow());
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y.iter())
                    .all(|((kx, vx), (ky, vy))| kx == ky && strict_eq(vx, vy))
        }
        (Value::Object(x), Value::Object(y)) => std::rc::Rc::ptr_eq(x, y),
        _ => match (a.string_bytes(), b.string_bytes()) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// Loose equality of a value with a string, used by the `value == string` fast path.
pub fn eq_value_string(a: &Value, s: &str) -> bool {
    loose_eq(a, &Value::string(s))
}
