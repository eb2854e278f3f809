//! Array keys: the integer-or-string key encoding.

use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ArrayKey {
    Int(i64),
    Str(Rc<str>),
}

impl ArrayKey {
    /// Canonical key for a string: decimal integer strings become integer keys.
    pub fn from_str_key(s: &str) -> ArrayKey {
        match canonical_int(s) {
            Some(n) => ArrayKey::Int(n),
            None => ArrayKey::Str(Rc::from(s)),
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            ArrayKey::Int(n) => Some(*n),
            ArrayKey::Str(_) => None,
        }
    }
}

/// `"12"` and `"-3"` are canonical; `"012"`, `"+1"`, `"-0"` and `" 1"` are not.
fn canonical_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if digits.len() > 1 && digits.starts_with('0') {
        return None;
    }
    if s == "-0" {
        return None;
    }
    s.parse::<i64>().ok()
}

impl From<i64> for ArrayKey {
    fn from(n: i64) -> Self {
        ArrayKey::Int(n)
    }
}

impl From<&str> for ArrayKey {
    fn from(s: &str) -> Self {
        ArrayKey::from_str_key(s)
    }
}

impl fmt::Display for ArrayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArrayKey::Int(n) => write!(f, "{}", n),
            ArrayKey::Str(s) => write!(f, "{}", s),
        }
    }
}
