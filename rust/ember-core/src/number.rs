//! Tagged integer-or-float numbers.
//!
//! Integer arithmetic that overflows `i64` is promoted to float, matching the
//! source language. This is why `int + int` produces a `Number` and not an `int`.

use crate::convert::float_to_string;
use crate::error::RuntimeError;
use num_traits::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Number {
    Int(i64),
    Float(f64),
}

/// Float to integer conversion. NaN, infinities and out-of-range values map to zero.
pub fn float_to_long(f: f64) -> i64 {
    if f.is_finite() {
        f.trunc().to_i64().unwrap_or(0)
    } else {
        0
    }
}

impl Number {
    pub fn is_int(&self) -> bool {
        matches!(self, Number::Int(_))
    }

    pub fn to_f64(self) -> f64 {
        match self {
            Number::Int(n) => n as f64,
            Number::Float(f) => f,
        }
    }

    pub fn to_i64(self) -> i64 {
        match self {
            Number::Int(n) => n,
            Number::Float(f) => float_to_long(f),
        }
    }

    pub fn to_bool(self) -> bool {
        match self {
            Number::Int(n) => n != 0,
            Number::Float(f) => f != 0.0,
        }
    }

    pub fn is_zero(self) -> bool {
        !self.to_bool()
    }

    pub fn add(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_add(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 + b as f64)),
            _ => Number::Float(self.to_f64() + rhs.to_f64()),
        }
    }

    pub fn sub(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_sub(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 - b as f64)),
            _ => Number::Float(self.to_f64() - rhs.to_f64()),
        }
    }

    pub fn mul(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a
                .checked_mul(b)
                .map(Number::Int)
                .unwrap_or(Number::Float(a as f64 * b as f64)),
            _ => Number::Float(self.to_f64() * rhs.to_f64()),
        }
    }

    /// Division yields an integer only when it is exact.
    pub fn div(self, rhs: Number) -> Result<Number, RuntimeError> {
        if rhs.is_zero() {
            return Err(RuntimeError::DivisionByZero);
        }
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => match a.checked_rem(b) {
                Some(0) => Ok(a.checked_div(b).map(Number::Int).unwrap_or(Number::Float(a as f64 / b as f64))),
                _ => Ok(Number::Float(a as f64 / b as f64)),
            },
            _ => Ok(Number::Float(self.to_f64() / rhs.to_f64())),
        }
    }

    /// Integer remainder; both operands are truncated to integers first.
    pub fn rem(self, rhs: Number) -> Result<i64, RuntimeError> {
        let b = rhs.to_i64();
        if b == 0 {
            return Err(RuntimeError::ModuloByZero);
        }
        Ok(self.to_i64().checked_rem(b).unwrap_or(0))
    }

    pub fn pow(self, rhs: Number) -> Number {
        match (self, rhs) {
            (Number::Int(base), Number::Int(exp)) if exp >= 0 => {
                let mut acc: i64 = 1;
                let mut b = base;
                let mut e = exp;
                while e > 0 {
                    if e & 1 == 1 {
                        match acc.checked_mul(b) {
                            Some(v) => acc = v,
                            None => return Number::Float((base as f64).powf(exp as f64)),
                        }
                    }
                    e >>= 1;
                    if e > 0 {
                        match b.checked_mul(b) {
                            Some(v) => b = v,
                            None => return Number::Float((base as f64).powf(exp as f64)),
                        }
                    }
                }
                Number::Int(acc)
            }
            _ => Number::Float(self.to_f64().powf(rhs.to_f64())),
        }
    }

    pub fn neg(self) -> Number {
        match self {
            Number::Int(n) => n
                .checked_neg()
                .map(Number::Int)
                .unwrap_or(Number::Float(-(n as f64))),
            Number::Float(f) => Number::Float(-f),
        }
    }

    /// Three-way comparison; an unordered pair (NaN) compares as greater.
    pub fn compare(self, rhs: Number) -> i32 {
        let ord = match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a.cmp(&b),
            _ => self
                .to_f64()
                .partial_cmp(&rhs.to_f64())
                .unwrap_or(Ordering::Greater),
        };
        ordering_to_i32(ord)
    }

    pub fn num_eq(self, rhs: Number) -> bool {
        match (self, rhs) {
            (Number::Int(a), Number::Int(b)) => a == b,
            _ => self.to_f64() == rhs.to_f64(),
        }
    }
}

pub fn ordering_to_i32(ord: Ordering) -> i32 {
    match ord {
        Ordering::Less => -1,
        Ordering::Equal => 0,
        Ordering::Greater => 1,
    }
}

impl From<i64> for Number {
    fn from(n: i64) -> Self {
        Number::Int(n)
    }
}

impl From<f64> for Number {
    fn from(f: f64) -> Self {
        Number::Float(f)
    }
}

impl fmt::Display for Number {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Number::Int(n) => write!(f, "{}", n),
            Number::Float(x) => write!(f, "{}", float_to_string(*x)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_overflow_promotes_to_float() {
        let r = Number::Int(i64::MAX).add(Number::Int(1));
        assert!(matches!(r, Number::Float(_)));
        assert_eq!(Number::Int(2).add(Number::Int(3)), Number::Int(5));
    }

    #[test]
    fn test_div_exact_and_inexact() {
        assert_eq!(Number::Int(6).div(Number::Int(3)).unwrap(), Number::Int(2));
        assert_eq!(Number::Int(7).div(Number::Int(2)).unwrap(), Number::Float(3.5));
        assert_eq!(Number::Int(1).div(Number::Int(0)), Err(RuntimeError::DivisionByZero));
        assert_eq!(Number::Float(1.0).div(Number::Float(0.0)), Err(RuntimeError::DivisionByZero));
    }

    #[test]
    fn test_rem_truncates_operands() {
        assert_eq!(Number::Float(7.9).rem(Number::Int(3)).unwrap(), 1);
        assert_eq!(Number::Int(i64::MIN).rem(Number::Int(-1)).unwrap(), 0);
        assert_eq!(Number::Int(1).rem(Number::Int(0)), Err(RuntimeError::ModuloByZero));
    }

    #[test]
    fn test_pow() {
        assert_eq!(Number::Int(2).pow(Number::Int(10)), Number::Int(1024));
        assert!(matches!(Number::Int(2).pow(Number::Int(64)), Number::Float(_)));
        assert_eq!(Number::Int(2).pow(Number::Int(-1)), Number::Float(0.5));
    }

    #[test]
    fn test_neg_min_int() {
        assert!(matches!(Number::Int(i64::MIN).neg(), Number::Float(_)));
        assert_eq!(Number::Int(5).neg(), Number::Int(-5));
    }

    #[test]
    fn test_float_to_long_edges() {
        assert_eq!(float_to_long(f64::NAN), 0);
        assert_eq!(float_to_long(f64::INFINITY), 0);
        assert_eq!(float_to_long(1e30), 0);
        assert_eq!(float_to_long(-3.9), -3);
    }
}
