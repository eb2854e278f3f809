//! Runtime failures raised by value semantics.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuntimeError {
    #[error("division by zero")]
    DivisionByZero,
    #[error("modulo by zero")]
    ModuloByZero,
    #[error("unsupported operand types: {left} {op} {right}")]
    UnsupportedOperands {
        op: &'static str,
        left: String,
        right: String,
    },
    #[error("bit shift by negative number")]
    NegativeShift,
    #[error("illegal offset type: {0}")]
    IllegalOffset(String),
    #[error("cannot use a value of type {0} as an array")]
    NotIndexable(String),
    #[error("cannot use a value of type {0} as an object")]
    NotAnObject(String),
    #[error("{from} cannot be converted to {to}")]
    NotConvertible { from: String, to: &'static str },
    #[error("string offset error: {0}")]
    StringOffset(String),
    #[error("cannot add element to the array as the next element is already occupied")]
    ArrayFull,
    #[error("constant '{name}' is already defined as {existing} constant")]
    ConstantRedefinition { name: String, existing: &'static str },
}

impl RuntimeError {
    pub fn unsupported(op: &'static str, left: &str, right: &str) -> Self {
        RuntimeError::UnsupportedOperands {
            op,
            left: left.to_string(),
            right: right.to_string(),
        }
    }
}
