//! Operator lowering.
//!
//! Binary operators dispatch through a table keyed by `(operator, left
//! carrier)`. The left operand is already on the stack when a rule runs;
//! the rule emits the right operand, inspects its carrier and picks the
//! narrowest runtime operation. A left carrier with no entry is boxed into
//! `DynamicValue` and retried against the generic rule, so every operator
//! ends in a dynamic fallback.

mod arith;
mod bitwise;
mod compare;
mod logic;
pub mod unary;

use crate::compiler::ast::{BinaryOp, Expr};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::LowerError;
use once_cell::sync::Lazy;
use std::collections::HashMap;
use tracing::trace;

/// A lowering rule: left operand on the stack, right operand still to emit.
pub type Rule = fn(&mut Lowerer<'_>, BinaryOp, CarrierType, &Expr) -> Result<CarrierType, LowerError>;

type Table = HashMap<(BinaryOp, CarrierType), Rule>;

/// Carriers an operand can have after normalization.
pub(crate) const OPERAND_CARRIERS: [CarrierType; 10] = [
    CarrierType::Bool,
    CarrierType::Int,
    CarrierType::Float,
    CarrierType::Number,
    CarrierType::String,
    CarrierType::MutableString,
    CarrierType::Array,
    CarrierType::ArrayLike,
    CarrierType::DynamicValue,
    CarrierType::Object,
];

static TABLE: Lazy<Table> = Lazy::new(|| {
    let mut table = Table::new();
    arith::register(&mut table);
    bitwise::register(&mut table);
    compare::register(&mut table);
    table
});

/// Rule registered for `(op, left)`, if any.
pub fn rule(op: BinaryOp, left: CarrierType) -> Option<Rule> {
    TABLE.get(&(op, left)).copied()
}

/// Emits `left op right` and returns the carrier left on the stack.
pub fn emit_binary(l: &mut Lowerer<'_>, op: BinaryOp, left: &Expr, right: &Expr) -> Result<CarrierType, LowerError> {
    match op {
        BinaryOp::And | BinaryOp::Or | BinaryOp::Xor | BinaryOp::Coalesce => logic::emit(l, op, left, right),
        BinaryOp::Concat => l.emit_concat(&[left, right]),
        BinaryOp::Eq | BinaryOp::NotEq if right.is_null_literal() => compare::emit_null_equality(l, op, left),
        BinaryOp::Eq | BinaryOp::NotEq if left.is_null_literal() => compare::emit_null_equality(l, op, right),
        _ => {
            let narrow = !matches!(op, BinaryOp::Identical | BinaryOp::NotIdentical);
            let lt = l.emit_operand(left, narrow)?;
            apply(l, op, lt, right)
        }
    }
}

/// Dispatches `op` with the left operand of carrier `left` already emitted.
pub fn apply(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let left = convert::normalize_operand(&mut l.em, left)?;
    if let Some(found) = rule(op, left) {
        trace!(op = op.symbol(), left = %left, "operator rule");
        return found(l, op, left, right);
    }
    if left != CarrierType::DynamicValue {
        if let Some(generic) = rule(op, CarrierType::DynamicValue) {
            trace!(op = op.symbol(), left = %left, "operator rule via dynamic value");
            let boxed = convert::to_value(&mut l.em, left)?;
            return generic(l, op, boxed, right);
        }
    }
    Err(LowerError::NoRule {
        op: op.symbol().to_string(),
        left,
        right: CarrierType::Void,
        span: right.span,
    })
}

/// Native opcode for an arithmetic operator.
pub(crate) fn native_arith(op: BinaryOp) -> Option<crate::compiler::bytecode::NativeOp> {
    use crate::compiler::bytecode::NativeOp;
    match op {
        BinaryOp::Add => Some(NativeOp::Add),
        BinaryOp::Sub => Some(NativeOp::Sub),
        BinaryOp::Mul => Some(NativeOp::Mul),
        BinaryOp::BitAnd => Some(NativeOp::And),
        BinaryOp::BitOr => Some(NativeOp::Or),
        BinaryOp::BitXor => Some(NativeOp::Xor),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_every_binary_operator_has_a_dynamic_rule() {
        let table_ops = [
            BinaryOp::Add,
            BinaryOp::Sub,
            BinaryOp::Mul,
            BinaryOp::Div,
            BinaryOp::Mod,
            BinaryOp::Pow,
            BinaryOp::Shl,
            BinaryOp::Shr,
            BinaryOp::BitAnd,
            BinaryOp::BitOr,
            BinaryOp::BitXor,
            BinaryOp::Concat,
            BinaryOp::Eq,
            BinaryOp::NotEq,
            BinaryOp::Identical,
            BinaryOp::NotIdentical,
            BinaryOp::Lt,
            BinaryOp::Gt,
            BinaryOp::LtEq,
            BinaryOp::GtEq,
            BinaryOp::Spaceship,
        ];
        for op in table_ops {
            assert!(rule(op, CarrierType::DynamicValue).is_some(), "{:?} lacks a dynamic rule", op);
        }
    }

    #[test]
    fn test_int_left_has_a_specialized_add() {
        assert!(rule(BinaryOp::Add, CarrierType::Int).is_some());
        assert!(rule(BinaryOp::Sub, CarrierType::Object).is_none());
    }
}
