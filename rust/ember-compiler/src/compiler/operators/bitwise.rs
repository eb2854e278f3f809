//! `& | ^ << >>`.

use super::{native_arith, Table, OPERAND_CARRIERS};
use crate::compiler::ast::{BinaryOp, Expr};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

type C = CarrierType;

pub(super) fn register(t: &mut Table) {
    for op in [BinaryOp::BitAnd, BinaryOp::BitOr, BinaryOp::BitXor] {
        t.insert((op, C::Int), bit_int);
        t.insert((op, C::Float), left_as_int);
        t.insert((op, C::Bool), left_as_int);
        t.insert((op, C::Number), left_as_int);
        t.insert((op, C::DynamicValue), bit_value);
    }
    for op in [BinaryOp::Shl, BinaryOp::Shr] {
        for c in OPERAND_CARRIERS {
            t.insert((op, c), shift);
        }
    }
}

fn generic_fn(op: BinaryOp) -> RuntimeFn {
    match op {
        BinaryOp::BitAnd => RuntimeFn::BitAndValueValue,
        BinaryOp::BitOr => RuntimeFn::BitOrValueValue,
        _ => RuntimeFn::BitXorValueValue,
    }
}

fn bit_int(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let native = native_arith(op).ok_or_else(|| LowerError::NoRule {
        op: op.symbol().to_string(),
        left,
        right: r,
        span: right.span,
    })?;
    match r {
        C::Int => l.em.native(native),
        C::Bool | C::Float | C::Number => {
            convert::to_int(&mut l.em, r)?;
            l.em.native(native)
        }
        _ => {
            // strings and arrays keep their own bitwise rules; re-route
            convert::to_value(&mut l.em, r)?;
            convert::convert_under(&mut l.em, C::Int, C::DynamicValue)?;
            l.em.call(generic_fn(op))
        }
    }
}

fn left_as_int(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let left = convert::to_int(&mut l.em, left)?;
    bit_int(l, op, left, right)
}

fn bit_value(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, false)?;
    convert::to_value(&mut l.em, r)?;
    l.em.call(generic_fn(op))
}

fn shift(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    convert::to_int(&mut l.em, left)?;
    let r = l.emit_operand(right, true)?;
    convert::to_int(&mut l.em, r)?;
    l.em.call(if op == BinaryOp::Shl {
        RuntimeFn::ShlIntInt
    } else {
        RuntimeFn::ShrIntInt
    })
}
