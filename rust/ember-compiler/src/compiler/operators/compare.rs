//! Loose and strict equality, relational operators and `<=>`.

use super::{Table, OPERAND_CARRIERS};
use crate::compiler::ast::{BinaryOp, Expr};
use crate::compiler::bytecode::NativeOp;
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

type C = CarrierType;

pub(super) fn register(t: &mut Table) {
    for op in [BinaryOp::Eq, BinaryOp::NotEq] {
        t.insert((op, C::Bool), eq_bool);
        t.insert((op, C::Int), eq_int);
        t.insert((op, C::Float), eq_float);
        t.insert((op, C::String), eq_string);
        t.insert((op, C::MutableString), left_as_string);
        t.insert((op, C::Number), eq_number);
        t.insert((op, C::DynamicValue), eq_value);
    }
    for op in [BinaryOp::Identical, BinaryOp::NotIdentical] {
        for c in OPERAND_CARRIERS {
            t.insert((op, c), strict);
        }
    }
    for op in [BinaryOp::Lt, BinaryOp::Gt, BinaryOp::LtEq, BinaryOp::GtEq, BinaryOp::Spaceship] {
        t.insert((op, C::Bool), rel_bool);
        t.insert((op, C::Int), rel_int);
        t.insert((op, C::Float), rel_float);
        t.insert((op, C::String), rel_string);
        t.insert((op, C::MutableString), left_as_string);
        t.insert((op, C::Number), rel_number);
        t.insert((op, C::DynamicValue), rel_value);
    }
}

fn left_as_string(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let left = convert::to_string(&mut l.em, left)?;
    match op {
        BinaryOp::Eq | BinaryOp::NotEq => eq_string(l, op, left, right),
        _ => rel_string(l, op, left, right),
    }
}

// ── Loose equality ──────────────────────────────────────────────────

/// Applies `!=` negation to an equality result.
fn finish_eq(l: &mut Lowerer<'_>, op: BinaryOp) -> Result<CarrierType, LowerError> {
    if op == BinaryOp::NotEq {
        l.em.native(NativeOp::Not)?;
    }
    Ok(C::Bool)
}

/// Turns a three-way result into `== 0`.
fn three_way_is_zero(l: &mut Lowerer<'_>, f: RuntimeFn) -> Result<(), LowerError> {
    l.em.call(f)?;
    l.em.ld_i4(0);
    l.em.native(NativeOp::Ceq)?;
    Ok(())
}

fn eq_bool(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    convert::to_bool(&mut l.em, r)?;
    l.em.native(NativeOp::Ceq)?;
    finish_eq(l, op)
}

fn eq_int(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    match r {
        C::Int => {
            l.em.native(NativeOp::Ceq)?;
        }
        C::Float => {
            l.em.call(RuntimeFn::EqIntFloat)?;
        }
        C::Bool => {
            l.em.call(RuntimeFn::EqIntBool)?;
        }
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, r)?;
            l.em.call(RuntimeFn::EqIntString)?;
        }
        C::Number => {
            l.em.call(RuntimeFn::EqIntNumber)?;
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way_is_zero(l, RuntimeFn::CompareIntValue)?;
        }
    }
    finish_eq(l, op)
}

fn eq_float(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    match r {
        C::Float => {
            l.em.native(NativeOp::Ceq)?;
        }
        C::Int => {
            l.em.conv_float()?;
            l.em.native(NativeOp::Ceq)?;
        }
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, r)?;
            l.em.call(RuntimeFn::EqFloatString)?;
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way_is_zero(l, RuntimeFn::CompareFloatValue)?;
        }
    }
    finish_eq(l, op)
}

fn eq_string(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    match r {
        C::Int => {
            l.em.call(RuntimeFn::EqStringInt)?;
        }
        C::Bool => {
            l.em.call(RuntimeFn::EqStringBool)?;
        }
        C::Float => {
            l.em.call(RuntimeFn::EqStringFloat)?;
        }
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, r)?;
            three_way_is_zero(l, RuntimeFn::CompareStringString)?;
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way_is_zero(l, RuntimeFn::CompareStringValue)?;
        }
    }
    finish_eq(l, op)
}

fn eq_number(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let f = match r {
        C::Int => RuntimeFn::EqNumberInt,
        C::Float => RuntimeFn::EqNumberFloat,
        C::Number => RuntimeFn::EqNumberNumber,
        _ => {
            convert::to_value(&mut l.em, r)?;
            RuntimeFn::EqNumberValue
        }
    };
    l.em.call(f)?;
    finish_eq(l, op)
}

fn eq_value(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let f = match r {
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, r)?;
            RuntimeFn::EqValueString
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            RuntimeFn::EqValueValue
        }
    };
    l.em.call(f)?;
    finish_eq(l, op)
}

/// `x == null` and `x != null`, specialized per carrier.
pub(super) fn emit_null_equality(l: &mut Lowerer<'_>, op: BinaryOp, other: &Expr) -> Result<CarrierType, LowerError> {
    let t = l.emit_operand(other, false)?;
    match t {
        C::Object => {
            l.em.pop()?;
            l.em.ld_bool(false);
        }
        C::Bool => {
            l.em.native(NativeOp::Not)?;
        }
        C::Int => {
            l.em.ld_int(0);
            l.em.native(NativeOp::Ceq)?;
        }
        C::Float => {
            l.em.ld_float(0.0);
            l.em.native(NativeOp::Ceq)?;
        }
        C::Number => {
            l.em.ld_int(0);
            l.em.call(RuntimeFn::EqNumberInt)?;
        }
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, t)?;
            l.em.call(RuntimeFn::StringEqNull)?;
        }
        C::Array => {
            l.em.call(RuntimeFn::ArrayToBool)?;
            l.em.native(NativeOp::Not)?;
        }
        _ => {
            convert::to_value(&mut l.em, t)?;
            l.em.call(RuntimeFn::EqNull)?;
        }
    }
    finish_eq(l, op)
}

// ── Strict equality ─────────────────────────────────────────────────

fn strict(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    if right.is_null_literal() {
        if left == C::DynamicValue {
            l.em.call(RuntimeFn::StrictEqNull)?;
        } else {
            l.em.pop()?;
            l.em.ld_bool(false);
        }
        return finish_strict(l, op);
    }
    let r = l.emit_operand(right, false)?;
    if left.never_identical(r) {
        // both sides are evaluated for their effects; no comparison is needed
        l.em.pop()?;
        l.em.pop()?;
        l.em.ld_bool(false);
        return finish_strict(l, op);
    }
    match (left, r) {
        (C::Bool, C::Bool) | (C::Int, C::Int) | (C::Float, C::Float) => {
            l.em.native(NativeOp::Ceq)?;
        }
        (C::Int, C::Number) => {
            l.em.call(RuntimeFn::StrictEqIntNumber)?;
        }
        (C::Float, C::Number) => {
            l.em.call(RuntimeFn::StrictEqFloatNumber)?;
        }
        (C::Number, C::Number | C::Int | C::Float) => {
            convert::to_number(&mut l.em, r)?;
            l.em.call(RuntimeFn::StrictEqNumberNumber)?;
        }
        (C::Bool, C::DynamicValue) => {
            l.em.call(RuntimeFn::StrictEqBoolValue)?;
        }
        (C::Int, C::DynamicValue) => {
            l.em.call(RuntimeFn::StrictEqIntValue)?;
        }
        (C::Float, C::DynamicValue) => {
            l.em.call(RuntimeFn::StrictEqFloatValue)?;
        }
        (C::DynamicValue, C::Bool) => {
            l.em.call(RuntimeFn::StrictEqValueBool)?;
        }
        (C::String | C::MutableString, C::String | C::MutableString) => {
            convert::to_string(&mut l.em, r)?;
            convert::convert_under(&mut l.em, left, C::String)?;
            l.em.call(RuntimeFn::StrictEqStringString)?;
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            convert::convert_under(&mut l.em, left, C::DynamicValue)?;
            l.em.call(RuntimeFn::StrictEqValueValue)?;
        }
    }
    finish_strict(l, op)
}

fn finish_strict(l: &mut Lowerer<'_>, op: BinaryOp) -> Result<CarrierType, LowerError> {
    if op == BinaryOp::NotIdentical {
        l.em.native(NativeOp::Not)?;
    }
    Ok(C::Bool)
}

// ── Relational ──────────────────────────────────────────────────────

/// What a relational rule left on the stack.
enum Outcome {
    /// Two same-typed machine operands.
    Native,
    /// A three-way i4 result.
    ThreeWay,
}

fn finish_rel(l: &mut Lowerer<'_>, op: BinaryOp, outcome: Outcome) -> Result<CarrierType, LowerError> {
    let native = match op {
        BinaryOp::Lt => NativeOp::Clt,
        BinaryOp::Gt => NativeOp::Cgt,
        BinaryOp::LtEq => NativeOp::Cle,
        BinaryOp::GtEq => NativeOp::Cge,
        _ => {
            // <=> only ever produces a three-way result
            return match outcome {
                Outcome::ThreeWay => l.em.conv_int(),
                Outcome::Native => Err(LowerError::NoRule {
                    op: op.symbol().to_string(),
                    left: C::Int,
                    right: C::Int,
                    span: l.em.span(),
                }),
            };
        }
    };
    if let Outcome::ThreeWay = outcome {
        l.em.ld_i4(0);
    }
    l.em.native(native)
}

fn three_way(l: &mut Lowerer<'_>, f: RuntimeFn) -> Result<Outcome, LowerError> {
    l.em.call(f)?;
    Ok(Outcome::ThreeWay)
}

fn rel_bool(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    convert::to_bool(&mut l.em, r)?;
    let outcome = if op == BinaryOp::Spaceship {
        three_way(l, RuntimeFn::CompareBoolBool)?
    } else {
        Outcome::Native
    };
    finish_rel(l, op, outcome)
}

fn rel_int(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let outcome = match r {
        C::Int if op != BinaryOp::Spaceship => Outcome::Native,
        C::Int => three_way(l, RuntimeFn::CompareIntInt)?,
        C::Float => three_way(l, RuntimeFn::CompareIntFloat)?,
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareIntValue)?
        }
    };
    finish_rel(l, op, outcome)
}

fn rel_float(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let outcome = match r {
        C::Float | C::Int => {
            convert::to_float(&mut l.em, r)?;
            if op == BinaryOp::Spaceship {
                three_way(l, RuntimeFn::CompareFloatFloat)?
            } else {
                Outcome::Native
            }
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareFloatValue)?
        }
    };
    finish_rel(l, op, outcome)
}

fn rel_string(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let outcome = match r {
        C::String | C::MutableString => {
            convert::to_string(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareStringString)?
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareStringValue)?
        }
    };
    finish_rel(l, op, outcome)
}

fn rel_number(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    let outcome = match r {
        C::Number | C::Int | C::Float => {
            convert::to_number(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareNumberNumber)?
        }
        _ => {
            convert::to_value(&mut l.em, r)?;
            three_way(l, RuntimeFn::CompareNumberValue)?
        }
    };
    finish_rel(l, op, outcome)
}

fn rel_value(l: &mut Lowerer<'_>, op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    convert::to_value(&mut l.em, r)?;
    let outcome = three_way(l, RuntimeFn::CompareValueValue)?;
    finish_rel(l, op, outcome)
}
