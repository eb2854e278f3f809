//! `+ - * / % **` and compound concatenation.

use super::{native_arith, Table, OPERAND_CARRIERS};
use crate::compiler::ast::{BinaryOp, Expr};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

type C = CarrierType;

pub(super) fn register(t: &mut Table) {
    for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul] {
        t.insert((op, C::Int), arith_int);
        t.insert((op, C::Float), arith_float);
        t.insert((op, C::Number), arith_picked);
        t.insert((op, C::DynamicValue), arith_picked);
        t.insert((op, C::Bool), left_as_int);
        t.insert((op, C::String), left_as_number);
        t.insert((op, C::MutableString), left_as_number);
    }
    t.insert((BinaryOp::Add, C::Array), add_array);
    for op in [BinaryOp::Div, BinaryOp::Mod, BinaryOp::Pow] {
        for c in OPERAND_CARRIERS {
            t.insert((op, c), numeric_only);
        }
    }
    for c in OPERAND_CARRIERS {
        t.insert((BinaryOp::Concat, c), concat_append);
    }
}

/// Runtime function for `left op right` among Add/Sub/Mul.
pub(crate) fn pick(op: BinaryOp, left: CarrierType, right: CarrierType) -> Option<RuntimeFn> {
    use RuntimeFn::*;
    let row = match (left, right) {
        (C::Int, C::Int) => [AddIntInt, SubIntInt, MulIntInt],
        (C::Int, C::Float) => [AddIntFloat, SubIntFloat, MulIntFloat],
        (C::Int, C::Number) => [AddIntNumber, SubIntNumber, MulIntNumber],
        (C::Int, C::DynamicValue) => [AddIntValue, SubIntValue, MulIntValue],
        (C::Float, C::Number) => [AddFloatNumber, SubFloatNumber, MulFloatNumber],
        (C::Float, C::DynamicValue) => [AddFloatValue, SubFloatValue, MulFloatValue],
        (C::Number, C::Int) => [AddNumberInt, SubNumberInt, MulNumberInt],
        (C::Number, C::Float) => [AddNumberFloat, SubNumberFloat, MulNumberFloat],
        (C::Number, C::Number) => [AddNumberNumber, SubNumberNumber, MulNumberNumber],
        (C::Number, C::DynamicValue) => [AddNumberValue, SubNumberValue, MulNumberValue],
        (C::DynamicValue, C::Int) => [AddValueInt, SubValueInt, MulValueInt],
        (C::DynamicValue, C::Float) => [AddValueFloat, SubValueFloat, MulValueFloat],
        (C::DynamicValue, C::Number) => [AddValueNumber, SubValueNumber, MulValueNumber],
        (C::DynamicValue, C::DynamicValue) => [AddValueValue, SubValueValue, MulValueValue],
        _ => return None,
    };
    match op {
        BinaryOp::Add => Some(row[0]),
        BinaryOp::Sub => Some(row[1]),
        BinaryOp::Mul => Some(row[2]),
        _ => None,
    }
}

/// Emits the right operand of an arithmetic operator: bools widen to int,
/// strings parse to numbers, non-numeric carriers box.
fn right_operand(l: &mut Lowerer<'_>, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    match r {
        C::Int | C::Float | C::Number | C::DynamicValue => Ok(r),
        C::Bool => l.em.conv_int(),
        C::String | C::MutableString => convert::to_number(&mut l.em, r),
        other => convert::to_value(&mut l.em, other),
    }
}

fn call_picked(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: CarrierType) -> Result<CarrierType, LowerError> {
    match pick(op, left, right) {
        Some(f) => l.em.call(f),
        None => Err(LowerError::NoRule {
            op: op.symbol().to_string(),
            left,
            right,
            span: l.em.span(),
        }),
    }
}

fn arith_int(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = right_operand(l, right)?;
    call_picked(l, op, left, r)
}

fn arith_float(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = right_operand(l, right)?;
    match (r, native_arith(op)) {
        (C::Float, Some(native)) => l.em.native(native),
        (C::Int, Some(native)) => {
            l.em.conv_float()?;
            l.em.native(native)
        }
        _ => call_picked(l, op, left, r),
    }
}

fn arith_picked(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = right_operand(l, right)?;
    call_picked(l, op, left, r)
}

fn left_as_int(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let left = convert::to_int(&mut l.em, left)?;
    arith_int(l, op, left, right)
}

fn left_as_number(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let left = convert::to_number(&mut l.em, left)?;
    arith_picked(l, op, left, right)
}

/// `array + x` is a key union when both sides are arrays.
fn add_array(l: &mut Lowerer<'_>, _op: BinaryOp, _left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    let r = l.emit_operand(right, true)?;
    if r == C::Array {
        return l.em.call(RuntimeFn::AddArrayArray);
    }
    convert::to_value(&mut l.em, r)?;
    l.em.call(RuntimeFn::AddArrayValue)
}

/// Division, modulo and power always go through numbers: no machine fast
/// path survives divide-by-zero and float remainder rules.
fn numeric_only(l: &mut Lowerer<'_>, op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    convert::to_number(&mut l.em, left)?;
    let r = l.emit_operand(right, true)?;
    convert::to_number(&mut l.em, r)?;
    let f = match op {
        BinaryOp::Div => RuntimeFn::DivNumberNumber,
        BinaryOp::Mod => RuntimeFn::ModNumberNumber,
        _ => RuntimeFn::PowNumberNumber,
    };
    l.em.call(f)
}

/// `.=`: appends into a mutable string, in place when the left already is one.
fn concat_append(l: &mut Lowerer<'_>, _op: BinaryOp, left: CarrierType, right: &Expr) -> Result<CarrierType, LowerError> {
    if left != C::MutableString {
        convert::to_string(&mut l.em, left)?;
        l.em.call(RuntimeFn::StringToMutableString)?;
    }
    let r = l.emit_operand(right, false)?;
    convert::to_string(&mut l.em, r)?;
    l.em.call(RuntimeFn::MutableStringAppend)
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_pick_covers_numeric_grid() {
        let numeric = [C::Int, C::Number, C::DynamicValue];
        for op in [BinaryOp::Add, BinaryOp::Sub, BinaryOp::Mul] {
            for a in numeric {
                for b in [C::Int, C::Float, C::Number, C::DynamicValue] {
                    assert!(pick(op, a, b).is_some(), "{:?} {:?} {:?}", op, a, b);
                }
            }
        }
    }

    #[test]
    fn test_picked_signatures_match_operands() {
        for left in C::iter() {
            for right in C::iter() {
                if let Some(f) = pick(BinaryOp::Sub, left, right) {
                    assert_eq!(f.params(), &[left, right]);
                }
            }
        }
    }
}
