//! Short-circuit `&&` and `||`, `xor`, and the coalesce operator.

use crate::compiler::ast::{BinaryOp, Expr};
use crate::compiler::bytecode::NativeOp;
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

pub(super) fn emit(l: &mut Lowerer<'_>, op: BinaryOp, left: &Expr, right: &Expr) -> Result<CarrierType, LowerError> {
    match op {
        BinaryOp::And | BinaryOp::Or => short_circuit(l, op == BinaryOp::And, left, right),
        BinaryOp::Xor => {
            l.emit_as(left, CarrierType::Bool)?;
            l.emit_as(right, CarrierType::Bool)?;
            l.em.native(NativeOp::Xor)
        }
        _ => coalesce(l, left, right),
    }
}

/// `a && b` / `a || b`: `b` runs only when `a` does not decide the result.
fn short_circuit(l: &mut Lowerer<'_>, is_and: bool, left: &Expr, right: &Expr) -> Result<CarrierType, LowerError> {
    let decided = l.em.define_label();
    let end = l.em.define_label();
    l.emit_as(left, CarrierType::Bool)?;
    if is_and {
        l.em.br_false(decided)?;
    } else {
        l.em.br_true(decided)?;
    }
    l.emit_as(right, CarrierType::Bool)?;
    l.em.br(end)?;
    l.em.mark_label(decided)?;
    l.em.ld_bool(!is_and);
    l.em.mark_label(end)?;
    Ok(CarrierType::Bool)
}

/// `a ?? b`: `a` is read quietly and evaluated once; `b` runs only when
/// `a` is unset or null.
fn coalesce(l: &mut Lowerer<'_>, left: &Expr, right: &Expr) -> Result<CarrierType, LowerError> {
    let lt = l.emit(left)?;
    let lt = convert::normalize_operand(&mut l.em, lt)?;
    if lt != CarrierType::DynamicValue {
        // a typed carrier is never null; the right side is dead
        return Ok(lt);
    }
    let tmp = l.em.get_temp(CarrierType::DynamicValue);
    l.em.st_loc(tmp)?;
    let use_right = l.em.define_label();
    let end = l.em.define_label();
    l.em.ld_loc(tmp);
    l.em.call(RuntimeFn::ValueIsSet)?;
    l.em.br_false(use_right)?;
    l.em.ld_loc(tmp);
    l.em.br(end)?;
    l.em.mark_label(use_right)?;
    l.emit_as(right, CarrierType::DynamicValue)?;
    l.em.mark_label(end)?;
    l.em.return_temp(tmp);
    Ok(CarrierType::DynamicValue)
}
