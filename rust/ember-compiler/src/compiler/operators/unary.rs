//! `! - + ~` and `print`.

use crate::compiler::ast::{Expr, ExprKind, UnaryOp};
use crate::compiler::bytecode::NativeOp;
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

type C = CarrierType;

pub fn emit(l: &mut Lowerer<'_>, op: UnaryOp, operand: &Expr) -> Result<CarrierType, LowerError> {
    match op {
        UnaryOp::Not => {
            if let ExprKind::Unary {
                op: UnaryOp::Not,
                operand: inner,
            } = &operand.kind
            {
                // !!x is a bool conversion
                return l.emit_as(inner, C::Bool);
            }
            l.emit_as(operand, C::Bool)?;
            l.em.native(NativeOp::Not)
        }
        UnaryOp::Neg => {
            let t = l.emit_operand(operand, true)?;
            match t {
                C::Float => l.em.native(NativeOp::Neg),
                C::Int => l.em.call(RuntimeFn::NegInt),
                C::Bool => {
                    l.em.conv_int()?;
                    l.em.call(RuntimeFn::NegInt)
                }
                _ => {
                    convert::to_number(&mut l.em, t)?;
                    l.em.call(RuntimeFn::NegNumber)
                }
            }
        }
        UnaryOp::Plus => {
            let t = l.emit_operand(operand, true)?;
            match t {
                C::Int | C::Float | C::Number => Ok(t),
                C::Bool => l.em.conv_int(),
                _ => convert::to_number(&mut l.em, t),
            }
        }
        UnaryOp::BitNot => {
            let t = l.emit_operand(operand, true)?;
            match t {
                C::Int => l.em.native(NativeOp::Not),
                C::Float => {
                    l.em.call(RuntimeFn::FloatToInt)?;
                    l.em.native(NativeOp::Not)
                }
                _ => {
                    convert::to_value(&mut l.em, t)?;
                    l.em.call(RuntimeFn::BitNotValue)
                }
            }
        }
        UnaryOp::Print => {
            l.em.ld_context();
            l.emit_as(operand, C::String)?;
            l.em.call(RuntimeFn::Echo)?;
            Ok(l.em.ld_int(1))
        }
    }
}
