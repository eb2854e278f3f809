//! Conversions between carriers.
//!
//! `convert` is total over value carriers: any pair without a direct
//! runtime function is routed through `DynamicValue`.

use crate::compiler::bytecode::NativeOp;
use crate::compiler::carrier::CarrierType;
use crate::compiler::emitter::Emitter;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;

type C = CarrierType;

fn no_rule(em: &Emitter, from: CarrierType, to: CarrierType) -> LowerError {
    LowerError::NoRule {
        op: "convert".to_string(),
        left: from,
        right: to,
        span: em.span(),
    }
}

/// Converts the value on top of the stack from `from` to `to`.
pub fn convert(em: &mut Emitter, from: CarrierType, to: CarrierType) -> Result<CarrierType, LowerError> {
    if from == to || from.is_subtype_of(to) {
        return Ok(from);
    }
    if to == C::Void {
        if from != C::Void {
            em.pop()?;
        }
        return Ok(C::Void);
    }
    if (!from.is_value() && from != C::Void) || !to.is_value() {
        return Err(no_rule(em, from, to));
    }
    match to {
        C::DynamicValue => to_value(em, from),
        C::Bool => to_bool(em, from),
        C::Int => to_int(em, from),
        C::Float => to_float(em, from),
        C::Number => to_number(em, from),
        C::String => to_string(em, from),
        C::MutableString => {
            to_string(em, from)?;
            em.call(RuntimeFn::StringToMutableString)
        }
        C::Array => via_value(em, from, RuntimeFn::ValueToArray),
        C::ArrayLike => via_value(em, from, RuntimeFn::ValueAsArrayLike),
        C::Object => via_value(em, from, RuntimeFn::ValueToObject),
        C::Alias => via_value(em, from, RuntimeFn::ValueToAlias),
        C::I4 => {
            to_int(em, from)?;
            Err(no_rule(em, C::Int, C::I4))
        }
        _ => Err(no_rule(em, from, to)),
    }
}

/// Boxes any value carrier into a dynamic value.
pub fn to_value(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    let f = match from {
        C::DynamicValue => return Ok(from),
        C::Void => return Ok(em.ld_null()),
        C::I4 => {
            em.conv_int()?;
            RuntimeFn::IntToValue
        }
        C::Bool => RuntimeFn::BoolToValue,
        C::Int => RuntimeFn::IntToValue,
        C::Float => RuntimeFn::FloatToValue,
        C::Number => RuntimeFn::NumberToValue,
        C::String => RuntimeFn::StringToValue,
        C::MutableString => RuntimeFn::MutableStringToValue,
        C::Array => RuntimeFn::ArrayToValue,
        C::ArrayLike => RuntimeFn::ArrayLikeToValue,
        C::Object => RuntimeFn::ObjectToValue,
        C::Alias => RuntimeFn::AliasGet,
        other => return Err(no_rule(em, other, C::DynamicValue)),
    };
    em.call(f)
}

fn via_value(em: &mut Emitter, from: CarrierType, f: RuntimeFn) -> Result<CarrierType, LowerError> {
    to_value(em, from)?;
    em.call(f)
}

pub fn to_bool(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::Bool => Ok(C::Bool),
        C::Void => Ok(em.ld_bool(false)),
        C::I4 | C::Int => {
            if from == C::I4 {
                em.conv_int()?;
            }
            em.ld_int(0);
            em.native(NativeOp::Ceq)?;
            em.native(NativeOp::Not)
        }
        C::Float => {
            em.ld_float(0.0);
            em.native(NativeOp::Ceq)?;
            em.native(NativeOp::Not)
        }
        C::Number => em.call(RuntimeFn::NumberToBool),
        C::String => em.call(RuntimeFn::StringToBool),
        C::MutableString => {
            em.call(RuntimeFn::MutableStringToString)?;
            em.call(RuntimeFn::StringToBool)
        }
        C::Array => em.call(RuntimeFn::ArrayToBool),
        C::Object => {
            em.pop()?;
            Ok(em.ld_bool(true))
        }
        _ => via_value(em, from, RuntimeFn::ValueToBool),
    }
}

pub fn to_int(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::Int => Ok(C::Int),
        C::Void => Ok(em.ld_int(0)),
        C::Bool | C::I4 => em.conv_int(),
        C::Float => em.call(RuntimeFn::FloatToInt),
        C::Number => em.call(RuntimeFn::NumberToInt),
        C::String => em.call(RuntimeFn::StringToInt),
        C::MutableString => {
            em.call(RuntimeFn::MutableStringToString)?;
            em.call(RuntimeFn::StringToInt)
        }
        _ => via_value(em, from, RuntimeFn::ValueToInt),
    }
}

pub fn to_float(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::Float => Ok(C::Float),
        C::Void => Ok(em.ld_float(0.0)),
        C::Int | C::I4 => em.conv_float(),
        C::Bool => {
            em.conv_int()?;
            em.conv_float()
        }
        C::Number => em.call(RuntimeFn::NumberToFloat),
        C::String => em.call(RuntimeFn::StringToFloat),
        C::MutableString => {
            em.call(RuntimeFn::MutableStringToString)?;
            em.call(RuntimeFn::StringToFloat)
        }
        _ => via_value(em, from, RuntimeFn::ValueToFloat),
    }
}

pub fn to_number(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::Number => Ok(C::Number),
        C::Void => {
            em.ld_int(0);
            em.call(RuntimeFn::IntToNumber)
        }
        C::Int => em.call(RuntimeFn::IntToNumber),
        C::Bool | C::I4 => {
            em.conv_int()?;
            em.call(RuntimeFn::IntToNumber)
        }
        C::Float => em.call(RuntimeFn::FloatToNumber),
        C::String => em.call(RuntimeFn::StringToNumber),
        C::MutableString => {
            em.call(RuntimeFn::MutableStringToString)?;
            em.call(RuntimeFn::StringToNumber)
        }
        _ => via_value(em, from, RuntimeFn::ValueToNumber),
    }
}

pub fn to_string(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::String => Ok(C::String),
        C::Void => Ok(em.ld_str("")),
        C::Int => em.call(RuntimeFn::IntToString),
        C::I4 => {
            em.conv_int()?;
            em.call(RuntimeFn::IntToString)
        }
        C::Bool => em.call(RuntimeFn::BoolToString),
        C::Float => em.call(RuntimeFn::FloatToString),
        C::Number => em.call(RuntimeFn::NumberToString),
        C::MutableString => em.call(RuntimeFn::MutableStringToString),
        C::Array => em.call(RuntimeFn::ArrayToString),
        _ => via_value(em, from, RuntimeFn::ValueToString),
    }
}

/// Dereferences an alias and widens machine integers; every operand goes
/// through this before operator dispatch.
pub fn normalize_operand(em: &mut Emitter, from: CarrierType) -> Result<CarrierType, LowerError> {
    match from {
        C::Alias => em.call(RuntimeFn::AliasGet),
        C::I4 => em.conv_int(),
        C::Void => Ok(em.ld_null()),
        other => Ok(other),
    }
}

/// Converts the value *below* the top of stack, keeping the top in place.
pub fn convert_under(em: &mut Emitter, from: CarrierType, to: CarrierType) -> Result<CarrierType, LowerError> {
    if from == to {
        return Ok(to);
    }
    let tmp = em.spill()?;
    let converted = convert(em, from, to)?;
    em.unspill(tmp);
    Ok(converted)
}

/// Pushes the default value of a carrier.
pub fn emit_default(em: &mut Emitter, carrier: CarrierType) -> Result<CarrierType, LowerError> {
    match carrier {
        C::Bool => Ok(em.ld_bool(false)),
        C::Int => Ok(em.ld_int(0)),
        C::I4 => Ok(em.ld_i4(0)),
        C::Float => Ok(em.ld_float(0.0)),
        C::Number => {
            em.ld_int(0);
            em.call(RuntimeFn::IntToNumber)
        }
        C::String => Ok(em.ld_str("")),
        C::MutableString => em.call(RuntimeFn::NewMutableString),
        C::Array | C::ArrayLike => Ok(em.ld_empty_array()),
        C::DynamicValue => Ok(em.ld_null()),
        C::Alias => {
            em.ld_null();
            em.call(RuntimeFn::ValueToAlias)
        }
        C::Object => {
            em.ld_null();
            em.call(RuntimeFn::ValueToObject)
        }
        C::Void => Ok(C::Void),
        other => Err(no_rule(em, C::Void, other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::bytecode::Instr;

    #[test]
    fn test_subtype_needs_no_code() {
        let mut em = Emitter::new();
        em.ld_empty_array();
        let before = em.position();
        assert_eq!(convert(&mut em, C::Array, C::ArrayLike).unwrap(), C::Array);
        assert_eq!(em.position(), before);
    }

    #[test]
    fn test_int_to_bool_is_native() {
        let mut em = Emitter::new();
        em.ld_int(3);
        assert_eq!(convert(&mut em, C::Int, C::Bool).unwrap(), C::Bool);
        let body = em.finish_for_test();
        assert!(body.runtime_calls().is_empty());
        assert!(body.instrs.contains(&Instr::Native(NativeOp::Ceq)));
    }

    #[test]
    fn test_array_to_int_routes_through_value() {
        let mut em = Emitter::new();
        em.ld_empty_array();
        convert(&mut em, C::Array, C::Int).unwrap();
        let body = em.finish_for_test();
        assert_eq!(body.runtime_calls(), vec![RuntimeFn::ArrayToValue, RuntimeFn::ValueToInt]);
    }

    #[test]
    fn test_plumbing_has_no_conversion() {
        let mut em = Emitter::new();
        em.ld_context();
        assert!(matches!(convert(&mut em, C::Context, C::DynamicValue), Err(LowerError::NoRule { .. })));
    }

    #[test]
    fn test_convert_under_keeps_top() {
        let mut em = Emitter::new();
        em.ld_int(1);
        em.ld_str("x");
        convert_under(&mut em, C::Int, C::DynamicValue).unwrap();
        assert_eq!(em.stack(), &[C::DynamicValue, C::String]);
    }

    impl Emitter {
        fn finish_for_test(mut self) -> crate::compiler::bytecode::CodeBody {
            while self.top().is_some() {
                self.pop().unwrap();
            }
            self.finish().unwrap()
        }
    }
}
