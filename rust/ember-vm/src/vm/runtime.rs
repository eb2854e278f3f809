//! Runtime-support functions called by lowered code.

use super::callsite::Binder;
use super::frame::{Frame, Slot};
use super::{VmError, VM};
use ember_compiler::compiler::bytecode::Module;
use ember_compiler::compiler::callsite::BinderKind;
use ember_compiler::compiler::carrier::CarrierType;
use ember_compiler::compiler::runtime_fns::RuntimeFn;
use ember_core::compare::{compare, compare_strings, loose_eq, strict_eq};
use ember_core::convert::{
    float_to_string, str_to_bool, str_to_number, to_array, to_array_key, to_bool, to_double, to_long, to_number,
    to_object, to_php_string,
};
use ember_core::number::float_to_long;
use ember_core::ops::{self, BitOp};
use ember_core::string::string_byte_at;
use ember_core::{ArrayKey, ArrayLike, MutableString, Number, PhpArray, RuntimeError, Value};
use std::rc::Rc;

type NumberOp = fn(&Value, &Value) -> Result<Number, RuntimeError>;

fn pop_pair(frame: &mut Frame) -> Result<(Value, Value), VmError> {
    let b = frame.pop()?.into_value().deref();
    let a = frame.pop()?.into_value().deref();
    Ok((a, b))
}

/// `+ - *` through the generic number operators; the result carrier is the
/// function's declared one.
fn arith(frame: &mut Frame, f: RuntimeFn, op: NumberOp) -> Result<Slot, VmError> {
    let (a, b) = pop_pair(frame)?;
    let n = op(&a, &b)?;
    Ok(if f.returns() == CarrierType::Float {
        Slot::Float(n.to_f64())
    } else {
        Slot::Number(n)
    })
}

fn non_empty(s: Rc<str>) -> Option<Rc<str>> {
    (!s.is_empty()).then_some(s)
}

fn key_text(key: &ArrayKey) -> String {
    match key {
        ArrayKey::Int(n) => n.to_string(),
        ArrayKey::Str(s) => format!("\"{}\"", s),
    }
}

impl VM {
    /// Runs runtime function `f` against the top of `frame`'s stack.
    pub(crate) fn call_runtime(&mut self, module: &Rc<Module>, f: RuntimeFn, frame: &mut Frame) -> Result<(), VmError> {
        use RuntimeFn::*;
        let result = match f {
            // ── Boxing ──
            BoolToValue => Slot::Value(Value::Bool(frame.pop_bool()?)),
            IntToValue => Slot::Value(Value::Int(frame.pop_int()?)),
            FloatToValue => Slot::Value(Value::Float(frame.pop_float()?)),
            NumberToValue => Slot::Value(ops::number_value(frame.pop_number()?)),
            StringToValue => Slot::Value(Value::String(frame.pop_str()?)),
            MutableStringToValue => Slot::Value(Value::MutableString(frame.pop_mutable_string()?)),
            ArrayToValue => Slot::Value(Value::Array(frame.pop_array()?)),
            ArrayLikeToValue => Slot::Value(frame.pop_array_like()?.to_value()),
            ObjectToValue => Slot::Value(Value::Object(frame.pop_object()?)),
            AliasGet => Slot::Value(frame.pop_alias()?.get().deref()),
            AliasSet => {
                let value = frame.pop_value()?;
                frame.pop_alias()?.set(value.deref());
                return Ok(());
            }
            ValueToAlias => Slot::Alias(match frame.pop_value()? {
                Value::Alias(alias) => alias,
                other => ember_core::Alias::new(other),
            }),

            // ── Conversions ──
            IntToNumber => Slot::Number(Number::Int(frame.pop_int()?)),
            FloatToNumber => Slot::Number(Number::Float(frame.pop_float()?)),
            FloatToInt => Slot::Int(float_to_long(frame.pop_float()?)),
            ValueToBool => Slot::Bool(to_bool(&frame.pop_value()?)),
            ValueToInt => Slot::Int(to_long(&frame.pop_value()?)),
            ValueToFloat => Slot::Float(to_double(&frame.pop_value()?)),
            ValueToNumber => Slot::Number(to_number(&frame.pop_value()?)?),
            ValueToString => {
                let value = frame.pop_value()?;
                Slot::Str(self.value_to_string(&value)?)
            }
            ValueToArray => match to_array(&frame.pop_value()?) {
                Value::Array(arr) => Slot::Array(arr),
                _ => Slot::Array(PhpArray::new().into_ref()),
            },
            ValueToObject => Slot::Object(to_object(&frame.pop_value()?)),
            ValueAsArrayLike => {
                let value = frame.pop_value()?;
                Slot::ArrayLike(self.as_array_like(value, false)?)
            }
            ValueAsArrayLikeQuiet => {
                let value = frame.pop_value()?;
                Slot::ArrayLike(self.as_array_like(value, true)?)
            }
            NumberToBool => Slot::Bool(frame.pop_number()?.to_bool()),
            NumberToInt => Slot::Int(frame.pop_number()?.to_i64()),
            NumberToFloat => Slot::Float(frame.pop_number()?.to_f64()),
            NumberToString => Slot::Str(Rc::from(to_php_string(&ops::number_value(frame.pop_number()?))?)),
            StringToBool => Slot::Bool(str_to_bool(&frame.pop_str()?)),
            StringToInt => Slot::Int(str_to_number(&frame.pop_str()?).0.to_i64()),
            StringToFloat => Slot::Float(str_to_number(&frame.pop_str()?).0.to_f64()),
            StringToNumber => Slot::Number(str_to_number(&frame.pop_str()?).0),
            StringToMutableString => Slot::MutableString(MutableString::from(&*frame.pop_str()?)),
            MutableStringToString => Slot::Str(Rc::from(frame.pop_mutable_string()?.to_string_lossy())),
            IntToString => Slot::Str(Rc::from(frame.pop_int()?.to_string())),
            FloatToString => Slot::Str(Rc::from(float_to_string(frame.pop_float()?))),
            BoolToString => Slot::Str(Rc::from(if frame.pop_bool()? { "1" } else { "" })),
            ArrayToBool => Slot::Bool(!frame.pop_array()?.borrow().is_empty()),
            ArrayToString => {
                frame.pop_array()?;
                self.notice("Array to string conversion".to_string());
                Slot::Str(Rc::from("Array"))
            }
            DeepCopyArray => Slot::Array(frame.pop_array()?.borrow().deep_copy().into_ref()),
            DeepCopyValue => Slot::Value(frame.pop_value()?.deep_copy()),
            StringIsEmpty => {
                let s = frame.pop_str()?;
                Slot::Bool(s.is_empty() || &*s == "0")
            }
            StringEqNull => Slot::Bool(frame.pop_str()?.is_empty()),
            ValueIsSet => Slot::Bool(frame.pop_value()?.is_set()),

            // ── Arithmetic ──
            AddIntInt | AddIntFloat | AddIntNumber | AddIntValue | AddFloatNumber | AddFloatValue | AddNumberInt
            | AddNumberFloat | AddNumberNumber | AddNumberValue | AddValueInt | AddValueFloat | AddValueNumber => {
                arith(frame, f, ops::add_number)?
            }
            SubIntInt | SubIntFloat | SubIntNumber | SubIntValue | SubFloatNumber | SubFloatValue | SubNumberInt
            | SubNumberFloat | SubNumberNumber | SubNumberValue | SubValueInt | SubValueFloat | SubValueNumber
            | SubValueValue => arith(frame, f, ops::sub)?,
            MulIntInt | MulIntFloat | MulIntNumber | MulIntValue | MulFloatNumber | MulFloatValue | MulNumberInt
            | MulNumberFloat | MulNumberNumber | MulNumberValue | MulValueInt | MulValueFloat | MulValueNumber
            | MulValueValue => arith(frame, f, ops::mul)?,
            AddValueValue | AddArrayValue => {
                let (a, b) = pop_pair(frame)?;
                Slot::Value(ops::add(&a, &b)?)
            }
            AddArrayArray => {
                let b = frame.pop_array()?;
                let a = frame.pop_array()?;
                let union = a.borrow().union(&b.borrow());
                Slot::Array(union.into_ref())
            }
            DivNumberNumber => {
                let b = frame.pop_number()?;
                Slot::Number(frame.pop_number()?.div(b)?)
            }
            ModNumberNumber => {
                let b = frame.pop_number()?;
                Slot::Int(frame.pop_number()?.rem(b)?)
            }
            PowNumberNumber => {
                let b = frame.pop_number()?;
                Slot::Number(frame.pop_number()?.pow(b))
            }
            NegInt => Slot::Number(Number::Int(frame.pop_int()?).neg()),
            NegNumber => Slot::Number(frame.pop_number()?.neg()),

            // ── Bitwise ──
            BitAndValueValue | BitOrValueValue | BitXorValueValue => {
                let (a, b) = pop_pair(frame)?;
                let op = match f {
                    BitAndValueValue => BitOp::And,
                    BitOrValueValue => BitOp::Or,
                    _ => BitOp::Xor,
                };
                Slot::Value(ops::bitwise(op, &a, &b)?)
            }
            BitNotValue => Slot::Value(ops::bit_not(&frame.pop_value()?)?),
            ShlIntInt => {
                let count = frame.pop_int()?;
                Slot::Int(ops::shift_left(frame.pop_int()?, count)?)
            }
            ShrIntInt => {
                let count = frame.pop_int()?;
                Slot::Int(ops::shift_right(frame.pop_int()?, count)?)
            }

            // ── Comparison ──
            CompareStringString => {
                let b = frame.pop_str()?;
                let a = frame.pop_str()?;
                Slot::I4(compare_strings(&a, &b))
            }
            CompareIntInt | CompareIntFloat | CompareIntValue | CompareFloatFloat | CompareFloatValue
            | CompareBoolBool | CompareStringValue | CompareNumberNumber | CompareNumberValue | CompareValueValue => {
                let (a, b) = pop_pair(frame)?;
                Slot::I4(compare(&a, &b))
            }
            EqIntFloat | EqIntBool | EqIntString | EqIntNumber | EqFloatString | EqStringInt | EqStringBool
            | EqStringFloat | EqNumberInt | EqNumberFloat | EqNumberNumber | EqNumberValue | EqValueString
            | EqValueValue => {
                let (a, b) = pop_pair(frame)?;
                Slot::Bool(loose_eq(&a, &b))
            }
            EqNull | StrictEqNull => Slot::Bool(frame.pop_value()?.is_null()),
            StrictEqIntNumber | StrictEqFloatNumber | StrictEqNumberNumber | StrictEqBoolValue | StrictEqIntValue
            | StrictEqFloatValue | StrictEqValueBool | StrictEqStringString | StrictEqValueValue => {
                let (a, b) = pop_pair(frame)?;
                Slot::Bool(strict_eq(&a, &b))
            }

            // ── Strings and output ──
            NewMutableString => Slot::MutableString(MutableString::new()),
            MutableStringAppend => {
                let s = frame.pop_str()?;
                let buf = frame.pop_mutable_string()?;
                buf.append(&s);
                Slot::MutableString(buf)
            }
            Echo => {
                let s = frame.pop_str()?;
                frame.pop_context()?;
                self.output.push(s.to_string());
                return Ok(());
            }

            // ── Reading items ──
            ArrayGetKey | ArrayTryGetKey => {
                let key = frame.pop_key()?;
                let arr = frame.pop_array()?;
                let arr = arr.borrow();
                Slot::Value(self.array_item(&arr, &key, f == ArrayTryGetKey))
            }
            ArrayGet | ArrayTryGet => {
                let key = frame.pop_value()?;
                let arr = frame.pop_array()?;
                let key = to_array_key(&key)?;
                let arr = arr.borrow();
                Slot::Value(self.array_item(&arr, &key, f == ArrayTryGet))
            }
            StringGetItem | StringTryGetItem => {
                let key = frame.pop_value()?;
                let s = frame.pop_str()?;
                Slot::Value(self.string_item(s.as_bytes(), &key, f == StringTryGetItem)?)
            }
            ArrayLikeGet | ArrayLikeTryGet => {
                let key = frame.pop_value()?;
                let target = frame.pop_array_like()?.to_value();
                Slot::Value(self.item_of(&target, &key, f == ArrayLikeTryGet)?)
            }
            ValueGetItem | ValueTryGetItem => {
                let key = frame.pop_value()?;
                let target = frame.pop_value()?;
                Slot::Value(self.item_of(&target, &key, f == ValueTryGetItem)?)
            }
            ObjectOffsetGet => {
                let key = frame.pop_value()?;
                let obj = frame.pop_object()?;
                Slot::Value(ArrayLike::Object(obj).get_item_dyn(&key)?.deref())
            }
            ObjectOffsetSet => {
                let value = frame.pop_value()?;
                let key = frame.pop_value()?;
                let obj = frame.pop_object()?;
                ArrayLike::Object(obj).set_item_dyn(&key, value.deref())?;
                return Ok(());
            }
            ObjectOffsetUnset => {
                let key = frame.pop_value()?;
                ArrayLike::Object(frame.pop_object()?).remove_item_dyn(&key)?;
                return Ok(());
            }

            // ── Ensuring items ──
            ArrayEnsureItemArrayKey | ArrayEnsureItemObjectKey | ArrayEnsureItemAliasKey => {
                let key = frame.pop_key()?;
                let arr = frame.pop_array()?;
                let mut arr = arr.borrow_mut();
                match f {
                    ArrayEnsureItemArrayKey => Slot::ArrayLike(arr.ensure_item_array(key)?),
                    ArrayEnsureItemObjectKey => Slot::Object(arr.ensure_item_object(key)?),
                    _ => Slot::Alias(arr.ensure_item_alias(key)),
                }
            }
            ArrayEnsureItemArray | ArrayEnsureItemObject | ArrayEnsureItemAlias => {
                let key = to_array_key(&frame.pop_value()?)?;
                let arr = frame.pop_array()?;
                let mut arr = arr.borrow_mut();
                match f {
                    ArrayEnsureItemArray => Slot::ArrayLike(arr.ensure_item_array(key)?),
                    ArrayEnsureItemObject => Slot::Object(arr.ensure_item_object(key)?),
                    _ => Slot::Alias(arr.ensure_item_alias(key)),
                }
            }
            ArrayLikeEnsureItemArray | ArrayLikeEnsureItemObject | ArrayLikeEnsureItemAlias => {
                let key = to_array_key(&frame.pop_value()?)?;
                let target = frame.pop_array_like()?;
                match f {
                    ArrayLikeEnsureItemArray => Slot::ArrayLike(target.ensure_item_array(key)?),
                    ArrayLikeEnsureItemObject => Slot::Object(target.ensure_item_object(key)?),
                    _ => Slot::Alias(target.ensure_item_alias(key)?),
                }
            }

            // ── Writing items ──
            ArraySetKey => {
                let value = frame.pop_value()?;
                let key = frame.pop_key()?;
                frame.pop_array()?.borrow_mut().set_item_value(key, value.deref());
                return Ok(());
            }
            ArraySet => {
                let value = frame.pop_value()?;
                let key = to_array_key(&frame.pop_value()?)?;
                frame.pop_array()?.borrow_mut().set_item_value(key, value.deref());
                return Ok(());
            }
            ArrayAdd => {
                let value = frame.pop_value()?;
                frame.pop_array()?.borrow_mut().add_value(value.deref())?;
                return Ok(());
            }
            ArraySetAliasKey => {
                let alias = frame.pop_alias()?;
                let key = frame.pop_key()?;
                frame.pop_array()?.borrow_mut().set_item_alias(key, alias);
                return Ok(());
            }
            ArraySetAlias => {
                let alias = frame.pop_alias()?;
                let key = to_array_key(&frame.pop_value()?)?;
                frame.pop_array()?.borrow_mut().set_item_alias(key, alias);
                return Ok(());
            }
            ArrayAddAlias => {
                let alias = frame.pop_alias()?;
                frame.pop_array()?.borrow_mut().add_value(Value::Alias(alias))?;
                return Ok(());
            }
            ArrayRemoveKey => {
                let key = frame.pop_key()?;
                frame.pop_array()?.borrow_mut().remove_key(&key);
                return Ok(());
            }
            ArrayRemove => {
                let key = to_array_key(&frame.pop_value()?)?;
                frame.pop_array()?.borrow_mut().remove_key(&key);
                return Ok(());
            }
            ArrayLikeSet => {
                let value = frame.pop_value()?;
                let key = frame.pop_value()?;
                frame.pop_array_like()?.set_item_dyn(&key, value.deref())?;
                return Ok(());
            }
            ArrayLikeAdd => {
                let value = frame.pop_value()?;
                frame.pop_array_like()?.add_item(value.deref())?;
                return Ok(());
            }
            ArrayLikeSetAlias => {
                let alias = frame.pop_alias()?;
                let key = to_array_key(&frame.pop_value()?)?;
                frame.pop_array_like()?.set_item_alias(key, alias)?;
                return Ok(());
            }
            ArrayLikeAddAlias => {
                let alias = frame.pop_alias()?;
                frame.pop_array_like()?.add_alias(alias)?;
                return Ok(());
            }
            ArrayLikeRemove => {
                let key = frame.pop_value()?;
                frame.pop_array_like()?.remove_item_dyn(&key)?;
                return Ok(());
            }
            ValueRemoveItem => {
                let key = frame.pop_value()?;
                let target = frame.pop_value()?;
                match target.deref() {
                    Value::Void | Value::Null => {}
                    Value::Array(arr) => {
                        arr.borrow_mut().remove_key(&to_array_key(&key)?);
                    }
                    Value::Object(obj) => ArrayLike::Object(obj).remove_item_dyn(&key)?,
                    Value::String(_) | Value::MutableString(_) => {
                        return Err(RuntimeError::StringOffset("cannot unset string offsets".into()).into())
                    }
                    other => return Err(RuntimeError::NotIndexable(other.type_name()).into()),
                }
                return Ok(());
            }

            // ── Storage by address ──
            EnsureArrayRef => {
                let local = frame.pop_ref()?;
                Slot::ArrayLike(frame.ensure_array_at(local)?)
            }
            EnsureObjectRef => {
                let local = frame.pop_ref()?;
                Slot::Object(frame.ensure_object_at(local)?)
            }
            EnsureAliasRef => {
                let local = frame.pop_ref()?;
                Slot::Alias(frame.make_reference(local)?)
            }
            AliasEnsureArray => Slot::ArrayLike(frame.pop_alias()?.ensure_array()?),
            AliasEnsureObject => Slot::Object(frame.pop_alias()?.ensure_object()?),

            // ── Properties ──
            ObjectGetProperty | ObjectTryGetProperty => {
                let name = frame.pop_str()?;
                let obj = frame.pop_object()?;
                Slot::Value(self.property_of(&Value::Object(obj), &name, f == ObjectTryGetProperty))
            }
            ValueGetProperty | ValueTryGetProperty => {
                let name = frame.pop_str()?;
                let target = frame.pop_value()?;
                Slot::Value(self.property_of(&target, &name, f == ValueTryGetProperty))
            }
            ObjectEnsurePropertyArray => {
                let name = frame.pop_str()?;
                Slot::ArrayLike(frame.pop_object()?.ensure_property_array(&name)?)
            }
            ObjectEnsurePropertyObject => {
                let name = frame.pop_str()?;
                Slot::Object(frame.pop_object()?.ensure_property_object(&name)?)
            }
            ObjectEnsurePropertyAlias => {
                let name = frame.pop_str()?;
                Slot::Alias(frame.pop_object()?.ensure_property_alias(&name))
            }
            ObjectSetProperty => {
                let value = frame.pop_value()?;
                let name = frame.pop_str()?;
                frame.pop_object()?.set_property(&name, value.deref());
                return Ok(());
            }
            ObjectSetPropertyAlias => {
                let alias = frame.pop_alias()?;
                let name = frame.pop_str()?;
                frame.pop_object()?.set_property_alias(&name, alias);
                return Ok(());
            }
            ObjectUnsetProperty => {
                let name = frame.pop_str()?;
                frame.pop_object()?.unset_property(&name);
                return Ok(());
            }
            ValueUnsetProperty => {
                let name = frame.pop_str()?;
                if let Some(obj) = frame.pop_value()?.as_object() {
                    obj.unset_property(&name);
                }
                return Ok(());
            }

            // ── Dynamic calls ──
            BinderFunction | BinderInstanceFunction => {
                let caller = frame.pop_type_token()?;
                let name = frame.pop_str()?;
                let kind = if f == BinderFunction {
                    BinderKind::Function
                } else {
                    BinderKind::InstanceFunction
                };
                Slot::Binder(Rc::new(Binder {
                    kind,
                    name: non_empty(name),
                    class: None,
                    caller,
                }))
            }
            BinderStaticFunction => {
                let caller = frame.pop_type_token()?;
                let name = frame.pop_str()?;
                let class = frame.pop_type_token()?;
                Slot::Binder(Rc::new(Binder {
                    kind: BinderKind::StaticFunction,
                    name: non_empty(name),
                    class,
                    caller,
                }))
            }
            MakeNameParam => Slot::Name(frame.pop_str()?),
            TypeTokenFromName => {
                let name = frame.pop_str()?;
                Slot::TypeToken(Some(Rc::from(name.trim_start_matches('\\'))))
            }
            MakeTypeArgs => {
                frame.pop_str()?;
                Slot::TypeArgs
            }
            WrapUnpacking => Slot::Unpacking(frame.pop_value()?),
            InvokeCallable => {
                let args = frame.pop_array()?;
                let callable = frame.pop_value()?;
                frame.pop_context()?;
                let args: Vec<Value> = args.borrow().values().map(Value::deref).collect();
                let result = self.invoke_callable(module, &callable, args, frame)?;
                Slot::Value(result.deref())
            }
        };
        frame.push(result);
        Ok(())
    }

    /// Item `key` of an array. A missing key is `Void` when `quiet`, otherwise
    /// a notice and `null`.
    fn array_item(&mut self, arr: &PhpArray, key: &ArrayKey, quiet: bool) -> Value {
        match arr.get(key) {
            Some(value) => value.deref(),
            None if quiet => Value::Void,
            None => {
                self.notice(format!("Undefined array key {}", key_text(key)));
                Value::Null
            }
        }
    }

    fn string_item(&mut self, s: &[u8], key: &Value, quiet: bool) -> Result<Value, VmError> {
        let offset = match to_array_key(key) {
            Ok(ArrayKey::Int(n)) => n,
            _ if quiet => return Ok(Value::Void),
            _ => {
                return Err(RuntimeError::StringOffset(format!("cannot access offset '{}' on string", key)).into())
            }
        };
        match string_byte_at(s, offset) {
            Some(b) => Ok(Value::from_bytes(vec![b])),
            None if quiet => Ok(Value::Void),
            None => {
                self.notice(format!("Uninitialized string offset {}", offset));
                Ok(Value::string(""))
            }
        }
    }

    /// `$target[$key]` on any dynamic value.
    fn item_of(&mut self, target: &Value, key: &Value, quiet: bool) -> Result<Value, VmError> {
        match target.deref() {
            Value::Array(arr) => {
                let key = to_array_key(key)?;
                let arr = arr.borrow();
                Ok(self.array_item(&arr, &key, quiet))
            }
            Value::String(s) => self.string_item(s.as_bytes(), key, quiet),
            Value::MutableString(s) => self.string_item(&s.bytes(), key, quiet),
            Value::Object(obj) => match obj.indexer() {
                Some(indexer) if quiet && !indexer.offset_exists(key) => Ok(Value::Void),
                Some(indexer) => Ok(indexer.offset_get(key)?.deref()),
                None => Err(RuntimeError::NotIndexable(obj.class_name().to_string()).into()),
            },
            _ if quiet => Ok(Value::Void),
            other => {
                self.notice(format!(
                    "Trying to access array offset on value of type {}",
                    other.type_name()
                ));
                Ok(Value::Null)
            }
        }
    }

    /// Indexable view of a value about to be written through. Scalars cannot
    /// be written and yield a detached empty array.
    fn as_array_like(&mut self, value: Value, quiet: bool) -> Result<ArrayLike, VmError> {
        Ok(match value.deref() {
            Value::Array(arr) => ArrayLike::Array(arr),
            Value::MutableString(s) => ArrayLike::String(s),
            Value::String(s) if !s.is_empty() => ArrayLike::String(MutableString::from(&*s)),
            Value::Object(obj) if obj.indexer().is_some() => ArrayLike::Object(obj),
            Value::Object(obj) => return Err(RuntimeError::NotIndexable(obj.class_name().to_string()).into()),
            Value::Void | Value::Null | Value::Bool(false) | Value::String(_) => {
                ArrayLike::Array(PhpArray::new().into_ref())
            }
            other => {
                if !quiet {
                    self.notice(format!("Cannot use a scalar value of type {} as an array", other.type_name()));
                }
                ArrayLike::Array(PhpArray::new().into_ref())
            }
        })
    }

    fn property_of(&mut self, target: &Value, name: &str, quiet: bool) -> Value {
        match target.as_object() {
            Some(obj) if obj.has_property(name) => obj.get_property(name).deref(),
            _ if quiet => Value::Void,
            Some(obj) => {
                self.notice(format!("Undefined property: {}::${}", obj.class_name(), name));
                Value::Null
            }
            None => {
                self.notice(format!(
                    "Attempt to read property \"{}\" on {}",
                    name,
                    target.type_name()
                ));
                Value::Null
            }
        }
    }

    fn value_to_string(&mut self, value: &Value) -> Result<Rc<str>, VmError> {
        if value.as_array().is_some() {
            self.notice("Array to string conversion".to_string());
            return Ok(Rc::from("Array"));
        }
        Ok(Rc::from(to_php_string(value)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(vm: &mut VM, f: RuntimeFn, stack: Vec<Slot>) -> Vec<Slot> {
        let mut frame = Frame::detached();
        frame.stack = stack;
        vm.call_runtime(&Rc::new(Module::default()), f, &mut frame).unwrap();
        frame.stack
    }

    fn one_item(key: &str, value: Value) -> Slot {
        let mut arr = PhpArray::new();
        arr.set_item_value(ArrayKey::from_str_key(key), value);
        Slot::Array(arr.into_ref())
    }

    #[test]
    fn test_missing_key_notices_only_on_plain_get() {
        let mut vm = VM::new();
        let out = run(&mut vm, RuntimeFn::ArrayGetKey, vec![one_item("a", Value::Int(1)), Slot::Key(ArrayKey::Int(5))]);
        assert!(matches!(out.as_slice(), [Slot::Value(Value::Null)]));
        assert_eq!(vm.warnings, vec!["Undefined array key 5".to_string()]);

        let out = run(
            &mut vm,
            RuntimeFn::ArrayTryGet,
            vec![one_item("a", Value::Int(1)), Slot::Value(Value::string("b"))],
        );
        assert!(matches!(out.as_slice(), [Slot::Value(Value::Void)]));
        assert_eq!(vm.warnings.len(), 1);

        let out = run(
            &mut vm,
            RuntimeFn::ArrayGet,
            vec![one_item("a", Value::Int(1)), Slot::Value(Value::string("a"))],
        );
        assert!(matches!(out.as_slice(), [Slot::Value(Value::Int(1))]));
    }

    #[test]
    fn test_string_is_empty_treats_zero_as_empty() {
        let mut vm = VM::new();
        for (s, expected) in [("", true), ("0", true), ("00", false), ("a", false)] {
            let out = run(&mut vm, RuntimeFn::StringIsEmpty, vec![Slot::Str(Rc::from(s))]);
            assert!(matches!(out.as_slice(), [Slot::Bool(b)] if *b == expected), "{:?}", s);
        }
    }

    #[test]
    fn test_string_eq_null_only_matches_empty() {
        let mut vm = VM::new();
        for (s, expected) in [("", true), ("0", false), (" ", false)] {
            let out = run(&mut vm, RuntimeFn::StringEqNull, vec![Slot::Str(Rc::from(s))]);
            assert!(matches!(out.as_slice(), [Slot::Bool(b)] if *b == expected), "{:?}", s);
        }
    }

    #[test]
    fn test_string_item_keeps_raw_byte() {
        let mut vm = VM::new();
        let out = run(
            &mut vm,
            RuntimeFn::StringGetItem,
            vec![Slot::Str(Rc::from("é")), Slot::Value(Value::Int(0))],
        );
        match out.as_slice() {
            [Slot::Value(v)] => assert_eq!(v.string_bytes(), Some(vec![0xC3])),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_float_signature_yields_float() {
        let mut vm = VM::new();
        let out = run(&mut vm, RuntimeFn::AddIntFloat, vec![Slot::Int(1), Slot::Float(0.5)]);
        assert!(matches!(out.as_slice(), [Slot::Float(f)] if *f == 1.5));
        let out = run(&mut vm, RuntimeFn::AddIntInt, vec![Slot::Int(i64::MAX), Slot::Int(1)]);
        assert!(matches!(out.as_slice(), [Slot::Number(Number::Float(_))]));
        let out = run(&mut vm, RuntimeFn::ModNumberNumber, vec![Slot::Number(Number::Int(7)), Slot::Int(3)]);
        assert!(matches!(out.as_slice(), [Slot::Int(1)]));
    }

    #[test]
    fn test_scalar_as_array_like_notices_unless_quiet() {
        let mut vm = VM::new();
        run(&mut vm, RuntimeFn::ValueAsArrayLike, vec![Slot::Value(Value::Int(3))]);
        assert_eq!(vm.warnings.len(), 1);
        run(&mut vm, RuntimeFn::ValueAsArrayLikeQuiet, vec![Slot::Value(Value::Int(3))]);
        assert_eq!(vm.warnings.len(), 1);
        let out = run(&mut vm, RuntimeFn::ValueAsArrayLike, vec![Slot::Value(Value::string("ab"))]);
        assert!(matches!(out.as_slice(), [Slot::ArrayLike(ArrayLike::String(_))]));
    }

    #[test]
    fn test_array_to_string_notices() {
        let mut vm = VM::new();
        let out = run(
            &mut vm,
            RuntimeFn::ValueToString,
            vec![Slot::Value(Value::new_array(PhpArray::new()))],
        );
        assert!(matches!(out.as_slice(), [Slot::Str(s)] if &**s == "Array"));
        let out = run(&mut vm, RuntimeFn::ArrayToString, vec![Slot::Array(PhpArray::new().into_ref())]);
        assert!(matches!(out.as_slice(), [Slot::Str(s)] if &**s == "Array"));
        assert_eq!(vm.warnings, vec!["Array to string conversion".to_string(); 2]);
    }

    #[test]
    fn test_binder_with_empty_name_takes_name_per_call() {
        let mut vm = VM::new();
        let out = run(
            &mut vm,
            RuntimeFn::BinderInstanceFunction,
            vec![Slot::Str(Rc::from("")), Slot::TypeToken(None)],
        );
        match out.as_slice() {
            [Slot::Binder(b)] => {
                assert_eq!(b.kind, BinderKind::InstanceFunction);
                assert!(b.name.is_none());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_string_offsets() {
        let mut vm = VM::new();
        let out = run(
            &mut vm,
            RuntimeFn::StringGetItem,
            vec![Slot::Str(Rc::from("abc")), Slot::Value(Value::Int(-1))],
        );
        assert!(matches!(out.as_slice(), [Slot::Value(Value::String(s))] if &**s == "c"));
        run(
            &mut vm,
            RuntimeFn::StringGetItem,
            vec![Slot::Str(Rc::from("abc")), Slot::Value(Value::Int(9))],
        );
        assert_eq!(vm.warnings, vec!["Uninitialized string offset 9".to_string()]);
    }
}
