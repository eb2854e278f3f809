//! Stack slots and activation frames.

use super::callsite::{Binder, SiteHandle};
use super::VmError;
use ember_compiler::compiler::bytecode::CodeBody;
use ember_compiler::compiler::carrier::CarrierType;
use ember_core::convert::{to_array, to_bool, to_double, to_long, to_number, to_object, to_php_string};
use ember_core::ops::number_value;
use ember_core::value::{ensure_array_in, ensure_object_in};
use ember_core::{
    Alias, ArrayKey, ArrayLike, ArrayRef, MutableString, Number, ObjectRef, PhpArray, PhpObject, RuntimeError, Value,
};
use std::rc::Rc;

type C = CarrierType;

/// One evaluation-stack entry or local, in the representation of its carrier.
#[derive(Debug, Clone)]
pub(crate) enum Slot {
    Bool(bool),
    I4(i32),
    Int(i64),
    Float(f64),
    Number(Number),
    Str(Rc<str>),
    MutableString(MutableString),
    Array(ArrayRef),
    ArrayLike(ArrayLike),
    Alias(Alias),
    Value(Value),
    Object(ObjectRef),
    Key(ArrayKey),
    /// Address of a local in the running frame.
    Ref(u32),
    Context,
    TypeToken(Option<Rc<str>>),
    TypeArgs,
    Name(Rc<str>),
    Unpacking(Value),
    CallSite(SiteHandle),
    Binder(Rc<Binder>),
}

impl Slot {
    /// Initial value of a local of `carrier`.
    pub(crate) fn default_for(carrier: CarrierType) -> Slot {
        match carrier {
            C::Bool => Slot::Bool(false),
            C::I4 => Slot::I4(0),
            C::Int => Slot::Int(0),
            C::Float => Slot::Float(0.0),
            C::Number => Slot::Number(Number::Int(0)),
            C::String => Slot::Str(Rc::from("")),
            C::MutableString => Slot::MutableString(MutableString::new()),
            C::Array => Slot::Array(PhpArray::new().into_ref()),
            C::ArrayLike => Slot::ArrayLike(ArrayLike::Array(PhpArray::new().into_ref())),
            C::Alias => Slot::Alias(Alias::new(Value::Null)),
            C::Object => Slot::Object(PhpObject::std_class()),
            C::Key => Slot::Key(ArrayKey::Int(0)),
            _ => Slot::Value(Value::Void),
        }
    }

    /// Converts an incoming argument to the carrier of the parameter it binds.
    pub(crate) fn from_value(carrier: CarrierType, value: Value) -> Result<Slot, RuntimeError> {
        let value = match value {
            Value::Alias(alias) if !matches!(carrier, C::Alias | C::DynamicValue) => alias.get(),
            other => other,
        };
        Ok(match carrier {
            C::Bool => Slot::Bool(to_bool(&value)),
            C::I4 => Slot::I4(to_long(&value) as i32),
            C::Int => Slot::Int(to_long(&value)),
            C::Float => Slot::Float(to_double(&value)),
            C::Number => Slot::Number(to_number(&value)?),
            C::String => Slot::Str(Rc::from(to_php_string(&value)?)),
            C::MutableString => Slot::MutableString(MutableString::from(to_php_string(&value)?.as_str())),
            C::Array => match to_array(&value) {
                Value::Array(arr) => Slot::Array(arr),
                _ => Slot::Array(PhpArray::new().into_ref()),
            },
            C::Object => Slot::Object(to_object(&value)),
            C::Alias => Slot::Alias(match value {
                Value::Alias(alias) => alias,
                other => Alias::new(other),
            }),
            _ => Slot::Value(value),
        })
    }

    /// Boxes the slot as a dynamic value. Plumbing slots box to null.
    pub(crate) fn into_value(self) -> Value {
        match self {
            Slot::Bool(b) => Value::Bool(b),
            Slot::I4(n) => Value::Int(i64::from(n)),
            Slot::Int(n) => Value::Int(n),
            Slot::Float(f) => Value::Float(f),
            Slot::Number(n) => number_value(n),
            Slot::Str(s) => Value::String(s),
            Slot::MutableString(s) => Value::MutableString(s),
            Slot::Array(arr) => Value::Array(arr),
            Slot::ArrayLike(a) => a.to_value(),
            Slot::Alias(alias) => Value::Alias(alias),
            Slot::Value(v) | Slot::Unpacking(v) => v,
            Slot::Object(obj) => Value::Object(obj),
            Slot::Key(key) => Value::from(&key),
            Slot::Ref(_)
            | Slot::Context
            | Slot::TypeToken(_)
            | Slot::TypeArgs
            | Slot::Name(_)
            | Slot::CallSite(_)
            | Slot::Binder(_) => Value::Null,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Slot::Bool(_) => "bool",
            Slot::I4(_) => "i4",
            Slot::Int(_) => "int",
            Slot::Float(_) => "float",
            Slot::Number(_) => "number",
            Slot::Str(_) => "string",
            Slot::MutableString(_) => "mutable string",
            Slot::Array(_) => "array",
            Slot::ArrayLike(_) => "array-like",
            Slot::Alias(_) => "alias",
            Slot::Value(_) => "value",
            Slot::Object(_) => "object",
            Slot::Key(_) => "key",
            Slot::Ref(_) => "address",
            Slot::Context => "context",
            Slot::TypeToken(_) => "type token",
            Slot::TypeArgs => "type arguments",
            Slot::Name(_) => "name",
            Slot::Unpacking(_) => "unpacking",
            Slot::CallSite(_) => "call site",
            Slot::Binder(_) => "binder",
        }
    }
}

fn expected(what: &str, found: &Slot) -> VmError {
    VmError::TypeError(format!("expected {} on the stack, found {}", what, found.kind()))
}

/// Locals and evaluation stack of one running body.
#[derive(Debug)]
pub(crate) struct Frame {
    pub(crate) name: String,
    pub(crate) locals: Vec<Slot>,
    pub(crate) stack: Vec<Slot>,
}

impl Frame {
    pub(crate) fn new(name: &str, body: &CodeBody) -> Self {
        Frame {
            name: name.to_string(),
            locals: body.locals.iter().map(|l| Slot::default_for(l.carrier)).collect(),
            stack: Vec::new(),
        }
    }

    /// A frame with no locals, used for calls made from outside any body.
    pub(crate) fn detached() -> Self {
        Frame {
            name: String::from("<host>"),
            locals: Vec::new(),
            stack: Vec::new(),
        }
    }

    pub(crate) fn bind_param(&mut self, index: usize, value: Value, carrier: CarrierType) -> Result<(), VmError> {
        let slot = self
            .locals
            .get_mut(index)
            .ok_or_else(|| VmError::InvalidBytecode(format!("'{}' has no local for parameter {}", self.name, index)))?;
        *slot = Slot::from_value(carrier, value)?;
        Ok(())
    }

    // ── Stack ───────────────────────────────────────────────────────

    pub(crate) fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    /// Pushes a dynamic value, following an alias to what it holds.
    pub(crate) fn push_value(&mut self, value: Value) {
        self.stack.push(Slot::Value(value.deref()));
    }

    pub(crate) fn pop(&mut self) -> Result<Slot, VmError> {
        self.stack.pop().ok_or(VmError::StackUnderflow)
    }

    pub(crate) fn peek(&self) -> Result<&Slot, VmError> {
        self.stack.last().ok_or(VmError::StackUnderflow)
    }

    /// Pops the top `n` entries, deepest first.
    pub(crate) fn pop_n(&mut self, n: usize) -> Result<Vec<Slot>, VmError> {
        if self.stack.len() < n {
            return Err(VmError::StackUnderflow);
        }
        Ok(self.stack.split_off(self.stack.len() - n))
    }

    pub(crate) fn pop_value(&mut self) -> Result<Value, VmError> {
        match self.pop()? {
            Slot::Value(v) => Ok(v),
            other => Err(expected("value", &other)),
        }
    }

    pub(crate) fn pop_bool(&mut self) -> Result<bool, VmError> {
        match self.pop()? {
            Slot::Bool(b) => Ok(b),
            other => Err(expected("bool", &other)),
        }
    }

    pub(crate) fn pop_int(&mut self) -> Result<i64, VmError> {
        match self.pop()? {
            Slot::Int(n) => Ok(n),
            other => Err(expected("int", &other)),
        }
    }

    pub(crate) fn pop_float(&mut self) -> Result<f64, VmError> {
        match self.pop()? {
            Slot::Float(f) => Ok(f),
            other => Err(expected("float", &other)),
        }
    }

    pub(crate) fn pop_number(&mut self) -> Result<Number, VmError> {
        match self.pop()? {
            Slot::Number(n) => Ok(n),
            Slot::Int(n) => Ok(Number::Int(n)),
            Slot::Float(f) => Ok(Number::Float(f)),
            other => Err(expected("number", &other)),
        }
    }

    pub(crate) fn pop_str(&mut self) -> Result<Rc<str>, VmError> {
        match self.pop()? {
            Slot::Str(s) => Ok(s),
            other => Err(expected("string", &other)),
        }
    }

    pub(crate) fn pop_mutable_string(&mut self) -> Result<MutableString, VmError> {
        match self.pop()? {
            Slot::MutableString(s) => Ok(s),
            other => Err(expected("mutable string", &other)),
        }
    }

    pub(crate) fn pop_array(&mut self) -> Result<ArrayRef, VmError> {
        match self.pop()? {
            Slot::Array(arr) => Ok(arr),
            other => Err(expected("array", &other)),
        }
    }

    /// Arrays and mutable strings are accepted as array-likes.
    pub(crate) fn pop_array_like(&mut self) -> Result<ArrayLike, VmError> {
        match self.pop()? {
            Slot::ArrayLike(a) => Ok(a),
            Slot::Array(arr) => Ok(ArrayLike::Array(arr)),
            Slot::MutableString(s) => Ok(ArrayLike::String(s)),
            other => Err(expected("array-like", &other)),
        }
    }

    pub(crate) fn pop_alias(&mut self) -> Result<Alias, VmError> {
        match self.pop()? {
            Slot::Alias(alias) => Ok(alias),
            other => Err(expected("alias", &other)),
        }
    }

    pub(crate) fn pop_object(&mut self) -> Result<ObjectRef, VmError> {
        match self.pop()? {
            Slot::Object(obj) => Ok(obj),
            other => Err(expected("object", &other)),
        }
    }

    pub(crate) fn pop_key(&mut self) -> Result<ArrayKey, VmError> {
        match self.pop()? {
            Slot::Key(key) => Ok(key),
            other => Err(expected("key", &other)),
        }
    }

    pub(crate) fn pop_ref(&mut self) -> Result<u32, VmError> {
        match self.pop()? {
            Slot::Ref(local) => Ok(local),
            other => Err(expected("address", &other)),
        }
    }

    pub(crate) fn pop_context(&mut self) -> Result<(), VmError> {
        match self.pop()? {
            Slot::Context => Ok(()),
            other => Err(expected("context", &other)),
        }
    }

    pub(crate) fn pop_type_token(&mut self) -> Result<Option<Rc<str>>, VmError> {
        match self.pop()? {
            Slot::TypeToken(class) => Ok(class),
            other => Err(expected("type token", &other)),
        }
    }

    pub(crate) fn pop_binder(&mut self) -> Result<Rc<Binder>, VmError> {
        match self.pop()? {
            Slot::Binder(binder) => Ok(binder),
            other => Err(expected("binder", &other)),
        }
    }

    pub(crate) fn pop_site(&mut self) -> Result<SiteHandle, VmError> {
        match self.pop()? {
            Slot::CallSite(site) => Ok(site),
            other => Err(expected("call site", &other)),
        }
    }

    // ── Locals ──────────────────────────────────────────────────────

    fn local_mut(&mut self, index: u32) -> Result<&mut Slot, VmError> {
        let count = self.locals.len();
        let name = &self.name;
        self.locals.get_mut(index as usize).ok_or_else(|| {
            VmError::InvalidBytecode(format!("local {} out of range in '{}' ({} locals)", index, name, count))
        })
    }

    /// Reads a local. A dynamic local bound to a reference reads through it.
    pub(crate) fn load_local(&mut self, index: u32) -> Result<Slot, VmError> {
        Ok(match self.local_mut(index)? {
            Slot::Value(Value::Alias(alias)) => Slot::Value(alias.get()),
            other => other.clone(),
        })
    }

    /// Writes a local. An alias rebinds a dynamic local as a reference;
    /// other values write through an existing reference.
    pub(crate) fn store_local(&mut self, index: u32, value: Slot) -> Result<(), VmError> {
        let local = self.local_mut(index)?;
        match value {
            Slot::Alias(alias) if matches!(local, Slot::Value(_)) => *local = Slot::Value(Value::Alias(alias)),
            Slot::Value(v) => match local {
                Slot::Value(Value::Alias(alias)) => alias.set(v),
                _ => *local = Slot::Value(v),
            },
            other => *local = other,
        }
        Ok(())
    }

    /// Resets a local to the default of its carrier, breaking any reference.
    pub(crate) fn unset_local(&mut self, index: u32, carrier: CarrierType) -> Result<(), VmError> {
        *self.local_mut(index)? = Slot::default_for(carrier);
        Ok(())
    }

    /// Binds a dynamic local to a reference, creating one around its value.
    pub(crate) fn make_reference(&mut self, index: u32) -> Result<Alias, VmError> {
        match self.local_mut(index)? {
            Slot::Value(Value::Alias(alias)) | Slot::Alias(alias) => Ok(alias.clone()),
            Slot::Value(v) => {
                let alias = Alias::new(std::mem::take(v));
                *v = Value::Alias(alias.clone());
                Ok(alias)
            }
            other => Err(expected("dynamic local", other)),
        }
    }

    /// Autovivifies an array in a local.
    pub(crate) fn ensure_array_at(&mut self, index: u32) -> Result<ArrayLike, VmError> {
        match self.local_mut(index)? {
            Slot::Value(v) => Ok(ensure_array_in(v)?),
            Slot::Alias(alias) => Ok(alias.ensure_array()?),
            Slot::Array(arr) => Ok(ArrayLike::Array(arr.clone())),
            other => Err(expected("dynamic local", other)),
        }
    }

    /// Autovivifies an object in a local.
    pub(crate) fn ensure_object_at(&mut self, index: u32) -> Result<ObjectRef, VmError> {
        match self.local_mut(index)? {
            Slot::Value(v) => Ok(ensure_object_in(v)?),
            Slot::Alias(alias) => Ok(alias.ensure_object()?),
            Slot::Object(obj) => Ok(obj.clone()),
            other => Err(expected("dynamic local", other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame_with(carriers: &[CarrierType]) -> Frame {
        Frame {
            name: "t".to_string(),
            locals: carriers.iter().map(|c| Slot::default_for(*c)).collect(),
            stack: Vec::new(),
        }
    }

    #[test]
    fn test_store_through_reference() {
        let mut frame = frame_with(&[C::DynamicValue]);
        let alias = Alias::new(Value::Int(1));
        frame.store_local(0, Slot::Alias(alias.clone())).unwrap();
        frame.store_local(0, Slot::Value(Value::Int(7))).unwrap();
        assert!(matches!(alias.get(), Value::Int(7)));
        assert!(matches!(frame.load_local(0).unwrap(), Slot::Value(Value::Int(7))));
    }

    #[test]
    fn test_bad_local_names_frame() {
        let mut frame = frame_with(&[C::Int]);
        match frame.load_local(3) {
            Err(VmError::InvalidBytecode(msg)) => assert!(msg.contains("'t'"), "{}", msg),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_unset_breaks_reference() {
        let mut frame = frame_with(&[C::DynamicValue]);
        let alias = frame.make_reference(0).unwrap();
        frame.unset_local(0, C::DynamicValue).unwrap();
        frame.store_local(0, Slot::Value(Value::Int(3))).unwrap();
        assert!(matches!(alias.get(), Value::Void));
    }

    #[test]
    fn test_ensure_array_autovivifies_local() {
        let mut frame = frame_with(&[C::DynamicValue]);
        let arr = frame.ensure_array_at(0).unwrap();
        arr.add_item(Value::Int(1)).unwrap();
        match frame.load_local(0).unwrap() {
            Slot::Value(Value::Array(a)) => assert_eq!(a.borrow().len(), 1),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_param_conversion() {
        assert!(matches!(
            Slot::from_value(C::Int, Value::string("42")).unwrap(),
            Slot::Int(42)
        ));
        assert!(matches!(Slot::from_value(C::Bool, Value::Int(0)).unwrap(), Slot::Bool(false)));
        let alias = Alias::new(Value::Int(1));
        assert!(matches!(
            Slot::from_value(C::DynamicValue, Value::Alias(alias)).unwrap(),
            Slot::Value(Value::Alias(_))
        ));
    }

    #[test]
    fn test_pop_array_like_accepts_arrays() {
        let mut frame = frame_with(&[]);
        frame.push(Slot::Array(PhpArray::new().into_ref()));
        assert!(matches!(frame.pop_array_like().unwrap(), ArrayLike::Array(_)));
        assert!(matches!(frame.pop(), Err(VmError::StackUnderflow)));
    }
}
