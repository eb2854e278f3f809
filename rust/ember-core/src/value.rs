//! Dynamic runtime values.

use crate::array::{ArrayRef, PhpArray};
use crate::convert::{to_array_key, to_php_string};
use crate::error::RuntimeError;
use crate::key::ArrayKey;
use crate::string::MutableString;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// Runtime value of the dynamic language.
///
/// `Void` is the "unset" state; `Null` is an explicit null. Arrays, mutable
/// strings, aliases and objects are shared handles.
#[derive(Debug, Clone, Default)]
pub enum Value {
    #[default]
    Void,
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Rc<str>),
    MutableString(MutableString),
    Array(ArrayRef),
    Alias(Alias),
    Object(ObjectRef),
}

impl Value {
    pub fn string(s: &str) -> Value {
        Value::String(Rc::from(s))
    }

    pub fn new_array(arr: PhpArray) -> Value {
        Value::Array(arr.into_ref())
    }

    /// Follows an alias to the value it holds.
    pub fn deref(&self) -> Value {
        match self {
            Value::Alias(alias) => alias.get(),
            other => other.clone(),
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Value::Void | Value::Null => true,
            Value::Alias(alias) => alias.get().is_null(),
            _ => false,
        }
    }

    pub fn is_set(&self) -> bool {
        !self.is_null()
    }

    pub fn is_string(&self) -> bool {
        matches!(self.deref(), Value::String(_) | Value::MutableString(_))
    }

    /// Raw bytes of a string value.
    pub fn string_bytes(&self) -> Option<Vec<u8>> {
        match self.deref() {
            Value::String(s) => Some(s.as_bytes().to_vec()),
            Value::MutableString(s) => Some(s.bytes()),
            _ => None,
        }
    }

    /// A string built from raw bytes; bytes that are not UTF-8 stay in a byte buffer.
    pub fn from_bytes(bytes: Vec<u8>) -> Value {
        match String::from_utf8(bytes) {
            Ok(s) => Value::String(Rc::from(s)),
            Err(e) => Value::MutableString(MutableString::from_bytes(e.into_bytes())),
        }
    }

    pub fn type_name(&self) -> String {
        match self {
            Value::Void | Value::Null => "null".into(),
            Value::Bool(_) => "bool".into(),
            Value::Int(_) => "int".into(),
            Value::Float(_) => "float".into(),
            Value::String(_) | Value::MutableString(_) => "string".into(),
            Value::Array(_) => "array".into(),
            Value::Alias(alias) => alias.get().type_name(),
            Value::Object(obj) => obj.class_name().to_string(),
        }
    }

    /// Value-semantics copy: nested arrays and mutable strings are detached.
    pub fn deep_copy(&self) -> Value {
        match self {
            Value::Array(arr) => Value::Array(arr.borrow().deep_copy().into_ref()),
            Value::MutableString(s) => Value::MutableString(s.deep_copy()),
            other => other.clone(),
        }
    }

    pub fn as_array(&self) -> Option<ArrayRef> {
        match self {
            Value::Array(arr) => Some(arr.clone()),
            Value::Alias(alias) => alias.get().as_array(),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<ObjectRef> {
        match self {
            Value::Object(obj) => Some(obj.clone()),
            Value::Alias(alias) => alias.get().as_object(),
            _ => None,
        }
    }
}

impl From<&ArrayKey> for Value {
    fn from(key: &ArrayKey) -> Self {
        match key {
            ArrayKey::Int(n) => Value::Int(*n),
            ArrayKey::Str(s) => Value::String(s.clone()),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match to_php_string(self) {
            Ok(s) => write!(f, "{}", s),
            Err(_) => write!(f, "{}", self.type_name()),
        }
    }
}

// ── Aliases ──────────────────────────────────────────────────────────

/// A shared mutable cell; two variables holding the same alias observe each other's writes.
#[derive(Debug, Clone)]
pub struct Alias(Rc<RefCell<Value>>);

impl Alias {
    pub fn new(value: Value) -> Self {
        Alias(Rc::new(RefCell::new(value)))
    }

    pub fn get(&self) -> Value {
        self.0.borrow().clone()
    }

    pub fn set(&self, value: Value) {
        *self.0.borrow_mut() = value;
    }

    pub fn ptr_eq(&self, other: &Alias) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn ensure_array(&self) -> Result<ArrayLike, RuntimeError> {
        ensure_array_in(&mut self.0.borrow_mut())
    }

    pub fn ensure_object(&self) -> Result<ObjectRef, RuntimeError> {
        ensure_object_in(&mut self.0.borrow_mut())
    }
}

/// Autovivifies an array in `slot`. Empty and null values become a new array;
/// a non-empty string is promoted to a mutable string so offsets can be written.
pub fn ensure_array_in(slot: &mut Value) -> Result<ArrayLike, RuntimeError> {
    match slot {
        Value::Alias(alias) => alias.ensure_array(),
        Value::Array(arr) => Ok(ArrayLike::Array(arr.clone())),
        Value::MutableString(s) => Ok(ArrayLike::String(s.clone())),
        Value::String(s) if !s.is_empty() => {
            let promoted = MutableString::from(&**s);
            *slot = Value::MutableString(promoted.clone());
            Ok(ArrayLike::String(promoted))
        }
        Value::Void | Value::Null | Value::String(_) | Value::Bool(false) => {
            let arr = PhpArray::new().into_ref();
            *slot = Value::Array(arr.clone());
            Ok(ArrayLike::Array(arr))
        }
        Value::Object(obj) if obj.indexer().is_some() => Ok(ArrayLike::Object(obj.clone())),
        other => Err(RuntimeError::NotIndexable(other.type_name())),
    }
}

/// Autovivifies an object in `slot`; null becomes a new `stdClass`.
pub fn ensure_object_in(slot: &mut Value) -> Result<ObjectRef, RuntimeError> {
    match slot {
        Value::Alias(alias) => alias.ensure_object(),
        Value::Object(obj) => Ok(obj.clone()),
        Value::Void | Value::Null => {
            let obj = PhpObject::std_class();
            *slot = Value::Object(obj.clone());
            Ok(obj)
        }
        other => Err(RuntimeError::NotAnObject(other.type_name())),
    }
}

// ── Objects ──────────────────────────────────────────────────────────

/// User-indexable objects: `$obj[$key]` routes through these four entry points.
pub trait ArrayAccess: fmt::Debug {
    fn offset_exists(&self, key: &Value) -> bool;
    fn offset_get(&self, key: &Value) -> Result<Value, RuntimeError>;
    /// A `Null` key means append.
    fn offset_set(&self, key: &Value, value: Value) -> Result<(), RuntimeError>;
    fn offset_unset(&self, key: &Value) -> Result<(), RuntimeError>;
}

pub type ObjectRef = Rc<PhpObject>;

#[derive(Debug)]
pub struct PhpObject {
    class: Rc<str>,
    props: RefCell<IndexMap<Rc<str>, Value>>,
    indexer: Option<Rc<dyn ArrayAccess>>,
}

impl PhpObject {
    pub fn new(class: &str) -> ObjectRef {
        Rc::new(PhpObject {
            class: Rc::from(class),
            props: RefCell::new(IndexMap::new()),
            indexer: None,
        })
    }

    pub fn std_class() -> ObjectRef {
        PhpObject::new("stdClass")
    }

    pub fn with_indexer(class: &str, indexer: Rc<dyn ArrayAccess>) -> ObjectRef {
        Rc::new(PhpObject {
            class: Rc::from(class),
            props: RefCell::new(IndexMap::new()),
            indexer: Some(indexer),
        })
    }

    pub fn class_name(&self) -> &str {
        &self.class
    }

    pub fn indexer(&self) -> Option<&Rc<dyn ArrayAccess>> {
        self.indexer.as_ref()
    }

    pub fn get_property(&self, name: &str) -> Value {
        self.props.borrow().get(name).cloned().unwrap_or(Value::Void)
    }

    pub fn has_property(&self, name: &str) -> bool {
        self.props.borrow().contains_key(name)
    }

    pub fn set_property(&self, name: &str, value: Value) {
        let mut props = self.props.borrow_mut();
        if let Some(Value::Alias(alias)) = props.get(name) {
            alias.set(value);
            return;
        }
        props.insert(Rc::from(name), value);
    }

    pub fn set_property_alias(&self, name: &str, alias: Alias) {
        self.props.borrow_mut().insert(Rc::from(name), Value::Alias(alias));
    }

    pub fn unset_property(&self, name: &str) {
        self.props.borrow_mut().shift_remove(name);
    }

    pub fn ensure_property_array(&self, name: &str) -> Result<ArrayLike, RuntimeError> {
        let mut props = self.props.borrow_mut();
        ensure_array_in(props.entry(Rc::from(name)).or_insert(Value::Void))
    }

    pub fn ensure_property_object(&self, name: &str) -> Result<ObjectRef, RuntimeError> {
        let mut props = self.props.borrow_mut();
        ensure_object_in(props.entry(Rc::from(name)).or_insert(Value::Void))
    }

    pub fn ensure_property_alias(&self, name: &str) -> Alias {
        let mut props = self.props.borrow_mut();
        let slot = props.entry(Rc::from(name)).or_insert(Value::Void);
        if let Value::Alias(alias) = slot {
            return alias.clone();
        }
        let current = match std::mem::take(slot) {
            Value::Void => Value::Null,
            v => v,
        };
        let alias = Alias::new(current);
        *slot = Value::Alias(alias.clone());
        alias
    }

    pub fn properties(&self) -> Vec<(Rc<str>, Value)> {
        self.props
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Built-in indexable object backed by an ordered array.
#[derive(Debug, Default)]
pub struct ArrayObject {
    storage: RefCell<PhpArray>,
}

impl ArrayObject {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.storage.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.storage.borrow().is_empty()
    }
}

impl ArrayAccess for ArrayObject {
    fn offset_exists(&self, key: &Value) -> bool {
        match to_array_key(key) {
            Ok(k) => self.storage.borrow().get(&k).is_some_and(|v| v.is_set()),
            Err(_) => false,
        }
    }

    fn offset_get(&self, key: &Value) -> Result<Value, RuntimeError> {
        let k = to_array_key(key)?;
        Ok(self.storage.borrow().get_item_value(&k).deref())
    }

    fn offset_set(&self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        if key.is_null() {
            self.storage.borrow_mut().add_value(value)?;
        } else {
            let k = to_array_key(key)?;
            self.storage.borrow_mut().set_item_value(k, value);
        }
        Ok(())
    }

    fn offset_unset(&self, key: &Value) -> Result<(), RuntimeError> {
        let k = to_array_key(key)?;
        self.storage.borrow_mut().remove_key(&k);
        Ok(())
    }
}

// ── Array-like targets ───────────────────────────────────────────────

/// Anything that can be indexed for writing: an array, a mutable string, or
/// a user-indexable object.
#[derive(Debug, Clone)]
pub enum ArrayLike {
    Array(ArrayRef),
    String(MutableString),
    Object(ObjectRef),
}

impl ArrayLike {
    pub fn to_value(&self) -> Value {
        match self {
            ArrayLike::Array(arr) => Value::Array(arr.clone()),
            ArrayLike::String(s) => Value::MutableString(s.clone()),
            ArrayLike::Object(obj) => Value::Object(obj.clone()),
        }
    }

    fn indexer(obj: &ObjectRef) -> Result<&Rc<dyn ArrayAccess>, RuntimeError> {
        obj.indexer()
            .ok_or_else(|| RuntimeError::NotIndexable(obj.class_name().to_string()))
    }

    /// Item at `key`; `Void` when missing.
    pub fn get_item(&self, key: &ArrayKey) -> Result<Value, RuntimeError> {
        match self {
            ArrayLike::Array(arr) => Ok(arr.borrow().get_item_value(key)),
            ArrayLike::String(s) => Ok(string_offset(key)?
                .and_then(|i| s.byte_at(i))
                .map(|b| Value::from_bytes(vec![b]))
                .unwrap_or(Value::Void)),
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_get(&Value::from(key)),
        }
    }

    pub fn get_item_dyn(&self, key: &Value) -> Result<Value, RuntimeError> {
        match self {
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_get(key),
            _ => self.get_item(&to_array_key(key)?),
        }
    }

    pub fn set_item(&self, key: ArrayKey, value: Value) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Array(arr) => {
                arr.borrow_mut().set_item_value(key, value);
                Ok(())
            }
            ArrayLike::String(s) => {
                let offset = string_offset(&key)?.ok_or_else(|| {
                    RuntimeError::StringOffset(format!("cannot access offset '{}' on string", key))
                })?;
                s.set_byte(offset, &to_php_string(&value)?)
            }
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_set(&Value::from(&key), value),
        }
    }

    pub fn set_item_dyn(&self, key: &Value, value: Value) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_set(key, value),
            _ => self.set_item(to_array_key(key)?, value),
        }
    }

    pub fn add_item(&self, value: Value) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Array(arr) => arr.borrow_mut().add_value(value).map(|_| ()),
            ArrayLike::String(_) => Err(RuntimeError::StringOffset(
                "[] operator not supported for strings".into(),
            )),
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_set(&Value::Null, value),
        }
    }

    pub fn remove_item(&self, key: &ArrayKey) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Array(arr) => {
                arr.borrow_mut().remove_key(key);
                Ok(())
            }
            ArrayLike::String(_) => Err(RuntimeError::StringOffset(
                "cannot unset string offsets".into(),
            )),
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_unset(&Value::from(key)),
        }
    }

    pub fn remove_item_dyn(&self, key: &Value) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Object(obj) => Self::indexer(obj)?.offset_unset(key),
            _ => self.remove_item(&to_array_key(key)?),
        }
    }

    pub fn set_item_alias(&self, key: ArrayKey, alias: Alias) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Array(arr) => {
                arr.borrow_mut().set_item_alias(key, alias);
                Ok(())
            }
            other => Err(RuntimeError::NotIndexable(format!(
                "{} (reference assignment)",
                other.to_value().type_name()
            ))),
        }
    }

    pub fn add_alias(&self, alias: Alias) -> Result<(), RuntimeError> {
        match self {
            ArrayLike::Array(arr) => arr.borrow_mut().add_value(Value::Alias(alias)).map(|_| ()),
            other => Err(RuntimeError::NotIndexable(format!(
                "{} (reference append)",
                other.to_value().type_name()
            ))),
        }
    }

    pub fn ensure_item_array(&self, key: ArrayKey) -> Result<ArrayLike, RuntimeError> {
        match self {
            ArrayLike::Array(arr) => arr.borrow_mut().ensure_item_array(key),
            ArrayLike::Object(obj) => {
                let mut item = Self::indexer(obj)?.offset_get(&Value::from(&key))?;
                ensure_array_in(&mut item)
            }
            ArrayLike::String(_) => Err(RuntimeError::StringOffset(
                "cannot use string offset as an array".into(),
            )),
        }
    }

    pub fn ensure_item_object(&self, key: ArrayKey) -> Result<ObjectRef, RuntimeError> {
        match self {
            ArrayLike::Array(arr) => arr.borrow_mut().ensure_item_object(key),
            ArrayLike::Object(obj) => {
                let mut item = Self::indexer(obj)?.offset_get(&Value::from(&key))?;
                ensure_object_in(&mut item)
            }
            ArrayLike::String(_) => Err(RuntimeError::StringOffset(
                "cannot use string offset as an object".into(),
            )),
        }
    }

    pub fn ensure_item_alias(&self, key: ArrayKey) -> Result<Alias, RuntimeError> {
        match self {
            ArrayLike::Array(arr) => Ok(arr.borrow_mut().ensure_item_alias(key)),
            other => Err(RuntimeError::NotIndexable(format!(
                "{} (reference to item)",
                other.to_value().type_name()
            ))),
        }
    }
}

/// Integer offset of a string key; `None` for a non-numeric key.
fn string_offset(key: &ArrayKey) -> Result<Option<i64>, RuntimeError> {
    match key {
        ArrayKey::Int(n) => Ok(Some(*n)),
        ArrayKey::Str(s) => Ok(s.trim().parse::<i64>().ok()),
    }
}
