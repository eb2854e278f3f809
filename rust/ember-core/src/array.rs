//! Ordered hash arrays keyed by integers or strings.

use crate::error::RuntimeError;
use crate::key::ArrayKey;
use crate::value::{ensure_array_in, ensure_object_in, Alias, ArrayLike, ObjectRef, Value};
use indexmap::IndexMap;
use std::cell::RefCell;
use std::rc::Rc;

/// Arrays are reference objects; value semantics come from explicit
/// [`PhpArray::deep_copy`] on assignment.
pub type ArrayRef = Rc<RefCell<PhpArray>>;

#[derive(Debug, Clone, Default)]
pub struct PhpArray {
    entries: IndexMap<ArrayKey, Value>,
    next_index: i64,
    exhausted: bool,
}

impl PhpArray {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        PhpArray {
            entries: IndexMap::with_capacity(capacity),
            ..Self::default()
        }
    }

    pub fn into_ref(self) -> ArrayRef {
        Rc::new(RefCell::new(self))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, key: &ArrayKey) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &ArrayKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Item at `key`, or `Void` when missing. Aliased items are returned as the alias.
    pub fn get_item_value(&self, key: &ArrayKey) -> Value {
        self.entries.get(key).cloned().unwrap_or(Value::Void)
    }

    /// Writes through an existing alias at `key`.
    pub fn set_item_value(&mut self, key: ArrayKey, value: Value) {
        if let Some(Value::Alias(alias)) = self.entries.get(&key) {
            alias.set(value);
            return;
        }
        self.bump_next(&key);
        self.entries.insert(key, value);
    }

    pub fn set_item_alias(&mut self, key: ArrayKey, alias: Alias) {
        self.bump_next(&key);
        self.entries.insert(key, Value::Alias(alias));
    }

    /// Appends at the next free integer key.
    pub fn add_value(&mut self, value: Value) -> Result<ArrayKey, RuntimeError> {
        if self.exhausted {
            return Err(RuntimeError::ArrayFull);
        }
        let key = ArrayKey::Int(self.next_index);
        self.bump_next(&key);
        self.entries.insert(key.clone(), value);
        Ok(key)
    }

    pub fn remove_key(&mut self, key: &ArrayKey) -> Option<Value> {
        self.entries.shift_remove(key)
    }

    /// Mutable slot for `key`, inserting `Void` when missing.
    pub fn item_mut(&mut self, key: ArrayKey) -> &mut Value {
        if !self.entries.contains_key(&key) {
            self.bump_next(&key);
        }
        self.entries.entry(key).or_insert(Value::Void)
    }

    pub fn ensure_item_array(&mut self, key: ArrayKey) -> Result<ArrayLike, RuntimeError> {
        ensure_array_in(self.item_mut(key))
    }

    pub fn ensure_item_object(&mut self, key: ArrayKey) -> Result<ObjectRef, RuntimeError> {
        ensure_object_in(self.item_mut(key))
    }

    /// Turns the item into a reference, creating it as `null` when missing.
    pub fn ensure_item_alias(&mut self, key: ArrayKey) -> Alias {
        let slot = self.item_mut(key);
        match slot {
            Value::Alias(alias) => alias.clone(),
            other => {
                let current = match std::mem::take(other) {
                    Value::Void => Value::Null,
                    v => v,
                };
                let alias = Alias::new(current);
                *other = Value::Alias(alias.clone());
                alias
            }
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ArrayKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &ArrayKey> {
        self.entries.keys()
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.entries.values()
    }

    /// Copies nested arrays and strings; references inside the array stay shared.
    pub fn deep_copy(&self) -> PhpArray {
        PhpArray {
            entries: self
                .entries
                .iter()
                .map(|(k, v)| (k.clone(), v.deep_copy()))
                .collect(),
            next_index: self.next_index,
            exhausted: self.exhausted,
        }
    }

    /// `$a + $b`: keys of `other` missing in `self` are appended.
    pub fn union(&self, other: &PhpArray) -> PhpArray {
        let mut result = self.deep_copy();
        for (k, v) in other.iter() {
            if !result.contains_key(k) {
                result.set_item_value(k.clone(), v.deep_copy());
            }
        }
        result
    }

    fn bump_next(&mut self, key: &ArrayKey) {
        if let ArrayKey::Int(n) = key {
            if *n >= self.next_index {
                match n.checked_add(1) {
                    Some(next) => self.next_index = next,
                    None => self.exhausted = true,
                }
            }
        }
    }
}

impl FromIterator<Value> for PhpArray {
    fn from_iter<I: IntoIterator<Item = Value>>(iter: I) -> Self {
        let mut arr = PhpArray::new();
        for v in iter {
            // a fresh array cannot run out of integer keys here
            let _ = arr.add_value(v);
        }
        arr
    }
}

impl FromIterator<(ArrayKey, Value)> for PhpArray {
    fn from_iter<I: IntoIterator<Item = (ArrayKey, Value)>>(iter: I) -> Self {
        let mut arr = PhpArray::new();
        for (k, v) in iter {
            arr.set_item_value(k, v);
        }
        arr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_value_uses_next_index() {
        let mut arr = PhpArray::new();
        arr.set_item_value(ArrayKey::Int(5), Value::Int(1));
        let key = arr.add_value(Value::Int(2)).unwrap();
        assert_eq!(key, ArrayKey::Int(6));
        arr.set_item_value(ArrayKey::from("x"), Value::Int(3));
        assert_eq!(arr.add_value(Value::Null).unwrap(), ArrayKey::Int(7));
    }

    #[test]
    fn test_full_array_rejects_append() {
        let mut arr = PhpArray::new();
        arr.set_item_value(ArrayKey::Int(i64::MAX), Value::Int(1));
        assert_eq!(arr.add_value(Value::Int(2)), Err(RuntimeError::ArrayFull));
    }

    #[test]
    fn test_set_writes_through_alias() {
        let mut arr = PhpArray::new();
        let alias = arr.ensure_item_alias(ArrayKey::Int(0));
        arr.set_item_value(ArrayKey::Int(0), Value::Int(9));
        assert!(matches!(alias.get(), Value::Int(9)));
    }

    #[test]
    fn test_remove_preserves_order() {
        let mut arr: PhpArray = vec![Value::Int(1), Value::Int(2), Value::Int(3)].into_iter().collect();
        arr.remove_key(&ArrayKey::Int(1));
        let keys: Vec<_> = arr.keys().cloned().collect();
        assert_eq!(keys, vec![ArrayKey::Int(0), ArrayKey::Int(2)]);
    }

    #[test]
    fn test_deep_copy_detaches_nested_arrays() {
        let inner = PhpArray::new().into_ref();
        let mut outer = PhpArray::new();
        outer.set_item_value(ArrayKey::Int(0), Value::Array(inner.clone()));
        let copy = outer.deep_copy();
        inner.borrow_mut().add_value(Value::Int(1)).unwrap();
        match copy.get(&ArrayKey::Int(0)) {
            Some(Value::Array(r)) => assert!(r.borrow().is_empty()),
            other => panic!("unexpected item {:?}", other),
        }
    }

    #[test]
    fn test_union_keeps_left_keys() {
        let a: PhpArray = vec![Value::Int(1)].into_iter().collect();
        let b: PhpArray = vec![Value::Int(10), Value::Int(20)].into_iter().collect();
        let u = a.union(&b);
        assert_eq!(u.len(), 2);
        assert!(matches!(u.get(&ArrayKey::Int(0)), Some(Value::Int(1))));
        assert!(matches!(u.get(&ArrayKey::Int(1)), Some(Value::Int(20))));
    }
}
