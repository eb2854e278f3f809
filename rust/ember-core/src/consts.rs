//! Global constants.
//!
//! Names map to IDs in a process-wide [`ConstRegistry`]. IDs are 1-based:
//! application-wide constants get negative IDs and their values are shared by
//! every context, while context constants get positive IDs and their values
//! live in each [`ContextConsts`].

use crate::error::RuntimeError;
use crate::registry::AppendOnlyRegistry;
use crate::value::Value;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// A thread-safe constant value. Application constants must be scalars.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(Arc<str>),
}

impl Scalar {
    pub fn to_value(&self) -> Value {
        match self {
            Scalar::Null => Value::Null,
            Scalar::Bool(b) => Value::Bool(*b),
            Scalar::Int(n) => Value::Int(*n),
            Scalar::Float(f) => Value::Float(*f),
            Scalar::String(s) => Value::String(Rc::from(&**s)),
        }
    }

    pub fn from_value(v: &Value) -> Option<Scalar> {
        match v.deref() {
            Value::Null => Some(Scalar::Null),
            Value::Bool(b) => Some(Scalar::Bool(b)),
            Value::Int(n) => Some(Scalar::Int(n)),
            Value::Float(f) => Some(Scalar::Float(f)),
            Value::String(s) => Some(Scalar::String(Arc::from(&*s))),
            Value::MutableString(s) => Some(Scalar::String(Arc::from(s.to_string_lossy()))),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ConstName {
    name: String,
    case_insensitive: bool,
    id: i64,
}

impl ConstName {
    fn matches(&self, name: &str, case_insensitive: bool) -> bool {
        if self.case_insensitive || case_insensitive {
            self.name.eq_ignore_ascii_case(name)
        } else {
            self.name == name
        }
    }
}

#[derive(Debug, Default)]
struct NameTable {
    /// Keyed by the lowercased name so case-insensitive lookups hash alike.
    by_name: HashMap<String, Vec<ConstName>>,
    order: Vec<(String, i64)>,
    app_count: i64,
    ctx_count: i64,
}

impl NameTable {
    fn find(&self, name: &str, case_insensitive: bool) -> Option<i64> {
        self.by_name
            .get(&name.to_ascii_lowercase())?
            .iter()
            .find(|c| c.matches(name, case_insensitive))
            .map(|c| c.id)
    }
}

#[derive(Debug, Default)]
pub struct ConstRegistry {
    names: Mutex<NameTable>,
    app_values: AppendOnlyRegistry<OnceCell<Scalar>>,
}

static GLOBAL: Lazy<Arc<ConstRegistry>> = Lazy::new(|| Arc::new(ConstRegistry::new()));

impl ConstRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide registry.
    pub fn global() -> Arc<ConstRegistry> {
        Arc::clone(&GLOBAL)
    }

    /// Returns the ID for `name`, assigning a fresh one when the name is new.
    pub fn register_id(&self, name: &str, case_insensitive: bool, app: bool) -> i64 {
        let mut table = self.names.lock();
        if let Some(id) = table.find(name, case_insensitive) {
            return id;
        }
        let id = if app {
            table.app_count += 1;
            self.app_values.push(OnceCell::new());
            -table.app_count
        } else {
            table.ctx_count += 1;
            table.ctx_count
        };
        table
            .by_name
            .entry(name.to_ascii_lowercase())
            .or_default()
            .push(ConstName {
                name: name.to_string(),
                case_insensitive,
                id,
            });
        table.order.push((name.to_string(), id));
        debug!(name, id, "registered constant id");
        id
    }

    /// Resolves `name` to its ID without registering it.
    pub fn resolve(&self, name: &str) -> Option<i64> {
        self.names.lock().find(name, false)
    }

    /// Defines an application-wide constant. Returns `Ok(false)` when it was
    /// already defined; the first value wins.
    pub fn define_app_constant(
        &self,
        name: &str,
        value: Scalar,
        case_insensitive: bool,
    ) -> Result<bool, RuntimeError> {
        let id = self.register_id(name, case_insensitive, true);
        if id > 0 {
            return Err(RuntimeError::ConstantRedefinition {
                name: name.to_string(),
                existing: "a context",
            });
        }
        match self.app_values.get((-id - 1) as usize) {
            Some(cell) => Ok(cell.set(value).is_ok()),
            None => Ok(false),
        }
    }

    /// Value of an application constant by ID. Never locks.
    pub fn app_value(&self, id: i64) -> Option<&Scalar> {
        if id >= 0 {
            return None;
        }
        self.app_values.get((-id - 1) as usize)?.get()
    }

    /// Number of context-constant IDs assigned so far.
    pub fn context_count(&self) -> usize {
        self.names.lock().ctx_count as usize
    }

    fn registered(&self) -> Vec<(String, i64)> {
        self.names.lock().order.clone()
    }
}

/// Constants visible in one execution context.
#[derive(Debug)]
pub struct ContextConsts {
    registry: Arc<ConstRegistry>,
    values: Vec<Option<Value>>,
}

impl ContextConsts {
    pub fn new(registry: Arc<ConstRegistry>) -> Self {
        let values = vec![None; registry.context_count()];
        ContextConsts { registry, values }
    }

    pub fn registry(&self) -> &Arc<ConstRegistry> {
        &self.registry
    }

    /// Defines a context constant. Returns `Ok(false)` when it already has a value.
    pub fn define(
        &mut self,
        name: &str,
        value: Value,
        case_insensitive: bool,
    ) -> Result<bool, RuntimeError> {
        let id = self.registry.register_id(name, case_insensitive, false);
        if id < 0 {
            return Err(RuntimeError::ConstantRedefinition {
                name: name.to_string(),
                existing: "an application",
            });
        }
        let idx = (id - 1) as usize;
        if self.values.len() <= idx {
            self.values.resize(idx * 2 + 1, None);
        }
        if self.values[idx].is_some() {
            return Ok(false);
        }
        self.values[idx] = Some(value);
        Ok(true)
    }

    /// Value of `name`, or `Void` when undefined.
    pub fn get(&self, name: &str) -> Value {
        match self.registry.resolve(name) {
            Some(id) => self.get_by_id(id),
            None => Value::Void,
        }
    }

    pub fn get_by_id(&self, id: i64) -> Value {
        if id < 0 {
            return self
                .registry
                .app_value(id)
                .map(Scalar::to_value)
                .unwrap_or(Value::Void);
        }
        if id == 0 {
            return Value::Void;
        }
        self.values
            .get((id - 1) as usize)
            .and_then(|v| v.clone())
            .unwrap_or(Value::Void)
    }

    pub fn is_defined(&self, name: &str) -> bool {
        self.get(name).is_set()
    }

    /// All constants with a value in this context, application ones included.
    pub fn iter(&self) -> Vec<(String, Value)> {
        self.registry
            .registered()
            .into_iter()
            .filter_map(|(name, id)| {
                let v = self.get_by_id(id);
                v.is_set().then_some((name, v))
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ids_are_signed_by_scope() {
        let reg = ConstRegistry::new();
        assert_eq!(reg.register_id("A", false, true), -1);
        assert_eq!(reg.register_id("B", false, false), 1);
        assert_eq!(reg.register_id("C", false, true), -2);
        assert_eq!(reg.register_id("A", false, false), -1);
    }

    #[test]
    fn test_case_insensitive_matching() {
        let reg = Arc::new(ConstRegistry::new());
        let mut ctx = ContextConsts::new(reg.clone());
        ctx.define("Answer", Value::Int(42), true).unwrap();
        assert!(matches!(ctx.get("ANSWER"), Value::Int(42)));
        ctx.define("Exact", Value::Int(1), false).unwrap();
        assert!(matches!(ctx.get("exact"), Value::Void));
        assert!(matches!(ctx.get("Exact"), Value::Int(1)));
    }

    #[test]
    fn test_redefinition_across_scopes() {
        let reg = Arc::new(ConstRegistry::new());
        reg.define_app_constant("PI", Scalar::Float(2.5), false).unwrap();
        let mut ctx = ContextConsts::new(reg.clone());
        assert!(matches!(
            ctx.define("PI", Value::Int(3), false),
            Err(RuntimeError::ConstantRedefinition { .. })
        ));
        ctx.define("LOCAL", Value::Int(1), false).unwrap();
        assert!(reg.define_app_constant("LOCAL", Scalar::Int(2), false).is_err());
        assert!(!ctx.define("LOCAL", Value::Int(5), false).unwrap());
        assert!(!reg.define_app_constant("PI", Scalar::Int(3), false).unwrap());
    }

    #[test]
    fn test_app_constants_visible_in_every_context() {
        let reg = Arc::new(ConstRegistry::new());
        reg.define_app_constant("VERSION", Scalar::String(Arc::from("1.0")), false).unwrap();
        let a = ContextConsts::new(reg.clone());
        let mut b = ContextConsts::new(reg.clone());
        b.define("ONLY_B", Value::Bool(true), false).unwrap();
        assert_eq!(a.get("VERSION").to_string(), "1.0");
        assert!(!a.is_defined("ONLY_B"));
        let names: Vec<String> = b.iter().into_iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["VERSION", "ONLY_B"]);
    }

    #[test]
    fn test_undefined_is_void() {
        let ctx = ContextConsts::new(Arc::new(ConstRegistry::new()));
        assert!(matches!(ctx.get("NOPE"), Value::Void));
    }
}
