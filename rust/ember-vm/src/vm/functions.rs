//! Host functions callable from compiled code through call sites.

use super::VmError;
use ember_core::Value;
use indexmap::IndexMap;
use std::fmt;
use std::rc::Rc;

type NativeFn = dyn Fn(&[Value]) -> Result<Value, VmError>;

/// A function implemented by the embedder.
///
/// Arguments at `by_ref` positions arrive as `Value::Alias`; writing the
/// alias writes the caller's variable. Instance methods receive `$this` as
/// argument 0.
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    by_ref: Vec<usize>,
    func: Rc<NativeFn>,
}

impl HostFunction {
    pub fn new(name: &str, func: impl Fn(&[Value]) -> Result<Value, VmError> + 'static) -> Self {
        HostFunction {
            name: name.to_string(),
            by_ref: Vec::new(),
            func: Rc::new(func),
        }
    }

    /// Marks argument `pos` as taken by reference.
    pub fn by_ref(mut self, pos: usize) -> Self {
        if !self.by_ref.contains(&pos) {
            self.by_ref.push(pos);
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_by_ref(&self, pos: usize) -> bool {
        self.by_ref.contains(&pos)
    }

    pub fn call(&self, args: &[Value]) -> Result<Value, VmError> {
        (self.func)(args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("by_ref", &self.by_ref)
            .finish()
    }
}

/// Registered host functions. Names match case-insensitively.
#[derive(Debug, Default)]
pub(crate) struct HostRegistry {
    functions: IndexMap<String, HostFunction>,
    methods: IndexMap<(String, String), HostFunction>,
    statics: IndexMap<(String, String), HostFunction>,
}

fn fold(name: &str) -> String {
    name.trim_start_matches('\\').to_ascii_lowercase()
}

impl HostRegistry {
    pub(crate) fn add_function(&mut self, f: HostFunction) {
        self.functions.insert(fold(f.name()), f);
    }

    pub(crate) fn add_method(&mut self, class: &str, f: HostFunction) {
        self.methods.insert((fold(class), fold(f.name())), f);
    }

    pub(crate) fn add_static(&mut self, class: &str, f: HostFunction) {
        self.statics.insert((fold(class), fold(f.name())), f);
    }

    pub(crate) fn function(&self, name: &str) -> Option<&HostFunction> {
        self.functions.get(&fold(name))
    }

    pub(crate) fn method(&self, class: &str, name: &str) -> Option<&HostFunction> {
        self.methods.get(&(fold(class), fold(name)))
    }

    pub(crate) fn static_method(&self, class: &str, name: &str) -> Option<&HostFunction> {
        self.statics.get(&(fold(class), fold(name)))
    }

    pub(crate) fn function_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.functions.values().map(|f| f.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        let mut reg = HostRegistry::default();
        reg.add_function(HostFunction::new("StrLen", |_| Ok(Value::Int(0))));
        reg.add_method("Counter", HostFunction::new("next", |_| Ok(Value::Null)));
        assert!(reg.function("strlen").is_some());
        assert!(reg.function("\\STRLEN").is_some());
        assert!(reg.method("counter", "NEXT").is_some());
        assert!(reg.static_method("counter", "next").is_none());
        assert_eq!(reg.function_names().collect::<Vec<_>>(), vec!["StrLen"]);
    }

    #[test]
    fn test_by_ref_positions() {
        let f = HostFunction::new("swap", |_| Ok(Value::Null)).by_ref(0).by_ref(1).by_ref(0);
        assert!(f.is_by_ref(0));
        assert!(f.is_by_ref(1));
        assert!(!f.is_by_ref(2));
        assert_eq!(format!("{:?}", f), "HostFunction { name: \"swap\", by_ref: [0, 1] }");
    }
}
