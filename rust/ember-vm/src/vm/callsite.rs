//! Call-site caches, binders and dispatch.

use super::frame::{Frame, Slot};
use super::functions::HostFunction;
use super::{VmError, VM};
use ember_compiler::compiler::bytecode::Module;
use ember_compiler::compiler::callsite::{BinderKind, ParamRole};
use ember_compiler::compiler::carrier::CarrierType;
use ember_core::{Alias, RuntimeError, Value};
use std::rc::Rc;
use tracing::{debug, trace};

/// Resolution strategy produced by a site's initializer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Binder {
    pub kind: BinderKind,
    /// `None` when the name arrives with each call.
    pub name: Option<Rc<str>>,
    /// Target class of a static call; `None` when computed per call.
    pub class: Option<Rc<str>>,
    /// Class the call occurs in.
    pub caller: Option<Rc<str>>,
}

/// A constructed site: its index and the binder it dispatches with.
#[derive(Debug, Clone)]
pub(crate) struct SiteHandle {
    pub(crate) index: u32,
    pub(crate) binder: Rc<Binder>,
}

#[derive(Debug, Clone)]
pub(crate) enum SiteState {
    Uninitialized,
    /// The initializer is running.
    Constructing,
    Ready(SiteHandle),
}

/// One argument as it left the caller.
#[derive(Debug, Clone)]
pub(crate) enum CallArg {
    Value(Value),
    Alias(Alias),
    /// A dynamic local of the calling frame.
    Address(u32),
}

#[derive(Debug, Clone)]
pub(crate) enum Callee {
    Compiled(usize),
    Host(HostFunction),
}

impl VM {
    /// The site's handle, running its initializer on first use.
    pub(crate) fn ensure_site(&mut self, module: &Rc<Module>, index: u32) -> Result<SiteHandle, VmError> {
        let decl = module
            .call_sites
            .get(index as usize)
            .ok_or_else(|| VmError::InvalidBytecode(format!("call site {} does not exist", index)))?;
        match self.sites.get(index as usize) {
            Some(SiteState::Ready(handle)) => return Ok(handle.clone()),
            Some(SiteState::Constructing) => return Err(VmError::CallSiteReentrancy(decl.name.clone())),
            Some(SiteState::Uninitialized) => {}
            None => return Err(VmError::InvalidBytecode(format!("call site {} is not loaded", index))),
        }
        self.set_site(index, SiteState::Constructing);
        let mut frame = Frame::new(&decl.name, &decl.init);
        if let Err(e) = self.run(module, &decl.init, &mut frame) {
            self.set_site(index, SiteState::Uninitialized);
            return Err(e);
        }
        match self.sites.get(index as usize) {
            Some(SiteState::Ready(handle)) => {
                self.stats.binders_constructed += 1;
                debug!(site = %decl.name, function = %decl.function, kind = ?handle.binder.kind, "constructed call site");
                Ok(handle.clone())
            }
            _ => {
                self.set_site(index, SiteState::Uninitialized);
                Err(VmError::InvalidBytecode(format!(
                    "initializer of call site '{}' did not store the site",
                    decl.name
                )))
            }
        }
    }

    /// Publishes a site built by its initializer.
    pub(crate) fn complete_site(&mut self, index: u32, site: SiteHandle) -> Result<(), VmError> {
        if site.index != index {
            return Err(VmError::InvalidBytecode(format!(
                "call site {} stored into field {}",
                site.index, index
            )));
        }
        if self.sites.get(index as usize).is_none() {
            return Err(VmError::InvalidBytecode(format!("call site {} is not loaded", index)));
        }
        self.set_site(index, SiteState::Ready(site));
        Ok(())
    }

    fn set_site(&mut self, index: u32, state: SiteState) {
        if let Some(cell) = self.sites.get_mut(index as usize) {
            *cell = state;
        }
    }

    /// Pops the descriptor and arguments of site `index`, dispatches and
    /// pushes the result unless the site discards it.
    pub(crate) fn invoke_site(&mut self, module: &Rc<Module>, index: u32, frame: &mut Frame) -> Result<(), VmError> {
        let decl = module
            .call_sites
            .get(index as usize)
            .ok_or_else(|| VmError::InvalidBytecode(format!("call site {} does not exist", index)))?;
        let shape = &decl.shape;
        let operands = frame.pop_n(shape.params.len())?;
        let site = frame.pop_site()?;

        let mut instance = None;
        let mut target = None;
        let mut dynamic_name = None;
        let mut args = Vec::new();
        for (param, slot) in shape.params.iter().zip(operands) {
            match param.role {
                ParamRole::Instance => instance = Some(slot.into_value().deref()),
                ParamRole::TargetType => match slot {
                    Slot::TypeToken(Some(class)) => target = Some(class),
                    other => {
                        return Err(VmError::TypeError(format!(
                            "call site target type must name a class, found {}",
                            other.kind()
                        )))
                    }
                },
                ParamRole::Name => match slot {
                    Slot::Name(name) => dynamic_name = Some(name),
                    other => return Err(VmError::TypeError(format!("expected a name parameter, found {}", other.kind()))),
                },
                ParamRole::Context | ParamRole::TypeArgs | ParamRole::CallerType => {}
                ParamRole::Arg => args.push(match slot {
                    Slot::Ref(local) if param.by_ref => CallArg::Address(local),
                    Slot::Alias(alias) => CallArg::Alias(alias),
                    other => CallArg::Value(other.into_value()),
                }),
                ParamRole::Unpacked => {
                    let value = slot.into_value().deref();
                    let arr = value.as_array().ok_or_else(|| {
                        VmError::TypeError(format!("only arrays can be unpacked, found {}", value.type_name()))
                    })?;
                    let items: Vec<Value> = arr.borrow().values().cloned().collect();
                    args.extend(items.into_iter().map(|v| CallArg::Value(v.deref())));
                }
            }
        }

        let binder = site.binder;
        let name = binder
            .name
            .clone()
            .or(dynamic_name)
            .ok_or_else(|| VmError::InvalidBytecode(format!("call site '{}' has no callee name", decl.name)))?;
        trace!(site = %decl.name, callee = %name, args = args.len(), "invoke call site");

        let (callee, this) = match binder.kind {
            BinderKind::Function => (self.resolve_function(module, &name)?, None),
            BinderKind::InstanceFunction => {
                let value = instance.unwrap_or(Value::Null);
                let obj = value
                    .as_object()
                    .ok_or_else(|| RuntimeError::NotAnObject(value.type_name()))?;
                let callee = self.resolve_method(module, obj.class_name(), &name, false)?;
                (callee, Some(Value::Object(obj)))
            }
            BinderKind::StaticFunction => {
                let class = binder.class.clone().or(target).ok_or_else(|| {
                    VmError::InvalidBytecode(format!("call site '{}' has no target class", decl.name))
                })?;
                (self.resolve_method(module, &class, &name, true)?, None)
            }
        };
        let result = self.dispatch(module, callee, this, args, frame)?;
        if shape.ret != CarrierType::Void {
            frame.push_value(result);
        }
        Ok(())
    }

    /// Compiled functions shadow host functions of the same name.
    pub(crate) fn resolve_function(&self, module: &Module, name: &str) -> Result<Callee, VmError> {
        let name = name.trim_start_matches('\\');
        if let Some(pos) = module.functions.iter().position(|f| f.name.eq_ignore_ascii_case(name)) {
            return Ok(Callee::Compiled(pos));
        }
        match self.host.function(name) {
            Some(f) => Ok(Callee::Host(f.clone())),
            None => Err(VmError::UndefinedFunction(name.to_string())),
        }
    }

    /// Host methods first, then a compiled `Class::name`.
    fn resolve_method(&self, module: &Module, class: &str, name: &str, is_static: bool) -> Result<Callee, VmError> {
        let host = if is_static {
            self.host.static_method(class, name)
        } else {
            self.host.method(class, name)
        };
        if let Some(f) = host {
            return Ok(Callee::Host(f.clone()));
        }
        let qualified = format!("{}::{}", class.trim_start_matches('\\'), name);
        match module
            .functions
            .iter()
            .position(|f| f.name.eq_ignore_ascii_case(&qualified))
        {
            Some(pos) => Ok(Callee::Compiled(pos)),
            None => Err(VmError::UndefinedMethod {
                class: class.to_string(),
                name: name.to_string(),
            }),
        }
    }

    /// Calls `callee`. Compiled functions take every argument by value; host
    /// functions take their declared by-reference positions as aliases.
    pub(crate) fn dispatch(
        &mut self,
        module: &Rc<Module>,
        callee: Callee,
        this: Option<Value>,
        args: Vec<CallArg>,
        frame: &mut Frame,
    ) -> Result<Value, VmError> {
        let offset = usize::from(this.is_some());
        let mut values: Vec<Value> = this.into_iter().collect();
        match callee {
            Callee::Compiled(pos) => {
                for arg in args {
                    values.push(by_value(arg, frame)?);
                }
                let func = module
                    .functions
                    .get(pos)
                    .ok_or_else(|| VmError::InvalidBytecode(format!("function {} does not exist", pos)))?;
                self.call_compiled(module, func, values)
            }
            Callee::Host(f) => {
                for (i, arg) in args.into_iter().enumerate() {
                    let value = if f.is_by_ref(i + offset) {
                        Value::Alias(match arg {
                            CallArg::Address(local) => frame.make_reference(local)?,
                            CallArg::Alias(alias) => alias,
                            CallArg::Value(v) => Alias::new(v),
                        })
                    } else {
                        by_value(arg, frame)?
                    };
                    values.push(value);
                }
                self.stats.calls += 1;
                trace!(function = f.name(), "host call");
                Ok(f.call(&values)?.deref())
            }
        }
    }

    /// `$f(...)` with a string `"f"`/`"C::m"` or an `[object|class, method]` pair.
    pub(crate) fn invoke_callable(
        &mut self,
        module: &Rc<Module>,
        callable: &Value,
        args: Vec<Value>,
        frame: &mut Frame,
    ) -> Result<Value, VmError> {
        let args: Vec<CallArg> = args.into_iter().map(|v| CallArg::Value(v.deref())).collect();
        let not_callable = || VmError::TypeError(format!("value of type {} is not callable", callable.type_name()));
        match callable.deref() {
            Value::String(_) | Value::MutableString(_) => {
                let name = callable.to_string();
                let callee = match name.split_once("::") {
                    Some((class, method)) => self.resolve_method(module, class, method, true)?,
                    None => self.resolve_function(module, &name)?,
                };
                self.dispatch(module, callee, None, args, frame)
            }
            Value::Array(arr) => {
                let (target, method) = {
                    let arr = arr.borrow();
                    let mut items = arr.values();
                    match (items.next(), items.next(), items.next()) {
                        (Some(t), Some(m), None) => (t.deref(), m.to_string()),
                        _ => return Err(not_callable()),
                    }
                };
                match target {
                    Value::Object(obj) => {
                        let callee = self.resolve_method(module, obj.class_name(), &method, false)?;
                        self.dispatch(module, callee, Some(Value::Object(obj)), args, frame)
                    }
                    Value::String(class) => {
                        let callee = self.resolve_method(module, &class, &method, true)?;
                        self.dispatch(module, callee, None, args, frame)
                    }
                    _ => Err(not_callable()),
                }
            }
            _ => Err(not_callable()),
        }
    }
}

fn by_value(arg: CallArg, frame: &mut Frame) -> Result<Value, VmError> {
    Ok(match arg {
        CallArg::Value(v) => v.deref().deep_copy(),
        CallArg::Alias(alias) => alias.get().deep_copy(),
        CallArg::Address(local) => frame.load_local(local)?.into_value().deref().deep_copy(),
    })
}
