//! Stack interpreter for lowered code bodies.

mod callsite;
mod frame;
mod functions;
mod runtime;

pub use callsite::Binder;
pub use functions::HostFunction;

use callsite::{CallArg, SiteHandle, SiteState};
use frame::{Frame, Slot};
use functions::HostRegistry;

use ember_compiler::compiler::bytecode::{
    CodeBody, CompiledFunction, Instr, Label, Module, NativeOp, StaticArray, StaticKey, StaticValue,
};
use ember_core::consts::{ConstRegistry, ContextConsts, Scalar};
use ember_core::{ArrayKey, ArrayRef, PhpArray, RuntimeError, Value};
use serde::Deserialize;
use std::rc::Rc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace, warn};

#[derive(Debug, Error)]
pub enum VmError {
    #[error("runtime error: {0}")]
    Runtime(#[from] RuntimeError),
    #[error("type error at runtime: {0}")]
    TypeError(String),
    #[error("call to undefined function {0}()")]
    UndefinedFunction(String),
    #[error("call to undefined method {class}::{name}()")]
    UndefinedMethod { class: String, name: String },
    #[error("call site '{0}' was used while its binder was being constructed")]
    CallSiteReentrancy(String),
    #[error("evaluation stack underflow")]
    StackUnderflow,
    #[error("stack overflow: call depth exceeded {0}")]
    StackOverflow(usize),
    #[error("instruction limit exceeded: {0}")]
    InstructionLimitExceeded(u64),
    #[error("invalid bytecode: {0}")]
    InvalidBytecode(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("no module loaded")]
    NoModule,
}

impl VmError {
    pub fn is_type_error(&self) -> bool {
        matches!(self, VmError::TypeError(_))
    }

    pub fn is_instruction_limit_exceeded(&self) -> bool {
        matches!(self, VmError::InstructionLimitExceeded(_))
    }
}

/// Execution limits, loadable from JSON.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct VmOptions {
    /// Nested calls allowed before `StackOverflow`. Default: `256`.
    pub max_call_depth: usize,
    /// Instructions one `execute` may run. Default: unlimited.
    pub instruction_limit: Option<u64>,
}

impl Default for VmOptions {
    fn default() -> Self {
        VmOptions {
            max_call_depth: 256,
            instruction_limit: None,
        }
    }
}

impl VmOptions {
    pub fn from_json_str(text: &str) -> Result<VmOptions, VmError> {
        serde_json::from_str(text).map_err(|e| VmError::Config(e.to_string()))
    }
}

/// Counters accumulated over the VM's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VmStats {
    /// Call-site binders constructed. Each site constructs at most once.
    pub binders_constructed: usize,
    pub instructions: u64,
    pub calls: u64,
}

/// The Ember stack VM.
pub struct VM {
    /// Captured `echo` output, one entry per echoed string.
    pub output: Vec<String>,
    /// Notices raised while running, in order.
    pub warnings: Vec<String>,
    pub(crate) module: Option<Rc<Module>>,
    pub(crate) options: VmOptions,
    pub(crate) stats: VmStats,
    pub(crate) depth: usize,
    pub(crate) instruction_count: u64,
    pub(crate) sites: Vec<SiteState>,
    pub(crate) statics: Vec<Option<ArrayRef>>,
    /// Constant IDs resolved per module slot.
    pub(crate) const_ids: Vec<Option<i64>>,
    pub(crate) consts: ContextConsts,
    pub(crate) host: HostRegistry,
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

impl VM {
    pub fn new() -> Self {
        Self::with_options(VmOptions::default())
    }

    pub fn with_options(options: VmOptions) -> Self {
        Self::with_registry(options, Arc::new(ConstRegistry::new()))
    }

    /// A VM whose constants share `registry` with other contexts.
    pub fn with_registry(options: VmOptions, registry: Arc<ConstRegistry>) -> Self {
        Self {
            output: Vec::new(),
            warnings: Vec::new(),
            module: None,
            options,
            stats: VmStats::default(),
            depth: 0,
            instruction_count: 0,
            sites: Vec::new(),
            statics: Vec::new(),
            const_ids: Vec::new(),
            consts: ContextConsts::new(registry),
            host: HostRegistry::default(),
        }
    }

    /// Load a module. Call sites start uninitialized.
    pub fn load(&mut self, module: Module) {
        debug!(
            functions = module.functions.len(),
            call_sites = module.call_sites.len(),
            "loading module"
        );
        self.sites = vec![SiteState::Uninitialized; module.call_sites.len()];
        self.statics = vec![None; module.static_arrays.len()];
        self.const_ids = vec![None; module.const_slots.len()];
        self.module = Some(Rc::new(module));
    }

    pub fn load_json(&mut self, json: &str) -> Result<(), VmError> {
        let module = Module::from_json(json).map_err(|e| VmError::Config(e.to_string()))?;
        self.load(module);
        Ok(())
    }

    pub fn options(&self) -> &VmOptions {
        &self.options
    }

    pub fn set_instruction_limit(&mut self, limit: u64) {
        self.options.instruction_limit = Some(limit);
    }

    pub fn stats(&self) -> VmStats {
        self.stats
    }

    /// Everything echoed so far.
    pub fn output_text(&self) -> String {
        self.output.concat()
    }

    // ── Host functions ──────────────────────────────────────────────

    pub fn register_function(&mut self, f: HostFunction) {
        self.host.add_function(f);
    }

    pub fn register_method(&mut self, class: &str, f: HostFunction) {
        self.host.add_method(class, f);
    }

    pub fn register_static(&mut self, class: &str, f: HostFunction) {
        self.host.add_static(class, f);
    }

    /// Names of the registered free functions, in registration order.
    pub fn host_functions(&self) -> Vec<&str> {
        self.host.function_names().collect()
    }

    // ── Constants ───────────────────────────────────────────────────

    /// Defines a constant in this context. Returns `Ok(false)` when it already has a value.
    pub fn define_constant(&mut self, name: &str, value: Value, case_insensitive: bool) -> Result<bool, VmError> {
        Ok(self.consts.define(name, value, case_insensitive)?)
    }

    /// Defines a constant visible to every context sharing this VM's registry.
    pub fn define_app_constant(&self, name: &str, value: &Value, case_insensitive: bool) -> Result<bool, VmError> {
        let scalar = Scalar::from_value(value).ok_or_else(|| {
            VmError::TypeError(format!(
                "application constant '{}' must be a scalar, got {}",
                name,
                value.type_name()
            ))
        })?;
        Ok(self
            .consts
            .registry()
            .define_app_constant(name, scalar, case_insensitive)?)
    }

    /// Value of constant `name`, or `Void` when undefined.
    pub fn constant(&self, name: &str) -> Value {
        self.consts.get(name)
    }

    // ── Execution ───────────────────────────────────────────────────

    /// Run function `name` with `args`, returning its result.
    pub fn execute(&mut self, name: &str, args: Vec<Value>) -> Result<Value, VmError> {
        let module = self.module.clone().ok_or(VmError::NoModule)?;
        self.instruction_count = 0;
        self.depth = 0;
        let callee = self.resolve_function(&module, name)?;
        let args = args.into_iter().map(CallArg::Value).collect();
        let mut caller = Frame::detached();
        self.dispatch(&module, callee, None, args, &mut caller)
    }

    pub(crate) fn call_compiled(
        &mut self,
        module: &Rc<Module>,
        func: &CompiledFunction,
        args: Vec<Value>,
    ) -> Result<Value, VmError> {
        if self.depth >= self.options.max_call_depth {
            return Err(VmError::StackOverflow(self.options.max_call_depth));
        }
        let mut frame = Frame::new(&func.name, &func.body);
        for (i, arg) in args.into_iter().enumerate().take(func.param_count) {
            let carrier = func
                .body
                .locals
                .get(i)
                .map(|l| l.carrier)
                .ok_or_else(|| VmError::InvalidBytecode(format!("'{}' has no local for parameter {}", func.name, i)))?;
            frame.bind_param(i, arg, carrier)?;
        }
        self.depth += 1;
        self.stats.calls += 1;
        trace!(function = %func.name, depth = self.depth, "enter");
        let result = self.run(module, &func.body, &mut frame);
        self.depth -= 1;
        Ok(match result? {
            Some(slot) => slot.into_value().deref(),
            None => Value::Null,
        })
    }

    fn tick(&mut self) -> Result<(), VmError> {
        self.instruction_count += 1;
        self.stats.instructions += 1;
        match self.options.instruction_limit {
            Some(limit) if self.instruction_count > limit => Err(VmError::InstructionLimitExceeded(limit)),
            _ => Ok(()),
        }
    }

    /// Records a runtime notice; execution continues.
    pub(crate) fn notice(&mut self, message: String) {
        warn!(target: "ember_vm", "{}", message);
        self.warnings.push(message);
    }

    /// Runs `body` in `frame` until it returns or falls off the end.
    pub(crate) fn run(
        &mut self,
        module: &Rc<Module>,
        body: &CodeBody,
        frame: &mut Frame,
    ) -> Result<Option<Slot>, VmError> {
        let mut ip = 0;
        while let Some(instr) = body.instrs.get(ip) {
            self.tick()?;
            ip += 1;
            match instr {
                Instr::LdNull => frame.push(Slot::Value(Value::Null)),
                Instr::LdVoid => frame.push(Slot::Value(Value::Void)),
                Instr::LdBool(b) => frame.push(Slot::Bool(*b)),
                Instr::LdI4(n) => frame.push(Slot::I4(*n)),
                Instr::LdInt(n) => frame.push(Slot::Int(*n)),
                Instr::LdFloat(f) => frame.push(Slot::Float(*f)),
                Instr::LdStr(id) => frame.push(Slot::Str(Rc::from(pooled(body, *id)?))),
                Instr::LdIntKey(n) => frame.push(Slot::Key(ArrayKey::Int(*n))),
                Instr::LdStrKey(id) => frame.push(Slot::Key(ArrayKey::from_str_key(pooled(body, *id)?))),
                Instr::LdContext => frame.push(Slot::Context),
                Instr::LdTypeToken(class) => {
                    let class = match class {
                        Some(id) => Some(Rc::from(pooled(body, *id)?)),
                        None => None,
                    };
                    frame.push(Slot::TypeToken(class));
                }
                Instr::LdEmptyArray => frame.push(Slot::Array(PhpArray::new().into_ref())),
                Instr::NewArray(capacity) => {
                    frame.push(Slot::Array(PhpArray::with_capacity(*capacity as usize).into_ref()))
                }
                Instr::LdStaticArray(index) => {
                    let arr = self.static_array(module, *index)?;
                    frame.push(Slot::Array(arr));
                }

                Instr::Pop => {
                    frame.pop()?;
                }
                Instr::Dup => {
                    let top = frame.peek()?.clone();
                    frame.push(top);
                }
                Instr::LdLoc(index) => {
                    let slot = frame.load_local(*index)?;
                    frame.push(slot);
                }
                Instr::StLoc(index) => {
                    let value = frame.pop()?;
                    frame.store_local(*index, value)?;
                }
                Instr::LdLocAddr(index) => frame.push(Slot::Ref(*index)),
                Instr::UnsetLoc(index) => {
                    let carrier = body
                        .locals
                        .get(*index as usize)
                        .map(|l| l.carrier)
                        .ok_or_else(|| VmError::InvalidBytecode(format!("local {} out of range", index)))?;
                    frame.unset_local(*index, carrier)?;
                }

                Instr::Br(label) => ip = jump_target(body, *label)?,
                Instr::BrTrue(label) => {
                    if frame.pop_bool()? {
                        ip = jump_target(body, *label)?;
                    }
                }
                Instr::BrFalse(label) => {
                    if !frame.pop_bool()? {
                        ip = jump_target(body, *label)?;
                    }
                }
                Instr::MarkLabel(_) => {}
                Instr::Ret => return Ok(frame.stack.pop()),

                Instr::Native(op) => {
                    let result = match op {
                        NativeOp::Neg | NativeOp::Not => native_unary(*op, frame.pop()?)?,
                        _ => {
                            let b = frame.pop()?;
                            let a = frame.pop()?;
                            native_binary(*op, a, b)?
                        }
                    };
                    frame.push(result);
                }
                Instr::ConvFloat => {
                    let converted = match frame.pop()? {
                        Slot::Int(n) => n as f64,
                        Slot::I4(n) => f64::from(n),
                        other => return Err(VmError::TypeError(format!("conv.float on {}", other.kind()))),
                    };
                    frame.push(Slot::Float(converted));
                }
                Instr::ConvInt => {
                    let converted = match frame.pop()? {
                        Slot::Bool(b) => i64::from(b),
                        Slot::I4(n) => i64::from(n),
                        other => return Err(VmError::TypeError(format!("conv.int on {}", other.kind()))),
                    };
                    frame.push(Slot::Int(converted));
                }
                Instr::Call(f) => self.call_runtime(module, *f, frame)?,

                Instr::LdCallSite(index) => {
                    let site = self.ensure_site(module, *index)?;
                    frame.push(Slot::CallSite(site));
                }
                Instr::InvokeCallSite(index) => self.invoke_site(module, *index, frame)?,
                Instr::CreateCallSite(index) => {
                    let binder = frame.pop_binder()?;
                    frame.push(Slot::CallSite(SiteHandle { index: *index, binder }));
                }
                Instr::StCallSite(index) => {
                    let site = frame.pop_site()?;
                    self.complete_site(*index, site)?;
                }

                Instr::ReadConstant { name, slot, fallback } => {
                    frame.pop_context()?;
                    let name = pooled(body, *name)?;
                    let fallback = match fallback {
                        Some(id) => Some(pooled(body, *id)?),
                        None => None,
                    };
                    let value = self.read_constant(*slot, name, fallback);
                    frame.push_value(value);
                }
            }
        }
        Ok(None)
    }

    /// Constant lookup through the module slot's cached ID. An undefined
    /// constant raises a notice and evaluates to its own name.
    fn read_constant(&mut self, slot: u32, name: &str, fallback: Option<&str>) -> Value {
        let cached = self.const_ids.get(slot as usize).copied().flatten();
        let id = match cached {
            Some(id) => Some(id),
            None => {
                let id = self.consts.registry().resolve(name);
                if let (Some(id), Some(cell)) = (id, self.const_ids.get_mut(slot as usize)) {
                    *cell = Some(id);
                }
                id
            }
        };
        let value = id.map(|id| self.consts.get_by_id(id)).unwrap_or_default();
        if !matches!(value, Value::Void) {
            return value;
        }
        if let Some(fallback) = fallback {
            let value = self.consts.get(fallback);
            if !matches!(value, Value::Void) {
                return value;
            }
        }
        self.notice(format!("use of undefined constant {} - assumed '{}'", name, name));
        Value::string(name)
    }

    /// The cached array for a constant-only literal, built on first use.
    fn static_array(&mut self, module: &Module, index: u32) -> Result<ArrayRef, VmError> {
        if let Some(Some(arr)) = self.statics.get(index as usize) {
            return Ok(arr.clone());
        }
        let decl = module
            .static_arrays
            .get(index as usize)
            .ok_or_else(|| VmError::InvalidBytecode(format!("static array {} does not exist", index)))?;
        let arr = build_static_array(decl)?.into_ref();
        if let Some(cell) = self.statics.get_mut(index as usize) {
            *cell = Some(arr.clone());
        }
        Ok(arr)
    }
}

fn pooled(body: &CodeBody, id: u32) -> Result<&str, VmError> {
    body.constant(id)
        .ok_or_else(|| VmError::InvalidBytecode(format!("constant {} out of range", id)))
}

fn jump_target(body: &CodeBody, label: Label) -> Result<usize, VmError> {
    body.label_target(label)
        .filter(|target| *target != usize::MAX)
        .ok_or_else(|| VmError::InvalidBytecode(format!("label {} is not placed", label.0)))
}

fn build_static_array(decl: &StaticArray) -> Result<PhpArray, RuntimeError> {
    let mut arr = PhpArray::with_capacity(decl.items.len());
    for (key, value) in &decl.items {
        let value = match value {
            StaticValue::Null => Value::Null,
            StaticValue::Bool(b) => Value::Bool(*b),
            StaticValue::Int(n) => Value::Int(*n),
            StaticValue::Float(f) => Value::Float(*f),
            StaticValue::String(s) => Value::string(s),
        };
        match key {
            Some(StaticKey::Int(n)) => arr.set_item_value(ArrayKey::Int(*n), value),
            Some(StaticKey::Str(s)) => arr.set_item_value(ArrayKey::from_str_key(s), value),
            None => {
                arr.add_value(value)?;
            }
        }
    }
    Ok(arr)
}

fn relational<T: PartialOrd>(op: NativeOp, x: T, y: T) -> Option<bool> {
    Some(match op {
        NativeOp::Ceq => x == y,
        NativeOp::Clt => x < y,
        NativeOp::Cgt => x > y,
        NativeOp::Cle => x <= y,
        NativeOp::Cge => x >= y,
        _ => return None,
    })
}

fn native_unary(op: NativeOp, operand: Slot) -> Result<Slot, VmError> {
    Ok(match (op, operand) {
        (NativeOp::Neg, Slot::Float(f)) => Slot::Float(-f),
        (NativeOp::Neg, Slot::I4(n)) => Slot::I4(n.wrapping_neg()),
        (NativeOp::Not, Slot::Bool(b)) => Slot::Bool(!b),
        (NativeOp::Not, Slot::Int(n)) => Slot::Int(!n),
        (NativeOp::Not, Slot::I4(n)) => Slot::I4(!n),
        (op, other) => return Err(VmError::TypeError(format!("native {:?} on {}", op, other.kind()))),
    })
}

fn native_binary(op: NativeOp, a: Slot, b: Slot) -> Result<Slot, VmError> {
    use NativeOp::*;
    let compared = match (&a, &b) {
        (Slot::Int(x), Slot::Int(y)) => relational(op, x, y),
        (Slot::I4(x), Slot::I4(y)) => relational(op, x, y),
        (Slot::Float(x), Slot::Float(y)) => relational(op, x, y),
        (Slot::Bool(x), Slot::Bool(y)) => relational(op, x, y),
        _ => None,
    };
    if let Some(result) = compared {
        return Ok(Slot::Bool(result));
    }
    Ok(match (op, a, b) {
        (Add, Slot::Int(x), Slot::Int(y)) => Slot::Int(x.wrapping_add(y)),
        (Sub, Slot::Int(x), Slot::Int(y)) => Slot::Int(x.wrapping_sub(y)),
        (Mul, Slot::Int(x), Slot::Int(y)) => Slot::Int(x.wrapping_mul(y)),
        (And, Slot::Int(x), Slot::Int(y)) => Slot::Int(x & y),
        (Or, Slot::Int(x), Slot::Int(y)) => Slot::Int(x | y),
        (Xor, Slot::Int(x), Slot::Int(y)) => Slot::Int(x ^ y),
        (Add, Slot::I4(x), Slot::I4(y)) => Slot::I4(x.wrapping_add(y)),
        (Sub, Slot::I4(x), Slot::I4(y)) => Slot::I4(x.wrapping_sub(y)),
        (Mul, Slot::I4(x), Slot::I4(y)) => Slot::I4(x.wrapping_mul(y)),
        (And, Slot::I4(x), Slot::I4(y)) => Slot::I4(x & y),
        (Or, Slot::I4(x), Slot::I4(y)) => Slot::I4(x | y),
        (Xor, Slot::I4(x), Slot::I4(y)) => Slot::I4(x ^ y),
        (Add, Slot::Float(x), Slot::Float(y)) => Slot::Float(x + y),
        (Sub, Slot::Float(x), Slot::Float(y)) => Slot::Float(x - y),
        (Mul, Slot::Float(x), Slot::Float(y)) => Slot::Float(x * y),
        (And, Slot::Bool(x), Slot::Bool(y)) => Slot::Bool(x & y),
        (Or, Slot::Bool(x), Slot::Bool(y)) => Slot::Bool(x | y),
        (Xor, Slot::Bool(x), Slot::Bool(y)) => Slot::Bool(x ^ y),
        (op, a, b) => {
            return Err(VmError::TypeError(format!(
                "native {:?} on ({}, {})",
                op,
                a.kind(),
                b.kind()
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ember_compiler::compiler::bytecode::{CompiledFunction, LocalSlot};
    use ember_compiler::compiler::carrier::CarrierType;

    fn module_with(body: CodeBody) -> Module {
        Module {
            functions: vec![CompiledFunction {
                name: "main".to_string(),
                param_count: 0,
                body,
            }],
            call_sites: Vec::new(),
            delegates: Vec::new(),
            const_slots: Vec::new(),
            static_arrays: Vec::new(),
        }
    }

    #[test]
    fn test_native_ops() {
        assert!(matches!(
            native_binary(NativeOp::Add, Slot::Int(2), Slot::Int(3)).unwrap(),
            Slot::Int(5)
        ));
        assert!(matches!(
            native_binary(NativeOp::Cle, Slot::Float(1.0), Slot::Float(1.0)).unwrap(),
            Slot::Bool(true)
        ));
        assert!(matches!(
            native_binary(NativeOp::Clt, Slot::Bool(false), Slot::Bool(true)).unwrap(),
            Slot::Bool(true)
        ));
        assert!(matches!(native_unary(NativeOp::Not, Slot::Int(0)).unwrap(), Slot::Int(-1)));
        assert!(native_binary(NativeOp::Add, Slot::Int(1), Slot::Float(1.0)).is_err());
    }

    #[test]
    fn test_branches_follow_labels() {
        let mut body = CodeBody::new();
        body.instrs = vec![
            Instr::LdBool(false),
            Instr::BrFalse(Label(0)),
            Instr::LdInt(1),
            Instr::Ret,
            Instr::MarkLabel(Label(0)),
            Instr::LdInt(2),
            Instr::Call(ember_compiler::compiler::runtime_fns::RuntimeFn::IntToValue),
            Instr::Ret,
        ];
        body.labels = vec![4];
        let mut vm = VM::new();
        vm.load(module_with(body));
        assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Int(2)));
    }

    #[test]
    fn test_instruction_limit() {
        let mut body = CodeBody::new();
        body.instrs = vec![Instr::MarkLabel(Label(0)), Instr::Br(Label(0))];
        body.labels = vec![0];
        let mut vm = VM::with_options(VmOptions {
            instruction_limit: Some(100),
            ..VmOptions::default()
        });
        vm.load(module_with(body));
        let err = vm.execute("main", vec![]).unwrap_err();
        assert!(err.is_instruction_limit_exceeded());
    }

    #[test]
    fn test_unset_local_resets_to_carrier_default() {
        let mut body = CodeBody::new();
        body.locals = vec![LocalSlot {
            name: Some("x".to_string()),
            carrier: CarrierType::DynamicValue,
        }];
        body.instrs = vec![
            Instr::LdInt(4),
            Instr::Call(ember_compiler::compiler::runtime_fns::RuntimeFn::IntToValue),
            Instr::StLoc(0),
            Instr::UnsetLoc(0),
            Instr::LdLoc(0),
            Instr::Ret,
        ];
        let mut vm = VM::new();
        vm.load(module_with(body));
        assert!(matches!(vm.execute("main", vec![]).unwrap(), Value::Void));
    }

    #[test]
    fn test_options_from_json() {
        let opts = VmOptions::from_json_str(r#"{"instruction_limit": 5000}"#).unwrap();
        assert_eq!(opts.instruction_limit, Some(5000));
        assert_eq!(opts.max_call_depth, 256);
        assert!(matches!(VmOptions::from_json_str("[1]"), Err(VmError::Config(_))));
    }

    #[test]
    fn test_execute_without_module() {
        let mut vm = VM::new();
        assert!(matches!(vm.execute("main", vec![]), Err(VmError::NoModule)));
    }
}
