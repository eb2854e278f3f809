//! Dynamic call-site factory.
//!
//! A call whose callee is unknown at compile time is lowered to a cached
//! dispatch site: `LdCallSite` pushes the site's delegate, running the
//! binder-construction body on first use, then the descriptor values and
//! arguments are pushed and `InvokeCallSite` dispatches through it.
//!
//! Descriptor order is fixed: instance, target type, name, context, type
//! arguments, caller type, then arguments in source order.

use crate::compiler::ast::{Arg, CallTarget, Expr, ExprKind, Name};
use crate::compiler::bytecode::{CodeBody, Instr};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::emitter::Emitter;
use crate::compiler::lower::Lowerer;
use crate::compiler::place::Place;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;
use serde::{Deserialize, Serialize};

type C = CarrierType;

// ── Declarations ────────────────────────────────────────────────────

/// What a delegate parameter carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamRole {
    Instance,
    TargetType,
    Name,
    Context,
    TypeArgs,
    CallerType,
    Arg,
    /// `...$args`
    Unpacked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegateParam {
    pub carrier: CarrierType,
    pub role: ParamRole,
    pub by_ref: bool,
}

/// Parameter and return carriers of a site's dispatch delegate. The
/// call-site object itself is an implicit leading parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DelegateShape {
    pub params: Vec<DelegateParam>,
    pub ret: CarrierType,
}

impl DelegateShape {
    pub fn has_by_ref(&self) -> bool {
        self.params.iter().any(|p| p.by_ref)
    }

    /// Bit `i` is set when parameter `i` is passed by address. `None` when a
    /// by-address parameter sits past the last bit.
    pub fn by_ref_mask(&self) -> Option<u64> {
        self.params
            .iter()
            .enumerate()
            .filter(|(_, p)| p.by_ref)
            .try_fold(0u64, |mask, (i, _)| {
                let bit = 1u64.checked_shl(u32::try_from(i).ok()?)?;
                Some(mask | bit)
            })
    }

    /// Arity including the call-site parameter.
    pub fn arity(&self) -> usize {
        self.params.len() + 1
    }

    /// Positions of parameters with `role`.
    pub fn positions(&self, role: ParamRole) -> impl Iterator<Item = usize> + '_ {
        self.params
            .iter()
            .enumerate()
            .filter(move |(_, p)| p.role == role)
            .map(|(i, _)| i)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegateFamily {
    /// Returns a value.
    Func,
    /// Returns nothing.
    Action,
}

/// Delegate type a site is declared with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DelegateRef {
    WellKnown { family: DelegateFamily, arity: usize },
    /// Index into the module's synthesized delegate shapes.
    Synthesized(u32),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BinderKind {
    Function,
    InstanceFunction,
    StaticFunction,
}

/// What the binder is constructed from. Names absent here arrive at
/// invocation time as a name parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BinderSpec {
    pub kind: BinderKind,
    pub name: Option<String>,
    pub class: Option<String>,
    pub caller: Option<String>,
}

/// A cached dispatch field and its one-time initializer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallSiteDecl {
    /// Unique field name, e.g. `call_foo` or `call_foo'1`.
    pub name: String,
    /// Function the site occurs in.
    pub function: String,
    pub delegate: DelegateRef,
    pub shape: DelegateShape,
    pub binder: BinderSpec,
    /// Builds the binder, creates the site and stores it in the field.
    pub init: CodeBody,
}

// ── Binder construction ─────────────────────────────────────────────

const PLACEHOLDER: u32 = u32::MAX;

/// Emits the body run on a site's first use. The site index is a
/// placeholder until [`retarget`] fills it in.
pub fn binder_body(spec: &BinderSpec) -> Result<CodeBody, LowerError> {
    let mut em = Emitter::new();
    let f = match spec.kind {
        BinderKind::Function => {
            em.ld_str(spec.name.as_deref().unwrap_or_default());
            em.ld_type_token(spec.caller.as_deref());
            RuntimeFn::BinderFunction
        }
        BinderKind::InstanceFunction => {
            em.ld_str(spec.name.as_deref().unwrap_or_default());
            em.ld_type_token(spec.caller.as_deref());
            RuntimeFn::BinderInstanceFunction
        }
        BinderKind::StaticFunction => {
            em.ld_type_token(spec.class.as_deref());
            em.ld_str(spec.name.as_deref().unwrap_or_default());
            em.ld_type_token(spec.caller.as_deref());
            RuntimeFn::BinderStaticFunction
        }
    };
    em.call(f)?;
    em.create_call_site(PLACEHOLDER)?;
    em.st_call_site(PLACEHOLDER)?;
    em.ret()?;
    em.finish()
}

/// Points a binder body at site `index`.
pub fn retarget(body: &mut CodeBody, index: u32) {
    for instr in &mut body.instrs {
        match instr {
            Instr::CreateCallSite(site) | Instr::StCallSite(site) if *site == PLACEHOLDER => *site = index,
            _ => {}
        }
    }
}

// ── Emission ────────────────────────────────────────────────────────

/// Accumulates delegate parameters while the call's operands are emitted.
#[derive(Debug, Default)]
struct Descriptor {
    params: Vec<DelegateParam>,
}

impl Descriptor {
    fn push(&mut self, carrier: CarrierType, role: ParamRole, by_ref: bool) {
        self.params.push(DelegateParam { carrier, role, by_ref });
    }
}

/// Carrier an argument travels in: values stay narrow, buffers and
/// array-likes are boxed.
fn arg_carrier(em: &mut Emitter, t: CarrierType) -> Result<CarrierType, LowerError> {
    let t = convert::normalize_operand(em, t)?;
    match t {
        C::Bool | C::Int | C::Float | C::Number | C::String | C::Array | C::Object | C::DynamicValue => Ok(t),
        C::MutableString => em.call(RuntimeFn::MutableStringToString),
        other => convert::to_value(em, other),
    }
}

/// Emits a name part: static names go to the binder, computed names are
/// passed as a name parameter.
fn emit_name(l: &mut Lowerer<'_>, name: &Name, desc: &mut Descriptor) -> Result<Option<String>, LowerError> {
    match name {
        Name::Static(s) => Ok(Some(s.clone())),
        Name::Dynamic(e) => {
            l.emit_as(e, C::String)?;
            l.em.call(RuntimeFn::MakeNameParam)?;
            desc.push(C::NameParam, ParamRole::Name, false);
            Ok(None)
        }
    }
}

/// Pushes one argument, by address when it is a plain dynamic local.
fn emit_arg(l: &mut Lowerer<'_>, arg: &Arg, desc: &mut Descriptor) -> Result<(), LowerError> {
    if arg.unpack {
        l.emit_as(&arg.expr, C::DynamicValue)?;
        l.em.call(RuntimeFn::WrapUnpacking)?;
        desc.push(C::Unpacking, ParamRole::Unpacked, false);
        return Ok(());
    }
    if let ExprKind::Variable(name) = &arg.expr.kind {
        if let Some(idx) = l.dynamic_local(name) {
            l.em.set_span(arg.expr.span);
            let mut place = l.local_place(idx, arg.expr.access);
            if let Some(carrier) = place.load_address(l)? {
                desc.push(carrier, ParamRole::Arg, true);
                return Ok(());
            }
        }
    }
    let t = l.emit(&arg.expr)?;
    let t = arg_carrier(&mut l.em, t)?;
    desc.push(t, ParamRole::Arg, false);
    Ok(())
}

/// Lowers a call whose callee is not bound at compile time.
pub fn emit_call(
    l: &mut Lowerer<'_>,
    call: &Expr,
    target: &CallTarget,
    args: &[Arg],
    type_args: &[String],
) -> Result<CarrierType, LowerError> {
    if let CallTarget::Indirect(callee) = target {
        return emit_indirect(l, call, callee, args);
    }
    let options = l.compilation().options().clone();
    if !options.call_sites_available {
        return Err(LowerError::MissingWellKnownType {
            name: "CallSite".to_string(),
        });
    }

    let placeholder = l.em.ld_call_site_placeholder();
    let mut desc = Descriptor::default();
    let binder = match target {
        CallTarget::Function(name) => BinderSpec {
            kind: BinderKind::Function,
            name: Some(name.clone()),
            class: None,
            caller: options.class_context.clone(),
        },
        CallTarget::Method { instance, name } => {
            let t = l.emit(instance)?;
            let t = convert::normalize_operand(&mut l.em, t)?;
            let t = if t == C::Object { t } else { convert::to_value(&mut l.em, t)? };
            desc.push(t, ParamRole::Instance, false);
            let name = emit_name(l, name, &mut desc)?;
            BinderSpec {
                kind: BinderKind::InstanceFunction,
                name,
                class: None,
                caller: options.class_context.clone(),
            }
        }
        CallTarget::Static { class, name } => {
            let class = match class {
                Name::Static(c) => Some(c.clone()),
                Name::Dynamic(e) => {
                    l.emit_as(e, C::String)?;
                    l.em.call(RuntimeFn::TypeTokenFromName)?;
                    desc.push(C::TypeToken, ParamRole::TargetType, false);
                    None
                }
            };
            let name = emit_name(l, name, &mut desc)?;
            BinderSpec {
                kind: BinderKind::StaticFunction,
                name,
                class,
                caller: options.class_context.clone(),
            }
        }
        CallTarget::Indirect(_) => {
            return Err(LowerError::NotImplemented {
                what: "indirect call through a call site".to_string(),
                span: call.span,
            })
        }
    };

    l.em.ld_context();
    desc.push(C::Context, ParamRole::Context, false);
    if !type_args.is_empty() {
        l.em.ld_str(&type_args.join(","));
        l.em.call(RuntimeFn::MakeTypeArgs)?;
        desc.push(C::TypeArgs, ParamRole::TypeArgs, false);
    }
    if let Some(caller) = &options.class_context {
        l.em.ld_type_token(Some(caller));
        desc.push(C::TypeToken, ParamRole::CallerType, false);
    }
    for arg in args {
        emit_arg(l, arg, &mut desc)?;
    }

    let ret = if call.access.is_none() { C::Void } else { C::DynamicValue };
    let shape = DelegateShape {
        params: desc.params,
        ret,
    };
    let site = l.compilation().register_call_site(l.function_name(), call.id, shape.clone(), binder)?;
    l.em.patch(placeholder, Instr::LdCallSite(site));
    l.em.invoke_call_site(site, &shape)
}

/// `$f(...)`: the callable value and an argument array go to the runtime.
fn emit_indirect(l: &mut Lowerer<'_>, call: &Expr, callee: &Expr, args: &[Arg]) -> Result<CarrierType, LowerError> {
    l.em.ld_context();
    l.emit_as(callee, C::DynamicValue)?;
    l.em.new_array(args.len() as u32);
    for arg in args {
        if arg.unpack {
            return Err(LowerError::NotImplemented {
                what: "argument unpacking in an indirect call".to_string(),
                span: arg.expr.span,
            });
        }
        l.em.dup()?;
        l.emit_as(&arg.expr, C::DynamicValue)?;
        l.em.call(RuntimeFn::ArrayAdd)?;
    }
    l.em.call(RuntimeFn::InvokeCallable)?;
    if call.access.is_none() {
        l.em.pop()?;
        return Ok(C::Void);
    }
    Ok(C::DynamicValue)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binder_body_is_retargeted() {
        let spec = BinderSpec {
            kind: BinderKind::Function,
            name: Some("foo".to_string()),
            class: None,
            caller: None,
        };
        let mut body = binder_body(&spec).unwrap();
        retarget(&mut body, 7);
        assert!(body.instrs.contains(&Instr::CreateCallSite(7)));
        assert!(body.instrs.contains(&Instr::StCallSite(7)));
        assert_eq!(body.instrs.last(), Some(&Instr::Ret));
        assert_eq!(body.runtime_calls(), vec![RuntimeFn::BinderFunction]);
    }

    #[test]
    fn test_by_ref_mask() {
        let shape = DelegateShape {
            params: vec![
                DelegateParam {
                    carrier: C::Context,
                    role: ParamRole::Context,
                    by_ref: false,
                },
                DelegateParam {
                    carrier: C::ValueRef,
                    role: ParamRole::Arg,
                    by_ref: true,
                },
            ],
            ret: C::DynamicValue,
        };
        assert!(shape.has_by_ref());
        assert_eq!(shape.by_ref_mask(), Some(0b10));
        assert_eq!(shape.arity(), 3);
        assert_eq!(shape.positions(ParamRole::Arg).collect::<Vec<_>>(), vec![1]);
    }

    #[test]
    fn test_by_ref_mask_past_last_bit() {
        let param = |by_ref| DelegateParam {
            carrier: C::ValueRef,
            role: ParamRole::Arg,
            by_ref,
        };
        let mut params: Vec<DelegateParam> = (0..64).map(|_| param(false)).collect();
        params.push(param(true));
        let shape = DelegateShape {
            params,
            ret: C::DynamicValue,
        };
        assert!(shape.has_by_ref());
        assert_eq!(shape.by_ref_mask(), None);

        let mut params: Vec<DelegateParam> = (0..64).map(|_| param(false)).collect();
        params[63] = param(true);
        let shape = DelegateShape {
            params,
            ret: C::DynamicValue,
        };
        assert_eq!(shape.by_ref_mask(), Some(1 << 63));
    }
}
