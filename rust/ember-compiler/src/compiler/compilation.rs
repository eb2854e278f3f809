//! Compilation-wide state shared by every function being lowered.
//!
//! Functions may be lowered on several threads against one `Compilation`;
//! the registries assign indices under a lock and read entries lock-free.

use crate::compiler::ast::{ExprId, FunctionDecl};
use crate::compiler::bytecode::{CompiledFunction, Module, StaticArray};
use crate::compiler::callsite::{self, BinderSpec, CallSiteDecl, DelegateFamily, DelegateRef, DelegateShape};
use crate::compiler::carrier::CarrierType;
use crate::compiler::lower::Lowerer;
use crate::{CompileError, EmitOptions, LowerError};
use ember_core::registry::KeyedRegistry;
use tracing::debug;

pub struct Compilation {
    options: EmitOptions,
    call_sites: KeyedRegistry<(String, ExprId), CallSiteDecl>,
    site_names: KeyedRegistry<String, String>,
    delegates: KeyedRegistry<DelegateShape, DelegateShape>,
    const_slots: KeyedRegistry<String, String>,
    static_arrays: KeyedRegistry<(String, ExprId), StaticArray>,
}

impl Compilation {
    pub fn new(options: EmitOptions) -> Self {
        Compilation {
            options,
            call_sites: KeyedRegistry::new(),
            site_names: KeyedRegistry::new(),
            delegates: KeyedRegistry::new(),
            const_slots: KeyedRegistry::new(),
            static_arrays: KeyedRegistry::new(),
        }
    }

    pub fn options(&self) -> &EmitOptions {
        &self.options
    }

    /// Lowers one function into a code body.
    pub fn compile_function(&self, f: &FunctionDecl) -> Result<CompiledFunction, CompileError> {
        Lowerer::new(self, f)
            .lower_function(f)
            .map_err(|error| CompileError::Lower {
                function: f.name.clone(),
                error,
            })
    }

    /// Collects the registered tables into a module.
    pub fn finish(&self, functions: Vec<CompiledFunction>) -> Module {
        Module {
            functions,
            call_sites: self.call_sites.iter().cloned().collect(),
            delegates: self.delegates.iter().cloned().collect(),
            const_slots: self.const_slots.iter().cloned().collect(),
            static_arrays: self.static_arrays.iter().cloned().collect(),
        }
    }

    pub fn call_site(&self, index: u32) -> Option<&CallSiteDecl> {
        self.call_sites.get(index as usize)
    }

    pub fn call_site_count(&self) -> usize {
        self.call_sites.len()
    }

    /// Declares the dispatch field for the call at `id` in `function`.
    /// Lowering the same call again returns the same index.
    pub fn register_call_site(
        &self,
        function: &str,
        id: ExprId,
        shape: DelegateShape,
        binder: BinderSpec,
    ) -> Result<u32, LowerError> {
        let mut init = callsite::binder_body(&binder)?;
        let delegate = self.delegate_for(&shape);
        let base = format!("call_{}", binder.name.as_deref().unwrap_or("dynamic"));
        let (index, fresh) = self.call_sites.get_or_register((function.to_string(), id), |index| {
            callsite::retarget(&mut init, index as u32);
            let slot = self.site_names.register_unique(&base, |_, name| name.to_string());
            let name = self.site_names.get(slot).cloned().unwrap_or(base);
            CallSiteDecl {
                name,
                function: function.to_string(),
                delegate,
                shape,
                binder,
                init,
            }
        });
        if fresh {
            if let Some(decl) = self.call_sites.get(index) {
                debug!(site = index, name = %decl.name, arity = decl.shape.arity(), "registered call site");
            }
        }
        Ok(index as u32)
    }

    /// Well-known delegate family for by-value shapes within the arity
    /// limit; a synthesized delegate otherwise.
    fn delegate_for(&self, shape: &DelegateShape) -> DelegateRef {
        if !shape.has_by_ref() && shape.arity() <= self.options.max_delegate_arity {
            let family = if shape.ret == CarrierType::Void {
                DelegateFamily::Action
            } else {
                DelegateFamily::Func
            };
            return DelegateRef::WellKnown {
                family,
                arity: shape.arity(),
            };
        }
        let (index, fresh) = self.delegates.get_or_register(shape.clone(), |_| shape.clone());
        if fresh {
            debug!(
                delegate = index,
                arity = shape.arity(),
                by_ref_mask = ?shape.by_ref_mask(),
                "synthesized delegate type"
            );
        }
        DelegateRef::Synthesized(index as u32)
    }

    /// Slot caching the resolved id of constant `name`.
    pub fn const_slot(&self, name: &str) -> u32 {
        self.const_slots.get_or_register(name.to_string(), |_| name.to_string()).0 as u32
    }

    /// Static slot for the constant array literal at `id`.
    pub fn static_array(&self, function: &str, id: ExprId, array: StaticArray) -> u32 {
        self.static_arrays
            .get_or_register((function.to_string(), id), |_| array)
            .0 as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::callsite::{BinderKind, DelegateParam, ParamRole};

    fn spec(name: &str) -> BinderSpec {
        BinderSpec {
            kind: BinderKind::Function,
            name: Some(name.to_string()),
            class: None,
            caller: None,
        }
    }

    fn shape(by_ref: bool) -> DelegateShape {
        DelegateShape {
            params: vec![
                DelegateParam {
                    carrier: CarrierType::Context,
                    role: ParamRole::Context,
                    by_ref: false,
                },
                DelegateParam {
                    carrier: if by_ref { CarrierType::ValueRef } else { CarrierType::DynamicValue },
                    role: ParamRole::Arg,
                    by_ref,
                },
            ],
            ret: CarrierType::DynamicValue,
        }
    }

    #[test]
    fn test_call_site_names_are_unique() {
        let comp = Compilation::new(EmitOptions::default());
        let a = comp.register_call_site("main", ExprId(1), shape(false), spec("foo")).unwrap();
        let b = comp.register_call_site("main", ExprId(2), shape(false), spec("foo")).unwrap();
        let again = comp.register_call_site("main", ExprId(1), shape(false), spec("foo")).unwrap();
        assert_eq!(a, again);
        assert_eq!(comp.call_site(a).unwrap().name, "call_foo");
        assert_eq!(comp.call_site(b).unwrap().name, "call_foo'1");
        assert_eq!(comp.call_site_count(), 2);
    }

    #[test]
    fn test_by_ref_shape_is_synthesized_once() {
        let comp = Compilation::new(EmitOptions::default());
        let a = comp.register_call_site("main", ExprId(1), shape(true), spec("f")).unwrap();
        let b = comp.register_call_site("main", ExprId(2), shape(true), spec("g")).unwrap();
        assert_eq!(comp.call_site(a).unwrap().delegate, DelegateRef::Synthesized(0));
        assert_eq!(comp.call_site(b).unwrap().delegate, DelegateRef::Synthesized(0));
        assert_eq!(comp.finish(Vec::new()).delegates.len(), 1);
    }

    #[test]
    fn test_well_known_family() {
        let comp = Compilation::new(EmitOptions::default());
        let a = comp.register_call_site("main", ExprId(1), shape(false), spec("f")).unwrap();
        assert_eq!(
            comp.call_site(a).unwrap().delegate,
            DelegateRef::WellKnown {
                family: DelegateFamily::Func,
                arity: 3
            }
        );
    }

    #[test]
    fn test_arity_over_limit_is_synthesized() {
        let options = EmitOptions {
            max_delegate_arity: 2,
            ..EmitOptions::default()
        };
        let comp = Compilation::new(options);
        let a = comp.register_call_site("main", ExprId(1), shape(false), spec("f")).unwrap();
        assert!(matches!(comp.call_site(a).unwrap().delegate, DelegateRef::Synthesized(_)));
    }

    #[test]
    fn test_const_slots_dedup() {
        let comp = Compilation::new(EmitOptions::default());
        assert_eq!(comp.const_slot("PHP_EOL"), comp.const_slot("PHP_EOL"));
        assert_ne!(comp.const_slot("PHP_EOL"), comp.const_slot("E_ALL"));
    }
}
