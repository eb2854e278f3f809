//! `$a[key]` and `$a[]` as a place.
//!
//! The array operand is normalized by intent before the key is emitted:
//! writes need something that can be mutated in place (an array, an
//! array-like or an object), reads accept any dynamic value. Constant keys
//! are pre-encoded as `Key` when the operand is statically an array.

use crate::compiler::ast::{Access, Expr, ExprId, Literal};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::place::{CacheSlot, InstanceCache, Place};
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;
use ember_core::ArrayKey;

type C = CarrierType;

pub struct ArrayItemPlace<'e> {
    id: ExprId,
    array: &'e Expr,
    index: Option<&'e Expr>,
    access: Access,
    target: Option<CarrierType>,
    key: Option<CarrierType>,
}

impl<'e> ArrayItemPlace<'e> {
    pub fn new(id: ExprId, array: &'e Expr, index: Option<&'e Expr>, access: Access) -> Self {
        ArrayItemPlace {
            id,
            array,
            index,
            access,
            target: None,
            key: None,
        }
    }

    fn mutating(&self) -> bool {
        let a = self.access;
        a.is_write() || a.is_write_ref() || a.is_read_ref() || a.ensure_array() || a.ensure_object()
    }

    fn prepare(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        let array = self.array;
        let mutating = self.mutating();
        let quiet = self.access.is_quiet() || self.access.is_unset();
        let target = cache.emit_cached(l, self.id, CacheSlot::Instance, |l| {
            let t = l.emit(array)?;
            normalize_array(l, t, mutating, quiet)
        })?;
        self.target = Some(target);
        if let Some(index) = self.index {
            let key = cache.emit_cached(l, self.id, CacheSlot::Index, |l| emit_key(l, index, target))?;
            self.key = Some(key);
        }
        Ok(())
    }

    fn invalid(&self, l: &Lowerer<'_>, what: &str) -> LowerError {
        LowerError::InvalidAccess {
            what: format!("{} on an element of carrier {}", what, self.target.unwrap_or(C::Void)),
            span: l.em.span(),
        }
    }

    fn keyed(&self, by_key: RuntimeFn, by_value: RuntimeFn) -> RuntimeFn {
        if self.key == Some(C::Key) {
            by_key
        } else {
            by_value
        }
    }
}

/// Brings the array operand into a carrier the element operations accept.
fn normalize_array(l: &mut Lowerer<'_>, t: CarrierType, mutating: bool, quiet: bool) -> Result<CarrierType, LowerError> {
    match t {
        C::Array | C::ArrayLike | C::Object | C::MutableString => Ok(t),
        C::Alias if mutating => l.em.call(RuntimeFn::AliasEnsureArray),
        C::Alias => l.em.call(RuntimeFn::AliasGet),
        C::String if mutating => l.em.call(RuntimeFn::StringToMutableString),
        C::String => Ok(t),
        C::DynamicValue if mutating => l.em.call(RuntimeFn::ValueAsArrayLike),
        C::DynamicValue => Ok(t),
        C::Bool | C::Int | C::Float | C::Number | C::I4 | C::Void if quiet && !mutating => Err(LowerError::NoRule {
            op: "[]".to_string(),
            left: t,
            right: C::DynamicValue,
            span: l.em.span(),
        }),
        C::Bool | C::Int | C::Float | C::Number | C::I4 | C::Void => {
            let boxed = convert::to_value(&mut l.em, t)?;
            normalize_array(l, boxed, mutating, quiet)
        }
        other => Err(LowerError::NoRule {
            op: "[]".to_string(),
            left: other,
            right: C::DynamicValue,
            span: l.em.span(),
        }),
    }
}

/// Emits the key. Literal keys on a statically known array become `Key`.
fn emit_key(l: &mut Lowerer<'_>, index: &Expr, target: CarrierType) -> Result<CarrierType, LowerError> {
    if target == C::Array {
        let key = match index.as_literal() {
            Some(Literal::Int(n)) => Some(ArrayKey::Int(*n)),
            Some(Literal::Bool(b)) => Some(ArrayKey::Int(i64::from(*b))),
            Some(Literal::String(s)) => Some(ArrayKey::from_str_key(s)),
            Some(Literal::Null) => Some(ArrayKey::from_str_key("")),
            _ => None,
        };
        match key {
            Some(ArrayKey::Int(n)) => return Ok(l.em.ld_int_key(n)),
            Some(ArrayKey::Str(s)) => return Ok(l.em.ld_str_key(&s)),
            None => {}
        }
    }
    l.emit_as(index, C::DynamicValue)
}

impl Place for ArrayItemPlace<'_> {
    fn carrier(&self) -> Option<CarrierType> {
        None
    }

    fn prepare_load(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        self.prepare(l, cache)
    }

    fn load(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, access: Access) -> Result<CarrierType, LowerError> {
        if self.key.is_none() {
            return Err(self.invalid(l, "reading with []"));
        }
        let ensure = access.ensure_array() || access.ensure_object() || access.is_read_ref();
        let quiet = access.is_quiet();
        let result = match self.target {
            Some(C::Array) => {
                let f = if access.ensure_array() {
                    self.keyed(RuntimeFn::ArrayEnsureItemArrayKey, RuntimeFn::ArrayEnsureItemArray)
                } else if access.ensure_object() {
                    self.keyed(RuntimeFn::ArrayEnsureItemObjectKey, RuntimeFn::ArrayEnsureItemObject)
                } else if access.is_read_ref() {
                    self.keyed(RuntimeFn::ArrayEnsureItemAliasKey, RuntimeFn::ArrayEnsureItemAlias)
                } else if quiet {
                    self.keyed(RuntimeFn::ArrayTryGetKey, RuntimeFn::ArrayTryGet)
                } else {
                    self.keyed(RuntimeFn::ArrayGetKey, RuntimeFn::ArrayGet)
                };
                l.em.call(f)?
            }
            Some(C::ArrayLike | C::MutableString) => {
                let f = if access.ensure_array() {
                    RuntimeFn::ArrayLikeEnsureItemArray
                } else if access.ensure_object() {
                    RuntimeFn::ArrayLikeEnsureItemObject
                } else if access.is_read_ref() {
                    RuntimeFn::ArrayLikeEnsureItemAlias
                } else if quiet {
                    RuntimeFn::ArrayLikeTryGet
                } else {
                    RuntimeFn::ArrayLikeGet
                };
                l.em.call(f)?
            }
            Some(C::String) if !ensure => l.em.call(if quiet {
                RuntimeFn::StringTryGetItem
            } else {
                RuntimeFn::StringGetItem
            })?,
            Some(C::Object) => {
                l.em.call(RuntimeFn::ObjectOffsetGet)?;
                if access.ensure_array() {
                    l.em.call(RuntimeFn::ValueAsArrayLike)?
                } else if access.ensure_object() {
                    l.em.call(RuntimeFn::ValueToObject)?
                } else if access.is_read_ref() {
                    l.em.call(RuntimeFn::ValueToAlias)?
                } else {
                    C::DynamicValue
                }
            }
            Some(C::DynamicValue) if !ensure => l.em.call(if quiet {
                RuntimeFn::ValueTryGetItem
            } else {
                RuntimeFn::ValueGetItem
            })?,
            _ => return Err(self.invalid(l, "load")),
        };
        if result == C::DynamicValue && access.is_read_copy() {
            return l.em.call(RuntimeFn::DeepCopyValue);
        }
        Ok(result)
    }

    fn load_address(&mut self, _l: &mut Lowerer<'_>) -> Result<Option<CarrierType>, LowerError> {
        Ok(None)
    }

    fn prepare_store(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        self.prepare(l, cache)
    }

    fn store(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, value: CarrierType) -> Result<(), LowerError> {
        let by_ref = self.access.is_write_ref();
        if by_ref {
            convert::convert(&mut l.em, value, C::Alias)?;
        } else {
            convert::to_value(&mut l.em, value)?;
        }
        let f = match (self.target, self.key, by_ref) {
            (Some(C::Array), Some(_), false) => self.keyed(RuntimeFn::ArraySetKey, RuntimeFn::ArraySet),
            (Some(C::Array), Some(_), true) => self.keyed(RuntimeFn::ArraySetAliasKey, RuntimeFn::ArraySetAlias),
            (Some(C::Array), None, false) => RuntimeFn::ArrayAdd,
            (Some(C::Array), None, true) => RuntimeFn::ArrayAddAlias,
            (Some(C::ArrayLike | C::MutableString), Some(_), false) => RuntimeFn::ArrayLikeSet,
            (Some(C::ArrayLike | C::MutableString), Some(_), true) => RuntimeFn::ArrayLikeSetAlias,
            (Some(C::ArrayLike | C::MutableString), None, false) => RuntimeFn::ArrayLikeAdd,
            (Some(C::ArrayLike | C::MutableString), None, true) => RuntimeFn::ArrayLikeAddAlias,
            (Some(C::Object), key, _) => {
                if by_ref {
                    l.em.call(RuntimeFn::AliasGet)?;
                }
                if key.is_none() {
                    // `$obj[] = v` passes a null offset
                    let tmp = l.em.spill()?;
                    l.em.ld_null();
                    l.em.unspill(tmp);
                }
                RuntimeFn::ObjectOffsetSet
            }
            _ => return Err(self.invalid(l, "store")),
        };
        l.em.call(f)?;
        Ok(())
    }

    fn unset(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        if self.index.is_none() {
            return Err(self.invalid(l, "unset with []"));
        }
        self.prepare(l, cache)?;
        let f = match self.target {
            Some(C::Array) => self.keyed(RuntimeFn::ArrayRemoveKey, RuntimeFn::ArrayRemove),
            Some(C::ArrayLike | C::MutableString) => RuntimeFn::ArrayLikeRemove,
            Some(C::Object) => RuntimeFn::ObjectOffsetUnset,
            Some(C::DynamicValue) => RuntimeFn::ValueRemoveItem,
            _ => return Err(self.invalid(l, "unset")),
        };
        l.em.call(f)?;
        Ok(())
    }
}
