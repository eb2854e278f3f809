//! Places: storage locations driven through a fixed protocol.
//!
//! Reads run `prepare_load` then `load`. Writes run `prepare_store`, the
//! value is emitted, then `store`. A read-modify-write runs `prepare_store`
//! first and then the read phases; the [`InstanceCache`] shares the
//! receiver and index between both halves so they are evaluated once.

use crate::compiler::ast::{Access, Expr, ExprId, ListItem, Name};
use crate::compiler::carrier::CarrierType;
use crate::compiler::convert;
use crate::compiler::lower::Lowerer;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;
use std::collections::HashMap;

type C = CarrierType;

pub trait Place {
    /// Carrier of the location when known statically.
    fn carrier(&self) -> Option<CarrierType>;

    fn prepare_load(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError>;

    fn load(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache, access: Access) -> Result<CarrierType, LowerError>;

    /// Pushes the location's address, or `None` when it has none.
    fn load_address(&mut self, l: &mut Lowerer<'_>) -> Result<Option<CarrierType>, LowerError>;

    fn prepare_store(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError>;

    /// Consumes the value of carrier `value` on top of the stack.
    fn store(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache, value: CarrierType) -> Result<(), LowerError>;

    fn unset(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError>;
}

// ── Instance cache ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheSlot {
    /// The receiver or array operand.
    Instance,
    /// The key or property name.
    Index,
}

/// Sub-results shared between the read and write halves of one compound
/// operation. A disabled cache emits every sub-expression each time.
#[derive(Debug, Default)]
pub struct InstanceCache {
    enabled: bool,
    entries: HashMap<(ExprId, CacheSlot), (u32, CarrierType)>,
}

impl InstanceCache {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn for_compound() -> Self {
        InstanceCache {
            enabled: true,
            entries: HashMap::new(),
        }
    }

    /// Emits a sub-expression once; later requests reload it from a temporary.
    pub fn emit_cached(
        &mut self,
        l: &mut Lowerer<'_>,
        id: ExprId,
        slot: CacheSlot,
        emit: impl FnOnce(&mut Lowerer<'_>) -> Result<CarrierType, LowerError>,
    ) -> Result<CarrierType, LowerError> {
        if let Some(&(tmp, carrier)) = self.entries.get(&(id, slot)) {
            l.em.ld_loc(tmp);
            return Ok(carrier);
        }
        let carrier = emit(l)?;
        if self.enabled && carrier != C::Void {
            l.em.dup()?;
            let tmp = l.em.get_temp(carrier);
            l.em.st_loc(tmp)?;
            self.entries.insert((id, slot), (tmp, carrier));
        }
        Ok(carrier)
    }

    /// Returns every cached temporary to the pool.
    pub fn release(self, l: &mut Lowerer<'_>) {
        for (tmp, _) in self.entries.into_values() {
            l.em.return_temp(tmp);
        }
    }
}

// ── Locals ──────────────────────────────────────────────────────────

pub struct LocalPlace {
    index: u32,
    carrier: CarrierType,
    access: Access,
}

impl LocalPlace {
    pub fn new(index: u32, carrier: CarrierType, access: Access) -> Self {
        LocalPlace { index, carrier, access }
    }
}

impl Place for LocalPlace {
    fn carrier(&self) -> Option<CarrierType> {
        Some(self.carrier)
    }

    fn prepare_load(&mut self, _l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        Ok(())
    }

    fn load(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, access: Access) -> Result<CarrierType, LowerError> {
        match self.carrier {
            C::DynamicValue => {
                let ensure = if access.ensure_array() {
                    Some(RuntimeFn::EnsureArrayRef)
                } else if access.ensure_object() {
                    Some(RuntimeFn::EnsureObjectRef)
                } else if access.is_read_ref() {
                    Some(RuntimeFn::EnsureAliasRef)
                } else {
                    None
                };
                if let Some(f) = ensure {
                    l.em.ld_loc_addr(self.index);
                    return l.em.call(f);
                }
                l.em.ld_loc(self.index);
                if access.is_read_copy() {
                    return l.em.call(RuntimeFn::DeepCopyValue);
                }
                Ok(C::DynamicValue)
            }
            C::Alias => {
                l.em.ld_loc(self.index);
                if access.ensure_array() {
                    l.em.call(RuntimeFn::AliasEnsureArray)
                } else if access.ensure_object() {
                    l.em.call(RuntimeFn::AliasEnsureObject)
                } else if access.is_read_ref() {
                    Ok(C::Alias)
                } else {
                    l.em.call(RuntimeFn::AliasGet)?;
                    if access.is_read_copy() {
                        l.em.call(RuntimeFn::DeepCopyValue)?;
                    }
                    Ok(C::DynamicValue)
                }
            }
            carrier => {
                if access.is_read_ref() {
                    return Err(LowerError::InvalidAccess {
                        what: format!("reference to a local of carrier {}", carrier),
                        span: l.em.span(),
                    });
                }
                l.em.ld_loc(self.index);
                if access.ensure_array() && !carrier.is_subtype_of(C::ArrayLike) {
                    return convert::convert(&mut l.em, carrier, C::ArrayLike);
                }
                if access.ensure_object() {
                    return convert::convert(&mut l.em, carrier, C::Object);
                }
                if access.is_read_copy() {
                    match carrier {
                        C::Array => return l.em.call(RuntimeFn::DeepCopyArray),
                        C::MutableString => return l.em.call(RuntimeFn::MutableStringToString),
                        _ => {}
                    }
                }
                Ok(carrier)
            }
        }
    }

    fn load_address(&mut self, l: &mut Lowerer<'_>) -> Result<Option<CarrierType>, LowerError> {
        if self.carrier == C::DynamicValue {
            return Ok(Some(l.em.ld_loc_addr(self.index)));
        }
        Ok(None)
    }

    fn prepare_store(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        if self.carrier == C::Alias && !self.access.is_write_ref() {
            l.em.ld_loc(self.index);
        }
        Ok(())
    }

    fn store(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, value: CarrierType) -> Result<(), LowerError> {
        if self.access.is_write_ref() {
            if !matches!(self.carrier, C::DynamicValue | C::Alias) {
                return Err(LowerError::InvalidAccess {
                    what: format!("binding a reference to a local of carrier {}", self.carrier),
                    span: l.em.span(),
                });
            }
            convert::convert(&mut l.em, value, C::Alias)?;
            return l.em.st_loc(self.index);
        }
        match self.carrier {
            C::Alias => {
                convert::to_value(&mut l.em, value)?;
                l.em.call(RuntimeFn::AliasSet)?;
                Ok(())
            }
            carrier => {
                convert::convert(&mut l.em, value, carrier)?;
                l.em.st_loc(self.index)
            }
        }
    }

    fn unset(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        match self.carrier {
            C::DynamicValue | C::Alias => l.em.unset_loc(self.index),
            carrier => {
                convert::emit_default(&mut l.em, carrier)?;
                l.em.st_loc(self.index)?;
            }
        }
        Ok(())
    }
}

// ── Object fields ───────────────────────────────────────────────────

pub struct FieldPlace<'e> {
    id: ExprId,
    instance: &'e Expr,
    name: &'e Name,
    access: Access,
    receiver: Option<CarrierType>,
}

impl<'e> FieldPlace<'e> {
    pub fn new(id: ExprId, instance: &'e Expr, name: &'e Name, access: Access) -> Self {
        FieldPlace {
            id,
            instance,
            name,
            access,
            receiver: None,
        }
    }

    fn mutating(&self) -> bool {
        let a = self.access;
        a.is_write() || a.is_write_ref() || a.is_read_ref() || a.ensure_array() || a.ensure_object()
    }

    fn prepare(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        let instance = self.instance;
        let mutating = self.mutating();
        let receiver = cache.emit_cached(l, self.id, CacheSlot::Instance, |l| {
            let t = l.emit(instance)?;
            match (t, mutating) {
                (C::Object, _) | (C::DynamicValue, false) => Ok(t),
                (C::Alias, true) => l.em.call(RuntimeFn::AliasEnsureObject),
                (_, true) => convert::convert(&mut l.em, t, C::Object),
                (_, false) => convert::to_value(&mut l.em, t),
            }
        })?;
        self.receiver = Some(receiver);
        let name = self.name;
        cache.emit_cached(l, self.id, CacheSlot::Index, |l| match name {
            Name::Static(s) => Ok(l.em.ld_str(s)),
            Name::Dynamic(e) => l.emit_as(e, C::String),
        })?;
        Ok(())
    }

    fn invalid(&self, l: &Lowerer<'_>, what: &str) -> LowerError {
        LowerError::InvalidAccess {
            what: format!("{} on a property of carrier {}", what, self.receiver.unwrap_or(C::Void)),
            span: l.em.span(),
        }
    }
}

impl Place for FieldPlace<'_> {
    fn carrier(&self) -> Option<CarrierType> {
        None
    }

    fn prepare_load(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        self.prepare(l, cache)
    }

    fn load(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, access: Access) -> Result<CarrierType, LowerError> {
        let f = match self.receiver {
            Some(C::Object) => {
                if access.ensure_array() {
                    RuntimeFn::ObjectEnsurePropertyArray
                } else if access.ensure_object() {
                    RuntimeFn::ObjectEnsurePropertyObject
                } else if access.is_read_ref() {
                    RuntimeFn::ObjectEnsurePropertyAlias
                } else if access.is_quiet() {
                    RuntimeFn::ObjectTryGetProperty
                } else {
                    RuntimeFn::ObjectGetProperty
                }
            }
            Some(C::DynamicValue) if !(access.ensure_array() || access.ensure_object() || access.is_read_ref()) => {
                if access.is_quiet() {
                    RuntimeFn::ValueTryGetProperty
                } else {
                    RuntimeFn::ValueGetProperty
                }
            }
            _ => return Err(self.invalid(l, "load")),
        };
        let t = l.em.call(f)?;
        if t == C::DynamicValue && access.is_read_copy() {
            return l.em.call(RuntimeFn::DeepCopyValue);
        }
        Ok(t)
    }

    fn load_address(&mut self, _l: &mut Lowerer<'_>) -> Result<Option<CarrierType>, LowerError> {
        Ok(None)
    }

    fn prepare_store(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        self.prepare(l, cache)
    }

    fn store(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, value: CarrierType) -> Result<(), LowerError> {
        if self.receiver != Some(C::Object) {
            return Err(self.invalid(l, "store"));
        }
        if self.access.is_write_ref() {
            convert::convert(&mut l.em, value, C::Alias)?;
            l.em.call(RuntimeFn::ObjectSetPropertyAlias)?;
        } else {
            convert::to_value(&mut l.em, value)?;
            l.em.call(RuntimeFn::ObjectSetProperty)?;
        }
        Ok(())
    }

    fn unset(&mut self, l: &mut Lowerer<'_>, cache: &mut InstanceCache) -> Result<(), LowerError> {
        self.prepare(l, cache)?;
        match self.receiver {
            Some(C::Object) => l.em.call(RuntimeFn::ObjectUnsetProperty)?,
            Some(C::DynamicValue) => l.em.call(RuntimeFn::ValueUnsetProperty)?,
            _ => return Err(self.invalid(l, "unset")),
        };
        Ok(())
    }
}

// ── List destructuring ──────────────────────────────────────────────

/// `list(...) = value`; only the store phase exists.
pub struct ListPlace<'e> {
    items: &'e [Option<ListItem>],
}

impl<'e> ListPlace<'e> {
    pub fn new(items: &'e [Option<ListItem>]) -> Self {
        ListPlace { items }
    }

    fn invalid(l: &Lowerer<'_>, what: &str) -> LowerError {
        LowerError::InvalidAccess {
            what: format!("{} on a list() target", what),
            span: l.em.span(),
        }
    }
}

impl Place for ListPlace<'_> {
    fn carrier(&self) -> Option<CarrierType> {
        None
    }

    fn prepare_load(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        Err(Self::invalid(l, "load"))
    }

    fn load(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, _access: Access) -> Result<CarrierType, LowerError> {
        Err(Self::invalid(l, "load"))
    }

    fn load_address(&mut self, _l: &mut Lowerer<'_>) -> Result<Option<CarrierType>, LowerError> {
        Ok(None)
    }

    fn prepare_store(&mut self, _l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        Ok(())
    }

    fn store(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache, value: CarrierType) -> Result<(), LowerError> {
        let value = convert::normalize_operand(&mut l.em, value)?;
        if !value.is_subtype_of(C::ArrayLike) {
            convert::to_value(&mut l.em, value)?;
            l.em.call(RuntimeFn::ValueAsArrayLikeQuiet)?;
        }
        let source = l.em.spill()?;
        for (pos, item) in self.items.iter().enumerate() {
            let Some(item) = item else {
                continue;
            };
            let mut target = l.bind_place(&item.target)?;
            let mut inner = InstanceCache::disabled();
            target.prepare_store(l, &mut inner)?;
            l.em.ld_loc(source);
            match &item.key {
                Some(key) => {
                    l.emit_as(key, C::DynamicValue)?;
                }
                None => {
                    l.em.ld_int(pos as i64);
                    l.em.call(RuntimeFn::IntToValue)?;
                }
            }
            l.em.call(RuntimeFn::ArrayLikeGet)?;
            l.em.call(RuntimeFn::DeepCopyValue)?;
            target.store(l, &mut inner, C::DynamicValue)?;
            inner.release(l);
        }
        l.em.return_temp(source);
        Ok(())
    }

    fn unset(&mut self, l: &mut Lowerer<'_>, _cache: &mut InstanceCache) -> Result<(), LowerError> {
        Err(Self::invalid(l, "unset"))
    }
}
