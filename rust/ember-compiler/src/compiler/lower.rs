//! Lowering of bound expression trees into typed stack bytecode.
//!
//! `Lowerer::emit` is the entry point for every expression: it returns the
//! carrier actually left on the stack. Operators dispatch through
//! [`operators`](crate::compiler::operators); storage goes through
//! [`Place`]s bound with `bind_place`.

use crate::compiler::array_access::ArrayItemPlace;
use crate::compiler::ast::{
    Access, ArrayItem, BinaryOp, CastKind, Expr, ExprKind, FunctionDecl, IncDecKind, Literal, Stmt,
};
use crate::compiler::bytecode::{CompiledFunction, NativeOp, StaticArray, StaticKey, StaticValue};
use crate::compiler::callsite;
use crate::compiler::carrier::CarrierType;
use crate::compiler::compilation::Compilation;
use crate::compiler::convert;
use crate::compiler::emitter::Emitter;
use crate::compiler::operators;
use crate::compiler::place::{FieldPlace, InstanceCache, ListPlace, LocalPlace, Place};
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;
use ember_core::ArrayKey;
use std::collections::HashMap;
use tracing::debug;

type C = CarrierType;

pub struct Lowerer<'c> {
    pub(crate) em: Emitter,
    comp: &'c Compilation,
    function: String,
    locals: HashMap<String, u32>,
}

impl<'c> Lowerer<'c> {
    pub fn new(comp: &'c Compilation, f: &FunctionDecl) -> Self {
        let mut em = Emitter::new();
        let mut locals = HashMap::new();
        for decl in f.params.iter().chain(&f.locals) {
            let idx = em.declare_local(Some(&decl.name), decl.carrier);
            locals.insert(decl.name.clone(), idx);
        }
        Lowerer {
            em,
            comp,
            function: f.name.clone(),
            locals,
        }
    }

    pub fn compilation(&self) -> &'c Compilation {
        self.comp
    }

    pub fn function_name(&self) -> &str {
        &self.function
    }

    /// Lowers the whole body; falling off the end returns null.
    pub fn lower_function(mut self, f: &FunctionDecl) -> Result<CompiledFunction, LowerError> {
        debug!(function = %f.name, params = f.params.len(), statements = f.body.len(), "lowering function");
        for stmt in &f.body {
            self.stmt(stmt)?;
        }
        self.em.ld_null();
        self.em.ret()?;
        Ok(CompiledFunction {
            name: f.name.clone(),
            param_count: f.params.len(),
            body: self.em.finish()?,
        })
    }

    // ── Statements ──────────────────────────────────────────────────

    fn stmt(&mut self, stmt: &Stmt) -> Result<(), LowerError> {
        match stmt {
            Stmt::Expr(e) => {
                let t = self.emit(e)?;
                convert::convert(&mut self.em, t, C::Void)?;
            }
            Stmt::Echo(parts) => {
                for part in parts {
                    self.em.ld_context();
                    self.emit_as(part, C::String)?;
                    self.em.call(RuntimeFn::Echo)?;
                }
            }
            Stmt::Return(value) => {
                match value {
                    Some(e) => {
                        self.emit_as(e, C::DynamicValue)?;
                    }
                    None => {
                        self.em.ld_null();
                    }
                }
                self.em.ret()?;
            }
            Stmt::Unset(places) => {
                for target in places {
                    self.em.set_span(target.span);
                    let mut place = self.bind_place(target)?;
                    let mut cache = InstanceCache::disabled();
                    place.unset(self, &mut cache)?;
                    cache.release(self);
                }
            }
        }
        Ok(())
    }

    // ── Expressions ─────────────────────────────────────────────────

    /// Emits `expr` and returns the carrier left on the stack. A discarded
    /// expression leaves nothing.
    pub fn emit(&mut self, expr: &Expr) -> Result<CarrierType, LowerError> {
        self.em.set_span(expr.span);
        let t = self.emit_kind(expr)?;
        if expr.access.is_none() {
            return convert::convert(&mut self.em, t, C::Void);
        }
        match expr.access.target {
            Some(target) => convert::convert(&mut self.em, t, target),
            None => Ok(t),
        }
    }

    /// Emits `expr` converted to `target`.
    pub fn emit_as(&mut self, expr: &Expr, target: CarrierType) -> Result<CarrierType, LowerError> {
        let t = self.emit(expr)?;
        convert::convert(&mut self.em, t, target)
    }

    /// Emits an operator operand: aliases are dereferenced, and with
    /// `narrow` a dynamic value whose hint pins a type is unboxed to it.
    pub fn emit_operand(&mut self, expr: &Expr, narrow: bool) -> Result<CarrierType, LowerError> {
        let t = self.emit(expr)?;
        let t = convert::normalize_operand(&mut self.em, t)?;
        if narrow && t == C::DynamicValue {
            if let Some(hinted) = CarrierType::from_mask(expr.mask) {
                return convert::convert(&mut self.em, t, hinted);
            }
        }
        Ok(t)
    }

    fn emit_kind(&mut self, expr: &Expr) -> Result<CarrierType, LowerError> {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(self.literal(lit)),
            ExprKind::Variable(_) | ExprKind::ArrayItem { .. } | ExprKind::Field { .. } => self.read_place(expr),
            ExprKind::List(_) => Err(LowerError::InvalidAccess {
                what: "list() used as a value".to_string(),
                span: expr.span,
            }),
            ExprKind::Binary { op, left, right } => operators::emit_binary(self, *op, left, right),
            ExprKind::Unary { op, operand } => operators::unary::emit(self, *op, operand),
            ExprKind::Cast { kind, operand } => self.cast(*kind, operand),
            ExprKind::Assign { target, value } => self.assign(expr, target, value),
            ExprKind::AssignRef { target, value } => self.assign_ref(expr, target, value),
            ExprKind::CompoundAssign { op, target, value } => self.compound(expr, *op, target, value),
            ExprKind::IncDec { kind, target } => self.inc_dec(expr, *kind, target),
            ExprKind::Conditional {
                condition,
                if_true,
                if_false,
            } => self.conditional(expr, condition, if_true.as_deref(), if_false),
            ExprKind::Concat(parts) => {
                let parts: Vec<&Expr> = parts.iter().collect();
                self.emit_concat(&parts)
            }
            ExprKind::ArrayLiteral(items) => self.array_literal(expr, items),
            ExprKind::Isset(vars) => self.isset(vars),
            ExprKind::Empty(operand) => match self.emit_operand(operand, false)? {
                t @ (C::String | C::MutableString) => {
                    convert::to_string(&mut self.em, t)?;
                    self.em.call(RuntimeFn::StringIsEmpty)
                }
                t => {
                    convert::convert(&mut self.em, t, C::Bool)?;
                    self.em.native(NativeOp::Not)
                }
            },
            ExprKind::Constant { name, value, fallback } => match value {
                Some(lit) => Ok(self.literal(lit)),
                None => {
                    let slot = self.comp.const_slot(name);
                    self.em.ld_context();
                    self.em.read_constant(name, slot, fallback.as_deref())
                }
            },
            ExprKind::Call {
                target,
                args,
                type_args,
            } => callsite::emit_call(self, expr, target, args, type_args),
        }
    }

    fn literal(&mut self, lit: &Literal) -> CarrierType {
        match lit {
            Literal::Null => self.em.ld_null(),
            Literal::Bool(b) => self.em.ld_bool(*b),
            Literal::Int(n) => self.em.ld_int(*n),
            Literal::Float(f) => self.em.ld_float(*f),
            Literal::String(s) => self.em.ld_str(s),
        }
    }

    // ── Places ──────────────────────────────────────────────────────

    /// Local index for `name`. Undeclared locals become dynamic on first
    /// write, quiet read or reference; a plain read of one is an error.
    fn local_for(&mut self, name: &str, access: Access, expr: &Expr) -> Result<u32, LowerError> {
        if let Some(&idx) = self.locals.get(name) {
            return Ok(idx);
        }
        let plain_read = access.is_read()
            && !access.is_quiet()
            && !access.is_write()
            && !access.is_read_ref()
            && !access.ensure_array()
            && !access.ensure_object();
        if plain_read {
            return Err(LowerError::UnknownVariable {
                name: name.to_string(),
                span: expr.span,
            });
        }
        Ok(self.declare(name))
    }

    fn declare(&mut self, name: &str) -> u32 {
        let idx = self.em.declare_local(Some(name), C::DynamicValue);
        self.locals.insert(name.to_string(), idx);
        idx
    }

    /// Index of `name` when it is (or can become) a dynamic local.
    pub fn dynamic_local(&mut self, name: &str) -> Option<u32> {
        match self.locals.get(name) {
            Some(&idx) if self.em.local_carrier(idx) == C::DynamicValue => Some(idx),
            Some(_) => None,
            None => Some(self.declare(name)),
        }
    }

    pub fn local_place(&self, idx: u32, access: Access) -> LocalPlace {
        LocalPlace::new(idx, self.em.local_carrier(idx), access)
    }

    /// Binds a storage-denoting expression to its place.
    pub fn bind_place<'e>(&mut self, expr: &'e Expr) -> Result<Box<dyn Place + 'e>, LowerError> {
        match &expr.kind {
            ExprKind::Variable(name) => {
                let idx = self.local_for(name, expr.access, expr)?;
                Ok(Box::new(self.local_place(idx, expr.access)))
            }
            ExprKind::ArrayItem { array, index } => Ok(Box::new(ArrayItemPlace::new(
                expr.id,
                array,
                index.as_deref(),
                expr.access,
            ))),
            ExprKind::Field { instance, name } => Ok(Box::new(FieldPlace::new(expr.id, instance, name, expr.access))),
            ExprKind::List(items) => Ok(Box::new(ListPlace::new(items))),
            _ => Err(LowerError::InvalidAccess {
                what: "expression is not assignable".to_string(),
                span: expr.span,
            }),
        }
    }

    fn read_place(&mut self, expr: &Expr) -> Result<CarrierType, LowerError> {
        let mut place = self.bind_place(expr)?;
        let mut cache = InstanceCache::disabled();
        place.prepare_load(self, &mut cache)?;
        let t = place.load(self, &mut cache, expr.access)?;
        cache.release(self);
        Ok(t)
    }

    /// Duplicates the top of stack into a temporary when the result is used.
    fn save_result(&mut self, expr: &Expr) -> Result<Option<u32>, LowerError> {
        if expr.access.is_none() {
            return Ok(None);
        }
        self.em.dup()?;
        Ok(Some(self.em.spill()?))
    }

    /// Reloads a saved result; containers are copied so the stored value
    /// and the expression's value do not share storage.
    fn restore_result(&mut self, saved: Option<u32>) -> Result<CarrierType, LowerError> {
        let Some(tmp) = saved else {
            return Ok(C::Void);
        };
        match self.em.unspill(tmp) {
            C::Array => self.em.call(RuntimeFn::DeepCopyArray),
            C::DynamicValue => self.em.call(RuntimeFn::DeepCopyValue),
            C::Alias => self.em.call(RuntimeFn::AliasGet),
            other => Ok(other),
        }
    }

    // ── Assignment ──────────────────────────────────────────────────

    fn assign(&mut self, expr: &Expr, target: &Expr, value: &Expr) -> Result<CarrierType, LowerError> {
        let mut place = self.bind_place(target)?;
        let mut cache = InstanceCache::disabled();
        place.prepare_store(self, &mut cache)?;
        let mut t = self.emit(value)?;
        if t == C::Void {
            t = match place.carrier() {
                Some(c) if c != C::Alias => convert::emit_default(&mut self.em, c)?,
                _ => self.em.ld_null(),
            };
        }
        if expr.access.is_none() {
            if let Some(c) = place.carrier().filter(|c| *c != C::Alias) {
                t = convert::convert(&mut self.em, t, c)?;
            }
        }
        let saved = self.save_result(expr)?;
        place.store(self, &mut cache, t)?;
        cache.release(self);
        self.restore_result(saved)
    }

    fn assign_ref(&mut self, expr: &Expr, target: &Expr, value: &Expr) -> Result<CarrierType, LowerError> {
        let mut place = self.bind_place(target)?;
        let mut cache = InstanceCache::disabled();
        place.prepare_store(self, &mut cache)?;
        let t = self.emit(value)?;
        convert::convert(&mut self.em, t, C::Alias)?;
        let saved = self.save_result(expr)?;
        place.store(self, &mut cache, C::Alias)?;
        cache.release(self);
        self.restore_result(saved)
    }

    /// `target op= value`. The target's sub-expressions run once and are
    /// shared between the read and the write.
    fn compound(&mut self, expr: &Expr, op: BinaryOp, target: &Expr, value: &Expr) -> Result<CarrierType, LowerError> {
        let mut place = self.bind_place(target)?;
        let mut cache = InstanceCache::for_compound();
        place.prepare_store(self, &mut cache)?;
        place.prepare_load(self, &mut cache)?;
        let current = place.load(self, &mut cache, Access::read())?;
        let t = operators::apply(self, op, current, value)?;
        let saved = self.save_result(expr)?;
        place.store(self, &mut cache, t)?;
        cache.release(self);
        self.restore_result(saved)
    }

    fn inc_dec(&mut self, expr: &Expr, kind: IncDecKind, target: &Expr) -> Result<CarrierType, LowerError> {
        let mut place = self.bind_place(target)?;
        let mut cache = InstanceCache::for_compound();
        place.prepare_store(self, &mut cache)?;
        place.prepare_load(self, &mut cache)?;
        let current = place.load(self, &mut cache, Access::read())?;
        let current = convert::normalize_operand(&mut self.em, current)?;
        let old = if kind.is_postfix() { self.save_result(expr)? } else { None };
        let op = if kind.is_increment() { BinaryOp::Add } else { BinaryOp::Sub };
        let one = Expr::int(1);
        let t = operators::apply(self, op, current, &one)?;
        let new = if kind.is_postfix() { None } else { self.save_result(expr)? };
        place.store(self, &mut cache, t)?;
        cache.release(self);
        self.restore_result(old.or(new))
    }

    // ── Control flow ────────────────────────────────────────────────

    /// Carrier `e` is known to produce without emitting it.
    fn static_carrier(&self, e: &Expr) -> CarrierType {
        match &e.kind {
            ExprKind::Literal(Literal::Null) => C::DynamicValue,
            ExprKind::Literal(Literal::Bool(_)) => C::Bool,
            ExprKind::Literal(Literal::Int(_)) => C::Int,
            ExprKind::Literal(Literal::Float(_)) => C::Float,
            ExprKind::Literal(Literal::String(_)) | ExprKind::Concat(_) => C::String,
            ExprKind::Variable(name) => match self.locals.get(name) {
                Some(&idx) => match self.em.local_carrier(idx) {
                    C::Alias | C::MutableString | C::ArrayLike | C::I4 => C::DynamicValue,
                    c => c,
                },
                None => C::DynamicValue,
            },
            _ => CarrierType::from_mask(e.mask).unwrap_or(C::DynamicValue),
        }
    }

    fn conditional(
        &mut self,
        expr: &Expr,
        condition: &Expr,
        if_true: Option<&Expr>,
        if_false: &Expr,
    ) -> Result<CarrierType, LowerError> {
        let discard = expr.access.is_none();
        let else_label = self.em.define_label();
        let end = self.em.define_label();
        match if_true {
            Some(if_true) => {
                let merged = if discard {
                    C::Void
                } else {
                    CarrierType::merge(self.static_carrier(if_true), self.static_carrier(if_false))
                };
                self.emit_as(condition, C::Bool)?;
                self.em.br_false(else_label)?;
                self.emit_as(if_true, merged)?;
                self.em.br(end)?;
                self.em.mark_label(else_label)?;
                self.emit_as(if_false, merged)?;
                self.em.mark_label(end)?;
                Ok(merged)
            }
            None => {
                // `c ?: b` evaluates `c` once
                let merged = CarrierType::merge(self.static_carrier(condition), self.static_carrier(if_false));
                self.emit_as(condition, merged)?;
                let tmp = self.em.spill()?;
                self.em.ld_loc(tmp);
                convert::to_bool(&mut self.em, merged)?;
                self.em.br_false(else_label)?;
                self.em.ld_loc(tmp);
                self.em.br(end)?;
                self.em.mark_label(else_label)?;
                self.emit_as(if_false, merged)?;
                self.em.mark_label(end)?;
                self.em.return_temp(tmp);
                if discard {
                    self.em.pop()?;
                    return Ok(C::Void);
                }
                Ok(merged)
            }
        }
    }

    // ── Strings and arrays ──────────────────────────────────────────

    /// Concatenation of N parts into a mutable string.
    pub fn emit_concat(&mut self, parts: &[&Expr]) -> Result<CarrierType, LowerError> {
        let parts: Vec<&Expr> = parts
            .iter()
            .copied()
            .filter(|p| !matches!(p.as_literal(), Some(Literal::String(s)) if s.is_empty()))
            .collect();
        match parts.as_slice() {
            [] => Ok(self.em.ld_str("")),
            [single] => self.emit_as(single, C::String),
            _ => {
                self.em.call(RuntimeFn::NewMutableString)?;
                for part in parts {
                    self.emit_as(part, C::String)?;
                    self.em.call(RuntimeFn::MutableStringAppend)?;
                }
                Ok(C::MutableString)
            }
        }
    }

    fn array_literal(&mut self, expr: &Expr, items: &[ArrayItem]) -> Result<CarrierType, LowerError> {
        if items.is_empty() {
            return Ok(self.em.ld_empty_array());
        }
        if self.comp.options().cache_literal_arrays {
            if let Some(array) = static_array(items) {
                let index = self.comp.static_array(&self.function, expr.id, array);
                self.em.ld_static_array(index);
                return self.em.call(RuntimeFn::DeepCopyArray);
            }
        }
        self.em.new_array(items.len() as u32);
        for item in items {
            self.em.dup()?;
            if let Some(key) = &item.key {
                self.emit_as(key, C::DynamicValue)?;
            }
            self.emit_as(&item.value, C::DynamicValue)?;
            if matches!(
                item.value.kind,
                ExprKind::Variable(_) | ExprKind::ArrayItem { .. } | ExprKind::Field { .. }
            ) {
                self.em.call(RuntimeFn::DeepCopyValue)?;
            }
            self.em.call(if item.key.is_some() {
                RuntimeFn::ArraySet
            } else {
                RuntimeFn::ArrayAdd
            })?;
        }
        Ok(C::Array)
    }

    // ── Casts and isset ─────────────────────────────────────────────

    fn cast(&mut self, kind: CastKind, operand: &Expr) -> Result<CarrierType, LowerError> {
        match kind {
            CastKind::Bool => self.emit_as(operand, C::Bool),
            CastKind::Int => self.emit_as(operand, C::Int),
            CastKind::Float => self.emit_as(operand, C::Float),
            CastKind::String => self.emit_as(operand, C::String),
            CastKind::Array => {
                let t = self.emit_operand(operand, false)?;
                match t {
                    C::Array => Ok(t),
                    _ => {
                        convert::to_value(&mut self.em, t)?;
                        self.em.call(RuntimeFn::ValueToArray)
                    }
                }
            }
            CastKind::Object => {
                let t = self.emit_operand(operand, false)?;
                match t {
                    C::Object => Ok(t),
                    _ => {
                        convert::to_value(&mut self.em, t)?;
                        self.em.call(RuntimeFn::ValueToObject)
                    }
                }
            }
            CastKind::Unset => {
                self.emit_as(operand, C::Void)?;
                Ok(self.em.ld_null())
            }
        }
    }

    /// `isset(a, b, ...)`: true when every operand is set and not null.
    fn isset(&mut self, vars: &[Expr]) -> Result<CarrierType, LowerError> {
        match vars {
            [] => Ok(self.em.ld_bool(true)),
            [single] => self.isset_one(single),
            [init @ .., last] => {
                let fail = self.em.define_label();
                let end = self.em.define_label();
                for v in init {
                    self.isset_one(v)?;
                    self.em.br_false(fail)?;
                }
                self.isset_one(last)?;
                self.em.br(end)?;
                self.em.mark_label(fail)?;
                self.em.ld_bool(false);
                self.em.mark_label(end)?;
                Ok(C::Bool)
            }
        }
    }

    fn isset_one(&mut self, v: &Expr) -> Result<CarrierType, LowerError> {
        let t = self.emit(v)?;
        match t {
            C::DynamicValue => self.em.call(RuntimeFn::ValueIsSet),
            C::Alias => {
                self.em.call(RuntimeFn::AliasGet)?;
                self.em.call(RuntimeFn::ValueIsSet)
            }
            C::Void => Ok(self.em.ld_bool(false)),
            _ => {
                // typed carriers are never null
                self.em.pop()?;
                Ok(self.em.ld_bool(true))
            }
        }
    }
}

/// Cached form of an array literal whose keys and values are all literals.
fn static_array(items: &[ArrayItem]) -> Option<StaticArray> {
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let key = match &item.key {
            None => None,
            Some(k) => Some(match k.as_literal()? {
                Literal::Int(n) => StaticKey::Int(*n),
                Literal::Bool(b) => StaticKey::Int(i64::from(*b)),
                Literal::String(s) => match ArrayKey::from_str_key(s) {
                    ArrayKey::Int(n) => StaticKey::Int(n),
                    ArrayKey::Str(s) => StaticKey::Str(s.to_string()),
                },
                Literal::Null => StaticKey::Str(String::new()),
                Literal::Float(_) => return None,
            }),
        };
        let value = match item.value.as_literal()? {
            Literal::Null => StaticValue::Null,
            Literal::Bool(b) => StaticValue::Bool(*b),
            Literal::Int(n) => StaticValue::Int(*n),
            Literal::Float(f) => StaticValue::Float(*f),
            Literal::String(s) => StaticValue::String(s.clone()),
        };
        out.push((key, value));
    }
    Some(StaticArray { items: out })
}
