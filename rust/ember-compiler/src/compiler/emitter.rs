//! Emission primitives over a typed evaluation stack.
//!
//! Every primitive checks the carriers it pops and records the carrier it
//! pushes, so a lowering rule that declares the wrong result type fails at
//! compile time instead of producing a corrupt body.

use crate::compiler::ast::Span;
use crate::compiler::bytecode::{CodeBody, Instr, Label, LocalSlot, NativeOp};
use crate::compiler::callsite::DelegateShape;
use crate::compiler::carrier::CarrierType;
use crate::compiler::runtime_fns::RuntimeFn;
use crate::LowerError;
use std::collections::HashMap;

pub struct Emitter {
    body: CodeBody,
    stack: Vec<CarrierType>,
    reachable: bool,
    /// Stack shape expected at each label, recorded by the first branch to it.
    label_stacks: Vec<Option<Vec<CarrierType>>>,
    temps: HashMap<CarrierType, Vec<u32>>,
    span: Span,
}

fn describe(stack: &[CarrierType]) -> String {
    stack.iter().map(|c| c.to_string()).collect::<Vec<_>>().join(", ")
}

impl Default for Emitter {
    fn default() -> Self {
        Self::new()
    }
}

impl Emitter {
    pub fn new() -> Self {
        Emitter {
            body: CodeBody::new(),
            stack: Vec::new(),
            reachable: true,
            label_stacks: Vec::new(),
            temps: HashMap::new(),
            span: Span::dummy(),
        }
    }

    /// Span attached to errors raised from here on.
    pub fn set_span(&mut self, span: Span) {
        self.span = span;
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn stack(&self) -> &[CarrierType] {
        &self.stack
    }

    pub fn top(&self) -> Option<CarrierType> {
        self.stack.last().copied()
    }

    pub fn position(&self) -> usize {
        self.body.instrs.len()
    }

    pub fn intern(&mut self, s: &str) -> u32 {
        self.body.intern(s)
    }

    // ── Stack bookkeeping ───────────────────────────────────────────

    fn mismatch(&self, expected: &[CarrierType]) -> LowerError {
        LowerError::StackMismatch {
            expected: describe(expected),
            found: describe(&self.stack),
            span: self.span,
        }
    }

    fn push(&mut self, carrier: CarrierType) {
        if carrier != CarrierType::Void {
            self.stack.push(carrier);
        }
    }

    fn pop_any(&mut self) -> Result<CarrierType, LowerError> {
        match self.stack.pop() {
            Some(c) => Ok(c),
            None => Err(self.mismatch(&[])),
        }
    }

    /// Pops `expected` (last element on top), allowing subtypes.
    fn pop_expect(&mut self, expected: &[CarrierType]) -> Result<(), LowerError> {
        let n = expected.len();
        if self.stack.len() < n {
            return Err(self.mismatch(expected));
        }
        let actual = &self.stack[self.stack.len() - n..];
        if actual.iter().zip(expected).any(|(a, e)| !a.is_subtype_of(*e)) {
            return Err(self.mismatch(expected));
        }
        self.stack.truncate(self.stack.len() - n);
        Ok(())
    }

    fn emit(&mut self, instr: Instr) {
        self.body.instrs.push(instr);
    }

    /// Replaces a previously emitted placeholder.
    pub fn patch(&mut self, pos: usize, instr: Instr) {
        if let Some(slot) = self.body.instrs.get_mut(pos) {
            *slot = instr;
        }
    }

    // ── Constants ───────────────────────────────────────────────────

    pub fn ld_null(&mut self) -> CarrierType {
        self.emit(Instr::LdNull);
        self.push(CarrierType::DynamicValue);
        CarrierType::DynamicValue
    }

    pub fn ld_bool(&mut self, b: bool) -> CarrierType {
        self.emit(Instr::LdBool(b));
        self.push(CarrierType::Bool);
        CarrierType::Bool
    }

    pub fn ld_i4(&mut self, n: i32) -> CarrierType {
        self.emit(Instr::LdI4(n));
        self.push(CarrierType::I4);
        CarrierType::I4
    }

    pub fn ld_int(&mut self, n: i64) -> CarrierType {
        self.emit(Instr::LdInt(n));
        self.push(CarrierType::Int);
        CarrierType::Int
    }

    pub fn ld_float(&mut self, f: f64) -> CarrierType {
        self.emit(Instr::LdFloat(f));
        self.push(CarrierType::Float);
        CarrierType::Float
    }

    pub fn ld_str(&mut self, s: &str) -> CarrierType {
        let id = self.intern(s);
        self.emit(Instr::LdStr(id));
        self.push(CarrierType::String);
        CarrierType::String
    }

    pub fn ld_int_key(&mut self, n: i64) -> CarrierType {
        self.emit(Instr::LdIntKey(n));
        self.push(CarrierType::Key);
        CarrierType::Key
    }

    pub fn ld_str_key(&mut self, s: &str) -> CarrierType {
        let id = self.intern(s);
        self.emit(Instr::LdStrKey(id));
        self.push(CarrierType::Key);
        CarrierType::Key
    }

    pub fn ld_context(&mut self) -> CarrierType {
        self.emit(Instr::LdContext);
        self.push(CarrierType::Context);
        CarrierType::Context
    }

    pub fn ld_type_token(&mut self, class: Option<&str>) -> CarrierType {
        let id = class.map(|c| self.intern(c));
        self.emit(Instr::LdTypeToken(id));
        self.push(CarrierType::TypeToken);
        CarrierType::TypeToken
    }

    pub fn ld_empty_array(&mut self) -> CarrierType {
        self.emit(Instr::LdEmptyArray);
        self.push(CarrierType::Array);
        CarrierType::Array
    }

    pub fn new_array(&mut self, capacity: u32) -> CarrierType {
        self.emit(Instr::NewArray(capacity));
        self.push(CarrierType::Array);
        CarrierType::Array
    }

    pub fn ld_static_array(&mut self, index: u32) -> CarrierType {
        self.emit(Instr::LdStaticArray(index));
        self.push(CarrierType::Array);
        CarrierType::Array
    }

    // ── Stack and locals ────────────────────────────────────────────

    pub fn pop(&mut self) -> Result<(), LowerError> {
        self.pop_any()?;
        self.emit(Instr::Pop);
        Ok(())
    }

    pub fn dup(&mut self) -> Result<CarrierType, LowerError> {
        let top = self.top().ok_or_else(|| self.mismatch(&[]))?;
        self.emit(Instr::Dup);
        self.push(top);
        Ok(top)
    }

    pub fn declare_local(&mut self, name: Option<&str>, carrier: CarrierType) -> u32 {
        let idx = self.body.locals.len() as u32;
        self.body.locals.push(LocalSlot {
            name: name.map(|n| n.to_string()),
            carrier,
        });
        idx
    }

    pub fn local_carrier(&self, idx: u32) -> CarrierType {
        self.body
            .locals
            .get(idx as usize)
            .map(|l| l.carrier)
            .unwrap_or(CarrierType::Void)
    }

    pub fn ld_loc(&mut self, idx: u32) -> CarrierType {
        let carrier = self.local_carrier(idx);
        self.emit(Instr::LdLoc(idx));
        self.push(carrier);
        carrier
    }

    /// Stores the top of stack. A dynamic local also accepts an alias,
    /// which rebinds it as a reference.
    pub fn st_loc(&mut self, idx: u32) -> Result<(), LowerError> {
        let carrier = self.local_carrier(idx);
        if carrier == CarrierType::DynamicValue && self.top() == Some(CarrierType::Alias) {
            self.pop_expect(&[CarrierType::Alias])?;
        } else {
            self.pop_expect(&[carrier])?;
        }
        self.emit(Instr::StLoc(idx));
        Ok(())
    }

    pub fn ld_loc_addr(&mut self, idx: u32) -> CarrierType {
        self.emit(Instr::LdLocAddr(idx));
        self.push(CarrierType::ValueRef);
        CarrierType::ValueRef
    }

    pub fn unset_loc(&mut self, idx: u32) {
        self.emit(Instr::UnsetLoc(idx));
    }

    /// Takes a temporary of `carrier` from the pool.
    pub fn get_temp(&mut self, carrier: CarrierType) -> u32 {
        if let Some(idx) = self.temps.get_mut(&carrier).and_then(|pool| pool.pop()) {
            return idx;
        }
        self.declare_local(None, carrier)
    }

    pub fn return_temp(&mut self, idx: u32) {
        let carrier = self.local_carrier(idx);
        self.temps.entry(carrier).or_default().push(idx);
    }

    /// Moves the top of stack into a fresh temporary.
    pub fn spill(&mut self) -> Result<u32, LowerError> {
        let top = self.top().ok_or_else(|| self.mismatch(&[]))?;
        let tmp = self.get_temp(top);
        self.st_loc(tmp)?;
        Ok(tmp)
    }

    /// Reloads a spilled temporary and returns it to the pool.
    pub fn unspill(&mut self, tmp: u32) -> CarrierType {
        let carrier = self.ld_loc(tmp);
        self.return_temp(tmp);
        carrier
    }

    // ── Control flow ────────────────────────────────────────────────

    pub fn define_label(&mut self) -> Label {
        let id = self.body.labels.len() as u32;
        self.body.labels.push(usize::MAX);
        self.label_stacks.push(None);
        Label(id)
    }

    fn record_branch(&mut self, label: Label) -> Result<(), LowerError> {
        let current = self.stack.clone();
        match self.label_stacks.get_mut(label.0 as usize) {
            Some(slot @ None) => {
                *slot = Some(current);
                Ok(())
            }
            Some(Some(expected)) if *expected == current => Ok(()),
            Some(Some(expected)) => {
                let expected = expected.clone();
                Err(self.mismatch(&expected))
            }
            None => Err(LowerError::NotImplemented {
                what: format!("branch to undefined label {}", label.0),
                span: self.span,
            }),
        }
    }

    pub fn br(&mut self, label: Label) -> Result<(), LowerError> {
        self.record_branch(label)?;
        self.emit(Instr::Br(label));
        self.reachable = false;
        Ok(())
    }

    pub fn br_true(&mut self, label: Label) -> Result<(), LowerError> {
        self.pop_expect(&[CarrierType::Bool])?;
        self.record_branch(label)?;
        self.emit(Instr::BrTrue(label));
        Ok(())
    }

    pub fn br_false(&mut self, label: Label) -> Result<(), LowerError> {
        self.pop_expect(&[CarrierType::Bool])?;
        self.record_branch(label)?;
        self.emit(Instr::BrFalse(label));
        Ok(())
    }

    /// Places `label` here. Falling through must agree with every branch.
    pub fn mark_label(&mut self, label: Label) -> Result<(), LowerError> {
        let recorded = self.label_stacks.get(label.0 as usize).cloned().flatten();
        match recorded {
            Some(expected) if self.reachable && expected != self.stack => return Err(self.mismatch(&expected)),
            Some(expected) => self.stack = expected,
            None if !self.reachable => self.stack.clear(),
            None => {}
        }
        self.reachable = true;
        let pos = self.position();
        if let Some(slot) = self.body.labels.get_mut(label.0 as usize) {
            *slot = pos;
        }
        self.emit(Instr::MarkLabel(label));
        Ok(())
    }

    pub fn ret(&mut self) -> Result<(), LowerError> {
        if !self.stack.is_empty() {
            self.pop_expect(&[CarrierType::DynamicValue])?;
        }
        self.emit(Instr::Ret);
        self.reachable = false;
        self.stack.clear();
        Ok(())
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Machine operation on same-typed operands.
    pub fn native(&mut self, op: NativeOp) -> Result<CarrierType, LowerError> {
        let result = match op {
            NativeOp::Neg => {
                let t = self.pop_any()?;
                if !matches!(t, CarrierType::Float | CarrierType::I4) {
                    self.push(t);
                    return Err(self.mismatch(&[CarrierType::Float]));
                }
                t
            }
            NativeOp::Not => {
                let t = self.pop_any()?;
                if !matches!(t, CarrierType::Bool | CarrierType::Int | CarrierType::I4) {
                    self.push(t);
                    return Err(self.mismatch(&[CarrierType::Bool]));
                }
                t
            }
            _ => {
                let b = self.pop_any()?;
                let a = self.pop_any()?;
                let numeric = matches!(a, CarrierType::Int | CarrierType::Float | CarrierType::I4);
                let ok = a == b
                    && match op {
                        NativeOp::Add | NativeOp::Sub | NativeOp::Mul => numeric,
                        NativeOp::And | NativeOp::Or | NativeOp::Xor => {
                            matches!(a, CarrierType::Int | CarrierType::I4 | CarrierType::Bool)
                        }
                        _ => numeric || a == CarrierType::Bool,
                    };
                if !ok {
                    self.push(a);
                    self.push(b);
                    return Err(self.mismatch(&[a, a]));
                }
                match op {
                    NativeOp::Ceq | NativeOp::Clt | NativeOp::Cgt | NativeOp::Cle | NativeOp::Cge => CarrierType::Bool,
                    _ => a,
                }
            }
        };
        self.emit(Instr::Native(op));
        self.push(result);
        Ok(result)
    }

    /// Int or i4 to float.
    pub fn conv_float(&mut self) -> Result<CarrierType, LowerError> {
        match self.top() {
            Some(CarrierType::Int | CarrierType::I4) => {
                self.pop_any()?;
            }
            _ => return Err(self.mismatch(&[CarrierType::Int])),
        }
        self.emit(Instr::ConvFloat);
        self.push(CarrierType::Float);
        Ok(CarrierType::Float)
    }

    /// Bool or i4 to int.
    pub fn conv_int(&mut self) -> Result<CarrierType, LowerError> {
        match self.top() {
            Some(CarrierType::Bool | CarrierType::I4) => {
                self.pop_any()?;
            }
            _ => return Err(self.mismatch(&[CarrierType::I4])),
        }
        self.emit(Instr::ConvInt);
        self.push(CarrierType::Int);
        Ok(CarrierType::Int)
    }

    /// Calls a runtime-support function, checking its declared parameters.
    pub fn call(&mut self, f: RuntimeFn) -> Result<CarrierType, LowerError> {
        let (params, ret) = f.signature();
        self.pop_expect(params)?;
        self.emit(Instr::Call(f));
        self.push(ret);
        Ok(ret)
    }

    pub fn read_constant(&mut self, name: &str, slot: u32, fallback: Option<&str>) -> Result<CarrierType, LowerError> {
        self.pop_expect(&[CarrierType::Context])?;
        let name = self.intern(name);
        let fallback = fallback.map(|f| self.intern(f));
        self.emit(Instr::ReadConstant { name, slot, fallback });
        self.push(CarrierType::DynamicValue);
        Ok(CarrierType::DynamicValue)
    }

    // ── Call sites ──────────────────────────────────────────────────

    /// Emits a call-site load whose index is patched once the site is registered.
    pub fn ld_call_site_placeholder(&mut self) -> usize {
        let pos = self.position();
        self.emit(Instr::LdCallSite(u32::MAX));
        self.push(CarrierType::CallSite);
        pos
    }

    pub fn invoke_call_site(&mut self, site: u32, shape: &DelegateShape) -> Result<CarrierType, LowerError> {
        let mut expected = vec![CarrierType::CallSite];
        expected.extend(shape.params.iter().map(|p| p.carrier));
        self.pop_expect(&expected)?;
        self.emit(Instr::InvokeCallSite(site));
        self.push(shape.ret);
        Ok(shape.ret)
    }

    pub fn create_call_site(&mut self, site: u32) -> Result<CarrierType, LowerError> {
        self.pop_expect(&[CarrierType::Binder])?;
        self.emit(Instr::CreateCallSite(site));
        self.push(CarrierType::CallSite);
        Ok(CarrierType::CallSite)
    }

    pub fn st_call_site(&mut self, site: u32) -> Result<(), LowerError> {
        self.pop_expect(&[CarrierType::CallSite])?;
        self.emit(Instr::StCallSite(site));
        Ok(())
    }

    /// Finishes the body. The stack must be empty.
    pub fn finish(self) -> Result<CodeBody, LowerError> {
        if self.reachable && !self.stack.is_empty() {
            return Err(self.mismatch(&[]));
        }
        Ok(self.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_checks_param_carriers() {
        let mut em = Emitter::new();
        em.ld_int(1);
        em.ld_int(2);
        assert_eq!(em.call(RuntimeFn::AddIntInt).unwrap(), CarrierType::Number);
        assert_eq!(em.stack(), &[CarrierType::Number]);
        em.ld_str("x");
        let err = em.call(RuntimeFn::AddIntInt).unwrap_err();
        assert!(matches!(err, LowerError::StackMismatch { .. }));
    }

    #[test]
    fn test_array_accepted_as_array_like() {
        let mut em = Emitter::new();
        em.ld_empty_array();
        em.ld_null();
        assert_eq!(em.call(RuntimeFn::ArrayLikeGet).unwrap(), CarrierType::DynamicValue);
    }

    #[test]
    fn test_branch_merge_must_agree() {
        let mut em = Emitter::new();
        let else_label = em.define_label();
        let end = em.define_label();
        em.ld_bool(true);
        em.br_false(else_label).unwrap();
        em.ld_int(1);
        em.br(end).unwrap();
        em.mark_label(else_label).unwrap();
        assert!(em.stack().is_empty());
        em.ld_str("no");
        assert!(em.mark_label(end).is_err());
    }

    #[test]
    fn test_temps_are_pooled_per_carrier() {
        let mut em = Emitter::new();
        let a = em.get_temp(CarrierType::Int);
        em.return_temp(a);
        let b = em.get_temp(CarrierType::Int);
        assert_eq!(a, b);
        let c = em.get_temp(CarrierType::Float);
        assert_ne!(b, c);
    }

    #[test]
    fn test_native_requires_same_types() {
        let mut em = Emitter::new();
        em.ld_float(1.0);
        em.ld_int(1);
        assert!(em.native(NativeOp::Add).is_err());
    }
}
