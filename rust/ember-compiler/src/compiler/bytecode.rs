//! Bytecode data types: a typed stack instruction set, code bodies and the
//! module container produced by a compilation.

use crate::compiler::callsite::{CallSiteDecl, DelegateShape};
use crate::compiler::carrier::CarrierType;
use crate::compiler::runtime_fns::RuntimeFn;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// Branch target within one code body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Label(pub u32);

/// Machine-level operations on same-typed operands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NativeOp {
    Add,
    Sub,
    Mul,
    Neg,
    And,
    Or,
    Xor,
    /// Bitwise not on integers, logical not on bools.
    Not,
    Ceq,
    Clt,
    Cgt,
    Cle,
    Cge,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Instr {
    // Constants
    LdNull,
    /// The unset value.
    LdVoid,
    LdBool(bool),
    LdI4(i32),
    LdInt(i64),
    LdFloat(f64),
    /// String from the body's constant pool.
    LdStr(u32),
    LdIntKey(i64),
    LdStrKey(u32),
    LdContext,
    /// Optional class name from the constant pool.
    LdTypeToken(Option<u32>),
    LdEmptyArray,
    NewArray(u32),
    /// Cached literal array from the module's static array table.
    LdStaticArray(u32),

    // Stack and locals
    Pop,
    Dup,
    LdLoc(u32),
    StLoc(u32),
    LdLocAddr(u32),
    /// Resets a local to its default, breaking any reference binding.
    UnsetLoc(u32),

    // Control flow
    Br(Label),
    BrTrue(Label),
    BrFalse(Label),
    MarkLabel(Label),
    Ret,

    // Operations
    Native(NativeOp),
    /// int/i4 -> float
    ConvFloat,
    /// bool/i4 -> int
    ConvInt,
    Call(RuntimeFn),

    // Call sites
    /// Pushes the site's cached delegate, running its binder body on first use.
    LdCallSite(u32),
    InvokeCallSite(u32),
    /// Pops a binder; pushes a delegate of the site's declared shape.
    CreateCallSite(u32),
    StCallSite(u32),

    /// Pops a context; pushes the constant's value.
    ReadConstant {
        name: u32,
        slot: u32,
        fallback: Option<u32>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalSlot {
    pub name: Option<String>,
    pub carrier: CarrierType,
}

/// One lowered body: instructions plus their string pool and local table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeBody {
    pub instrs: Vec<Instr>,
    pub constants: Vec<String>,
    pub locals: Vec<LocalSlot>,
    /// Label id to instruction index.
    pub labels: Vec<usize>,
    #[serde(skip)]
    lookup: HashMap<String, u32>,
}

impl CodeBody {
    pub fn new() -> Self {
        Self::default()
    }

    /// Interns `s` in the constant pool.
    pub fn intern(&mut self, s: &str) -> u32 {
        if let Some(&id) = self.lookup.get(s) {
            return id;
        }
        let id = self.constants.len() as u32;
        self.constants.push(s.to_string());
        self.lookup.insert(s.to_string(), id);
        id
    }

    pub fn constant(&self, id: u32) -> Option<&str> {
        self.constants.get(id as usize).map(|s| s.as_str())
    }

    pub fn label_target(&self, label: Label) -> Option<usize> {
        self.labels.get(label.0 as usize).copied()
    }

    /// SHA-256 over the serialized instruction stream and constant pool.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        if let Ok(bytes) = serde_json::to_vec(&self.instrs) {
            hasher.update(bytes);
        }
        for c in &self.constants {
            hasher.update(c.as_bytes());
            hasher.update([0u8]);
        }
        format!("sha256:{:x}", hasher.finalize())
    }

    /// Runtime functions called by this body, in order.
    pub fn runtime_calls(&self) -> Vec<RuntimeFn> {
        self.instrs
            .iter()
            .filter_map(|i| match i {
                Instr::Call(f) => Some(*f),
                _ => None,
            })
            .collect()
    }
}

impl PartialEq for CodeBody {
    fn eq(&self, other: &Self) -> bool {
        self.instrs == other.instrs
            && self.constants == other.constants
            && self.locals == other.locals
            && self.labels == other.labels
    }
}

/// Literal used in a cached array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StaticKey {
    Int(i64),
    Str(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaticArray {
    pub items: Vec<(Option<StaticKey>, StaticValue)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledFunction {
    pub name: String,
    pub param_count: usize,
    pub body: CodeBody,
}

/// Everything the runtime needs to execute compiled functions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Module {
    pub functions: Vec<CompiledFunction>,
    pub call_sites: Vec<CallSiteDecl>,
    pub delegates: Vec<DelegateShape>,
    pub const_slots: Vec<String>,
    pub static_arrays: Vec<StaticArray>,
}

impl Module {
    pub fn function(&self, name: &str) -> Option<&CompiledFunction> {
        self.functions.iter().find(|f| f.name.eq_ignore_ascii_case(name))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn from_json(json: &str) -> Result<Module, serde_json::Error> {
        serde_json::from_str(json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intern() {
        let mut body = CodeBody::new();
        let id1 = body.intern("hello");
        let id2 = body.intern("world");
        let id3 = body.intern("hello");
        assert_eq!(id1, id3);
        assert_ne!(id1, id2);
        assert_eq!(body.constant(id1), Some("hello"));
    }

    #[test]
    fn test_fingerprint_tracks_instructions() {
        let mut a = CodeBody::new();
        a.instrs.push(Instr::LdInt(1));
        let mut b = a.clone();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.instrs.push(Instr::Pop);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }
}
