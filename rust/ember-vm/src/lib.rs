//! Ember VM: stack interpreter for modules produced by `ember-compiler`.
//!
//! Runs the typed bodies the compiler emits, constructs call-site binders on
//! first use and implements every runtime-support function the lowering may
//! call.

pub mod vm;

pub use vm::{HostFunction, VmError, VmOptions, VmStats, VM};
