//! Ember Compiler
//!
//! Lowers bound expression trees of a PHP-like language into typed stack
//! bytecode, choosing the narrowest runtime operation the static type hints
//! allow and falling back to dynamic values everywhere else.

pub mod compiler;
pub mod diagnostics;

use compiler::ast::Span;
use compiler::carrier::CarrierType;
use serde::Deserialize;
use thiserror::Error;

pub use compiler::compilation::Compilation;

// ── Emit options ────────────────────────────────────────────────────

/// Options controlling code generation.
///
/// Loaded from the `[codegen]` table of a TOML file; every field has a
/// default so an empty table is valid.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct EmitOptions {
    /// Largest arity of the well-known Func/Action delegate families. Default: `16`.
    pub max_delegate_arity: usize,
    /// Whether the target provides the call-site and delegate runtime types. Default: `true`.
    pub call_sites_available: bool,
    /// Cache constant-only array literals and deep-copy them on use. Default: `true`.
    pub cache_literal_arrays: bool,
    /// Class the compiled code belongs to, passed to binders as the caller type.
    pub class_context: Option<String>,
}

impl Default for EmitOptions {
    fn default() -> Self {
        Self {
            max_delegate_arity: 16,
            call_sites_available: true,
            cache_literal_arrays: true,
            class_context: None,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct OptionsFile {
    #[serde(default)]
    codegen: EmitOptions,
}

impl EmitOptions {
    /// Parse options from TOML text; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<EmitOptions, CompileError> {
        let file: OptionsFile = toml::from_str(text).map_err(|e| CompileError::Config(e.to_string()))?;
        Ok(file.codegen)
    }
}

// ── Errors ──────────────────────────────────────────────────────────

/// Internal compiler errors raised while lowering. None of these are
/// attributable to the user's program.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LowerError {
    #[error("no lowering rule for '{op}' on ({left}, {right})")]
    NoRule {
        op: String,
        left: CarrierType,
        right: CarrierType,
        span: Span,
    },
    #[error("not implemented: {what}")]
    NotImplemented { what: String, span: Span },
    #[error("evaluation stack mismatch: expected [{expected}], found [{found}]")]
    StackMismatch {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("required runtime type '{name}' is not available")]
    MissingWellKnownType { name: String },
    #[error("invalid access: {what}")]
    InvalidAccess { what: String, span: Span },
    #[error("variable '${name}' is read before it is declared or assigned")]
    UnknownVariable { name: String, span: Span },
}

impl LowerError {
    pub fn span(&self) -> Option<Span> {
        match self {
            LowerError::NoRule { span, .. }
            | LowerError::NotImplemented { span, .. }
            | LowerError::StackMismatch { span, .. }
            | LowerError::InvalidAccess { span, .. }
            | LowerError::UnknownVariable { span, .. } => Some(*span),
            LowerError::MissingWellKnownType { .. } => None,
        }
    }

    /// Stable diagnostic code.
    pub fn code(&self) -> &'static str {
        match self {
            LowerError::NoRule { .. } => "ICE001",
            LowerError::NotImplemented { .. } => "ICE002",
            LowerError::StackMismatch { .. } => "ICE003",
            LowerError::MissingWellKnownType { .. } => "ICE004",
            LowerError::InvalidAccess { .. } => "ICE005",
            LowerError::UnknownVariable { .. } => "ICE006",
        }
    }
}

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("lowering error in '{function}': {error}")]
    Lower { function: String, error: LowerError },
    #[error("configuration error: {0}")]
    Config(String),
    #[error("multiple errors: {0:?}")]
    Multiple(Vec<CompileError>),
}

impl CompileError {
    /// Construct a `CompileError` from a list of errors.
    /// Returns `None` if the list is empty, unwraps single-element lists,
    /// and flattens nested `Multiple` variants.
    pub fn from_multiple(errors: Vec<CompileError>) -> Option<CompileError> {
        let mut flattened: Vec<CompileError> = errors
            .into_iter()
            .flat_map(|e| match e {
                CompileError::Multiple(inner) => inner,
                other => vec![other],
            })
            .collect();
        match flattened.len() {
            0 => None,
            1 => flattened.pop(),
            _ => Some(CompileError::Multiple(flattened)),
        }
    }
}

/// Compile a set of functions into a module with default options.
pub fn compile(functions: &[compiler::ast::FunctionDecl]) -> Result<compiler::bytecode::Module, CompileError> {
    compile_with_options(functions, EmitOptions::default())
}

/// Compile a set of functions, collecting every function's error.
pub fn compile_with_options(
    functions: &[compiler::ast::FunctionDecl],
    options: EmitOptions,
) -> Result<compiler::bytecode::Module, CompileError> {
    let compilation = Compilation::new(options);
    let mut compiled = Vec::new();
    let mut errors = Vec::new();
    for f in functions {
        match compilation.compile_function(f) {
            Ok(c) => compiled.push(c),
            Err(e) => errors.push(e),
        }
    }
    if let Some(err) = CompileError::from_multiple(errors) {
        return Err(err);
    }
    Ok(compilation.finish(compiled))
}
