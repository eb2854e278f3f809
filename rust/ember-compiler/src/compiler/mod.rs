pub mod array_access;
pub mod ast;
pub mod bytecode;
pub mod callsite;
pub mod carrier;
pub mod compilation;
pub mod convert;
pub mod emitter;
pub mod lower;
pub mod operators;
pub mod place;
pub mod runtime_fns;
