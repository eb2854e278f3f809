//! Ember Core
//!
//! Runtime value model, PHP-like conversion and comparison semantics, and the
//! process-wide registries shared by the compiler and the VM.

pub mod array;
pub mod compare;
pub mod consts;
pub mod convert;
pub mod error;
pub mod key;
pub mod number;
pub mod ops;
pub mod registry;
pub mod string;
pub mod value;

pub use array::{ArrayRef, PhpArray};
pub use error::RuntimeError;
pub use key::ArrayKey;
pub use number::Number;
pub use string::MutableString;
pub use value::{Alias, ArrayAccess, ArrayLike, ArrayObject, ObjectRef, PhpObject, Value};
