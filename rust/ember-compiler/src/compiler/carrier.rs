//! The carrier-type lattice: what kind of value occupies a stack slot or a
//! storage location at compile time.

use crate::compiler::ast::TypeMask;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, IntoStaticStr};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display, EnumIter, IntoStaticStr,
)]
pub enum CarrierType {
    /// Nothing on the stack.
    Void,
    Bool,
    /// 32-bit machine integer; three-way comparison results.
    I4,
    Int,
    Float,
    /// Tagged int-or-float.
    Number,
    String,
    MutableString,
    Array,
    /// An indexable target: array, mutable string or user-indexable object.
    ArrayLike,
    /// Mutable cell wrapping a dynamic value.
    Alias,
    DynamicValue,
    Object,
    /// Integer-or-string array key encoded at compile time.
    Key,
    /// Address of a dynamic-value storage location.
    ValueRef,
    // call-site plumbing
    Context,
    TypeToken,
    TypeArgs,
    NameParam,
    Unpacking,
    CallSite,
    Binder,
}

/// The PHP-level types a carrier may hold at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhpTypeSet(u32);

impl PhpTypeSet {
    pub fn intersects(self, other: PhpTypeSet) -> bool {
        self.0 & other.0 != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl CarrierType {
    /// `self` can be used where `other` is expected without conversion.
    pub fn is_subtype_of(self, other: CarrierType) -> bool {
        self == other
            || (other == CarrierType::ArrayLike
                && matches!(self, CarrierType::Array | CarrierType::MutableString))
    }

    pub fn is_numeric(self) -> bool {
        matches!(self, CarrierType::Int | CarrierType::Float | CarrierType::Number | CarrierType::I4)
    }

    /// Carriers that hold a source-language value, as opposed to compiler plumbing.
    pub fn is_value(self) -> bool {
        matches!(
            self,
            CarrierType::Bool
                | CarrierType::I4
                | CarrierType::Int
                | CarrierType::Float
                | CarrierType::Number
                | CarrierType::String
                | CarrierType::MutableString
                | CarrierType::Array
                | CarrierType::ArrayLike
                | CarrierType::Alias
                | CarrierType::DynamicValue
                | CarrierType::Object
        )
    }

    /// Runtime types the carrier admits; empty for plumbing carriers.
    pub fn php_types(self) -> PhpTypeSet {
        let m = match self {
            CarrierType::Bool => TypeMask::BOOL,
            CarrierType::I4 | CarrierType::Int => TypeMask::INT,
            CarrierType::Float => TypeMask::FLOAT,
            CarrierType::Number => TypeMask::INT | TypeMask::FLOAT,
            CarrierType::String | CarrierType::MutableString => TypeMask::STRING,
            CarrierType::Array => TypeMask::ARRAY,
            CarrierType::ArrayLike => TypeMask::ARRAY | TypeMask::STRING | TypeMask::OBJECT,
            CarrierType::Object => TypeMask::OBJECT,
            CarrierType::Alias | CarrierType::DynamicValue => TypeMask::ANY,
            _ => TypeMask(0),
        };
        PhpTypeSet(m.0)
    }

    /// Two values of these carriers can never be identical (`===`).
    pub fn never_identical(self, other: CarrierType) -> bool {
        let (a, b) = (self.php_types(), other.php_types());
        !a.is_empty() && !b.is_empty() && !a.intersects(b)
    }

    /// The narrowest carrier for a type mask, when the mask pins one down.
    pub fn from_mask(mask: TypeMask) -> Option<CarrierType> {
        if mask.is_long_only() {
            Some(CarrierType::Int)
        } else if mask.is_double_only() {
            Some(CarrierType::Float)
        } else if mask.is_number_only() {
            Some(CarrierType::Number)
        } else if mask.is_bool_only() {
            Some(CarrierType::Bool)
        } else if mask.is_string_only() {
            Some(CarrierType::String)
        } else {
            None
        }
    }

    /// Carrier two branches merge into.
    pub fn merge(a: CarrierType, b: CarrierType) -> CarrierType {
        if a == b {
            return a;
        }
        match (a, b) {
            (CarrierType::Int, CarrierType::Float)
            | (CarrierType::Float, CarrierType::Int)
            | (CarrierType::Number, CarrierType::Int | CarrierType::Float)
            | (CarrierType::Int | CarrierType::Float, CarrierType::Number) => CarrierType::Number,
            (CarrierType::String, CarrierType::MutableString)
            | (CarrierType::MutableString, CarrierType::String) => CarrierType::String,
            _ => CarrierType::DynamicValue,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subtyping() {
        assert!(CarrierType::Array.is_subtype_of(CarrierType::ArrayLike));
        assert!(CarrierType::MutableString.is_subtype_of(CarrierType::ArrayLike));
        assert!(!CarrierType::String.is_subtype_of(CarrierType::ArrayLike));
        assert!(!CarrierType::ArrayLike.is_subtype_of(CarrierType::Array));
    }

    #[test]
    fn test_never_identical_matrix() {
        use CarrierType::*;
        assert!(Bool.never_identical(Array));
        assert!(Int.never_identical(Float));
        assert!(Int.never_identical(String));
        assert!(!Int.never_identical(Number));
        assert!(!String.never_identical(MutableString));
        assert!(!DynamicValue.never_identical(Bool));
        assert!(!Array.never_identical(ArrayLike));
        assert!(Object.never_identical(Array));
        assert!(!Context.never_identical(Bool));
    }

    #[test]
    fn test_merge() {
        assert_eq!(CarrierType::merge(CarrierType::Int, CarrierType::Float), CarrierType::Number);
        assert_eq!(CarrierType::merge(CarrierType::Array, CarrierType::Int), CarrierType::DynamicValue);
    }
}
