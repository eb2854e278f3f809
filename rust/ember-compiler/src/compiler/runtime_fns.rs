//! Runtime-support functions the lowering may call.
//!
//! Each function declares the carriers it pops (first parameter deepest) and
//! the carrier it pushes. The emitter checks every call against these.

use crate::compiler::carrier::CarrierType;
use serde::{Deserialize, Serialize};
use strum_macros::{EnumIter, IntoStaticStr};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumIter, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum RuntimeFn {
    // ── Boxing into dynamic values ──
    BoolToValue,
    IntToValue,
    FloatToValue,
    NumberToValue,
    StringToValue,
    MutableStringToValue,
    ArrayToValue,
    ArrayLikeToValue,
    ObjectToValue,
    AliasGet,
    AliasSet,
    /// Fresh alias around a temporary value.
    ValueToAlias,

    // ── Conversions ──
    IntToNumber,
    FloatToNumber,
    FloatToInt,
    ValueToBool,
    ValueToInt,
    ValueToFloat,
    ValueToNumber,
    ValueToString,
    ValueToArray,
    ValueToObject,
    /// Indexable view of a value; scalars warn and become an empty array.
    ValueAsArrayLike,
    ValueAsArrayLikeQuiet,
    NumberToBool,
    NumberToInt,
    NumberToFloat,
    NumberToString,
    StringToBool,
    StringToInt,
    StringToFloat,
    StringToNumber,
    StringToMutableString,
    MutableStringToString,
    IntToString,
    FloatToString,
    BoolToString,
    ArrayToBool,
    ArrayToString,
    DeepCopyArray,
    DeepCopyValue,
    StringIsEmpty,
    StringEqNull,
    ValueIsSet,

    // ── Arithmetic ──
    AddIntInt,
    AddIntFloat,
    AddIntNumber,
    AddIntValue,
    AddFloatNumber,
    AddFloatValue,
    AddNumberInt,
    AddNumberFloat,
    AddNumberNumber,
    AddNumberValue,
    AddValueInt,
    AddValueFloat,
    AddValueNumber,
    AddValueValue,
    AddArrayArray,
    AddArrayValue,
    SubIntInt,
    SubIntFloat,
    SubIntNumber,
    SubIntValue,
    SubFloatNumber,
    SubFloatValue,
    SubNumberInt,
    SubNumberFloat,
    SubNumberNumber,
    SubNumberValue,
    SubValueInt,
    SubValueFloat,
    SubValueNumber,
    SubValueValue,
    MulIntInt,
    MulIntFloat,
    MulIntNumber,
    MulIntValue,
    MulFloatNumber,
    MulFloatValue,
    MulNumberInt,
    MulNumberFloat,
    MulNumberNumber,
    MulNumberValue,
    MulValueInt,
    MulValueFloat,
    MulValueNumber,
    MulValueValue,
    DivNumberNumber,
    ModNumberNumber,
    PowNumberNumber,
    NegInt,
    NegNumber,

    // ── Bitwise ──
    BitAndValueValue,
    BitOrValueValue,
    BitXorValueValue,
    BitNotValue,
    ShlIntInt,
    ShrIntInt,

    // ── Comparison ──
    CompareIntInt,
    CompareIntFloat,
    CompareIntValue,
    CompareFloatFloat,
    CompareFloatValue,
    CompareBoolBool,
    CompareStringString,
    CompareStringValue,
    CompareNumberNumber,
    CompareNumberValue,
    CompareValueValue,
    EqIntFloat,
    EqIntBool,
    EqIntString,
    EqIntNumber,
    EqFloatString,
    EqStringInt,
    EqStringBool,
    EqStringFloat,
    EqNumberInt,
    EqNumberFloat,
    EqNumberNumber,
    EqNumberValue,
    EqValueString,
    EqValueValue,
    EqNull,
    StrictEqIntNumber,
    StrictEqFloatNumber,
    StrictEqNumberNumber,
    StrictEqBoolValue,
    StrictEqIntValue,
    StrictEqFloatValue,
    StrictEqValueBool,
    StrictEqStringString,
    StrictEqValueValue,
    StrictEqNull,

    // ── Strings and output ──
    NewMutableString,
    MutableStringAppend,
    Echo,

    // ── Array items ──
    ArrayGetKey,
    ArrayGet,
    ArrayTryGetKey,
    ArrayTryGet,
    StringGetItem,
    StringTryGetItem,
    ArrayLikeGet,
    ArrayLikeTryGet,
    ValueGetItem,
    ValueTryGetItem,
    ObjectOffsetGet,
    ObjectOffsetSet,
    ObjectOffsetUnset,
    ArrayEnsureItemArrayKey,
    ArrayEnsureItemArray,
    ArrayEnsureItemObjectKey,
    ArrayEnsureItemObject,
    ArrayEnsureItemAliasKey,
    ArrayEnsureItemAlias,
    ArrayLikeEnsureItemArray,
    ArrayLikeEnsureItemObject,
    ArrayLikeEnsureItemAlias,
    ArraySetKey,
    ArraySet,
    ArrayAdd,
    ArraySetAliasKey,
    ArraySetAlias,
    ArrayAddAlias,
    ArrayRemoveKey,
    ArrayRemove,
    ArrayLikeSet,
    ArrayLikeAdd,
    ArrayLikeSetAlias,
    ArrayLikeAddAlias,
    ArrayLikeRemove,
    ValueRemoveItem,

    // ── Storage by address ──
    EnsureArrayRef,
    EnsureObjectRef,
    EnsureAliasRef,
    AliasEnsureArray,
    AliasEnsureObject,

    // ── Object properties ──
    ObjectGetProperty,
    ObjectTryGetProperty,
    ValueGetProperty,
    ValueTryGetProperty,
    ObjectEnsurePropertyArray,
    ObjectEnsurePropertyObject,
    ObjectEnsurePropertyAlias,
    ObjectSetProperty,
    ObjectSetPropertyAlias,
    ObjectUnsetProperty,
    ValueUnsetProperty,

    // ── Dynamic calls ──
    BinderFunction,
    BinderInstanceFunction,
    BinderStaticFunction,
    MakeNameParam,
    TypeTokenFromName,
    MakeTypeArgs,
    WrapUnpacking,
    InvokeCallable,
}

impl RuntimeFn {
    /// Parameter carriers (first pushed first) and the result carrier.
    pub fn signature(self) -> (&'static [CarrierType], CarrierType) {
        use CarrierType as C;
        use RuntimeFn::*;
        match self {
            BoolToValue => (&[C::Bool], C::DynamicValue),
            IntToValue => (&[C::Int], C::DynamicValue),
            FloatToValue => (&[C::Float], C::DynamicValue),
            NumberToValue => (&[C::Number], C::DynamicValue),
            StringToValue => (&[C::String], C::DynamicValue),
            MutableStringToValue => (&[C::MutableString], C::DynamicValue),
            ArrayToValue => (&[C::Array], C::DynamicValue),
            ArrayLikeToValue => (&[C::ArrayLike], C::DynamicValue),
            ObjectToValue => (&[C::Object], C::DynamicValue),
            AliasGet => (&[C::Alias], C::DynamicValue),
            AliasSet => (&[C::Alias, C::DynamicValue], C::Void),
            ValueToAlias => (&[C::DynamicValue], C::Alias),

            IntToNumber => (&[C::Int], C::Number),
            FloatToNumber => (&[C::Float], C::Number),
            FloatToInt => (&[C::Float], C::Int),
            ValueToBool => (&[C::DynamicValue], C::Bool),
            ValueToInt => (&[C::DynamicValue], C::Int),
            ValueToFloat => (&[C::DynamicValue], C::Float),
            ValueToNumber => (&[C::DynamicValue], C::Number),
            ValueToString => (&[C::DynamicValue], C::String),
            ValueToArray => (&[C::DynamicValue], C::Array),
            ValueToObject => (&[C::DynamicValue], C::Object),
            ValueAsArrayLike | ValueAsArrayLikeQuiet => (&[C::DynamicValue], C::ArrayLike),
            NumberToBool => (&[C::Number], C::Bool),
            NumberToInt => (&[C::Number], C::Int),
            NumberToFloat => (&[C::Number], C::Float),
            NumberToString => (&[C::Number], C::String),
            StringToBool => (&[C::String], C::Bool),
            StringToInt => (&[C::String], C::Int),
            StringToFloat => (&[C::String], C::Float),
            StringToNumber => (&[C::String], C::Number),
            StringToMutableString => (&[C::String], C::MutableString),
            MutableStringToString => (&[C::MutableString], C::String),
            IntToString => (&[C::Int], C::String),
            FloatToString => (&[C::Float], C::String),
            BoolToString => (&[C::Bool], C::String),
            ArrayToBool => (&[C::Array], C::Bool),
            ArrayToString => (&[C::Array], C::String),
            DeepCopyArray => (&[C::Array], C::Array),
            DeepCopyValue => (&[C::DynamicValue], C::DynamicValue),
            StringIsEmpty | StringEqNull => (&[C::String], C::Bool),
            ValueIsSet => (&[C::DynamicValue], C::Bool),

            AddIntInt | SubIntInt | MulIntInt => (&[C::Int, C::Int], C::Number),
            AddIntFloat | SubIntFloat | MulIntFloat => (&[C::Int, C::Float], C::Float),
            AddIntNumber | SubIntNumber | MulIntNumber => (&[C::Int, C::Number], C::Number),
            AddIntValue | SubIntValue | MulIntValue => (&[C::Int, C::DynamicValue], C::Number),
            AddFloatNumber | SubFloatNumber | MulFloatNumber => (&[C::Float, C::Number], C::Float),
            AddFloatValue | SubFloatValue | MulFloatValue => (&[C::Float, C::DynamicValue], C::Float),
            AddNumberInt | SubNumberInt | MulNumberInt => (&[C::Number, C::Int], C::Number),
            AddNumberFloat | SubNumberFloat | MulNumberFloat => (&[C::Number, C::Float], C::Float),
            AddNumberNumber | SubNumberNumber | MulNumberNumber => (&[C::Number, C::Number], C::Number),
            AddNumberValue | SubNumberValue | MulNumberValue => (&[C::Number, C::DynamicValue], C::Number),
            AddValueInt | SubValueInt | MulValueInt => (&[C::DynamicValue, C::Int], C::Number),
            AddValueFloat | SubValueFloat | MulValueFloat => (&[C::DynamicValue, C::Float], C::Float),
            AddValueNumber | SubValueNumber | MulValueNumber => (&[C::DynamicValue, C::Number], C::Number),
            AddValueValue => (&[C::DynamicValue, C::DynamicValue], C::DynamicValue),
            SubValueValue | MulValueValue => (&[C::DynamicValue, C::DynamicValue], C::Number),
            AddArrayArray => (&[C::Array, C::Array], C::Array),
            AddArrayValue => (&[C::Array, C::DynamicValue], C::DynamicValue),
            DivNumberNumber | PowNumberNumber => (&[C::Number, C::Number], C::Number),
            ModNumberNumber => (&[C::Number, C::Number], C::Int),
            NegInt => (&[C::Int], C::Number),
            NegNumber => (&[C::Number], C::Number),

            BitAndValueValue | BitOrValueValue | BitXorValueValue => {
                (&[C::DynamicValue, C::DynamicValue], C::DynamicValue)
            }
            BitNotValue => (&[C::DynamicValue], C::DynamicValue),
            ShlIntInt | ShrIntInt => (&[C::Int, C::Int], C::Int),

            CompareIntInt => (&[C::Int, C::Int], C::I4),
            CompareIntFloat => (&[C::Int, C::Float], C::I4),
            CompareIntValue => (&[C::Int, C::DynamicValue], C::I4),
            CompareFloatFloat => (&[C::Float, C::Float], C::I4),
            CompareFloatValue => (&[C::Float, C::DynamicValue], C::I4),
            CompareBoolBool => (&[C::Bool, C::Bool], C::I4),
            CompareStringString => (&[C::String, C::String], C::I4),
            CompareStringValue => (&[C::String, C::DynamicValue], C::I4),
            CompareNumberNumber => (&[C::Number, C::Number], C::I4),
            CompareNumberValue => (&[C::Number, C::DynamicValue], C::I4),
            CompareValueValue => (&[C::DynamicValue, C::DynamicValue], C::I4),
            EqIntFloat => (&[C::Int, C::Float], C::Bool),
            EqIntBool => (&[C::Int, C::Bool], C::Bool),
            EqIntString => (&[C::Int, C::String], C::Bool),
            EqIntNumber => (&[C::Int, C::Number], C::Bool),
            EqFloatString => (&[C::Float, C::String], C::Bool),
            EqStringInt => (&[C::String, C::Int], C::Bool),
            EqStringBool => (&[C::String, C::Bool], C::Bool),
            EqStringFloat => (&[C::String, C::Float], C::Bool),
            EqNumberInt => (&[C::Number, C::Int], C::Bool),
            EqNumberFloat => (&[C::Number, C::Float], C::Bool),
            EqNumberNumber => (&[C::Number, C::Number], C::Bool),
            EqNumberValue => (&[C::Number, C::DynamicValue], C::Bool),
            EqValueString => (&[C::DynamicValue, C::String], C::Bool),
            EqValueValue => (&[C::DynamicValue, C::DynamicValue], C::Bool),
            EqNull | StrictEqNull => (&[C::DynamicValue], C::Bool),
            StrictEqIntNumber => (&[C::Int, C::Number], C::Bool),
            StrictEqFloatNumber => (&[C::Float, C::Number], C::Bool),
            StrictEqNumberNumber => (&[C::Number, C::Number], C::Bool),
            StrictEqBoolValue => (&[C::Bool, C::DynamicValue], C::Bool),
            StrictEqIntValue => (&[C::Int, C::DynamicValue], C::Bool),
            StrictEqFloatValue => (&[C::Float, C::DynamicValue], C::Bool),
            StrictEqValueBool => (&[C::DynamicValue, C::Bool], C::Bool),
            StrictEqStringString => (&[C::String, C::String], C::Bool),
            StrictEqValueValue => (&[C::DynamicValue, C::DynamicValue], C::Bool),

            NewMutableString => (&[], C::MutableString),
            MutableStringAppend => (&[C::MutableString, C::String], C::MutableString),
            Echo => (&[C::Context, C::String], C::Void),

            ArrayGetKey | ArrayTryGetKey => (&[C::Array, C::Key], C::DynamicValue),
            ArrayGet | ArrayTryGet => (&[C::Array, C::DynamicValue], C::DynamicValue),
            StringGetItem | StringTryGetItem => (&[C::String, C::DynamicValue], C::DynamicValue),
            ArrayLikeGet | ArrayLikeTryGet => (&[C::ArrayLike, C::DynamicValue], C::DynamicValue),
            ValueGetItem | ValueTryGetItem => (&[C::DynamicValue, C::DynamicValue], C::DynamicValue),
            ObjectOffsetGet => (&[C::Object, C::DynamicValue], C::DynamicValue),
            ObjectOffsetSet => (&[C::Object, C::DynamicValue, C::DynamicValue], C::Void),
            ObjectOffsetUnset => (&[C::Object, C::DynamicValue], C::Void),
            ArrayEnsureItemArrayKey => (&[C::Array, C::Key], C::ArrayLike),
            ArrayEnsureItemArray => (&[C::Array, C::DynamicValue], C::ArrayLike),
            ArrayEnsureItemObjectKey => (&[C::Array, C::Key], C::Object),
            ArrayEnsureItemObject => (&[C::Array, C::DynamicValue], C::Object),
            ArrayEnsureItemAliasKey => (&[C::Array, C::Key], C::Alias),
            ArrayEnsureItemAlias => (&[C::Array, C::DynamicValue], C::Alias),
            ArrayLikeEnsureItemArray => (&[C::ArrayLike, C::DynamicValue], C::ArrayLike),
            ArrayLikeEnsureItemObject => (&[C::ArrayLike, C::DynamicValue], C::Object),
            ArrayLikeEnsureItemAlias => (&[C::ArrayLike, C::DynamicValue], C::Alias),
            ArraySetKey => (&[C::Array, C::Key, C::DynamicValue], C::Void),
            ArraySet => (&[C::Array, C::DynamicValue, C::DynamicValue], C::Void),
            ArrayAdd => (&[C::Array, C::DynamicValue], C::Void),
            ArraySetAliasKey => (&[C::Array, C::Key, C::Alias], C::Void),
            ArraySetAlias => (&[C::Array, C::DynamicValue, C::Alias], C::Void),
            ArrayAddAlias => (&[C::Array, C::Alias], C::Void),
            ArrayRemoveKey => (&[C::Array, C::Key], C::Void),
            ArrayRemove => (&[C::Array, C::DynamicValue], C::Void),
            ArrayLikeSet => (&[C::ArrayLike, C::DynamicValue, C::DynamicValue], C::Void),
            ArrayLikeAdd => (&[C::ArrayLike, C::DynamicValue], C::Void),
            ArrayLikeSetAlias => (&[C::ArrayLike, C::DynamicValue, C::Alias], C::Void),
            ArrayLikeAddAlias => (&[C::ArrayLike, C::Alias], C::Void),
            ArrayLikeRemove => (&[C::ArrayLike, C::DynamicValue], C::Void),
            ValueRemoveItem => (&[C::DynamicValue, C::DynamicValue], C::Void),

            EnsureArrayRef => (&[C::ValueRef], C::ArrayLike),
            EnsureObjectRef => (&[C::ValueRef], C::Object),
            EnsureAliasRef => (&[C::ValueRef], C::Alias),
            AliasEnsureArray => (&[C::Alias], C::ArrayLike),
            AliasEnsureObject => (&[C::Alias], C::Object),

            ObjectGetProperty | ObjectTryGetProperty => (&[C::Object, C::String], C::DynamicValue),
            ValueGetProperty | ValueTryGetProperty => (&[C::DynamicValue, C::String], C::DynamicValue),
            ObjectEnsurePropertyArray => (&[C::Object, C::String], C::ArrayLike),
            ObjectEnsurePropertyObject => (&[C::Object, C::String], C::Object),
            ObjectEnsurePropertyAlias => (&[C::Object, C::String], C::Alias),
            ObjectSetProperty => (&[C::Object, C::String, C::DynamicValue], C::Void),
            ObjectSetPropertyAlias => (&[C::Object, C::String, C::Alias], C::Void),
            ObjectUnsetProperty => (&[C::Object, C::String], C::Void),
            ValueUnsetProperty => (&[C::DynamicValue, C::String], C::Void),

            BinderFunction | BinderInstanceFunction => (&[C::String, C::TypeToken], C::Binder),
            BinderStaticFunction => (&[C::TypeToken, C::String, C::TypeToken], C::Binder),
            MakeNameParam => (&[C::String], C::NameParam),
            TypeTokenFromName => (&[C::String], C::TypeToken),
            MakeTypeArgs => (&[C::String], C::TypeArgs),
            WrapUnpacking => (&[C::DynamicValue], C::Unpacking),
            InvokeCallable => (&[C::Context, C::DynamicValue, C::Array], C::DynamicValue),
        }
    }

    pub fn params(self) -> &'static [CarrierType] {
        self.signature().0
    }

    pub fn returns(self) -> CarrierType {
        self.signature().1
    }

    pub fn name(self) -> &'static str {
        self.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strum::IntoEnumIterator;

    #[test]
    fn test_every_signature_uses_value_or_plumbing_carriers() {
        for f in RuntimeFn::iter() {
            let (params, ret) = f.signature();
            assert!(params.iter().all(|p| *p != CarrierType::Void), "{} takes void", f.name());
            assert!(ret != CarrierType::ValueRef, "{} returns an address", f.name());
        }
    }

    #[test]
    fn test_int_add_widens_to_number() {
        assert_eq!(RuntimeFn::AddIntInt.returns(), CarrierType::Number);
        assert_eq!(RuntimeFn::AddIntInt.name(), "add_int_int");
    }
}
