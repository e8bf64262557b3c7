//! The value model shared by the mapper, the codec registry and the query
//! engine.
//!
//! Every type that can appear as a mapped field implements [`Persistable`].
//! The trait describes the value's shape with a [`ValueDescriptor`], lends a
//! borrowed [`FieldRef`] view while encoding and rebuilds itself from an owned
//! [`FieldValue`] while decoding. Scalars are carried type-erased and handed
//! to the codec registry, which selects a codec by the scalar's [`TypeId`].

mod containers;
mod locale;
mod scalar;

use std::{
    any::{Any, TypeId},
    fmt,
};

use bson::Bson;
use serde::{Serialize, de::DeserializeOwned};

use crate::{
    entity::{AnyEntity, EntityDescriptor, ErasedShared, ReferenceToken},
    error::{OdmError, OdmResult},
};

pub use locale::{Currency, Locale};
pub use scalar::MapKey;

/// A type-erased scalar value as produced by a codec.
pub type BoxedScalar = Box<dyn Any + Send + Sync>;

/// Broad classification of scalar types used by operator validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarFamily {
    Integer,
    Float,
    Decimal,
    Bool,
    Text,
    Temporal,
    Binary,
    Identifier,
    Enum,
    /// Raw BSON values and documents: any operator and value is accepted.
    Dynamic,
    Other,
}

impl ScalarFamily {
    pub fn is_numeric(self) -> bool {
        matches!(self, Self::Integer | Self::Float | Self::Decimal)
    }
}

/// Name lookups for a mapped unit enum.
#[derive(Clone, Copy)]
pub struct EnumShape {
    pub variant_name: fn(&dyn Any) -> Option<&'static str>,
    pub from_variant_name: fn(&str) -> Option<BoxedScalar>,
    pub variants: fn() -> &'static [&'static str],
}

/// Conversions for a scalar that round-trips through serde.
#[derive(Clone, Copy)]
pub struct SerdeShape {
    pub to_bson: fn(&dyn Any) -> OdmResult<Bson>,
    pub from_bson: fn(&Bson) -> OdmResult<BoxedScalar>,
}

/// What a fallback codec can rely on when no exact codec is registered.
#[derive(Clone, Copy)]
pub enum ScalarShape {
    Opaque,
    Enum(EnumShape),
    Serde(SerdeShape),
}

impl fmt::Debug for ScalarShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opaque => f.write_str("Opaque"),
            Self::Enum(shape) => f.debug_tuple("Enum").field(&(shape.variants)()).finish(),
            Self::Serde(_) => f.write_str("Serde"),
        }
    }
}

/// Identity of a scalar value type.
#[derive(Debug, Clone, Copy)]
pub struct ScalarType {
    id: TypeId,
    name: &'static str,
    family: ScalarFamily,
    shape: ScalarShape,
}

impl ScalarType {
    pub fn of<T: Any>(family: ScalarFamily) -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
            family,
            shape: ScalarShape::Opaque,
        }
    }

    /// A unit enum stored by variant name.
    pub fn enumeration<E: MappedEnum>() -> Self {
        Self {
            shape: ScalarShape::Enum(EnumShape {
                variant_name: enum_variant_name::<E>,
                from_variant_name: enum_from_variant_name::<E>,
                variants: E::variants,
            }),
            ..Self::of::<E>(ScalarFamily::Enum)
        }
    }

    /// A scalar converted through its serde implementation.
    pub fn serde<T>(family: ScalarFamily) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            shape: ScalarShape::Serde(SerdeShape {
                to_bson: serde_to_bson::<T>,
                from_bson: serde_from_bson::<T>,
            }),
            ..Self::of::<T>(family)
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn family(&self) -> ScalarFamily {
        self.family
    }

    pub fn shape(&self) -> &ScalarShape {
        &self.shape
    }

    pub fn is<T: Any>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }
}

impl PartialEq for ScalarType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

fn enum_variant_name<E: MappedEnum>(value: &dyn Any) -> Option<&'static str> {
    value.downcast_ref::<E>().map(MappedEnum::variant_name)
}

fn enum_from_variant_name<E: MappedEnum>(name: &str) -> Option<BoxedScalar> {
    E::from_variant_name(name).map(|value| Box::new(value) as BoxedScalar)
}

fn serde_to_bson<T: Serialize + 'static>(value: &dyn Any) -> OdmResult<Bson> {
    let value = value.downcast_ref::<T>().ok_or_else(|| {
        OdmError::conversion("value", std::any::type_name::<T>(), "serde codec received a value of another type")
    })?;
    Ok(bson::ser::serialize_to_bson(value)?)
}

fn serde_from_bson<T: DeserializeOwned + Send + Sync + 'static>(value: &Bson) -> OdmResult<BoxedScalar> {
    let value: T = bson::de::deserialize_from_bson(value.clone())?;
    Ok(Box::new(value))
}

/// A unit enum persisted by variant name.
pub trait MappedEnum: Sized + Send + Sync + 'static {
    fn variant_name(&self) -> &'static str;
    fn from_variant_name(name: &str) -> Option<Self>;
    fn variants() -> &'static [&'static str];
}

/// The declared shape of a persistable value.
#[derive(Debug, Clone)]
pub enum ValueDescriptor {
    Scalar(ScalarType),
    Embedded(EntityDescriptor),
    Reference(EntityDescriptor),
    Key(EntityDescriptor),
    Collection(Box<ValueDescriptor>),
    Map(Box<ValueDescriptor>),
    Optional(Box<ValueDescriptor>),
}

impl ValueDescriptor {
    /// Strips every outer `Optional`, reporting whether one was present.
    pub fn unwrap_optional(&self) -> (&ValueDescriptor, bool) {
        let mut current = self;
        let mut optional = false;
        while let Self::Optional(inner) = current {
            current = inner;
            optional = true;
        }
        (current, optional)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Scalar(scalar) => scalar.name().to_string(),
            Self::Embedded(target) => target.name().to_string(),
            Self::Reference(target) => format!("Ref<{}>", target.name()),
            Self::Key(target) => format!("Key<{}>", target.name()),
            Self::Collection(element) => format!("[{}]", element.describe()),
            Self::Map(value) => format!("{{String: {}}}", value.describe()),
            Self::Optional(inner) => format!("Option<{}>", inner.describe()),
        }
    }
}

/// A reference as seen while encoding.
#[derive(Debug)]
pub enum ReferenceRef<'a> {
    Loaded(ErasedShared),
    Unresolved(&'a ReferenceToken),
}

/// Borrowed view of a field value, produced by [`Persistable::to_field`].
pub enum FieldRef<'a> {
    Null,
    Scalar(&'a (dyn Any + Send + Sync)),
    Embedded(&'a dyn AnyEntity),
    Reference(ReferenceRef<'a>),
    Key(&'a ReferenceToken),
    List(Vec<FieldRef<'a>>),
    Map(Vec<(String, FieldRef<'a>)>),
}

impl FieldRef<'_> {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(_) => "scalar",
            Self::Embedded(_) => "embedded",
            Self::Reference(_) => "reference",
            Self::Key(_) => "key",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }
}

impl fmt::Debug for FieldRef<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            Self::Key(token) => f.debug_tuple("Key").field(token).finish(),
            Self::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// A reference as produced while decoding.
#[derive(Debug, Clone)]
pub enum ReferenceValue {
    Loaded(ErasedShared),
    Unresolved(ReferenceToken),
}

/// Owned, decoded field value consumed by [`Persistable::from_field`].
pub enum FieldValue {
    Null,
    Scalar(BoxedScalar),
    Embedded(Box<dyn AnyEntity>),
    Reference(ReferenceValue),
    Key(ReferenceToken),
    List(Vec<FieldValue>),
    Map(Vec<(String, FieldValue)>),
}

impl FieldValue {
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Scalar(_) => "scalar",
            Self::Embedded(_) => "embedded",
            Self::Reference(_) => "reference",
            Self::Key(_) => "key",
            Self::List(_) => "list",
            Self::Map(_) => "map",
        }
    }

    fn mismatch(&self, expected: &str) -> OdmError {
        OdmError::conversion(self.kind_name(), expected, "decoded value has an unexpected shape")
    }

    pub fn into_scalar<T: Any>(self) -> OdmResult<T> {
        match self {
            Self::Scalar(value) => value.downcast::<T>().map(|value| *value).map_err(|_| {
                OdmError::conversion("scalar", std::any::type_name::<T>(), "codec produced a value of another type")
            }),
            other => Err(other.mismatch(std::any::type_name::<T>())),
        }
    }

    pub fn into_embedded<T: AnyEntity>(self) -> OdmResult<T> {
        match self {
            Self::Embedded(entity) => entity.into_any().downcast::<T>().map(|value| *value).map_err(|_| {
                OdmError::conversion("embedded", std::any::type_name::<T>(), "decoded entity has another type")
            }),
            other => Err(other.mismatch(std::any::type_name::<T>())),
        }
    }

    pub fn into_list(self) -> OdmResult<Vec<FieldValue>> {
        match self {
            Self::List(items) => Ok(items),
            other => Err(other.mismatch("list")),
        }
    }

    pub fn into_map(self) -> OdmResult<Vec<(String, FieldValue)>> {
        match self {
            Self::Map(entries) => Ok(entries),
            other => Err(other.mismatch("map")),
        }
    }

    pub fn into_reference(self) -> OdmResult<ReferenceValue> {
        match self {
            Self::Reference(reference) => Ok(reference),
            other => Err(other.mismatch("reference")),
        }
    }

    pub fn into_key(self) -> OdmResult<ReferenceToken> {
        match self {
            Self::Key(token) => Ok(token),
            other => Err(other.mismatch("key")),
        }
    }
}

impl fmt::Debug for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::List(items) => f.debug_list().entries(items).finish(),
            Self::Map(entries) => f.debug_map().entries(entries.iter().map(|(k, v)| (k, v))).finish(),
            Self::Key(token) => f.debug_tuple("Key").field(token).finish(),
            Self::Reference(reference) => f.debug_tuple("Reference").field(reference).finish(),
            other => f.write_str(other.kind_name()),
        }
    }
}

/// A type that can be stored in a mapped field.
pub trait Persistable: Sized + Send + Sync + 'static {
    fn descriptor() -> ValueDescriptor;

    fn to_field(&self) -> FieldRef<'_>;

    fn from_field(value: FieldValue) -> OdmResult<Self>;
}

/// Implements [`Persistable`] for scalar types backed by a registered codec.
///
/// ```ignore
/// persistable_scalar!(Celsius => ScalarFamily::Float);
/// ```
#[macro_export]
macro_rules! persistable_scalar {
    ($($ty:ty => $family:expr),* $(,)?) => {$(
        impl $crate::value::Persistable for $ty {
            fn descriptor() -> $crate::value::ValueDescriptor {
                $crate::value::ValueDescriptor::Scalar($crate::value::ScalarType::of::<$ty>($family))
            }

            fn to_field(&self) -> $crate::value::FieldRef<'_> {
                $crate::value::FieldRef::Scalar(self)
            }

            fn from_field(value: $crate::value::FieldValue) -> $crate::error::OdmResult<Self> {
                value.into_scalar::<$ty>()
            }
        }
    )*};
}

/// Implements [`Persistable`] for scalar types converted through serde.
#[macro_export]
macro_rules! persistable_serde {
    ($($ty:ty => $family:expr),* $(,)?) => {$(
        impl $crate::value::Persistable for $ty {
            fn descriptor() -> $crate::value::ValueDescriptor {
                $crate::value::ValueDescriptor::Scalar($crate::value::ScalarType::serde::<$ty>($family))
            }

            fn to_field(&self) -> $crate::value::FieldRef<'_> {
                $crate::value::FieldRef::Scalar(self)
            }

            fn from_field(value: $crate::value::FieldValue) -> $crate::error::OdmResult<Self> {
                value.into_scalar::<$ty>()
            }
        }
    )*};
}

/// Implements [`Persistable`] for a unit enum implementing [`MappedEnum`].
#[macro_export]
macro_rules! persistable_enum {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::value::Persistable for $ty {
            fn descriptor() -> $crate::value::ValueDescriptor {
                $crate::value::ValueDescriptor::Scalar($crate::value::ScalarType::enumeration::<$ty>())
            }

            fn to_field(&self) -> $crate::value::FieldRef<'_> {
                $crate::value::FieldRef::Scalar(self)
            }

            fn from_field(value: $crate::value::FieldValue) -> $crate::error::OdmResult<Self> {
                value.into_scalar::<$ty>()
            }
        }
    )*};
}

/// Shortens a fully qualified type name: `alloc::vec::Vec<my::Order>` becomes `Vec<Order>`.
pub(crate) fn short_type_name(full: &str) -> String {
    let mut out = String::with_capacity(full.len());
    let mut token = String::new();
    let mut chars = full.chars().peekable();
    while let Some(c) = chars.next() {
        if c == ':' && chars.peek() == Some(&':') {
            chars.next();
            token.clear();
        } else if c.is_alphanumeric() || c == '_' {
            token.push(c);
        } else {
            out.push_str(&token);
            token.clear();
            out.push(c);
        }
    }
    out.push_str(&token);
    out
}

/// BSON type name used in conversion error messages.
pub(crate) fn bson_type_name(value: &Bson) -> &'static str {
    match value {
        Bson::Double(_) => "Double",
        Bson::String(_) => "String",
        Bson::Array(_) => "Array",
        Bson::Document(_) => "Document",
        Bson::Boolean(_) => "Boolean",
        Bson::Null => "Null",
        Bson::Int32(_) => "Int32",
        Bson::Int64(_) => "Int64",
        Bson::Binary(_) => "Binary",
        Bson::ObjectId(_) => "ObjectId",
        Bson::DateTime(_) => "DateTime",
        Bson::Symbol(_) => "Symbol",
        Bson::Decimal128(_) => "Decimal128",
        Bson::RegularExpression(_) => "RegularExpression",
        Bson::Timestamp(_) => "Timestamp",
        _ => "Bson",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_type_name_strips_paths_inside_generics() {
        assert_eq!(short_type_name("alloc::string::String"), "String");
        assert_eq!(
            short_type_name("std::collections::hash::map::HashMap<alloc::string::String, my_app::Order>"),
            "HashMap<String, Order>"
        );
        assert_eq!(short_type_name("i64"), "i64");
    }

    #[test]
    fn test_unwrap_optional_reports_nullability() {
        let descriptor = <Option<Vec<i32>> as Persistable>::descriptor();
        let (inner, optional) = descriptor.unwrap_optional();

        assert!(optional);
        assert!(matches!(inner, ValueDescriptor::Collection(_)));
        assert_eq!(descriptor.describe(), "Option<[i32]>");
    }

    #[test]
    fn test_into_scalar_rejects_other_types() {
        let value = FieldValue::Scalar(Box::new(5_i32));
        assert!(value.into_scalar::<i64>().unwrap_err().is_conversion());

        let value = FieldValue::Scalar(Box::new(5_i32));
        assert_eq!(value.into_scalar::<i32>().unwrap(), 5);

        assert!(FieldValue::Null.into_scalar::<i32>().is_err());
    }
}
