use std::any::Any;

use bson::Bson;

use crate::{
    codec::{Codec, CodecContext, unexpected},
    error::{OdmError, OdmResult},
    value::{BoxedScalar, ScalarShape, ScalarType, short_type_name},
};

/// Stores mapped unit enums by variant name.
#[derive(Debug, Default)]
pub struct EnumCodec;

impl Codec for EnumCodec {
    fn name(&self) -> &str {
        "enum"
    }

    fn accepts(&self, scalar: &ScalarType) -> bool {
        matches!(scalar.shape(), ScalarShape::Enum(_))
    }

    fn encode(&self, value: &dyn Any, scalar: &ScalarType, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let ScalarShape::Enum(shape) = scalar.shape() else {
            return Err(OdmError::conversion(short_type_name(scalar.name()), "String", "not a mapped enum"));
        };
        (shape.variant_name)(value)
            .map(|name| Bson::String(name.to_string()))
            .ok_or_else(|| {
                OdmError::conversion(short_type_name(scalar.name()), "String", "codec received a value of another type")
            })
    }

    fn decode(&self, value: &Bson, scalar: &ScalarType, _ctx: &CodecContext<'_>) -> OdmResult<BoxedScalar> {
        let target = short_type_name(scalar.name());
        let ScalarShape::Enum(shape) = scalar.shape() else {
            return Err(unexpected(value, &target));
        };
        let name = match value {
            Bson::String(name) | Bson::Symbol(name) => name,
            other => return Err(unexpected(other, &target)),
        };
        (shape.from_variant_name)(name).ok_or_else(|| {
            OdmError::conversion(
                "String",
                target,
                format!("unknown variant '{name}', expected one of: {}", (shape.variants)().join(", ")),
            )
        })
    }
}

/// Converts scalars through their serde implementation.
#[derive(Debug, Default)]
pub struct SerdeCodec;

impl Codec for SerdeCodec {
    fn name(&self) -> &str {
        "serde"
    }

    fn accepts(&self, scalar: &ScalarType) -> bool {
        matches!(scalar.shape(), ScalarShape::Serde(_))
    }

    fn encode(&self, value: &dyn Any, scalar: &ScalarType, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        match scalar.shape() {
            ScalarShape::Serde(shape) => (shape.to_bson)(value),
            _ => Err(OdmError::conversion(short_type_name(scalar.name()), "Bson", "no serde conversion")),
        }
    }

    fn decode(&self, value: &Bson, scalar: &ScalarType, _ctx: &CodecContext<'_>) -> OdmResult<BoxedScalar> {
        match scalar.shape() {
            ScalarShape::Serde(shape) => (shape.from_bson)(value),
            _ => Err(unexpected(value, &short_type_name(scalar.name()))),
        }
    }
}
