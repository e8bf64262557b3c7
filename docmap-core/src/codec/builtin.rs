use std::marker::PhantomData;

use bson::{Binary, Bson, Document, oid::ObjectId, spec::BinarySubtype};
use rust_decimal::{Decimal, prelude::ToPrimitive};
use uuid::Uuid;

use crate::{
    codec::{
        CodecContext, CodecRegistry, TypedCodec,
        decimal::{DecimalCodec, decimal_from_bson, decimal_to_bson},
        temporal::{NaiveDateCodec, NaiveDateTimeCodec, UtcDateTimeCodec},
        unexpected,
    },
    error::{OdmError, OdmResult},
    value::{Currency, Locale, bson_type_name, short_type_name},
};

/// Registers every built-in exact codec on `registry`.
pub fn register_builtins(registry: &CodecRegistry) {
    registry.register(IntegerCodec::<i8>::narrow());
    registry.register(IntegerCodec::<i16>::narrow());
    registry.register(IntegerCodec::<i32>::narrow());
    registry.register(IntegerCodec::<u8>::narrow());
    registry.register(IntegerCodec::<u16>::narrow());
    registry.register(IntegerCodec::<i64>::wide());
    registry.register(IntegerCodec::<isize>::wide());
    registry.register(IntegerCodec::<u32>::wide());
    registry.register(IntegerCodec::<u64>::wide());
    registry.register(IntegerCodec::<usize>::wide());
    registry.register(F64Codec);
    registry.register(F32Codec);
    registry.register(DecimalCodec);
    registry.register(BoolCodec);
    registry.register(StringCodec);
    registry.register(BinaryCodec);
    registry.register(UuidCodec);
    registry.register(ObjectIdCodec);
    registry.register(UtcDateTimeCodec);
    registry.register(NaiveDateTimeCodec);
    registry.register(NaiveDateCodec);
    registry.register(LocaleCodec);
    registry.register(CurrencyCodec);
    registry.register(BsonCodec);
    registry.register(DocumentCodec);
}

fn type_name<T>() -> String {
    short_type_name(std::any::type_name::<T>())
}

/// Reads any integral BSON number, or an integer string, as `i128`.
pub(crate) fn integer_from_bson(value: &Bson, target: &str) -> OdmResult<i128> {
    let not_integral = |message: String| OdmError::conversion(bson_type_name(value), target, message);
    match value {
        Bson::Int32(number) => Ok(i128::from(*number)),
        Bson::Int64(number) => Ok(i128::from(*number)),
        Bson::Double(number) if number.is_finite() && number.fract() == 0.0 => {
            number.to_i128().ok_or_else(|| not_integral(format!("{number} is out of range")))
        }
        Bson::Double(number) => Err(not_integral(format!("{number} is not an integer"))),
        Bson::Decimal128(_) => {
            let decimal = decimal_from_bson(value)?;
            if !decimal.fract().is_zero() {
                return Err(not_integral(format!("{decimal} is not an integer")));
            }
            decimal
                .to_i128()
                .ok_or_else(|| not_integral(format!("{decimal} is out of range")))
        }
        Bson::String(text) => text
            .trim()
            .parse::<i128>()
            .map_err(|err| not_integral(format!("'{text}': {err}"))),
        other => Err(unexpected(other, target)),
    }
}

/// Integers of any width. Narrow types are stored as Int32, wide ones as
/// Int64, and unsigned values beyond `i64::MAX` as a decimal.
struct IntegerCodec<T> {
    wide: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T> IntegerCodec<T> {
    fn narrow() -> Self {
        Self { wide: false, _marker: PhantomData }
    }

    fn wide() -> Self {
        Self { wide: true, _marker: PhantomData }
    }
}

impl<T> TypedCodec for IntegerCodec<T>
where
    T: TryFrom<i128> + TryInto<i128> + Copy + Send + Sync + 'static,
{
    type Value = T;

    fn encode(&self, value: &T, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let number: i128 = (*value)
            .try_into()
            .map_err(|_| OdmError::conversion(type_name::<T>(), "Int64", "value is out of range"))?;
        if !self.wide {
            if let Ok(narrow) = i32::try_from(number) {
                return Ok(Bson::Int32(narrow));
            }
        }
        match i64::try_from(number) {
            Ok(wide) => Ok(Bson::Int64(wide)),
            Err(_) => {
                let decimal = Decimal::from_i128_with_scale(number, 0);
                Ok(decimal_to_bson(&decimal, ctx.options))
            }
        }
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<T> {
        let target = type_name::<T>();
        let number = integer_from_bson(value, &target)?;
        T::try_from(number).map_err(|_| {
            OdmError::conversion(bson_type_name(value), target, format!("{number} does not fit"))
        })
    }
}

struct F64Codec;

impl TypedCodec for F64Codec {
    type Value = f64;

    fn encode(&self, value: &f64, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Double(*value))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<f64> {
        match value {
            Bson::Double(number) => Ok(*number),
            Bson::Int32(number) => Ok(f64::from(*number)),
            Bson::Int64(number) => Ok(*number as f64),
            Bson::Decimal128(_) => decimal_from_bson(value)?
                .to_f64()
                .ok_or_else(|| unexpected(value, "f64")),
            Bson::String(text) => text
                .parse()
                .map_err(|_| OdmError::conversion("String", "f64", format!("'{text}' is not a number"))),
            other => Err(unexpected(other, "f64")),
        }
    }
}

struct F32Codec;

impl TypedCodec for F32Codec {
    type Value = f32;

    fn encode(&self, value: &f32, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Double(f64::from(*value)))
    }

    fn decode(&self, value: &Bson, ctx: &CodecContext<'_>) -> OdmResult<f32> {
        let number = F64Codec.decode(value, ctx)?;
        if number.is_finite() && number.abs() > f64::from(f32::MAX) {
            return Err(OdmError::conversion(bson_type_name(value), "f32", format!("{number} is out of range")));
        }
        Ok(number as f32)
    }
}

struct BoolCodec;

impl TypedCodec for BoolCodec {
    type Value = bool;

    fn encode(&self, value: &bool, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Boolean(*value))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<bool> {
        match value {
            Bson::Boolean(flag) => Ok(*flag),
            other => Err(unexpected(other, "bool")),
        }
    }
}

struct StringCodec;

impl TypedCodec for StringCodec {
    type Value = String;

    fn encode(&self, value: &String, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::String(value.clone()))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<String> {
        match value {
            Bson::String(text) | Bson::Symbol(text) => Ok(text.clone()),
            other => Err(unexpected(other, "String")),
        }
    }
}

struct BinaryCodec;

impl TypedCodec for BinaryCodec {
    type Value = Binary;

    fn encode(&self, value: &Binary, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Binary(value.clone()))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Binary> {
        match value {
            Bson::Binary(binary) => Ok(binary.clone()),
            other => Err(unexpected(other, "Binary")),
        }
    }
}

/// UUIDs are stored as binary subtype 4; the legacy subtype 3 and strings are read too.
struct UuidCodec;

impl TypedCodec for UuidCodec {
    type Value = Uuid;

    fn encode(&self, value: &Uuid, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Binary(Binary {
            subtype: BinarySubtype::Uuid,
            bytes: value.as_bytes().to_vec(),
        }))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Uuid> {
        match value {
            Bson::Binary(Binary {
                subtype: BinarySubtype::Uuid | BinarySubtype::UuidOld,
                bytes,
            }) => Uuid::from_slice(bytes).map_err(|err| OdmError::conversion("Binary", "Uuid", err.to_string())),
            Bson::String(text) => {
                Uuid::parse_str(text).map_err(|err| OdmError::conversion("String", "Uuid", err.to_string()))
            }
            other => Err(unexpected(other, "Uuid")),
        }
    }
}

struct ObjectIdCodec;

impl TypedCodec for ObjectIdCodec {
    type Value = ObjectId;

    fn encode(&self, value: &ObjectId, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::ObjectId(*value))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<ObjectId> {
        match value {
            Bson::ObjectId(id) => Ok(*id),
            Bson::String(hex) => {
                ObjectId::parse_str(hex).map_err(|err| OdmError::conversion("String", "ObjectId", err.to_string()))
            }
            other => Err(unexpected(other, "ObjectId")),
        }
    }
}

const LANGUAGE_KEY: &str = "language";
const COUNTRY_KEY: &str = "country";
const VARIANT_KEY: &str = "variant";

/// Locales are stored as `{language, country, variant}` with absent parts omitted.
struct LocaleCodec;

impl TypedCodec for LocaleCodec {
    type Value = Locale;

    fn encode(&self, value: &Locale, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let mut stored = Document::new();
        for (key, part) in [
            (LANGUAGE_KEY, &value.language),
            (COUNTRY_KEY, &value.country),
            (VARIANT_KEY, &value.variant),
        ] {
            if let Some(part) = part {
                stored.insert(key, part.clone());
            }
        }
        Ok(Bson::Document(stored))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Locale> {
        match value {
            Bson::Document(stored) => {
                let part = |key: &str| stored.get_str(key).ok().map(str::to_string);
                Ok(Locale {
                    language: part(LANGUAGE_KEY),
                    country: part(COUNTRY_KEY),
                    variant: part(VARIANT_KEY),
                })
            }
            Bson::String(tag) => tag.parse(),
            other => Err(unexpected(other, "Locale")),
        }
    }
}

struct CurrencyCodec;

impl TypedCodec for CurrencyCodec {
    type Value = Currency;

    fn encode(&self, value: &Currency, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::String(value.code().to_string()))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Currency> {
        match value {
            Bson::String(code) => code.parse(),
            other => Err(unexpected(other, "Currency")),
        }
    }
}

struct BsonCodec;

impl TypedCodec for BsonCodec {
    type Value = Bson;

    fn encode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(value.clone())
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(value.clone())
    }
}

struct DocumentCodec;

impl TypedCodec for DocumentCodec {
    type Value = Document;

    fn encode(&self, value: &Document, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        Ok(Bson::Document(value.clone()))
    }

    fn decode(&self, value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Document> {
        match value {
            Bson::Document(stored) => Ok(stored.clone()),
            other => Err(unexpected(other, "Document")),
        }
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::options::{DecimalStorage, MapperOptions};

    #[test]
    fn test_integer_width_selects_bson_type() {
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);

        assert_eq!(IntegerCodec::<i16>::narrow().encode(&-3, &ctx).unwrap(), Bson::Int32(-3));
        assert_eq!(IntegerCodec::<i64>::wide().encode(&5, &ctx).unwrap(), Bson::Int64(5));
        assert_eq!(
            IntegerCodec::<u32>::wide().encode(&u32::MAX, &ctx).unwrap(),
            Bson::Int64(i64::from(u32::MAX))
        );
    }

    #[test]
    fn test_large_unsigned_follows_decimal_policy() {
        let options = MapperOptions::builder().decimal_storage(DecimalStorage::String).build();
        let ctx = CodecContext::new(&options);

        let stored = IntegerCodec::<u64>::wide().encode(&u64::MAX, &ctx).unwrap();
        assert_eq!(stored, Bson::String(u64::MAX.to_string()));
        assert_eq!(IntegerCodec::<u64>::wide().decode(&stored, &ctx).unwrap(), u64::MAX);
    }

    #[test]
    fn test_locale_reads_legacy_string() {
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);

        let locale = LocaleCodec.decode(&Bson::String("en_GB".into()), &ctx).unwrap();
        assert_eq!(locale, Locale::new("en").with_country("GB"));
        assert_eq!(
            LocaleCodec.encode(&locale, &ctx).unwrap(),
            Bson::Document(doc! { "language": "en", "country": "GB" })
        );
    }

    #[test]
    fn test_uuid_reads_legacy_subtype_and_string() {
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);
        let id = Uuid::new_v4();

        let legacy = Bson::Binary(Binary {
            subtype: BinarySubtype::UuidOld,
            bytes: id.as_bytes().to_vec(),
        });
        assert_eq!(UuidCodec.decode(&legacy, &ctx).unwrap(), id);
        assert_eq!(UuidCodec.decode(&Bson::String(id.to_string()), &ctx).unwrap(), id);
        assert!(UuidCodec.decode(&Bson::Int32(1), &ctx).is_err());
    }

    #[test]
    fn test_bool_is_strict() {
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);

        assert!(BoolCodec.decode(&Bson::Int32(1), &ctx).unwrap_err().is_conversion());
    }
}
