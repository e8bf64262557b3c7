//! The codec registry: encode/decode pairs for scalar value types.
//!
//! Codecs are looked up by the exact [`TypeId`] of the scalar first. When no
//! exact codec is registered, fallback codecs are consulted, most recently
//! registered first, and the first one that [accepts](Codec::accepts) the
//! scalar's shape is used. The default registry carries fallbacks for mapped
//! enums and serde-backed scalars.
//!
//! `null` never reaches a codec: the mapper handles it before lookup.

mod builtin;
pub mod decimal;
mod fallback;
mod temporal;

use std::{
    any::{Any, TypeId},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use bson::Bson;
use parking_lot::RwLock;
use tracing::debug;

use crate::{
    error::{OdmError, OdmResult},
    metadata::MappedField,
    options::MapperOptions,
    value::{BoxedScalar, ScalarType, bson_type_name, short_type_name},
};

pub use builtin::register_builtins;
pub use fallback::{EnumCodec, SerdeCodec};

/// What a codec may consult besides the value itself.
#[derive(Debug, Clone, Copy)]
pub struct CodecContext<'a> {
    pub options: &'a MapperOptions,
    /// The field the value belongs to, when known.
    pub field: Option<&'a MappedField>,
}

impl<'a> CodecContext<'a> {
    pub fn new(options: &'a MapperOptions) -> Self {
        Self { options, field: None }
    }

    pub fn with_field(mut self, field: Option<&'a MappedField>) -> Self {
        self.field = field;
        self
    }
}

/// An object-safe encode/decode pair for one or more scalar types.
pub trait Codec: Send + Sync {
    fn name(&self) -> &str;

    /// Whether this codec serves `scalar` as a fallback.
    fn accepts(&self, _scalar: &ScalarType) -> bool {
        false
    }

    fn encode(&self, value: &dyn Any, scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<Bson>;

    fn decode(&self, value: &Bson, scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<BoxedScalar>;
}

/// A codec for exactly one value type, adapted into [`Codec`] on registration.
pub trait TypedCodec: Send + Sync + 'static {
    type Value: Any + Send + Sync;

    fn encode(&self, value: &Self::Value, ctx: &CodecContext<'_>) -> OdmResult<Bson>;

    fn decode(&self, value: &Bson, ctx: &CodecContext<'_>) -> OdmResult<Self::Value>;
}

struct Typed<C>(C);

impl<C: TypedCodec> Codec for Typed<C> {
    fn name(&self) -> &str {
        std::any::type_name::<C>()
    }

    fn encode(&self, value: &dyn Any, scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let value = value.downcast_ref::<C::Value>().ok_or_else(|| {
            OdmError::conversion(
                short_type_name(scalar.name()),
                short_type_name(std::any::type_name::<C::Value>()),
                "codec received a value of another type",
            )
        })?;
        self.0.encode(value, ctx)
    }

    fn decode(&self, value: &Bson, _scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<BoxedScalar> {
        Ok(Box::new(self.0.decode(value, ctx)?))
    }
}

/// Registry of codecs keyed by value type.
///
/// Reads take a shared lock; registration and removal take the write lock
/// and are visible to every later lookup.
pub struct CodecRegistry {
    exact: RwLock<HashMap<TypeId, Arc<dyn Codec>>>,
    fallbacks: RwLock<Vec<Arc<dyn Codec>>>,
}

impl CodecRegistry {
    /// A registry with no codecs at all.
    pub fn empty() -> Self {
        Self {
            exact: RwLock::new(HashMap::new()),
            fallbacks: RwLock::new(Vec::new()),
        }
    }

    /// A registry with the built-in codecs and fallbacks.
    pub fn new() -> Self {
        let registry = Self::empty();
        register_builtins(&registry);
        registry.register_fallback(Arc::new(SerdeCodec));
        registry.register_fallback(Arc::new(EnumCodec));
        registry
    }

    /// Adds or replaces the codec for `C::Value`.
    pub fn register<C: TypedCodec>(&self, codec: C) {
        self.register_for(TypeId::of::<C::Value>(), Arc::new(Typed(codec)));
    }

    pub fn register_for(&self, type_id: TypeId, codec: Arc<dyn Codec>) {
        debug!(codec = codec.name(), "registered codec");
        self.exact.write().insert(type_id, codec);
    }

    pub fn register_fallback(&self, codec: Arc<dyn Codec>) {
        debug!(codec = codec.name(), "registered fallback codec");
        self.fallbacks.write().push(codec);
    }

    /// Removes the exact codec for `T`, leaving every other type untouched.
    pub fn remove<T: Any>(&self) -> bool {
        let removed = self.exact.write().remove(&TypeId::of::<T>()).is_some();
        if removed {
            debug!(value_type = std::any::type_name::<T>(), "removed codec");
        }
        removed
    }

    pub fn remove_fallback(&self, name: &str) -> bool {
        let mut fallbacks = self.fallbacks.write();
        let before = fallbacks.len();
        fallbacks.retain(|codec| codec.name() != name);
        before != fallbacks.len()
    }

    pub fn contains<T: Any>(&self) -> bool {
        self.exact.read().contains_key(&TypeId::of::<T>())
    }

    pub fn lookup(&self, scalar: &ScalarType) -> Option<Arc<dyn Codec>> {
        if let Some(codec) = self.exact.read().get(&scalar.type_id()) {
            return Some(codec.clone());
        }
        self.fallbacks
            .read()
            .iter()
            .rev()
            .find(|codec| codec.accepts(scalar))
            .cloned()
    }

    fn require(&self, scalar: &ScalarType, source: &str, target: &str) -> OdmResult<Arc<dyn Codec>> {
        self.lookup(scalar)
            .ok_or_else(|| OdmError::conversion(source, target, "no codec is registered for this type"))
    }

    pub fn encode(&self, value: &dyn Any, scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<Bson> {
        let type_name = short_type_name(scalar.name());
        self.require(scalar, &type_name, "Bson")?.encode(value, scalar, ctx)
    }

    /// Decodes a non-null value. Returns `None` for `null` without consulting any codec.
    pub fn decode(&self, value: &Bson, scalar: &ScalarType, ctx: &CodecContext<'_>) -> OdmResult<Option<BoxedScalar>> {
        if matches!(value, Bson::Null | Bson::Undefined) {
            return Ok(None);
        }
        let type_name = short_type_name(scalar.name());
        self.require(scalar, bson_type_name(value), &type_name)?
            .decode(value, scalar, ctx)
            .map(Some)
    }
}

impl Default for CodecRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CodecRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecRegistry")
            .field("exact", &self.exact.read().len())
            .field(
                "fallbacks",
                &self.fallbacks.read().iter().map(|codec| codec.name().to_string()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

/// Conversion error for a BSON value of the wrong type.
pub(crate) fn unexpected(value: &Bson, target: &str) -> OdmError {
    OdmError::conversion(bson_type_name(value), target, format!("unexpected value {value}"))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
    use pretty_assertions::assert_eq;
    use rust_decimal::Decimal;
    use uuid::Uuid;

    use super::*;
    use crate::{
        options::{DateStorage, DecimalStorage},
        value::{Currency, Locale, Persistable, ScalarFamily, ValueDescriptor},
    };

    fn scalar_of<T: Persistable>() -> ScalarType {
        match T::descriptor() {
            ValueDescriptor::Scalar(scalar) => scalar,
            other => panic!("not a scalar: {other:?}"),
        }
    }

    fn round_trip_with<T>(registry: &CodecRegistry, options: &MapperOptions, value: T) -> T
    where
        T: Persistable + fmt::Debug + PartialEq,
    {
        let scalar = scalar_of::<T>();
        let ctx = CodecContext::new(options);
        let encoded = registry.encode(&value, &scalar, &ctx).unwrap();
        let decoded = registry.decode(&encoded, &scalar, &ctx).unwrap().unwrap();
        *decoded.downcast::<T>().unwrap()
    }

    fn assert_round_trip<T>(values: Vec<T>)
    where
        T: Persistable + fmt::Debug + PartialEq + Clone,
    {
        let registry = CodecRegistry::new();
        let options = MapperOptions::default();
        for value in values {
            assert_eq!(round_trip_with(&registry, &options, value.clone()), value);
        }
    }

    #[test]
    fn test_integer_boundaries_round_trip() {
        assert_round_trip(vec![i8::MIN, 0, i8::MAX]);
        assert_round_trip(vec![i16::MIN, i16::MAX]);
        assert_round_trip(vec![i32::MIN, -1, i32::MAX]);
        assert_round_trip(vec![i64::MIN, i64::MAX]);
        assert_round_trip(vec![u8::MIN, u8::MAX]);
        assert_round_trip(vec![u16::MAX]);
        assert_round_trip(vec![u32::MAX]);
        assert_round_trip(vec![0_u64, i64::MAX as u64, u64::MAX]);
        assert_round_trip(vec![usize::MIN, 1 << 40]);
        assert_round_trip(vec![isize::MIN, isize::MAX]);
    }

    #[test]
    fn test_float_boundaries_round_trip() {
        assert_round_trip(vec![f64::MIN, f64::MIN_POSITIVE, 0.0, f64::MAX, f64::INFINITY]);
        assert_round_trip(vec![f32::MIN, f32::MAX, 1.5_f32]);
    }

    #[test]
    fn test_strings_round_trip() {
        assert_round_trip(vec![String::new(), "é✓ unicode".to_string(), "x".repeat(1 << 20)]);
        assert_round_trip(vec![true, false]);
    }

    #[test]
    fn test_identifiers_round_trip() {
        assert_round_trip(vec![Uuid::new_v4(), Uuid::nil(), Uuid::from_u128(u128::MAX)]);
        assert_round_trip(vec![bson::oid::ObjectId::new()]);
        assert_round_trip(vec![bson::Binary {
            subtype: bson::spec::BinarySubtype::Generic,
            bytes: vec![0, 1, 2, 255],
        }]);
    }

    #[test]
    fn test_dates_round_trip() {
        let late = Utc.with_ymd_and_hms(2016, 12, 31, 23, 59, 59).unwrap() + chrono::Duration::milliseconds(999);
        let far = Utc.with_ymd_and_hms(9999, 12, 31, 23, 59, 59).unwrap();
        let early = Utc.with_ymd_and_hms(1, 1, 1, 0, 0, 0).unwrap();
        assert_round_trip::<DateTime<Utc>>(vec![late, far, early, DateTime::<Utc>::UNIX_EPOCH]);

        let naive = NaiveDate::from_ymd_opt(2024, 2, 29)
            .unwrap()
            .and_hms_milli_opt(12, 30, 15, 250)
            .unwrap();
        assert_round_trip::<NaiveDateTime>(vec![naive]);
        assert_round_trip(vec![NaiveDate::from_ymd_opt(2024, 2, 29).unwrap(), NaiveDate::from_ymd_opt(9999, 1, 1).unwrap()]);
    }

    #[test]
    fn test_utc_date_policy_stores_naive_values_as_utc() {
        let registry = CodecRegistry::new();
        let options = MapperOptions::builder().date_storage(DateStorage::Utc).build();
        let naive = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();

        let encoded = registry
            .encode(&naive, &scalar_of::<NaiveDateTime>(), &CodecContext::new(&options))
            .unwrap();
        assert_eq!(encoded, Bson::DateTime(bson::DateTime::from_millis(1_577_836_800_000)));
        assert_eq!(round_trip_with(&registry, &options, naive), naive);
    }

    #[test]
    fn test_decimals_round_trip_under_both_policies() {
        let values: Vec<Decimal> = vec![
            Decimal::ZERO,
            Decimal::new(-12345, 2),
            Decimal::MAX,
            Decimal::MIN,
            Decimal::new(1, 28),
            "100.000".parse().unwrap(),
        ];
        assert_round_trip(values.clone());

        let registry = CodecRegistry::new();
        let options = MapperOptions::builder().decimal_storage(DecimalStorage::String).build();
        for value in values {
            assert_eq!(round_trip_with(&registry, &options, value), value);
        }
    }

    #[test]
    fn test_locale_and_currency_round_trip() {
        assert_round_trip(vec![
            Locale::default(),
            Locale::new("en"),
            Locale::new("en").with_country("US").with_variant("POSIX"),
        ]);
        assert_round_trip(vec![Currency::new("EUR").unwrap(), Currency::new("JPY").unwrap()]);
    }

    #[test]
    fn test_narrowing_overflow_is_a_conversion_error() {
        let registry = CodecRegistry::new();
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);

        let err = registry
            .decode(&Bson::Int32(300), &scalar_of::<u8>(), &ctx)
            .err()
            .unwrap();
        assert!(err.is_conversion());
        assert!(registry.decode(&Bson::Double(1.5), &scalar_of::<i32>(), &ctx).is_err());
        assert_eq!(
            *registry
                .decode(&Bson::Double(7.0), &scalar_of::<i64>(), &ctx)
                .unwrap()
                .unwrap()
                .downcast::<i64>()
                .unwrap(),
            7
        );
    }

    #[test]
    fn test_null_never_reaches_a_codec() {
        struct Counting(Arc<AtomicUsize>);

        impl TypedCodec for Counting {
            type Value = i32;

            fn encode(&self, value: &i32, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(Bson::Int32(*value))
            }

            fn decode(&self, _value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<i32> {
                self.0.fetch_add(1, Ordering::SeqCst);
                Ok(0)
            }
        }

        let calls = Arc::new(AtomicUsize::new(0));
        let registry = CodecRegistry::new();
        registry.register(Counting(calls.clone()));
        let options = MapperOptions::default();

        let decoded = registry
            .decode(&Bson::Null, &scalar_of::<i32>(), &CodecContext::new(&options))
            .unwrap();
        assert!(decoded.is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_removing_a_codec_leaves_other_types_alone() {
        let registry = CodecRegistry::new();
        let options = MapperOptions::default();
        let ctx = CodecContext::new(&options);

        assert!(registry.remove::<Currency>());
        assert!(!registry.contains::<Currency>());
        let err = registry
            .encode(&Currency::new("EUR").unwrap(), &scalar_of::<Currency>(), &ctx)
            .unwrap_err();
        assert!(err.is_conversion());
        assert!(err.to_string().contains("Currency"));

        assert!(registry.contains::<Locale>());
        assert_eq!(round_trip_with(&registry, &options, Locale::new("fr")), Locale::new("fr"));
    }

    #[test]
    fn test_unregistered_scalar_names_source_and_target() {
        #[derive(Debug)]
        struct Opaque;

        let registry = CodecRegistry::new();
        let options = MapperOptions::default();
        let scalar = ScalarType::of::<Opaque>(ScalarFamily::Other);

        let err = registry
            .decode(&Bson::Int32(1), &scalar, &CodecContext::new(&options))
            .err()
            .unwrap();
        assert_eq!(
            err.to_string(),
            "cannot convert Int32 to Opaque: no codec is registered for this type"
        );
    }

    #[test]
    fn test_exact_codec_wins_over_fallback() {
        struct Shouting;

        impl TypedCodec for Shouting {
            type Value = crate::test_support::Status;

            fn encode(&self, value: &Self::Value, _ctx: &CodecContext<'_>) -> OdmResult<Bson> {
                Ok(Bson::String(format!("{value:?}").to_uppercase()))
            }

            fn decode(&self, _value: &Bson, _ctx: &CodecContext<'_>) -> OdmResult<Self::Value> {
                Ok(crate::test_support::Status::Shipped)
            }
        }

        let registry = CodecRegistry::new();
        let options = MapperOptions::default();
        let scalar = scalar_of::<crate::test_support::Status>();
        let ctx = CodecContext::new(&options);

        let by_name = registry.encode(&crate::test_support::Status::Open, &scalar, &ctx).unwrap();
        assert_eq!(by_name, Bson::String("open".into()));

        registry.register(Shouting);
        let shouted = registry.encode(&crate::test_support::Status::Open, &scalar, &ctx).unwrap();
        assert_eq!(shouted, Bson::String("OPEN".into()));
    }
}
