use std::str::FromStr;

use bson::{Binary, Bson, Document, oid::ObjectId};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    error::{OdmError, OdmResult},
    persistable_scalar,
    value::{Currency, Locale, ScalarFamily},
};

persistable_scalar! {
    i8 => ScalarFamily::Integer,
    i16 => ScalarFamily::Integer,
    i32 => ScalarFamily::Integer,
    i64 => ScalarFamily::Integer,
    isize => ScalarFamily::Integer,
    u8 => ScalarFamily::Integer,
    u16 => ScalarFamily::Integer,
    u32 => ScalarFamily::Integer,
    u64 => ScalarFamily::Integer,
    usize => ScalarFamily::Integer,
    f32 => ScalarFamily::Float,
    f64 => ScalarFamily::Float,
    Decimal => ScalarFamily::Decimal,
    bool => ScalarFamily::Bool,
    String => ScalarFamily::Text,
    Binary => ScalarFamily::Binary,
    DateTime<Utc> => ScalarFamily::Temporal,
    NaiveDateTime => ScalarFamily::Temporal,
    NaiveDate => ScalarFamily::Temporal,
    Uuid => ScalarFamily::Identifier,
    ObjectId => ScalarFamily::Identifier,
    Locale => ScalarFamily::Other,
    Currency => ScalarFamily::Other,
    Bson => ScalarFamily::Dynamic,
    Document => ScalarFamily::Dynamic,
}

/// A type usable as the key of a persisted map. Keys are stored as strings.
pub trait MapKey: Sized + Send + Sync + 'static {
    fn to_key(&self) -> String;

    fn from_key(key: &str) -> OdmResult<Self>;
}

impl MapKey for String {
    fn to_key(&self) -> String {
        self.clone()
    }

    fn from_key(key: &str) -> OdmResult<Self> {
        Ok(key.to_string())
    }
}

macro_rules! parsed_map_key {
    ($($ty:ty),* $(,)?) => {$(
        impl MapKey for $ty {
            fn to_key(&self) -> String {
                self.to_string()
            }

            fn from_key(key: &str) -> OdmResult<Self> {
                <$ty>::from_str(key).map_err(|err| {
                    OdmError::conversion("map key", stringify!($ty), format!("'{key}': {err}"))
                })
            }
        }
    )*};
}

parsed_map_key!(i8, i16, i32, i64, u8, u16, u32, u64, usize, isize, bool, char, Uuid);

impl MapKey for ObjectId {
    fn to_key(&self) -> String {
        self.to_hex()
    }

    fn from_key(key: &str) -> OdmResult<Self> {
        ObjectId::parse_str(key)
            .map_err(|err| OdmError::conversion("map key", "ObjectId", format!("'{key}': {err}")))
    }
}
