//! Process-wide mapper settings.
//!
//! Options are created once at startup and shared read-only by the mapper,
//! the codec registry and the query engine.

use serde::{Deserialize, Serialize};

use crate::error::OdmResult;

/// How zone-less date/time values are interpreted when stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateStorage {
    /// Naive values are taken to be UTC.
    Utc,
    /// Naive values are taken to be in the process' local time zone.
    #[default]
    Local,
}

/// How big decimals are stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecimalStorage {
    /// IEEE 754-2008 decimal128, exact.
    #[default]
    Decimal128,
    /// The canonical decimal string.
    String,
}

/// Settings consumed by the mapping engine and the query engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MapperOptions {
    /// Write the discriminator into every encoded document.
    pub store_discriminator: bool,
    /// Document key holding the discriminator.
    pub discriminator_key: String,
    pub date_storage: DateStorage,
    pub decimal_storage: DecimalStorage,
    /// Fail on document keys with no mapped field instead of ignoring them.
    pub strict_decode: bool,
    /// Write `null` for absent optional values instead of omitting the key.
    pub store_nulls: bool,
    /// Write empty collections and maps instead of omitting the key.
    pub store_empties: bool,
    /// Escape `.`, `$` and NUL in map keys on write and restore them on read.
    pub escape_map_keys: bool,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            store_discriminator: true,
            discriminator_key: "className".to_string(),
            date_storage: DateStorage::Local,
            decimal_storage: DecimalStorage::Decimal128,
            strict_decode: false,
            store_nulls: false,
            store_empties: true,
            escape_map_keys: true,
        }
    }
}

impl MapperOptions {
    pub fn builder() -> MapperOptionsBuilder {
        MapperOptionsBuilder::default()
    }

    /// Load options from JSON. Missing keys take their default value.
    pub fn from_json(json: &str) -> OdmResult<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// Builder for [`MapperOptions`].
#[derive(Debug, Clone, Default)]
pub struct MapperOptionsBuilder {
    options: MapperOptions,
}

impl MapperOptionsBuilder {
    pub fn store_discriminator(mut self, store: bool) -> Self {
        self.options.store_discriminator = store;
        self
    }

    pub fn discriminator_key(mut self, key: impl Into<String>) -> Self {
        self.options.discriminator_key = key.into();
        self
    }

    pub fn date_storage(mut self, storage: DateStorage) -> Self {
        self.options.date_storage = storage;
        self
    }

    pub fn decimal_storage(mut self, storage: DecimalStorage) -> Self {
        self.options.decimal_storage = storage;
        self
    }

    pub fn strict_decode(mut self, strict: bool) -> Self {
        self.options.strict_decode = strict;
        self
    }

    pub fn store_nulls(mut self, store: bool) -> Self {
        self.options.store_nulls = store;
        self
    }

    pub fn store_empties(mut self, store: bool) -> Self {
        self.options.store_empties = store;
        self
    }

    pub fn escape_map_keys(mut self, escape: bool) -> Self {
        self.options.escape_map_keys = escape;
        self
    }

    pub fn build(self) -> MapperOptions {
        self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_documented_values() {
        let options = MapperOptions::default();

        assert!(options.store_discriminator);
        assert_eq!(options.discriminator_key, "className");
        assert_eq!(options.date_storage, DateStorage::Local);
        assert_eq!(options.decimal_storage, DecimalStorage::Decimal128);
        assert!(!options.strict_decode);
        assert!(!options.store_nulls);
        assert!(options.store_empties);
    }

    #[test]
    fn test_from_json_fills_missing_keys() {
        let options = MapperOptions::from_json(r#"{"strict_decode": true, "date_storage": "utc"}"#).unwrap();

        assert_eq!(
            options,
            MapperOptions::builder()
                .strict_decode(true)
                .date_storage(DateStorage::Utc)
                .build()
        );
    }

    #[test]
    fn test_from_json_rejects_garbage() {
        assert!(MapperOptions::from_json("{not json").is_err());
    }
}
