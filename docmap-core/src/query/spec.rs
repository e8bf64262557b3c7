//! Driver-facing descriptions of the operations a frozen query feeds.

use std::time::Duration;

use bson::Document;

/// Everything a driver needs to run a find.
#[derive(Debug, Clone, PartialEq)]
pub struct FindSpec {
    pub collection: String,
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    /// Passed through to the driver untouched.
    pub max_time: Option<Duration>,
}

impl FindSpec {
    /// A find matching `filter` with no cursor shaping.
    pub fn new(collection: impl Into<String>, filter: Document) -> Self {
        Self {
            collection: collection.into(),
            filter,
            sort: None,
            projection: None,
            skip: None,
            limit: None,
            max_time: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountSpec {
    pub collection: String,
    pub filter: Document,
    pub skip: Option<u64>,
    pub limit: Option<i64>,
    pub max_time: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteSpec {
    pub collection: String,
    pub filter: Document,
    /// Delete every match rather than the first.
    pub multi: bool,
    pub max_time: Option<Duration>,
}

/// How an update applies its filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateMode {
    /// The first matching document.
    Single,
    /// Every matching document.
    Multi,
    /// The first match, or an insert when nothing matches.
    Upsert,
}

impl UpdateMode {
    /// Modes whose effect must not depend on sort order or position.
    pub fn is_position_independent(self) -> bool {
        !matches!(self, Self::Upsert)
    }
}
