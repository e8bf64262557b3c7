//! Error types and result types for mapping and query operations.
//!
//! Every fallible API in this crate returns [`OdmResult<T>`]. None of these
//! errors are retried internally: they describe schema or programming
//! mistakes (or a lost optimistic-concurrency race) and are surfaced to the
//! caller at the point of the offending operation.

use std::fmt;

use bson::{Bson, error::Error as BsonError};
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

use crate::query::FilterOperator;

/// A single incompatibility found while validating one query criterion.
///
/// Failures are collected across all criteria of a query and reported
/// together through [`OdmError::Validation`].
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationFailure {
    /// The field path as written by the caller.
    pub path: String,
    /// The operator of the failing criterion, when the failure concerns one.
    pub operator: Option<FilterOperator>,
    /// Human readable description of the problem.
    pub message: String,
}

impl ValidationFailure {
    /// Creates a failure for one criterion.
    ///
    /// # Arguments
    ///
    /// * `path` - The field path as the caller wrote it
    /// * `operator` - The criterion's operator, or `None` for path and sort problems
    /// * `message` - What is wrong with the criterion
    ///
    /// # Example
    ///
    /// ```ignore
    /// let failure = ValidationFailure::new("total", Some(FilterOperator::GreaterThan), "expects a number");
    /// assert_eq!(failure.to_string(), "total $gt: expects a number");
    /// ```
    pub fn new(path: impl Into<String>, operator: Option<FilterOperator>, message: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            operator,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.operator {
            Some(op) => write!(f, "{} {}: {}", self.path, op, self.message),
            None => write!(f, "{}: {}", self.path, self.message),
        }
    }
}

fn summarize(failures: &[ValidationFailure]) -> String {
    failures
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Represents all possible errors raised by the mapper and the query engine.
#[derive(Error, Debug)]
pub enum OdmError {
    /// Structural problem with a type's mapping or a document's shape:
    /// unmapped type, missing identifier, duplicate storage name, unknown
    /// discriminator.
    #[error("mapping error for {type_name}: {message}")]
    Mapping { type_name: String, message: String },
    /// A single value could not be encoded or decoded by any codec.
    #[error("cannot convert {source_type} to {target_type}: {message}")]
    Conversion {
        source_type: String,
        target_type: String,
        message: String,
    },
    /// A dotted field path does not resolve against the root type.
    #[error("path '{path}' does not resolve against {root}: {message}")]
    PathNotFound {
        path: String,
        root: String,
        message: String,
    },
    /// One or more criteria of a query failed validation.
    #[error("query on {root} failed validation: {}", summarize(.failures))]
    Validation {
        root: String,
        failures: Vec<ValidationFailure>,
    },
    /// The query builder was misused.
    #[error("query build error: {0}")]
    Build(String),
    /// An optimistic version check failed during a write.
    #[error("concurrent modification of {collection} {id}: expected version {expected_version}")]
    ConcurrencyConflict {
        collection: String,
        id: Bson,
        expected_version: i64,
    },
    /// The storage driver reported a failure.
    #[error("driver error: {0}")]
    Driver(String),
    /// Serialization/deserialization error when converting between formats (BSON, JSON).
    #[error("serialization error: {0}")]
    Serialization(String),
}

/// A specialized `Result` type for mapping and query operations.
pub type OdmResult<T> = Result<T, OdmError>;

impl OdmError {
    /// Creates an [`OdmError::Mapping`].
    ///
    /// # Arguments
    ///
    /// * `type_name` - The mapped type whose mapping or document is at fault
    /// * `message` - What is wrong
    pub fn mapping(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Mapping {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Creates an [`OdmError::Conversion`].
    ///
    /// # Arguments
    ///
    /// * `source_type` - The BSON or Rust type of the value that was given
    /// * `target_type` - The type it should have become
    /// * `message` - Where and why the conversion failed
    pub fn conversion(
        source_type: impl Into<String>,
        target_type: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Conversion {
            source_type: source_type.into(),
            target_type: target_type.into(),
            message: message.into(),
        }
    }

    /// Creates an [`OdmError::PathNotFound`] for `path` under `root`.
    pub fn path_not_found(
        path: impl Into<String>,
        root: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::PathNotFound {
            path: path.into(),
            root: root.into(),
            message: message.into(),
        }
    }

    /// Creates an [`OdmError::Build`].
    pub fn build(message: impl Into<String>) -> Self {
        Self::Build(message.into())
    }

    /// Creates an [`OdmError::Driver`]. Drivers wrap their native errors with it.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let id = collection.insert_one(document).await.map_err(|err| OdmError::driver(err.to_string()))?;
    /// ```
    pub fn driver(message: impl Into<String>) -> Self {
        Self::Driver(message.into())
    }

    /// Error raised by generated field accessors for an undeclared field name.
    pub fn unknown_field(type_name: &str, field: &str) -> Self {
        Self::mapping(type_name, format!("no mapped field named '{field}'"))
    }

    pub fn is_mapping(&self) -> bool {
        matches!(self, Self::Mapping { .. })
    }

    pub fn is_conversion(&self) -> bool {
        matches!(self, Self::Conversion { .. })
    }

    pub fn is_path_not_found(&self) -> bool {
        matches!(self, Self::PathNotFound { .. })
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation { .. })
    }

    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build(_))
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }

    /// The collected failures of a validation error, empty for any other kind.
    pub fn failures(&self) -> &[ValidationFailure] {
        match self {
            Self::Validation { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl From<BsonError> for OdmError {
    fn from(err: BsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for OdmError {
    fn from(err: SerdeJsonError) -> Self {
        OdmError::Serialization(err.to_string())
    }
}
