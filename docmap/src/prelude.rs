//! Convenient re-exports of commonly used types from docmap.
//!
//! ```ignore
//! use docmap::prelude::*;
//! ```
//!
//! This provides access to:
//! - Entity traits, the derive macros and reference handles
//! - The mapper, its options and the datastore facade
//! - Query construction and pagination
//! - Error types

pub use docmap_core::{
    driver::Driver,
    entity::{AnyEntity, Entity, Key, Polymorphic, Ref, ReferenceToken, Shared},
    error::{OdmError, OdmResult, ValidationFailure},
    mapping::{EntityListener, Mapper},
    metadata::{FieldBuilder, HookKind, IndexDirection, MappedTypeBuilder},
    options::{DateStorage, DecimalStorage, MapperOptions},
    page::{Page, PaginationParams},
    query::{Criteria, FilterOperator, Query, SortDirection, UpdateMode},
    store::{Datastore, IdGenerator, ObjectIdGenerator, UuidGenerator},
    value::{Currency, Locale, MappedEnum, Persistable},
};

pub use docmap_macros::{Entity, MappedEnum};
