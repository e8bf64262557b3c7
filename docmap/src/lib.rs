//! Main docmap crate: an object-document mapper for BSON document stores.
//!
//! This crate is the primary entry point for users of docmap. It re-exports
//! the core types from `docmap-core`, the derive macros from
//! `docmap-macros` and the in-memory driver from `docmap-memory`.
//!
//! # Features
//!
//! - **Typed entities** - Derive the mapping of a struct and encode object graphs to BSON documents
//! - **References** - Shared and cyclic object graphs stored as `(collection, id)` tokens
//! - **Polymorphism** - Interface fields decoded through a stored discriminator
//! - **Validated queries** - Fluent criteria checked against the mapping before they reach the driver
//! - **Optimistic versioning** - Saves fail with a conflict when the stored version moved on
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use docmap::{memory::MemoryDriver, prelude::*};
//!
//! #[derive(Debug, Default, Entity)]
//! #[docmap(collection = "customers")]
//! pub struct Customer {
//!     #[docmap(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! #[derive(Debug, Default, Entity)]
//! #[docmap(collection = "orders")]
//! pub struct Order {
//!     #[docmap(id)]
//!     pub id: Option<String>,
//!     pub customer: Option<Ref<Customer>>,
//!     pub total: i64,
//!     #[docmap(version)]
//!     pub version: i64,
//! }
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let mapper = Arc::new(Mapper::new(MapperOptions::default()));
//!     let store = Datastore::new(mapper, MemoryDriver::new());
//!
//!     let customer = Shared::new(Customer { id: Some("C1".into()), name: "Ada".into() });
//!     let order = Shared::new(Order {
//!         id: Some("O1".into()),
//!         customer: Some(Ref::from(&customer)),
//!         total: 250,
//!         ..Order::default()
//!     });
//!
//!     // Writes the customer and the order.
//!     store.save_cascade(&order).await?;
//!
//!     let query = store.query::<Order>().filter("total >", 100).filter("total <", 500);
//!     let orders = store.find(&query).await?;
//!     assert_eq!(orders.len(), 1);
//!     Ok(())
//! }
//! ```
//!
//! # Queries
//!
//! Criteria are written against declared field names and dotted paths; the
//! query translates them to storage names and checks every value against the
//! field it targets. All failures are reported together:
//!
//! ```ignore
//! let err = store
//!     .query::<Order>()
//!     .filter("totl >", 100)
//!     .filter("customer.name", 7)
//!     .filter_document()
//!     .unwrap_err();
//!
//! assert_eq!(err.failures().len(), 2);
//! ```
//!
//! # Drivers
//!
//! - [`memory`] - In-memory driver for development and testing
//!
//! Any other store plugs in through the [`driver::Driver`] trait.

pub mod prelude;

pub use docmap_core::{
    cache, codec, driver, entity, error, mapping, metadata, options, page, path, query, store, value,
};
pub use docmap_core::{
    persistable_entity, persistable_enum, persistable_polymorphic, persistable_scalar, persistable_serde,
};

pub use docmap_macros::{Entity, MappedEnum};

// Re-export BSON types for convenience
pub use bson;

/// In-memory driver implementation.
pub mod memory {
    pub use docmap_memory::MemoryDriver;
}
