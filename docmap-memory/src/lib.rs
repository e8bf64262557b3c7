//! In-memory driver for docmap.
//!
//! This crate provides a thread-safe, in-memory implementation of the
//! [`Driver`](docmap_core::driver::Driver) trait. It interprets the filter,
//! sort and projection documents produced by frozen queries, which makes it
//! a faithful stand-in for a document database in development and tests.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes behind a `parking_lot` RwLock
//! - **Filter evaluation** - Comparison, membership, element, array, regex and logical operators
//! - **Dotted paths** - Conditions reach into embedded documents and arrays
//! - **Cursor shaping** - Sort, skip, limit and projection
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::prelude::*;
//! use docmap::memory::MemoryDriver;
//!
//! #[derive(Debug, Default, Entity)]
//! #[docmap(collection = "users")]
//! pub struct User {
//!     #[docmap(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! #[tokio::main]
//! async fn main() -> OdmResult<()> {
//!     let store = Datastore::new(Arc::new(Mapper::new(MapperOptions::default())), MemoryDriver::new());
//!
//!     let mut user = User { id: Some("U1".into()), name: "Alice".into() };
//!     store.save(&mut user).await?;
//!
//!     let users = store.find(&store.query::<User>().filter("name", "Alice".to_string())).await?;
//!     assert_eq!(users.len(), 1);
//!     Ok(())
//! }
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_memory;

mod evaluator;
pub mod store;

pub use store::MemoryDriver;
