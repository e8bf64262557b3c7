//! An object-document mapper core: typed entities to BSON documents and
//! fluent, validated queries to filter documents.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Value model** ([`value`]) - The [`Persistable`](value::Persistable) trait and the shapes of mapped values
//! - **Entities** ([`entity`]) - Entity traits, shared object graphs and reference tokens
//! - **Metadata** ([`metadata`]) - Mapped types built once per type from an explicit registration
//! - **Codecs** ([`codec`]) - The converter registry between scalar values and BSON
//! - **Mapping** ([`mapping`]) - Encoding object graphs to documents and decoding them back
//! - **Paths** ([`path`]) - Resolution of dotted field paths to storage paths
//! - **Queries** ([`query`]) - Criteria building, validation and filter serialization
//! - **Driver and datastore** ([`driver`], [`store`]) - The storage collaborator and a typed facade over it
//! - **Error handling** ([`error`]) and **configuration** ([`options`])
//!
//! # Example
//!
//! ```ignore
//! use docmap_core::{mapping::Mapper, options::MapperOptions};
//!
//! let mapper = Mapper::new(MapperOptions::default());
//!
//! let (document, _) = mapper.encode(&mut order)?;
//! let filter = mapper
//!     .query::<Order>()
//!     .filter("total >", 100)
//!     .filter("total <", 500)
//!     .filter_document()?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod cache;
pub mod codec;
pub mod driver;
pub mod entity;
pub mod error;
pub mod mapping;
pub mod metadata;
pub mod options;
pub mod page;
pub mod path;
pub mod query;
pub mod store;
pub mod value;

#[cfg(test)]
mod test_support;
