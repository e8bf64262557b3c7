//! Derived fixtures shared by the integration tests.

#![allow(dead_code)]

use std::sync::Arc;

use async_trait::async_trait;
use docmap::{
    bson::{Bson, Document, oid::ObjectId},
    memory::MemoryDriver,
    prelude::*,
    query::{CountSpec, DeleteSpec, FindSpec},
};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[docmap(no_discriminator)]
pub struct Address {
    pub street: String,
    #[docmap(rename = "town")]
    pub city: String,
}

#[derive(Debug, Default, Entity)]
#[docmap(collection = "customers")]
pub struct Customer {
    #[docmap(id)]
    pub id: Option<String>,
    pub name: String,
    #[docmap(unique, sparse)]
    pub email: Option<String>,
    pub address: Option<Address>,
}

impl Customer {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, MappedEnum)]
#[docmap(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Open,
    Shipped,
    #[docmap(rename = "void")]
    Cancelled,
}

#[derive(Debug, Clone, Default, PartialEq, Entity)]
#[docmap(no_discriminator)]
pub struct OrderLine {
    pub sku: String,
    #[docmap(rename = "qty")]
    pub quantity: u32,
    pub price: Decimal,
}

#[derive(Debug, Default, Entity)]
#[docmap(collection = "orders", pre_save = Order::stamp)]
pub struct Order {
    #[docmap(id)]
    pub id: Option<String>,
    pub customer: Option<Ref<Customer>>,
    #[docmap(indexed = "desc")]
    pub total: Decimal,
    pub lines: Vec<OrderLine>,
    pub tags: Vec<String>,
    pub status: Status,
    #[docmap(version)]
    pub version: i64,
    #[docmap(transient)]
    pub saves: u32,
}

impl Order {
    pub fn new(id: &str, total: Decimal) -> Self {
        Self {
            id: Some(id.to_string()),
            total,
            ..Self::default()
        }
    }

    fn stamp(&mut self, _: &mut Document) -> OdmResult<()> {
        self.saves += 1;
        Ok(())
    }
}

#[derive(Debug, Default, Entity)]
#[docmap(collection = "people", discriminator = "person", post_load = Person::loaded)]
pub struct Person {
    #[docmap(id)]
    pub id: Option<String>,
    pub name: String,
    pub friend: Option<Ref<Person>>,
    #[docmap(transient)]
    pub loads: u32,
}

impl Person {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn loaded(&mut self, _: &mut Document) -> OdmResult<()> {
        self.loads += 1;
        Ok(())
    }
}

/// An entity whose identifier is left to the driver.
#[derive(Debug, Default, Entity)]
#[docmap(collection = "notes")]
pub struct Note {
    #[docmap(id)]
    pub id: Option<ObjectId>,
    pub text: String,
}

#[derive(Debug, Default, Entity)]
#[docmap(collection = "authors", post_save = Author::saved, pre_load = Author::upgrade)]
pub struct Author {
    #[docmap(id)]
    pub id: Option<String>,
    pub name: String,
    #[docmap(transient)]
    pub saves: u32,
    #[docmap(transient)]
    pub loads: u32,
}

impl Author {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            ..Self::default()
        }
    }

    fn saved(&mut self, document: &mut Document) -> OdmResult<()> {
        assert!(document.contains_key("_id"));
        self.saves += 1;
        Ok(())
    }

    /// Early documents stored the name under `fullName`.
    fn upgrade(&mut self, document: &mut Document) -> OdmResult<()> {
        self.loads += 1;
        if let Some(legacy) = document.remove("fullName") {
            document.insert("name", legacy);
        }
        Ok(())
    }
}

#[derive(Debug, Default, Entity)]
#[docmap(collection = "books", post_save = Book::saved)]
pub struct Book {
    #[docmap(id)]
    pub id: Option<String>,
    pub title: String,
    pub author: Option<Ref<Author>>,
    pub editor: Option<Ref<Author>>,
    #[docmap(transient)]
    pub saves: u32,
}

impl Book {
    fn saved(&mut self, _: &mut Document) -> OdmResult<()> {
        self.saves += 1;
        Ok(())
    }
}

/// Forwards to a [`MemoryDriver`] but fails every write to one collection.
#[derive(Debug, Clone)]
pub struct FailingDriver {
    pub inner: MemoryDriver,
    collection: &'static str,
}

impl FailingDriver {
    pub fn new(collection: &'static str) -> Self {
        Self {
            inner: MemoryDriver::new(),
            collection,
        }
    }

    fn check(&self, collection: &str) -> OdmResult<()> {
        if collection == self.collection {
            return Err(OdmError::driver(format!("writes to '{collection}' are unavailable")));
        }
        Ok(())
    }
}

#[async_trait]
impl Driver for FailingDriver {
    async fn insert(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        self.check(collection)?;
        self.inner.insert(collection, document).await
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        upsert: bool,
    ) -> OdmResult<u64> {
        self.check(collection)?;
        self.inner.replace(collection, filter, document, upsert).await
    }

    async fn find(&self, spec: FindSpec) -> OdmResult<Vec<Document>> {
        self.inner.find(spec).await
    }

    async fn count(&self, spec: CountSpec) -> OdmResult<u64> {
        self.inner.count(spec).await
    }

    async fn delete(&self, spec: DeleteSpec) -> OdmResult<u64> {
        self.inner.delete(spec).await
    }
}

pub fn mapper() -> Arc<Mapper> {
    Arc::new(Mapper::new(MapperOptions::default()))
}

pub fn datastore() -> Datastore<MemoryDriver> {
    datastore_over(mapper(), MemoryDriver::new())
}

pub fn datastore_over<D: Driver>(mapper: Arc<Mapper>, driver: D) -> Datastore<D> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
    Datastore::new(mapper, driver)
}
