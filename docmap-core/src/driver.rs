//! The storage driver collaborator.
//!
//! The mapper and the query engine never talk to a database themselves. A
//! [`Driver`] receives encoded documents and the filter, sort and projection
//! documents produced by frozen queries, and returns raw documents to decode.
//! Network I/O, cancellation and time limits are entirely the driver's
//! concern.
//!
//! # Thread Safety
//!
//! Implementations must be `Send + Sync`; the [`Datastore`](crate::store::Datastore)
//! shares one driver between all of its operations.

use std::{fmt::Debug, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document};

use crate::{
    error::OdmResult,
    query::{CountSpec, DeleteSpec, FindSpec},
};

#[async_trait]
pub trait Driver: Send + Sync + Debug {
    /// Inserts one document and returns its `_id`.
    ///
    /// A document without `_id` gets one generated by the driver.
    async fn insert(&self, collection: &str, document: Document) -> OdmResult<Bson>;

    /// Replaces the first document matching `filter` and returns the number
    /// of documents matched. With `upsert`, a document is inserted when
    /// nothing matches and the call counts as one match.
    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        upsert: bool,
    ) -> OdmResult<u64>;

    async fn find(&self, spec: FindSpec) -> OdmResult<Vec<Document>>;

    async fn count(&self, spec: CountSpec) -> OdmResult<u64>;

    /// Deletes matching documents and returns how many were removed.
    async fn delete(&self, spec: DeleteSpec) -> OdmResult<u64>;
}

#[async_trait]
impl<D> Driver for &D
where
    D: Driver,
{
    async fn insert(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        (*self).insert(collection, document).await
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        upsert: bool,
    ) -> OdmResult<u64> {
        (*self)
            .replace(collection, filter, document, upsert)
            .await
    }

    async fn find(&self, spec: FindSpec) -> OdmResult<Vec<Document>> {
        (*self).find(spec).await
    }

    async fn count(&self, spec: CountSpec) -> OdmResult<u64> {
        (*self).count(spec).await
    }

    async fn delete(&self, spec: DeleteSpec) -> OdmResult<u64> {
        (*self).delete(spec).await
    }
}

#[async_trait]
impl<D> Driver for Arc<D>
where
    D: Driver + ?Sized,
{
    async fn insert(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        (**self).insert(collection, document).await
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        upsert: bool,
    ) -> OdmResult<u64> {
        (**self)
            .replace(collection, filter, document, upsert)
            .await
    }

    async fn find(&self, spec: FindSpec) -> OdmResult<Vec<Document>> {
        (**self).find(spec).await
    }

    async fn count(&self, spec: CountSpec) -> OdmResult<u64> {
        (**self).count(spec).await
    }

    async fn delete(&self, spec: DeleteSpec) -> OdmResult<u64> {
        (**self).delete(spec).await
    }
}
