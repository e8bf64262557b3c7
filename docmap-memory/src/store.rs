//! In-memory storage implementation of the driver collaborator.
//!
//! Documents are kept per collection in insertion order behind a
//! `parking_lot` read-write lock. Every operation evaluates the filter
//! document it is given, so the in-memory store sees exactly what a remote
//! driver would receive.

use std::{cmp::Ordering, collections::HashMap, sync::Arc};

use async_trait::async_trait;
use bson::{Bson, Document, oid::ObjectId};
use docmap_core::{
    driver::Driver,
    error::{OdmError, OdmResult},
    query::{CountSpec, DeleteSpec, FindSpec},
};
use parking_lot::RwLock;
use tracing::{debug, trace};

use crate::evaluator::{Comparable, FilterEvaluator, resolve};

type StoreMap = HashMap<String, Vec<Document>>;

/// Thread-safe in-memory document driver.
///
/// `MemoryDriver` is cloneable; clones share the same underlying data.
///
/// Queries scan every document in a collection; there are no indexes.
///
/// # Example
///
/// ```ignore
/// use docmap_memory::MemoryDriver;
/// use docmap_core::{driver::Driver, query::FindSpec};
/// use bson::doc;
///
/// let driver = MemoryDriver::new();
/// let id = driver.insert("users", doc! { "name": "Alice" }).await?;
///
/// let found = driver.find(FindSpec::new("users", doc! { "_id": id })).await?;
/// assert_eq!(found.len(), 1);
/// ```
#[derive(Default, Clone, Debug)]
pub struct MemoryDriver {
    store: Arc<RwLock<StoreMap>>,
}

impl MemoryDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of every document in `collection`, in insertion order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.store
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default()
    }

    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.store.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn clear(&self) {
        self.store.write().clear();
    }
}

#[async_trait]
impl Driver for MemoryDriver {
    async fn insert(&self, collection: &str, document: Document) -> OdmResult<Bson> {
        let mut store = self.store.write();
        let documents = store.entry(collection.to_string()).or_default();
        let (id, document) = with_id(document, None);

        let key = Comparable::from(&id);
        if documents
            .iter()
            .any(|existing| existing.get("_id").map(Comparable::from).as_ref() == Some(&key))
        {
            return Err(OdmError::driver(format!(
                "duplicate _id {id} in collection {collection}"
            )));
        }

        documents.push(document);
        debug!(%collection, %id, "inserted document");
        Ok(id)
    }

    async fn replace(
        &self,
        collection: &str,
        filter: Document,
        document: Document,
        upsert: bool,
    ) -> OdmResult<u64> {
        let mut store = self.store.write();
        let documents = store.entry(collection.to_string()).or_default();
        let selected = FilterEvaluator::new(&filter).select(documents)?;

        if let Some(&index) = selected.first() {
            let (id, document) = with_id(document, documents[index].get("_id"));
            documents[index] = document;
            debug!(%collection, %id, %filter, "replaced document");
            return Ok(1);
        }

        if !upsert {
            trace!(%collection, %filter, "replace matched nothing");
            return Ok(0);
        }

        let filter_id = filter.get("_id").filter(|id| !is_operator_value(id));
        let (id, document) = with_id(document, filter_id);
        documents.push(document);
        debug!(%collection, %id, "upserted document");
        Ok(1)
    }

    async fn find(&self, spec: FindSpec) -> OdmResult<Vec<Document>> {
        let store = self.store.read();
        let Some(documents) = store.get(&spec.collection) else {
            return Ok(Vec::new());
        };

        let mut found: Vec<&Document> = FilterEvaluator::new(&spec.filter)
            .select(documents)?
            .into_iter()
            .map(|index| &documents[index])
            .collect();

        if let Some(sort) = &spec.sort {
            found.sort_by(|a, b| compare_by(a, b, sort));
        }

        let found: Vec<Document> = window(found, spec.skip, spec.limit)
            .map(|document| match &spec.projection {
                Some(projection) => project(document, projection),
                None => document.clone(),
            })
            .collect();

        debug!(collection = %spec.collection, filter = %spec.filter, found = found.len(), "find");
        Ok(found)
    }

    async fn count(&self, spec: CountSpec) -> OdmResult<u64> {
        let store = self.store.read();
        let Some(documents) = store.get(&spec.collection) else {
            return Ok(0);
        };

        let selected = FilterEvaluator::new(&spec.filter).select(documents)?;
        let count = window(selected, spec.skip, spec.limit).count() as u64;
        debug!(collection = %spec.collection, filter = %spec.filter, count, "count");
        Ok(count)
    }

    async fn delete(&self, spec: DeleteSpec) -> OdmResult<u64> {
        let mut store = self.store.write();
        let Some(documents) = store.get_mut(&spec.collection) else {
            return Ok(0);
        };

        let mut selected = FilterEvaluator::new(&spec.filter).select(documents)?;
        if !spec.multi {
            selected.truncate(1);
        }
        for index in selected.iter().rev() {
            documents.remove(*index);
        }

        debug!(collection = %spec.collection, filter = %spec.filter, deleted = selected.len(), "delete");
        Ok(selected.len() as u64)
    }
}

/// Puts `_id` first, taking `fallback` or a fresh object id when the
/// document has none.
fn with_id(mut document: Document, fallback: Option<&Bson>) -> (Bson, Document) {
    let id = document
        .remove("_id")
        .or_else(|| fallback.cloned())
        .unwrap_or_else(|| Bson::ObjectId(ObjectId::new()));

    let mut stored = Document::new();
    stored.insert("_id", id.clone());
    stored.extend(document);
    (id, stored)
}

fn is_operator_value(value: &Bson) -> bool {
    matches!(value, Bson::Document(doc) if doc.keys().any(|key| key.starts_with('$')))
}

/// Applies skip, then limit; a zero limit means no limit and a negative one
/// counts like its absolute value.
fn window<T>(items: Vec<T>, skip: Option<u64>, limit: Option<i64>) -> impl Iterator<Item = T> {
    let skip = usize::try_from(skip.unwrap_or(0)).unwrap_or(usize::MAX);
    let take = match limit {
        None | Some(0) => usize::MAX,
        Some(limit) => usize::try_from(limit.unsigned_abs()).unwrap_or(usize::MAX),
    };
    items.into_iter().skip(skip).take(take)
}

fn compare_by(a: &Document, b: &Document, sort: &Document) -> Ordering {
    for (path, direction) in sort {
        let descending = matches!(direction, Bson::Int32(n) if *n < 0)
            || matches!(direction, Bson::Int64(n) if *n < 0)
            || matches!(direction, Bson::Double(n) if *n < 0.0);

        let left = sort_key(a, path);
        let right = sort_key(b, path);
        let ordering = left.sort_cmp(&right);
        let ordering = if descending { ordering.reverse() } else { ordering };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

fn sort_key<'a>(document: &'a Document, path: &str) -> Comparable<'a> {
    resolve(document, path)
        .into_iter()
        .next()
        .map(Comparable::from)
        .unwrap_or(Comparable::Null)
}

fn included(flag: &Bson) -> bool {
    match flag {
        Bson::Boolean(value) => *value,
        Bson::Int32(value) => *value != 0,
        Bson::Int64(value) => *value != 0,
        Bson::Double(value) => *value != 0.0,
        _ => true,
    }
}

/// Shapes one document by an inclusion or exclusion projection.
fn project(document: &Document, projection: &Document) -> Document {
    let inclusive = projection
        .iter()
        .any(|(path, flag)| path != "_id" && included(flag));

    if !inclusive {
        let mut projected = document.clone();
        for (path, flag) in projection {
            if !included(flag) {
                remove_path(&mut projected, path);
            }
        }
        return projected;
    }

    let mut projected = Document::new();
    if projection.get("_id").is_none_or(included) {
        if let Some(id) = document.get("_id") {
            projected.insert("_id", id.clone());
        }
    }
    for (path, flag) in projection {
        if path != "_id" && included(flag) {
            let segments: Vec<&str> = path.split('.').collect();
            copy_path(document, &mut projected, &segments);
        }
    }
    projected
}

fn copy_path(source: &Document, target: &mut Document, segments: &[&str]) {
    let Some((first, rest)) = segments.split_first() else {
        return;
    };
    let Some(value) = source.get(*first) else {
        return;
    };

    if rest.is_empty() {
        target.insert(*first, value.clone());
        return;
    }

    match value {
        Bson::Document(inner) => {
            let mut nested = match target.remove(*first) {
                Some(Bson::Document(existing)) => existing,
                _ => Document::new(),
            };
            copy_path(inner, &mut nested, rest);
            target.insert(*first, nested);
        }
        Bson::Array(items) => {
            let existing = match target.remove(*first) {
                Some(Bson::Array(existing)) => existing,
                _ => Vec::new(),
            };
            let projected: Vec<Bson> = items
                .iter()
                .enumerate()
                .filter_map(|(index, item)| match item {
                    Bson::Document(inner) => {
                        let mut nested = match existing.get(index) {
                            Some(Bson::Document(existing)) => existing.clone(),
                            _ => Document::new(),
                        };
                        copy_path(inner, &mut nested, rest);
                        Some(Bson::Document(nested))
                    }
                    _ => None,
                })
                .collect();
            target.insert(*first, projected);
        }
        _ => {}
    }
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((first, rest)) => match document.get_mut(first) {
            Some(Bson::Document(inner)) => remove_path(inner, rest),
            Some(Bson::Array(items)) => {
                for item in items {
                    if let Bson::Document(inner) = item {
                        remove_path(inner, rest);
                    }
                }
            }
            _ => {}
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;

    async fn seeded() -> MemoryDriver {
        let driver = MemoryDriver::new();
        for (id, name, total, tags) in [
            ("O1", "first", 120, vec!["rush"]),
            ("O2", "second", 480, vec!["gift", "rush"]),
            ("O3", "third", 40, vec![]),
        ] {
            driver
                .insert(
                    "orders",
                    doc! {
                        "_id": id,
                        "name": name,
                        "total": total,
                        "tags": tags,
                        "customer": { "collection": "customers", "id": "C1" },
                    },
                )
                .await
                .unwrap();
        }
        driver
    }

    #[tokio::test]
    async fn test_insert_generates_object_id_first() {
        let driver = MemoryDriver::new();
        let id = driver.insert("users", doc! { "name": "Alice" }).await.unwrap();

        assert!(matches!(id, Bson::ObjectId(_)));
        let stored = driver.documents("users");
        assert_eq!(stored[0].keys().next().map(String::as_str), Some("_id"));
        assert_eq!(stored[0].get("_id"), Some(&id));
    }

    #[tokio::test]
    async fn test_insert_rejects_duplicate_id() {
        let driver = seeded().await;
        let err = driver.insert("orders", doc! { "_id": "O1" }).await.unwrap_err();
        assert!(matches!(err, OdmError::Driver(_)));
    }

    #[tokio::test]
    async fn test_find_filters_sorts_and_windows() {
        let driver = seeded().await;
        let mut spec = FindSpec::new("orders", doc! { "total": { "$gt": 100 } });
        spec.sort = Some(doc! { "total": -1 });

        let found = driver.find(spec.clone()).await.unwrap();
        let ids: Vec<&str> = found.iter().map(|d| d.get_str("_id").unwrap()).collect();
        assert_eq!(ids, vec!["O2", "O1"]);

        spec.skip = Some(1);
        spec.limit = Some(5);
        let found = driver.find(spec).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].get_str("_id").unwrap(), "O1");
    }

    #[tokio::test]
    async fn test_find_applies_projection() {
        let driver = seeded().await;
        let mut spec = FindSpec::new("orders", doc! { "_id": "O2" });
        spec.projection = Some(doc! { "name": 1, "customer.id": 1 });
        let found = driver.find(spec.clone()).await.unwrap();
        assert_eq!(found, vec![doc! { "_id": "O2", "name": "second", "customer": { "id": "C1" } }]);

        spec.projection = Some(doc! { "tags": 0, "customer": 0, "_id": 0 });
        let found = driver.find(spec).await.unwrap();
        assert_eq!(found, vec![doc! { "name": "second", "total": 480 }]);
    }

    #[tokio::test]
    async fn test_replace_matches_filter_and_keeps_id() {
        let driver = seeded().await;
        let matched = driver
            .replace("orders", doc! { "_id": "O1", "total": 120 }, doc! { "name": "renamed" }, false)
            .await
            .unwrap();
        assert_eq!(matched, 1);
        assert_eq!(driver.documents("orders")[0], doc! { "_id": "O1", "name": "renamed" });

        let matched = driver
            .replace("orders", doc! { "_id": "O1", "total": 120 }, doc! { "name": "again" }, false)
            .await
            .unwrap();
        assert_eq!(matched, 0);
    }

    #[tokio::test]
    async fn test_replace_upserts_with_filter_id() {
        let driver = MemoryDriver::new();
        let matched = driver
            .replace("customers", doc! { "_id": "C9" }, doc! { "name": "Zed" }, true)
            .await
            .unwrap();
        assert_eq!(matched, 1);
        assert_eq!(driver.documents("customers"), vec![doc! { "_id": "C9", "name": "Zed" }]);
    }

    #[tokio::test]
    async fn test_count_and_delete() {
        let driver = seeded().await;
        let count = driver
            .count(CountSpec {
                collection: "orders".into(),
                filter: doc! { "tags": "rush" },
                skip: None,
                limit: None,
                max_time: None,
            })
            .await
            .unwrap();
        assert_eq!(count, 2);

        let deleted = driver
            .delete(DeleteSpec {
                collection: "orders".into(),
                filter: doc! { "tags": "rush" },
                multi: false,
                max_time: None,
            })
            .await
            .unwrap();
        assert_eq!(deleted, 1);

        let deleted = driver
            .delete(DeleteSpec {
                collection: "orders".into(),
                filter: doc! {},
                multi: true,
                max_time: None,
            })
            .await
            .unwrap();
        assert_eq!(deleted, 2);
        assert!(driver.documents("orders").is_empty());
    }

    #[tokio::test]
    async fn test_unknown_collection_is_empty() {
        let driver = MemoryDriver::new();
        let found = driver.find(FindSpec::new("nothing", doc! {})).await.unwrap();
        assert!(found.is_empty());
        assert!(driver.collection_names().is_empty());
    }
}
