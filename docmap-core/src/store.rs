//! The datastore facade: typed saves, loads and queries over a [`Driver`].
//!
//! [`Datastore`] ties a shared [`Mapper`] to a driver. Writes encode the
//! entity, apply the optimistic version check and run post-save hooks.
//! Reads fetch raw documents, prefetch the documents their references point
//! at, and decode everything synchronously against one entity cache, so
//! shared and cyclic references come back as shared instances.
//!
//! # Example
//!
//! ```ignore
//! let mapper = Arc::new(Mapper::new(MapperOptions::default()));
//! let store = Datastore::new(mapper, MemoryDriver::new());
//!
//! let mut order = Order { id: Some("O1".into()), total: dec!(120), ..Order::default() };
//! store.save(&mut order).await?;
//!
//! let query = store.query::<Order>().filter("total >", 100);
//! let orders = store.find(&query).await?;
//! ```

use std::{collections::HashMap, fmt, sync::Arc};

use bson::{Bson, Document, doc, oid::ObjectId};
use indexmap::IndexMap;
use tracing::{debug, trace};
use uuid::Uuid;

use crate::{
    cache::{EntityCache, id_key},
    driver::Driver,
    entity::{AnyEntity, Entity, ReferenceToken, Shared},
    error::{OdmError, OdmResult},
    mapping::{Mapper, ReferenceResolver, SideTable},
    metadata::{ID_STORAGE_NAME, MappedType},
    page::{Page, PaginationParams},
    query::{DeleteSpec, FindSpec, IntoQueryValue, Query},
};

const DEFAULT_PREFETCH_DEPTH: usize = 4;

/// Produces identifiers for entities saved without one.
pub trait IdGenerator: Send + Sync + fmt::Debug {
    fn generate(&self, mapped: &MappedType) -> Bson;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct ObjectIdGenerator;

impl IdGenerator for ObjectIdGenerator {
    fn generate(&self, _mapped: &MappedType) -> Bson {
        Bson::ObjectId(ObjectId::new())
    }
}

/// Random UUIDs in hyphenated string form. They decode into both `String`
/// and `Uuid` identifier fields.
#[derive(Debug, Default, Clone, Copy)]
pub struct UuidGenerator;

impl IdGenerator for UuidGenerator {
    fn generate(&self, _mapped: &MappedType) -> Bson {
        Bson::String(Uuid::new_v4().to_string())
    }
}

/// Documents fetched ahead of a decode, looked up by reference token.
#[derive(Debug, Default, Clone)]
pub struct PrefetchedDocuments {
    documents: HashMap<(String, String), Document>,
}

fn token_key(collection: &str, id: &Bson) -> (String, String) {
    (collection.to_string(), id_key(id))
}

impl PrefetchedDocuments {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a stored document under its `_id`. Returns `false` for documents
    /// without one.
    pub fn insert(&mut self, collection: &str, document: Document) -> bool {
        let Some(id) = document.get(ID_STORAGE_NAME) else {
            return false;
        };
        let key = token_key(collection, id);
        self.documents.insert(key, document);
        true
    }

    pub fn get(&self, token: &ReferenceToken) -> Option<&Document> {
        self.documents.get(&token_key(&token.collection, &token.id))
    }

    pub fn contains(&self, token: &ReferenceToken) -> bool {
        self.get(token).is_some()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl ReferenceResolver for PrefetchedDocuments {
    fn resolve(&self, token: &ReferenceToken) -> OdmResult<Option<Document>> {
        Ok(self.get(token).cloned())
    }
}

/// State captured before a write, used to issue it and to undo the version
/// bump and any generated id when it fails.
struct Prepared {
    mapped: Arc<MappedType>,
    collection: String,
    id: Option<Bson>,
    /// Whether `id` came from the id generator rather than the entity.
    generated: bool,
    /// The version the stored document is expected to carry.
    version: Option<i64>,
}

/// Typed persistence over a driver.
#[derive(Debug)]
pub struct Datastore<D: Driver> {
    mapper: Arc<Mapper>,
    driver: D,
    ids: Option<Arc<dyn IdGenerator>>,
    prefetch_depth: usize,
}

impl<D: Driver> Datastore<D> {
    /// A datastore that leaves identifier generation to the driver.
    pub fn new(mapper: Arc<Mapper>, driver: D) -> Self {
        Self {
            mapper,
            driver,
            ids: None,
            prefetch_depth: DEFAULT_PREFETCH_DEPTH,
        }
    }

    /// Assigns identifiers to unsaved entities before they are encoded.
    pub fn with_id_generator(mut self, generator: impl IdGenerator + 'static) -> Self {
        self.ids = Some(Arc::new(generator));
        self
    }

    /// How many levels of references are fetched ahead of a decode. Deeper
    /// references are left unresolved.
    pub fn with_prefetch_depth(mut self, depth: usize) -> Self {
        self.prefetch_depth = depth;
        self
    }

    pub fn mapper(&self) -> &Arc<Mapper> {
        &self.mapper
    }

    pub fn driver(&self) -> &D {
        &self.driver
    }

    pub fn query<T: Entity>(&self) -> Query<'_, T> {
        self.mapper.query::<T>()
    }

    /// Saves one entity and returns its identifier.
    ///
    /// Referenced entities are written as tokens only; see
    /// [`save_cascade`](Self::save_cascade) to write them too. A versioned
    /// entity is inserted at version 1 and afterwards replaced only while the
    /// stored version still matches, otherwise the save fails with
    /// [`OdmError::ConcurrencyConflict`].
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::ConcurrencyConflict`] on a stale version,
    /// [`OdmError::Driver`] when the write fails, and mapping or conversion
    /// errors from encoding. On any error the entity's version and any id the
    /// generator assigned are restored.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mut order = Order::new("O1", dec!(250));
    /// let id = store.save(&mut order).await?;
    /// assert_eq!(order.version, 1);
    /// ```
    pub async fn save<T: Entity>(&self, entity: &mut T) -> OdmResult<Bson> {
        let prepared = self.prepare(entity)?;
        let mut document = match self.mapper.encode(entity) {
            Ok((document, _)) => document,
            Err(err) => {
                self.rollback(entity, &prepared)?;
                return Err(err);
            }
        };

        let id = match self.write(&prepared, document.clone()).await {
            Ok(id) => id,
            Err(err) => {
                self.rollback(entity, &prepared)?;
                return Err(err);
            }
        };
        if prepared.id.is_none() {
            self.mapper.set_id(entity, &prepared.mapped, &id)?;
            document.insert(ID_STORAGE_NAME, id.clone());
        }
        self.mapper.run_post_save(entity, &mut document)?;
        Ok(id)
    }

    /// Saves a shared entity together with every entity it references.
    ///
    /// Referenced entities are upserted by id without a version check, and
    /// each one's post-save hooks run once even when it is reached through
    /// several references.
    ///
    /// # Errors
    ///
    /// Fails like [`save`](Self::save). When any write fails, the root's
    /// version and generated id are restored; referenced entities already
    /// written stay written.
    pub async fn save_cascade<T: Entity>(&self, entity: &Shared<T>) -> OdmResult<Bson> {
        let erased = entity.erased();
        let prepared = {
            let mut guard = erased.write();
            self.prepare(&mut *guard)?
        };

        let (mut document, mut side) = match self.mapper.encode_erased(&erased) {
            Ok(encoded) => encoded,
            Err(err) => {
                let mut guard = erased.write();
                self.rollback(&mut *guard, &prepared)?;
                return Err(err);
            }
        };

        let written = match self.write_references(&side).await {
            Ok(()) => self.write(&prepared, document.clone()).await,
            Err(err) => Err(err),
        };
        let id = match written {
            Ok(id) => id,
            Err(err) => {
                let mut guard = erased.write();
                self.rollback(&mut *guard, &prepared)?;
                return Err(err);
            }
        };

        self.mapper.post_save_references(&mut side)?;
        {
            let mut guard = erased.write();
            if prepared.id.is_none() {
                self.mapper.set_id(&mut *guard, &prepared.mapped, &id)?;
                document.insert(ID_STORAGE_NAME, id.clone());
            }
            self.mapper.run_post_save(&mut *guard, &mut document)?;
        }
        Ok(id)
    }

    /// Loads the entity of type `T` with the given identifier.
    ///
    /// References are resolved up to the prefetch depth.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] if `T` declares no identifier,
    /// [`OdmError::Validation`] if `id` does not fit the id field, and
    /// [`OdmError::Driver`] when fetching fails.
    pub async fn get<T: Entity>(&self, id: impl IntoQueryValue) -> OdmResult<Option<Shared<T>>> {
        let mapped = self.mapper.describe::<T>()?;
        let id_field = mapped
            .id_field()
            .ok_or_else(|| OdmError::mapping(mapped.name(), "type declares no identifier"))?;
        let query = self.query::<T>().field(id_field.name()).equal(id).limit(1);
        Ok(self.find(&query).await?.into_iter().next())
    }

    /// Runs the query and decodes every matching entity against one entity
    /// cache, so results sharing a reference share the instance.
    ///
    /// # Errors
    ///
    /// Returns the query's validation or build error before anything reaches
    /// the driver, then driver and decode errors.
    pub async fn find<T: Entity>(&self, query: &Query<'_, T>) -> OdmResult<Vec<Shared<T>>> {
        let spec = query.find_spec()?;
        debug!(collection = %spec.collection, filter = %spec.filter, "find");
        let documents = self.driver.find(spec).await?;
        self.decode_all(documents).await
    }

    /// Loads one page of the query's results. The query's own skip and
    /// limit are replaced by the page's.
    pub async fn find_page<T: Entity>(
        &self,
        query: &Query<'_, T>,
        params: &PaginationParams,
    ) -> OdmResult<Page<Shared<T>>> {
        let mut count = query.count_spec()?;
        count.skip = None;
        count.limit = None;
        let total = self.driver.count(count).await?;

        let mut find = query.find_spec()?;
        find.skip = Some(params.offset());
        find.limit = Some(params.limit());
        let documents = self.driver.find(find).await?;
        let items = self.decode_all(documents).await?;
        Ok(Page::from_count(items, total, params))
    }

    /// # Errors
    ///
    /// Fails like [`find`](Self::find).
    pub async fn count<T: Entity>(&self, query: &Query<'_, T>) -> OdmResult<u64> {
        self.driver.count(query.count_spec()?).await
    }

    /// Deletes every entity the query matches.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Build`] if the query sorts, skips or limits, and
    /// otherwise fails like [`find`](Self::find).
    pub async fn delete_by_query<T: Entity>(&self, query: &Query<'_, T>) -> OdmResult<u64> {
        let spec = query.delete_spec(true)?;
        debug!(collection = %spec.collection, filter = %spec.filter, "delete");
        self.driver.delete(spec).await
    }

    /// Deletes one stored entity by its identifier.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] if the entity has no identifier set.
    pub async fn delete_entity<T: Entity>(&self, entity: &T) -> OdmResult<u64> {
        let token = self
            .mapper
            .entity_key(entity)?
            .ok_or_else(|| OdmError::mapping(entity.descriptor().name(), "entity has no identifier"))?;
        let spec = DeleteSpec {
            collection: token.collection,
            filter: doc! { ID_STORAGE_NAME: token.id },
            multi: false,
            max_time: None,
        };
        self.driver.delete(spec).await
    }

    /// Resolves the identifier and bumps the version ahead of encoding.
    fn prepare(&self, entity: &mut dyn AnyEntity) -> OdmResult<Prepared> {
        let mapped = self.mapper.metadata().describe_key(&entity.descriptor())?;
        let collection = mapped.require_collection()?.to_string();

        let mut id = self.mapper.id_of(&*entity, &mapped)?;
        let mut generated = false;
        if id.is_none() {
            if let Some(generator) = &self.ids {
                let fresh = generator.generate(&mapped);
                self.mapper.set_id(&mut *entity, &mapped, &fresh)?;
                id = Some(fresh);
                generated = true;
            }
        }

        let version = match mapped.version_field() {
            Some(_) => {
                let current = self.mapper.version_of(&*entity, &mapped)?.unwrap_or(0);
                self.mapper.set_version(&mut *entity, &mapped, current + 1)?;
                Some(current)
            }
            None => None,
        };

        Ok(Prepared {
            mapped,
            collection,
            id,
            generated,
            version,
        })
    }

    /// Restores what `prepare` changed on the entity after a failed save.
    fn rollback(&self, entity: &mut dyn AnyEntity, prepared: &Prepared) -> OdmResult<()> {
        if let Some(version) = prepared.version {
            self.mapper.set_version(&mut *entity, &prepared.mapped, version)?;
        }
        if prepared.generated {
            self.mapper.clear_id(entity, &prepared.mapped)?;
        }
        Ok(())
    }

    /// Upserts the referenced entities collected while encoding a cascade.
    async fn write_references(&self, side: &SideTable) -> OdmResult<()> {
        for entry in side.entries() {
            let collection = entry.mapped.require_collection()?;
            trace!(%collection, id = %entry.id, "cascading save");
            self.driver
                .replace(
                    collection,
                    doc! { ID_STORAGE_NAME: entry.id.clone() },
                    entry.document.clone(),
                    true,
                )
                .await?;
        }
        Ok(())
    }

    async fn write(&self, prepared: &Prepared, document: Document) -> OdmResult<Bson> {
        let collection = prepared.collection.as_str();
        match (prepared.version, &prepared.id) {
            (Some(0), _) | (None, None) => {
                let id = self.driver.insert(collection, document).await?;
                debug!(%collection, %id, "inserted entity");
                Ok(id)
            }
            (Some(expected), Some(id)) => {
                let version_key = prepared
                    .mapped
                    .version_field()
                    .map(|field| field.storage_name().to_string())
                    .ok_or_else(|| OdmError::mapping(prepared.mapped.name(), "type declares no version field"))?;
                let filter = doc! { ID_STORAGE_NAME: id.clone(), version_key: expected };
                let matched = self.driver.replace(collection, filter, document, false).await?;
                if matched == 0 {
                    debug!(%collection, %id, expected, "version check failed");
                    return Err(OdmError::ConcurrencyConflict {
                        collection: collection.to_string(),
                        id: id.clone(),
                        expected_version: expected,
                    });
                }
                debug!(%collection, %id, version = expected + 1, "replaced entity");
                Ok(id.clone())
            }
            (Some(expected), None) => Err(OdmError::mapping(
                prepared.mapped.name(),
                format!("entity at version {expected} has no identifier"),
            )),
            (None, Some(id)) => {
                self.driver
                    .replace(collection, doc! { ID_STORAGE_NAME: id.clone() }, document, true)
                    .await?;
                debug!(%collection, %id, "upserted entity");
                Ok(id.clone())
            }
        }
    }

    async fn decode_all<T: Entity>(&self, documents: Vec<Document>) -> OdmResult<Vec<Shared<T>>> {
        let mapped = self.mapper.describe::<T>()?;
        let prefetched = self.prefetch(&mapped, &documents).await?;
        let mut cache = EntityCache::new();
        documents
            .iter()
            .map(|document| self.mapper.decode_with::<T>(document, &mut cache, &prefetched))
            .collect()
    }

    /// Fetches the documents referenced from `roots`, level by level, up to
    /// the configured depth.
    ///
    /// Each fetched document is read as the type its referencing field
    /// declares, so the next level is found whether or not discriminators
    /// are stored.
    async fn prefetch(&self, mapped: &MappedType, roots: &[Document]) -> OdmResult<PrefetchedDocuments> {
        let mut prefetched = PrefetchedDocuments::new();
        let root_collection = mapped.require_collection()?;
        let mut pending = Vec::new();
        for document in roots {
            pending.extend(self.mapper.reference_tokens(document, mapped)?);
            prefetched.insert(root_collection, document.clone());
        }

        for depth in 0..self.prefetch_depth {
            let mut by_collection: IndexMap<String, Vec<(Bson, Arc<MappedType>)>> = IndexMap::new();
            for (token, target) in pending.drain(..) {
                if prefetched.contains(&token) {
                    continue;
                }
                let requested = by_collection.entry(token.collection).or_default();
                if !requested.iter().any(|(id, _)| id_key(id) == id_key(&token.id)) {
                    requested.push((token.id, target));
                }
            }
            if by_collection.is_empty() {
                break;
            }

            for (collection, requested) in by_collection {
                let ids: Vec<Bson> = requested.iter().map(|(id, _)| id.clone()).collect();
                let spec = FindSpec::new(collection.clone(), doc! { ID_STORAGE_NAME: { "$in": ids } });
                let documents = self.driver.find(spec).await?;
                trace!(
                    %collection,
                    requested = requested.len(),
                    found = documents.len(),
                    depth,
                    "prefetched references"
                );
                for document in documents {
                    let declared = document.get(ID_STORAGE_NAME).and_then(|id| {
                        requested
                            .iter()
                            .find(|(wanted, _)| id_key(wanted) == id_key(id))
                            .map(|(_, target)| target.clone())
                    });
                    if let Some(declared) = declared {
                        let target = self.mapper.concrete_type(&document, &declared)?;
                        pending.extend(self.mapper.reference_tokens(&document, &target)?);
                    }
                    prefetched.insert(&collection, document);
                }
            }
        }
        Ok(prefetched)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{options::MapperOptions, test_support::Customer};

    #[test]
    fn test_prefetched_documents_resolve_tokens() {
        let mut prefetched = PrefetchedDocuments::new();
        assert!(prefetched.insert("customers", doc! { "_id": "C1", "name": "Ada" }));
        assert!(!prefetched.insert("customers", doc! { "name": "no id" }));

        let found = prefetched.resolve(&ReferenceToken::new("customers", "C1")).unwrap();
        assert_eq!(found, Some(doc! { "_id": "C1", "name": "Ada" }));
        assert_eq!(prefetched.resolve(&ReferenceToken::new("orders", "C1")).unwrap(), None);
        assert!(!prefetched.contains(&ReferenceToken::new("customers", 1)));
        assert_eq!(prefetched.len(), 1);

        // Numeric ids match across integer widths.
        assert!(prefetched.insert("orders", doc! { "_id": 7_i32 }));
        assert!(prefetched.contains(&ReferenceToken::new("orders", 7_i64)));
    }

    #[test]
    fn test_generators() {
        let mapper = Mapper::new(MapperOptions::default());
        let mapped = mapper.describe::<Customer>().unwrap();

        assert!(matches!(ObjectIdGenerator.generate(&mapped), Bson::ObjectId(_)));
        match UuidGenerator.generate(&mapped) {
            Bson::String(text) => assert!(Uuid::parse_str(&text).is_ok()),
            other => panic!("unexpected id {other:?}"),
        }
    }
}
