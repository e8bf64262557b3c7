//! Typed query construction, validation and filter serialization.
//!
//! A [`Query`] is built against one mapped root type. Criteria are written
//! with declared field names and stay unvalidated while the query is being
//! built. The first request for an output (filter document, find spec,
//! count spec, ...) freezes the query: every path is resolved to its storage
//! path, every operator is checked against the field it addresses, and every
//! value is encoded through the codec registry. All failures are collected
//! and reported together as one [`OdmError::Validation`].
//!
//! ```ignore
//! let filter = mapper
//!     .query::<Order>()
//!     .filter("total >", 100)
//!     .filter("total <", 500)
//!     .filter_document()?;
//!
//! assert_eq!(filter, doc! { "total": { "$gt": 100, "$lt": 500 } });
//! ```
//!
//! Once frozen, a query can no longer be changed. Builder calls made after
//! that point are recorded and surface as [`OdmError::Build`].

mod criteria;
mod operator;
mod serialize;
mod spec;
mod validate;
mod value;

use std::{marker::PhantomData, sync::Arc, sync::OnceLock, time::Duration};

use bson::{Bson, Document};
use tracing::{debug, warn};

use crate::{
    entity::{Entity, ReferenceToken},
    error::{OdmError, OdmResult, ValidationFailure},
    mapping::Mapper,
    metadata::{FieldKind, MappedField, MappedType},
    page::PaginationParams,
    path::PathResolver,
    value::ScalarFamily,
};

pub use criteria::{Criteria, CriteriaSink, CriteriaVisitor, Criterion, Detached, FieldEnd, Leaf};
pub use operator::{FilterOperator, SortDirection};
pub use serialize::{FilterSerializer, to_filter_document};
pub use spec::{CountSpec, DeleteSpec, FindSpec, UpdateMode};
pub use validate::{is_compatible, validate_criterion};
pub use value::{IntoQueryValue, QueryValue};

/// A query over the entities of type `T`.
pub struct Query<'m, T: Entity> {
    mapper: &'m Mapper,
    criteria: Vec<Criteria>,
    sort: Vec<(String, SortDirection)>,
    projection: Vec<(String, bool)>,
    skip: Option<u64>,
    limit: Option<i64>,
    max_time: Option<Duration>,
    validate: bool,
    /// First builder misuse, reported when the query is frozen.
    error: Option<String>,
    frozen: OnceLock<FrozenQuery>,
    _marker: PhantomData<fn() -> T>,
}

impl Mapper {
    /// Starts a query over `T`.
    pub fn query<T: Entity>(&self) -> Query<'_, T> {
        Query::new(self)
    }
}

impl<'m, T: Entity> Query<'m, T> {
    /// An empty query over `T`; see also [`Mapper::query`].
    pub fn new(mapper: &'m Mapper) -> Self {
        Self {
            mapper,
            criteria: Vec::new(),
            sort: Vec::new(),
            projection: Vec::new(),
            skip: None,
            limit: None,
            max_time: None,
            validate: true,
            error: None,
            frozen: OnceLock::new(),
            _marker: PhantomData,
        }
    }

    /// Adds a criterion from a condition string such as `"total >="`.
    /// A bare path compares for equality.
    ///
    /// # Arguments
    ///
    /// * `condition` - A declared field path, optionally followed by an
    ///   operator such as `>`, `<=`, `!=`, `in` or `exists`
    /// * `value` - The operand, checked against the field when the query freezes
    ///
    /// An unknown operator is recorded and surfaces as [`OdmError::Build`].
    ///
    /// # Example
    ///
    /// ```ignore
    /// let query = mapper.query::<Order>().filter("total >", 100).filter("status", Status::Open);
    /// ```
    pub fn filter(mut self, condition: &str, value: impl IntoQueryValue) -> Self {
        match Criteria::condition(condition, value) {
            Ok(criteria) => self.push(criteria),
            Err(err) => self.fail(err.to_string()),
        }
        self
    }

    /// Starts a fluent criterion on `path`.
    pub fn field(self, path: impl Into<String>) -> FieldEnd<Self> {
        FieldEnd::new(self, path.into())
    }

    /// Adds a prebuilt criteria tree, typically a nested group.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let rush = Criteria::or([
    ///     Criteria::condition("tags", "rush")?,
    ///     Criteria::condition("total >=", 1000)?,
    /// ]);
    /// let query = mapper.query::<Order>().criteria(rush);
    /// ```
    pub fn criteria(mut self, criteria: Criteria) -> Self {
        self.push(criteria);
        self
    }

    /// Adds a group that matches when every one of `criteria` matches.
    pub fn and(self, criteria: impl IntoIterator<Item = Criteria>) -> Self {
        self.criteria(Criteria::and(criteria))
    }

    /// Adds a group that matches when any one of `criteria` matches.
    pub fn or(self, criteria: impl IntoIterator<Item = Criteria>) -> Self {
        self.criteria(Criteria::or(criteria))
    }

    /// Full text search over the collection's text index.
    pub fn search(self, text: impl Into<String>) -> Self {
        self.criteria(Criteria::Text {
            search: text.into(),
            language: None,
        })
    }

    pub fn search_in_language(self, text: impl Into<String>, language: impl Into<String>) -> Self {
        self.criteria(Criteria::Text {
            search: text.into(),
            language: Some(language.into()),
        })
    }

    /// Sorts by a comma separated list of paths. A leading `-` sorts that
    /// path descending: `"-total,customer.id"`.
    pub fn order(mut self, order: &str) -> Self {
        if !self.ensure_building() {
            return self;
        }
        for part in order.split(',').map(str::trim) {
            let (path, direction) = match part.strip_prefix('-') {
                Some(path) => (path, SortDirection::Desc),
                None => (part.strip_prefix('+').unwrap_or(part), SortDirection::Asc),
            };
            if path.is_empty() {
                self.fail(format!("empty sort path in '{order}'"));
                return self;
            }
            self.sort.push((path.to_string(), direction));
        }
        self
    }

    /// Appends a sort key. Keys apply in the order they were added.
    ///
    /// # Arguments
    ///
    /// * `path` - A declared field path, translated to its storage path on freeze
    /// * `direction` - Ascending or descending
    pub fn sort(mut self, path: impl Into<String>, direction: SortDirection) -> Self {
        if self.ensure_building() {
            self.sort.push((path.into(), direction));
        }
        self
    }

    /// Includes or excludes `path` in the returned documents.
    pub fn project(mut self, path: impl Into<String>, include: bool) -> Self {
        if self.ensure_building() {
            self.projection.push((path.into(), include));
        }
        self
    }

    /// Skips the first `skip` matching documents.
    pub fn skip(mut self, skip: u64) -> Self {
        if self.ensure_building() {
            self.skip = Some(skip);
        }
        self
    }

    /// Caps the number of returned documents. Follows the driver's reading
    /// of zero and negative limits.
    pub fn limit(mut self, limit: i64) -> Self {
        if self.ensure_building() {
            self.limit = Some(limit);
        }
        self
    }

    /// Sets skip and limit to fetch one page.
    pub fn page(self, params: &PaginationParams) -> Self {
        self.skip(params.offset()).limit(params.limit())
    }

    /// A server-side time limit handed to the driver as is.
    pub fn max_time(mut self, max_time: Duration) -> Self {
        if self.ensure_building() {
            self.max_time = Some(max_time);
        }
        self
    }

    /// Passes paths and values through uninterpreted, for documents whose
    /// shape is deliberately not mapped.
    pub fn disable_validation(mut self) -> Self {
        if self.ensure_building() {
            self.validate = false;
        }
        self
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen.get().is_some()
    }

    pub fn mapper(&self) -> &'m Mapper {
        self.mapper
    }

    /// The validated criteria tree.
    pub fn criteria_tree(&self) -> OdmResult<&[Criterion]> {
        Ok(&self.frozen()?.criteria)
    }

    /// The filter document in storage names, freezing the query.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Validation`] with every failing criterion,
    /// [`OdmError::Build`] for builder misuse, and [`OdmError::Mapping`]
    /// when the root type cannot be described.
    pub fn filter_document(&self) -> OdmResult<Document> {
        Ok(self.frozen()?.filter.clone())
    }

    /// Everything a driver needs to run this query as a find.
    ///
    /// # Errors
    ///
    /// Fails like [`filter_document`](Self::filter_document), and with
    /// [`OdmError::Validation`] for unknown sort or projection paths.
    pub fn find_spec(&self) -> OdmResult<FindSpec> {
        let frozen = self.frozen()?;
        Ok(FindSpec {
            collection: frozen.collection.clone(),
            filter: frozen.filter.clone(),
            sort: frozen.sort.clone(),
            projection: frozen.projection.clone(),
            skip: self.skip,
            limit: self.limit,
            max_time: self.max_time,
        })
    }

    /// # Errors
    ///
    /// Fails like [`filter_document`](Self::filter_document).
    pub fn count_spec(&self) -> OdmResult<CountSpec> {
        let frozen = self.frozen()?;
        Ok(CountSpec {
            collection: frozen.collection.clone(),
            filter: frozen.filter.clone(),
            skip: self.skip,
            limit: self.limit,
            max_time: self.max_time,
        })
    }

    /// The spec of a delete.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Build`] if the query sorts, skips or limits, and
    /// otherwise fails like [`filter_document`](Self::filter_document).
    pub fn delete_spec(&self, multi: bool) -> OdmResult<DeleteSpec> {
        self.reject_cursor_shaping("delete")?;
        let frozen = self.frozen()?;
        Ok(DeleteSpec {
            collection: frozen.collection.clone(),
            filter: frozen.filter.clone(),
            multi,
            max_time: self.max_time,
        })
    }

    /// The match filter of an update.
    ///
    /// # Errors
    ///
    /// Single and multi updates return [`OdmError::Build`] if the query
    /// sorts, skips or limits; upserts accept those. Otherwise fails like
    /// [`filter_document`](Self::filter_document).
    pub fn update_filter(&self, mode: UpdateMode) -> OdmResult<Document> {
        if mode.is_position_independent() {
            self.reject_cursor_shaping("update")?;
        }
        self.filter_document()
    }

    fn reject_cursor_shaping(&self, operation: &str) -> OdmResult<()> {
        let shaped = [
            (!self.sort.is_empty()).then_some("sort"),
            self.skip.map(|_| "skip"),
            self.limit.map(|_| "limit"),
        ];
        let shaped: Vec<&str> = shaped.into_iter().flatten().collect();
        if shaped.is_empty() {
            Ok(())
        } else {
            Err(OdmError::build(format!(
                "{} cannot be used with {operation}",
                shaped.join(", ")
            )))
        }
    }

    fn push(&mut self, criteria: Criteria) {
        if self.ensure_building() {
            self.criteria.push(criteria);
        }
    }

    fn fail(&mut self, message: String) {
        self.error.get_or_insert(message);
    }

    fn ensure_building(&mut self) -> bool {
        if self.is_frozen() {
            self.fail("query is frozen; start a new query to change it".to_string());
            return false;
        }
        true
    }

    fn frozen(&self) -> OdmResult<&FrozenQuery> {
        if let Some(error) = &self.error {
            return Err(OdmError::build(error.clone()));
        }
        if let Some(frozen) = self.frozen.get() {
            return Ok(frozen);
        }
        let frozen = self.freeze()?;
        Ok(self.frozen.get_or_init(|| frozen))
    }

    fn freeze(&self) -> OdmResult<FrozenQuery> {
        let root = self.mapper.describe::<T>()?;
        let collection = root.require_collection()?.to_string();
        let mut freezer = Freezer {
            mapper: self.mapper,
            validate: self.validate,
            failures: Vec::new(),
        };

        let criteria = freezer.criteria(Some(&root), &self.criteria)?;
        let sort = freezer.paths(&root, self.sort.iter().map(|(path, direction)| (path, Bson::Int32(direction.as_i32()))));
        let projection = freezer.paths(&root, self.projection.iter().map(|(path, include)| (path, Bson::Int32(i32::from(*include)))));
        if let Some(projection) = &projection {
            freezer.check_projection(projection);
        }

        if !freezer.failures.is_empty() {
            warn!(
                type_name = root.name(),
                failures = freezer.failures.len(),
                "query failed validation"
            );
            for failure in &freezer.failures {
                debug!(type_name = root.name(), %failure, "validation failure");
            }
            return Err(OdmError::Validation {
                root: root.name().to_string(),
                failures: freezer.failures,
            });
        }

        let filter = to_filter_document(&criteria)?;
        debug!(type_name = root.name(), %collection, %filter, "froze query");
        Ok(FrozenQuery {
            root,
            collection,
            criteria,
            filter,
            sort,
            projection,
        })
    }
}

impl<'m, T: Entity> CriteriaSink for Query<'m, T> {
    type Output = Self;

    fn accept(mut self, criteria: Criteria) -> Self {
        self.push(criteria);
        self
    }
}

impl<T: Entity> std::fmt::Debug for Query<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Query")
            .field("type", &std::any::type_name::<T>())
            .field("criteria", &self.criteria)
            .field("sort", &self.sort)
            .field("projection", &self.projection)
            .field("skip", &self.skip)
            .field("limit", &self.limit)
            .field("validate", &self.validate)
            .field("frozen", &self.is_frozen())
            .finish()
    }
}

/// The validated, serialized state of a query.
#[derive(Debug, Clone)]
pub struct FrozenQuery {
    root: Arc<MappedType>,
    collection: String,
    criteria: Vec<Criterion>,
    filter: Document,
    sort: Option<Document>,
    projection: Option<Document>,
}

impl FrozenQuery {
    pub fn root(&self) -> &Arc<MappedType> {
        &self.root
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn criteria(&self) -> &[Criterion] {
        &self.criteria
    }

    pub fn filter(&self) -> &Document {
        &self.filter
    }

    pub fn sort(&self) -> Option<&Document> {
        self.sort.as_ref()
    }

    pub fn projection(&self) -> Option<&Document> {
        self.projection.as_ref()
    }
}

/// Turns builder criteria into frozen ones, collecting failures.
struct Freezer<'a> {
    mapper: &'a Mapper,
    validate: bool,
    failures: Vec<ValidationFailure>,
}

impl Freezer<'_> {
    /// `root` is `None` below a dynamic value, where nothing is validated.
    fn criteria(&mut self, root: Option<&Arc<MappedType>>, criteria: &[Criteria]) -> OdmResult<Vec<Criterion>> {
        let mut frozen = Vec::with_capacity(criteria.len());
        for criteria in criteria {
            if let Some(criterion) = self.criterion(root, criteria)? {
                frozen.push(criterion);
            }
        }
        Ok(frozen)
    }

    fn criterion(&mut self, root: Option<&Arc<MappedType>>, criteria: &Criteria) -> OdmResult<Option<Criterion>> {
        let root = root.filter(|_| self.validate);
        match criteria {
            Criteria::Field {
                path,
                operator,
                value,
                negated,
                options,
            } => {
                let (storage_path, field) = match root {
                    Some(root) => match validate_criterion(self.mapper.metadata(), root, path, *operator, value) {
                        Ok(resolved) => (resolved.path().to_string(), resolved.field().cloned()),
                        Err(mut failures) => {
                            self.failures.append(&mut failures);
                            return Ok(None);
                        }
                    },
                    None => (path.clone(), None),
                };

                let hint = field
                    .as_ref()
                    .filter(|_| operator.is_equality_family() || operator.takes_candidates());
                let encoded = match value.encode(self.mapper, hint) {
                    Ok(encoded) => encoded,
                    Err(err) if err.is_conversion() => {
                        self.failures.push(ValidationFailure::new(path, Some(*operator), err.to_string()));
                        return Ok(None);
                    }
                    Err(err) => return Err(err),
                };
                let encoded = if hint.is_some_and(MappedField::is_id_only) {
                    bare_ids(encoded)
                } else {
                    encoded
                };
                Ok(Some(Criterion::Leaf(Leaf::new(
                    storage_path,
                    *operator,
                    encoded,
                    *negated,
                    options.clone(),
                ))))
            }
            Criteria::ElemMatch {
                path,
                criteria,
                negated,
            } => {
                let Some(root) = root else {
                    let children = self.criteria(None, criteria)?;
                    return Ok(Some(Criterion::ElemMatch {
                        path: path.clone(),
                        children,
                        negated: *negated,
                    }));
                };
                let resolved = match PathResolver::new(self.mapper.metadata()).resolve(root, path) {
                    Ok(resolved) => resolved,
                    Err(err) => {
                        self.failures
                            .push(ValidationFailure::new(path, Some(FilterOperator::ElemMatch), err.to_string()));
                        return Ok(None);
                    }
                };
                let element = match resolved.kind() {
                    None => None,
                    Some(FieldKind::Collection(element)) => match element.as_ref() {
                        FieldKind::Embedded(target) => Some(self.mapper.metadata().describe_key(target)?),
                        FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Dynamic => None,
                        other => {
                            self.failures.push(ValidationFailure::new(
                                path,
                                Some(FilterOperator::ElemMatch),
                                format!("elements of type {} have no fields to match", other.describe()),
                            ));
                            return Ok(None);
                        }
                    },
                    Some(other) => {
                        self.failures.push(ValidationFailure::new(
                            path,
                            Some(FilterOperator::ElemMatch),
                            format!("field of type {} is not a collection", other.describe()),
                        ));
                        return Ok(None);
                    }
                };
                let children = self.criteria(element.as_ref(), criteria)?;
                Ok(Some(Criterion::ElemMatch {
                    path: resolved.path().to_string(),
                    children,
                    negated: *negated,
                }))
            }
            Criteria::Text { search, language } => Ok(Some(Criterion::Text {
                search: search.clone(),
                language: language.clone(),
            })),
            Criteria::And(children) | Criteria::Or(children) => {
                let is_and = matches!(criteria, Criteria::And(_));
                if children.is_empty() {
                    let name = if is_and { "$and" } else { "$or" };
                    self.failures.push(ValidationFailure::new(name, None, "group has no criteria"));
                    return Ok(None);
                }
                let children = self.criteria(root, children)?;
                Ok(Some(if is_and {
                    Criterion::And(children)
                } else {
                    Criterion::Or(children)
                }))
            }
        }
    }

    /// Builds a sort or projection document over resolved paths.
    fn paths<'p>(
        &mut self,
        root: &Arc<MappedType>,
        entries: impl Iterator<Item = (&'p String, Bson)>,
    ) -> Option<Document> {
        let resolver = PathResolver::new(self.mapper.metadata());
        let mut document = Document::new();
        for (path, value) in entries {
            let storage_path = if self.validate {
                match resolver.resolve(root, path) {
                    Ok(resolved) => resolved.path().to_string(),
                    Err(err) => {
                        self.failures.push(ValidationFailure::new(path.as_str(), None, err.to_string()));
                        continue;
                    }
                }
            } else {
                path.clone()
            };
            document.insert(storage_path, value);
        }
        (!document.is_empty()).then_some(document)
    }

    /// Inclusion and exclusion cannot be mixed, except for excluding `_id`.
    fn check_projection(&mut self, projection: &Document) {
        let mut included = false;
        let mut excluded = false;
        for (path, value) in projection {
            match value {
                Bson::Int32(1) => included = true,
                _ if path == "_id" => {}
                _ => excluded = true,
            }
        }
        if included && excluded {
            self.failures.push(ValidationFailure::new(
                "projection",
                None,
                "cannot mix included and excluded fields",
            ));
        }
    }
}

/// Reduces reference tokens to their ids, for fields stored as bare ids.
fn bare_ids(value: Bson) -> Bson {
    match value {
        Bson::Document(mut token) if token.contains_key(ReferenceToken::ID_KEY) => {
            token.remove(ReferenceToken::ID_KEY).unwrap_or(Bson::Null)
        }
        Bson::Array(items) => Bson::Array(items.into_iter().map(bare_ids).collect()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use bson::doc;
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        options::MapperOptions,
        test_support::{Drawing, Order, Status},
    };

    fn mapper() -> Mapper {
        Mapper::new(MapperOptions::default())
    }

    #[test]
    fn test_range_on_decimal_field_merges_under_one_key() {
        let mapper = mapper();
        let filter = mapper
            .query::<Order>()
            .filter("total >", 100)
            .filter("total <", 500)
            .filter_document()
            .unwrap();
        assert_eq!(filter, doc! { "total": { "$gt": 100, "$lt": 500 } });
    }

    #[test]
    fn test_two_equalities_on_one_path_are_anded() {
        let mapper = mapper();
        let filter = mapper
            .query::<Order>()
            .filter("status", Status::Open)
            .field("status")
            .equal(Status::Shipped)
            .filter_document()
            .unwrap();
        assert_eq!(
            filter,
            doc! { "$and": [{ "status": "open" }, { "status": "shipped" }] }
        );
    }

    #[test]
    fn test_paths_resolve_to_storage_names() {
        let mapper = mapper();
        let query = mapper
            .query::<Order>()
            .field("lines")
            .elem_match([
                Criteria::field("sku").equal("A-1"),
                Criteria::field("quantity").greater_than_or_eq(2),
            ])
            .field("customer.id")
            .equal("C1")
            .field("tags")
            .has_any_of(vec!["red".to_string(), "blue".to_string()]);
        assert_eq!(
            query.filter_document().unwrap(),
            doc! {
                "lines": { "$elemMatch": { "sku": "A-1", "qty": { "$gte": 2 } } },
                "customer.id": "C1",
                "tags": { "$in": ["red", "blue"] },
            }
        );
    }

    #[test]
    fn test_every_failure_is_reported() {
        let mapper = mapper();
        let err = mapper
            .query::<Order>()
            .filter("missing", 1)
            .field("total")
            .size_eq(2)
            .filter("tags exists", "yes".to_string())
            .field("tags")
            .modulo(2, 0)
            .filter_document()
            .unwrap_err();
        assert!(err.is_validation());
        let paths: Vec<&str> = err.failures().iter().map(|failure| failure.path.as_str()).collect();
        assert_eq!(paths, vec!["missing", "total", "tags", "tags"]);
        assert_eq!(err.failures()[1].operator, Some(FilterOperator::Size));
    }

    #[test]
    fn test_disabled_validation_passes_paths_through() {
        let mapper = mapper();
        let filter = mapper
            .query::<Order>()
            .disable_validation()
            .filter("whatever.nested >=", 3)
            .field("total")
            .size_eq(2)
            .filter_document()
            .unwrap();
        assert_eq!(
            filter,
            doc! { "whatever.nested": { "$gte": 3 }, "total": { "$size": 2 } }
        );
    }

    #[test]
    fn test_sort_projection_and_cursor() {
        let mapper = mapper();
        let spec = mapper
            .query::<Order>()
            .order("-total, lines.quantity")
            .project("total", true)
            .project("lines.sku", true)
            .page(&PaginationParams::new(3, 20))
            .max_time(Duration::from_secs(2))
            .find_spec()
            .unwrap();
        assert_eq!(spec.collection, "orders");
        assert_eq!(spec.sort, Some(doc! { "total": -1, "lines.qty": 1 }));
        assert_eq!(spec.projection, Some(doc! { "total": 1, "lines.sku": 1 }));
        assert_eq!(spec.skip, Some(40));
        assert_eq!(spec.limit, Some(20));
        assert_eq!(spec.max_time, Some(Duration::from_secs(2)));
        assert_eq!(spec.filter, Document::new());
    }

    #[test]
    fn test_unresolved_sort_and_mixed_projection_fail() {
        let mapper = mapper();
        let err = mapper
            .query::<Order>()
            .order("nope")
            .project("total", true)
            .project("tags", false)
            .find_spec()
            .unwrap_err();
        let paths: Vec<&str> = err.failures().iter().map(|failure| failure.path.as_str()).collect();
        assert_eq!(paths, vec!["nope", "projection"]);
    }

    #[test]
    fn test_delete_and_update_reject_cursor_shaping() {
        let mapper = mapper();
        let query = mapper.query::<Order>().filter("total >", 1).limit(5).order("total");

        let err = query.delete_spec(true).unwrap_err();
        assert!(err.is_build());
        assert!(err.to_string().contains("sort, limit"));
        assert!(query.update_filter(UpdateMode::Single).unwrap_err().is_build());
        assert!(query.update_filter(UpdateMode::Multi).unwrap_err().is_build());
        assert!(query.update_filter(UpdateMode::Upsert).is_ok());

        let plain = mapper.query::<Order>().filter("total >", 1);
        let delete = plain.delete_spec(false).unwrap();
        assert_eq!(delete.filter, doc! { "total": { "$gt": 1 } });
        assert!(!delete.multi);
    }

    #[test]
    fn test_frozen_query_rejects_changes() {
        let mapper = mapper();
        let query = mapper.query::<Order>().filter("total >", 1);
        query.filter_document().unwrap();
        assert!(query.is_frozen());

        let err = query.limit(3).find_spec().unwrap_err();
        assert!(err.is_build());
    }

    #[test]
    fn test_bad_condition_is_a_build_error() {
        let mapper = mapper();
        let err = mapper.query::<Order>().filter("total ~", 1).filter_document().unwrap_err();
        assert!(err.is_build());
    }

    #[test]
    fn test_negation_and_groups() {
        let mapper = mapper();
        let filter = mapper
            .query::<Order>()
            .or([
                Criteria::field("total").less_than(10),
                Criteria::field("tags").not().has_any_of(vec!["void".to_string()]),
            ])
            .field("id")
            .not()
            .starts_with("tmp.")
            .filter_document()
            .unwrap();
        assert_eq!(
            filter,
            doc! {
                "$or": [{ "total": { "$lt": 10 } }, { "tags": { "$nin": ["void"] } }],
                "_id": { "$not": { "$regex": "^tmp\\." } },
            }
        );
    }

    #[test]
    fn test_empty_group_is_a_failure() {
        let mapper = mapper();
        let err = mapper.query::<Order>().or(Vec::new()).filter_document().unwrap_err();
        assert_eq!(err.failures()[0].path, "$or");
    }

    #[test]
    fn test_id_only_reference_compares_bare_ids() {
        let mapper = mapper();
        let token = QueryValue::raw(doc! { "collection": "people", "id": "P1" });
        let filter = mapper
            .query::<Drawing>()
            .disable_validation()
            .filter("author", token)
            .filter_document()
            .unwrap();
        // Without validation there is no field hint, so the token is kept.
        assert_eq!(filter, doc! { "author": { "collection": "people", "id": "P1" } });

        let filter = mapper
            .query::<Drawing>()
            .filter("author.id", "P1")
            .filter_document()
            .unwrap();
        assert_eq!(filter, doc! { "author": "P1" });
    }

    #[test]
    fn test_text_search_and_interface_paths() {
        let mapper = mapper();
        let filter = mapper
            .query::<Drawing>()
            .search_in_language("sketch", "en")
            .filter("shapes.label", "north")
            .filter_document()
            .unwrap();
        assert_eq!(
            filter,
            doc! {
                "$text": { "$search": "sketch", "$language": "en" },
                "shapes.label": "north",
            }
        );
    }
}
