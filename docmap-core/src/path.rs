//! Resolution of dotted field paths against mapped types.
//!
//! A path is written with declared field names (storage names are accepted
//! too) and resolved segment by segment to the canonical storage path used in
//! filter, sort and projection documents. Resolution follows embedded types,
//! container elements and the subtypes of interfaces.
//!
//! ```ignore
//! let resolved = mapper.resolve_path::<Customer>("address.city")?;
//! assert_eq!(resolved.path(), "address.town");
//! ```

use std::sync::Arc;

use tracing::debug;

use crate::{
    entity::{Entity, ReferenceToken},
    error::{OdmError, OdmResult},
    mapping::Mapper,
    metadata::{FieldKind, ID_STORAGE_NAME, MappedField, MappedType, MetadataRegistry},
    value::{ScalarFamily, ScalarType},
};

/// Text-index wildcard; paths containing it are never validated.
pub const WILDCARD: &str = "$**";

/// The outcome of resolving one path.
#[derive(Debug, Clone)]
pub struct ResolvedPath {
    path: String,
    field: Option<MappedField>,
    kind: Option<FieldKind>,
}

impl ResolvedPath {
    /// A path passed through uninterpreted.
    pub fn unvalidated(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            field: None,
            kind: None,
        }
    }

    /// The canonical storage path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The mapped field the last resolved segment named.
    pub fn field(&self) -> Option<&MappedField> {
        self.field.as_ref()
    }

    /// The value kind addressed by the full path, after array indexes and
    /// map keys. `None` when the path was not validated or ends inside a
    /// dynamic value.
    pub fn kind(&self) -> Option<&FieldKind> {
        self.kind.as_ref()
    }

    pub fn is_validated(&self) -> bool {
        self.kind.is_some()
    }
}

/// Where the resolver currently stands while walking segments.
enum Cursor {
    Type(Arc<MappedType>),
    Value(FieldKind),
}

/// Resolves dotted paths against the metadata registry.
pub struct PathResolver<'a> {
    metadata: &'a MetadataRegistry,
}

impl<'a> PathResolver<'a> {
    pub fn new(metadata: &'a MetadataRegistry) -> Self {
        Self { metadata }
    }

    pub fn resolve(&self, root: &Arc<MappedType>, path: &str) -> OdmResult<ResolvedPath> {
        if path.is_empty() {
            return Err(OdmError::path_not_found(path, root.name(), "path is empty"));
        }
        if path.split('.').any(|segment| segment == WILDCARD) {
            return Ok(ResolvedPath::unvalidated(path));
        }

        let not_found = |message: String| OdmError::path_not_found(path, root.name(), message);
        let mut storage: Vec<String> = Vec::new();
        let mut cursor = Cursor::Type(root.clone());
        let mut last_field: Option<MappedField> = None;
        let mut segments = path.split('.').peekable();

        while let Some(segment) = segments.next() {
            if segment.is_empty() {
                return Err(not_found("path contains an empty segment".to_string()));
            }
            cursor = match cursor {
                Cursor::Type(mapped) => {
                    let field = self
                        .find_field(&mapped, segment)?
                        .ok_or_else(|| not_found(format!("{} has no persisted field '{segment}'", mapped.name())))?;
                    storage.push(field.storage_name().to_string());
                    let kind = field.kind().clone();
                    last_field = Some(field);
                    Cursor::Value(kind)
                }
                Cursor::Value(kind) => match kind {
                    FieldKind::Collection(element) if is_positional(segment) => {
                        storage.push(segment.to_string());
                        Cursor::Value(*element)
                    }
                    // A field of the elements, addressed without an index.
                    FieldKind::Collection(element) => match *element {
                        FieldKind::Embedded(target) => {
                            let mapped = self.metadata.describe_key(&target)?;
                            let field = self.find_field(&mapped, segment)?.ok_or_else(|| {
                                not_found(format!("{} has no persisted field '{segment}'", mapped.name()))
                            })?;
                            storage.push(field.storage_name().to_string());
                            let kind = field.kind().clone();
                            last_field = Some(field);
                            Cursor::Value(kind)
                        }
                        FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Dynamic => {
                            return Ok(dynamic_tail(storage, segment, segments));
                        }
                        other => {
                            return Err(not_found(format!(
                                "elements of type {} have no field '{segment}'",
                                other.describe()
                            )));
                        }
                    },
                    FieldKind::Map(element) => {
                        storage.push(segment.to_string());
                        Cursor::Value(*element)
                    }
                    FieldKind::Embedded(target) => {
                        let mapped = self.metadata.describe_key(&target)?;
                        let field = self
                            .find_field(&mapped, segment)?
                            .ok_or_else(|| not_found(format!("{} has no persisted field '{segment}'", mapped.name())))?;
                        storage.push(field.storage_name().to_string());
                        let kind = field.kind().clone();
                        last_field = Some(field);
                        Cursor::Value(kind)
                    }
                    FieldKind::Reference(target) | FieldKind::Key(target) => {
                        let mapped = self.metadata.describe_key(&target)?;
                        let id_only = last_field.as_ref().is_some_and(MappedField::is_id_only);
                        match segment {
                            "id" | ID_STORAGE_NAME => {
                                if !id_only {
                                    storage.push(ReferenceToken::ID_KEY.to_string());
                                }
                                let id_field = mapped.id_field().cloned().ok_or_else(|| {
                                    not_found(format!("{} declares no identifier", mapped.name()))
                                })?;
                                let kind = id_field.kind().clone();
                                last_field = Some(id_field);
                                Cursor::Value(kind)
                            }
                            ReferenceToken::COLLECTION_KEY if !id_only => {
                                storage.push(ReferenceToken::COLLECTION_KEY.to_string());
                                Cursor::Value(FieldKind::Scalar(ScalarType::of::<String>(ScalarFamily::Text)))
                            }
                            _ => {
                                return Err(not_found(format!(
                                    "'{segment}' is not stored on a reference to {}; only its id can be queried",
                                    mapped.name()
                                )));
                            }
                        }
                    }
                    FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Dynamic => {
                        return Ok(dynamic_tail(storage, segment, segments));
                    }
                    other => {
                        return Err(not_found(format!(
                            "cannot descend into a value of type {} at '{segment}'",
                            other.describe()
                        )));
                    }
                },
            };
        }

        let kind = match cursor {
            Cursor::Value(kind) => kind,
            Cursor::Type(_) => return Err(not_found("path names no field".to_string())),
        };
        Ok(ResolvedPath {
            path: storage.join("."),
            field: last_field,
            kind: Some(kind),
        })
    }

    /// Finds a persisted field by declared name, then by storage name. On an
    /// interface, the subtypes are searched in registration order and the
    /// first match wins.
    fn find_field(&self, mapped: &MappedType, segment: &str) -> OdmResult<Option<MappedField>> {
        if let Some(field) = direct_field(mapped, segment) {
            return Ok(Some(field.clone()));
        }
        if !mapped.is_interface() {
            return Ok(None);
        }

        let mut found: Option<(String, MappedField)> = None;
        for subtype in mapped.subtypes() {
            let concrete = self.metadata.describe_key(subtype)?;
            let Some(field) = direct_field(&concrete, segment) else {
                continue;
            };
            match &found {
                None => found = Some((concrete.name().to_string(), field.clone())),
                Some((first, chosen)) => {
                    debug!(
                        interface = mapped.name(),
                        field = segment,
                        chosen = %first,
                        chosen_storage = chosen.storage_name(),
                        also = concrete.name(),
                        also_storage = field.storage_name(),
                        "interface field matched by several subtypes; first match wins"
                    );
                }
            }
        }
        Ok(found.map(|(_, field)| field))
    }
}

fn direct_field<'m>(mapped: &'m MappedType, segment: &str) -> Option<&'m MappedField> {
    mapped
        .field(segment)
        .filter(|field| !field.is_transient())
        .or_else(|| mapped.field_by_storage_name(segment))
}

/// Array index or positional operator.
fn is_positional(segment: &str) -> bool {
    segment == "$" || (segment.starts_with("$[") && segment.ends_with(']')) || segment.parse::<usize>().is_ok()
}

fn dynamic_tail<'s>(mut storage: Vec<String>, segment: &str, rest: impl Iterator<Item = &'s str>) -> ResolvedPath {
    storage.push(segment.to_string());
    storage.extend(rest.map(str::to_string));
    ResolvedPath::unvalidated(storage.join("."))
}

impl Mapper {
    /// Resolves a dotted path against the mapping of `T`.
    pub fn resolve_path<T: Entity>(&self, path: &str) -> OdmResult<ResolvedPath> {
        let root = self.describe::<T>()?;
        PathResolver::new(self.metadata()).resolve(&root, path)
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;
    use crate::{
        options::MapperOptions,
        test_support::{Customer, Drawing, Order},
    };

    fn mapper() -> Mapper {
        Mapper::new(MapperOptions::default())
    }

    #[test]
    fn test_embedded_rename_is_followed() {
        let resolved = mapper().resolve_path::<Customer>("address.city").unwrap();
        assert_eq!(resolved.path(), "address.town");
        assert_eq!(resolved.field().unwrap().name(), "city");

        // Storage names are accepted as well.
        let resolved = mapper().resolve_path::<Customer>("address.town").unwrap();
        assert_eq!(resolved.path(), "address.town");
    }

    #[test]
    fn test_id_resolves_to_storage_name() {
        assert_eq!(mapper().resolve_path::<Order>("id").unwrap().path(), "_id");
        assert_eq!(mapper().resolve_path::<Order>("_id").unwrap().path(), "_id");
    }

    #[test]
    fn test_collection_elements_and_indexes() {
        let mapper = mapper();
        assert_eq!(mapper.resolve_path::<Order>("lines.quantity").unwrap().path(), "lines.qty");
        assert_eq!(mapper.resolve_path::<Order>("lines.0.quantity").unwrap().path(), "lines.0.qty");
        assert_eq!(mapper.resolve_path::<Order>("lines.$.quantity").unwrap().path(), "lines.$.qty");

        let tags = mapper.resolve_path::<Order>("tags").unwrap();
        assert!(tags.kind().unwrap().is_collection());
        let element = mapper.resolve_path::<Order>("tags.1").unwrap();
        assert!(!element.kind().unwrap().is_collection());
    }

    #[test]
    fn test_map_keys_pass_through() {
        let resolved = mapper().resolve_path::<Order>("attrs.colour").unwrap();
        assert_eq!(resolved.path(), "attrs.colour");
        assert!(resolved.is_validated());
    }

    #[test]
    fn test_reference_allows_only_token_fields() {
        let mapper = mapper();
        assert_eq!(mapper.resolve_path::<Order>("customer.id").unwrap().path(), "customer.id");
        assert_eq!(mapper.resolve_path::<Order>("customer._id").unwrap().path(), "customer.id");
        assert_eq!(
            mapper.resolve_path::<Order>("customer.collection").unwrap().path(),
            "customer.collection"
        );

        let err = mapper.resolve_path::<Order>("customer.name").unwrap_err();
        assert!(err.is_path_not_found());

        // Id-only references store the bare id under the field itself.
        assert_eq!(mapper.resolve_path::<Drawing>("author.id").unwrap().path(), "author");
    }

    #[test]
    fn test_interface_fields_resolve_first_match() {
        let mapper = mapper();
        assert_eq!(mapper.resolve_path::<Drawing>("main.radius").unwrap().path(), "main.radius");
        assert_eq!(mapper.resolve_path::<Drawing>("shapes.side").unwrap().path(), "shapes.side");
        assert_eq!(mapper.resolve_path::<Drawing>("shapes.caption").unwrap().path(), "shapes.caption");
        // Circle is registered first and stores `label` unrenamed.
        assert_eq!(mapper.resolve_path::<Drawing>("main.label").unwrap().path(), "main.label");
    }

    #[test]
    fn test_dynamic_values_pass_through() {
        let resolved = mapper().resolve_path::<Customer>("extra.source.kind").unwrap();
        assert_eq!(resolved.path(), "extra.source.kind");
        assert!(!resolved.is_validated());
    }

    #[test]
    fn test_wildcard_is_not_validated() {
        let resolved = mapper().resolve_path::<Customer>("$**").unwrap();
        assert_eq!(resolved.path(), "$**");
        assert!(resolved.field().is_none());
    }

    #[test]
    fn test_unknown_and_transient_fields_are_not_found() {
        let mapper = mapper();
        let err = mapper.resolve_path::<Order>("missing").unwrap_err();
        assert!(err.is_path_not_found());
        assert!(err.to_string().contains("Order"));

        assert!(mapper.resolve_path::<Order>("scratch").is_err());
        assert!(mapper.resolve_path::<Order>("total.cents").is_err());
        assert!(mapper.resolve_path::<Order>("lines..sku").is_err());
    }
}
