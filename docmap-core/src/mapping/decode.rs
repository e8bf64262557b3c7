use std::sync::Arc;

use bson::{Bson, Document};
use tracing::trace;

use crate::{
    cache::EntityCache,
    entity::{AnyEntity, Entity, ErasedShared, Ref, ReferenceToken, Shared},
    error::{OdmError, OdmResult},
    mapping::{Mapper, keys::unescape_key},
    metadata::{FieldKind, HookKind, ID_STORAGE_NAME, MappedField, MappedType, TypeKind},
    value::{FieldValue, ReferenceValue, bson_type_name},
};

/// Loads a stored document by collection and id.
///
/// Decoding consults the resolver for every reference it meets that is not
/// already in the entity cache. A reference the resolver cannot supply stays
/// [`Ref::Unresolved`] and can be [materialized](Mapper::materialize) later.
pub trait ReferenceResolver {
    fn resolve(&self, token: &ReferenceToken) -> OdmResult<Option<Document>>;
}

impl<F> ReferenceResolver for F
where
    F: Fn(&ReferenceToken) -> OdmResult<Option<Document>>,
{
    fn resolve(&self, token: &ReferenceToken) -> OdmResult<Option<Document>> {
        self(token)
    }
}

struct DecodeState<'a> {
    cache: &'a mut EntityCache,
    resolver: Option<&'a dyn ReferenceResolver>,
}

impl Mapper {
    /// Decodes a document into a shared instance, leaving references unresolved
    /// unless they are already in `cache`.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] for a document without `_id` or with an
    /// unknown discriminator, [`OdmError::Conversion`] when a stored value
    /// does not fit its field, and whatever a load hook reports.
    pub fn decode<T: Entity>(&self, document: &Document, cache: &mut EntityCache) -> OdmResult<Shared<T>> {
        self.decode_typed(document, cache, None)
    }

    /// Like [`decode`](Self::decode), loading references that are not cached
    /// through `resolver`.
    ///
    /// # Arguments
    ///
    /// * `document` - The stored document of the root entity
    /// * `cache` - The identity map shared by every decode of one operation
    /// * `resolver` - Supplies referenced documents, e.g. [`PrefetchedDocuments`](crate::store::PrefetchedDocuments)
    ///
    /// # Errors
    ///
    /// Fails like [`decode`](Self::decode), and with the resolver's own errors.
    pub fn decode_with<T: Entity>(
        &self,
        document: &Document,
        cache: &mut EntityCache,
        resolver: &dyn ReferenceResolver,
    ) -> OdmResult<Shared<T>> {
        self.decode_typed(document, cache, Some(resolver))
    }

    /// Decodes a standalone entity and takes it out of its shared handle.
    ///
    /// Fails when the decoded graph still points back at the entity.
    pub fn decode_owned<T: Entity>(&self, document: &Document) -> OdmResult<T> {
        let shared = {
            let mut cache = EntityCache::new();
            self.decode::<T>(document, &mut cache)?
        };
        shared.try_unwrap().map_err(|_| {
            OdmError::mapping(
                std::any::type_name::<T>(),
                "decoded entity is still referenced from its own object graph",
            )
        })
    }

    fn decode_typed<T: Entity>(
        &self,
        document: &Document,
        cache: &mut EntityCache,
        resolver: Option<&dyn ReferenceResolver>,
    ) -> OdmResult<Shared<T>> {
        let mapped = self.describe::<T>()?;
        let erased = self.decode_any(document, &mapped, cache, resolver)?;
        erased.downcast::<T>().ok_or_else(|| {
            OdmError::mapping(&mapped.name, "document decoded to another type")
        })
    }

    /// Decodes a document into the type selected by `target` and, for
    /// interfaces, the stored discriminator.
    pub fn decode_any(
        &self,
        document: &Document,
        target: &Arc<MappedType>,
        cache: &mut EntityCache,
        resolver: Option<&dyn ReferenceResolver>,
    ) -> OdmResult<ErasedShared> {
        let mut state = DecodeState { cache, resolver };
        self.decode_shared(document, target, &mut state)
    }

    /// Loads the target of an unresolved reference. Returns whether the
    /// reference is loaded afterwards.
    pub fn materialize<T: Entity>(
        &self,
        reference: &mut Ref<T>,
        cache: &mut EntityCache,
        resolver: &dyn ReferenceResolver,
    ) -> OdmResult<bool> {
        let Ref::Unresolved(token) = reference else {
            return Ok(true);
        };
        let mapped = self.describe::<T>()?;
        let loaded = match cache.get(mapped.type_id(), &token.id) {
            Some(cached) => cached,
            None => {
                let Some(document) = resolver.resolve(token)? else {
                    return Ok(false);
                };
                let mut state = DecodeState {
                    cache,
                    resolver: Some(resolver),
                };
                self.decode_shared(&document, &mapped, &mut state)?
            }
        };
        let typed = loaded
            .downcast::<T>()
            .ok_or_else(|| OdmError::mapping(&mapped.name, "referenced document decoded to another type"))?;
        *reference = Ref::Loaded(typed);
        Ok(true)
    }

    /// Every reference token stored in `document`, including those inside
    /// embedded values and containers, without duplicates.
    ///
    /// Each token comes with the type its field declares as the target, so a
    /// caller fetching the referenced document knows how to read it without
    /// relying on a stored discriminator.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] when a referenced or embedded type cannot
    /// be described, or an embedded interface value carries no known
    /// discriminator.
    pub fn reference_tokens(
        &self,
        document: &Document,
        mapped: &MappedType,
    ) -> OdmResult<Vec<(ReferenceToken, Arc<MappedType>)>> {
        let mut tokens = Vec::new();
        self.collect_document_tokens(document, mapped, &mut tokens)?;
        let mut unique: Vec<(ReferenceToken, Arc<MappedType>)> = Vec::with_capacity(tokens.len());
        for (token, target) in tokens {
            if !unique.iter().any(|(seen, _)| *seen == token) {
                unique.push((token, target));
            }
        }
        Ok(unique)
    }

    /// Decodes a single stored value for `field` outside any document.
    pub(crate) fn decode_field_value(&self, value: &Bson, field: &MappedField) -> OdmResult<FieldValue> {
        let mut cache = EntityCache::new();
        let mut state = DecodeState {
            cache: &mut cache,
            resolver: None,
        };
        self.decode_value(value, &field.kind, field, &mut state)
    }

    /// Selects the concrete type of a stored document declared as `target`.
    /// Interfaces are narrowed by the stored discriminator; any other type is
    /// returned as is.
    pub(crate) fn concrete_type(&self, document: &Document, target: &Arc<MappedType>) -> OdmResult<Arc<MappedType>> {
        if !target.is_interface() {
            return Ok(target.clone());
        }
        match document.get(&self.options.discriminator_key) {
            Some(Bson::String(discriminator)) => self
                .metadata
                .subtype_for(target, discriminator)?
                .ok_or_else(|| OdmError::mapping(&target.name, format!("unknown discriminator '{discriminator}'"))),
            _ => Err(OdmError::mapping(
                &target.name,
                "document has no discriminator to select a subtype",
            )),
        }
    }

    fn decode_shared(
        &self,
        document: &Document,
        target: &Arc<MappedType>,
        state: &mut DecodeState<'_>,
    ) -> OdmResult<ErasedShared> {
        let mapped = self.concrete_type(document, target)?;
        let shell = if mapped.kind() == TypeKind::Entity {
            let id = match document.get(ID_STORAGE_NAME) {
                Some(Bson::Null) | None => {
                    return Err(OdmError::mapping(&mapped.name, "stored document has no _id"));
                }
                Some(id) => id,
            };
            let (shell, present) = state.cache.get_or_reserve(&mapped, id)?;
            if present {
                return Ok(shell);
            }
            shell
        } else {
            mapped.new_shared()?
        };

        let mut raw = document.clone();
        {
            let mut guard = shell.write();
            self.run_hooks(HookKind::PreLoad, &mapped, &mut *guard, &mut raw)?;
        }
        // No lock is held while fields decode: a cycle may hand this same shell back.
        let values = self.decode_fields(&raw, &mapped, state)?;
        {
            let mut guard = shell.write();
            for (name, value) in values {
                guard.write_field(name, value)?;
            }
            self.run_hooks(HookKind::PostLoad, &mapped, &mut *guard, &mut raw)?;
        }
        Ok(shell)
    }

    fn decode_boxed(
        &self,
        document: &Document,
        target: &Arc<MappedType>,
        state: &mut DecodeState<'_>,
    ) -> OdmResult<Box<dyn AnyEntity>> {
        let mapped = self.concrete_type(document, target)?;
        let mut entity = mapped.new_boxed()?;
        let mut raw = document.clone();
        self.run_hooks(HookKind::PreLoad, &mapped, &mut *entity, &mut raw)?;
        for (name, value) in self.decode_fields(&raw, &mapped, state)? {
            entity.write_field(name, value)?;
        }
        self.run_hooks(HookKind::PostLoad, &mapped, &mut *entity, &mut raw)?;
        Ok(entity)
    }

    fn decode_fields(
        &self,
        document: &Document,
        mapped: &MappedType,
        state: &mut DecodeState<'_>,
    ) -> OdmResult<Vec<(&'static str, FieldValue)>> {
        if self.options.strict_decode {
            let unknown = document
                .keys()
                .find(|key| **key != self.options.discriminator_key && mapped.field_by_storage_name(key).is_none());
            if let Some(key) = unknown {
                return Err(OdmError::mapping(&mapped.name, format!("document key '{key}' has no mapped field")));
            }
        }

        let mut values = Vec::new();
        for field in mapped.persisted_fields() {
            let Some(stored) = document.get(&field.storage_name) else {
                continue;
            };
            // A null cannot be written into a non-optional field; it keeps its default.
            if matches!(stored, Bson::Null | Bson::Undefined) && !field.nullable {
                continue;
            }
            values.push((field.name, self.decode_value(stored, &field.kind, field, state)?));
        }
        Ok(values)
    }

    fn decode_value(
        &self,
        value: &Bson,
        kind: &FieldKind,
        field: &MappedField,
        state: &mut DecodeState<'_>,
    ) -> OdmResult<FieldValue> {
        if matches!(value, Bson::Null | Bson::Undefined) {
            return Ok(FieldValue::Null);
        }
        match kind {
            FieldKind::Scalar(scalar) => {
                let ctx = self.codec_context(Some(field));
                Ok(self
                    .codecs
                    .decode(value, scalar, &ctx)?
                    .map_or(FieldValue::Null, FieldValue::Scalar))
            }
            FieldKind::Embedded(target) => {
                let Bson::Document(embedded) = value else {
                    return Err(OdmError::conversion(
                        bson_type_name(value),
                        target.name(),
                        format!("field '{}' expects an embedded document", field.name),
                    ));
                };
                let declared = self.metadata.describe_key(target)?;
                self.decode_boxed(embedded, &declared, state).map(FieldValue::Embedded)
            }
            FieldKind::Reference(target) => {
                let mapped = self.metadata.describe_key(target)?;
                let token = self.read_token(value, &mapped, field)?;
                self.decode_reference(token, &mapped, state)
            }
            FieldKind::Key(target) => {
                let mapped = self.metadata.describe_key(target)?;
                self.read_token(value, &mapped, field).map(FieldValue::Key)
            }
            FieldKind::Collection(element) => match value {
                Bson::Array(items) => items
                    .iter()
                    .map(|item| self.decode_value(item, element, field, state))
                    .collect::<OdmResult<Vec<_>>>()
                    .map(FieldValue::List),
                // A lone value where a list is expected becomes a one-element list.
                single => Ok(FieldValue::List(vec![self.decode_value(single, element, field, state)?])),
            },
            FieldKind::Map(element) => {
                let Bson::Document(entries) = value else {
                    return Err(OdmError::conversion(
                        bson_type_name(value),
                        kind.describe(),
                        format!("field '{}' expects a document of entries", field.name),
                    ));
                };
                let mut decoded = Vec::with_capacity(entries.len());
                for (key, item) in entries {
                    let key = unescape_key(key, self.options.escape_map_keys);
                    decoded.push((key, self.decode_value(item, element, field, state)?));
                }
                Ok(FieldValue::Map(decoded))
            }
            FieldKind::Transient => Ok(FieldValue::Null),
        }
    }

    fn read_token(&self, value: &Bson, target: &MappedType, field: &MappedField) -> OdmResult<ReferenceToken> {
        ReferenceToken::from_bson(value, target.collection()).ok_or_else(|| {
            OdmError::conversion(
                bson_type_name(value),
                format!("Ref<{}>", target.name),
                format!("field '{}' does not hold a reference token", field.name),
            )
        })
    }

    fn decode_reference(
        &self,
        token: ReferenceToken,
        target: &Arc<MappedType>,
        state: &mut DecodeState<'_>,
    ) -> OdmResult<FieldValue> {
        if let Some(cached) = state.cache.get(target.type_id(), &token.id) {
            trace!(type_name = target.name(), id = %token.id, "reference resolved from entity cache");
            return Ok(FieldValue::Reference(ReferenceValue::Loaded(cached)));
        }
        let Some(resolver) = state.resolver else {
            return Ok(FieldValue::Reference(ReferenceValue::Unresolved(token)));
        };
        match resolver.resolve(&token)? {
            Some(document) => {
                let loaded = self.decode_shared(&document, target, state)?;
                Ok(FieldValue::Reference(ReferenceValue::Loaded(loaded)))
            }
            None => Ok(FieldValue::Reference(ReferenceValue::Unresolved(token))),
        }
    }

    fn collect_document_tokens(
        &self,
        document: &Document,
        mapped: &MappedType,
        tokens: &mut Vec<(ReferenceToken, Arc<MappedType>)>,
    ) -> OdmResult<()> {
        for field in mapped.persisted_fields() {
            if let Some(stored) = document.get(&field.storage_name) {
                self.collect_tokens(stored, &field.kind, tokens)?;
            }
        }
        Ok(())
    }

    fn collect_tokens(
        &self,
        value: &Bson,
        kind: &FieldKind,
        tokens: &mut Vec<(ReferenceToken, Arc<MappedType>)>,
    ) -> OdmResult<()> {
        match (kind, value) {
            (_, Bson::Null) => Ok(()),
            (FieldKind::Reference(target), value) => {
                let mapped = self.metadata.describe_key(target)?;
                if let Some(token) = ReferenceToken::from_bson(value, mapped.collection()) {
                    tokens.push((token, mapped));
                }
                Ok(())
            }
            (FieldKind::Collection(element), Bson::Array(items)) => items
                .iter()
                .try_for_each(|item| self.collect_tokens(item, element, tokens)),
            (FieldKind::Collection(element), single) => self.collect_tokens(single, element, tokens),
            (FieldKind::Map(element), Bson::Document(entries)) => entries
                .values()
                .try_for_each(|item| self.collect_tokens(item, element, tokens)),
            (FieldKind::Embedded(target), Bson::Document(embedded)) => {
                let declared = self.metadata.describe_key(target)?;
                let mapped = self.concrete_type(embedded, &declared)?;
                self.collect_document_tokens(embedded, &mapped, tokens)
            }
            _ => Ok(()),
        }
    }
}
