use std::{collections::HashSet, sync::Arc};

use bson::{Bson, Document};
use indexmap::IndexMap;
use tracing::trace;

use crate::{
    entity::{AnyEntity, Entity, ErasedShared, ReferenceToken, Shared},
    error::{OdmError, OdmResult},
    mapping::{Mapper, keys::escape_key},
    metadata::{FieldKind, HookKind, MappedField, MappedType},
    value::{FieldRef, Persistable, ReferenceRef},
};

/// A referenced entity reached while encoding, with the document produced for it.
#[derive(Debug)]
pub struct SideEntry {
    pub entity: ErasedShared,
    pub mapped: Arc<MappedType>,
    pub id: Bson,
    pub document: Document,
}

/// Every distinct referenced object of one encode call, keyed by identity,
/// in the order they were first reached.
#[derive(Debug, Default)]
pub struct SideTable {
    entries: IndexMap<usize, SideEntry>,
    in_progress: HashSet<usize>,
}

impl SideTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, identity: usize) -> bool {
        self.entries.contains_key(&identity)
    }

    pub fn get(&self, identity: usize) -> Option<&SideEntry> {
        self.entries.get(&identity)
    }

    pub fn entries(&self) -> impl Iterator<Item = &SideEntry> {
        self.entries.values()
    }

    pub fn entries_mut(&mut self) -> impl Iterator<Item = &mut SideEntry> {
        self.entries.values_mut()
    }

    fn reached(&self, identity: usize) -> bool {
        self.entries.contains_key(&identity) || self.in_progress.contains(&identity)
    }
}

struct EncodeState {
    side: SideTable,
    /// Off for query values and id extraction: references become tokens
    /// without hooks or side-table entries.
    track: bool,
}

impl EncodeState {
    fn tracking() -> Self {
        Self {
            side: SideTable::default(),
            track: true,
        }
    }

    fn detached() -> Self {
        Self {
            side: SideTable::default(),
            track: false,
        }
    }
}

fn merge(document: &mut Document, extra: Document) {
    for (key, value) in extra {
        document.insert(key, value);
    }
}

impl Mapper {
    /// Encodes an owned entity, running its pre-save hooks first.
    ///
    /// An unset identifier is left out of the document.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] for an invalid mapping or a referenced
    /// entity without an id, [`OdmError::Conversion`] when a field value has
    /// no codec, and whatever a pre-save hook reports.
    pub fn encode<T: Entity>(&self, entity: &mut T) -> OdmResult<(Document, SideTable)> {
        self.encode_entity(entity)
    }

    pub fn encode_entity(&self, entity: &mut dyn AnyEntity) -> OdmResult<(Document, SideTable)> {
        let mapped = self.metadata.describe_key(&entity.descriptor())?;
        let mut extra = Document::new();
        self.run_hooks(HookKind::PreSave, &mapped, &mut *entity, &mut extra)?;

        let mut state = EncodeState::tracking();
        let mut document = self.encode_document(&*entity, &mapped, false, &mut state)?;
        merge(&mut document, extra);
        Ok((document, state.side))
    }

    /// Encodes a shared entity. References leading back to it produce tokens.
    pub fn encode_shared<T: Entity>(&self, entity: &Shared<T>) -> OdmResult<(Document, SideTable)> {
        self.encode_erased(&entity.erased())
    }

    pub fn encode_erased(&self, entity: &ErasedShared) -> OdmResult<(Document, SideTable)> {
        let mapped = self.metadata.describe_key(&entity.read_recursive().descriptor())?;
        let mut extra = Document::new();
        {
            let mut guard = entity.write();
            self.run_hooks(HookKind::PreSave, &mapped, &mut *guard, &mut extra)?;
        }

        let mut state = EncodeState::tracking();
        state.side.in_progress.insert(entity.identity());
        let mut document = {
            let guard = entity.read_recursive();
            self.encode_document(&*guard, &mapped, false, &mut state)?
        };
        state.side.in_progress.remove(&entity.identity());
        merge(&mut document, extra);
        Ok((document, state.side))
    }

    /// Encodes a standalone value, such as a query operand. No hooks run.
    pub fn encode_value<V: Persistable>(&self, value: &V, field: Option<&MappedField>) -> OdmResult<Bson> {
        let kind = FieldKind::from_descriptor(&V::descriptor());
        let owner = field.map_or("value", MappedField::name);
        let encoded = self.encode_ref(value.to_field(), &kind, field, owner, &mut EncodeState::detached())?;
        Ok(encoded.unwrap_or(Bson::Null))
    }

    /// Encodes one field of an entity without hooks or side-table tracking.
    pub(crate) fn encode_field(
        &self,
        entity: &dyn AnyEntity,
        field: &MappedField,
        owner: &str,
    ) -> OdmResult<Option<Bson>> {
        let value = entity.read_field(field.name)?;
        self.encode_ref(value, &field.kind, Some(field), owner, &mut EncodeState::detached())
    }

    fn encode_document(
        &self,
        entity: &dyn AnyEntity,
        mapped: &MappedType,
        force_discriminator: bool,
        state: &mut EncodeState,
    ) -> OdmResult<Document> {
        let mut document = Document::new();
        if force_discriminator || (self.options.store_discriminator && mapped.stores_discriminator()) {
            document.insert(self.options.discriminator_key.clone(), mapped.discriminator());
        }

        for field in mapped.persisted_fields() {
            let value = entity.read_field(field.name)?;
            match self.encode_ref(value, &field.kind, Some(field), &mapped.name, state)? {
                None if field.id => {}
                None => {
                    if self.options.store_nulls {
                        document.insert(field.storage_name.clone(), Bson::Null);
                    }
                }
                Some(Bson::Array(items)) if items.is_empty() && !self.options.store_empties => {}
                Some(Bson::Document(entries))
                    if entries.is_empty() && !self.options.store_empties && matches!(field.kind, FieldKind::Map(_)) => {}
                Some(value) => {
                    document.insert(field.storage_name.clone(), value);
                }
            }
        }
        Ok(document)
    }

    fn encode_ref(
        &self,
        value: FieldRef<'_>,
        kind: &FieldKind,
        field: Option<&MappedField>,
        owner: &str,
        state: &mut EncodeState,
    ) -> OdmResult<Option<Bson>> {
        match (value, kind) {
            (FieldRef::Null, _) => Ok(None),
            (FieldRef::Scalar(scalar), FieldKind::Scalar(scalar_type)) => {
                let ctx = self.codec_context(field);
                self.codecs.encode(scalar, scalar_type, &ctx).map(Some)
            }
            (FieldRef::Embedded(entity), FieldKind::Embedded(declared)) => {
                let declared = self.metadata.describe_key(declared)?;
                let mapped = self.metadata.describe_key(&entity.descriptor())?;
                // Values at interface-typed fields always carry their discriminator.
                let document = self.encode_document(entity, &mapped, declared.is_interface(), state)?;
                Ok(Some(Bson::Document(document)))
            }
            (FieldRef::Reference(reference), FieldKind::Reference(_)) => {
                let token = match reference {
                    ReferenceRef::Loaded(shared) => self.visit_reference(shared, state)?,
                    ReferenceRef::Unresolved(token) => token.clone(),
                };
                let id_only = field.is_some_and(MappedField::is_id_only);
                Ok(Some(if id_only { token.id } else { Bson::Document(token.to_document()) }))
            }
            (FieldRef::Key(token), FieldKind::Key(_)) => Ok(Some(Bson::Document(token.to_document()))),
            (FieldRef::List(items), FieldKind::Collection(element)) => {
                let mut encoded = Vec::with_capacity(items.len());
                for item in items {
                    encoded.push(self.encode_ref(item, element, field, owner, state)?.unwrap_or(Bson::Null));
                }
                Ok(Some(Bson::Array(encoded)))
            }
            (FieldRef::Map(entries), FieldKind::Map(element)) => {
                let mut encoded = Document::new();
                for (key, item) in entries {
                    let key = escape_key(&key, self.options.escape_map_keys, owner)?;
                    let item = self.encode_ref(item, element, field, owner, state)?.unwrap_or(Bson::Null);
                    encoded.insert(key, item);
                }
                Ok(Some(Bson::Document(encoded)))
            }
            (value, kind) => Err(OdmError::conversion(
                value.kind_name(),
                kind.describe(),
                format!(
                    "value of field '{}' on {owner} does not match its declared kind",
                    field.map_or("?", MappedField::name)
                ),
            )),
        }
    }

    /// Produces the token for a loaded reference. The first time an object is
    /// reached its pre-save hooks run and its document is recorded.
    fn visit_reference(&self, shared: ErasedShared, state: &mut EncodeState) -> OdmResult<ReferenceToken> {
        let mapped = self.metadata.describe_key(&shared.read_recursive().descriptor())?;
        let collection = mapped.require_collection()?.to_string();
        let identity = shared.identity();

        if !state.track || state.side.reached(identity) {
            let id = self.require_id(&*shared.read_recursive(), &mapped)?;
            return Ok(ReferenceToken::new(collection, id));
        }

        state.side.in_progress.insert(identity);
        let mut extra = Document::new();
        {
            let mut guard = shared.write();
            self.run_hooks(HookKind::PreSave, &mapped, &mut *guard, &mut extra)?;
        }
        let (id, mut document) = {
            let guard = shared.read_recursive();
            let id = self.require_id(&*guard, &mapped)?;
            (id, self.encode_document(&*guard, &mapped, false, state)?)
        };
        merge(&mut document, extra);
        state.side.in_progress.remove(&identity);

        trace!(type_name = mapped.name(), id = %id, "recorded referenced entity");
        state.side.entries.insert(
            identity,
            SideEntry {
                entity: shared,
                mapped,
                id: id.clone(),
                document,
            },
        );
        Ok(ReferenceToken::new(collection, id))
    }

    fn require_id(&self, entity: &dyn AnyEntity, mapped: &MappedType) -> OdmResult<Bson> {
        self.id_of(entity, mapped)?.ok_or_else(|| {
            OdmError::mapping(&mapped.name, "referenced entity has no identifier; store it before referencing it")
        })
    }
}
