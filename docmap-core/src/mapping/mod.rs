//! The mapping engine: object graphs to documents and back.
//!
//! The [`Mapper`] owns the metadata registry, the codec registry and the
//! process-wide [`MapperOptions`]. It is created once at startup and shared
//! read-mostly afterwards.
//!
//! Encoding walks a type's persisted fields in declaration order. Reference
//! fields are written as reference tokens, and every distinct referenced
//! object is recorded in a [`SideTable`] so callers can write it and run its
//! post-save hooks exactly once. Decoding reserves each top-level instance in
//! an [`EntityCache`](crate::cache::EntityCache) before populating it, which
//! is what lets cyclic graphs terminate.

mod decode;
mod encode;
mod keys;

use std::sync::Arc;

use bson::{Bson, Document};

use crate::{
    codec::{CodecContext, CodecRegistry},
    entity::{AnyEntity, Entity, ReferenceToken},
    error::{OdmError, OdmResult},
    metadata::{HookKind, MappedField, MappedType, MetadataRegistry},
    options::MapperOptions,
    value::{FieldValue, bson_type_name},
};

pub use decode::ReferenceResolver;
pub use encode::{SideEntry, SideTable};

/// A lifecycle listener applied to every mapped type it accepts.
///
/// Listeners run after the type's own hooks, in registration order.
pub trait EntityListener: Send + Sync {
    fn applies_to(&self, _mapped: &MappedType) -> bool {
        true
    }

    fn on(&self, kind: HookKind, mapped: &MappedType, entity: &mut dyn AnyEntity, document: &mut Document) -> OdmResult<()>;
}

/// Encodes and decodes mapped entities.
pub struct Mapper {
    metadata: Arc<MetadataRegistry>,
    codecs: Arc<CodecRegistry>,
    options: MapperOptions,
    listeners: Vec<Arc<dyn EntityListener>>,
}

impl Mapper {
    /// Creates a mapper with the built-in codecs and no listeners.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let mapper = Mapper::new(MapperOptions::builder().store_nulls(true).build());
    /// let (document, _) = mapper.encode(&mut order)?;
    /// ```
    pub fn new(options: MapperOptions) -> Self {
        Self::builder().options(options).build()
    }

    pub fn builder() -> MapperBuilder {
        MapperBuilder::default()
    }

    /// The options every encode and decode of this mapper follows.
    pub fn options(&self) -> &MapperOptions {
        &self.options
    }

    pub fn metadata(&self) -> &Arc<MetadataRegistry> {
        &self.metadata
    }

    pub fn codecs(&self) -> &Arc<CodecRegistry> {
        &self.codecs
    }

    /// The mapped type of `T`, described on first use.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] when `T` or a type it embeds or
    /// references has an invalid mapping.
    pub fn describe<T: Entity>(&self) -> OdmResult<Arc<MappedType>> {
        self.metadata.describe::<T>()
    }

    pub(crate) fn codec_context<'a>(&'a self, field: Option<&'a MappedField>) -> CodecContext<'a> {
        CodecContext::new(&self.options).with_field(field)
    }

    /// Runs the type's hooks of `kind`, then every applicable listener.
    ///
    /// # Errors
    ///
    /// Stops at and returns the first error a hook or listener reports.
    pub fn run_hooks(
        &self,
        kind: HookKind,
        mapped: &MappedType,
        entity: &mut dyn AnyEntity,
        document: &mut Document,
    ) -> OdmResult<()> {
        mapped.hooks().run(kind, &mut *entity, &mut *document)?;
        for listener in &self.listeners {
            if listener.applies_to(mapped) {
                listener.on(kind, mapped, &mut *entity, &mut *document)?;
            }
        }
        Ok(())
    }

    /// Runs post-save hooks for an entity after its document was written.
    pub fn run_post_save(&self, entity: &mut dyn AnyEntity, document: &mut Document) -> OdmResult<()> {
        let mapped = self.metadata.describe_key(&entity.descriptor())?;
        self.run_hooks(HookKind::PostSave, &mapped, entity, document)
    }

    /// Runs post-save hooks once for every referenced entity recorded while encoding.
    pub fn post_save_references(&self, side: &mut SideTable) -> OdmResult<()> {
        for entry in side.entries_mut() {
            let mut guard = entry.entity.write();
            self.run_hooks(HookKind::PostSave, &entry.mapped, &mut *guard, &mut entry.document)?;
        }
        Ok(())
    }

    /// The encoded identifier of `entity`, if its type declares one and it is set.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Conversion`] when the id field cannot be encoded.
    pub fn id_of(&self, entity: &dyn AnyEntity, mapped: &MappedType) -> OdmResult<Option<Bson>> {
        match mapped.id_field() {
            Some(field) => self.encode_field(entity, field, &mapped.name),
            None => Ok(None),
        }
    }

    /// The `(collection, id)` pair of a stored entity.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] for types without a collection.
    pub fn entity_key(&self, entity: &dyn AnyEntity) -> OdmResult<Option<ReferenceToken>> {
        let mapped = self.metadata.describe_key(&entity.descriptor())?;
        let collection = mapped.require_collection()?;
        Ok(self
            .id_of(entity, &mapped)?
            .map(|id| ReferenceToken::new(collection, id)))
    }

    /// Writes a stored identifier into the entity's id field.
    ///
    /// # Arguments
    ///
    /// * `entity` - The entity to update
    /// * `mapped` - The entity's mapped type
    /// * `id` - The identifier as stored, e.g. one assigned by the driver
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] if the type declares no id field, and
    /// [`OdmError::Conversion`] if `id` does not fit the field's type.
    pub fn set_id(&self, entity: &mut dyn AnyEntity, mapped: &MappedType, id: &Bson) -> OdmResult<()> {
        let field = mapped
            .id_field()
            .ok_or_else(|| OdmError::mapping(&mapped.name, "type declares no identifier"))?;
        let value = self.decode_field_value(id, field)?;
        entity.write_field(field.name, value)
    }

    /// Resets the entity's id field to unset.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] if the type declares no id field, and
    /// [`OdmError::Conversion`] if the field cannot hold an absent value.
    pub fn clear_id(&self, entity: &mut dyn AnyEntity, mapped: &MappedType) -> OdmResult<()> {
        let field = mapped
            .id_field()
            .ok_or_else(|| OdmError::mapping(&mapped.name, "type declares no identifier"))?;
        entity.write_field(field.name, FieldValue::Null)
    }

    /// The entity's current version, or `None` for unversioned types.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Conversion`] when the version field does not
    /// encode to an integer.
    pub fn version_of(&self, entity: &dyn AnyEntity, mapped: &MappedType) -> OdmResult<Option<i64>> {
        let Some(field) = mapped.version_field() else {
            return Ok(None);
        };
        match self.encode_field(entity, field, &mapped.name)? {
            None => Ok(None),
            Some(Bson::Int32(version)) => Ok(Some(i64::from(version))),
            Some(Bson::Int64(version)) => Ok(Some(version)),
            Some(other) => Err(OdmError::conversion(
                bson_type_name(&other),
                "i64",
                format!("version field '{}' is not an integer", field.name),
            )),
        }
    }

    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] if the type declares no version field.
    pub fn set_version(&self, entity: &mut dyn AnyEntity, mapped: &MappedType, version: i64) -> OdmResult<()> {
        let field = mapped
            .version_field()
            .ok_or_else(|| OdmError::mapping(&mapped.name, "type declares no version field"))?;
        let value = self.decode_field_value(&Bson::Int64(version), field)?;
        entity.write_field(field.name, value)
    }
}

impl std::fmt::Debug for Mapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Mapper")
            .field("options", &self.options)
            .field("types", &self.metadata.len())
            .field("codecs", &self.codecs)
            .field("listeners", &self.listeners.len())
            .finish()
    }
}

/// Assembles a [`Mapper`].
#[derive(Default)]
pub struct MapperBuilder {
    options: MapperOptions,
    codecs: Option<Arc<CodecRegistry>>,
    listeners: Vec<Arc<dyn EntityListener>>,
}

impl MapperBuilder {
    pub fn options(mut self, options: MapperOptions) -> Self {
        self.options = options;
        self
    }

    /// Shares a codec registry instead of creating one with the built-ins.
    pub fn codecs(mut self, codecs: Arc<CodecRegistry>) -> Self {
        self.codecs = Some(codecs);
        self
    }

    pub fn listener(mut self, listener: impl EntityListener + 'static) -> Self {
        self.listeners.push(Arc::new(listener));
        self
    }

    pub fn build(self) -> Mapper {
        Mapper {
            metadata: Arc::new(MetadataRegistry::new(self.options.discriminator_key.clone())),
            codecs: self.codecs.unwrap_or_else(|| Arc::new(CodecRegistry::new())),
            options: self.options,
            listeners: self.listeners,
        }
    }
}
