//! Immutable descriptions of mapped types.
//!
//! A [`MappedType`] is built once per Rust type from the type's explicit
//! registration ([`Entity::mapping`](crate::entity::Entity::mapping)) and
//! memoized by the [`MetadataRegistry`] for the lifetime of the registry.

mod builder;
mod registry;

use std::{any::TypeId, fmt, sync::Arc};

use bson::Document;
use indexmap::IndexMap;

use crate::{
    entity::{AnyEntity, EntityDescriptor, ErasedShared, TypeKey},
    error::{OdmError, OdmResult},
    value::{ScalarType, ValueDescriptor},
};

pub use builder::{FieldBuilder, MappedTypeBuilder};
pub use registry::MetadataRegistry;

/// Storage name of every identifier field.
pub const ID_STORAGE_NAME: &str = "_id";

/// Whether a mapped type is stored on its own, only inside other documents,
/// or is an interface over concrete subtypes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeKind {
    Entity,
    Embedded,
    Interface,
}

/// The declared value kind of a mapped field.
#[derive(Debug, Clone)]
pub enum FieldKind {
    Scalar(ScalarType),
    Embedded(EntityDescriptor),
    Reference(EntityDescriptor),
    Key(EntityDescriptor),
    Collection(Box<FieldKind>),
    Map(Box<FieldKind>),
    /// A field that is declared but never persisted.
    Transient,
}

impl FieldKind {
    /// Optionality is carried by [`MappedField::is_nullable`], so nested
    /// `Option`s are dropped here.
    pub fn from_descriptor(descriptor: &ValueDescriptor) -> Self {
        match descriptor {
            ValueDescriptor::Scalar(scalar) => Self::Scalar(*scalar),
            ValueDescriptor::Embedded(target) => Self::Embedded(*target),
            ValueDescriptor::Reference(target) => Self::Reference(*target),
            ValueDescriptor::Key(target) => Self::Key(*target),
            ValueDescriptor::Collection(element) => Self::Collection(Box::new(Self::from_descriptor(element))),
            ValueDescriptor::Map(value) => Self::Map(Box::new(Self::from_descriptor(value))),
            ValueDescriptor::Optional(inner) => Self::from_descriptor(inner),
        }
    }

    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// The entity type this kind points at, looking through containers.
    pub fn target(&self) -> Option<&EntityDescriptor> {
        match self {
            Self::Embedded(target) | Self::Reference(target) | Self::Key(target) => Some(target),
            Self::Collection(inner) | Self::Map(inner) => inner.target(),
            Self::Scalar(_) | Self::Transient => None,
        }
    }

    /// The innermost element kind of nested collections.
    pub fn element(&self) -> &FieldKind {
        match self {
            Self::Collection(inner) => inner.element(),
            other => other,
        }
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Scalar(scalar) => crate::value::short_type_name(scalar.name()),
            Self::Embedded(target) => target.name(),
            Self::Reference(target) => format!("Ref<{}>", target.name()),
            Self::Key(target) => format!("Key<{}>", target.name()),
            Self::Collection(element) => format!("[{}]", element.describe()),
            Self::Map(value) => format!("{{String: {}}}", value.describe()),
            Self::Transient => "transient".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexDirection {
    #[default]
    Ascending,
    Descending,
}

impl IndexDirection {
    pub fn as_i32(self) -> i32 {
        match self {
            Self::Ascending => 1,
            Self::Descending => -1,
        }
    }
}

/// Index-relevant metadata handed to the index-management collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct IndexHint {
    pub direction: IndexDirection,
    pub unique: bool,
    pub sparse: bool,
}

/// Describes one field of a [`MappedType`].
#[derive(Debug, Clone)]
pub struct MappedField {
    pub(crate) name: &'static str,
    pub(crate) storage_name: String,
    pub(crate) kind: FieldKind,
    pub(crate) nullable: bool,
    pub(crate) transient: bool,
    pub(crate) id: bool,
    pub(crate) version: bool,
    pub(crate) id_only: bool,
    pub(crate) index: Option<IndexHint>,
}

impl MappedField {
    /// The declared Rust name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn storage_name(&self) -> &str {
        &self.storage_name
    }

    pub fn kind(&self) -> &FieldKind {
        &self.kind
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_transient(&self) -> bool {
        self.transient
    }

    pub fn is_id(&self) -> bool {
        self.id
    }

    pub fn is_version(&self) -> bool {
        self.version
    }

    /// Reference fields flagged this way store the bare target id.
    pub fn is_id_only(&self) -> bool {
        self.id_only
    }

    pub fn index(&self) -> Option<&IndexHint> {
        self.index.as_ref()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookKind {
    PreSave,
    PostSave,
    PreLoad,
    PostLoad,
}

impl fmt::Display for HookKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::PreSave => "pre-save",
            Self::PostSave => "post-save",
            Self::PreLoad => "pre-load",
            Self::PostLoad => "post-load",
        })
    }
}

/// A lifecycle hook. The document is the raw document for pre-load, the
/// produced document for post-save and post-load, and an initially empty
/// document whose entries are merged into the output for pre-save.
pub type HookFn = Arc<dyn Fn(&mut dyn AnyEntity, &mut Document) -> OdmResult<()> + Send + Sync>;

/// Lifecycle hooks keyed by kind, each list in registration order.
#[derive(Clone, Default)]
pub struct Hooks {
    hooks: IndexMap<HookKind, Vec<HookFn>>,
}

impl Hooks {
    pub(crate) fn push(&mut self, kind: HookKind, hook: HookFn) {
        self.hooks.entry(kind).or_default().push(hook);
    }

    pub fn get(&self, kind: HookKind) -> &[HookFn] {
        self.hooks.get(&kind).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn has(&self, kind: HookKind) -> bool {
        !self.get(kind).is_empty()
    }

    pub(crate) fn run(&self, kind: HookKind, entity: &mut dyn AnyEntity, document: &mut Document) -> OdmResult<()> {
        for hook in self.get(kind) {
            hook(&mut *entity, &mut *document)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Hooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.hooks.iter().map(|(kind, hooks)| (kind, hooks.len())))
            .finish()
    }
}

/// Allocates default shells for a concrete type.
#[derive(Clone, Copy)]
pub(crate) struct Factory {
    pub(crate) boxed: fn() -> Box<dyn AnyEntity>,
    pub(crate) shared: fn() -> ErasedShared,
}

/// The immutable description of one mapped type.
pub struct MappedType {
    pub(crate) key: TypeKey,
    pub(crate) name: String,
    pub(crate) kind: TypeKind,
    pub(crate) collection: Option<String>,
    pub(crate) discriminator: String,
    pub(crate) store_discriminator: bool,
    pub(crate) fields: Vec<MappedField>,
    pub(crate) id_index: Option<usize>,
    pub(crate) version_index: Option<usize>,
    pub(crate) hooks: Hooks,
    pub(crate) subtypes: Vec<EntityDescriptor>,
    pub(crate) factory: Option<Factory>,
}

impl MappedType {
    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn type_id(&self) -> TypeId {
        self.key.type_id()
    }

    /// Short type name used in messages.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    pub fn is_embedded(&self) -> bool {
        self.kind == TypeKind::Embedded
    }

    pub fn is_interface(&self) -> bool {
        self.kind == TypeKind::Interface
    }

    pub fn collection(&self) -> Option<&str> {
        self.collection.as_deref()
    }

    pub fn discriminator(&self) -> &str {
        &self.discriminator
    }

    pub fn stores_discriminator(&self) -> bool {
        self.store_discriminator
    }

    /// All declared fields, in declaration order.
    pub fn fields(&self) -> &[MappedField] {
        &self.fields
    }

    pub fn persisted_fields(&self) -> impl Iterator<Item = &MappedField> {
        self.fields.iter().filter(|field| !field.transient)
    }

    pub fn field(&self, name: &str) -> Option<&MappedField> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn field_by_storage_name(&self, storage_name: &str) -> Option<&MappedField> {
        self.persisted_fields().find(|field| field.storage_name == storage_name)
    }

    pub fn id_field(&self) -> Option<&MappedField> {
        self.id_index.map(|index| &self.fields[index])
    }

    pub fn version_field(&self) -> Option<&MappedField> {
        self.version_index.map(|index| &self.fields[index])
    }

    pub fn hooks(&self) -> &Hooks {
        &self.hooks
    }

    /// Concrete subtypes of an interface, in registration order.
    pub fn subtypes(&self) -> &[EntityDescriptor] {
        &self.subtypes
    }

    /// Storage names and hints of indexed fields, in declaration order.
    pub fn index_fields(&self) -> Vec<(&str, IndexHint)> {
        self.persisted_fields()
            .filter_map(|field| field.index.map(|hint| (field.storage_name.as_str(), hint)))
            .collect()
    }

    /// The collection name, or a mapping error for types that are not stored on their own.
    pub fn require_collection(&self) -> OdmResult<&str> {
        self.collection()
            .ok_or_else(|| OdmError::mapping(&self.name, "type is not stored in its own collection"))
    }

    pub(crate) fn new_boxed(&self) -> OdmResult<Box<dyn AnyEntity>> {
        self.factory
            .map(|factory| (factory.boxed)())
            .ok_or_else(|| OdmError::mapping(&self.name, "cannot instantiate an interface"))
    }

    pub(crate) fn new_shared(&self) -> OdmResult<ErasedShared> {
        self.factory
            .map(|factory| (factory.shared)())
            .ok_or_else(|| OdmError::mapping(&self.name, "cannot instantiate an interface"))
    }
}

impl fmt::Debug for MappedType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedType")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("collection", &self.collection)
            .field("discriminator", &self.discriminator)
            .field("fields", &self.fields)
            .field("hooks", &self.hooks)
            .field("subtypes", &self.subtypes)
            .finish()
    }
}
