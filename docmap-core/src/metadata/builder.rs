use std::{collections::HashSet, sync::Arc};

use bson::Document;

use crate::{
    entity::{AnyEntity, Entity, EntityDescriptor, ErasedShared, Polymorphic, TypeKey},
    error::{OdmError, OdmResult},
    metadata::{
        Factory, FieldKind, HookFn, HookKind, Hooks, ID_STORAGE_NAME, IndexDirection, IndexHint, MappedField,
        MappedType, TypeKind,
    },
    value::{Persistable, ScalarFamily},
};

/// Describes one field while a [`MappedTypeBuilder`] is assembled.
#[derive(Debug, Clone)]
pub struct FieldBuilder {
    field: MappedField,
}

impl FieldBuilder {
    /// A persisted field of type `V`, stored under its declared name.
    ///
    /// The field kind (scalar, embedded, reference, container) follows from
    /// `V`'s [`Persistable`] descriptor, and `Option<V>` makes it nullable.
    ///
    /// # Arguments
    ///
    /// * `name` - The declared name, as the entity's accessors know it
    ///
    /// # Example
    ///
    /// ```ignore
    /// FieldBuilder::new::<Option<Ref<Customer>>>("customer")
    /// ```
    pub fn new<V: Persistable>(name: &'static str) -> Self {
        let descriptor = V::descriptor();
        let (_, nullable) = descriptor.unwrap_optional();
        Self {
            field: MappedField {
                name,
                storage_name: name.to_string(),
                kind: FieldKind::from_descriptor(&descriptor),
                nullable,
                transient: false,
                id: false,
                version: false,
                id_only: false,
                index: None,
            },
        }
    }

    /// A declared field that is never persisted.
    pub fn transient(name: &'static str) -> Self {
        Self {
            field: MappedField {
                name,
                storage_name: name.to_string(),
                kind: FieldKind::Transient,
                nullable: true,
                transient: true,
                id: false,
                version: false,
                id_only: false,
                index: None,
            },
        }
    }

    /// Stores the field under `storage_name` instead of its declared name.
    /// Queries keep using the declared name.
    pub fn rename(mut self, storage_name: impl Into<String>) -> Self {
        self.field.storage_name = storage_name.into();
        self
    }

    /// Marks the identifier. Its storage name is always `_id`.
    pub fn id(mut self) -> Self {
        self.field.id = true;
        self.field.storage_name = ID_STORAGE_NAME.to_string();
        self
    }

    /// Marks the optimistic-locking version. It must be an integer; saves
    /// bump it and check the stored value.
    pub fn version(mut self) -> Self {
        self.field.version = true;
        self
    }

    /// Stores a reference as its bare id instead of a reference token.
    pub fn id_only(mut self) -> Self {
        self.field.id_only = true;
        self
    }

    /// Records an index hint in `direction`. Hints are metadata only;
    /// creating the index is the driver's concern.
    pub fn indexed(mut self, direction: IndexDirection) -> Self {
        self.field.index.get_or_insert_with(IndexHint::default).direction = direction;
        self
    }

    /// Records a unique index hint, ascending unless [`indexed`](Self::indexed) says otherwise.
    pub fn unique(mut self) -> Self {
        self.field.index.get_or_insert_with(IndexHint::default).unique = true;
        self
    }

    /// Records a sparse index hint.
    pub fn sparse(mut self) -> Self {
        self.field.index.get_or_insert_with(IndexHint::default).sparse = true;
        self
    }
}

fn boxed_default<T: Entity>() -> Box<dyn AnyEntity> {
    Box::new(T::default())
}

fn shared_default<T: Entity>() -> ErasedShared {
    ErasedShared::new(T::default())
}

/// The explicit registration of a mapped type.
///
/// # Example
///
/// ```ignore
/// impl Entity for Order {
///     fn mapping() -> MappedTypeBuilder {
///         MappedTypeBuilder::entity::<Self>("orders")
///             .field(FieldBuilder::new::<Option<String>>("id").id())
///             .field(FieldBuilder::new::<Option<Ref<Customer>>>("customer"))
///             .field(FieldBuilder::new::<Decimal>("total"))
///             .pre_save(|order: &mut Order, _| {
///                 order.touched = true;
///                 Ok(())
///             })
///     }
/// }
/// ```
pub struct MappedTypeBuilder {
    key: TypeKey,
    kind: TypeKind,
    collection: Option<String>,
    discriminator: Option<String>,
    store_discriminator: bool,
    fields: Vec<FieldBuilder>,
    hooks: Hooks,
    subtypes: Vec<EntityDescriptor>,
    factory: Option<Factory>,
}

impl MappedTypeBuilder {
    fn with_kind(key: TypeKey, kind: TypeKind, factory: Option<Factory>) -> Self {
        Self {
            key,
            kind,
            collection: None,
            discriminator: None,
            store_discriminator: true,
            fields: Vec::new(),
            hooks: Hooks::default(),
            subtypes: Vec::new(),
            factory,
        }
    }

    fn factory<T: Entity>() -> Option<Factory> {
        Some(Factory {
            boxed: boxed_default::<T>,
            shared: shared_default::<T>,
        })
    }

    /// A top-level entity stored in `collection`.
    pub fn entity<T: Entity>(collection: impl Into<String>) -> Self {
        let mut builder = Self::with_kind(TypeKey::of::<T>(), TypeKind::Entity, Self::factory::<T>());
        builder.collection = Some(collection.into());
        builder
    }

    /// A type stored only inside other documents; it may omit an identifier.
    pub fn embedded<T: Entity>() -> Self {
        Self::with_kind(TypeKey::of::<T>(), TypeKind::Embedded, Self::factory::<T>())
    }

    /// An interface over concrete subtypes registered with [`subtype`](Self::subtype).
    pub fn interface<P: Polymorphic>() -> Self {
        Self::with_kind(TypeKey::of::<P>(), TypeKind::Interface, None)
    }

    /// Overrides the discriminator value, which defaults to the type's short name.
    pub fn discriminator(mut self, value: impl Into<String>) -> Self {
        self.discriminator = Some(value.into());
        self
    }

    /// Never write the discriminator for this type.
    pub fn no_discriminator(mut self) -> Self {
        self.store_discriminator = false;
        self
    }

    pub fn field(mut self, field: FieldBuilder) -> Self {
        self.fields.push(field);
        self
    }

    /// Adds a concrete subtype to an interface. Stored values are matched
    /// against subtypes in the order they were added.
    pub fn subtype<S: Entity>(mut self) -> Self {
        self.subtypes.push(EntityDescriptor::of::<S>());
        self
    }

    /// Registers a lifecycle hook for entities of type `T`.
    pub fn hook<T, F>(mut self, kind: HookKind, hook: F) -> Self
    where
        T: AnyEntity,
        F: Fn(&mut T, &mut Document) -> OdmResult<()> + Send + Sync + 'static,
    {
        let hook: HookFn = Arc::new(move |entity: &mut dyn AnyEntity, document: &mut Document| {
            match entity.downcast_mut::<T>() {
                Some(entity) => hook(entity, document),
                None => Err(OdmError::mapping(
                    std::any::type_name::<T>(),
                    format!("{kind} hook invoked on another type"),
                )),
            }
        });
        self.hooks.push(kind, hook);
        self
    }

    /// Runs before the entity's fields are encoded, so changes to the entity
    /// are saved. Keys the hook writes into its document are merged into the
    /// stored one.
    pub fn pre_save<T, F>(self, hook: F) -> Self
    where
        T: AnyEntity,
        F: Fn(&mut T, &mut Document) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.hook(HookKind::PreSave, hook)
    }

    /// Runs once the document was written, including for entities written
    /// by a cascade.
    pub fn post_save<T, F>(self, hook: F) -> Self
    where
        T: AnyEntity,
        F: Fn(&mut T, &mut Document) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.hook(HookKind::PostSave, hook)
    }

    /// Runs on a default instance with the stored document, before any field
    /// is decoded. Changes to the document affect the decode.
    pub fn pre_load<T, F>(self, hook: F) -> Self
    where
        T: AnyEntity,
        F: Fn(&mut T, &mut Document) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.hook(HookKind::PreLoad, hook)
    }

    pub fn post_load<T, F>(self, hook: F) -> Self
    where
        T: AnyEntity,
        F: Fn(&mut T, &mut Document) -> OdmResult<()> + Send + Sync + 'static,
    {
        self.hook(HookKind::PostLoad, hook)
    }

    pub(crate) fn key(&self) -> TypeKey {
        self.key
    }

    /// Checks everything that does not require other types' metadata.
    pub(crate) fn finish(self, discriminator_key: &str) -> OdmResult<MappedType> {
        let name = self.key.short_name();
        let fail = |message: String| OdmError::mapping(&name, message);

        let fields: Vec<MappedField> = self.fields.into_iter().map(|builder| builder.field).collect();

        let mut declared = HashSet::new();
        let mut stored = HashSet::new();
        for field in &fields {
            if !declared.insert(field.name) {
                return Err(fail(format!("field '{}' is declared twice", field.name)));
            }
            if field.transient {
                continue;
            }
            validate_storage_name(&field.storage_name, discriminator_key).map_err(|reason| {
                fail(format!("field '{}' has invalid storage name '{}': {reason}", field.name, field.storage_name))
            })?;
            if !stored.insert(field.storage_name.as_str()) {
                return Err(fail(format!(
                    "storage name '{}' is used by more than one field",
                    field.storage_name
                )));
            }
        }

        let id_index = single_flagged(&fields, |field| field.id, "identifier").map_err(fail)?;
        let version_index = single_flagged(&fields, |field| field.version, "version").map_err(fail)?;

        if let Some(index) = id_index {
            let field = &fields[index];
            if field.transient {
                return Err(fail(format!("identifier '{}' cannot be transient", field.name)));
            }
            if !matches!(field.kind, FieldKind::Scalar(_) | FieldKind::Embedded(_)) {
                return Err(fail(format!(
                    "identifier '{}' must be a scalar or an embedded value, not {}",
                    field.name,
                    field.kind.describe()
                )));
            }
        }

        if let Some(index) = version_index {
            let field = &fields[index];
            match field.kind {
                FieldKind::Scalar(scalar) if scalar.family() == ScalarFamily::Integer => {}
                _ => {
                    return Err(fail(format!(
                        "version field '{}' must be an integer, not {}",
                        field.name,
                        field.kind.describe()
                    )));
                }
            }
        }

        for field in &fields {
            if field.id_only && !matches!(field.kind.element(), FieldKind::Reference(_)) {
                return Err(fail(format!("only reference fields can store ids only, '{}' is not one", field.name)));
            }
        }

        match self.kind {
            TypeKind::Entity if id_index.is_none() => {
                return Err(fail("top-level types must declare an identifier field".to_string()));
            }
            TypeKind::Entity if self.collection.as_deref().is_none_or(str::is_empty) => {
                return Err(fail("collection name is empty".to_string()));
            }
            TypeKind::Interface if self.subtypes.is_empty() => {
                return Err(fail("interfaces must register at least one subtype".to_string()));
            }
            TypeKind::Interface if !fields.is_empty() => {
                return Err(fail("interfaces cannot declare fields".to_string()));
            }
            _ => {}
        }

        let discriminator = self.discriminator.unwrap_or_else(|| name.clone());
        if discriminator.is_empty() {
            return Err(fail("discriminator is empty".to_string()));
        }

        Ok(MappedType {
            key: self.key,
            name,
            kind: self.kind,
            collection: self.collection,
            discriminator,
            store_discriminator: self.store_discriminator,
            fields,
            id_index,
            version_index,
            hooks: self.hooks,
            subtypes: self.subtypes,
            factory: self.factory,
        })
    }
}

fn single_flagged(
    fields: &[MappedField],
    flag: impl Fn(&MappedField) -> bool,
    what: &str,
) -> Result<Option<usize>, String> {
    let mut flagged = fields.iter().enumerate().filter(|(_, field)| flag(*field)).map(|(index, _)| index);
    let first = flagged.next();
    match flagged.next() {
        Some(_) => Err(format!("more than one {what} field declared")),
        None => Ok(first),
    }
}

fn validate_storage_name(name: &str, discriminator_key: &str) -> Result<(), &'static str> {
    if name.is_empty() {
        Err("it is empty")
    } else if name.contains('.') {
        Err("it contains '.'")
    } else if name.starts_with('$') {
        Err("it starts with '$'")
    } else if name.contains('\0') {
        Err("it contains NUL")
    } else if name == discriminator_key {
        Err("it collides with the discriminator key")
    } else {
        Ok(())
    }
}
