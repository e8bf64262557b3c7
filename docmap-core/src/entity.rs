//! Core traits and handles for mapped entities.
//!
//! Mapped types are registered explicitly: an [`Entity`] returns a
//! [`MappedTypeBuilder`] describing its fields, and exposes those fields by
//! declared name through the object-safe [`AnyEntity`] accessors. The derive
//! macros of the `docmap` crate generate both; hand-written implementations
//! are equally valid.
//!
//! Object graphs that share instances, or that contain cycles, are expressed
//! with [`Shared<T>`] handles and [`Ref<T>`] reference fields. A reference is
//! stored as a lightweight [`ReferenceToken`] rather than as an embedded copy.
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! #[derive(Debug, Default, Entity)]
//! #[docmap(collection = "customers")]
//! pub struct Customer {
//!     #[docmap(id)]
//!     pub id: Option<String>,
//!     pub name: String,
//! }
//!
//! #[derive(Debug, Default, Entity)]
//! #[docmap(collection = "orders")]
//! pub struct Order {
//!     #[docmap(id)]
//!     pub id: Option<String>,
//!     pub customer: Option<Ref<Customer>>,
//! }
//! ```

use std::{
    any::{Any, TypeId},
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    sync::Arc,
};

use bson::{Bson, Document, doc};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    error::{OdmError, OdmResult},
    metadata::MappedTypeBuilder,
    value::{FieldRef, FieldValue, Persistable, ReferenceRef, ReferenceValue, ValueDescriptor, short_type_name},
};

/// Identity of a Rust type, with its name kept for messages.
#[derive(Clone, Copy)]
pub struct TypeKey {
    id: TypeId,
    name: &'static str,
}

impl TypeKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: std::any::type_name::<T>(),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.id
    }

    pub fn type_name(&self) -> &'static str {
        self.name
    }

    pub fn short_name(&self) -> String {
        short_type_name(self.name)
    }
}

impl PartialEq for TypeKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for TypeKey {}

impl Hash for TypeKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

/// Points at a type's registration function without describing it yet.
///
/// Field descriptors carry these so that cyclic type graphs can be declared
/// without eagerly building every reachable mapping.
#[derive(Clone, Copy)]
pub struct EntityDescriptor {
    key: TypeKey,
    mapping: fn() -> MappedTypeBuilder,
}

impl EntityDescriptor {
    pub fn new(key: TypeKey, mapping: fn() -> MappedTypeBuilder) -> Self {
        Self { key, mapping }
    }

    pub fn of<T: Entity>() -> Self {
        Self::new(TypeKey::of::<T>(), T::mapping)
    }

    pub fn polymorphic<P: Polymorphic>() -> Self {
        Self::new(TypeKey::of::<P>(), P::mapping)
    }

    pub fn key(&self) -> TypeKey {
        self.key
    }

    pub fn type_id(&self) -> TypeId {
        self.key.id
    }

    pub fn name(&self) -> String {
        self.key.short_name()
    }

    pub(crate) fn builder(&self) -> MappedTypeBuilder {
        (self.mapping)()
    }
}

impl PartialEq for EntityDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl fmt::Debug for EntityDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EntityDescriptor").field(&self.key).finish()
    }
}

/// Upcasting helpers, implemented for every sized `Any + Send + Sync` type.
pub trait AsAny: Any + Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync>;
}

impl<T: Any + Send + Sync> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn into_any(self: Box<Self>) -> Box<dyn Any + Send + Sync> {
        self
    }
}

/// Object-safe view of a mapped entity.
///
/// Field names passed to [`read_field`](AnyEntity::read_field) and
/// [`write_field`](AnyEntity::write_field) are the declared Rust names; the
/// mapper translates them to storage names.
pub trait AnyEntity: AsAny + fmt::Debug {
    /// The descriptor of this value's concrete type.
    fn descriptor(&self) -> EntityDescriptor;

    fn read_field(&self, name: &str) -> OdmResult<FieldRef<'_>>;

    fn write_field(&mut self, name: &str, value: FieldValue) -> OdmResult<()>;
}

impl dyn AnyEntity + '_ {
    pub fn downcast_ref<T: AnyEntity>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn downcast_mut<T: AnyEntity>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// A mapped type with an explicit registration.
///
/// `Default` provides the bare shell that decoding allocates before its
/// fields are populated.
pub trait Entity: AnyEntity + Default + Sized {
    fn mapping() -> MappedTypeBuilder;
}

/// A polymorphic value: an enum over concrete entity variants.
///
/// Its mapping is an interface whose subtypes are the variants' types; the
/// stored discriminator selects the variant on decode.
pub trait Polymorphic: Sized + Send + Sync + 'static {
    fn mapping() -> MappedTypeBuilder;

    fn as_entity(&self) -> &dyn AnyEntity;

    fn from_entity(entity: Box<dyn AnyEntity>) -> OdmResult<Self>;
}

/// Implements [`Persistable`] for an [`Entity`] so it can be embedded in
/// another entity's fields.
#[macro_export]
macro_rules! persistable_entity {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::value::Persistable for $ty {
            fn descriptor() -> $crate::value::ValueDescriptor {
                $crate::value::ValueDescriptor::Embedded($crate::entity::EntityDescriptor::of::<$ty>())
            }

            fn to_field(&self) -> $crate::value::FieldRef<'_> {
                $crate::value::FieldRef::Embedded(self)
            }

            fn from_field(value: $crate::value::FieldValue) -> $crate::error::OdmResult<Self> {
                value.into_embedded::<$ty>()
            }
        }
    )*};
}

/// Implements [`Persistable`] for a [`Polymorphic`] enum.
#[macro_export]
macro_rules! persistable_polymorphic {
    ($($ty:ty),* $(,)?) => {$(
        impl $crate::value::Persistable for $ty {
            fn descriptor() -> $crate::value::ValueDescriptor {
                $crate::value::ValueDescriptor::Embedded($crate::entity::EntityDescriptor::polymorphic::<$ty>())
            }

            fn to_field(&self) -> $crate::value::FieldRef<'_> {
                $crate::value::FieldRef::Embedded($crate::entity::Polymorphic::as_entity(self))
            }

            fn from_field(value: $crate::value::FieldValue) -> $crate::error::OdmResult<Self> {
                match value {
                    $crate::value::FieldValue::Embedded(entity) => {
                        <$ty as $crate::entity::Polymorphic>::from_entity(entity)
                    }
                    other => Err($crate::error::OdmError::conversion(
                        other.kind_name(),
                        stringify!($ty),
                        "expected an embedded document",
                    )),
                }
            }
        }
    )*};
}

/// Type-erased shared entity handle.
///
/// Both halves point at the same allocation; the `Any` half allows the
/// typed handle to be recovered.
#[derive(Clone)]
pub struct ErasedShared {
    entity: Arc<RwLock<dyn AnyEntity>>,
    any: Arc<dyn Any + Send + Sync>,
}

impl ErasedShared {
    pub fn new<T: AnyEntity>(value: T) -> Self {
        Self::from_arc(Arc::new(RwLock::new(value)))
    }

    fn from_arc<T: AnyEntity>(arc: Arc<RwLock<T>>) -> Self {
        Self {
            entity: arc.clone(),
            any: arc,
        }
    }

    /// Address of the shared allocation, stable for the handle's lifetime.
    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.any) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &ErasedShared) -> bool {
        self.identity() == other.identity()
    }

    pub fn read(&self) -> RwLockReadGuard<'_, dyn AnyEntity> {
        self.entity.read()
    }

    /// Read lock that succeeds even while this thread already holds one.
    pub fn read_recursive(&self) -> RwLockReadGuard<'_, dyn AnyEntity> {
        self.entity.read_recursive()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, dyn AnyEntity> {
        self.entity.write()
    }

    pub fn downcast<T: AnyEntity>(&self) -> Option<Shared<T>> {
        self.any
            .clone()
            .downcast::<RwLock<T>>()
            .ok()
            .map(|inner| Shared { inner })
    }
}

impl fmt::Debug for ErasedShared {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErasedShared({:#x})", self.identity())
    }
}

/// A shared, lockable entity whose identity is its allocation.
pub struct Shared<T: AnyEntity> {
    inner: Arc<RwLock<T>>,
}

impl<T: AnyEntity> Shared<T> {
    pub fn new(value: T) -> Self {
        Self {
            inner: Arc::new(RwLock::new(value)),
        }
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.inner.read()
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.inner.write()
    }

    pub fn identity(&self) -> usize {
        Arc::as_ptr(&self.inner) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Shared<T>) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn erased(&self) -> ErasedShared {
        ErasedShared::from_arc(self.inner.clone())
    }

    /// Takes the value out when this is the last handle.
    pub fn try_unwrap(self) -> Result<T, Self> {
        Arc::try_unwrap(self.inner)
            .map(RwLock::into_inner)
            .map_err(|inner| Self { inner })
    }
}

impl<T: AnyEntity> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: AnyEntity> fmt::Debug for Shared<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Shared<{}>({:#x})", short_type_name(std::any::type_name::<T>()), self.identity())
    }
}

/// The stored form of a reference: a collection name and an identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceToken {
    pub collection: String,
    pub id: Bson,
}

impl ReferenceToken {
    pub const COLLECTION_KEY: &'static str = "collection";
    pub const ID_KEY: &'static str = "id";

    pub fn new(collection: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self {
            collection: collection.into(),
            id: id.into(),
        }
    }

    pub fn to_document(&self) -> Document {
        doc! {
            Self::COLLECTION_KEY: self.collection.clone(),
            Self::ID_KEY: self.id.clone(),
        }
    }

    /// Reads a stored token. A bare identifier is accepted when the
    /// referencing field stores ids only, with `collection` supplied.
    pub fn from_bson(value: &Bson, collection: Option<&str>) -> Option<Self> {
        match (value, collection) {
            (Bson::Document(doc), _) if doc.contains_key(Self::ID_KEY) => {
                let id = doc.get(Self::ID_KEY)?.clone();
                let collection = match doc.get(Self::COLLECTION_KEY) {
                    Some(Bson::String(name)) => name.clone(),
                    _ => collection?.to_string(),
                };
                Some(Self { collection, id })
            }
            (Bson::Null, _) => None,
            (id, Some(collection)) => Some(Self::new(collection, id.clone())),
            _ => None,
        }
    }
}

/// A reference field: either a loaded shared entity or an unresolved token.
pub enum Ref<T: AnyEntity> {
    Loaded(Shared<T>),
    Unresolved(ReferenceToken),
}

impl<T: AnyEntity> Ref<T> {
    pub fn new(value: T) -> Self {
        Self::Loaded(Shared::new(value))
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Self::Loaded(_))
    }

    pub fn get(&self) -> Option<&Shared<T>> {
        match self {
            Self::Loaded(shared) => Some(shared),
            Self::Unresolved(_) => None,
        }
    }

    pub fn token(&self) -> Option<&ReferenceToken> {
        match self {
            Self::Loaded(_) => None,
            Self::Unresolved(token) => Some(token),
        }
    }
}

impl<T: AnyEntity> From<Shared<T>> for Ref<T> {
    fn from(shared: Shared<T>) -> Self {
        Self::Loaded(shared)
    }
}

impl<T: AnyEntity> From<&Shared<T>> for Ref<T> {
    fn from(shared: &Shared<T>) -> Self {
        Self::Loaded(shared.clone())
    }
}

impl<T: AnyEntity> Clone for Ref<T> {
    fn clone(&self) -> Self {
        match self {
            Self::Loaded(shared) => Self::Loaded(shared.clone()),
            Self::Unresolved(token) => Self::Unresolved(token.clone()),
        }
    }
}

// Never prints the target: reference graphs may be cyclic.
impl<T: AnyEntity> fmt::Debug for Ref<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Loaded(shared) => f.debug_tuple("Loaded").field(shared).finish(),
            Self::Unresolved(token) => f.debug_tuple("Unresolved").field(token).finish(),
        }
    }
}

impl<T: Entity> Persistable for Ref<T> {
    fn descriptor() -> ValueDescriptor {
        ValueDescriptor::Reference(EntityDescriptor::of::<T>())
    }

    fn to_field(&self) -> FieldRef<'_> {
        match self {
            Self::Loaded(shared) => FieldRef::Reference(ReferenceRef::Loaded(shared.erased())),
            Self::Unresolved(token) => FieldRef::Reference(ReferenceRef::Unresolved(token)),
        }
    }

    fn from_field(value: FieldValue) -> OdmResult<Self> {
        match value.into_reference()? {
            ReferenceValue::Loaded(erased) => erased.downcast::<T>().map(Self::Loaded).ok_or_else(|| {
                OdmError::conversion(
                    "reference",
                    std::any::type_name::<T>(),
                    "referenced document decoded to another type",
                )
            }),
            ReferenceValue::Unresolved(token) => Ok(Self::Unresolved(token)),
        }
    }
}

/// A typed `(collection, id)` pointer that is never resolved automatically.
pub struct Key<T> {
    token: ReferenceToken,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Key<T> {
    pub fn new(collection: impl Into<String>, id: impl Into<Bson>) -> Self {
        Self::from_token(ReferenceToken::new(collection, id))
    }

    pub fn from_token(token: ReferenceToken) -> Self {
        Self {
            token,
            _marker: PhantomData,
        }
    }

    pub fn token(&self) -> &ReferenceToken {
        &self.token
    }

    pub fn collection(&self) -> &str {
        &self.token.collection
    }

    pub fn id(&self) -> &Bson {
        &self.token.id
    }
}

impl<T> Clone for Key<T> {
    fn clone(&self) -> Self {
        Self::from_token(self.token.clone())
    }
}

impl<T> PartialEq for Key<T> {
    fn eq(&self, other: &Self) -> bool {
        self.token == other.token
    }
}

impl<T> fmt::Debug for Key<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key<{}>({}, {})", short_type_name(std::any::type_name::<T>()), self.token.collection, self.token.id)
    }
}

impl<T: Entity> Persistable for Key<T> {
    fn descriptor() -> ValueDescriptor {
        ValueDescriptor::Key(EntityDescriptor::of::<T>())
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::Key(&self.token)
    }

    fn from_field(value: FieldValue) -> OdmResult<Self> {
        value.into_key().map(Self::from_token)
    }
}
