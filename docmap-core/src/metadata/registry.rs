use std::{
    any::TypeId,
    cell::RefCell,
    collections::{HashMap, HashSet, hash_map::Entry},
    sync::Arc,
};

use parking_lot::{ReentrantMutex, RwLock};
use tracing::{debug, warn};

use crate::{
    entity::{Entity, EntityDescriptor},
    error::{OdmError, OdmResult},
    metadata::{FieldKind, MappedType, TypeKind},
};

/// Memoizes [`MappedType`]s per Rust type.
///
/// Lookups of already described types take a shared read lock. Construction
/// is single-flight: it runs under a re-entrant lock, so concurrent first
/// callers wait for one construction and receive the identical `Arc`, while
/// the constructing thread may re-enter for cyclic type graphs. A type whose
/// construction is in progress acts as its own placeholder during that
/// re-entry.
pub struct MetadataRegistry {
    types: RwLock<HashMap<TypeId, Arc<MappedType>>>,
    discriminators: RwLock<HashMap<String, TypeId>>,
    in_flight: ReentrantMutex<RefCell<HashSet<TypeId>>>,
    discriminator_key: String,
}

impl MetadataRegistry {
    pub fn new(discriminator_key: impl Into<String>) -> Self {
        Self {
            types: RwLock::new(HashMap::new()),
            discriminators: RwLock::new(HashMap::new()),
            in_flight: ReentrantMutex::new(RefCell::new(HashSet::new())),
            discriminator_key: discriminator_key.into(),
        }
    }

    pub fn describe<T: Entity>(&self) -> OdmResult<Arc<MappedType>> {
        self.describe_key(&EntityDescriptor::of::<T>())
    }

    /// The mapped type registered by `descriptor`, constructing and
    /// validating it together with every type it embeds, references or lists
    /// as a subtype.
    ///
    /// # Errors
    ///
    /// Returns [`OdmError::Mapping`] for an invalid registration, such as a
    /// duplicate storage name, a reference to a type without a collection,
    /// or interface subtypes sharing a discriminator. Failed constructions
    /// are not cached.
    pub fn describe_key(&self, descriptor: &EntityDescriptor) -> OdmResult<Arc<MappedType>> {
        if let Some(mapped) = self.get(descriptor.type_id()) {
            return Ok(mapped);
        }

        let guard = self.in_flight.lock();
        // Another thread may have finished while this one waited.
        if let Some(mapped) = self.get(descriptor.type_id()) {
            return Ok(mapped);
        }
        if guard.borrow().contains(&descriptor.type_id()) {
            return Err(OdmError::mapping(
                descriptor.name(),
                "mapping is still being constructed",
            ));
        }

        guard.borrow_mut().insert(descriptor.type_id());
        let built = self.construct(descriptor);
        guard.borrow_mut().remove(&descriptor.type_id());

        let mapped = Arc::new(built?);
        if mapped.kind != TypeKind::Interface {
            match self.discriminators.write().entry(mapped.discriminator.clone()) {
                Entry::Vacant(slot) => {
                    slot.insert(mapped.type_id());
                }
                Entry::Occupied(taken) => {
                    let owner = self.get(*taken.get()).map(|owner| owner.name.clone()).unwrap_or_default();
                    warn!(
                        discriminator = %mapped.discriminator,
                        type_name = %mapped.name,
                        registered = %owner,
                        "discriminator already registered; lookups by it keep the first type"
                    );
                }
            }
        }
        self.types.write().insert(mapped.type_id(), mapped.clone());

        debug!(
            type_name = %mapped.name,
            collection = mapped.collection.as_deref().unwrap_or(""),
            kind = ?mapped.kind,
            fields = mapped.fields.len(),
            "described mapped type"
        );
        Ok(mapped)
    }

    /// The already described type, if any.
    pub fn get(&self, type_id: TypeId) -> Option<Arc<MappedType>> {
        self.types.read().get(&type_id).cloned()
    }

    /// The concrete type first registered under a discriminator value. Later
    /// types claiming the same value are logged and ignored here.
    pub fn by_discriminator(&self, discriminator: &str) -> Option<Arc<MappedType>> {
        let type_id = *self.discriminators.read().get(discriminator)?;
        self.get(type_id)
    }

    /// Resolves a stored discriminator among the subtypes of `interface`,
    /// in registration order.
    pub fn subtype_for(&self, interface: &MappedType, discriminator: &str) -> OdmResult<Option<Arc<MappedType>>> {
        for subtype in &interface.subtypes {
            let mapped = self.describe_key(subtype)?;
            if mapped.discriminator == discriminator {
                return Ok(Some(mapped));
            }
        }
        Ok(None)
    }

    pub fn len(&self) -> usize {
        self.types.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Makes sure a type is described, tolerating types under construction.
    fn ensure(&self, descriptor: &EntityDescriptor) -> OdmResult<()> {
        {
            let guard = self.in_flight.lock();
            if guard.borrow().contains(&descriptor.type_id()) {
                return Ok(());
            }
        }
        self.describe_key(descriptor).map(|_| ())
    }

    fn construct(&self, descriptor: &EntityDescriptor) -> OdmResult<MappedType> {
        let builder = descriptor.builder();
        if builder.key() != descriptor.key() {
            return Err(OdmError::mapping(
                descriptor.name(),
                format!("registration describes {} instead", builder.key().short_name()),
            ));
        }
        let mapped = builder.finish(&self.discriminator_key)?;

        for field in mapped.persisted_fields() {
            self.check_target(&mapped, field.name, &field.kind)?;
        }
        let described: Vec<Arc<MappedType>> = mapped
            .subtypes
            .iter()
            .map(|subtype| {
                self.ensure(subtype).map_err(|err| {
                    OdmError::mapping(&mapped.name, format!("subtype {} cannot be mapped: {err}", subtype.name()))
                })?;
                Ok(self.get(subtype.type_id()))
            })
            .collect::<OdmResult<Vec<_>>>()?
            .into_iter()
            .flatten()
            .collect();
        let mut seen: HashMap<&str, &str> = HashMap::new();
        for subtype in &described {
            if subtype.kind == TypeKind::Interface {
                return Err(OdmError::mapping(
                    &mapped.name,
                    format!("subtype {} is itself an interface", subtype.name),
                ));
            }
            // A stored value must name exactly one subtype.
            if let Some(first) = seen.insert(&subtype.discriminator, &subtype.name) {
                return Err(OdmError::mapping(
                    &mapped.name,
                    format!(
                        "subtypes {first} and {} share the discriminator '{}'",
                        subtype.name, subtype.discriminator
                    ),
                ));
            }
        }
        Ok(mapped)
    }

    fn check_target(&self, owner: &MappedType, field: &str, kind: &FieldKind) -> OdmResult<()> {
        match kind {
            FieldKind::Collection(inner) | FieldKind::Map(inner) => self.check_target(owner, field, inner),
            FieldKind::Embedded(target) => self.ensure(target).map_err(|err| {
                OdmError::mapping(&owner.name, format!("field '{field}' embeds an unmappable type: {err}"))
            }),
            FieldKind::Reference(target) | FieldKind::Key(target) => {
                self.ensure(target).map_err(|err| {
                    OdmError::mapping(&owner.name, format!("field '{field}' references an unmappable type: {err}"))
                })?;
                match self.get(target.type_id()) {
                    Some(described) if described.kind != TypeKind::Entity => Err(OdmError::mapping(
                        &owner.name,
                        format!(
                            "field '{field}' references {}, which is not stored in its own collection",
                            described.name
                        ),
                    )),
                    _ => Ok(()),
                }
            }
            FieldKind::Scalar(_) | FieldKind::Transient => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use crate::test_support::{Circle, Customer, Drawing, Order, Person, Polygon, Shape, Square, Triangle};

    #[test]
    fn test_describe_is_memoized() {
        let registry = MetadataRegistry::new("className");

        let first = registry.describe::<Order>().unwrap();
        let second = registry.describe::<Order>().unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        // Order pulls in Customer and the embedded line type.
        assert!(registry.get(TypeId::of::<Customer>()).is_some());
    }

    #[test]
    fn test_concurrent_first_callers_share_one_instance() {
        let registry = Arc::new(MetadataRegistry::new("className"));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = registry.clone();
                thread::spawn(move || registry.describe::<Order>().unwrap())
            })
            .collect();
        let described: Vec<_> = handles.into_iter().map(|handle| handle.join().unwrap()).collect();

        for mapped in &described[1..] {
            assert!(Arc::ptr_eq(&described[0], mapped));
        }
    }

    #[test]
    fn test_self_referencing_type_is_described() {
        let registry = MetadataRegistry::new("className");

        let person = registry.describe::<Person>().unwrap();
        assert!(matches!(person.field("friend").unwrap().kind(), FieldKind::Reference(_)));
    }

    #[test]
    fn test_interface_tracks_subtypes_in_order() {
        let registry = MetadataRegistry::new("className");
        registry.describe::<Drawing>().unwrap();

        let shape = registry.get(TypeId::of::<Shape>()).unwrap();
        assert!(shape.is_interface());
        assert_eq!(shape.subtypes().len(), 2);
        assert_eq!(shape.subtypes()[0].type_id(), TypeId::of::<Circle>());

        let square = registry.subtype_for(&shape, "Square").unwrap().unwrap();
        assert_eq!(square.type_id(), TypeId::of::<Square>());
        assert!(registry.subtype_for(&shape, "Triangle").unwrap().is_none());
        assert_eq!(registry.by_discriminator("Circle").unwrap().type_id(), TypeId::of::<Circle>());
    }

    #[test]
    fn test_subtypes_sharing_a_discriminator_are_rejected() {
        let registry = MetadataRegistry::new("className");
        registry.describe::<Drawing>().unwrap();

        let err = registry
            .describe_key(&EntityDescriptor::polymorphic::<Polygon>())
            .unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("share the discriminator 'Square'"));
        assert!(registry.get(TypeId::of::<Polygon>()).is_none());

        // Outside an interface the first registration keeps the name.
        assert!(registry.get(TypeId::of::<Triangle>()).is_some());
        assert_eq!(registry.by_discriminator("Square").unwrap().type_id(), TypeId::of::<Square>());
    }

    #[test]
    fn test_reference_to_embedded_type_is_rejected() {
        let registry = MetadataRegistry::new("className");

        let err = registry
            .describe_key(&crate::test_support::bad_reference_descriptor())
            .unwrap_err();
        assert!(err.is_mapping());
        assert!(err.to_string().contains("not stored in its own collection"));
        // A failed construction is not cached.
        assert!(registry.get(crate::test_support::bad_reference_descriptor().type_id()).is_none());
    }
}
