//! The per-operation identity map used while decoding.
//!
//! An [`EntityCache`] is created for one top-level decode (a single load, or
//! one result set) and dropped afterwards. It is never shared between threads
//! and never reused across operations.

use std::{any::TypeId, collections::HashMap};

use bson::Bson;
use tracing::trace;

use crate::{entity::ErasedShared, error::OdmResult, metadata::MappedType};

/// Maps `(type, id)` to the instance decoded, or being decoded, for it.
#[derive(Debug, Default)]
pub struct EntityCache {
    entries: HashMap<(TypeId, String), ErasedShared>,
}

/// Identity key of a stored id.
///
/// Numbers key by value, so `Int32(1)`, `Int64(1)` and `Double(1.0)` name the
/// same entity. Every other id keys by its debug output, which carries the
/// BSON type and keeps `"1"` apart from `1`.
pub(crate) fn id_key(id: &Bson) -> String {
    match id {
        Bson::Int32(number) => format!("#{number}"),
        Bson::Int64(number) => format!("#{number}"),
        Bson::Double(number)
            if number.fract() == 0.0 && *number >= i64::MIN as f64 && *number < i64::MAX as f64 =>
        {
            format!("#{}", *number as i64)
        }
        other => format!("{other:?}"),
    }
}

impl EntityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached instance for `(mapped, id)`, or reserves a default
    /// shell for it. The flag reports whether the instance was already present.
    ///
    /// A reserved shell is visible to every later call before its fields are
    /// populated, which is what lets cyclic graphs terminate.
    pub fn get_or_reserve(&mut self, mapped: &MappedType, id: &Bson) -> OdmResult<(ErasedShared, bool)> {
        let key = (mapped.type_id(), id_key(id));
        if let Some(existing) = self.entries.get(&key) {
            trace!(type_name = mapped.name(), id = %id, "entity cache hit");
            return Ok((existing.clone(), true));
        }
        let shell = mapped.new_shared()?;
        self.entries.insert(key, shell.clone());
        Ok((shell, false))
    }

    pub fn get(&self, type_id: TypeId, id: &Bson) -> Option<ErasedShared> {
        self.entries.get(&(type_id, id_key(id))).cloned()
    }

    pub fn contains(&self, type_id: TypeId, id: &Bson) -> bool {
        self.entries.contains_key(&(type_id, id_key(id)))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{metadata::MetadataRegistry, test_support::Customer};

    #[test]
    fn test_second_request_returns_reserved_instance() {
        let registry = MetadataRegistry::new("className");
        let mapped = registry.describe::<Customer>().unwrap();
        let mut cache = EntityCache::new();

        let (first, present) = cache.get_or_reserve(&mapped, &Bson::String("C1".into())).unwrap();
        assert!(!present);
        let (second, present) = cache.get_or_reserve(&mapped, &Bson::String("C1".into())).unwrap();
        assert!(present);
        assert!(first.ptr_eq(&second));
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_ids_of_different_bson_types_do_not_collide() {
        let registry = MetadataRegistry::new("className");
        let mapped = registry.describe::<Customer>().unwrap();
        let mut cache = EntityCache::new();

        let (int, _) = cache.get_or_reserve(&mapped, &Bson::Int32(1)).unwrap();
        let (text, present) = cache.get_or_reserve(&mapped, &Bson::String("1".into())).unwrap();
        assert!(!present);
        assert!(!int.ptr_eq(&text));
        assert!(cache.contains(mapped.type_id(), &Bson::Int32(1)));
        assert!(!cache.contains(mapped.type_id(), &Bson::Double(1.5)));
    }

    #[test]
    fn test_numeric_ids_share_a_slot_across_widths() {
        let registry = MetadataRegistry::new("className");
        let mapped = registry.describe::<Customer>().unwrap();
        let mut cache = EntityCache::new();

        let (narrow, _) = cache.get_or_reserve(&mapped, &Bson::Int32(7)).unwrap();
        let (wide, present) = cache.get_or_reserve(&mapped, &Bson::Int64(7)).unwrap();
        assert!(present);
        assert!(narrow.ptr_eq(&wide));
        assert!(cache.contains(mapped.type_id(), &Bson::Double(7.0)));
        assert_eq!(cache.len(), 1);
    }
}
