use std::{
    collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque},
    hash::Hash,
};

use indexmap::IndexMap;

use crate::{
    error::{OdmError, OdmResult},
    value::{FieldRef, FieldValue, MapKey, Persistable, ValueDescriptor},
};

impl<T: Persistable> Persistable for Option<T> {
    fn descriptor() -> ValueDescriptor {
        ValueDescriptor::Optional(Box::new(T::descriptor()))
    }

    fn to_field(&self) -> FieldRef<'_> {
        match self {
            Some(value) => value.to_field(),
            None => FieldRef::Null,
        }
    }

    fn from_field(value: FieldValue) -> OdmResult<Self> {
        match value {
            FieldValue::Null => Ok(None),
            value => T::from_field(value).map(Some),
        }
    }
}

fn decode_elements<T: Persistable>(value: FieldValue) -> OdmResult<Vec<T>> {
    value.into_list()?.into_iter().map(T::from_field).collect()
}

macro_rules! persistable_sequence {
    ($($container:ident<T $(: $($bound:path),+)?>),* $(,)?) => {$(
        impl<T: Persistable $($(+ $bound)+)?> Persistable for $container<T> {
            fn descriptor() -> ValueDescriptor {
                ValueDescriptor::Collection(Box::new(T::descriptor()))
            }

            fn to_field(&self) -> FieldRef<'_> {
                FieldRef::List(self.iter().map(Persistable::to_field).collect())
            }

            fn from_field(value: FieldValue) -> OdmResult<Self> {
                Ok(decode_elements::<T>(value)?.into_iter().collect())
            }
        }
    )*};
}

persistable_sequence! {
    Vec<T>,
    VecDeque<T>,
    BTreeSet<T: Ord>,
    HashSet<T: Eq, Hash>,
}

impl<T: Persistable, const N: usize> Persistable for [T; N] {
    fn descriptor() -> ValueDescriptor {
        ValueDescriptor::Collection(Box::new(T::descriptor()))
    }

    fn to_field(&self) -> FieldRef<'_> {
        FieldRef::List(self.iter().map(Persistable::to_field).collect())
    }

    fn from_field(value: FieldValue) -> OdmResult<Self> {
        let items = decode_elements::<T>(value)?;
        let len = items.len();
        items.try_into().map_err(|_| {
            OdmError::conversion(
                format!("array of {len}"),
                format!("[{}; {N}]", std::any::type_name::<T>()),
                "wrong number of elements",
            )
        })
    }
}

fn decode_entries<K: MapKey, V: Persistable>(value: FieldValue) -> OdmResult<Vec<(K, V)>> {
    value
        .into_map()?
        .into_iter()
        .map(|(key, value)| Ok((K::from_key(&key)?, V::from_field(value)?)))
        .collect()
}

macro_rules! persistable_map {
    ($($container:ident<K $(: $($bound:path),+)?>),* $(,)?) => {$(
        impl<K: MapKey $($(+ $bound)+)?, V: Persistable> Persistable for $container<K, V> {
            fn descriptor() -> ValueDescriptor {
                ValueDescriptor::Map(Box::new(V::descriptor()))
            }

            fn to_field(&self) -> FieldRef<'_> {
                FieldRef::Map(self.iter().map(|(key, value)| (key.to_key(), value.to_field())).collect())
            }

            fn from_field(value: FieldValue) -> OdmResult<Self> {
                Ok(decode_entries::<K, V>(value)?.into_iter().collect())
            }
        }
    )*};
}

persistable_map! {
    BTreeMap<K: Ord>,
    HashMap<K: Eq, Hash>,
    IndexMap<K: Eq, Hash>,
}
