use std::{any::Any, fmt, sync::Arc};

use bson::{Bson, Document};

use crate::{
    error::OdmResult,
    mapping::Mapper,
    metadata::MappedField,
    value::{FieldRef, Persistable, ValueDescriptor},
};

type Encoder = dyn Fn(&Mapper, Option<&MappedField>) -> OdmResult<Bson> + Send + Sync;

/// A typed value compared against a field.
///
/// The value keeps its Rust type until the query is frozen, so operator
/// checks can reason about it and the codec registry can encode it with the
/// target field as hint.
#[derive(Clone)]
pub struct QueryValue {
    descriptor: ValueDescriptor,
    raw: Option<Bson>,
    len: Option<usize>,
    encoder: Arc<Encoder>,
}

impl QueryValue {
    pub fn of<V: Persistable>(value: V) -> Self {
        let descriptor = V::descriptor();
        let raw = as_raw_bson(&value);
        let len = match value.to_field() {
            FieldRef::List(items) => Some(items.len()),
            FieldRef::Map(entries) => Some(entries.len()),
            _ => None,
        };
        let value = Arc::new(value);
        Self {
            descriptor,
            raw,
            len,
            encoder: Arc::new(move |mapper: &Mapper, field: Option<&MappedField>| {
                mapper.encode_value(&*value, field)
            }),
        }
    }

    /// A raw BSON value, encoded as is.
    pub fn raw(value: impl Into<Bson>) -> Self {
        Self::of(value.into())
    }

    pub fn descriptor(&self) -> &ValueDescriptor {
        &self.descriptor
    }

    /// The value itself when it was given as raw BSON.
    pub fn as_bson(&self) -> Option<&Bson> {
        self.raw.as_ref()
    }

    /// Number of elements of a list or map value.
    pub fn len(&self) -> Option<usize> {
        match &self.raw {
            Some(Bson::Array(items)) => Some(items.len()),
            Some(Bson::Document(entries)) => Some(entries.len()),
            _ => self.len,
        }
    }

    pub(crate) fn encode(&self, mapper: &Mapper, field: Option<&MappedField>) -> OdmResult<Bson> {
        (self.encoder)(mapper, field)
    }
}

impl fmt::Debug for QueryValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.raw {
            Some(raw) => write!(f, "{raw}"),
            None => write!(f, "<{}>", self.descriptor.describe()),
        }
    }
}

fn as_raw_bson(value: &dyn Any) -> Option<Bson> {
    if let Some(bson) = value.downcast_ref::<Bson>() {
        return Some(bson.clone());
    }
    value.downcast_ref::<Document>().map(|document| Bson::Document(document.clone()))
}

/// Conversion into a [`QueryValue`].
pub trait IntoQueryValue {
    fn into_query_value(self) -> QueryValue;
}

impl<V: Persistable> IntoQueryValue for V {
    fn into_query_value(self) -> QueryValue {
        QueryValue::of(self)
    }
}

impl IntoQueryValue for &str {
    fn into_query_value(self) -> QueryValue {
        QueryValue::of(self.to_string())
    }
}

impl IntoQueryValue for QueryValue {
    fn into_query_value(self) -> QueryValue {
        self
    }
}
