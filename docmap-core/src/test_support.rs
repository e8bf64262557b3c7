//! Hand-registered fixtures shared by the unit tests.

use std::collections::BTreeMap;

use bson::{Bson, Document};
use rust_decimal::Decimal;

use crate::{
    entity::{AnyEntity, Entity, EntityDescriptor, Key, Polymorphic, Ref},
    error::{OdmError, OdmResult},
    metadata::{FieldBuilder, IndexDirection, MappedTypeBuilder},
    persistable_entity, persistable_enum, persistable_polymorphic,
    value::{FieldRef, FieldValue, MappedEnum, Persistable},
};

macro_rules! any_entity {
    ($ty:ident { $($field:ident),* $(,)? }) => {
        impl AnyEntity for $ty {
            fn descriptor(&self) -> EntityDescriptor {
                EntityDescriptor::of::<$ty>()
            }

            fn read_field(&self, name: &str) -> OdmResult<FieldRef<'_>> {
                match name {
                    $(stringify!($field) => Ok(Persistable::to_field(&self.$field)),)*
                    other => Err(OdmError::unknown_field(stringify!($ty), other)),
                }
            }

            fn write_field(&mut self, name: &str, value: FieldValue) -> OdmResult<()> {
                match name {
                    $(stringify!($field) => self.$field = Persistable::from_field(value)?,)*
                    other => return Err(OdmError::unknown_field(stringify!($ty), other)),
                }
                Ok(())
            }
        }
    };
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Address {
    pub street: String,
    pub city: String,
}

any_entity!(Address { street, city });
persistable_entity!(Address);

impl Entity for Address {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::embedded::<Self>()
            .no_discriminator()
            .field(FieldBuilder::new::<String>("street"))
            .field(FieldBuilder::new::<String>("city").rename("town"))
    }
}

#[derive(Debug, Default)]
pub struct Customer {
    pub id: Option<String>,
    pub name: String,
    pub email: Option<String>,
    pub address: Option<Address>,
    pub extra: Option<Document>,
}

impl Customer {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

any_entity!(Customer { id, name, email, address, extra });

impl Entity for Customer {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::entity::<Self>("customers")
            .field(FieldBuilder::new::<Option<String>>("id").id())
            .field(FieldBuilder::new::<String>("name"))
            .field(FieldBuilder::new::<Option<String>>("email").unique())
            .field(FieldBuilder::new::<Option<Address>>("address"))
            .field(FieldBuilder::new::<Option<Document>>("extra"))
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Status {
    #[default]
    Open,
    Shipped,
    Cancelled,
}

impl MappedEnum for Status {
    fn variant_name(&self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Shipped => "shipped",
            Self::Cancelled => "cancelled",
        }
    }

    fn from_variant_name(name: &str) -> Option<Self> {
        match name {
            "open" => Some(Self::Open),
            "shipped" => Some(Self::Shipped),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    fn variants() -> &'static [&'static str] {
        &["open", "shipped", "cancelled"]
    }
}

persistable_enum!(Status);

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrderLine {
    pub sku: String,
    pub quantity: u32,
    pub price: Decimal,
}

any_entity!(OrderLine { sku, quantity, price });
persistable_entity!(OrderLine);

impl Entity for OrderLine {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::embedded::<Self>()
            .no_discriminator()
            .field(FieldBuilder::new::<String>("sku"))
            .field(FieldBuilder::new::<u32>("quantity").rename("qty"))
            .field(FieldBuilder::new::<Decimal>("price"))
    }
}

#[derive(Debug, Default)]
pub struct Order {
    pub id: Option<String>,
    pub customer: Option<Ref<Customer>>,
    pub billing: Option<Key<Customer>>,
    pub total: Decimal,
    pub lines: Vec<OrderLine>,
    pub tags: Vec<String>,
    pub attrs: BTreeMap<String, String>,
    pub status: Status,
    pub version: i64,
    pub scratch: String,
}

any_entity!(Order { id, customer, billing, total, lines, tags, attrs, status, version });

impl Entity for Order {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::entity::<Self>("orders")
            .field(FieldBuilder::new::<Option<String>>("id").id())
            .field(FieldBuilder::new::<Option<Ref<Customer>>>("customer"))
            .field(FieldBuilder::new::<Option<Key<Customer>>>("billing"))
            .field(FieldBuilder::new::<Decimal>("total").indexed(IndexDirection::Descending))
            .field(FieldBuilder::new::<Vec<OrderLine>>("lines"))
            .field(FieldBuilder::new::<Vec<String>>("tags"))
            .field(FieldBuilder::new::<BTreeMap<String, String>>("attrs"))
            .field(FieldBuilder::new::<Status>("status"))
            .field(FieldBuilder::new::<i64>("version").version())
            .field(FieldBuilder::transient("scratch"))
            // Documents written before `total` was introduced stored `amount`.
            .pre_load(|_: &mut Order, raw: &mut Document| {
                if let Some(amount) = raw.remove("amount") {
                    raw.insert("total", amount);
                }
                Ok(())
            })
    }
}

/// Counts its own lifecycle hook invocations.
#[derive(Debug, Default)]
pub struct Person {
    pub id: Option<String>,
    pub name: String,
    pub friend: Option<Ref<Person>>,
    pub saves: u32,
    pub loads: u32,
}

impl Person {
    pub fn named(id: &str, name: &str) -> Self {
        Self {
            id: Some(id.to_string()),
            name: name.to_string(),
            ..Self::default()
        }
    }
}

any_entity!(Person { id, name, friend });

impl Entity for Person {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::entity::<Self>("people")
            .field(FieldBuilder::new::<Option<String>>("id").id())
            .field(FieldBuilder::new::<String>("name"))
            .field(FieldBuilder::new::<Option<Ref<Person>>>("friend"))
            .field(FieldBuilder::transient("saves"))
            .field(FieldBuilder::transient("loads"))
            .pre_save(|person: &mut Person, _| {
                person.saves += 1;
                Ok(())
            })
            .post_load(|person: &mut Person, _| {
                person.loads += 1;
                Ok(())
            })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Circle {
    pub radius: f64,
    pub label: String,
}

any_entity!(Circle { radius, label });

impl Entity for Circle {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::embedded::<Self>()
            .field(FieldBuilder::new::<f64>("radius"))
            .field(FieldBuilder::new::<String>("label"))
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Square {
    pub side: f64,
    pub label: String,
}

any_entity!(Square { side, label });

impl Entity for Square {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::embedded::<Self>()
            .field(FieldBuilder::new::<f64>("side"))
            .field(FieldBuilder::new::<String>("label").rename("caption"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Shape {
    Circle(Circle),
    Square(Square),
}

impl Polymorphic for Shape {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::interface::<Self>()
            .subtype::<Circle>()
            .subtype::<Square>()
    }

    fn as_entity(&self) -> &dyn AnyEntity {
        match self {
            Self::Circle(circle) => circle,
            Self::Square(square) => square,
        }
    }

    fn from_entity(entity: Box<dyn AnyEntity>) -> OdmResult<Self> {
        match entity.into_any().downcast::<Circle>() {
            Ok(circle) => Ok(Self::Circle(*circle)),
            Err(other) => other
                .downcast::<Square>()
                .map(|square| Self::Square(*square))
                .map_err(|_| OdmError::conversion("embedded", "Shape", "not a shape")),
        }
    }
}

persistable_polymorphic!(Shape);

#[derive(Debug, Default)]
pub struct Drawing {
    pub id: Option<String>,
    pub shapes: Vec<Shape>,
    pub main: Option<Shape>,
    pub author: Option<Ref<Person>>,
}

any_entity!(Drawing { id, shapes, main, author });

impl Entity for Drawing {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::entity::<Self>("drawings")
            .field(FieldBuilder::new::<Option<String>>("id").id())
            .field(FieldBuilder::new::<Vec<Shape>>("shapes"))
            .field(FieldBuilder::new::<Option<Shape>>("main"))
            .field(FieldBuilder::new::<Option<Ref<Person>>>("author").id_only())
    }
}

/// Claims the discriminator `Square` already uses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Triangle {
    pub base: f64,
}

any_entity!(Triangle { base });

impl Entity for Triangle {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::embedded::<Self>()
            .discriminator("Square")
            .field(FieldBuilder::new::<f64>("base"))
    }
}

/// An interface whose subtypes cannot be told apart once stored.
#[derive(Debug, Clone, PartialEq)]
pub enum Polygon {
    Square(Square),
    Triangle(Triangle),
}

impl Polymorphic for Polygon {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::interface::<Self>()
            .subtype::<Square>()
            .subtype::<Triangle>()
    }

    fn as_entity(&self) -> &dyn AnyEntity {
        match self {
            Self::Square(square) => square,
            Self::Triangle(triangle) => triangle,
        }
    }

    fn from_entity(entity: Box<dyn AnyEntity>) -> OdmResult<Self> {
        match entity.into_any().downcast::<Square>() {
            Ok(square) => Ok(Self::Square(*square)),
            Err(other) => other
                .downcast::<Triangle>()
                .map(|triangle| Self::Triangle(*triangle))
                .map_err(|_| OdmError::conversion("embedded", "Polygon", "not a polygon")),
        }
    }
}

/// Holds a reference to a type that has no collection of its own.
#[derive(Debug, Default)]
pub struct Misplaced {
    pub id: Option<String>,
    pub address: Option<Ref<Address>>,
}

any_entity!(Misplaced { id, address });

impl Entity for Misplaced {
    fn mapping() -> MappedTypeBuilder {
        MappedTypeBuilder::entity::<Self>("misplaced")
            .field(FieldBuilder::new::<Option<String>>("id").id())
            .field(FieldBuilder::new::<Option<Ref<Address>>>("address"))
    }
}

pub fn bad_reference_descriptor() -> EntityDescriptor {
    EntityDescriptor::of::<Misplaced>()
}

/// A stored customer document, as the driver would return it.
pub fn customer_document(id: &str, name: &str) -> Document {
    bson::doc! {
        "className": "Customer",
        "_id": id,
        "name": name,
    }
}

pub fn string_id(value: &str) -> Bson {
    Bson::String(value.to_string())
}
