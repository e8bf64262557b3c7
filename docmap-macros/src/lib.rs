//! Procedural macros for the docmap project.
//!
//! This crate provides the compile-time registration step of the mapper:
//! `#[derive(Entity)]` writes the field accessors and the explicit mapping of
//! a struct, and `#[derive(MappedEnum)]` maps a unit enum to its variant
//! names. Generated code refers to the `docmap` facade crate.

#[allow(unused_extern_crates)]
extern crate self as docmap_macros;

mod entity;
mod mapped_enum;

use proc_macro::TokenStream;
use syn::{DeriveInput, parse_macro_input};

/// Derives `AnyEntity` and `Entity` for a struct with named fields.
///
/// # Container attributes
///
/// - `#[docmap(collection = "orders")]`: a top-level entity stored in
///   `orders`. Without it the type is embedded and also implements
///   `Persistable`.
/// - `#[docmap(discriminator = "Order")]`: the stored class name.
/// - `#[docmap(no_discriminator)]`: never write the class name.
/// - `#[docmap(pre_save = path, post_save = path, pre_load = path, post_load = path)]`:
///   lifecycle hooks, each a `fn(&mut Self, &mut Document) -> OdmResult<()>`.
///
/// # Field attributes
///
/// - `id`, `version`, `transient`, `id_only`, `unique`, `sparse`
/// - `rename = "storage_name"`
/// - `indexed` or `indexed = "desc"`
///
/// # Example
///
/// ```ignore
/// #[derive(Debug, Default, Entity)]
/// #[docmap(collection = "orders")]
/// pub struct Order {
///     #[docmap(id)]
///     pub id: Option<String>,
///     #[docmap(indexed = "desc")]
///     pub total: Decimal,
///     #[docmap(version)]
///     pub version: i64,
/// }
/// ```
#[proc_macro_derive(Entity, attributes(docmap))]
pub fn derive_entity(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match entity::derive_entity_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}

/// Derives `MappedEnum` and `Persistable` for a unit enum.
///
/// Variants are stored by name. `#[docmap(rename_all = "lowercase")]` on the
/// enum (also `"UPPERCASE"` and `"snake_case"`) and `#[docmap(rename = "x")]`
/// on a variant change the stored name.
#[proc_macro_derive(MappedEnum, attributes(docmap))]
pub fn derive_mapped_enum(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);

    match mapped_enum::derive_mapped_enum_impl(&input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
