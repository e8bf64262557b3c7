//! Implementation of the `#[derive(Entity)]` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, Ident, LitStr, Path, Type};

pub fn derive_entity_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;
    let type_name = name.to_string();

    if !input.generics.params.is_empty() {
        return Err(syn::Error::new_spanned(
            &input.generics,
            "Entity derive does not support generic types",
        ));
    }

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(fields) => &fields.named,
            _ => {
                return Err(syn::Error::new_spanned(
                    input,
                    "Entity derive only supports structs with named fields",
                ));
            }
        },
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "Entity derive only supports structs; use Polymorphic for enums over entities",
            ));
        }
    };

    let attrs = parse_container_attrs(input)?;
    let fields: Vec<FieldInfo> = fields.iter().map(parse_field).collect::<Result<_, _>>()?;

    let persisted: Vec<&FieldInfo> = fields.iter().filter(|f| !f.transient).collect();
    let idents: Vec<&Ident> = persisted.iter().map(|f| &f.ident).collect();
    let names: Vec<String> = idents.iter().map(|ident| ident.to_string()).collect();

    let builder = match &attrs.collection {
        Some(collection) => quote! {
            ::docmap::metadata::MappedTypeBuilder::entity::<Self>(#collection)
        },
        None => quote! {
            ::docmap::metadata::MappedTypeBuilder::embedded::<Self>()
        },
    };

    let discriminator = attrs.discriminator.as_ref().map(|value| quote! { .discriminator(#value) });
    let no_discriminator = attrs.no_discriminator.then(|| quote! { .no_discriminator() });
    let field_builders = fields.iter().map(FieldInfo::builder_tokens);
    let hooks = attrs.hooks.iter().map(|(kind, path)| quote! { .#kind(#path) });

    let persistable = attrs.collection.is_none().then(|| {
        quote! {
            ::docmap::persistable_entity!(#name);
        }
    });

    Ok(quote! {
        impl ::docmap::entity::AnyEntity for #name {
            fn descriptor(&self) -> ::docmap::entity::EntityDescriptor {
                ::docmap::entity::EntityDescriptor::of::<Self>()
            }

            fn read_field(&self, name: &str) -> ::docmap::error::OdmResult<::docmap::value::FieldRef<'_>> {
                match name {
                    #(#names => Ok(::docmap::value::Persistable::to_field(&self.#idents)),)*
                    other => Err(::docmap::error::OdmError::unknown_field(#type_name, other)),
                }
            }

            #[allow(unused_variables)]
            fn write_field(
                &mut self,
                name: &str,
                value: ::docmap::value::FieldValue,
            ) -> ::docmap::error::OdmResult<()> {
                match name {
                    #(#names => {
                        self.#idents = ::docmap::value::Persistable::from_field(value)?;
                        Ok(())
                    })*
                    other => Err(::docmap::error::OdmError::unknown_field(#type_name, other)),
                }
            }
        }

        impl ::docmap::entity::Entity for #name {
            fn mapping() -> ::docmap::metadata::MappedTypeBuilder {
                #builder
                    #discriminator
                    #no_discriminator
                    #(#field_builders)*
                    #(#hooks)*
            }
        }

        #persistable
    })
}

#[derive(Default)]
struct ContainerAttrs {
    collection: Option<String>,
    discriminator: Option<String>,
    no_discriminator: bool,
    hooks: Vec<(Ident, Path)>,
}

fn parse_container_attrs(input: &DeriveInput) -> Result<ContainerAttrs, syn::Error> {
    let mut attrs = ContainerAttrs::default();

    for attr in &input.attrs {
        if !attr.path().is_ident("docmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("collection") {
                let value: LitStr = meta.value()?.parse()?;
                if value.value().is_empty() {
                    return Err(meta.error("collection name must not be empty"));
                }
                attrs.collection = Some(value.value());
            } else if meta.path.is_ident("discriminator") {
                let value: LitStr = meta.value()?.parse()?;
                attrs.discriminator = Some(value.value());
            } else if meta.path.is_ident("no_discriminator") {
                attrs.no_discriminator = true;
            } else if let Some(kind) = ["pre_save", "post_save", "pre_load", "post_load"]
                .into_iter()
                .find(|kind| meta.path.is_ident(kind))
            {
                let path: Path = meta.value()?.parse()?;
                attrs.hooks.push((Ident::new(kind, proc_macro2::Span::call_site()), path));
            } else {
                return Err(meta.error("unknown docmap container attribute"));
            }
            Ok(())
        })?;
    }

    if attrs.discriminator.is_some() && attrs.no_discriminator {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "discriminator and no_discriminator are mutually exclusive",
        ));
    }

    Ok(attrs)
}

struct FieldInfo {
    ident: Ident,
    ty: Type,
    rename: Option<String>,
    transient: bool,
    id: bool,
    version: bool,
    id_only: bool,
    indexed: Option<bool>,
    unique: bool,
    sparse: bool,
}

impl FieldInfo {
    fn builder_tokens(&self) -> TokenStream {
        let name = self.ident.to_string();
        if self.transient {
            return quote! {
                .field(::docmap::metadata::FieldBuilder::transient(#name))
            };
        }

        let ty = &self.ty;
        let rename = self.rename.as_ref().map(|value| quote! { .rename(#value) });
        let id = self.id.then(|| quote! { .id() });
        let version = self.version.then(|| quote! { .version() });
        let id_only = self.id_only.then(|| quote! { .id_only() });
        let indexed = self.indexed.map(|descending| {
            let direction = if descending {
                quote! { ::docmap::metadata::IndexDirection::Descending }
            } else {
                quote! { ::docmap::metadata::IndexDirection::Ascending }
            };
            quote! { .indexed(#direction) }
        });
        let unique = self.unique.then(|| quote! { .unique() });
        let sparse = self.sparse.then(|| quote! { .sparse() });

        quote! {
            .field(
                ::docmap::metadata::FieldBuilder::new::<#ty>(#name)
                    #rename #id #version #id_only #indexed #unique #sparse
            )
        }
    }
}

fn parse_field(field: &syn::Field) -> Result<FieldInfo, syn::Error> {
    let ident = field
        .ident
        .clone()
        .ok_or_else(|| syn::Error::new_spanned(field, "Fields must be named"))?;

    let mut info = FieldInfo {
        ident,
        ty: field.ty.clone(),
        rename: None,
        transient: false,
        id: false,
        version: false,
        id_only: false,
        indexed: None,
        unique: false,
        sparse: false,
    };

    for attr in &field.attrs {
        if !attr.path().is_ident("docmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("id") {
                info.id = true;
            } else if meta.path.is_ident("version") {
                info.version = true;
            } else if meta.path.is_ident("transient") {
                info.transient = true;
            } else if meta.path.is_ident("id_only") {
                info.id_only = true;
            } else if meta.path.is_ident("unique") {
                info.unique = true;
            } else if meta.path.is_ident("sparse") {
                info.sparse = true;
            } else if meta.path.is_ident("rename") {
                let value: LitStr = meta.value()?.parse()?;
                info.rename = Some(value.value());
            } else if meta.path.is_ident("indexed") {
                let descending = if meta.input.peek(syn::Token![=]) {
                    let value: LitStr = meta.value()?.parse()?;
                    match value.value().as_str() {
                        "asc" | "ascending" => false,
                        "desc" | "descending" => true,
                        _ => return Err(meta.error("indexed expects \"asc\" or \"desc\"")),
                    }
                } else {
                    false
                };
                info.indexed = Some(descending);
            } else {
                return Err(meta.error("unknown docmap field attribute"));
            }
            Ok(())
        })?;
    }

    if info.transient && (info.id || info.version || info.rename.is_some()) {
        return Err(syn::Error::new_spanned(
            &info.ident,
            "a transient field cannot also be id, version or renamed",
        ));
    }
    if info.id && info.rename.is_some() {
        return Err(syn::Error::new_spanned(&info.ident, "the id field is always stored as _id"));
    }

    Ok(info)
}
