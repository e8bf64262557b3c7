//! Implementation of the `#[derive(MappedEnum)]` macro.

use proc_macro2::TokenStream;
use quote::quote;
use syn::{Data, DeriveInput, Fields, LitStr};

#[derive(Clone, Copy)]
enum RenameRule {
    Lowercase,
    Uppercase,
    SnakeCase,
}

impl RenameRule {
    fn parse(value: &str) -> Option<Self> {
        match value {
            "lowercase" => Some(Self::Lowercase),
            "UPPERCASE" => Some(Self::Uppercase),
            "snake_case" => Some(Self::SnakeCase),
            _ => None,
        }
    }

    fn apply(self, variant: &str) -> String {
        match self {
            Self::Lowercase => variant.to_lowercase(),
            Self::Uppercase => variant.to_uppercase(),
            Self::SnakeCase => {
                let mut out = String::with_capacity(variant.len() + 4);
                for (i, c) in variant.char_indices() {
                    if c.is_uppercase() && i > 0 {
                        out.push('_');
                    }
                    out.extend(c.to_lowercase());
                }
                out
            }
        }
    }
}

pub fn derive_mapped_enum_impl(input: &DeriveInput) -> Result<TokenStream, syn::Error> {
    let name = &input.ident;

    let data = match &input.data {
        Data::Enum(data) => data,
        _ => {
            return Err(syn::Error::new_spanned(
                input,
                "MappedEnum derive only supports enums",
            ));
        }
    };

    if data.variants.is_empty() {
        return Err(syn::Error::new_spanned(input, "MappedEnum needs at least one variant"));
    }

    let mut rename_all = None;
    for attr in &input.attrs {
        if !attr.path().is_ident("docmap") {
            continue;
        }

        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("rename_all") {
                let value: LitStr = meta.value()?.parse()?;
                rename_all = Some(
                    RenameRule::parse(&value.value())
                        .ok_or_else(|| meta.error("rename_all expects lowercase, UPPERCASE or snake_case"))?,
                );
            } else {
                return Err(meta.error("unknown docmap enum attribute"));
            }
            Ok(())
        })?;
    }

    let mut variants = Vec::with_capacity(data.variants.len());
    let mut stored = Vec::with_capacity(data.variants.len());
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Err(syn::Error::new_spanned(
                variant,
                "MappedEnum variants cannot carry data",
            ));
        }

        let mut stored_name = match rename_all {
            Some(rule) => rule.apply(&variant.ident.to_string()),
            None => variant.ident.to_string(),
        };
        for attr in &variant.attrs {
            if !attr.path().is_ident("docmap") {
                continue;
            }

            attr.parse_nested_meta(|meta| {
                if meta.path.is_ident("rename") {
                    let value: LitStr = meta.value()?.parse()?;
                    stored_name = value.value();
                } else {
                    return Err(meta.error("unknown docmap variant attribute"));
                }
                Ok(())
            })?;
        }

        if stored.contains(&stored_name) {
            return Err(syn::Error::new_spanned(
                variant,
                format!("variant name `{stored_name}` is used twice"),
            ));
        }
        variants.push(&variant.ident);
        stored.push(stored_name);
    }

    Ok(quote! {
        impl ::docmap::value::MappedEnum for #name {
            fn variant_name(&self) -> &'static str {
                match self {
                    #(Self::#variants => #stored,)*
                }
            }

            fn from_variant_name(name: &str) -> Option<Self> {
                match name {
                    #(#stored => Some(Self::#variants),)*
                    _ => None,
                }
            }

            fn variants() -> &'static [&'static str] {
                &[#(#stored),*]
            }
        }

        ::docmap::persistable_enum!(#name);
    })
}
