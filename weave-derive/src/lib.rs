//! Derive macro that builds an [`EntityDescriptor`] for an archetype struct.
//!
//! `EntityDescriptor` (defined in the `weave` crate) maps each component
//! field to its byte offset within the struct. Rather than recompute the
//! host platform's layout rules by hand, this macro reuses the layout the
//! compiler already picked via `core::mem::offset_of!`, and only handles the
//! bookkeeping the runtime needs: a stable `(TypeId, disambiguator)` key per
//! field so two fields of the same generic component type can coexist.
//!
//! [`EntityDescriptor`]: ../weave/descriptor/struct.EntityDescriptor.html

use std::collections::HashMap;

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Data, DeriveInput, Fields};

/// Derives `weave::Archetype` for a plain struct with named fields.
///
/// Each field becomes one component slot. Fields sharing the same written
/// type get increasing disambiguators in declaration order, so two fields
/// typed `Timer<Cooldown>` and `Timer<Stun>` are unambiguous even though
/// this macro compares types textually rather than through full type
/// inference.
#[proc_macro_derive(Archetype)]
pub fn derive_archetype(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = &input.ident;

    let fields = match &input.data {
        Data::Struct(data) => match &data.fields {
            Fields::Named(named) => &named.named,
            _ => {
                return syn::Error::new_spanned(
                    &input,
                    "#[derive(Archetype)] requires named fields",
                )
                .to_compile_error()
                .into()
            }
        },
        _ => {
            return syn::Error::new_spanned(&input, "#[derive(Archetype)] requires a struct")
                .to_compile_error()
                .into()
        }
    };

    let mut seen: HashMap<String, u16> = HashMap::new();
    let mut slots = Vec::new();

    for field in fields {
        let ident = field.ident.as_ref().expect("named field");
        let ty = &field.ty;
        let written = quote!(#ty).to_string();
        let disambiguator = seen.entry(written).or_insert(0);
        let this_disambiguator = *disambiguator;
        *disambiguator += 1;

        slots.push(quote! {
            ::weave::descriptor::ComponentSlot {
                key: ::weave::descriptor::ComponentKey {
                    type_id: ::core::any::TypeId::of::<#ty>(),
                    disambiguator: #this_disambiguator,
                },
                offset: ::core::mem::offset_of!(#name, #ident),
                size: ::core::mem::size_of::<#ty>(),
            }
        });
    }

    let expanded = quote! {
        impl ::weave::Archetype for #name {
            fn descriptor() -> &'static ::weave::descriptor::EntityDescriptor {
                static DESCRIPTOR: ::std::sync::OnceLock<::weave::descriptor::EntityDescriptor> =
                    ::std::sync::OnceLock::new();

                DESCRIPTOR.get_or_init(|| {
                    ::weave::descriptor::EntityDescriptor::new(
                        ::core::mem::size_of::<#name>(),
                        ::std::vec![ #(#slots),* ],
                    )
                })
            }
        }
    };

    expanded.into()
}
