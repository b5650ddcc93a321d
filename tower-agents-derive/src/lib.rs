//! Attribute macros for `tower-agents`.
//!
//! The expanded derives name `serde` and `schemars` by path, so crates using
//! these attributes depend on both.

use proc_macro::TokenStream;
use quote::quote;
use syn::{parse_macro_input, Error, Item};

/// Attribute macro that augments a struct or enum with `serde::Deserialize`
/// and `schemars::JsonSchema`, the bounds `tool_typed` places on tool arguments.
#[proc_macro_attribute]
pub fn tool_args(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(item, quote!(serde::Deserialize, schemars::JsonSchema))
}

/// Attribute macro for structured agent outputs: `serde::Serialize`,
/// `serde::Deserialize` and `schemars::JsonSchema`, so the type can be given
/// to `Agent::with_output_type` and read back with `RunResult::final_output_as`.
#[proc_macro_attribute]
pub fn agent_output(_attr: TokenStream, item: TokenStream) -> TokenStream {
    let item = parse_macro_input!(item as Item);
    with_derives(
        item,
        quote!(serde::Serialize, serde::Deserialize, schemars::JsonSchema),
    )
}

fn with_derives(item: Item, derives: proc_macro2::TokenStream) -> TokenStream {
    match item {
        Item::Struct(_) | Item::Enum(_) => quote! {
            #[derive(#derives)]
            #item
        }
        .into(),
        other => Error::new_spanned(other, "expected a struct or an enum")
            .to_compile_error()
            .into(),
    }
}
