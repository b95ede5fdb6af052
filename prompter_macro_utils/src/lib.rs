// vim: foldmarker=<([{,}])> foldmethod=marker

use proc_macro::TokenStream;
use quote::*;
use syn::*;

// derive StateToken <([{
/// Derives the `StateToken` trait for a fieldless enum:
///
///     #[derive(Copy, Clone, PartialEq, Eq, Hash, StateToken)]
///     enum SpriteState {
///         Idle,
///         Patrol,
///         Chase,
///     }
///
/// The generated impl maps every variant to its identifier string and back:
///
///     SpriteState::Idle.name() == "Idle"
///     SpriteState::parse("Chase") == Some(SpriteState::Chase)
///
/// `parse` is what lets the developer console and replay tapes address states
/// by name. The `StateToken` trait must be in scope at the derive site.
#[proc_macro_derive(StateToken)]
pub fn derive_state_token(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    let name = input.ident;

    let Data::Enum(data) = input.data else {
        return Error::new_spanned(name, "StateToken can only be derived for enums").to_compile_error().into();
    };

    let mut name_arms = Vec::new();
    let mut parse_arms = Vec::new();
    for variant in data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            return Error::new_spanned(variant, "StateToken variants must be fieldless").to_compile_error().into();
        }
        let ident = variant.ident;
        let text = ident.to_string();
        name_arms.push(quote! { #name::#ident => #text, });
        parse_arms.push(quote! { #text => Some(#name::#ident), });
    }

    let expanded = quote! {
        impl StateToken for #name {
            fn name(&self) -> &'static str {
                match self {
                    #(#name_arms)*
                }
            }

            fn parse(name: &str) -> Option<Self> {
                match name {
                    #(#parse_arms)*
                    _ => None,
                }
            }
        }
    };

    TokenStream::from(expanded)
}
// }])>
