use proc_macro::TokenStream;
use syn_utils::into_macro_output;

#[macro_use]
mod syn_utils;

mod field_set_impl;

/// Implements `FieldSet` for an enum of unit variants.
///
/// Each variant maps to the snake_case form of its name. Use
/// `#[field(name = "...")]` to choose another name.
///
/// ```ignore
/// #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, FieldSet)]
/// enum Derived {
///     Total,
///     #[field(name = "can_submit")]
///     Submittable,
/// }
/// ```
#[proc_macro_derive(FieldSet, attributes(field))]
pub fn derive_field_set(input: TokenStream) -> TokenStream {
    into_macro_output(field_set_impl::field_set(input.into()))
}
