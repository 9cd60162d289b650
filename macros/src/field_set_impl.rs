use proc_macro2::TokenStream;
use quote::quote;
use syn::{parse2, spanned::Spanned, Data, DeriveInput, Fields, LitStr, Result};

pub fn field_set(input: TokenStream) -> Result<TokenStream> {
    let input: DeriveInput = parse2(input)?;
    let Data::Enum(data) = &input.data else {
        bail!(input.span(), "`#[derive(FieldSet)]` supports only enums");
    };
    let mut variants = Vec::new();
    let mut names = Vec::new();
    for variant in &data.variants {
        if !matches!(variant.fields, Fields::Unit) {
            bail!(variant.span(), "field set variants must be unit variants");
        }
        let name = field_name(variant)?;
        if names.iter().any(|n: &LitStr| n.value() == name.value()) {
            bail!(name.span(), "duplicate field name `{}`", name.value());
        }
        variants.push(&variant.ident);
        names.push(name);
    }
    let ident = &input.ident;
    let (impl_generics, ty_generics, where_clause) = input.generics.split_for_impl();
    Ok(quote! {
        #[automatically_derived]
        impl #impl_generics ::optistate::FieldSet for #ident #ty_generics #where_clause {
            const ALL: &'static [Self] = &[#(Self::#variants,)*];
            fn name(&self) -> &'static str {
                match *self {
                    #(Self::#variants => #names,)*
                }
            }
        }
    })
}

fn field_name(variant: &syn::Variant) -> Result<LitStr> {
    let mut name = None;
    for attr in &variant.attrs {
        if !attr.path().is_ident("field") {
            continue;
        }
        attr.parse_nested_meta(|meta| {
            if meta.path.is_ident("name") {
                name = Some(meta.value()?.parse::<LitStr>()?);
                Ok(())
            } else {
                Err(meta.error("expected `name = \"...\"`"))
            }
        })?;
    }
    Ok(name.unwrap_or_else(|| {
        LitStr::new(&to_snake_case(&variant.ident.to_string()), variant.ident.span())
    }))
}

fn to_snake_case(s: &str) -> String {
    let mut out = String::new();
    let mut prev_lower = false;
    for c in s.chars() {
        if c.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_lower = false;
        } else {
            out.push(c);
            prev_lower = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}
