use proc_macro2::{Span, TokenStream as TokenStream2};
use quote::quote;
use syn::punctuated::Punctuated;
use syn::{Data, DeriveInput, Expr, Fields, Ident, Lit, Token, Variant};

struct HttpErrorAttr {
    code: TokenStream2,
    message: Option<String>,
}

pub(crate) fn expand(input: DeriveInput) -> syn::Result<TokenStream2> {
    let name = &input.ident;
    let Data::Enum(data) = &input.data else {
        return Err(syn::Error::new_spanned(
            &input.ident,
            "HttpError can only be derived for enums",
        ));
    };

    let mut code_arms = Vec::new();
    let mut message_arms = Vec::new();

    for variant in &data.variants {
        let attr = parse_attr(variant)?;
        let pattern = wildcard_pattern(variant);
        let code = match &attr {
            Some(attr) => attr.code.clone(),
            None => quote! { http::StatusCode::INTERNAL_SERVER_ERROR },
        };
        code_arms.push(quote! { #pattern => #code, });
        message_arms.push(message_arm(variant, attr.as_ref()));
    }

    Ok(quote! {
        impl #name {
            pub fn http_code(&self) -> http::StatusCode {
                match self {
                    #(#code_arms)*
                }
            }

            pub fn http_message(&self) -> String {
                match self {
                    #(#message_arms)*
                }
            }
        }
    })
}

fn parse_attr(variant: &Variant) -> syn::Result<Option<HttpErrorAttr>> {
    let Some(attr) = variant
        .attrs
        .iter()
        .find(|attr| attr.path().is_ident("http_error"))
    else {
        return Ok(None);
    };

    let args = attr.parse_args_with(Punctuated::<Expr, Token![,]>::parse_terminated)?;
    let mut args = args.into_iter();

    let code = match args.next() {
        Some(Expr::Path(path)) => {
            let path = path.path;
            quote! { http::StatusCode::#path }
        }
        Some(Expr::Lit(lit)) => match lit.lit {
            Lit::Int(int) => {
                let code = int.base10_parse::<u16>()?;
                if !(100..1000).contains(&code) {
                    return Err(syn::Error::new_spanned(int, "status code out of range"));
                }
                quote! {
                    http::StatusCode::from_u16(#code)
                        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR)
                }
            }
            other => return Err(syn::Error::new_spanned(other, "expected a status code")),
        },
        Some(other) => return Err(syn::Error::new_spanned(other, "expected a status code")),
        None => return Err(syn::Error::new_spanned(attr, "missing status code")),
    };

    let message = match args.next() {
        Some(Expr::Lit(lit)) => match lit.lit {
            Lit::Str(s) => Some(s.value()),
            other => return Err(syn::Error::new_spanned(other, "expected a string literal")),
        },
        Some(other) => return Err(syn::Error::new_spanned(other, "expected a string literal")),
        None => None,
    };

    Ok(Some(HttpErrorAttr { code, message }))
}

fn wildcard_pattern(variant: &Variant) -> TokenStream2 {
    let ident = &variant.ident;
    match &variant.fields {
        Fields::Unit => quote! { Self::#ident },
        Fields::Unnamed(_) => quote! { Self::#ident(..) },
        Fields::Named(_) => quote! { Self::#ident { .. } },
    }
}

fn message_arm(variant: &Variant, attr: Option<&HttpErrorAttr>) -> TokenStream2 {
    let ident = &variant.ident;
    let pattern = wildcard_pattern(variant);

    let Some(attr) = attr else {
        return quote! { #pattern => String::from("internal error"), };
    };
    let Some(message) = &attr.message else {
        return quote! { #pattern => self.to_string(), };
    };

    match &variant.fields {
        Fields::Unit => quote! { #pattern => String::from(#message), },
        Fields::Unnamed(fields) => {
            let bindings: Vec<Ident> = (0..fields.unnamed.len())
                .map(|i| Ident::new(&format!("__field_{i}"), Span::call_site()))
                .collect();
            let message = rename_positional(message);
            let used: Vec<&Ident> = bindings
                .iter()
                .filter(|b| placeholder_used(&message, &b.to_string()))
                .collect();
            quote! {
                #[allow(unused_variables)]
                Self::#ident(#(#bindings),*) => format!(#message, #(#used = #used),*),
            }
        }
        Fields::Named(fields) => {
            let names: Vec<&Ident> = fields.named.iter().filter_map(|f| f.ident.as_ref()).collect();
            let used: Vec<&Ident> = names
                .iter()
                .copied()
                .filter(|n| placeholder_used(message, &n.to_string()))
                .collect();
            quote! {
                #[allow(unused_variables)]
                Self::#ident { #(#names),* } => format!(#message, #(#used = #used),*),
            }
        }
    }
}

/// Rewrite `{0}` style placeholders to the bindings used in tuple arms.
fn rename_positional(message: &str) -> String {
    let mut out = String::with_capacity(message.len());
    let mut chars = message.chars().peekable();

    while let Some(c) = chars.next() {
        out.push(c);
        if c == '{' {
            if chars.peek() == Some(&'{') {
                out.push(chars.next().unwrap_or('{'));
                continue;
            }
            if chars.peek().is_some_and(|c| c.is_ascii_digit()) {
                out.push_str("__field_");
            }
        }
    }

    out
}

/// Whether `{name}` or `{name:...}` occurs in a format string.
fn placeholder_used(message: &str, name: &str) -> bool {
    let open = format!("{{{name}");
    message.match_indices(&open).any(|(i, _)| {
        let escaped = i > 0 && message[..i].ends_with('{');
        let rest = &message[i + open.len()..];
        !escaped && (rest.starts_with('}') || rest.starts_with(':'))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn positional_placeholders_are_renamed() {
        assert_eq!(rename_positional("failed: {0} ({1:?})"), "failed: {__field_0} ({__field_1:?})");
        assert_eq!(rename_positional("{{0}} {0}"), "{{0}} {__field_0}");
    }

    #[test]
    fn detects_used_placeholders() {
        assert!(placeholder_used("{recipient} was rejected", "recipient"));
        assert!(placeholder_used("code {code:>3}", "code"));
        assert!(!placeholder_used("{{code}} literal", "code"));
        assert!(!placeholder_used("{codes}", "code"));
    }
}
