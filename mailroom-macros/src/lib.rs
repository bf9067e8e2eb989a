extern crate proc_macro;

use proc_macro::TokenStream;
use syn::{parse_macro_input, DeriveInput};

mod http_error;

/// Derive `http_code()` and `http_message()` for an error enum.
///
/// Each variant that should map to an HTTP response is annotated with
/// `#[http_error(STATUS)]` or `#[http_error(STATUS, "message")]`.
///
/// - `STATUS` is either an `http::StatusCode` constant name (`BAD_REQUEST`)
///   or a numeric code (`422`).
/// - `"message"` is the user-facing message. Tuple variants interpolate
///   fields by index (`{0}`), struct variants by name (`{field}`). When the
///   message is omitted the `Display` impl is used, so the internal and
///   external messages only diverge where that matters.
///
/// Variants without the attribute fall back to `500` and the generic
/// message `"internal error"`.
///
/// ```rust,ignore
/// #[derive(Debug, thiserror::Error, mailroom::HttpError)]
/// enum Error {
///     #[error("recipients required")]
///     #[http_error(BAD_REQUEST)]
///     Validation,
///
///     #[error("database error: {0}")]
///     #[http_error(INTERNAL_SERVER_ERROR, "internal error")]
///     Database(#[from] sqlx::Error),
/// }
/// ```
#[proc_macro_derive(HttpError, attributes(http_error))]
pub fn http_error_derive(input: TokenStream) -> TokenStream {
    let input = parse_macro_input!(input as DeriveInput);
    match http_error::expand(input) {
        Ok(tokens) => tokens.into(),
        Err(err) => err.to_compile_error().into(),
    }
}
