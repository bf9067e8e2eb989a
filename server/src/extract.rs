use axum::extract::FromRequest;

use crate::Error;

/// [`axum::Json`] whose rejections render as an [`Error`] body, so a body
/// that fails to decode gets the same `{ "error": ... }` shape as any other
/// bad request.
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(Error))]
pub struct JsonBody<T>(pub T);
