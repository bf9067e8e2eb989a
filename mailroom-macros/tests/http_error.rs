use http::StatusCode;
use mailroom_macros::HttpError;

#[derive(thiserror::Error, Debug, HttpError)]
enum ApiError {
    #[error("recipients required")]
    #[http_error(BAD_REQUEST)]
    Validation,

    #[error("smtp or identity missing")]
    #[http_error(400)]
    Configuration,

    #[error("transport error: {0}")]
    #[http_error(BAD_GATEWAY, "mail transport failed: {0}")]
    Transport(String),

    #[error("rejected {recipient} with {code}")]
    #[http_error(422, "{recipient} was rejected ({code})")]
    Rejected { recipient: String, code: u16 },

    #[error("braces {{literal}} {0}")]
    #[http_error(CONFLICT, "{{literal}} {0}")]
    Escaped(u8),

    #[error("database error: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR, "internal error")]
    Anyhow(#[from] anyhow::Error),

    #[error("unmapped")]
    Unmapped,
}

#[test]
fn unit_variant_uses_display() {
    let err = ApiError::Validation;
    assert_eq!(err.http_code(), StatusCode::BAD_REQUEST);
    assert_eq!(err.http_message(), "recipients required");
}

#[test]
fn numeric_status_code() {
    let err = ApiError::Configuration;
    assert_eq!(err.http_code(), StatusCode::BAD_REQUEST);
    assert_eq!(err.http_message(), "smtp or identity missing");
}

#[test]
fn tuple_variant_interpolates_by_index() {
    let err = ApiError::Transport("connection refused".into());
    assert_eq!(err.http_code(), StatusCode::BAD_GATEWAY);
    assert_eq!(err.http_message(), "mail transport failed: connection refused");
}

#[test]
fn struct_variant_interpolates_by_name() {
    let err = ApiError::Rejected {
        recipient: "a@x.com".into(),
        code: 550,
    };
    assert_eq!(err.http_code().as_u16(), 422);
    assert_eq!(err.http_message(), "a@x.com was rejected (550)");
}

#[test]
fn escaped_braces_are_kept() {
    let err = ApiError::Escaped(7);
    assert_eq!(err.http_code(), StatusCode::CONFLICT);
    assert_eq!(err.http_message(), "{literal} 7");
}

#[test]
fn custom_message_hides_internal_detail() {
    let err = ApiError::Anyhow(anyhow::anyhow!("pool timed out"));
    assert_eq!(err.http_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.http_message(), "internal error");
    assert_eq!(err.to_string(), "database error: pool timed out");
}

#[test]
fn missing_attribute_falls_back_to_500() {
    let err = ApiError::Unmapped;
    assert_eq!(err.http_code(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(err.http_message(), "internal error");
}
