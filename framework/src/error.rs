//! JSON error bodies returned by the API.
//!
//! Every failure that happens before a response stream is opened is rendered
//! as `{ "error": "...", "details": "..." }`. The `details` member is only
//! present when there is something more specific than the headline to say.

use serde::Serialize;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        ErrorResponse {
            error: error.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn details_are_omitted_when_absent() {
        let body = serde_json::to_value(ErrorResponse::new("recipients required")).unwrap();
        assert_eq!(body, json!({ "error": "recipients required" }));
    }

    #[test]
    fn details_are_included_when_set() {
        let body = ErrorResponse::new("failed to send email").with_details("550 mailbox unavailable");
        let body = serde_json::to_value(body).unwrap();
        assert_eq!(
            body,
            json!({ "error": "failed to send email", "details": "550 mailbox unavailable" })
        );
    }
}
