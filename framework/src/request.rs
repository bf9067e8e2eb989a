//! Helpers for decoding request bodies.

use serde::{Deserialize, Deserializer};

/// `deserialize_with` helper treating an explicit `null` like a missing
/// field. Pair it with `#[serde(default)]`.
pub fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;

    #[derive(Debug, Deserialize, PartialEq)]
    struct Form {
        #[serde(default, deserialize_with = "null_as_default")]
        subject: String,
        #[serde(default, deserialize_with = "null_as_default")]
        recipients: Vec<String>,
    }

    #[test]
    fn null_and_missing_fields_decode_the_same() {
        let missing: Form = serde_json::from_str("{}").unwrap();
        let null: Form = serde_json::from_str(r#"{"subject":null,"recipients":null}"#).unwrap();

        assert_eq!(missing, null);
        assert_eq!(null.subject, "");
        assert!(null.recipients.is_empty());
    }

    #[test]
    fn present_values_are_kept() {
        let form: Form = serde_json::from_str(r#"{"subject":"Hi","recipients":["a@x.com"]}"#).unwrap();
        assert_eq!(form.subject, "Hi");
        assert_eq!(form.recipients, vec!["a@x.com"]);
    }

    #[test]
    fn wrong_types_are_still_errors() {
        assert!(serde_json::from_str::<Form>(r#"{"recipients":"a@x.com"}"#).is_err());
    }
}
