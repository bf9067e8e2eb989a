//! One-off sends and SMTP connection checks.

use serde::Deserialize;
use uuid::Uuid;

use super::progress::DeliveryAttemptResult;
use super::{connect_error, has_content, DispatchError, Dispatcher};
use crate::request::null_as_default;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SendRequest {
    #[serde(default, deserialize_with = "null_as_default")]
    pub to: String,
    #[serde(default, deserialize_with = "null_as_default")]
    pub subject: String,
    pub text: Option<String>,
    pub html: Option<String>,
}

impl Dispatcher {
    /// Send one message and log the attempt. Returns the message id.
    ///
    /// Delivery failures are logged before being returned as
    /// [`DispatchError::Transport`].
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn send(&self, user_id: Uuid, request: SendRequest) -> Result<String, DispatchError> {
        if request.to.is_empty()
            || request.subject.is_empty()
            || !has_content(request.text.as_deref(), request.html.as_deref())
        {
            return Err(DispatchError::Validation("to, subject and content required"));
        }

        let sender = self.sender(user_id).await?;
        let email = sender.compose(
            &request.to,
            &request.subject,
            request.text.as_deref(),
            request.html.as_deref(),
        )?;

        let outcome = sender.mailer.send(&email).await;
        let result = match &outcome {
            Ok(message_id) => DeliveryAttemptResult::delivered(&request.to, message_id.as_str()),
            Err(err) => DeliveryAttemptResult::failed(&request.to, err.to_string()),
        };
        self.log
            .append(&result.log_entry(user_id, &request.subject))
            .await?;

        outcome.map_err(|err| {
            tracing::warn!(recipient = %request.to, error = %err, "delivery failed");
            DispatchError::Transport(err)
        })
    }

    /// Connect with the account's SMTP settings and verify the server
    /// accepts them. No message is sent.
    #[tracing::instrument(skip_all, fields(%user_id))]
    pub async fn test_connection(&self, user_id: Uuid) -> Result<(), DispatchError> {
        let smtp = self
            .accounts
            .smtp_settings(user_id)
            .await?
            .ok_or_else(|| DispatchError::Configuration("smtp configuration missing".to_string()))?;

        let mailer = self.connector.connect(&smtp).map_err(connect_error)?;
        mailer.verify().await.map_err(DispatchError::Transport)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::super::testing::*;
    use super::*;
    use crate::mail::MailError;
    use crate::store::MemoryStore;

    fn request(to: &str) -> SendRequest {
        SendRequest {
            to: to.into(),
            subject: "Invoice".into(),
            text: None,
            html: Some("<p>Attached</p>".into()),
        }
    }

    fn dispatcher(store: &MemoryStore, mailer: ScriptedMailer) -> Dispatcher {
        Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store.clone()),
            ScriptedConnector::new(mailer),
        )
    }

    #[tokio::test]
    async fn send_returns_message_id_and_logs() {
        let (store, user_id) = configured_store().await;

        let message_id = dispatcher(&store, ScriptedMailer::default())
            .send(user_id, request("a@x.com"))
            .await
            .unwrap();

        let log = store.log_for(user_id).await;
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].message_id.as_deref(), Some(message_id.as_str()));
        assert_eq!(log[0].subject, "Invoice");
    }

    #[tokio::test]
    async fn failed_send_is_logged_then_reported() {
        let (store, user_id) = configured_store().await;
        let mailer = ScriptedMailer::default().reject("a@x.com", "550 mailbox full");

        let err = dispatcher(&store, mailer)
            .send(user_id, request("a@x.com"))
            .await
            .unwrap_err();

        assert!(matches!(
            &err,
            DispatchError::Transport(MailError::Rejected(reason)) if reason == "550 mailbox full"
        ));
        assert_eq!(err.http_code(), http::StatusCode::BAD_GATEWAY);

        let log = store.log_for(user_id).await;
        assert_eq!(log.len(), 1);
        assert!(!log[0].success);
    }

    #[tokio::test]
    async fn send_requires_fields() {
        let (store, user_id) = configured_store().await;
        let dispatcher = dispatcher(&store, ScriptedMailer::default());

        let err = dispatcher.send(user_id, request("")).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation("to, subject and content required")));
        assert!(store.log_for(user_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_connection_reports_transport_failures() {
        let (store, user_id) = configured_store().await;

        assert!(dispatcher(&store, ScriptedMailer::default())
            .test_connection(user_id)
            .await
            .is_ok());

        let err = dispatcher(&store, ScriptedMailer::default().drop_after(0))
            .test_connection(user_id)
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Transport(MailError::Connection(_))));

        let unconfigured = dispatcher(&MemoryStore::new(), ScriptedMailer::default())
            .test_connection(user_id)
            .await
            .unwrap_err();
        assert!(matches!(unconfigured, DispatchError::Configuration(_)));
    }
}
