//! Sending mail on behalf of an account.
//!
//! [`Dispatcher`] ties the account store, the delivery log and a mail
//! [`Connector`] together. It offers three operations:
//!
//! - [`Dispatcher::prepare_bulk`] validates a bulk request, loads the caller's
//!   configuration and acquires a transport. The returned [`BulkBatch`] is
//!   then run to completion, emitting [`BulkEvent`]s as it goes.
//! - [`Dispatcher::send`] delivers a single message.
//! - [`Dispatcher::test_connection`] checks the caller's SMTP settings.
//!
//! Every delivery attempt is appended to the [`DeliveryLog`], whether it
//! succeeded or not.

mod bulk;
mod progress;
mod single;

pub use bulk::{BulkBatch, BulkSendRequest};
pub use progress::{
    percentage, BatchFailure, BatchSummary, BulkEvent, DeliveryAttemptResult, ProgressSnapshot,
};
pub use single::SendRequest;

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::mail::{self, Connector, Email, EmailBody, MailError, Mailer};
use crate::store::{AccountStore, DeliveryLog, SenderIdentity, StoreError};
use crate::HttpError;

const DEFAULT_THROTTLE: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error, HttpError)]
pub enum DispatchError {
    /// Missing or malformed request fields.
    #[error("{0}")]
    #[http_error(BAD_REQUEST)]
    Validation(&'static str),

    /// The account has no usable SMTP settings or sender identity.
    #[error("{0}")]
    #[http_error(BAD_REQUEST)]
    Configuration(String),

    #[error("{0}")]
    #[http_error(BAD_GATEWAY, "mail transport failed")]
    Transport(MailError),

    #[error("store error: {0}")]
    #[http_error(INTERNAL_SERVER_ERROR, "internal error")]
    Store(#[from] StoreError),
}

/// Entry point for all outgoing mail.
#[derive(Clone)]
pub struct Dispatcher {
    accounts: Arc<dyn AccountStore>,
    log: Arc<dyn DeliveryLog>,
    connector: Arc<dyn Connector>,
    throttle: Duration,
}

/// A connected transport together with the identity it sends as.
pub(crate) struct Sender {
    mailer: Arc<dyn Mailer>,
    identity: SenderIdentity,
}

impl Dispatcher {
    pub fn new(
        accounts: Arc<dyn AccountStore>,
        log: Arc<dyn DeliveryLog>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Dispatcher {
            accounts,
            log,
            connector,
            throttle: DEFAULT_THROTTLE,
        }
    }

    /// Delay between recipients of a bulk send. `Duration::ZERO` disables it.
    pub fn throttle(mut self, throttle: Duration) -> Self {
        self.throttle = throttle;
        self
    }

    /// Load the account's settings and identity and connect a transport.
    async fn sender(&self, user_id: Uuid) -> Result<Sender, DispatchError> {
        let (smtp, identity) = tokio::try_join!(
            self.accounts.smtp_settings(user_id),
            self.accounts.identity(user_id),
        )?;

        let (Some(smtp), Some(identity)) = (smtp, identity) else {
            return Err(DispatchError::Configuration(
                "smtp or identity missing".to_string(),
            ));
        };

        mail::check_address(&identity.email)
            .and_then(|_| mail::check_address(identity.reply_address()))
            .map_err(|e| DispatchError::Configuration(format!("invalid sender identity: {e}")))?;

        let mailer = self.connector.connect(&smtp).map_err(connect_error)?;

        Ok(Sender { mailer, identity })
    }
}

impl Sender {
    /// Compose a message from this sender to `recipient`.
    fn compose(
        &self,
        recipient: &str,
        subject: &str,
        text: Option<&str>,
        html: Option<&str>,
    ) -> Result<Email, DispatchError> {
        let body = EmailBody::from_parts(text, html)
            .ok_or(DispatchError::Validation("subject and content required"))?;
        let from = mail::display_mailbox(&self.identity.name, &self.identity.email);

        Ok(Email::new(from, recipient, subject, body).reply_to(self.identity.reply_address()))
    }
}

fn connect_error(err: MailError) -> DispatchError {
    match err {
        MailError::MissingConfig(_) => DispatchError::Configuration(err.to_string()),
        err => DispatchError::Transport(err),
    }
}

fn has_content(text: Option<&str>, html: Option<&str>) -> bool {
    text.is_some_and(|t| !t.is_empty()) || html.is_some_and(|h| !h.is_empty())
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[tokio::test]
    async fn missing_identity_is_a_configuration_error() {
        let store = crate::store::MemoryStore::new();
        let user_id = Uuid::new_v4();
        store.save_smtp_settings(user_id, &smtp()).await.unwrap();

        let connector = ScriptedConnector::new(ScriptedMailer::default());
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store),
            connector.clone(),
        );

        let err = dispatcher.sender(user_id).await.err().unwrap();
        assert!(matches!(err, DispatchError::Configuration(ref m) if m == "smtp or identity missing"));
        assert_eq!(err.http_code(), http::StatusCode::BAD_REQUEST);
        assert_eq!(connector.connects.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn bad_sender_address_is_a_configuration_error() {
        let (store, user_id) = configured_store().await;
        let identity = SenderIdentity {
            email: "not an address".into(),
            ..identity()
        };
        store.save_identity(user_id, &identity).await.unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store),
            ScriptedConnector::new(ScriptedMailer::default()),
        );

        let err = dispatcher.sender(user_id).await.err().unwrap();
        assert!(matches!(err, DispatchError::Configuration(_)));
    }

    #[tokio::test]
    async fn compose_uses_identity_and_reply_to() {
        let (store, user_id) = configured_store().await;
        let identity = SenderIdentity {
            reply_to: Some("replies@acme.test".into()),
            ..identity()
        };
        store.save_identity(user_id, &identity).await.unwrap();

        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            Arc::new(store),
            ScriptedConnector::new(ScriptedMailer::default()),
        );

        let sender = dispatcher.sender(user_id).await.unwrap();
        let email = sender
            .compose("a@x.com", "Hello", Some("plain"), None)
            .unwrap();

        assert_eq!(email.from, "\"Acme News\" <news@acme.test>");
        assert_eq!(email.reply_to.as_deref(), Some("replies@acme.test"));
        assert_eq!(email.to, "a@x.com");
    }

    #[test]
    fn error_status_codes() {
        assert_eq!(
            DispatchError::Validation("recipients required").http_message(),
            "recipients required"
        );
        assert_eq!(
            DispatchError::Transport(MailError::Connection("refused".into())).http_code(),
            http::StatusCode::BAD_GATEWAY
        );
        let store = DispatchError::Store(StoreError::Unavailable("down".into()));
        assert_eq!(store.http_code(), http::StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(store.http_message(), "internal error");
    }
}
