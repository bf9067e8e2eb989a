//! Outgoing mail: message types and the SMTP transport.
//!
//! The dispatch layer never talks to lettre directly. It asks a [`Connector`]
//! for a [`Mailer`] built from the caller's [`SmtpSettings`] and then sends
//! [`Email`] values through it, one message per recipient.
//!
//! ```ignore
//! let mailer = SmtpConnector::default().connect(&settings)?;
//! let email = Email::new(
//!     display_mailbox("Support", "support@example.com"),
//!     "user@example.com",
//!     "Welcome!",
//!     EmailBody::Text("Thanks for signing up.".into()),
//! );
//! let message_id = mailer.send(&email).await?;
//! ```

mod mailer;
mod message;

pub use mailer::{Connector, Mailer, SmtpConnector, SmtpMailer, SmtpSettings};
pub use message::{display_mailbox, Email, EmailBody};

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MailError {
    #[error("missing required config: {0}")]
    MissingConfig(String),

    #[error("invalid email address: {0}")]
    InvalidAddress(String),

    #[error("failed to build message: {0}")]
    Build(String),

    /// The server refused this particular message.
    #[error("{0}")]
    Rejected(String),

    /// The transport itself is unusable (connection, TLS or I/O failure).
    #[error("connection failed: {0}")]
    Connection(String),
}

impl MailError {
    /// Whether the error means the transport can no longer be used, as
    /// opposed to a failure scoped to a single message.
    ///
    /// [`SmtpMailer`] opens a fresh SMTP session for every message, so a
    /// `Connection` error is a failure to reach or talk to the server at all.
    /// A bulk send stops on the first one rather than retrying the server
    /// once per remaining recipient.
    pub fn is_fatal(&self) -> bool {
        matches!(self, MailError::Connection(_))
    }
}

/// Check that `address` is a bare, well formed email address.
pub fn check_address(address: &str) -> Result<(), MailError> {
    address
        .parse::<lettre::Address>()
        .map(|_| ())
        .map_err(|_| MailError::InvalidAddress(address.to_string()))
}
