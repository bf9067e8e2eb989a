//! Mailer trait and SMTP implementation.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use lettre::message::{Mailbox, MultiPart, SinglePart};
use lettre::transport::smtp::authentication::Credentials;
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Email, EmailBody, MailError};

/// Sends one message at a time over an established transport.
///
/// Implement this trait to provide alternative backends (e.g. SES, or a
/// scripted transport in tests).
#[async_trait]
pub trait Mailer: Send + Sync + 'static {
    /// Send an email, returning the provider message id.
    async fn send(&self, email: &Email) -> Result<String, MailError>;

    /// Check that the server is reachable and accepts the credentials.
    async fn verify(&self) -> Result<(), MailError>;
}

/// Builds a [`Mailer`] from per-account connection settings.
pub trait Connector: Send + Sync + 'static {
    fn connect(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError>;
}

/// SMTP connection parameters for one account.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SmtpSettings {
    pub host: String,
    pub port: u16,
    /// Implicit TLS when true, opportunistic STARTTLS otherwise.
    pub secure: bool,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for SmtpSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpSettings")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("secure", &self.secure)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

/// [`Connector`] producing lettre backed [`SmtpMailer`]s.
#[derive(Debug, Clone)]
pub struct SmtpConnector {
    timeout: Duration,
}

impl SmtpConnector {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

impl Default for SmtpConnector {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Connector for SmtpConnector {
    fn connect(&self, settings: &SmtpSettings) -> Result<Arc<dyn Mailer>, MailError> {
        Ok(Arc::new(SmtpMailer::from_settings(settings, self.timeout)?))
    }
}

/// SMTP-based mailer using lettre.
#[derive(Clone)]
pub struct SmtpMailer {
    transport: Arc<AsyncSmtpTransport<Tokio1Executor>>,
}

impl SmtpMailer {
    pub fn from_settings(settings: &SmtpSettings, timeout: Duration) -> Result<Self, MailError> {
        if settings.host.is_empty() {
            return Err(MailError::MissingConfig("smtp host".into()));
        }

        let builder = if settings.secure {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&settings.host)
                .map_err(|e| MailError::Connection(e.to_string()))?
        } else {
            let tls = TlsParameters::new(settings.host.clone())
                .map_err(|e| MailError::Connection(e.to_string()))?;
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&settings.host)
                .tls(Tls::Opportunistic(tls))
        };

        let transport = builder
            .port(settings.port)
            .timeout(Some(timeout))
            .credentials(Credentials::new(
                settings.username.clone(),
                settings.password.clone(),
            ))
            .build();

        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Build a lettre Message from our Email type, returning it together with
    /// the generated Message-ID.
    fn build_message(email: &Email) -> Result<(Message, String), MailError> {
        let from: Mailbox = email
            .from
            .parse()
            .map_err(|_| MailError::InvalidAddress(email.from.clone()))?;

        let message_id = format!("<{}@{}>", Uuid::new_v4(), from.email.domain());

        let mut builder = Message::builder()
            .from(from)
            .message_id(Some(message_id.clone()))
            .subject(&email.subject);

        let to: Mailbox = email
            .to
            .parse()
            .map_err(|_| MailError::InvalidAddress(email.to.clone()))?;
        builder = builder.to(to);

        if let Some(reply_to) = &email.reply_to {
            let mailbox: Mailbox = reply_to
                .parse()
                .map_err(|_| MailError::InvalidAddress(reply_to.clone()))?;
            builder = builder.reply_to(mailbox);
        }

        let message = match &email.body {
            EmailBody::Text(text) => builder.singlepart(SinglePart::plain(text.clone())),
            EmailBody::Html(html) => builder.singlepart(SinglePart::html(html.clone())),
            EmailBody::Alternative { text, html } => builder
                .multipart(MultiPart::alternative_plain_html(text.clone(), html.clone())),
        }
        .map_err(|e| MailError::Build(e.to_string()))?;

        Ok((message, message_id))
    }
}

/// Errors reported by the server for this message, or by the client while
/// preparing it, only affect that message. Anything else means the
/// connection is gone.
fn classify(err: lettre::transport::smtp::Error) -> MailError {
    if err.is_permanent()
        || err.is_transient()
        || err.is_response()
        || err.is_client()
        || err.is_timeout()
    {
        MailError::Rejected(err.to_string())
    } else {
        MailError::Connection(err.to_string())
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: &Email) -> Result<String, MailError> {
        let (message, message_id) = Self::build_message(email)?;

        self.transport.send(message).await.map_err(classify)?;

        Ok(message_id)
    }

    async fn verify(&self) -> Result<(), MailError> {
        match self.transport.test_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(MailError::Connection("server did not accept the connection".into())),
            Err(e) => Err(MailError::Connection(e.to_string())),
        }
    }
}
