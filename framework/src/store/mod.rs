//! Persistence seams used by the API and the dispatch pipeline.
//!
//! - [`AccountStore`]: per-user SMTP settings and sender identity.
//! - [`DeliveryLog`]: append-only record of every send attempt.
//! - [`UserStore`]: login accounts.
//!
//! [`PgStore`] implements all three on Postgres; [`MemoryStore`] keeps
//! everything in process for development and tests.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use serde::Serialize;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::Role;
use crate::crypto::CryptoError;
use crate::mail::SmtpSettings;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("{0} already exists")]
    Conflict(String),

    #[error("corrupt record: {0}")]
    Corrupt(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Who outgoing mail claims to be from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SenderIdentity {
    pub name: String,
    pub email: String,
    pub reply_to: Option<String>,
    pub signature: Option<String>,
}

impl SenderIdentity {
    /// Reply-To address: the configured one, or the sender address.
    pub fn reply_address(&self) -> &str {
        self.reply_to.as_deref().unwrap_or(&self.email)
    }
}

/// One persisted send attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryLogEntry {
    pub id: Uuid,
    pub user_id: Uuid,
    pub recipient: String,
    pub subject: String,
    pub success: bool,
    pub message_id: Option<String>,
    pub error: Option<String>,
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl DeliveryLogEntry {
    pub fn delivered(user_id: Uuid, recipient: &str, subject: &str, message_id: &str) -> Self {
        Self::new(user_id, recipient, subject, Ok(message_id))
    }

    pub fn failed(user_id: Uuid, recipient: &str, subject: &str, error: &str) -> Self {
        Self::new(user_id, recipient, subject, Err(error))
    }

    fn new(user_id: Uuid, recipient: &str, subject: &str, outcome: Result<&str, &str>) -> Self {
        DeliveryLogEntry {
            id: Uuid::new_v4(),
            user_id,
            recipient: recipient.to_string(),
            subject: subject.to_string(),
            success: outcome.is_ok(),
            message_id: outcome.ok().map(str::to_string),
            error: outcome.err().map(str::to_string),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserRecord {
    pub id: Uuid,
    pub username: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
    pub created_at: OffsetDateTime,
}

#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub name: String,
    pub role: Role,
    pub password_hash: String,
}

#[async_trait]
pub trait AccountStore: Send + Sync + 'static {
    async fn smtp_settings(&self, user_id: Uuid) -> Result<Option<SmtpSettings>, StoreError>;

    async fn identity(&self, user_id: Uuid) -> Result<Option<SenderIdentity>, StoreError>;

    /// Insert or replace the user's SMTP settings.
    async fn save_smtp_settings(
        &self,
        user_id: Uuid,
        settings: &SmtpSettings,
    ) -> Result<(), StoreError>;

    /// Insert or replace the user's sender identity.
    async fn save_identity(
        &self,
        user_id: Uuid,
        identity: &SenderIdentity,
    ) -> Result<(), StoreError>;
}

/// Append-only sink for delivery attempts.
#[async_trait]
pub trait DeliveryLog: Send + Sync + 'static {
    async fn append(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError>;

    /// Most recent entries for a user, newest first.
    async fn recent(&self, user_id: Uuid, limit: u32) -> Result<Vec<DeliveryLogEntry>, StoreError>;
}

#[async_trait]
pub trait UserStore: Send + Sync + 'static {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError>;

    /// Fails with [`StoreError::Conflict`] when the username is taken.
    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError>;

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError>;
}
