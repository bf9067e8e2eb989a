use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{
    AccountStore, DeliveryLog, DeliveryLogEntry, NewUser, SenderIdentity, StoreError, UserRecord,
    UserStore,
};
use crate::mail::SmtpSettings;

/// In-memory store for development and testing.
///
/// Not durable: everything is lost on restart, and SMTP passwords are kept
/// in the clear.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    users: Vec<UserRecord>,
    smtp: HashMap<Uuid, SmtpSettings>,
    identities: HashMap<Uuid, SenderIdentity>,
    log: Vec<DeliveryLogEntry>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every logged attempt for a user, oldest first.
    pub async fn log_for(&self, user_id: Uuid) -> Vec<DeliveryLogEntry> {
        let inner = self.inner.lock().await;
        inner
            .log
            .iter()
            .filter(|e| e.user_id == user_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    async fn smtp_settings(&self, user_id: Uuid) -> Result<Option<SmtpSettings>, StoreError> {
        Ok(self.inner.lock().await.smtp.get(&user_id).cloned())
    }

    async fn identity(&self, user_id: Uuid) -> Result<Option<SenderIdentity>, StoreError> {
        Ok(self.inner.lock().await.identities.get(&user_id).cloned())
    }

    async fn save_smtp_settings(
        &self,
        user_id: Uuid,
        settings: &SmtpSettings,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.smtp.insert(user_id, settings.clone());
        Ok(())
    }

    async fn save_identity(
        &self,
        user_id: Uuid,
        identity: &SenderIdentity,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        inner.identities.insert(user_id, identity.clone());
        Ok(())
    }
}

#[async_trait]
impl DeliveryLog for MemoryStore {
    async fn append(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        self.inner.lock().await.log.push(entry.clone());
        Ok(())
    }

    async fn recent(&self, user_id: Uuid, limit: u32) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .log
            .iter()
            .rev()
            .filter(|e| e.user_id == user_id)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl UserStore for MemoryStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.username == username).cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.iter().find(|u| u.id == id).cloned())
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let mut inner = self.inner.lock().await;
        if inner.users.iter().any(|u| u.username == user.username) {
            return Err(StoreError::Conflict(format!("user {}", user.username)));
        }

        let record = UserRecord {
            id: Uuid::new_v4(),
            username: user.username,
            name: user.name,
            role: user.role,
            password_hash: user.password_hash,
            created_at: OffsetDateTime::now_utc(),
        };
        inner.users.push(record.clone());
        Ok(record)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        let mut inner = self.inner.lock().await;
        if let Some(user) = inner.users.iter_mut().find(|u| u.id == id) {
            user.password_hash = password_hash.to_string();
        }
        Ok(())
    }
}
