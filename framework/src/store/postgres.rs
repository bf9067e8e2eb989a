//! Postgres backed store.
//!
//! Schema lives in `migrations/` and is applied with [`PgStore::migrate`].
//! SMTP passwords are sealed with the server [`EncryptionKey`] before they
//! are written and opened again on read.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use uuid::Uuid;

use super::{
    AccountStore, DeliveryLog, DeliveryLogEntry, NewUser, SenderIdentity, StoreError, UserRecord,
    UserStore,
};
use crate::auth::Role;
use crate::crypto::EncryptionKey;
use crate::mail::SmtpSettings;

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
    key: EncryptionKey,
}

impl PgStore {
    pub fn new(pool: PgPool, key: EncryptionKey) -> Self {
        Self { pool, key }
    }

    pub async fn connect(
        database_url: &str,
        max_connections: u32,
        key: EncryptionKey,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool, key))
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn user_from_row(row: PgRow) -> Result<UserRecord, StoreError> {
    let role: String = row.get("role");
    Ok(UserRecord {
        id: row.get("id"),
        username: row.get("username"),
        name: row.get("name"),
        role: role
            .parse::<Role>()
            .map_err(|_| StoreError::Corrupt(format!("unknown role {role}")))?,
        password_hash: row.get("password_hash"),
        created_at: row.get("created_at"),
    })
}

fn log_entry_from_row(row: PgRow) -> DeliveryLogEntry {
    DeliveryLogEntry {
        id: row.get("id"),
        user_id: row.get("user_id"),
        recipient: row.get("recipient"),
        subject: row.get("subject"),
        success: row.get("success"),
        message_id: row.get("message_id"),
        error: row.get("error"),
        created_at: row.get("created_at"),
    }
}

#[async_trait]
impl AccountStore for PgStore {
    async fn smtp_settings(&self, user_id: Uuid) -> Result<Option<SmtpSettings>, StoreError> {
        let row = sqlx::query(
            "SELECT host, port, secure, username, password_ciphertext FROM smtp_configs WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let port: i32 = row.get("port");
        let ciphertext: Vec<u8> = row.get("password_ciphertext");
        Ok(Some(SmtpSettings {
            host: row.get("host"),
            port: u16::try_from(port)
                .map_err(|_| StoreError::Corrupt(format!("smtp port {port}")))?,
            secure: row.get("secure"),
            username: row.get("username"),
            password: self.key.open(ciphertext).await?,
        }))
    }

    async fn identity(&self, user_id: Uuid) -> Result<Option<SenderIdentity>, StoreError> {
        let row = sqlx::query(
            "SELECT name, email, reply_to, signature FROM email_identities WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| SenderIdentity {
            name: row.get("name"),
            email: row.get("email"),
            reply_to: row.get("reply_to"),
            signature: row.get("signature"),
        }))
    }

    async fn save_smtp_settings(
        &self,
        user_id: Uuid,
        settings: &SmtpSettings,
    ) -> Result<(), StoreError> {
        let ciphertext = self.key.seal(settings.password.clone()).await?;

        sqlx::query(
            r#"
            INSERT INTO smtp_configs (user_id, host, port, secure, username, password_ciphertext)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (user_id) DO UPDATE SET
                host = EXCLUDED.host,
                port = EXCLUDED.port,
                secure = EXCLUDED.secure,
                username = EXCLUDED.username,
                password_ciphertext = EXCLUDED.password_ciphertext,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&settings.host)
        .bind(i32::from(settings.port))
        .bind(settings.secure)
        .bind(&settings.username)
        .bind(ciphertext)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn save_identity(
        &self,
        user_id: Uuid,
        identity: &SenderIdentity,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_identities (user_id, name, email, reply_to, signature)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id) DO UPDATE SET
                name = EXCLUDED.name,
                email = EXCLUDED.email,
                reply_to = EXCLUDED.reply_to,
                signature = EXCLUDED.signature,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&identity.name)
        .bind(&identity.email)
        .bind(&identity.reply_to)
        .bind(&identity.signature)
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl DeliveryLog for PgStore {
    async fn append(&self, entry: &DeliveryLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO email_logs (id, user_id, recipient, subject, success, message_id, error, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.id)
        .bind(entry.user_id)
        .bind(&entry.recipient)
        .bind(&entry.subject)
        .bind(entry.success)
        .bind(&entry.message_id)
        .bind(&entry.error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn recent(&self, user_id: Uuid, limit: u32) -> Result<Vec<DeliveryLogEntry>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_id, recipient, subject, success, message_id, error, created_at
            FROM email_logs
            WHERE user_id = $1
            ORDER BY seq DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(log_entry_from_row).collect())
    }
}

#[async_trait]
impl UserStore for PgStore {
    async fn find_by_username(&self, username: &str) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query(
            "SELECT id, username, name, role, password_hash, created_at FROM users WHERE username = $1",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?
        .map(user_from_row)
        .transpose()
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, StoreError> {
        sqlx::query(
            "SELECT id, username, name, role, password_hash, created_at FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .map(user_from_row)
        .transpose()
    }

    async fn create(&self, user: NewUser) -> Result<UserRecord, StoreError> {
        let row = sqlx::query(
            r#"
            INSERT INTO users (id, username, name, role, password_hash)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, username, name, role, password_hash, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&user.username)
        .bind(&user.name)
        .bind(user.role.to_string())
        .bind(&user.password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(db_err) = &e {
                if db_err.constraint() == Some("users_username_key") {
                    return StoreError::Conflict(format!("user {}", user.username));
                }
            }
            StoreError::Database(e)
        })?;

        user_from_row(row)
    }

    async fn update_password(&self, id: Uuid, password_hash: &str) -> Result<(), StoreError> {
        sqlx::query("UPDATE users SET password_hash = $1 WHERE id = $2")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
