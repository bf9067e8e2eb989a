use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::auth::deserialize_hmac_key;
use crate::crypto::{deserialize_base64_key, EncryptionKey};

pub use config::ConfigError;

pub trait EnvConfig: Sized {
    fn from_env() -> Result<Self, ConfigError>;
    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError>;
}

impl<D> EnvConfig for D
where
    D: DeserializeOwned,
{
    fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        config::Config::builder()
            .add_source(config::Environment::default().try_parsing(true))
            .build()?
            .try_deserialize()
    }

    fn from_env_with_prefix(prefix: &str) -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        config::Config::builder()
            .add_source(config::Environment::with_prefix(prefix).try_parsing(true))
            .build()?
            .try_deserialize()
    }
}

/// Server settings read from the environment (see `.env.example`).
#[derive(Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_max_connections")]
    pub database_max_connections: u32,

    /// HMAC secret for session tokens. Must be at least 32 bytes.
    #[serde(deserialize_with = "deserialize_hmac_key")]
    pub hmac_key: String,

    /// Base64 encoded 32 byte key used to seal SMTP passwords at rest.
    #[serde(deserialize_with = "deserialize_base64_key")]
    pub encryption_key: EncryptionKey,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Delay inserted between recipients of a bulk send. Zero disables it.
    #[serde(default = "default_bulk_throttle_ms")]
    pub bulk_throttle_ms: u64,

    #[serde(default = "default_smtp_timeout_secs")]
    pub smtp_timeout_secs: u64,

    #[serde(default = "default_token_ttl_hours")]
    pub token_ttl_hours: i64,

    /// Requests per client address per window across `/api`. Zero disables.
    #[serde(default = "default_api_rate_limit")]
    pub api_rate_limit: u32,

    /// Requests per client address per window to `/api/auth`. Zero disables.
    #[serde(default = "default_auth_rate_limit")]
    pub auth_rate_limit: u32,

    #[serde(default = "default_rate_limit_window_secs")]
    pub rate_limit_window_secs: u64,

    /// Comma separated browser origins allowed by CORS.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: String,
}

impl Settings {
    pub fn bulk_throttle(&self) -> Duration {
        Duration::from_millis(self.bulk_throttle_ms)
    }

    pub fn smtp_timeout(&self) -> Duration {
        Duration::from_secs(self.smtp_timeout_secs)
    }

    pub fn token_ttl(&self) -> time::Duration {
        time::Duration::hours(self.token_ttl_hours)
    }

    pub fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }

    pub fn cors_origins(&self) -> Vec<&str> {
        self.cors_origins
            .split(',')
            .map(str::trim)
            .filter(|origin| !origin.is_empty())
            .collect()
    }
}

fn default_database_url() -> String {
    "postgresql://localhost/mailroom".to_string()
}

fn default_max_connections() -> u32 {
    5
}

fn default_port() -> u16 {
    3000
}

fn default_bulk_throttle_ms() -> u64 {
    100
}

fn default_smtp_timeout_secs() -> u64 {
    10
}

fn default_token_ttl_hours() -> i64 {
    24 * 7
}

fn default_api_rate_limit() -> u32 {
    100
}

fn default_auth_rate_limit() -> u32 {
    5
}

fn default_rate_limit_window_secs() -> u64 {
    15 * 60
}

fn default_cors_origins() -> String {
    "http://localhost:3000,http://localhost:5173".to_string()
}
