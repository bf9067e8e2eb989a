use std::sync::Arc;

use argon2::password_hash::SaltString;
use argon2::{Argon2, PasswordHash};
use async_trait::async_trait;
use axum::extract::{FromRef, FromRequestParts};
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use axum_extra::headers::authorization::Bearer;
use axum_extra::headers::{Authorization, HeaderMapExt};
use hmac::{Hmac, Mac};
use jwt::{SignWithKey, VerifyWithKey};
use parse_display::{Display, FromStr};
use serde::{de, Deserialize, Deserializer, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::ErrorResponse;

const DEFAULT_TOKEN_TTL: time::Duration = time::Duration::weeks(1);

/// Shortest accepted HMAC secret, in bytes.
pub const MIN_HMAC_KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authentication token required")]
    MissingToken,
    #[error("invalid or expired token")]
    InvalidToken,
    #[error("password hashing error {0}")]
    PasswordHash(argon2::password_hash::Error),
    #[error("password hashing panic")]
    PasswordHashPanic,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = match self {
            AuthError::MissingToken | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            _ => {
                tracing::error!("auth error: {}", self);
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(ErrorResponse::new(self.to_string()))).into_response()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromStr, Display, Serialize, Deserialize)]
#[display(style = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

/// Token claims. `sub` is the user id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub role: Role,
    /// Standard JWT `exp` claim.
    pub exp: i64,
}

/// Signs and verifies bearer tokens (HMAC-SHA384).
#[derive(Clone)]
pub struct JwtManager(Arc<JwtConfig>);

pub struct JwtConfig {
    key: Hmac<sha2::Sha384>,
    ttl: time::Duration,
}

impl JwtConfig {
    pub fn new(secret: &str) -> JwtConfig {
        assert!(
            secret.len() >= MIN_HMAC_KEY_LEN,
            "Provide a longer HMAC_KEY (len={}). Ex: 'openssl rand -base64 48'",
            secret.len()
        );
        let key = Hmac::<sha2::Sha384>::new_from_slice(secret.as_bytes())
            .expect("HMAC-SHA-384 can accept any key length");
        JwtConfig {
            key,
            ttl: DEFAULT_TOKEN_TTL,
        }
    }

    pub fn ttl(mut self, ttl: time::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn build(self) -> JwtManager {
        JwtManager(Arc::new(self))
    }
}

/// `deserialize_with` helper rejecting HMAC secrets that [`JwtConfig::new`]
/// would refuse.
pub fn deserialize_hmac_key<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let secret = String::deserialize(deserializer)?;
    if secret.len() < MIN_HMAC_KEY_LEN {
        return Err(de::Error::custom(format!(
            "HMAC_KEY must be at least {MIN_HMAC_KEY_LEN} bytes, got {}. Ex: 'openssl rand -base64 48'",
            secret.len()
        )));
    }
    Ok(secret)
}

impl JwtManager {
    pub fn issue(&self, user: &AuthUser) -> String {
        let claims = Claims {
            sub: user.id,
            role: user.role,
            exp: (OffsetDateTime::now_utc() + self.0.ttl).unix_timestamp(),
        };
        self.sign(&claims)
    }

    pub fn sign(&self, claims: &Claims) -> String {
        claims
            .sign_with_key(&self.0.key)
            .expect("HMAC signing should be infallible")
    }

    /// Parse, verify and check expiry of a token.
    pub fn verify(&self, token: &str) -> Result<Claims, AuthError> {
        let claims: Claims = token.verify_with_key(&self.0.key).map_err(|e| {
            tracing::debug!("token failed to verify: {}", e);
            AuthError::InvalidToken
        })?;

        if claims.exp < OffsetDateTime::now_utc().unix_timestamp() {
            tracing::debug!(user_id = %claims.sub, "token expired");
            return Err(AuthError::InvalidToken);
        }

        Ok(claims)
    }
}

/// The authenticated caller.
///
/// Use as an extractor on any route that requires a bearer token. The state
/// must expose a [`JwtManager`] through `FromRef`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthUser {
    pub id: Uuid,
    pub role: Role,
}

impl From<Claims> for AuthUser {
    fn from(claims: Claims) -> Self {
        AuthUser {
            id: claims.sub,
            role: claims.role,
        }
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    JwtManager: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let jwt = JwtManager::from_ref(state);
        let header = parts
            .headers
            .typed_get::<Authorization<Bearer>>()
            .ok_or(AuthError::MissingToken)?;

        let claims = jwt.verify(header.token())?;
        Ok(AuthUser::from(claims))
    }
}

/// Hashes a password. Produced hash is a "PHC String" that includes a random salt
///
/// The underlying Argon2 hashing is computationally intensive,
/// therefore performed on a thread where blocking is acceptable
pub async fn hash_password(password: String) -> Result<String, AuthError> {
    tokio::task::spawn_blocking(move || -> Result<String, AuthError> {
        let salt = SaltString::generate(rand::thread_rng());
        Ok(
            PasswordHash::generate(Argon2::default(), password, salt.as_salt())
                .inspect_err(|e| tracing::warn!("failed to generate password hash: {}", e))
                .map_err(AuthError::PasswordHash)?
                .to_string(),
        )
    })
    .await
    .map_err(|_| AuthError::PasswordHashPanic)?
}

/// Verifies a password against a "PHC String" hash.
///
/// Returns `Ok(false)` for a wrong password; `Err` only when the hash itself
/// is unusable.
pub async fn verify_password(password: String, password_hash: String) -> Result<bool, AuthError> {
    tokio::task::spawn_blocking(move || -> Result<bool, AuthError> {
        let hash = PasswordHash::new(&password_hash)
            .inspect_err(|err| tracing::warn!("invalid password hash: {}", err))
            .map_err(AuthError::PasswordHash)?;

        match hash.verify_password(&[&Argon2::default()], password) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => {
                tracing::trace!("failed to verify password hash: {}", err);
                Err(AuthError::PasswordHash(err))
            }
        }
    })
    .await
    .map_err(|_| AuthError::PasswordHashPanic)?
}
