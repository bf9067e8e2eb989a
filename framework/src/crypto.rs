//! Sealing of secrets stored at rest (SMTP passwords).

use core::fmt;
use std::sync::Arc;

use base64::prelude::*;
use orion::aead;
use serde::de;
use serde::{Deserialize, Deserializer};

/// Symmetric key used to seal stored secrets.
///
/// Cheap to clone and deliberately opaque: it has no `Debug` output that
/// could leak the key through logs or responses.
#[derive(Clone)]
pub struct EncryptionKey(Arc<aead::SecretKey>);

/// Length in bytes of an [`EncryptionKey`].
pub const KEY_LEN: usize = 32;

#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    #[error("base64 error {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("encryption key must be {KEY_LEN} bytes, got {0}")]
    KeyLength(usize),

    #[error("utf8 error {0}")]
    Utf8(#[from] std::string::FromUtf8Error),

    #[error("unknown crypto error")]
    Unknown,
}

impl From<orion::errors::UnknownCryptoError> for CryptoError {
    fn from(_err: orion::errors::UnknownCryptoError) -> Self {
        CryptoError::Unknown
    }
}

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

impl EncryptionKey {
    /// Random [`KEY_LEN`] byte key, returned together with its base64 encoding so it
    /// can be written to `ENCRYPTION_KEY`.
    pub fn generate() -> (EncryptionKey, String) {
        let key = aead::SecretKey::default();
        let encoded = BASE64_STANDARD.encode(key.unprotected_as_bytes());
        (EncryptionKey(Arc::new(key)), encoded)
    }

    pub fn try_from_base64(val: &str) -> Result<EncryptionKey, CryptoError> {
        let bytes = BASE64_STANDARD.decode(val.trim().as_bytes())?;
        EncryptionKey::try_from(&*bytes)
    }

    /// Seal `plaintext` on a blocking thread. A fresh nonce is generated and
    /// prepended to the returned ciphertext.
    pub async fn seal(&self, plaintext: String) -> Result<Vec<u8>, CryptoError> {
        let key = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<u8>, CryptoError> {
            Ok(aead::seal(&key, plaintext.as_bytes())?)
        })
        .await
        .map_err(|_| CryptoError::Unknown)?
    }

    /// Open a ciphertext produced by [`EncryptionKey::seal`].
    pub async fn open(&self, ciphertext: Vec<u8>) -> Result<String, CryptoError> {
        let key = self.0.clone();
        tokio::task::spawn_blocking(move || -> Result<String, CryptoError> {
            let bytes = aead::open(&key, &ciphertext)?;
            Ok(String::from_utf8(bytes)?)
        })
        .await
        .map_err(|_| CryptoError::Unknown)?
    }
}

impl TryFrom<&[u8]> for EncryptionKey {
    type Error = CryptoError;

    fn try_from(bytes: &[u8]) -> Result<Self, Self::Error> {
        if bytes.len() != KEY_LEN {
            return Err(CryptoError::KeyLength(bytes.len()));
        }
        let key = aead::SecretKey::from_slice(bytes)?;
        Ok(EncryptionKey(Arc::new(key)))
    }
}

/// `deserialize_with` helper reading an [`EncryptionKey`] from base64.
pub fn deserialize_base64_key<'de, D>(deserializer: D) -> Result<EncryptionKey, D::Error>
where
    D: Deserializer<'de>,
{
    let encoded = String::deserialize(deserializer)?;
    EncryptionKey::try_from_base64(&encoded).map_err(de::Error::custom)
}
