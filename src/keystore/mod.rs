//! Secure key management
//!
//! A [`KeyStore`] owns symmetric keys and only ever hands out opaque
//! [`KeyHandle`]s. Key bytes never leave the store; callers encrypt and
//! decrypt through it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;

pub mod software;

pub use software::SoftwareKeyStore;

/// Nonce size for AES-256-GCM (96 bits = 12 bytes)
pub const NONCE_SIZE: usize = 12;

/// Opaque reference to a key held by a [`KeyStore`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyHandle(String);

impl KeyHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for KeyHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Non-extractable key management.
///
/// `decrypt` must report a revoked or unknown handle as
/// [`CryptoError::KeyInvalidated`] and an authentication failure as
/// [`CryptoError::Corrupted`]; platform adapters map their native errors
/// into these variants rather than matching on messages.
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Check the store is usable on this device
    async fn probe(&self) -> Result<(), CryptoError>;

    /// Create a fresh 256-bit key
    async fn generate_key(&self) -> Result<KeyHandle, CryptoError>;

    /// Authenticated encryption with no associated data
    async fn encrypt(
        &self,
        key: &KeyHandle,
        nonce: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    async fn decrypt(
        &self,
        key: &KeyHandle,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError>;

    /// Forget a key; unknown handles are ignored
    async fn destroy_key(&self, key: &KeyHandle) -> Result<(), CryptoError>;

    /// Nonce length expected by `encrypt`/`decrypt`
    fn nonce_len(&self) -> usize {
        NONCE_SIZE
    }
}
