//! Stored form of a vault entry

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::keystore::KeyHandle;

/// One encrypted secret.
///
/// Only the key handle is stored; the key itself stays in the key store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VaultRecord {
    pub id: String,
    pub key_handle: KeyHandle,
    /// Base64 nonce, unique per encryption
    pub nonce: String,
    /// Base64 AES-GCM ciphertext including the tag
    pub ciphertext: String,
    pub created_at: DateTime<Utc>,
}

impl VaultRecord {
    pub fn new(id: &str, key_handle: KeyHandle, nonce: &[u8], ciphertext: &[u8]) -> Self {
        Self {
            id: id.to_string(),
            key_handle,
            nonce: BASE64.encode(nonce),
            ciphertext: BASE64.encode(ciphertext),
            created_at: Utc::now(),
        }
    }

    pub fn nonce_bytes(&self) -> Result<Vec<u8>, StoreError> {
        BASE64
            .decode(self.nonce.as_bytes())
            .map_err(|e| StoreError::Corrupted(format!("Invalid nonce encoding: {}", e)))
    }

    pub fn ciphertext_bytes(&self) -> Result<Vec<u8>, StoreError> {
        BASE64
            .decode(self.ciphertext.as_bytes())
            .map_err(|e| StoreError::Corrupted(format!("Invalid ciphertext encoding: {}", e)))
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, StoreError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse a stored record; anything unparsable is corruption
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StoreError> {
        serde_json::from_slice(bytes)
            .map_err(|e| StoreError::Corrupted(format!("Unreadable vault record: {}", e)))
    }
}
