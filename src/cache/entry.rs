//! Stored form of a cache entry

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A cached value with its absolute expiry (epoch milliseconds).
///
/// Entries are never mutated in place; `set` writes a whole new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    pub expires_at: i64,
}

impl CacheEntry {
    pub fn new(value: Value, expires_at: i64) -> Self {
        Self { value, expires_at }
    }

    /// Expired once `now >= expires_at`
    pub fn is_expired(&self, now_millis: i64) -> bool {
        now_millis >= self.expires_at
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
