//! Durable key-value backends
//!
//! The cache and the vault only ever talk to storage through [`KvBackend`].
//! Each key's payload is written as one atomic unit; there are no cross-key
//! transactions.

use async_trait::async_trait;
use std::collections::BTreeSet;

use crate::error::StoreError;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Asynchronous string-keyed byte store shared by every cache and vault in
/// the process. Namespace prefixes are the only isolation between users.
#[async_trait]
pub trait KvBackend: Send + Sync {
    /// Fetch the raw bytes for a key
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    /// Store bytes under a key, replacing any previous value
    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError>;

    /// Remove a key; removing an absent key is not an error
    async fn remove_item(&self, key: &str) -> Result<(), StoreError>;

    /// All keys currently stored
    async fn get_all_keys(&self) -> Result<BTreeSet<String>, StoreError>;

    /// Remove several keys at once
    async fn remove_items(&self, keys: &[String]) -> Result<(), StoreError>;

    /// Keys starting with `prefix`
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .get_all_keys()
            .await?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect())
    }
}
