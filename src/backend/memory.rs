//! In-memory backend
//!
//! Used by tests and by callers that want a process-lifetime store. Supports
//! switching into an "unavailable" mode to exercise failure paths.

use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

use super::KvBackend;
use crate::error::StoreError;

/// HashMap-backed [`KvBackend`].
///
/// Clones share the same underlying map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    items: Arc<RwLock<HashMap<String, Vec<u8>>>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent operation fail with `StorageUnavailable`
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of stored items
    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// Copy of the full contents, for state comparisons in tests
    pub async fn snapshot(&self) -> HashMap<String, Vec<u8>> {
        self.items.read().await.clone()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::StorageUnavailable(
                "in-memory backend switched off".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl KvBackend for MemoryBackend {
    async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        self.check()?;
        Ok(self.items.read().await.get(key).cloned())
    }

    async fn set_item(&self, key: &str, value: &[u8]) -> Result<(), StoreError> {
        self.check()?;
        self.items
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove_item(&self, key: &str) -> Result<(), StoreError> {
        self.check()?;
        self.items.write().await.remove(key);
        Ok(())
    }

    async fn get_all_keys(&self) -> Result<BTreeSet<String>, StoreError> {
        self.check()?;
        Ok(self.items.read().await.keys().cloned().collect())
    }

    async fn remove_items(&self, keys: &[String]) -> Result<(), StoreError> {
        self.check()?;
        let mut items = self.items.write().await;
        for key in keys {
            items.remove(key);
        }
        Ok(())
    }
}
