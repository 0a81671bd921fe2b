//! Encrypted credential vault
//!
//! Every `write` seals the payload under a brand-new key and nonce, so key
//! material is never shared between records or between successive writes.
//! Errors are strict: only key invalidation is recovered (by deleting the
//! record); corruption and serialization failures reach the caller.

pub mod record;

use rand::{RngCore, rngs::OsRng};
use serde::{Serialize, de::DeserializeOwned};
use std::sync::Arc;
use tokio::sync::Mutex;
use zeroize::Zeroizing;

use crate::backend::KvBackend;
use crate::error::{CryptoError, StoreError};
use crate::keys::Namespace;
use crate::keystore::{KeyHandle, KeyStore};

pub use record::VaultRecord;

type Result<T> = std::result::Result<T, StoreError>;

/// Namespaced store of encrypted secrets
pub struct CredentialVault {
    namespace: Namespace,
    backend: Arc<dyn KvBackend>,
    keystore: Arc<dyn KeyStore>,
    /// Serializes mutations so replaced keys are always destroyed and a
    /// recovery delete never removes a record written concurrently.
    mutation: Mutex<()>,
}

impl CredentialVault {
    /// Open a vault, failing immediately if storage or key management is
    /// not usable on this device.
    pub async fn new(
        namespace: impl Into<String>,
        backend: Arc<dyn KvBackend>,
        keystore: Arc<dyn KeyStore>,
    ) -> Result<Self> {
        let namespace = Namespace::new(namespace)?;

        keystore.probe().await?;
        let existing = backend.keys_with_prefix(namespace.prefix()).await?;
        log::debug!(
            "Vault '{}' opened with {} record(s)",
            namespace,
            existing.len()
        );

        Ok(Self {
            namespace,
            backend,
            keystore,
            mutation: Mutex::new(()),
        })
    }

    pub fn namespace(&self) -> &Namespace {
        &self.namespace
    }

    /// Encrypt and store `plaintext` under `id`, replacing any previous record
    pub async fn write<T: Serialize + ?Sized>(&self, id: &str, plaintext: &T) -> Result<()> {
        let full_key = self.namespace.scoped(id);
        let serialized = Zeroizing::new(serde_json::to_vec(plaintext)?);

        let _guard = self.mutation.lock().await;
        let previous = self.stored_handle(&full_key).await?;

        let key = self.keystore.generate_key().await?;
        let mut nonce = vec![0u8; self.keystore.nonce_len()];
        OsRng.fill_bytes(&mut nonce);

        let sealed = match self.keystore.encrypt(&key, &nonce, &serialized).await {
            Ok(sealed) => sealed,
            Err(e) => {
                self.discard_key(&key).await;
                return Err(e.into());
            }
        };

        let persisted = match VaultRecord::new(id, key.clone(), &nonce, &sealed).to_bytes() {
            Ok(bytes) => self.backend.set_item(&full_key, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = persisted {
            self.discard_key(&key).await;
            return Err(e);
        }

        if let Some(previous) = previous {
            self.discard_key(&previous).await;
        }
        Ok(())
    }

    /// Decrypt the record for `id`.
    ///
    /// Returns `Ok(None)` when there is no record, or when its key has been
    /// invalidated (the record is deleted so the caller can re-authenticate
    /// and write again). A read that overlaps a rewrite of the same id returns
    /// either the old or the new value.
    pub async fn read<T: DeserializeOwned>(&self, id: &str) -> Result<Option<T>> {
        let full_key = self.namespace.scoped(id);

        let Some(record) = self.load(id, &full_key).await? else {
            return Ok(None);
        };
        match self.open(&record).await? {
            Some(plaintext) => Ok(Some(serde_json::from_slice(&plaintext)?)),
            None => self.read_or_discard(id, &full_key).await,
        }
    }

    /// Second read attempt under the mutation lock.
    ///
    /// The key the first attempt used may have been destroyed by a write that
    /// replaced the record in between. Only a record whose current key is
    /// invalid gets removed.
    async fn read_or_discard<T: DeserializeOwned>(
        &self,
        id: &str,
        full_key: &str,
    ) -> Result<Option<T>> {
        let _guard = self.mutation.lock().await;

        let Some(record) = self.load(id, full_key).await? else {
            return Ok(None);
        };
        match self.open(&record).await? {
            Some(plaintext) => {
                log::debug!("Vault record {} was rewritten during read", full_key);
                Ok(Some(serde_json::from_slice(&plaintext)?))
            }
            None => {
                log::info!(
                    "Key for vault record '{}' was invalidated, removing record",
                    full_key
                );
                self.backend.remove_item(full_key).await?;
                self.discard_key(&record.key_handle).await;
                Ok(None)
            }
        }
    }

    async fn load(&self, id: &str, full_key: &str) -> Result<Option<VaultRecord>> {
        let Some(bytes) = self.backend.get_item(full_key).await? else {
            return Ok(None);
        };
        let record = VaultRecord::from_bytes(&bytes)?;
        if record.id != id {
            return Err(StoreError::Corrupted(format!(
                "Record stored under '{}' belongs to '{}'",
                id, record.id
            )));
        }
        Ok(Some(record))
    }

    /// Plaintext of `record`, or `None` if its key is no longer valid
    async fn open(&self, record: &VaultRecord) -> Result<Option<Zeroizing<Vec<u8>>>> {
        let nonce = record.nonce_bytes()?;
        let ciphertext = record.ciphertext_bytes()?;

        match self
            .keystore
            .decrypt(&record.key_handle, &nonce, &ciphertext)
            .await
        {
            Ok(plaintext) => Ok(Some(Zeroizing::new(plaintext))),
            Err(CryptoError::KeyInvalidated) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove the record for `id` and destroy its key; absent ids are fine
    pub async fn delete(&self, id: &str) -> Result<()> {
        let full_key = self.namespace.scoped(id);

        let _guard = self.mutation.lock().await;
        let handle = self.stored_handle(&full_key).await?;
        self.backend.remove_item(&full_key).await?;

        if let Some(handle) = handle {
            self.discard_key(&handle).await;
        }
        Ok(())
    }

    /// Whether a record exists for `id`, without decrypting it
    pub async fn contains(&self, id: &str) -> Result<bool> {
        let full_key = self.namespace.scoped(id);
        Ok(self.backend.get_item(&full_key).await?.is_some())
    }

    /// Key handle of the stored record, if it can be parsed.
    ///
    /// A corrupted previous record must not block overwriting or deleting it.
    async fn stored_handle(&self, full_key: &str) -> Result<Option<KeyHandle>> {
        let Some(bytes) = self.backend.get_item(full_key).await? else {
            return Ok(None);
        };
        match VaultRecord::from_bytes(&bytes) {
            Ok(record) => Ok(Some(record.key_handle)),
            Err(e) => {
                log::warn!("Replacing unreadable vault record {}: {}", full_key, e);
                Ok(None)
            }
        }
    }

    async fn discard_key(&self, handle: &KeyHandle) {
        if let Err(e) = self.keystore.destroy_key(handle).await {
            log::warn!("Failed to destroy key {}: {}", handle, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::keystore::SoftwareKeyStore;
    use async_trait::async_trait;
    use serde::Deserialize;
    use serde_json::{Value, json};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Login {
        username: String,
        password: String,
    }

    async fn test_vault() -> (CredentialVault, MemoryBackend, Arc<SoftwareKeyStore>) {
        let backend = MemoryBackend::new();
        let keystore = Arc::new(SoftwareKeyStore::in_memory());
        let vault = CredentialVault::new("credentials", Arc::new(backend.clone()), keystore.clone())
            .await
            .unwrap();
        (vault, backend, keystore)
    }

    async fn raw_record(backend: &MemoryBackend, id: &str) -> VaultRecord {
        let bytes = backend
            .get_item(&format!("credentials-{}", id))
            .await
            .unwrap()
            .unwrap();
        VaultRecord::from_bytes(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_write_read_round_trip() {
        let (vault, _backend, _keystore) = test_vault().await;
        let login = Login {
            username: "abc1234".to_string(),
            password: "hunter2".to_string(),
        };

        vault.write("login", &login).await.unwrap();

        assert_eq!(vault.read::<Login>("login").await.unwrap(), Some(login));
    }

    #[tokio::test]
    async fn test_round_trip_arbitrary_json() {
        let (vault, _backend, _keystore) = test_vault().await;
        let payloads = [
            json!(null),
            json!("token"),
            json!(12.5),
            json!([1, "two", {"three": [3]}]),
            json!({"nested": {"deep": [true, false]}, "unicode": "Grüße"}),
        ];

        for (i, payload) in payloads.iter().enumerate() {
            let id = format!("item-{}", i);
            vault.write(&id, payload).await.unwrap();
            assert_eq!(vault.read::<Value>(&id).await.unwrap().as_ref(), Some(payload));
        }
    }

    #[tokio::test]
    async fn test_no_plaintext_at_rest() {
        let (vault, backend, _keystore) = test_vault().await;
        vault.write("session", "very-secret-token").await.unwrap();

        for bytes in backend.snapshot().await.values() {
            let text = String::from_utf8_lossy(bytes);
            assert!(!text.contains("very-secret-token"));
        }
    }

    #[tokio::test]
    async fn test_read_absent() {
        let (vault, _backend, _keystore) = test_vault().await;
        assert_eq!(vault.read::<Value>("nothing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_rewrite_uses_fresh_key_and_nonce() {
        let (vault, backend, keystore) = test_vault().await;

        vault.write("session", "first").await.unwrap();
        let first = raw_record(&backend, "session").await;
        vault.write("session", "second").await.unwrap();
        let second = raw_record(&backend, "session").await;

        assert_ne!(first.nonce, second.nonce);
        assert_ne!(first.key_handle, second.key_handle);

        // Replaced key is destroyed
        assert!(!keystore.contains(&first.key_handle).await);
        assert_eq!(keystore.key_count().await, 1);

        // The old key/nonce pair cannot open the new ciphertext
        let result = keystore
            .decrypt(
                &first.key_handle,
                &first.nonce_bytes().unwrap(),
                &second.ciphertext_bytes().unwrap(),
            )
            .await;
        assert!(result.is_err());

        let result = keystore
            .decrypt(
                &second.key_handle,
                &first.nonce_bytes().unwrap(),
                &second.ciphertext_bytes().unwrap(),
            )
            .await;
        assert!(matches!(result, Err(CryptoError::Corrupted(_))));

        assert_eq!(
            vault.read::<String>("session").await.unwrap().as_deref(),
            Some("second")
        );
    }

    #[tokio::test]
    async fn test_distinct_ids_get_distinct_keys() {
        let (vault, backend, _keystore) = test_vault().await;
        vault.write("a", "1").await.unwrap();
        vault.write("b", "1").await.unwrap();

        let a = raw_record(&backend, "a").await;
        let b = raw_record(&backend, "b").await;
        assert_ne!(a.key_handle, b.key_handle);
    }

    #[tokio::test]
    async fn test_key_invalidation_recovers_to_absent() {
        let (vault, backend, keystore) = test_vault().await;
        vault.write("session", "token").await.unwrap();
        let record = raw_record(&backend, "session").await;

        keystore.revoke(&record.key_handle).await.unwrap();

        assert_eq!(vault.read::<String>("session").await.unwrap(), None);
        assert!(!vault.contains("session").await.unwrap());
        assert_eq!(vault.read::<String>("session").await.unwrap(), None);

        // Caller re-authenticates and writes again
        vault.write("session", "fresh").await.unwrap();
        assert_eq!(
            vault.read::<String>("session").await.unwrap().as_deref(),
            Some("fresh")
        );
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_is_corrupted() {
        let (vault, backend, _keystore) = test_vault().await;
        vault.write("session", "token").await.unwrap();

        let mut record = raw_record(&backend, "session").await;
        let mut sealed = record.ciphertext_bytes().unwrap();
        sealed[0] ^= 0x01;
        record.ciphertext = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            &sealed,
        );
        backend
            .set_item("credentials-session", &record.to_bytes().unwrap())
            .await
            .unwrap();

        let err = vault.read::<String>("session").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));

        // Not silently dropped
        assert!(vault.contains("session").await.unwrap());
    }

    #[tokio::test]
    async fn test_unparsable_record_is_corrupted() {
        let (vault, backend, _keystore) = test_vault().await;
        backend
            .set_item("credentials-session", b"\x00garbage")
            .await
            .unwrap();

        let err = vault.read::<String>("session").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));

        // Overwriting a corrupted record still works
        vault.write("session", "token").await.unwrap();
        assert_eq!(
            vault.read::<String>("session").await.unwrap().as_deref(),
            Some("token")
        );
    }

    #[tokio::test]
    async fn test_record_moved_between_ids_is_corrupted() {
        let (vault, backend, _keystore) = test_vault().await;
        vault.write("a", "secret-a").await.unwrap();
        let bytes = backend.get_item("credentials-a").await.unwrap().unwrap();
        backend.set_item("credentials-b", &bytes).await.unwrap();

        let err = vault.read::<String>("b").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupted(_)));
    }

    #[tokio::test]
    async fn test_wrong_type_is_serialization_error() {
        let (vault, _backend, _keystore) = test_vault().await;
        vault.write("session", "just a string").await.unwrap();

        let err = vault.read::<Login>("session").await.unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent_and_destroys_key() {
        let (vault, backend, keystore) = test_vault().await;
        vault.write("session", "token").await.unwrap();
        let record = raw_record(&backend, "session").await;

        vault.delete("session").await.unwrap();
        vault.delete("session").await.unwrap();

        assert_eq!(vault.read::<String>("session").await.unwrap(), None);
        assert!(!keystore.contains(&record.key_handle).await);
    }

    #[tokio::test]
    async fn test_backend_errors_propagate() {
        let (vault, backend, _keystore) = test_vault().await;
        backend.set_unavailable(true);

        assert!(matches!(
            vault.read::<String>("session").await,
            Err(StoreError::StorageUnavailable(_))
        ));
        assert!(matches!(
            vault.write("session", "token").await,
            Err(StoreError::StorageUnavailable(_))
        ));
    }

    struct NoDeviceKeyStore;

    #[async_trait]
    impl KeyStore for NoDeviceKeyStore {
        async fn probe(&self) -> std::result::Result<(), CryptoError> {
            Err(CryptoError::Unavailable("no secure hardware".to_string()))
        }

        async fn generate_key(&self) -> std::result::Result<KeyHandle, CryptoError> {
            Err(CryptoError::Unavailable("no secure hardware".to_string()))
        }

        async fn encrypt(
            &self,
            _key: &KeyHandle,
            _nonce: &[u8],
            _plaintext: &[u8],
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            Err(CryptoError::Unavailable("no secure hardware".to_string()))
        }

        async fn decrypt(
            &self,
            _key: &KeyHandle,
            _nonce: &[u8],
            _ciphertext: &[u8],
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            Err(CryptoError::Unavailable("no secure hardware".to_string()))
        }

        async fn destroy_key(&self, _key: &KeyHandle) -> std::result::Result<(), CryptoError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_construction_fails_without_device() {
        let result = CredentialVault::new(
            "credentials",
            Arc::new(MemoryBackend::new()),
            Arc::new(NoDeviceKeyStore),
        )
        .await;

        assert!(matches!(result, Err(StoreError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_construction_fails_without_storage() {
        let backend = MemoryBackend::new();
        backend.set_unavailable(true);

        let result = CredentialVault::new(
            "credentials",
            Arc::new(backend),
            Arc::new(SoftwareKeyStore::in_memory()),
        )
        .await;

        assert!(matches!(result, Err(StoreError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn test_concurrent_writes_last_write_wins() {
        let (vault, _backend, keystore) = test_vault().await;
        let vault = Arc::new(vault);

        let writes = (0..8).map(|i| {
            let vault = Arc::clone(&vault);
            async move { vault.write("session", &format!("token-{}", i)).await }
        });
        for result in futures::future::join_all(writes).await {
            result.unwrap();
        }

        let value = vault.read::<String>("session").await.unwrap().unwrap();
        assert!(value.starts_with("token-"));
        // Every replaced key was destroyed
        assert_eq!(keystore.key_count().await, 1);
    }

    /// Key store whose next `decrypt` waits for `release` once armed
    struct GatedKeyStore {
        inner: SoftwareKeyStore,
        armed: std::sync::atomic::AtomicBool,
        entered: tokio::sync::Notify,
        release: tokio::sync::Notify,
    }

    impl GatedKeyStore {
        fn new() -> Self {
            Self {
                inner: SoftwareKeyStore::in_memory(),
                armed: std::sync::atomic::AtomicBool::new(false),
                entered: tokio::sync::Notify::new(),
                release: tokio::sync::Notify::new(),
            }
        }

        fn arm(&self) {
            self.armed.store(true, std::sync::atomic::Ordering::SeqCst);
        }
    }

    #[async_trait]
    impl KeyStore for GatedKeyStore {
        async fn probe(&self) -> std::result::Result<(), CryptoError> {
            self.inner.probe().await
        }

        async fn generate_key(&self) -> std::result::Result<KeyHandle, CryptoError> {
            self.inner.generate_key().await
        }

        async fn encrypt(
            &self,
            key: &KeyHandle,
            nonce: &[u8],
            plaintext: &[u8],
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            self.inner.encrypt(key, nonce, plaintext).await
        }

        async fn decrypt(
            &self,
            key: &KeyHandle,
            nonce: &[u8],
            ciphertext: &[u8],
        ) -> std::result::Result<Vec<u8>, CryptoError> {
            if self.armed.swap(false, std::sync::atomic::Ordering::SeqCst) {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.decrypt(key, nonce, ciphertext).await
        }

        async fn destroy_key(&self, key: &KeyHandle) -> std::result::Result<(), CryptoError> {
            self.inner.destroy_key(key).await
        }
    }

    #[tokio::test]
    async fn test_read_during_rewrite_sees_a_value() {
        let keystore = Arc::new(GatedKeyStore::new());
        let vault = CredentialVault::new(
            "credentials",
            Arc::new(MemoryBackend::new()),
            keystore.clone(),
        )
        .await
        .unwrap();
        vault.write("session", "old-token").await.unwrap();

        keystore.arm();
        let (observed, ()) = tokio::join!(vault.read::<String>("session"), async {
            // The read holds the old key handle by now; replacing the record destroys it
            keystore.entered.notified().await;
            vault.write("session", "new-token").await.unwrap();
            keystore.release.notify_one();
        });

        assert_eq!(observed.unwrap().as_deref(), Some("new-token"));
        assert_eq!(
            vault.read::<String>("session").await.unwrap().as_deref(),
            Some("new-token")
        );
        assert_eq!(keystore.inner.key_count().await, 1);
    }
}
