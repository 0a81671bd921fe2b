//! Software key store using AES-256-GCM
//!
//! Keys live in memory (zeroized on drop) and, when opened with a key file,
//! are mirrored to a 0600 JSON file that stands in for the device keystore.

use aes_gcm::{
    Aes256Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use rand::{Rng, RngCore, rngs::OsRng};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use tokio::sync::RwLock;
use zeroize::Zeroizing;

use super::{KeyHandle, KeyStore, NONCE_SIZE};
use crate::error::CryptoError;

const KEY_SIZE: usize = 32;

type KeyMaterial = Zeroizing<[u8; KEY_SIZE]>;

enum KeySlot {
    Active(KeyMaterial),
    /// Handle is known but the platform no longer lets us use it
    Revoked,
}

/// On-disk layout of the key file
#[derive(Default, Serialize, Deserialize)]
struct KeyFile {
    #[serde(default)]
    keys: BTreeMap<String, String>,
    #[serde(default)]
    revoked: BTreeSet<String>,
}

/// AES-256-GCM [`KeyStore`] with optional file persistence.
pub struct SoftwareKeyStore {
    slots: RwLock<HashMap<KeyHandle, KeySlot>>,
    key_file: Option<PathBuf>,
}

impl SoftwareKeyStore {
    /// Process-lifetime store; keys vanish when it is dropped
    pub fn in_memory() -> Self {
        Self {
            slots: RwLock::new(HashMap::new()),
            key_file: None,
        }
    }

    /// Open (or create) a file-backed store.
    ///
    /// Fails with [`CryptoError::Unavailable`] if the file cannot be read,
    /// parsed, or its directory created.
    pub fn open_at(path: &Path) -> Result<Self, CryptoError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CryptoError::Unavailable(format!("Failed to create key directory: {}", e))
            })?;
        }

        let slots = if path.exists() {
            let contents = Zeroizing::new(std::fs::read_to_string(path).map_err(|e| {
                CryptoError::Unavailable(format!("Failed to read key file: {}", e))
            })?);
            let file: KeyFile = serde_json::from_str(&contents)
                .map_err(|e| CryptoError::Unavailable(format!("Unreadable key file: {}", e)))?;
            Self::slots_from_file(file)?
        } else {
            HashMap::new()
        };

        Ok(Self {
            slots: RwLock::new(slots),
            key_file: Some(path.to_path_buf()),
        })
    }

    /// Mark a key as invalidated, as a platform keystore does when the user
    /// changes biometrics or the enclave revokes access.
    pub async fn revoke(&self, key: &KeyHandle) -> Result<(), CryptoError> {
        let mut slots = self.slots.write().await;
        if let Some(slot) = slots.get_mut(key) {
            *slot = KeySlot::Revoked;
        }
        self.persist(&slots).await
    }

    /// Whether the store still tracks a handle (active or revoked)
    pub async fn contains(&self, key: &KeyHandle) -> bool {
        self.slots.read().await.contains_key(key)
    }

    /// Number of tracked handles
    pub async fn key_count(&self) -> usize {
        self.slots.read().await.len()
    }

    fn slots_from_file(file: KeyFile) -> Result<HashMap<KeyHandle, KeySlot>, CryptoError> {
        let mut slots = HashMap::with_capacity(file.keys.len() + file.revoked.len());
        for (id, encoded) in file.keys {
            let decoded = Zeroizing::new(
                BASE64
                    .decode(encoded.as_bytes())
                    .map_err(|e| CryptoError::Unavailable(format!("Bad key encoding: {}", e)))?,
            );
            if decoded.len() != KEY_SIZE {
                return Err(CryptoError::Unavailable(format!(
                    "Key {} has invalid length {}",
                    id,
                    decoded.len()
                )));
            }
            let mut material = Zeroizing::new([0u8; KEY_SIZE]);
            material.copy_from_slice(&decoded);
            slots.insert(KeyHandle::new(id), KeySlot::Active(material));
        }
        for id in file.revoked {
            slots.insert(KeyHandle::new(id), KeySlot::Revoked);
        }
        Ok(slots)
    }

    /// Mirror the slots to the key file, if any.
    ///
    /// Called with the write lock held so file contents follow lock order.
    async fn persist(&self, slots: &HashMap<KeyHandle, KeySlot>) -> Result<(), CryptoError> {
        let Some(path) = &self.key_file else {
            return Ok(());
        };

        let mut file = KeyFile::default();
        for (handle, slot) in slots {
            match slot {
                KeySlot::Active(material) => {
                    file.keys
                        .insert(handle.as_str().to_string(), BASE64.encode(&material[..]));
                }
                KeySlot::Revoked => {
                    file.revoked.insert(handle.as_str().to_string());
                }
            }
        }
        let contents = Zeroizing::new(
            serde_json::to_string(&file)
                .map_err(|e| CryptoError::Unavailable(format!("Failed to encode keys: {}", e)))?,
        );
        // Encoded key strings in `file` are not zeroized by serde; drop it now
        drop(file);

        let tmp_path = path.with_extension("tmp");
        tokio::fs::write(&tmp_path, contents.as_bytes())
            .await
            .map_err(|e| CryptoError::Unavailable(format!("Failed to write key file: {}", e)))?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(&tmp_path, std::fs::Permissions::from_mode(0o600))
                .await
                .map_err(|e| {
                    CryptoError::Unavailable(format!("Failed to protect key file: {}", e))
                })?;
        }

        tokio::fs::rename(&tmp_path, path)
            .await
            .map_err(|e| CryptoError::Unavailable(format!("Failed to replace key file: {}", e)))
    }

    fn cipher_for(
        slots: &HashMap<KeyHandle, KeySlot>,
        key: &KeyHandle,
    ) -> Result<Aes256Gcm, CryptoError> {
        match slots.get(key) {
            Some(KeySlot::Active(material)) => Aes256Gcm::new_from_slice(&material[..])
                .map_err(|e| CryptoError::Unavailable(format!("Failed to create cipher: {}", e))),
            Some(KeySlot::Revoked) | None => Err(CryptoError::KeyInvalidated),
        }
    }

    fn check_nonce(nonce: &[u8]) -> Result<(), CryptoError> {
        if nonce.len() != NONCE_SIZE {
            return Err(CryptoError::Corrupted(format!(
                "Invalid nonce length {}",
                nonce.len()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyStore for SoftwareKeyStore {
    async fn probe(&self) -> Result<(), CryptoError> {
        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut material[..]);
        let cipher = Aes256Gcm::new_from_slice(&material[..])
            .map_err(|e| CryptoError::Unavailable(format!("Failed to create cipher: {}", e)))?;

        let nonce = [0u8; NONCE_SIZE];
        let sealed = cipher
            .encrypt(Nonce::from_slice(&nonce), &b"probe"[..])
            .map_err(|_| CryptoError::Unavailable("AES-GCM self-test failed".to_string()))?;
        let opened = cipher
            .decrypt(Nonce::from_slice(&nonce), &sealed[..])
            .map_err(|_| CryptoError::Unavailable("AES-GCM self-test failed".to_string()))?;
        if opened != b"probe" {
            return Err(CryptoError::Unavailable(
                "AES-GCM self-test mismatch".to_string(),
            ));
        }

        if let Some(path) = &self.key_file
            && let Some(parent) = path.parent()
            && !parent.is_dir()
        {
            return Err(CryptoError::Unavailable(format!(
                "Key directory {} is missing",
                parent.display()
            )));
        }
        Ok(())
    }

    async fn generate_key(&self) -> Result<KeyHandle, CryptoError> {
        let mut material = Zeroizing::new([0u8; KEY_SIZE]);
        OsRng.fill_bytes(&mut material[..]);

        let mut slots = self.slots.write().await;
        let handle = loop {
            let candidate = KeyHandle::new(format!("key-{:032x}", OsRng.r#gen::<u128>()));
            if !slots.contains_key(&candidate) {
                break candidate;
            }
        };
        slots.insert(handle.clone(), KeySlot::Active(material));

        if let Err(e) = self.persist(&slots).await {
            slots.remove(&handle);
            return Err(e);
        }
        Ok(handle)
    }

    async fn encrypt(
        &self,
        key: &KeyHandle,
        nonce: &[u8],
        plaintext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_nonce(nonce)?;
        let cipher = Self::cipher_for(&*self.slots.read().await, key)?;
        cipher
            .encrypt(Nonce::from_slice(nonce), plaintext)
            .map_err(|_| CryptoError::Corrupted("Encryption failed".to_string()))
    }

    async fn decrypt(
        &self,
        key: &KeyHandle,
        nonce: &[u8],
        ciphertext: &[u8],
    ) -> Result<Vec<u8>, CryptoError> {
        Self::check_nonce(nonce)?;
        let cipher = Self::cipher_for(&*self.slots.read().await, key)?;
        cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CryptoError::Corrupted("Authentication tag mismatch".to_string()))
    }

    async fn destroy_key(&self, key: &KeyHandle) -> Result<(), CryptoError> {
        let mut slots = self.slots.write().await;
        if slots.remove(key).is_some() {
            self.persist(&slots).await?;
        }
        Ok(())
    }
}
