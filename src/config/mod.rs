//! Configuration management for safestash

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use crate::backend::{KvBackend, SqliteBackend};
use crate::cache::{TtlCache, TtlCacheBuilder};
use crate::error::{ConfigError, Result};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding the store database and key file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    /// Response cache settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Credential vault settings
    #[serde(default)]
    pub vault: VaultSettings,
}

/// Response cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Seconds between background sweeps
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,

    /// Lifetime of entries written without an explicit TTL
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

/// Credential vault settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaultSettings {
    /// Backend namespace for vault records
    #[serde(default = "default_vault_namespace")]
    pub namespace: String,

    /// Key file location (defaults to `<data_dir>/keys.json`)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_file: Option<PathBuf>,
}

fn default_sweep_interval_secs() -> u64 {
    10
}

fn default_ttl_secs() -> u64 {
    3600
}

fn default_vault_namespace() -> String {
    "credentials".to_string()
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for VaultSettings {
    fn default() -> Self {
        Self {
            namespace: default_vault_namespace(),
            key_file: None,
        }
    }
}

impl CacheSettings {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }

    /// Cache builder with the configured TTL and sweep interval
    pub fn builder(
        &self,
        namespace: impl Into<String>,
        backend: Arc<dyn KvBackend>,
    ) -> TtlCacheBuilder {
        TtlCache::builder(namespace, backend)
            .ttl(self.default_ttl())
            .sweep_interval(self.sweep_interval())
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or(ConfigError::Invalid(
            "Could not determine config directory".to_string(),
        ))?;

        Ok(dir.join("safestash").join("config.yaml"))
    }

    /// Load configuration from `path`, or the default path when `None`.
    ///
    /// A missing file yields the default configuration.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => p.to_path_buf(),
            None => Self::default_path()?,
        };

        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load_from(&path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(ConfigError::NotFound.into());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents).map_err(ConfigError::from)?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a specific path
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SaveError(e.to_string()))?;

        std::fs::write(path, contents)?;

        // Set file permissions to 600 on Unix systems
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mut perms = std::fs::metadata(path)?.permissions();
            perms.set_mode(0o600);
            std::fs::set_permissions(path, perms)?;
        }

        Ok(())
    }

    /// Reject settings the stores cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.cache.sweep_interval_secs == 0 {
            return Err(
                ConfigError::Invalid("cache.sweep_interval_secs must be positive".into()).into(),
            );
        }
        if self.cache.default_ttl_secs == 0 {
            return Err(
                ConfigError::Invalid("cache.default_ttl_secs must be positive".into()).into(),
            );
        }
        if self.vault.namespace.is_empty() || self.vault.namespace.ends_with('-') {
            return Err(ConfigError::Invalid(format!(
                "vault.namespace '{}' must be non-empty and not end with '-'",
                self.vault.namespace
            ))
            .into());
        }
        Ok(())
    }

    /// Resolved data directory
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(SqliteBackend::default_dir()?),
        }
    }

    /// Resolved key file location
    pub fn key_file(&self) -> Result<PathBuf> {
        match &self.vault.key_file {
            Some(path) => Ok(path.clone()),
            None => Ok(self.data_dir()?.join("keys.json")),
        }
    }
}
