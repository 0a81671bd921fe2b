//! Command execution context
//!
//! Loads the config once, resolves the data directory and opens the store so
//! handlers only deal with their own logic.

use std::path::PathBuf;
use std::sync::Arc;

use safestash::backend::{KvBackend, SqliteBackend};
use safestash::cache::TtlCache;
use safestash::config::Config;
use safestash::error::Result;
use safestash::keystore::SoftwareKeyStore;
use safestash::vault::CredentialVault;

use crate::cli::{GlobalOptions, OutputFormat};

/// Context for command execution containing config, store and output options.
pub struct CommandContext {
    /// Loaded configuration with CLI overrides applied
    pub config: Config,
    /// Resolved data directory
    pub data_dir: PathBuf,
    /// Durable store shared by the cache and the vault
    pub backend: Arc<SqliteBackend>,
    /// Output format preference
    pub format: OutputFormat,
}

impl CommandContext {
    /// Create a new command context.
    ///
    /// # Errors
    /// Returns error if the config is malformed or the store cannot be opened.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let mut config = Config::load_or_default(opts.config_ref())?;

        if let Some(dir) = opts.data_dir_ref() {
            config.data_dir = Some(dir.to_path_buf());
        }

        let data_dir = config.data_dir()?;
        let backend = Arc::new(SqliteBackend::open_at(&data_dir)?);
        log::debug!("Using store at {}", backend.path().display());

        Ok(Self {
            config,
            data_dir,
            backend,
            format: opts.format,
        })
    }

    /// Cache handle for one namespace.
    ///
    /// Commands are one-shot, so no background sweeper is started.
    pub fn cache(&self, namespace: &str) -> Result<TtlCache> {
        let backend: Arc<dyn KvBackend> = self.backend.clone();
        let cache = self
            .config
            .cache
            .builder(namespace, backend)
            .without_sweeper()
            .build()?;
        Ok(cache)
    }

    /// Open the credential vault with the file-backed key store
    pub async fn vault(&self) -> Result<CredentialVault> {
        let key_file = self.config.key_file()?;
        let keystore = Arc::new(
            SoftwareKeyStore::open_at(&key_file).map_err(safestash::error::StoreError::from)?,
        );
        let backend: Arc<dyn KvBackend> = self.backend.clone();
        let vault = CredentialVault::new(self.config.vault.namespace.clone(), backend, keystore)
            .await?;
        Ok(vault)
    }
}
