//! TTL cache over a shared [`KvBackend`]
//!
//! Keys are stored as `"{namespace}-{key}"` with a JSON [`CacheEntry`] payload.
//! Expiry is checked on every read, so correctness never depends on the
//! background sweep having run.

use serde::{Serialize, de::DeserializeOwned};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::{CacheEntry, CacheTtl};
use crate::backend::KvBackend;
use crate::clock::{Clock, SystemClock, duration_millis};
use crate::error::StoreError;
use crate::keys::Namespace;

/// Shared state used by both the cache handle and its sweeper task
struct CacheCore {
    namespace: Namespace,
    backend: Arc<dyn KvBackend>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
}

struct Sweeper {
    shutdown_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Namespaced key/value cache with per-entry absolute expiry.
///
/// Dropping the cache (or calling [`TtlCache::close`]) stops the sweep.
pub struct TtlCache {
    core: Arc<CacheCore>,
    sweeper: Mutex<Option<Sweeper>>,
}

/// Builder for [`TtlCache`]
pub struct TtlCacheBuilder {
    namespace: String,
    backend: Arc<dyn KvBackend>,
    ttl: Duration,
    sweep_interval: Option<Duration>,
    clock: Arc<dyn Clock>,
}

impl TtlCacheBuilder {
    /// Lifetime of entries written with [`TtlCache::set`]
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = Some(interval);
        self
    }

    /// Do not start a background sweep; call [`TtlCache::sweep`] manually
    pub fn without_sweeper(mut self) -> Self {
        self.sweep_interval = None;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Build the cache and start its sweeper.
    ///
    /// The sweeper needs a tokio runtime; without one the cache still works
    /// and only manual sweeps run.
    pub fn build(self) -> Result<TtlCache, StoreError> {
        let core = Arc::new(CacheCore {
            namespace: Namespace::new(self.namespace)?,
            backend: self.backend,
            clock: self.clock,
            ttl: self.ttl,
        });

        let sweeper = match self.sweep_interval {
            Some(interval) if interval.is_zero() => {
                return Err(StoreError::InvalidArgument(
                    "sweep interval must be greater than zero".to_string(),
                ));
            }
            Some(interval) => match tokio::runtime::Handle::try_current() {
                Ok(runtime) => Some(spawn_sweeper(&runtime, Arc::clone(&core), interval)),
                Err(_) => {
                    log::warn!(
                        "No async runtime, background sweep disabled for cache '{}'",
                        core.namespace
                    );
                    None
                }
            },
            None => None,
        };

        Ok(TtlCache {
            core,
            sweeper: Mutex::new(sweeper),
        })
    }
}

fn spawn_sweeper(
    runtime: &tokio::runtime::Handle,
    core: Arc<CacheCore>,
    interval: Duration,
) -> Sweeper {
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    let handle = runtime.spawn(async move {
        let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                _ = ticker.tick() => {
                    let stats = core.sweep().await;
                    if stats.removed > 0 || stats.failed > 0 {
                        log::debug!(
                            "Sweep of '{}': {} inspected, {} removed, {} failed",
                            core.namespace,
                            stats.inspected,
                            stats.removed,
                            stats.failed
                        );
                    }
                }
            }
        }
    });
    Sweeper {
        shutdown_tx,
        handle,
    }
}

impl TtlCache {
    /// Start building a cache for `namespace` on `backend`.
    ///
    /// Defaults: one hour TTL, sweep every ten seconds, system clock.
    pub fn builder(namespace: impl Into<String>, backend: Arc<dyn KvBackend>) -> TtlCacheBuilder {
        TtlCacheBuilder {
            namespace: namespace.into(),
            backend,
            ttl: CacheTtl::DEFAULT,
            sweep_interval: Some(CacheTtl::SWEEP_INTERVAL),
            clock: Arc::new(SystemClock),
        }
    }

    /// Cache with the default sweep interval and clock
    pub fn new(
        namespace: impl Into<String>,
        backend: Arc<dyn KvBackend>,
        ttl: Duration,
    ) -> Result<Self, StoreError> {
        Self::builder(namespace, backend).ttl(ttl).build()
    }

    pub fn namespace(&self) -> &Namespace {
        &self.core.namespace
    }

    pub fn ttl(&self) -> Duration {
        self.core.ttl
    }

    /// Get a cached value if present and not expired.
    ///
    /// Backend and decode errors are logged and reported as a miss.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let full_key = self.core.namespace.scoped(key);

        let bytes = match self.core.backend.get_item(&full_key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                log::debug!("Cache miss: {}", full_key);
                return None;
            }
            Err(e) => {
                log::warn!("Cache read failed for {}: {}", full_key, e);
                return None;
            }
        };

        let entry = match CacheEntry::from_bytes(&bytes) {
            Ok(entry) => entry,
            Err(e) => {
                log::warn!("Ignoring undecodable cache entry {}: {}", full_key, e);
                return None;
            }
        };

        if entry.is_expired(self.core.clock.now_millis()) {
            log::debug!("Cache expired: {}", full_key);
            return None;
        }

        match serde_json::from_value(entry.value) {
            Ok(value) => {
                log::debug!("Cache hit: {}", full_key);
                Some(value)
            }
            Err(e) => {
                log::warn!("Cached value for {} has unexpected shape: {}", full_key, e);
                None
            }
        }
    }

    /// Store a value with the cache's TTL, replacing any previous entry
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T) {
        self.set_with_ttl(key, value, self.core.ttl).await;
    }

    /// Store a value with an explicit TTL
    pub async fn set_with_ttl<T: Serialize + ?Sized>(&self, key: &str, value: &T, ttl: Duration) {
        let full_key = self.core.namespace.scoped(key);
        let expires_at = self
            .core
            .clock
            .now_millis()
            .saturating_add(duration_millis(ttl));

        let bytes = match serde_json::to_value(value)
            .and_then(|value| CacheEntry::new(value, expires_at).to_bytes())
        {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("Not caching {}: {}", full_key, e);
                return;
            }
        };

        if let Err(e) = self.core.backend.set_item(&full_key, &bytes).await {
            log::warn!("Cache write failed for {}: {}", full_key, e);
        }
    }

    /// Remove a key; absent keys are fine
    pub async fn delete(&self, key: &str) {
        let full_key = self.core.namespace.scoped(key);
        if let Err(e) = self.core.backend.remove_item(&full_key).await {
            log::warn!("Cache delete failed for {}: {}", full_key, e);
        }
    }

    /// Remove every entry in this namespace.
    ///
    /// Returns the number of keys removed (zero if the backend failed).
    pub async fn flush_all(&self) -> usize {
        let keys = match self
            .core
            .backend
            .keys_with_prefix(self.core.namespace.prefix())
            .await
        {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Cache flush of '{}' failed: {}", self.core.namespace, e);
                return 0;
            }
        };

        if keys.is_empty() {
            return 0;
        }

        match self.core.backend.remove_items(&keys).await {
            Ok(()) => {
                log::debug!("Flushed {} entries from '{}'", keys.len(), self.core.namespace);
                keys.len()
            }
            Err(e) => {
                log::warn!("Cache flush of '{}' failed: {}", self.core.namespace, e);
                0
            }
        }
    }

    /// Run one sweep pass now
    pub async fn sweep(&self) -> SweepStats {
        self.core.sweep().await
    }

    /// Entry counts for this namespace
    pub async fn stats(&self) -> CacheStats {
        self.core.stats().await
    }

    /// Stop the background sweep. Safe to call more than once.
    ///
    /// In-flight reads and writes are not affected.
    pub fn close(&self) {
        let sweeper = match self.sweeper.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sweeper) = sweeper {
            let _ = sweeper.shutdown_tx.send(true);
            sweeper.handle.abort();
            log::debug!("Sweeper for '{}' stopped", self.core.namespace);
        }
    }

    /// Whether the background sweep is still scheduled
    pub fn is_sweeping(&self) -> bool {
        match self.sweeper.lock() {
            Ok(guard) => guard.as_ref().is_some_and(|s| !s.handle.is_finished()),
            Err(_) => false,
        }
    }
}

impl Drop for TtlCache {
    fn drop(&mut self) {
        self.close();
    }
}

impl CacheCore {
    /// Remove entries this pass observes as expired.
    ///
    /// Each key is re-read right before the decision and handled on its own,
    /// so one bad entry never stops the rest of the pass.
    async fn sweep(&self) -> SweepStats {
        let mut stats = SweepStats::default();

        let keys = match self.backend.keys_with_prefix(self.namespace.prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Sweep of '{}' could not list keys: {}", self.namespace, e);
                stats.failed += 1;
                return stats;
            }
        };

        for key in keys {
            stats.inspected += 1;

            let bytes = match self.backend.get_item(&key).await {
                Ok(Some(bytes)) => bytes,
                // Deleted since listing
                Ok(None) => continue,
                Err(e) => {
                    log::warn!("Sweep could not read {}: {}", key, e);
                    stats.failed += 1;
                    continue;
                }
            };

            let entry = match CacheEntry::from_bytes(&bytes) {
                Ok(entry) => entry,
                Err(e) => {
                    log::warn!("Sweep skipping undecodable entry {}: {}", key, e);
                    stats.failed += 1;
                    continue;
                }
            };

            if !entry.is_expired(self.clock.now_millis()) {
                continue;
            }

            match self.backend.remove_item(&key).await {
                Ok(()) => stats.removed += 1,
                Err(e) => {
                    log::warn!("Sweep could not remove {}: {}", key, e);
                    stats.failed += 1;
                }
            }
        }

        stats
    }

    async fn stats(&self) -> CacheStats {
        let mut stats = CacheStats::default();

        let keys = match self.backend.keys_with_prefix(self.namespace.prefix()).await {
            Ok(keys) => keys,
            Err(e) => {
                log::warn!("Could not collect stats for '{}': {}", self.namespace, e);
                return stats;
            }
        };

        let now = self.clock.now_millis();
        for key in keys {
            let Ok(Some(bytes)) = self.backend.get_item(&key).await else {
                continue;
            };
            stats.total_entries += 1;
            stats.total_size_bytes += bytes.len();

            match CacheEntry::from_bytes(&bytes) {
                Ok(entry) if !entry.is_expired(now) => stats.valid_entries += 1,
                _ => stats.expired_entries += 1,
            }
        }

        stats
    }
}

/// Outcome of one sweep pass
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepStats {
    pub inspected: usize,
    pub removed: usize,
    pub failed: usize,
}

/// Statistics about one cache namespace
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: usize,
    pub valid_entries: usize,
    /// Expired or undecodable entries still awaiting the sweep
    pub expired_entries: usize,
    pub total_size_bytes: usize,
}
