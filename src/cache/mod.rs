//! Namespaced TTL cache for API responses
//!
//! Entries carry an absolute expiry and are purged by a background sweep.
//! Every failure degrades to a cache miss; a broken cache never breaks a
//! read path.

pub mod client;
pub mod entry;
pub mod ttl;

use std::time::Duration;

/// Cache TTL presets for the responses the app caches
pub struct CacheTtl;

impl CacheTtl {
    // Map overlays only change with an app release
    pub const MAP_OVERLAY: Duration = Duration::from_secs(14 * 24 * 60 * 60); // 14 days

    // Food plans are published daily
    pub const FOOD_PLAN: Duration = Duration::from_secs(12 * 60 * 60); // 12 hr

    // Re-validate the session against the server every few minutes
    pub const SESSION_VALIDATION: Duration = Duration::from_secs(5 * 60); // 5 min

    pub const DEFAULT: Duration = Duration::from_secs(60 * 60); // 1 hr

    /// Interval between background sweeps
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
}

// Re-export main types
pub use client::CachedFetcher;
pub use entry::CacheEntry;
pub use ttl::{CacheStats, SweepStats, TtlCache, TtlCacheBuilder};
