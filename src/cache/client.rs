//! Read-through caching for opaque request functions
//!
//! Wraps a [`TtlCache`] so callers can say "give me this response, from the
//! cache if possible". A cache failure always falls through to the request.

use serde::{Serialize, de::DeserializeOwned};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::TtlCache;

/// Read-through wrapper around a [`TtlCache`].
///
/// Caching can be disabled via the `enabled` flag, in which case every
/// fetch goes straight to the request.
#[derive(Clone)]
pub struct CachedFetcher {
    cache: Option<Arc<TtlCache>>,
}

impl CachedFetcher {
    /// Create a new fetcher.
    ///
    /// # Arguments
    /// * `cache` - Cache holding responses for this client
    /// * `enabled` - Whether caching is enabled (false bypasses the cache entirely)
    pub fn new(cache: Arc<TtlCache>, enabled: bool) -> Self {
        Self {
            cache: enabled.then_some(cache),
        }
    }

    /// Fetcher that never caches
    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.cache.is_some()
    }

    /// Return the cached value for `key`, or run `request` and cache its result.
    ///
    /// `ttl` overrides the cache's default lifetime. Request errors are
    /// returned unchanged and never cached.
    pub async fn fetch<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        request: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cache) = &self.cache
            && let Some(cached) = cache.get::<T>(key).await
        {
            return Ok(cached);
        }

        let result = request().await?;

        if let Some(cache) = &self.cache {
            match ttl {
                Some(ttl) => cache.set_with_ttl(key, &result, ttl).await,
                None => cache.set(key, &result).await,
            }
        }
        Ok(result)
    }

    /// Drop a cached response, e.g. after a mutation
    pub async fn invalidate(&self, key: &str) {
        if let Some(cache) = &self.cache {
            cache.delete(key).await;
        }
    }
}
