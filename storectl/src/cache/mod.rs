//! Cache-aside for read-heavy lookups.
//!
//! [`Cache`] is a cheap, cloneable handle built once at startup and stored in
//! [`AppState`](crate::AppState). It is either disabled, in which case every call goes straight
//! to the loader, or backed by a [`CacheBackend`]:
//!
//! - [`RedisCache`]: a shared Redis server, so all instances see the same entries
//! - [`MemoryCache`]: a bounded in-process cache, for single-instance deployments and tests
//!
//! Values are stored as JSON. A cache failure never fails the request: it is logged at `warn`
//! and the request carries on as if the entry were missing.

mod memory;
mod redis;

pub use memory::MemoryCache;
pub use redis::RedisCache;

use std::{future::Future, sync::Arc, time::Duration};

use async_trait::async_trait;
use serde::{Serialize, de::DeserializeOwned};
use tracing::{debug, info, instrument, warn};

use crate::{
    config::{CacheBackendKind, CacheConfig},
    errors::Error,
};

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("redis: {0}")]
    Redis(#[from] ::redis::RedisError),

    #[error("cached value is not valid JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid key pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("cache connection is closed")]
    Closed,
}

pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// A key-value store holding JSON strings with a per-entry lifetime.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> CacheResult<Option<String>>;

    async fn set(&self, key: &str, value: String, ttl: Duration) -> CacheResult<()>;

    /// Remove one key, returning whether it existed.
    async fn delete(&self, key: &str) -> CacheResult<bool>;

    /// Remove every key matching a glob pattern (`*`, `?`, `[...]`), returning how many went.
    async fn delete_pattern(&self, pattern: &str) -> CacheResult<u64>;

    /// Release the underlying connection. Later calls fail with [`CacheError::Closed`].
    async fn close(&self);
}

#[derive(Clone, Default)]
pub struct Cache {
    backend: Option<Arc<dyn CacheBackend>>,
    default_ttl: Duration,
}

impl std::fmt::Debug for Cache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cache")
            .field("enabled", &self.is_enabled())
            .field("default_ttl", &self.default_ttl)
            .finish()
    }
}

impl Cache {
    /// A cache that stores nothing.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn with_backend(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            default_ttl,
        }
    }

    /// Build the cache described by `config`, connecting to Redis if that backend is selected.
    pub async fn connect(config: &CacheConfig) -> anyhow::Result<Self> {
        if !config.enabled {
            info!("Cache disabled");
            return Ok(Self::disabled());
        }

        let backend: Arc<dyn CacheBackend> = match config.backend {
            CacheBackendKind::Redis => {
                let url = config
                    .redis_url
                    .as_deref()
                    .ok_or_else(|| anyhow::anyhow!("cache.redis_url is required for the redis backend"))?;
                Arc::new(RedisCache::connect(url, config.scan_count).await?)
            }
            CacheBackendKind::Memory => Arc::new(MemoryCache::new(config.max_capacity)),
        };

        info!(backend = ?config.backend, default_ttl = ?config.default_ttl, "Cache enabled");
        Ok(Self::with_backend(backend, config.default_ttl))
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Return the cached value for `key`, or run `loader`, cache its result for `ttl` (the
    /// configured default when `None`) and return it. Loader errors are returned and nothing is
    /// cached.
    #[instrument(skip(self, ttl, loader))]
    pub async fn get_or_set<T, F, Fut>(&self, key: &str, ttl: Option<Duration>, loader: F) -> Result<T, Error>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, Error>>,
    {
        let Some(backend) = &self.backend else {
            return loader().await;
        };

        match backend.get(key).await {
            Ok(Some(json)) => match serde_json::from_str(&json) {
                Ok(value) => {
                    debug!("Cache hit");
                    return Ok(value);
                }
                Err(e) => warn!(error = %e, "Discarding unreadable cache entry"),
            },
            Ok(None) => debug!("Cache miss"),
            Err(e) => warn!(error = %e, "Cache read failed"),
        }

        let value = loader().await?;

        match serde_json::to_string(&value) {
            Ok(json) => {
                if let Err(e) = backend.set(key, json, ttl.unwrap_or(self.default_ttl)).await {
                    warn!(error = %e, "Cache write failed");
                }
            }
            Err(e) => warn!(error = %e, "Value could not be serialized for caching"),
        }

        Ok(value)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, key: &str) {
        if let Some(backend) = &self.backend
            && let Err(e) = backend.delete(key).await
        {
            warn!(error = %e, "Cache delete failed");
        }
    }

    /// Delete every entry matching a glob pattern. Returns the number removed, 0 on failure.
    #[instrument(skip(self))]
    pub async fn delete_pattern(&self, pattern: &str) -> u64 {
        let Some(backend) = &self.backend else {
            return 0;
        };
        match backend.delete_pattern(pattern).await {
            Ok(deleted) => {
                debug!(deleted, "Cache pattern delete");
                deleted
            }
            Err(e) => {
                warn!(error = %e, "Cache pattern delete failed");
                0
            }
        }
    }

    pub async fn close(&self) {
        if let Some(backend) = &self.backend {
            backend.close().await;
            info!("Cache closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend whose every operation fails.
    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _: &str) -> CacheResult<Option<String>> {
            Err(CacheError::Closed)
        }
        async fn set(&self, _: &str, _: String, _: Duration) -> CacheResult<()> {
            Err(CacheError::Closed)
        }
        async fn delete(&self, _: &str) -> CacheResult<bool> {
            Err(CacheError::Closed)
        }
        async fn delete_pattern(&self, _: &str) -> CacheResult<u64> {
            Err(CacheError::Closed)
        }
        async fn close(&self) {}
    }

    fn memory_cache() -> Cache {
        Cache::with_backend(Arc::new(MemoryCache::new(100)), Duration::from_secs(60))
    }

    async fn load_counted(calls: &AtomicUsize, value: u32) -> Result<u32, Error> {
        calls.fetch_add(1, Ordering::SeqCst);
        Ok(value)
    }

    #[tokio::test]
    async fn test_get_or_set_loads_once() {
        let cache = memory_cache();
        let calls = AtomicUsize::new(0);

        let first = cache.get_or_set("answer", None, || load_counted(&calls, 42)).await.unwrap();
        let second = cache.get_or_set("answer", None, || load_counted(&calls, 7)).await.unwrap();

        assert_eq!((first, second), (42, 42));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_delete_forces_reload() {
        let cache = memory_cache();
        let calls = AtomicUsize::new(0);

        cache.get_or_set("k", None, || load_counted(&calls, 1)).await.unwrap();
        cache.delete("k").await;
        let reloaded = cache.get_or_set("k", None, || load_counted(&calls, 2)).await.unwrap();

        assert_eq!(reloaded, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_loader_error_is_not_cached() {
        let cache = memory_cache();

        let err = cache
            .get_or_set::<u32, _, _>("k", None, || async { Err(Error::not_found("Product")) })
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let calls = AtomicUsize::new(0);
        assert_eq!(cache.get_or_set("k", None, || load_counted(&calls, 5)).await.unwrap(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_cache_always_loads() {
        let cache = Cache::disabled();
        let calls = AtomicUsize::new(0);

        cache.get_or_set("k", None, || load_counted(&calls, 1)).await.unwrap();
        cache.get_or_set("k", None, || load_counted(&calls, 1)).await.unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(cache.delete_pattern("*").await, 0);
    }

    #[tokio::test]
    async fn test_backend_failures_fall_through_to_loader() {
        let cache = Cache::with_backend(Arc::new(BrokenBackend), Duration::from_secs(60));
        let calls = AtomicUsize::new(0);

        assert_eq!(cache.get_or_set("k", None, || load_counted(&calls, 9)).await.unwrap(), 9);
        cache.delete("k").await;
        assert_eq!(cache.delete_pattern("k*").await, 0);
    }

    #[tokio::test]
    async fn test_delete_pattern_leaves_other_keys() {
        let cache = memory_cache();
        let calls = AtomicUsize::new(0);

        for key in ["products:list:1:10:", "products:list:2:10:milk", "products:abc"] {
            cache.get_or_set(key, None, || load_counted(&calls, 1)).await.unwrap();
        }

        assert_eq!(cache.delete_pattern("products:list:*").await, 2);

        cache.get_or_set("products:abc", None, || load_counted(&calls, 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_connect_disabled() {
        let cache = Cache::connect(&CacheConfig::default()).await.unwrap();
        assert!(!cache.is_enabled());
    }

    #[tokio::test]
    async fn test_connect_memory_and_close() {
        let config = CacheConfig {
            enabled: true,
            backend: CacheBackendKind::Memory,
            ..Default::default()
        };
        let cache = Cache::connect(&config).await.unwrap();
        assert!(cache.is_enabled());
        assert_eq!(cache.default_ttl(), Duration::from_secs(3600));

        let calls = AtomicUsize::new(0);
        cache.get_or_set("k", None, || load_counted(&calls, 1)).await.unwrap();
        cache.close().await;

        // Closed caches stop serving entries but requests still succeed.
        cache.get_or_set("k", None, || load_counted(&calls, 1)).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }
}
