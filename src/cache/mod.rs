//! Cache layer
//!
//! Fast tier in front of the session store. It supports:
//! - In-memory cache (moka) - default, for single-instance deployment
//! - Redis cache - optional, for distributed deployment
//!
//! The cache is strictly a mirror of durable rows. Every value here can
//! be rebuilt from the database, so cache failures are absorbed by the
//! callers rather than surfaced to clients.

pub mod memory;
#[cfg(feature = "redis-cache")]
pub mod redis;

use anyhow::Result;
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{CacheConfig, CacheDriver};

/// State of a fixed-window counter after an increment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CounterWindow {
    /// Counter value including the increment that produced this snapshot
    pub count: u64,
    /// Seconds until the window resets
    pub ttl_secs: u64,
}

/// Cache layer trait
///
/// This trait defines the interface for cache implementations.
/// Note: Due to Rust's object safety rules, this trait cannot be used
/// as a trait object (`dyn CacheLayer`). Use the `Cache` enum instead
/// for runtime polymorphism.
#[async_trait]
pub trait CacheLayer: Send + Sync {
    /// Get a value from cache
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>>;

    /// Set a value in cache with TTL
    async fn set<T: Serialize + Send + Sync>(&self, key: &str, value: &T, ttl: Duration)
        -> Result<()>;

    /// Delete a value from cache
    async fn delete(&self, key: &str) -> Result<()>;

    /// Increment a fixed-window counter, starting the window on first hit
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<CounterWindow>;

    /// Add a member to an integer set
    async fn set_add(&self, key: &str, member: i64) -> Result<()>;

    /// Remove a member from an integer set
    async fn set_remove(&self, key: &str, member: i64) -> Result<()>;

    /// List all members of an integer set
    async fn set_members(&self, key: &str) -> Result<Vec<i64>>;
}

pub use memory::MemoryCache;
#[cfg(feature = "redis-cache")]
pub use redis::RedisCache;

/// Unified cache enum for runtime polymorphism
///
/// Since `CacheLayer` trait has generic methods, it cannot be used as a trait
/// object. This enum provides runtime polymorphism by wrapping concrete cache
/// implementations.
#[derive(Debug)]
pub enum Cache {
    /// In-memory cache using moka
    Memory(MemoryCache),
    /// Redis cache for distributed deployment
    #[cfg(feature = "redis-cache")]
    Redis(RedisCache),
}

#[async_trait]
impl CacheLayer for Cache {
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self {
            Cache::Memory(cache) => cache.get(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.get(key).await,
        }
    }

    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set(key, value, ttl).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set(key, value, ttl).await,
        }
    }

    async fn delete(&self, key: &str) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.delete(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.delete(key).await,
        }
    }

    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<CounterWindow> {
        match self {
            Cache::Memory(cache) => cache.incr_with_ttl(key, window).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.incr_with_ttl(key, window).await,
        }
    }

    async fn set_add(&self, key: &str, member: i64) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set_add(key, member).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set_add(key, member).await,
        }
    }

    async fn set_remove(&self, key: &str, member: i64) -> Result<()> {
        match self {
            Cache::Memory(cache) => cache.set_remove(key, member).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set_remove(key, member).await,
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<i64>> {
        match self {
            Cache::Memory(cache) => cache.set_members(key).await,
            #[cfg(feature = "redis-cache")]
            Cache::Redis(cache) => cache.set_members(key).await,
        }
    }
}

/// Create a cache instance based on configuration
///
/// This factory function creates the appropriate cache implementation
/// based on the `CacheConfig`:
/// - `CacheDriver::Memory` - Creates an in-memory cache using moka
/// - `CacheDriver::Redis` - Creates a Redis cache (requires `redis-cache` feature)
///
/// # Errors
/// - Returns an error if Redis is configured but the `redis-cache` feature is not enabled
/// - Returns an error if Redis connection fails
pub async fn create_cache(config: &CacheConfig) -> Result<Arc<Cache>> {
    let ttl = Duration::from_secs(config.ttl_seconds);

    match config.driver {
        CacheDriver::Memory => {
            let cache = MemoryCache::with_capacity_and_ttl(10_000, ttl);
            Ok(Arc::new(Cache::Memory(cache)))
        }
        CacheDriver::Redis => {
            #[cfg(feature = "redis-cache")]
            {
                let redis_url = config.redis_url.as_ref().ok_or_else(|| {
                    anyhow::anyhow!(
                        "Redis URL is required when using Redis cache driver. \
                         Set 'redis_url' in cache configuration or use the \
                         AULA_CACHE_REDIS_URL environment variable."
                    )
                })?;

                let cache = RedisCache::with_ttl(redis_url, ttl).await?;
                Ok(Arc::new(Cache::Redis(cache)))
            }

            #[cfg(not(feature = "redis-cache"))]
            {
                anyhow::bail!(
                    "Redis cache driver is configured but the 'redis-cache' feature is not enabled. \
                     Either enable the feature with `--features redis-cache` or use 'memory' cache driver."
                )
            }
        }
    }
}
