//! Redis cache implementation
//!
//! Provides a distributed cache using Redis for multi-instance deployments.
//!
//! Key/value entries use SETEX for atomic set-with-expiry. Fixed-window
//! counters use INCR plus EXPIRE on the first hit so the window deadline
//! is shared across instances. Integer sets map onto Redis sets.

use super::{CacheLayer, CounterWindow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client};
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};

/// Default TTL for cache entries (1 hour)
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Redis cache implementation
///
/// Values are stored as JSON strings to support generic types.
pub struct RedisCache {
    /// Multiplexed connection for async operations
    connection: MultiplexedConnection,
    /// Default TTL for entries when not specified
    default_ttl: Duration,
}

impl std::fmt::Debug for RedisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl RedisCache {
    /// Create a new Redis cache with the given connection URL
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn new(redis_url: &str) -> Result<Self> {
        Self::with_ttl(redis_url, DEFAULT_TTL).await
    }

    /// Create a new Redis cache with custom default TTL
    ///
    /// # Errors
    /// Returns an error if the connection cannot be established.
    pub async fn with_ttl(redis_url: &str, default_ttl: Duration) -> Result<Self> {
        let client = Client::open(redis_url).context("Failed to create Redis client")?;

        let connection = client
            .get_multiplexed_async_connection()
            .await
            .context("Failed to connect to Redis")?;

        Ok(Self {
            connection,
            default_ttl,
        })
    }

    /// Get the default TTL for this cache
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }
}

#[async_trait]
impl CacheLayer for RedisCache {
    /// Get a value from Redis cache
    ///
    /// Returns `Ok(Some(value))` if the key exists,
    /// `Ok(None)` if the key doesn't exist.
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        let mut conn = self.connection.clone();

        let result: Option<String> = conn
            .get(key)
            .await
            .context("Failed to get value from Redis")?;

        match result {
            Some(json) => {
                let value =
                    serde_json::from_str(&json).context("Failed to deserialize cached value")?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a value in Redis cache with TTL
    ///
    /// Uses SETEX to atomically set the value with expiration.
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        ttl: Duration,
    ) -> Result<()> {
        let mut conn = self.connection.clone();

        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;

        // TTL is in seconds for Redis, minimum 1 second
        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn
            .set_ex(key, json, ttl_secs)
            .await
            .context("Failed to set value in Redis")?;

        Ok(())
    }

    /// Delete a value from Redis cache
    ///
    /// If the key doesn't exist, this is a no-op.
    async fn delete(&self, key: &str) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .del(key)
            .await
            .context("Failed to delete key from Redis")?;

        Ok(())
    }

    /// Increment a fixed-window counter
    ///
    /// INCR creates the key at 1 when unseen; the EXPIRE on that first
    /// hit pins the window deadline. Later hits inherit the deadline, so
    /// the window is fixed rather than sliding.
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<CounterWindow> {
        let mut conn = self.connection.clone();

        let count: u64 = conn
            .incr(key, 1)
            .await
            .context("Failed to increment counter in Redis")?;

        let window_secs = window.as_secs().max(1) as i64;
        if count == 1 {
            let _: () = conn
                .expire(key, window_secs)
                .await
                .context("Failed to set counter expiry in Redis")?;
        }

        let remaining: i64 = conn
            .ttl(key)
            .await
            .context("Failed to read counter TTL from Redis")?;

        // TTL returns -1 for keys without expiry and -2 for missing keys.
        // Either way the caller gets a conservative remaining time.
        let ttl_secs = if remaining > 0 {
            remaining as u64
        } else {
            window.as_secs()
        };

        Ok(CounterWindow { count, ttl_secs })
    }

    async fn set_add(&self, key: &str, member: i64) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .sadd(key, member)
            .await
            .context("Failed to add set member in Redis")?;

        Ok(())
    }

    async fn set_remove(&self, key: &str, member: i64) -> Result<()> {
        let mut conn = self.connection.clone();

        let _: () = conn
            .srem(key, member)
            .await
            .context("Failed to remove set member in Redis")?;

        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<i64>> {
        let mut conn = self.connection.clone();

        let mut members: Vec<i64> = conn
            .smembers(key)
            .await
            .context("Failed to list set members from Redis")?;

        members.sort_unstable();
        Ok(members)
    }
}
