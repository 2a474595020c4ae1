//! In-memory cache implementation using moka
//!
//! Provides a fast, thread-safe in-memory cache with TTL support.
//!
//! Key/value entries live in a moka cache. Fixed-window counters and
//! integer sets are kept in plain maps behind an `RwLock` because they
//! need semantics moka does not offer (atomic increment within a window,
//! set membership).

use super::{CacheLayer, CounterWindow};
use anyhow::{Context, Result};
use async_trait::async_trait;
use moka::future::Cache;
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Default maximum cache capacity (number of entries)
const DEFAULT_MAX_CAPACITY: u64 = 10_000;

/// Default TTL for cache entries (1 hour)
const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Cache entry wrapper that stores serialized JSON data
/// This allows us to store any serializable type in the cache
#[derive(Clone)]
struct CacheEntry {
    /// JSON-serialized value
    data: Arc<String>,
}

impl CacheEntry {
    fn new<T: Serialize>(value: &T) -> Result<Self> {
        let json = serde_json::to_string(value).context("Failed to serialize cache value")?;
        Ok(Self {
            data: Arc::new(json),
        })
    }

    fn deserialize<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_str(&self.data).context("Failed to deserialize cache value")
    }
}

/// A fixed-window counter with its reset deadline.
#[derive(Debug, Clone, Copy)]
struct Counter {
    count: u64,
    expires_at: Instant,
}

/// In-memory cache using moka
///
/// Values are stored as JSON strings to support generic types.
pub struct MemoryCache {
    /// The underlying moka cache instance
    cache: Cache<String, CacheEntry>,
    /// Default TTL for entries when not specified
    default_ttl: Duration,
    /// Fixed-window counters, keyed by counter name
    counters: RwLock<HashMap<String, Counter>>,
    /// Integer sets, keyed by set name
    sets: RwLock<HashMap<String, HashSet<i64>>>,
}

impl std::fmt::Debug for MemoryCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryCache")
            .field("entry_count", &self.cache.entry_count())
            .field("default_ttl", &self.default_ttl)
            .finish_non_exhaustive()
    }
}

impl MemoryCache {
    /// Create a new memory cache with default settings
    ///
    /// Default configuration:
    /// - Max capacity: 10,000 entries
    /// - Default TTL: 1 hour
    pub fn new() -> Self {
        Self::with_capacity_and_ttl(DEFAULT_MAX_CAPACITY, DEFAULT_TTL)
    }

    /// Create a new memory cache with custom capacity and default TTL
    ///
    /// # Arguments
    /// * `max_capacity` - Maximum number of entries the cache can hold
    /// * `default_ttl` - Default time-to-live for cache entries
    pub fn with_capacity_and_ttl(max_capacity: u64, default_ttl: Duration) -> Self {
        let cache = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(default_ttl)
            .build();

        Self {
            cache,
            default_ttl,
            counters: RwLock::new(HashMap::new()),
            sets: RwLock::new(HashMap::new()),
        }
    }

    /// Get the default TTL for this cache
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Get the current number of key/value entries in the cache
    pub fn entry_count(&self) -> u64 {
        self.cache.entry_count()
    }

    /// Drop counters whose window has already closed.
    ///
    /// Expired counters are also replaced lazily on the next increment,
    /// this just bounds memory for counters that never come back.
    pub fn prune_counters(&self) {
        let now = Instant::now();
        let mut counters = self.counters.write().expect("counter lock poisoned");
        counters.retain(|_, counter| counter.expires_at > now);
    }
}

impl Default for MemoryCache {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheLayer for MemoryCache {
    /// Get a value from cache
    ///
    /// Returns `Ok(Some(value))` if the key exists and hasn't expired,
    /// `Ok(None)` if the key doesn't exist or has expired.
    async fn get<T: DeserializeOwned + Send>(&self, key: &str) -> Result<Option<T>> {
        match self.cache.get(key).await {
            Some(entry) => {
                let value = entry.deserialize()?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    /// Set a value in cache
    ///
    /// If the key already exists, it will be overwritten. The memory
    /// backend ignores the per-entry TTL; every entry lives for the
    /// cache-wide `time_to_live` set at construction.
    async fn set<T: Serialize + Send + Sync>(
        &self,
        key: &str,
        value: &T,
        _ttl: Duration,
    ) -> Result<()> {
        let entry = CacheEntry::new(value)?;
        self.cache.insert(key.to_string(), entry).await;
        Ok(())
    }

    /// Delete a value from cache
    ///
    /// If the key doesn't exist, this is a no-op.
    async fn delete(&self, key: &str) -> Result<()> {
        self.cache.invalidate(key).await;
        Ok(())
    }

    /// Increment a fixed-window counter
    ///
    /// A fresh window starts when the key is unseen or its previous
    /// window has closed. The returned count always includes this hit.
    async fn incr_with_ttl(&self, key: &str, window: Duration) -> Result<CounterWindow> {
        let now = Instant::now();
        let mut counters = self.counters.write().expect("counter lock poisoned");

        let counter = counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    c.count = 0;
                    c.expires_at = now + window;
                }
                c.count += 1;
            })
            .or_insert(Counter {
                count: 1,
                expires_at: now + window,
            });

        Ok(CounterWindow {
            count: counter.count,
            ttl_secs: counter.expires_at.saturating_duration_since(now).as_secs(),
        })
    }

    async fn set_add(&self, key: &str, member: i64) -> Result<()> {
        let mut sets = self.sets.write().expect("set lock poisoned");
        sets.entry(key.to_string()).or_default().insert(member);
        Ok(())
    }

    async fn set_remove(&self, key: &str, member: i64) -> Result<()> {
        let mut sets = self.sets.write().expect("set lock poisoned");
        if let Some(set) = sets.get_mut(key) {
            set.remove(&member);
            if set.is_empty() {
                sets.remove(key);
            }
        }
        Ok(())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<i64>> {
        let sets = self.sets.read().expect("set lock poisoned");
        let mut members: Vec<i64> = sets
            .get(key)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort_unstable();
        Ok(members)
    }
}
