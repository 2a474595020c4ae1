//! Rate limiter for authentication endpoints
//!
//! Fixed-window counters keyed by `{scope}:{identity}`, e.g.
//! `forgot_password:203.0.113.9` or `forgot_password:user@example.com`.
//! Counters live in the cache tier so limits hold across instances when
//! Redis is configured; a local in-process fallback keeps limiting
//! functional when the cache is missing or erroring.
//!
//! Every check increments before comparing, so probing the limiter is
//! itself a counted attempt.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::warn;

use crate::cache::{Cache, CacheLayer, CounterWindow};

/// Outcome of a rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    /// Whether the attempt is allowed through
    pub allowed: bool,
    /// Seconds until the window resets; meaningful when denied
    pub retry_after_secs: u64,
}

/// Local fallback counter with its window deadline.
#[derive(Debug, Clone, Copy)]
struct LocalCounter {
    count: u64,
    expires_at: Instant,
}

/// Fixed-window rate limiter over the cache tier.
pub struct RateLimiter {
    cache: Option<Arc<Cache>>,
    local: RwLock<HashMap<String, LocalCounter>>,
}

impl RateLimiter {
    /// Create a limiter with no cache tier; counters are in-process only.
    pub fn new() -> Self {
        Self {
            cache: None,
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Create a limiter whose counters live in the cache tier.
    pub fn with_cache(cache: Arc<Cache>) -> Self {
        Self {
            cache: Some(cache),
            local: RwLock::new(HashMap::new()),
        }
    }

    /// Count an attempt and decide whether it passes.
    ///
    /// The identity is lowercased so `User@example.com` and
    /// `user@example.com` share a counter.
    pub async fn check(
        &self,
        scope: &str,
        identity: &str,
        window: Duration,
        max: u64,
    ) -> RateDecision {
        let key = format!("rl:{}:{}", scope, identity.to_lowercase());

        let snapshot = match &self.cache {
            Some(cache) => match cache.incr_with_ttl(&key, window).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    warn!("Rate limit counter failed for {}: {:#}", key, e);
                    self.local_incr(&key, window)
                }
            },
            None => self.local_incr(&key, window),
        };

        RateDecision {
            allowed: snapshot.count <= max,
            retry_after_secs: snapshot.ttl_secs,
        }
    }

    /// Increment the in-process fallback counter.
    fn local_incr(&self, key: &str, window: Duration) -> CounterWindow {
        let now = Instant::now();
        let mut counters = self.local.write().expect("rate limit lock poisoned");

        let counter = counters
            .entry(key.to_string())
            .and_modify(|c| {
                if c.expires_at <= now {
                    c.count = 0;
                    c.expires_at = now + window;
                }
                c.count += 1;
            })
            .or_insert(LocalCounter {
                count: 1,
                expires_at: now + window,
            });

        CounterWindow {
            count: counter.count,
            ttl_secs: counter.expires_at.saturating_duration_since(now).as_secs(),
        }
    }

    /// Drop closed windows from the local fallback (should be called periodically).
    pub fn cleanup(&self) {
        let now = Instant::now();
        let mut counters = self.local.write().expect("rate limit lock poisoned");
        counters.retain(|_, counter| counter.expires_at > now);
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}
