//! Session store
//!
//! Read-through wrapper around the session repository. The database is
//! the single source of truth; the cache mirrors rows under
//! `session:{id}` and tracks live ids per user under
//! `user_sessions:{user_id}`. Cache failures are logged and absorbed,
//! never surfaced, so a dead cache degrades to plain database reads.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::cache::{Cache, CacheLayer};
use crate::db::repositories::SessionRepository;
use crate::models::Session;

/// Default lifetime for cached session rows (1 hour)
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(3600);

fn session_key(id: i64) -> String {
    format!("session:{}", id)
}

fn user_sessions_key(user_id: i64) -> String {
    format!("user_sessions:{}", user_id)
}

/// Two-tier session access: durable repository plus optional cache.
pub struct SessionStore {
    repo: Arc<dyn SessionRepository>,
    cache: Option<Arc<Cache>>,
    cache_ttl: Duration,
}

impl SessionStore {
    /// Create a store without a cache tier.
    pub fn new(repo: Arc<dyn SessionRepository>) -> Self {
        Self {
            repo,
            cache: None,
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Create a store backed by the given cache.
    pub fn with_cache(repo: Arc<dyn SessionRepository>, cache: Arc<Cache>) -> Self {
        Self {
            repo,
            cache: Some(cache),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    /// Look up a session by id, trying the cache first.
    ///
    /// A cache hit skips the database entirely. A miss reads the row
    /// and backfills the cache.
    pub async fn get(&self, id: i64) -> Result<Option<Session>> {
        let key = session_key(id);

        if let Some(cache) = &self.cache {
            match cache.get::<Session>(&key).await {
                Ok(Some(session)) => return Ok(Some(session)),
                Ok(None) => {}
                Err(e) => warn!("Session cache read failed for {}: {:#}", key, e),
            }
        }

        let session = self.repo.get_by_id(id).await?;

        if let (Some(cache), Some(session)) = (&self.cache, &session) {
            if let Err(e) = cache.set(&key, session, self.cache_ttl).await {
                warn!("Session cache backfill failed for {}: {:#}", key, e);
            }
        }

        Ok(session)
    }

    /// Find the newest active session for a user.
    ///
    /// Always reads the database: "newest active" is a query over all
    /// of a user's rows and the cache only indexes single sessions.
    pub async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Session>> {
        self.repo.find_active_by_user(user_id).await
    }

    /// Create a session row and mirror it into the cache.
    pub async fn create(
        &self,
        user_id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        let session = self
            .repo
            .create(user_id, refresh_secret_hash, refresh_expires_at)
            .await?;

        self.mirror(&session).await;
        Ok(session)
    }

    /// Clear a session's tombstone and install a fresh secret.
    pub async fn reactivate(
        &self,
        id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        self.repo
            .reactivate(id, refresh_secret_hash, refresh_expires_at)
            .await?;

        // Re-read so the cache mirrors exactly what was persisted
        let session = self.repo.get_by_id(id).await?.ok_or_else(|| {
            anyhow::anyhow!("Session {} disappeared during reactivation", id)
        })?;

        self.mirror(&session).await;
        Ok(session)
    }

    /// Atomically swap the refresh secret if the expected one is still current.
    ///
    /// Returns `false` when the compare-and-swap loses, meaning the
    /// presented secret was already rotated away or the session was
    /// revoked. The stale cache entry is dropped either way.
    pub async fn rotate(
        &self,
        id: i64,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        let swapped = self
            .repo
            .rotate(id, expected_hash, new_hash, new_expires_at)
            .await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&session_key(id)).await {
                warn!("Session cache invalidation failed for {}: {:#}", id, e);
            }
        }

        Ok(swapped)
    }

    /// Revoke a single session and drop it from the cache.
    pub async fn revoke(&self, id: i64, user_id: i64) -> Result<()> {
        self.repo.revoke(id).await?;

        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&session_key(id)).await {
                warn!("Session cache invalidation failed for {}: {:#}", id, e);
            }
            if let Err(e) = cache.set_remove(&user_sessions_key(user_id), id).await {
                warn!(
                    "Session index update failed for user {}: {:#}",
                    user_id, e
                );
            }
        }

        Ok(())
    }

    /// Revoke every active session for a user.
    ///
    /// Returns the number of sessions revoked.
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64> {
        // Capture the ids before the tombstones land so the cache
        // entries can be dropped afterwards.
        let active_ids = self.repo.list_active_ids(user_id).await?;
        let revoked = self.repo.revoke_all_for_user(user_id).await?;

        if let Some(cache) = &self.cache {
            for id in active_ids {
                if let Err(e) = cache.delete(&session_key(id)).await {
                    warn!("Session cache invalidation failed for {}: {:#}", id, e);
                }
            }
            if let Err(e) = cache.delete(&user_sessions_key(user_id)).await {
                warn!(
                    "Session index invalidation failed for user {}: {:#}",
                    user_id, e
                );
            }
        }

        Ok(revoked)
    }

    /// Delete rows whose refresh window closed, returning the count.
    pub async fn delete_expired(&self) -> Result<i64> {
        self.repo.delete_expired().await
    }

    /// Write a session row into the cache tiers, absorbing failures.
    async fn mirror(&self, session: &Session) {
        let Some(cache) = &self.cache else { return };

        if let Err(e) = cache
            .set(&session_key(session.id), session, self.cache_ttl)
            .await
        {
            warn!(
                "Session cache write failed for {}: {:#}",
                session.id, e
            );
        }
        if let Err(e) = cache
            .set_add(&user_sessions_key(session.user_id), session.id)
            .await
        {
            warn!(
                "Session index update failed for user {}: {:#}",
                session.user_id, e
            );
        }
    }
}
