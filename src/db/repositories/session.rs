//! Session repository
//!
//! Durable storage for refresh sessions. This tier is the single source
//! of truth; the cache layer only mirrors rows that exist here.
//!
//! This module provides:
//! - `SessionRepository` trait defining the interface for session data access
//! - `SqlxSessionRepository` implementing the trait for SQLite and MySQL
//!
//! Rotation uses an atomic compare-and-swap on the stored secret hash so
//! that concurrent refreshes of the same token elect exactly one winner.

use crate::config::DatabaseDriver;
use crate::db::DynDatabasePool;
use crate::models::Session;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{MySqlPool, Row, SqlitePool};
use std::sync::Arc;

/// Session repository trait
#[async_trait]
pub trait SessionRepository: Send + Sync {
    /// Create a new session row and return it with its assigned id
    async fn create(
        &self,
        user_id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<Session>;

    /// Get session by id, revoked or not
    async fn get_by_id(&self, id: i64) -> Result<Option<Session>>;

    /// Find the newest active (unrevoked, unexpired) session for a user
    async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Session>>;

    /// List ids of all active sessions for a user
    async fn list_active_ids(&self, user_id: i64) -> Result<Vec<i64>>;

    /// Re-arm an existing session with a fresh secret and expiry,
    /// clearing any revocation tombstone
    async fn reactivate(
        &self,
        id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<()>;

    /// Atomically swap the secret hash if the stored hash still matches
    /// `expected_hash`. Returns true when this call won the swap.
    async fn rotate(
        &self,
        id: i64,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Mark a session revoked. Idempotent.
    async fn revoke(&self, id: i64) -> Result<()>;

    /// Revoke every active session of a user. Returns the number of
    /// sessions revoked.
    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64>;

    /// Delete sessions whose refresh window lapsed long ago
    async fn delete_expired(&self) -> Result<i64>;
}

/// SQLx-based session repository implementation
///
/// Supports both SQLite and MySQL databases.
pub struct SqlxSessionRepository {
    pool: DynDatabasePool,
}

impl SqlxSessionRepository {
    /// Create a new SQLx session repository
    pub fn new(pool: DynDatabasePool) -> Self {
        Self { pool }
    }

    /// Create a boxed repository for use with dependency injection
    pub fn boxed(pool: DynDatabasePool) -> Arc<dyn SessionRepository> {
        Arc::new(Self::new(pool))
    }
}

#[async_trait]
impl SessionRepository for SqlxSessionRepository {
    async fn create(
        &self,
        user_id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<Session> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                create_session_sqlite(
                    self.pool.as_sqlite().unwrap(),
                    user_id,
                    refresh_secret_hash,
                    refresh_expires_at,
                )
                .await
            }
            DatabaseDriver::Mysql => {
                create_session_mysql(
                    self.pool.as_mysql().unwrap(),
                    user_id,
                    refresh_secret_hash,
                    refresh_expires_at,
                )
                .await
            }
        }
    }

    async fn get_by_id(&self, id: i64) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                get_session_by_id_sqlite(self.pool.as_sqlite().unwrap(), id).await
            }
            DatabaseDriver::Mysql => {
                get_session_by_id_mysql(self.pool.as_mysql().unwrap(), id).await
            }
        }
    }

    async fn find_active_by_user(&self, user_id: i64) -> Result<Option<Session>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                find_active_by_user_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                find_active_by_user_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn list_active_ids(&self, user_id: i64) -> Result<Vec<i64>> {
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                list_active_ids_sqlite(self.pool.as_sqlite().unwrap(), user_id).await
            }
            DatabaseDriver::Mysql => {
                list_active_ids_mysql(self.pool.as_mysql().unwrap(), user_id).await
            }
        }
    }

    async fn reactivate(
        &self,
        id: i64,
        refresh_secret_hash: &str,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<()> {
        let query = r#"
            UPDATE sessions
            SET refresh_secret_hash = ?, refresh_expires_at = ?, revoked_at = NULL
            WHERE id = ?
        "#;
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(refresh_secret_hash)
                    .bind(refresh_expires_at)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to reactivate session")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(refresh_secret_hash)
                    .bind(refresh_expires_at)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to reactivate session")?;
            }
        }
        Ok(())
    }

    async fn rotate(
        &self,
        id: i64,
        expected_hash: &str,
        new_hash: &str,
        new_expires_at: DateTime<Utc>,
    ) -> Result<bool> {
        // Compare-and-swap: only the caller holding the current secret
        // hash can install the replacement.
        let query = r#"
            UPDATE sessions
            SET refresh_secret_hash = ?, refresh_expires_at = ?
            WHERE id = ? AND refresh_secret_hash = ? AND revoked_at IS NULL
        "#;
        let rows_affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(query)
                .bind(new_hash)
                .bind(new_expires_at)
                .bind(id)
                .bind(expected_hash)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to rotate session secret")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(query)
                .bind(new_hash)
                .bind(new_expires_at)
                .bind(id)
                .bind(expected_hash)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to rotate session secret")?
                .rows_affected(),
        };
        Ok(rows_affected > 0)
    }

    async fn revoke(&self, id: i64) -> Result<()> {
        let query = "UPDATE sessions SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL";
        let now = Utc::now();
        match self.pool.driver() {
            DatabaseDriver::Sqlite => {
                sqlx::query(query)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.as_sqlite().unwrap())
                    .await
                    .context("Failed to revoke session")?;
            }
            DatabaseDriver::Mysql => {
                sqlx::query(query)
                    .bind(now)
                    .bind(id)
                    .execute(self.pool.as_mysql().unwrap())
                    .await
                    .context("Failed to revoke session")?;
            }
        }
        Ok(())
    }

    async fn revoke_all_for_user(&self, user_id: i64) -> Result<u64> {
        let query = "UPDATE sessions SET revoked_at = ? WHERE user_id = ? AND revoked_at IS NULL";
        let now = Utc::now();
        let rows_affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(query)
                .bind(now)
                .bind(user_id)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to revoke sessions for user")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(query)
                .bind(now)
                .bind(user_id)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to revoke sessions for user")?
                .rows_affected(),
        };
        Ok(rows_affected)
    }

    async fn delete_expired(&self) -> Result<i64> {
        let query = "DELETE FROM sessions WHERE refresh_expires_at < ?";
        let now = Utc::now();
        let rows_affected = match self.pool.driver() {
            DatabaseDriver::Sqlite => sqlx::query(query)
                .bind(now)
                .execute(self.pool.as_sqlite().unwrap())
                .await
                .context("Failed to delete expired sessions")?
                .rows_affected(),
            DatabaseDriver::Mysql => sqlx::query(query)
                .bind(now)
                .execute(self.pool.as_mysql().unwrap())
                .await
                .context("Failed to delete expired sessions")?
                .rows_affected(),
        };
        Ok(rows_affected as i64)
    }
}

// ============================================================================
// SQLite implementations
// ============================================================================

async fn create_session_sqlite(
    pool: &SqlitePool,
    user_id: i64,
    refresh_secret_hash: &str,
    refresh_expires_at: DateTime<Utc>,
) -> Result<Session> {
    let created_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (user_id, refresh_secret_hash, refresh_expires_at, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(refresh_secret_hash)
    .bind(refresh_expires_at)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(Session {
        id: result.last_insert_rowid(),
        user_id,
        refresh_secret_hash: refresh_secret_hash.to_string(),
        refresh_expires_at,
        revoked_at: None,
        created_at,
    })
}

async fn get_session_by_id_sqlite(pool: &SqlitePool, id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, refresh_secret_hash, refresh_expires_at, revoked_at, created_at
        FROM sessions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_session_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn find_active_by_user_sqlite(pool: &SqlitePool, user_id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, refresh_secret_hash, refresh_expires_at, revoked_at, created_at
        FROM sessions
        WHERE user_id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("Failed to find active session for user")?;

    match row {
        Some(row) => Ok(Some(row_to_session_sqlite(&row)?)),
        None => Ok(None),
    }
}

async fn list_active_ids_sqlite(pool: &SqlitePool, user_id: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        SELECT id
        FROM sessions
        WHERE user_id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_all(pool)
    .await
    .context("Failed to list active session ids")?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}

fn row_to_session_sqlite(row: &sqlx::sqlite::SqliteRow) -> Result<Session> {
    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_secret_hash: row.get("refresh_secret_hash"),
        refresh_expires_at: row.get("refresh_expires_at"),
        revoked_at: row.get("revoked_at"),
        created_at: row.get("created_at"),
    })
}

// ============================================================================
// MySQL implementations
// ============================================================================

async fn create_session_mysql(
    pool: &MySqlPool,
    user_id: i64,
    refresh_secret_hash: &str,
    refresh_expires_at: DateTime<Utc>,
) -> Result<Session> {
    let created_at = Utc::now();
    let result = sqlx::query(
        r#"
        INSERT INTO sessions (user_id, refresh_secret_hash, refresh_expires_at, created_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(user_id)
    .bind(refresh_secret_hash)
    .bind(refresh_expires_at)
    .bind(created_at)
    .execute(pool)
    .await
    .context("Failed to create session")?;

    Ok(Session {
        id: result.last_insert_id() as i64,
        user_id,
        refresh_secret_hash: refresh_secret_hash.to_string(),
        refresh_expires_at,
        revoked_at: None,
        created_at,
    })
}

async fn get_session_by_id_mysql(pool: &MySqlPool, id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, refresh_secret_hash, refresh_expires_at, revoked_at, created_at
        FROM sessions
        WHERE id = ?
        "#,
    )
    .bind(id)
    .fetch_optional(pool)
    .await
    .context("Failed to get session by ID")?;

    match row {
        Some(row) => Ok(Some(row_to_session_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn find_active_by_user_mysql(pool: &MySqlPool, user_id: i64) -> Result<Option<Session>> {
    let row = sqlx::query(
        r#"
        SELECT id, user_id, refresh_secret_hash, refresh_expires_at, revoked_at, created_at
        FROM sessions
        WHERE user_id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
        ORDER BY id DESC
        LIMIT 1
        "#,
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_optional(pool)
    .await
    .context("Failed to find active session for user")?;

    match row {
        Some(row) => Ok(Some(row_to_session_mysql(&row)?)),
        None => Ok(None),
    }
}

async fn list_active_ids_mysql(pool: &MySqlPool, user_id: i64) -> Result<Vec<i64>> {
    let rows = sqlx::query(
        r#"
        SELECT id
        FROM sessions
        WHERE user_id = ? AND revoked_at IS NULL AND refresh_expires_at > ?
        ORDER BY id
        "#,
    )
    .bind(user_id)
    .bind(Utc::now())
    .fetch_all(pool)
    .await
    .context("Failed to list active session ids")?;

    Ok(rows.iter().map(|row| row.get("id")).collect())
}

fn row_to_session_mysql(row: &sqlx::mysql::MySqlRow) -> Result<Session> {
    let refresh_expires_at: DateTime<Utc> = row.get("refresh_expires_at");
    let revoked_at: Option<DateTime<Utc>> = row.get("revoked_at");
    let created_at: DateTime<Utc> = row.get("created_at");

    Ok(Session {
        id: row.get("id"),
        user_id: row.get("user_id"),
        refresh_secret_hash: row.get("refresh_secret_hash"),
        refresh_expires_at,
        revoked_at,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_test_pool, migrations};
    use chrono::Duration;

    async fn setup_test_repo() -> (DynDatabasePool, SqlxSessionRepository) {
        let pool = create_test_pool().await.expect("Failed to create test pool");
        migrations::run_migrations(&pool)
            .await
            .expect("Failed to run migrations");
        let repo = SqlxSessionRepository::new(pool.clone());
        (pool, repo)
    }

    // Helper to create a test user for foreign key constraint
    async fn create_test_user(pool: &DynDatabasePool, id: i64) {
        let now = Utc::now();
        if let Some(sqlite_pool) = pool.as_sqlite() {
            sqlx::query(
                r#"
                INSERT INTO users (id, email, password_hash, role, status, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(id)
            .bind(format!("user{}@example.com", id))
            .bind("hash")
            .bind("student")
            .bind("active")
            .bind(now)
            .bind(now)
            .execute(sqlite_pool)
            .await
            .expect("Failed to create test user");
        }
    }

    fn expires_in(days: i64) -> DateTime<Utc> {
        Utc::now() + Duration::days(days)
    }

    #[tokio::test]
    async fn test_create_assigns_increasing_ids() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let first = repo
            .create(1, "hash-a", expires_in(7))
            .await
            .expect("Failed to create session");
        let second = repo
            .create(1, "hash-b", expires_in(7))
            .await
            .expect("Failed to create session");

        assert!(first.id > 0);
        assert!(second.id > first.id);
        assert!(first.revoked_at.is_none());
    }

    #[tokio::test]
    async fn test_get_session_by_id() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let created = repo
            .create(1, "secret-hash", expires_in(7))
            .await
            .expect("Failed to create session");

        let found = repo
            .get_by_id(created.id)
            .await
            .expect("Failed to get session")
            .expect("Session not found");

        assert_eq!(found.id, created.id);
        assert_eq!(found.user_id, 1);
        assert_eq!(found.refresh_secret_hash, "secret-hash");
    }

    #[tokio::test]
    async fn test_get_session_by_id_not_found() {
        let (_pool, repo) = setup_test_repo().await;

        let found = repo.get_by_id(12345).await.expect("Failed to get session");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn test_find_active_by_user_skips_revoked_and_expired() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let revoked = repo.create(1, "h1", expires_in(7)).await.unwrap();
        repo.revoke(revoked.id).await.unwrap();
        repo.create(1, "h2", expires_in(-1)).await.unwrap();

        assert!(repo.find_active_by_user(1).await.unwrap().is_none());

        let live = repo.create(1, "h3", expires_in(7)).await.unwrap();
        let found = repo.find_active_by_user(1).await.unwrap().unwrap();
        assert_eq!(found.id, live.id);
    }

    #[tokio::test]
    async fn test_rotate_compare_and_swap() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let session = repo.create(1, "old-hash", expires_in(7)).await.unwrap();

        // First swap with the correct hash wins
        let won = repo
            .rotate(session.id, "old-hash", "new-hash", expires_in(7))
            .await
            .unwrap();
        assert!(won);

        // Second swap with the stale hash loses
        let won = repo
            .rotate(session.id, "old-hash", "other-hash", expires_in(7))
            .await
            .unwrap();
        assert!(!won);

        let stored = repo.get_by_id(session.id).await.unwrap().unwrap();
        assert_eq!(stored.refresh_secret_hash, "new-hash");
    }

    #[tokio::test]
    async fn test_rotate_fails_on_revoked_session() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let session = repo.create(1, "hash", expires_in(7)).await.unwrap();
        repo.revoke(session.id).await.unwrap();

        let won = repo
            .rotate(session.id, "hash", "new-hash", expires_in(7))
            .await
            .unwrap();
        assert!(!won);
    }

    #[tokio::test]
    async fn test_revoke_is_idempotent() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let session = repo.create(1, "hash", expires_in(7)).await.unwrap();

        repo.revoke(session.id).await.expect("First revoke failed");
        let first = repo.get_by_id(session.id).await.unwrap().unwrap();
        let revoked_at = first.revoked_at.expect("Should be revoked");

        repo.revoke(session.id).await.expect("Second revoke failed");
        let second = repo.get_by_id(session.id).await.unwrap().unwrap();

        // Tombstone timestamp is not overwritten by repeat revokes
        assert_eq!(second.revoked_at, Some(revoked_at));
    }

    #[tokio::test]
    async fn test_reactivate_clears_tombstone() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let session = repo.create(1, "hash", expires_in(7)).await.unwrap();
        repo.revoke(session.id).await.unwrap();

        repo.reactivate(session.id, "fresh-hash", expires_in(7))
            .await
            .expect("Failed to reactivate");

        let stored = repo.get_by_id(session.id).await.unwrap().unwrap();
        assert!(stored.revoked_at.is_none());
        assert_eq!(stored.refresh_secret_hash, "fresh-hash");
    }

    #[tokio::test]
    async fn test_revoke_all_for_user() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;
        create_test_user(&pool, 2).await;

        let s1 = repo.create(1, "h1", expires_in(7)).await.unwrap();
        let s2 = repo.create(1, "h2", expires_in(7)).await.unwrap();
        let other = repo.create(2, "h3", expires_in(7)).await.unwrap();

        let revoked = repo.revoke_all_for_user(1).await.unwrap();
        assert_eq!(revoked, 2);

        assert!(repo.get_by_id(s1.id).await.unwrap().unwrap().is_revoked());
        assert!(repo.get_by_id(s2.id).await.unwrap().unwrap().is_revoked());
        assert!(!repo.get_by_id(other.id).await.unwrap().unwrap().is_revoked());

        // Second pass revokes nothing further
        let revoked = repo.revoke_all_for_user(1).await.unwrap();
        assert_eq!(revoked, 0);
    }

    #[tokio::test]
    async fn test_list_active_ids() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let s1 = repo.create(1, "h1", expires_in(7)).await.unwrap();
        let s2 = repo.create(1, "h2", expires_in(7)).await.unwrap();
        let revoked = repo.create(1, "h3", expires_in(7)).await.unwrap();
        repo.revoke(revoked.id).await.unwrap();

        let ids = repo.list_active_ids(1).await.unwrap();
        assert_eq!(ids, vec![s1.id, s2.id]);
    }

    #[tokio::test]
    async fn test_delete_expired_sessions() {
        let (pool, repo) = setup_test_repo().await;
        create_test_user(&pool, 1).await;

        let expired = repo.create(1, "h1", expires_in(-1)).await.unwrap();
        let valid = repo.create(1, "h2", expires_in(7)).await.unwrap();

        let deleted = repo.delete_expired().await.unwrap();
        assert_eq!(deleted, 1);

        assert!(repo.get_by_id(expired.id).await.unwrap().is_none());
        assert!(repo.get_by_id(valid.id).await.unwrap().is_some());
    }
}
