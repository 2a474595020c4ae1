//! Session model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Session entity backing refresh-token authentication.
///
/// A session never stores the refresh secret itself, only its argon2
/// hash. The wire token is `"{id}.{secret}"`; presenting it proves
/// knowledge of the secret, which is verified against the stored hash.
/// Revocation is a tombstone (`revoked_at`) rather than a delete so a
/// revoked session id can never be confused with an unknown one.
///
/// Serialization must carry every field: the cache tier mirrors whole
/// sessions as JSON and rotation verifies against the mirrored hash.
/// Sessions are never exposed through the API, so nothing is redacted
/// here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Monotonically assigned session id
    pub id: i64,
    /// Associated user ID
    pub user_id: i64,
    /// Argon2 hash of the current refresh secret
    pub refresh_secret_hash: String,
    /// Refresh-token expiration timestamp
    pub refresh_expires_at: DateTime<Utc>,
    /// Revocation timestamp (None while the session is live)
    pub revoked_at: Option<DateTime<Utc>>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Check if the session has been revoked
    pub fn is_revoked(&self) -> bool {
        self.revoked_at.is_some()
    }

    /// Check if the refresh token has expired
    pub fn is_expired(&self) -> bool {
        self.refresh_expires_at < Utc::now()
    }

    /// A session is active when it is neither revoked nor expired
    pub fn is_active(&self) -> bool {
        !self.is_revoked() && !self.is_expired()
    }
}
