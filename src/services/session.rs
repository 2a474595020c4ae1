//! Session service
//!
//! Implements the credential and session lifecycle:
//! - Login issues an access/refresh token pair, reusing the user's
//!   existing session row when one is still live
//! - Refresh rotates the refresh secret atomically; a token that loses
//!   the rotation race is treated as replayed and rejected
//! - Logout tombstones the session and is idempotent
//! - Verification resolves an access token back to its user, honoring
//!   revocation before anything else

use anyhow::Context;
use chrono::{Duration, Utc};
use std::sync::Arc;
use tracing::warn;

use crate::db::repositories::UserRepository;
use crate::models::{Session, User};
use crate::services::claims::{AccessClaims, ClaimsCodec};
use crate::services::error::AuthError;
use crate::services::password::verify_password;
use crate::services::session_store::SessionStore;
use crate::services::token::{
    generate_secret, hash_secret, make_refresh_token, parse_refresh_token, verify_secret,
};

/// A freshly minted access/refresh token pair.
#[derive(Debug, Clone)]
pub struct AuthTokens {
    /// Short-lived signed access token
    pub access_token: String,
    /// Long-lived rotating refresh token, wire form `"{id}.{secret}"`
    pub refresh_token: String,
}

/// Result of a successful login.
#[derive(Debug, Clone)]
pub struct LoginOutcome {
    /// The authenticated user
    pub user: User,
    /// Token pair for the (re)used session
    pub tokens: AuthTokens,
}

/// Session service for authentication and token lifecycle.
pub struct SessionService {
    user_repo: Arc<dyn UserRepository>,
    store: Arc<SessionStore>,
    claims: ClaimsCodec,
    refresh_ttl_hours: i64,
}

impl SessionService {
    /// Create a new session service.
    pub fn new(
        user_repo: Arc<dyn UserRepository>,
        store: Arc<SessionStore>,
        claims: ClaimsCodec,
        refresh_ttl_hours: i64,
    ) -> Self {
        Self {
            user_repo,
            store,
            claims,
            refresh_ttl_hours,
        }
    }

    /// Authenticate with email and password, returning a token pair.
    ///
    /// Each user holds at most one live session: when a previous
    /// session is still active its row is reused with a fresh secret,
    /// which invalidates any refresh token issued for it before.
    ///
    /// # Errors
    ///
    /// - `Validation` when email or password is empty
    /// - `InvalidCredentials` for unknown emails, wrong passwords, and
    ///   accounts that are not active; callers cannot tell these apart
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        let email = email.trim().to_lowercase();
        if email.is_empty() {
            return Err(AuthError::Validation("Email is required".to_string()));
        }
        if password.is_empty() {
            return Err(AuthError::Validation("Password is required".to_string()));
        }

        let user = self
            .user_repo
            .get_by_email(&email)
            .await
            .context("Failed to look up user by email")?
            .ok_or(AuthError::InvalidCredentials)?;

        if !user.is_active() {
            return Err(AuthError::InvalidCredentials);
        }

        let matches = verify_password(password, &user.password_hash)
            .context("Failed to verify password")?;
        if !matches {
            return Err(AuthError::InvalidCredentials);
        }

        let secret = generate_secret();
        let secret_hash = hash_secret(&secret).context("Failed to hash refresh secret")?;
        let expires_at = Utc::now() + Duration::hours(self.refresh_ttl_hours);

        let session = match self
            .store
            .find_active_by_user(user.id)
            .await
            .context("Failed to look up active session")?
        {
            Some(existing) => self
                .store
                .reactivate(existing.id, &secret_hash, expires_at)
                .await
                .context("Failed to reuse session")?,
            None => self
                .store
                .create(user.id, &secret_hash, expires_at)
                .await
                .context("Failed to create session")?,
        };

        self.user_repo
            .update_last_login(user.id)
            .await
            .context("Failed to record login time")?;

        let tokens = self.mint_tokens(user.id, session.id, &secret)?;
        Ok(LoginOutcome { user, tokens })
    }

    /// Exchange a refresh token for a new token pair.
    ///
    /// The refresh secret is rotated with a compare-and-swap against
    /// the hash the token verified under. Losing that swap means the
    /// secret was already rotated away, so the presented token is a
    /// replay and is rejected.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for malformed tokens, unknown sessions, wrong
    ///   secrets, and lost rotation races
    /// - `SessionRevoked` when the session was tombstoned
    /// - `SessionExpired` when the refresh window closed
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthTokens, AuthError> {
        let parsed = parse_refresh_token(refresh_token).ok_or(AuthError::InvalidToken)?;

        let session = self
            .store
            .get(parsed.session_id)
            .await
            .context("Failed to load session")?
            .ok_or(AuthError::InvalidToken)?;

        if session.is_revoked() {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired() {
            return Err(AuthError::SessionExpired);
        }

        let matches = verify_secret(&parsed.secret, &session.refresh_secret_hash)
            .context("Failed to verify refresh secret")?;
        if !matches {
            return Err(AuthError::InvalidToken);
        }

        let secret = generate_secret();
        let secret_hash = hash_secret(&secret).context("Failed to hash refresh secret")?;
        let expires_at = Utc::now() + Duration::hours(self.refresh_ttl_hours);

        let swapped = self
            .store
            .rotate(
                session.id,
                &session.refresh_secret_hash,
                &secret_hash,
                expires_at,
            )
            .await
            .context("Failed to rotate refresh secret")?;
        if !swapped {
            return Err(AuthError::InvalidToken);
        }

        self.mint_tokens(session.user_id, session.id, &secret)
    }

    /// Revoke the session a refresh token points at.
    ///
    /// Logout never fails: malformed tokens, unknown sessions, and
    /// storage errors all land on the same "logged out" outcome. A
    /// second logout with the same token is a no-op.
    pub async fn logout(&self, refresh_token: &str) {
        let Some(parsed) = parse_refresh_token(refresh_token) else {
            return;
        };

        let session = match self.store.get(parsed.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => return,
            Err(e) => {
                warn!("Logout session lookup failed: {:#}", e);
                return;
            }
        };

        if let Err(e) = self.store.revoke(session.id, session.user_id).await {
            warn!("Logout revocation failed for session {}: {:#}", session.id, e);
        }
    }

    /// Revoke every live session a user holds.
    pub async fn revoke_all(&self, user_id: i64) -> Result<u64, AuthError> {
        let revoked = self
            .store
            .revoke_all(user_id)
            .await
            .context("Failed to revoke sessions")?;
        Ok(revoked)
    }

    /// Resolve an access token to its user.
    ///
    /// Revocation dominates: a token whose session was revoked is
    /// rejected even while its signature and expiry are still good.
    ///
    /// # Errors
    ///
    /// - `InvalidToken` for bad signatures and expired access tokens
    /// - `SessionRevoked` when the session is gone or tombstoned
    /// - `SessionExpired` when the refresh window closed
    /// - `UserNotFound` when the user row no longer exists
    pub async fn verify_session(&self, access_token: &str) -> Result<(User, Session), AuthError> {
        let claims = self
            .claims
            .verify(access_token)
            .map_err(|_| AuthError::InvalidToken)?;

        let session = self
            .store
            .get(claims.sid)
            .await
            .context("Failed to load session")?
            .ok_or(AuthError::SessionRevoked)?;

        if session.is_revoked() {
            return Err(AuthError::SessionRevoked);
        }
        if session.is_expired() {
            return Err(AuthError::SessionExpired);
        }
        if session.user_id != claims.sub {
            return Err(AuthError::InvalidToken);
        }

        let user = self
            .user_repo
            .get_by_id(claims.sub)
            .await
            .context("Failed to load user")?
            .ok_or(AuthError::UserNotFound)?;

        Ok((user, session))
    }

    /// Decode access token claims without touching storage.
    pub fn decode_claims(&self, access_token: &str) -> Result<AccessClaims, AuthError> {
        self.claims
            .verify(access_token)
            .map_err(|_| AuthError::InvalidToken)
    }

    fn mint_tokens(
        &self,
        user_id: i64,
        session_id: i64,
        secret: &str,
    ) -> Result<AuthTokens, AuthError> {
        let access_token = self
            .claims
            .sign(user_id, session_id)
            .context("Failed to sign access token")?;
        Ok(AuthTokens {
            access_token,
            refresh_token: make_refresh_token(session_id, secret),
        })
    }
}
