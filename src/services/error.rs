//! Authentication error types
//!
//! Shared error enum for the session and account services. Variants map
//! onto distinct client-facing outcomes; the API layer translates them
//! into HTTP status codes without inspecting messages.

use thiserror::Error;

/// Error types for authentication and session operations
#[derive(Debug, Error)]
pub enum AuthError {
    /// Invalid input (malformed email, short password, bad request shape)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Email/password pair did not match a usable account
    #[error("Invalid credentials")]
    InvalidCredentials,

    /// Token is malformed, unknown, or lost the rotation race
    #[error("Invalid token")]
    InvalidToken,

    /// Session exists but has been revoked
    #[error("Session revoked")]
    SessionRevoked,

    /// Session or token lifetime has elapsed
    #[error("Session expired")]
    SessionExpired,

    /// Token referenced a user that no longer exists
    #[error("User not found")]
    UserNotFound,

    /// Too many attempts inside the current window
    #[error("Rate limited, retry after {retry_after_secs}s")]
    RateLimited {
        /// Seconds until the current window resets
        retry_after_secs: u64,
    },

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}
