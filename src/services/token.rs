//! Refresh token primitives
//!
//! A refresh token on the wire is `"{session_id}.{secret}"`. The secret
//! is a random 32-byte hex string; only its Argon2 hash is persisted, so
//! a database leak does not yield usable refresh tokens.

use anyhow::Result;
use rand::rngs::OsRng;
use rand::RngCore;

use crate::services::password::{hash_password, verify_password};

/// Length of the random refresh secret in bytes (before hex encoding)
const SECRET_LEN: usize = 32;

/// A refresh token split into its components.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedRefreshToken {
    /// Session row the token claims to belong to
    pub session_id: i64,
    /// Plaintext secret to verify against the stored hash
    pub secret: String,
}

/// Generate a new random refresh secret as a hex string.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Hash a refresh secret for storage.
///
/// Secrets go through the same Argon2id pipeline as passwords.
pub fn hash_secret(secret: &str) -> Result<String> {
    hash_password(secret)
}

/// Verify a refresh secret against its stored hash.
pub fn verify_secret(secret: &str, hash: &str) -> Result<bool> {
    verify_password(secret, hash)
}

/// Assemble the wire form of a refresh token.
pub fn make_refresh_token(session_id: i64, secret: &str) -> String {
    format!("{}.{}", session_id, secret)
}

/// Split a wire-form refresh token into its components.
///
/// Returns `None` for anything that does not look like
/// `"{session_id}.{secret}"` with a positive integer id and a
/// non-empty secret. Callers treat `None` as an invalid token without
/// distinguishing why.
pub fn parse_refresh_token(token: &str) -> Option<ParsedRefreshToken> {
    let (id_part, secret) = token.split_once('.')?;
    let session_id: i64 = id_part.parse().ok()?;
    if session_id <= 0 || secret.is_empty() {
        return None;
    }
    Some(ParsedRefreshToken {
        session_id,
        secret: secret.to_string(),
    })
}
