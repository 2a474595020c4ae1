//! Access token claims codec
//!
//! Signs and verifies the short-lived access token as an HS256 JWT.
//! The token carries just enough to resolve the caller: the user id,
//! the session id it was minted under, and the issue/expiry instants.

use anyhow::{Context, Result};
use chrono::Utc;
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Claims embedded in an access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// User id the token authenticates
    pub sub: i64,
    /// Session id the token was minted under
    pub sid: i64,
    /// Issued-at (unix seconds)
    pub iat: i64,
    /// Expiry (unix seconds)
    pub exp: i64,
}

/// Signs and verifies access tokens with a shared HS256 secret.
#[derive(Clone)]
pub struct ClaimsCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl_min: i64,
}

impl std::fmt::Debug for ClaimsCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClaimsCodec")
            .field("access_ttl_min", &self.access_ttl_min)
            .finish_non_exhaustive()
    }
}

impl ClaimsCodec {
    /// Create a codec from the shared secret and access token TTL in minutes.
    pub fn new(secret: &str, access_ttl_min: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl_min,
        }
    }

    /// Sign a fresh access token for the given user and session.
    pub fn sign(&self, user_id: i64, session_id: i64) -> Result<String> {
        let now = Utc::now().timestamp();
        let claims = AccessClaims {
            sub: user_id,
            sid: session_id,
            iat: now,
            exp: now + self.access_ttl_min * 60,
        };

        encode(&Header::default(), &claims, &self.encoding_key)
            .context("Failed to sign access token")
    }

    /// Verify a token signature and expiry, returning its claims.
    ///
    /// Expired tokens and tokens signed with a different secret both
    /// fail here; callers do not distinguish the two.
    pub fn verify(&self, token: &str) -> Result<AccessClaims> {
        let data = decode::<AccessClaims>(token, &self.decoding_key, &Validation::default())
            .context("Failed to verify access token")?;
        Ok(data.claims)
    }

    /// Access token lifetime in minutes.
    pub fn access_ttl_min(&self) -> i64 {
        self.access_ttl_min
    }
}
