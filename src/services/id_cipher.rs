//! Opaque id encoding
//!
//! Database ids are sequential integers; exposing them verbatim leaks
//! row counts and invites enumeration. This module encrypts ids with
//! AES-256-GCM into short URL-safe strings. Encoding is randomized (a
//! fresh nonce per call), so the same id yields different strings, but
//! every string decodes back to the original id.
//!
//! Wire layout before base64: `nonce (12) || tag (16) || ciphertext`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use anyhow::{Context, Result};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// AES-GCM nonce length in bytes
const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes
const TAG_LEN: usize = 16;

/// Encrypts integer ids into opaque URL-safe strings.
#[derive(Clone)]
pub struct IdCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for IdCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdCipher").finish_non_exhaustive()
    }
}

impl IdCipher {
    /// Derive the AES key from an arbitrary-length secret via SHA-256.
    pub fn new(secret: &str) -> Self {
        let digest = Sha256::digest(secret.as_bytes());
        let key = Key::<Aes256Gcm>::from_slice(&digest);
        Self {
            cipher: Aes256Gcm::new(key),
        }
    }

    /// Encode an id into an opaque string.
    ///
    /// # Errors
    ///
    /// Returns an error for negative ids or if encryption fails.
    pub fn encode(&self, id: i64) -> Result<String> {
        if id < 0 {
            anyhow::bail!("Cannot encode negative id: {}", id);
        }

        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        // The plaintext is the decimal form of the id; aes-gcm appends
        // the tag to the ciphertext
        let sealed = self
            .cipher
            .encrypt(nonce, id.to_string().as_bytes())
            .map_err(|e| anyhow::anyhow!("Failed to encrypt id: {}", e))
            .context("Id encryption failed")?;

        let (ciphertext, tag) = sealed.split_at(sealed.len() - TAG_LEN);

        let mut out = Vec::with_capacity(NONCE_LEN + TAG_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(tag);
        out.extend_from_slice(ciphertext);

        Ok(URL_SAFE_NO_PAD.encode(out))
    }

    /// Decode an opaque string back into an id.
    ///
    /// Returns `None` for anything that was not produced by `encode`
    /// with the same secret: bad base64, wrong length, failed tag
    /// check, or a foreign key. Callers treat `None` as not-found.
    pub fn decode(&self, encoded: &str) -> Option<i64> {
        let raw = URL_SAFE_NO_PAD.decode(encoded).ok()?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return None;
        }

        let (nonce_bytes, rest) = raw.split_at(NONCE_LEN);
        let (tag, ciphertext) = rest.split_at(TAG_LEN);

        // Reassemble into the ciphertext || tag layout aes-gcm expects
        let mut sealed = Vec::with_capacity(ciphertext.len() + TAG_LEN);
        sealed.extend_from_slice(ciphertext);
        sealed.extend_from_slice(tag);

        let nonce = Nonce::from_slice(nonce_bytes);
        let plaintext = self.cipher.decrypt(nonce, sealed.as_slice()).ok()?;

        let id = std::str::from_utf8(&plaintext).ok()?.parse::<i64>().ok()?;
        if id < 0 {
            return None;
        }
        Some(id)
    }
}
