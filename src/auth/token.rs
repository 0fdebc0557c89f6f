/// Signed, expiring session tokens
///
/// Format: `base64url(username) "." expires_unix "." base64url(hmac_sha256)`,
/// the MAC covering everything before the last dot.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD as B64;
use hmac::{Hmac, Mac};
use rand::RngCore;
use serde::Serialize;
use sha2::Sha256;

use super::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// A token together with its expiry (UNIX seconds)
#[derive(Debug, Clone, Serialize)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: u64,
}

pub struct TokenSigner {
    key: Vec<u8>,
    ttl: Duration,
}

impl TokenSigner {
    pub fn new(key: impl Into<Vec<u8>>, ttl: Duration) -> Self {
        Self {
            key: key.into(),
            ttl,
        }
    }

    /// Signer with a random per-process key
    pub fn random(ttl: Duration) -> Self {
        let mut key = vec![0u8; 32];
        rand::thread_rng().fill_bytes(&mut key);
        Self::new(key, ttl)
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(&self, username: &str) -> IssuedToken {
        self.issue_at(username, unix_now())
    }

    pub fn issue_at(&self, username: &str, now: u64) -> IssuedToken {
        let expires_at = now.saturating_add(self.ttl.as_secs());
        let payload = format!("{}.{}", B64.encode(username.as_bytes()), expires_at);
        let signature = B64.encode(self.mac(&payload).finalize().into_bytes());
        IssuedToken {
            token: format!("{payload}.{signature}"),
            expires_at,
        }
    }

    /// Username the token was issued to
    pub fn verify(&self, token: &str) -> Result<String, AuthError> {
        self.verify_at(token, unix_now())
    }

    pub fn verify_at(&self, token: &str, now: u64) -> Result<String, AuthError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(AuthError::InvalidToken)?;
        let signature = B64.decode(signature).map_err(|_| AuthError::InvalidToken)?;
        self.mac(payload)
            .verify_slice(&signature)
            .map_err(|_| AuthError::InvalidToken)?;

        let (user, expires_at) = payload.split_once('.').ok_or(AuthError::InvalidToken)?;
        let expires_at: u64 = expires_at.parse().map_err(|_| AuthError::InvalidToken)?;
        if now >= expires_at {
            return Err(AuthError::TokenExpired);
        }

        let user = B64.decode(user).map_err(|_| AuthError::InvalidToken)?;
        String::from_utf8(user).map_err(|_| AuthError::InvalidToken)
    }

    fn mac(&self, payload: &str) -> HmacSha256 {
        let mut mac =
            HmacSha256::new_from_slice(&self.key).expect("HMAC accepts keys of any length");
        mac.update(payload.as_bytes());
        mac
    }
}

impl std::fmt::Debug for TokenSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSigner")
            .field("ttl", &self.ttl)
            .finish_non_exhaustive()
    }
}

pub(crate) fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}
