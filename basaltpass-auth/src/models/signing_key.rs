//! Persisted ID-token signing keys.

use chrono::{DateTime, Utc};
use sqlx::FromRow;

/// RSA signing key. `not_after_utc = None` marks the active key.
#[derive(Clone, FromRow)]
pub struct SigningKey {
    pub kid: String,
    pub algorithm: String,
    pub public_jwk: serde_json::Value,
    pub private_key_pem: String,
    pub created_utc: DateTime<Utc>,
    pub not_before_utc: DateTime<Utc>,
    pub not_after_utc: Option<DateTime<Utc>>,
}

impl SigningKey {
    pub fn is_active(&self) -> bool {
        self.not_after_utc.is_none()
    }

    /// Still listed in JWKS at `now`.
    pub fn is_published(&self, now: DateTime<Utc>) -> bool {
        self.not_after_utc.map_or(true, |t| t > now)
    }
}

impl std::fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("not_before_utc", &self.not_before_utc)
            .field("not_after_utc", &self.not_after_utc)
            .finish_non_exhaustive()
    }
}
