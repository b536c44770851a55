//! Opaque OAuth access and refresh tokens. Only SHA-256 digests are stored.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, FromRow)]
pub struct AccessToken {
    pub token_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub client_id: String,
    /// `None` for client-credentials tokens.
    pub user_id: Option<Uuid>,
    pub scopes: Vec<String>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(
        token_hash: String,
        family_id: Uuid,
        client_id: String,
        user_id: Option<Uuid>,
        scopes: Vec<String>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            token_hash,
            family_id,
            client_id,
            user_id,
            scopes,
            expiry_utc: now + Duration::seconds(ttl_seconds),
            revoked_utc: None,
            created_utc: now,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }
}

/// Refresh token. Rotation links each token to its `parent_id` inside one family.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshToken {
    pub token_id: Uuid,
    pub token_hash: String,
    pub family_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub access_token_id: Uuid,
    pub client_id: String,
    pub user_id: Uuid,
    pub scopes: Vec<String>,
    pub auth_time_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshToken {
    pub fn new(
        token_hash: String,
        access: &AccessToken,
        user_id: Uuid,
        parent_id: Option<Uuid>,
        auth_time_utc: DateTime<Utc>,
        ttl_days: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            token_id: Uuid::new_v4(),
            token_hash,
            family_id: access.family_id,
            parent_id,
            access_token_id: access.token_id,
            client_id: access.client_id.clone(),
            user_id,
            scopes: access.scopes.clone(),
            auth_time_utc,
            expiry_utc: now + Duration::days(ttl_days),
            revoked_utc: None,
            created_utc: now,
        }
    }

    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > now
    }
}

/// A freshly minted pair, persisted atomically with the code or rotation it answers.
#[derive(Debug, Clone)]
pub struct MintedTokens {
    pub access: AccessToken,
    pub refresh: RefreshToken,
}

/// Why a refresh token presentation was refused without a cascade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshRejection {
    ClientMismatch,
    Expired,
    ScopeWidened,
}

impl RefreshRejection {
    pub fn description(&self) -> &'static str {
        match self {
            RefreshRejection::ClientMismatch => "refresh token was issued to another client",
            RefreshRejection::Expired => "refresh token expired",
            RefreshRejection::ScopeWidened => "requested scope exceeds the original grant",
        }
    }
}
