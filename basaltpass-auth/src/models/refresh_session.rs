//! Refresh session model - opaque console refresh tokens.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Refresh session entity.
#[derive(Debug, Clone, FromRow)]
pub struct RefreshSession {
    pub session_id: Uuid,
    pub user_id: Uuid,
    pub token_hash: String,
    /// Console scope the session re-issues (`user`, `tenant` or `admin`).
    pub console_scope: String,
    pub tenant_id: Option<Uuid>,
    pub expiry_utc: DateTime<Utc>,
    pub revoked_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RefreshSession {
    /// Create a new refresh session.
    pub fn new(
        user_id: Uuid,
        token_hash: String,
        console_scope: &str,
        tenant_id: Option<Uuid>,
        expiry_days: i64,
    ) -> Self {
        Self {
            session_id: Uuid::new_v4(),
            user_id,
            token_hash,
            console_scope: console_scope.to_string(),
            tenant_id,
            expiry_utc: Utc::now() + Duration::days(expiry_days),
            revoked_utc: None,
            created_utc: Utc::now(),
        }
    }

    /// Check if session is valid (not expired, not revoked).
    pub fn is_valid(&self) -> bool {
        self.revoked_utc.is_none() && self.expiry_utc > Utc::now()
    }
}
