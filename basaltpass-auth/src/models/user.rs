//! User model - global accounts; tenant access goes through memberships.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// User entity.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub password_hash: String,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub two_fa_enabled: bool,
    pub banned: bool,
    pub super_admin: bool,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl User {
    /// Create a new unverified user.
    pub fn new(email: String, password_hash: String) -> Self {
        let now = Utc::now();
        Self {
            user_id: Uuid::new_v4(),
            email: email.trim().to_lowercase(),
            phone: None,
            password_hash,
            nickname: None,
            avatar_url: None,
            email_verified: false,
            phone_verified: false,
            two_fa_enabled: false,
            banned: false,
            super_admin: false,
            created_utc: now,
            updated_utc: now,
        }
    }

    /// Banned users cannot obtain tokens of any kind.
    pub fn can_obtain_tokens(&self) -> bool {
        !self.banned
    }

    pub fn display_name(&self) -> &str {
        self.nickname.as_deref().unwrap_or(&self.email)
    }

    /// Convert to sanitized response (no sensitive fields).
    pub fn sanitized(&self) -> SanitizedUser {
        SanitizedUser::from(self)
    }
}

/// Public view of a user for console and S2S responses.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct SanitizedUser {
    pub user_id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub nickname: Option<String>,
    pub avatar_url: Option<String>,
    pub email_verified: bool,
    pub phone_verified: bool,
    pub two_fa_enabled: bool,
    pub created_utc: DateTime<Utc>,
}

impl From<&User> for SanitizedUser {
    fn from(u: &User) -> Self {
        Self {
            user_id: u.user_id,
            email: u.email.clone(),
            phone: u.phone.clone(),
            nickname: u.nickname.clone(),
            avatar_url: u.avatar_url.clone(),
            email_verified: u.email_verified,
            phone_verified: u.phone_verified,
            two_fa_enabled: u.two_fa_enabled,
            created_utc: u.created_utc,
        }
    }
}
