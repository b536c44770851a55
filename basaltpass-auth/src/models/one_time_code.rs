//! One-time code model - email verification, password reset and 2FA challenges.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtpPurpose {
    EmailVerification,
    PasswordReset,
    TwoFactor,
}

impl OtpPurpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            OtpPurpose::EmailVerification => "email_verification",
            OtpPurpose::PasswordReset => "password_reset",
            OtpPurpose::TwoFactor => "two_factor",
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct OneTimeCode {
    pub otp_id: Uuid,
    pub user_id: Uuid,
    pub purpose: String,
    pub code_hash: String,
    pub attempts: i32,
    pub max_attempts: i32,
    pub expiry_utc: DateTime<Utc>,
    pub used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl OneTimeCode {
    pub fn new(
        user_id: Uuid,
        purpose: OtpPurpose,
        code_hash: String,
        ttl: Duration,
        max_attempts: i32,
    ) -> Self {
        let now = Utc::now();
        Self {
            otp_id: Uuid::new_v4(),
            user_id,
            purpose: purpose.as_str().to_string(),
            code_hash,
            attempts: 0,
            max_attempts,
            expiry_utc: now + ttl,
            used_utc: None,
            created_utc: now,
        }
    }

    pub fn is_for(&self, purpose: OtpPurpose) -> bool {
        self.purpose == purpose.as_str()
    }

    /// Unused, unexpired and under the attempt limit.
    pub fn is_usable(&self) -> bool {
        self.used_utc.is_none() && self.expiry_utc > Utc::now() && self.attempts < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attempt_limit() {
        let mut code = OneTimeCode::new(
            Uuid::new_v4(),
            OtpPurpose::TwoFactor,
            "h".to_string(),
            Duration::minutes(5),
            5,
        );
        assert!(code.is_usable());
        code.attempts = 5;
        assert!(!code.is_usable());
    }

    #[test]
    fn test_used_or_expired_code_is_unusable() {
        let mut code = OneTimeCode::new(
            Uuid::new_v4(),
            OtpPurpose::PasswordReset,
            "h".to_string(),
            Duration::hours(1),
            1,
        );
        code.used_utc = Some(Utc::now());
        assert!(!code.is_usable());

        code.used_utc = None;
        code.expiry_utc = Utc::now() - Duration::seconds(1);
        assert!(!code.is_usable());
    }
}
