//! Audit log model - append-only security and compliance trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// Audited actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    UserRegistered,
    UserLogin,
    UserLoginFailed,
    TwoFactorChallengeSent,
    TwoFactorFailed,
    ConsoleTokenRefreshed,
    ConsoleRefreshFailed,
    PasswordResetRequested,
    PasswordReset,
    PasswordResetFailed,
    EmailVerified,
    EmailVerificationFailed,
    ConsoleCodeIssued,
    ConsoleCodeExchanged,
    ConsoleCodeRejected,
    ConsentGranted,
    ConsentDenied,
    AuthorizationCodeIssued,
    TokenIssued,
    TokenGrantFailed,
    CodeReplayDetected,
    RefreshReplayDetected,
    ClientAuthFailed,
    TokenRevoked,
    AppCreated,
    ClientCreated,
    ClientSecretRegenerated,
    ClientTokensRevoked,
    MemberRoleChanged,
    OwnershipTransferred,
    TenantStatusChanged,
    MaintenanceToggled,
    SigningKeyRotated,
    S2sRequest,
    S2sAuthFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::UserRegistered => "user_registered",
            AuditAction::UserLogin => "user_login",
            AuditAction::UserLoginFailed => "user_login_failed",
            AuditAction::TwoFactorChallengeSent => "two_factor_challenge_sent",
            AuditAction::TwoFactorFailed => "two_factor_failed",
            AuditAction::ConsoleTokenRefreshed => "console_token_refreshed",
            AuditAction::ConsoleRefreshFailed => "console_refresh_failed",
            AuditAction::PasswordResetRequested => "password_reset_requested",
            AuditAction::PasswordReset => "password_reset",
            AuditAction::PasswordResetFailed => "password_reset_failed",
            AuditAction::EmailVerified => "email_verified",
            AuditAction::EmailVerificationFailed => "email_verification_failed",
            AuditAction::ConsoleCodeIssued => "console_code_issued",
            AuditAction::ConsoleCodeExchanged => "console_code_exchanged",
            AuditAction::ConsoleCodeRejected => "console_code_rejected",
            AuditAction::ConsentGranted => "consent_granted",
            AuditAction::ConsentDenied => "consent_denied",
            AuditAction::AuthorizationCodeIssued => "authorization_code_issued",
            AuditAction::TokenIssued => "token_issued",
            AuditAction::TokenGrantFailed => "token_grant_failed",
            AuditAction::CodeReplayDetected => "code_replay_detected",
            AuditAction::RefreshReplayDetected => "refresh_replay_detected",
            AuditAction::ClientAuthFailed => "client_auth_failed",
            AuditAction::TokenRevoked => "token_revoked",
            AuditAction::AppCreated => "app_created",
            AuditAction::ClientCreated => "client_created",
            AuditAction::ClientSecretRegenerated => "client_secret_regenerated",
            AuditAction::ClientTokensRevoked => "client_tokens_revoked",
            AuditAction::MemberRoleChanged => "member_role_changed",
            AuditAction::OwnershipTransferred => "ownership_transferred",
            AuditAction::TenantStatusChanged => "tenant_status_changed",
            AuditAction::MaintenanceToggled => "maintenance_toggled",
            AuditAction::SigningKeyRotated => "signing_key_rotated",
            AuditAction::S2sRequest => "s2s_request",
            AuditAction::S2sAuthFailed => "s2s_auth_failed",
        }
    }
}

/// Audit log entry. Rows are never updated or deleted.
#[derive(Debug, Clone, Serialize, FromRow)]
pub struct AuditLog {
    pub audit_id: Uuid,
    /// Acting user, when there is one.
    pub user_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub ip: Option<String>,
    pub data: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(action: AuditAction, resource_type: &str) -> Self {
        Self {
            audit_id: Uuid::new_v4(),
            user_id: None,
            action: action.as_str().to_string(),
            resource_type: resource_type.to_string(),
            resource_id: None,
            ip: None,
            data: serde_json::json!({}),
            created_utc: Utc::now(),
        }
    }

    pub fn user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn resource(mut self, resource_id: impl ToString) -> Self {
        self.resource_id = Some(resource_id.to_string());
        self
    }

    pub fn ip(mut self, ip: Option<String>) -> Self {
        self.ip = ip;
        self
    }

    pub fn data(mut self, data: serde_json::Value) -> Self {
        self.data = data;
        self
    }

    pub fn is(&self, action: AuditAction) -> bool {
        self.action == action.as_str()
    }
}
