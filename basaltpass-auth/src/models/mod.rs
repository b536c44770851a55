//! Typed entity records.

pub mod app;
pub mod audit_log;
pub mod authorization_code;
pub mod client;
pub mod consent;
pub mod membership;
pub mod one_time_code;
pub mod refresh_session;
pub mod role;
pub mod setting;
pub mod signing_key;
pub mod tenant;
pub mod token;
pub mod user;

pub use app::App;
pub use audit_log::{AuditAction, AuditLog};
pub use authorization_code::{AuthorizationCode, CodeRedemption, CodeRejection};
pub use client::{ClientSummary, OAuthClient};
pub use consent::Consent;
pub use membership::{TenantRole, TenantUser};
pub use one_time_code::{OneTimeCode, OtpPurpose};
pub use refresh_session::RefreshSession;
pub use role::{permissions, Permission, Role};
pub use setting::{MaintenanceSetting, Setting, MAINTENANCE_KEY};
pub use signing_key::SigningKey;
pub use tenant::{Tenant, TenantStatus};
pub use token::{AccessToken, MintedTokens, RefreshRejection, RefreshToken};
pub use user::{SanitizedUser, User};
