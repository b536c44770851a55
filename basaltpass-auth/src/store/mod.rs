//! Persistence seam.
//!
//! Every component reaches the database through [`Store`]. [`PgStore`] is the
//! production implementation; [`MemoryStore`] backs tests and single-process
//! demos. Multi-row state changes (code redemption, refresh rotation, secret
//! regeneration, ownership transfer, signing-key rotation) are single trait
//! calls so each implementation can make them atomic.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_core::error::AppError;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AccessToken, App, AuditLog, AuthorizationCode, CodeRedemption, CodeRejection, Consent,
    MintedTokens, OAuthClient, OneTimeCode, Permission, RefreshRejection, RefreshSession,
    RefreshToken, Role, Setting, SigningKey, Tenant, TenantStatus, TenantUser, User,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(&'static str),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("transient database failure: {0}")]
    Transient(anyhow::Error),

    #[error("database failure: {0}")]
    Backend(#[from] anyhow::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            StoreError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            StoreError::Transient(e) | StoreError::Backend(e) => AppError::DatabaseError(e),
        }
    }
}

/// Result of presenting an authorization code.
#[derive(Debug)]
pub enum RedeemOutcome {
    /// Code consumed and the minted pair stored in the same transaction.
    Redeemed(AuthorizationCode),
    /// Code was already consumed; its whole token family is now revoked.
    Replayed { code_id: Uuid, revoked: u64 },
    /// Live code whose bindings do not match. The code stays redeemable.
    Rejected(CodeRejection),
    NotFound,
}

/// Result of presenting a refresh token.
#[derive(Debug)]
pub enum RotateOutcome {
    /// The presented token is revoked and the minted pair stored.
    Rotated(RefreshToken),
    /// A revoked token came back; its family is now revoked.
    Replayed { family_id: Uuid, revoked: u64 },
    Rejected(RefreshRejection),
    NotFound,
}

#[async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> StoreResult<()>;

    // ==================== Tenant Operations ====================

    async fn find_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>>;
    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()>;
    async fn set_tenant_status(&self, tenant_id: Uuid, status: TenantStatus) -> StoreResult<()>;

    // ==================== User Operations ====================

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>>;
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>>;
    /// Inserts a user. The very first user becomes super admin and owner of
    /// a fresh `default` tenant, all in one transaction. Returns the stored row.
    async fn create_user(&self, user: &User) -> StoreResult<User>;
    /// Persists profile, verification, 2FA, ban and password fields.
    async fn save_user(&self, user: &User) -> StoreResult<()>;

    // ==================== Membership Operations ====================

    async fn find_membership(&self, user_id: Uuid, tenant_id: Uuid)
        -> StoreResult<Option<TenantUser>>;
    async fn earliest_membership(&self, user_id: Uuid) -> StoreResult<Option<TenantUser>>;
    /// Conflict when the pair exists or a second owner would be created.
    async fn insert_membership(&self, membership: &TenantUser) -> StoreResult<()>;
    /// Changes a non-owner role. Owner changes go through [`Store::transfer_ownership`].
    async fn update_membership_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: &str,
    ) -> StoreResult<()>;
    /// Demotes `from` to admin and promotes `to` to owner atomically.
    async fn transfer_ownership(&self, tenant_id: Uuid, from: Uuid, to: Uuid) -> StoreResult<()>;

    // ==================== RBAC Operations ====================

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()>;
    async fn insert_role(&self, role: &Role) -> StoreResult<()>;
    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()>;
    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()>;
    /// Deletes the role together with its role-permission and user-role rows.
    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()>;
    /// Roles granted to the user in `tenant_id` (`None` = global scope).
    async fn user_roles(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> StoreResult<Vec<Role>>;
    /// Union of the permissions of [`Store::user_roles`].
    async fn effective_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> StoreResult<Vec<Permission>>;

    // ==================== App & Client Operations ====================

    async fn insert_app(&self, app: &App) -> StoreResult<()>;
    async fn find_app(&self, app_id: Uuid) -> StoreResult<Option<App>>;
    async fn insert_client(&self, client: &OAuthClient) -> StoreResult<()>;
    async fn find_client(&self, client_id: &str) -> StoreResult<Option<OAuthClient>>;
    async fn list_clients_for_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<OAuthClient>>;
    async fn touch_client(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()>;
    /// Writes the new secret hash and deletes every token of the client in one transaction.
    async fn regenerate_client_secret(&self, client_id: &str, secret_hash: &str)
        -> StoreResult<u64>;
    /// Deletes access and refresh tokens of the client in one transaction.
    async fn revoke_all_client_tokens(&self, client_id: &str) -> StoreResult<u64>;

    // ==================== Authorization Code Operations ====================

    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()>;
    /// Read without locking, for pre-checks.
    async fn find_authorization_code(&self, code_hash: &str)
        -> StoreResult<Option<AuthorizationCode>>;
    /// Locks the code row, validates, consumes and stores `minted` atomically.
    async fn redeem_authorization_code(
        &self,
        code_hash: &str,
        redemption: &CodeRedemption,
        minted: &MintedTokens,
    ) -> StoreResult<RedeemOutcome>;

    // ==================== Token Operations ====================

    async fn insert_access_token(&self, token: &AccessToken) -> StoreResult<()>;
    async fn find_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>>;
    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>>;
    /// Locks the refresh row, revokes it and stores `minted` atomically.
    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: &str,
        minted: &MintedTokens,
    ) -> StoreResult<RotateOutcome>;
    /// Revokes an access token, or a refresh token's whole family, owned by
    /// `client_id`. Unknown or foreign tokens are ignored. Returns rows touched.
    async fn revoke_token(&self, token_hash: &str, client_id: &str) -> StoreResult<u64>;

    // ==================== Console Session Operations ====================

    async fn insert_refresh_session(&self, session: &RefreshSession) -> StoreResult<()>;
    async fn find_refresh_session(&self, token_hash: &str) -> StoreResult<Option<RefreshSession>>;
    /// Revokes the valid session matching `token_hash` and stores `next`.
    /// `None` when no valid session matched.
    async fn rotate_refresh_session(
        &self,
        token_hash: &str,
        next: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>>;
    async fn revoke_user_sessions(&self, user_id: Uuid) -> StoreResult<u64>;

    // ==================== Consent Operations ====================

    async fn find_consent(&self, user_id: Uuid, client_id: &str) -> StoreResult<Option<Consent>>;
    async fn upsert_consent(&self, consent: &Consent) -> StoreResult<()>;

    // ==================== One-Time Code Operations ====================

    async fn insert_one_time_code(&self, code: &OneTimeCode) -> StoreResult<()>;
    async fn find_one_time_code(&self, otp_id: Uuid) -> StoreResult<Option<OneTimeCode>>;
    async fn find_one_time_code_by_hash(&self, code_hash: &str)
        -> StoreResult<Option<OneTimeCode>>;
    async fn record_otp_attempt(&self, otp_id: Uuid) -> StoreResult<()>;
    /// Marks the code used. `false` if it was already used.
    async fn consume_one_time_code(&self, otp_id: Uuid) -> StoreResult<bool>;

    // ==================== Setting Operations ====================

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>>;
    async fn put_setting(&self, setting: &Setting) -> StoreResult<()>;

    // ==================== Signing Key Operations ====================

    async fn list_signing_keys(&self) -> StoreResult<Vec<SigningKey>>;
    /// Stores `key` as active and, when given, retires the previous active key.
    async fn insert_signing_key(
        &self,
        key: &SigningKey,
        retire: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()>;

    // ==================== Audit Operations ====================

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()>;
}
