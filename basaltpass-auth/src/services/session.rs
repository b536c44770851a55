//! Console session lifecycle: registration, login with optional email 2FA,
//! refresh rotation, password reset, email verification and console-scope
//! upgrades.

use std::sync::Arc;

use chrono::Duration;
use subtle::ConstantTimeEq;
use uuid::Uuid;

use super::audit::AuditService;
use super::console_token::{ConsoleScope, ConsoleTokenIssuer};
use super::email::EmailProvider;
use super::ServiceError;
use crate::dtos::auth::{
    ConsoleCodeResponse, ConsoleTokenResponse, LoginResponse, RegisterRequest, RegisterResponse,
};
use crate::models::{AuditAction, AuditLog, OneTimeCode, OtpPurpose, RefreshSession, User};
use crate::store::{Store, StoreError};
use crate::utils::{
    hash_password,
    password::verify_or_burn,
    token::{digest, generate_numeric_code, generate_opaque, random_urlsafe, CONSOLE_REFRESH_PREFIX},
    Password,
};

const TWO_FACTOR_DIGITS: u32 = 6;
const TWO_FACTOR_TTL_MINUTES: i64 = 5;
const TWO_FACTOR_MAX_ATTEMPTS: i32 = 5;
const PASSWORD_RESET_TTL_HOURS: i64 = 1;
const EMAIL_VERIFICATION_TTL_HOURS: i64 = 24;

pub struct SessionService {
    store: Arc<dyn Store>,
    tokens: Arc<ConsoleTokenIssuer>,
    email: Arc<dyn EmailProvider>,
    audit: AuditService,
    refresh_ttl_days: i64,
    ui_base_url: String,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn Store>,
        tokens: Arc<ConsoleTokenIssuer>,
        email: Arc<dyn EmailProvider>,
        audit: AuditService,
        refresh_ttl_days: i64,
        ui_base_url: String,
    ) -> Self {
        Self {
            store,
            tokens,
            email,
            audit,
            refresh_ttl_days,
            ui_base_url,
        }
    }

    // ==================== Registration ====================

    #[tracing::instrument(skip(self, req, ip), fields(email = %req.email))]
    pub async fn register(
        &self,
        req: RegisterRequest,
        ip: Option<String>,
    ) -> Result<RegisterResponse, ServiceError> {
        if self.store.find_user_by_email(&req.email).await?.is_some() {
            return Err(ServiceError::EmailAlreadyRegistered);
        }

        let password_hash = hash_password(&Password::new(req.password))?;
        let mut user = User::new(req.email, password_hash.into_string());
        user.phone = req.phone.filter(|p| !p.trim().is_empty());
        user.nickname = req.nickname.filter(|n| !n.trim().is_empty());

        let user = match self.store.create_user(&user).await {
            Ok(user) => user,
            Err(StoreError::Conflict(msg)) if msg.contains("email") => {
                return Err(ServiceError::EmailAlreadyRegistered)
            }
            Err(e) => return Err(e.into()),
        };

        tracing::info!(user_id = %user.user_id, super_admin = user.super_admin, "User registered");
        self.audit
            .record(
                AuditLog::new(AuditAction::UserRegistered, "user")
                    .user(user.user_id)
                    .resource(user.user_id)
                    .ip(ip),
            )
            .await;

        let token = self
            .issue_link_code(
                user.user_id,
                OtpPurpose::EmailVerification,
                Duration::hours(EMAIL_VERIFICATION_TTL_HOURS),
            )
            .await?;
        if let Err(e) = self
            .email
            .send_verification_email(&user.email, &token, &self.ui_base_url)
            .await
        {
            tracing::warn!(error = %e, user_id = %user.user_id, "Verification email not sent");
        }

        Ok(RegisterResponse {
            user_id: user.user_id,
        })
    }

    #[tracing::instrument(skip(self, token, ip))]
    pub async fn verify_email(&self, token: &str, ip: Option<String>) -> Result<(), ServiceError> {
        let code = match self.redeem_link_code(token, OtpPurpose::EmailVerification).await {
            Ok(code) => code,
            Err(e) => {
                self.audit
                    .record(AuditLog::new(AuditAction::EmailVerificationFailed, "user").ip(ip))
                    .await;
                return Err(e);
            }
        };

        let mut user = self
            .store
            .find_user(code.user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        user.email_verified = true;
        self.store.save_user(&user).await?;

        self.audit
            .record(
                AuditLog::new(AuditAction::EmailVerified, "user")
                    .user(user.user_id)
                    .resource(user.user_id)
                    .ip(ip),
            )
            .await;
        Ok(())
    }

    // ==================== Login ====================

    /// `identifier` is an email address or a phone number. Every credential
    /// failure reads the same so accounts cannot be enumerated.
    #[tracing::instrument(skip(self, identifier, password, ip))]
    pub async fn login(
        &self,
        identifier: &str,
        password: &str,
        ip: Option<String>,
    ) -> Result<LoginResponse, ServiceError> {
        let identifier = identifier.trim();
        let user = if identifier.contains('@') {
            self.store.find_user_by_email(identifier).await?
        } else {
            self.store.find_user_by_phone(identifier).await?
        };

        let presented = Password::new(password.to_string());
        if !verify_or_burn(&presented, user.as_ref().map(|u| u.password_hash.as_str())) {
            let mut entry = AuditLog::new(AuditAction::UserLoginFailed, "user")
                .ip(ip)
                .data(serde_json::json!({ "reason": "invalid credentials" }));
            if let Some(user) = &user {
                entry = entry.user(user.user_id).resource(user.user_id);
            }
            self.audit.record(entry).await;
            return Err(ServiceError::InvalidCredentials);
        }
        let Some(user) = user else {
            return Err(ServiceError::InvalidCredentials);
        };

        if !user.can_obtain_tokens() {
            self.audit
                .record(
                    AuditLog::new(AuditAction::UserLoginFailed, "user")
                        .user(user.user_id)
                        .resource(user.user_id)
                        .ip(ip)
                        .data(serde_json::json!({ "reason": "banned" })),
                )
                .await;
            return Err(ServiceError::UserBanned);
        }

        if user.two_fa_enabled {
            let code = generate_numeric_code(TWO_FACTOR_DIGITS);
            let challenge = OneTimeCode::new(
                user.user_id,
                OtpPurpose::TwoFactor,
                digest(&code),
                Duration::minutes(TWO_FACTOR_TTL_MINUTES),
                TWO_FACTOR_MAX_ATTEMPTS,
            );
            self.store.insert_one_time_code(&challenge).await?;
            self.email
                .send_two_factor_code(&user.email, &code)
                .await
                .map_err(|e| ServiceError::EmailError(e.to_string()))?;

            self.audit
                .record(
                    AuditLog::new(AuditAction::TwoFactorChallengeSent, "user")
                        .user(user.user_id)
                        .resource(challenge.otp_id)
                        .ip(ip),
                )
                .await;
            return Ok(LoginResponse::challenge(challenge.otp_id));
        }

        let tokens = self.start_session(&user, ip).await?;
        Ok(LoginResponse::tokens(tokens))
    }

    #[tracing::instrument(skip(self, code, ip))]
    pub async fn verify_two_factor(
        &self,
        challenge_id: Uuid,
        code: &str,
        ip: Option<String>,
    ) -> Result<ConsoleTokenResponse, ServiceError> {
        let challenge = self
            .store
            .find_one_time_code(challenge_id)
            .await?
            .filter(|c| c.is_for(OtpPurpose::TwoFactor) && c.is_usable());
        let Some(challenge) = challenge else {
            self.audit
                .record(
                    AuditLog::new(AuditAction::TwoFactorFailed, "one_time_code")
                        .resource(challenge_id)
                        .ip(ip),
                )
                .await;
            return Err(ServiceError::InvalidCode);
        };

        let matches: bool = digest(code)
            .as_bytes()
            .ct_eq(challenge.code_hash.as_bytes())
            .into();
        if !matches || !self.store.consume_one_time_code(challenge.otp_id).await? {
            if !matches {
                self.store.record_otp_attempt(challenge.otp_id).await?;
            }
            self.audit
                .record(
                    AuditLog::new(AuditAction::TwoFactorFailed, "one_time_code")
                        .user(challenge.user_id)
                        .resource(challenge.otp_id)
                        .ip(ip),
                )
                .await;
            return Err(ServiceError::InvalidCode);
        }

        let user = self
            .store
            .find_user(challenge.user_id)
            .await?
            .ok_or(ServiceError::InvalidCode)?;
        if !user.can_obtain_tokens() {
            return Err(ServiceError::UserBanned);
        }
        self.start_session(&user, ip).await
    }

    /// `scp=user` session bound to the earliest membership.
    async fn start_session(
        &self,
        user: &User,
        ip: Option<String>,
    ) -> Result<ConsoleTokenResponse, ServiceError> {
        let tenant_id = self.earliest_tenant(user.user_id).await?;
        let (refresh_token, session) = self.new_session(user.user_id, tenant_id, ConsoleScope::User);
        self.store.insert_refresh_session(&session).await?;
        let response = self.respond(user.user_id, tenant_id, ConsoleScope::User, refresh_token)?;

        tracing::info!(user_id = %user.user_id, "User logged in");
        self.audit
            .record(
                AuditLog::new(AuditAction::UserLogin, "user")
                    .user(user.user_id)
                    .resource(user.user_id)
                    .ip(ip),
            )
            .await;
        Ok(response)
    }

    // ==================== Refresh ====================

    /// Rotates a console refresh token. `tid` is re-derived from the database.
    #[tracing::instrument(skip(self, refresh_token, ip))]
    pub async fn refresh(
        &self,
        refresh_token: &str,
        ip: Option<String>,
    ) -> Result<ConsoleTokenResponse, ServiceError> {
        match self.rotate(refresh_token).await {
            Ok((user_id, response)) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::ConsoleTokenRefreshed, "refresh_session")
                            .user(user_id)
                            .ip(ip)
                            .data(serde_json::json!({ "scope": response.scope.as_str() })),
                    )
                    .await;
                Ok(response)
            }
            Err(e) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::ConsoleRefreshFailed, "refresh_session")
                            .ip(ip)
                            .data(serde_json::json!({ "reason": e.to_string() })),
                    )
                    .await;
                Err(e)
            }
        }
    }

    async fn rotate(&self, refresh_token: &str) -> Result<(Uuid, ConsoleTokenResponse), ServiceError> {
        let token_hash = digest(refresh_token);
        let current = self
            .store
            .find_refresh_session(&token_hash)
            .await?
            .filter(RefreshSession::is_valid)
            .ok_or(ServiceError::InvalidToken)?;
        let scope: ConsoleScope = current
            .console_scope
            .parse()
            .map_err(|_| ServiceError::InvalidToken)?;

        let user = self
            .store
            .find_user(current.user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.can_obtain_tokens() {
            return Err(ServiceError::UserBanned);
        }

        let tenant_id = match scope {
            ConsoleScope::User => self.earliest_tenant(user.user_id).await?,
            ConsoleScope::Tenant => {
                let tenant_id = current.tenant_id.ok_or(ServiceError::NoMembership)?;
                self.ensure_tenant_access(user.user_id, tenant_id).await?;
                Some(tenant_id)
            }
            ConsoleScope::Admin => {
                if !user.super_admin {
                    return Err(ServiceError::Forbidden("super admin required".to_string()));
                }
                current.tenant_id
            }
        };

        let (next_token, next) = self.new_session(user.user_id, tenant_id, scope);
        self.store
            .rotate_refresh_session(&token_hash, &next)
            .await?
            .ok_or(ServiceError::InvalidToken)?;

        let response = self.respond(user.user_id, tenant_id, scope, next_token)?;
        Ok((user.user_id, response))
    }

    // ==================== Password Reset ====================

    /// Always succeeds from the caller's point of view.
    #[tracing::instrument(skip(self, email, ip))]
    pub async fn request_password_reset(&self, email: &str, ip: Option<String>) -> Result<(), ServiceError> {
        let Some(user) = self.store.find_user_by_email(email).await? else {
            tracing::debug!("Password reset requested for unknown email");
            return Ok(());
        };
        if !user.can_obtain_tokens() {
            return Ok(());
        }

        let token = self
            .issue_link_code(
                user.user_id,
                OtpPurpose::PasswordReset,
                Duration::hours(PASSWORD_RESET_TTL_HOURS),
            )
            .await?;
        if let Err(e) = self
            .email
            .send_password_reset_email(&user.email, &token, &self.ui_base_url)
            .await
        {
            tracing::warn!(error = %e, user_id = %user.user_id, "Password reset email not sent");
        }

        self.audit
            .record(
                AuditLog::new(AuditAction::PasswordResetRequested, "user")
                    .user(user.user_id)
                    .resource(user.user_id)
                    .ip(ip),
            )
            .await;
        Ok(())
    }

    /// Sets the new password and revokes every console session of the user.
    #[tracing::instrument(skip(self, token, new_password, ip))]
    pub async fn reset_password(
        &self,
        token: &str,
        new_password: &str,
        ip: Option<String>,
    ) -> Result<(), ServiceError> {
        let code = match self.redeem_link_code(token, OtpPurpose::PasswordReset).await {
            Ok(code) => code,
            Err(e) => {
                self.audit
                    .record(AuditLog::new(AuditAction::PasswordResetFailed, "user").ip(ip))
                    .await;
                return Err(e);
            }
        };

        let mut user = self
            .store
            .find_user(code.user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        user.password_hash = hash_password(&Password::new(new_password.to_string()))?.into_string();
        self.store.save_user(&user).await?;
        let revoked = self.store.revoke_user_sessions(user.user_id).await?;

        tracing::info!(user_id = %user.user_id, sessions_revoked = revoked, "Password reset");
        self.audit
            .record(
                AuditLog::new(AuditAction::PasswordReset, "user")
                    .user(user.user_id)
                    .resource(user.user_id)
                    .ip(ip)
                    .data(serde_json::json!({ "sessions_revoked": revoked })),
            )
            .await;
        Ok(())
    }

    // ==================== Console Scope Upgrade ====================

    /// Issues a single-use code for a `tenant` or `admin` console session.
    #[tracing::instrument(skip(self, ip))]
    pub async fn console_authorize(
        &self,
        user_id: Uuid,
        target: ConsoleScope,
        tenant_id: Option<Uuid>,
        ip: Option<String>,
    ) -> Result<ConsoleCodeResponse, ServiceError> {
        let result = self.console_target(user_id, target, tenant_id).await;
        let tenant_id = match result {
            Ok(tenant_id) => tenant_id,
            Err(e) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::ConsoleCodeRejected, "user")
                            .user(user_id)
                            .ip(ip)
                            .data(serde_json::json!({ "target": target.as_str(), "reason": e.to_string() })),
                    )
                    .await;
                return Err(e);
            }
        };

        let code = self.tokens.issue_code(user_id, tenant_id, target)?;
        self.audit
            .record(
                AuditLog::new(AuditAction::ConsoleCodeIssued, "user")
                    .user(user_id)
                    .ip(ip)
                    .data(serde_json::json!({ "target": target.as_str(), "tenant_id": tenant_id })),
            )
            .await;

        Ok(ConsoleCodeResponse {
            code,
            expires_in: self.tokens.code_ttl_seconds(),
        })
    }

    /// Redeems a console code. Eligibility is checked again against the database.
    #[tracing::instrument(skip(self, code, ip))]
    pub async fn console_exchange(
        &self,
        code: &str,
        ip: Option<String>,
    ) -> Result<ConsoleTokenResponse, ServiceError> {
        let claims = match self.tokens.redeem_code(code) {
            Ok(claims) => claims,
            Err(e) => {
                self.audit
                    .record(AuditLog::new(AuditAction::ConsoleCodeRejected, "console_code").ip(ip))
                    .await;
                return Err(e);
            }
        };

        let tenant_id = match self.console_target(claims.sub, claims.target, claims.tid).await {
            Ok(tenant_id) => tenant_id,
            Err(e) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::ConsoleCodeRejected, "console_code")
                            .user(claims.sub)
                            .ip(ip)
                            .data(serde_json::json!({ "reason": e.to_string() })),
                    )
                    .await;
                return Err(e);
            }
        };

        let (refresh_token, session) = self.new_session(claims.sub, tenant_id, claims.target);
        self.store.insert_refresh_session(&session).await?;
        let response = self.respond(claims.sub, tenant_id, claims.target, refresh_token)?;

        self.audit
            .record(
                AuditLog::new(AuditAction::ConsoleCodeExchanged, "console_code")
                    .user(claims.sub)
                    .resource(claims.jti)
                    .ip(ip)
                    .data(serde_json::json!({ "target": claims.target.as_str(), "tenant_id": tenant_id })),
            )
            .await;
        Ok(response)
    }

    /// Resolves the tenant a console session for `target` would carry, or
    /// refuses when the user may not hold that scope.
    async fn console_target(
        &self,
        user_id: Uuid,
        target: ConsoleScope,
        tenant_id: Option<Uuid>,
    ) -> Result<Option<Uuid>, ServiceError> {
        let user = self
            .store
            .find_user(user_id)
            .await?
            .ok_or(ServiceError::InvalidToken)?;
        if !user.can_obtain_tokens() {
            return Err(ServiceError::UserBanned);
        }

        match target {
            ConsoleScope::User => Err(ServiceError::ValidationError(
                "target must be tenant or admin".to_string(),
            )),
            ConsoleScope::Tenant => {
                let tenant_id = match tenant_id {
                    Some(id) => id,
                    None => self
                        .earliest_tenant(user_id)
                        .await?
                        .ok_or(ServiceError::NoMembership)?,
                };
                self.ensure_tenant_access(user_id, tenant_id).await?;
                Ok(Some(tenant_id))
            }
            ConsoleScope::Admin if user.super_admin => Ok(tenant_id),
            ConsoleScope::Admin => Err(ServiceError::Forbidden("super admin required".to_string())),
        }
    }

    // ==================== Helpers ====================

    async fn earliest_tenant(&self, user_id: Uuid) -> Result<Option<Uuid>, ServiceError> {
        Ok(self
            .store
            .earliest_membership(user_id)
            .await?
            .map(|m| m.tenant_id))
    }

    async fn ensure_tenant_access(&self, user_id: Uuid, tenant_id: Uuid) -> Result<(), ServiceError> {
        self.store
            .find_membership(user_id, tenant_id)
            .await?
            .ok_or(ServiceError::NoMembership)?;
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or(ServiceError::NoMembership)?;
        if !tenant.is_active() {
            return Err(ServiceError::TenantInactive);
        }
        Ok(())
    }

    fn new_session(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        scope: ConsoleScope,
    ) -> (String, RefreshSession) {
        let token = generate_opaque(CONSOLE_REFRESH_PREFIX);
        let session = RefreshSession::new(
            user_id,
            digest(&token),
            scope.as_str(),
            tenant_id,
            self.refresh_ttl_days,
        );
        (token, session)
    }

    fn respond(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        scope: ConsoleScope,
        refresh_token: String,
    ) -> Result<ConsoleTokenResponse, ServiceError> {
        Ok(ConsoleTokenResponse {
            access_token: self.tokens.issue_access(user_id, tenant_id, scope)?,
            refresh_token,
            token_type: "Bearer".to_string(),
            expires_in: self.tokens.access_ttl_seconds(),
            scope,
            tenant_id,
        })
    }

    /// Stores a link token (verification, reset) and returns its plaintext.
    async fn issue_link_code(
        &self,
        user_id: Uuid,
        purpose: OtpPurpose,
        ttl: Duration,
    ) -> Result<String, ServiceError> {
        let token = random_urlsafe();
        let code = OneTimeCode::new(user_id, purpose, digest(&token), ttl, 1);
        self.store.insert_one_time_code(&code).await?;
        Ok(token)
    }

    async fn redeem_link_code(&self, token: &str, purpose: OtpPurpose) -> Result<OneTimeCode, ServiceError> {
        let code = self
            .store
            .find_one_time_code_by_hash(&digest(token))
            .await?
            .filter(|c| c.is_for(purpose) && c.is_usable())
            .ok_or(ServiceError::InvalidToken)?;
        if !self.store.consume_one_time_code(code.otp_id).await? {
            return Err(ServiceError::InvalidToken);
        }
        Ok(code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConsoleConfig;
    use crate::services::email::{EmailKind, MockEmailService};
    use crate::store::MemoryStore;

    struct Harness {
        store: Arc<MemoryStore>,
        email: MockEmailService,
        sessions: SessionService,
        tokens: Arc<ConsoleTokenIssuer>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let email = MockEmailService::new();
        let tokens = Arc::new(ConsoleTokenIssuer::new(&ConsoleConfig {
            jwt_secret: "test-secret".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            code_ttl_seconds: 30,
        }));
        let sessions = SessionService::new(
            store.clone(),
            tokens.clone(),
            Arc::new(email.clone()),
            AuditService::new(store.clone()),
            7,
            "http://ui".to_string(),
        );
        Harness {
            store,
            email,
            sessions,
            tokens,
        }
    }

    fn register_req(email: &str) -> RegisterRequest {
        RegisterRequest {
            email: email.to_string(),
            password: "password123".to_string(),
            phone: None,
            nickname: None,
        }
    }

    #[tokio::test]
    async fn test_first_user_is_super_admin_with_tenant() {
        let h = harness();
        let first = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let second = h.sessions.register(register_req("b@example.com"), None).await.unwrap();

        let a = h.store.find_user(first.user_id).await.unwrap().unwrap();
        let b = h.store.find_user(second.user_id).await.unwrap().unwrap();
        assert!(a.super_admin);
        assert!(!b.super_admin);
        assert!(h.store.earliest_membership(a.user_id).await.unwrap().is_some());

        let err = h.sessions.register(register_req("A@example.com"), None).await.unwrap_err();
        assert!(matches!(err, ServiceError::EmailAlreadyRegistered));
    }

    #[tokio::test]
    async fn test_login_failures_are_indistinguishable() {
        let h = harness();
        h.sessions.register(register_req("a@example.com"), None).await.unwrap();

        let unknown = h.sessions.login("nobody@example.com", "password123", None).await;
        let wrong = h.sessions.login("a@example.com", "wrong-password", None).await;
        assert!(matches!(unknown, Err(ServiceError::InvalidCredentials)));
        assert!(matches!(wrong, Err(ServiceError::InvalidCredentials)));
        assert!(h
            .store
            .audit_entries()
            .iter()
            .any(|e| e.is(AuditAction::UserLoginFailed)));
    }

    #[tokio::test]
    async fn test_login_issues_user_scope_with_earliest_tenant() {
        let h = harness();
        let reg = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let tenant = h.store.earliest_membership(reg.user_id).await.unwrap().unwrap().tenant_id;

        let res = h.sessions.login("a@example.com", "password123", None).await.unwrap();
        assert!(!res.need_2fa);
        let claims = h.tokens.validate_access(res.access_token.as_deref().unwrap()).unwrap();
        assert_eq!(claims.sub, reg.user_id);
        assert_eq!(claims.scp, ConsoleScope::User);
        assert_eq!(claims.tid, Some(tenant));
    }

    #[tokio::test]
    async fn test_banned_user_is_forbidden() {
        let h = harness();
        let reg = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let mut user = h.store.find_user(reg.user_id).await.unwrap().unwrap();
        user.banned = true;
        h.store.save_user(&user).await.unwrap();

        let err = h.sessions.login("a@example.com", "password123", None).await.unwrap_err();
        assert!(matches!(err, ServiceError::UserBanned));
    }

    #[tokio::test]
    async fn test_two_factor_flow() {
        let h = harness();
        let reg = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let mut user = h.store.find_user(reg.user_id).await.unwrap().unwrap();
        user.two_fa_enabled = true;
        h.store.save_user(&user).await.unwrap();

        let res = h.sessions.login("a@example.com", "password123", None).await.unwrap();
        assert!(res.need_2fa);
        let challenge = res.challenge_id.unwrap();
        let code = h.email.last_secret("a@example.com", EmailKind::TwoFactor).unwrap();
        assert_eq!(code.len(), 6);

        let wrong = if code == "000000" { "111111" } else { "000000" };
        assert!(h.sessions.verify_two_factor(challenge, wrong, None).await.is_err());

        let tokens = h.sessions.verify_two_factor(challenge, &code, None).await.unwrap();
        assert_eq!(tokens.scope, ConsoleScope::User);

        // Single use.
        assert!(h.sessions.verify_two_factor(challenge, &code, None).await.is_err());
    }

    #[tokio::test]
    async fn test_two_factor_attempt_limit() {
        let h = harness();
        let reg = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let mut user = h.store.find_user(reg.user_id).await.unwrap().unwrap();
        user.two_fa_enabled = true;
        h.store.save_user(&user).await.unwrap();

        let res = h.sessions.login("a@example.com", "password123", None).await.unwrap();
        let challenge = res.challenge_id.unwrap();
        let code = h.email.last_secret("a@example.com", EmailKind::TwoFactor).unwrap();
        let wrong = if code == "000000" { "111111" } else { "000000" };
        for _ in 0..TWO_FACTOR_MAX_ATTEMPTS {
            let _ = h.sessions.verify_two_factor(challenge, wrong, None).await;
        }
        assert!(h.sessions.verify_two_factor(challenge, &code, None).await.is_err());
    }

    #[tokio::test]
    async fn test_refresh_rotates_and_rejects_reuse() {
        let h = harness();
        h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let res = h.sessions.login("a@example.com", "password123", None).await.unwrap();
        let first = res.refresh_token.unwrap();

        let rotated = h.sessions.refresh(&first, None).await.unwrap();
        assert_ne!(rotated.refresh_token, first);
        assert!(matches!(
            h.sessions.refresh(&first, None).await,
            Err(ServiceError::InvalidToken)
        ));
        assert!(h.sessions.refresh(&rotated.refresh_token, None).await.is_ok());
    }

    #[tokio::test]
    async fn test_password_reset_is_single_use_and_revokes_sessions() {
        let h = harness();
        h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let login = h.sessions.login("a@example.com", "password123", None).await.unwrap();

        h.sessions.request_password_reset("a@example.com", None).await.unwrap();
        h.sessions.request_password_reset("ghost@example.com", None).await.unwrap();
        let token = h.email.last_secret("a@example.com", EmailKind::PasswordReset).unwrap();

        h.sessions.reset_password(&token, "new-password-1", None).await.unwrap();
        assert!(h.sessions.reset_password(&token, "new-password-2", None).await.is_err());

        assert!(h.sessions.refresh(&login.refresh_token.unwrap(), None).await.is_err());
        assert!(h.sessions.login("a@example.com", "password123", None).await.is_err());
        assert!(h.sessions.login("a@example.com", "new-password-1", None).await.is_ok());
    }

    #[tokio::test]
    async fn test_verify_email() {
        let h = harness();
        let reg = h.sessions.register(register_req("a@example.com"), None).await.unwrap();
        let token = h.email.last_secret("a@example.com", EmailKind::Verification).unwrap();

        h.sessions.verify_email(&token, None).await.unwrap();
        assert!(h.store.find_user(reg.user_id).await.unwrap().unwrap().email_verified);
        assert!(h.sessions.verify_email(&token, None).await.is_err());
    }

    #[tokio::test]
    async fn test_console_upgrade_requires_eligibility() {
        let h = harness();
        let admin = h.sessions.register(register_req("root@example.com"), None).await.unwrap();
        let plain = h.sessions.register(register_req("plain@example.com"), None).await.unwrap();

        let denied = h
            .sessions
            .console_authorize(plain.user_id, ConsoleScope::Admin, None, None)
            .await;
        assert!(matches!(denied, Err(ServiceError::Forbidden(_))));
        let no_tenant = h
            .sessions
            .console_authorize(plain.user_id, ConsoleScope::Tenant, None, None)
            .await;
        assert!(matches!(no_tenant, Err(ServiceError::NoMembership)));

        let code = h
            .sessions
            .console_authorize(admin.user_id, ConsoleScope::Tenant, None, None)
            .await
            .unwrap();
        assert_eq!(code.expires_in, 30);

        let pair = h.sessions.console_exchange(&code.code, None).await.unwrap();
        assert_eq!(pair.scope, ConsoleScope::Tenant);
        assert!(pair.tenant_id.is_some());
        assert!(matches!(
            h.sessions.console_exchange(&code.code, None).await,
            Err(ServiceError::InvalidCode)
        ));

        let refreshed = h.sessions.refresh(&pair.refresh_token, None).await.unwrap();
        assert_eq!(refreshed.scope, ConsoleScope::Tenant);
        assert_eq!(refreshed.tenant_id, pair.tenant_id);
    }
}
