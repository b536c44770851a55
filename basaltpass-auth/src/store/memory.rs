//! In-process [`Store`] used by tests and `DATABASE_URL`-less demos.
//!
//! A single mutex guards every table, so each trait call is atomic the same
//! way a Postgres transaction is.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{RedeemOutcome, RotateOutcome, Store, StoreError, StoreResult};
use crate::models::{
    permissions, AccessToken, App, AuditLog, AuthorizationCode, CodeRedemption, Consent, MintedTokens,
    OAuthClient, OneTimeCode, Permission, RefreshRejection, RefreshSession, RefreshToken, Role,
    Setting, SigningKey, Tenant, TenantRole, TenantStatus, TenantUser, User,
};
use crate::utils::scope;

#[derive(Default)]
struct Tables {
    tenants: HashMap<Uuid, Tenant>,
    users: HashMap<Uuid, User>,
    memberships: Vec<TenantUser>,
    permissions: HashMap<Uuid, Permission>,
    roles: HashMap<Uuid, Role>,
    role_permissions: Vec<(Uuid, Uuid)>,
    user_roles: Vec<(Uuid, Uuid)>,
    apps: HashMap<Uuid, App>,
    clients: HashMap<String, OAuthClient>,
    codes: HashMap<String, AuthorizationCode>,
    access_tokens: HashMap<String, AccessToken>,
    refresh_tokens: HashMap<String, RefreshToken>,
    sessions: HashMap<String, RefreshSession>,
    consents: HashMap<(Uuid, String), Consent>,
    one_time_codes: HashMap<Uuid, OneTimeCode>,
    settings: HashMap<String, Setting>,
    signing_keys: Vec<SigningKey>,
    audit: Vec<AuditLog>,
}

impl Tables {
    fn revoke_family(&mut self, family_id: Uuid, now: DateTime<Utc>) -> u64 {
        let mut revoked = 0;
        for token in self.access_tokens.values_mut() {
            if token.family_id == family_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        for token in self.refresh_tokens.values_mut() {
            if token.family_id == family_id && token.revoked_utc.is_none() {
                token.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        revoked
    }

    fn store_minted(&mut self, minted: &MintedTokens) {
        self.access_tokens
            .insert(minted.access.token_hash.clone(), minted.access.clone());
        self.refresh_tokens
            .insert(minted.refresh.token_hash.clone(), minted.refresh.clone());
    }

    fn delete_client_tokens(&mut self, client_id: &str) -> u64 {
        let before = self.access_tokens.len() + self.refresh_tokens.len();
        self.access_tokens.retain(|_, t| t.client_id != client_id);
        self.refresh_tokens.retain(|_, t| t.client_id != client_id);
        (before - self.access_tokens.len() - self.refresh_tokens.len()) as u64
    }

    fn roles_of(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> Vec<Role> {
        self.user_roles
            .iter()
            .filter(|(u, _)| *u == user_id)
            .filter_map(|(_, r)| self.roles.get(r))
            .filter(|role| role.tenant_id == tenant_id)
            .cloned()
            .collect()
    }
}

pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Empty store carrying the same seed rows as the initial migration.
    pub fn new() -> Self {
        let mut tables = Tables::default();
        let seed = Permission::new(
            permissions::OAUTH_CLIENT_READ,
            Some("List OAuth clients of the tenant"),
        );
        tables.permissions.insert(seed.permission_id, seed);
        Self {
            tables: Mutex::new(tables),
        }
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| StoreError::Backend(anyhow::anyhow!("memory store poisoned")))
    }

    /// Snapshot of the audit trail, oldest first.
    pub fn audit_entries(&self) -> Vec<AuditLog> {
        self.lock().map(|t| t.audit.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> StoreResult<()> {
        self.lock().map(|_| ())
    }

    // ==================== Tenant Operations ====================

    async fn find_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>> {
        Ok(self.lock()?.tenants.get(&tenant_id).cloned())
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.tenants.values().any(|x| x.code == tenant.code) {
            return Err(StoreError::Conflict(format!("tenant code {} taken", tenant.code)));
        }
        t.tenants.insert(tenant.tenant_id, tenant.clone());
        Ok(())
    }

    async fn set_tenant_status(&self, tenant_id: Uuid, status: TenantStatus) -> StoreResult<()> {
        let mut t = self.lock()?;
        let tenant = t.tenants.get_mut(&tenant_id).ok_or(StoreError::NotFound("tenant"))?;
        tenant.status = status.as_str().to_string();
        Ok(())
    }

    // ==================== User Operations ====================

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        Ok(self.lock()?.users.get(&user_id).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let email = email.trim().to_lowercase();
        Ok(self.lock()?.users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|u| u.phone.as_deref() == Some(phone))
            .cloned())
    }

    async fn create_user(&self, user: &User) -> StoreResult<User> {
        let mut t = self.lock()?;
        if t.users.values().any(|u| u.email == user.email) {
            return Err(StoreError::Conflict("email already registered".to_string()));
        }
        if let Some(phone) = &user.phone {
            if t.users.values().any(|u| u.phone.as_ref() == Some(phone)) {
                return Err(StoreError::Conflict("phone already registered".to_string()));
            }
        }

        let mut stored = user.clone();
        if t.users.is_empty() {
            stored.super_admin = true;
            let tenant = Tenant::new("default".to_string(), "Default".to_string());
            t.memberships
                .push(TenantUser::new(stored.user_id, tenant.tenant_id, TenantRole::Owner));
            t.tenants.insert(tenant.tenant_id, tenant);
        }
        t.users.insert(stored.user_id, stored.clone());
        Ok(stored)
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let mut t = self.lock()?;
        let existing = t.users.get_mut(&user.user_id).ok_or(StoreError::NotFound("user"))?;
        let mut next = user.clone();
        next.created_utc = existing.created_utc;
        next.updated_utc = Utc::now();
        *existing = next;
        Ok(())
    }

    // ==================== Membership Operations ====================

    async fn find_membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> StoreResult<Option<TenantUser>> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .find(|m| m.user_id == user_id && m.tenant_id == tenant_id)
            .cloned())
    }

    async fn earliest_membership(&self, user_id: Uuid) -> StoreResult<Option<TenantUser>> {
        Ok(self
            .lock()?
            .memberships
            .iter()
            .filter(|m| m.user_id == user_id)
            .min_by_key(|m| m.created_utc)
            .cloned())
    }

    async fn insert_membership(&self, membership: &TenantUser) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.memberships
            .iter()
            .any(|m| m.user_id == membership.user_id && m.tenant_id == membership.tenant_id)
        {
            return Err(StoreError::Conflict("membership exists".to_string()));
        }
        if membership.role() == TenantRole::Owner
            && t.memberships
                .iter()
                .any(|m| m.tenant_id == membership.tenant_id && m.role() == TenantRole::Owner)
        {
            return Err(StoreError::Conflict("tenant already has an owner".to_string()));
        }
        t.memberships.push(membership.clone());
        Ok(())
    }

    async fn update_membership_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: &str,
    ) -> StoreResult<()> {
        let mut t = self.lock()?;
        let m = t
            .memberships
            .iter_mut()
            .find(|m| m.user_id == user_id && m.tenant_id == tenant_id)
            .ok_or(StoreError::NotFound("membership"))?;
        if m.role() == TenantRole::Owner || role == TenantRole::Owner.as_str() {
            return Err(StoreError::Conflict("use ownership transfer".to_string()));
        }
        m.role = role.to_string();
        Ok(())
    }

    async fn transfer_ownership(&self, tenant_id: Uuid, from: Uuid, to: Uuid) -> StoreResult<()> {
        let mut t = self.lock()?;
        let has = |t: &Tables, user: Uuid| {
            t.memberships
                .iter()
                .position(|m| m.user_id == user && m.tenant_id == tenant_id)
        };
        let from_idx = has(&*t, from).ok_or(StoreError::NotFound("membership"))?;
        let to_idx = has(&*t, to).ok_or(StoreError::NotFound("membership"))?;
        if t.memberships[from_idx].role() != TenantRole::Owner {
            return Err(StoreError::Conflict("caller is not the owner".to_string()));
        }
        t.memberships[from_idx].role = TenantRole::Admin.as_str().to_string();
        t.memberships[to_idx].role = TenantRole::Owner.as_str().to_string();
        Ok(())
    }

    // ==================== RBAC Operations ====================

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.permissions.values().any(|p| p.code == permission.code) {
            return Err(StoreError::Conflict(format!("permission {} exists", permission.code)));
        }
        t.permissions.insert(permission.permission_id, permission.clone());
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.roles
            .values()
            .any(|r| r.tenant_id == role.tenant_id && r.code == role.code)
        {
            return Err(StoreError::Conflict(format!("role {} exists", role.code)));
        }
        t.roles.insert(role.role_id, role.clone());
        Ok(())
    }

    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()> {
        let mut t = self.lock()?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !t.permissions.contains_key(&permission_id) {
            return Err(StoreError::NotFound("permission"));
        }
        if !t.role_permissions.contains(&(role_id, permission_id)) {
            t.role_permissions.push((role_id, permission_id));
        }
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        let mut t = self.lock()?;
        if !t.roles.contains_key(&role_id) {
            return Err(StoreError::NotFound("role"));
        }
        if !t.user_roles.contains(&(user_id, role_id)) {
            t.user_roles.push((user_id, role_id));
        }
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()> {
        let mut t = self.lock()?;
        t.roles.remove(&role_id).ok_or(StoreError::NotFound("role"))?;
        t.role_permissions.retain(|(r, _)| *r != role_id);
        t.user_roles.retain(|(_, r)| *r != role_id);
        Ok(())
    }

    async fn user_roles(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> StoreResult<Vec<Role>> {
        Ok(self.lock()?.roles_of(user_id, tenant_id))
    }

    async fn effective_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> StoreResult<Vec<Permission>> {
        let t = self.lock()?;
        let role_ids: Vec<Uuid> = t.roles_of(user_id, tenant_id).iter().map(|r| r.role_id).collect();
        let mut out: Vec<Permission> = Vec::new();
        for (role_id, permission_id) in &t.role_permissions {
            if !role_ids.contains(role_id) || out.iter().any(|p| p.permission_id == *permission_id) {
                continue;
            }
            if let Some(p) = t.permissions.get(permission_id) {
                out.push(p.clone());
            }
        }
        Ok(out)
    }

    // ==================== App & Client Operations ====================

    async fn insert_app(&self, app: &App) -> StoreResult<()> {
        self.lock()?.apps.insert(app.app_id, app.clone());
        Ok(())
    }

    async fn find_app(&self, app_id: Uuid) -> StoreResult<Option<App>> {
        Ok(self.lock()?.apps.get(&app_id).cloned())
    }

    async fn insert_client(&self, client: &OAuthClient) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.clients.contains_key(&client.client_id) {
            return Err(StoreError::Conflict("client_id exists".to_string()));
        }
        t.clients.insert(client.client_id.clone(), client.clone());
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        Ok(self.lock()?.clients.get(client_id).cloned())
    }

    async fn list_clients_for_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<OAuthClient>> {
        let t = self.lock()?;
        let mut clients: Vec<OAuthClient> = t
            .clients
            .values()
            .filter(|c| t.apps.get(&c.app_id).is_some_and(|a| a.tenant_id == tenant_id))
            .cloned()
            .collect();
        clients.sort_by_key(|c| c.created_utc);
        Ok(clients)
    }

    async fn touch_client(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        if let Some(c) = self.lock()?.clients.get_mut(client_id) {
            c.last_used_utc = Some(at);
        }
        Ok(())
    }

    async fn regenerate_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
    ) -> StoreResult<u64> {
        let mut t = self.lock()?;
        let client = t.clients.get_mut(client_id).ok_or(StoreError::NotFound("client"))?;
        client.client_secret_hash = secret_hash.to_string();
        client.updated_utc = Utc::now();
        Ok(t.delete_client_tokens(client_id))
    }

    async fn revoke_all_client_tokens(&self, client_id: &str) -> StoreResult<u64> {
        Ok(self.lock()?.delete_client_tokens(client_id))
    }

    // ==================== Authorization Code Operations ====================

    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()> {
        self.lock()?.codes.insert(code.code_hash.clone(), code.clone());
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<AuthorizationCode>> {
        Ok(self.lock()?.codes.get(code_hash).cloned())
    }

    async fn redeem_authorization_code(
        &self,
        code_hash: &str,
        redemption: &CodeRedemption,
        minted: &MintedTokens,
    ) -> StoreResult<RedeemOutcome> {
        let mut t = self.lock()?;
        let now = Utc::now();
        let Some(code) = t.codes.get(code_hash).cloned() else {
            return Ok(RedeemOutcome::NotFound);
        };

        if code.is_consumed() {
            let revoked = t.revoke_family(code.code_id, now);
            return Ok(RedeemOutcome::Replayed { code_id: code.code_id, revoked });
        }
        if let Err(rejection) = code.check_redemption(redemption, now) {
            return Ok(RedeemOutcome::Rejected(rejection));
        }

        if let Some(stored) = t.codes.get_mut(code_hash) {
            stored.consumed_utc = Some(now);
        }
        t.store_minted(minted);
        Ok(RedeemOutcome::Redeemed(code))
    }

    // ==================== Token Operations ====================

    async fn insert_access_token(&self, token: &AccessToken) -> StoreResult<()> {
        self.lock()?
            .access_tokens
            .insert(token.token_hash.clone(), token.clone());
        Ok(())
    }

    async fn find_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>> {
        Ok(self.lock()?.access_tokens.get(token_hash).cloned())
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        Ok(self.lock()?.refresh_tokens.get(token_hash).cloned())
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: &str,
        minted: &MintedTokens,
    ) -> StoreResult<RotateOutcome> {
        let mut t = self.lock()?;
        let now = Utc::now();
        let Some(old) = t.refresh_tokens.get(token_hash).cloned() else {
            return Ok(RotateOutcome::NotFound);
        };

        if old.client_id != client_id {
            return Ok(RotateOutcome::Rejected(RefreshRejection::ClientMismatch));
        }
        if old.revoked_utc.is_some() {
            let revoked = t.revoke_family(old.family_id, now);
            return Ok(RotateOutcome::Replayed { family_id: old.family_id, revoked });
        }
        if old.expiry_utc <= now {
            return Ok(RotateOutcome::Rejected(RefreshRejection::Expired));
        }
        if !scope::is_subset(&minted.access.scopes, &old.scopes) {
            return Ok(RotateOutcome::Rejected(RefreshRejection::ScopeWidened));
        }

        if let Some(stored) = t.refresh_tokens.get_mut(token_hash) {
            stored.revoked_utc = Some(now);
        }
        t.store_minted(minted);
        Ok(RotateOutcome::Rotated(old))
    }

    async fn revoke_token(&self, token_hash: &str, client_id: &str) -> StoreResult<u64> {
        let mut t = self.lock()?;
        let now = Utc::now();

        if let Some(token) = t.access_tokens.get_mut(token_hash) {
            if token.client_id != client_id || token.revoked_utc.is_some() {
                return Ok(0);
            }
            token.revoked_utc = Some(now);
            return Ok(1);
        }

        let family = t
            .refresh_tokens
            .get(token_hash)
            .filter(|r| r.client_id == client_id)
            .map(|r| r.family_id);
        Ok(family.map_or(0, |f| t.revoke_family(f, now)))
    }

    // ==================== Console Session Operations ====================

    async fn insert_refresh_session(&self, session: &RefreshSession) -> StoreResult<()> {
        self.lock()?
            .sessions
            .insert(session.token_hash.clone(), session.clone());
        Ok(())
    }

    async fn find_refresh_session(&self, token_hash: &str) -> StoreResult<Option<RefreshSession>> {
        Ok(self.lock()?.sessions.get(token_hash).cloned())
    }

    async fn rotate_refresh_session(
        &self,
        token_hash: &str,
        next: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>> {
        let mut t = self.lock()?;
        let Some(current) = t.sessions.get_mut(token_hash) else {
            return Ok(None);
        };
        if !current.is_valid() {
            return Ok(None);
        }
        current.revoked_utc = Some(Utc::now());
        let old = current.clone();
        t.sessions.insert(next.token_hash.clone(), next.clone());
        Ok(Some(old))
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
        let mut t = self.lock()?;
        let now = Utc::now();
        let mut revoked = 0;
        for s in t.sessions.values_mut() {
            if s.user_id == user_id && s.revoked_utc.is_none() {
                s.revoked_utc = Some(now);
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    // ==================== Consent Operations ====================

    async fn find_consent(&self, user_id: Uuid, client_id: &str) -> StoreResult<Option<Consent>> {
        Ok(self
            .lock()?
            .consents
            .get(&(user_id, client_id.to_string()))
            .cloned())
    }

    async fn upsert_consent(&self, consent: &Consent) -> StoreResult<()> {
        self.lock()?
            .consents
            .insert((consent.user_id, consent.client_id.clone()), consent.clone());
        Ok(())
    }

    // ==================== One-Time Code Operations ====================

    async fn insert_one_time_code(&self, code: &OneTimeCode) -> StoreResult<()> {
        self.lock()?.one_time_codes.insert(code.otp_id, code.clone());
        Ok(())
    }

    async fn find_one_time_code(&self, otp_id: Uuid) -> StoreResult<Option<OneTimeCode>> {
        Ok(self.lock()?.one_time_codes.get(&otp_id).cloned())
    }

    async fn find_one_time_code_by_hash(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<OneTimeCode>> {
        Ok(self
            .lock()?
            .one_time_codes
            .values()
            .find(|c| c.code_hash == code_hash)
            .cloned())
    }

    async fn record_otp_attempt(&self, otp_id: Uuid) -> StoreResult<()> {
        if let Some(code) = self.lock()?.one_time_codes.get_mut(&otp_id) {
            code.attempts += 1;
        }
        Ok(())
    }

    async fn consume_one_time_code(&self, otp_id: Uuid) -> StoreResult<bool> {
        let mut t = self.lock()?;
        match t.one_time_codes.get_mut(&otp_id) {
            Some(code) if code.used_utc.is_none() => {
                code.used_utc = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    // ==================== Setting Operations ====================

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        Ok(self.lock()?.settings.get(key).cloned())
    }

    async fn put_setting(&self, setting: &Setting) -> StoreResult<()> {
        self.lock()?
            .settings
            .insert(setting.key.clone(), setting.clone());
        Ok(())
    }

    // ==================== Signing Key Operations ====================

    async fn list_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        let mut keys = self.lock()?.signing_keys.clone();
        keys.sort_by(|a, b| b.not_before_utc.cmp(&a.not_before_utc));
        Ok(keys)
    }

    async fn insert_signing_key(
        &self,
        key: &SigningKey,
        retire: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()> {
        let mut t = self.lock()?;
        if t.signing_keys.iter().any(|k| k.kid == key.kid) {
            return Err(StoreError::Conflict(format!("kid {} exists", key.kid)));
        }
        if let Some((kid, not_after)) = retire {
            if let Some(old) = t.signing_keys.iter_mut().find(|k| k.kid == kid) {
                old.not_after_utc = Some(not_after);
            }
        }
        t.signing_keys.push(key.clone());
        Ok(())
    }

    // ==================== Audit Operations ====================

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()> {
        self.lock()?.audit.push(entry.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::CodeRejection;
    use crate::utils::pkce::PkceMethod;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn code(user: Uuid) -> AuthorizationCode {
        AuthorizationCode::new(
            "code-hash".to_string(),
            "c1".to_string(),
            user,
            "https://app/cb".to_string(),
            vec!["openid".to_string()],
            CHALLENGE.to_string(),
            PkceMethod::S256,
            None,
            Utc::now(),
            600,
        )
    }

    fn minted(family: Uuid, user: Uuid, tag: &str, scopes: &[&str]) -> MintedTokens {
        let scopes: Vec<String> = scopes.iter().map(|s| s.to_string()).collect();
        let access = AccessToken::new(format!("at-{tag}"), family, "c1".into(), Some(user), scopes, 3600);
        let refresh = RefreshToken::new(format!("rt-{tag}"), &access, user, None, Utc::now(), 30);
        MintedTokens { access, refresh }
    }

    fn redemption() -> CodeRedemption {
        CodeRedemption {
            client_id: "c1".to_string(),
            redirect_uri: Some("https://app/cb".to_string()),
            code_verifier: VERIFIER.to_string(),
        }
    }

    #[tokio::test]
    async fn test_first_user_becomes_default_tenant_owner() {
        let store = MemoryStore::new();
        let first = store
            .create_user(&User::new("a@x.io".into(), "h".into()))
            .await
            .unwrap();
        let second = store
            .create_user(&User::new("b@x.io".into(), "h".into()))
            .await
            .unwrap();

        assert!(first.super_admin);
        assert!(!second.super_admin);
        let membership = store.earliest_membership(first.user_id).await.unwrap().unwrap();
        assert_eq!(membership.role(), TenantRole::Owner);
        assert!(store.earliest_membership(second.user_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_duplicate_email_conflicts() {
        let store = MemoryStore::new();
        store.create_user(&User::new("a@x.io".into(), "h".into())).await.unwrap();
        let err = store
            .create_user(&User::new("A@X.io".into(), "h".into()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_code_rejection_does_not_consume() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let c = code(user);
        store.insert_authorization_code(&c).await.unwrap();

        let mut bad = redemption();
        bad.code_verifier = "nope".to_string();
        let out = store
            .redeem_authorization_code("code-hash", &bad, &minted(c.code_id, user, "x", &["openid"]))
            .await
            .unwrap();
        assert!(matches!(out, RedeemOutcome::Rejected(CodeRejection::PkceMismatch)));

        let out = store
            .redeem_authorization_code("code-hash", &redemption(), &minted(c.code_id, user, "1", &["openid"]))
            .await
            .unwrap();
        assert!(matches!(out, RedeemOutcome::Redeemed(_)));
    }

    #[tokio::test]
    async fn test_code_replay_revokes_family() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let c = code(user);
        store.insert_authorization_code(&c).await.unwrap();

        store
            .redeem_authorization_code("code-hash", &redemption(), &minted(c.code_id, user, "1", &["openid"]))
            .await
            .unwrap();
        let out = store
            .redeem_authorization_code("code-hash", &redemption(), &minted(c.code_id, user, "2", &["openid"]))
            .await
            .unwrap();

        assert!(matches!(out, RedeemOutcome::Replayed { revoked: 2, .. }));
        assert!(store.find_access_token("at-1").await.unwrap().unwrap().revoked_utc.is_some());
        assert!(store.find_access_token("at-2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_refresh_rotation_and_replay() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let family = Uuid::new_v4();
        let first = minted(family, user, "1", &["openid", "email"]);
        store.insert_access_token(&first.access).await.unwrap();
        store.lock().unwrap().store_minted(&first);

        let out = store
            .rotate_refresh_token("rt-1", "c1", &minted(family, user, "2", &["openid"]))
            .await
            .unwrap();
        assert!(matches!(out, RotateOutcome::Rotated(_)));

        let out = store
            .rotate_refresh_token("rt-1", "c1", &minted(family, user, "3", &["openid"]))
            .await
            .unwrap();
        assert!(matches!(out, RotateOutcome::Replayed { .. }));
        assert!(store.find_refresh_token("rt-2").await.unwrap().unwrap().revoked_utc.is_some());
        assert!(store.find_access_token("at-2").await.unwrap().unwrap().revoked_utc.is_some());
    }

    #[tokio::test]
    async fn test_refresh_client_mismatch_and_widening() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        let family = Uuid::new_v4();
        store.lock().unwrap().store_minted(&minted(family, user, "1", &["openid"]));

        let out = store
            .rotate_refresh_token("rt-1", "other", &minted(family, user, "2", &["openid"]))
            .await
            .unwrap();
        assert!(matches!(out, RotateOutcome::Rejected(RefreshRejection::ClientMismatch)));

        let out = store
            .rotate_refresh_token("rt-1", "c1", &minted(family, user, "3", &["openid", "email"]))
            .await
            .unwrap();
        assert!(matches!(out, RotateOutcome::Rejected(RefreshRejection::ScopeWidened)));
        assert!(store.find_refresh_token("rt-1").await.unwrap().unwrap().revoked_utc.is_none());
    }

    #[tokio::test]
    async fn test_revoke_ignores_foreign_tokens() {
        let store = MemoryStore::new();
        let user = Uuid::new_v4();
        store.lock().unwrap().store_minted(&minted(Uuid::new_v4(), user, "1", &["openid"]));

        assert_eq!(store.revoke_token("at-1", "other").await.unwrap(), 0);
        assert_eq!(store.revoke_token("at-1", "c1").await.unwrap(), 1);
        assert_eq!(store.revoke_token("at-1", "c1").await.unwrap(), 0);
        assert!(store.find_refresh_token("rt-1").await.unwrap().unwrap().revoked_utc.is_none());
        assert_eq!(store.revoke_token("rt-1", "c1").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_single_owner_per_tenant() {
        let store = MemoryStore::new();
        let tenant = Tenant::new("acme".into(), "Acme".into());
        store.insert_tenant(&tenant).await.unwrap();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        store
            .insert_membership(&TenantUser::new(a, tenant.tenant_id, TenantRole::Owner))
            .await
            .unwrap();
        let err = store
            .insert_membership(&TenantUser::new(b, tenant.tenant_id, TenantRole::Owner))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .insert_membership(&TenantUser::new(b, tenant.tenant_id, TenantRole::Member))
            .await
            .unwrap();
        store.transfer_ownership(tenant.tenant_id, a, b).await.unwrap();
        let a_role = store.find_membership(a, tenant.tenant_id).await.unwrap().unwrap().role();
        let b_role = store.find_membership(b, tenant.tenant_id).await.unwrap().unwrap().role();
        assert_eq!(a_role, TenantRole::Admin);
        assert_eq!(b_role, TenantRole::Owner);
    }

    #[tokio::test]
    async fn test_delete_role_cascades() {
        let store = MemoryStore::new();
        let tenant = Uuid::new_v4();
        let user = Uuid::new_v4();
        let perm = Permission::new("app.read", None);
        let role = Role::new(Some(tenant), "viewer", "Viewer");
        store.insert_permission(&perm).await.unwrap();
        store.insert_role(&role).await.unwrap();
        store.attach_permission(role.role_id, perm.permission_id).await.unwrap();
        store.assign_role(user, role.role_id).await.unwrap();

        let perms = store.effective_permissions(user, Some(tenant)).await.unwrap();
        assert_eq!(perms.len(), 1);
        assert!(store.effective_permissions(user, None).await.unwrap().is_empty());

        store.delete_role(role.role_id).await.unwrap();
        assert!(store.effective_permissions(user, Some(tenant)).await.unwrap().is_empty());
        assert!(store.user_roles(user, Some(tenant)).await.unwrap().is_empty());
    }
}
