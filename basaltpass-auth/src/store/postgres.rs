//! PostgreSQL [`Store`].
//!
//! Code redemption and refresh rotation lock their row with `SELECT ... FOR UPDATE`
//! inside one transaction, so two concurrent presentations of the same value
//! serialise and exactly one of them wins. Serialization failures and deadlocks
//! are retried with jittered exponential backoff.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use backoff::{future::retry, ExponentialBackoff};
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgConnection, PgPool};
use uuid::Uuid;

use super::{RedeemOutcome, RotateOutcome, Store, StoreError, StoreResult};
use crate::models::{
    AccessToken, App, AuditLog, AuthorizationCode, CodeRedemption, Consent, MintedTokens,
    OAuthClient, OneTimeCode, Permission, RefreshRejection, RefreshSession, RefreshToken, Role,
    Setting, SigningKey, Tenant, TenantRole, TenantStatus, TenantUser, User,
};
use crate::utils::scope;

const MAX_ATTEMPTS: u32 = 3;

/// Maps driver errors onto [`StoreError`] by SQLSTATE.
fn db_err(err: sqlx::Error) -> StoreError {
    if let Some(db) = err.as_database_error() {
        match db.code().as_deref() {
            Some("23505") => {
                let constraint = db.constraint().unwrap_or("unique constraint").to_string();
                return StoreError::Conflict(constraint);
            }
            Some("40001") | Some("40P01") => return StoreError::Transient(anyhow::anyhow!(err)),
            _ => {}
        }
    }
    StoreError::Backend(anyhow::anyhow!(err))
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs `op` until it succeeds, fails permanently, or used up its attempts.
    async fn retrying<T, F, Fut>(&self, label: &'static str, mut op: F) -> StoreResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = StoreResult<T>>,
    {
        let policy = ExponentialBackoff {
            initial_interval: Duration::from_millis(25),
            max_interval: Duration::from_millis(250),
            max_elapsed_time: Some(Duration::from_secs(2)),
            ..Default::default()
        };

        let mut attempt = 0u32;
        retry(policy, || {
            attempt += 1;
            let current = attempt;
            let fut = op();
            async move {
                match fut.await {
                    Err(StoreError::Transient(e)) if current < MAX_ATTEMPTS => {
                        tracing::warn!(op = label, attempt = current, error = %e, "Retrying transaction");
                        Err(backoff::Error::transient(StoreError::Transient(e)))
                    }
                    Err(e) => Err(backoff::Error::permanent(e)),
                    Ok(value) => Ok(value),
                }
            }
        })
        .await
    }

    async fn revoke_family(
        conn: &mut PgConnection,
        family_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let access = sqlx::query(
            "UPDATE oauth_access_tokens SET revoked_utc = $2 WHERE family_id = $1 AND revoked_utc IS NULL",
        )
        .bind(family_id)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        let refresh = sqlx::query(
            "UPDATE oauth_refresh_tokens SET revoked_utc = $2 WHERE family_id = $1 AND revoked_utc IS NULL",
        )
        .bind(family_id)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        Ok(access + refresh)
    }

    async fn write_access_token(
        conn: &mut PgConnection,
        token: &AccessToken,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO oauth_access_tokens
                (token_id, token_hash, family_id, client_id, user_id, scopes, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(token.token_id)
        .bind(&token.token_hash)
        .bind(token.family_id)
        .bind(&token.client_id)
        .bind(token.user_id)
        .bind(&token.scopes)
        .bind(token.expiry_utc)
        .bind(token.revoked_utc)
        .bind(token.created_utc)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn write_minted(conn: &mut PgConnection, minted: &MintedTokens) -> Result<(), sqlx::Error> {
        Self::write_access_token(&mut *conn, &minted.access).await?;

        let refresh = &minted.refresh;
        sqlx::query(
            r#"
            INSERT INTO oauth_refresh_tokens
                (token_id, token_hash, family_id, parent_id, access_token_id, client_id, user_id,
                 scopes, auth_time_utc, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(refresh.token_id)
        .bind(&refresh.token_hash)
        .bind(refresh.family_id)
        .bind(refresh.parent_id)
        .bind(refresh.access_token_id)
        .bind(&refresh.client_id)
        .bind(refresh.user_id)
        .bind(&refresh.scopes)
        .bind(refresh.auth_time_utc)
        .bind(refresh.expiry_utc)
        .bind(refresh.revoked_utc)
        .bind(refresh.created_utc)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    async fn delete_client_tokens(conn: &mut PgConnection, client_id: &str) -> Result<u64, sqlx::Error> {
        let refresh = sqlx::query("DELETE FROM oauth_refresh_tokens WHERE client_id = $1")
            .bind(client_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        let access = sqlx::query("DELETE FROM oauth_access_tokens WHERE client_id = $1")
            .bind(client_id)
            .execute(&mut *conn)
            .await?
            .rows_affected();
        Ok(access + refresh)
    }

    async fn redeem_once(
        &self,
        code_hash: &str,
        redemption: &CodeRedemption,
        minted: &MintedTokens,
    ) -> StoreResult<RedeemOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = Utc::now();

        let code = sqlx::query_as::<_, AuthorizationCode>(
            "SELECT * FROM oauth_authorization_codes WHERE code_hash = $1 FOR UPDATE",
        )
        .bind(code_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(code) = code else {
            return Ok(RedeemOutcome::NotFound);
        };

        if code.is_consumed() {
            let revoked = Self::revoke_family(&mut *tx, code.code_id, now)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            return Ok(RedeemOutcome::Replayed {
                code_id: code.code_id,
                revoked,
            });
        }

        if let Err(rejection) = code.check_redemption(redemption, now) {
            return Ok(RedeemOutcome::Rejected(rejection));
        }

        sqlx::query("UPDATE oauth_authorization_codes SET consumed_utc = $2 WHERE code_id = $1")
            .bind(code.code_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        Self::write_minted(&mut *tx, minted).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(RedeemOutcome::Redeemed(code))
    }

    async fn rotate_once(
        &self,
        token_hash: &str,
        client_id: &str,
        minted: &MintedTokens,
    ) -> StoreResult<RotateOutcome> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;
        let now = Utc::now();

        let old = sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM oauth_refresh_tokens WHERE token_hash = $1 FOR UPDATE",
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(old) = old else {
            return Ok(RotateOutcome::NotFound);
        };

        if old.client_id != client_id {
            return Ok(RotateOutcome::Rejected(RefreshRejection::ClientMismatch));
        }

        if old.revoked_utc.is_some() {
            let revoked = Self::revoke_family(&mut *tx, old.family_id, now)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            return Ok(RotateOutcome::Replayed {
                family_id: old.family_id,
                revoked,
            });
        }

        if old.expiry_utc <= now {
            return Ok(RotateOutcome::Rejected(RefreshRejection::Expired));
        }
        if !scope::is_subset(&minted.access.scopes, &old.scopes) {
            return Ok(RotateOutcome::Rejected(RefreshRejection::ScopeWidened));
        }

        sqlx::query("UPDATE oauth_refresh_tokens SET revoked_utc = $2 WHERE token_id = $1")
            .bind(old.token_id)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        Self::write_minted(&mut *tx, minted).await.map_err(db_err)?;
        tx.commit().await.map_err(db_err)?;

        Ok(RotateOutcome::Rotated(old))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    // ==================== Tenant Operations ====================

    async fn find_tenant(&self, tenant_id: Uuid) -> StoreResult<Option<Tenant>> {
        sqlx::query_as::<_, Tenant>("SELECT * FROM tenants WHERE tenant_id = $1")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_tenant(&self, tenant: &Tenant) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tenants (tenant_id, code, name, status, plan, metadata, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(tenant.tenant_id)
        .bind(&tenant.code)
        .bind(&tenant.name)
        .bind(&tenant.status)
        .bind(&tenant.plan)
        .bind(&tenant.metadata)
        .bind(tenant.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn set_tenant_status(&self, tenant_id: Uuid, status: TenantStatus) -> StoreResult<()> {
        let result = sqlx::query("UPDATE tenants SET status = $2 WHERE tenant_id = $1")
            .bind(tenant_id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("tenant"));
        }
        Ok(())
    }

    // ==================== User Operations ====================

    async fn find_user(&self, user_id: Uuid) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE email = LOWER(TRIM($1))")
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_user_by_phone(&self, phone: &str) -> StoreResult<Option<User>> {
        sqlx::query_as::<_, User>("SELECT * FROM users WHERE phone = $1")
            .bind(phone)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn create_user(&self, user: &User) -> StoreResult<User> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Serialises concurrent first registrations.
        sqlx::query("LOCK TABLE users IN SHARE ROW EXCLUSIVE MODE")
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

        let is_first: bool = sqlx::query_scalar("SELECT NOT EXISTS (SELECT 1 FROM users)")
            .fetch_one(&mut *tx)
            .await
            .map_err(db_err)?;

        let mut stored = user.clone();
        stored.super_admin = stored.super_admin || is_first;

        sqlx::query(
            r#"
            INSERT INTO users (user_id, email, phone, password_hash, nickname, avatar_url,
                               email_verified, phone_verified, two_fa_enabled, banned, super_admin,
                               created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(stored.user_id)
        .bind(&stored.email)
        .bind(&stored.phone)
        .bind(&stored.password_hash)
        .bind(&stored.nickname)
        .bind(&stored.avatar_url)
        .bind(stored.email_verified)
        .bind(stored.phone_verified)
        .bind(stored.two_fa_enabled)
        .bind(stored.banned)
        .bind(stored.super_admin)
        .bind(stored.created_utc)
        .bind(stored.updated_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        if is_first {
            let tenant = Tenant::new("default".to_string(), "Default".to_string());
            sqlx::query(
                r#"
                INSERT INTO tenants (tenant_id, code, name, status, plan, metadata, created_utc)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                ON CONFLICT (code) DO NOTHING
                "#,
            )
            .bind(tenant.tenant_id)
            .bind(&tenant.code)
            .bind(&tenant.name)
            .bind(&tenant.status)
            .bind(&tenant.plan)
            .bind(&tenant.metadata)
            .bind(tenant.created_utc)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;

            sqlx::query(
                r#"
                INSERT INTO tenant_users (user_id, tenant_id, role, created_utc)
                SELECT $1, tenant_id, $2, now() FROM tenants WHERE code = 'default'
                "#,
            )
            .bind(stored.user_id)
            .bind(TenantRole::Owner.as_str())
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        }

        tx.commit().await.map_err(db_err)?;
        Ok(stored)
    }

    async fn save_user(&self, user: &User) -> StoreResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE users SET
                email = $2, phone = $3, password_hash = $4, nickname = $5, avatar_url = $6,
                email_verified = $7, phone_verified = $8, two_fa_enabled = $9, banned = $10,
                super_admin = $11, updated_utc = now()
            WHERE user_id = $1
            "#,
        )
        .bind(user.user_id)
        .bind(&user.email)
        .bind(&user.phone)
        .bind(&user.password_hash)
        .bind(&user.nickname)
        .bind(&user.avatar_url)
        .bind(user.email_verified)
        .bind(user.phone_verified)
        .bind(user.two_fa_enabled)
        .bind(user.banned)
        .bind(user.super_admin)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("user"));
        }
        Ok(())
    }

    // ==================== Membership Operations ====================

    async fn find_membership(
        &self,
        user_id: Uuid,
        tenant_id: Uuid,
    ) -> StoreResult<Option<TenantUser>> {
        sqlx::query_as::<_, TenantUser>(
            "SELECT * FROM tenant_users WHERE user_id = $1 AND tenant_id = $2",
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn earliest_membership(&self, user_id: Uuid) -> StoreResult<Option<TenantUser>> {
        sqlx::query_as::<_, TenantUser>(
            "SELECT * FROM tenant_users WHERE user_id = $1 ORDER BY created_utc ASC LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_membership(&self, membership: &TenantUser) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO tenant_users (user_id, tenant_id, role, created_utc) VALUES ($1, $2, $3, $4)",
        )
        .bind(membership.user_id)
        .bind(membership.tenant_id)
        .bind(&membership.role)
        .bind(membership.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_membership_role(
        &self,
        tenant_id: Uuid,
        user_id: Uuid,
        role: &str,
    ) -> StoreResult<()> {
        if role == TenantRole::Owner.as_str() {
            return Err(StoreError::Conflict("use ownership transfer".to_string()));
        }
        let result = sqlx::query(
            "UPDATE tenant_users SET role = $3 WHERE tenant_id = $1 AND user_id = $2 AND role <> 'owner'",
        )
        .bind(tenant_id)
        .bind(user_id)
        .bind(role)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("membership"));
        }
        Ok(())
    }

    async fn transfer_ownership(&self, tenant_id: Uuid, from: Uuid, to: Uuid) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let demoted = sqlx::query(
            "UPDATE tenant_users SET role = 'admin' WHERE tenant_id = $1 AND user_id = $2 AND role = 'owner'",
        )
        .bind(tenant_id)
        .bind(from)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;
        if demoted.rows_affected() == 0 {
            return Err(StoreError::Conflict("caller is not the owner".to_string()));
        }

        let promoted =
            sqlx::query("UPDATE tenant_users SET role = 'owner' WHERE tenant_id = $1 AND user_id = $2")
                .bind(tenant_id)
                .bind(to)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        if promoted.rows_affected() == 0 {
            return Err(StoreError::NotFound("membership"));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    // ==================== RBAC Operations ====================

    async fn insert_permission(&self, permission: &Permission) -> StoreResult<()> {
        sqlx::query("INSERT INTO permissions (permission_id, code, description) VALUES ($1, $2, $3)")
            .bind(permission.permission_id)
            .bind(&permission.code)
            .bind(&permission.description)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn insert_role(&self, role: &Role) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO roles (role_id, tenant_id, code, name, created_utc) VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(role.role_id)
        .bind(role.tenant_id)
        .bind(&role.code)
        .bind(&role.name)
        .bind(role.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn attach_permission(&self, role_id: Uuid, permission_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO role_permissions (role_id, permission_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
        )
        .bind(role_id)
        .bind(permission_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn assign_role(&self, user_id: Uuid, role_id: Uuid) -> StoreResult<()> {
        sqlx::query("INSERT INTO user_roles (user_id, role_id) VALUES ($1, $2) ON CONFLICT DO NOTHING")
            .bind(user_id)
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn delete_role(&self, role_id: Uuid) -> StoreResult<()> {
        // Join rows go with the role through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM roles WHERE role_id = $1")
            .bind(role_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound("role"));
        }
        Ok(())
    }

    async fn user_roles(&self, user_id: Uuid, tenant_id: Option<Uuid>) -> StoreResult<Vec<Role>> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT r.* FROM roles r
            JOIN user_roles ur ON ur.role_id = r.role_id
            WHERE ur.user_id = $1 AND r.tenant_id IS NOT DISTINCT FROM $2
            ORDER BY r.code
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn effective_permissions(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
    ) -> StoreResult<Vec<Permission>> {
        sqlx::query_as::<_, Permission>(
            r#"
            SELECT DISTINCT p.* FROM permissions p
            JOIN role_permissions rp ON rp.permission_id = p.permission_id
            JOIN roles r ON r.role_id = rp.role_id
            JOIN user_roles ur ON ur.role_id = r.role_id
            WHERE ur.user_id = $1 AND r.tenant_id IS NOT DISTINCT FROM $2
            ORDER BY p.code
            "#,
        )
        .bind(user_id)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    // ==================== App & Client Operations ====================

    async fn insert_app(&self, app: &App) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO apps (app_id, tenant_id, name, description, status, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(app.app_id)
        .bind(app.tenant_id)
        .bind(&app.name)
        .bind(&app.description)
        .bind(&app.status)
        .bind(app.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_app(&self, app_id: Uuid) -> StoreResult<Option<App>> {
        sqlx::query_as::<_, App>("SELECT * FROM apps WHERE app_id = $1")
            .bind(app_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn insert_client(&self, client: &OAuthClient) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_clients
                (client_pk, client_id, client_secret_hash, app_id, name, redirect_uris, scopes,
                 allowed_origins, is_active, created_by, last_used_utc, created_utc, updated_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(client.client_pk)
        .bind(&client.client_id)
        .bind(&client.client_secret_hash)
        .bind(client.app_id)
        .bind(&client.name)
        .bind(&client.redirect_uris)
        .bind(&client.scopes)
        .bind(&client.allowed_origins)
        .bind(client.is_active)
        .bind(client.created_by)
        .bind(client.last_used_utc)
        .bind(client.created_utc)
        .bind(client.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_client(&self, client_id: &str) -> StoreResult<Option<OAuthClient>> {
        sqlx::query_as::<_, OAuthClient>("SELECT * FROM oauth_clients WHERE client_id = $1")
            .bind(client_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn list_clients_for_tenant(&self, tenant_id: Uuid) -> StoreResult<Vec<OAuthClient>> {
        sqlx::query_as::<_, OAuthClient>(
            r#"
            SELECT c.* FROM oauth_clients c
            JOIN apps a ON a.app_id = c.app_id
            WHERE a.tenant_id = $1
            ORDER BY c.created_utc
            "#,
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn touch_client(&self, client_id: &str, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query("UPDATE oauth_clients SET last_used_utc = $2 WHERE client_id = $1")
            .bind(client_id)
            .bind(at)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn regenerate_client_secret(
        &self,
        client_id: &str,
        secret_hash: &str,
    ) -> StoreResult<u64> {
        self.retrying("regenerate_client_secret", move || async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;

            let updated = sqlx::query(
                "UPDATE oauth_clients SET client_secret_hash = $2, updated_utc = now() WHERE client_id = $1",
            )
            .bind(client_id)
            .bind(secret_hash)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
            if updated.rows_affected() == 0 {
                return Err(StoreError::NotFound("client"));
            }

            let deleted = Self::delete_client_tokens(&mut *tx, client_id)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(deleted)
        })
        .await
    }

    async fn revoke_all_client_tokens(&self, client_id: &str) -> StoreResult<u64> {
        self.retrying("revoke_all_client_tokens", move || async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let deleted = Self::delete_client_tokens(&mut *tx, client_id)
                .await
                .map_err(db_err)?;
            tx.commit().await.map_err(db_err)?;
            Ok(deleted)
        })
        .await
    }

    // ==================== Authorization Code Operations ====================

    async fn insert_authorization_code(&self, code: &AuthorizationCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_authorization_codes
                (code_id, code_hash, client_id, user_id, redirect_uri, scopes, code_challenge,
                 code_challenge_method, nonce, auth_time_utc, expiry_utc, consumed_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(code.code_id)
        .bind(&code.code_hash)
        .bind(&code.client_id)
        .bind(code.user_id)
        .bind(&code.redirect_uri)
        .bind(&code.scopes)
        .bind(&code.code_challenge)
        .bind(&code.code_challenge_method)
        .bind(&code.nonce)
        .bind(code.auth_time_utc)
        .bind(code.expiry_utc)
        .bind(code.consumed_utc)
        .bind(code.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_authorization_code(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<AuthorizationCode>> {
        sqlx::query_as::<_, AuthorizationCode>(
            "SELECT * FROM oauth_authorization_codes WHERE code_hash = $1",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn redeem_authorization_code(
        &self,
        code_hash: &str,
        redemption: &CodeRedemption,
        minted: &MintedTokens,
    ) -> StoreResult<RedeemOutcome> {
        self.retrying("redeem_authorization_code", move || {
            self.redeem_once(code_hash, redemption, minted)
        })
        .await
    }

    // ==================== Token Operations ====================

    async fn insert_access_token(&self, token: &AccessToken) -> StoreResult<()> {
        let mut conn = self.pool.acquire().await.map_err(db_err)?;
        Self::write_access_token(&mut conn, token)
            .await
            .map_err(db_err)
    }

    async fn find_access_token(&self, token_hash: &str) -> StoreResult<Option<AccessToken>> {
        sqlx::query_as::<_, AccessToken>("SELECT * FROM oauth_access_tokens WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_refresh_token(&self, token_hash: &str) -> StoreResult<Option<RefreshToken>> {
        sqlx::query_as::<_, RefreshToken>(
            "SELECT * FROM oauth_refresh_tokens WHERE token_hash = $1",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn rotate_refresh_token(
        &self,
        token_hash: &str,
        client_id: &str,
        minted: &MintedTokens,
    ) -> StoreResult<RotateOutcome> {
        self.retrying("rotate_refresh_token", move || {
            self.rotate_once(token_hash, client_id, minted)
        })
        .await
    }

    async fn revoke_token(&self, token_hash: &str, client_id: &str) -> StoreResult<u64> {
        self.retrying("revoke_token", move || async move {
            let mut tx = self.pool.begin().await.map_err(db_err)?;
            let now = Utc::now();

            let family: Option<Uuid> = sqlx::query_scalar(
                "SELECT family_id FROM oauth_refresh_tokens WHERE token_hash = $1 AND client_id = $2 FOR UPDATE",
            )
            .bind(token_hash)
            .bind(client_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_err)?;

            let revoked = match family {
                Some(family_id) => Self::revoke_family(&mut *tx, family_id, now)
                    .await
                    .map_err(db_err)?,
                None => sqlx::query(
                    r#"
                    UPDATE oauth_access_tokens SET revoked_utc = $3
                    WHERE token_hash = $1 AND client_id = $2 AND revoked_utc IS NULL
                    "#,
                )
                .bind(token_hash)
                .bind(client_id)
                .bind(now)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?
                .rows_affected(),
            };

            tx.commit().await.map_err(db_err)?;
            Ok(revoked)
        })
        .await
    }

    // ==================== Console Session Operations ====================

    async fn insert_refresh_session(&self, session: &RefreshSession) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO refresh_sessions
                (session_id, user_id, token_hash, console_scope, tenant_id, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(session.session_id)
        .bind(session.user_id)
        .bind(&session.token_hash)
        .bind(&session.console_scope)
        .bind(session.tenant_id)
        .bind(session.expiry_utc)
        .bind(session.revoked_utc)
        .bind(session.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_refresh_session(&self, token_hash: &str) -> StoreResult<Option<RefreshSession>> {
        sqlx::query_as::<_, RefreshSession>("SELECT * FROM refresh_sessions WHERE token_hash = $1")
            .bind(token_hash)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn rotate_refresh_session(
        &self,
        token_hash: &str,
        next: &RefreshSession,
    ) -> StoreResult<Option<RefreshSession>> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let current = sqlx::query_as::<_, RefreshSession>(
            r#"
            UPDATE refresh_sessions SET revoked_utc = now()
            WHERE token_hash = $1 AND revoked_utc IS NULL AND expiry_utc > now()
            RETURNING *
            "#,
        )
        .bind(token_hash)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?;

        let Some(current) = current else {
            return Ok(None);
        };

        sqlx::query(
            r#"
            INSERT INTO refresh_sessions
                (session_id, user_id, token_hash, console_scope, tenant_id, expiry_utc, revoked_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(next.session_id)
        .bind(next.user_id)
        .bind(&next.token_hash)
        .bind(&next.console_scope)
        .bind(next.tenant_id)
        .bind(next.expiry_utc)
        .bind(next.revoked_utc)
        .bind(next.created_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(Some(current))
    }

    async fn revoke_user_sessions(&self, user_id: Uuid) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE refresh_sessions SET revoked_utc = now() WHERE user_id = $1 AND revoked_utc IS NULL",
        )
        .bind(user_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected())
    }

    // ==================== Consent Operations ====================

    async fn find_consent(&self, user_id: Uuid, client_id: &str) -> StoreResult<Option<Consent>> {
        sqlx::query_as::<_, Consent>(
            "SELECT * FROM oauth_consents WHERE user_id = $1 AND client_id = $2",
        )
        .bind(user_id)
        .bind(client_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn upsert_consent(&self, consent: &Consent) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO oauth_consents (user_id, client_id, scopes, granted_utc)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (user_id, client_id)
            DO UPDATE SET scopes = EXCLUDED.scopes, granted_utc = EXCLUDED.granted_utc
            "#,
        )
        .bind(consent.user_id)
        .bind(&consent.client_id)
        .bind(&consent.scopes)
        .bind(consent.granted_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // ==================== One-Time Code Operations ====================

    async fn insert_one_time_code(&self, code: &OneTimeCode) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO one_time_codes
                (otp_id, user_id, purpose, code_hash, attempts, max_attempts, expiry_utc, used_utc, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(code.otp_id)
        .bind(code.user_id)
        .bind(&code.purpose)
        .bind(&code.code_hash)
        .bind(code.attempts)
        .bind(code.max_attempts)
        .bind(code.expiry_utc)
        .bind(code.used_utc)
        .bind(code.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn find_one_time_code(&self, otp_id: Uuid) -> StoreResult<Option<OneTimeCode>> {
        sqlx::query_as::<_, OneTimeCode>("SELECT * FROM one_time_codes WHERE otp_id = $1")
            .bind(otp_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn find_one_time_code_by_hash(
        &self,
        code_hash: &str,
    ) -> StoreResult<Option<OneTimeCode>> {
        sqlx::query_as::<_, OneTimeCode>(
            "SELECT * FROM one_time_codes WHERE code_hash = $1 ORDER BY created_utc DESC LIMIT 1",
        )
        .bind(code_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn record_otp_attempt(&self, otp_id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE one_time_codes SET attempts = attempts + 1 WHERE otp_id = $1")
            .bind(otp_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn consume_one_time_code(&self, otp_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE one_time_codes SET used_utc = now() WHERE otp_id = $1 AND used_utc IS NULL",
        )
        .bind(otp_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    // ==================== Setting Operations ====================

    async fn get_setting(&self, key: &str) -> StoreResult<Option<Setting>> {
        sqlx::query_as::<_, Setting>("SELECT * FROM settings WHERE key = $1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn put_setting(&self, setting: &Setting) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO settings (key, value, updated_utc) VALUES ($1, $2, $3)
            ON CONFLICT (key) DO UPDATE SET value = EXCLUDED.value, updated_utc = EXCLUDED.updated_utc
            "#,
        )
        .bind(&setting.key)
        .bind(&setting.value)
        .bind(setting.updated_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    // ==================== Signing Key Operations ====================

    async fn list_signing_keys(&self) -> StoreResult<Vec<SigningKey>> {
        sqlx::query_as::<_, SigningKey>(
            "SELECT * FROM signing_keys ORDER BY not_before_utc DESC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)
    }

    async fn insert_signing_key(
        &self,
        key: &SigningKey,
        retire: Option<(&str, DateTime<Utc>)>,
    ) -> StoreResult<()> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        if let Some((kid, not_after)) = retire {
            sqlx::query("UPDATE signing_keys SET not_after_utc = $2 WHERE kid = $1")
                .bind(kid)
                .bind(not_after)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        sqlx::query(
            r#"
            INSERT INTO signing_keys
                (kid, algorithm, public_jwk, private_key_pem, created_utc, not_before_utc, not_after_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&key.kid)
        .bind(&key.algorithm)
        .bind(&key.public_jwk)
        .bind(&key.private_key_pem)
        .bind(key.created_utc)
        .bind(key.not_before_utc)
        .bind(key.not_after_utc)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    // ==================== Audit Operations ====================

    async fn append_audit(&self, entry: &AuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (audit_id, user_id, action, resource_type, resource_id, ip, data, created_utc)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(entry.audit_id)
        .bind(entry.user_id)
        .bind(&entry.action)
        .bind(&entry.resource_type)
        .bind(&entry.resource_id)
        .bind(&entry.ip)
        .bind(&entry.data)
        .bind(entry.created_utc)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }
}
