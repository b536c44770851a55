//! Tenant resolution and RBAC decisions shared by the console middleware
//! and the tenant-management handlers.

use std::sync::Arc;

use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::audit::AuditService;
use super::console_token::{ConsoleClaims, ConsoleScope};
use super::ServiceError;
use crate::models::{AuditAction, AuditLog, TenantRole, TenantStatus, TenantUser};
use crate::store::Store;

/// Per-request tenant context. Every field comes from the database; the
/// token's `tid` only selects which membership to look up.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct TenantContext {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub tenant_role: TenantRole,
    pub console_scope: ConsoleScope,
    pub super_admin: bool,
}

#[derive(Clone)]
pub struct TenantGuard {
    store: Arc<dyn Store>,
    audit: AuditService,
}

impl TenantGuard {
    pub fn new(store: Arc<dyn Store>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    /// `UserBanned` (403) for a banned caller, `NoMembership` (401) without a
    /// membership, `TenantInactive` (403) for a tenant that is not active.
    pub async fn resolve(&self, claims: &ConsoleClaims) -> Result<TenantContext, ServiceError> {
        let user = self
            .store
            .find_user(claims.sub)
            .await?
            .ok_or(ServiceError::NoMembership)?;
        if user.banned {
            return Err(ServiceError::UserBanned);
        }

        let membership = match claims.tid {
            Some(tid) => self.store.find_membership(claims.sub, tid).await?,
            None => self.store.earliest_membership(claims.sub).await?,
        }
        .ok_or(ServiceError::NoMembership)?;

        let tenant = self
            .store
            .find_tenant(membership.tenant_id)
            .await?
            .ok_or(ServiceError::NoMembership)?;
        if !tenant.is_active() {
            return Err(ServiceError::TenantInactive);
        }

        Ok(TenantContext {
            user_id: claims.sub,
            tenant_id: membership.tenant_id,
            tenant_role: membership.role(),
            console_scope: claims.scp,
            super_admin: user.super_admin,
        })
    }

    /// Fresh database read; banned users never count.
    pub async fn is_super_admin(&self, user_id: Uuid) -> Result<bool, ServiceError> {
        Ok(self
            .store
            .find_user(user_id)
            .await?
            .is_some_and(|u| u.super_admin && !u.banned))
    }

    /// Owners and admins hold every tenant permission. Other roles hold the
    /// union of the permissions of their roles in the tenant.
    pub async fn has_permission(&self, ctx: &TenantContext, code: &str) -> Result<bool, ServiceError> {
        if ctx.tenant_role.is_tenant_admin() {
            return Ok(true);
        }
        let granted = self
            .store
            .effective_permissions(ctx.user_id, Some(ctx.tenant_id))
            .await?;
        Ok(granted.iter().any(|p| p.code == code))
    }

    /// Whether the caller owns or administers the tenant its console token points at.
    pub async fn administers_tenant(&self, claims: &ConsoleClaims) -> bool {
        match self.resolve(claims).await {
            Ok(ctx) => ctx.tenant_role.is_tenant_admin(),
            Err(_) => false,
        }
    }

    // ==================== Member Operations ====================

    /// Changes a member's role. Promoting to owner transfers ownership and
    /// demotes the caller to admin in the same transaction.
    #[tracing::instrument(skip(self, ctx), fields(tenant_id = %ctx.tenant_id, actor = %ctx.user_id))]
    pub async fn change_member_role(
        &self,
        ctx: &TenantContext,
        target_user: Uuid,
        role: TenantRole,
    ) -> Result<TenantUser, ServiceError> {
        let target = self
            .store
            .find_membership(target_user, ctx.tenant_id)
            .await?
            .ok_or(ServiceError::NotFound("Member"))?;

        if target.role() == TenantRole::Owner && ctx.tenant_role != TenantRole::Owner {
            return Err(ServiceError::Forbidden("only the owner can change the owner's role".to_string()));
        }

        if role == TenantRole::Owner {
            if ctx.tenant_role != TenantRole::Owner {
                return Err(ServiceError::Forbidden("only the owner can transfer ownership".to_string()));
            }
            if target_user == ctx.user_id {
                return Err(ServiceError::Conflict("caller already owns the tenant".to_string()));
            }
            self.store
                .transfer_ownership(ctx.tenant_id, ctx.user_id, target_user)
                .await?;

            tracing::info!(new_owner = %target_user, "Ownership transferred");
            self.audit
                .record(
                    AuditLog::new(AuditAction::OwnershipTransferred, "tenant")
                        .user(ctx.user_id)
                        .resource(ctx.tenant_id)
                        .data(serde_json::json!({ "new_owner": target_user })),
                )
                .await;
        } else {
            if target.role() == TenantRole::Owner {
                return Err(ServiceError::Conflict(
                    "the owner's role changes only through ownership transfer".to_string(),
                ));
            }
            self.store
                .update_membership_role(ctx.tenant_id, target_user, role.as_str())
                .await?;

            self.audit
                .record(
                    AuditLog::new(AuditAction::MemberRoleChanged, "tenant_user")
                        .user(ctx.user_id)
                        .resource(target_user)
                        .data(serde_json::json!({
                            "tenant_id": ctx.tenant_id,
                            "from": target.role().as_str(),
                            "to": role.as_str(),
                        })),
                )
                .await;
        }

        self.store
            .find_membership(target_user, ctx.tenant_id)
            .await?
            .ok_or(ServiceError::NotFound("Member"))
    }

    // ==================== Tenant Lifecycle ====================

    #[tracing::instrument(skip(self))]
    pub async fn set_tenant_status(
        &self,
        tenant_id: Uuid,
        status: TenantStatus,
        actor: Uuid,
    ) -> Result<(), ServiceError> {
        let tenant = self
            .store
            .find_tenant(tenant_id)
            .await?
            .ok_or(ServiceError::NotFound("Tenant"))?;
        let current = tenant
            .status()
            .ok_or_else(|| ServiceError::Internal(anyhow::anyhow!("unknown tenant status {}", tenant.status)))?;
        if !current.can_transition_to(status) {
            return Err(ServiceError::Conflict(format!(
                "tenant cannot move from {} to {}",
                current.as_str(),
                status.as_str()
            )));
        }

        self.store.set_tenant_status(tenant_id, status).await?;
        tracing::info!(tenant_id = %tenant_id, status = status.as_str(), "Tenant status changed");
        self.audit
            .record(
                AuditLog::new(AuditAction::TenantStatusChanged, "tenant")
                    .user(actor)
                    .resource(tenant_id)
                    .data(serde_json::json!({ "from": current.as_str(), "to": status.as_str() })),
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{permissions, Permission, Role, Tenant, User};
    use crate::store::MemoryStore;

    struct Fixture {
        store: Arc<MemoryStore>,
        guard: TenantGuard,
        tenant: Tenant,
        owner: Uuid,
        admin: Uuid,
        member: Uuid,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let guard = TenantGuard::new(store.clone(), AuditService::new(store.clone()));
        let tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        store.insert_tenant(&tenant).await.unwrap();

        let mut ids = Vec::new();
        for (email, role) in [
            ("owner@acme.test", TenantRole::Owner),
            ("admin@acme.test", TenantRole::Admin),
            ("member@acme.test", TenantRole::Member),
        ] {
            let user = store
                .create_user(&User::new(email.to_string(), "x".to_string()))
                .await
                .unwrap();
            store
                .insert_membership(&TenantUser::new(user.user_id, tenant.tenant_id, role))
                .await
                .unwrap();
            ids.push(user.user_id);
        }

        Fixture {
            store,
            guard,
            tenant,
            owner: ids[0],
            admin: ids[1],
            member: ids[2],
        }
    }

    fn claims(user: Uuid, tid: Option<Uuid>) -> ConsoleClaims {
        ConsoleClaims {
            sub: user,
            tid,
            scp: ConsoleScope::Tenant,
            exp: 0,
            iat: 0,
            typ: None,
        }
    }

    #[tokio::test]
    async fn test_resolve_rechecks_membership() {
        let f = fixture().await;
        let ctx = f.guard.resolve(&claims(f.admin, Some(f.tenant.tenant_id))).await.unwrap();
        assert_eq!(ctx.tenant_role, TenantRole::Admin);

        let foreign = f.guard.resolve(&claims(f.admin, Some(Uuid::new_v4()))).await;
        assert!(matches!(foreign, Err(ServiceError::NoMembership)));

        f.store
            .set_tenant_status(f.tenant.tenant_id, TenantStatus::Suspended)
            .await
            .unwrap();
        let suspended = f.guard.resolve(&claims(f.admin, Some(f.tenant.tenant_id))).await;
        assert!(matches!(suspended, Err(ServiceError::TenantInactive)));
    }

    #[tokio::test]
    async fn test_resolve_refuses_banned_user() {
        let f = fixture().await;
        let mut user = f.store.find_user(f.admin).await.unwrap().unwrap();
        user.banned = true;
        f.store.save_user(&user).await.unwrap();

        let banned = f.guard.resolve(&claims(f.admin, Some(f.tenant.tenant_id))).await;
        assert!(matches!(banned, Err(ServiceError::UserBanned)));
        assert!(!f.guard.administers_tenant(&claims(f.admin, Some(f.tenant.tenant_id))).await);
    }

    #[tokio::test]
    async fn test_permission_union() {
        let f = fixture().await;
        let member = f.guard.resolve(&claims(f.member, Some(f.tenant.tenant_id))).await.unwrap();
        assert!(!f.guard.has_permission(&member, permissions::OAUTH_CLIENT_READ).await.unwrap());

        let role = Role::new(Some(f.tenant.tenant_id), "viewer", "Viewer");
        f.store.insert_role(&role).await.unwrap();
        let read = Permission::new("app.read", None);
        f.store.insert_permission(&read).await.unwrap();
        f.store.attach_permission(role.role_id, read.permission_id).await.unwrap();
        f.store.assign_role(f.member, role.role_id).await.unwrap();
        assert!(f.guard.has_permission(&member, "app.read").await.unwrap());

        let admin = f.guard.resolve(&claims(f.admin, Some(f.tenant.tenant_id))).await.unwrap();
        assert!(f.guard.has_permission(&admin, permissions::OAUTH_CLIENT_READ).await.unwrap());
    }

    #[tokio::test]
    async fn test_admin_cannot_touch_owner() {
        let f = fixture().await;
        let admin = f.guard.resolve(&claims(f.admin, Some(f.tenant.tenant_id))).await.unwrap();

        let demote = f.guard.change_member_role(&admin, f.owner, TenantRole::Member).await;
        assert!(matches!(demote, Err(ServiceError::Forbidden(_))));
        let promote = f.guard.change_member_role(&admin, f.member, TenantRole::Owner).await;
        assert!(matches!(promote, Err(ServiceError::Forbidden(_))));

        let updated = f
            .guard
            .change_member_role(&admin, f.member, TenantRole::Admin)
            .await
            .unwrap();
        assert_eq!(updated.role(), TenantRole::Admin);
    }

    #[tokio::test]
    async fn test_ownership_transfer() {
        let f = fixture().await;
        let owner = f.guard.resolve(&claims(f.owner, Some(f.tenant.tenant_id))).await.unwrap();

        let promoted = f
            .guard
            .change_member_role(&owner, f.member, TenantRole::Owner)
            .await
            .unwrap();
        assert_eq!(promoted.role(), TenantRole::Owner);

        let previous = f
            .store
            .find_membership(f.owner, f.tenant.tenant_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(previous.role(), TenantRole::Admin);
        assert!(f
            .store
            .audit_entries()
            .iter()
            .any(|e| e.is(AuditAction::OwnershipTransferred)));
    }

    #[tokio::test]
    async fn test_deleted_tenant_is_terminal() {
        let f = fixture().await;
        f.guard
            .set_tenant_status(f.tenant.tenant_id, TenantStatus::Deleted, f.owner)
            .await
            .unwrap();
        let revive = f
            .guard
            .set_tenant_status(f.tenant.tenant_id, TenantStatus::Active, f.owner)
            .await;
        assert!(matches!(revive, Err(ServiceError::Conflict(_))));
    }
}
