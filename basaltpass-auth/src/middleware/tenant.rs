//! Tenant context and RBAC guards for console routes.
//!
//! Layer order on a tenant route, outermost first:
//! `console_auth_middleware`, `require_console_scope`, `tenant_middleware`,
//! then `require_role` / `require_permission`.

use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, Request, State},
        http::request::Parts,
        middleware::Next,
        response::Response,
    },
    error::AppError,
};

use crate::{
    models::TenantRole,
    services::{ConsoleClaims, ConsoleScope, TenantContext},
    AppState,
};

fn claims_of(req: &Request) -> Result<ConsoleClaims, AppError> {
    req.extensions().get::<ConsoleClaims>().cloned().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Console claims missing from request extensions"
        ))
    })
}

fn context_of(req: &Request) -> Result<&TenantContext, AppError> {
    req.extensions().get::<TenantContext>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Tenant context missing from request extensions"
        ))
    })
}

/// Resolves the caller's tenant from the database and inserts a
/// [`TenantContext`]. The token's `tid` only picks the membership.
pub async fn tenant_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = claims_of(&req)?;
    let ctx = state.tenant_guard.resolve(&claims).await.map_err(|e| {
        tracing::warn!(user_id = %claims.sub, tid = ?claims.tid, error = %e, "Tenant resolution failed");
        AppError::from(e)
    })?;

    req.extensions_mut().insert(ctx);
    Ok(next.run(req).await)
}

pub async fn require_console_scope(
    allowed: &'static [ConsoleScope],
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = claims_of(&req)?;
    if !allowed.contains(&claims.scp) {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Console scope '{}' cannot access this route",
            claims.scp.as_str()
        )));
    }
    Ok(next.run(req).await)
}

pub async fn require_role(
    minimum: TenantRole,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = context_of(&req)?;
    if !ctx.tenant_role.satisfies(minimum) {
        tracing::warn!(
            user_id = %ctx.user_id,
            tenant_id = %ctx.tenant_id,
            role = ctx.tenant_role.as_str(),
            required = minimum.as_str(),
            "Insufficient tenant role"
        );
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Tenant role '{}' required",
            minimum.as_str()
        )));
    }
    Ok(next.run(req).await)
}

pub async fn require_permission(
    State(state): State<AppState>,
    code: &'static str,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let ctx = context_of(&req)?;
    if !state.tenant_guard.has_permission(ctx, code).await? {
        tracing::warn!(user_id = %ctx.user_id, tenant_id = %ctx.tenant_id, permission = code, "Permission denied");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Permission '{}' required",
            code
        )));
    }
    Ok(next.run(req).await)
}

/// Admin console routes: `scp=admin` and a super-admin flag that still
/// holds in the database.
pub async fn require_super_admin(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = claims_of(&req)?;
    if claims.scp != ConsoleScope::Admin {
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Admin console scope required"
        )));
    }
    if !state.tenant_guard.is_super_admin(claims.sub).await? {
        tracing::warn!(user_id = %claims.sub, "Admin route refused, not a super admin");
        return Err(AppError::Forbidden(anyhow::anyhow!(
            "Super admin required"
        )));
    }
    Ok(next.run(req).await)
}

/// Extractor for the context placed by [`tenant_middleware`].
pub struct CurrentTenant(pub TenantContext);

#[async_trait]
impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let ctx = parts.extensions.get::<TenantContext>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Tenant context missing from request extensions"
            ))
        })?;
        Ok(CurrentTenant(ctx.clone()))
    }
}
