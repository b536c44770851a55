//! Service-to-service queries. Every answer uses the S2S envelope and only
//! exposes users who belong to the calling client's tenant.

use service_core::axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Response,
};
use uuid::Uuid;

use crate::{
    dtos::s2s::{LookupQuery, S2sHealth, S2sIdentity, S2sPermissions, S2sRole, S2sRoleCodes},
    middleware::S2sRequest,
    models::User,
    store::StoreError,
    AppState,
};

fn server_error(req: &S2sRequest, e: StoreError) -> Response {
    tracing::error!(error = %e, client_id = %req.ctx.client_id, "S2S store lookup failed");
    req.error(StatusCode::INTERNAL_SERVER_ERROR, "server_error", "internal server error")
}

fn user_not_found(req: &S2sRequest) -> Response {
    req.error(StatusCode::NOT_FOUND, "not_found", "user not found")
}

/// The user, provided it is a member of the caller's tenant.
async fn tenant_member(state: &AppState, req: &S2sRequest, raw_id: &str) -> Result<User, Response> {
    let user_id = Uuid::parse_str(raw_id).map_err(|_| {
        req.error(StatusCode::BAD_REQUEST, "invalid_parameter", "user id must be a UUID")
    })?;
    let user = state
        .store
        .find_user(user_id)
        .await
        .map_err(|e| server_error(req, e))?
        .ok_or_else(|| user_not_found(req))?;
    ensure_member(state, req, user).await
}

async fn ensure_member(state: &AppState, req: &S2sRequest, user: User) -> Result<User, Response> {
    let membership = state
        .store
        .find_membership(user.user_id, req.ctx.tenant_id)
        .await
        .map_err(|e| server_error(req, e))?;
    match membership {
        Some(_) => Ok(user),
        None => Err(user_not_found(req)),
    }
}

pub async fn health(req: S2sRequest) -> Response {
    req.ok(S2sHealth { status: "ok" })
}

pub async fn me(State(state): State<AppState>, req: S2sRequest) -> Response {
    let lookup = async {
        let client = state.store.find_client(&req.ctx.client_id).await?;
        let app = state.store.find_app(req.ctx.app_id).await?;
        let tenant = state.store.find_tenant(req.ctx.tenant_id).await?;
        Ok::<_, StoreError>((client, app, tenant))
    };
    match lookup.await {
        Ok((Some(client), Some(app), Some(tenant))) => req.ok(S2sIdentity {
            client_id: client.client_id,
            client_name: client.name,
            app_id: app.app_id,
            app_name: app.name,
            tenant_id: tenant.tenant_id,
            tenant_code: tenant.code,
            scopes: req.ctx.scopes.clone(),
        }),
        Ok(_) => req.error(StatusCode::NOT_FOUND, "not_found", "client no longer exists"),
        Err(e) => server_error(&req, e),
    }
}

pub async fn get_user(
    State(state): State<AppState>,
    req: S2sRequest,
    Path(user_id): Path<String>,
) -> Response {
    match tenant_member(&state, &req, &user_id).await {
        Ok(user) => req.ok(user.sanitized()),
        Err(response) => response,
    }
}

pub async fn lookup_user(
    State(state): State<AppState>,
    req: S2sRequest,
    Query(query): Query<LookupQuery>,
) -> Response {
    let Some(email) = query.email.map(|e| e.trim().to_lowercase()).filter(|e| !e.is_empty()) else {
        return req.error(StatusCode::BAD_REQUEST, "invalid_parameter", "email is required");
    };

    let user = match state.store.find_user_by_email(&email).await {
        Ok(Some(user)) => user,
        Ok(None) => return user_not_found(&req),
        Err(e) => return server_error(&req, e),
    };
    match ensure_member(&state, &req, user).await {
        Ok(user) => req.ok(user.sanitized()),
        Err(response) => response,
    }
}

pub async fn user_roles(
    State(state): State<AppState>,
    req: S2sRequest,
    Path(user_id): Path<String>,
) -> Response {
    let user = match tenant_member(&state, &req, &user_id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match state.store.user_roles(user.user_id, Some(req.ctx.tenant_id)).await {
        Ok(roles) => req.ok(
            roles
                .into_iter()
                .map(|r| S2sRole {
                    role_id: r.role_id,
                    code: r.code,
                    name: r.name,
                })
                .collect::<Vec<_>>(),
        ),
        Err(e) => server_error(&req, e),
    }
}

pub async fn user_role_codes(
    State(state): State<AppState>,
    req: S2sRequest,
    Path(user_id): Path<String>,
) -> Response {
    let user = match tenant_member(&state, &req, &user_id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match state.store.user_roles(user.user_id, Some(req.ctx.tenant_id)).await {
        Ok(roles) => req.ok(S2sRoleCodes {
            user_id: user.user_id,
            role_codes: roles.into_iter().map(|r| r.code).collect(),
        }),
        Err(e) => server_error(&req, e),
    }
}

pub async fn user_permissions(
    State(state): State<AppState>,
    req: S2sRequest,
    Path(user_id): Path<String>,
) -> Response {
    let user = match tenant_member(&state, &req, &user_id).await {
        Ok(user) => user,
        Err(response) => return response,
    };
    match state
        .store
        .effective_permissions(user.user_id, Some(req.ctx.tenant_id))
        .await
    {
        Ok(permissions) => req.ok(S2sPermissions {
            user_id: user.user_id,
            permission_codes: permissions.into_iter().map(|p| p.code).collect(),
        }),
        Err(e) => server_error(&req, e),
    }
}
