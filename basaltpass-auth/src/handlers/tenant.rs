//! Tenant console: the caller's context, apps, OAuth clients and members.

use service_core::{
    axum::{
        extract::{Path, State},
        http::StatusCode,
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::tenant::{
        AppResponse, ChangeRoleRequest, ClientListResponse, ClientSecretResponse, CreateAppRequest,
        CreateClientRequest, MemberResponse, RevokedTokensResponse,
    },
    middleware::CurrentTenant,
    services::client_registry::NewClient,
    utils::ValidatedJson,
    AppState,
};

/// Resolved tenant context of the caller
#[utoipa::path(
    get,
    path = "/tenant/context",
    responses(
        (status = 200, description = "Tenant context", body = TenantContext),
        (status = 401, description = "Not authenticated or not a member", body = ErrorResponse),
        (status = 403, description = "Tenant suspended or role too low", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn tenant_context(CurrentTenant(ctx): CurrentTenant) -> impl IntoResponse {
    Json(ctx)
}

/// Create an app in the caller's tenant
#[utoipa::path(
    post,
    path = "/tenant/apps",
    request_body = CreateAppRequest,
    responses(
        (status = 201, description = "App created", body = AppResponse),
        (status = 403, description = "Tenant admin required", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn create_app(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    ValidatedJson(req): ValidatedJson<CreateAppRequest>,
) -> Result<impl IntoResponse, AppError> {
    let app = state
        .clients
        .create_app(ctx.tenant_id, req.name, req.description, ctx.user_id)
        .await?;
    Ok((StatusCode::CREATED, Json(AppResponse { app })))
}

/// Register an OAuth client under an app. The secret is shown once.
#[utoipa::path(
    post,
    path = "/tenant/apps/{app_id}/clients",
    params(("app_id" = Uuid, Path, description = "Owning app")),
    request_body = CreateClientRequest,
    responses(
        (status = 201, description = "Client created", body = ClientSecretResponse),
        (status = 404, description = "App not in this tenant", body = ErrorResponse),
        (status = 422, description = "Unknown scope or invalid redirect URI", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn create_client(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(app_id): Path<Uuid>,
    ValidatedJson(req): ValidatedJson<CreateClientRequest>,
) -> Result<impl IntoResponse, AppError> {
    let new = NewClient {
        name: req.name,
        redirect_uris: req.redirect_uris,
        scopes: req.scopes,
        allowed_origins: req.allowed_origins,
    };
    let (client, client_secret) = state
        .clients
        .create(ctx.tenant_id, app_id, new, ctx.user_id)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(ClientSecretResponse {
            client: client.summary(),
            client_secret,
        }),
    ))
}

/// OAuth clients of the caller's tenant
#[utoipa::path(
    get,
    path = "/tenant/clients",
    responses(
        (status = 200, description = "Clients, without secrets", body = ClientListResponse),
        (status = 403, description = "Permission oauth_client.read required", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn list_clients(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
) -> Result<impl IntoResponse, AppError> {
    let clients = state.clients.list(ctx.tenant_id).await?;
    Ok(Json(ClientListResponse {
        clients: clients.iter().map(|c| c.summary()).collect(),
    }))
}

/// Regenerate a client secret and revoke every token of the client
#[utoipa::path(
    post,
    path = "/tenant/clients/{client_id}/secret",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "New secret issued", body = ClientSecretResponse),
        (status = 404, description = "Client not in this tenant", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn regenerate_client_secret(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let (client, client_secret) = state
        .clients
        .regenerate_secret(ctx.tenant_id, &client_id, ctx.user_id)
        .await?;
    Ok(Json(ClientSecretResponse {
        client: client.summary(),
        client_secret,
    }))
}

/// Revoke every outstanding token of a client
#[utoipa::path(
    delete,
    path = "/tenant/clients/{client_id}/tokens",
    params(("client_id" = String, Path, description = "Client identifier")),
    responses(
        (status = 200, description = "Tokens revoked", body = RevokedTokensResponse),
        (status = 404, description = "Client not in this tenant", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn revoke_client_tokens(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(client_id): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let tokens_revoked = state
        .clients
        .revoke_all(ctx.tenant_id, &client_id, ctx.user_id)
        .await?;
    Ok(Json(RevokedTokensResponse {
        client_id,
        tokens_revoked,
    }))
}

/// Change a member's role. Assigning `owner` transfers ownership.
#[utoipa::path(
    put,
    path = "/tenant/members/{user_id}/role",
    params(("user_id" = Uuid, Path, description = "Member to update")),
    request_body = ChangeRoleRequest,
    responses(
        (status = 200, description = "Role changed", body = MemberResponse),
        (status = 403, description = "Only the owner may transfer ownership", body = ErrorResponse),
        (status = 404, description = "Not a member of this tenant", body = ErrorResponse),
        (status = 409, description = "Role change not allowed", body = ErrorResponse)
    ),
    tag = "Tenant",
    security(("bearer_auth" = []))
)]
pub async fn change_member_role(
    State(state): State<AppState>,
    CurrentTenant(ctx): CurrentTenant,
    Path(user_id): Path<Uuid>,
    Json(req): Json<ChangeRoleRequest>,
) -> Result<impl IntoResponse, AppError> {
    let member = state
        .tenant_guard
        .change_member_role(&ctx, user_id, req.role)
        .await?;
    Ok(Json(MemberResponse {
        user_id: member.user_id,
        tenant_id: member.tenant_id,
        role: member.role(),
    }))
}
