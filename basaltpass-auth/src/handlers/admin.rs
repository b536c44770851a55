//! Super-admin console routes.

use service_core::{
    axum::{
        extract::{Path, State},
        response::IntoResponse,
        Json,
    },
    error::AppError,
};
use uuid::Uuid;

use crate::{
    dtos::admin::{MaintenanceBody, RotateKeyResponse, TenantStatusRequest, TenantStatusResponse},
    handlers::ClientIp,
    middleware::ConsoleUser,
    models::{AuditAction, AuditLog},
    AppState,
};

/// Current maintenance mode
#[utoipa::path(
    get,
    path = "/admin/settings/maintenance",
    responses(
        (status = 200, description = "Maintenance flag", body = MaintenanceBody),
        (status = 403, description = "Super admin required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn get_maintenance(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    let setting = state.settings.maintenance().await?;
    Ok(Json(MaintenanceBody {
        enabled: setting.enabled,
    }))
}

/// Turn maintenance mode on or off
#[utoipa::path(
    put,
    path = "/admin/settings/maintenance",
    request_body = MaintenanceBody,
    responses(
        (status = 200, description = "Maintenance flag updated", body = MaintenanceBody),
        (status = 403, description = "Super admin required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn set_maintenance(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ConsoleUser(claims): ConsoleUser,
    Json(req): Json<MaintenanceBody>,
) -> Result<impl IntoResponse, AppError> {
    let setting = state.settings.set_maintenance(req.enabled).await?;
    state
        .audit
        .record(
            AuditLog::new(AuditAction::MaintenanceToggled, "setting")
                .user(claims.sub)
                .resource(crate::models::MAINTENANCE_KEY)
                .ip(ip)
                .data(serde_json::json!({ "enabled": setting.enabled })),
        )
        .await;
    Ok(Json(MaintenanceBody {
        enabled: setting.enabled,
    }))
}

/// Rotate the ID-token signing key. The previous key stays published until it retires.
#[utoipa::path(
    post,
    path = "/admin/oauth/keys/rotate",
    responses(
        (status = 200, description = "New key active", body = RotateKeyResponse),
        (status = 403, description = "Super admin required", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn rotate_signing_key(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ConsoleUser(claims): ConsoleUser,
) -> Result<impl IntoResponse, AppError> {
    let kid = state.keys.rotate().await.map_err(|e| {
        tracing::error!(error = %e, "Signing key rotation failed");
        AppError::InternalError(anyhow::Error::new(e))
    })?;

    state
        .audit
        .record(
            AuditLog::new(AuditAction::SigningKeyRotated, "signing_key")
                .user(claims.sub)
                .resource(&kid)
                .ip(ip),
        )
        .await;
    Ok(Json(RotateKeyResponse { kid }))
}

/// Suspend, reactivate or delete a tenant
#[utoipa::path(
    put,
    path = "/admin/tenants/{tenant_id}/status",
    params(("tenant_id" = Uuid, Path, description = "Tenant to update")),
    request_body = TenantStatusRequest,
    responses(
        (status = 200, description = "Status changed", body = TenantStatusResponse),
        (status = 404, description = "Tenant not found", body = ErrorResponse),
        (status = 409, description = "Transition not allowed", body = ErrorResponse)
    ),
    tag = "Admin",
    security(("bearer_auth" = []))
)]
pub async fn set_tenant_status(
    State(state): State<AppState>,
    ConsoleUser(claims): ConsoleUser,
    Path(tenant_id): Path<Uuid>,
    Json(req): Json<TenantStatusRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .tenant_guard
        .set_tenant_status(tenant_id, req.status, claims.sub)
        .await?;
    Ok(Json(TenantStatusResponse {
        tenant_id,
        status: req.status,
    }))
}
