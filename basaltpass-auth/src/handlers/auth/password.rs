use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{MessageResponse, PasswordResetConfirm, PasswordResetRequest},
    handlers::ClientIp,
    utils::ValidatedJson,
    AppState,
};

/// Request a password reset link
#[utoipa::path(
    post,
    path = "/auth/password/reset-request",
    request_body = PasswordResetRequest,
    responses(
        (status = 200, description = "Request received", body = MessageResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn request_password_reset(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<PasswordResetRequest>,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .request_password_reset(&req.email, ip.clone())
        .await
        .map_err(|e| {
            tracing::error!(error = %e, ip = ?ip, "Failed to process password reset request");
            e
        })?;

    Ok(Json(MessageResponse::new(
        "If your email is registered, you will receive a password reset link shortly.",
    )))
}

/// Set a new password with a reset token
#[utoipa::path(
    post,
    path = "/auth/password/reset",
    request_body = PasswordResetConfirm,
    responses(
        (status = 200, description = "Password updated", body = MessageResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn confirm_password_reset(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<PasswordResetConfirm>,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .reset_password(&req.token, &req.new_password, ip)
        .await?;
    Ok(Json(MessageResponse::new("Password has been reset")))
}
