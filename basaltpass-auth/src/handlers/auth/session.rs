use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{LoginRequest, RefreshRequest, VerifyTwoFactorRequest},
    handlers::ClientIp,
    utils::ValidatedJson,
    AppState,
};

/// Login with email or phone and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Tokens issued, or a 2FA challenge", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "User is banned", body = ErrorResponse),
        (status = 429, description = "Too many attempts", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .sessions
        .login(&req.identifier, &req.password, ip)
        .await?;
    Ok(Json(res))
}

/// Complete a login with the mailed 2FA code
#[utoipa::path(
    post,
    path = "/auth/verify-2fa",
    request_body = VerifyTwoFactorRequest,
    responses(
        (status = 200, description = "Tokens issued", body = ConsoleTokenResponse),
        (status = 401, description = "Invalid or expired code", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn verify_two_factor(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<VerifyTwoFactorRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .sessions
        .verify_two_factor(req.challenge_id, &req.code, ip)
        .await?;
    Ok(Json(res))
}

/// Rotate a console refresh token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "New token pair", body = ConsoleTokenResponse),
        (status = 401, description = "Invalid, expired or reused refresh token", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.sessions.refresh(&req.refresh_token, ip).await?;
    Ok(Json(res))
}
