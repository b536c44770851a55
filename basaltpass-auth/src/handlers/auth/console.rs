use service_core::{
    axum::{extract::State, response::IntoResponse, Json},
    error::AppError,
};

use crate::{
    dtos::auth::{ConsoleAuthorizeRequest, ConsoleExchangeRequest},
    handlers::ClientIp,
    middleware::ConsoleUser,
    utils::ValidatedJson,
    AppState,
};

/// Issue a single-use code for another console scope
#[utoipa::path(
    post,
    path = "/auth/console/authorize",
    request_body = ConsoleAuthorizeRequest,
    responses(
        (status = 200, description = "Console code issued", body = ConsoleCodeResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 403, description = "Target scope not permitted", body = ErrorResponse)
    ),
    tag = "Console",
    security(("bearer_auth" = []))
)]
pub async fn console_authorize(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ConsoleUser(claims): ConsoleUser,
    Json(req): Json<ConsoleAuthorizeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state
        .sessions
        .console_authorize(claims.sub, req.target, req.tenant_id, ip)
        .await?;
    Ok(Json(res))
}

/// Exchange a console code for a scoped token pair
#[utoipa::path(
    post,
    path = "/auth/console/exchange",
    request_body = ConsoleExchangeRequest,
    responses(
        (status = 200, description = "Token pair issued", body = ConsoleTokenResponse),
        (status = 401, description = "Invalid, expired or reused code", body = ErrorResponse)
    ),
    tag = "Console"
)]
pub async fn console_exchange(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    ValidatedJson(req): ValidatedJson<ConsoleExchangeRequest>,
) -> Result<impl IntoResponse, AppError> {
    let res = state.sessions.console_exchange(&req.code, ip).await?;
    Ok(Json(res))
}
