use service_core::{
    axum::{
        extract::{Request, State},
        http::HeaderMap,
        middleware::Next,
        response::Response,
    },
    error::AppError,
};

use super::console_auth::console_token;
use crate::AppState;

/// Paths served while maintenance mode is on.
const ALLOWED_PATHS: &[&str] = &[
    "/health",
    "/auth/login",
    "/auth/register",
    "/auth/verify-email",
    "/auth/verify-2fa",
    "/auth/refresh",
    "/oauth/jwks",
];

const ALLOWED_PREFIXES: &[&str] = &["/auth/password/", "/.well-known/"];

pub fn is_allow_listed(path: &str) -> bool {
    ALLOWED_PATHS.contains(&path) || ALLOWED_PREFIXES.iter().any(|p| path.starts_with(p))
}

/// Answers 503 while maintenance mode is on, except for allow-listed paths,
/// super admins, and owners or admins of the token's tenant.
pub async fn maintenance_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    if is_allow_listed(req.uri().path()) {
        return Ok(next.run(req).await);
    }

    if !state.settings.maintenance().await?.enabled {
        return Ok(next.run(req).await);
    }

    if may_bypass(&state, req.headers()).await {
        return Ok(next.run(req).await);
    }

    tracing::debug!(path = %req.uri().path(), "Request refused during maintenance");
    Err(AppError::ServiceUnavailable(Some(
        "The service is under maintenance".to_string(),
    )))
}

async fn may_bypass(state: &AppState, headers: &HeaderMap) -> bool {
    let Some(token) = console_token(headers, true) else {
        return false;
    };
    let Ok(claims) = state.console_tokens.validate_access(&token) else {
        return false;
    };

    match state.tenant_guard.is_super_admin(claims.sub).await {
        Ok(true) => return true,
        Ok(false) => {}
        Err(e) => tracing::warn!(error = %e, "Super admin lookup failed during maintenance"),
    }
    state.tenant_guard.administers_tenant(&claims).await
}
