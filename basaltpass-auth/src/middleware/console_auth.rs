use axum_extra::extract::cookie::CookieJar;
use service_core::{
    axum::{
        async_trait,
        extract::{FromRequestParts, Request, State},
        http::{header, request::Parts, HeaderMap},
        middleware::Next,
        response::Response,
    },
    error::AppError,
};

use crate::{services::ConsoleClaims, AppState};

/// Cookie the console UI sets for the browser authorize/consent round trip.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Console token from `Authorization: Bearer`, else from the access-token
/// cookie when `allow_cookie` is set.
pub fn console_token(headers: &HeaderMap, allow_cookie: bool) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty());
    if let Some(token) = bearer {
        return Some(token.to_string());
    }

    if !allow_cookie {
        return None;
    }
    CookieJar::from_headers(headers)
        .get(ACCESS_TOKEN_COOKIE)
        .map(|cookie| cookie.value().to_string())
        .filter(|token| !token.is_empty())
}

/// Requires a valid console access token and stores its claims in the
/// request extensions.
pub async fn console_auth_middleware(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = console_token(req.headers(), false).ok_or_else(|| {
        AppError::Unauthorized(anyhow::anyhow!("Missing or invalid Authorization header"))
    })?;

    let claims = state.console_tokens.validate_access(&token)?;
    tracing::Span::current().record("user_id", tracing::field::display(claims.sub));

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

/// Extractor for the claims placed by [`console_auth_middleware`].
pub struct ConsoleUser(pub ConsoleClaims);

#[async_trait]
impl<S> FromRequestParts<S> for ConsoleUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let claims = parts.extensions.get::<ConsoleClaims>().ok_or_else(|| {
            AppError::InternalError(anyhow::anyhow!(
                "Console claims missing from request extensions"
            ))
        })?;

        Ok(ConsoleUser(claims.clone()))
    }
}
