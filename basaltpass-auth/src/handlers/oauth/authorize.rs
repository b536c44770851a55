use chrono::{DateTime, Utc};
use service_core::{
    axum::{
        body::Bytes,
        extract::{Query, State},
        http::{header, HeaderMap, Uri},
        response::{IntoResponse, Response},
    },
    error::AppError,
};

use super::{found, is_json};
use crate::{
    dtos::oauth::ConsentRequest,
    handlers::ClientIp,
    middleware::console_token,
    models::User,
    services::{
        oauth::{error_redirect_url, AuthorizeError, AuthorizeParams, OAuthError, ValidatedAuthorize},
        ConsoleClaims, OAuthServer,
    },
    AppState,
};

/// The signed-in console user behind a browser request, if any.
async fn session_user(state: &AppState, headers: &HeaderMap) -> Result<Option<(ConsoleClaims, User)>, OAuthError> {
    let Some(token) = console_token(headers, true) else {
        return Ok(None);
    };
    let Ok(claims) = state.console_tokens.validate_access(&token) else {
        return Ok(None);
    };
    let user = state.store.find_user(claims.sub).await?;
    Ok(user.map(|user| (claims, user)))
}

/// A cookie-borne session may only drive a state-changing request from one
/// of the console's own origins. Bearer callers are not exposed to CSRF.
fn same_origin_or_bearer(state: &AppState, headers: &HeaderMap) -> bool {
    if console_token(headers, false).is_some() {
        return true;
    }
    let Some(origin) = headers.get(header::ORIGIN).and_then(|v| v.to_str().ok()) else {
        return false;
    };
    let origin = origin.trim_end_matches('/');
    origin == state.config.ui.base_url
        || state
            .config
            .security
            .allowed_origins
            .iter()
            .any(|allowed| allowed.trim_end_matches('/') == origin)
}

fn auth_time(claims: &ConsoleClaims) -> DateTime<Utc> {
    DateTime::from_timestamp(claims.iat, 0).unwrap_or_else(Utc::now)
}

fn authorize_failure(err: AuthorizeError) -> Response {
    match err {
        AuthorizeError::Direct(error) => error.into_response(),
        AuthorizeError::Redirect {
            redirect_uri,
            error,
            state,
        } => found(&error_redirect_url(&redirect_uri, &error, state.as_deref())),
    }
}

fn banned_redirect(request: &ValidatedAuthorize) -> Response {
    found(&request.error_redirect(&OAuthError::access_denied("the account is disabled")))
}

/// Authorization endpoint (RFC 6749 4.1.1, PKCE required)
#[utoipa::path(
    get,
    path = "/oauth/authorize",
    params(AuthorizeParams),
    responses(
        (status = 302, description = "Redirect to login, consent, or the client with a code or error"),
        (status = 400, description = "Unknown client or unregistered redirect_uri")
    ),
    tag = "OAuth"
)]
pub async fn authorize(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    uri: Uri,
    Query(params): Query<AuthorizeParams>,
) -> Response {
    let request = match state.oauth.validate_authorize(&params).await {
        Ok(request) => request,
        Err(e) => {
            tracing::info!(error = ?e.code(), "Authorization request rejected");
            return authorize_failure(e);
        }
    };

    let (claims, user) = match session_user(&state, &headers).await {
        Ok(Some(session)) => session,
        Ok(None) => {
            let issuer = state.oauth.issuer(&headers);
            let original = format!(
                "{}{}",
                issuer,
                uri.path_and_query().map(|pq| pq.as_str()).unwrap_or("/oauth/authorize")
            );
            return found(&format!(
                "{}/login?redirect={}",
                state.config.ui.base_url,
                urlencoding::encode(&original)
            ));
        }
        Err(e) => return e.into_response(),
    };

    if !user.can_obtain_tokens() {
        return banned_redirect(&request);
    }

    match state.oauth.can_auto_approve(user.user_id, &request).await {
        Ok(true) => match state
            .oauth
            .issue_code(user.user_id, &request, auth_time(&claims), ip)
            .await
        {
            Ok(location) => found(&location),
            Err(e) => found(&request.error_redirect(&e)),
        },
        Ok(false) => found(&OAuthServer::consent_url(&state.config.ui.base_url, &params, &request)),
        Err(e) => found(&request.error_redirect(&e)),
    }
}

/// Consent decision from the hosted consent screen
#[utoipa::path(
    post,
    path = "/oauth/consent",
    request_body(content = ConsentRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 302, description = "Redirect to the client with a code or access_denied"),
        (status = 400, description = "Invalid request"),
        (status = 401, description = "Not signed in", body = ErrorResponse)
    ),
    tag = "OAuth"
)]
pub async fn consent(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let Some((claims, user)) = session_user(&state, &headers)
        .await
        .map_err(|e| AppError::InternalError(anyhow::anyhow!(e.to_string())))?
    else {
        return Err(AppError::Unauthorized(anyhow::anyhow!("Not authenticated")));
    };
    if !same_origin_or_bearer(&state, &headers) {
        tracing::warn!(user_id = %user.user_id, "Cookie consent without a trusted Origin refused");
        return Err(AppError::Forbidden(anyhow::anyhow!("Cross-origin consent is not allowed")));
    }

    let parsed = if is_json(&headers) {
        serde_json::from_slice::<ConsentRequest>(&body).map_err(|e| e.to_string())
    } else {
        serde_urlencoded::from_bytes::<ConsentRequest>(&body).map_err(|e| e.to_string())
    };
    let req = match parsed {
        Ok(req) => req,
        Err(e) => return Ok(OAuthError::invalid_request(format!("malformed consent body: {}", e)).into_response()),
    };

    let request = match state.oauth.validate_authorize(&req.params).await {
        Ok(request) => request,
        Err(e) => return Ok(authorize_failure(e)),
    };

    if !user.can_obtain_tokens() {
        return Ok(banned_redirect(&request));
    }

    let response = match req.action.as_str() {
        "allow" => match state
            .oauth
            .approve(user.user_id, &request, auth_time(&claims), ip)
            .await
        {
            Ok(location) => found(&location),
            Err(e) => found(&request.error_redirect(&e)),
        },
        "deny" => found(&state.oauth.deny(user.user_id, &request, ip).await),
        _ => OAuthError::invalid_request("action must be allow or deny").into_response(),
    };
    Ok(response)
}
