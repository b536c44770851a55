use service_core::axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap},
    response::{IntoResponse, Response},
    Json,
};

use super::no_store;
use crate::{
    dtos::oauth::UserInfoForm,
    services::oauth::OAuthError,
    AppState,
};

fn bearer(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

async fn respond(state: &AppState, token: Option<String>) -> Response {
    let Some(token) = token else {
        return OAuthError::invalid_token("missing access token").into_response();
    };
    match state.oauth.userinfo(&token).await {
        Ok(claims) => no_store(Json(claims).into_response()),
        Err(e) => e.into_response(),
    }
}

/// OpenID Connect UserInfo
#[utoipa::path(
    get,
    path = "/oauth/userinfo",
    responses(
        (status = 200, description = "Claims released by the token's scopes"),
        (status = 401, description = "invalid_token"),
        (status = 403, description = "insufficient_scope")
    ),
    tag = "OAuth",
    security(("bearer_auth" = []))
)]
pub async fn userinfo(State(state): State<AppState>, headers: HeaderMap) -> Response {
    respond(&state, bearer(&headers)).await
}

/// OpenID Connect UserInfo, with the token in the header or an `access_token` form field
#[utoipa::path(
    post,
    path = "/oauth/userinfo",
    responses(
        (status = 200, description = "Claims released by the token's scopes"),
        (status = 401, description = "invalid_token"),
        (status = 403, description = "insufficient_scope")
    ),
    tag = "OAuth",
    security(("bearer_auth" = []))
)]
pub async fn userinfo_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    let token = bearer(&headers).or_else(|| {
        serde_urlencoded::from_bytes::<UserInfoForm>(&body)
            .ok()
            .and_then(|form| form.access_token)
            .filter(|t| !t.is_empty())
    });
    respond(&state, token).await
}
