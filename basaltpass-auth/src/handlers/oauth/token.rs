use service_core::axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};

use super::{no_store, parse_form};
use crate::{
    dtos::oauth::{IntrospectionRequest, RevocationRequest},
    handlers::ClientIp,
    services::{
        client_registry::extract_client_credentials,
        oauth::{OAuthError, TokenRequest},
    },
    AppState,
};

/// Token endpoint: authorization_code, refresh_token and client_credentials grants
#[utoipa::path(
    post,
    path = "/oauth/token",
    request_body(content = TokenRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Tokens issued", body = TokenResponse),
        (status = 400, description = "invalid_request, invalid_grant, invalid_scope, unsupported_grant_type"),
        (status = 401, description = "invalid_client")
    ),
    tag = "OAuth"
)]
pub async fn token(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let req: TokenRequest = parse_form(&headers, &body)?;
        let creds = extract_client_credentials(
            &headers,
            req.client_id.as_deref(),
            req.client_secret.as_deref(),
        )?;
        let client = state.clients.authenticate(&creds, ip.clone()).await?;
        let issuer = state.oauth.issuer(&headers);
        state.oauth.token(&client, &req, &issuer, ip).await
    }
    .await;

    match result {
        Ok(response) => no_store(Json(response).into_response()),
        Err(e) => e.into_response(),
    }
}

/// Token introspection (RFC 7662)
#[utoipa::path(
    post,
    path = "/oauth/introspect",
    request_body(content = IntrospectionRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token metadata, or {active: false}", body = IntrospectionResponse),
        (status = 401, description = "invalid_client")
    ),
    tag = "OAuth"
)]
pub async fn introspect(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result = async {
        let req: IntrospectionRequest = parse_form(&headers, &body)?;
        let creds = extract_client_credentials(
            &headers,
            req.client_id.as_deref(),
            req.client_secret.as_deref(),
        )?;
        state
            .oauth
            .introspect(
                &creds,
                req.token.as_deref().unwrap_or_default(),
                req.token_type_hint.as_deref(),
                ip,
            )
            .await
    }
    .await;

    match result {
        Ok(response) => no_store(Json(response).into_response()),
        Err(e) => e.into_response(),
    }
}

/// Token revocation (RFC 7009)
#[utoipa::path(
    post,
    path = "/oauth/revoke",
    request_body(content = RevocationRequest, content_type = "application/x-www-form-urlencoded"),
    responses(
        (status = 200, description = "Token revoked, or it was unknown"),
        (status = 401, description = "invalid_client")
    ),
    tag = "OAuth"
)]
pub async fn revoke(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let result: Result<(), OAuthError> = async {
        let req: RevocationRequest = parse_form(&headers, &body)?;
        let creds = extract_client_credentials(
            &headers,
            req.client_id.as_deref(),
            req.client_secret.as_deref(),
        )?;
        state
            .oauth
            .revoke(&creds, req.token.as_deref().unwrap_or_default(), ip)
            .await
    }
    .await;

    match result {
        Ok(()) => no_store(StatusCode::OK.into_response()),
        Err(e) => e.into_response(),
    }
}
