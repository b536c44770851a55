use crate::AppState;
use service_core::axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    Json,
};

/// OpenID Provider metadata
#[utoipa::path(
    get,
    path = "/.well-known/openid-configuration",
    responses(
        (status = 200, description = "Discovery document")
    ),
    tag = "Well-Known"
)]
pub async fn openid_configuration(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let issuer = state.oauth.issuer(&headers);
    (
        [(header::CACHE_CONTROL, "public, max-age=3600")],
        Json(state.oauth.discovery(&issuer)),
    )
}

/// Get JSON Web Key Set (JWKS)
///
/// Active and retiring keys, so tokens signed before a rotation keep verifying.
#[utoipa::path(
    get,
    path = "/oauth/jwks",
    responses(
        (status = 200, description = "Public JWKS returned")
    ),
    tag = "Well-Known"
)]
pub async fn jwks(State(state): State<AppState>) -> impl IntoResponse {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::CACHE_CONTROL, "public, max-age=3600"),
        ],
        Json(state.keys.jwks()),
    )
}
