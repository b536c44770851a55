use axum::{
    http::{header, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::services::keys::KeyError;
use crate::store::StoreError;

const SERVER_ERROR_DESCRIPTION: &str = "internal server error";

/// RFC 6749 / RFC 6750 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OAuthErrorCode {
    InvalidRequest,
    InvalidClient,
    InvalidGrant,
    UnauthorizedClient,
    UnsupportedGrantType,
    UnsupportedResponseType,
    InvalidScope,
    AccessDenied,
    ServerError,
    InvalidToken,
    InsufficientScope,
}

impl OAuthErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OAuthErrorCode::InvalidRequest => "invalid_request",
            OAuthErrorCode::InvalidClient => "invalid_client",
            OAuthErrorCode::InvalidGrant => "invalid_grant",
            OAuthErrorCode::UnauthorizedClient => "unauthorized_client",
            OAuthErrorCode::UnsupportedGrantType => "unsupported_grant_type",
            OAuthErrorCode::UnsupportedResponseType => "unsupported_response_type",
            OAuthErrorCode::InvalidScope => "invalid_scope",
            OAuthErrorCode::AccessDenied => "access_denied",
            OAuthErrorCode::ServerError => "server_error",
            OAuthErrorCode::InvalidToken => "invalid_token",
            OAuthErrorCode::InsufficientScope => "insufficient_scope",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            OAuthErrorCode::InvalidClient | OAuthErrorCode::InvalidToken => StatusCode::UNAUTHORIZED,
            OAuthErrorCode::InsufficientScope | OAuthErrorCode::AccessDenied => StatusCode::FORBIDDEN,
            OAuthErrorCode::ServerError => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Error)]
#[error("{}: {}", .code.as_str(), .description)]
pub struct OAuthError {
    pub code: OAuthErrorCode,
    pub description: String,
}

impl OAuthError {
    pub fn new(code: OAuthErrorCode, description: impl Into<String>) -> Self {
        Self {
            code,
            description: description.into(),
        }
    }

    pub fn invalid_request(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidRequest, description)
    }

    pub fn invalid_client(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidClient, description)
    }

    pub fn invalid_grant(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidGrant, description)
    }

    pub fn invalid_scope(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidScope, description)
    }

    pub fn invalid_token(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InvalidToken, description)
    }

    pub fn insufficient_scope(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::InsufficientScope, description)
    }

    pub fn access_denied(description: impl Into<String>) -> Self {
        Self::new(OAuthErrorCode::AccessDenied, description)
    }

    /// Internal details go to the log only.
    pub fn server_error() -> Self {
        Self::new(OAuthErrorCode::ServerError, SERVER_ERROR_DESCRIPTION)
    }

    /// Body shared by JSON errors and redirect query strings.
    pub fn body(&self) -> OAuthErrorBody<'_> {
        OAuthErrorBody {
            error: self.code.as_str(),
            error_description: &self.description,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct OAuthErrorBody<'a> {
    pub error: &'a str,
    pub error_description: &'a str,
}

impl From<StoreError> for OAuthError {
    fn from(err: StoreError) -> Self {
        tracing::error!(error = %err, "Store failure in OAuth flow");
        OAuthError::server_error()
    }
}

impl From<KeyError> for OAuthError {
    fn from(err: KeyError) -> Self {
        tracing::error!(error = %err, "Signing failure in OAuth flow");
        OAuthError::server_error()
    }
}

impl IntoResponse for OAuthError {
    fn into_response(self) -> Response {
        let challenge = match self.code {
            OAuthErrorCode::InvalidClient => Some(r#"Basic realm="basaltpass""#),
            OAuthErrorCode::InvalidToken => Some(r#"Bearer error="invalid_token""#),
            OAuthErrorCode::InsufficientScope => Some(r#"Bearer error="insufficient_scope""#),
            _ => None,
        };

        let mut response = (self.code.status(), Json(self.body())).into_response();
        let headers = response.headers_mut();
        if let Some(challenge) = challenge {
            headers.insert(header::WWW_AUTHENTICATE, HeaderValue::from_static(challenge));
        }
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(OAuthErrorCode::InvalidClient.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(OAuthErrorCode::InvalidGrant.status(), StatusCode::BAD_REQUEST);
        assert_eq!(OAuthErrorCode::AccessDenied.status(), StatusCode::FORBIDDEN);
        assert_eq!(OAuthErrorCode::InsufficientScope.status(), StatusCode::FORBIDDEN);
        assert_eq!(OAuthErrorCode::ServerError.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(OAuthErrorCode::UnsupportedGrantType.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_challenge_headers() {
        let res = OAuthError::invalid_client("bad secret").into_response();
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], r#"Basic realm="basaltpass""#);

        let res = OAuthError::invalid_token("revoked").into_response();
        assert_eq!(res.headers()[header::WWW_AUTHENTICATE], r#"Bearer error="invalid_token""#);

        let res = OAuthError::invalid_grant("used").into_response();
        assert!(res.headers().get(header::WWW_AUTHENTICATE).is_none());
    }

    #[tokio::test]
    async fn test_store_failure_hides_details() {
        let err: OAuthError = StoreError::Backend(anyhow::anyhow!("password authentication failed")).into();
        let res = err.into_response();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"], "server_error");
        assert_eq!(body["error_description"], "internal server error");
    }
}
