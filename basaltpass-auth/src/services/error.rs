use service_core::error::AppError;
use thiserror::Error;

use crate::store::StoreError;

/// Failures of the console session and tenant-management flows.
///
/// OAuth protocol endpoints use [`super::oauth::OAuthError`] instead.
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("User is banned")]
    UserBanned,

    #[error("Email already registered")]
    EmailAlreadyRegistered,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Invalid or expired code")]
    InvalidCode,

    #[error("No tenant membership")]
    NoMembership,

    #[error("Tenant is not active")]
    TenantInactive,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Email error: {0}")]
    EmailError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Store(e) => e.into(),
            ServiceError::Internal(e) => AppError::InternalError(e),
            ServiceError::InvalidCredentials => {
                AppError::AuthError(anyhow::anyhow!("Invalid credentials"))
            }
            ServiceError::UserBanned => AppError::Forbidden(anyhow::anyhow!("User is banned")),
            ServiceError::EmailAlreadyRegistered => {
                AppError::Conflict(anyhow::anyhow!("Email already registered"))
            }
            ServiceError::InvalidToken => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired token"))
            }
            ServiceError::InvalidCode => {
                AppError::Unauthorized(anyhow::anyhow!("Invalid or expired code"))
            }
            ServiceError::NoMembership => {
                AppError::Unauthorized(anyhow::anyhow!("No tenant membership"))
            }
            ServiceError::TenantInactive => {
                AppError::Forbidden(anyhow::anyhow!("Tenant is not active"))
            }
            ServiceError::Forbidden(msg) => AppError::Forbidden(anyhow::anyhow!(msg)),
            ServiceError::NotFound(what) => AppError::NotFound(anyhow::anyhow!("{} not found", what)),
            ServiceError::Conflict(msg) => AppError::Conflict(anyhow::anyhow!(msg)),
            ServiceError::EmailError(e) => AppError::EmailError(e),
            ServiceError::ValidationError(e) => AppError::BadRequest(anyhow::anyhow!(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{http::StatusCode, response::IntoResponse};

    #[test]
    fn test_status_mapping() {
        let cases = [
            (ServiceError::InvalidCredentials, StatusCode::UNAUTHORIZED),
            (ServiceError::UserBanned, StatusCode::FORBIDDEN),
            (ServiceError::EmailAlreadyRegistered, StatusCode::CONFLICT),
            (ServiceError::NoMembership, StatusCode::UNAUTHORIZED),
            (ServiceError::TenantInactive, StatusCode::FORBIDDEN),
            (ServiceError::NotFound("client"), StatusCode::NOT_FOUND),
            (
                ServiceError::Store(StoreError::Backend(anyhow::anyhow!("connection reset"))),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(AppError::from(err).into_response().status(), status);
        }
    }
}
