use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::services::console_token::ConsoleScope;

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "password123", min_length = 8)]
    pub password: String,

    #[validate(length(min = 3, max = 32, message = "Phone must be 3 to 32 characters"))]
    #[schema(example = "+15550100")]
    pub phone: Option<String>,

    #[validate(length(max = 64, message = "Nickname must be at most 64 characters"))]
    #[schema(example = "ada")]
    pub nickname: Option<String>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct RegisterResponse {
    #[schema(example = "550e8400-e29b-41d4-a716-446655440000")]
    pub user_id: Uuid,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Email address or phone number.
    #[validate(length(min = 1, message = "Identifier is required"))]
    #[schema(example = "user@example.com")]
    pub identifier: String,

    #[validate(length(min = 1, message = "Password is required"))]
    #[schema(example = "password123")]
    pub password: String,
}

/// Console access/refresh pair.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ConsoleTokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 900)]
    pub expires_in: i64,
    pub scope: ConsoleScope,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<Uuid>,
}

/// Either a 2FA challenge or a finished login.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub need_2fa: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    #[schema(example = "email")]
    pub two_fa_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub challenge_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<i64>,
}

impl LoginResponse {
    pub fn challenge(challenge_id: Uuid) -> Self {
        Self {
            need_2fa: true,
            two_fa_type: Some("email".to_string()),
            challenge_id: Some(challenge_id),
            access_token: None,
            refresh_token: None,
            token_type: None,
            expires_in: None,
        }
    }

    pub fn tokens(tokens: ConsoleTokenResponse) -> Self {
        Self {
            need_2fa: false,
            two_fa_type: None,
            challenge_id: None,
            access_token: Some(tokens.access_token),
            refresh_token: Some(tokens.refresh_token),
            token_type: Some(tokens.token_type),
            expires_in: Some(tokens.expires_in),
        }
    }
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyTwoFactorRequest {
    pub challenge_id: Uuid,

    #[validate(length(equal = 6, message = "Code must be 6 digits"))]
    #[schema(example = "123456")]
    pub code: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    #[schema(example = "bp_cr_...")]
    pub refresh_token: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetRequest {
    #[validate(email(message = "Invalid email format"))]
    #[schema(example = "user@example.com")]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct PasswordResetConfirm {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    #[schema(example = "newpassword123", min_length = 8)]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct VerifyEmailRequest {
    #[validate(length(min = 1, message = "Token is required"))]
    pub token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MessageResponse {
    #[schema(example = "Email verified")]
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsoleAuthorizeRequest {
    pub target: ConsoleScope,
    pub tenant_id: Option<Uuid>,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct ConsoleCodeResponse {
    pub code: String,
    #[schema(example = 30)]
    pub expires_in: i64,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct ConsoleExchangeRequest {
    #[validate(length(min = 1, message = "Code is required"))]
    pub code: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_response_shapes() {
        let json = serde_json::to_value(LoginResponse::challenge(Uuid::nil())).unwrap();
        assert_eq!(json["need_2fa"], true);
        assert_eq!(json["two_fa_type"], "email");
        assert!(json.get("access_token").is_none());

        let json = serde_json::to_value(LoginResponse::tokens(ConsoleTokenResponse {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            token_type: "Bearer".to_string(),
            expires_in: 900,
            scope: ConsoleScope::User,
            tenant_id: None,
        }))
        .unwrap();
        assert_eq!(json["need_2fa"], false);
        assert_eq!(json["access_token"], "a");
        assert!(json.get("challenge_id").is_none());
    }

    #[test]
    fn test_register_validation() {
        let req = RegisterRequest {
            email: "not-an-email".to_string(),
            password: "short".to_string(),
            phone: None,
            nickname: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("email"));
        assert!(errors.field_errors().contains_key("password"));
    }
}
