use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::models::{App, ClientSummary, TenantRole};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateAppRequest {
    #[validate(length(min = 1, max = 128, message = "App name must be 1 to 128 characters"))]
    #[schema(example = "Storefront")]
    pub name: String,

    #[validate(length(max = 512, message = "Description must be at most 512 characters"))]
    pub description: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct AppResponse {
    pub app: App,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct CreateClientRequest {
    #[validate(length(min = 1, max = 128, message = "Client name must be 1 to 128 characters"))]
    #[schema(example = "Storefront web")]
    pub name: String,

    #[schema(example = json!(["https://shop.example.com/callback"]))]
    #[serde(default)]
    pub redirect_uris: Vec<String>,

    /// Defaults to `openid profile email` when empty.
    #[schema(example = json!(["openid", "profile", "email"]))]
    #[serde(default)]
    pub scopes: Vec<String>,

    #[serde(default)]
    pub allowed_origins: Vec<String>,
}

/// Returned on creation and on secret regeneration. The plaintext secret is
/// never retrievable afterwards.
#[derive(Debug, Serialize, ToSchema)]
pub struct ClientSecretResponse {
    pub client: ClientSummary,
    #[schema(example = "kq3V0m7pQk8...")]
    pub client_secret: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ClientListResponse {
    pub clients: Vec<ClientSummary>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RevokedTokensResponse {
    pub client_id: String,
    pub tokens_revoked: u64,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct ChangeRoleRequest {
    pub role: TenantRole,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MemberResponse {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: TenantRole,
}
