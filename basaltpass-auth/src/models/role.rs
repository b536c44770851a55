//! RBAC tuples: permissions, roles and their join rows.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Permission {
    pub permission_id: Uuid,
    pub code: String,
    pub description: Option<String>,
}

impl Permission {
    pub fn new(code: &str, description: Option<&str>) -> Self {
        Self {
            permission_id: Uuid::new_v4(),
            code: code.to_string(),
            description: description.map(str::to_string),
        }
    }
}

/// Role scoped to one tenant, or global when `tenant_id` is `None`.
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct Role {
    pub role_id: Uuid,
    pub tenant_id: Option<Uuid>,
    pub code: String,
    pub name: String,
    pub created_utc: DateTime<Utc>,
}

impl Role {
    pub fn new(tenant_id: Option<Uuid>, code: &str, name: &str) -> Self {
        Self {
            role_id: Uuid::new_v4(),
            tenant_id,
            code: code.to_string(),
            name: name.to_string(),
            created_utc: Utc::now(),
        }
    }
}

/// Permission codes the console routes check.
pub mod permissions {
    pub const OAUTH_CLIENT_READ: &str = "oauth_client.read";
}
