//! App model - a tenant-owned application that OAuth clients belong to.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct App {
    pub app_id: Uuid,
    pub tenant_id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub status: String,
    pub created_utc: DateTime<Utc>,
}

impl App {
    pub fn new(tenant_id: Uuid, name: String, description: Option<String>) -> Self {
        Self {
            app_id: Uuid::new_v4(),
            tenant_id,
            name,
            description,
            status: "active".to_string(),
            created_utc: Utc::now(),
        }
    }
}
