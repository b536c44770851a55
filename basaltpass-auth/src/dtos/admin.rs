use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::models::TenantStatus;

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceBody {
    pub enabled: bool,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RotateKeyResponse {
    /// Thumbprint of the new active signing key.
    #[schema(example = "NzbLsXh8uDCcd-6MNwXF4W_7noWXFZAfHkxZsRGC9Xs")]
    pub kid: String,
}

#[derive(Debug, Deserialize, ToSchema)]
pub struct TenantStatusRequest {
    pub status: TenantStatus,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct TenantStatusResponse {
    pub tenant_id: Uuid,
    pub status: TenantStatus,
}
