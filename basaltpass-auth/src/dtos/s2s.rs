use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct S2sHealth {
    pub status: &'static str,
}

/// The calling client, its app and its tenant.
#[derive(Debug, Serialize)]
pub struct S2sIdentity {
    pub client_id: String,
    pub client_name: String,
    pub app_id: Uuid,
    pub app_name: String,
    pub tenant_id: Uuid,
    pub tenant_code: String,
    pub scopes: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct LookupQuery {
    pub email: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct S2sRole {
    pub role_id: Uuid,
    pub code: String,
    pub name: String,
}

#[derive(Debug, Serialize)]
pub struct S2sRoleCodes {
    pub user_id: Uuid,
    pub role_codes: Vec<String>,
}

#[derive(Debug, Serialize)]
pub struct S2sPermissions {
    pub user_id: Uuid,
    pub permission_codes: Vec<String>,
}
