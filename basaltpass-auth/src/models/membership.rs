//! Tenant membership model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Role a user holds inside one tenant, ordered `owner > admin > member > user`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TenantRole {
    Owner,
    Admin,
    Member,
    User,
}

impl TenantRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantRole::Owner => "owner",
            TenantRole::Admin => "admin",
            TenantRole::Member => "member",
            TenantRole::User => "user",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            TenantRole::Owner => 3,
            TenantRole::Admin => 2,
            TenantRole::Member => 1,
            TenantRole::User => 0,
        }
    }

    /// Whether this role meets the `minimum` threshold.
    pub fn satisfies(&self, minimum: TenantRole) -> bool {
        self.rank() >= minimum.rank()
    }

    /// Owners and admins implicitly hold every tenant permission.
    pub fn is_tenant_admin(&self) -> bool {
        self.satisfies(TenantRole::Admin)
    }
}

impl std::str::FromStr for TenantRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "owner" => Ok(TenantRole::Owner),
            "admin" => Ok(TenantRole::Admin),
            "member" => Ok(TenantRole::Member),
            "user" => Ok(TenantRole::User),
            _ => Err(format!("Invalid tenant role: {}", s)),
        }
    }
}

/// Membership row, unique on (user, tenant).
#[derive(Debug, Clone, Serialize, FromRow, ToSchema)]
pub struct TenantUser {
    pub user_id: Uuid,
    pub tenant_id: Uuid,
    pub role: String,
    pub created_utc: DateTime<Utc>,
}

impl TenantUser {
    pub fn new(user_id: Uuid, tenant_id: Uuid, role: TenantRole) -> Self {
        Self {
            user_id,
            tenant_id,
            role: role.as_str().to_string(),
            created_utc: Utc::now(),
        }
    }

    /// Unknown role strings degrade to the weakest role.
    pub fn role(&self) -> TenantRole {
        self.role.parse().unwrap_or(TenantRole::User)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_ordering() {
        assert!(TenantRole::Owner.satisfies(TenantRole::Admin));
        assert!(TenantRole::Admin.satisfies(TenantRole::Member));
        assert!(TenantRole::Member.satisfies(TenantRole::Member));
        assert!(!TenantRole::User.satisfies(TenantRole::Member));
        assert!(!TenantRole::Admin.satisfies(TenantRole::Owner));
    }

    #[test]
    fn test_unknown_role_degrades() {
        let mut m = TenantUser::new(Uuid::new_v4(), Uuid::new_v4(), TenantRole::Admin);
        m.role = "superuser".to_string();
        assert_eq!(m.role(), TenantRole::User);
    }
}
