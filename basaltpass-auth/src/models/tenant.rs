//! Tenant model - top-level isolation boundary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

/// Tenant lifecycle: `active <-> suspended`, `* -> deleted` (terminal, soft delete).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum TenantStatus {
    Active,
    Suspended,
    Deleted,
}

impl TenantStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TenantStatus::Active => "active",
            TenantStatus::Suspended => "suspended",
            TenantStatus::Deleted => "deleted",
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    pub fn can_transition_to(&self, next: TenantStatus) -> bool {
        !matches!(self, TenantStatus::Deleted) && *self != next
    }
}

impl std::str::FromStr for TenantStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(TenantStatus::Active),
            "suspended" => Ok(TenantStatus::Suspended),
            "deleted" => Ok(TenantStatus::Deleted),
            _ => Err(format!("Invalid tenant status: {}", s)),
        }
    }
}

/// Tenant entity.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, ToSchema)]
pub struct Tenant {
    pub tenant_id: Uuid,
    pub code: String,
    pub name: String,
    pub status: String,
    pub plan: String,
    #[schema(value_type = Object)]
    pub metadata: serde_json::Value,
    pub created_utc: DateTime<Utc>,
}

impl Tenant {
    /// Create a new active tenant on the default plan.
    pub fn new(code: String, name: String) -> Self {
        Self {
            tenant_id: Uuid::new_v4(),
            code,
            name,
            status: TenantStatus::Active.as_str().to_string(),
            plan: "default".to_string(),
            metadata: serde_json::json!({}),
            created_utc: Utc::now(),
        }
    }

    pub fn status(&self) -> Option<TenantStatus> {
        self.status.parse().ok()
    }

    /// Only active tenants may authenticate users or mint tokens.
    pub fn is_active(&self) -> bool {
        self.status() == Some(TenantStatus::Active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_tenant_is_active() {
        let tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        assert!(tenant.is_active());
        assert_eq!(tenant.status(), Some(TenantStatus::Active));
    }

    #[test]
    fn test_deleted_is_terminal() {
        assert!(TenantStatus::Active.can_transition_to(TenantStatus::Suspended));
        assert!(TenantStatus::Suspended.can_transition_to(TenantStatus::Active));
        assert!(TenantStatus::Suspended.can_transition_to(TenantStatus::Deleted));
        assert!(!TenantStatus::Deleted.can_transition_to(TenantStatus::Active));
        assert!(!TenantStatus::Active.can_transition_to(TenantStatus::Active));
    }

    #[test]
    fn test_unknown_status_is_not_active() {
        let mut tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        tenant.status = "archived".to_string();
        assert!(!tenant.is_active());
    }
}
