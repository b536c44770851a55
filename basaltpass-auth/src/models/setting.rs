//! Key/value runtime settings and their typed views.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use utoipa::ToSchema;

pub const MAINTENANCE_KEY: &str = "maintenance.enabled";

#[derive(Debug, Clone, FromRow)]
pub struct Setting {
    pub key: String,
    pub value: serde_json::Value,
    pub updated_utc: DateTime<Utc>,
}

impl Setting {
    pub fn new(key: &str, value: serde_json::Value) -> Self {
        Self {
            key: key.to_string(),
            value,
            updated_utc: Utc::now(),
        }
    }
}

/// Maintenance mode, parsed once from the stored JSON value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct MaintenanceSetting {
    pub enabled: bool,
}

impl MaintenanceSetting {
    /// Anything other than JSON `true` (or the string "true") means off.
    pub fn from_setting(setting: Option<&Setting>) -> Self {
        let enabled = match setting.map(|s| &s.value) {
            Some(serde_json::Value::Bool(b)) => *b,
            Some(serde_json::Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Self { enabled }
    }

    pub fn to_setting(self) -> Setting {
        Setting::new(MAINTENANCE_KEY, serde_json::Value::Bool(self.enabled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_maintenance_parsing() {
        assert!(!MaintenanceSetting::from_setting(None).enabled);
        let on = Setting::new(MAINTENANCE_KEY, serde_json::json!(true));
        assert!(MaintenanceSetting::from_setting(Some(&on)).enabled);
        let text = Setting::new(MAINTENANCE_KEY, serde_json::json!("TRUE"));
        assert!(MaintenanceSetting::from_setting(Some(&text)).enabled);
        let junk = Setting::new(MAINTENANCE_KEY, serde_json::json!({"enabled": true}));
        assert!(!MaintenanceSetting::from_setting(Some(&junk)).enabled);
    }
}
