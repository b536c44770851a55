//! Recorded user consent for a client.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::scope;

#[derive(Debug, Clone, FromRow)]
pub struct Consent {
    pub user_id: Uuid,
    pub client_id: String,
    pub scopes: Vec<String>,
    pub granted_utc: DateTime<Utc>,
}

impl Consent {
    pub fn new(user_id: Uuid, client_id: String, scopes: Vec<String>) -> Self {
        Self {
            user_id,
            client_id,
            scopes,
            granted_utc: Utc::now(),
        }
    }

    /// Whether this consent already covers `requested`.
    pub fn covers(&self, requested: &[String]) -> bool {
        scope::is_subset(requested, &self.scopes)
    }
}
