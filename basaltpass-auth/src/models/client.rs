//! OAuth client model.

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::FromRow;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::utils::scope;

/// OAuth client. Its tenant is derived through `app_id -> apps.tenant_id`.
#[derive(Debug, Clone, FromRow)]
pub struct OAuthClient {
    pub client_pk: Uuid,
    pub client_id: String,
    pub client_secret_hash: String,
    pub app_id: Uuid,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub is_active: bool,
    pub created_by: Option<Uuid>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl OAuthClient {
    /// Exact string match, including scheme, host, port, path and query.
    pub fn has_redirect_uri(&self, redirect_uri: &str) -> bool {
        self.redirect_uris.iter().any(|uri| uri == redirect_uri)
    }

    pub fn allows_scopes(&self, requested: &[String]) -> bool {
        scope::is_subset(requested, &self.scopes)
    }

    /// Registered service scopes; a client needs at least one for `client_credentials`.
    pub fn s2s_scopes(&self) -> Vec<String> {
        self.scopes
            .iter()
            .filter(|s| scope::is_s2s(s))
            .cloned()
            .collect()
    }

    pub fn summary(&self) -> ClientSummary {
        ClientSummary::from(self)
    }
}

/// Client view for console responses. Never carries the secret hash.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ClientSummary {
    pub client_id: String,
    pub app_id: Uuid,
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub allowed_origins: Vec<String>,
    pub is_active: bool,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl From<&OAuthClient> for ClientSummary {
    fn from(c: &OAuthClient) -> Self {
        Self {
            client_id: c.client_id.clone(),
            app_id: c.app_id,
            name: c.name.clone(),
            redirect_uris: c.redirect_uris.clone(),
            scopes: c.scopes.clone(),
            allowed_origins: c.allowed_origins.clone(),
            is_active: c.is_active,
            last_used_utc: c.last_used_utc,
            created_utc: c.created_utc,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(uris: &[&str]) -> OAuthClient {
        let now = Utc::now();
        OAuthClient {
            client_pk: Uuid::new_v4(),
            client_id: "bp_client_test".to_string(),
            client_secret_hash: String::new(),
            app_id: Uuid::new_v4(),
            name: "test".to_string(),
            redirect_uris: uris.iter().map(|s| s.to_string()).collect(),
            scopes: vec!["openid".to_string(), "s2s.user.read".to_string()],
            allowed_origins: vec![],
            is_active: true,
            created_by: None,
            last_used_utc: None,
            created_utc: now,
            updated_utc: now,
        }
    }

    #[test]
    fn test_redirect_uri_exact_match() {
        let c = client(&["https://a/b"]);
        assert!(c.has_redirect_uri("https://a/b"));
        assert!(!c.has_redirect_uri("https://a/b/"));
        assert!(!c.has_redirect_uri("https://a/b?x=1"));
        assert!(!c.has_redirect_uri("HTTPS://A/B"));
        assert!(!c.has_redirect_uri("https://a/B"));
    }

    #[test]
    fn test_s2s_scopes() {
        let c = client(&[]);
        assert_eq!(c.s2s_scopes(), vec!["s2s.user.read".to_string()]);
    }
}
