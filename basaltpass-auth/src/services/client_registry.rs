//! OAuth client records and client authentication.

use std::sync::Arc;

use axum::http::{header, HeaderMap};
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::Utc;
use uuid::Uuid;

use super::audit::AuditService;
use super::oauth::OAuthError;
use super::ServiceError;
use crate::models::{App, AuditAction, AuditLog, OAuthClient, Tenant};
use crate::store::Store;
use crate::utils::{
    hash_password,
    password::verify_or_burn,
    scope,
    token::{generate_client_id, generate_client_secret},
    Password,
};

/// Raw credentials as presented by the caller.
#[derive(Clone)]
pub struct ClientCredentials {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for ClientCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientCredentials")
            .field("client_id", &self.client_id)
            .finish_non_exhaustive()
    }
}

/// A client whose secret verified, together with its owning app and tenant.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub client: OAuthClient,
    pub app: Option<App>,
    pub tenant: Option<Tenant>,
}

impl ClientIdentity {
    /// Active client, existing app, active tenant.
    pub fn is_usable(&self) -> bool {
        self.client.is_active && self.app.is_some() && self.tenant.as_ref().is_some_and(Tenant::is_active)
    }
}

/// A client that may obtain tokens right now.
#[derive(Debug, Clone)]
pub struct AuthenticatedClient {
    pub client: OAuthClient,
    pub app: App,
    pub tenant: Tenant,
}

impl AuthenticatedClient {
    pub fn client_id(&self) -> &str {
        &self.client.client_id
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewClient {
    pub name: String,
    pub redirect_uris: Vec<String>,
    pub scopes: Vec<String>,
    pub allowed_origins: Vec<String>,
}

/// Splits an `Authorization: Basic` value. `Ok(None)` for any other scheme.
pub fn parse_basic_authorization(value: &str) -> Result<Option<ClientCredentials>, OAuthError> {
    let Some((scheme, encoded)) = value.trim().split_once(' ') else {
        return Ok(None);
    };
    if !scheme.eq_ignore_ascii_case("basic") {
        return Ok(None);
    }

    let malformed = || OAuthError::invalid_client("malformed basic authorization header");
    let decoded = STANDARD.decode(encoded.trim()).map_err(|_| malformed())?;
    let decoded = String::from_utf8(decoded).map_err(|_| malformed())?;
    let (id, secret) = decoded.split_once(':').ok_or_else(malformed)?;

    // RFC 6749 2.3.1: both halves are form-urlencoded before base64.
    let client_id = urlencoding::decode(id).map_err(|_| malformed())?.into_owned();
    let client_secret = urlencoding::decode(secret).map_err(|_| malformed())?.into_owned();
    if client_id.is_empty() {
        return Err(malformed());
    }

    Ok(Some(ClientCredentials {
        client_id,
        client_secret,
    }))
}

/// Client credentials for the token, introspection and revocation endpoints:
/// HTTP Basic first, then `client_id`/`client_secret` form fields.
pub fn extract_client_credentials(
    headers: &HeaderMap,
    form_client_id: Option<&str>,
    form_client_secret: Option<&str>,
) -> Result<ClientCredentials, OAuthError> {
    let basic = match headers.get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| OAuthError::invalid_client("malformed authorization header"))?;
            parse_basic_authorization(value)?
        }
        None => None,
    };

    let form_client_id = form_client_id.filter(|s| !s.is_empty());
    let form_client_secret = form_client_secret.filter(|s| !s.is_empty());

    if let Some(creds) = basic {
        if form_client_secret.is_some() {
            return Err(OAuthError::invalid_request(
                "client credentials supplied in both header and body",
            ));
        }
        if form_client_id.is_some_and(|id| id != creds.client_id) {
            return Err(OAuthError::invalid_request("client_id does not match authorization header"));
        }
        return Ok(creds);
    }

    match (form_client_id, form_client_secret) {
        (Some(id), Some(secret)) => Ok(ClientCredentials {
            client_id: id.to_string(),
            client_secret: secret.to_string(),
        }),
        _ => Err(OAuthError::invalid_client("client authentication required")),
    }
}

pub struct ClientRegistry {
    store: Arc<dyn Store>,
    audit: AuditService,
}

impl ClientRegistry {
    pub fn new(store: Arc<dyn Store>, audit: AuditService) -> Self {
        Self { store, audit }
    }

    // ==================== Console Operations ====================

    pub async fn create_app(
        &self,
        tenant_id: Uuid,
        name: String,
        description: Option<String>,
        actor: Uuid,
    ) -> Result<App, ServiceError> {
        let app = App::new(tenant_id, name, description);
        self.store.insert_app(&app).await?;

        self.audit
            .record(
                AuditLog::new(AuditAction::AppCreated, "app")
                    .user(actor)
                    .resource(app.app_id)
                    .data(serde_json::json!({ "tenant_id": tenant_id })),
            )
            .await;

        Ok(app)
    }

    /// Registers a client under `app_id`. The plaintext secret is returned
    /// here and never again.
    #[tracing::instrument(skip(self, new), fields(name = %new.name))]
    pub async fn create(
        &self,
        tenant_id: Uuid,
        app_id: Uuid,
        new: NewClient,
        actor: Uuid,
    ) -> Result<(OAuthClient, String), ServiceError> {
        let app = self
            .store
            .find_app(app_id)
            .await?
            .filter(|a| a.tenant_id == tenant_id)
            .ok_or(ServiceError::NotFound("App"))?;

        let scopes = if new.scopes.is_empty() {
            scope::DEFAULT_CLIENT_SCOPES.iter().map(|s| s.to_string()).collect()
        } else {
            let mut deduped: Vec<String> = Vec::new();
            for s in new.scopes {
                if !scope::is_known(&s) {
                    return Err(ServiceError::ValidationError(format!("Unknown scope: {}", s)));
                }
                if !deduped.contains(&s) {
                    deduped.push(s);
                }
            }
            deduped
        };

        if let Some(bad) = new.redirect_uris.iter().find(|u| !is_valid_redirect_uri(u)) {
            return Err(ServiceError::ValidationError(format!(
                "Invalid redirect URI: {}",
                bad
            )));
        }

        let secret = generate_client_secret();
        let secret_hash = hash_password(&Password::new(secret.clone()))?;

        let now = Utc::now();
        let client = OAuthClient {
            client_pk: Uuid::new_v4(),
            client_id: generate_client_id(),
            client_secret_hash: secret_hash.into_string(),
            app_id: app.app_id,
            name: new.name,
            redirect_uris: new.redirect_uris,
            scopes,
            allowed_origins: new.allowed_origins,
            is_active: true,
            created_by: Some(actor),
            last_used_utc: None,
            created_utc: now,
            updated_utc: now,
        };
        self.store.insert_client(&client).await?;

        tracing::info!(client_id = %client.client_id, app_id = %app.app_id, "OAuth client created");
        self.audit
            .record(
                AuditLog::new(AuditAction::ClientCreated, "oauth_client")
                    .user(actor)
                    .resource(&client.client_id)
                    .data(serde_json::json!({ "app_id": app.app_id, "scopes": client.scopes })),
            )
            .await;

        Ok((client, secret))
    }

    pub async fn list(&self, tenant_id: Uuid) -> Result<Vec<OAuthClient>, ServiceError> {
        Ok(self.store.list_clients_for_tenant(tenant_id).await?)
    }

    /// The client, if it belongs to `tenant_id`. Clients of other tenants are reported missing.
    async fn find_in_tenant(&self, tenant_id: Uuid, client_id: &str) -> Result<OAuthClient, ServiceError> {
        let client = self
            .store
            .find_client(client_id)
            .await?
            .ok_or(ServiceError::NotFound("Client"))?;
        let app = self.store.find_app(client.app_id).await?;
        match app {
            Some(app) if app.tenant_id == tenant_id => Ok(client),
            _ => Err(ServiceError::NotFound("Client")),
        }
    }

    /// Writes a new secret hash and revokes every outstanding token of the client.
    #[tracing::instrument(skip(self))]
    pub async fn regenerate_secret(
        &self,
        tenant_id: Uuid,
        client_id: &str,
        actor: Uuid,
    ) -> Result<(OAuthClient, String), ServiceError> {
        let mut client = self.find_in_tenant(tenant_id, client_id).await?;

        let secret = generate_client_secret();
        let secret_hash = hash_password(&Password::new(secret.clone()))?.into_string();
        let revoked = self
            .store
            .regenerate_client_secret(client_id, &secret_hash)
            .await?;
        client.client_secret_hash = secret_hash;

        tracing::info!(client_id = %client_id, revoked, "Client secret regenerated");
        self.audit
            .record(
                AuditLog::new(AuditAction::ClientSecretRegenerated, "oauth_client")
                    .user(actor)
                    .resource(client_id)
                    .data(serde_json::json!({ "tokens_revoked": revoked })),
            )
            .await;

        Ok((client, secret))
    }

    #[tracing::instrument(skip(self))]
    pub async fn revoke_all(&self, tenant_id: Uuid, client_id: &str, actor: Uuid) -> Result<u64, ServiceError> {
        self.find_in_tenant(tenant_id, client_id).await?;
        let revoked = self.store.revoke_all_client_tokens(client_id).await?;

        self.audit
            .record(
                AuditLog::new(AuditAction::ClientTokensRevoked, "oauth_client")
                    .user(actor)
                    .resource(client_id)
                    .data(serde_json::json!({ "tokens_revoked": revoked })),
            )
            .await;

        Ok(revoked)
    }

    // ==================== Authentication ====================

    /// Checks the secret only. Used where an inactive client must still get
    /// a well-formed answer (introspection, revocation).
    pub async fn verify(
        &self,
        creds: &ClientCredentials,
        ip: Option<String>,
    ) -> Result<ClientIdentity, OAuthError> {
        let client = self.store.find_client(&creds.client_id).await?;
        let presented = Password::new(creds.client_secret.clone());
        if !verify_or_burn(&presented, client.as_ref().map(|c| c.client_secret_hash.as_str())) {
            let reason = if client.is_some() { "bad secret" } else { "unknown client" };
            self.auth_failed(&creds.client_id, reason, ip).await;
            return Err(OAuthError::invalid_client("client authentication failed"));
        }
        let Some(client) = client else {
            return Err(OAuthError::invalid_client("client authentication failed"));
        };

        let app = self.store.find_app(client.app_id).await?;
        let tenant = match &app {
            Some(app) => self.store.find_tenant(app.tenant_id).await?,
            None => None,
        };

        Ok(ClientIdentity { client, app, tenant })
    }

    /// Full authentication: secret, client active, app present, tenant active.
    pub async fn authenticate(
        &self,
        creds: &ClientCredentials,
        ip: Option<String>,
    ) -> Result<AuthenticatedClient, OAuthError> {
        let identity = self.verify(creds, ip.clone()).await?;
        match identity {
            ClientIdentity {
                client,
                app: Some(app),
                tenant: Some(tenant),
            } if client.is_active && tenant.is_active() => Ok(AuthenticatedClient { client, app, tenant }),
            _ => {
                self.auth_failed(&creds.client_id, "client or tenant inactive", ip).await;
                Err(OAuthError::invalid_client("client is not active"))
            }
        }
    }

    pub async fn mark_used(&self, client_id: &str) {
        if let Err(e) = self.store.touch_client(client_id, Utc::now()).await {
            tracing::warn!(error = %e, client_id = %client_id, "Failed to update client last_used");
        }
    }

    async fn auth_failed(&self, client_id: &str, reason: &str, ip: Option<String>) {
        tracing::warn!(client_id = %client_id, reason, "Client authentication failed");
        self.audit
            .record(
                AuditLog::new(AuditAction::ClientAuthFailed, "oauth_client")
                    .resource(client_id)
                    .ip(ip)
                    .data(serde_json::json!({ "reason": reason })),
            )
            .await;
    }
}

/// Absolute URI with a scheme and no fragment.
fn is_valid_redirect_uri(uri: &str) -> bool {
    match uri.split_once("://") {
        Some((scheme, rest)) => {
            !scheme.is_empty()
                && scheme
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
                && !rest.is_empty()
                && !uri.contains('#')
                && !uri.chars().any(char::is_whitespace)
        }
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TenantStatus;
    use crate::services::oauth::OAuthErrorCode;
    use crate::store::MemoryStore;
    use axum::http::HeaderValue;

    fn basic(id: &str, secret: &str) -> String {
        format!("Basic {}", STANDARD.encode(format!("{}:{}", id, secret)))
    }

    #[test]
    fn test_parse_basic() {
        let creds = parse_basic_authorization(&basic("c1", "s3cret")).unwrap().unwrap();
        assert_eq!(creds.client_id, "c1");
        assert_eq!(creds.client_secret, "s3cret");

        // Percent-encoded halves are decoded.
        let creds = parse_basic_authorization(&basic("c%3A1", "a%2Bb")).unwrap().unwrap();
        assert_eq!(creds.client_id, "c:1");
        assert_eq!(creds.client_secret, "a+b");

        assert!(parse_basic_authorization("Bearer abc").unwrap().is_none());
        assert!(parse_basic_authorization("Basic !!!").is_err());
        assert!(parse_basic_authorization(&format!("Basic {}", STANDARD.encode("nocolon"))).is_err());
    }

    #[test]
    fn test_extraction_order() {
        let mut headers = HeaderMap::new();
        let creds = extract_client_credentials(&headers, Some("c1"), Some("s1")).unwrap();
        assert_eq!(creds.client_id, "c1");

        headers.insert(header::AUTHORIZATION, HeaderValue::from_str(&basic("c2", "s2")).unwrap());
        let creds = extract_client_credentials(&headers, Some("c2"), None).unwrap();
        assert_eq!(creds.client_id, "c2");

        let both = extract_client_credentials(&headers, Some("c2"), Some("s2")).unwrap_err();
        assert_eq!(both.code, OAuthErrorCode::InvalidRequest);

        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic %%%"));
        let malformed = extract_client_credentials(&headers, Some("c1"), Some("s1")).unwrap_err();
        assert_eq!(malformed.code, OAuthErrorCode::InvalidClient);

        let missing = extract_client_credentials(&HeaderMap::new(), Some("c1"), None).unwrap_err();
        assert_eq!(missing.code, OAuthErrorCode::InvalidClient);
    }

    #[test]
    fn test_redirect_uri_validation() {
        assert!(is_valid_redirect_uri("https://app/cb"));
        assert!(is_valid_redirect_uri("com.example.app://callback"));
        assert!(!is_valid_redirect_uri("/relative"));
        assert!(!is_valid_redirect_uri("https://app/cb#frag"));
        assert!(!is_valid_redirect_uri("https://"));
    }

    async fn registry() -> (Arc<MemoryStore>, ClientRegistry, Tenant, App) {
        let store = Arc::new(MemoryStore::new());
        let registry = ClientRegistry::new(store.clone(), AuditService::new(store.clone()));
        let tenant = Tenant::new("acme".to_string(), "Acme".to_string());
        store.insert_tenant(&tenant).await.unwrap();
        let app = registry
            .create_app(tenant.tenant_id, "Portal".to_string(), None, Uuid::new_v4())
            .await
            .unwrap();
        (store, registry, tenant, app)
    }

    fn new_client(scopes: &[&str]) -> NewClient {
        NewClient {
            name: "portal".to_string(),
            redirect_uris: vec!["https://app/cb".to_string()],
            scopes: scopes.iter().map(|s| s.to_string()).collect(),
            allowed_origins: vec![],
        }
    }

    #[tokio::test]
    async fn test_create_and_authenticate() {
        let (_, registry, tenant, app) = registry().await;
        let (client, secret) = registry
            .create(tenant.tenant_id, app.app_id, new_client(&[]), Uuid::new_v4())
            .await
            .unwrap();
        assert_eq!(client.scopes, vec!["openid", "profile", "email"]);
        assert_ne!(client.client_secret_hash, secret);

        let creds = ClientCredentials {
            client_id: client.client_id.clone(),
            client_secret: secret,
        };
        let authed = registry.authenticate(&creds, None).await.unwrap();
        assert_eq!(authed.tenant.tenant_id, tenant.tenant_id);

        let wrong = ClientCredentials {
            client_id: client.client_id,
            client_secret: "nope".to_string(),
        };
        assert!(registry.authenticate(&wrong, None).await.is_err());
    }

    #[tokio::test]
    async fn test_unknown_scope_rejected() {
        let (_, registry, tenant, app) = registry().await;
        let err = registry
            .create(tenant.tenant_id, app.app_id, new_client(&["openid", "admin"]), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn test_app_of_other_tenant_is_not_found() {
        let (_, registry, _, app) = registry().await;
        let err = registry
            .create(Uuid::new_v4(), app.app_id, new_client(&[]), Uuid::new_v4())
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_suspended_tenant_fails_authentication() {
        let (store, registry, tenant, app) = registry().await;
        let (client, secret) = registry
            .create(tenant.tenant_id, app.app_id, new_client(&[]), Uuid::new_v4())
            .await
            .unwrap();
        store
            .set_tenant_status(tenant.tenant_id, TenantStatus::Suspended)
            .await
            .unwrap();

        let creds = ClientCredentials {
            client_id: client.client_id,
            client_secret: secret,
        };
        assert!(registry.authenticate(&creds, None).await.is_err());
        let identity = registry.verify(&creds, None).await.unwrap();
        assert!(!identity.is_usable());
    }

    #[tokio::test]
    async fn test_regenerate_invalidates_old_secret() {
        let (_, registry, tenant, app) = registry().await;
        let actor = Uuid::new_v4();
        let (client, old_secret) = registry
            .create(tenant.tenant_id, app.app_id, new_client(&[]), actor)
            .await
            .unwrap();
        let (_, new_secret) = registry
            .regenerate_secret(tenant.tenant_id, &client.client_id, actor)
            .await
            .unwrap();

        let old = ClientCredentials {
            client_id: client.client_id.clone(),
            client_secret: old_secret,
        };
        let new = ClientCredentials {
            client_id: client.client_id.clone(),
            client_secret: new_secret,
        };
        assert!(registry.authenticate(&old, None).await.is_err());
        assert!(registry.authenticate(&new, None).await.is_ok());

        let foreign = registry
            .regenerate_secret(Uuid::new_v4(), &client.client_id, actor)
            .await
            .unwrap_err();
        assert!(matches!(foreign, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_failures_are_audited() {
        let (store, registry, _, _) = registry().await;
        let creds = ClientCredentials {
            client_id: "bp_client_missing".to_string(),
            client_secret: "x".to_string(),
        };
        assert!(registry.authenticate(&creds, Some("203.0.113.1".to_string())).await.is_err());
        assert!(store
            .audit_entries()
            .iter()
            .any(|e| e.is(AuditAction::ClientAuthFailed)));
    }
}
