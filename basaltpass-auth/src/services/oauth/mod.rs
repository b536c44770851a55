//! OAuth 2.0 / OpenID Connect authorization server.
//!
//! `authorize` covers the authorization endpoint and consent, `token` the three
//! grants, `introspection` the RFC 7662 / RFC 7009 pair and `userinfo` the OIDC
//! claims view. All of them share [`OAuthServer`].

mod authorize;
mod error;
mod introspection;
mod token;
mod userinfo;

pub use authorize::{error_redirect_url, AuthorizeError, AuthorizeParams, ValidatedAuthorize};
pub use error::{OAuthError, OAuthErrorBody, OAuthErrorCode};
pub use introspection::IntrospectionResponse;
pub use token::{IdTokenClaims, TokenRequest, TokenResponse};

use std::sync::Arc;

use axum::http::HeaderMap;
use serde_json::{json, Value};

use super::audit::AuditService;
use super::client_registry::ClientRegistry;
use super::keys::KeyManager;
use crate::config::OAuthConfig;
use crate::store::Store;

pub struct OAuthServer {
    store: Arc<dyn Store>,
    registry: Arc<ClientRegistry>,
    keys: Arc<KeyManager>,
    audit: AuditService,
    config: OAuthConfig,
}

impl OAuthServer {
    pub fn new(
        store: Arc<dyn Store>,
        registry: Arc<ClientRegistry>,
        keys: Arc<KeyManager>,
        audit: AuditService,
        config: OAuthConfig,
    ) -> Self {
        Self {
            store,
            registry,
            keys,
            audit,
            config,
        }
    }

    pub fn config(&self) -> &OAuthConfig {
        &self.config
    }

    /// `iss` for this request: the configured issuer, else `scheme://host`.
    pub fn issuer(&self, headers: &HeaderMap) -> String {
        resolve_issuer(self.config.issuer.as_deref(), headers)
    }

    pub fn discovery(&self, issuer: &str) -> Value {
        discovery_document(issuer, self.config.allow_plain_pkce)
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.split(',').next().unwrap_or(v).trim())
        .filter(|v| !v.is_empty())
}

pub fn resolve_issuer(configured: Option<&str>, headers: &HeaderMap) -> String {
    if let Some(issuer) = configured {
        return issuer.trim_end_matches('/').to_string();
    }
    let scheme = header_str(headers, "x-forwarded-proto").unwrap_or("http");
    let host = header_str(headers, "x-forwarded-host")
        .or_else(|| header_str(headers, "host"))
        .unwrap_or("localhost");
    format!("{}://{}", scheme, host)
}

pub fn discovery_document(issuer: &str, allow_plain_pkce: bool) -> Value {
    let pkce_methods: &[&str] = if allow_plain_pkce {
        &["S256", "plain"]
    } else {
        &["S256"]
    };

    json!({
        "issuer": issuer,
        "authorization_endpoint": format!("{}/oauth/authorize", issuer),
        "token_endpoint": format!("{}/oauth/token", issuer),
        "userinfo_endpoint": format!("{}/oauth/userinfo", issuer),
        "jwks_uri": format!("{}/oauth/jwks", issuer),
        "introspection_endpoint": format!("{}/oauth/introspect", issuer),
        "revocation_endpoint": format!("{}/oauth/revoke", issuer),
        "scopes_supported": ["openid", "profile", "email", "phone", "offline_access"],
        "response_types_supported": ["code"],
        "grant_types_supported": ["authorization_code", "refresh_token", "client_credentials"],
        "token_endpoint_auth_methods_supported": ["client_secret_basic", "client_secret_post"],
        "subject_types_supported": ["public"],
        "id_token_signing_alg_values_supported": ["RS256"],
        "claims_supported": [
            "sub", "iss", "aud", "exp", "iat", "auth_time", "nonce",
            "name", "nickname", "picture", "preferred_username", "updated_at",
            "email", "email_verified", "phone_number", "phone_number_verified"
        ],
        "code_challenge_methods_supported": pkce_methods,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_issuer_prefers_configuration() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:8080"));
        assert_eq!(
            resolve_issuer(Some("https://id.example.com/"), &headers),
            "https://id.example.com"
        );
    }

    #[test]
    fn test_issuer_from_forwarded_headers() {
        let mut headers = HeaderMap::new();
        headers.insert("host", HeaderValue::from_static("internal:8080"));
        assert_eq!(resolve_issuer(None, &headers), "http://internal:8080");

        headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
        headers.insert("x-forwarded-host", HeaderValue::from_static("id.example.com, proxy"));
        assert_eq!(resolve_issuer(None, &headers), "https://id.example.com");
    }

    #[test]
    fn test_discovery_pkce_policy() {
        let doc = discovery_document("https://id", true);
        assert_eq!(doc["code_challenge_methods_supported"], json!(["S256", "plain"]));
        assert_eq!(doc["token_endpoint"], "https://id/oauth/token");

        let strict = discovery_document("https://id", false);
        assert_eq!(strict["code_challenge_methods_supported"], json!(["S256"]));
    }
}
