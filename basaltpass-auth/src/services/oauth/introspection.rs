use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use super::{OAuthError, OAuthServer};
use crate::models::{AuditAction, AuditLog};
use crate::services::client_registry::{ClientCredentials, ClientIdentity};
use crate::utils::{scope, token::digest};

/// RFC 7662 response. Inactive tokens serialize as `{"active": false}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, ToSchema)]
pub struct IntrospectionResponse {
    pub active: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

impl IntrospectionResponse {
    pub fn inactive() -> Self {
        Self::default()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TokenKind {
    Access,
    Refresh,
}

fn lookup_order(hint: Option<&str>) -> [TokenKind; 2] {
    match hint {
        Some("refresh_token") => [TokenKind::Refresh, TokenKind::Access],
        _ => [TokenKind::Access, TokenKind::Refresh],
    }
}

/// Snapshot of whichever token row matched.
struct TokenView {
    client_id: String,
    user_id: Option<Uuid>,
    scopes: Vec<String>,
    exp: i64,
    iat: i64,
    active: bool,
    token_type: &'static str,
}

impl OAuthServer {
    async fn find_token(&self, token: &str, hint: Option<&str>) -> Result<Option<TokenView>, OAuthError> {
        let hash = digest(token);
        let now = Utc::now();
        for kind in lookup_order(hint) {
            match kind {
                TokenKind::Access => {
                    if let Some(t) = self.store.find_access_token(&hash).await? {
                        return Ok(Some(TokenView {
                            active: t.is_active(now),
                            client_id: t.client_id,
                            user_id: t.user_id,
                            scopes: t.scopes,
                            exp: t.expiry_utc.timestamp(),
                            iat: t.created_utc.timestamp(),
                            token_type: "Bearer",
                        }));
                    }
                }
                TokenKind::Refresh => {
                    if let Some(t) = self.store.find_refresh_token(&hash).await? {
                        return Ok(Some(TokenView {
                            active: t.is_active(now),
                            client_id: t.client_id,
                            user_id: Some(t.user_id),
                            scopes: t.scopes,
                            exp: t.expiry_utc.timestamp(),
                            iat: t.created_utc.timestamp(),
                            token_type: "refresh_token",
                        }));
                    }
                }
            }
        }
        Ok(None)
    }

    /// RFC 7662. The caller only ever sees its own tokens.
    #[tracing::instrument(skip(self, creds, token, ip), fields(client_id = %creds.client_id))]
    pub async fn introspect(
        &self,
        creds: &ClientCredentials,
        token: &str,
        hint: Option<&str>,
        ip: Option<String>,
    ) -> Result<IntrospectionResponse, OAuthError> {
        let identity = self.registry.verify(creds, ip).await?;
        if token.is_empty() {
            return Err(OAuthError::invalid_request("token is required"));
        }
        // A suspended tenant or disabled client sees every token as inactive.
        if !identity.is_usable() {
            return Ok(IntrospectionResponse::inactive());
        }
        let ClientIdentity { client, .. } = identity;

        let Some(view) = self.find_token(token, hint).await? else {
            return Ok(IntrospectionResponse::inactive());
        };
        if !view.active || view.client_id != client.client_id {
            return Ok(IntrospectionResponse::inactive());
        }

        let username = match view.user_id {
            Some(user_id) => match self.store.find_user(user_id).await? {
                Some(user) if user.can_obtain_tokens() => Some(user.email),
                _ => return Ok(IntrospectionResponse::inactive()),
            },
            None => None,
        };

        Ok(IntrospectionResponse {
            active: true,
            client_id: Some(view.client_id),
            sub: view.user_id.map(|u| u.to_string()),
            scope: Some(scope::join_scopes(&view.scopes)),
            exp: Some(view.exp),
            iat: Some(view.iat),
            username,
            token_type: Some(view.token_type.to_string()),
        })
    }

    /// RFC 7009. Unknown, foreign and already revoked tokens are silently ignored.
    #[tracing::instrument(skip(self, creds, token, ip), fields(client_id = %creds.client_id))]
    pub async fn revoke(
        &self,
        creds: &ClientCredentials,
        token: &str,
        ip: Option<String>,
    ) -> Result<(), OAuthError> {
        let identity = self.registry.verify(creds, ip.clone()).await?;
        if token.is_empty() {
            return Err(OAuthError::invalid_request("token is required"));
        }

        let revoked = self
            .store
            .revoke_token(&digest(token), &identity.client.client_id)
            .await?;
        if revoked > 0 {
            self.audit
                .record(
                    AuditLog::new(AuditAction::TokenRevoked, "oauth_client")
                        .resource(&identity.client.client_id)
                        .ip(ip)
                        .data(serde_json::json!({ "tokens_revoked": revoked })),
                )
                .await;
        }
        Ok(())
    }
}
