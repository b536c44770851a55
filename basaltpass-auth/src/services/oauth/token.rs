use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{OAuthError, OAuthErrorCode, OAuthServer};
use crate::models::{
    AccessToken, AuditAction, AuditLog, AuthorizationCode, CodeRedemption, MintedTokens,
    RefreshRejection, RefreshToken,
};
use crate::services::client_registry::AuthenticatedClient;
use crate::store::{RedeemOutcome, RotateOutcome};
use crate::utils::{
    scope,
    token::{digest, generate_opaque, ACCESS_TOKEN_PREFIX, REFRESH_TOKEN_PREFIX},
};

/// `application/x-www-form-urlencoded` body of `POST /oauth/token`.
#[derive(Debug, Clone, Default, Deserialize, ToSchema)]
pub struct TokenRequest {
    pub grant_type: Option<String>,
    pub code: Option<String>,
    pub redirect_uri: Option<String>,
    pub code_verifier: Option<String>,
    pub refresh_token: Option<String>,
    pub scope: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdTokenClaims {
    pub iss: String,
    pub sub: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub auth_time: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Plaintext values handed to the client; only digests reach the store.
struct MintedSecrets {
    access_token: String,
    refresh_token: String,
    tokens: MintedTokens,
}

fn required<'a>(value: &'a Option<String>, name: &str) -> Result<&'a str, OAuthError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or_else(|| OAuthError::invalid_request(format!("{} is required", name)))
}

impl OAuthServer {
    /// Runs a grant for an already authenticated client.
    #[tracing::instrument(skip(self, client, request, ip), fields(client_id = %client.client_id(), grant_type = ?request.grant_type))]
    pub async fn token(
        &self,
        client: &AuthenticatedClient,
        request: &TokenRequest,
        issuer: &str,
        ip: Option<String>,
    ) -> Result<TokenResponse, OAuthError> {
        let grant_type = required(&request.grant_type, "grant_type")?;
        let result = match grant_type {
            "authorization_code" => self.authorization_code_grant(client, request, issuer, ip.clone()).await,
            "refresh_token" => self.refresh_token_grant(client, request, ip.clone()).await,
            "client_credentials" => self.client_credentials_grant(client, request).await,
            other => Err(OAuthError::new(
                OAuthErrorCode::UnsupportedGrantType,
                format!("unsupported grant_type: {}", other),
            )),
        };

        match &result {
            Ok(response) => {
                self.registry.mark_used(client.client_id()).await;
                self.audit
                    .record(
                        AuditLog::new(AuditAction::TokenIssued, "oauth_client")
                            .resource(client.client_id())
                            .ip(ip)
                            .data(serde_json::json!({
                                "grant_type": grant_type,
                                "scope": response.scope,
                            })),
                    )
                    .await;
            }
            Err(e) => {
                tracing::info!(error = %e, "Token request rejected");
            }
        }
        result
    }

    fn mint(
        &self,
        family_id: Uuid,
        client_id: &str,
        user_id: Uuid,
        scopes: Vec<String>,
        parent_id: Option<Uuid>,
        auth_time: DateTime<Utc>,
    ) -> MintedSecrets {
        let access_token = generate_opaque(ACCESS_TOKEN_PREFIX);
        let refresh_token = generate_opaque(REFRESH_TOKEN_PREFIX);
        let access = AccessToken::new(
            digest(&access_token),
            family_id,
            client_id.to_string(),
            Some(user_id),
            scopes,
            self.config.access_token_ttl_seconds,
        );
        let refresh = RefreshToken::new(
            digest(&refresh_token),
            &access,
            user_id,
            parent_id,
            auth_time,
            self.config.refresh_token_ttl_days,
        );
        MintedSecrets {
            access_token,
            refresh_token,
            tokens: MintedTokens { access, refresh },
        }
    }

    fn sign_id_token(
        &self,
        code: &AuthorizationCode,
        issuer: &str,
    ) -> Result<String, OAuthError> {
        let now = Utc::now().timestamp();
        let claims = IdTokenClaims {
            iss: issuer.to_string(),
            sub: code.user_id.to_string(),
            aud: code.client_id.clone(),
            exp: now + self.config.id_token_ttl_seconds,
            iat: now,
            auth_time: code.auth_time_utc.timestamp(),
            nonce: code.nonce.clone(),
        };
        let (jws, kid) = self.keys.sign(&claims)?;
        tracing::debug!(kid = %kid, "ID token signed");
        Ok(jws)
    }

    /// Fails with `invalid_grant` when the user is gone or banned.
    async fn ensure_user_may_obtain_tokens(&self, user_id: Uuid) -> Result<(), OAuthError> {
        match self.store.find_user(user_id).await? {
            Some(user) if user.can_obtain_tokens() => Ok(()),
            _ => Err(OAuthError::invalid_grant("user is not allowed to obtain tokens")),
        }
    }

    // ==================== authorization_code ====================

    async fn authorization_code_grant(
        &self,
        client: &AuthenticatedClient,
        request: &TokenRequest,
        issuer: &str,
        ip: Option<String>,
    ) -> Result<TokenResponse, OAuthError> {
        let code = required(&request.code, "code")?;
        let verifier = required(&request.code_verifier, "code_verifier")?;
        let code_hash = digest(code);

        let Some(peeked) = self.store.find_authorization_code(&code_hash).await? else {
            return Err(OAuthError::invalid_grant("invalid authorization code"));
        };
        // A consumed code goes straight to the store so the replay cascade runs.
        if !peeked.is_consumed() {
            self.ensure_user_may_obtain_tokens(peeked.user_id).await?;
        }

        // Signed before anything is persisted: a signing failure leaves no tokens behind.
        let id_token = if scope::contains(&peeked.scopes, scope::OPENID) && !peeked.is_consumed() {
            Some(self.sign_id_token(&peeked, issuer)?)
        } else {
            None
        };

        let minted = self.mint(
            peeked.code_id,
            client.client_id(),
            peeked.user_id,
            peeked.scopes.clone(),
            None,
            peeked.auth_time_utc,
        );
        let redemption = CodeRedemption {
            client_id: client.client_id().to_string(),
            redirect_uri: request.redirect_uri.clone(),
            code_verifier: verifier.to_string(),
        };

        match self
            .store
            .redeem_authorization_code(&code_hash, &redemption, &minted.tokens)
            .await?
        {
            RedeemOutcome::Redeemed(code) => Ok(TokenResponse {
                access_token: minted.access_token,
                token_type: "Bearer".to_string(),
                expires_in: self.config.access_token_ttl_seconds,
                refresh_token: Some(minted.refresh_token),
                scope: scope::join_scopes(&code.scopes),
                id_token,
            }),
            RedeemOutcome::Replayed { code_id, revoked } => {
                tracing::warn!(code_id = %code_id, revoked, "Authorization code replay detected");
                self.audit
                    .record(
                        AuditLog::new(AuditAction::CodeReplayDetected, "authorization_code")
                            .user(peeked.user_id)
                            .resource(code_id)
                            .ip(ip)
                            .data(serde_json::json!({
                                "client_id": client.client_id(),
                                "tokens_revoked": revoked,
                            })),
                    )
                    .await;
                Err(OAuthError::invalid_grant("authorization code already used"))
            }
            RedeemOutcome::Rejected(rejection) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::TokenGrantFailed, "authorization_code")
                            .resource(peeked.code_id)
                            .ip(ip)
                            .data(serde_json::json!({
                                "client_id": client.client_id(),
                                "reason": rejection.description(),
                            })),
                    )
                    .await;
                Err(OAuthError::invalid_grant(rejection.description()))
            }
            RedeemOutcome::NotFound => Err(OAuthError::invalid_grant("invalid authorization code")),
        }
    }

    // ==================== refresh_token ====================

    async fn refresh_token_grant(
        &self,
        client: &AuthenticatedClient,
        request: &TokenRequest,
        ip: Option<String>,
    ) -> Result<TokenResponse, OAuthError> {
        let presented = required(&request.refresh_token, "refresh_token")?;
        let token_hash = digest(presented);

        let Some(peeked) = self.store.find_refresh_token(&token_hash).await? else {
            return Err(OAuthError::invalid_grant("invalid refresh token"));
        };
        if peeked.revoked_utc.is_none() {
            self.ensure_user_may_obtain_tokens(peeked.user_id).await?;
        }

        let scopes = match request.scope.as_deref() {
            Some(raw) => scope::parse_scope(raw),
            None => peeked.scopes.clone(),
        };
        if scopes.is_empty() {
            return Err(OAuthError::invalid_scope("scope must not be empty"));
        }

        let minted = self.mint(
            peeked.family_id,
            client.client_id(),
            peeked.user_id,
            scopes,
            Some(peeked.token_id),
            peeked.auth_time_utc,
        );

        match self
            .store
            .rotate_refresh_token(&token_hash, client.client_id(), &minted.tokens)
            .await?
        {
            RotateOutcome::Rotated(_) => Ok(TokenResponse {
                access_token: minted.access_token,
                token_type: "Bearer".to_string(),
                expires_in: self.config.access_token_ttl_seconds,
                refresh_token: Some(minted.refresh_token),
                scope: scope::join_scopes(&minted.tokens.access.scopes),
                id_token: None,
            }),
            RotateOutcome::Replayed { family_id, revoked } => {
                tracing::warn!(family_id = %family_id, revoked, "Refresh token replay detected");
                self.audit
                    .record(
                        AuditLog::new(AuditAction::RefreshReplayDetected, "refresh_token")
                            .user(peeked.user_id)
                            .resource(family_id)
                            .ip(ip)
                            .data(serde_json::json!({
                                "client_id": client.client_id(),
                                "tokens_revoked": revoked,
                            })),
                    )
                    .await;
                Err(OAuthError::invalid_grant("refresh token already used"))
            }
            RotateOutcome::Rejected(RefreshRejection::ScopeWidened) => Err(OAuthError::invalid_scope(
                RefreshRejection::ScopeWidened.description(),
            )),
            RotateOutcome::Rejected(rejection) => {
                self.audit
                    .record(
                        AuditLog::new(AuditAction::TokenGrantFailed, "refresh_token")
                            .resource(peeked.token_id)
                            .ip(ip)
                            .data(serde_json::json!({
                                "client_id": client.client_id(),
                                "reason": rejection.description(),
                            })),
                    )
                    .await;
                Err(OAuthError::invalid_grant(rejection.description()))
            }
            RotateOutcome::NotFound => Err(OAuthError::invalid_grant("invalid refresh token")),
        }
    }

    // ==================== client_credentials ====================

    async fn client_credentials_grant(
        &self,
        client: &AuthenticatedClient,
        request: &TokenRequest,
    ) -> Result<TokenResponse, OAuthError> {
        let registered = client.client.s2s_scopes();
        if registered.is_empty() {
            return Err(OAuthError::new(
                OAuthErrorCode::UnauthorizedClient,
                "client is not registered for service-to-service access",
            ));
        }

        let scopes = match request.scope.as_deref() {
            Some(raw) => scope::intersect(&scope::parse_scope(raw), &registered),
            None => registered,
        };
        if scopes.is_empty() {
            return Err(OAuthError::invalid_scope(
                "none of the requested scopes are registered for this client",
            ));
        }

        let access_token = generate_opaque(ACCESS_TOKEN_PREFIX);
        let record = AccessToken::new(
            digest(&access_token),
            Uuid::new_v4(),
            client.client_id().to_string(),
            None,
            scopes,
            self.config.access_token_ttl_seconds,
        );
        self.store.insert_access_token(&record).await?;

        Ok(TokenResponse {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: self.config.access_token_ttl_seconds,
            refresh_token: None,
            scope: scope::join_scopes(&record.scopes),
            id_token: None,
        })
    }
}
