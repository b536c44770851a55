use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use uuid::Uuid;

use super::{OAuthError, OAuthErrorCode, OAuthServer};
use crate::models::{App, AuditAction, AuditLog, AuthorizationCode, Consent, OAuthClient};
use crate::store::StoreError;
use crate::utils::{
    pkce::{self, PkceMethod},
    scope,
    token::{digest, generate_opaque, AUTHORIZATION_CODE_PREFIX},
};

/// Authorization request parameters, as received on `/oauth/authorize` and
/// echoed back by the consent form.
#[derive(Debug, Clone, Default, Deserialize, Serialize, IntoParams, ToSchema)]
pub struct AuthorizeParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_uri: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code_challenge_method: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

/// Where an authorization failure is reported.
#[derive(Debug)]
pub enum AuthorizeError {
    /// `client_id` or `redirect_uri` cannot be trusted: answer the user agent directly.
    Direct(OAuthError),
    /// Every other failure goes back to the client's redirect URI.
    Redirect {
        redirect_uri: String,
        error: OAuthError,
        state: Option<String>,
    },
}

impl AuthorizeError {
    pub fn code(&self) -> OAuthErrorCode {
        match self {
            AuthorizeError::Direct(e) | AuthorizeError::Redirect { error: e, .. } => e.code,
        }
    }
}

impl From<OAuthError> for AuthorizeError {
    fn from(err: OAuthError) -> Self {
        AuthorizeError::Direct(err)
    }
}

impl From<StoreError> for AuthorizeError {
    fn from(err: StoreError) -> Self {
        AuthorizeError::Direct(err.into())
    }
}

/// An authorization request that passed every check.
#[derive(Debug, Clone)]
pub struct ValidatedAuthorize {
    pub client: OAuthClient,
    pub app: App,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub state: Option<String>,
    pub code_challenge: String,
    pub method: PkceMethod,
    pub nonce: Option<String>,
}

impl ValidatedAuthorize {
    fn error(&self, error: OAuthError) -> AuthorizeError {
        AuthorizeError::Redirect {
            redirect_uri: self.redirect_uri.clone(),
            error,
            state: self.state.clone(),
        }
    }

    /// `redirect_uri` carrying an error, per RFC 6749 4.1.2.1.
    pub fn error_redirect(&self, error: &OAuthError) -> String {
        error_redirect_url(&self.redirect_uri, error, self.state.as_deref())
    }
}

/// Appends query parameters, keeping any query the URI already has.
pub fn append_query(uri: &str, params: &[(&str, &str)]) -> String {
    let encoded = serde_urlencoded::to_string(params).unwrap_or_default();
    if encoded.is_empty() {
        return uri.to_string();
    }
    let separator = if uri.contains('?') { '&' } else { '?' };
    format!("{}{}{}", uri, separator, encoded)
}

pub fn error_redirect_url(redirect_uri: &str, error: &OAuthError, state: Option<&str>) -> String {
    let mut params = vec![
        ("error", error.code.as_str()),
        ("error_description", error.description.as_str()),
    ];
    if let Some(state) = state {
        params.push(("state", state));
    }
    append_query(redirect_uri, &params)
}

fn is_s256_challenge(challenge: &str) -> bool {
    challenge.len() == 43
        && challenge
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

impl OAuthServer {
    /// Validates an authorization request. Client and redirect URI come first
    /// because every later failure is reported by redirecting to that URI.
    #[tracing::instrument(skip(self, params), fields(client_id = ?params.client_id))]
    pub async fn validate_authorize(
        &self,
        params: &AuthorizeParams,
    ) -> Result<ValidatedAuthorize, AuthorizeError> {
        let client_id = params
            .client_id
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("client_id is required"))?;

        let client = self
            .store
            .find_client(client_id)
            .await?
            .ok_or_else(|| OAuthError::invalid_request("unknown client_id"))?;

        let app = match self.store.find_app(client.app_id).await? {
            Some(app) => app,
            None => return Err(OAuthError::invalid_request("client is not available").into()),
        };
        let tenant_active = self
            .store
            .find_tenant(app.tenant_id)
            .await?
            .is_some_and(|t| t.is_active());
        if !client.is_active || !tenant_active {
            return Err(OAuthError::invalid_request("client is not available").into());
        }

        let redirect_uri = params
            .redirect_uri
            .as_deref()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| OAuthError::invalid_request("redirect_uri is required"))?;
        if !client.has_redirect_uri(redirect_uri) {
            tracing::warn!(client_id = %client_id, "Unregistered redirect_uri");
            return Err(OAuthError::invalid_request("redirect_uri is not registered for this client").into());
        }

        let mut validated = ValidatedAuthorize {
            redirect_uri: redirect_uri.to_string(),
            state: params.state.clone(),
            scopes: Vec::new(),
            code_challenge: String::new(),
            method: PkceMethod::S256,
            nonce: params.nonce.clone().filter(|n| !n.is_empty()),
            client,
            app,
        };

        match params.response_type.as_deref() {
            Some("code") => {}
            Some(_) => {
                return Err(validated.error(OAuthError::new(
                    OAuthErrorCode::UnsupportedResponseType,
                    "only response_type=code is supported",
                )))
            }
            None => return Err(validated.error(OAuthError::invalid_request("response_type is required"))),
        }

        let challenge = match params.code_challenge.as_deref().filter(|s| !s.is_empty()) {
            Some(c) => c.to_string(),
            None => return Err(validated.error(OAuthError::invalid_request("code_challenge is required"))),
        };
        let method = match PkceMethod::parse(params.code_challenge_method.as_deref()) {
            Some(m) => m,
            None => {
                return Err(validated.error(OAuthError::invalid_request(
                    "code_challenge_method must be S256 or plain",
                )))
            }
        };
        if method == PkceMethod::Plain && !self.config.allow_plain_pkce {
            return Err(validated.error(OAuthError::invalid_request(
                "code_challenge_method plain is not allowed",
            )));
        }
        let well_formed = match method {
            PkceMethod::S256 => is_s256_challenge(&challenge),
            PkceMethod::Plain => pkce::is_well_formed(&challenge),
        };
        if !well_formed {
            return Err(validated.error(OAuthError::invalid_request("malformed code_challenge")));
        }

        let scopes = scope::parse_scope(params.scope.as_deref().unwrap_or_default());
        if scopes.is_empty() {
            return Err(validated.error(OAuthError::invalid_scope("scope is required")));
        }
        if !validated.client.allows_scopes(&scopes) {
            return Err(validated.error(OAuthError::invalid_scope(
                "requested scope exceeds the client's registered scopes",
            )));
        }

        validated.code_challenge = challenge;
        validated.method = method;
        validated.scopes = scopes;
        Ok(validated)
    }

    /// Whether a stored consent lets this request skip the consent screen.
    pub async fn can_auto_approve(
        &self,
        user_id: Uuid,
        request: &ValidatedAuthorize,
    ) -> Result<bool, OAuthError> {
        if !self.config.auto_approve_prior_consent {
            return Ok(false);
        }
        let consent = self
            .store
            .find_consent(user_id, &request.client.client_id)
            .await?;
        Ok(consent.is_some_and(|c| c.covers(&request.scopes)))
    }

    /// Hosted consent screen URL, carrying every authorize parameter plus app details.
    pub fn consent_url(ui_base_url: &str, params: &AuthorizeParams, request: &ValidatedAuthorize) -> String {
        let mut query = serde_urlencoded::to_string(params).unwrap_or_default();
        let extra = serde_urlencoded::to_string([
            ("client_name", request.app.name.as_str()),
            (
                "client_description",
                request.app.description.as_deref().unwrap_or_default(),
            ),
        ])
        .unwrap_or_default();
        if !query.is_empty() {
            query.push('&');
        }
        query.push_str(&extra);
        format!("{}/oauth-consent?{}", ui_base_url, query)
    }

    /// Records consent and issues a code. Returns the success redirect.
    pub async fn approve(
        &self,
        user_id: Uuid,
        request: &ValidatedAuthorize,
        auth_time: DateTime<Utc>,
        ip: Option<String>,
    ) -> Result<String, OAuthError> {
        self.store
            .upsert_consent(&Consent::new(
                user_id,
                request.client.client_id.clone(),
                request.scopes.clone(),
            ))
            .await?;

        self.audit
            .record(
                AuditLog::new(AuditAction::ConsentGranted, "oauth_client")
                    .user(user_id)
                    .resource(&request.client.client_id)
                    .ip(ip.clone())
                    .data(serde_json::json!({ "scope": scope::join_scopes(&request.scopes) })),
            )
            .await;

        self.issue_code(user_id, request, auth_time, ip).await
    }

    pub async fn deny(&self, user_id: Uuid, request: &ValidatedAuthorize, ip: Option<String>) -> String {
        self.audit
            .record(
                AuditLog::new(AuditAction::ConsentDenied, "oauth_client")
                    .user(user_id)
                    .resource(&request.client.client_id)
                    .ip(ip),
            )
            .await;
        request.error_redirect(&OAuthError::access_denied("the user denied the request"))
    }

    /// Persists a fresh code and returns `redirect_uri?code=..&state=..`.
    #[tracing::instrument(skip(self, request, ip), fields(client_id = %request.client.client_id))]
    pub async fn issue_code(
        &self,
        user_id: Uuid,
        request: &ValidatedAuthorize,
        auth_time: DateTime<Utc>,
        ip: Option<String>,
    ) -> Result<String, OAuthError> {
        let code = generate_opaque(AUTHORIZATION_CODE_PREFIX);
        let record = AuthorizationCode::new(
            digest(&code),
            request.client.client_id.clone(),
            user_id,
            request.redirect_uri.clone(),
            request.scopes.clone(),
            request.code_challenge.clone(),
            request.method,
            request.nonce.clone(),
            auth_time,
            self.config.code_ttl_seconds,
        );
        self.store.insert_authorization_code(&record).await?;

        self.audit
            .record(
                AuditLog::new(AuditAction::AuthorizationCodeIssued, "authorization_code")
                    .user(user_id)
                    .resource(record.code_id)
                    .ip(ip)
                    .data(serde_json::json!({
                        "client_id": request.client.client_id,
                        "scope": scope::join_scopes(&request.scopes),
                    })),
            )
            .await;

        let mut params = vec![("code", code.as_str())];
        if let Some(state) = request.state.as_deref() {
            params.push(("state", state));
        }
        Ok(append_query(&request.redirect_uri, &params))
    }
}
