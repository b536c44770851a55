//! Service-to-service gate.
//!
//! Confidential clients call `/s2s/*` with their own credentials; no user
//! context is established. Every response on these routes, errors included,
//! uses the `{data, error, request_id}` envelope.

use serde::{Deserialize, Serialize};
use service_core::{
    axum::{
        async_trait,
        body::{self, Body},
        extract::{FromRequestParts, Request, State},
        http::{header, request::Parts, StatusCode},
        middleware::Next,
        response::{IntoResponse, Response},
        Json,
    },
    middleware::{
        rate_limit::{check_client_quota, client_addr, HasRateLimitInfo},
        tracing::RequestId,
    },
};
use uuid::Uuid;

use crate::{
    models::{AuditAction, AuditLog},
    services::{
        client_registry::{parse_basic_authorization, ClientCredentials},
        oauth::{OAuthError, OAuthErrorCode},
    },
    utils::scope,
    AppState,
};

const CLIENT_ID_HEADER: &str = "x-client-id";
const CLIENT_SECRET_HEADER: &str = "x-client-secret";
const MAX_FORM_BYTES: usize = 64 * 1024;

/// Authenticated S2S caller.
#[derive(Debug, Clone)]
pub struct S2sContext {
    pub client_id: String,
    pub app_id: Uuid,
    pub tenant_id: Uuid,
    pub scopes: Vec<String>,
    pub requests_per_minute: u32,
}

impl HasRateLimitInfo for S2sContext {
    fn client_id(&self) -> String {
        self.client_id.clone()
    }

    fn rate_limit_per_min(&self) -> u32 {
        self.requests_per_minute
    }
}

#[derive(Debug, Serialize)]
pub struct S2sErrorBody {
    pub code: &'static str,
    pub message: String,
}

#[derive(Debug, Serialize)]
pub struct S2sEnvelope<T: Serialize> {
    pub data: Option<T>,
    pub error: Option<S2sErrorBody>,
    pub request_id: Option<String>,
}

pub fn envelope_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
    request_id: Option<String>,
) -> Response {
    let body: S2sEnvelope<()> = S2sEnvelope {
        data: None,
        error: Some(S2sErrorBody {
            code,
            message: message.into(),
        }),
        request_id,
    };
    (status, Json(body)).into_response()
}

pub fn envelope_ok<T: Serialize>(data: T, request_id: Option<String>) -> Response {
    let body = S2sEnvelope {
        data: Some(data),
        error: None,
        request_id,
    };
    (StatusCode::OK, Json(body)).into_response()
}

fn request_id_of(req: &Request) -> Option<String> {
    req.extensions().get::<RequestId>().map(|id| id.0.clone())
}

#[derive(Deserialize, Default)]
struct CredentialFields {
    client_id: Option<String>,
    client_secret: Option<String>,
}

impl CredentialFields {
    fn into_credentials(self) -> Option<ClientCredentials> {
        let client_id = self.client_id.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())?;
        let client_secret = self
            .client_secret
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())?;
        Some(ClientCredentials {
            client_id,
            client_secret,
        })
    }
}

/// `X-Client-Id`/`X-Client-Secret`, else HTTP Basic. A Basic header that
/// does not decode is an error, never a fall-through to other sources.
fn header_credentials(req: &Request) -> Result<Option<ClientCredentials>, OAuthError> {
    let value = |name: &str| {
        req.headers()
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    let fields = CredentialFields {
        client_id: value(CLIENT_ID_HEADER),
        client_secret: value(CLIENT_SECRET_HEADER),
    };
    if let Some(creds) = fields.into_credentials() {
        return Ok(Some(creds));
    }

    match req.headers().get(header::AUTHORIZATION) {
        Some(value) => {
            let value = value
                .to_str()
                .map_err(|_| OAuthError::invalid_client("malformed authorization header"))?;
            parse_basic_authorization(value)
        }
        None => Ok(None),
    }
}

fn is_form(req: &Request) -> bool {
    req.headers()
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"))
}

/// Headers first, then a form body, then the query string when allowed.
/// A buffered form body is put back for the handler.
async fn extract_credentials(
    req: Request,
    allow_query: bool,
) -> Result<(Request, Option<ClientCredentials>), Response> {
    match header_credentials(&req) {
        Ok(Some(creds)) => return Ok((req, Some(creds))),
        Ok(None) => {}
        Err(e) => {
            return Err(envelope_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                e.description,
                request_id_of(&req),
            ))
        }
    }

    let mut req = req;
    if is_form(&req) {
        let request_id = request_id_of(&req);
        let (parts, body) = req.into_parts();
        let bytes = body::to_bytes(body, MAX_FORM_BYTES).await.map_err(|_| {
            envelope_error(
                StatusCode::PAYLOAD_TOO_LARGE,
                "invalid_request",
                "request body too large",
                request_id,
            )
        })?;
        let fields: CredentialFields = serde_urlencoded::from_bytes(&bytes).unwrap_or_default();
        req = Request::from_parts(parts, Body::from(bytes));
        if let Some(creds) = fields.into_credentials() {
            return Ok((req, Some(creds)));
        }
    }

    if allow_query {
        let fields: CredentialFields = req
            .uri()
            .query()
            .and_then(|q| serde_urlencoded::from_str(q).ok())
            .unwrap_or_default();
        if let Some(creds) = fields.into_credentials() {
            return Ok((req, Some(creds)));
        }
    }

    Ok((req, None))
}

/// Authenticates the calling client, applies its per-minute quota and
/// writes the `s2s_request` audit entry once the handler has answered.
pub async fn s2s_auth_middleware(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let request_id = request_id_of(&req);
    let ip = client_addr(&req).map(|addr| addr.ip().to_string());
    let method = req.method().to_string();
    let path = req.uri().path().to_string();

    let (mut req, creds) =
        match extract_credentials(req, state.config.s2s.allow_query_credentials).await {
            Ok(extracted) => extracted,
            Err(response) => return response,
        };

    let Some(creds) = creds else {
        record_auth_failure(&state, None, &path, ip, "missing credentials").await;
        return envelope_error(
            StatusCode::UNAUTHORIZED,
            "invalid_client",
            "Missing client_id or client_secret",
            request_id,
        );
    };

    let client = match state.clients.authenticate(&creds, ip.clone()).await {
        Ok(client) => client,
        Err(e) if e.code == OAuthErrorCode::ServerError => {
            return envelope_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal server error",
                request_id,
            );
        }
        Err(e) => {
            record_auth_failure(&state, Some(&creds.client_id), &path, ip, &e.description).await;
            return envelope_error(
                StatusCode::UNAUTHORIZED,
                "invalid_client",
                "Client authentication failed",
                request_id,
            );
        }
    };

    let ctx = S2sContext {
        client_id: client.client.client_id.clone(),
        app_id: client.app.app_id,
        tenant_id: client.tenant.tenant_id,
        scopes: client.client.scopes.clone(),
        requests_per_minute: state.config.s2s.requests_per_minute,
    };

    if state.config.s2s.rate_limit_enabled && check_client_quota(&state.s2s_rate_limiter, &ctx).is_err() {
        return envelope_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate_limited",
            "Rate limit exceeded",
            request_id,
        );
    }

    state.clients.mark_used(&ctx.client_id).await;
    req.extensions_mut().insert(ctx.clone());
    let response = next.run(req).await;

    if state.config.s2s.audit_enabled {
        state
            .audit
            .record(
                AuditLog::new(AuditAction::S2sRequest, "oauth_client")
                    .resource(&ctx.client_id)
                    .ip(ip)
                    .data(serde_json::json!({
                        "method": method,
                        "path": path,
                        "status": response.status().as_u16(),
                        "app_id": ctx.app_id,
                        "tenant_id": ctx.tenant_id,
                        "request_id": request_id,
                    })),
            )
            .await;
    }

    response
}

async fn record_auth_failure(
    state: &AppState,
    client_id: Option<&str>,
    path: &str,
    ip: Option<String>,
    reason: &str,
) {
    tracing::warn!(client_id = ?client_id, path = %path, reason, "S2S authentication failed");
    let mut entry = AuditLog::new(AuditAction::S2sAuthFailed, "oauth_client")
        .ip(ip)
        .data(serde_json::json!({ "path": path, "reason": reason }));
    if let Some(client_id) = client_id {
        entry = entry.resource(client_id);
    }
    state.audit.record(entry).await;
}

/// Requires `required` among the client's registered scopes. `s2s.read`
/// satisfies any `s2s.<resource>.read`.
pub async fn require_s2s_scope(required: &'static str, req: Request, next: Next) -> Response {
    let request_id = request_id_of(&req);
    let Some(ctx) = req.extensions().get::<S2sContext>() else {
        tracing::error!("S2S context missing from request extensions");
        return envelope_error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "server_error",
            "internal server error",
            request_id,
        );
    };

    if !scope::satisfies(&ctx.scopes, required) {
        tracing::warn!(client_id = %ctx.client_id, required, granted = ?ctx.scopes, "Insufficient S2S scope");
        return envelope_error(
            StatusCode::FORBIDDEN,
            "insufficient_scope",
            "Client lacks required scope",
            request_id,
        );
    }
    next.run(req).await
}

/// Handler-side view of an S2S call: the caller plus the request id every
/// envelope echoes.
pub struct S2sRequest {
    pub ctx: S2sContext,
    pub request_id: Option<String>,
}

impl S2sRequest {
    pub fn ok<T: Serialize>(&self, data: T) -> Response {
        envelope_ok(data, self.request_id.clone())
    }

    pub fn error(&self, status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
        envelope_error(status, code, message, self.request_id.clone())
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for S2sRequest
where
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let request_id = parts.extensions.get::<RequestId>().map(|id| id.0.clone());
        match parts.extensions.get::<S2sContext>() {
            Some(ctx) => Ok(S2sRequest {
                ctx: ctx.clone(),
                request_id,
            }),
            None => Err(envelope_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "server_error",
                "internal server error",
                request_id,
            )),
        }
    }
}
