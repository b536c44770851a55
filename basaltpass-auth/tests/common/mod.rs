//! Test helpers for basaltpass-auth integration tests.
//!
//! Every test drives the full router in-process over a [`MemoryStore`] and a
//! [`MockEmailService`]; nothing binds a socket or needs a database.

#![allow(dead_code)]

use axum::{
    body::{to_bytes, Body},
    http::{header, Request, Response, StatusCode},
    Router,
};
use base64::{engine::general_purpose::STANDARD, Engine};
use basaltpass_auth::{
    build_router,
    config::{
        AuthConfig, ConsoleConfig, DatabaseConfig, Environment, OAuthConfig, RateLimitConfig,
        S2sConfig, SecurityConfig, StoreBackend, SwaggerConfig, SwaggerMode, UiConfig,
    },
    models::{OAuthClient, Tenant, TenantRole, TenantUser, User},
    services::{client_registry::NewClient, ConsoleScope, MockEmailService},
    store::{MemoryStore, Store},
    utils::{hash_password, Password},
    AppState,
};
use serde_json::Value;
use service_core::config::Config;
use std::sync::Arc;
use tower::util::ServiceExt;

pub const ISSUER: &str = "https://auth.test";
pub const UI_BASE_URL: &str = "https://console.test";
pub const REDIRECT_URI: &str = "https://app.example.com/callback";
pub const PASSWORD: &str = "correct-horse-battery";
pub const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";

pub fn primary_key_path() -> String {
    concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/signing_key_primary.pem").to_string()
}

pub fn fixture(name: &str) -> String {
    let path = format!("{}/tests/fixtures/{}", env!("CARGO_MANIFEST_DIR"), name);
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("fixture {}: {}", path, e))
}

pub fn test_config() -> AuthConfig {
    AuthConfig {
        common: Config {
            port: 0,
            host: "127.0.0.1".parse().unwrap(),
        },
        environment: Environment::Dev,
        service_name: "basaltpass-auth-test".to_string(),
        service_version: "test".to_string(),
        log_level: "error".to_string(),
        store_backend: StoreBackend::Memory,
        database: DatabaseConfig {
            url: String::new(),
            max_connections: 1,
            min_connections: 1,
        },
        console: ConsoleConfig {
            jwt_secret: "integration-test-console-secret-0123456789".to_string(),
            access_token_ttl_minutes: 15,
            refresh_token_ttl_days: 7,
            code_ttl_seconds: 30,
        },
        oauth: OAuthConfig {
            issuer: Some(ISSUER.to_string()),
            code_ttl_seconds: 600,
            access_token_ttl_seconds: 3600,
            refresh_token_ttl_days: 30,
            id_token_ttl_seconds: 3600,
            allow_plain_pkce: true,
            auto_approve_prior_consent: false,
            signing_key_path: Some(primary_key_path()),
            key_retirement_hours: 24,
        },
        ui: UiConfig {
            base_url: UI_BASE_URL.to_string(),
        },
        security: SecurityConfig {
            allowed_origins: vec![UI_BASE_URL.to_string()],
        },
        s2s: S2sConfig {
            allow_query_credentials: false,
            rate_limit_enabled: true,
            requests_per_minute: 600,
            audit_enabled: true,
        },
        swagger: SwaggerConfig {
            enabled: SwaggerMode::Public,
        },
        rate_limit: RateLimitConfig {
            login_attempts: 1000,
            login_window_seconds: 60,
            register_attempts: 1000,
            register_window_seconds: 60,
            password_reset_attempts: 1000,
            password_reset_window_seconds: 60,
            global_ip_limit: 10_000,
            global_ip_window_seconds: 60,
        },
        smtp: None,
        request_timeout_seconds: 30,
        settings_cache_ttl_seconds: 30,
    }
}

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<MemoryStore>,
    pub email: MockEmailService,
}

pub async fn spawn_app() -> TestApp {
    spawn_app_with(|_| {}).await
}

pub async fn spawn_app_with(configure: impl FnOnce(&mut AuthConfig)) -> TestApp {
    let mut config = test_config();
    configure(&mut config);

    let store = Arc::new(MemoryStore::new());
    let email = MockEmailService::new();
    let state = AppState::build(config, store.clone(), Arc::new(email.clone()))
        .await
        .expect("Failed to build app state");
    let router = build_router(state.clone())
        .await
        .expect("Failed to build router");

    TestApp {
        router,
        state,
        store,
        email,
    }
}

impl TestApp {
    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    // ==================== Seeding ====================

    /// Verified user with [`PASSWORD`]. The first user created in a store
    /// also becomes super admin of a fresh `default` tenant.
    pub async fn seed_user(&self, email: &str) -> User {
        let hash = hash_password(&Password::new(PASSWORD.to_string()))
            .unwrap()
            .into_string();
        let mut user = User::new(email.to_string(), hash);
        user.email_verified = true;
        self.store.create_user(&user).await.unwrap()
    }

    pub async fn seed_tenant(&self, code: &str) -> Tenant {
        let tenant = Tenant::new(code.to_string(), format!("{} Inc", code));
        self.store.insert_tenant(&tenant).await.unwrap();
        tenant
    }

    pub async fn add_member(&self, user: &User, tenant: &Tenant, role: TenantRole) {
        self.store
            .insert_membership(&TenantUser::new(user.user_id, tenant.tenant_id, role))
            .await
            .unwrap();
    }

    /// App plus a client with the default user scopes and [`REDIRECT_URI`].
    pub async fn seed_client(&self, tenant: &Tenant, actor: &User) -> (OAuthClient, String) {
        self.seed_client_with_scopes(tenant, actor, &[]).await
    }

    pub async fn seed_client_with_scopes(
        &self,
        tenant: &Tenant,
        actor: &User,
        scopes: &[&str],
    ) -> (OAuthClient, String) {
        let app = self
            .state
            .clients
            .create_app(tenant.tenant_id, "Test App".to_string(), None, actor.user_id)
            .await
            .unwrap();
        self.state
            .clients
            .create(
                tenant.tenant_id,
                app.app_id,
                NewClient {
                    name: "Test Client".to_string(),
                    redirect_uris: vec![REDIRECT_URI.to_string()],
                    scopes: scopes.iter().map(|s| s.to_string()).collect(),
                    allowed_origins: vec![],
                },
                actor.user_id,
            )
            .await
            .unwrap()
    }

    pub fn console_token(&self, user: &User, tenant: Option<&Tenant>, scope: ConsoleScope) -> String {
        self.state
            .console_tokens
            .issue_access(user.user_id, tenant.map(|t| t.tenant_id), scope)
            .unwrap()
    }

    // ==================== OAuth Flow ====================

    /// Runs authorize and consent for `user` and returns the authorization code.
    pub async fn authorization_code(&self, client: &OAuthClient, user: &User, scope: &str) -> String {
        let session = self.console_token(user, None, ConsoleScope::User);
        let query = authorize_query(&client.client_id, scope, "xyz");

        let res = self
            .send(
                Request::builder()
                    .method("POST")
                    .uri("/oauth/consent")
                    .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
                    .header(header::AUTHORIZATION, format!("Bearer {}", session))
                    .body(Body::from(format!("{}&action=allow", query)))
                    .unwrap(),
            )
            .await;
        assert_eq!(res.status(), StatusCode::FOUND);

        let location = location(&res);
        assert!(location.starts_with(REDIRECT_URI), "unexpected redirect {}", location);
        assert_eq!(query_param(&location, "state").as_deref(), Some("xyz"));
        query_param(&location, "code").expect("redirect carries a code")
    }

    /// Authorization-code grant with [`VERIFIER`], authenticated with HTTP Basic.
    pub async fn exchange_code(&self, client: &OAuthClient, secret: &str, code: &str) -> Response<Body> {
        let body = format!(
            "grant_type=authorization_code&code={}&redirect_uri={}&code_verifier={}",
            urlencoding::encode(code),
            urlencoding::encode(REDIRECT_URI),
            VERIFIER
        );
        self.send(form_request("/oauth/token", &body, Some((&client.client_id, secret))))
            .await
    }
}

// ==================== Request Helpers ====================

pub fn authorize_query(client_id: &str, scope: &str, state: &str) -> String {
    serde_urlencoded::to_string([
        ("response_type", "code"),
        ("client_id", client_id),
        ("redirect_uri", REDIRECT_URI),
        ("scope", scope),
        ("state", state),
        ("code_challenge", &basaltpass_auth::utils::pkce::s256_challenge(VERIFIER)),
        ("code_challenge_method", "S256"),
    ])
    .unwrap()
}

pub fn basic(client_id: &str, secret: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{}:{}", client_id, secret)))
}

pub fn form_request(uri: &str, body: &str, credentials: Option<(&str, &str)>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
    if let Some((id, secret)) = credentials {
        builder = builder.header(header::AUTHORIZATION, basic(id, secret));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn json_request(method: &str, uri: &str, body: Value, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

pub fn get_request(uri: &str, bearer: Option<&str>) -> Request<Body> {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(token) = bearer {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    builder.body(Body::empty()).unwrap()
}

pub fn s2s_request(uri: &str, client_id: &str, secret: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .header("x-client-id", client_id)
        .header("x-client-secret", secret)
        .body(Body::empty())
        .unwrap()
}

pub async fn body_json(res: Response<Body>) -> Value {
    let bytes = to_bytes(res.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap_or(Value::Null)
}

pub fn location(res: &Response<Body>) -> String {
    res.headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

pub fn query_param(url: &str, name: &str) -> Option<String> {
    let (_, query) = url.split_once('?')?;
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .ok()?
        .into_iter()
        .find(|(k, _)| k == name)
        .map(|(_, v)| v)
}

