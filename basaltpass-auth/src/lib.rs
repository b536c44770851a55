pub mod config;
pub mod db;
pub mod dtos;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use service_core::axum::{
    extract::{Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::{from_fn, from_fn_with_state, Next},
    routing::{delete, get, post, put},
    Json, Router,
};
use service_core::middleware::{
    deadline::{deadline_middleware, Deadline},
    rate_limit::{
        create_client_rate_limiter, create_ip_rate_limiter, ip_rate_limit_middleware,
        ClientRateLimiter, IpRateLimiter,
    },
    security_headers::security_headers_middleware,
    tracing::request_id_middleware,
};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::{
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
    Modify, OpenApi,
};
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AuthConfig, Environment, SwaggerMode};
use crate::middleware::{
    console_auth_middleware, maintenance_middleware, require_console_scope, require_permission,
    require_role, require_s2s_scope, require_super_admin, s2s_auth_middleware, tenant_middleware,
};
use crate::models::{permissions, TenantRole};
use crate::services::{
    AuditService, ClientRegistry, ConsoleScope, ConsoleTokenIssuer, EmailProvider, KeyManager,
    OAuthServer, SessionService, SettingsCache, TenantGuard,
};
use crate::store::Store;
use crate::utils::scope;
use service_core::error::AppError;
use std::sync::Arc;
use std::time::Duration;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::well_known::openid_configuration,
        handlers::well_known::jwks,
        handlers::oauth::authorize::authorize,
        handlers::oauth::authorize::consent,
        handlers::oauth::token::token,
        handlers::oauth::token::introspect,
        handlers::oauth::token::revoke,
        handlers::oauth::userinfo::userinfo,
        handlers::oauth::userinfo::userinfo_post,
        handlers::auth::registration::register,
        handlers::auth::registration::verify_email,
        handlers::auth::session::login,
        handlers::auth::session::verify_two_factor,
        handlers::auth::session::refresh,
        handlers::auth::password::request_password_reset,
        handlers::auth::password::confirm_password_reset,
        handlers::auth::console::console_authorize,
        handlers::auth::console::console_exchange,
        handlers::tenant::tenant_context,
        handlers::tenant::create_app,
        handlers::tenant::create_client,
        handlers::tenant::list_clients,
        handlers::tenant::regenerate_client_secret,
        handlers::tenant::revoke_client_tokens,
        handlers::tenant::change_member_role,
        handlers::admin::get_maintenance,
        handlers::admin::set_maintenance,
        handlers::admin::rotate_signing_key,
        handlers::admin::set_tenant_status,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            dtos::auth::ConsoleTokenResponse,
            dtos::auth::VerifyTwoFactorRequest,
            dtos::auth::RefreshRequest,
            dtos::auth::PasswordResetRequest,
            dtos::auth::PasswordResetConfirm,
            dtos::auth::VerifyEmailRequest,
            dtos::auth::MessageResponse,
            dtos::auth::ConsoleAuthorizeRequest,
            dtos::auth::ConsoleCodeResponse,
            dtos::auth::ConsoleExchangeRequest,
            dtos::oauth::ConsentRequest,
            dtos::oauth::IntrospectionRequest,
            dtos::oauth::RevocationRequest,
            dtos::tenant::CreateAppRequest,
            dtos::tenant::AppResponse,
            dtos::tenant::CreateClientRequest,
            dtos::tenant::ClientSecretResponse,
            dtos::tenant::ClientListResponse,
            dtos::tenant::RevokedTokensResponse,
            dtos::tenant::ChangeRoleRequest,
            dtos::tenant::MemberResponse,
            dtos::admin::MaintenanceBody,
            dtos::admin::RotateKeyResponse,
            dtos::admin::TenantStatusRequest,
            dtos::admin::TenantStatusResponse,
            services::oauth::AuthorizeParams,
            services::oauth::TokenRequest,
            services::oauth::TokenResponse,
            services::oauth::IntrospectionResponse,
            services::TenantContext,
            services::ConsoleScope,
            models::App,
            models::ClientSummary,
            models::SanitizedUser,
            models::TenantRole,
            models::TenantStatus,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "OAuth", description = "OAuth 2.0 and OpenID Connect endpoints"),
        (name = "Authentication", description = "Console login, registration and password flows"),
        (name = "Console", description = "Console scope switching"),
        (name = "Tenant", description = "Tenant apps, clients and members"),
        (name = "Admin", description = "Super-admin operations"),
        (name = "Well-Known", description = "Public service metadata"),
        (name = "Observability", description = "Service health"),
    )
)]
pub struct ApiDoc;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn Store>,
    pub email: Arc<dyn EmailProvider>,
    pub audit: AuditService,
    pub keys: Arc<KeyManager>,
    pub clients: Arc<ClientRegistry>,
    pub console_tokens: Arc<ConsoleTokenIssuer>,
    pub oauth: Arc<OAuthServer>,
    pub sessions: Arc<SessionService>,
    pub tenant_guard: TenantGuard,
    pub settings: Arc<SettingsCache>,
    pub login_rate_limiter: IpRateLimiter,
    pub register_rate_limiter: IpRateLimiter,
    pub password_reset_rate_limiter: IpRateLimiter,
    pub ip_rate_limiter: IpRateLimiter,
    pub s2s_rate_limiter: ClientRateLimiter,
}

impl AppState {
    /// Wires every service over `store`. Loads or creates the signing key.
    pub async fn build(
        config: AuthConfig,
        store: Arc<dyn Store>,
        email: Arc<dyn EmailProvider>,
    ) -> Result<Self, AppError> {
        let audit = AuditService::new(store.clone());

        let keys = KeyManager::init(
            store.clone(),
            config.oauth.signing_key_path.as_deref(),
            config.oauth.key_retirement_hours,
        )
        .await
        .map_err(|e| AppError::ConfigError(anyhow::Error::new(e)))?;
        let keys = Arc::new(keys);

        let clients = Arc::new(ClientRegistry::new(store.clone(), audit.clone()));
        let console_tokens = Arc::new(ConsoleTokenIssuer::new(&config.console));
        let oauth = Arc::new(OAuthServer::new(
            store.clone(),
            clients.clone(),
            keys.clone(),
            audit.clone(),
            config.oauth.clone(),
        ));
        let sessions = Arc::new(SessionService::new(
            store.clone(),
            console_tokens.clone(),
            email.clone(),
            audit.clone(),
            config.console.refresh_token_ttl_days,
            config.ui.base_url.clone(),
        ));
        let tenant_guard = TenantGuard::new(store.clone(), audit.clone());
        let settings = Arc::new(SettingsCache::new(
            store.clone(),
            Duration::from_secs(config.settings_cache_ttl_seconds),
        ));

        let limits = &config.rate_limit;
        let login_rate_limiter =
            create_ip_rate_limiter(limits.login_attempts, limits.login_window_seconds);
        let register_rate_limiter =
            create_ip_rate_limiter(limits.register_attempts, limits.register_window_seconds);
        let password_reset_rate_limiter = create_ip_rate_limiter(
            limits.password_reset_attempts,
            limits.password_reset_window_seconds,
        );
        let ip_rate_limiter =
            create_ip_rate_limiter(limits.global_ip_limit, limits.global_ip_window_seconds);
        tracing::info!("Rate limiters initialized: Login, Register, Password Reset, S2S and Global IP");

        Ok(Self {
            config,
            store,
            email,
            audit,
            keys,
            clients,
            console_tokens,
            oauth,
            sessions,
            tenant_guard,
            settings,
            login_rate_limiter,
            register_rate_limiter,
            password_reset_rate_limiter,
            ip_rate_limiter,
            s2s_rate_limiter: create_client_rate_limiter(),
        })
    }
}

fn oauth_routes() -> Router<AppState> {
    Router::new()
        .route("/oauth/authorize", get(handlers::oauth::authorize))
        .route("/oauth/consent", post(handlers::oauth::consent))
        .route("/oauth/token", post(handlers::oauth::token))
        .route("/oauth/introspect", post(handlers::oauth::introspect))
        .route("/oauth/revoke", post(handlers::oauth::revoke))
        .route(
            "/oauth/userinfo",
            get(handlers::oauth::userinfo).post(handlers::oauth::userinfo_post),
        )
}

fn auth_routes(state: &AppState) -> Router<AppState> {
    let login_route = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route_layer(from_fn_with_state(
            state.login_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let register_route = Router::new()
        .route("/auth/register", post(handlers::auth::register))
        .route_layer(from_fn_with_state(
            state.register_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let reset_request_route = Router::new()
        .route(
            "/auth/password/reset-request",
            post(handlers::auth::request_password_reset),
        )
        .route_layer(from_fn_with_state(
            state.password_reset_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ));

    let console_route = Router::new()
        .route(
            "/auth/console/authorize",
            post(handlers::auth::console_authorize),
        )
        .route_layer(from_fn_with_state(state.clone(), console_auth_middleware));

    Router::new()
        .merge(login_route)
        .merge(register_route)
        .merge(reset_request_route)
        .merge(console_route)
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/verify-2fa", post(handlers::auth::verify_two_factor))
        .route("/auth/verify-email", post(handlers::auth::verify_email))
        .route(
            "/auth/password/reset",
            post(handlers::auth::confirm_password_reset),
        )
        .route(
            "/auth/console/exchange",
            post(handlers::auth::console_exchange),
        )
}

/// Layers run outermost first: console token, `scp=tenant`, tenant
/// resolution, then the per-route role or permission check.
fn tenant_routes(state: &AppState) -> Router<AppState> {
    let member_routes = Router::new()
        .route("/tenant/context", get(handlers::tenant::tenant_context))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_role(TenantRole::Member, req, next)
        }));

    let admin_routes = Router::new()
        .route("/tenant/apps", post(handlers::tenant::create_app))
        .route(
            "/tenant/apps/:app_id/clients",
            post(handlers::tenant::create_client),
        )
        .route(
            "/tenant/clients/:client_id/secret",
            post(handlers::tenant::regenerate_client_secret),
        )
        .route(
            "/tenant/clients/:client_id/tokens",
            delete(handlers::tenant::revoke_client_tokens),
        )
        .route(
            "/tenant/members/:user_id/role",
            put(handlers::tenant::change_member_role),
        )
        .route_layer(from_fn(|req: Request, next: Next| {
            require_role(TenantRole::Admin, req, next)
        }));

    let permission_routes = Router::new()
        .route("/tenant/clients", get(handlers::tenant::list_clients))
        .route_layer(from_fn_with_state(
            state.clone(),
            |state: State<AppState>, req: Request, next: Next| {
                require_permission(state, permissions::OAUTH_CLIENT_READ, req, next)
            },
        ))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_role(TenantRole::Member, req, next)
        }));

    Router::new()
        .merge(member_routes)
        .merge(admin_routes)
        .merge(permission_routes)
        .route_layer(from_fn_with_state(state.clone(), tenant_middleware))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_console_scope(&[ConsoleScope::Tenant], req, next)
        }))
        .route_layer(from_fn_with_state(state.clone(), console_auth_middleware))
}

fn admin_routes(state: &AppState) -> Router<AppState> {
    Router::new()
        .route(
            "/admin/settings/maintenance",
            get(handlers::admin::get_maintenance).put(handlers::admin::set_maintenance),
        )
        .route(
            "/admin/oauth/keys/rotate",
            post(handlers::admin::rotate_signing_key),
        )
        .route(
            "/admin/tenants/:tenant_id/status",
            put(handlers::admin::set_tenant_status),
        )
        .route_layer(from_fn_with_state(state.clone(), require_super_admin))
        .route_layer(from_fn_with_state(state.clone(), console_auth_middleware))
}

fn s2s_routes(state: &AppState) -> Router<AppState> {
    let user_routes = Router::new()
        .route("/s2s/users/lookup", get(handlers::s2s::lookup_user))
        .route("/s2s/users/:id", get(handlers::s2s::get_user))
        .route_layer(from_fn(|req: Request, next: Next| {
            require_s2s_scope(scope::S2S_USER_READ, req, next)
        }));

    let rbac_routes = Router::new()
        .route("/s2s/users/:id/roles", get(handlers::s2s::user_roles))
        .route(
            "/s2s/users/:id/role-codes",
            get(handlers::s2s::user_role_codes),
        )
        .route(
            "/s2s/users/:id/permissions",
            get(handlers::s2s::user_permissions),
        )
        .route_layer(from_fn(|req: Request, next: Next| {
            require_s2s_scope(scope::S2S_RBAC_READ, req, next)
        }));

    Router::new()
        .route("/s2s/health", get(handlers::s2s::health))
        .route("/s2s/me", get(handlers::s2s::me))
        .merge(user_routes)
        .merge(rbac_routes)
        .route_layer(from_fn_with_state(state.clone(), s2s_auth_middleware))
}

fn cors_layer(config: &AuthConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .security
        .allowed_origins
        .iter()
        .filter_map(|o| match o.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                tracing::error!(origin = %o, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            header::AUTHORIZATION,
            header::CONTENT_TYPE,
            HeaderName::from_static("x-client-id"),
            HeaderName::from_static("x-client-secret"),
            HeaderName::from_static("x-request-id"),
        ])
}

pub async fn build_router(state: AppState) -> Result<Router, AppError> {
    let mut app = Router::new()
        .route("/health", get(health_check))
        .route(
            "/.well-known/openid-configuration",
            get(handlers::well_known::openid_configuration),
        )
        .route("/oauth/jwks", get(handlers::well_known::jwks))
        .route("/.well-known/jwks.json", get(handlers::well_known::jwks));

    // Only add Swagger UI if enabled in config
    let swagger_enabled = match state.config.environment {
        Environment::Dev => true,
        Environment::Prod => state.config.swagger.enabled == SwaggerMode::Public,
    };

    if swagger_enabled {
        app =
            app.merge(SwaggerUi::new("/docs").url("/.well-known/openapi.json", ApiDoc::openapi()));
    }

    let app = app
        .merge(oauth_routes())
        .merge(auth_routes(&state))
        .merge(tenant_routes(&state))
        .merge(admin_routes(&state))
        .merge(s2s_routes(&state))
        .with_state(state.clone())
        .layer(from_fn_with_state(state.clone(), maintenance_middleware))
        .layer(from_fn_with_state(
            state.ip_rate_limiter.clone(),
            ip_rate_limit_middleware,
        ))
        .layer(from_fn_with_state(
            Deadline(Duration::from_secs(state.config.request_timeout_seconds)),
            deadline_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(
            |request: &service_core::axum::http::Request<_>| {
                let request_id = request
                    .headers()
                    .get("x-request-id")
                    .and_then(|value| value.to_str().ok())
                    .unwrap_or("-");

                tracing::info_span!(
                    "http_request",
                    request_id = %request_id,
                    method = %request.method(),
                    uri = %request.uri().path(),
                    version = ?request.version(),
                    user_id = tracing::field::Empty,
                )
            },
        ))
        .layer(from_fn(request_id_middleware))
        .layer(from_fn(security_headers_middleware))
        .layer(cors_layer(&state.config));

    Ok(app)
}

/// Service health check
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Service is unhealthy")
    ),
    tag = "Observability"
)]
pub async fn health_check(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, AppError> {
    state.store.ping().await.map_err(|e| {
        tracing::error!(error = %e, "Store health check failed");
        AppError::ServiceUnavailable(Some("Store unavailable".to_string()))
    })?;

    Ok(Json(serde_json::json!({
        "status": "healthy",
        "service": state.config.service_name,
        "version": state.config.service_version,
        "environment": format!("{:?}", state.config.environment),
        "checks": {
            "store": "up"
        }
    })))
}
