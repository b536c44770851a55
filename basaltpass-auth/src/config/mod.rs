use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;
use std::str::FromStr;

/// Authorization codes never live longer than this, whatever the environment says.
pub const MAX_CODE_TTL_SECONDS: i64 = 600;

#[derive(Debug, Clone, Deserialize)]
pub struct AuthConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub log_level: String,
    pub store_backend: StoreBackend,
    pub database: DatabaseConfig,
    pub console: ConsoleConfig,
    pub oauth: OAuthConfig,
    pub ui: UiConfig,
    pub security: SecurityConfig,
    pub s2s: S2sConfig,
    pub swagger: SwaggerConfig,
    pub rate_limit: RateLimitConfig,
    pub smtp: Option<SmtpConfig>,
    pub request_timeout_seconds: u64,
    pub settings_cache_ttl_seconds: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Postgres,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

/// HS256 console session settings.
#[derive(Clone, Deserialize)]
pub struct ConsoleConfig {
    pub jwt_secret: String,
    pub access_token_ttl_minutes: i64,
    pub refresh_token_ttl_days: i64,
    pub code_ttl_seconds: i64,
}

impl std::fmt::Debug for ConsoleConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleConfig")
            .field("jwt_secret", &"<redacted>")
            .field("access_token_ttl_minutes", &self.access_token_ttl_minutes)
            .field("refresh_token_ttl_days", &self.refresh_token_ttl_days)
            .field("code_ttl_seconds", &self.code_ttl_seconds)
            .finish()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    /// Fixed `iss`. When unset the issuer is derived from each request.
    pub issuer: Option<String>,
    pub code_ttl_seconds: i64,
    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_days: i64,
    pub id_token_ttl_seconds: i64,
    pub allow_plain_pkce: bool,
    pub auto_approve_prior_consent: bool,
    pub signing_key_path: Option<String>,
    pub key_retirement_hours: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UiConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub allowed_origins: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct S2sConfig {
    pub allow_query_credentials: bool,
    pub rate_limit_enabled: bool,
    pub requests_per_minute: u32,
    pub audit_enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwaggerConfig {
    pub enabled: SwaggerMode,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum SwaggerMode {
    Public,
    Disabled,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    pub login_attempts: u32,
    pub login_window_seconds: u64,
    pub register_attempts: u32,
    pub register_window_seconds: u64,
    pub password_reset_attempts: u32,
    pub password_reset_window_seconds: u64,
    pub global_ip_limit: u32,
    pub global_ip_window_seconds: u64,
}

#[derive(Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("from", &self.from)
            .finish_non_exhaustive()
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let common_config = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let is_prod = environment == Environment::Prod;

        let store_backend: StoreBackend = get_env("STORE_BACKEND", Some("postgres"), false)?
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;

        let smtp = match env::var("SMTP_HOST") {
            Ok(host) if !host.trim().is_empty() => Some(SmtpConfig {
                host,
                port: get_parsed("SMTP_PORT", "587")?,
                username: get_env("SMTP_USERNAME", None, is_prod)?,
                password: get_env("SMTP_PASSWORD", None, is_prod)?,
                from: get_env("SMTP_FROM", None, is_prod)?,
            }),
            _ => None,
        };

        let config = AuthConfig {
            common: common_config,
            environment,
            service_name: get_env("SERVICE_NAME", Some("basaltpass-auth"), false)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), false)?,
            log_level: get_env("LOG_LEVEL", Some("info"), false)?,
            store_backend,
            database: DatabaseConfig {
                url: match store_backend {
                    StoreBackend::Postgres => get_env("DATABASE_URL", None, is_prod)?,
                    StoreBackend::Memory => env::var("DATABASE_URL").unwrap_or_default(),
                },
                max_connections: get_parsed("DATABASE_MAX_CONNECTIONS", "10")?,
                min_connections: get_parsed("DATABASE_MIN_CONNECTIONS", "1")?,
            },
            console: ConsoleConfig {
                jwt_secret: resolve_jwt_secret(
                    env::var("JWT_SECRET").ok(),
                    env::var("BASALTPASS_DYNO_MODE").ok().as_deref(),
                )?,
                access_token_ttl_minutes: get_parsed("CONSOLE_ACCESS_TOKEN_TTL_MINUTES", "15")?,
                refresh_token_ttl_days: get_parsed("CONSOLE_REFRESH_TOKEN_TTL_DAYS", "7")?,
                code_ttl_seconds: get_parsed("CONSOLE_CODE_TTL_SECONDS", "30")?,
            },
            oauth: OAuthConfig {
                issuer: env::var("OAUTH_ISSUER")
                    .ok()
                    .map(|s| s.trim_end_matches('/').to_string())
                    .filter(|s| !s.is_empty()),
                code_ttl_seconds: get_parsed::<i64>("OAUTH_CODE_TTL_SECONDS", "600")?
                    .min(MAX_CODE_TTL_SECONDS),
                access_token_ttl_seconds: get_parsed("OAUTH_ACCESS_TOKEN_TTL_SECONDS", "3600")?,
                refresh_token_ttl_days: get_parsed("OAUTH_REFRESH_TOKEN_TTL_DAYS", "30")?,
                id_token_ttl_seconds: get_parsed("OAUTH_ID_TOKEN_TTL_SECONDS", "3600")?,
                allow_plain_pkce: get_parsed("OAUTH_ALLOW_PLAIN_PKCE", "true")?,
                auto_approve_prior_consent: get_parsed("OAUTH_AUTO_APPROVE_PRIOR_CONSENT", "false")?,
                signing_key_path: env::var("OAUTH_SIGNING_KEY_PATH")
                    .ok()
                    .filter(|s| !s.is_empty()),
                key_retirement_hours: get_parsed("OAUTH_KEY_RETIREMENT_HOURS", "24")?,
            },
            ui: UiConfig {
                base_url: get_env("UI_BASE_URL", Some("http://localhost:5173"), is_prod)?
                    .trim_end_matches('/')
                    .to_string(),
            },
            security: SecurityConfig {
                allowed_origins: get_env(
                    "ALLOWED_ORIGINS",
                    Some("http://localhost:5173"),
                    is_prod,
                )?
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            },
            s2s: S2sConfig {
                allow_query_credentials: get_parsed("S2S_ALLOW_QUERY_CREDENTIALS", "false")?,
                rate_limit_enabled: get_parsed("S2S_RATE_LIMIT_ENABLED", "true")?,
                requests_per_minute: get_parsed("S2S_REQUESTS_PER_MINUTE", "600")?,
                audit_enabled: get_parsed("S2S_AUDIT_ENABLED", "true")?,
            },
            swagger: SwaggerConfig {
                enabled: get_env("ENABLE_SWAGGER", Some("public"), false)?
                    .parse()
                    .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?,
            },
            rate_limit: RateLimitConfig {
                login_attempts: get_parsed("RATE_LIMIT_LOGIN_ATTEMPTS", "5")?,
                login_window_seconds: get_parsed("RATE_LIMIT_LOGIN_WINDOW_SECONDS", "900")?,
                register_attempts: get_parsed("RATE_LIMIT_REGISTER_ATTEMPTS", "3")?,
                register_window_seconds: get_parsed("RATE_LIMIT_REGISTER_WINDOW_SECONDS", "3600")?,
                password_reset_attempts: get_parsed("RATE_LIMIT_PASSWORD_RESET_ATTEMPTS", "3")?,
                password_reset_window_seconds: get_parsed(
                    "RATE_LIMIT_PASSWORD_RESET_WINDOW_SECONDS",
                    "3600",
                )?,
                global_ip_limit: get_parsed("RATE_LIMIT_GLOBAL_IP_LIMIT", "300")?,
                global_ip_window_seconds: get_parsed("RATE_LIMIT_GLOBAL_IP_WINDOW_SECONDS", "60")?,
            },
            smtp,
            request_timeout_seconds: get_parsed("REQUEST_TIMEOUT_SECONDS", "30")?,
            settings_cache_ttl_seconds: get_parsed("SETTINGS_CACHE_TTL_SECONDS", "30")?,
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "PORT must be greater than 0"
            )));
        }

        let positive = [
            ("CONSOLE_ACCESS_TOKEN_TTL_MINUTES", self.console.access_token_ttl_minutes),
            ("CONSOLE_REFRESH_TOKEN_TTL_DAYS", self.console.refresh_token_ttl_days),
            ("CONSOLE_CODE_TTL_SECONDS", self.console.code_ttl_seconds),
            ("OAUTH_CODE_TTL_SECONDS", self.oauth.code_ttl_seconds),
            ("OAUTH_ACCESS_TOKEN_TTL_SECONDS", self.oauth.access_token_ttl_seconds),
            ("OAUTH_REFRESH_TOKEN_TTL_DAYS", self.oauth.refresh_token_ttl_days),
            ("OAUTH_ID_TOKEN_TTL_SECONDS", self.oauth.id_token_ttl_seconds),
        ];
        if let Some((key, _)) = positive.iter().find(|(_, v)| *v <= 0) {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "{} must be positive",
                key
            )));
        }

        if self.oauth.key_retirement_hours < 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "OAUTH_KEY_RETIREMENT_HOURS must not be negative"
            )));
        }

        if self.store_backend == StoreBackend::Postgres && self.database.url.is_empty() {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "DATABASE_URL is required for the postgres store"
            )));
        }

        if self.environment == Environment::Prod {
            if self.security.allowed_origins.iter().any(|o| o == "*") {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "Wildcard CORS origin not allowed in production"
                )));
            }

            if self.store_backend == StoreBackend::Memory {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "STORE_BACKEND=memory is not allowed in production"
                )));
            }

            if self.smtp.is_none() {
                return Err(AppError::ConfigError(anyhow::anyhow!(
                    "SMTP_HOST is required in production"
                )));
            }

            if self.swagger.enabled == SwaggerMode::Public {
                tracing::warn!("Swagger UI is publicly accessible in production");
            }
        }

        Ok(())
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Prod
    }
}

/// Picks the console signing secret. The fixed `test-secret` is only handed out
/// when the process runs in test dyno mode.
pub fn resolve_jwt_secret(
    secret: Option<String>,
    dyno_mode: Option<&str>,
) -> Result<String, AppError> {
    match secret.filter(|s| !s.trim().is_empty()) {
        Some(secret) => Ok(secret),
        None if dyno_mode == Some("test") => Ok("test-secret".to_string()),
        None => Err(AppError::ConfigError(anyhow::anyhow!(
            "JWT_SECRET is required but not set"
        ))),
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required in production but not set",
                    key
                ))))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(format!(
                    "{} is required but not set",
                    key
                ))))
            }
        }
    }
}

/// Reads `key` (or `default`) and parses it, reporting the variable name on failure.
fn get_parsed<T>(key: &str, default: &str) -> Result<T, AppError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = get_env(key, Some(default), false)?;
    raw.trim().parse().map_err(|e: T::Err| {
        AppError::ConfigError(anyhow::anyhow!("{} has an invalid value: {}", key, e))
    })
}

impl FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

impl FromStr for StoreBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "postgres" => Ok(StoreBackend::Postgres),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(format!("Invalid store backend: {}", s)),
        }
    }
}

impl FromStr for SwaggerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "public" => Ok(SwaggerMode::Public),
            "disabled" => Ok(SwaggerMode::Disabled),
            _ => Err(format!("Invalid swagger mode: {}", s)),
        }
    }
}
