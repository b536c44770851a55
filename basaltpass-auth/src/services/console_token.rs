//! HS256 console session tokens and single-use console codes.

use chrono::{Duration, Utc};
use dashmap::DashMap;
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::ServiceError;
use crate::config::ConsoleConfig;

const ACCESS_TYP: &str = "access";
const CONSOLE_CODE_TYP: &str = "console_code";

/// Which console surface a session may act upon.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum ConsoleScope {
    User,
    Tenant,
    Admin,
}

impl ConsoleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConsoleScope::User => "user",
            ConsoleScope::Tenant => "tenant",
            ConsoleScope::Admin => "admin",
        }
    }
}

impl std::str::FromStr for ConsoleScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ConsoleScope::User),
            "tenant" => Ok(ConsoleScope::Tenant),
            "admin" => Ok(ConsoleScope::Admin),
            _ => Err(format!("Invalid console scope: {}", s)),
        }
    }
}

/// Claims of a console access token. `tid` is a hint, never an authorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    pub scp: ConsoleScope,
    pub exp: i64,
    pub iat: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,
}

/// Claims of the short-lived code that upgrades a session to another console scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsoleCodeClaims {
    pub sub: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tid: Option<Uuid>,
    pub target: ConsoleScope,
    pub jti: String,
    pub exp: i64,
    pub iat: i64,
    pub typ: String,
}

pub struct ConsoleTokenIssuer {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_ttl: Duration,
    code_ttl: Duration,
    /// Redeemed code ids with their expiry, pruned as they age out.
    redeemed_codes: DashMap<String, i64>,
}

impl ConsoleTokenIssuer {
    pub fn new(config: &ConsoleConfig) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(config.jwt_secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.jwt_secret.as_bytes()),
            access_ttl: Duration::minutes(config.access_token_ttl_minutes),
            code_ttl: Duration::seconds(config.code_ttl_seconds),
            redeemed_codes: DashMap::new(),
        }
    }

    pub fn access_ttl_seconds(&self) -> i64 {
        self.access_ttl.num_seconds()
    }

    pub fn code_ttl_seconds(&self) -> i64 {
        self.code_ttl.num_seconds()
    }

    pub fn issue_access(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        scope: ConsoleScope,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = ConsoleClaims {
            sub: user_id,
            tid: tenant_id,
            scp: scope,
            exp: (now + self.access_ttl).timestamp(),
            iat: now.timestamp(),
            typ: Some(ACCESS_TYP.to_string()),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode console token: {}", e)))
    }

    /// Verifies signature, algorithm and expiry of a console access token.
    pub fn validate_access(&self, token: &str) -> Result<ConsoleClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);

        let claims = decode::<ConsoleClaims>(token, &self.decoding_key, &validation)
            .map_err(|e| {
                tracing::debug!(error = %e, "Console token rejected");
                ServiceError::InvalidToken
            })?
            .claims;

        match claims.typ.as_deref() {
            None | Some(ACCESS_TYP) => Ok(claims),
            Some(_) => Err(ServiceError::InvalidToken),
        }
    }

    pub fn issue_code(
        &self,
        user_id: Uuid,
        tenant_id: Option<Uuid>,
        target: ConsoleScope,
    ) -> Result<String, ServiceError> {
        let now = Utc::now();
        let claims = ConsoleCodeClaims {
            sub: user_id,
            tid: tenant_id,
            target,
            jti: Uuid::new_v4().to_string(),
            exp: (now + self.code_ttl).timestamp(),
            iat: now.timestamp(),
            typ: CONSOLE_CODE_TYP.to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| ServiceError::Internal(anyhow::anyhow!("Failed to encode console code: {}", e)))
    }

    /// Validates a console code and burns it. A second redemption fails.
    pub fn redeem_code(&self, code: &str) -> Result<ConsoleCodeClaims, ServiceError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_required_spec_claims(&["exp"]);
        validation.leeway = 0;

        let claims = decode::<ConsoleCodeClaims>(code, &self.decoding_key, &validation)
            .map_err(|_| ServiceError::InvalidCode)?
            .claims;
        if claims.typ != CONSOLE_CODE_TYP {
            return Err(ServiceError::InvalidCode);
        }

        let now = Utc::now().timestamp();
        self.redeemed_codes.retain(|_, exp| *exp >= now);
        if self.redeemed_codes.insert(claims.jti.clone(), claims.exp).is_some() {
            tracing::warn!(user_id = %claims.sub, "Console code reused");
            return Err(ServiceError::InvalidCode);
        }

        Ok(claims)
    }
}
