//! Authorization code model.

use chrono::{DateTime, Duration, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use crate::utils::pkce::{self, PkceMethod};

/// Single-use code bound to user, client, redirect URI and PKCE challenge.
///
/// `code_id` doubles as the family id of every token minted from the code.
#[derive(Debug, Clone, FromRow)]
pub struct AuthorizationCode {
    pub code_id: Uuid,
    pub code_hash: String,
    pub client_id: String,
    pub user_id: Uuid,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
    pub code_challenge: String,
    pub code_challenge_method: String,
    pub nonce: Option<String>,
    pub auth_time_utc: DateTime<Utc>,
    pub expiry_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

/// What the token endpoint presents when redeeming a code.
#[derive(Debug, Clone)]
pub struct CodeRedemption {
    pub client_id: String,
    pub redirect_uri: Option<String>,
    pub code_verifier: String,
}

/// Why a live code was refused. None of these consume the code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeRejection {
    Expired,
    ClientMismatch,
    RedirectMismatch,
    PkceMismatch,
}

impl CodeRejection {
    pub fn description(&self) -> &'static str {
        match self {
            CodeRejection::Expired => "authorization code expired",
            CodeRejection::ClientMismatch => "authorization code was issued to another client",
            CodeRejection::RedirectMismatch => "redirect_uri does not match the authorization request",
            CodeRejection::PkceMismatch => "code_verifier does not match code_challenge",
        }
    }
}

#[allow(clippy::too_many_arguments)]
impl AuthorizationCode {
    pub fn new(
        code_hash: String,
        client_id: String,
        user_id: Uuid,
        redirect_uri: String,
        scopes: Vec<String>,
        code_challenge: String,
        method: PkceMethod,
        nonce: Option<String>,
        auth_time_utc: DateTime<Utc>,
        ttl_seconds: i64,
    ) -> Self {
        let now = Utc::now();
        Self {
            code_id: Uuid::new_v4(),
            code_hash,
            client_id,
            user_id,
            redirect_uri,
            scopes,
            code_challenge,
            code_challenge_method: method.as_str().to_string(),
            nonce,
            auth_time_utc,
            expiry_utc: now + Duration::seconds(ttl_seconds),
            consumed_utc: None,
            created_utc: now,
        }
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed_utc.is_some()
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expiry_utc <= now
    }

    pub fn method(&self) -> PkceMethod {
        PkceMethod::parse(Some(&self.code_challenge_method)).unwrap_or(PkceMethod::S256)
    }

    /// Checks every binding of an unconsumed code. Replay is decided by the caller.
    pub fn check_redemption(
        &self,
        redemption: &CodeRedemption,
        now: DateTime<Utc>,
    ) -> Result<(), CodeRejection> {
        if self.is_expired(now) {
            return Err(CodeRejection::Expired);
        }
        if self.client_id != redemption.client_id {
            return Err(CodeRejection::ClientMismatch);
        }
        if redemption.redirect_uri.as_deref() != Some(self.redirect_uri.as_str()) {
            return Err(CodeRejection::RedirectMismatch);
        }
        if !pkce::verify(&redemption.code_verifier, &self.code_challenge, self.method()) {
            return Err(CodeRejection::PkceMismatch);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VERIFIER: &str = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
    const CHALLENGE: &str = "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM";

    fn code() -> AuthorizationCode {
        AuthorizationCode::new(
            "hash".to_string(),
            "c1".to_string(),
            Uuid::new_v4(),
            "https://app/cb".to_string(),
            vec!["openid".to_string()],
            CHALLENGE.to_string(),
            PkceMethod::S256,
            Some("n1".to_string()),
            Utc::now(),
            600,
        )
    }

    fn redemption() -> CodeRedemption {
        CodeRedemption {
            client_id: "c1".to_string(),
            redirect_uri: Some("https://app/cb".to_string()),
            code_verifier: VERIFIER.to_string(),
        }
    }

    #[test]
    fn test_valid_redemption() {
        assert_eq!(code().check_redemption(&redemption(), Utc::now()), Ok(()));
    }

    #[test]
    fn test_rejections() {
        let c = code();

        let mut r = redemption();
        r.client_id = "c2".to_string();
        assert_eq!(c.check_redemption(&r, Utc::now()), Err(CodeRejection::ClientMismatch));

        let mut r = redemption();
        r.redirect_uri = Some("https://app/cb/".to_string());
        assert_eq!(c.check_redemption(&r, Utc::now()), Err(CodeRejection::RedirectMismatch));

        let mut r = redemption();
        r.redirect_uri = None;
        assert_eq!(c.check_redemption(&r, Utc::now()), Err(CodeRejection::RedirectMismatch));

        let mut r = redemption();
        r.code_verifier = "WRONG".to_string();
        assert_eq!(c.check_redemption(&r, Utc::now()), Err(CodeRejection::PkceMismatch));

        let later = Utc::now() + Duration::seconds(601);
        assert_eq!(c.check_redemption(&redemption(), later), Err(CodeRejection::Expired));
    }
}
