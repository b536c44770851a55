use chrono::Utc;
use serde_json::{Map, Value};

use super::{OAuthError, OAuthServer};
use crate::models::User;
use crate::utils::{scope, token::digest};

/// OIDC claims released for `scopes`. `sub` is always present.
pub fn claims_for(user: &User, scopes: &[String]) -> Value {
    let mut claims = Map::new();
    claims.insert("sub".into(), Value::from(user.user_id.to_string()));

    if scope::contains(scopes, scope::PROFILE) {
        claims.insert("name".into(), Value::from(user.display_name()));
        claims.insert("nickname".into(), Value::from(user.nickname.clone()));
        claims.insert("picture".into(), Value::from(user.avatar_url.clone()));
        claims.insert("updated_at".into(), Value::from(user.updated_utc.timestamp()));
    }
    if scope::contains(scopes, scope::EMAIL) {
        claims.insert("email".into(), Value::from(user.email.clone()));
        claims.insert("email_verified".into(), Value::from(user.email_verified));
    }
    if scope::contains(scopes, scope::PHONE) {
        claims.insert("phone_number".into(), Value::from(user.phone.clone()));
        claims.insert("phone_number_verified".into(), Value::from(user.phone_verified));
    }

    Value::Object(claims)
}

impl OAuthServer {
    #[tracing::instrument(skip(self, token))]
    pub async fn userinfo(&self, token: &str) -> Result<Value, OAuthError> {
        let invalid = || OAuthError::invalid_token("the access token is invalid or expired");

        let record = self
            .store
            .find_access_token(&digest(token))
            .await?
            .filter(|t| t.is_active(Utc::now()))
            .ok_or_else(invalid)?;
        let user_id = record.user_id.ok_or_else(invalid)?;

        let client = self
            .store
            .find_client(&record.client_id)
            .await?
            .filter(|c| c.is_active)
            .ok_or_else(invalid)?;
        let tenant_active = match self.store.find_app(client.app_id).await? {
            Some(app) => self
                .store
                .find_tenant(app.tenant_id)
                .await?
                .is_some_and(|t| t.is_active()),
            None => false,
        };
        if !tenant_active {
            return Err(invalid());
        }

        let user = self
            .store
            .find_user(user_id)
            .await?
            .filter(User::can_obtain_tokens)
            .ok_or_else(invalid)?;

        if !scope::contains(&record.scopes, scope::OPENID) {
            return Err(OAuthError::insufficient_scope("the openid scope is required"));
        }
        Ok(claims_for(&user, &record.scopes))
    }
}
