use serde::Deserialize;
use utoipa::ToSchema;

use crate::services::oauth::AuthorizeParams;

/// Consent decision posted by the hosted consent screen. Carries the
/// original authorize parameters, which are validated again.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ConsentRequest {
    #[serde(flatten)]
    pub params: AuthorizeParams,
    /// `allow` or `deny`.
    #[schema(example = "allow")]
    pub action: String,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct IntrospectionRequest {
    pub token: Option<String>,
    #[schema(example = "access_token")]
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize, ToSchema)]
pub struct RevocationRequest {
    pub token: Option<String>,
    pub token_type_hint: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct UserInfoForm {
    pub access_token: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_consent_form_flattens_authorize_params() {
        let req: ConsentRequest = serde_urlencoded::from_str(
            "client_id=c1&redirect_uri=https%3A%2F%2Fapp%2Fcb&scope=openid+email&state=xyz&action=allow",
        )
        .unwrap();
        assert_eq!(req.action, "allow");
        assert_eq!(req.params.client_id.as_deref(), Some("c1"));
        assert_eq!(req.params.redirect_uri.as_deref(), Some("https://app/cb"));
        assert_eq!(req.params.scope.as_deref(), Some("openid email"));
    }
}
