//! HTTP handlers for basaltpass-auth.

pub mod admin;
pub mod auth;
pub mod oauth;
pub mod s2s;
pub mod tenant;
pub mod well_known;

use service_core::{
    axum::{async_trait, extract::FromRequestParts, http::request::Parts},
    middleware::rate_limit::caller_addr,
};
use std::convert::Infallible;

/// Caller IP for audit entries: first `x-forwarded-for` hop, else the peer
/// address. `None` when neither is known.
pub struct ClientIp(pub Option<String>);

#[async_trait]
impl<S> FromRequestParts<S> for ClientIp
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(ClientIp(
            caller_addr(&parts.headers, &parts.extensions).map(|addr| addr.ip().to_string()),
        ))
    }
}
