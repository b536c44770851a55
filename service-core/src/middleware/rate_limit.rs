use crate::error::AppError;
use axum::{
    extract::{Request, State},
    http::{Extensions, HeaderMap},
    middleware::Next,
    response::Response,
};
use dashmap::DashMap;
use governor::{
    clock::{Clock, DefaultClock},
    state::{keyed::DashMapStateStore, InMemoryState, NotKeyed},
    Quota, RateLimiter,
};
use std::{net::SocketAddr, num::NonZeroU32, sync::Arc, time::Duration};

/// Rate limiter for global/unkeyed use
pub type UnkeyedRateLimiter = Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>;

/// Rate limiter keyed by IP address
pub type IpRateLimiter = Arc<RateLimiter<SocketAddr, DashMapStateStore<SocketAddr>, DefaultClock>>;

/// Rate limiter keyed by client ID with per-client quotas
pub type ClientRateLimiter = Arc<DashMap<String, UnkeyedRateLimiter>>;

/// Trait for extracting rate limit info from request extensions
pub trait HasRateLimitInfo: Send + Sync + 'static {
    fn client_id(&self) -> String;
    fn rate_limit_per_min(&self) -> u32;
}

/// `attempts` requests per `window_seconds`, all of which may be spent as one burst.
fn quota(attempts: u32, window_seconds: u64) -> Quota {
    let burst = NonZeroU32::new(attempts.max(1)).unwrap_or(NonZeroU32::MIN);
    let period = Duration::from_millis((window_seconds * 1000) / u64::from(burst.get()));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

/// Create an unkeyed rate limiter
pub fn create_unkeyed_rate_limiter(attempts: u32, window_seconds: u64) -> UnkeyedRateLimiter {
    Arc::new(RateLimiter::direct(quota(attempts, window_seconds)))
}

/// Create a keyed rate limiter (by IP)
pub fn create_ip_rate_limiter(attempts: u32, window_seconds: u64) -> IpRateLimiter {
    Arc::new(RateLimiter::dashmap(quota(attempts, window_seconds)))
}

/// Create a new ClientRateLimiter
pub fn create_client_rate_limiter() -> ClientRateLimiter {
    Arc::new(DashMap::new())
}

/// Resolve the caller address, preferring the first `x-forwarded-for` hop.
pub fn client_addr(request: &Request) -> Option<SocketAddr> {
    caller_addr(request.headers(), request.extensions())
}

/// Same as [`client_addr`], for extractors that only see the request parts.
pub fn caller_addr(headers: &HeaderMap, extensions: &Extensions) -> Option<SocketAddr> {
    let forwarded_ip = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.split(',').next())
        .and_then(|s| s.trim().parse::<std::net::IpAddr>().ok());

    if let Some(ip) = forwarded_ip {
        return Some(SocketAddr::new(ip, 0));
    }

    extensions
        .get::<axum::extract::ConnectInfo<SocketAddr>>()
        .map(|axum::extract::ConnectInfo(addr)| *addr)
}

/// Middleware for IP-based rate limiting
pub async fn ip_rate_limit_middleware(
    State(limiter): State<IpRateLimiter>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    // Every connection from one IP shares a bucket.
    let addr = client_addr(&request).map(|addr| SocketAddr::new(addr.ip(), 0));

    match addr {
        Some(addr) => match limiter.check_key(&addr) {
            Ok(_) => Ok(next.run(request).await),
            Err(negative) => {
                let wait_time = negative.wait_time_from(DefaultClock::default().now());
                tracing::warn!(ip = %addr.ip(), "IP rate limit exceeded");
                Err(AppError::TooManyRequests(
                    "Too many requests from this IP. Please try again later.".to_string(),
                    Some(wait_time.as_secs()),
                ))
            }
        },
        None => {
            tracing::warn!("Could not determine IP for rate limiting");
            Ok(next.run(request).await)
        }
    }
}

/// Spends one request of the caller's per-minute quota.
pub fn check_client_quota<T: HasRateLimitInfo>(
    limiter_map: &ClientRateLimiter,
    info: &T,
) -> Result<(), AppError> {
    let client_id = info.client_id();
    let limit_per_min = info.rate_limit_per_min();

    if limit_per_min == 0 {
        return Ok(());
    }

    let limiter = limiter_map
        .entry(client_id.clone())
        .or_insert_with(|| create_unkeyed_rate_limiter(limit_per_min, 60))
        .clone();

    limiter.check().map_err(|negative| {
        let wait_time = negative.wait_time_from(DefaultClock::default().now());
        tracing::warn!(client_id = %client_id, "Client rate limit exceeded");
        AppError::TooManyRequests(
            "Client rate limit exceeded".to_string(),
            Some(wait_time.as_secs()),
        )
    })
}
