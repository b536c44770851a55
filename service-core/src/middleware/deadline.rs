//! Per-request deadline.
//!
//! The whole downstream future is dropped when the deadline passes, so any
//! open sqlx transaction is rolled back by its `Drop` and nothing partial is
//! committed.
//!
//! The timeout body follows the error convention of the route family it
//! interrupts: RFC 6749 `{error, error_description}` under `/oauth/`, the
//! `{data, error, request_id}` envelope under `/s2s/`, and [`AppError`]
//! everywhere else.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use std::time::Duration;

use super::tracing::RequestId;
use crate::error::AppError;

#[derive(Debug, Clone, Copy)]
pub struct Deadline(pub Duration);

const TIMEOUT_MESSAGE: &str = "request deadline exceeded";

fn timeout_response(path: &str, request_id: Option<String>) -> Response {
    let status = StatusCode::INTERNAL_SERVER_ERROR;
    if path.starts_with("/oauth/") {
        return (
            status,
            Json(serde_json::json!({
                "error": "server_error",
                "error_description": TIMEOUT_MESSAGE,
            })),
        )
            .into_response();
    }
    if path.starts_with("/s2s/") {
        return (
            status,
            Json(serde_json::json!({
                "data": null,
                "error": { "code": "server_error", "message": TIMEOUT_MESSAGE },
                "request_id": request_id,
            })),
        )
            .into_response();
    }
    AppError::InternalError(anyhow::anyhow!(TIMEOUT_MESSAGE)).into_response()
}

pub async fn deadline_middleware(
    State(Deadline(limit)): State<Deadline>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let request_id = request.extensions().get::<RequestId>().map(|id| id.0.clone());

    match tokio::time::timeout(limit, next.run(request)).await {
        Ok(response) => response,
        Err(_) => {
            tracing::error!(
                method = %method,
                path = %path,
                timeout_ms = limit.as_millis() as u64,
                "Request deadline exceeded"
            );
            timeout_response(&path, request_id)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{body::Body, middleware::from_fn_with_state, routing::get, Router};
    use tower::ServiceExt;

    async fn slow() -> &'static str {
        tokio::time::sleep(Duration::from_millis(200)).await;
        "late"
    }

    fn app(limit_ms: u64) -> Router {
        Router::new()
            .route("/fast", get(|| async { "ok" }))
            .route("/oauth/slow", get(slow))
            .route("/s2s/slow", get(slow))
            .route("/tenant/slow", get(slow))
            .layer(from_fn_with_state(
                Deadline(Duration::from_millis(limit_ms)),
                deadline_middleware,
            ))
    }

    #[tokio::test]
    async fn test_fast_request_passes() {
        let res = app(100)
            .oneshot(Request::builder().uri("/fast").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    async fn timed_out(uri: &str) -> serde_json::Value {
        let res = app(20)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(res.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_slow_oauth_request_returns_server_error() {
        let body = timed_out("/oauth/slow").await;
        assert_eq!(body["error"], "server_error");
        assert_eq!(body["error_description"], TIMEOUT_MESSAGE);
    }

    #[tokio::test]
    async fn test_timeout_body_follows_route_family() {
        let body = timed_out("/s2s/slow").await;
        assert!(body["data"].is_null());
        assert_eq!(body["error"]["code"], "server_error");

        let body = timed_out("/tenant/slow").await;
        assert_eq!(body["error"], "Internal server error");
        assert!(body.get("error_description").is_none());
    }
}
