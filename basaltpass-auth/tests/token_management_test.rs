mod common;

use axum::http::StatusCode;
use common::*;
use serde_json::Value;

const SCOPE: &str = "openid profile email";

async fn introspect(app: &TestApp, token: &str, client_id: &str, secret: &str) -> Value {
    let res = app
        .send(form_request(
            "/oauth/introspect",
            &format!("token={}", token),
            Some((client_id, secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    body_json(res).await
}

#[tokio::test]
async fn test_client_credentials_grant() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app
        .seed_client_with_scopes(&tenant, &admin, &["openid", "s2s.user.read", "s2s.rbac.read"])
        .await;

    let res = app
        .send(form_request(
            "/oauth/token",
            "grant_type=client_credentials&scope=s2s.user.read+openid",
            Some((&client.client_id, &secret)),
        ))
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    let body = body_json(res).await;
    assert_eq!(body["scope"], "s2s.user.read");
    assert!(body.get("refresh_token").is_none());
    assert!(body.get("id_token").is_none());
}

#[tokio::test]
async fn test_client_credentials_with_form_authentication() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app
        .seed_client_with_scopes(&tenant, &admin, &["s2s.read"])
        .await;

    let body = format!(
        "grant_type=client_credentials&client_id={}&client_secret={}",
        client.client_id, secret
    );
    let res = app.send(form_request("/oauth/token", &body, None)).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["scope"], "s2s.read");
}

#[tokio::test]
async fn test_client_credentials_requires_s2s_registration() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app.seed_client(&tenant, &admin).await;

    let res = app
        .send(form_request(
            "/oauth/token",
            "grant_type=client_credentials",
            Some((&client.client_id, &secret)),
        ))
        .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "unauthorized_client");
}

#[tokio::test]
async fn test_credentials_in_header_and_body_rejected() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app
        .seed_client_with_scopes(&tenant, &admin, &["s2s.read"])
        .await;

    let res = app
        .send(form_request(
            "/oauth/token",
            &format!("grant_type=client_credentials&client_secret={}", secret),
            Some((&client.client_id, &secret)),
        ))
        .await;

    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "invalid_request");
}

#[tokio::test]
async fn test_introspection_is_isolated_per_client() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app.seed_client(&tenant, &admin).await;
    let (other, other_secret) = app.seed_client(&tenant, &admin).await;
    let user = app.seed_user("alice@example.com").await;

    let code = app.authorization_code(&client, &user, SCOPE).await;
    let tokens = body_json(app.exchange_code(&client, &secret, &code).await).await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    let own = introspect(&app, access, &client.client_id, &secret).await;
    assert_eq!(own["active"], true);
    assert_eq!(own["client_id"], client.client_id);
    assert_eq!(own["sub"], user.user_id.to_string());
    assert_eq!(own["username"], "alice@example.com");
    assert_eq!(own["scope"], SCOPE);
    assert_eq!(own["token_type"], "Bearer");

    let own_refresh = introspect(&app, refresh, &client.client_id, &secret).await;
    assert_eq!(own_refresh["active"], true);
    assert_eq!(own_refresh["token_type"], "refresh_token");

    let foreign = introspect(&app, access, &other.client_id, &other_secret).await;
    assert_eq!(foreign, serde_json::json!({ "active": false }));

    let unknown = introspect(&app, "bp_at_unknown", &client.client_id, &secret).await;
    assert_eq!(unknown["active"], false);
}

#[tokio::test]
async fn test_introspection_requires_client_authentication() {
    let app = spawn_app().await;
    let res = app
        .send(form_request("/oauth/introspect", "token=anything", None))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["error"], "invalid_client");
}

#[tokio::test]
async fn test_revocation() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app.seed_client(&tenant, &admin).await;
    let (other, other_secret) = app.seed_client(&tenant, &admin).await;
    let user = app.seed_user("alice@example.com").await;

    let code = app.authorization_code(&client, &user, SCOPE).await;
    let tokens = body_json(app.exchange_code(&client, &secret, &code).await).await;
    let access = tokens["access_token"].as_str().unwrap();
    let refresh = tokens["refresh_token"].as_str().unwrap();

    // Another client's revocation is accepted and ignored.
    let res = app
        .send(form_request(
            "/oauth/revoke",
            &format!("token={}", access),
            Some((&other.client_id, &other_secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(introspect(&app, access, &client.client_id, &secret).await["active"], true);

    let res = app
        .send(form_request(
            "/oauth/revoke",
            &format!("token={}&token_type_hint=refresh_token", refresh),
            Some((&client.client_id, &secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(introspect(&app, refresh, &client.client_id, &secret).await["active"], false);

    // Unknown tokens are not an error.
    let res = app
        .send(form_request(
            "/oauth/revoke",
            "token=bp_rt_unknown",
            Some((&client.client_id, &secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_revocation_requires_token() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app.seed_client(&tenant, &admin).await;

    let res = app
        .send(form_request("/oauth/revoke", "", Some((&client.client_id, &secret))))
        .await;
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_json(res).await["error"], "invalid_request");
}
