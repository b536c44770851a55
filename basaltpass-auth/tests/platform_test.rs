mod common;

use axum::http::{header, StatusCode};
use basaltpass_auth::{
    models::TenantRole,
    services::{keys::signing_key_from_pem, ConsoleScope, MockEmailService},
    store::MemoryStore,
    AppState,
};
use common::*;
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde_json::{json, Value};
use std::{io::Write, sync::Arc};

#[tokio::test]
async fn test_health_check() {
    let app = spawn_app().await;
    let res = app.send(get_request("/health", None)).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers().get("x-request-id").is_some());
    let body = body_json(res).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["store"], "up");
}

#[tokio::test]
async fn test_discovery_document() {
    let app = spawn_app().await;
    let res = app
        .send(get_request("/.well-known/openid-configuration", None))
        .await;

    assert_eq!(res.status(), StatusCode::OK);
    assert!(res
        .headers()
        .get(header::CACHE_CONTROL)
        .unwrap()
        .to_str()
        .unwrap()
        .contains("max-age=3600"));
    let doc = body_json(res).await;
    assert_eq!(doc["issuer"], ISSUER);
    assert_eq!(doc["token_endpoint"], format!("{}/oauth/token", ISSUER));
    assert_eq!(doc["jwks_uri"], format!("{}/oauth/jwks", ISSUER));
    assert_eq!(doc["code_challenge_methods_supported"], json!(["S256", "plain"]));
    assert_eq!(doc["id_token_signing_alg_values_supported"], json!(["RS256"]));
}

#[tokio::test]
async fn test_jwks_and_alias_match() {
    let app = spawn_app().await;

    let primary = body_json(app.send(get_request("/oauth/jwks", None)).await).await;
    let alias = body_json(app.send(get_request("/.well-known/jwks.json", None)).await).await;
    assert_eq!(primary, alias);

    let keys = primary["keys"].as_array().unwrap();
    assert_eq!(keys.len(), 1);
    assert_eq!(keys[0]["kty"], "RSA");
    assert_eq!(keys[0]["alg"], "RS256");
    assert_eq!(keys[0]["use"], "sig");
    assert!(keys[0].get("d").is_none());

    let expected = signing_key_from_pem(&fixture("signing_key_primary.pem"), chrono::Utc::now()).unwrap();
    assert_eq!(keys[0]["kid"], expected.kid);
}

#[tokio::test]
async fn test_id_token_verifies_against_jwks() {
    let app = spawn_app().await;
    let admin = app.seed_user("owner@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app.seed_client(&tenant, &admin).await;
    let user = app.seed_user("alice@example.com").await;

    let code = app.authorization_code(&client, &user, "openid").await;
    let tokens = body_json(app.exchange_code(&client, &secret, &code).await).await;
    let id_token = tokens["id_token"].as_str().unwrap();

    let jwks = body_json(app.send(get_request("/oauth/jwks", None)).await).await;
    let jwk = &jwks["keys"][0];
    let key = DecodingKey::from_rsa_components(
        jwk["n"].as_str().unwrap(),
        jwk["e"].as_str().unwrap(),
    )
    .unwrap();
    let mut validation = Validation::new(Algorithm::RS256);
    validation.set_audience(&[client.client_id.as_str()]);
    validation.set_issuer(&[ISSUER]);

    let claims = decode::<Value>(id_token, &key, &validation).unwrap().claims;
    assert_eq!(claims["sub"], user.user_id.to_string());
    assert!(claims["auth_time"].is_i64());
}

#[tokio::test]
async fn test_signing_key_imported_from_path() {
    let pem = fixture("signing_key_secondary.pem");
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(pem.as_bytes()).unwrap();
    let path = file.path().to_string_lossy().to_string();

    let app = spawn_app_with(|c| c.oauth.signing_key_path = Some(path)).await;

    let expected = signing_key_from_pem(&pem, chrono::Utc::now()).unwrap();
    assert_eq!(app.state.keys.active_kid(), Some(expected.kid));
}

#[tokio::test]
async fn test_weak_signing_key_is_refused() {
    let mut config = test_config();
    config.oauth.signing_key_path = Some(format!(
        "{}/tests/fixtures/signing_key_weak.pem",
        env!("CARGO_MANIFEST_DIR")
    ));

    let built = AppState::build(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(MockEmailService::new()),
    )
    .await;
    assert!(built.is_err());
}

#[tokio::test]
async fn test_key_rotation_keeps_previous_key_published() {
    let app = spawn_app().await;
    let root = app.seed_user("root@example.com").await;
    let previous = app.state.keys.active_kid().unwrap();
    let token = app.console_token(&root, None, ConsoleScope::Admin);

    let res = app
        .send(json_request("POST", "/admin/oauth/keys/rotate", json!({}), Some(&token)))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let kid = body_json(res).await["kid"].as_str().unwrap().to_string();
    assert_ne!(kid, previous);
    assert_eq!(app.state.keys.active_kid(), Some(kid.clone()));

    let jwks = body_json(app.send(get_request("/oauth/jwks", None)).await).await;
    let kids: Vec<&str> = jwks["keys"]
        .as_array()
        .unwrap()
        .iter()
        .map(|k| k["kid"].as_str().unwrap())
        .collect();
    assert_eq!(kids, vec![kid.as_str(), previous.as_str()]);
}

#[tokio::test]
async fn test_admin_routes_require_super_admin() {
    let app = spawn_app().await;
    let _root = app.seed_user("root@example.com").await;
    let regular = app.seed_user("regular@example.com").await;

    let res = app.send(get_request("/admin/settings/maintenance", None)).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let forged = app.console_token(&regular, None, ConsoleScope::Admin);
    let res = app
        .send(get_request("/admin/settings/maintenance", Some(&forged)))
        .await;
    assert_eq!(res.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_maintenance_mode_and_bypass() {
    let app = spawn_app().await;
    let root = app.seed_user("root@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let tenant_admin = app.seed_user("admin@example.com").await;
    let member = app.seed_user("member@example.com").await;
    app.add_member(&tenant_admin, &tenant, TenantRole::Admin).await;
    app.add_member(&member, &tenant, TenantRole::Member).await;

    let root_token = app.console_token(&root, None, ConsoleScope::Admin);
    let res = app
        .send(json_request(
            "PUT",
            "/admin/settings/maintenance",
            json!({ "enabled": true }),
            Some(&root_token),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["enabled"], true);

    // Anonymous traffic is refused, allow-listed paths keep working.
    let res = app.send(get_request("/oauth/userinfo", None)).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(app.send(get_request("/health", None)).await.status(), StatusCode::OK);
    assert_eq!(
        app.send(get_request("/oauth/jwks", None)).await.status(),
        StatusCode::OK
    );

    let member_token = app.console_token(&member, Some(&tenant), ConsoleScope::Tenant);
    let res = app.send(get_request("/tenant/context", Some(&member_token))).await;
    assert_eq!(res.status(), StatusCode::SERVICE_UNAVAILABLE);

    let admin_token = app.console_token(&tenant_admin, Some(&tenant), ConsoleScope::Tenant);
    let res = app.send(get_request("/tenant/context", Some(&admin_token))).await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .send(json_request(
            "PUT",
            "/admin/settings/maintenance",
            json!({ "enabled": false }),
            Some(&root_token),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    let res = app.send(get_request("/tenant/context", Some(&member_token))).await;
    assert_eq!(res.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_suspending_tenant_disables_its_clients() {
    let app = spawn_app().await;
    let root = app.seed_user("root@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let (client, secret) = app
        .seed_client_with_scopes(&tenant, &root, &["openid", "profile", "s2s.read"])
        .await;
    let token = app.console_token(&root, None, ConsoleScope::Admin);

    // One code redeemed and one still pending when the tenant goes down.
    let user = app.seed_user("alice@example.com").await;
    let code = app.authorization_code(&client, &user, "openid profile").await;
    let issued = body_json(app.exchange_code(&client, &secret, &code).await).await;
    let access = issued["access_token"].as_str().unwrap().to_string();
    let pending = app.authorization_code(&client, &user, "openid").await;

    let res = app
        .send(json_request(
            "PUT",
            &format!("/admin/tenants/{}/status", tenant.tenant_id),
            json!({ "status": "suspended" }),
            Some(&token),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await["status"], "suspended");

    let res = app
        .send(s2s_request("/s2s/health", &client.client_id, &secret))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = app
        .send(form_request(
            "/oauth/token",
            "grant_type=client_credentials",
            Some((&client.client_id, &secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["error"], "invalid_client");

    let res = app.exchange_code(&client, &secret, &pending).await;
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(body_json(res).await["error"], "invalid_client");

    let res = app
        .send(form_request(
            "/oauth/introspect",
            &format!("token={}", access),
            Some((&client.client_id, &secret)),
        ))
        .await;
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(body_json(res).await, json!({ "active": false }));
}

#[tokio::test]
async fn test_deleted_tenant_cannot_be_revived() {
    let app = spawn_app().await;
    let root = app.seed_user("root@example.com").await;
    let tenant = app.seed_tenant("acme").await;
    let token = app.console_token(&root, None, ConsoleScope::Admin);
    let uri = format!("/admin/tenants/{}/status", tenant.tenant_id);

    let res = app
        .send(json_request("PUT", &uri, json!({ "status": "deleted" }), Some(&token)))
        .await;
    assert_eq!(res.status(), StatusCode::OK);

    let res = app
        .send(json_request("PUT", &uri, json!({ "status": "active" }), Some(&token)))
        .await;
    assert_eq!(res.status(), StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_security_headers_and_cors() {
    let app = spawn_app().await;
    let mut req = get_request("/health", None);
    req.headers_mut()
        .insert(header::ORIGIN, UI_BASE_URL.parse().unwrap());
    let res = app.send(req).await;

    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(
        res.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        UI_BASE_URL
    );
    assert_eq!(res.headers().get("x-content-type-options").unwrap(), "nosniff");
}

#[tokio::test]
async fn test_openapi_document_is_served() {
    let app = spawn_app().await;
    let res = app.send(get_request("/.well-known/openapi.json", None)).await;

    assert_eq!(res.status(), StatusCode::OK);
    let doc = body_json(res).await;
    assert!(doc["paths"]["/oauth/token"].is_object());
    assert!(doc["components"]["securitySchemes"]["bearer_auth"].is_object());
}
