mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, TestApp, ADMIN_PASSWORD};
use crm_api::entities::UserRole;
use serde_json::json;

#[tokio::test]
async fn login_returns_a_token_that_reaches_protected_routes() {
    let app = TestApp::new().await;

    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "admin@example.com", "password": ADMIN_PASSWORD })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["token_type"], "Bearer");
    let token = body["access_token"].as_str().expect("access token").to_string();

    let me = app.request(Method::GET, "/auth/me", None, Some(&token)).await;
    assert_eq!(me.status(), StatusCode::OK);
    let me = json_body(me).await;
    assert_eq!(me["email"], "admin@example.com");
    assert!(me["permissions"]
        .as_array()
        .unwrap()
        .iter()
        .any(|p| p == "users:manage"));
    assert!(me.get("password_hash").is_none());

    let customers = app
        .request(Method::GET, "/api/v1/customers", None, Some(&token))
        .await;
    assert_eq!(customers.status(), StatusCode::OK);
}

#[tokio::test]
async fn wrong_password_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "admin@example.com", "password": "not the password" })),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn protected_routes_need_a_token() {
    let app = TestApp::new().await;

    let missing = app.request(Method::GET, "/api/v1/orders", None, None).await;
    assert_eq!(missing.status(), StatusCode::UNAUTHORIZED);

    let garbage = app
        .request(Method::GET, "/api/v1/orders", None, Some("not-a-jwt"))
        .await;
    assert_eq!(garbage.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn viewers_can_read_but_not_write() {
    let app = TestApp::new().await;
    let (_, viewer) = app.token_for(UserRole::Viewer).await;

    let read = app
        .request(Method::GET, "/api/v1/customers", None, Some(&viewer))
        .await;
    assert_eq!(read.status(), StatusCode::OK);

    let write = app
        .request(
            Method::POST,
            "/api/v1/customers",
            Some(json!({ "email": "someone@example.com" })),
            Some(&viewer),
        )
        .await;
    assert_eq!(write.status(), StatusCode::FORBIDDEN);

    let users = app
        .request(Method::GET, "/api/v1/users", None, Some(&viewer))
        .await;
    assert_eq!(users.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn sales_staff_cannot_run_imports() {
    let app = TestApp::new().await;
    let (_, sales) = app.token_for(UserRole::Sales).await;

    let response = app
        .post_raw(
            "/api/v1/imports/customers",
            "text/csv",
            "email\nx@example.com\n",
            &[],
            Some(&sales),
        )
        .await;
    assert_eq!(response.status(), StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn public_routes_answer_without_a_token() {
    let app = TestApp::new().await;

    let status = app.request(Method::GET, "/api/v1/status", None, None).await;
    assert_eq!(status.status(), StatusCode::OK);
    let body = json_body(status).await;
    assert_eq!(body["data"]["service"], "crm-api");
    assert_eq!(body["data"]["push_enabled"], false);
    assert_eq!(body["data"]["commerce_configured"], false);

    let health = app.request(Method::GET, "/health", None, None).await;
    assert_eq!(health.status(), StatusCode::OK);

    let ready = app.request(Method::GET, "/health/ready", None, None).await;
    assert_eq!(ready.status(), StatusCode::OK);
}
