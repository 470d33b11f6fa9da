mod common;

use axum::http::{Method, StatusCode};
use common::{json_body, TestApp};
use serde_json::json;

#[tokio::test]
async fn admins_manage_staff_accounts() {
    let app = TestApp::new().await;

    let created = app
        .request_authenticated(
            Method::POST,
            "/api/v1/users",
            Some(json!({
                "name": "Quinn Sales",
                "email": "Quinn@Example.com",
                "password": "a sufficiently long password",
                "role": "sales"
            })),
        )
        .await;
    assert_eq!(created.status(), StatusCode::CREATED);
    let created = json_body(created).await;
    let user = &created["data"];
    assert_eq!(user["email"], "quinn@example.com");
    assert_eq!(user["role"], "sales");
    assert!(user.get("password_hash").is_none());
    let uri = format!("/api/v1/users/{}", user["id"].as_str().unwrap());

    let duplicate = app
        .request_authenticated(
            Method::POST,
            "/api/v1/users",
            Some(json!({
                "name": "Another Quinn",
                "email": "quinn@example.com",
                "password": "another long password",
                "role": "viewer"
            })),
        )
        .await;
    assert_eq!(duplicate.status(), StatusCode::CONFLICT);

    let promoted = json_body(
        app.request_authenticated(Method::PUT, &uri, Some(json!({ "role": "manager" })))
            .await,
    )
    .await;
    assert_eq!(promoted["data"]["role"], "manager");

    let listed = json_body(
        app.request_authenticated(Method::GET, "/api/v1/users", None)
            .await,
    )
    .await;
    assert_eq!(listed["data"]["total"], 2);

    let deleted = app.request_authenticated(Method::DELETE, &uri, None).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let missing = app.request_authenticated(Method::GET, &uri, None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn short_passwords_are_rejected() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/users",
            Some(json!({
                "name": "Short",
                "email": "short@example.com",
                "password": "short",
                "role": "viewer"
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admins_cannot_delete_themselves() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(
            Method::DELETE,
            &format!("/api/v1/users/{}", app.admin.id),
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn deactivated_accounts_cannot_sign_in() {
    let app = TestApp::new().await;
    let created = json_body(
        app.request_authenticated(
            Method::POST,
            "/api/v1/users",
            Some(json!({
                "name": "Temp Staff",
                "email": "temp@example.com",
                "password": "temporary password",
                "role": "viewer"
            })),
        )
        .await,
    )
    .await;
    let uri = format!("/api/v1/users/{}", created["data"]["id"].as_str().unwrap());

    let login = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "temp@example.com", "password": "temporary password" })),
            None,
        )
        .await;
    assert_eq!(login.status(), StatusCode::OK);

    let deactivated = app
        .request_authenticated(Method::PUT, &uri, Some(json!({ "active": false })))
        .await;
    assert_eq!(deactivated.status(), StatusCode::OK);

    let login = app
        .request(
            Method::POST,
            "/auth/login",
            Some(json!({ "email": "temp@example.com", "password": "temporary password" })),
            None,
        )
        .await;
    assert_eq!(login.status(), StatusCode::FORBIDDEN);
}
