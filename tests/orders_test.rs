mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, json_body, TestApp};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

async fn create_order(app: &TestApp, body: Value) -> Value {
    let response = app
        .request_authenticated(Method::POST, "/api/v1/orders", Some(body))
        .await;
    assert_eq!(response.status(), StatusCode::CREATED);
    json_body(response).await["data"].clone()
}

#[tokio::test]
async fn pallet_lines_are_stored_as_bags() {
    let app = TestApp::new().await;

    let order = create_order(
        &app,
        json!({
            "customer_email": "yard@example.com",
            "company": "Green Yard Supply",
            "line_items": [
                { "sku": "MULCH-PAL", "description": "Mulch", "quantity": "2", "unit": "pallet", "unit_price": "500.00" },
                { "description": "Delivery", "quantity": "1", "unit_price": "75.00" }
            ]
        }),
    )
    .await;

    assert_eq!(order["business_unit"], "pallet");
    assert_eq!(order["source"], "manual");
    assert_eq!(decimal(&order["total"]), dec!(1075.00));

    let lines = order["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    let mulch = lines
        .iter()
        .find(|l| l["description"] == "Mulch")
        .expect("mulch line");
    assert_eq!(mulch["unit"], "bag");
    assert_eq!(decimal(&mulch["quantity"]), dec!(100));
    assert_eq!(decimal(&mulch["pallet_quantity"]), dec!(2));
    assert_eq!(decimal(&mulch["unit_price"]), dec!(10));
    assert_eq!(decimal(&mulch["total"]), dec!(1000));

    let delivery = lines
        .iter()
        .find(|l| l["description"] == "Delivery")
        .expect("delivery line");
    assert_eq!(delivery["unit"], "each");
    assert!(delivery["pallet_quantity"].is_null());
}

#[tokio::test]
async fn platform_sources_cannot_be_entered_by_hand() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({
                "source": "ecommerce",
                "customer_email": "x@example.com",
                "line_items": [{ "description": "Thing", "quantity": "1", "unit_price": "1" }]
            })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn orders_need_at_least_one_line() {
    let app = TestApp::new().await;
    let response = app
        .request_authenticated(
            Method::POST,
            "/api/v1/orders",
            Some(json!({ "customer_email": "x@example.com", "line_items": [] })),
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn status_updates_and_filters() {
    let app = TestApp::new().await;

    let retail = create_order(
        &app,
        json!({
            "customer_email": "one@example.com",
            "line_items": [{ "description": "Compost", "quantity": "3", "unit_price": "8.50" }]
        }),
    )
    .await;
    create_order(
        &app,
        json!({
            "source": "distributor",
            "customer_email": "dist@example.com",
            "line_items": [{ "description": "Compost", "quantity": "40", "unit_price": "6.00" }]
        }),
    )
    .await;

    let id = retail["id"].as_str().unwrap();
    let updated = app
        .request_authenticated(
            Method::PUT,
            &format!("/api/v1/orders/{}/status", id),
            Some(json!({ "status": "paid" })),
        )
        .await;
    assert_eq!(updated.status(), StatusCode::OK);
    assert_eq!(json_body(updated).await["data"]["status"], "paid");

    let paid = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?status=paid", None)
            .await,
    )
    .await;
    assert_eq!(paid["data"]["total"], 1);
    assert_eq!(paid["data"]["items"][0]["id"], id);

    let distributor = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?source=distributor", None)
            .await,
    )
    .await;
    assert_eq!(distributor["data"]["total"], 1);
    assert_eq!(distributor["data"]["items"][0]["business_unit"], "distributor");

    let all = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?limit=1", None)
            .await,
    )
    .await;
    assert_eq!(all["data"]["total"], 2);
    assert_eq!(all["data"]["items"].as_array().unwrap().len(), 1);
    assert_eq!(all["data"]["total_pages"], 2);
}

#[tokio::test]
async fn deleting_an_order_removes_it() {
    let app = TestApp::new().await;
    let order = create_order(
        &app,
        json!({
            "customer_email": "gone@example.com",
            "line_items": [{ "description": "Sand", "quantity": "1", "unit_price": "4" }]
        }),
    )
    .await;
    let uri = format!("/api/v1/orders/{}", order["id"].as_str().unwrap());

    let deleted = app.request_authenticated(Method::DELETE, &uri, None).await;
    assert_eq!(deleted.status(), StatusCode::NO_CONTENT);
    let missing = app.request_authenticated(Method::GET, &uri, None).await;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);
}
