mod common;

use axum::http::{Method, StatusCode};
use chrono::Utc;
use common::{decimal, json_body, TestApp};
use crm_api::services::accounting::{sign_payload, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use rust_decimal_macros::dec;
use serde_json::{json, Value};

const SECRET: &str = "whsec_integration";

async fn app() -> TestApp {
    TestApp::with_config(|cfg| cfg.accounting_webhook_secret = Some(SECRET.to_string())).await
}

fn invoice_event(event_id: &str, event_type: &str) -> Value {
    json!({
        "event_id": event_id,
        "event_type": event_type,
        "invoice": {
            "id": 4711,
            "number": "INV-1042",
            "status": "Paid",
            "txn_date": "2024-05-02",
            "currency": "USD",
            "total": "1250.00",
            "customer": {
                "id": "QB-88",
                "name": "Morgan Reyes",
                "email": "Morgan@ReyesLandscape.com",
                "company": "Reyes Landscape"
            },
            "lines": [
                { "sku": "TOPSOIL-PAL", "description": "Topsoil pallet", "quantity": "2", "unit_price": "625.00" }
            ]
        }
    })
}

async fn deliver(app: &TestApp, payload: &Value, signature: Option<String>) -> axum::response::Response {
    let body = serde_json::to_vec(payload).unwrap();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = signature.unwrap_or_else(|| sign_payload(SECRET, &timestamp, &body));
    app.post_raw(
        "/api/v1/webhooks/accounting",
        "application/json",
        body,
        &[(TIMESTAMP_HEADER, timestamp.as_str()), (SIGNATURE_HEADER, signature.as_str())],
        None,
    )
    .await
}

#[tokio::test]
async fn signed_invoice_becomes_an_accounting_order() {
    let app = app().await;

    let response = deliver(&app, &invoice_event("evt-1", "invoice.created"), None).await;
    assert_eq!(response.status(), StatusCode::OK);
    let outcome = json_body(response).await["data"].clone();
    assert_eq!(outcome["status"], "processed");
    let order_id = outcome["order_id"].as_str().unwrap().to_string();

    let order = json_body(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await["data"]
        .clone();
    assert_eq!(order["source"], "accounting");
    assert_eq!(order["external_id"], "4711");
    assert_eq!(order["order_number"], "INV-1042");
    assert_eq!(order["status"], "paid");
    assert_eq!(order["business_unit"], "pallet");
    assert_eq!(order["customer_email"], "morgan@reyeslandscape.com");
    assert_eq!(decimal(&order["total"]), dec!(1250));
    assert_eq!(decimal(&order["line_items"][0]["quantity"]), dec!(100));

    let customers = json_body(
        app.request_authenticated(Method::GET, "/api/v1/customers?source=accounting", None)
            .await,
    )
    .await;
    assert_eq!(customers["data"]["total"], 1);
    assert_eq!(customers["data"]["items"][0]["accounting_customer_id"], "QB-88");
}

#[tokio::test]
async fn replayed_deliveries_are_acknowledged_once() {
    let app = app().await;
    let event = invoice_event("evt-dup", "invoice.created");

    let first = json_body(deliver(&app, &event, None).await).await;
    assert_eq!(first["data"]["status"], "processed");

    let second = deliver(&app, &event, None).await;
    assert_eq!(second.status(), StatusCode::OK);
    assert_eq!(json_body(second).await["data"]["status"], "duplicate");

    let orders = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders", None)
            .await,
    )
    .await;
    assert_eq!(orders["data"]["total"], 1);
}

#[tokio::test]
async fn voided_invoice_cancels_the_order() {
    let app = app().await;
    let created = json_body(deliver(&app, &invoice_event("evt-a", "invoice.created"), None).await).await;
    let order_id = created["data"]["order_id"].as_str().unwrap().to_string();

    let voided = json_body(deliver(&app, &invoice_event("evt-b", "invoice.voided"), None).await).await;
    assert_eq!(voided["data"]["status"], "cancelled");
    assert_eq!(voided["data"]["order_id"], order_id.as_str());

    let order = json_body(
        app.request_authenticated(Method::GET, &format!("/api/v1/orders/{}", order_id), None)
            .await,
    )
    .await;
    assert_eq!(order["data"]["status"], "cancelled");
}

#[tokio::test]
async fn unknown_event_types_are_ignored() {
    let app = app().await;
    let response = deliver(
        &app,
        &json!({ "event_id": "evt-x", "event_type": "customer.updated" }),
        None,
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["data"]["status"], "ignored");
    assert_eq!(body["data"]["event_type"], "customer.updated");
}

#[tokio::test]
async fn bad_signatures_are_rejected_and_not_recorded() {
    let app = app().await;
    let event = invoice_event("evt-forged", "invoice.created");

    let forged = deliver(&app, &event, Some("deadbeef".to_string())).await;
    assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

    let unsigned = app
        .post_raw(
            "/api/v1/webhooks/accounting",
            "application/json",
            serde_json::to_vec(&event).unwrap(),
            &[],
            None,
        )
        .await;
    assert_eq!(unsigned.status(), StatusCode::UNAUTHORIZED);

    // The same event id still goes through once properly signed
    let genuine = json_body(deliver(&app, &event, None).await).await;
    assert_eq!(genuine["data"]["status"], "processed");
}

#[tokio::test]
async fn malformed_payload_is_a_bad_request() {
    let app = app().await;
    let body = b"{not json".to_vec();
    let timestamp = Utc::now().timestamp().to_string();
    let signature = sign_payload(SECRET, &timestamp, &body);

    let response = app
        .post_raw(
            "/api/v1/webhooks/accounting",
            "application/json",
            body,
            &[(TIMESTAMP_HEADER, timestamp.as_str()), (SIGNATURE_HEADER, signature.as_str())],
            None,
        )
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
