mod common;

use axum::http::{Method, StatusCode};
use common::{decimal, json_body, TestApp};
use rust_decimal_macros::dec;
use serde_json::Value;

const CUSTOMERS_CSV: &str = "\u{feff}E-mail,Customer Name,Company Name,Phone Number,BU,Newsletter,Favourite Colour
ana@example.com,Ana Ortiz,Ortiz Gardens,555-0101,retail,yes,green
,Nobody Home,,,,,
BOB@EXAMPLE.COM,Bob Stone,,,wholesale-ish,,
carla@example.com,Carla Diaz,,,pallet,no,blue
ana@example.com,Ana Ortiz,,,,,
";

const ORDERS_CSV: &str = "Name,Email Address,Billing Name,Created at,Financial Status,Lineitem name,Lineitem sku,Lineitem quantity,U/M,Lineitem price,Order Total
#1001,ana@example.com,Ana Ortiz,2024-03-05,paid,Mulch,MULCH-PAL,1,pallet,450.00,470.00
#1001,,,,,Edging,EDGE-1,2,each,10.00,
#1002,bob@example.com,Bob Stone,2024-03-06,pending,Compost,COMP-1,3,bag,7.50,22.50
#1003,,Ghost,2024-03-07,paid,Sand,SAND-1,1,bag,5.00,5.00
";

async fn report(app: &TestApp, uri: &str, csv: &'static str) -> Value {
    let response = app.upload_csv(uri, csv).await;
    assert_eq!(response.status(), StatusCode::OK);
    json_body(response).await["data"].clone()
}

#[tokio::test]
async fn customer_csv_tolerates_header_drift_and_skips_bad_rows() {
    let app = TestApp::new().await;

    let report = report(&app, "/api/v1/imports/customers", CUSTOMERS_CSV).await;
    assert_eq!(report["total_rows"], 5);
    assert_eq!(report["inserted"], 2);
    assert_eq!(report["skipped"], 2);
    let skipped_rows: Vec<u64> = report["issues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|issue| issue["row"].as_u64().unwrap())
        .collect();
    assert_eq!(skipped_rows, vec![2, 3]);

    let customers = json_body(
        app.request_authenticated(Method::GET, "/api/v1/customers?search=ana@example.com", None)
            .await,
    )
    .await;
    assert_eq!(customers["data"]["total"], 1);
    let ana = &customers["data"]["items"][0];
    assert_eq!(ana["first_name"], "Ana");
    assert_eq!(ana["last_name"], "Ortiz");
    assert_eq!(ana["company"], "Ortiz Gardens");
    assert_eq!(ana["business_unit"], "retail");
    assert_eq!(ana["accepts_marketing"], true);
    assert_eq!(ana["sources"], "csv_import");
}

#[tokio::test]
async fn customer_file_without_an_email_column_is_rejected() {
    let app = TestApp::new().await;
    let response = app
        .upload_csv("/api/v1/imports/customers", "Name,Company\nAna,Ortiz\n")
        .await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn empty_upload_is_rejected() {
    let app = TestApp::new().await;
    let response = app.upload_csv("/api/v1/imports/customers", "  \n").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn order_csv_groups_line_rows_and_renormalizes_pallets() {
    let app = TestApp::new().await;

    let report = report(&app, "/api/v1/imports/orders?source=ecommerce", ORDERS_CSV).await;
    assert_eq!(report["total_rows"], 3);
    assert_eq!(report["inserted"], 2);
    assert_eq!(report["skipped"], 1);
    assert_eq!(report["issues"][0]["row"], 4);

    let orders = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?source=ecommerce", None)
            .await,
    )
    .await;
    assert_eq!(orders["data"]["total"], 2);
    let first = orders["data"]["items"]
        .as_array()
        .unwrap()
        .iter()
        .find(|o| o["order_number"] == "#1001")
        .expect("order #1001")
        .clone();
    assert_eq!(first["status"], "paid");
    assert_eq!(first["business_unit"], "pallet");
    assert_eq!(decimal(&first["total"]), dec!(470.00));
    assert_eq!(first["customer_name"], "Ana Ortiz");

    let detail = json_body(
        app.request_authenticated(
            Method::GET,
            &format!("/api/v1/orders/{}", first["id"].as_str().unwrap()),
            None,
        )
        .await,
    )
    .await;
    let lines = detail["data"]["line_items"].as_array().unwrap();
    assert_eq!(lines.len(), 2);
    let mulch = lines.iter().find(|l| l["sku"] == "MULCH-PAL").unwrap();
    assert_eq!(decimal(&mulch["quantity"]), dec!(50));
    assert_eq!(decimal(&mulch["pallet_quantity"]), dec!(1));
    assert_eq!(decimal(&mulch["unit_price"]), dec!(9));
    assert_eq!(decimal(&mulch["total"]), dec!(450));

    // Ordering customers were unified into the customer table
    let customers = json_body(
        app.request_authenticated(Method::GET, "/api/v1/customers?source=ecommerce", None)
            .await,
    )
    .await;
    assert_eq!(customers["data"]["total"], 2);
}

#[tokio::test]
async fn reimporting_the_same_orders_inserts_nothing() {
    let app = TestApp::new().await;
    report(&app, "/api/v1/imports/orders?source=ecommerce", ORDERS_CSV).await;

    let again = report(&app, "/api/v1/imports/orders?source=ecommerce", ORDERS_CSV).await;
    assert_eq!(again["inserted"], 0);
    assert_eq!(
        again["updated"].as_u64().unwrap() + again["unchanged"].as_u64().unwrap(),
        2
    );

    let orders = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders", None)
            .await,
    )
    .await;
    assert_eq!(orders["data"]["total"], 2);
}

const UNDATED_ORDERS_CSV: &str = "Order Number,Email,Description,Qty,Price
D-1,ana@example.com,Compost,3,7.50
D-2,bob@example.com,Sand,1,5.00
";

#[tokio::test]
async fn reimporting_orders_without_a_date_column_leaves_them_unchanged() {
    let app = TestApp::new().await;
    let first = report(&app, "/api/v1/imports/orders?source=distributor", UNDATED_ORDERS_CSV).await;
    assert_eq!(first["inserted"], 2);

    let before = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?source=distributor", None)
            .await,
    )
    .await;

    let again = report(&app, "/api/v1/imports/orders?source=distributor", UNDATED_ORDERS_CSV).await;
    assert_eq!(again["inserted"], 0);
    assert_eq!(again["updated"], 0);
    assert_eq!(again["unchanged"], 2);

    let after = json_body(
        app.request_authenticated(Method::GET, "/api/v1/orders?source=distributor", None)
            .await,
    )
    .await;
    for order in after["data"]["items"].as_array().unwrap() {
        let earlier = before["data"]["items"]
            .as_array()
            .unwrap()
            .iter()
            .find(|o| o["id"] == order["id"])
            .expect("same order");
        assert_eq!(order["order_date"], earlier["order_date"]);
    }
}

#[tokio::test]
async fn amounts_too_large_to_store_skip_the_row() {
    let app = TestApp::new().await;
    let csv = "Order Number,Email,Description,Qty,Price
BIG-1,ana@example.com,Compost,79228162514264337593543950335,2
OK-1,bob@example.com,Sand,1,5.00
";
    let report = report(&app, "/api/v1/imports/orders?source=distributor", csv).await;
    assert_eq!(report["inserted"], 1);
    assert_eq!(report["skipped"], 1);
    assert_eq!(report["issues"][0]["row"], 1);

    // Nothing from the rejected row was written, not even its customer
    let customers = json_body(
        app.request_authenticated(Method::GET, "/api/v1/customers?search=ana@example.com", None)
            .await,
    )
    .await;
    assert_eq!(customers["data"]["total"], 0);
}

#[tokio::test]
async fn order_import_requires_a_source() {
    let app = TestApp::new().await;
    let response = app.upload_csv("/api/v1/imports/orders", ORDERS_CSV).await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
