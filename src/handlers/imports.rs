use crate::{
    auth::AuthUser,
    entities::{CustomerSource, OrderSource},
    errors::ServiceError,
    unify::ImportReport,
    ApiResponse, AppState,
};
use axum::{
    extract::{Query, State},
    Json,
};
use bytes::Bytes;
use serde::Deserialize;
use tracing::info;

#[derive(Debug, Deserialize)]
pub struct CustomerImportQuery {
    /// Defaults to `csv_import`
    pub source: Option<CustomerSource>,
}

#[derive(Debug, Deserialize)]
pub struct OrderImportQuery {
    pub source: OrderSource,
}

fn non_empty(body: &Bytes) -> Result<(), ServiceError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(ServiceError::BadRequest("CSV body is empty".into()));
    }
    Ok(())
}

/// `POST /imports/customers?source=` with a `text/csv` body
pub async fn import_customers(
    State(state): State<AppState>,
    Query(query): Query<CustomerImportQuery>,
    auth_user: AuthUser,
    body: Bytes,
) -> Result<Json<ApiResponse<ImportReport>>, ServiceError> {
    non_empty(&body)?;
    let source = query.source.unwrap_or(CustomerSource::CsvImport);
    info!(user_id = %auth_user.user_id, %source, bytes = body.len(), "customer import uploaded");
    let report = state
        .services
        .imports
        .import_customers_csv(&body, source)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}

/// `POST /imports/orders?source=` with a `text/csv` body
pub async fn import_orders(
    State(state): State<AppState>,
    Query(query): Query<OrderImportQuery>,
    auth_user: AuthUser,
    body: Bytes,
) -> Result<Json<ApiResponse<ImportReport>>, ServiceError> {
    non_empty(&body)?;
    info!(user_id = %auth_user.user_id, source = %query.source, bytes = body.len(), "order import uploaded");
    let report = state
        .services
        .imports
        .import_orders_csv(&body, query.source)
        .await?;
    Ok(Json(ApiResponse::success(report)))
}
