use crate::{
    errors::ServiceError,
    services::accounting::{DeliveryOutcome, SIGNATURE_HEADER, TIMESTAMP_HEADER},
    ApiResponse, AppState,
};
use axum::{extract::State, http::HeaderMap, Json};
use bytes::Bytes;

fn header<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Accounting system webhook. Not behind staff auth; deliveries are HMAC-signed instead.
/// Duplicates and unknown event types are acknowledged with 200 so the sender stops retrying.
pub async fn accounting_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<ApiResponse<DeliveryOutcome>>, ServiceError> {
    let outcome = state
        .services
        .accounting
        .handle_delivery(
            header(&headers, TIMESTAMP_HEADER),
            header(&headers, SIGNATURE_HEADER),
            &body,
        )
        .await?;
    Ok(Json(ApiResponse::success(outcome)))
}
