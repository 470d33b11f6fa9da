use crate::{
    auth::AuthUser,
    errors::ServiceError,
    services::{
        dashboard::{CustomerSummary, SalesSummary},
        parse_range_bound,
    },
    ApiResponse, AppState,
};
use axum::{
    extract::{Query, State},
    Json,
};
use serde::Deserialize;

#[derive(Debug, Default, Deserialize)]
pub struct SalesRange {
    pub from: Option<String>,
    pub to: Option<String>,
}

pub async fn sales_summary(
    State(state): State<AppState>,
    Query(range): Query<SalesRange>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<SalesSummary>>, ServiceError> {
    let from = parse_range_bound("from", range.from.as_deref(), false)?;
    let to = parse_range_bound("to", range.to.as_deref(), true)?;
    let summary = state.services.dashboard.sales_summary(from, to).await?;
    Ok(Json(ApiResponse::success(summary)))
}

pub async fn customer_summary(
    State(state): State<AppState>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<CustomerSummary>>, ServiceError> {
    let summary = state.services.dashboard.customer_summary().await?;
    Ok(Json(ApiResponse::success(summary)))
}
