use super::common::{created, paginated};
use crate::{
    auth::AuthUser,
    entities::order,
    errors::ServiceError,
    services::orders::{CreateOrderRequest, OrderDetail, OrderFilter, UpdateOrderStatusRequest},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

/// Newest first, across every source
pub async fn list_orders(
    State(state): State<AppState>,
    Query(filter): Query<OrderFilter>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<order::Model>>>, ServiceError> {
    let page = state.services.orders.list_orders(filter).await?;
    Ok(paginated(page))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<OrderDetail>>, ServiceError> {
    let detail = state.services.orders.get_order(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

pub async fn create_order(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<ApiResponse<OrderDetail>>), ServiceError> {
    let detail = state.services.orders.create_order(payload).await?;
    Ok(created(detail))
}

pub async fn update_order_status(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<ApiResponse<order::Model>>, ServiceError> {
    let order = state.services.orders.update_status(id, payload).await?;
    Ok(Json(ApiResponse::success(order)))
}

pub async fn delete_order(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.orders.delete_order(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
