use super::common::{created, paginated};
use crate::{
    auth::AuthUser,
    entities::{customer, inquiry, order, quote},
    errors::ServiceError,
    services::customers::{
        CreateCustomerRequest, CustomerFilter, MergeCustomersRequest, UpdateCustomerRequest,
    },
    unify::UpsertOutcome,
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use uuid::Uuid;

pub async fn list_customers(
    State(state): State<AppState>,
    Query(filter): Query<CustomerFilter>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<customer::Model>>>, ServiceError> {
    let page = state.services.customers.list_customers(filter).await?;
    Ok(paginated(page))
}

pub async fn get_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<customer::Model>>, ServiceError> {
    let customer = state.services.customers.get_customer(id).await?;
    Ok(Json(ApiResponse::success(customer)))
}

/// 201 for a new email; 200 with the merged record when the email already existed
pub async fn create_customer(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<CreateCustomerRequest>,
) -> Result<Response, ServiceError> {
    let (customer, outcome) = state.services.customers.create_customer(payload).await?;
    Ok(match outcome {
        UpsertOutcome::Inserted => created(customer).into_response(),
        UpsertOutcome::Updated | UpsertOutcome::Unchanged => {
            Json(ApiResponse::success(customer)).into_response()
        }
    })
}

pub async fn update_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<UpdateCustomerRequest>,
) -> Result<Json<ApiResponse<customer::Model>>, ServiceError> {
    let customer = state.services.customers.update_customer(id, payload).await?;
    Ok(Json(ApiResponse::success(customer)))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.customers.delete_customer(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn customer_orders(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<Vec<order::Model>>>, ServiceError> {
    let orders = state.services.customers.customer_orders(id).await?;
    Ok(Json(ApiResponse::success(orders)))
}

pub async fn customer_inquiries(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<Vec<inquiry::Model>>>, ServiceError> {
    let inquiries = state.services.customers.customer_inquiries(id).await?;
    Ok(Json(ApiResponse::success(inquiries)))
}

pub async fn customer_quotes(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<Vec<quote::Model>>>, ServiceError> {
    let quotes = state.services.customers.customer_quotes(id).await?;
    Ok(Json(ApiResponse::success(quotes)))
}

pub async fn merge_customers(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<MergeCustomersRequest>,
) -> Result<Json<ApiResponse<customer::Model>>, ServiceError> {
    let kept = state.services.customers.merge_customers(payload).await?;
    Ok(Json(ApiResponse::success(kept)))
}
