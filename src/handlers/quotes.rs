use super::common::{created, paginated};
use crate::{
    auth::AuthUser,
    entities::quote,
    errors::ServiceError,
    services::quotes::{
        ConvertedQuote, CreateQuoteRequest, QuoteDetail, QuoteFilter, UpdateQuoteRequest,
    },
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use uuid::Uuid;

pub async fn list_quotes(
    State(state): State<AppState>,
    Query(filter): Query<QuoteFilter>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<quote::Model>>>, ServiceError> {
    let page = state.services.quotes.list_quotes(filter).await?;
    Ok(paginated(page))
}

pub async fn get_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<QuoteDetail>>, ServiceError> {
    let detail = state.services.quotes.get_quote(id).await?;
    Ok(Json(ApiResponse::success(detail)))
}

/// Drafts a quote attributed to the signed-in user
pub async fn create_quote(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateQuoteRequest>,
) -> Result<(StatusCode, Json<ApiResponse<QuoteDetail>>), ServiceError> {
    let detail = state
        .services
        .quotes
        .create_quote(payload, auth_user.id())
        .await?;
    Ok(created(detail))
}

pub async fn update_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<UpdateQuoteRequest>,
) -> Result<Json<ApiResponse<QuoteDetail>>, ServiceError> {
    let detail = state.services.quotes.update_quote(id, payload).await?;
    Ok(Json(ApiResponse::success(detail)))
}

pub async fn delete_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.quotes.delete_quote(id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// Pushes the quote to the e-commerce platform and records the resulting order
pub async fn convert_quote(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<Json<ApiResponse<ConvertedQuote>>, ServiceError> {
    tracing::info!(quote_id = %id, user_id = %auth_user.user_id, "quote conversion requested");
    let converted = state.services.quotes.convert_quote(id).await?;
    Ok(Json(ApiResponse::success(converted)))
}
