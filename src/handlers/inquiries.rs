use super::common::paginated;
use crate::{
    auth::AuthUser,
    entities::inquiry,
    errors::ServiceError,
    services::inquiries::{ContactFormRequest, InquiryFilter, UpdateInquiryRequest},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use uuid::Uuid;

#[derive(Debug, Serialize)]
pub struct ContactReceipt {
    pub received: bool,
}

/// Public contact form. Bots that fill the honeypot get the same 202 as everyone else.
pub async fn submit_contact_form(
    State(state): State<AppState>,
    Json(payload): Json<ContactFormRequest>,
) -> Result<(StatusCode, Json<ApiResponse<ContactReceipt>>), ServiceError> {
    state.services.inquiries.submit_contact_form(payload).await?;
    let mut response = ApiResponse::success(ContactReceipt { received: true });
    response.message = Some("Thanks, we will be in touch shortly".to_string());
    Ok((StatusCode::ACCEPTED, Json(response)))
}

pub async fn list_inquiries(
    State(state): State<AppState>,
    Query(filter): Query<InquiryFilter>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<inquiry::Model>>>, ServiceError> {
    let page = state.services.inquiries.list_inquiries(filter).await?;
    Ok(paginated(page))
}

pub async fn get_inquiry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<inquiry::Model>>, ServiceError> {
    let inquiry = state.services.inquiries.get_inquiry(id).await?;
    Ok(Json(ApiResponse::success(inquiry)))
}

pub async fn update_inquiry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<UpdateInquiryRequest>,
) -> Result<Json<ApiResponse<inquiry::Model>>, ServiceError> {
    let inquiry = state.services.inquiries.update_inquiry(id, payload).await?;
    Ok(Json(ApiResponse::success(inquiry)))
}

pub async fn delete_inquiry(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    state.services.inquiries.delete_inquiry(id).await?;
    Ok(StatusCode::NO_CONTENT)
}
