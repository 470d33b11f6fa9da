use super::common::{actor_id, created, paginated};
use crate::{
    auth::AuthUser,
    entities::user,
    errors::ServiceError,
    services::users::{CreateUserRequest, UpdateUserRequest, UserFilter},
    ApiResponse, AppState, PaginatedResponse,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use tracing::info;
use uuid::Uuid;

pub async fn list_users(
    State(state): State<AppState>,
    Query(filter): Query<UserFilter>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<PaginatedResponse<user::Model>>>, ServiceError> {
    let page = state.services.users.list_users(filter).await?;
    Ok(paginated(page))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
) -> Result<Json<ApiResponse<user::Model>>, ServiceError> {
    let user = state.services.users.get_user(id).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn create_user(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<ApiResponse<user::Model>>), ServiceError> {
    let user = state.services.users.create_user(payload).await?;
    info!(created_by = %auth_user.user_id, user_id = %user.id, "staff account created");
    Ok(created(user))
}

pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    _user: AuthUser,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<ApiResponse<user::Model>>, ServiceError> {
    let user = state.services.users.update_user(id, payload).await?;
    Ok(Json(ApiResponse::success(user)))
}

pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    auth_user: AuthUser,
) -> Result<StatusCode, ServiceError> {
    let actor = actor_id(&auth_user)?;
    state.services.users.delete_user(actor, id).await?;
    Ok(StatusCode::NO_CONTENT)
}
