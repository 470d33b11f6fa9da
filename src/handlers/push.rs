use super::common::actor_id;
use crate::{
    auth::AuthUser,
    entities::push_subscription,
    errors::ServiceError,
    services::push::{PushReport, SendPushRequest, SubscribeRequest, UnsubscribeRequest},
    ApiResponse, AppState,
};
use axum::{extract::State, http::StatusCode, Json};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct PublicKey {
    pub public_key: String,
}

#[derive(Debug, Serialize)]
pub struct Unsubscribed {
    pub removed: bool,
}

/// VAPID application server key for the browser's `pushManager.subscribe`
pub async fn public_key(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<PublicKey>>, ServiceError> {
    let public_key = state.services.push.public_key()?;
    Ok(Json(ApiResponse::success(PublicKey { public_key })))
}

pub async fn subscribe(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<SubscribeRequest>,
) -> Result<(StatusCode, Json<ApiResponse<push_subscription::Model>>), ServiceError> {
    let user_id = actor_id(&auth_user)?;
    let subscription = state.services.push.subscribe(user_id, payload).await?;
    Ok((StatusCode::CREATED, Json(ApiResponse::success(subscription))))
}

pub async fn unsubscribe(
    State(state): State<AppState>,
    auth_user: AuthUser,
    Json(payload): Json<UnsubscribeRequest>,
) -> Result<Json<ApiResponse<Unsubscribed>>, ServiceError> {
    let user_id = actor_id(&auth_user)?;
    let removed = state
        .services
        .push
        .unsubscribe(user_id, &payload.endpoint)
        .await?;
    Ok(Json(ApiResponse::success(Unsubscribed { removed })))
}

pub async fn send(
    State(state): State<AppState>,
    _user: AuthUser,
    Json(payload): Json<SendPushRequest>,
) -> Result<Json<ApiResponse<PushReport>>, ServiceError> {
    let report = state.services.push.send(payload).await?;
    Ok(Json(ApiResponse::success(report)))
}
