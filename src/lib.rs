//! CRM API Library
//!
//! Unified customers, orders, inquiries and quotes for a business that sells
//! through an e-commerce platform, an accounting system, distributors and a
//! website contact form.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![allow(elided_lifetimes_in_paths)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

// Core modules
pub mod auth;
pub mod cache;
pub mod config;
pub mod db;
pub mod entities;
pub mod errors;
pub mod events;
pub mod handlers;
pub mod imports;
pub mod middleware_helpers;
pub mod migrator;
pub mod services;
pub mod tracing;
pub mod unify;

use axum::{
    extract::{DefaultBodyLimit, Request, State},
    http::HeaderValue,
    middleware::Next,
    response::Json,
    routing::{delete, get, post, put},
    Router,
};
use chrono::Utc;
use sea_orm::DatabaseConnection;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    timeout::TimeoutLayer,
};

use crate::auth::consts as perm;
use crate::auth::{AuthRouterExt, AuthService};

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<DatabaseConnection>,
    pub config: config::AppConfig,
    pub event_sender: events::EventSender,
    pub services: handlers::AppServices,
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub message: Option<String>,
    pub errors: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaginatedResponse<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub total_pages: u64,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            message: None,
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }

    pub fn error(message: String) -> Self {
        Self {
            success: false,
            data: None,
            message: Some(message),
            errors: None,
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Standard API result type for JSON responses
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, errors::ServiceError>;

/// Routes mounted under `/api/v1`
pub fn api_v1_routes() -> Router<AppState> {
    // Customers
    let customers_read = Router::new()
        .route("/customers", get(handlers::customers::list_customers))
        .route("/customers/:id", get(handlers::customers::get_customer))
        .route(
            "/customers/:id/orders",
            get(handlers::customers::customer_orders),
        )
        .route(
            "/customers/:id/inquiries",
            get(handlers::customers::customer_inquiries),
        )
        .route(
            "/customers/:id/quotes",
            get(handlers::customers::customer_quotes),
        )
        .with_permission(perm::CUSTOMERS_READ);

    let customers_write = Router::new()
        .route("/customers", post(handlers::customers::create_customer))
        .route(
            "/customers/merge",
            post(handlers::customers::merge_customers),
        )
        .route(
            "/customers/:id",
            put(handlers::customers::update_customer).delete(handlers::customers::delete_customer),
        )
        .with_permission(perm::CUSTOMERS_WRITE);

    // Orders
    let orders_read = Router::new()
        .route("/orders", get(handlers::orders::list_orders))
        .route("/orders/:id", get(handlers::orders::get_order))
        .with_permission(perm::ORDERS_READ);

    let orders_write = Router::new()
        .route("/orders", post(handlers::orders::create_order))
        .route("/orders/:id", delete(handlers::orders::delete_order))
        .route(
            "/orders/:id/status",
            put(handlers::orders::update_order_status),
        )
        .with_permission(perm::ORDERS_WRITE);

    // Inquiries
    let inquiries_read = Router::new()
        .route("/inquiries", get(handlers::inquiries::list_inquiries))
        .route("/inquiries/:id", get(handlers::inquiries::get_inquiry))
        .with_permission(perm::INQUIRIES_READ);

    let inquiries_write = Router::new()
        .route(
            "/inquiries/:id",
            put(handlers::inquiries::update_inquiry).delete(handlers::inquiries::delete_inquiry),
        )
        .with_permission(perm::INQUIRIES_WRITE);

    // Quotes
    let quotes_read = Router::new()
        .route("/quotes", get(handlers::quotes::list_quotes))
        .route("/quotes/:id", get(handlers::quotes::get_quote))
        .with_permission(perm::QUOTES_READ);

    let quotes_write = Router::new()
        .route("/quotes", post(handlers::quotes::create_quote))
        .route(
            "/quotes/:id",
            put(handlers::quotes::update_quote).delete(handlers::quotes::delete_quote),
        )
        .with_permission(perm::QUOTES_WRITE);

    let quotes_convert = Router::new()
        .route(
            "/quotes/:id/convert",
            post(handlers::quotes::convert_quote),
        )
        .with_permission(perm::QUOTES_CONVERT);

    // Batch imports
    let imports = Router::new()
        .route(
            "/imports/customers",
            post(handlers::imports::import_customers),
        )
        .route("/imports/orders", post(handlers::imports::import_orders))
        .with_permission(perm::IMPORTS_RUN);

    let dashboard = Router::new()
        .route("/dashboard/sales", get(handlers::dashboard::sales_summary))
        .route(
            "/dashboard/customers",
            get(handlers::dashboard::customer_summary),
        )
        .with_permission(perm::DASHBOARD_READ);

    // Push: any signed-in user manages their own subscriptions
    let push_self = Router::new()
        .route("/push/subscribe", post(handlers::push::subscribe))
        .route("/push/unsubscribe", post(handlers::push::unsubscribe))
        .with_auth();

    let push_send = Router::new()
        .route("/push/send", post(handlers::push::send))
        .with_permission(perm::PUSH_SEND);

    let users = Router::new()
        .route(
            "/users",
            get(handlers::users::list_users).post(handlers::users::create_user),
        )
        .route(
            "/users/:id",
            get(handlers::users::get_user)
                .put(handlers::users::update_user)
                .delete(handlers::users::delete_user),
        )
        .with_permission(perm::USERS_MANAGE);

    // Public: website form, signed webhook, VAPID key
    let public = Router::new()
        .route("/status", get(api_status))
        .route("/contact", post(handlers::inquiries::submit_contact_form))
        .route(
            "/webhooks/accounting",
            post(handlers::webhooks::accounting_webhook),
        )
        .route("/push/public-key", get(handlers::push::public_key));

    Router::new()
        .merge(public)
        .merge(customers_read)
        .merge(customers_write)
        .merge(orders_read)
        .merge(orders_write)
        .merge(inquiries_read)
        .merge(inquiries_write)
        .merge(quotes_read)
        .merge(quotes_write)
        .merge(quotes_convert)
        .merge(imports)
        .merge(dashboard)
        .merge(push_self)
        .merge(push_send)
        .merge(users)
}

async fn api_status(State(state): State<AppState>) -> Json<ApiResponse<Value>> {
    Json(ApiResponse::success(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "service": "crm-api",
        "environment": state.config.environment,
        "push_enabled": state.config.push_enabled(),
        "commerce_configured": state.config.commerce_credentials().is_some(),
        "timestamp": Utc::now().to_rfc3339(),
    })))
}

/// CORS from configured origins, permissive in development, otherwise an error
pub fn cors_layer(cfg: &config::AppConfig) -> Result<CorsLayer, errors::ServiceError> {
    let configured_origins: Option<Vec<HeaderValue>> = cfg
        .cors_allowed_origins
        .as_ref()
        .map(|raw| {
            raw.split(',')
                .map(str::trim)
                .filter(|origin| !origin.is_empty())
                .filter_map(|origin| HeaderValue::from_str(origin).ok())
                .collect::<Vec<_>>()
        })
        .filter(|origins| !origins.is_empty());

    if let Some(origins) = configured_origins {
        Ok(CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any))
    } else if cfg.should_allow_permissive_cors() {
        ::tracing::info!(
            development = cfg.is_development(),
            "using permissive CORS because explicit origins were not configured"
        );
        Ok(CorsLayer::permissive())
    } else {
        Err(errors::ServiceError::InternalError(
            "missing CORS configuration: set APP__CORS_ALLOWED_ORIGINS or APP__CORS_ALLOW_ANY_ORIGIN=true"
                .into(),
        ))
    }
}

/// Full application router: health, `/auth`, `/api/v1` and the shared layers
pub fn build_app(
    state: AppState,
    auth_service: Arc<AuthService>,
) -> Result<Router, errors::ServiceError> {
    let cors = cors_layer(&state.config)?;
    let timeout = state.config.request_timeout();
    let body_limit = state.config.max_body_size;

    Ok(Router::<AppState>::new()
        .route("/", get(|| async { "crm-api up" }))
        .merge(handlers::health::health_routes())
        .nest("/api/v1", api_v1_routes())
        .nest(
            "/auth",
            auth::auth_routes().with_state(auth_service.clone()),
        )
        // HTTP tracing layer for consistent request/response telemetry
        .layer(crate::tracing::configure_http_tracing())
        .layer(TimeoutLayer::new(timeout))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(cors)
        // Inject AuthService into request extensions for auth middleware
        .layer(axum::middleware::from_fn_with_state(
            auth_service,
            |State(auth): State<Arc<AuthService>>, mut req: Request, next: Next| async move {
                req.extensions_mut().insert(auth);
                next.run(req).await
            },
        ))
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id_middleware,
        ))
        .with_state(state))
}

pub mod prelude {
    pub use crate::config::AppConfig;
    pub use crate::db::*;
    pub use crate::errors::*;
    pub use crate::events::*;
    pub use crate::services::Page;
    pub use crate::{ApiResponse, ApiResult, AppState, PaginatedResponse};
}
