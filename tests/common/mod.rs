#![allow(dead_code)]

use std::sync::Arc;

use axum::{
    body::{to_bytes, Body},
    http::{Method, Request},
    response::Response,
    Router,
};
use crm_api::{
    auth::{AuthConfig, AuthService},
    config::AppConfig,
    db,
    entities::{user, UserRole},
    events::{self, EventSender},
    handlers::AppServices,
    services::{
        commerce_platform,
        push::{DisabledPushGateway, PushGateway},
        users::CreateUserRequest,
    },
    AppState,
};
use rust_decimal::Decimal;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration_signing_material_for_crm_tests_k3v9q";
pub const ADMIN_PASSWORD: &str = "correct horse battery";

/// Application harness backed by a fresh SQLite file in a temporary directory.
pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub admin: user::Model,
    token: String,
    auth_service: Arc<AuthService>,
    _event_task: tokio::task::JoinHandle<()>,
    _dir: TempDir,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(|_| {}, None).await
    }

    /// Tweak configuration before services are built
    pub async fn with_config(configure: impl FnOnce(&mut AppConfig)) -> Self {
        Self::build(configure, None).await
    }

    pub async fn with_push_gateway(gateway: Arc<dyn PushGateway>) -> Self {
        Self::build(|_| {}, Some(gateway)).await
    }

    async fn build(
        configure: impl FnOnce(&mut AppConfig),
        gateway: Option<Arc<dyn PushGateway>>,
    ) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let db_path = dir.path().join("crm_test.db");

        let mut cfg = AppConfig::new(
            format!("sqlite://{}?mode=rwc", db_path.display()),
            TEST_JWT_SECRET.to_string(),
            "127.0.0.1".to_string(),
            18_080,
            "test".to_string(),
        );
        cfg.cors_allow_any_origin = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        configure(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        db::run_migrations(&pool)
            .await
            .expect("failed to run migrations in tests");
        let db_arc = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel();
        let platform = commerce_platform::from_config(&cfg).expect("commerce platform");
        let gateway = gateway.unwrap_or_else(|| Arc::new(DisabledPushGateway));
        let services = AppServices::with_integrations(
            db_arc.clone(),
            event_sender.clone(),
            &cfg,
            platform,
            gateway,
        );
        let event_task = tokio::spawn(events::process_events(
            event_rx,
            services.event_handlers(),
        ));

        let admin = services
            .users
            .create_user(CreateUserRequest {
                name: "Avery Admin".into(),
                email: "admin@example.com".into(),
                password: ADMIN_PASSWORD.into(),
                role: UserRole::Admin,
            })
            .await
            .expect("seed admin");

        let auth_service = Arc::new(AuthService::new(
            AuthConfig::from_app_config(&cfg),
            db_arc.clone(),
        ));
        let token = auth_service
            .generate_token(&admin)
            .expect("admin token")
            .access_token;

        let state = AppState {
            db: db_arc,
            config: cfg,
            event_sender,
            services,
        };
        let router = crm_api::build_app(state.clone(), auth_service.clone()).expect("router");

        Self {
            router,
            state,
            admin,
            token,
            auth_service,
            _event_task: event_task,
            _dir: dir,
        }
    }

    /// Bearer token for the seeded admin
    pub fn token(&self) -> &str {
        &self.token
    }

    /// Creates a staff account with `role` and returns a token for it
    pub async fn token_for(&self, role: UserRole) -> (user::Model, String) {
        let email = format!("{}-{}@example.com", role, uuid::Uuid::new_v4().simple());
        let user = self
            .state
            .services
            .users
            .create_user(CreateUserRequest {
                name: format!("{} user", role),
                email,
                password: "another long password".into(),
                role,
            })
            .await
            .expect("seed user");
        let token = self
            .auth_service
            .generate_token(&user)
            .expect("token")
            .access_token;
        (user, token)
    }

    pub async fn send(&self, request: Request<Body>) -> Response {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router error during test request")
    }

    /// JSON request with an optional bearer token
    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(serde_json::to_vec(&json).expect("serialize request body"))
            }
            None => Body::empty(),
        };
        self.send(builder.body(body).expect("build request")).await
    }

    pub async fn request_authenticated(
        &self,
        method: Method,
        uri: &str,
        body: Option<Value>,
    ) -> Response {
        self.request(method, uri, body, Some(self.token())).await
    }

    /// Raw body upload (CSV imports, signed webhooks)
    pub async fn post_raw(
        &self,
        uri: &str,
        content_type: &str,
        body: impl Into<Body>,
        headers: &[(&str, &str)],
        token: Option<&str>,
    ) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header("content-type", content_type);
        if let Some(tok) = token {
            builder = builder.header("authorization", format!("Bearer {}", tok));
        }
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        self.send(builder.body(body.into()).expect("build request")).await
    }

    pub async fn upload_csv(&self, uri: &str, csv: &'static str) -> Response {
        self.post_raw(uri, "text/csv", csv, &[], Some(self.token())).await
    }
}

impl Drop for TestApp {
    fn drop(&mut self) {
        self._event_task.abort();
    }
}

/// Reads the whole body as JSON
pub async fn json_body(response: Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("response body is JSON")
}

/// Decimals serialize as strings; compare them numerically
pub fn decimal(value: &Value) -> Decimal {
    match value {
        Value::String(s) => s.parse().expect("decimal string"),
        Value::Number(n) => n.to_string().parse().expect("decimal number"),
        other => panic!("expected a decimal, got {}", other),
    }
}
