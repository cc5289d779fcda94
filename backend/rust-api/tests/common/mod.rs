#![allow(dead_code)]

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use mongodb::bson::oid::ObjectId;
use schoolhub_api::{
    config::Config,
    create_router,
    middlewares::auth::{JwtClaims, JwtService},
    models::user::{Permission, UserRole},
    services::AppState,
};
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub const TEST_JWT_SECRET: &str = "integration-test-secret";
pub const METRICS_CREDENTIALS: &str = "metrics:secret";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

pub fn test_config() -> Config {
    Config {
        jwt_secret: TEST_JWT_SECRET.to_string(),
        metrics_auth: METRICS_CREDENTIALS.to_string(),
        uploads: schoolhub_api::config::UploadConfig {
            dir: std::env::temp_dir().join("schoolhub-test-uploads"),
            max_bytes: 1024 * 1024,
        },
        ..Config::default()
    }
}

/// Router over a Mongo client that never connects. Good for every path that
/// is rejected before a query runs (auth, access rules, validation).
pub async fn create_offline_app() -> Router {
    init_tracing();

    let config = test_config();
    // Driver connects lazily; no server is contacted until an operation runs
    let client = mongodb::Client::with_uri_str("mongodb://127.0.0.1:27017")
        .await
        .expect("Failed to build MongoDB client");
    let database = client.database("schoolhub_offline_test");

    create_router(Arc::new(AppState::with_parts(config, database, None)))
}

/// Router backed by real databases from `.env.test` (for `#[ignore]` tests)
pub async fn create_test_app() -> (Router, Arc<AppState>) {
    init_tracing();
    dotenvy::from_filename(".env.test").ok();

    let config = Config::load().expect("Failed to load test configuration");
    let mongo_client = mongodb::Client::with_uri_str(&config.mongo_uri)
        .await
        .expect("Failed to connect to test MongoDB");

    let state = Arc::new(
        AppState::new(config, mongo_client)
            .await
            .expect("Failed to initialize test app state"),
    );
    schoolhub_api::services::ensure_indexes(&state.mongo)
        .await
        .expect("Failed to create indexes");

    (create_router(state.clone()), state)
}

pub fn claims_for(role: UserRole, permissions: Vec<Permission>, ttl_seconds: i64) -> JwtClaims {
    let now = chrono::Utc::now().timestamp();
    JwtClaims {
        sub: ObjectId::new().to_hex(),
        role,
        permissions,
        school_id: Some(ObjectId::new().to_hex()),
        exp: (now + ttl_seconds) as usize,
        iat: now as usize,
    }
}

pub fn token_for(role: UserRole) -> String {
    sign(&claims_for(role, Vec::new(), 3600))
}

pub fn sign(claims: &JwtClaims) -> String {
    JwtService::new(TEST_JWT_SECRET)
        .generate_token(claims)
        .expect("Failed to sign test token")
}

pub async fn send(
    app: &Router,
    method: &str,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let body = match body {
        Some(json) => {
            builder = builder.header(header::CONTENT_TYPE, "application/json");
            Body::from(json.to_string())
        }
        None => Body::empty(),
    };

    send_request(app, builder.body(body).unwrap()).await
}

pub async fn send_request(app: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, json)
}

pub fn unique_email(prefix: &str) -> String {
    format!("{}-{}@example.test", prefix, uuid::Uuid::new_v4().simple())
}
