use axum::http::StatusCode;
use schoolhub_api::models::user::UserRole;
use serde_json::json;
use serial_test::serial;

mod common;

use common::{claims_for, send, sign, token_for};

#[tokio::test]
async fn test_protected_route_without_token_is_unauthorized() {
    let app = common::create_offline_app().await;

    let (status, body) = send(&app, "GET", "/api/auth/me", None, None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Missing authorization token");
    assert_eq!(body["status"], 401);
}

#[tokio::test]
async fn test_garbage_token_is_rejected() {
    let app = common::create_offline_app().await;

    let (status, body) = send(&app, "GET", "/api/courses", Some("not-a-jwt"), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn test_token_signed_with_other_secret_is_rejected() {
    let app = common::create_offline_app().await;
    let claims = claims_for(UserRole::Admin, Vec::new(), 3600);
    let foreign = schoolhub_api::middlewares::auth::JwtService::new("some-other-secret")
        .generate_token(&claims)
        .unwrap();

    let (status, body) = send(&app, "GET", "/api/users", Some(&foreign), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid token");
}

#[tokio::test]
async fn test_expired_token_is_reported_as_expired() {
    let app = common::create_offline_app().await;
    // Past the default validation leeway
    let token = sign(&claims_for(UserRole::Teacher, Vec::new(), -600));

    let (status, body) = send(&app, "GET", "/api/notifications", Some(&token), None).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Token expired");
}

#[tokio::test]
async fn test_register_rejects_invalid_payload() {
    let app = common::create_offline_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": "not-an-email", "password": "short", "name": "" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .starts_with("Validation error"));
}

#[tokio::test]
async fn test_login_rejects_malformed_json() {
    let app = common::create_offline_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": "user@example.test" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Failed to parse JSON request body"));
}

#[tokio::test]
async fn test_refresh_requires_token_value() {
    let app = common::create_offline_app().await;

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": "   " })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "refresh_token is required");
}

#[tokio::test]
async fn test_change_password_validates_new_password() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Student);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/change-password",
        Some(&token),
        Some(json!({ "old_password": "whatever1", "new_password": "short" })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

// Requires MongoDB from .env.test: cargo test -- --ignored

#[tokio::test]
#[ignore]
#[serial]
async fn test_register_login_refresh_logout_flow() {
    let (app, _) = common::create_test_app().await;
    let email = common::unique_email("flow");

    let (status, registered) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "Passw0rd!", "name": "Flow User" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(registered["user"]["role"], "student");
    assert!(registered["user"].get("password_hash").is_none());

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "Passw0rd!", "name": "Again" })),
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, login) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": "Passw0rd!" })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let access = login["access_token"].as_str().unwrap().to_string();
    let refresh = login["refresh_token"].as_str().unwrap().to_string();

    let (status, me) = send(&app, "GET", "/api/auth/me", Some(&access), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(me["email"], email.to_lowercase());

    let (status, refreshed) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(refreshed["access_token"].as_str().is_some());

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/logout",
        Some(&access),
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::NO_CONTENT);

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/refresh",
        None,
        Some(json!({ "refresh_token": refresh })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_login_with_wrong_password() {
    let (app, _) = common::create_test_app().await;
    let email = common::unique_email("wrongpw");

    let (status, _) = send(
        &app,
        "POST",
        "/api/auth/register",
        None,
        Some(json!({ "email": email, "password": "Passw0rd!", "name": "Wrong Pw" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, body) = send(
        &app,
        "POST",
        "/api/auth/login",
        None,
        Some(json!({ "email": email, "password": "NotThePassword" })),
    )
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["message"], "Invalid email or password");
}
