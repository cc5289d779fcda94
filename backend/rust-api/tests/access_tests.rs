use axum::{
    body::Body,
    http::{header, Request, StatusCode},
};
use base64::{engine::general_purpose, Engine as _};
use schoolhub_api::models::user::{Permission, UserRole};
use serde_json::json;

mod common;

use common::{claims_for, send, sign, token_for};

#[tokio::test]
async fn test_student_cannot_create_school() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Student);

    let (status, body) = send(
        &app,
        "POST",
        "/api/schools",
        Some(&token),
        Some(json!({ "name": "Sneaky Academy" })),
    )
    .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["status"], 403);
}

#[tokio::test]
async fn test_granted_permission_passes_access_rule() {
    let app = common::create_offline_app().await;
    // Faculty has no school rights by role, the explicit grant lets it through
    let token = sign(&claims_for(
        UserRole::Faculty,
        vec![Permission::ManageSchools],
        3600,
    ));

    let (status, body) = send(
        &app,
        "POST",
        "/api/schools",
        Some(&token),
        Some(json!({ "name": "" })),
    )
    .await;

    // Reached validation, so the access rule passed
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("Name"));
}

#[tokio::test]
async fn test_directory_hidden_from_students() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Student);

    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_teacher_cannot_create_users() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Teacher);

    let (status, _) = send(
        &app,
        "POST",
        "/api/users",
        Some(&token),
        Some(json!({
            "email": "new@example.test",
            "password": "Passw0rd!",
            "name": "New",
            "role": "student"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_settings_require_manage_settings() {
    let app = common::create_offline_app().await;

    for role in [UserRole::Student, UserRole::Teacher, UserRole::Faculty] {
        let token = token_for(role);
        let (status, _) = send(&app, "GET", "/api/settings/due-dates", Some(&token), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN, "role {:?}", role);
    }

    let (status, _) = send(&app, "GET", "/api/settings/due-dates", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_due_day_range_is_validated() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Admin);

    let (status, body) = send(
        &app,
        "PUT",
        "/api/settings/due-dates",
        Some(&token),
        Some(json!({ "fee_due_day": 32 })),
    )
    .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("fee_due_day must be between 1 and 31"));
}

#[tokio::test]
async fn test_student_cannot_edit_timetable() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Student);

    let (status, _) = send(
        &app,
        "POST",
        "/api/timetable",
        Some(&token),
        Some(json!({
            "section_id": "507f1f77bcf86cd799439011",
            "course_id": "507f1f77bcf86cd799439012",
            "teacher_id": "507f1f77bcf86cd799439013",
            "day": "mon",
            "start_time": "09:00",
            "end_time": "10:00"
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_student_cannot_send_notifications() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Student);

    let (status, _) = send(
        &app,
        "POST",
        "/api/notifications",
        Some(&token),
        Some(json!({
            "title": "Hello",
            "message": "Everyone",
            "audience": { "type": "school" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_malformed_object_id_is_bad_request() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Admin);

    let (status, _) = send(&app, "GET", "/api/users/not-an-id", Some(&token), None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_metrics_require_basic_auth() {
    let app = common::create_offline_app().await;

    let (status, _) = send(&app, "GET", "/metrics", None, None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let wrong = general_purpose::STANDARD.encode("metrics:wrong");
    let request = Request::builder()
        .uri("/metrics")
        .header(header::AUTHORIZATION, format!("Basic {}", wrong))
        .body(Body::empty())
        .unwrap();
    let (status, _) = common::send_request(&app, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let good = general_purpose::STANDARD.encode(common::METRICS_CREDENTIALS);
    let request = Request::builder()
        .uri("/metrics")
        .header(header::AUTHORIZATION, format!("Basic {}", good))
        .body(Body::empty())
        .unwrap();
    let (status, _) = common::send_request(&app, request).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_unknown_route_is_not_found() {
    let app = common::create_offline_app().await;
    let token = token_for(UserRole::Admin);

    let (status, _) = send(&app, "GET", "/api/does-not-exist", Some(&token), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_account_without_school_is_not_platform_wide() {
    let app = common::create_offline_app().await;

    let mut faculty = claims_for(UserRole::Faculty, vec![Permission::ManageUsers], 3600);
    faculty.school_id = None;
    let token = sign(&faculty);
    let (status, _) = send(&app, "GET", "/api/users", Some(&token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let mut teacher = claims_for(UserRole::Teacher, Vec::new(), 3600);
    teacher.school_id = None;
    let token = sign(&teacher);
    let (status, body) = send(
        &app,
        "POST",
        "/api/notifications",
        Some(&token),
        Some(json!({
            "title": "Hello",
            "message": "Every student everywhere",
            "audience": { "type": "role", "role": "student" }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["message"], "Account is not assigned to a school");
}
