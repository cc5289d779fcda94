// End-to-end flows against MongoDB from .env.test: cargo test -- --ignored
use axum::http::StatusCode;
use chrono::{Duration, NaiveDate, Utc};
use schoolhub_api::{
    middlewares::auth::JwtClaims,
    models::{realtime::ServerEvent, settings::billing_period, user::UserRole},
    services::{due_date_service::DueDateService, notification_service::NotificationService},
};
use serde_json::{json, Value};
use serial_test::serial;

mod common;

use common::{claims_for, send, sign};

fn admin_token() -> String {
    let mut claims = claims_for(UserRole::Admin, Vec::new(), 3600);
    claims.school_id = None;
    sign(&claims)
}

fn token_as(user: &Value, role: UserRole, school_id: &str) -> String {
    let now = chrono::Utc::now().timestamp();
    sign(&JwtClaims {
        sub: user["id"].as_str().unwrap().to_string(),
        role,
        permissions: Vec::new(),
        school_id: Some(school_id.to_string()),
        exp: (now + 3600) as usize,
        iat: now as usize,
    })
}

async fn create_student(
    app: &axum::Router,
    admin: &str,
    school_id: &str,
    monthly_amount: Option<f64>,
) -> Value {
    let (status, student) = send(
        app,
        "POST",
        "/api/users",
        Some(admin),
        Some(json!({
            "email": common::unique_email("student"),
            "password": "Passw0rd!",
            "name": "Student",
            "role": "student",
            "school_id": school_id,
            "monthly_amount": monthly_amount,
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", student);
    student
}

async fn create_section(app: &axum::Router, admin: &str, school_id: &str, capacity: u32) -> String {
    let now = Utc::now();
    let (status, section) = send(
        app,
        "POST",
        "/api/sections",
        Some(admin),
        Some(json!({
            "school_id": school_id,
            "name": format!("Section {}", &uuid::Uuid::new_v4().simple().to_string()[..6]),
            "capacity": capacity,
            "session_start": now - Duration::days(1),
            "session_end": now + Duration::days(30),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", section);
    section["id"].as_str().unwrap().to_string()
}

async fn add_to_section(
    app: &axum::Router,
    admin: &str,
    section_id: &str,
    student: &Value,
) -> (StatusCode, Value) {
    send(
        app,
        "POST",
        &format!("/api/sections/{}/students", section_id),
        Some(admin),
        Some(json!({ "student_id": student["id"] })),
    )
    .await
}

struct Fixture {
    admin: String,
    school_id: String,
    student: Value,
    course_id: String,
}

async fn setup(app: &axum::Router) -> Fixture {
    let admin = admin_token();

    let (status, school) = send(
        app,
        "POST",
        "/api/schools",
        Some(&admin),
        Some(json!({ "name": format!("School {}", uuid::Uuid::new_v4().simple()) })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let school_id = school["id"].as_str().unwrap().to_string();

    let student = create_student(app, &admin, &school_id, None).await;

    let (status, course) = send(
        app,
        "POST",
        "/api/courses",
        Some(&admin),
        Some(json!({
            "school_id": school_id,
            "title": "Algebra",
            "code": format!("ALG-{}", &uuid::Uuid::new_v4().simple().to_string()[..6]),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let course_id = course["id"].as_str().unwrap().to_string();

    let (status, _) = send(
        app,
        "POST",
        &format!("/api/courses/{}/students", course_id),
        Some(&admin),
        Some(json!({ "student_ids": [student["id"]] })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    Fixture {
        admin,
        school_id,
        student,
        course_id,
    }
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_quiz_retake_policy_is_enforced() {
    let (app, _) = common::create_test_app().await;
    let fx = setup(&app).await;

    let (status, quiz) = send(
        &app,
        "POST",
        "/api/quizzes",
        Some(&fx.admin),
        Some(json!({
            "course_id": fx.course_id,
            "title": "Week 1",
            "questions": [
                { "id": "q1", "prompt": "2 + 2 = 4", "points": 1.0,
                  "kind": { "type": "true_false", "correct": true } },
                { "id": "q2", "prompt": "Pick 3", "points": 2.0,
                  "kind": { "type": "single_choice", "options": ["1", "2", "3"], "correct": 2 } }
            ],
            "retake_policy": { "max_attempts": 2, "cooldown_days": 1 },
            "published": true
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    let quiz_id = quiz["id"].as_str().unwrap().to_string();

    let student = token_as(&fx.student, UserRole::Student, &fx.school_id);
    let attempt = json!({
        "answers": [
            { "question_id": "q1", "answer": true },
            { "question_id": "q2", "answer": 1 }
        ]
    });

    let (status, result) = send(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", quiz_id),
        Some(&student),
        Some(attempt.clone()),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(result["attempt_number"], 1);
    assert_eq!(result["score"], 1.0);
    assert_eq!(result["max_score"], 3.0);
    assert_eq!(result["attempts_remaining"], 1);

    // Second attempt falls inside the one-day cooldown
    let (status, denied) = send(
        &app,
        "POST",
        &format!("/api/quizzes/{}/attempts", quiz_id),
        Some(&student),
        Some(attempt),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert!(denied["next_attempt_at"].is_string());

    let (status, mine) = send(
        &app,
        "GET",
        &format!("/api/quizzes/{}/my-submission", quiz_id),
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(mine["attempt_count"], 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_school_with_users_cannot_be_deleted() {
    let (app, _) = common::create_test_app().await;
    let fx = setup(&app).await;

    let (status, _) = send(
        &app,
        "DELETE",
        &format!("/api/schools/{}", fx.school_id),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_student_only_sees_own_notifications() {
    let (app, _) = common::create_test_app().await;
    let fx = setup(&app).await;

    let (status, sent) = send(
        &app,
        "POST",
        "/api/notifications",
        Some(&fx.admin),
        Some(json!({
            "title": "Welcome",
            "message": "Classes start Monday",
            "audience": { "type": "users", "user_ids": [fx.student["id"]] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", sent);

    let student = token_as(&fx.student, UserRole::Student, &fx.school_id);
    let (status, count) = send(
        &app,
        "GET",
        "/api/notifications/unread-count",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["unread"], 1);

    let (status, updated) = send(
        &app,
        "PUT",
        "/api/notifications/read-all",
        Some(&student),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["updated"], 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_section_capacity_and_single_membership() {
    let (app, _) = common::create_test_app().await;
    let fx = setup(&app).await;
    let small = create_section(&app, &fx.admin, &fx.school_id, 1).await;
    let other = create_section(&app, &fx.admin, &fx.school_id, 2).await;

    let (status, section) = add_to_section(&app, &fx.admin, &small, &fx.student).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(section["seats_left"], 0);

    let latecomer = create_student(&app, &fx.admin, &fx.school_id, None).await;
    let (status, body) = add_to_section(&app, &fx.admin, &small, &latecomer).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["message"], "Section is full");

    // Joining another section leaves the first one
    let (status, _) = add_to_section(&app, &fx.admin, &other, &fx.student).await;
    assert_eq!(status, StatusCode::OK);
    let (status, section) = send(
        &app,
        "GET",
        &format!("/api/sections/{}", small),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(section["students"], json!([]));
    assert_eq!(section["seats_left"], 1);

    let (status, _) = add_to_section(&app, &fx.admin, &small, &latecomer).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_attendance_sheet_is_replaced_per_day() {
    let (app, _) = common::create_test_app().await;
    let fx = setup(&app).await;
    let section_id = create_section(&app, &fx.admin, &fx.school_id, 5).await;
    let (status, _) = add_to_section(&app, &fx.admin, &section_id, &fx.student).await;
    assert_eq!(status, StatusCode::OK);

    let mark = |date: &str, status: &str| {
        json!({
            "section_id": section_id,
            "course_id": fx.course_id,
            "date": date,
            "records": [{ "student_id": fx.student["id"], "status": status }]
        })
    };

    let (status, first) = send(&app, "PUT", "/api/attendance", Some(&fx.admin), Some(mark("2026-9-14", "absent"))).await;
    assert_eq!(status, StatusCode::OK, "{}", first);
    assert_eq!(first["date"], "2026-09-14");

    let (status, second) = send(&app, "PUT", "/api/attendance", Some(&fx.admin), Some(mark("2026-09-14", "late"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(second["id"], first["id"]);
    assert_eq!(second["records"][0]["status"], "late");

    let (status, _) = send(&app, "PUT", "/api/attendance", Some(&fx.admin), Some(mark("2026-09-15", "present"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, sheets) = send(
        &app,
        "GET",
        &format!("/api/attendance?section_id={}&from=2026-9-1&to=2026-09-30", section_id),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(sheets.as_array().unwrap().len(), 2);

    let student_id = fx.student["id"].as_str().unwrap();
    let (status, summary) = send(
        &app,
        "GET",
        &format!("/api/attendance/students/{}/summary?course_id={}", student_id, fx.course_id),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(summary["total"], 2);
    assert_eq!(summary["counts"]["late"], 1);
    assert_eq!(summary["counts"]["present"], 1);
    assert!(summary["counts"].get("absent").is_none());
    assert_eq!(summary["attendance_rate"], 1.0);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_scheduled_notification_is_sent_once() {
    let (app, state) = common::create_test_app().await;
    let fx = setup(&app).await;
    let student_id = fx.student["id"].as_str().unwrap().to_string();
    let (_, mut inbox) = state.hub.register(&student_id).await;

    let (status, created) = send(
        &app,
        "POST",
        "/api/notifications",
        Some(&fx.admin),
        Some(json!({
            "title": "Exam tomorrow",
            "message": "Bring a pencil",
            "audience": { "type": "users", "user_ids": [student_id] },
            "scheduled_at": Utc::now() + Duration::hours(1),
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED, "{}", created);
    assert_eq!(created["status"], "scheduled");
    let notification_id = created["id"].as_str().unwrap().to_string();
    assert!(inbox.try_recv().is_err());

    let service = NotificationService::new(&state);
    let due = Utc::now() + Duration::hours(2);
    let (first, second) = tokio::join!(service.dispatch_due(due), service.dispatch_due(due));
    first.unwrap();
    second.unwrap();
    assert_eq!(service.dispatch_due(due).await.unwrap(), 0);

    let mut deliveries = 0;
    while let Ok(event) = inbox.try_recv() {
        if let ServerEvent::NewNotification(view) = event {
            if view.id == notification_id {
                deliveries += 1;
            }
        }
    }
    assert_eq!(deliveries, 1);

    let student = token_as(&fx.student, UserRole::Student, &fx.school_id);
    let (status, count) = send(&app, "GET", "/api/notifications/unread-count", Some(&student), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(count["unread"], 1);
}

#[tokio::test]
#[ignore]
#[serial]
async fn test_payment_check_is_idempotent_per_period() {
    let (app, state) = common::create_test_app().await;
    let fx = setup(&app).await;
    let payer = create_student(&app, &fx.admin, &fx.school_id, Some(75.0)).await;

    // A period no earlier run has recorded; the 31st is past any due day
    let bytes = *uuid::Uuid::new_v4().as_bytes();
    let year = 2200 + (u16::from_be_bytes([bytes[0], bytes[1]]) % 700) as i32;
    let today = NaiveDate::from_ymd_opt(year, 1, 31).unwrap();
    let period = billing_period(today);

    let service = DueDateService::new(state.mongo.clone());
    let first = service.run_payment_check(today).await.unwrap();
    assert_eq!(first.period, period);
    assert!(first.fee_entries >= 1);

    let second = service.run_payment_check(today).await.unwrap();
    assert_eq!(second.fee_entries, 0);
    assert_eq!(second.salary_entries, 0);

    let (status, history) = send(
        &app,
        "GET",
        &format!("/api/users/{}/payments", payer["id"].as_str().unwrap()),
        Some(&fx.admin),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let entries = history["entries"].as_array().unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["period"], period);
    assert_eq!(entries[0]["kind"], "fee");
    assert_eq!(entries[0]["status"], "pending");
    assert_eq!(entries[0]["amount"], 75.0);
}
