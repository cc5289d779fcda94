use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        course::{
            AssignTeacherRequest, CourseResponse, CreateCourseRequest, EnrollSectionRequest,
            EnrollStudentsRequest, ListCoursesQuery, UpdateCourseRequest,
        },
        parse_object_id,
    },
    services::{course_service::CourseService, AppState},
};

/// POST /api/courses
pub async fn create_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateCourseRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let course = CourseService::new(&state).create(&claims, req).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

/// GET /api/courses - Taught courses for teachers, enrolled ones for students
pub async fn list_courses(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListCoursesQuery>,
) -> Result<Json<Vec<CourseResponse>>, ApiError> {
    let courses = CourseService::new(&state).list(&claims, query).await?;
    Ok(Json(courses))
}

/// GET /api/courses/{id}
pub async fn get_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    let course = CourseService::new(&state).get(&claims, &course_id).await?;
    Ok(Json(course))
}

/// PUT /api/courses/{id}
pub async fn update_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateCourseRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    req.validate()?;
    let course_id = parse_object_id(&id, "id")?;
    let course = CourseService::new(&state)
        .update(&claims, &course_id, req)
        .await?;
    Ok(Json(course))
}

/// DELETE /api/courses/{id} - Also drops assignments, quizzes, timetable and attendance
pub async fn delete_course(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    CourseService::new(&state).delete(&claims, &course_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/courses/{id}/students
pub async fn enroll_students(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<EnrollStudentsRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    req.validate()?;
    let course_id = parse_object_id(&id, "id")?;
    let course = CourseService::new(&state)
        .enroll_students(&claims, &course_id, &req.student_ids)
        .await?;
    Ok(Json(course))
}

/// POST /api/courses/{id}/enroll-section - Enrolls the whole section roster
pub async fn enroll_section(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<EnrollSectionRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    let section_id = parse_object_id(&req.section_id, "section_id")?;
    let course = CourseService::new(&state)
        .enroll_section(&claims, &course_id, &section_id)
        .await?;
    Ok(Json(course))
}

/// DELETE /api/courses/{id}/students/{student_id}
pub async fn unenroll_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    let student_id = parse_object_id(&student_id, "student_id")?;
    let course = CourseService::new(&state)
        .unenroll_student(&claims, &course_id, &student_id)
        .await?;
    Ok(Json(course))
}

/// POST /api/courses/{id}/teachers
pub async fn assign_teacher(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<AssignTeacherRequest>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    let teacher_id = parse_object_id(&req.teacher_id, "teacher_id")?;
    let course = CourseService::new(&state)
        .assign_teacher(&claims, &course_id, &teacher_id)
        .await?;
    Ok(Json(course))
}

/// DELETE /api/courses/{id}/teachers/{teacher_id}
pub async fn remove_teacher(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((id, teacher_id)): Path<(String, String)>,
) -> Result<Json<CourseResponse>, ApiError> {
    let course_id = parse_object_id(&id, "id")?;
    let teacher_id = parse_object_id(&teacher_id, "teacher_id")?;
    let course = CourseService::new(&state)
        .remove_teacher(&claims, &course_id, &teacher_id)
        .await?;
    Ok(Json(course))
}
