use axum::{
    extract::{Extension, Multipart, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::{AppJson, MultipartForm},
    middlewares::auth::JwtClaims,
    models::{
        assignment::{
            AssignmentResponse, CreateAssignmentRequest, GradeSubmissionRequest,
            SubmissionResponse, UpdateAssignmentRequest,
        },
        parse_object_id, Pagination,
    },
    services::{assignment_service::AssignmentService, AppState},
};

const DEFAULT_MAX_POINTS: f64 = 100.0;

fn create_request(form: &MultipartForm) -> Result<CreateAssignmentRequest, ApiError> {
    Ok(CreateAssignmentRequest {
        course_id: form.required("course_id")?,
        title: form.required("title")?,
        description: form.text("description"),
        due_date: form
            .datetime("due_date")?
            .ok_or_else(|| ApiError::bad_request("Field 'due_date' is required"))?,
        max_points: form.parse("max_points")?.unwrap_or(DEFAULT_MAX_POINTS),
    })
}

fn update_request(form: &MultipartForm) -> Result<UpdateAssignmentRequest, ApiError> {
    Ok(UpdateAssignmentRequest {
        title: form.text("title"),
        description: form.text("description"),
        due_date: form.datetime("due_date")?,
        max_points: form.parse("max_points")?,
    })
}

/// POST /api/assignments - multipart: course_id, title, description, due_date, max_points, file
pub async fn create_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let mut form = MultipartForm::read(multipart, state.storage.max_bytes()).await?;
    let req = create_request(&form)?;
    req.validate()?;

    let assignment = AssignmentService::new(&state)
        .create(&claims, req, form.file.take())
        .await?;
    Ok((StatusCode::CREATED, Json(assignment)))
}

/// GET /api/courses/{id}/assignments
pub async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(course_id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<AssignmentResponse>>, ApiError> {
    let course_id = parse_object_id(&course_id, "course_id")?;
    let assignments = AssignmentService::new(&state)
        .list_for_course(&claims, &course_id, page)
        .await?;
    Ok(Json(assignments))
}

/// GET /api/assignments/{id}
pub async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let assignment_id = parse_object_id(&id, "id")?;
    let assignment = AssignmentService::new(&state)
        .get(&claims, &assignment_id)
        .await?;
    Ok(Json(assignment))
}

/// PUT /api/assignments/{id} - multipart; a new file replaces the old one
pub async fn update_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<Json<AssignmentResponse>, ApiError> {
    let assignment_id = parse_object_id(&id, "id")?;
    let mut form = MultipartForm::read(multipart, state.storage.max_bytes()).await?;
    let req = update_request(&form)?;
    req.validate()?;

    let assignment = AssignmentService::new(&state)
        .update(&claims, &assignment_id, req, form.file.take())
        .await?;
    Ok(Json(assignment))
}

/// DELETE /api/assignments/{id}
pub async fn delete_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let assignment_id = parse_object_id(&id, "id")?;
    AssignmentService::new(&state)
        .delete(&claims, &assignment_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/assignments/{id}/submissions - multipart: text and/or file
pub async fn submit_assignment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let assignment_id = parse_object_id(&id, "id")?;
    let mut form = MultipartForm::read(multipart, state.storage.max_bytes()).await?;
    let text = form.text("text");
    if text.as_ref().is_some_and(|t| t.chars().count() > 20_000) {
        return Err(ApiError::bad_request("Text must be at most 20000 characters"));
    }

    let submission = AssignmentService::new(&state)
        .submit(&claims, &assignment_id, text, form.file.take())
        .await?;
    Ok((StatusCode::CREATED, Json(submission)))
}

/// GET /api/assignments/{id}/submissions - Students get only their own
pub async fn list_submissions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<SubmissionResponse>>, ApiError> {
    let assignment_id = parse_object_id(&id, "id")?;
    let submissions = AssignmentService::new(&state)
        .list_submissions(&claims, &assignment_id, page)
        .await?;
    Ok(Json(submissions))
}

/// PUT /api/submissions/{id}/grade
pub async fn grade_submission(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<GradeSubmissionRequest>,
) -> Result<Json<SubmissionResponse>, ApiError> {
    req.validate()?;
    let submission_id = parse_object_id(&id, "id")?;
    let submission = AssignmentService::new(&state)
        .grade(&claims, &submission_id, req)
        .await?;
    Ok(Json(submission))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_request_requires_due_date() {
        let form = MultipartForm::default();
        assert!(create_request(&form).is_err());
    }

    #[test]
    fn test_update_request_from_empty_form_changes_nothing() {
        let req = update_request(&MultipartForm::default()).unwrap();
        assert!(req.title.is_none());
        assert!(req.due_date.is_none());
        assert!(req.max_points.is_none());
    }
}
