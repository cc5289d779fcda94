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
        parse_object_id,
        quiz::{
            AttemptResult, CreateQuizRequest, ListQuizzesQuery, QuizResponse,
            QuizSubmissionResponse, SubmitAttemptRequest, UpdateQuizRequest,
        },
        Pagination,
    },
    services::{quiz_service::QuizService, AppState},
};

/// POST /api/quizzes
pub async fn create_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateQuizRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let quiz = QuizService::new(&state).create(&claims, req).await?;
    Ok((StatusCode::CREATED, Json(quiz)))
}

/// GET /api/quizzes?course_id=
pub async fn list_quizzes(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListQuizzesQuery>,
) -> Result<Json<Vec<QuizResponse>>, ApiError> {
    let quizzes = QuizService::new(&state).list(&claims, query).await?;
    Ok(Json(quizzes))
}

/// GET /api/quizzes/{id} - Students never receive the answer key
pub async fn get_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<QuizResponse>, ApiError> {
    let quiz_id = parse_object_id(&id, "id")?;
    let quiz = QuizService::new(&state).get(&claims, &quiz_id).await?;
    Ok(Json(quiz))
}

/// PUT /api/quizzes/{id}
pub async fn update_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateQuizRequest>,
) -> Result<Json<QuizResponse>, ApiError> {
    req.validate()?;
    let quiz_id = parse_object_id(&id, "id")?;
    let quiz = QuizService::new(&state)
        .update(&claims, &quiz_id, req)
        .await?;
    Ok(Json(quiz))
}

/// DELETE /api/quizzes/{id}
pub async fn delete_quiz(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let quiz_id = parse_object_id(&id, "id")?;
    QuizService::new(&state).delete(&claims, &quiz_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/quizzes/{id}/attempts - 403 with next_attempt_at while the retake policy blocks
pub async fn submit_attempt(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<SubmitAttemptRequest>,
) -> Result<(StatusCode, Json<AttemptResult>), ApiError> {
    let quiz_id = parse_object_id(&id, "id")?;
    let result = QuizService::new(&state)
        .submit_attempt(&claims, &quiz_id, req)
        .await?;
    Ok((StatusCode::CREATED, Json(result)))
}

/// GET /api/quizzes/{id}/submissions
pub async fn list_quiz_submissions(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<QuizSubmissionResponse>>, ApiError> {
    let quiz_id = parse_object_id(&id, "id")?;
    let submissions = QuizService::new(&state)
        .list_submissions(&claims, &quiz_id, page)
        .await?;
    Ok(Json(submissions))
}

/// GET /api/quizzes/{id}/my-submission
pub async fn my_quiz_submission(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<QuizSubmissionResponse>, ApiError> {
    let quiz_id = parse_object_id(&id, "id")?;
    let submission = QuizService::new(&state)
        .my_submission(&claims, &quiz_id)
        .await?;
    Ok(Json(submission))
}
