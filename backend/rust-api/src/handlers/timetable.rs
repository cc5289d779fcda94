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
        timetable::{
            CreateTimetableEntryRequest, TimetableEntryResponse, TimetableQuery,
            UpdateTimetableEntryRequest,
        },
    },
    services::{timetable_service::TimetableService, AppState},
};

/// POST /api/timetable - 409 when the slot clashes for the section or the teacher
pub async fn create_entry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateTimetableEntryRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let entry = TimetableService::new(&state).create(&claims, req).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

/// GET /api/timetable?section_id=&teacher_id=&day=
pub async fn list_entries(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<TimetableQuery>,
) -> Result<Json<Vec<TimetableEntryResponse>>, ApiError> {
    let entries = TimetableService::new(&state).list(&claims, query).await?;
    Ok(Json(entries))
}

/// PUT /api/timetable/{id}
pub async fn update_entry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateTimetableEntryRequest>,
) -> Result<Json<TimetableEntryResponse>, ApiError> {
    req.validate()?;
    let entry_id = parse_object_id(&id, "id")?;
    let entry = TimetableService::new(&state)
        .update(&claims, &entry_id, req)
        .await?;
    Ok(Json(entry))
}

/// DELETE /api/timetable/{id}
pub async fn delete_entry(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let entry_id = parse_object_id(&id, "id")?;
    TimetableService::new(&state).delete(&claims, &entry_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
