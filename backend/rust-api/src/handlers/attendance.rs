use axum::{
    extract::{Extension, Path, Query, State},
    Json,
};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        attendance::{
            AttendanceQuery, AttendanceSheetResponse, AttendanceSummary, AttendanceSummaryQuery,
            MarkAttendanceRequest,
        },
        parse_object_id,
    },
    services::{attendance_service::AttendanceService, AppState},
};

/// PUT /api/attendance - Creates or replaces the sheet for (section, course, date)
pub async fn mark_attendance(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<MarkAttendanceRequest>,
) -> Result<Json<AttendanceSheetResponse>, ApiError> {
    req.validate()?;
    let sheet = AttendanceService::new(&state).mark(&claims, req).await?;
    Ok(Json(sheet))
}

/// GET /api/attendance?section_id=&course_id=&from=&to=
pub async fn query_attendance(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<AttendanceQuery>,
) -> Result<Json<Vec<AttendanceSheetResponse>>, ApiError> {
    let sheets = AttendanceService::new(&state).query(&claims, query).await?;
    Ok(Json(sheets))
}

/// GET /api/attendance/students/{id}/summary
pub async fn attendance_summary(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    Query(query): Query<AttendanceSummaryQuery>,
) -> Result<Json<AttendanceSummary>, ApiError> {
    let student_id = parse_object_id(&id, "id")?;
    let summary = AttendanceService::new(&state)
        .summary(&claims, &student_id, query)
        .await?;
    Ok(Json(summary))
}
