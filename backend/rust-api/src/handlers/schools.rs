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
    middlewares::auth::{JwtClaims, MANAGE_SCHOOLS},
    models::{
        parse_object_id,
        school::{CreateSchoolRequest, ListSchoolsQuery, SchoolResponse, UpdateSchoolRequest},
    },
    services::{school_service::SchoolService, AppState},
};

/// POST /api/schools
pub async fn create_school(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateSchoolRequest>,
) -> Result<impl IntoResponse, ApiError> {
    claims.ensure(&MANAGE_SCHOOLS)?;
    req.validate()?;
    let school = SchoolService::new(state.mongo.clone()).create(req).await?;
    tracing::info!(created_by = %claims.sub, school_id = %school.id, "School created");
    Ok((StatusCode::CREATED, Json(school)))
}

/// GET /api/schools - All schools for platform admins, otherwise the caller's own
pub async fn list_schools(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListSchoolsQuery>,
) -> Result<Json<Vec<SchoolResponse>>, ApiError> {
    let schools = SchoolService::new(state.mongo.clone())
        .list(&claims, query)
        .await?;
    Ok(Json(schools))
}

/// GET /api/schools/{id}
pub async fn get_school(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<SchoolResponse>, ApiError> {
    let school_id = parse_object_id(&id, "id")?;
    let school = SchoolService::new(state.mongo.clone())
        .get(&claims, &school_id)
        .await?;
    Ok(Json(school))
}

/// PUT /api/schools/{id}
pub async fn update_school(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateSchoolRequest>,
) -> Result<Json<SchoolResponse>, ApiError> {
    claims.ensure(&MANAGE_SCHOOLS)?;
    req.validate()?;
    let school_id = parse_object_id(&id, "id")?;
    let school = SchoolService::new(state.mongo.clone())
        .update(&school_id, req)
        .await?;
    Ok(Json(school))
}

/// DELETE /api/schools/{id} - Refused while users still belong to the school
pub async fn delete_school(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    claims.ensure(&MANAGE_SCHOOLS)?;
    let school_id = parse_object_id(&id, "id")?;
    SchoolService::new(state.mongo.clone())
        .delete(&school_id)
        .await?;
    tracing::info!(deleted_by = %claims.sub, school_id = %school_id, "School deleted");
    Ok(StatusCode::NO_CONTENT)
}
