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
    middlewares::auth::{JwtClaims, MANAGE_SECTIONS},
    models::{
        parse_object_id,
        section::{
            AddStudentRequest, CreateSectionRequest, ListSectionsQuery, SectionResponse,
            UpdateSectionRequest,
        },
    },
    services::{section_service::SectionService, AppState},
};

/// POST /api/sections
pub async fn create_section(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateSectionRequest>,
) -> Result<impl IntoResponse, ApiError> {
    claims.ensure(&MANAGE_SECTIONS)?;
    req.validate()?;
    let section = SectionService::new(state.mongo.clone())
        .create(&claims, req)
        .await?;
    Ok((StatusCode::CREATED, Json(section)))
}

/// GET /api/sections - Students only see the section they are in
pub async fn list_sections(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListSectionsQuery>,
) -> Result<Json<Vec<SectionResponse>>, ApiError> {
    let sections = SectionService::new(state.mongo.clone())
        .list(&claims, query)
        .await?;
    Ok(Json(sections))
}

/// GET /api/sections/{id}
pub async fn get_section(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<SectionResponse>, ApiError> {
    let section_id = parse_object_id(&id, "id")?;
    let section = SectionService::new(state.mongo.clone())
        .find(&claims, &section_id)
        .await?;
    let me = claims.user_id()?;
    if claims.is_student() && !section.has_student(&me) {
        return Err(ApiError::not_found("Section not found"));
    }
    Ok(Json(SectionResponse::from(section)))
}

/// PUT /api/sections/{id}
pub async fn update_section(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateSectionRequest>,
) -> Result<Json<SectionResponse>, ApiError> {
    claims.ensure(&MANAGE_SECTIONS)?;
    req.validate()?;
    let section_id = parse_object_id(&id, "id")?;
    let section = SectionService::new(state.mongo.clone())
        .update(&claims, &section_id, req)
        .await?;
    Ok(Json(section))
}

/// DELETE /api/sections/{id}
pub async fn delete_section(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    claims.ensure(&MANAGE_SECTIONS)?;
    let section_id = parse_object_id(&id, "id")?;
    SectionService::new(state.mongo.clone())
        .delete(&claims, &section_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/sections/{id}/students - 409 when the section is full
pub async fn add_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<AddStudentRequest>,
) -> Result<Json<SectionResponse>, ApiError> {
    claims.ensure(&MANAGE_SECTIONS)?;
    let section_id = parse_object_id(&id, "id")?;
    let student_id = parse_object_id(&req.student_id, "student_id")?;
    let section = SectionService::new(state.mongo.clone())
        .add_student(&claims, &section_id, &student_id)
        .await?;
    Ok(Json(section))
}

/// DELETE /api/sections/{id}/students/{student_id}
pub async fn remove_student(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((id, student_id)): Path<(String, String)>,
) -> Result<Json<SectionResponse>, ApiError> {
    claims.ensure(&MANAGE_SECTIONS)?;
    let section_id = parse_object_id(&id, "id")?;
    let student_id = parse_object_id(&student_id, "student_id")?;
    let section = SectionService::new(state.mongo.clone())
        .remove_student(&claims, &section_id, &student_id)
        .await?;
    Ok(Json(section))
}
