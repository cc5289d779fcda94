use axum::{extract::State, Json};
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    models::settings::{DueDatesResponse, UpdateDueDatesRequest},
    services::{due_date_service::DueDateService, AppState},
};

/// GET /api/settings/due-dates
pub async fn get_due_dates(
    State(state): State<Arc<AppState>>,
) -> Result<Json<DueDatesResponse>, ApiError> {
    let config = DueDateService::new(state.mongo.clone()).get().await?;
    Ok(Json(DueDatesResponse::from(config)))
}

/// PUT /api/settings/due-dates
pub async fn update_due_dates(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<UpdateDueDatesRequest>,
) -> Result<Json<DueDatesResponse>, ApiError> {
    req.validate()?;
    let config = DueDateService::new(state.mongo.clone())
        .update(req)
        .await?;
    Ok(Json(DueDatesResponse::from(config)))
}
