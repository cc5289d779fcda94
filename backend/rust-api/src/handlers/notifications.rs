use axum::{
    extract::{Extension, Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::auth::JwtClaims,
    models::{
        notification::{
            CreateNotificationRequest, ListNotificationsQuery, NotificationView,
            SentNotificationResponse, UnreadCountResponse,
        },
        parse_object_id, Pagination,
    },
    services::{notification_service::NotificationService, AppState},
};

/// POST /api/notifications - Sent now, or stored as scheduled when scheduled_at is ahead
pub async fn create_notification(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateNotificationRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;
    let notification = NotificationService::new(&state)
        .create(&claims, req)
        .await?;
    Ok((StatusCode::CREATED, Json(notification)))
}

/// GET /api/notifications - The caller's inbox, newest first
pub async fn list_my_notifications(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListNotificationsQuery>,
) -> Result<Json<Vec<NotificationView>>, ApiError> {
    let notifications = NotificationService::new(&state)
        .list_mine(&claims.user_id()?, query)
        .await?;
    Ok(Json(notifications))
}

/// GET /api/notifications/unread-count
pub async fn unread_count(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<UnreadCountResponse>, ApiError> {
    let count = NotificationService::new(&state)
        .unread_count(&claims.user_id()?)
        .await?;
    Ok(Json(count))
}

/// GET /api/notifications/sent
pub async fn list_sent(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(page): Query<Pagination>,
) -> Result<Json<Vec<SentNotificationResponse>>, ApiError> {
    let sent = NotificationService::new(&state)
        .list_sent(&claims, page)
        .await?;
    Ok(Json(sent))
}

/// PUT /api/notifications/{id}/read
pub async fn mark_read(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let notification_id = parse_object_id(&id, "id")?;
    NotificationService::new(&state)
        .mark_read(&claims.user_id()?, &notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// PUT /api/notifications/read-all
pub async fn mark_all_read(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<impl IntoResponse, ApiError> {
    let updated = NotificationService::new(&state)
        .mark_all_read(&claims.user_id()?)
        .await?;
    Ok(Json(json!({ "updated": updated })))
}

/// DELETE /api/notifications/{id} - Sender or admin
pub async fn delete_notification(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    let notification_id = parse_object_id(&id, "id")?;
    NotificationService::new(&state)
        .delete(&claims, &notification_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
