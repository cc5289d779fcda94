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
    middlewares::auth::{JwtClaims, MANAGE_USERS, VIEW_DIRECTORY},
    models::{
        parse_object_id,
        user::{
            CreateUserRequest, ListUsersQuery, PaymentHistoryResponse, UpdatePaymentRequest,
            UpdateUserRequest, UserProfile,
        },
    },
    services::{user_service::UserService, AppState},
};

/// POST /api/users - Create a user (manage_users)
pub async fn create_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<CreateUserRequest>,
) -> Result<impl IntoResponse, ApiError> {
    claims.ensure(&MANAGE_USERS)?;
    req.validate()?;
    let user = UserService::new(state.mongo.clone())
        .create(&claims, req)
        .await?;
    Ok((StatusCode::CREATED, Json(user)))
}

/// GET /api/users - Directory listing scoped to the caller's school
pub async fn list_users(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<UserProfile>>, ApiError> {
    claims.ensure(&VIEW_DIRECTORY)?;
    let users = UserService::new(state.mongo.clone())
        .list(&claims, query)
        .await?;
    Ok(Json(users))
}

/// GET /api/users/{id} - Own profile, or any visible user for directory roles
pub async fn get_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<UserProfile>, ApiError> {
    let user_id = parse_object_id(&id, "id")?;
    if claims.sub != user_id.to_hex() {
        claims.ensure(&VIEW_DIRECTORY)?;
    }
    let user = UserService::new(state.mongo.clone())
        .find_visible(&claims, &user_id)
        .await?;
    Ok(Json(UserProfile::from(user)))
}

/// PUT /api/users/{id}
pub async fn update_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
    AppJson(req): AppJson<UpdateUserRequest>,
) -> Result<Json<UserProfile>, ApiError> {
    claims.ensure(&MANAGE_USERS)?;
    req.validate()?;
    let user_id = parse_object_id(&id, "id")?;
    let user = UserService::new(state.mongo.clone())
        .update(&claims, &user_id, req)
        .await?;
    Ok(Json(user))
}

/// DELETE /api/users/{id}
pub async fn delete_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    claims.ensure(&MANAGE_USERS)?;
    let user_id = parse_object_id(&id, "id")?;
    UserService::new(state.mongo.clone())
        .delete(&claims, &user_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/users/{id}/reset-password - Returns the temporary password once
pub async fn reset_password(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    claims.ensure(&MANAGE_USERS)?;
    let user_id = parse_object_id(&id, "id")?;
    let temporary_password = UserService::new(state.mongo.clone())
        .reset_password(&claims, &user_id)
        .await?;
    Ok(Json(json!({ "temporary_password": temporary_password })))
}

/// GET /api/users/{id}/payments
pub async fn get_payments(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path(id): Path<String>,
) -> Result<Json<PaymentHistoryResponse>, ApiError> {
    let user_id = parse_object_id(&id, "id")?;
    let history = UserService::new(state.mongo.clone())
        .payments(&claims, &user_id)
        .await?;
    Ok(Json(history))
}

/// PUT /api/users/{id}/payments/{period} - Mark an entry paid or pending
pub async fn update_payment(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    Path((id, period)): Path<(String, String)>,
    AppJson(req): AppJson<UpdatePaymentRequest>,
) -> Result<Json<PaymentHistoryResponse>, ApiError> {
    let user_id = parse_object_id(&id, "id")?;
    let history = UserService::new(state.mongo.clone())
        .update_payment(&claims, &user_id, &period, req)
        .await?;
    Ok(Json(history))
}
