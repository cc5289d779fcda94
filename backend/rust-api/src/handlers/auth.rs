use axum::{
    body::Bytes,
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;
use validator::Validate;

use crate::{
    error::ApiError,
    extractors::AppJson,
    middlewares::{auth::JwtClaims, rate_limit::client_ip},
    models::{
        refresh_token::RefreshTokenRequest,
        user::{ChangePasswordRequest, LoginRequest, RegisterRequest, UserProfile},
    },
    services::{auth_service::AuthService, AppState},
};

#[derive(Debug, Default, Deserialize)]
struct LogoutRequest {
    refresh_token: Option<String>,
}

/// POST /api/auth/register - Self-registration as a student
pub async fn register(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    tracing::info!(email = %req.email, "Registering new user");
    let response = AuthService::new(&state).register(req).await?;

    Ok((StatusCode::CREATED, Json(response)))
}

/// POST /api/auth/login - Email/password login
pub async fn login(
    State(state): State<Arc<AppState>>,
    connect_info: Option<Extension<ConnectInfo<SocketAddr>>>,
    headers: HeaderMap,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let peer = connect_info.map(|Extension(ConnectInfo(addr))| addr);
    let ip = client_ip(&headers, peer);
    let user_agent = headers
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    let response = AuthService::new(&state)
        .login(req, Some(ip), user_agent)
        .await?;

    tracing::info!(user_id = %response.user.id, "User logged in");
    Ok(Json(response))
}

/// POST /api/auth/refresh - Exchange a refresh token for a new access token
pub async fn refresh_token(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<RefreshTokenRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if req.refresh_token.trim().is_empty() {
        return Err(ApiError::bad_request("refresh_token is required"));
    }
    let response = AuthService::new(&state).refresh(&req.refresh_token).await?;
    Ok(Json(response))
}

/// POST /api/auth/logout - Revoke the given refresh token, or all of them
pub async fn logout(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: LogoutRequest = if body.iter().all(u8::is_ascii_whitespace) {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body).map_err(|e| {
            ApiError::bad_request(format!("Failed to parse JSON request body: {}", e))
        })?
    };

    let user_id = claims.user_id()?;
    AuthService::new(&state)
        .logout(&user_id, req.refresh_token.as_deref())
        .await?;

    tracing::info!(user_id = %user_id, "User logged out");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/auth/me
pub async fn get_current_user(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
) -> Result<Json<UserProfile>, ApiError> {
    let user = AuthService::new(&state).get_user(&claims.user_id()?).await?;
    Ok(Json(UserProfile::from(user)))
}

/// POST /api/auth/change-password
pub async fn change_password(
    State(state): State<Arc<AppState>>,
    Extension(claims): Extension<JwtClaims>,
    AppJson(req): AppJson<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    req.validate()?;

    let user_id = claims.user_id()?;
    AuthService::new(&state).change_password(&user_id, req).await?;

    tracing::info!(user_id = %user_id, "Password changed");
    Ok(StatusCode::NO_CONTENT)
}
