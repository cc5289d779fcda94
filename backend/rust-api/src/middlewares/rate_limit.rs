use axum::{
    extract::{ConnectInfo, Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use redis::aio::ConnectionManager;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::error::ApiError;
use crate::services::AppState;

const LOGIN_RATE_LIMIT: u32 = 10; // attempts per window
const LOGIN_RATE_WINDOW_SECONDS: u64 = 300;
const REGISTER_RATE_LIMIT: u32 = 5;
const REGISTER_RATE_WINDOW_SECONDS: u64 = 3600;

const RATE_LIMIT_SCRIPT: &str = r#"
    local key = KEYS[1]
    local limit = tonumber(ARGV[1])
    local window = tonumber(ARGV[2])

    local current = redis.call('GET', key)

    if current == false then
        redis.call('SET', key, 1, 'EX', window)
        return 1
    end

    current = tonumber(current)

    if current >= limit then
        return 0
    end

    redis.call('INCR', key)
    return 1
"#;

pub fn client_ip(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    // X-Forwarded-For, Forwarded, X-Real-IP, then the socket address
    if let Some(v) = headers.get("x-forwarded-for") {
        if let Ok(s) = v.to_str() {
            return s.split(',').next().unwrap_or(s).trim().to_string();
        }
    }

    if let Some(v) = headers.get("forwarded") {
        if let Ok(s) = v.to_str() {
            for part in s.split(';') {
                let p = part.trim();
                if let Some(value) = p.strip_prefix("for=") {
                    return value.trim().trim_matches('"').to_string();
                }
            }
        }
    }

    if let Some(v) = headers.get("x-real-ip") {
        if let Ok(s) = v.to_str() {
            return s.trim().to_string();
        }
    }

    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn rate_limit_disabled() -> bool {
    std::env::var("RATE_LIMIT_DISABLED").unwrap_or_default() == "1"
}

fn limit_from_env(key: &str, default: u32) -> u32 {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse::<u32>().ok())
        .unwrap_or(default)
}

async fn check_rate_limit(
    redis: &ConnectionManager,
    key: &str,
    limit: u32,
    window_seconds: u64,
) -> anyhow::Result<bool> {
    let mut conn = redis.clone();

    let allowed: u32 = redis::Script::new(RATE_LIMIT_SCRIPT)
        .key(key)
        .arg(limit)
        .arg(window_seconds)
        .invoke_async(&mut conn)
        .await?;

    Ok(allowed == 1)
}

fn peer_addr(request: &Request) -> Option<SocketAddr> {
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0)
}

async fn enforce(
    state: &AppState,
    headers: &HeaderMap,
    peer: Option<SocketAddr>,
    bucket: &str,
    limit: u32,
    window_seconds: u64,
) -> Result<(), ApiError> {
    let Some(redis) = state.redis.as_ref() else {
        return Ok(());
    };
    if rate_limit_disabled() {
        tracing::debug!("Rate limiting disabled via RATE_LIMIT_DISABLED=1");
        return Ok(());
    }

    let ip = client_ip(headers, peer);
    let key = format!("ratelimit:{}:{}", bucket, ip);

    match check_rate_limit(redis, &key, limit, window_seconds).await {
        Ok(true) => Ok(()),
        Ok(false) => {
            tracing::warn!(bucket, ip = %ip, "Rate limit exceeded");
            Err(ApiError::TooManyRequests(
                "Too many requests. Please try again later.".to_string(),
            ))
        }
        Err(e) => {
            // Redis outage must not lock everyone out
            tracing::error!(bucket, error = %e, "Rate limit check failed");
            Ok(())
        }
    }
}

/// Per-IP limit on POST /api/auth/login
pub async fn login_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = limit_from_env("RATE_LIMIT_LOGIN_ATTEMPTS", LOGIN_RATE_LIMIT);
    enforce(&state, request.headers(), peer_addr(&request), "login", limit, LOGIN_RATE_WINDOW_SECONDS).await?;
    Ok(next.run(request).await)
}

/// Per-IP limit on POST /api/auth/register
pub async fn register_rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let limit = limit_from_env("RATE_LIMIT_REGISTER_ATTEMPTS", REGISTER_RATE_LIMIT);
    enforce(
        &state,
        request.headers(),
        peer_addr(&request),
        "register",
        limit,
        REGISTER_RATE_WINDOW_SECONDS,
    )
    .await?;
    Ok(next.run(request).await)
}
