use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;

/// Business-rule outcomes raised by services.
///
/// Infrastructure failures travel as `Internal(anyhow::Error)` so that
/// `.context(...)?` keeps working inside service code.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    Unauthorized(String),
    #[error("{0}")]
    RateLimited(String),
    #[error("{message}")]
    PolicyDenied {
        message: String,
        next_attempt_at: Option<DateTime<Utc>>,
    },
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type ServiceResult<T> = Result<T, ServiceError>;

impl ServiceError {
    pub fn not_found(message: impl Into<String>) -> Self {
        ServiceError::NotFound(message.into())
    }

    pub fn validation(message: impl Into<String>) -> Self {
        ServiceError::Validation(message.into())
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        ServiceError::Conflict(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ServiceError::Forbidden(message.into())
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ServiceError::Validation(format!("Validation error: {}", errors))
    }
}

/// Error returned by every HTTP handler. Serialized as
/// `{ "message": ..., "status": ... }`.
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    Forbidden(String),
    NotFound(String),
    Conflict(String),
    PayloadTooLarge(String),
    TooManyRequests(String),
    PolicyDenied {
        message: String,
        next_attempt_at: Option<DateTime<Utc>>,
    },
    Internal(String),
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        ApiError::BadRequest(message.into())
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        ApiError::Unauthorized(message.into())
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::Forbidden(message.into())
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        ApiError::NotFound(message.into())
    }
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::NotFound(message) => ApiError::NotFound(message),
            ServiceError::Validation(message) => ApiError::BadRequest(message),
            ServiceError::Conflict(message) => ApiError::Conflict(message),
            ServiceError::Forbidden(message) => ApiError::Forbidden(message),
            ServiceError::Unauthorized(message) => ApiError::Unauthorized(message),
            ServiceError::RateLimited(message) => ApiError::TooManyRequests(message),
            ServiceError::PolicyDenied {
                message,
                next_attempt_at,
            } => ApiError::PolicyDenied {
                message,
                next_attempt_at,
            },
            ServiceError::Internal(err) => ApiError::from(err),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        tracing::error!(error = ?err, "Unhandled service error");
        ApiError::Internal(err.to_string())
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        ApiError::BadRequest(format!("Validation error: {}", errors))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message, next_attempt_at) = match self {
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message, None),
            ApiError::Unauthorized(message) => (StatusCode::UNAUTHORIZED, message, None),
            ApiError::Forbidden(message) => (StatusCode::FORBIDDEN, message, None),
            ApiError::NotFound(message) => (StatusCode::NOT_FOUND, message, None),
            ApiError::Conflict(message) => (StatusCode::CONFLICT, message, None),
            ApiError::PayloadTooLarge(message) => (StatusCode::PAYLOAD_TOO_LARGE, message, None),
            ApiError::TooManyRequests(message) => (StatusCode::TOO_MANY_REQUESTS, message, None),
            ApiError::PolicyDenied {
                message,
                next_attempt_at,
            } => (StatusCode::FORBIDDEN, message, next_attempt_at),
            // Details were already logged; clients get a generic message
            ApiError::Internal(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
                None,
            ),
        };

        let mut body = json!({
            "message": message,
            "status": status.as_u16(),
        });
        if let Some(next_attempt_at) = next_attempt_at {
            body["next_attempt_at"] = json!(next_attempt_at);
        }

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_internal_error_hides_details() {
        let response = ApiError::Internal("connection refused".to_string()).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Internal server error");
        assert_eq!(body["status"], 500);
    }

    #[tokio::test]
    async fn test_policy_denial_carries_next_attempt() {
        let next = Utc::now();
        let err: ApiError = ServiceError::PolicyDenied {
            message: "Cool-down active".to_string(),
            next_attempt_at: Some(next),
        }
        .into();
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        let body = body_json(response).await;
        assert_eq!(body["message"], "Cool-down active");
        assert!(body["next_attempt_at"].is_string());
    }

    #[test]
    fn test_service_errors_map_to_status_families() {
        assert!(matches!(
            ApiError::from(ServiceError::conflict("dup")),
            ApiError::Conflict(_)
        ));
        assert!(matches!(
            ApiError::from(ServiceError::validation("bad")),
            ApiError::BadRequest(_)
        ));
        assert!(matches!(
            ApiError::from(ServiceError::not_found("gone")),
            ApiError::NotFound(_)
        ));
    }
}
