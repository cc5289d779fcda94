use axum::{
    extract::{Request, State},
    http::HeaderMap,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{decode, encode, errors::ErrorKind, DecodingKey, EncodingKey, Header, Validation};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{ApiError, ServiceError};
use crate::metrics::AUTH_FAILURES_TOTAL;
use crate::models::user::{Permission, User, UserRole};
use crate::services::AppState;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct JwtClaims {
    pub sub: String, // user_id
    pub role: UserRole,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<String>,
    pub exp: usize,
    pub iat: usize,
}

/// Allow-list of roles plus an optional capability that also grants access.
/// Admins always pass.
#[derive(Debug)]
pub struct AccessRule {
    pub roles: &'static [UserRole],
    pub permission: Option<Permission>,
}

impl AccessRule {
    pub const fn new(roles: &'static [UserRole], permission: Option<Permission>) -> Self {
        Self { roles, permission }
    }
}

pub const ADMIN_ONLY: AccessRule = AccessRule::new(&[], None);
pub const MANAGE_USERS: AccessRule = AccessRule::new(&[], Some(Permission::ManageUsers));
pub const VIEW_DIRECTORY: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::ManageUsers),
);
pub const MANAGE_SCHOOLS: AccessRule = AccessRule::new(&[], Some(Permission::ManageSchools));
pub const MANAGE_SECTIONS: AccessRule =
    AccessRule::new(&[UserRole::Faculty], Some(Permission::ManageSections));
pub const MANAGE_COURSES: AccessRule =
    AccessRule::new(&[UserRole::Faculty], Some(Permission::ManageCourses));
pub const MANAGE_ASSIGNMENTS: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::ManageAssignments),
);
pub const GRADE_SUBMISSIONS: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::GradeSubmissions),
);
pub const MANAGE_QUIZZES: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::ManageQuizzes),
);
pub const MARK_ATTENDANCE: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::MarkAttendance),
);
pub const MANAGE_TIMETABLE: AccessRule =
    AccessRule::new(&[UserRole::Faculty], Some(Permission::ManageTimetable));
pub const SEND_NOTIFICATIONS: AccessRule = AccessRule::new(
    &[UserRole::Faculty, UserRole::Teacher],
    Some(Permission::SendNotifications),
);
pub const MANAGE_PAYMENTS: AccessRule = AccessRule::new(&[], Some(Permission::ManagePayments));
pub const MANAGE_SETTINGS: AccessRule = AccessRule::new(&[], Some(Permission::ManageSettings));

impl JwtClaims {
    pub fn for_user(user: &User, ttl_seconds: i64) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            sub: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            role: user.role,
            permissions: user.permissions.clone(),
            school_id: user.school_id.map(|id| id.to_hex()),
            exp: (now + ttl_seconds) as usize,
            iat: now as usize,
        }
    }

    pub fn user_id(&self) -> Result<ObjectId, ServiceError> {
        ObjectId::parse_str(&self.sub)
            .map_err(|_| ServiceError::Unauthorized("Invalid token".to_string()))
    }

    pub fn school_oid(&self) -> Option<ObjectId> {
        self.school_id
            .as_deref()
            .and_then(|id| ObjectId::parse_str(id).ok())
    }

    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }

    pub fn is_student(&self) -> bool {
        self.role == UserRole::Student
    }

    pub fn has_permission(&self, permission: Permission) -> bool {
        self.permissions.contains(&permission)
    }

    pub fn allows(&self, rule: &AccessRule) -> bool {
        self.is_admin()
            || rule.roles.contains(&self.role)
            || rule
                .permission
                .map(|permission| self.has_permission(permission))
                .unwrap_or(false)
    }

    pub fn ensure(&self, rule: &AccessRule) -> Result<(), ServiceError> {
        if self.allows(rule) {
            Ok(())
        } else {
            Err(ServiceError::forbidden("Insufficient permissions"))
        }
    }

    /// Non-admin account that no school has claimed yet
    pub fn is_unassigned(&self) -> bool {
        !self.is_admin() && self.school_oid().is_none()
    }

    /// Tenant filter for queries. Platform admins (no school) may pick any
    /// school or none; everyone else is pinned to their own, and a
    /// non-admin without a school gets no scope at all.
    pub fn scope_school(
        &self,
        requested: Option<ObjectId>,
    ) -> Result<Option<ObjectId>, ServiceError> {
        match self.school_oid() {
            None if self.is_admin() => Ok(requested),
            None => Err(ServiceError::forbidden(
                "Account is not assigned to a school",
            )),
            Some(own) => match requested {
                Some(other) if other != own => {
                    Err(ServiceError::forbidden("Access to another school is denied"))
                }
                _ => Ok(Some(own)),
            },
        }
    }

    /// School for a record about to be created
    pub fn school_for_create(&self, requested: Option<ObjectId>) -> Result<ObjectId, ServiceError> {
        self.scope_school(requested)?
            .ok_or_else(|| ServiceError::validation("school_id is required"))
    }

    /// Rejects records that belong to a different tenant
    pub fn ensure_same_school(&self, record_school: Option<ObjectId>) -> Result<(), ServiceError> {
        match (self.school_oid(), record_school) {
            (Some(own), Some(other)) if own != other => {
                Err(ServiceError::not_found("Resource not found"))
            }
            (None, Some(_)) if !self.is_admin() => {
                Err(ServiceError::not_found("Resource not found"))
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing authorization token")]
    MissingToken,
    #[error("Token expired")]
    ExpiredToken,
    #[error("Invalid token")]
    InvalidToken,
}

impl AuthError {
    fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingToken => "missing",
            AuthError::ExpiredToken => "expired",
            AuthError::InvalidToken => "invalid",
        }
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        AUTH_FAILURES_TOTAL.with_label_values(&[err.reason()]).inc();
        ApiError::Unauthorized(err.to_string())
    }
}

#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtService {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn generate_token(&self, claims: &JwtClaims) -> anyhow::Result<String> {
        Ok(encode(&Header::default(), claims, &self.encoding_key)?)
    }

    pub fn validate_token(&self, token: &str) -> Result<JwtClaims, AuthError> {
        let validation = Validation::default();

        decode::<JwtClaims>(token, &self.decoding_key, &validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken,
            })
    }
}

pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// Validates the bearer token and stores the claims for handlers
pub async fn auth_middleware(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    mut request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(&headers).ok_or(AuthError::MissingToken)?;

    let claims = state.jwt.validate_token(token).map_err(|e| {
        tracing::warn!(path = %request.uri().path(), error = %e, "JWT validation failed");
        e
    })?;

    tracing::debug!(user_id = %claims.sub, role = claims.role.as_str(), "Authenticated");

    request.extensions_mut().insert(claims);

    Ok(next.run(request).await)
}

/// Router-level allow-list check; pair with `from_fn_with_state(&RULE, access_guard)`
pub async fn access_guard(
    State(rule): State<&'static AccessRule>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    match request.extensions().get::<JwtClaims>() {
        Some(claims) if claims.allows(rule) => Ok(next.run(request).await),
        Some(claims) => {
            tracing::warn!(
                user_id = %claims.sub,
                role = claims.role.as_str(),
                path = %request.uri().path(),
                "Access denied"
            );
            Err(ApiError::forbidden("Insufficient permissions"))
        }
        None => Err(AuthError::MissingToken.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn claims(role: UserRole, permissions: Vec<Permission>) -> JwtClaims {
        let now = chrono::Utc::now().timestamp();
        JwtClaims {
            sub: ObjectId::new().to_hex(),
            role,
            permissions,
            school_id: None,
            exp: (now + 3600) as usize,
            iat: now as usize,
        }
    }

    #[test]
    fn test_jwt_generation_and_validation() {
        let service = JwtService::new("test-secret");
        let original = claims(UserRole::Teacher, vec![Permission::ManageQuizzes]);

        let token = service.generate_token(&original).unwrap();
        let validated = service.validate_token(&token).unwrap();

        assert_eq!(validated.sub, original.sub);
        assert_eq!(validated.role, UserRole::Teacher);
        assert_eq!(validated.permissions, vec![Permission::ManageQuizzes]);
    }

    #[test]
    fn test_expired_and_foreign_tokens_are_distinguished() {
        let service = JwtService::new("test-secret");
        let mut stale = claims(UserRole::Student, vec![]);
        stale.exp = (chrono::Utc::now().timestamp() - 3600) as usize;
        let token = service.generate_token(&stale).unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::ExpiredToken)
        ));

        let other = JwtService::new("other-secret");
        let token = other
            .generate_token(&claims(UserRole::Student, vec![]))
            .unwrap();
        assert!(matches!(
            service.validate_token(&token),
            Err(AuthError::InvalidToken)
        ));
        assert!(matches!(
            service.validate_token("garbage"),
            Err(AuthError::InvalidToken)
        ));
    }

    #[test]
    fn test_rule_allows_role_or_permission() {
        let teacher = claims(UserRole::Teacher, vec![]);
        assert!(teacher.allows(&MANAGE_QUIZZES));
        assert!(!teacher.allows(&MANAGE_SECTIONS));

        let student = claims(UserRole::Student, vec![]);
        assert!(!student.allows(&MANAGE_QUIZZES));

        let helper = claims(UserRole::Student, vec![Permission::MarkAttendance]);
        assert!(helper.allows(&MARK_ATTENDANCE));

        let admin = claims(UserRole::Admin, vec![]);
        assert!(admin.allows(&ADMIN_ONLY));
        assert!(admin.allows(&MANAGE_SETTINGS));
        assert!(!claims(UserRole::Faculty, vec![]).allows(&ADMIN_ONLY));
    }

    #[test]
    fn test_school_scoping() {
        let own = ObjectId::new();
        let other = ObjectId::new();

        let mut faculty = claims(UserRole::Faculty, vec![]);
        faculty.school_id = Some(own.to_hex());
        assert_eq!(faculty.scope_school(None).unwrap(), Some(own));
        assert_eq!(faculty.scope_school(Some(own)).unwrap(), Some(own));
        assert!(faculty.scope_school(Some(other)).is_err());
        assert!(faculty.ensure_same_school(Some(other)).is_err());

        let platform = claims(UserRole::Admin, vec![]);
        assert_eq!(platform.scope_school(Some(other)).unwrap(), Some(other));
        assert_eq!(platform.scope_school(None).unwrap(), None);
        assert!(platform.school_for_create(None).is_err());
    }

    #[test]
    fn test_unassigned_account_is_never_unscoped() {
        let other = ObjectId::new();

        let faculty = claims(UserRole::Faculty, vec![Permission::ManageUsers]);
        assert!(faculty.is_unassigned());
        assert!(faculty.scope_school(None).is_err());
        assert!(faculty.scope_school(Some(other)).is_err());
        assert!(faculty.school_for_create(Some(other)).is_err());
        assert!(faculty.ensure_same_school(Some(other)).is_err());
        assert!(faculty.ensure_same_school(None).is_ok());

        let teacher = claims(UserRole::Teacher, vec![]);
        assert!(matches!(
            teacher.scope_school(None),
            Err(ServiceError::Forbidden(_))
        ));

        let platform = claims(UserRole::Admin, vec![]);
        assert!(!platform.is_unassigned());
        assert!(platform.ensure_same_school(Some(other)).is_ok());
    }

    #[test]
    fn test_bearer_token_extraction() {
        let mut headers = HeaderMap::new();
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", "Basic abc".parse().unwrap());
        assert!(bearer_token(&headers).is_none());
        headers.insert("authorization", "Bearer abc.def".parse().unwrap());
        assert_eq!(bearer_token(&headers), Some("abc.def"));
    }
}
