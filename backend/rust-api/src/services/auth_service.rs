use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, JwtService};
use crate::models::parse_object_id;
use crate::models::refresh_token::{RefreshToken, RefreshTokenResponse, REFRESH_TOKENS_COLLECTION};
use crate::models::school::{School, SCHOOLS_COLLECTION};
use crate::models::user::{
    AuthResponse, ChangePasswordRequest, LoginRequest, RegisterRequest, User, UserProfile,
    UserRole, USERS_COLLECTION,
};
use crate::services::{is_duplicate_key, AppState};
use anyhow::{anyhow, Context, Result};
use bcrypt::{hash, verify, DEFAULT_COST};
use chrono::{Duration, Utc};
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::Database;
use redis::aio::ConnectionManager;
use sha2::{Digest, Sha256};
use uuid::Uuid;

const MAX_FAILED_LOGINS: u32 = 5;
const FAILED_LOGIN_WINDOW_SECONDS: u64 = 900;

pub struct AuthService {
    mongo: Database,
    redis: Option<ConnectionManager>,
    jwt_service: JwtService,
    access_token_ttl_seconds: i64,
    refresh_token_ttl_seconds: i64,
}

pub fn hash_password(password: &str) -> Result<String> {
    hash(password, DEFAULT_COST).context("Failed to hash password")
}

pub fn verify_password(password: &str, hash: &str) -> Result<bool> {
    verify(password, hash).context("Failed to verify password")
}

/// SHA-256 of a refresh token; only the hash is stored
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

impl AuthService {
    pub fn new(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            redis: state.redis.clone(),
            jwt_service: state.jwt.clone(),
            access_token_ttl_seconds: state.config.access_token_ttl_seconds,
            refresh_token_ttl_seconds: state.config.refresh_token_ttl_seconds,
        }
    }

    /// Self-registration always yields a student
    pub async fn register(&self, req: RegisterRequest) -> ServiceResult<AuthResponse> {
        let school_id = match req.school_id.as_deref() {
            Some(raw) => {
                let id = parse_object_id(raw, "school_id")?;
                let exists = self
                    .mongo
                    .collection::<School>(SCHOOLS_COLLECTION)
                    .count_documents(doc! { "_id": id })
                    .await
                    .context("Failed to check school")?;
                if exists == 0 {
                    return Err(ServiceError::validation("School not found"));
                }
                Some(id)
            }
            None => None,
        };

        let now = Utc::now();
        let mut user = User {
            id: None,
            email: normalize_email(&req.email),
            password_hash: hash_password(&req.password)?,
            name: req.name.trim().to_string(),
            role: UserRole::Student,
            permissions: Vec::new(),
            school_id,
            section_id: None,
            phone: None,
            is_active: true,
            monthly_amount: None,
            payment_history: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
            metadata: None,
        };

        let users = self.mongo.collection::<User>(USERS_COLLECTION);
        let insert_result = match users.insert_one(&user).await {
            Ok(result) => result,
            Err(e) if is_duplicate_key(&e) => {
                return Err(ServiceError::conflict("User with this email already exists"))
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert user").into()),
        };

        let user_id = insert_result
            .inserted_id
            .as_object_id()
            .ok_or_else(|| anyhow!("Failed to get inserted user ID"))?;
        user.id = Some(user_id);

        tracing::info!(user_id = %user_id, "User registered");
        self.issue_tokens(user, None, None).await
    }

    pub async fn login(
        &self,
        req: LoginRequest,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> ServiceResult<AuthResponse> {
        let email = normalize_email(&req.email);

        if self.is_locked_out(&email).await {
            tracing::warn!(email = %email, "Login blocked: too many failed attempts");
            return Err(ServiceError::RateLimited(
                "Too many failed login attempts. Please try again later.".to_string(),
            ));
        }

        let user = self
            .mongo
            .collection::<User>(USERS_COLLECTION)
            .find_one(doc! { "email": &email })
            .await
            .context("Failed to query user")?;

        let user = match user {
            Some(user) if verify_password(&req.password, &user.password_hash)? => user,
            _ => {
                let count = self.record_failed_attempt(&email).await;
                tracing::warn!(email = %email, ip = ?ip, failures = count, "Failed login attempt");
                return Err(ServiceError::Unauthorized(
                    "Invalid email or password".to_string(),
                ));
            }
        };

        if !user.is_active {
            return Err(ServiceError::forbidden("Account is deactivated"));
        }

        self.clear_failed_attempts(&email).await;

        let user_id = user.id.ok_or_else(|| anyhow!("User ID not found"))?;
        self.mongo
            .collection::<User>(USERS_COLLECTION)
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": { "lastLoginAt": mongodb::bson::DateTime::now() } },
            )
            .await
            .context("Failed to update last login timestamp")?;

        tracing::info!(user_id = %user_id, ip = ?ip, "Successful login");
        self.issue_tokens(user, ip, user_agent).await
    }

    async fn issue_tokens(
        &self,
        user: User,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> ServiceResult<AuthResponse> {
        let user_id = user.id.ok_or_else(|| anyhow!("User ID not found"))?;
        let access_token = self.access_token_for(&user)?;
        let refresh_token = self
            .create_refresh_token(&user_id, ip, user_agent)
            .await?;

        Ok(AuthResponse {
            access_token,
            refresh_token,
            user: UserProfile::from(user),
        })
    }

    fn access_token_for(&self, user: &User) -> Result<String> {
        let claims = JwtClaims::for_user(user, self.access_token_ttl_seconds);
        self.jwt_service
            .generate_token(&claims)
            .context("Failed to generate access token")
    }

    async fn create_refresh_token(
        &self,
        user_id: &ObjectId,
        ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<String> {
        let token = format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple());
        let now = Utc::now();

        let refresh_token = RefreshToken {
            id: None,
            user_id: *user_id,
            token_hash: hash_token(&token),
            created_at: now,
            expires_at: now + Duration::seconds(self.refresh_token_ttl_seconds),
            last_used_at: now,
            user_agent,
            ip,
            revoked: false,
        };

        self.mongo
            .collection::<RefreshToken>(REFRESH_TOKENS_COLLECTION)
            .insert_one(&refresh_token)
            .await
            .context("Failed to insert refresh token")?;

        Ok(token)
    }

    /// Exchanges a live refresh token for a fresh access token
    pub async fn refresh(&self, refresh_token: &str) -> ServiceResult<RefreshTokenResponse> {
        let token_hash = hash_token(refresh_token);
        let collection = self
            .mongo
            .collection::<RefreshToken>(REFRESH_TOKENS_COLLECTION);

        let token_doc = collection
            .find_one(doc! { "token_hash": &token_hash, "revoked": false })
            .await
            .context("Failed to query refresh token")?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid refresh token".to_string()))?;

        if token_doc.expires_at < Utc::now() {
            return Err(ServiceError::Unauthorized(
                "Refresh token expired".to_string(),
            ));
        }

        collection
            .update_one(
                doc! { "token_hash": &token_hash },
                doc! { "$set": { "lastUsedAt": mongodb::bson::DateTime::now() } },
            )
            .await
            .context("Failed to update refresh token")?;

        let user = self
            .mongo
            .collection::<User>(USERS_COLLECTION)
            .find_one(doc! { "_id": token_doc.user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::Unauthorized("Invalid refresh token".to_string()))?;

        if !user.is_active {
            return Err(ServiceError::forbidden("Account is deactivated"));
        }

        Ok(RefreshTokenResponse {
            access_token: self.access_token_for(&user)?,
        })
    }

    /// Revokes the given refresh token; unknown tokens are ignored
    pub async fn logout(&self, user_id: &ObjectId, refresh_token: Option<&str>) -> Result<()> {
        let collection = self
            .mongo
            .collection::<RefreshToken>(REFRESH_TOKENS_COLLECTION);

        let filter = match refresh_token {
            Some(token) => doc! { "token_hash": hash_token(token), "userId": user_id },
            // no token given: sign out everywhere
            None => doc! { "userId": user_id, "revoked": false },
        };

        let result = collection
            .update_many(filter, doc! { "$set": { "revoked": true } })
            .await
            .context("Failed to revoke refresh token")?;

        tracing::info!(user_id = %user_id, revoked = result.modified_count, "Logout");
        Ok(())
    }

    pub async fn get_user(&self, user_id: &ObjectId) -> ServiceResult<User> {
        self.mongo
            .collection::<User>(USERS_COLLECTION)
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }

    /// Changes the password and revokes every refresh token of the user
    pub async fn change_password(
        &self,
        user_id: &ObjectId,
        req: ChangePasswordRequest,
    ) -> ServiceResult<()> {
        let user = self.get_user(user_id).await?;

        if !verify_password(&req.old_password, &user.password_hash)? {
            return Err(ServiceError::validation("Current password is incorrect"));
        }
        if req.old_password == req.new_password {
            return Err(ServiceError::validation(
                "New password must differ from the current one",
            ));
        }

        self.mongo
            .collection::<User>(USERS_COLLECTION)
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": {
                    "password_hash": hash_password(&req.new_password)?,
                    "updatedAt": mongodb::bson::DateTime::now(),
                } },
            )
            .await
            .context("Failed to update password")?;

        self.logout(user_id, None).await?;
        Ok(())
    }

    fn lockout_key(email: &str) -> String {
        format!("failed_login:{}", email)
    }

    /// Redis errors never lock anyone out
    async fn is_locked_out(&self, email: &str) -> bool {
        let Some(redis) = self.redis.as_ref() else {
            return false;
        };
        let mut conn = redis.clone();
        let count: Result<Option<u32>, _> = redis::cmd("GET")
            .arg(Self::lockout_key(email))
            .query_async(&mut conn)
            .await;
        match count {
            Ok(count) => count.unwrap_or(0) >= MAX_FAILED_LOGINS,
            Err(e) => {
                tracing::error!(error = %e, "Failed to query failed login attempts");
                false
            }
        }
    }

    async fn record_failed_attempt(&self, email: &str) -> u32 {
        let Some(redis) = self.redis.as_ref() else {
            return 0;
        };
        let mut conn = redis.clone();
        let key = Self::lockout_key(email);

        let count: u32 = match redis::cmd("INCR").arg(&key).query_async(&mut conn).await {
            Ok(count) => count,
            Err(e) => {
                tracing::error!(error = %e, "Failed to increment failed login attempts");
                return 0;
            }
        };

        // window starts at the first failure
        if count == 1 {
            if let Err(e) = redis::cmd("EXPIRE")
                .arg(&key)
                .arg(FAILED_LOGIN_WINDOW_SECONDS)
                .query_async::<()>(&mut conn)
                .await
            {
                tracing::error!(error = %e, "Failed to set TTL for failed login attempts");
            }
        }
        count
    }

    async fn clear_failed_attempts(&self, email: &str) {
        let Some(redis) = self.redis.as_ref() else {
            return;
        };
        let mut conn = redis.clone();
        if let Err(e) = redis::cmd("DEL")
            .arg(Self::lockout_key(email))
            .query_async::<()>(&mut conn)
            .await
        {
            tracing::error!(error = %e, "Failed to clear failed login attempts");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_token_is_stable_hex() {
        let a = hash_token("refresh");
        assert_eq!(a, hash_token("refresh"));
        assert_eq!(a.len(), 64);
        assert_ne!(a, hash_token("other"));
    }

    #[test]
    fn test_password_hash_verifies() {
        let hashed = hash_password("correct horse").unwrap();
        assert!(verify_password("correct horse", &hashed).unwrap());
        assert!(!verify_password("battery staple", &hashed).unwrap());
    }

    #[test]
    fn test_normalize_email() {
        assert_eq!(normalize_email("  Alice@School.TEST "), "alice@school.test");
    }
}
