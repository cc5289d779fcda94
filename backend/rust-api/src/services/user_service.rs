use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, MANAGE_PAYMENTS, MANAGE_USERS};
use crate::models::course::COURSES_COLLECTION;
use crate::models::refresh_token::REFRESH_TOKENS_COLLECTION;
use crate::models::section::SECTIONS_COLLECTION;
use crate::models::user::{
    CreateUserRequest, ListUsersQuery, PaymentHistoryResponse, UpdatePaymentRequest,
    UpdateUserRequest, User, UserProfile, UserRole, USERS_COLLECTION,
};
use crate::models::{parse_object_id, Pagination};
use crate::services::auth_service::{hash_password, normalize_email};
use crate::services::is_duplicate_key;
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::{NaiveDate, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson, Document, Regex};
use mongodb::Database;
use rand::{distr::Alphanumeric, Rng};

pub struct UserService {
    mongo: Database,
}

pub fn generate_temp_password() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(12)
        .map(char::from)
        .collect()
}

/// Billing periods are "YYYY-MM"
pub fn validate_period(period: &str) -> Result<(), ServiceError> {
    let valid = period.len() == 7
        && NaiveDate::parse_from_str(&format!("{}-01", period), "%Y-%m-%d").is_ok();
    if valid {
        Ok(())
    } else {
        Err(ServiceError::validation(format!(
            "Invalid period '{}': expected YYYY-MM",
            period
        )))
    }
}

impl UserService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn users(&self) -> mongodb::Collection<User> {
        self.mongo.collection::<User>(USERS_COLLECTION)
    }

    pub async fn find(&self, user_id: &ObjectId) -> ServiceResult<User> {
        self.users()
            .find_one(doc! { "_id": user_id })
            .await
            .context("Failed to query user")?
            .ok_or_else(|| ServiceError::not_found("User not found"))
    }

    /// Loads a user the caller may see
    pub async fn find_visible(&self, claims: &JwtClaims, user_id: &ObjectId) -> ServiceResult<User> {
        let user = self.find(user_id).await?;
        claims
            .ensure_same_school(user.school_id)
            .map_err(|_| ServiceError::not_found("User not found"))?;
        Ok(user)
    }

    /// Fetches users by id, keeping only those with one of `roles`
    pub async fn find_many_with_roles(
        &self,
        ids: &[ObjectId],
        roles: &[UserRole],
    ) -> ServiceResult<Vec<User>> {
        let roles: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        let users: Vec<User> = self
            .users()
            .find(doc! { "_id": { "$in": ids }, "role": { "$in": roles } })
            .await
            .context("Failed to query users")?
            .try_collect()
            .await
            .context("Failed to read users")?;
        Ok(users)
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateUserRequest,
    ) -> ServiceResult<UserProfile> {
        if req.role == UserRole::Admin && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can create admins"));
        }
        if req.permissions.as_ref().is_some_and(|p| !p.is_empty()) && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can grant permissions"));
        }

        let requested_school = req
            .school_id
            .as_deref()
            .map(|id| parse_object_id(id, "school_id"))
            .transpose()?;
        let school_id = claims.scope_school(requested_school)?;

        let now = Utc::now();
        let mut user = User {
            id: None,
            email: normalize_email(&req.email),
            password_hash: hash_password(&req.password)?,
            name: req.name.trim().to_string(),
            role: req.role,
            permissions: req.permissions.unwrap_or_default(),
            school_id,
            section_id: None,
            phone: req.phone,
            is_active: true,
            monthly_amount: req.monthly_amount,
            payment_history: Vec::new(),
            created_at: now,
            updated_at: now,
            last_login_at: None,
            metadata: None,
        };

        let inserted = match self.users().insert_one(&user).await {
            Ok(result) => result,
            Err(e) if is_duplicate_key(&e) => {
                return Err(ServiceError::conflict("User with this email already exists"))
            }
            Err(e) => return Err(anyhow::Error::new(e).context("Failed to insert user").into()),
        };
        user.id = inserted.inserted_id.as_object_id();

        tracing::info!(
            created_by = %claims.sub,
            user_id = ?user.id,
            role = user.role.as_str(),
            "User created"
        );
        Ok(UserProfile::from(user))
    }

    pub async fn list(
        &self,
        claims: &JwtClaims,
        query: ListUsersQuery,
    ) -> ServiceResult<Vec<UserProfile>> {
        let mut filter = doc! {};

        let requested_school = query
            .school_id
            .as_deref()
            .map(|id| parse_object_id(id, "school_id"))
            .transpose()?;
        if let Some(school_id) = claims.scope_school(requested_school)? {
            filter.insert("school_id", school_id);
        }
        if let Some(role) = query.role {
            filter.insert("role", role.as_str());
        }
        if let Some(section_id) = query.section_id.as_deref() {
            filter.insert("section_id", parse_object_id(section_id, "section_id")?);
        }
        if let Some(is_active) = query.is_active {
            filter.insert("is_active", is_active);
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let regex = Regex {
                pattern: regex::escape(search.trim()),
                options: "i".to_string(),
            };
            filter.insert(
                "$or",
                vec![doc! { "email": &regex }, doc! { "name": &regex }],
            );
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };

        let users: Vec<User> = self
            .users()
            .find(filter)
            .sort(doc! { "createdAt": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query users")?
            .try_collect()
            .await
            .context("Failed to read users")?;

        Ok(users.into_iter().map(UserProfile::from).collect())
    }

    pub async fn update(
        &self,
        claims: &JwtClaims,
        user_id: &ObjectId,
        req: UpdateUserRequest,
    ) -> ServiceResult<UserProfile> {
        let existing = self.find_visible(claims, user_id).await?;

        let touches_admin = existing.role == UserRole::Admin || req.role == Some(UserRole::Admin);
        if touches_admin && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can manage admins"));
        }
        if req.permissions.is_some() && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can grant permissions"));
        }

        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        if let Some(name) = req.name {
            set.insert("name", name.trim());
        }
        if let Some(role) = req.role {
            set.insert("role", role.as_str());
        }
        if let Some(permissions) = req.permissions {
            set.insert(
                "permissions",
                to_bson(&permissions).context("Failed to encode permissions")?,
            );
        }
        if let Some(school_id) = req.school_id.as_deref() {
            let school_id = parse_object_id(school_id, "school_id")?;
            if claims.scope_school(Some(school_id))? != Some(school_id) {
                return Err(ServiceError::forbidden("Access to another school is denied"));
            }
            set.insert("school_id", school_id);
        }
        if let Some(phone) = req.phone {
            set.insert("phone", phone);
        }
        if let Some(is_active) = req.is_active {
            if !is_active && claims.sub == user_id.to_hex() {
                return Err(ServiceError::validation("You cannot deactivate yourself"));
            }
            set.insert("is_active", is_active);
        }
        if let Some(amount) = req.monthly_amount {
            set.insert("monthly_amount", amount);
        }

        self.users()
            .update_one(doc! { "_id": user_id }, doc! { "$set": set })
            .await
            .context("Failed to update user")?;

        Ok(UserProfile::from(self.find(user_id).await?))
    }

    /// Deletes the user and detaches them from rosters and sessions
    pub async fn delete(&self, claims: &JwtClaims, user_id: &ObjectId) -> ServiceResult<()> {
        if claims.sub == user_id.to_hex() {
            return Err(ServiceError::validation("You cannot delete yourself"));
        }
        let user = self.find_visible(claims, user_id).await?;
        if user.role == UserRole::Admin && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can manage admins"));
        }

        self.users()
            .delete_one(doc! { "_id": user_id })
            .await
            .context("Failed to delete user")?;

        self.mongo
            .collection::<Document>(SECTIONS_COLLECTION)
            .update_many(
                doc! { "students": user_id },
                doc! { "$pull": { "students": user_id } },
            )
            .await
            .context("Failed to detach user from sections")?;

        self.mongo
            .collection::<Document>(COURSES_COLLECTION)
            .update_many(
                doc! { "$or": [ { "students": user_id }, { "teachers": user_id } ] },
                doc! { "$pull": { "students": user_id, "teachers": user_id } },
            )
            .await
            .context("Failed to detach user from courses")?;

        self.mongo
            .collection::<Document>(REFRESH_TOKENS_COLLECTION)
            .update_many(
                doc! { "userId": user_id },
                doc! { "$set": { "revoked": true } },
            )
            .await
            .context("Failed to revoke user sessions")?;

        tracing::info!(deleted_by = %claims.sub, user_id = %user_id, "User deleted");
        Ok(())
    }

    /// Sets a random password and returns it once
    pub async fn reset_password(
        &self,
        claims: &JwtClaims,
        user_id: &ObjectId,
    ) -> ServiceResult<String> {
        let user = self.find_visible(claims, user_id).await?;
        if user.role == UserRole::Admin && !claims.is_admin() {
            return Err(ServiceError::forbidden("Only admins can manage admins"));
        }

        let temp_password = generate_temp_password();
        self.users()
            .update_one(
                doc! { "_id": user_id },
                doc! { "$set": {
                    "password_hash": hash_password(&temp_password)?,
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await
            .context("Failed to reset password")?;

        self.mongo
            .collection::<Document>(REFRESH_TOKENS_COLLECTION)
            .update_many(
                doc! { "userId": user_id },
                doc! { "$set": { "revoked": true } },
            )
            .await
            .context("Failed to revoke user sessions")?;

        tracing::info!(reset_by = %claims.sub, user_id = %user_id, "Password reset");
        Ok(temp_password)
    }

    /// Fee or salary history; visible to the user and to payment managers
    pub async fn payments(
        &self,
        claims: &JwtClaims,
        user_id: &ObjectId,
    ) -> ServiceResult<PaymentHistoryResponse> {
        let is_self = claims.sub == user_id.to_hex();
        if !is_self && !claims.allows(&MANAGE_PAYMENTS) && !claims.allows(&MANAGE_USERS) {
            return Err(ServiceError::forbidden("Insufficient permissions"));
        }
        let user = self.find_visible(claims, user_id).await?;
        Ok(PaymentHistoryResponse::from_user(&user))
    }

    pub async fn update_payment(
        &self,
        claims: &JwtClaims,
        user_id: &ObjectId,
        period: &str,
        req: UpdatePaymentRequest,
    ) -> ServiceResult<PaymentHistoryResponse> {
        claims.ensure(&MANAGE_PAYMENTS)?;
        validate_period(period)?;
        self.find_visible(claims, user_id).await?;

        let paid_at = match req.status {
            crate::models::user::PaymentStatus::Paid => {
                mongodb::bson::Bson::DateTime(chrono_to_bson(Utc::now()))
            }
            crate::models::user::PaymentStatus::Pending => mongodb::bson::Bson::Null,
        };

        let result = self
            .users()
            .update_one(
                doc! {
                    "_id": user_id,
                    "payment_history": { "$elemMatch": { "period": period, "kind": req.kind.as_str() } },
                },
                doc! { "$set": {
                    "payment_history.$.status": req.status.as_str(),
                    "payment_history.$.paidAt": paid_at,
                    "updatedAt": chrono_to_bson(Utc::now()),
                } },
            )
            .await
            .context("Failed to update payment entry")?;

        if result.matched_count == 0 {
            return Err(ServiceError::not_found(format!(
                "No {} entry for period {}",
                req.kind.as_str(),
                period
            )));
        }

        tracing::info!(
            user_id = %user_id,
            period,
            kind = req.kind.as_str(),
            status = req.status.as_str(),
            "Payment entry updated"
        );

        let user = self.find(user_id).await?;
        Ok(PaymentHistoryResponse::from_user(&user))
    }

    /// Ids of active users in a school with the given role
    pub async fn ids_by_role(
        &self,
        school_id: Option<ObjectId>,
        role: Option<UserRole>,
    ) -> ServiceResult<Vec<ObjectId>> {
        let mut filter = doc! { "is_active": true };
        if let Some(school_id) = school_id {
            filter.insert("school_id", school_id);
        }
        if let Some(role) = role {
            filter.insert("role", role.as_str());
        }
        let docs: Vec<Document> = self
            .mongo
            .collection::<Document>(USERS_COLLECTION)
            .find(filter)
            .projection(doc! { "_id": 1 })
            .await
            .context("Failed to query users")?
            .try_collect()
            .await
            .context("Failed to read users")?;
        Ok(docs
            .iter()
            .filter_map(|d| d.get_object_id("_id").ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_temp_password_shape() {
        let password = generate_temp_password();
        assert_eq!(password.len(), 12);
        assert!(password.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(password, generate_temp_password());
    }

    #[test]
    fn test_validate_period() {
        assert!(validate_period("2026-10").is_ok());
        assert!(validate_period("2026-13").is_err());
        assert!(validate_period("2026-1").is_err());
        assert!(validate_period("oct").is_err());
    }
}
