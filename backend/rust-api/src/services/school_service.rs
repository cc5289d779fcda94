use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::JwtClaims;
use crate::models::school::{
    CreateSchoolRequest, ListSchoolsQuery, School, SchoolResponse, UpdateSchoolRequest,
    SCHOOLS_COLLECTION,
};
use crate::models::user::USERS_COLLECTION;
use crate::models::Pagination;
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document, Regex};
use mongodb::Database;

pub struct SchoolService {
    mongo: Database,
}

impl SchoolService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn schools(&self) -> mongodb::Collection<School> {
        self.mongo.collection::<School>(SCHOOLS_COLLECTION)
    }

    async fn user_count(&self, school_id: &ObjectId) -> ServiceResult<u64> {
        Ok(self
            .mongo
            .collection::<Document>(USERS_COLLECTION)
            .count_documents(doc! { "school_id": school_id })
            .await
            .context("Failed to count school users")?)
    }

    async fn to_response(&self, school: School) -> ServiceResult<SchoolResponse> {
        let count = match school.id {
            Some(id) => self.user_count(&id).await?,
            None => 0,
        };
        let mut response = SchoolResponse::from(school);
        response.user_count = count;
        Ok(response)
    }

    pub async fn create(&self, req: CreateSchoolRequest) -> ServiceResult<SchoolResponse> {
        let now = Utc::now();
        let mut school = School {
            id: None,
            name: req.name.trim().to_string(),
            address: req.address,
            contact_email: req.contact_email,
            phone: req.phone,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .schools()
            .insert_one(&school)
            .await
            .context("Failed to insert school")?;
        school.id = inserted.inserted_id.as_object_id();

        tracing::info!(school_id = ?school.id, name = %school.name, "School created");
        Ok(SchoolResponse::from(school))
    }

    /// Platform admins see every school; everyone else only their own
    pub async fn list(
        &self,
        claims: &JwtClaims,
        query: ListSchoolsQuery,
    ) -> ServiceResult<Vec<SchoolResponse>> {
        let mut filter = doc! {};
        if claims.is_unassigned() {
            return Ok(Vec::new());
        }
        if let Some(own) = claims.scope_school(None)? {
            filter.insert("_id", own);
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            filter.insert(
                "name",
                Regex {
                    pattern: regex::escape(search.trim()),
                    options: "i".to_string(),
                },
            );
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let schools: Vec<School> = self
            .schools()
            .find(filter)
            .sort(doc! { "name": 1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query schools")?
            .try_collect()
            .await
            .context("Failed to read schools")?;

        let mut responses = Vec::with_capacity(schools.len());
        for school in schools {
            responses.push(self.to_response(school).await?);
        }
        Ok(responses)
    }

    pub async fn get(&self, claims: &JwtClaims, school_id: &ObjectId) -> ServiceResult<SchoolResponse> {
        claims
            .ensure_same_school(Some(*school_id))
            .map_err(|_| ServiceError::not_found("School not found"))?;

        let school = self
            .schools()
            .find_one(doc! { "_id": school_id })
            .await
            .context("Failed to query school")?
            .ok_or_else(|| ServiceError::not_found("School not found"))?;
        self.to_response(school).await
    }

    pub async fn update(
        &self,
        school_id: &ObjectId,
        req: UpdateSchoolRequest,
    ) -> ServiceResult<SchoolResponse> {
        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        if let Some(name) = req.name {
            set.insert("name", name.trim());
        }
        if let Some(address) = req.address {
            set.insert("address", address);
        }
        if let Some(email) = req.contact_email {
            set.insert("contact_email", email);
        }
        if let Some(phone) = req.phone {
            set.insert("phone", phone);
        }

        let updated = self
            .schools()
            .find_one_and_update(doc! { "_id": school_id }, doc! { "$set": set })
            .return_document(mongodb::options::ReturnDocument::After)
            .await
            .context("Failed to update school")?
            .ok_or_else(|| ServiceError::not_found("School not found"))?;

        self.to_response(updated).await
    }

    /// Refused while any user still belongs to the school
    pub async fn delete(&self, school_id: &ObjectId) -> ServiceResult<()> {
        let users = self.user_count(school_id).await?;
        if users > 0 {
            return Err(ServiceError::conflict(format!(
                "School still has {} users; reassign or delete them first",
                users
            )));
        }

        let result = self
            .schools()
            .delete_one(doc! { "_id": school_id })
            .await
            .context("Failed to delete school")?;
        if result.deleted_count == 0 {
            return Err(ServiceError::not_found("School not found"));
        }

        tracing::info!(school_id = %school_id, "School deleted");
        Ok(())
    }
}
