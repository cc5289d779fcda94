use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::JwtClaims;
use crate::models::section::{
    validate_session_window, CreateSectionRequest, ListSectionsQuery, Section, SectionResponse,
    UpdateSectionRequest, SECTIONS_COLLECTION,
};
use crate::models::user::{User, UserRole, USERS_COLLECTION};
use crate::models::{parse_object_id, Pagination};
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::options::ReturnDocument;
use mongodb::Database;

pub struct SectionService {
    mongo: Database,
}

fn window_error(err: validator::ValidationError) -> ServiceError {
    ServiceError::validation(
        err.message
            .map(|m| m.to_string())
            .unwrap_or_else(|| "Invalid session window".to_string()),
    )
}

impl SectionService {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    fn sections(&self) -> mongodb::Collection<Section> {
        self.mongo.collection::<Section>(SECTIONS_COLLECTION)
    }

    pub async fn find(&self, claims: &JwtClaims, section_id: &ObjectId) -> ServiceResult<Section> {
        let section = self
            .sections()
            .find_one(doc! { "_id": section_id })
            .await
            .context("Failed to query section")?
            .ok_or_else(|| ServiceError::not_found("Section not found"))?;
        claims
            .ensure_same_school(Some(section.school_id))
            .map_err(|_| ServiceError::not_found("Section not found"))?;
        Ok(section)
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateSectionRequest,
    ) -> ServiceResult<SectionResponse> {
        validate_session_window(req.session_start, req.session_end).map_err(window_error)?;
        let requested = req
            .school_id
            .as_deref()
            .map(|id| parse_object_id(id, "school_id"))
            .transpose()?;
        let school_id = claims.school_for_create(requested)?;

        let now = Utc::now();
        let mut section = Section {
            id: None,
            school_id,
            name: req.name.trim().to_string(),
            capacity: req.capacity,
            students: Vec::new(),
            session_start: req.session_start,
            session_end: req.session_end,
            is_active: req.session_end > now,
            created_at: now,
            updated_at: now,
        };

        let inserted = self
            .sections()
            .insert_one(&section)
            .await
            .context("Failed to insert section")?;
        section.id = inserted.inserted_id.as_object_id();

        tracing::info!(section_id = ?section.id, school_id = %school_id, "Section created");
        Ok(SectionResponse::from(section))
    }

    pub async fn list(
        &self,
        claims: &JwtClaims,
        query: ListSectionsQuery,
    ) -> ServiceResult<Vec<SectionResponse>> {
        let requested = query
            .school_id
            .as_deref()
            .map(|id| parse_object_id(id, "school_id"))
            .transpose()?;

        let mut filter = doc! {};
        if claims.is_unassigned() {
            return Ok(Vec::new());
        }
        if let Some(school_id) = claims.scope_school(requested)? {
            filter.insert("school_id", school_id);
        }
        if let Some(active) = query.is_active {
            filter.insert("is_active", active);
        }
        // Students only see the section they sit in
        if claims.is_student() {
            let me = claims.user_id()?;
            filter.insert("students", me);
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let sections: Vec<Section> = self
            .sections()
            .find(filter)
            .sort(doc! { "session_start": -1, "name": 1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query sections")?
            .try_collect()
            .await
            .context("Failed to read sections")?;

        Ok(sections.into_iter().map(SectionResponse::from).collect())
    }

    pub async fn update(
        &self,
        claims: &JwtClaims,
        section_id: &ObjectId,
        req: UpdateSectionRequest,
    ) -> ServiceResult<SectionResponse> {
        let current = self.find(claims, section_id).await?;

        let start = req.session_start.unwrap_or(current.session_start);
        let end = req.session_end.unwrap_or(current.session_end);
        validate_session_window(start, end).map_err(window_error)?;

        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        let mut filter = doc! { "_id": section_id };

        if let Some(capacity) = req.capacity {
            if (capacity as usize) < current.students.len() {
                return Err(ServiceError::validation(format!(
                    "Capacity {} is below the {} students already enrolled",
                    capacity,
                    current.students.len()
                )));
            }
            // Guard against a concurrent enrolment between read and write
            filter.insert(
                "$expr",
                doc! { "$lte": [{ "$size": "$students" }, capacity as i64] },
            );
            set.insert("capacity", capacity as i64);
        }
        if let Some(name) = req.name {
            set.insert("name", name.trim());
        }
        if req.session_start.is_some() {
            set.insert("session_start", chrono_to_bson(start));
        }
        if req.session_end.is_some() {
            set.insert("session_end", chrono_to_bson(end));
        }
        if let Some(active) = req.is_active {
            set.insert("is_active", active);
        }

        let updated = self
            .sections()
            .find_one_and_update(filter, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to update section")?
            .ok_or_else(|| ServiceError::conflict("Section changed concurrently; retry"))?;

        Ok(SectionResponse::from(updated))
    }

    pub async fn delete(&self, claims: &JwtClaims, section_id: &ObjectId) -> ServiceResult<()> {
        let section = self.find(claims, section_id).await?;

        self.sections()
            .delete_one(doc! { "_id": section_id })
            .await
            .context("Failed to delete section")?;

        if !section.students.is_empty() {
            self.mongo
                .collection::<User>(USERS_COLLECTION)
                .update_many(
                    doc! { "section_id": section_id },
                    doc! { "$unset": { "section_id": "" } },
                )
                .await
                .context("Failed to detach students from section")?;
        }

        tracing::info!(section_id = %section_id, "Section deleted");
        Ok(())
    }

    /// Seats a student; a student sits in at most one section at a time
    pub async fn add_student(
        &self,
        claims: &JwtClaims,
        section_id: &ObjectId,
        student_id: &ObjectId,
    ) -> ServiceResult<SectionResponse> {
        let section = self.find(claims, section_id).await?;
        if !section.is_active || section.session_expired(Utc::now()) {
            return Err(ServiceError::validation("Section is not active"));
        }
        if section.has_student(student_id) {
            return Err(ServiceError::conflict("Student is already in this section"));
        }
        if section.is_full() {
            return Err(ServiceError::conflict("Section is full"));
        }

        let users = self.mongo.collection::<User>(USERS_COLLECTION);
        let student = users
            .find_one(doc! { "_id": student_id })
            .await
            .context("Failed to query student")?
            .ok_or_else(|| ServiceError::not_found("Student not found"))?;
        if student.role != UserRole::Student {
            return Err(ServiceError::validation("Only students can join a section"));
        }
        if student.school_id != Some(section.school_id) {
            return Err(ServiceError::validation(
                "Student belongs to a different school",
            ));
        }

        let updated = self
            .sections()
            .find_one_and_update(
                doc! {
                    "_id": section_id,
                    "is_active": true,
                    "students": { "$ne": student_id },
                    "$expr": { "$lt": [{ "$size": "$students" }, "$capacity"] },
                },
                doc! {
                    "$addToSet": { "students": student_id },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to add student to section")?
            .ok_or_else(|| ServiceError::conflict("Section is full"))?;

        // Leave any previous section
        self.sections()
            .update_many(
                doc! { "_id": { "$ne": section_id }, "students": student_id },
                doc! { "$pull": { "students": student_id } },
            )
            .await
            .context("Failed to leave previous section")?;
        users
            .update_one(
                doc! { "_id": student_id },
                doc! { "$set": { "section_id": section_id } },
            )
            .await
            .context("Failed to record student section")?;

        tracing::info!(section_id = %section_id, student_id = %student_id, "Student added to section");
        Ok(SectionResponse::from(updated))
    }

    pub async fn remove_student(
        &self,
        claims: &JwtClaims,
        section_id: &ObjectId,
        student_id: &ObjectId,
    ) -> ServiceResult<SectionResponse> {
        self.find(claims, section_id).await?;

        let updated = self
            .sections()
            .find_one_and_update(
                doc! { "_id": section_id, "students": student_id },
                doc! {
                    "$pull": { "students": student_id },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to remove student from section")?
            .ok_or_else(|| ServiceError::not_found("Student is not in this section"))?;

        self.mongo
            .collection::<User>(USERS_COLLECTION)
            .update_one(
                doc! { "_id": student_id, "section_id": section_id },
                doc! { "$unset": { "section_id": "" } },
            )
            .await
            .context("Failed to clear student section")?;

        Ok(SectionResponse::from(updated))
    }

    /// Flags sections whose session has ended; returns how many changed
    pub async fn deactivate_expired(&self, now: DateTime<Utc>) -> ServiceResult<u64> {
        let result = self
            .sections()
            .update_many(
                doc! { "is_active": true, "session_end": { "$lt": chrono_to_bson(now) } },
                doc! { "$set": { "is_active": false, "updatedAt": chrono_to_bson(now) } },
            )
            .await
            .context("Failed to deactivate expired sections")?;

        if result.modified_count > 0 {
            tracing::info!(count = result.modified_count, "Expired sections deactivated");
        }
        Ok(result.modified_count)
    }
}
