use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{JwtClaims, GRADE_SUBMISSIONS, MANAGE_ASSIGNMENTS};
use crate::models::assignment::{
    validate_grade, Assignment, AssignmentResponse, CreateAssignmentRequest,
    GradeSubmissionRequest, StoredFile, Submission, SubmissionResponse, UpdateAssignmentRequest,
    ASSIGNMENTS_COLLECTION, SUBMISSIONS_COLLECTION,
};
use crate::models::course::Course;
use crate::models::{parse_object_id, Pagination};
use crate::services::course_service::{can_view_course, ensure_course_staff, CourseService};
use crate::services::notification_service::NotificationService;
use crate::services::upload_storage::{IncomingFile, UploadCategory, UploadStorage};
use crate::services::{is_duplicate_key, AppState};
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, to_bson};
use mongodb::options::ReturnDocument;
use mongodb::Database;

pub struct AssignmentService<'a> {
    state: &'a AppState,
    mongo: Database,
    storage: UploadStorage,
}

impl<'a> AssignmentService<'a> {
    pub fn new(state: &'a AppState) -> Self {
        Self {
            state,
            mongo: state.mongo.clone(),
            storage: state.storage.clone(),
        }
    }

    fn assignments(&self) -> mongodb::Collection<Assignment> {
        self.mongo.collection::<Assignment>(ASSIGNMENTS_COLLECTION)
    }

    fn submissions(&self) -> mongodb::Collection<Submission> {
        self.mongo.collection::<Submission>(SUBMISSIONS_COLLECTION)
    }

    async fn load(&self, claims: &JwtClaims, assignment_id: &ObjectId) -> ServiceResult<(Assignment, Course)> {
        let assignment = self
            .assignments()
            .find_one(doc! { "_id": assignment_id })
            .await
            .context("Failed to query assignment")?
            .ok_or_else(|| ServiceError::not_found("Assignment not found"))?;
        let course = CourseService::new(self.state)
            .load(claims, &assignment.course_id)
            .await
            .map_err(|_| ServiceError::not_found("Assignment not found"))?;
        Ok((assignment, course))
    }

    async fn store(&self, category: UploadCategory, file: Option<IncomingFile>) -> ServiceResult<Option<StoredFile>> {
        match file {
            Some(file) if file.bytes.len() > self.storage.max_bytes() => Err(ServiceError::validation(
                format!("File exceeds the {} byte limit", self.storage.max_bytes()),
            )),
            Some(file) => Ok(Some(self.storage.save(category, file).await?)),
            None => Ok(None),
        }
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateAssignmentRequest,
        file: Option<IncomingFile>,
    ) -> ServiceResult<AssignmentResponse> {
        let course_id = parse_object_id(&req.course_id, "course_id")?;
        let course = CourseService::new(self.state).load(claims, &course_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_ASSIGNMENTS)?;

        let attachment = self.store(UploadCategory::Assignments, file).await?;

        let now = Utc::now();
        let mut assignment = Assignment {
            id: None,
            course_id,
            school_id: course.school_id,
            title: req.title.trim().to_string(),
            description: req.description,
            due_date: req.due_date,
            max_points: req.max_points,
            attachment,
            created_by: claims.user_id()?,
            created_at: now,
            updated_at: now,
        };

        let inserted = match self.assignments().insert_one(&assignment).await {
            Ok(inserted) => inserted,
            Err(e) => {
                if let Some(file) = &assignment.attachment {
                    self.storage.remove_quietly(file).await;
                }
                return Err(anyhow::Error::new(e).context("Failed to insert assignment").into());
            }
        };
        assignment.id = inserted.inserted_id.as_object_id();

        tracing::info!(assignment_id = ?assignment.id, course_id = %course_id, "Assignment created");
        Ok(AssignmentResponse::from(assignment))
    }

    pub async fn list_for_course(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        page: Pagination,
    ) -> ServiceResult<Vec<AssignmentResponse>> {
        let course = CourseService::new(self.state).load(claims, course_id).await?;
        if !can_view_course(claims, &course) {
            return Err(ServiceError::not_found("Course not found"));
        }

        let assignments: Vec<Assignment> = self
            .assignments()
            .find(doc! { "course_id": course_id })
            .sort(doc! { "due_date": 1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query assignments")?
            .try_collect()
            .await
            .context("Failed to read assignments")?;

        Ok(assignments.into_iter().map(AssignmentResponse::from).collect())
    }

    pub async fn get(&self, claims: &JwtClaims, assignment_id: &ObjectId) -> ServiceResult<AssignmentResponse> {
        let (assignment, course) = self.load(claims, assignment_id).await?;
        if !can_view_course(claims, &course) {
            return Err(ServiceError::not_found("Assignment not found"));
        }
        Ok(AssignmentResponse::from(assignment))
    }

    /// A new file replaces the previous attachment
    pub async fn update(
        &self,
        claims: &JwtClaims,
        assignment_id: &ObjectId,
        req: UpdateAssignmentRequest,
        file: Option<IncomingFile>,
    ) -> ServiceResult<AssignmentResponse> {
        let (assignment, course) = self.load(claims, assignment_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_ASSIGNMENTS)?;

        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        if let Some(title) = req.title {
            set.insert("title", title.trim());
        }
        if let Some(description) = req.description {
            set.insert("description", description);
        }
        if let Some(due_date) = req.due_date {
            set.insert("due_date", chrono_to_bson(due_date));
        }
        if let Some(max_points) = req.max_points {
            set.insert("max_points", max_points);
        }
        let new_file = self.store(UploadCategory::Assignments, file).await?;
        if let Some(stored) = &new_file {
            set.insert(
                "attachment",
                to_bson(stored).context("Failed to encode attachment")?,
            );
        }

        let updated = self
            .assignments()
            .find_one_and_update(doc! { "_id": assignment_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to update assignment")?
            .ok_or_else(|| ServiceError::not_found("Assignment not found"))?;

        if let (Some(_), Some(old)) = (&new_file, &assignment.attachment) {
            self.storage.remove_quietly(old).await;
        }
        Ok(AssignmentResponse::from(updated))
    }

    /// Deletes the assignment, its submissions and every stored file
    pub async fn delete(&self, claims: &JwtClaims, assignment_id: &ObjectId) -> ServiceResult<()> {
        let (assignment, course) = self.load(claims, assignment_id).await?;
        ensure_course_staff(claims, &course, &MANAGE_ASSIGNMENTS)?;

        let submissions: Vec<Submission> = self
            .submissions()
            .find(doc! { "assignment_id": assignment_id })
            .await
            .context("Failed to query submissions")?
            .try_collect()
            .await
            .context("Failed to read submissions")?;

        self.submissions()
            .delete_many(doc! { "assignment_id": assignment_id })
            .await
            .context("Failed to delete submissions")?;
        self.assignments()
            .delete_one(doc! { "_id": assignment_id })
            .await
            .context("Failed to delete assignment")?;

        let files = assignment
            .attachment
            .iter()
            .chain(submissions.iter().filter_map(|s| s.attachment.as_ref()));
        for file in files {
            self.storage.remove_quietly(file).await;
        }

        tracing::info!(assignment_id = %assignment_id, submissions = submissions.len(), "Assignment deleted");
        Ok(())
    }

    /// Creates or replaces the caller's submission until it is graded
    pub async fn submit(
        &self,
        claims: &JwtClaims,
        assignment_id: &ObjectId,
        text: Option<String>,
        file: Option<IncomingFile>,
    ) -> ServiceResult<SubmissionResponse> {
        if !claims.is_student() {
            return Err(ServiceError::forbidden("Only students can submit"));
        }
        let student_id = claims.user_id()?;
        let (assignment, course) = self.load(claims, assignment_id).await?;
        if !course.is_enrolled(&student_id) {
            return Err(ServiceError::forbidden("You are not enrolled in this course"));
        }

        let text = text.filter(|t| !t.trim().is_empty());
        if text.is_none() && file.is_none() {
            return Err(ServiceError::validation("A submission needs text or a file"));
        }

        let previous = self
            .submissions()
            .find_one(doc! { "assignment_id": assignment_id, "student_id": student_id })
            .await
            .context("Failed to query submission")?;
        if previous.as_ref().is_some_and(Submission::is_graded) {
            return Err(ServiceError::conflict("Submission has already been graded"));
        }

        let attachment = self.store(UploadCategory::Submissions, file).await?;
        let now = Utc::now();
        let late = now > assignment.due_date;

        let mut set = doc! {
            "course_id": assignment.course_id,
            "submitted_at": chrono_to_bson(now),
            "late": late,
        };
        let mut unset = doc! {};
        match &text {
            Some(text) => {
                set.insert("text", text);
            }
            None => {
                unset.insert("text", "");
            }
        }
        match &attachment {
            Some(stored) => {
                set.insert("attachment", to_bson(stored).context("Failed to encode attachment")?);
            }
            None => {
                unset.insert("attachment", "");
            }
        }
        let mut update = doc! { "$set": set };
        if !unset.is_empty() {
            update.insert("$unset", unset);
        }

        // The grade guard turns a race with grading into a duplicate-key error
        let result = self
            .submissions()
            .find_one_and_update(
                doc! {
                    "assignment_id": assignment_id,
                    "student_id": student_id,
                    "grade": { "$exists": false },
                },
                update,
            )
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await;

        let saved = match result {
            Ok(Some(saved)) => saved,
            Ok(None) => {
                return Err(ServiceError::Internal(anyhow::anyhow!(
                    "Upserted submission was not returned"
                )))
            }
            Err(e) => {
                if let Some(stored) = &attachment {
                    self.storage.remove_quietly(stored).await;
                }
                if is_duplicate_key(&e) {
                    return Err(ServiceError::conflict("Submission has already been graded"));
                }
                return Err(anyhow::Error::new(e).context("Failed to save submission").into());
            }
        };

        if let Some(old) = previous.and_then(|p| p.attachment) {
            if saved.attachment.as_ref() != Some(&old) {
                self.storage.remove_quietly(&old).await;
            }
        }

        tracing::info!(
            assignment_id = %assignment_id,
            student_id = %student_id,
            late,
            "Submission saved"
        );
        Ok(SubmissionResponse::from(saved))
    }

    /// Staff see every submission, a student only their own
    pub async fn list_submissions(
        &self,
        claims: &JwtClaims,
        assignment_id: &ObjectId,
        page: Pagination,
    ) -> ServiceResult<Vec<SubmissionResponse>> {
        let (_, course) = self.load(claims, assignment_id).await?;

        let mut filter = doc! { "assignment_id": assignment_id };
        if claims.is_student() {
            let me = claims.user_id()?;
            if !course.is_enrolled(&me) {
                return Err(ServiceError::not_found("Assignment not found"));
            }
            filter.insert("student_id", me);
        } else {
            ensure_course_staff(claims, &course, &GRADE_SUBMISSIONS)?;
        }

        let submissions: Vec<Submission> = self
            .submissions()
            .find(filter)
            .sort(doc! { "submitted_at": -1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query submissions")?
            .try_collect()
            .await
            .context("Failed to read submissions")?;

        Ok(submissions.into_iter().map(SubmissionResponse::from).collect())
    }

    pub async fn grade(
        &self,
        claims: &JwtClaims,
        submission_id: &ObjectId,
        req: GradeSubmissionRequest,
    ) -> ServiceResult<SubmissionResponse> {
        let submission = self
            .submissions()
            .find_one(doc! { "_id": submission_id })
            .await
            .context("Failed to query submission")?
            .ok_or_else(|| ServiceError::not_found("Submission not found"))?;
        let (assignment, course) = self.load(claims, &submission.assignment_id).await?;
        ensure_course_staff(claims, &course, &GRADE_SUBMISSIONS)?;
        validate_grade(req.grade, assignment.max_points).map_err(ServiceError::Validation)?;

        let grader = claims.user_id()?;
        let mut set = doc! {
            "grade": req.grade,
            "graded_by": grader,
            "graded_at": chrono_to_bson(Utc::now()),
        };
        if let Some(feedback) = &req.feedback {
            set.insert("feedback", feedback);
        }

        let graded = self
            .submissions()
            .find_one_and_update(doc! { "_id": submission_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to grade submission")?
            .ok_or_else(|| ServiceError::not_found("Submission not found"))?;

        let notifier = NotificationService::new(self.state);
        let notice = notifier.notify_users(
            Some(course.school_id),
            Some(grader),
            format!("Graded: {}", assignment.title),
            format!(
                "Your submission for \"{}\" received {} / {} points",
                assignment.title, req.grade, assignment.max_points
            ),
            vec![submission.student_id],
        );
        // A failed notice must not undo the grade
        if let Err(e) = notice.await {
            tracing::warn!(submission_id = %submission_id, error = %e, "Failed to notify graded student");
        }

        tracing::info!(submission_id = %submission_id, grade = req.grade, "Submission graded");
        Ok(SubmissionResponse::from(graded))
    }
}
