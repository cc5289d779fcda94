use crate::error::{ServiceError, ServiceResult};
use crate::middlewares::auth::{AccessRule, JwtClaims, MANAGE_COURSES};
use crate::models::assignment::{Assignment, Submission, ASSIGNMENTS_COLLECTION, SUBMISSIONS_COLLECTION};
use crate::models::attendance::ATTENDANCE_COLLECTION;
use crate::models::course::{
    CourseResponse, Course, CreateCourseRequest, ListCoursesQuery, UpdateCourseRequest,
    COURSES_COLLECTION,
};
use crate::models::quiz::{QUIZZES_COLLECTION, QUIZ_SUBMISSIONS_COLLECTION};
use crate::models::section::{Section, SECTIONS_COLLECTION};
use crate::models::timetable::TIMETABLE_COLLECTION;
use crate::models::user::UserRole;
use crate::models::{parse_object_id, parse_object_ids, Pagination};
use crate::services::upload_storage::UploadStorage;
use crate::services::user_service::UserService;
use crate::services::{is_duplicate_key, AppState};
use crate::utils::time::chrono_to_bson;
use anyhow::Context;
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document, Regex};
use mongodb::options::ReturnDocument;
use mongodb::Database;

pub struct CourseService {
    mongo: Database,
    storage: UploadStorage,
}

/// Staff passing `rule` may act on a course; a plain teacher only on the
/// courses they are listed on.
pub fn ensure_course_staff(
    claims: &JwtClaims,
    course: &Course,
    rule: &AccessRule,
) -> ServiceResult<()> {
    claims.ensure(rule)?;
    let by_permission = rule
        .permission
        .map(|p| claims.has_permission(p))
        .unwrap_or(false);
    if claims.role == UserRole::Teacher && !by_permission {
        let me = claims.user_id()?;
        if !course.is_taught_by(&me) {
            return Err(ServiceError::forbidden("You do not teach this course"));
        }
    }
    Ok(())
}

/// Whether the caller may read a course at all
pub fn can_view_course(claims: &JwtClaims, course: &Course) -> bool {
    let Ok(me) = claims.user_id() else {
        return false;
    };
    match claims.role {
        UserRole::Admin | UserRole::Faculty => true,
        UserRole::Teacher => course.is_taught_by(&me),
        UserRole::Student => course.is_enrolled(&me),
    }
}

impl CourseService {
    pub fn new(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            storage: state.storage.clone(),
        }
    }

    fn courses(&self) -> mongodb::Collection<Course> {
        self.mongo.collection::<Course>(COURSES_COLLECTION)
    }

    /// Loads a course inside the caller's tenant, without role filtering
    pub async fn load(&self, claims: &JwtClaims, course_id: &ObjectId) -> ServiceResult<Course> {
        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query course")?
            .ok_or_else(|| ServiceError::not_found("Course not found"))?;
        claims
            .ensure_same_school(Some(course.school_id))
            .map_err(|_| ServiceError::not_found("Course not found"))?;
        Ok(course)
    }

    pub async fn get(&self, claims: &JwtClaims, course_id: &ObjectId) -> ServiceResult<CourseResponse> {
        let course = self.load(claims, course_id).await?;
        if !can_view_course(claims, &course) {
            return Err(ServiceError::not_found("Course not found"));
        }
        Ok(CourseResponse::from(course))
    }

    async fn section_in_school(&self, section_id: &ObjectId, school_id: &ObjectId) -> ServiceResult<Section> {
        self.mongo
            .collection::<Section>(SECTIONS_COLLECTION)
            .find_one(doc! { "_id": section_id, "school_id": school_id })
            .await
            .context("Failed to query section")?
            .ok_or_else(|| ServiceError::validation("Section not found in this school"))
    }

    async fn teachers_in_school(
        &self,
        ids: &[ObjectId],
        school_id: &ObjectId,
    ) -> ServiceResult<Vec<ObjectId>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let found = UserService::new(self.mongo.clone())
            .find_many_with_roles(ids, &[UserRole::Teacher, UserRole::Faculty])
            .await?;
        let valid: Vec<ObjectId> = found
            .iter()
            .filter(|u| u.school_id.as_ref() == Some(school_id))
            .filter_map(|u| u.id)
            .collect();
        if valid.len() != ids.len() {
            return Err(ServiceError::validation(
                "Every teacher must be a teacher or faculty member of the course's school",
            ));
        }
        Ok(valid)
    }

    pub async fn create(
        &self,
        claims: &JwtClaims,
        req: CreateCourseRequest,
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        let requested = req
            .school_id
            .as_deref()
            .map(|id| parse_object_id(id, "school_id"))
            .transpose()?;
        let school_id = claims.school_for_create(requested)?;

        let section_id = match req.section_id.as_deref() {
            Some(raw) => {
                let id = parse_object_id(raw, "section_id")?;
                self.section_in_school(&id, &school_id).await?;
                Some(id)
            }
            None => None,
        };

        let mut teacher_ids = parse_object_ids(&req.teacher_ids, "teacher_id")?;
        teacher_ids.sort();
        teacher_ids.dedup();
        let teachers = self.teachers_in_school(&teacher_ids, &school_id).await?;

        let now = Utc::now();
        let mut course = Course {
            id: None,
            school_id,
            title: req.title.trim().to_string(),
            code: req.code.trim().to_uppercase(),
            description: req.description,
            section_id,
            teachers,
            students: Vec::new(),
            created_by: claims.user_id()?,
            created_at: now,
            updated_at: now,
        };

        let inserted = self.courses().insert_one(&course).await.map_err(|e| {
            if is_duplicate_key(&e) {
                ServiceError::conflict(format!("Course code {} already exists", course.code))
            } else {
                ServiceError::Internal(anyhow::Error::new(e).context("Failed to insert course"))
            }
        })?;
        course.id = inserted.inserted_id.as_object_id();

        tracing::info!(course_id = ?course.id, code = %course.code, "Course created");
        Ok(CourseResponse::from(course))
    }

    /// Teachers get taught courses, students enrolled ones, staff the tenant
    pub async fn list(
        &self,
        claims: &JwtClaims,
        query: ListCoursesQuery,
    ) -> ServiceResult<Vec<CourseResponse>> {
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
        match claims.role {
            UserRole::Teacher => {
                filter.insert("teachers", claims.user_id()?);
            }
            UserRole::Student => {
                filter.insert("students", claims.user_id()?);
            }
            UserRole::Admin | UserRole::Faculty => {}
        }
        if let Some(section) = query.section_id.as_deref() {
            filter.insert("section_id", parse_object_id(section, "section_id")?);
        }
        if let Some(search) = query.search.as_deref().filter(|s| !s.trim().is_empty()) {
            let pattern = Regex {
                pattern: regex::escape(search.trim()),
                options: "i".to_string(),
            };
            filter.insert(
                "$or",
                vec![
                    doc! { "title": pattern.clone() },
                    doc! { "code": pattern },
                ],
            );
        }

        let page = Pagination {
            limit: query.limit,
            offset: query.offset,
        };
        let courses: Vec<Course> = self
            .courses()
            .find(filter)
            .sort(doc! { "code": 1 })
            .skip(page.offset())
            .limit(page.limit())
            .await
            .context("Failed to query courses")?
            .try_collect()
            .await
            .context("Failed to read courses")?;

        Ok(courses.into_iter().map(CourseResponse::from).collect())
    }

    pub async fn update(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        req: UpdateCourseRequest,
    ) -> ServiceResult<CourseResponse> {
        let course = self.load(claims, course_id).await?;

        let description_only =
            req.title.is_none() && req.code.is_none() && req.section_id.is_none();
        let me = claims.user_id()?;
        if !claims.allows(&MANAGE_COURSES) && !(description_only && course.is_taught_by(&me)) {
            return Err(ServiceError::forbidden("Insufficient permissions"));
        }

        let mut set = doc! { "updatedAt": chrono_to_bson(Utc::now()) };
        if let Some(title) = req.title {
            set.insert("title", title.trim());
        }
        if let Some(code) = req.code {
            set.insert("code", code.trim().to_uppercase());
        }
        if let Some(description) = req.description {
            set.insert("description", description);
        }
        if let Some(raw) = req.section_id.as_deref() {
            let section_id = parse_object_id(raw, "section_id")?;
            self.section_in_school(&section_id, &course.school_id).await?;
            set.insert("section_id", section_id);
        }

        let updated = self
            .courses()
            .find_one_and_update(doc! { "_id": course_id }, doc! { "$set": set })
            .return_document(ReturnDocument::After)
            .await
            .map_err(|e| {
                if is_duplicate_key(&e) {
                    ServiceError::conflict("Course code already exists")
                } else {
                    ServiceError::Internal(anyhow::Error::new(e).context("Failed to update course"))
                }
            })?
            .ok_or_else(|| ServiceError::not_found("Course not found"))?;

        Ok(CourseResponse::from(updated))
    }

    /// Removes the course and everything hanging off it
    pub async fn delete(&self, claims: &JwtClaims, course_id: &ObjectId) -> ServiceResult<()> {
        claims.ensure(&MANAGE_COURSES)?;
        self.load(claims, course_id).await?;

        let assignments: Vec<Assignment> = self
            .mongo
            .collection::<Assignment>(ASSIGNMENTS_COLLECTION)
            .find(doc! { "course_id": course_id })
            .await
            .context("Failed to query course assignments")?
            .try_collect()
            .await
            .context("Failed to read course assignments")?;
        let submissions: Vec<Submission> = self
            .mongo
            .collection::<Submission>(SUBMISSIONS_COLLECTION)
            .find(doc! { "course_id": course_id, "attachment": { "$exists": true } })
            .await
            .context("Failed to query course submissions")?
            .try_collect()
            .await
            .context("Failed to read course submissions")?;

        let files = assignments
            .iter()
            .filter_map(|a| a.attachment.as_ref())
            .chain(submissions.iter().filter_map(|s| s.attachment.as_ref()));
        for file in files {
            self.storage.remove_quietly(file).await;
        }

        let by_course = doc! { "course_id": course_id };
        for collection in [
            ASSIGNMENTS_COLLECTION,
            SUBMISSIONS_COLLECTION,
            QUIZZES_COLLECTION,
            QUIZ_SUBMISSIONS_COLLECTION,
            TIMETABLE_COLLECTION,
            ATTENDANCE_COLLECTION,
        ] {
            self.mongo
                .collection::<Document>(collection)
                .delete_many(by_course.clone())
                .await
                .with_context(|| format!("Failed to cascade course delete into {}", collection))?;
        }

        self.courses()
            .delete_one(doc! { "_id": course_id })
            .await
            .context("Failed to delete course")?;

        tracing::info!(course_id = %course_id, assignments = assignments.len(), "Course deleted");
        Ok(())
    }

    pub async fn enroll_students(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        student_ids: &[String],
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        let course = self.load(claims, course_id).await?;

        let mut ids = parse_object_ids(student_ids, "student_id")?;
        ids.sort();
        ids.dedup();
        let students = UserService::new(self.mongo.clone())
            .find_many_with_roles(&ids, &[UserRole::Student])
            .await?;
        if students.len() != ids.len()
            || students.iter().any(|s| s.school_id != Some(course.school_id))
        {
            return Err(ServiceError::validation(
                "Every id must be a student of the course's school",
            ));
        }

        self.add_students(course_id, ids).await
    }

    /// Enrols the current roster of a section
    pub async fn enroll_section(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        section_id: &ObjectId,
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        let course = self.load(claims, course_id).await?;
        let section = self.section_in_school(section_id, &course.school_id).await?;
        if section.students.is_empty() {
            return Err(ServiceError::validation("Section has no students"));
        }
        self.add_students(course_id, section.students).await
    }

    async fn add_students(
        &self,
        course_id: &ObjectId,
        ids: Vec<ObjectId>,
    ) -> ServiceResult<CourseResponse> {
        let count = ids.len();
        let updated = self
            .courses()
            .find_one_and_update(
                doc! { "_id": course_id },
                doc! {
                    "$addToSet": { "students": { "$each": ids } },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to enroll students")?
            .ok_or_else(|| ServiceError::not_found("Course not found"))?;

        tracing::info!(course_id = %course_id, count, "Students enrolled");
        Ok(CourseResponse::from(updated))
    }

    pub async fn unenroll_student(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        student_id: &ObjectId,
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        self.load(claims, course_id).await?;
        self.courses()
            .find_one_and_update(
                doc! { "_id": course_id, "students": student_id },
                doc! {
                    "$pull": { "students": student_id },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to unenroll student")?
            .map(CourseResponse::from)
            .ok_or_else(|| ServiceError::not_found("Student is not enrolled in this course"))
    }

    pub async fn assign_teacher(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        teacher_id: &ObjectId,
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        let course = self.load(claims, course_id).await?;

        let teacher = UserService::new(self.mongo.clone()).find(teacher_id).await?;
        if !teacher.role.can_teach() {
            return Err(ServiceError::validation(
                "Only teachers or faculty can be assigned to a course",
            ));
        }
        if teacher.school_id != Some(course.school_id) {
            return Err(ServiceError::validation("Teacher belongs to a different school"));
        }

        let updated = self
            .courses()
            .find_one_and_update(
                doc! { "_id": course_id },
                doc! {
                    "$addToSet": { "teachers": teacher_id },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to assign teacher")?
            .ok_or_else(|| ServiceError::not_found("Course not found"))?;

        Ok(CourseResponse::from(updated))
    }

    pub async fn remove_teacher(
        &self,
        claims: &JwtClaims,
        course_id: &ObjectId,
        teacher_id: &ObjectId,
    ) -> ServiceResult<CourseResponse> {
        claims.ensure(&MANAGE_COURSES)?;
        self.load(claims, course_id).await?;
        self.courses()
            .find_one_and_update(
                doc! { "_id": course_id, "teachers": teacher_id },
                doc! {
                    "$pull": { "teachers": teacher_id },
                    "$set": { "updatedAt": chrono_to_bson(Utc::now()) },
                },
            )
            .return_document(ReturnDocument::After)
            .await
            .context("Failed to remove teacher")?
            .map(CourseResponse::from)
            .ok_or_else(|| ServiceError::not_found("Teacher is not assigned to this course"))
    }

    /// Ids of students enrolled in a course
    pub async fn students_of(&self, course_id: &ObjectId) -> ServiceResult<Vec<ObjectId>> {
        let course = self
            .courses()
            .find_one(doc! { "_id": course_id })
            .await
            .context("Failed to query course")?
            .ok_or_else(|| ServiceError::not_found("Course not found"))?;
        Ok(course.students)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middlewares::auth::{GRADE_SUBMISSIONS, MANAGE_ASSIGNMENTS};
    use crate::models::user::Permission;

    fn claims(role: UserRole, permissions: Vec<Permission>) -> (JwtClaims, ObjectId) {
        let id = ObjectId::new();
        (
            JwtClaims {
                sub: id.to_hex(),
                role,
                permissions,
                school_id: None,
                exp: 0,
                iat: 0,
            },
            id,
        )
    }

    fn course(teachers: Vec<ObjectId>, students: Vec<ObjectId>) -> Course {
        let now = Utc::now();
        Course {
            id: Some(ObjectId::new()),
            school_id: ObjectId::new(),
            title: "Algebra".to_string(),
            code: "MATH-7".to_string(),
            description: None,
            section_id: None,
            teachers,
            students,
            created_by: ObjectId::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_teacher_limited_to_own_courses() {
        let (teacher, teacher_id) = claims(UserRole::Teacher, vec![]);
        assert!(ensure_course_staff(&teacher, &course(vec![teacher_id], vec![]), &MANAGE_ASSIGNMENTS).is_ok());
        assert!(matches!(
            ensure_course_staff(&teacher, &course(vec![], vec![]), &MANAGE_ASSIGNMENTS),
            Err(ServiceError::Forbidden(_))
        ));
    }

    #[test]
    fn test_permission_holder_bypasses_course_membership() {
        let (teacher, _) = claims(UserRole::Teacher, vec![Permission::GradeSubmissions]);
        assert!(ensure_course_staff(&teacher, &course(vec![], vec![]), &GRADE_SUBMISSIONS).is_ok());
    }

    #[test]
    fn test_students_never_pass_staff_check() {
        let (student, student_id) = claims(UserRole::Student, vec![]);
        let enrolled = course(vec![], vec![student_id]);
        assert!(ensure_course_staff(&student, &enrolled, &MANAGE_ASSIGNMENTS).is_err());
        assert!(can_view_course(&student, &enrolled));
        assert!(!can_view_course(&student, &course(vec![], vec![])));
    }

    #[test]
    fn test_faculty_sees_every_course() {
        let (faculty, _) = claims(UserRole::Faculty, vec![]);
        assert!(can_view_course(&faculty, &course(vec![], vec![])));
        assert!(ensure_course_staff(&faculty, &course(vec![], vec![]), &MANAGE_ASSIGNMENTS).is_ok());
    }
}
