use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{bson_datetime_as_chrono, hex_ids};

pub const COURSES_COLLECTION: &str = "courses";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Course {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub school_id: ObjectId,
    pub title: String,
    pub code: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<ObjectId>,
    #[serde(default)]
    pub teachers: Vec<ObjectId>,
    #[serde(default)]
    pub students: Vec<ObjectId>,
    pub created_by: ObjectId,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl Course {
    pub fn is_taught_by(&self, user_id: &ObjectId) -> bool {
        self.teachers.contains(user_id)
    }

    pub fn is_enrolled(&self, user_id: &ObjectId) -> bool {
        self.students.contains(user_id)
    }
}

#[derive(Debug, Serialize)]
pub struct CourseResponse {
    pub id: String,
    pub school_id: String,
    pub title: String,
    pub code: String,
    pub description: Option<String>,
    pub section_id: Option<String>,
    pub teachers: Vec<String>,
    pub students: Vec<String>,
    pub student_count: usize,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Course> for CourseResponse {
    fn from(course: Course) -> Self {
        CourseResponse {
            id: course.id.map(|id| id.to_hex()).unwrap_or_default(),
            school_id: course.school_id.to_hex(),
            student_count: course.students.len(),
            teachers: hex_ids(&course.teachers),
            students: hex_ids(&course.students),
            section_id: course.section_id.map(|id| id.to_hex()),
            title: course.title,
            code: course.code,
            description: course.description,
            created_by: course.created_by.to_hex(),
            created_at: course.created_at,
            updated_at: course.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateCourseRequest {
    pub school_id: Option<String>,

    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    #[validate(length(
        min = 1,
        max = 32,
        message = "Code must be between 1 and 32 characters"
    ))]
    pub code: String,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    pub section_id: Option<String>,

    #[serde(default)]
    pub teacher_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateCourseRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: Option<String>,

    #[validate(length(
        min = 1,
        max = 32,
        message = "Code must be between 1 and 32 characters"
    ))]
    pub code: Option<String>,

    #[validate(length(max = 5000, message = "Description must be at most 5000 characters"))]
    pub description: Option<String>,

    pub section_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct EnrollStudentsRequest {
    #[validate(length(min = 1, max = 500, message = "Provide between 1 and 500 students"))]
    pub student_ids: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollSectionRequest {
    pub section_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AssignTeacherRequest {
    pub teacher_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListCoursesQuery {
    pub school_id: Option<String>,
    pub section_id: Option<String>,
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}
