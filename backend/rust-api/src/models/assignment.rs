use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

pub const ASSIGNMENTS_COLLECTION: &str = "assignments";
pub const SUBMISSIONS_COLLECTION: &str = "submissions";

/// File persisted by the upload storage, referenced from documents
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredFile {
    pub original_name: String,
    /// Path relative to the upload root, always with forward slashes
    pub stored_path: String,
    pub content_type: String,
    pub size: u64,
}

impl StoredFile {
    /// Public URL under the static /uploads mount
    pub fn url(&self) -> String {
        format!("/uploads/{}", self.stored_path)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct FileResponse {
    pub name: String,
    pub url: String,
    pub content_type: String,
    pub size: u64,
}

impl From<StoredFile> for FileResponse {
    fn from(file: StoredFile) -> Self {
        FileResponse {
            url: file.url(),
            name: file.original_name,
            content_type: file.content_type,
            size: file.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assignment {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub course_id: ObjectId,
    pub school_id: ObjectId,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub due_date: DateTime<Utc>,
    pub max_points: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<StoredFile>,
    pub created_by: ObjectId,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct AssignmentResponse {
    pub id: String,
    pub course_id: String,
    pub title: String,
    pub description: Option<String>,
    pub due_date: DateTime<Utc>,
    pub max_points: f64,
    pub attachment: Option<FileResponse>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Assignment> for AssignmentResponse {
    fn from(assignment: Assignment) -> Self {
        AssignmentResponse {
            id: assignment.id.map(|id| id.to_hex()).unwrap_or_default(),
            course_id: assignment.course_id.to_hex(),
            title: assignment.title,
            description: assignment.description,
            due_date: assignment.due_date,
            max_points: assignment.max_points,
            attachment: assignment.attachment.map(FileResponse::from),
            created_by: assignment.created_by.to_hex(),
            created_at: assignment.created_at,
            updated_at: assignment.updated_at,
        }
    }
}

/// Text fields of the multipart form that creates an assignment
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateAssignmentRequest {
    pub course_id: String,

    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    pub description: Option<String>,

    pub due_date: DateTime<Utc>,

    #[validate(range(min = 0.0, max = 10000.0, message = "max_points must be 0..=10000"))]
    pub max_points: f64,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateAssignmentRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: Option<String>,

    #[validate(length(max = 10000, message = "Description must be at most 10000 characters"))]
    pub description: Option<String>,

    pub due_date: Option<DateTime<Utc>>,

    #[validate(range(min = 0.0, max = 10000.0, message = "max_points must be 0..=10000"))]
    pub max_points: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Submission {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub assignment_id: ObjectId,
    pub course_id: ObjectId,
    pub student_id: ObjectId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attachment: Option<StoredFile>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub submitted_at: DateTime<Utc>,
    pub late: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub grade: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feedback: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graded_by: Option<ObjectId>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub graded_at: Option<DateTime<Utc>>,
}

impl Submission {
    pub fn is_graded(&self) -> bool {
        self.grade.is_some()
    }
}

#[derive(Debug, Serialize)]
pub struct SubmissionResponse {
    pub id: String,
    pub assignment_id: String,
    pub course_id: String,
    pub student_id: String,
    pub text: Option<String>,
    pub attachment: Option<FileResponse>,
    pub submitted_at: DateTime<Utc>,
    pub late: bool,
    pub grade: Option<f64>,
    pub feedback: Option<String>,
    pub graded_by: Option<String>,
    pub graded_at: Option<DateTime<Utc>>,
}

impl From<Submission> for SubmissionResponse {
    fn from(submission: Submission) -> Self {
        SubmissionResponse {
            id: submission.id.map(|id| id.to_hex()).unwrap_or_default(),
            assignment_id: submission.assignment_id.to_hex(),
            course_id: submission.course_id.to_hex(),
            student_id: submission.student_id.to_hex(),
            text: submission.text,
            attachment: submission.attachment.map(FileResponse::from),
            submitted_at: submission.submitted_at,
            late: submission.late,
            grade: submission.grade,
            feedback: submission.feedback,
            graded_by: submission.graded_by.map(|id| id.to_hex()),
            graded_at: submission.graded_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct GradeSubmissionRequest {
    #[validate(range(min = 0.0, message = "Grade cannot be negative"))]
    pub grade: f64,

    #[validate(length(max = 5000, message = "Feedback must be at most 5000 characters"))]
    pub feedback: Option<String>,
}

/// A grade must sit inside the assignment's point range
pub fn validate_grade(grade: f64, max_points: f64) -> Result<(), String> {
    if !grade.is_finite() || grade < 0.0 {
        return Err("Grade must be a non-negative number".to_string());
    }
    if grade > max_points {
        return Err(format!("Grade cannot exceed {} points", max_points));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grade_bounds() {
        assert!(validate_grade(0.0, 10.0).is_ok());
        assert!(validate_grade(10.0, 10.0).is_ok());
        assert!(validate_grade(10.5, 10.0).is_err());
        assert!(validate_grade(-1.0, 10.0).is_err());
        assert!(validate_grade(f64::NAN, 10.0).is_err());
    }

    #[test]
    fn test_stored_file_url() {
        let file = StoredFile {
            original_name: "essay.pdf".to_string(),
            stored_path: "submissions/abc-essay.pdf".to_string(),
            content_type: "application/pdf".to_string(),
            size: 1024,
        };
        let response = FileResponse::from(file);
        assert_eq!(response.url, "/uploads/submissions/abc-essay.pdf");
        assert_eq!(response.name, "essay.pdf");
    }
}
