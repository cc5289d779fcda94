use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::{bson_datetime_as_chrono, hex_ids};

pub const SECTIONS_COLLECTION: &str = "sections";

/// A roster of students with a fixed capacity and a session window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Section {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub school_id: ObjectId,
    pub name: String,
    pub capacity: u32,
    #[serde(default)]
    pub students: Vec<ObjectId>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub session_start: DateTime<Utc>,
    #[serde(with = "bson_datetime_as_chrono")]
    pub session_end: DateTime<Utc>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl Section {
    pub fn seats_left(&self) -> u32 {
        self.capacity.saturating_sub(self.students.len() as u32)
    }

    pub fn is_full(&self) -> bool {
        self.seats_left() == 0
    }

    pub fn has_student(&self, student_id: &ObjectId) -> bool {
        self.students.contains(student_id)
    }

    pub fn session_expired(&self, now: DateTime<Utc>) -> bool {
        self.session_end < now
    }
}

/// Session windows must close after they open
pub fn validate_session_window(
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<(), ValidationError> {
    if end <= start {
        let mut err = ValidationError::new("session_window");
        err.message = Some("session_end must be after session_start".into());
        return Err(err);
    }
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct SectionResponse {
    pub id: String,
    pub school_id: String,
    pub name: String,
    pub capacity: u32,
    pub seats_left: u32,
    pub students: Vec<String>,
    pub session_start: DateTime<Utc>,
    pub session_end: DateTime<Utc>,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

impl From<Section> for SectionResponse {
    fn from(section: Section) -> Self {
        SectionResponse {
            id: section.id.map(|id| id.to_hex()).unwrap_or_default(),
            school_id: section.school_id.to_hex(),
            seats_left: section.seats_left(),
            students: hex_ids(&section.students),
            name: section.name,
            capacity: section.capacity,
            session_start: section.session_start,
            session_end: section.session_end,
            is_active: section.is_active,
            created_at: section.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateSectionRequest {
    /// Required for platform admins; defaults to the caller's school otherwise
    pub school_id: Option<String>,

    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,

    #[validate(range(min = 1, max = 1000, message = "Capacity must be between 1 and 1000"))]
    pub capacity: u32,

    pub session_start: DateTime<Utc>,

    pub session_end: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateSectionRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: Option<String>,

    #[validate(range(min = 1, max = 1000, message = "Capacity must be between 1 and 1000"))]
    pub capacity: Option<u32>,

    pub session_start: Option<DateTime<Utc>>,

    pub session_end: Option<DateTime<Utc>>,

    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AddStudentRequest {
    pub student_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSectionsQuery {
    pub school_id: Option<String>,
    pub is_active: Option<bool>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn section(capacity: u32, students: usize) -> Section {
        let now = Utc::now();
        Section {
            id: Some(ObjectId::new()),
            school_id: ObjectId::new(),
            name: "Grade 7 - A".to_string(),
            capacity,
            students: (0..students).map(|_| ObjectId::new()).collect(),
            session_start: now - Duration::days(30),
            session_end: now + Duration::days(30),
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_seats_left_never_underflows() {
        assert_eq!(section(30, 12).seats_left(), 18);
        assert!(section(2, 2).is_full());
        // roster may exceed capacity after a manual edit; still reports full
        assert_eq!(section(2, 5).seats_left(), 0);
    }

    #[test]
    fn test_session_window_validation() {
        let now = Utc::now();
        assert!(validate_session_window(now, now + Duration::days(1)).is_ok());
        assert!(validate_session_window(now, now).is_err());
        assert!(validate_session_window(now, now - Duration::hours(1)).is_err());
    }

    #[test]
    fn test_session_expiry() {
        let s = section(10, 0);
        assert!(!s.session_expired(Utc::now()));
        assert!(s.session_expired(Utc::now() + Duration::days(31)));
    }
}
