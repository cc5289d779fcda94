use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};
use crate::models::user::UserRole;

pub const NOTIFICATIONS_COLLECTION: &str = "notifications";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    Scheduled,
    Sent,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Scheduled => "scheduled",
            NotificationStatus::Sent => "sent",
        }
    }
}

/// Who a notification is addressed to; resolved to user ids on creation
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Audience {
    Users { user_ids: Vec<String> },
    Role { role: UserRole },
    Section { section_id: String },
    Course { course_id: String },
    /// Everyone in the sender's school
    School,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<ObjectId>,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub recipients: Vec<ObjectId>,
    #[serde(default)]
    pub read_by: Vec<ObjectId>,
    pub status: NotificationStatus,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn is_read_by(&self, user_id: &ObjectId) -> bool {
        self.read_by.contains(user_id)
    }

    pub fn view_for(&self, user_id: &ObjectId) -> NotificationView {
        NotificationView {
            id: self.id.map(|id| id.to_hex()).unwrap_or_default(),
            title: self.title.clone(),
            message: self.message.clone(),
            sender_id: self.sender_id.map(|id| id.to_hex()),
            is_read: self.is_read_by(user_id),
            sent_at: self.sent_at,
            created_at: self.created_at,
        }
    }
}

/// A notification from one recipient's point of view
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NotificationView {
    pub id: String,
    pub title: String,
    pub message: String,
    pub sender_id: Option<String>,
    pub is_read: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// Sender's view with delivery stats
#[derive(Debug, Serialize)]
pub struct SentNotificationResponse {
    pub id: String,
    pub title: String,
    pub message: String,
    pub audience: Audience,
    pub status: NotificationStatus,
    pub recipient_count: usize,
    pub read_count: usize,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<Notification> for SentNotificationResponse {
    fn from(n: Notification) -> Self {
        SentNotificationResponse {
            id: n.id.map(|id| id.to_hex()).unwrap_or_default(),
            recipient_count: n.recipients.len(),
            read_count: n.read_by.len(),
            title: n.title,
            message: n.message,
            audience: n.audience,
            status: n.status,
            scheduled_at: n.scheduled_at,
            sent_at: n.sent_at,
            created_at: n.created_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateNotificationRequest {
    #[validate(length(
        min = 1,
        max = 200,
        message = "Title must be between 1 and 200 characters"
    ))]
    pub title: String,

    #[validate(length(
        min = 1,
        max = 5000,
        message = "Message must be between 1 and 5000 characters"
    ))]
    pub message: String,

    pub audience: Audience,

    pub scheduled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListNotificationsQuery {
    #[serde(default)]
    pub unread_only: bool,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Serialize)]
pub struct UnreadCountResponse {
    pub unread: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_audience_json_shapes() {
        let role: Audience = serde_json::from_str(r#"{"type":"role","role":"teacher"}"#).unwrap();
        assert_eq!(
            role,
            Audience::Role {
                role: UserRole::Teacher
            }
        );

        let school: Audience = serde_json::from_str(r#"{"type":"school"}"#).unwrap();
        assert_eq!(school, Audience::School);

        assert!(serde_json::from_str::<Audience>(r#"{"type":"planet"}"#).is_err());
    }

    #[test]
    fn test_view_reports_read_flag_per_user() {
        let reader = ObjectId::new();
        let other = ObjectId::new();
        let notification = Notification {
            id: Some(ObjectId::new()),
            school_id: None,
            sender_id: None,
            title: "Exam".into(),
            message: "Friday".into(),
            audience: Audience::Users {
                user_ids: vec![reader.to_hex(), other.to_hex()],
            },
            recipients: vec![reader, other],
            read_by: vec![reader],
            status: NotificationStatus::Sent,
            scheduled_at: None,
            sent_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        assert!(notification.view_for(&reader).is_read);
        assert!(!notification.view_for(&other).is_read);
        let sent = SentNotificationResponse::from(notification);
        assert_eq!((sent.recipient_count, sent.read_count), (2, 1));
    }
}
