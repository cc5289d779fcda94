use chrono::{DateTime, Utc};
use mongodb::bson::{oid::ObjectId, Document};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

use super::{bson_datetime_as_chrono, bson_datetime_as_chrono_option};

pub const USERS_COLLECTION: &str = "users";

/// User model stored in MongoDB "users" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub email: String,
    pub password_hash: String,
    pub name: String,
    pub role: UserRole,
    #[serde(default)]
    pub permissions: Vec<Permission>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub school_id: Option<ObjectId>,
    /// Students only: the section whose roster lists this user
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section_id: Option<ObjectId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default = "default_active")]
    pub is_active: bool,
    /// Monthly fee (students) or salary (teachers, faculty)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub monthly_amount: Option<f64>,
    #[serde(default)]
    pub payment_history: Vec<PaymentEntry>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
    #[serde(
        rename = "lastLoginAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub last_login_at: Option<DateTime<Utc>>,
    /// Optional metadata (used by superuser seed)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Document>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    Admin,
    Faculty,
    Teacher,
    #[default]
    Student,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::Admin => "admin",
            UserRole::Faculty => "faculty",
            UserRole::Teacher => "teacher",
            UserRole::Student => "student",
        }
    }

    /// Roles that draw a salary rather than pay a fee
    pub fn is_salaried(&self) -> bool {
        matches!(self, UserRole::Faculty | UserRole::Teacher)
    }

    pub fn can_teach(&self) -> bool {
        matches!(self, UserRole::Faculty | UserRole::Teacher)
    }
}

impl FromStr for UserRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "admin" => Ok(UserRole::Admin),
            "faculty" => Ok(UserRole::Faculty),
            "teacher" => Ok(UserRole::Teacher),
            "student" => Ok(UserRole::Student),
            other => Err(format!("Unknown role: {}", other)),
        }
    }
}

/// Fine-grained capabilities granted on top of the role
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    ManageUsers,
    ManageSchools,
    ManageSections,
    ManageCourses,
    ManageAssignments,
    GradeSubmissions,
    ManageQuizzes,
    MarkAttendance,
    ManageTimetable,
    SendNotifications,
    ManagePayments,
    ManageSettings,
}

impl Permission {
    pub const ALL: [Permission; 12] = [
        Permission::ManageUsers,
        Permission::ManageSchools,
        Permission::ManageSections,
        Permission::ManageCourses,
        Permission::ManageAssignments,
        Permission::GradeSubmissions,
        Permission::ManageQuizzes,
        Permission::MarkAttendance,
        Permission::ManageTimetable,
        Permission::SendNotifications,
        Permission::ManagePayments,
        Permission::ManageSettings,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Permission::ManageUsers => "manage_users",
            Permission::ManageSchools => "manage_schools",
            Permission::ManageSections => "manage_sections",
            Permission::ManageCourses => "manage_courses",
            Permission::ManageAssignments => "manage_assignments",
            Permission::GradeSubmissions => "grade_submissions",
            Permission::ManageQuizzes => "manage_quizzes",
            Permission::MarkAttendance => "mark_attendance",
            Permission::ManageTimetable => "manage_timetable",
            Permission::SendNotifications => "send_notifications",
            Permission::ManagePayments => "manage_payments",
            Permission::ManageSettings => "manage_settings",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentKind {
    Fee,
    Salary,
}

impl PaymentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentKind::Fee => "fee",
            PaymentKind::Salary => "salary",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
        }
    }
}

/// One billing period in a fee or salary history
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentEntry {
    /// Billing period, "YYYY-MM"
    pub period: String,
    pub kind: PaymentKind,
    pub amount: f64,
    pub status: PaymentStatus,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(
        rename = "paidAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub paid_at: Option<DateTime<Utc>>,
}

/// User profile returned to client (without sensitive data)
#[derive(Debug, Serialize)]
pub struct UserProfile {
    pub id: String,
    pub email: String,
    pub name: String,
    pub role: UserRole,
    pub permissions: Vec<Permission>,
    pub school_id: Option<String>,
    pub section_id: Option<String>,
    pub phone: Option<String>,
    pub is_active: bool,
    pub monthly_amount: Option<f64>,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl From<User> for UserProfile {
    fn from(user: User) -> Self {
        UserProfile {
            id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            email: user.email,
            name: user.name,
            role: user.role,
            permissions: user.permissions,
            school_id: user.school_id.map(|id| id.to_hex()),
            section_id: user.section_id.map(|id| id.to_hex()),
            phone: user.phone,
            is_active: user.is_active,
            monthly_amount: user.monthly_amount,
            created_at: user.created_at,
            last_login_at: user.last_login_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentEntryResponse {
    pub period: String,
    pub kind: PaymentKind,
    pub amount: f64,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl From<&PaymentEntry> for PaymentEntryResponse {
    fn from(entry: &PaymentEntry) -> Self {
        Self {
            period: entry.period.clone(),
            kind: entry.kind,
            amount: entry.amount,
            status: entry.status,
            created_at: entry.created_at,
            paid_at: entry.paid_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PaymentHistoryResponse {
    pub user_id: String,
    pub monthly_amount: Option<f64>,
    pub outstanding: f64,
    pub entries: Vec<PaymentEntryResponse>,
}

impl PaymentHistoryResponse {
    pub fn from_user(user: &User) -> Self {
        let outstanding = user
            .payment_history
            .iter()
            .filter(|entry| entry.status == PaymentStatus::Pending)
            .map(|entry| entry.amount)
            .sum();
        Self {
            user_id: user.id.map(|id| id.to_hex()).unwrap_or_default(),
            monthly_amount: user.monthly_amount,
            outstanding,
            entries: user.payment_history.iter().map(PaymentEntryResponse::from).collect(),
        }
    }
}

/// Self-registration; always creates a student
#[derive(Debug, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,

    pub school_id: Option<String>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 1, message = "Password is required"))]
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub user: UserProfile,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub old_password: String,

    #[validate(length(min = 8, message = "New password must be at least 8 characters"))]
    pub new_password: String,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateUserRequest {
    #[validate(email(message = "Invalid email format"))]
    pub email: String,

    #[validate(length(min = 8, message = "Password must be at least 8 characters"))]
    pub password: String,

    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: String,

    pub role: UserRole,

    pub permissions: Option<Vec<Permission>>,

    pub school_id: Option<String>,

    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<String>,

    #[validate(range(min = 0.0, message = "Monthly amount cannot be negative"))]
    pub monthly_amount: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateUserRequest {
    #[validate(length(
        min = 1,
        max = 100,
        message = "Name must be between 1 and 100 characters"
    ))]
    pub name: Option<String>,
    pub role: Option<UserRole>,
    pub permissions: Option<Vec<Permission>>,
    pub school_id: Option<String>,
    #[validate(length(max = 32, message = "Phone must be at most 32 characters"))]
    pub phone: Option<String>,
    pub is_active: Option<bool>,
    #[validate(range(min = 0.0, message = "Monthly amount cannot be negative"))]
    pub monthly_amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
pub struct ListUsersQuery {
    pub role: Option<UserRole>,
    pub school_id: Option<String>,
    pub section_id: Option<String>,
    pub is_active: Option<bool>,
    /// Case-insensitive match on email or name
    pub search: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Deserialize)]
pub struct UpdatePaymentRequest {
    pub kind: PaymentKind,
    pub status: PaymentStatus,
}
