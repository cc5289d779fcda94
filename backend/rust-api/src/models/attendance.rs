use chrono::{DateTime, NaiveDate, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use validator::Validate;

use super::bson_datetime_as_chrono;

pub const ATTENDANCE_COLLECTION: &str = "attendance";

/// Date format used for attendance keys
pub const DATE_FORMAT: &str = "%Y-%m-%d";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    /// Late still counts as attended
    pub fn counts_as_attended(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttendanceRecord {
    pub student_id: ObjectId,
    pub status: AttendanceStatus,
}

/// One day's attendance for a section, optionally scoped to a course
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceSheet {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub school_id: ObjectId,
    pub section_id: ObjectId,
    #[serde(default)]
    pub course_id: Option<ObjectId>,
    /// "YYYY-MM-DD"; sorts lexicographically
    pub date: String,
    pub records: Vec<AttendanceRecord>,
    pub marked_by: ObjectId,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

pub fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| format!("Invalid date '{}': expected YYYY-MM-DD", value))
}

#[derive(Debug, Serialize)]
pub struct AttendanceRecordResponse {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Serialize)]
pub struct AttendanceSheetResponse {
    pub id: String,
    pub section_id: String,
    pub course_id: Option<String>,
    pub date: String,
    pub records: Vec<AttendanceRecordResponse>,
    pub marked_by: String,
    pub updated_at: DateTime<Utc>,
}

impl From<AttendanceSheet> for AttendanceSheetResponse {
    fn from(sheet: AttendanceSheet) -> Self {
        AttendanceSheetResponse {
            id: sheet.id.map(|id| id.to_hex()).unwrap_or_default(),
            section_id: sheet.section_id.to_hex(),
            course_id: sheet.course_id.map(|id| id.to_hex()),
            date: sheet.date,
            records: sheet
                .records
                .into_iter()
                .map(|r| AttendanceRecordResponse {
                    student_id: r.student_id.to_hex(),
                    status: r.status,
                })
                .collect(),
            marked_by: sheet.marked_by.to_hex(),
            updated_at: sheet.updated_at,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttendanceEntryRequest {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct MarkAttendanceRequest {
    pub section_id: String,
    pub course_id: Option<String>,
    pub date: String,
    #[validate(length(min = 1, max = 1000, message = "Provide between 1 and 1000 records"))]
    pub records: Vec<AttendanceEntryRequest>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceQuery {
    pub section_id: Option<String>,
    pub course_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttendanceSummaryQuery {
    pub course_id: Option<String>,
    pub from: Option<String>,
    pub to: Option<String>,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct AttendanceSummary {
    pub student_id: String,
    pub total: u32,
    pub counts: BTreeMap<AttendanceStatus, u32>,
    /// Share of sessions attended (present or late), 0.0 when no sessions
    pub attendance_rate: f64,
}

/// Folds the sheets into one student's summary; sheets without the student are skipped
pub fn summarize(student_id: &ObjectId, sheets: &[AttendanceSheet]) -> AttendanceSummary {
    let mut counts = BTreeMap::new();
    let mut total = 0u32;
    let mut attended = 0u32;

    for record in sheets
        .iter()
        .flat_map(|sheet| sheet.records.iter())
        .filter(|record| &record.student_id == student_id)
    {
        total += 1;
        if record.status.counts_as_attended() {
            attended += 1;
        }
        *counts.entry(record.status).or_insert(0) += 1;
    }

    let attendance_rate = if total == 0 {
        0.0
    } else {
        attended as f64 / total as f64
    };

    AttendanceSummary {
        student_id: student_id.to_hex(),
        total,
        counts,
        attendance_rate,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(date: &str, records: Vec<(ObjectId, AttendanceStatus)>) -> AttendanceSheet {
        let now = Utc::now();
        AttendanceSheet {
            id: None,
            school_id: ObjectId::new(),
            section_id: ObjectId::new(),
            course_id: None,
            date: date.to_string(),
            records: records
                .into_iter()
                .map(|(student_id, status)| AttendanceRecord { student_id, status })
                .collect(),
            marked_by: ObjectId::new(),
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_summary_counts_late_as_attended() {
        let student = ObjectId::new();
        let other = ObjectId::new();
        let sheets = vec![
            sheet("2026-10-01", vec![(student, AttendanceStatus::Present)]),
            sheet(
                "2026-10-02",
                vec![
                    (student, AttendanceStatus::Late),
                    (other, AttendanceStatus::Absent),
                ],
            ),
            sheet("2026-10-03", vec![(student, AttendanceStatus::Absent)]),
            sheet("2026-10-04", vec![(student, AttendanceStatus::Excused)]),
            sheet("2026-10-05", vec![(other, AttendanceStatus::Present)]),
        ];

        let summary = summarize(&student, &sheets);
        assert_eq!(summary.total, 4);
        assert_eq!(summary.counts[&AttendanceStatus::Absent], 1);
        assert_eq!(summary.counts[&AttendanceStatus::Late], 1);
        assert!((summary.attendance_rate - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_summary_without_sessions() {
        let summary = summarize(&ObjectId::new(), &[]);
        assert_eq!(summary.total, 0);
        assert_eq!(summary.attendance_rate, 0.0);
        assert!(summary.counts.is_empty());
    }

    #[test]
    fn test_parse_date() {
        assert!(parse_date("2026-02-28").is_ok());
        assert!(parse_date("2026-02-30").is_err());
        assert!(parse_date("28/02/2026").is_err());
    }
}
