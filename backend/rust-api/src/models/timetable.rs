use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use mongodb::bson::oid::ObjectId;
use regex::Regex;
use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use super::bson_datetime_as_chrono;

pub const TIMETABLE_COLLECTION: &str = "timetable";

lazy_static! {
    static ref CLOCK_RE: Regex = Regex::new(r"^([01]\d|2[0-3]):[0-5]\d$").expect("valid regex");
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Weekday {
    Mon,
    Tue,
    Wed,
    Thu,
    Fri,
    Sat,
    Sun,
}

impl Weekday {
    pub fn as_str(&self) -> &'static str {
        match self {
            Weekday::Mon => "mon",
            Weekday::Tue => "tue",
            Weekday::Wed => "wed",
            Weekday::Thu => "thu",
            Weekday::Fri => "fri",
            Weekday::Sat => "sat",
            Weekday::Sun => "sun",
        }
    }

    /// Stored alongside the entry so Mongo can sort Monday first
    pub fn index(&self) -> u8 {
        *self as u8
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimetableEntry {
    #[serde(rename = "_id", skip_serializing_if = "Option::is_none")]
    pub id: Option<ObjectId>,
    pub school_id: ObjectId,
    pub section_id: ObjectId,
    pub course_id: ObjectId,
    pub teacher_id: ObjectId,
    pub day: Weekday,
    pub day_index: u8,
    pub start_time: String,
    pub end_time: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<String>,
    #[serde(rename = "createdAt", with = "bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(rename = "updatedAt", with = "bson_datetime_as_chrono")]
    pub updated_at: DateTime<Utc>,
}

impl TimetableEntry {
    /// (start, end) in minutes after midnight
    pub fn span(&self) -> Result<(u32, u32), String> {
        Ok((parse_clock(&self.start_time)?, parse_clock(&self.end_time)?))
    }
}

/// Parses "HH:MM" into minutes after midnight
pub fn parse_clock(value: &str) -> Result<u32, String> {
    if !CLOCK_RE.is_match(value) {
        return Err(format!("Invalid time '{}': expected HH:MM", value));
    }
    let (hours, minutes) = value
        .split_once(':')
        .ok_or_else(|| format!("Invalid time '{}': expected HH:MM", value))?;
    let hours: u32 = hours.parse().map_err(|_| format!("Invalid hour in '{}'", value))?;
    let minutes: u32 = minutes
        .parse()
        .map_err(|_| format!("Invalid minute in '{}'", value))?;
    Ok(hours * 60 + minutes)
}

/// Half-open intervals: back-to-back slots do not overlap
pub fn overlaps(a: (u32, u32), b: (u32, u32)) -> bool {
    a.0 < b.1 && b.0 < a.1
}

pub fn validate_slot(start: &str, end: &str) -> Result<(u32, u32), String> {
    let span = (parse_clock(start)?, parse_clock(end)?);
    if span.1 <= span.0 {
        return Err("end_time must be after start_time".to_string());
    }
    Ok(span)
}

fn validate_clock(value: &str) -> Result<(), ValidationError> {
    if CLOCK_RE.is_match(value) {
        Ok(())
    } else {
        let mut err = ValidationError::new("clock");
        err.message = Some("Time must be HH:MM (24h)".into());
        Err(err)
    }
}

#[derive(Debug, Serialize)]
pub struct TimetableEntryResponse {
    pub id: String,
    pub section_id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub day: Weekday,
    pub start_time: String,
    pub end_time: String,
    pub room: Option<String>,
}

impl From<TimetableEntry> for TimetableEntryResponse {
    fn from(entry: TimetableEntry) -> Self {
        TimetableEntryResponse {
            id: entry.id.map(|id| id.to_hex()).unwrap_or_default(),
            section_id: entry.section_id.to_hex(),
            course_id: entry.course_id.to_hex(),
            teacher_id: entry.teacher_id.to_hex(),
            day: entry.day,
            start_time: entry.start_time,
            end_time: entry.end_time,
            room: entry.room,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateTimetableEntryRequest {
    pub section_id: String,
    pub course_id: String,
    pub teacher_id: String,
    pub day: Weekday,
    #[validate(custom(function = "validate_clock"))]
    pub start_time: String,
    #[validate(custom(function = "validate_clock"))]
    pub end_time: String,
    #[validate(length(max = 64, message = "Room must be at most 64 characters"))]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateTimetableEntryRequest {
    pub teacher_id: Option<String>,
    pub day: Option<Weekday>,
    #[validate(custom(function = "validate_clock"))]
    pub start_time: Option<String>,
    #[validate(custom(function = "validate_clock"))]
    pub end_time: Option<String>,
    #[validate(length(max = 64, message = "Room must be at most 64 characters"))]
    pub room: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TimetableQuery {
    pub section_id: Option<String>,
    pub teacher_id: Option<String>,
    pub day: Option<Weekday>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_clock() {
        assert_eq!(parse_clock("00:00"), Ok(0));
        assert_eq!(parse_clock("08:30"), Ok(510));
        assert_eq!(parse_clock("23:59"), Ok(1439));
        assert!(parse_clock("24:00").is_err());
        assert!(parse_clock("8:30").is_err());
        assert!(parse_clock("08:60").is_err());
    }

    #[test]
    fn test_overlap_is_half_open() {
        assert!(overlaps((540, 600), (570, 630)));
        assert!(overlaps((540, 600), (550, 560)));
        assert!(!overlaps((540, 600), (600, 660)));
        assert!(!overlaps((600, 660), (540, 600)));
    }

    #[test]
    fn test_validate_slot_rejects_inverted() {
        assert!(validate_slot("10:00", "09:00").is_err());
        assert!(validate_slot("10:00", "10:00").is_err());
        assert_eq!(validate_slot("09:00", "09:45"), Ok((540, 585)));
    }

    #[test]
    fn test_weekday_order() {
        assert!(Weekday::Mon.index() < Weekday::Sun.index());
        let day: Weekday = serde_json::from_str("\"wed\"").unwrap();
        assert_eq!(day, Weekday::Wed);
    }

    #[test]
    fn test_request_rejects_bad_clock() {
        let req = CreateTimetableEntryRequest {
            section_id: ObjectId::new().to_hex(),
            course_id: ObjectId::new().to_hex(),
            teacher_id: ObjectId::new().to_hex(),
            day: Weekday::Mon,
            start_time: "9am".to_string(),
            end_time: "10:00".to_string(),
            room: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("start_time"));
    }
}
