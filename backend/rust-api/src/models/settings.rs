use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::bson_datetime_as_chrono_option;

pub const SETTINGS_COLLECTION: &str = "settings";
pub const DUE_DATES_KEY: &str = "due_dates";

/// Billing days; the single document under key "due_dates"
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DueDateConfig {
    pub fee_due_day: u32,
    pub salary_due_day: u32,
    /// Used for students without their own monthly amount
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fee_amount_default: Option<f64>,
    /// Last "YYYY-MM" period for which fee entries were pushed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_fee_period: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_salary_period: Option<String>,
    #[serde(
        rename = "updatedAt",
        default,
        skip_serializing_if = "Option::is_none",
        with = "bson_datetime_as_chrono_option"
    )]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Default for DueDateConfig {
    fn default() -> Self {
        Self {
            fee_due_day: 1,
            salary_due_day: 1,
            fee_amount_default: None,
            last_fee_period: None,
            last_salary_period: None,
            updated_at: None,
        }
    }
}

/// API view of the billing days
#[derive(Debug, Serialize)]
pub struct DueDatesResponse {
    pub fee_due_day: u32,
    pub salary_due_day: u32,
    pub fee_amount_default: Option<f64>,
    pub last_fee_period: Option<String>,
    pub last_salary_period: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl From<DueDateConfig> for DueDatesResponse {
    fn from(config: DueDateConfig) -> Self {
        Self {
            fee_due_day: config.fee_due_day,
            salary_due_day: config.salary_due_day,
            fee_amount_default: config.fee_amount_default,
            last_fee_period: config.last_fee_period,
            last_salary_period: config.last_salary_period,
            updated_at: config.updated_at,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateDueDatesRequest {
    #[validate(range(min = 1, max = 31, message = "fee_due_day must be between 1 and 31"))]
    pub fee_due_day: Option<u32>,

    #[validate(range(min = 1, max = 31, message = "salary_due_day must be between 1 and 31"))]
    pub salary_due_day: Option<u32>,

    #[validate(range(min = 0.0, message = "fee_amount_default cannot be negative"))]
    pub fee_amount_default: Option<f64>,
}

pub fn days_in_month(year: i32, month: u32) -> u32 {
    let (next_year, next_month) = if month == 12 {
        (year + 1, 1)
    } else {
        (year, month + 1)
    };
    NaiveDate::from_ymd_opt(next_year, next_month, 1)
        .and_then(|first| first.pred_opt())
        .map(|last| last.day())
        .unwrap_or(28)
}

/// A due day past the end of a short month falls on its last day
pub fn effective_due_day(configured: u32, year: i32, month: u32) -> u32 {
    configured.clamp(1, days_in_month(year, month))
}

/// "YYYY-MM"
pub fn billing_period(date: NaiveDate) -> String {
    format!("{:04}-{:02}", date.year(), date.month())
}

/// True on or after the due day of `date`'s month
pub fn is_due(configured_day: u32, date: NaiveDate) -> bool {
    date.day() >= effective_due_day(configured_day, date.year(), date.month())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_days_in_month() {
        assert_eq!(days_in_month(2026, 2), 28);
        assert_eq!(days_in_month(2028, 2), 29);
        assert_eq!(days_in_month(2026, 4), 30);
        assert_eq!(days_in_month(2026, 12), 31);
    }

    #[test]
    fn test_due_day_clamps_to_short_months() {
        assert_eq!(effective_due_day(31, 2026, 2), 28);
        assert_eq!(effective_due_day(31, 2026, 4), 30);
        assert_eq!(effective_due_day(15, 2026, 2), 15);
        assert!(is_due(31, date(2026, 2, 28)));
        assert!(!is_due(31, date(2026, 3, 30)));
    }

    #[test]
    fn test_is_due_on_and_after_day() {
        assert!(!is_due(10, date(2026, 10, 9)));
        assert!(is_due(10, date(2026, 10, 10)));
        // a missed tick still catches up later in the month
        assert!(is_due(10, date(2026, 10, 20)));
    }

    #[test]
    fn test_billing_period_format() {
        assert_eq!(billing_period(date(2026, 3, 5)), "2026-03");
    }

    #[test]
    fn test_update_validation() {
        let req = UpdateDueDatesRequest {
            fee_due_day: Some(32),
            salary_due_day: Some(0),
            fee_amount_default: None,
        };
        let errors = req.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("fee_due_day"));
        assert!(errors.field_errors().contains_key("salary_due_day"));
    }
}
