use mongodb::bson::oid::ObjectId;
use serde::Deserialize;

use crate::error::ServiceError;

pub mod assignment;
pub mod attendance;
pub mod course;
pub mod notification;
pub mod quiz;
pub mod realtime;
pub mod refresh_token;
pub mod school;
pub mod section;
pub mod settings;
pub mod timetable;
pub mod user;

/// Limit/offset pagination accepted by every list endpoint
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pagination {
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

impl Pagination {
    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(50).clamp(1, 100) as i64
    }

    pub fn offset(&self) -> u64 {
        self.offset.unwrap_or(0) as u64
    }
}

pub fn parse_object_id(value: &str, field: &str) -> Result<ObjectId, ServiceError> {
    ObjectId::parse_str(value)
        .map_err(|_| ServiceError::validation(format!("Invalid {}: must be ObjectId", field)))
}

pub fn parse_object_ids(values: &[String], field: &str) -> Result<Vec<ObjectId>, ServiceError> {
    values
        .iter()
        .map(|value| parse_object_id(value, field))
        .collect()
}

pub fn hex_ids(ids: &[ObjectId]) -> Vec<String> {
    ids.iter().map(|id| id.to_hex()).collect()
}

// Serde converters for chrono::DateTime <-> mongodb::bson::DateTime
pub(crate) mod bson_datetime_as_chrono {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(date: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let bson_dt = bson::DateTime::from_millis(date.timestamp_millis());
        bson_dt.serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let bson_dt = bson::DateTime::deserialize(deserializer)?;
        DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
            .ok_or_else(|| D::Error::custom("timestamp out of range"))
    }
}

pub(crate) mod bson_datetime_as_chrono_option {
    use chrono::{DateTime, Utc};
    use mongodb::bson;
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(date: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match date {
            Some(d) => {
                let bson_dt = bson::DateTime::from_millis(d.timestamp_millis());
                serializer.serialize_some(&bson_dt)
            }
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt_bson_dt: Option<bson::DateTime> = Option::deserialize(deserializer)?;
        opt_bson_dt
            .map(|bson_dt| {
                DateTime::from_timestamp_millis(bson_dt.timestamp_millis())
                    .ok_or_else(|| D::Error::custom("timestamp out of range"))
            })
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_clamps_limit() {
        let query = Pagination {
            limit: Some(1000),
            offset: Some(20),
        };
        assert_eq!(query.limit(), 100);
        assert_eq!(query.offset(), 20);
        assert_eq!(Pagination::default().limit(), 50);
        assert_eq!(
            Pagination {
                limit: Some(0),
                offset: None
            }
            .limit(),
            1
        );
    }

    #[test]
    fn test_parse_object_id_rejects_garbage() {
        assert!(parse_object_id("not-an-id", "course_id").is_err());
        let id = ObjectId::new();
        assert_eq!(parse_object_id(&id.to_hex(), "course_id").unwrap(), id);
    }
}
