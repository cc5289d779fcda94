use crate::config::Config;
use crate::middlewares::auth::JwtService;
use anyhow::Context;
use mongodb::{
    bson::doc,
    error::{ErrorKind, WriteFailure},
    options::IndexOptions,
    Client as MongoClient, Database, IndexModel,
};
use redis::aio::ConnectionManager;
use std::sync::Arc;

use notification_hub::NotificationHub;
use upload_storage::UploadStorage;

const DUPLICATE_KEY_CODE: i32 = 11000;

pub mod assignment_service;
pub mod attendance_service;
pub mod auth_service;
pub mod course_service;
pub mod due_date_service;
pub mod jobs;
pub mod notification_hub;
pub mod notification_service;
pub mod quiz_service;
pub mod school_service;
pub mod section_service;
pub mod superuser_seed;
pub mod timetable_service;
pub mod upload_storage;
pub mod user_service;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    /// Absent when no REDIS_URI is configured
    pub redis: Option<ConnectionManager>,
    pub jwt: JwtService,
    pub hub: Arc<NotificationHub>,
    pub storage: UploadStorage,
}

impl AppState {
    pub async fn new(config: Config, mongo_client: MongoClient) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        let redis = match config.redis_uri.as_deref() {
            Some(uri) if !uri.is_empty() => Some(connect_redis(uri).await?),
            _ => {
                tracing::warn!("REDIS_URI not set; rate limiting and login lockout disabled");
                None
            }
        };

        Ok(Self::with_parts(config, mongo, redis))
    }

    pub fn with_parts(config: Config, mongo: Database, redis: Option<ConnectionManager>) -> Self {
        let jwt = JwtService::new(&config.jwt_secret);
        let storage = UploadStorage::new(config.uploads.dir.clone(), config.uploads.max_bytes);
        Self {
            config,
            mongo,
            redis,
            jwt,
            hub: Arc::new(NotificationHub::new()),
            storage,
        }
    }
}

async fn connect_redis(uri: &str) -> anyhow::Result<ConnectionManager> {
    tracing::info!("Attempting to connect to Redis...");
    let client = redis::Client::open(uri).context("Invalid Redis URI")?;

    let redis = tokio::time::timeout(
        std::time::Duration::from_secs(30),
        ConnectionManager::new(client),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

    let mut conn = redis.clone();
    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        redis::cmd("PING").query_async::<String>(&mut conn),
    )
    .await
    .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

    tracing::info!("Redis connection established successfully");
    Ok(redis)
}

/// E11000 from an insert/update (write error) or a findAndModify (command error)
pub(crate) fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match err.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(we)) => we.code == DUPLICATE_KEY_CODE,
        ErrorKind::Command(ce) => ce.code == DUPLICATE_KEY_CODE,
        _ => false,
    }
}

/// Creates the indexes the services rely on for uniqueness and sweeps
pub async fn ensure_indexes(db: &Database) -> anyhow::Result<()> {
    use crate::models::{
        assignment::SUBMISSIONS_COLLECTION, attendance::ATTENDANCE_COLLECTION,
        course::COURSES_COLLECTION, notification::NOTIFICATIONS_COLLECTION,
        quiz::QUIZ_SUBMISSIONS_COLLECTION, refresh_token::REFRESH_TOKENS_COLLECTION,
        section::SECTIONS_COLLECTION, settings::SETTINGS_COLLECTION,
        timetable::TIMETABLE_COLLECTION, user::USERS_COLLECTION,
    };

    let unique = || IndexOptions::builder().unique(true).build();

    let indexes: Vec<(&str, IndexModel)> = vec![
        (
            USERS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "email": 1 })
                .options(unique())
                .build(),
        ),
        (
            USERS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "school_id": 1, "role": 1 })
                .build(),
        ),
        (
            REFRESH_TOKENS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "token_hash": 1 })
                .options(unique())
                .build(),
        ),
        (
            SECTIONS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "is_active": 1, "session_end": 1 })
                .build(),
        ),
        (
            COURSES_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "school_id": 1, "code": 1 })
                .options(unique())
                .build(),
        ),
        (
            SUBMISSIONS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "assignment_id": 1, "student_id": 1 })
                .options(unique())
                .build(),
        ),
        (
            QUIZ_SUBMISSIONS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "quiz_id": 1, "student_id": 1 })
                .options(unique())
                .build(),
        ),
        (
            ATTENDANCE_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "section_id": 1, "course_id": 1, "date": 1 })
                .options(unique())
                .build(),
        ),
        (
            TIMETABLE_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "section_id": 1, "day_index": 1, "start_time": 1 })
                .build(),
        ),
        (
            NOTIFICATIONS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "status": 1, "scheduled_at": 1 })
                .build(),
        ),
        (
            NOTIFICATIONS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "recipients": 1, "createdAt": -1 })
                .build(),
        ),
        (
            SETTINGS_COLLECTION,
            IndexModel::builder()
                .keys(doc! { "key": 1 })
                .options(unique())
                .build(),
        ),
    ];

    for (collection, index) in indexes {
        db.collection::<mongodb::bson::Document>(collection)
            .create_index(index)
            .await
            .with_context(|| format!("Failed to create index on {}", collection))?;
    }

    tracing::info!("MongoDB indexes ensured");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use mongodb::bson::from_document;
    use mongodb::error::{CommandError, Error, WriteError};

    fn write_error(code: i32) -> Error {
        let we: WriteError =
            from_document(doc! { "code": code, "errmsg": "E11000 duplicate key" }).unwrap();
        Error::from(ErrorKind::Write(WriteFailure::WriteError(we)))
    }

    fn command_error(code: i32) -> Error {
        let ce: CommandError = from_document(doc! {
            "code": code,
            "codeName": "DuplicateKey",
            "errmsg": "E11000 duplicate key",
        })
        .unwrap();
        Error::from(ErrorKind::Command(ce))
    }

    #[test]
    fn test_duplicate_key_from_insert() {
        assert!(is_duplicate_key(&write_error(11000)));
        assert!(!is_duplicate_key(&write_error(121)));
    }

    #[test]
    fn test_duplicate_key_from_find_and_modify_upsert() {
        assert!(is_duplicate_key(&command_error(11000)));
        assert!(!is_duplicate_key(&command_error(112)));
    }

    #[test]
    fn test_other_errors_are_not_duplicates() {
        let err = Error::custom("boom");
        assert!(!is_duplicate_key(&err));
    }
}
