use axum::{
    extract::{multipart::MultipartError, FromRequest, Multipart, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::ApiError;
use crate::services::upload_storage::IncomingFile;

/// Custom JSON extractor that returns JSON error responses instead of plain text
pub struct AppJson<T>(pub T);

impl<T, S> FromRequest<S> for AppJson<T>
where
    T: serde::de::DeserializeOwned + 'static,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(req, state).await {
            Ok(Json(value)) => Ok(AppJson(value)),
            Err(rejection) => {
                let message = format!("Failed to parse JSON request body: {}", rejection);
                tracing::warn!("{}", message);
                let error_response = json!({
                    "message": message,
                    "status": 400
                });
                Err((StatusCode::BAD_REQUEST, Json(error_response)).into_response())
            }
        }
    }
}

/// Field names accepted for the uploaded file
const FILE_FIELDS: [&str; 2] = ["file", "attachment"];

/// Text fields and at most one file read from a multipart body
#[derive(Debug, Default)]
pub struct MultipartForm {
    fields: HashMap<String, String>,
    pub file: Option<IncomingFile>,
}

fn multipart_error(err: MultipartError) -> ApiError {
    if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge("Upload exceeds the allowed size".to_string())
    } else {
        ApiError::bad_request(format!("Invalid multipart body: {}", err.body_text()))
    }
}

impl MultipartForm {
    pub async fn read(mut multipart: Multipart, max_file_bytes: usize) -> Result<Self, ApiError> {
        let mut form = MultipartForm::default();

        while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
            let name = field.name().unwrap_or_default().to_string();

            if FILE_FIELDS.contains(&name.as_str()) {
                let file_name = field.file_name().unwrap_or("upload").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();
                let bytes = field.bytes().await.map_err(multipart_error)?;

                // browsers send an empty part when no file was picked
                if bytes.is_empty() {
                    continue;
                }
                if bytes.len() > max_file_bytes {
                    return Err(ApiError::PayloadTooLarge(format!(
                        "File exceeds the {} byte limit",
                        max_file_bytes
                    )));
                }
                if form.file.is_some() {
                    return Err(ApiError::bad_request("Only one file may be uploaded"));
                }
                form.file = Some(IncomingFile {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                let value = field.text().await.map_err(multipart_error)?;
                form.fields.insert(name, value);
            }
        }

        Ok(form)
    }

    /// Trimmed value; blank counts as absent
    pub fn text(&self, name: &str) -> Option<String> {
        self.fields
            .get(name)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    pub fn required(&self, name: &str) -> Result<String, ApiError> {
        self.text(name)
            .ok_or_else(|| ApiError::bad_request(format!("Field '{}' is required", name)))
    }

    pub fn parse<T: FromStr>(&self, name: &str) -> Result<Option<T>, ApiError> {
        self.text(name)
            .map(|raw| {
                raw.parse::<T>()
                    .map_err(|_| ApiError::bad_request(format!("Field '{}' is malformed", name)))
            })
            .transpose()
    }

    /// RFC 3339 timestamp
    pub fn datetime(&self, name: &str) -> Result<Option<DateTime<Utc>>, ApiError> {
        self.text(name)
            .map(|raw| {
                DateTime::parse_from_rfc3339(&raw)
                    .map(|dt| dt.with_timezone(&Utc))
                    .map_err(|_| {
                        ApiError::bad_request(format!("Field '{}' must be an RFC 3339 date", name))
                    })
            })
            .transpose()
    }

    #[cfg(test)]
    fn with_fields(pairs: &[(&str, &str)]) -> Self {
        MultipartForm {
            fields: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blank_fields_are_absent() {
        let form = MultipartForm::with_fields(&[("title", "  "), ("course_id", " abc ")]);
        assert_eq!(form.text("title"), None);
        assert_eq!(form.text("course_id").as_deref(), Some("abc"));
        assert!(form.required("title").is_err());
    }

    #[test]
    fn test_typed_parsing() {
        let form = MultipartForm::with_fields(&[
            ("max_points", "80"),
            ("bad", "eighty"),
            ("due_date", "2026-11-01T10:00:00Z"),
        ]);
        assert_eq!(form.parse::<f64>("max_points").unwrap(), Some(80.0));
        assert!(form.parse::<f64>("bad").is_err());
        assert_eq!(form.parse::<f64>("missing").unwrap(), None);
        let due = form.datetime("due_date").unwrap().unwrap();
        assert_eq!(due.to_rfc3339(), "2026-11-01T10:00:00+00:00");
        assert!(form.datetime("bad").is_err());
    }
}
