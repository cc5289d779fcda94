use anyhow::{bail, Context, Result};
use std::path::{Path, PathBuf};
use tokio::fs;
use uuid::Uuid;

use crate::models::assignment::StoredFile;

const MAX_NAME_LEN: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadCategory {
    Assignments,
    Submissions,
}

impl UploadCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadCategory::Assignments => "assignments",
            UploadCategory::Submissions => "submissions",
        }
    }
}

/// A file taken out of a multipart form, not yet persisted
#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// Local-disk storage: `{root}/{category}/{uuid}-{name}`, served under /uploads
#[derive(Debug, Clone)]
pub struct UploadStorage {
    root: PathBuf,
    max_bytes: usize,
}

impl UploadStorage {
    pub fn new(root: PathBuf, max_bytes: usize) -> Self {
        Self { root, max_bytes }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    pub async fn save(&self, category: UploadCategory, file: IncomingFile) -> Result<StoredFile> {
        if file.bytes.len() > self.max_bytes {
            bail!(
                "File {} exceeds the {} byte limit",
                file.file_name,
                self.max_bytes
            );
        }

        let safe_name = sanitize_file_name(&file.file_name);
        let stored_path = format!("{}/{}-{}", category.as_str(), Uuid::new_v4(), safe_name);
        let target = self.root.join(&stored_path);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create upload dir {}", parent.display()))?;
        }
        fs::write(&target, &file.bytes)
            .await
            .with_context(|| format!("Failed to write upload {}", target.display()))?;

        tracing::debug!(path = %stored_path, size = file.bytes.len(), "Stored upload");

        Ok(StoredFile {
            original_name: file.file_name,
            stored_path,
            content_type: file.content_type,
            size: file.bytes.len() as u64,
        })
    }

    /// Deletes a stored file; a file already gone is not an error
    pub async fn remove(&self, file: &StoredFile) -> Result<()> {
        let target = self.resolve(&file.stored_path)?;
        match fs::remove_file(&target).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", target.display())),
        }
    }

    /// Best-effort removal used by cascades
    pub async fn remove_quietly(&self, file: &StoredFile) {
        if let Err(e) = self.remove(file).await {
            tracing::warn!(path = %file.stored_path, error = %e, "Failed to remove upload");
        }
    }

    fn resolve(&self, stored_path: &str) -> Result<PathBuf> {
        if stored_path.split('/').any(|segment| segment == ".." || segment.is_empty()) {
            bail!("Refusing to resolve suspicious upload path {}", stored_path);
        }
        Ok(self.root.join(stored_path))
    }
}

/// Keeps the base name and replaces anything outside [A-Za-z0-9._-]
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name);

    let cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let trimmed = cleaned.trim_start_matches('.');
    let mut result: String = trimmed.chars().rev().take(MAX_NAME_LEN).collect();
    result = result.chars().rev().collect();

    if result.is_empty() {
        "file".to_string()
    } else {
        result
    }
}
