//! Filesystem backend: `<root>/<job_id>/<name>`.
//!
//! Writes go to a hidden temp file in the job directory and are renamed
//! into place, so readers never see a partially written artifact.

use std::path::{Path, PathBuf};

use gazer_core::types::Timestamp;
use serde::Serialize;

use crate::error::StorageError;

/// Suffix of in-progress writes. Names starting with `.` are never valid
/// artifact names, so temp files cannot shadow artifacts.
const PARTIAL_SUFFIX: &str = ".partial";

/// One stored job as reported by a listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobListing {
    pub job_id: String,
    pub last_modified: Timestamp,
}

#[derive(Debug, Clone)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn job_dir(&self, job_id: &str) -> PathBuf {
        self.root.join(job_id)
    }

    pub fn artifact_path(&self, job_id: &str, name: &str) -> PathBuf {
        self.job_dir(job_id).join(name)
    }

    /// Write an artifact atomically (temp file + rename).
    pub async fn write(&self, job_id: &str, name: &str, bytes: &[u8]) -> Result<(), StorageError> {
        let dir = self.job_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;

        let tmp = dir.join(format!(".{name}{PARTIAL_SUFFIX}"));
        let target = dir.join(name);

        if let Err(e) = tokio::fs::write(&tmp, bytes).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        tokio::fs::rename(&tmp, &target).await?;
        Ok(())
    }

    pub async fn read(&self, job_id: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        match tokio::fs::read(self.artifact_path(job_id, name)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound {
                job_id: job_id.to_string(),
                name: name.to_string(),
            }),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn has(&self, job_id: &str, name: &str) -> bool {
        tokio::fs::try_exists(self.artifact_path(job_id, name))
            .await
            .unwrap_or(false)
    }

    /// A job exists locally once it has at least one committed artifact.
    pub async fn exists(&self, job_id: &str) -> bool {
        matches!(self.names(job_id).await, Ok(names) if !names.is_empty())
    }

    /// Committed artifact names of a job, sorted.
    pub async fn names(&self, job_id: &str) -> Result<Vec<String>, StorageError> {
        let mut entries = match tokio::fs::read_dir(self.job_dir(job_id)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy().into_owned();
            if !name.starts_with('.') {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a job directory. Returns `false` if there was nothing to
    /// remove.
    pub async fn delete(&self, job_id: &str) -> Result<bool, StorageError> {
        match tokio::fs::remove_dir_all(self.job_dir(job_id)).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Every job directory under the root with its modification time.
    pub async fn list(&self) -> Result<Vec<JobListing>, StorageError> {
        let mut entries = match tokio::fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut listings = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let metadata = entry.metadata().await?;
            if !metadata.is_dir() {
                continue;
            }
            let job_id = entry.file_name().to_string_lossy().into_owned();
            let last_modified = metadata
                .modified()
                .map(Timestamp::from)
                .unwrap_or_else(|_| chrono::Utc::now());
            listings.push(JobListing {
                job_id,
                last_modified,
            });
        }
        Ok(listings)
    }
}
