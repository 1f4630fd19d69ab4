//! The job model owned by the queue.
//!
//! A [`Job`] is created on admission and lives in the queue until it
//! reaches a terminal status; the runner drops it after reporting.

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::types::{new_job_id, JobId, Timestamp};

/// Maximum length accepted for a job id coming from outside the process.
const MAX_JOB_ID_LEN: usize = 64;

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Active,
    Done,
    Failed,
}

/// One end-to-end generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    /// Opaque reference to whoever submitted the job (connection id,
    /// user handle, ...). Used only for logging.
    pub submitter_ref: String,
    /// Filesystem path of the staged input image.
    pub input_locator: String,
    pub remove_background: bool,
    pub added_at: Timestamp,
    pub status: JobStatus,
}

impl Job {
    /// Create a queued job with a fresh id.
    pub fn new(
        submitter_ref: impl Into<String>,
        input_locator: impl Into<String>,
        remove_background: bool,
    ) -> Self {
        Self::with_id(new_job_id(), submitter_ref, input_locator, remove_background)
    }

    /// Create a queued job with a caller-chosen id (the API allocates the
    /// id first so the input can be staged under it).
    pub fn with_id(
        id: impl Into<JobId>,
        submitter_ref: impl Into<String>,
        input_locator: impl Into<String>,
        remove_background: bool,
    ) -> Self {
        Self {
            id: id.into(),
            submitter_ref: submitter_ref.into(),
            input_locator: input_locator.into(),
            remove_background,
            added_at: chrono::Utc::now(),
            status: JobStatus::Queued,
        }
    }
}

/// Validate an externally supplied job id before it is used as a path
/// component or object key.
///
/// Only ASCII alphanumerics, `-` and `_` are allowed.
pub fn validate_job_id(id: &str) -> Result<(), CoreError> {
    if id.is_empty() || id.len() > MAX_JOB_ID_LEN {
        return Err(CoreError::Validation(format!(
            "Job id must be 1-{MAX_JOB_ID_LEN} characters"
        )));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return Err(CoreError::Validation(format!(
            "Job id '{id}' contains invalid characters"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_job_starts_queued_with_uuid() {
        let job = Job::new("conn-1", "/tmp/in.jpg", true);
        assert_eq!(job.status, JobStatus::Queued);
        assert!(job.remove_background);
        assert!(validate_job_id(&job.id).is_ok());
        assert_eq!(job.id.len(), 36);
    }

    #[test]
    fn terminal_statuses_serialize() {
        assert_eq!(serde_json::to_string(&JobStatus::Done).unwrap(), "\"done\"");
        assert_eq!(serde_json::to_string(&JobStatus::Failed).unwrap(), "\"failed\"");
    }

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&JobStatus::Active).unwrap();
        assert_eq!(json, "\"active\"");
    }

    #[test]
    fn job_id_validation() {
        assert!(validate_job_id("abc-123_DEF").is_ok());
        assert!(validate_job_id("").is_err());
        assert!(validate_job_id("../etc").is_err());
        assert!(validate_job_id("a/b").is_err());
        assert!(validate_job_id(&"x".repeat(65)).is_err());
    }
}
