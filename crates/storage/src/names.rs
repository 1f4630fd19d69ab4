//! Artifact naming rules and the default required-artifact list.

use gazer_core::job::validate_job_id;

use crate::error::StorageError;

/// Artifacts a finished job must have: four quadrant sprites at full and
/// mobile size plus their metadata.
pub const DEFAULT_REQUIRED_ARTIFACTS: &[&str] = &[
    "q0.webp",
    "q1.webp",
    "q2.webp",
    "q3.webp",
    "q0_20.webp",
    "q1_20.webp",
    "q2_20.webp",
    "q3_20.webp",
    "metadata.json",
];

/// Reject names that could escape the job directory or collide with
/// in-progress temp files.
pub fn validate_artifact_name(name: &str) -> Result<(), StorageError> {
    if name.is_empty() || name.len() > 128 {
        return Err(StorageError::InvalidName(format!(
            "artifact name must be 1-128 characters: {name:?}"
        )));
    }
    if name.contains(['/', '\\', '\0']) || name.contains("..") || name.starts_with('.') {
        return Err(StorageError::InvalidName(format!(
            "artifact name is not a plain file name: {name:?}"
        )));
    }
    Ok(())
}

/// Job ids double as directory names and key prefixes.
pub fn validate_job_key(job_id: &str) -> Result<(), StorageError> {
    validate_job_id(job_id).map_err(|e| StorageError::InvalidName(e.to_string()))
}

/// Content type used for uploads and HTTP responses.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase()) {
        Some(ext) if ext == "webp" => "image/webp",
        Some(ext) if ext == "json" => "application/json",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "zip" => "application/zip",
        _ => "application/octet-stream",
    }
}
