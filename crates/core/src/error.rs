#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Terminal failure of an active job.
///
/// Each variant is surfaced once to the job's subscribers as an `error`
/// event; none of them is retried automatically.
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    /// The accelerator could not be brought to `ready` within the
    /// health-check bound.
    #[error("Accelerator unavailable: {0}")]
    AcceleratorUnavailable(String),

    /// The worker answered `/generate` with a non-success status.
    #[error("Generation failed: {0}")]
    WorkerGenerationFailed(String),

    /// Downloading or unpacking the result archive failed, or a required
    /// artifact was missing afterwards.
    #[error("Result transfer failed: {0}")]
    TransferFailed(String),

    /// Writing an artifact to the local backend failed.
    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    /// The job's staged input could not be read.
    #[error("Input unavailable: {0}")]
    InputUnavailable(String),

    /// The job future panicked.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl JobError {
    /// Stable machine-readable code sent alongside the message.
    pub fn code(&self) -> &'static str {
        match self {
            Self::AcceleratorUnavailable(_) => "ACCELERATOR_UNAVAILABLE",
            Self::WorkerGenerationFailed(_) => "GENERATION_FAILED",
            Self::TransferFailed(_) => "TRANSFER_FAILED",
            Self::StorageWriteFailed(_) => "STORAGE_WRITE_FAILED",
            Self::InputUnavailable(_) => "INPUT_UNAVAILABLE",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }
}
