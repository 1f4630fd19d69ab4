/// Errors from the storage layer.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Artifact not found: {job_id}/{name}")]
    NotFound { job_id: String, name: String },

    /// The remote backend rejected or failed a request.
    #[error("Remote storage error: {0}")]
    Remote(String),

    /// A job id or artifact name that is unsafe to use as a path
    /// component or object key.
    #[error("Invalid name: {0}")]
    InvalidName(String),

    /// The result archive was unreadable or contained unsafe entries.
    #[error("Archive error: {0}")]
    Archive(String),
}

impl From<zip::result::ZipError> for StorageError {
    fn from(e: zip::result::ZipError) -> Self {
        Self::Archive(e.to_string())
    }
}
