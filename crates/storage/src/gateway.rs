//! Dual-backend artifact storage.
//!
//! [`StorageGateway`] writes locally first and treats the remote backend
//! as a best-effort replica: remote failures are logged and reflected in
//! [`BackendPresence`], never returned. Reads fall back to the remote
//! when the local copy is missing. Callers never branch on whether a
//! remote backend is configured.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use gazer_core::credentials::StorageCredentials;
use serde::Serialize;

use crate::config::StorageConfig;
use crate::error::StorageError;
use crate::local::{JobListing, LocalStore};
use crate::names::{validate_artifact_name, validate_job_key};
use crate::remote::{ObjectStore, RemoteStore};

/// Name of the staged input image; its presence marks a staging
/// directory as belonging to a real submission.
pub const INPUT_FILE_NAME: &str = "input.jpg";

/// Staging subdirectory holding unpacked worker output.
const STAGED_OUTPUT_DIR: &str = "output";

/// Where an artifact (or artifact set) is known to be stored.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BackendPresence {
    pub local: bool,
    pub remote: bool,
}

/// The persisted artifacts of one job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactSet {
    pub job_id: String,
    pub names: Vec<String>,
    pub backend_presence: BackendPresence,
}

/// Outcome of [`StorageGateway::recover_orphans`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RecoveryReport {
    pub recovered: Vec<String>,
    pub errors: Vec<String>,
}

pub struct StorageGateway {
    local: LocalStore,
    remote: Option<Arc<dyn RemoteStore>>,
    staging_root: PathBuf,
    required_artifacts: Vec<String>,
    credentials: Option<StorageCredentials>,
}

impl StorageGateway {
    /// Local-only gateway.
    pub fn new(
        local_root: impl Into<PathBuf>,
        staging_root: impl Into<PathBuf>,
        required_artifacts: Vec<String>,
    ) -> Self {
        Self {
            local: LocalStore::new(local_root),
            remote: None,
            staging_root: staging_root.into(),
            required_artifacts,
            credentials: None,
        }
    }

    /// Attach a remote backend. `credentials`, when given, are passed to
    /// the worker so it can upload directly.
    pub fn with_remote(
        mut self,
        remote: Arc<dyn RemoteStore>,
        credentials: Option<StorageCredentials>,
    ) -> Self {
        self.remote = Some(remote);
        self.credentials = credentials;
        self
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        let gateway = Self::new(
            config.local_root.clone(),
            config.staging_root.clone(),
            config.required_artifacts.clone(),
        );
        match &config.remote {
            Some(remote) => gateway.with_remote(
                Arc::new(ObjectStore::new(remote)),
                Some(remote.credentials()),
            ),
            None => gateway,
        }
    }

    pub fn has_remote(&self) -> bool {
        self.remote.is_some()
    }

    pub fn credentials(&self) -> Option<&StorageCredentials> {
        self.credentials.as_ref()
    }

    pub fn required_artifacts(&self) -> &[String] {
        &self.required_artifacts
    }

    pub fn local(&self) -> &LocalStore {
        &self.local
    }

    // ---- staging ----

    pub fn staging_dir(&self, job_id: &str) -> PathBuf {
        self.staging_root.join(job_id)
    }

    pub fn staged_input_path(&self, job_id: &str) -> PathBuf {
        self.staging_dir(job_id).join(INPUT_FILE_NAME)
    }

    pub fn staged_output_dir(&self, job_id: &str) -> PathBuf {
        self.staging_dir(job_id).join(STAGED_OUTPUT_DIR)
    }

    /// Write a submission's input image into its staging directory.
    pub async fn stage_input(&self, job_id: &str, bytes: &[u8]) -> Result<PathBuf, StorageError> {
        validate_job_key(job_id)?;
        let dir = self.staging_dir(job_id);
        tokio::fs::create_dir_all(&dir).await?;
        let path = dir.join(INPUT_FILE_NAME);
        tokio::fs::write(&path, bytes).await?;
        Ok(path)
    }

    /// Remove a job's staging directory; missing directories are fine.
    pub async fn remove_staging(&self, job_id: &str) -> Result<(), StorageError> {
        validate_job_key(job_id)?;
        match tokio::fs::remove_dir_all(self.staging_dir(job_id)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // ---- artifacts ----

    /// Persist one artifact: local write (fatal on failure), then a
    /// best-effort remote upload.
    pub async fn write(
        &self,
        job_id: &str,
        name: &str,
        bytes: Vec<u8>,
    ) -> Result<BackendPresence, StorageError> {
        validate_job_key(job_id)?;
        validate_artifact_name(name)?;

        self.local.write(job_id, name, &bytes).await?;

        let remote = match &self.remote {
            Some(remote) => match remote.put(job_id, name, bytes).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::warn!(job_id, name, error = %e, "Remote upload failed; kept local copy");
                    false
                }
            },
            None => false,
        };

        Ok(BackendPresence {
            local: true,
            remote,
        })
    }

    /// Read an artifact, local first, then remote. The remote copy is not
    /// cached locally.
    pub async fn read(&self, job_id: &str, name: &str) -> Result<Vec<u8>, StorageError> {
        validate_job_key(job_id)?;
        validate_artifact_name(name)?;

        match self.local.read(job_id, name).await {
            Ok(bytes) => return Ok(bytes),
            Err(StorageError::NotFound { .. }) => {}
            Err(e) => return Err(e),
        }

        if let Some(remote) = &self.remote {
            if let Some(bytes) = remote.get(job_id, name).await? {
                return Ok(bytes);
            }
        }

        Err(StorageError::NotFound {
            job_id: job_id.to_string(),
            name: name.to_string(),
        })
    }

    /// Whether any artifacts of the job are stored, local first.
    pub async fn exists(&self, job_id: &str) -> Result<bool, StorageError> {
        validate_job_key(job_id)?;
        if self.local.exists(job_id).await {
            return Ok(true);
        }
        match &self.remote {
            Some(remote) => remote.has_job(job_id).await,
            None => Ok(false),
        }
    }

    /// Delete a job from both backends. Per-backend failures are logged.
    /// Returns whether anything was removed.
    pub async fn delete(&self, job_id: &str) -> Result<bool, StorageError> {
        validate_job_key(job_id)?;

        let local = match self.local.delete(job_id).await {
            Ok(removed) => removed,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Failed to delete local artifacts");
                false
            }
        };

        let remote = match &self.remote {
            Some(remote) => match remote.delete_job(job_id).await {
                Ok(count) => count > 0,
                Err(e) => {
                    tracing::warn!(job_id, error = %e, "Failed to delete remote artifacts");
                    false
                }
            },
            None => false,
        };

        if local || remote {
            tracing::info!(job_id, local, remote, "Deleted job artifacts");
        }
        Ok(local || remote)
    }

    /// Stored jobs from both backends, de-duplicated by id, newest first.
    ///
    /// A failing remote listing degrades to the local listing.
    pub async fn list(&self) -> Result<Vec<JobListing>, StorageError> {
        let mut listings = self.local.list().await?;

        if let Some(remote) = &self.remote {
            match remote.list().await {
                Ok(remote_listings) => {
                    for entry in remote_listings {
                        if !listings.iter().any(|l| l.job_id == entry.job_id) {
                            listings.push(entry);
                        }
                    }
                }
                Err(e) => tracing::warn!(error = %e, "Remote listing failed; using local only"),
            }
        }

        listings.sort_by(|a, b| {
            b.last_modified
                .cmp(&a.last_modified)
                .then_with(|| a.job_id.cmp(&b.job_id))
        });
        Ok(listings)
    }

    /// Required artifacts missing from the local backend.
    pub async fn missing_local(&self, job_id: &str) -> Vec<String> {
        let mut missing = Vec::new();
        for name in &self.required_artifacts {
            if !self.local.has(job_id, name).await {
                missing.push(name.clone());
            }
        }
        missing
    }

    /// Verify the remote holds every required artifact.
    pub async fn verify_remote(&self, job_id: &str) -> Result<bool, StorageError> {
        let Some(remote) = &self.remote else {
            return Ok(false);
        };
        for name in &self.required_artifacts {
            if !remote.exists(job_id, name).await? {
                tracing::debug!(job_id, name, "Required artifact missing remotely");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Describe what is stored for a job.
    pub async fn artifact_set(&self, job_id: &str) -> Result<ArtifactSet, StorageError> {
        validate_job_key(job_id)?;
        let names = self.local.names(job_id).await?;
        let local = self.missing_local(job_id).await.is_empty();
        let remote = match self.verify_remote(job_id).await {
            Ok(present) => present,
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Remote presence check failed");
                false
            }
        };
        Ok(ArtifactSet {
            job_id: job_id.to_string(),
            names,
            backend_presence: BackendPresence { local, remote },
        })
    }

    /// Copy every required artifact from `staged_dir` through
    /// [`write`](Self::write).
    ///
    /// Fails on the first missing staged file or local write error. A
    /// failed promotion deletes whatever it already wrote, so a job never
    /// has a partial canonical set.
    pub async fn promote(&self, job_id: &str, staged_dir: &Path) -> Result<ArtifactSet, StorageError> {
        validate_job_key(job_id)?;

        match self.promote_all(job_id, staged_dir).await {
            Ok(set) => Ok(set),
            Err(e) => {
                tracing::warn!(job_id, error = %e, "Promotion failed, removing partial artifacts");
                self.delete(job_id).await?;
                Err(e)
            }
        }
    }

    async fn promote_all(&self, job_id: &str, staged_dir: &Path) -> Result<ArtifactSet, StorageError> {
        let mut presence = BackendPresence {
            local: true,
            remote: self.remote.is_some(),
        };
        for name in &self.required_artifacts {
            let bytes = match tokio::fs::read(staged_dir.join(name)).await {
                Ok(bytes) => bytes,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    return Err(StorageError::NotFound {
                        job_id: job_id.to_string(),
                        name: name.clone(),
                    })
                }
                Err(e) => return Err(e.into()),
            };
            let written = self.write(job_id, name, bytes).await?;
            presence.remote &= written.remote;
        }

        tracing::info!(
            job_id,
            count = self.required_artifacts.len(),
            remote = presence.remote,
            "Promoted staged artifacts",
        );

        Ok(ArtifactSet {
            job_id: job_id.to_string(),
            names: self.required_artifacts.clone(),
            backend_presence: presence,
        })
    }

    /// Promote staged results left behind by a crash.
    ///
    /// A staging directory qualifies when it has an input marker, its
    /// staged output holds every required artifact, and the canonical
    /// local copy is incomplete. Successfully promoted staging directories
    /// are removed, so a second run recovers nothing. Staging left over
    /// from a job whose canonical copy is already complete is removed
    /// too.
    pub async fn recover_orphans(&self) -> RecoveryReport {
        let mut report = RecoveryReport::default();

        let mut entries = match tokio::fs::read_dir(&self.staging_root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return report,
            Err(e) => {
                report.errors.push(format!("staging root unreadable: {e}"));
                return report;
            }
        };

        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(e) => {
                    report.errors.push(format!("staging scan failed: {e}"));
                    break;
                }
            };
            let job_id = entry.file_name().to_string_lossy().into_owned();
            if validate_job_key(&job_id).is_err() || !entry.path().is_dir() {
                continue;
            }

            match self.recover_one(&job_id).await {
                Ok(true) => report.recovered.push(job_id),
                Ok(false) => {}
                Err(e) => {
                    tracing::warn!(job_id = %job_id, error = %e, "Orphan recovery failed");
                    report.errors.push(format!("{job_id}: {e}"));
                }
            }
        }

        report.recovered.sort();
        tracing::info!(
            recovered = report.recovered.len(),
            errors = report.errors.len(),
            "Orphan recovery finished",
        );
        report
    }

    async fn recover_one(&self, job_id: &str) -> Result<bool, StorageError> {
        if !has_input_marker(&self.staging_dir(job_id)).await? {
            return Ok(false);
        }

        let output = self.staged_output_dir(job_id);
        for name in &self.required_artifacts {
            if !tokio::fs::try_exists(output.join(name)).await? {
                return Ok(false);
            }
        }

        if self.missing_local(job_id).await.is_empty() {
            self.remove_staging(job_id).await?;
            tracing::debug!(job_id, "Canonical copy already complete, removed staging");
            return Ok(false);
        }

        self.promote(job_id, &output).await?;
        self.remove_staging(job_id).await?;
        tracing::info!(job_id, "Recovered orphaned job");
        Ok(true)
    }
}

/// Any `input.*` file counts as the marker.
async fn has_input_marker(dir: &Path) -> Result<bool, StorageError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name == "input" || name.starts_with("input.") {
            return Ok(true);
        }
    }
    Ok(false)
}
