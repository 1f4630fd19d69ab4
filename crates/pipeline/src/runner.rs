//! Executes dispatched jobs one at a time.
//!
//! [`JobRunner::run`] listens for [`QueueEvent::ProcessStart`] and drives
//! each job through provisioning, generation and artifact transfer. Every
//! terminal path, including a panic inside the job, emits exactly one
//! `complete` or `error` event and then calls
//! [`QueueManager::complete`] so the next job is dispatched.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::FutureExt;
use gazer_accelerator::api::{GenerateRequest, WorkerApiError};
use gazer_accelerator::{AcceleratorError, AcceleratorManager, AcceleratorState};
use gazer_core::error::JobError;
use gazer_core::job::{Job, JobStatus};
use gazer_core::job_events::{EVENT_COMPLETE, EVENT_ERROR};
use gazer_core::stage::JobStage;
use gazer_core::types::JobId;
use gazer_events::EventBroadcaster;
use gazer_storage::{archive, ArtifactSet, StorageError, StorageGateway};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::progress::{ProgressAggregator, ProgressUpdate};
use crate::queue::{QueueEvent, QueueManager};

/// Drives the active job against the accelerator and storage.
pub struct JobRunner {
    queue: Arc<QueueManager>,
    accelerator: Arc<AcceleratorManager>,
    storage: Arc<StorageGateway>,
    progress: Arc<ProgressAggregator>,
    broadcaster: Arc<EventBroadcaster>,
}

impl JobRunner {
    pub fn new(
        queue: Arc<QueueManager>,
        accelerator: Arc<AcceleratorManager>,
        storage: Arc<StorageGateway>,
        progress: Arc<ProgressAggregator>,
        broadcaster: Arc<EventBroadcaster>,
    ) -> Self {
        Self {
            queue,
            accelerator,
            storage,
            progress,
            broadcaster,
        }
    }

    /// Consume queue events until `cancel` fires or the queue is dropped.
    ///
    /// Subscribes before looking at the active slot, so a job dispatched
    /// before the runner started is still picked up.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut events = self.queue.subscribe();
        let mut in_flight: Option<JoinHandle<()>> = None;
        let mut last_started: Option<JobId> = None;

        tracing::info!("Job runner started");

        if let Some(job) = self.queue.active() {
            self.start(job, &mut in_flight, &mut last_started);
        }

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    if let Some(handle) = in_flight.take() {
                        if !handle.is_finished() {
                            tracing::warn!(job_id = ?last_started, "Aborting in-flight job on shutdown");
                        }
                        handle.abort();
                    }
                    tracing::info!("Job runner stopping");
                    break;
                }
                event = events.recv() => match event {
                    Ok(QueueEvent::ProcessStart(job)) => {
                        self.start(job, &mut in_flight, &mut last_started);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Job runner lagged behind queue events");
                        if let Some(job) = self.queue.active() {
                            self.start(job, &mut in_flight, &mut last_started);
                        }
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
    }

    /// Run one job to its terminal state and release the active slot.
    pub async fn run_job(self: Arc<Self>, mut job: Job) {
        let job_id = job.id.clone();
        tracing::info!(job_id = %job_id, remove_background = job.remove_background, "Job started");

        let outcome = AssertUnwindSafe(self.execute(&job))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(JobError::Internal(panic_message(panic.as_ref()))));

        job.status = match outcome {
            Ok(_) => JobStatus::Done,
            Err(_) => JobStatus::Failed,
        };

        match outcome {
            Ok(set) => {
                tracing::info!(
                    job_id = %job_id,
                    artifacts = set.names.len(),
                    local = set.backend_presence.local,
                    remote = set.backend_presence.remote,
                    "Job complete",
                );
                self.broadcaster
                    .emit_to(
                        &job_id,
                        EVENT_COMPLETE,
                        serde_json::json!({
                            "job_id": job_id,
                            "status": job.status,
                            "artifacts": set.names,
                            "backend_presence": set.backend_presence,
                        }),
                    )
                    .await;
            }
            Err(e) => {
                tracing::error!(job_id = %job_id, code = e.code(), error = %e, "Job failed");
                self.progress
                    .report(
                        &job_id,
                        ProgressUpdate::stage(JobStage::Failed).with_message(e.to_string()),
                    )
                    .await;
                self.broadcaster
                    .emit_to(
                        &job_id,
                        EVENT_ERROR,
                        serde_json::json!({
                            "job_id": job_id,
                            "status": job.status,
                            "code": e.code(),
                            "message": e.to_string(),
                        }),
                    )
                    .await;
            }
        }

        self.progress.stop_polling(&job_id);
        if let Err(e) = self.storage.remove_staging(&job_id).await {
            tracing::warn!(job_id = %job_id, error = %e, "Failed to remove staging directory");
        }
        self.queue.complete(&job_id);
    }

    // ---- private helpers ----

    fn start(
        self: &Arc<Self>,
        job: Job,
        in_flight: &mut Option<JoinHandle<()>>,
        last_started: &mut Option<JobId>,
    ) {
        if last_started.as_deref() == Some(job.id.as_str()) {
            return;
        }
        *last_started = Some(job.id.clone());
        *in_flight = Some(tokio::spawn(Arc::clone(self).run_job(job)));
    }

    async fn execute(&self, job: &Job) -> Result<ArtifactSet, JobError> {
        let config = self.accelerator.config();
        let endpoint = self.provision(&job.id).await?;

        let image = tokio::fs::read(&job.input_locator)
            .await
            .map_err(|e| JobError::InputUnavailable(format!("{}: {e}", job.input_locator)))?;

        let request = GenerateRequest {
            session_id: job.id.clone(),
            image_base64: STANDARD.encode(&image),
            remove_background: job.remove_background,
            storage_credentials: self.storage.credentials().cloned(),
        };

        self.report(
            &job.id,
            ProgressUpdate::stage(JobStage::Initializing).with_message("Submitting to worker"),
        )
        .await;

        self.progress.start_polling(&job.id, &endpoint);
        let result = self
            .accelerator
            .api()
            .generate(&endpoint, &request, config.generation_timeout)
            .await;
        self.progress.stop_polling(&job.id);

        let response = match result {
            Ok(response) if response.is_complete() => response,
            Ok(response) => {
                let detail = response
                    .message
                    .unwrap_or_else(|| format!("worker returned status '{}'", response.status));
                return Err(JobError::WorkerGenerationFailed(detail));
            }
            Err(WorkerApiError::ApiError { body, .. }) => {
                return Err(JobError::WorkerGenerationFailed(body));
            }
            Err(e) => return Err(JobError::WorkerGenerationFailed(e.to_string())),
        };

        let set = if response.artifacts_uploaded_directly && self.storage.has_remote() {
            match self.storage.verify_remote(&job.id).await {
                Ok(true) => {
                    tracing::info!(job_id = %job.id, "Worker uploaded artifacts directly");
                    self.storage
                        .artifact_set(&job.id)
                        .await
                        .map_err(|e| JobError::TransferFailed(e.to_string()))?
                }
                Ok(false) => {
                    tracing::warn!(job_id = %job.id, "Direct upload incomplete, downloading instead");
                    self.transfer(&job.id, &endpoint).await?
                }
                Err(e) => {
                    tracing::warn!(job_id = %job.id, error = %e, "Direct upload check failed, downloading instead");
                    self.transfer(&job.id, &endpoint).await?
                }
            }
        } else {
            self.transfer(&job.id, &endpoint).await?
        };

        self.report(
            &job.id,
            ProgressUpdate::stage(JobStage::Complete)
                .with_counts(1, 1)
                .with_message("Complete"),
        )
        .await;
        Ok(set)
    }

    /// Wait for a ready accelerator, mirroring its provisioning messages
    /// into the job's progress.
    async fn provision(&self, job_id: &str) -> Result<String, JobError> {
        self.report(
            job_id,
            ProgressUpdate::stage(JobStage::Provisioning).with_message("Waiting for accelerator"),
        )
        .await;

        let mirror = tokio::spawn(mirror_accelerator(
            self.accelerator.subscribe(),
            Arc::clone(&self.progress),
            job_id.to_string(),
        ));
        let result = self.accelerator.ensure_ready().await;
        mirror.abort();

        result.map_err(|e| match e {
            AcceleratorError::Unavailable(detail) => JobError::AcceleratorUnavailable(detail),
            other => JobError::AcceleratorUnavailable(other.to_string()),
        })
    }

    /// Download, unpack and persist the worker's result archive.
    async fn transfer(&self, job_id: &str, endpoint: &str) -> Result<ArtifactSet, JobError> {
        let config = self.accelerator.config();

        self.report(
            job_id,
            ProgressUpdate::stage(JobStage::Uploading)
                .with_counts(0, 2)
                .with_message("Downloading results"),
        )
        .await;
        let archive_bytes = self
            .accelerator
            .api()
            .download(endpoint, job_id, config.download_timeout)
            .await
            .map_err(|e| JobError::TransferFailed(e.to_string()))?;

        self.report(
            job_id,
            ProgressUpdate::stage(JobStage::Uploading)
                .with_counts(1, 2)
                .with_message("Storing results"),
        )
        .await;
        let staged = self.storage.staged_output_dir(job_id);
        let required = self.storage.required_artifacts().to_vec();
        let extracted = archive::extract(archive_bytes, staged.clone(), required.clone())
            .await
            .map_err(|e| JobError::TransferFailed(e.to_string()))?;

        let missing: Vec<&str> = required
            .iter()
            .filter(|name| !extracted.contains(*name))
            .map(String::as_str)
            .collect();
        if !missing.is_empty() {
            return Err(JobError::TransferFailed(format!(
                "archive is missing required artifacts: {}",
                missing.join(", ")
            )));
        }

        let set = self.storage.promote(job_id, &staged).await.map_err(|e| {
            if matches!(e, StorageError::NotFound { .. }) {
                JobError::TransferFailed(e.to_string())
            } else {
                JobError::StorageWriteFailed(e.to_string())
            }
        })?;

        self.report(
            job_id,
            ProgressUpdate::stage(JobStage::Uploading)
                .with_counts(2, 2)
                .with_message("Results stored"),
        )
        .await;
        Ok(set)
    }

    async fn report(&self, job_id: &str, update: ProgressUpdate) {
        self.progress.report(job_id, update).await;
    }
}

async fn mirror_accelerator(
    mut rx: watch::Receiver<AcceleratorState>,
    progress: Arc<ProgressAggregator>,
    job_id: JobId,
) {
    while rx.changed().await.is_ok() {
        let state = rx.borrow_and_update().clone();
        let update = ProgressUpdate::stage(JobStage::Provisioning)
            .with_counts(u64::from(state.progress_percent), 100)
            .with_message(state.message);
        progress.report(&job_id, update).await;
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("job panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("job panicked: {s}")
    } else {
        "job panicked".to_string()
    }
}
