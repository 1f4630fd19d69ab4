//! Per-job progress records and the worker progress poller.
//!
//! The worker reports per-stage counters; [`JobStage::percent`] maps them
//! into the stage's fixed band, and [`ProgressStore::update`] clamps the
//! result so a job's overall percent never goes backwards. Every stored
//! update is republished as a `progress` event to the job's subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use gazer_accelerator::api::WorkerProgress;
use gazer_accelerator::WorkerApi;
use gazer_core::job_events::EVENT_PROGRESS;
use gazer_core::stage::JobStage;
use gazer_core::types::{JobId, Timestamp};
use gazer_events::EventBroadcaster;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::ProgressConfig;

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// Latest normalized progress of one job.
#[derive(Debug, Clone, Serialize)]
pub struct ProgressRecord {
    pub job_id: JobId,
    pub stage: JobStage,
    pub progress_percent: u8,
    pub message: Option<String>,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub partition_statuses: Option<Vec<serde_json::Value>>,
    pub updated_at: Timestamp,
}

/// One raw observation to fold into a record.
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    pub stage: JobStage,
    pub current: Option<u64>,
    pub total: Option<u64>,
    pub message: Option<String>,
    pub partition_statuses: Option<Vec<serde_json::Value>>,
}

impl ProgressUpdate {
    pub fn stage(stage: JobStage) -> Self {
        Self {
            stage,
            current: None,
            total: None,
            message: None,
            partition_statuses: None,
        }
    }

    pub fn with_counts(mut self, current: u64, total: u64) -> Self {
        self.current = Some(current);
        self.total = Some(total);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Normalize a worker `/progress` body. Returns `None` for stages the
    /// worker uses when it has no record yet (`unknown`) or that do not
    /// map onto a known stage.
    pub fn from_worker(raw: WorkerProgress) -> Option<Self> {
        let stage = JobStage::from_worker(&raw.stage)?;
        Some(Self {
            stage,
            current: raw.current,
            total: raw.total,
            message: raw.message,
            partition_statuses: raw.partition_statuses,
        })
    }
}

/// In-memory record store keyed by job id.
#[derive(Default)]
pub struct ProgressStore {
    records: RwLock<HashMap<JobId, ProgressRecord>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold an update into the job's record, creating it on first use.
    ///
    /// The stored percent is the max of the previous percent and the
    /// update's interpolated percent.
    pub async fn update(&self, job_id: &str, update: ProgressUpdate) -> ProgressRecord {
        let computed = update.stage.percent(update.current, update.total);
        let mut records = self.records.write().await;

        let previous = records.get(job_id).map(|r| r.progress_percent).unwrap_or(0);
        let record = ProgressRecord {
            job_id: job_id.to_string(),
            stage: update.stage,
            progress_percent: previous.max(computed),
            message: update.message,
            current: update.current,
            total: update.total,
            partition_statuses: update.partition_statuses,
            updated_at: chrono::Utc::now(),
        };
        records.insert(job_id.to_string(), record.clone());
        record
    }

    pub async fn get(&self, job_id: &str) -> Option<ProgressRecord> {
        self.records.read().await.get(job_id).cloned()
    }

    pub async fn remove(&self, job_id: &str) -> Option<ProgressRecord> {
        self.records.write().await.remove(job_id)
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }

    /// Drop records not updated within `retention`. Returns how many were
    /// evicted.
    pub async fn evict_older_than(&self, retention: Duration) -> usize {
        let cutoff = chrono::Utc::now()
            - chrono::Duration::from_std(retention).unwrap_or_else(|_| chrono::Duration::weeks(52));
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, r| r.updated_at >= cutoff);
        before - records.len()
    }
}

/// Periodically evict stale progress records until `cancel` fires.
pub async fn run_retention(
    store: Arc<ProgressStore>,
    retention: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        retention_secs = retention.as_secs(),
        interval_secs = sweep_interval.as_secs(),
        "Progress retention job started"
    );

    let mut interval = tokio::time::interval(sweep_interval);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Progress retention job stopping");
                break;
            }
            _ = interval.tick() => {
                let evicted = store.evict_older_than(retention).await;
                if evicted > 0 {
                    tracing::info!(evicted, "Progress retention: evicted stale records");
                } else {
                    tracing::debug!("Progress retention: nothing to evict");
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// ProgressAggregator
// ---------------------------------------------------------------------------

/// Polls the worker for the active job's progress and republishes it.
pub struct ProgressAggregator {
    api: WorkerApi,
    store: Arc<ProgressStore>,
    broadcaster: Arc<EventBroadcaster>,
    config: ProgressConfig,
    pollers: Mutex<HashMap<JobId, CancellationToken>>,
    /// Held across store update and emit so subscribers see records in
    /// store order.
    publish_lock: Arc<tokio::sync::Mutex<()>>,
}

impl ProgressAggregator {
    pub fn new(
        api: WorkerApi,
        store: Arc<ProgressStore>,
        broadcaster: Arc<EventBroadcaster>,
        config: ProgressConfig,
    ) -> Self {
        Self {
            api,
            store,
            broadcaster,
            config,
            pollers: Mutex::new(HashMap::new()),
            publish_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn store(&self) -> &Arc<ProgressStore> {
        &self.store
    }

    /// Store an update and emit it as a `progress` event.
    pub async fn report(&self, job_id: &str, update: ProgressUpdate) -> ProgressRecord {
        publish(&self.publish_lock, &self.store, &self.broadcaster, job_id, update).await
    }

    /// Start polling `GET {endpoint}/progress/{job_id}` at the configured
    /// interval. Replaces any poller already running for the job.
    pub fn start_polling(&self, job_id: &str, endpoint: &str) {
        let cancel = CancellationToken::new();
        if let Some(previous) = self
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(job_id.to_string(), cancel.clone())
        {
            previous.cancel();
        }

        let poller = Poller {
            api: self.api.clone(),
            store: Arc::clone(&self.store),
            broadcaster: Arc::clone(&self.broadcaster),
            publish_lock: Arc::clone(&self.publish_lock),
            job_id: job_id.to_string(),
            endpoint: endpoint.to_string(),
            interval: self.config.poll_interval,
            timeout: self.config.poll_timeout,
        };
        tracing::debug!(job_id, endpoint, "Progress polling started");
        tokio::spawn(poller.run(cancel));
    }

    /// Stop the job's poller. Returns `false` if none was running.
    pub fn stop_polling(&self, job_id: &str) -> bool {
        let removed = self
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(job_id);
        match removed {
            Some(cancel) => {
                cancel.cancel();
                tracing::debug!(job_id, "Progress polling stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_polling(&self, job_id: &str) -> bool {
        self.pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(job_id)
    }
}

async fn publish(
    lock: &tokio::sync::Mutex<()>,
    store: &ProgressStore,
    broadcaster: &EventBroadcaster,
    job_id: &str,
    update: ProgressUpdate,
) -> ProgressRecord {
    let _guard = lock.lock().await;
    let record = store.update(job_id, update).await;
    let payload = serde_json::to_value(&record).unwrap_or_default();
    broadcaster.emit_to(job_id, EVENT_PROGRESS, payload).await;
    record
}

struct Poller {
    api: WorkerApi,
    store: Arc<ProgressStore>,
    broadcaster: Arc<EventBroadcaster>,
    publish_lock: Arc<tokio::sync::Mutex<()>>,
    job_id: JobId,
    endpoint: String,
    interval: Duration,
    timeout: Duration,
}

impl Poller {
    async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let result = tokio::select! {
                        _ = cancel.cancelled() => break,
                        result = self.api.progress(&self.endpoint, &self.job_id, self.timeout) => result,
                    };
                    match result {
                        Ok(raw) => match ProgressUpdate::from_worker(raw) {
                            // Terminal stages are reported by the runner, not the poller.
                            Some(update) if !update.stage.is_terminal() => {
                                publish(
                                    &self.publish_lock,
                                    &self.store,
                                    &self.broadcaster,
                                    &self.job_id,
                                    update,
                                )
                                .await;
                            }
                            _ => {}
                        },
                        Err(e) => {
                            tracing::debug!(job_id = %self.job_id, error = %e, "Progress poll failed");
                        }
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn percent_never_decreases_across_stages() {
        let store = ProgressStore::new();

        let generating = store
            .update("job", ProgressUpdate::stage(JobStage::Generating).with_counts(864, 900))
            .await;
        assert_eq!(generating.progress_percent, 24);

        let removing = store
            .update(
                "job",
                ProgressUpdate::stage(JobStage::RemovingBackground).with_counts(45, 900),
            )
            .await;
        assert!(removing.progress_percent >= 24);
        assert_eq!(removing.progress_percent, 26);
    }

    #[tokio::test]
    async fn regressing_report_keeps_previous_percent() {
        let store = ProgressStore::new();
        store
            .update("job", ProgressUpdate::stage(JobStage::Stitching).with_counts(8, 8))
            .await;
        let record = store
            .update("job", ProgressUpdate::stage(JobStage::Generating).with_counts(1, 900))
            .await;
        assert_eq!(record.progress_percent, 85);
        assert_eq!(record.stage, JobStage::Generating);
    }

    #[tokio::test]
    async fn records_are_per_job() {
        let store = ProgressStore::new();
        store
            .update("a", ProgressUpdate::stage(JobStage::Encoding))
            .await;
        let b = store
            .update("b", ProgressUpdate::stage(JobStage::Generating))
            .await;
        assert_eq!(b.progress_percent, 5);
        assert_eq!(store.get("a").await.unwrap().progress_percent, 85);
        assert_eq!(store.len().await, 2);
        assert!(store.remove("a").await.is_some());
        assert!(store.get("a").await.is_none());
    }

    #[tokio::test]
    async fn eviction_respects_retention() {
        let store = ProgressStore::new();
        store.update("old", ProgressUpdate::stage(JobStage::Complete)).await;
        {
            let mut records = store.records.write().await;
            let old = records.get_mut("old").unwrap();
            old.updated_at = chrono::Utc::now() - chrono::Duration::hours(2);
        }
        store.update("fresh", ProgressUpdate::stage(JobStage::Generating)).await;

        assert_eq!(store.evict_older_than(Duration::from_secs(3600)).await, 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }

    #[test]
    fn unknown_worker_stage_is_skipped() {
        let raw = WorkerProgress {
            stage: "unknown".into(),
            current: None,
            total: None,
            message: None,
            partition_statuses: None,
        };
        assert!(ProgressUpdate::from_worker(raw).is_none());
    }

    #[test]
    fn worker_saving_maps_to_stitching() {
        let raw = WorkerProgress {
            stage: "saving".into(),
            current: Some(2),
            total: Some(4),
            message: Some("Saving sprites".into()),
            partition_statuses: None,
        };
        let update = ProgressUpdate::from_worker(raw).unwrap();
        assert_eq!(update.stage, JobStage::Stitching);
        assert_eq!(update.stage.percent(update.current, update.total), 65);
    }

    #[tokio::test]
    async fn report_emits_progress_event() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let aggregator = ProgressAggregator::new(
            WorkerApi::new(),
            Arc::new(ProgressStore::new()),
            Arc::clone(&broadcaster),
            ProgressConfig::default(),
        );
        let mut sub = broadcaster.subscribe("job").await;

        aggregator
            .report("job", ProgressUpdate::stage(JobStage::Uploading).with_counts(1, 2))
            .await;

        let event = sub.receiver.try_recv().unwrap();
        assert_eq!(event.event, EVENT_PROGRESS);
        assert_eq!(event.payload["stage"], "uploading");
        assert_eq!(event.payload["progress_percent"], 92);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_reports_are_emitted_in_order() {
        let broadcaster = Arc::new(EventBroadcaster::new());
        let aggregator = Arc::new(ProgressAggregator::new(
            WorkerApi::new(),
            Arc::new(ProgressStore::new()),
            Arc::clone(&broadcaster),
            ProgressConfig::default(),
        ));

        for round in 0..100 {
            let job_id = format!("job-{round}");
            let mut sub = broadcaster.subscribe(job_id.clone()).await;

            let handles: Vec<_> = (1..=20u64)
                .map(|i| {
                    let aggregator = Arc::clone(&aggregator);
                    let job_id = job_id.clone();
                    tokio::spawn(async move {
                        aggregator
                            .report(
                                &job_id,
                                ProgressUpdate::stage(JobStage::Stitching).with_counts(i, 20),
                            )
                            .await;
                    })
                })
                .collect();
            for handle in handles {
                handle.await.unwrap();
            }

            let mut last = 0u64;
            let mut received = 0;
            while let Ok(event) = sub.receiver.try_recv() {
                let percent = event.payload["progress_percent"].as_u64().unwrap();
                assert!(percent >= last, "{job_id}: {percent} after {last}");
                last = percent;
                received += 1;
            }
            assert_eq!(received, 20);
            assert_eq!(last, 85);
        }
    }

    #[tokio::test]
    async fn stop_polling_is_idempotent() {
        let aggregator = ProgressAggregator::new(
            WorkerApi::new(),
            Arc::new(ProgressStore::new()),
            Arc::new(EventBroadcaster::new()),
            ProgressConfig::default(),
        );
        aggregator.start_polling("job", "http://127.0.0.1:1");
        assert!(aggregator.is_polling("job"));
        assert!(aggregator.stop_polling("job"));
        assert!(!aggregator.stop_polling("job"));
        assert!(!aggregator.is_polling("job"));
    }
}
