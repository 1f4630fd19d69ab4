//! End-to-end job execution against a scripted accelerator launch and a
//! fake worker bound to an ephemeral port.
#![cfg(unix)]

use std::io::{Cursor, Write};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use gazer_accelerator::{AcceleratorConfig, AcceleratorManager, WorkerApi};
use gazer_core::job::Job;
use gazer_core::job_events::{EVENT_COMPLETE, EVENT_ERROR, EVENT_PROGRESS};
use gazer_events::broadcaster::{BroadcastEvent, Subscription};
use gazer_events::EventBroadcaster;
use gazer_pipeline::{JobRunner, ProgressAggregator, ProgressConfig, ProgressStore, QueueManager};
use gazer_storage::{StorageError, StorageGateway};
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

const REQUIRED: &[&str] = &["a", "b", "c"];

// ---------------------------------------------------------------------------
// Fake worker
// ---------------------------------------------------------------------------

#[derive(Clone)]
struct WorkerBehaviour {
    generation_error: Option<&'static str>,
    archive_entries: &'static [&'static str],
}

impl Default for WorkerBehaviour {
    fn default() -> Self {
        Self {
            generation_error: None,
            archive_entries: REQUIRED,
        }
    }
}

async fn spawn_worker(behaviour: WorkerBehaviour) -> u16 {
    let app = Router::new()
        .route(
            "/health",
            get(|| async { Json(serde_json::json!({"status": "ok", "models_loaded": true})) }),
        )
        .route("/generate", post(generate))
        .route("/progress/{session_id}", get(progress))
        .route("/download/{session_id}", get(download))
        .with_state(behaviour);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

async fn generate(
    State(behaviour): State<WorkerBehaviour>,
    Json(body): Json<serde_json::Value>,
) -> impl IntoResponse {
    assert!(body["image_base64"].as_str().is_some_and(|s| !s.is_empty()));
    match behaviour.generation_error {
        Some(detail) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "detail": detail })),
        ),
        None => {
            // Leave the progress poller a few ticks.
            tokio::time::sleep(Duration::from_millis(150)).await;
            (
                StatusCode::OK,
                Json(serde_json::json!({ "status": "complete", "message": "done" })),
            )
        }
    }
}

async fn progress(Path(_session_id): Path<String>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "stage": "generating", "current": 450, "total": 900 }))
}

async fn download(
    State(behaviour): State<WorkerBehaviour>,
    Path(_session_id): Path<String>,
) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    let options =
        SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    for name in behaviour.archive_entries {
        writer.start_file(*name, options).unwrap();
        writer.write_all(name.as_bytes()).unwrap();
    }
    writer.start_file("stray.log", options).unwrap();
    writer.write_all(b"ignored").unwrap();
    writer.finish().unwrap().into_inner()
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    _dir: tempfile::TempDir,
    queue: Arc<QueueManager>,
    accelerator: Arc<AcceleratorManager>,
    storage: Arc<StorageGateway>,
    broadcaster: Arc<EventBroadcaster>,
    cancel: CancellationToken,
}

async fn harness(behaviour: WorkerBehaviour, capacity: usize) -> Harness {
    let port = spawn_worker(behaviour).await;
    let dir = tempfile::tempdir().unwrap();

    let script = format!(
        "echo Provisioning pod; echo Syncing 3/10 files; \
         echo remote 8000 -> local {port}; echo Uvicorn running; exec sleep 60"
    );
    let accelerator = Arc::new(AcceleratorManager::new(AcceleratorConfig {
        launch_command: vec!["sh".into(), "-c".into(), script],
        stop_command: Vec::new(),
        host: "127.0.0.1".into(),
        local_port: 1,
        remote_port: 8000,
        health_interval: Duration::from_millis(50),
        health_attempts: 100,
        health_timeout: Duration::from_secs(1),
        generation_timeout: Duration::from_secs(10),
        download_timeout: Duration::from_secs(10),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }));

    let storage = Arc::new(StorageGateway::new(
        dir.path().join("results"),
        dir.path().join("staging"),
        REQUIRED.iter().map(|s| s.to_string()).collect(),
    ));
    let broadcaster = Arc::new(EventBroadcaster::new());
    let progress = Arc::new(ProgressAggregator::new(
        WorkerApi::new(),
        Arc::new(ProgressStore::new()),
        Arc::clone(&broadcaster),
        ProgressConfig {
            poll_interval: Duration::from_millis(20),
            poll_timeout: Duration::from_secs(1),
            ..Default::default()
        },
    ));
    let queue = Arc::new(QueueManager::new(capacity));
    let cancel = CancellationToken::new();

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&queue),
        Arc::clone(&accelerator),
        Arc::clone(&storage),
        progress,
        Arc::clone(&broadcaster),
    ));
    tokio::spawn(runner.run(cancel.clone()));

    Harness {
        _dir: dir,
        queue,
        accelerator,
        storage,
        broadcaster,
        cancel,
    }
}

impl Harness {
    /// Stage an input, subscribe to the job, and admit it.
    async fn submit(&self, job_id: &str) -> Subscription {
        let input = self.storage.stage_input(job_id, b"jpeg bytes").await.unwrap();
        let sub = self.broadcaster.subscribe(job_id).await;
        let job = Job::with_id(job_id, "tester", input.to_string_lossy(), false);
        self.queue.add(job).unwrap();
        sub
    }

    async fn wait_idle(&self) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.queue.is_processing() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("queue should drain");
    }

    async fn teardown(self) {
        self.cancel.cancel();
        self.accelerator.shutdown().await;
    }
}

/// Collect events until a terminal `complete` or `error` arrives.
async fn until_terminal(sub: &mut Subscription) -> Vec<BroadcastEvent> {
    let mut events = Vec::new();
    tokio::time::timeout(Duration::from_secs(30), async {
        while let Some(event) = sub.receiver.recv().await {
            let terminal = event.event == EVENT_COMPLETE || event.event == EVENT_ERROR;
            events.push(event);
            if terminal {
                break;
            }
        }
    })
    .await
    .expect("job should reach a terminal event");
    events
}

fn percents(events: &[BroadcastEvent]) -> Vec<u64> {
    events
        .iter()
        .filter(|e| e.event == EVENT_PROGRESS)
        .filter_map(|e| e.payload["progress_percent"].as_u64())
        .collect()
}

// ---------------------------------------------------------------------------
// Test: provisioning, generation and transfer
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn job_runs_end_to_end() {
    let h = harness(WorkerBehaviour::default(), 1).await;

    let mut sub = h.submit("job-1").await;
    let events = until_terminal(&mut sub).await;

    let last = events.last().unwrap();
    assert_eq!(last.event, EVENT_COMPLETE);
    assert_eq!(last.payload["status"], "done");
    assert_eq!(last.payload["artifacts"], serde_json::json!(["a", "b", "c"]));
    assert_eq!(last.payload["backend_presence"]["local"], true);

    let progress = percents(&events);
    assert!(progress.windows(2).all(|w| w[0] <= w[1]), "{progress:?}");
    assert_eq!(progress.last().copied(), Some(100));

    for name in REQUIRED {
        assert_eq!(h.storage.read("job-1", name).await.unwrap(), name.as_bytes());
    }
    assert_eq!(h.storage.list().await.unwrap().len(), 1);

    h.wait_idle().await;
    assert!(h.queue.active().is_none());
    assert!(!h.storage.staging_dir("job-1").exists());

    h.teardown().await;
}

// ---------------------------------------------------------------------------
// Test: terminal failures still advance the queue
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn generation_failure_advances_queue() {
    let behaviour = WorkerBehaviour {
        generation_error: Some("CUDA out of memory"),
        ..Default::default()
    };
    let h = harness(behaviour, 2).await;

    let mut first = h.submit("job-1").await;
    let mut second = h.submit("job-2").await;

    for sub in [&mut first, &mut second] {
        let events = until_terminal(sub).await;
        let last = events.last().unwrap();
        assert_eq!(last.event, EVENT_ERROR);
        assert_eq!(last.payload["status"], "failed");
        assert_eq!(last.payload["code"], "GENERATION_FAILED");
        assert!(last.payload["message"]
            .as_str()
            .unwrap()
            .contains("CUDA out of memory"));
    }

    h.wait_idle().await;
    assert!(h.storage.list().await.unwrap().is_empty());
    h.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn incomplete_archive_is_transfer_failure() {
    let behaviour = WorkerBehaviour {
        archive_entries: &["a", "b"],
        ..Default::default()
    };
    let h = harness(behaviour, 1).await;

    let mut sub = h.submit("job-1").await;
    let events = until_terminal(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event, EVENT_ERROR);
    assert_eq!(last.payload["code"], "TRANSFER_FAILED");

    // Nothing partial is promoted.
    assert!(matches!(
        h.storage.read("job-1", "a").await,
        Err(StorageError::NotFound { .. })
    ));

    h.wait_idle().await;
    h.teardown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_input_is_reported() {
    let h = harness(WorkerBehaviour::default(), 1).await;

    let mut sub = h.broadcaster.subscribe("job-1").await;
    h.queue
        .add(Job::with_id("job-1", "tester", "/nonexistent/input.jpg", false))
        .unwrap();

    let events = until_terminal(&mut sub).await;
    let last = events.last().unwrap();
    assert_eq!(last.event, EVENT_ERROR);
    assert_eq!(last.payload["code"], "INPUT_UNAVAILABLE");

    h.wait_idle().await;
    h.teardown().await;
}
