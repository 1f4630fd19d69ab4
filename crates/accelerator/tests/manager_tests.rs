//! Provisioning tests that launch a scripted shell command and probe a
//! fake worker bound to an ephemeral port.
#![cfg(unix)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use gazer_accelerator::{AcceleratorConfig, AcceleratorError, AcceleratorManager, AcceleratorStage};

async fn spawn_healthy_worker() -> u16 {
    let app = Router::new().route(
        "/health",
        get(|| async { Json(serde_json::json!({"status": "ok", "models_loaded": true})) }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Health switches for a fake worker whose `/health` can be made to fail.
#[derive(Default)]
struct HealthSwitch {
    /// Fail exactly one probe, then recover.
    fail_next: AtomicBool,
    /// Fail every probe.
    down: AtomicBool,
}

async fn spawn_switchable_worker(switch: Arc<HealthSwitch>) -> u16 {
    let app = Router::new().route(
        "/health",
        get(move || {
            let switch = Arc::clone(&switch);
            async move {
                if switch.down.load(Ordering::SeqCst) || switch.fail_next.swap(false, Ordering::SeqCst) {
                    (
                        StatusCode::SERVICE_UNAVAILABLE,
                        Json(serde_json::json!({"detail": "worker gone"})),
                    )
                } else {
                    (
                        StatusCode::OK,
                        Json(serde_json::json!({"status": "ok", "models_loaded": true})),
                    )
                }
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    port
}

/// Launch script that records each launch in `log` before announcing the
/// worker on `port`.
fn counting_script(log: &std::path::Path, port: u16) -> String {
    format!(
        "echo launch >> {}; echo remote 8000 -> local {port}; echo Uvicorn running; exec sleep 30",
        log.display()
    )
}

fn launches(log: &std::path::Path) -> usize {
    std::fs::read_to_string(log).map(|s| s.lines().count()).unwrap_or(0)
}

/// Config whose initial endpoint (port 1) never answers, so the worker is
/// only reachable after a remap line.
fn scripted_config(script: &str, attempts: u32) -> AcceleratorConfig {
    AcceleratorConfig {
        launch_command: vec!["sh".into(), "-c".into(), script.into()],
        stop_command: Vec::new(),
        host: "127.0.0.1".into(),
        local_port: 1,
        remote_port: 8000,
        health_interval: Duration::from_millis(50),
        health_attempts: attempts,
        health_timeout: Duration::from_secs(1),
        shutdown_timeout: Duration::from_secs(2),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// Test: scripted log lines drive provisioning to ready
// ---------------------------------------------------------------------------

#[tokio::test]
async fn provisions_through_remap_to_ready() {
    let port = spawn_healthy_worker().await;
    let script = format!(
        "echo Provisioning pod; echo Syncing 3/10 files; \
         echo remote 8000 -> local {port}; echo Uvicorn running; exec sleep 30"
    );
    let manager = AcceleratorManager::new(scripted_config(&script, 100));

    let endpoint = manager.ensure_ready().await.expect("accelerator should become ready");
    assert_eq!(endpoint, format!("http://127.0.0.1:{port}"));

    let state = manager.state();
    assert_eq!(state.stage, AcceleratorStage::Ready);
    assert_eq!(state.progress_percent, 100);

    // Already ready: the second call only probes.
    let again = manager.ensure_ready().await.expect("still ready");
    assert_eq!(again, endpoint);

    manager.shutdown().await;
    let state = manager.state();
    assert_eq!(state.stage, AcceleratorStage::Idle);
    assert!(state.worker_endpoint.is_none());
}

// ---------------------------------------------------------------------------
// Test: process exit before health
// ---------------------------------------------------------------------------

#[tokio::test]
async fn exited_process_is_unavailable() {
    let manager = AcceleratorManager::new(scripted_config("echo Provisioning pod", 100));

    let result = manager.ensure_ready().await;
    assert_matches!(result, Err(AcceleratorError::Unavailable(_)));
    assert_eq!(manager.state().stage, AcceleratorStage::Offline);
}

// ---------------------------------------------------------------------------
// Test: health bound exceeded
// ---------------------------------------------------------------------------

#[tokio::test]
async fn health_bound_exceeded_is_unavailable() {
    let manager = AcceleratorManager::new(scripted_config("echo Connecting; exec sleep 30", 3));

    let result = manager.ensure_ready().await;
    assert_matches!(result, Err(AcceleratorError::Unavailable(msg)) if msg.contains("3 attempts"));
    assert_eq!(manager.state().stage, AcceleratorStage::Offline);
}

// ---------------------------------------------------------------------------
// Test: unlaunchable command
// ---------------------------------------------------------------------------

#[tokio::test]
async fn missing_program_is_spawn_error() {
    let mut config = scripted_config("", 3);
    config.launch_command = vec!["/nonexistent/gazer-launcher".into()];
    let manager = AcceleratorManager::new(config);

    assert_matches!(manager.ensure_ready().await, Err(AcceleratorError::Spawn(_)));
    assert_eq!(manager.state().stage, AcceleratorStage::Offline);
}

// ---------------------------------------------------------------------------
// Test: failed stop command is not fatal
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_tolerates_failing_stop_command() {
    let mut config = scripted_config("sleep 30", 3);
    config.stop_command = vec!["sh".into(), "-c".into(), "exit 3".into()];
    let manager = AcceleratorManager::new(config);

    manager.ingest_line("Provisioning pod");
    manager.shutdown().await;
    assert_eq!(manager.state().stage, AcceleratorStage::Idle);
}

// ---------------------------------------------------------------------------
// Test: a ready worker that fails its health probe is re-provisioned
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_probe_reprovisions_ready_worker() {
    let switch = Arc::new(HealthSwitch::default());
    let port = spawn_switchable_worker(Arc::clone(&switch)).await;
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("launches");
    let manager = AcceleratorManager::new(scripted_config(&counting_script(&log, port), 100));

    let endpoint = manager.ensure_ready().await.expect("first provisioning");
    assert_eq!(manager.state().stage, AcceleratorStage::Ready);
    assert_eq!(launches(&log), 1);

    switch.fail_next.store(true, Ordering::SeqCst);
    let again = manager.ensure_ready().await.expect("re-provisioned");
    assert_eq!(again, endpoint);
    assert_eq!(manager.state().stage, AcceleratorStage::Ready);
    assert_eq!(launches(&log), 2);

    manager.shutdown().await;
}

#[tokio::test]
async fn unhealthy_ready_worker_goes_offline() {
    let switch = Arc::new(HealthSwitch::default());
    let port = spawn_switchable_worker(Arc::clone(&switch)).await;
    let dir = tempfile::tempdir().unwrap();
    let log = dir.path().join("launches");
    let manager = AcceleratorManager::new(scripted_config(&counting_script(&log, port), 20));

    manager.ensure_ready().await.expect("first provisioning");
    assert_eq!(launches(&log), 1);

    switch.down.store(true, Ordering::SeqCst);
    let result = manager.ensure_ready().await;
    assert_matches!(result, Err(AcceleratorError::Unavailable(_)));
    assert_eq!(manager.state().stage, AcceleratorStage::Offline);
    assert_eq!(launches(&log), 2);

    manager.shutdown().await;
}
