#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::Response;
use axum::Router;
use http_body_util::BodyExt;
use tower::ServiceExt;

use gazer_accelerator::{AcceleratorConfig, AcceleratorManager, WorkerApi};
use gazer_api::config::ServerConfig;
use gazer_api::router::build_app_router;
use gazer_api::state::AppState;
use gazer_events::EventBroadcaster;
use gazer_pipeline::{ProgressAggregator, ProgressConfig, ProgressStore, QueueManager};
use gazer_storage::StorageGateway;

pub const REQUIRED: &[&str] = &["a.webp", "metadata.json"];

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        max_body_bytes: 8 * 1024 * 1024,
    }
}

/// Application under test. No runner is spawned, so admitted jobs stay
/// where admission put them.
pub struct TestApp {
    pub app: Router,
    pub state: AppState,
    _dir: tempfile::TempDir,
}

/// Build the full application router with all middleware layers over a
/// local-only storage gateway in a temp directory.
pub fn build_test_app(capacity: usize) -> TestApp {
    let dir = tempfile::tempdir().unwrap();
    let config = test_config();
    let broadcaster = Arc::new(EventBroadcaster::new());

    let state = AppState {
        config: Arc::new(config.clone()),
        queue: Arc::new(QueueManager::new(capacity)),
        accelerator: Arc::new(AcceleratorManager::new(AcceleratorConfig::default())),
        storage: Arc::new(StorageGateway::new(
            dir.path().join("results"),
            dir.path().join("staging"),
            REQUIRED.iter().map(|s| s.to_string()).collect(),
        )),
        progress: Arc::new(ProgressAggregator::new(
            WorkerApi::new(),
            Arc::new(ProgressStore::new()),
            Arc::clone(&broadcaster),
            ProgressConfig::default(),
        )),
        broadcaster,
    };

    TestApp {
        app: build_app_router(state.clone(), &config),
        state,
        _dir: dir,
    }
}

pub async fn send(app: &Router, method: Method, uri: &str, body: Option<serde_json::Value>) -> Response {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(json) => {
            builder = builder.header("content-type", "application/json");
            Body::from(serde_json::to_vec(&json).unwrap())
        }
        None => Body::empty(),
    };
    app.clone().oneshot(builder.body(body).unwrap()).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response {
    send(app, Method::GET, uri, None).await
}

pub async fn delete(app: &Router, uri: &str) -> Response {
    send(app, Method::DELETE, uri, None).await
}

pub async fn post_json(app: &Router, uri: &str, json: serde_json::Value) -> Response {
    send(app, Method::POST, uri, Some(json)).await
}

pub async fn body_bytes(response: Response) -> Vec<u8> {
    response.into_body().collect().await.unwrap().to_bytes().to_vec()
}

pub async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

/// A valid submission body ("jpeg" base64-encoded).
pub fn submission() -> serde_json::Value {
    serde_json::json!({ "image_base64": "anBlZw==", "remove_background": true })
}
