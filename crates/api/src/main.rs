use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use gazer_accelerator::{AcceleratorConfig, AcceleratorManager};
use gazer_events::EventBroadcaster;
use gazer_pipeline::progress::run_retention;
use gazer_pipeline::{
    forward, JobRunner, ProgressAggregator, ProgressConfig, ProgressStore, QueueConfig,
    QueueManager,
};
use gazer_storage::{StorageConfig, StorageGateway};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gazer_api::config::ServerConfig;
use gazer_api::router::build_app_router;
use gazer_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "gazer_api=debug,gazer_pipeline=debug,gazer_accelerator=debug,tower_http=debug"
                    .into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    let queue_config = QueueConfig::from_env();
    let progress_config = ProgressConfig::from_env();
    let accelerator_config = AcceleratorConfig::from_env();
    let storage_config = StorageConfig::from_env();
    tracing::info!(
        host = %config.host,
        port = config.port,
        capacity = queue_config.capacity,
        remote_storage = storage_config.remote.is_some(),
        "Loaded configuration",
    );

    // --- Storage ---
    let storage = Arc::new(StorageGateway::from_config(&storage_config));
    let report = storage.recover_orphans().await;
    if !report.errors.is_empty() {
        tracing::warn!(errors = ?report.errors, "Some orphaned jobs could not be recovered");
    }

    // --- Components ---
    let broadcaster = Arc::new(EventBroadcaster::new());
    let queue = Arc::new(QueueManager::new(queue_config.capacity));
    let accelerator = Arc::new(AcceleratorManager::new(accelerator_config));
    let progress_store = Arc::new(ProgressStore::new());
    let progress = Arc::new(ProgressAggregator::new(
        accelerator.api().clone(),
        Arc::clone(&progress_store),
        Arc::clone(&broadcaster),
        progress_config.clone(),
    ));

    // --- Background tasks ---
    let cancel = CancellationToken::new();

    let runner = Arc::new(JobRunner::new(
        Arc::clone(&queue),
        Arc::clone(&accelerator),
        Arc::clone(&storage),
        Arc::clone(&progress),
        Arc::clone(&broadcaster),
    ));
    let runner_handle = tokio::spawn(runner.run(cancel.clone()));

    let queue_forward_handle = tokio::spawn(forward::forward_queue_events(
        Arc::clone(&queue),
        Arc::clone(&broadcaster),
        cancel.clone(),
    ));
    let status_forward_handle = tokio::spawn(forward::forward_accelerator_status(
        Arc::clone(&accelerator),
        Arc::clone(&broadcaster),
        cancel.clone(),
    ));
    let retention_handle = tokio::spawn(run_retention(
        progress_store,
        progress_config.retention,
        progress_config.sweep_interval,
        cancel.clone(),
    ));
    tracing::info!("Background tasks started (runner, forwarders, progress retention)");

    // --- App state ---
    let state = AppState {
        config: Arc::new(config.clone()),
        queue,
        accelerator: Arc::clone(&accelerator),
        storage,
        progress,
        broadcaster: Arc::clone(&broadcaster),
    };

    let app = build_app_router(state, &config);

    // --- Start server ---
    let host = match config.host.parse() {
        Ok(host) => host,
        Err(e) => {
            tracing::error!(host = %config.host, error = %e, "Invalid HOST address");
            return;
        }
    };
    let addr = SocketAddr::new(host, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(%addr, error = %e, "Failed to bind to address");
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %e, "Server error");
    }

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    cancel.cancel();
    for handle in [
        runner_handle,
        queue_forward_handle,
        status_forward_handle,
        retention_handle,
    ] {
        let _ = tokio::time::timeout(grace, handle).await;
    }
    tracing::info!("Background tasks stopped");

    if tokio::time::timeout(grace, accelerator.shutdown()).await.is_err() {
        tracing::warn!("Accelerator shutdown timed out");
    }

    let subscribers = broadcaster.subscriber_count().await;
    tracing::info!(subscribers, "Closing remaining event subscriptions");
    broadcaster.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for SIGINT (Ctrl-C) or, on Unix, SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
