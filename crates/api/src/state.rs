use std::sync::Arc;

use gazer_accelerator::AcceleratorManager;
use gazer_events::EventBroadcaster;
use gazer_pipeline::{ProgressAggregator, QueueManager};
use gazer_storage::StorageGateway;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via
/// `State<AppState>`.
///
/// Cheap to clone: every component sits behind an `Arc`.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<ServerConfig>,
    pub queue: Arc<QueueManager>,
    pub accelerator: Arc<AcceleratorManager>,
    pub storage: Arc<StorageGateway>,
    pub progress: Arc<ProgressAggregator>,
    /// Fan-out hub the WebSocket route subscribes to.
    pub broadcaster: Arc<EventBroadcaster>,
}
