use std::time::Duration;

use axum::body::Bytes;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use gazer_core::job::validate_job_id;
use gazer_core::job_events::{EVENT_ACCELERATOR_STATUS, EVENT_PROGRESS, EVENT_QUEUE_POSITION};
use gazer_events::BroadcastEvent;
use serde::Deserialize;

use crate::error::AppResult;
use crate::state::AppState;

/// Interval between heartbeat pings.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Subscription key for connections without a job. Never a valid job id,
/// so only `emit_all` events reach it.
pub const STATUS_ONLY_KEY: &str = "*";

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub job_id: Option<String>,
}

/// GET /ws?job_id=...
///
/// Upgrades to a WebSocket streaming the job's events. Without `job_id`
/// only accelerator status is streamed.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
) -> AppResult<impl IntoResponse> {
    if let Some(job_id) = &query.job_id {
        validate_job_id(job_id)?;
    }
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, query.job_id)))
}

/// Manage a single WebSocket connection after upgrade.
///
/// Splits the socket into a sink and a stream, then:
///   1. Subscribes to the broadcaster under the job id.
///   2. Spawns a sender task that replays the current snapshot, then
///      forwards events and heartbeat pings.
///   3. Drains inbound messages on the current task.
///   4. Unsubscribes on disconnect.
async fn handle_socket(socket: WebSocket, state: AppState, job_id: Option<String>) {
    let key = job_id.clone().unwrap_or_else(|| STATUS_ONLY_KEY.to_string());
    let mut subscription = state.broadcaster.subscribe(key).await;
    let subscription_id = subscription.id;
    tracing::info!(subscription_id, job_id = ?job_id, "WebSocket connected");

    let initial = snapshot_events(&state, job_id.as_deref()).await;
    let (mut sink, mut stream) = socket.split();

    let send_task = tokio::spawn(async move {
        for event in &initial {
            if send_event(&mut sink, event).await.is_err() {
                return;
            }
        }

        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;

        loop {
            tokio::select! {
                event = subscription.receiver.recv() => match event {
                    Some(event) => {
                        if send_event(&mut sink, &event).await.is_err() {
                            tracing::debug!(subscription_id, "WebSocket sink closed");
                            break;
                        }
                    }
                    None => {
                        // Broadcaster shut down.
                        let _ = sink.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = heartbeat.tick() => {
                    if sink.send(Message::Ping(Bytes::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    while let Some(result) = stream.next().await {
        match result {
            Ok(Message::Close(_)) => break,
            Ok(Message::Pong(_)) => {
                tracing::trace!(subscription_id, "Pong received");
            }
            Ok(_) => {}
            Err(e) => {
                tracing::debug!(subscription_id, error = %e, "WebSocket receive error");
                break;
            }
        }
    }

    state.broadcaster.unsubscribe(subscription_id).await;
    send_task.abort();
    tracing::info!(subscription_id, "WebSocket disconnected");
}

/// Current accelerator status, plus the job's position and latest
/// progress, so a late subscriber does not wait for the next change.
async fn snapshot_events(state: &AppState, job_id: Option<&str>) -> Vec<BroadcastEvent> {
    let mut events = vec![BroadcastEvent::new(
        EVENT_ACCELERATOR_STATUS,
        None,
        serde_json::to_value(state.accelerator.state()).unwrap_or_default(),
    )];

    let Some(job_id) = job_id else {
        return events;
    };

    if let Some(position) = state.queue.position(job_id) {
        events.push(BroadcastEvent::new(
            EVENT_QUEUE_POSITION,
            Some(job_id),
            serde_json::json!({
                "job_id": job_id,
                "position": position,
                "active": position == 1 && state.queue.is_processing(),
            }),
        ));
    }
    if let Some(record) = state.progress.store().get(job_id).await {
        events.push(BroadcastEvent::new(
            EVENT_PROGRESS,
            Some(job_id),
            serde_json::to_value(record).unwrap_or_default(),
        ));
    }
    events
}

async fn send_event(
    sink: &mut SplitSink<WebSocket, Message>,
    event: &BroadcastEvent,
) -> Result<(), axum::Error> {
    let text = serde_json::to_string(event).unwrap_or_default();
    sink.send(Message::Text(text.into())).await
}
