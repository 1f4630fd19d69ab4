//! Bridges queue and accelerator changes onto the event broadcaster.

use std::sync::Arc;

use gazer_accelerator::AcceleratorManager;
use gazer_core::job_events::{EVENT_ACCELERATOR_STATUS, EVENT_CANCELLED, EVENT_QUEUE_POSITION};
use gazer_events::EventBroadcaster;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::queue::{QueueEvent, QueueManager};

/// Publish every accelerator state change to all subscribers.
pub async fn forward_accelerator_status(
    accelerator: Arc<AcceleratorManager>,
    broadcaster: Arc<EventBroadcaster>,
    cancel: CancellationToken,
) {
    let mut rx = accelerator.subscribe();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = rx.borrow_and_update().clone();
                let payload = serde_json::to_value(&state).unwrap_or_default();
                broadcaster.emit_all(EVENT_ACCELERATOR_STATUS, payload).await;
            }
        }
    }
}

/// Turn queue events into per-job `queue-position` and `cancelled`
/// events.
pub async fn forward_queue_events(
    queue: Arc<QueueManager>,
    broadcaster: Arc<EventBroadcaster>,
    cancel: CancellationToken,
) {
    let mut rx = queue.subscribe();

    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = rx.recv() => event,
        };

        match event {
            Ok(event) => publish_queue_event(&broadcaster, event).await,
            Err(RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "Queue event forwarder lagged");
                // Resync every queued job's position.
                let snapshot = queue.snapshot();
                let positions = snapshot
                    .queued
                    .iter()
                    .enumerate()
                    .map(|(i, job)| (job.id.clone(), i + 1 + usize::from(snapshot.active.is_some())))
                    .collect();
                publish_queue_event(&broadcaster, QueueEvent::PositionsUpdated(positions)).await;
            }
            Err(RecvError::Closed) => break,
        }
    }
}

async fn publish_queue_event(broadcaster: &EventBroadcaster, event: QueueEvent) {
    match event {
        QueueEvent::ItemAdded { job_id, position } => {
            emit_position(broadcaster, &job_id, position, false).await;
        }
        QueueEvent::PositionsUpdated(positions) => {
            for (job_id, position) in positions {
                emit_position(broadcaster, &job_id, position, false).await;
            }
        }
        QueueEvent::ItemRemoved { job_id } => {
            broadcaster
                .emit_to(&job_id, EVENT_CANCELLED, serde_json::json!({ "job_id": job_id }))
                .await;
        }
        QueueEvent::ProcessStart(job) => {
            emit_position(broadcaster, &job.id, 1, true).await;
        }
    }
}

async fn emit_position(broadcaster: &EventBroadcaster, job_id: &str, position: usize, active: bool) {
    broadcaster
        .emit_to(
            job_id,
            EVENT_QUEUE_POSITION,
            serde_json::json!({
                "job_id": job_id,
                "position": position,
                "active": active,
            }),
        )
        .await;
}

#[cfg(test)]
mod tests {
    use gazer_core::job::Job;

    use super::*;

    #[tokio::test]
    async fn process_start_is_position_one() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe("a").await;

        let job = Job::with_id("a", "tester", "/tmp/a.jpg", false);
        publish_queue_event(&broadcaster, QueueEvent::ProcessStart(job)).await;

        let event = sub.receiver.try_recv().unwrap();
        assert_eq!(event.event, EVENT_QUEUE_POSITION);
        assert_eq!(event.payload["position"], 1);
        assert_eq!(event.payload["active"], true);
    }

    #[tokio::test]
    async fn positions_fan_out_per_job() {
        let broadcaster = EventBroadcaster::new();
        let mut b = broadcaster.subscribe("b").await;
        let mut c = broadcaster.subscribe("c").await;

        publish_queue_event(
            &broadcaster,
            QueueEvent::PositionsUpdated(vec![("b".into(), 2), ("c".into(), 3)]),
        )
        .await;

        assert_eq!(b.receiver.try_recv().unwrap().payload["position"], 2);
        assert_eq!(c.receiver.try_recv().unwrap().payload["position"], 3);
    }

    #[tokio::test]
    async fn removal_becomes_cancelled() {
        let broadcaster = EventBroadcaster::new();
        let mut sub = broadcaster.subscribe("b").await;

        publish_queue_event(&broadcaster, QueueEvent::ItemRemoved { job_id: "b".into() }).await;

        let event = sub.receiver.try_recv().unwrap();
        assert_eq!(event.event, EVENT_CANCELLED);
        assert_eq!(event.payload["job_id"], "b");
    }

    #[tokio::test]
    async fn forwarder_relays_live_queue_events() {
        let queue = Arc::new(QueueManager::new(5));
        let broadcaster = Arc::new(EventBroadcaster::new());
        let cancel = CancellationToken::new();
        let mut sub = broadcaster.subscribe("a").await;

        let task = tokio::spawn(forward_queue_events(
            Arc::clone(&queue),
            Arc::clone(&broadcaster),
            cancel.clone(),
        ));
        // Let the forwarder subscribe.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        queue
            .add(Job::with_id("a", "tester", "/tmp/a.jpg", false))
            .unwrap();

        let first = tokio::time::timeout(std::time::Duration::from_secs(2), sub.receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.event, EVENT_QUEUE_POSITION);
        assert_eq!(first.payload["position"], 1);

        cancel.cancel();
        task.await.unwrap();
    }
}
