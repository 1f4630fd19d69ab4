//! Integration tests for [`EventBroadcaster`] fan-out semantics.
//!
//! Exercises several subscribers sharing one key and ordering of events
//! delivered to a single subscriber.

use gazer_events::EventBroadcaster;

// ---------------------------------------------------------------------------
// Test: several subscribers on one key all receive the event
// ---------------------------------------------------------------------------

#[tokio::test]
async fn subscribers_sharing_a_key_each_receive_events() {
    let broadcaster = EventBroadcaster::new();
    let mut first = broadcaster.subscribe("job-1").await;
    let mut second = broadcaster.subscribe("job-1").await;

    let delivered = broadcaster
        .emit_to("job-1", "complete", serde_json::json!({"job_id": "job-1"}))
        .await;

    assert_eq!(delivered, 2);
    assert_eq!(first.receiver.recv().await.unwrap().event, "complete");
    assert_eq!(second.receiver.recv().await.unwrap().event, "complete");
}

// ---------------------------------------------------------------------------
// Test: events arrive in emission order
// ---------------------------------------------------------------------------

#[tokio::test]
async fn events_arrive_in_emission_order() {
    let broadcaster = EventBroadcaster::new();
    let mut sub = broadcaster.subscribe("job-2").await;

    for percent in [5, 10, 25, 60] {
        broadcaster
            .emit_to("job-2", "progress", serde_json::json!({ "percent": percent }))
            .await;
    }

    let mut seen = Vec::new();
    while let Ok(event) = sub.receiver.try_recv() {
        seen.push(event.payload["percent"].as_u64().unwrap());
    }
    assert_eq!(seen, vec![5, 10, 25, 60]);
}

// ---------------------------------------------------------------------------
// Test: shutdown_all closes every channel
// ---------------------------------------------------------------------------

#[tokio::test]
async fn shutdown_all_closes_channels() {
    let broadcaster = EventBroadcaster::new();
    let mut sub = broadcaster.subscribe("job-3").await;

    broadcaster.shutdown_all().await;

    assert_eq!(broadcaster.subscriber_count().await, 0);
    assert!(sub.receiver.recv().await.is_none());
}
