//! Keyed fan-out registry backed by per-subscriber unbounded channels.
//!
//! [`EventBroadcaster`] is designed to be shared via `Arc` across the
//! application. Each subscriber registers under a key (normally a job
//! id) and receives events emitted to that key plus every `emit_all`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use gazer_core::types::Timestamp;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};

/// Identifier handed out by [`EventBroadcaster::subscribe`].
pub type SubscriptionId = u64;

// ---------------------------------------------------------------------------
// BroadcastEvent
// ---------------------------------------------------------------------------

/// An event delivered to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastEvent {
    /// Event name, e.g. `"progress"` or `"accelerator-status"`.
    pub event: String,
    /// The key the event was emitted to; `None` for broadcast events.
    pub key: Option<String>,
    /// Event-specific JSON payload.
    pub payload: serde_json::Value,
    /// When the event was emitted (UTC).
    pub timestamp: Timestamp,
}

impl BroadcastEvent {
    pub fn new(event: &str, key: Option<&str>, payload: serde_json::Value) -> Self {
        Self {
            event: event.to_string(),
            key: key.map(str::to_string),
            payload,
            timestamp: chrono::Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving half of a registration.
///
/// Dropping the subscription closes the channel; the registry entry is
/// pruned on the next emit that reaches it, or immediately via
/// [`EventBroadcaster::unsubscribe`].
pub struct Subscription {
    pub id: SubscriptionId,
    pub key: String,
    pub receiver: mpsc::UnboundedReceiver<BroadcastEvent>,
}

struct Subscriber {
    key: String,
    sender: mpsc::UnboundedSender<BroadcastEvent>,
}

// ---------------------------------------------------------------------------
// EventBroadcaster
// ---------------------------------------------------------------------------

/// In-memory publish/subscribe hub.
pub struct EventBroadcaster {
    subscribers: RwLock<HashMap<SubscriptionId, Subscriber>>,
    next_id: AtomicU64,
}

impl EventBroadcaster {
    pub fn new() -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber under `key`.
    pub async fn subscribe(&self, key: impl Into<String>) -> Subscription {
        let key = key.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::unbounded_channel();

        self.subscribers.write().await.insert(
            id,
            Subscriber {
                key: key.clone(),
                sender,
            },
        );
        tracing::debug!(subscription_id = id, key = %key, "Subscriber registered");

        Subscription { id, key, receiver }
    }

    /// Remove a subscriber. Returns `false` if the id was unknown.
    pub async fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.subscribers.write().await.remove(&id).is_some();
        if removed {
            tracing::debug!(subscription_id = id, "Subscriber removed");
        }
        removed
    }

    /// Send an event to every subscriber registered under `key`.
    ///
    /// Returns the number of subscribers the event was delivered to.
    pub async fn emit_to(&self, key: &str, event: &str, payload: serde_json::Value) -> usize {
        let message = BroadcastEvent::new(event, Some(key), payload);
        self.deliver(message, |sub| sub.key == key).await
    }

    /// Send an event to every subscriber regardless of key.
    pub async fn emit_all(&self, event: &str, payload: serde_json::Value) -> usize {
        let message = BroadcastEvent::new(event, None, payload);
        self.deliver(message, |_| true).await
    }

    /// Number of registered subscribers.
    pub async fn subscriber_count(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Drop every registration, closing all subscriber channels.
    pub async fn shutdown_all(&self) {
        let mut subs = self.subscribers.write().await;
        let count = subs.len();
        subs.clear();
        tracing::info!(count, "Closed all event subscriptions");
    }

    // ---- private helpers ----

    async fn deliver<F>(&self, message: BroadcastEvent, filter: F) -> usize
    where
        F: Fn(&Subscriber) -> bool,
    {
        let mut delivered = 0;
        let mut closed = Vec::new();

        {
            let subs = self.subscribers.read().await;
            for (id, sub) in subs.iter().filter(|(_, sub)| filter(sub)) {
                if sub.sender.send(message.clone()).is_ok() {
                    delivered += 1;
                } else {
                    closed.push(*id);
                }
            }
        }

        if !closed.is_empty() {
            let mut subs = self.subscribers.write().await;
            for id in &closed {
                subs.remove(id);
            }
            tracing::debug!(pruned = closed.len(), "Pruned closed subscribers");
        }

        delivered
    }
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
