//! In-process publish/subscribe for job and accelerator updates.
//!
//! - [`EventBroadcaster`]: keyed subscriber registry with `emit_to` /
//!   `emit_all`.
//! - [`BroadcastEvent`]: the envelope delivered to subscribers.
//!
//! Delivery is best-effort: a subscriber that is gone simply misses the
//! event. Durable state lives in the progress store and artifact storage.

pub mod broadcaster;

pub use broadcaster::{BroadcastEvent, EventBroadcaster, Subscription, SubscriptionId};
