//! Event names delivered through the broadcaster to job subscribers.
//!
//! Used by the pipeline when fanning out queue, progress, and terminal
//! updates, and by the WebSocket route when framing them.

/// Queue position changed (payload: `{job_id, position}`).
pub const EVENT_QUEUE_POSITION: &str = "queue-position";

/// Normalized progress record for a job.
pub const EVENT_PROGRESS: &str = "progress";

/// Job finished and its artifacts are stored.
pub const EVENT_COMPLETE: &str = "complete";

/// Job failed with a terminal error.
pub const EVENT_ERROR: &str = "error";

/// A queued job was cancelled before dispatch.
pub const EVENT_CANCELLED: &str = "cancelled";

/// Accelerator lifecycle state changed (sent to everyone).
pub const EVENT_ACCELERATOR_STATUS: &str = "accelerator-status";
