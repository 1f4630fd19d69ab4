//! Job admission, scheduling and execution.
//!
//! [`queue::QueueManager`] admits jobs and keeps at most one active;
//! [`runner::JobRunner`] executes each dispatched job against the
//! accelerator and storage; [`progress::ProgressAggregator`] turns worker
//! progress into monotonic per-job records; [`forward`] bridges queue and
//! accelerator changes onto the event broadcaster.

pub mod config;
pub mod forward;
pub mod progress;
pub mod queue;
pub mod runner;

pub use config::{ProgressConfig, QueueConfig};
pub use progress::{ProgressAggregator, ProgressRecord, ProgressStore, ProgressUpdate};
pub use queue::{Admission, QueueError, QueueEvent, QueueManager, QueueSnapshot};
pub use runner::JobRunner;
