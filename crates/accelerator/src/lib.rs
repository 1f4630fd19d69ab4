//! Remote accelerator lifecycle and worker HTTP client.
//!
//! Provisions the long-lived GPU worker by launching an external
//! command, turns its free-form log output into a structured
//! [`state::AcceleratorState`] via an ordered rule table, health-checks
//! the worker, and wraps the worker's REST endpoints.

pub mod api;
pub mod classifier;
pub mod config;
pub mod manager;
pub mod process;
pub mod state;

pub use api::WorkerApi;
pub use config::AcceleratorConfig;
pub use manager::{AcceleratorError, AcceleratorManager};
pub use state::{AcceleratorStage, AcceleratorState};
