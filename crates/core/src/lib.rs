//! Domain types shared by every gazer crate.
//!
//! Holds the job model, progress stages and their percent bands, event
//! names, error enums, and the small env-parsing helpers used by each
//! crate's `from_env` constructor. Has no internal crate dependencies.

pub mod credentials;
pub mod env;
pub mod error;
pub mod job;
pub mod job_events;
pub mod stage;
pub mod types;
