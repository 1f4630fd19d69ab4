//! Durable artifact storage across a local backend and an optional
//! S3-compatible remote backend, plus crash-orphan recovery.

pub mod archive;
pub mod config;
pub mod error;
pub mod gateway;
pub mod local;
pub mod names;
pub mod remote;

pub use config::{RemoteConfig, StorageConfig};
pub use error::StorageError;
pub use gateway::{ArtifactSet, BackendPresence, RecoveryReport, StorageGateway};
pub use local::{JobListing, LocalStore};
pub use remote::{ObjectStore, RemoteStore};
