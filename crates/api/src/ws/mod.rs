//! WebSocket adapter over the event broadcaster.
//!
//! Each connection subscribes to one job's events (plus accelerator
//! status broadcasts) and receives them as JSON text frames.

mod handler;

pub use handler::{ws_handler, WsQuery, HEARTBEAT_INTERVAL, STATUS_ONLY_KEY};
