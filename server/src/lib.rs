//! TaskSync Server - Real-time `tasks.json` sync engine.
//!
//! This crate watches the `.taskmaster/tasks/tasks.json` file of a set of
//! repositories and pushes every settled change to all connected clients:
//! - [`watcher`] owns one OS watch per repository and debounces raw events
//! - [`sync`] keeps the monitored-repository set and translates watcher
//!   events into [`types::SyncMessage`]s
//! - [`broadcast`] fans messages out to every open connection
//!
//! # Architecture
//!
//! Data flows one way: filesystem → registry → orchestrator → sink →
//! clients. Nothing is persisted; clients that connect late only see
//! messages emitted after they connected.

pub mod broadcast;
pub mod config;
pub mod error;
pub mod routes;
pub mod sync;
pub mod types;
pub mod watcher;

pub use broadcast::{BroadcastSink, ClientConnection, TransportHandle};
pub use error::{Result, SyncError};
pub use sync::{AddOutcome, SyncOrchestrator};
pub use types::{ChangeType, SyncMessage, SyncStats};
pub use watcher::WatchRegistry;
