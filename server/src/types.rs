//! Wire types shared by the watcher, the orchestrator and connected clients.
//!
//! Everything in this module is part of the external JSON contract consumed by
//! UI clients. Field names and the `event` / `type` tag values must stay
//! byte-for-byte stable.

use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Returns the current time as an RFC 3339 UTC string with millisecond
/// precision, e.g. `2026-10-18T09:15:02.123Z`.
#[must_use]
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Kind of change observed on a repository's `tasks.json`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeType {
    Add,
    Change,
    Unlink,
}

impl ChangeType {
    /// Returns the wire name of this change type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Add => "add",
            Self::Change => "change",
            Self::Unlink => "unlink",
        }
    }
}

/// Payload of a [`SyncMessage::TasksUpdated`] message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TasksUpdatedPayload {
    pub change_type: ChangeType,
    pub file_path: String,
    /// Parsed file content. Omitted when the file was deleted or did not
    /// parse as JSON.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tasks: Option<Value>,
}

/// Payload of a [`SyncMessage::TasksError`] message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TasksErrorPayload {
    pub error: String,
}

/// Domain-level notification fanned out to every connected client.
///
/// Serialized with an `event` tag:
///
/// ```json
/// {
///   "event": "TASKS_UPDATED",
///   "repositoryPath": "/repo",
///   "timestamp": "2026-10-18T09:15:02.123Z",
///   "payload": { "changeType": "change", "filePath": "/repo/.taskmaster/tasks/tasks.json", "tasks": {} }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SyncMessage {
    #[serde(rename_all = "camelCase")]
    TasksUpdated {
        repository_path: String,
        timestamp: String,
        payload: TasksUpdatedPayload,
    },

    #[serde(rename_all = "camelCase")]
    TasksError {
        repository_path: String,
        timestamp: String,
        payload: TasksErrorPayload,
    },

    #[serde(rename_all = "camelCase")]
    RepositoryAdded {
        repository_path: String,
        timestamp: String,
    },

    #[serde(rename_all = "camelCase")]
    RepositoryRemoved {
        repository_path: String,
        timestamp: String,
    },
}

impl SyncMessage {
    /// Builds a `TASKS_UPDATED` message stamped with the current time.
    #[must_use]
    pub fn tasks_updated(
        repository_path: impl Into<String>,
        change_type: ChangeType,
        file_path: impl Into<String>,
        tasks: Option<Value>,
    ) -> Self {
        Self::TasksUpdated {
            repository_path: repository_path.into(),
            timestamp: now_timestamp(),
            payload: TasksUpdatedPayload {
                change_type,
                file_path: file_path.into(),
                tasks,
            },
        }
    }

    /// Builds a `TASKS_ERROR` message stamped with the current time.
    #[must_use]
    pub fn tasks_error(repository_path: impl Into<String>, error: impl Into<String>) -> Self {
        Self::TasksError {
            repository_path: repository_path.into(),
            timestamp: now_timestamp(),
            payload: TasksErrorPayload {
                error: error.into(),
            },
        }
    }

    /// Builds a `REPOSITORY_ADDED` message stamped with the current time.
    #[must_use]
    pub fn repository_added(repository_path: impl Into<String>) -> Self {
        Self::RepositoryAdded {
            repository_path: repository_path.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Builds a `REPOSITORY_REMOVED` message stamped with the current time.
    #[must_use]
    pub fn repository_removed(repository_path: impl Into<String>) -> Self {
        Self::RepositoryRemoved {
            repository_path: repository_path.into(),
            timestamp: now_timestamp(),
        }
    }

    /// Returns the wire tag of this message.
    #[must_use]
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::TasksUpdated { .. } => "TASKS_UPDATED",
            Self::TasksError { .. } => "TASKS_ERROR",
            Self::RepositoryAdded { .. } => "REPOSITORY_ADDED",
            Self::RepositoryRemoved { .. } => "REPOSITORY_REMOVED",
        }
    }

    /// Returns the repository this message refers to.
    #[must_use]
    pub fn repository_path(&self) -> &str {
        match self {
            Self::TasksUpdated {
                repository_path, ..
            }
            | Self::TasksError {
                repository_path, ..
            }
            | Self::RepositoryAdded {
                repository_path, ..
            }
            | Self::RepositoryRemoved {
                repository_path, ..
            } => repository_path,
        }
    }
}

/// Frame pushed to a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Envelope {
    /// Sent once, immediately after a connection is registered.
    Connected { timestamp: String },

    /// Wraps a [`SyncMessage`] fanned out to every open connection.
    Broadcast { data: SyncMessage, timestamp: String },
}

impl Envelope {
    #[must_use]
    pub fn connected() -> Self {
        Self::Connected {
            timestamp: now_timestamp(),
        }
    }

    #[must_use]
    pub fn broadcast(data: SyncMessage) -> Self {
        Self::Broadcast {
            data,
            timestamp: now_timestamp(),
        }
    }
}

/// Counters reported by the file watch registry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatcherStats {
    pub watched_repositories: usize,
    /// Entries whose OS watch currently covers the target file's directory.
    /// Lower than `watched_repositories` while a tasks directory is missing.
    pub active_watchers: usize,
    pub pending_timers: usize,
}

/// Aggregate statistics reported by the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStats {
    pub is_initialized: bool,
    pub enabled: bool,
    pub monitored_repositories: usize,
    pub watcher_stats: WatcherStats,
    pub connected_clients: usize,
}

/// Renders a path the way it appears on the wire.
pub(crate) fn display_path(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}
