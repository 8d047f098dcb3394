//! Error types for the TaskSync server.
//!
//! Only programmer errors cross component boundaries as `Err`: bad repository
//! paths and use before initialization. Filesystem and parse failures are
//! turned into registry events and `TASKS_ERROR` messages instead, so one bad
//! repository cannot stop monitoring of the others.
//!
//! # Error Types
//!
//! - [`SyncError`] - Failures surfaced by the watch registry and orchestrator
//! - [`ConfigError`](crate::config::ConfigError) - Environment parsing failures

use thiserror::Error;

/// Errors returned synchronously by the watch registry and the orchestrator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// The repository path was empty or otherwise unusable.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// A mutating call was made before `initialize()`.
    #[error("sync service not initialized")]
    NotInitialized,

    /// The registry task stopped while a command was in flight.
    #[error("watch registry task is not running")]
    RegistryClosed,
}

impl SyncError {
    /// Creates a new invalid argument error.
    ///
    /// # Example
    ///
    /// ```rust
    /// use tasksync_server::error::SyncError;
    ///
    /// let err = SyncError::invalid_argument("repository path must be a non-empty string");
    /// assert!(matches!(err, SyncError::InvalidArgument(_)));
    /// ```
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}

/// A specialized Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

/// Checks that a repository path is a non-empty string.
pub(crate) fn validate_repository_path(path: &str) -> Result<()> {
    if path.trim().is_empty() {
        return Err(SyncError::invalid_argument(
            "repository path must be a non-empty string",
        ));
    }
    Ok(())
}
