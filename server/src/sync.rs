//! Sync orchestrator: the monitored-repository set and event translation.
//!
//! The orchestrator is the only writer of the monitored set and the only
//! subscriber to [`WatchRegistry`] events. Every repository it admits is handed
//! to the registry; every registry event is turned into a [`SyncMessage`] and
//! pushed through the [`BroadcastSink`].
//!
//! # Example
//!
//! ```no_run
//! use tasksync_server::broadcast::{BroadcastSink, TransportHandle};
//! use tasksync_server::config::SyncConfig;
//! use tasksync_server::sync::SyncOrchestrator;
//! use tasksync_server::watcher::WatchRegistry;
//!
//! # async fn example() -> tasksync_server::error::Result<()> {
//! let config = SyncConfig::default();
//! let sink = BroadcastSink::new();
//! sink.initialize(TransportHandle::detached()).await;
//!
//! let orchestrator = SyncOrchestrator::new(
//!     config.clone(),
//!     WatchRegistry::new(config.debounce),
//!     sink,
//! );
//! orchestrator.initialize().await;
//! orchestrator.add_repository("/home/user/project").await?;
//!
//! let stats = orchestrator.get_stats().await;
//! println!("monitoring {} repositories", stats.monitored_repositories);
//! orchestrator.shutdown().await;
//! # Ok(())
//! # }
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::broadcast::BroadcastSink;
use crate::config::SyncConfig;
use crate::error::{validate_repository_path, Result, SyncError};
use crate::types::{SyncMessage, SyncStats};
use crate::watcher::{RegistryEvent, WatchRegistry};

/// Outcome of [`SyncOrchestrator::add_repository`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddOutcome {
    /// The repository joined the monitored set.
    Added,
    /// The repository was already monitored; no message was emitted.
    AlreadyMonitored,
    /// The monitored set is full; the request was ignored.
    AtCapacity,
}

struct State {
    initialized: bool,
    registry: WatchRegistry,
    /// Insertion-ordered set of monitored repository paths.
    monitored: Vec<String>,
    /// Consecutive `TASKS_ERROR`s per repository since its last update.
    error_counts: HashMap<String, u32>,
    forwarder: Option<JoinHandle<()>>,
}

struct Inner {
    config: SyncConfig,
    sink: BroadcastSink,
    state: Mutex<State>,
}

/// Coordinates the watch registry and the broadcast sink.
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct SyncOrchestrator {
    inner: Arc<Inner>,
}

impl SyncOrchestrator {
    /// Creates an orchestrator around an uninitialized registry and a sink.
    #[must_use]
    pub fn new(config: SyncConfig, registry: WatchRegistry, sink: BroadcastSink) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                sink,
                state: Mutex::new(State {
                    initialized: false,
                    registry,
                    monitored: Vec::new(),
                    error_counts: HashMap::new(),
                    forwarder: None,
                }),
            }),
        }
    }

    /// Returns the configuration this orchestrator was built with.
    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Starts the registry and subscribes to its events.
    ///
    /// No-op when already initialized, and when sync is disabled in the
    /// configuration (the orchestrator then stays uninitialized).
    pub async fn initialize(&self) {
        let mut state = self.inner.state.lock().await;

        if state.initialized {
            debug!("Sync orchestrator already initialized");
            return;
        }

        if !self.inner.config.enabled {
            info!("Task sync disabled by configuration, not starting file watching");
            return;
        }

        let (events_tx, events_rx) = mpsc::unbounded_channel();
        state.registry.initialize(events_tx);

        let weak = Arc::downgrade(&self.inner);
        state.forwarder = Some(tokio::spawn(forward_registry_events(weak, events_rx)));
        state.initialized = true;

        info!(
            max_repositories = self.inner.config.max_repositories,
            debounce_ms = self.inner.config.debounce.as_millis(),
            error_threshold = ?self.inner.config.error_threshold,
            "Sync orchestrator initialized"
        );
    }

    /// Adds a repository to the monitored set and starts watching it.
    ///
    /// Emits `REPOSITORY_ADDED` when the repository is admitted. Once the set
    /// holds `max_repositories` paths further adds are logged and ignored.
    /// Adding an already monitored repository emits nothing but retries the
    /// watch, which picks up a `tasks.json` created since the first add.
    ///
    /// # Errors
    ///
    /// - [`SyncError::NotInitialized`] before [`initialize`](Self::initialize)
    /// - [`SyncError::InvalidArgument`] for an empty path
    /// - [`SyncError::RegistryClosed`] if the registry task has stopped
    pub async fn add_repository(&self, path: &str) -> Result<AddOutcome> {
        let mut state = self.inner.state.lock().await;

        if !state.initialized {
            return Err(SyncError::NotInitialized);
        }
        validate_repository_path(path)?;

        if state.monitored.iter().any(|p| p == path) {
            debug!(repository = %path, "Repository already monitored");
            state.registry.watch(path).await?;
            return Ok(AddOutcome::AlreadyMonitored);
        }

        let max = self.inner.config.max_repositories;
        if state.monitored.len() >= max {
            warn!(
                repository = %path,
                max_repositories = max,
                "Maximum monitored repositories reached, ignoring add"
            );
            return Ok(AddOutcome::AtCapacity);
        }

        state.monitored.push(path.to_string());
        if let Err(err) = state.registry.watch(path).await {
            state.monitored.retain(|p| p != path);
            return Err(err);
        }

        info!(
            repository = %path,
            monitored = state.monitored.len(),
            "Repository added"
        );
        self.inner
            .sink
            .broadcast(&SyncMessage::repository_added(path))
            .await;

        Ok(AddOutcome::Added)
    }

    /// Stops monitoring a repository and emits `REPOSITORY_REMOVED`.
    ///
    /// Returns `false` without emitting anything when the path is not
    /// monitored.
    pub async fn remove_repository(&self, path: &str) -> bool {
        let mut state = self.inner.state.lock().await;
        self.inner.remove_locked(&mut state, path).await
    }

    /// Returns a snapshot of monitored repository paths in insertion order.
    pub async fn get_monitored_repositories(&self) -> Vec<String> {
        self.inner.state.lock().await.monitored.clone()
    }

    /// Returns aggregate statistics for the registry, set and sink.
    ///
    /// `monitored_repositories` equals `watcher_stats.watched_repositories`
    /// only when every monitored repository has a `tasks.json`: a repository
    /// admitted without one stays monitored but has no watch entry until it
    /// is added again after the file exists.
    pub async fn get_stats(&self) -> SyncStats {
        let (is_initialized, monitored_repositories, watcher_stats) = {
            let state = self.inner.state.lock().await;
            (
                state.initialized,
                state.monitored.len(),
                state.registry.stats().await,
            )
        };

        SyncStats {
            is_initialized,
            enabled: self.inner.config.enabled,
            monitored_repositories,
            watcher_stats,
            connected_clients: self.inner.sink.client_count().await,
        }
    }

    /// Removes every repository (emitting `REPOSITORY_REMOVED` for each),
    /// stops the registry and marks the orchestrator uninitialized.
    ///
    /// Idempotent. When this returns, nothing scheduled before the call will
    /// broadcast again.
    pub async fn shutdown(&self) {
        let forwarder = {
            let mut state = self.inner.state.lock().await;

            if !state.initialized && state.forwarder.is_none() {
                debug!("Sync orchestrator already shut down");
                return;
            }

            let repositories = state.monitored.clone();
            for path in &repositories {
                self.inner.remove_locked(&mut state, path).await;
            }

            state.registry.shutdown_all().await;
            state.monitored.clear();
            state.error_counts.clear();
            state.initialized = false;
            state.forwarder.take()
        };

        // The registry's event sender is gone, so the forwarder drains and exits.
        if let Some(forwarder) = forwarder {
            if let Err(err) = forwarder.await {
                warn!(error = %err, "Registry event forwarder ended abnormally");
            }
        }

        info!("Sync orchestrator shut down");
    }
}

impl std::fmt::Debug for SyncOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncOrchestrator")
            .field("config", &self.inner.config)
            .field("sink", &self.inner.sink)
            .finish()
    }
}

impl Inner {
    async fn remove_locked(&self, state: &mut State, path: &str) -> bool {
        let Some(index) = state.monitored.iter().position(|p| p == path) else {
            trace!(repository = %path, "Repository not monitored, nothing to remove");
            return false;
        };

        if let Err(err) = state.registry.unwatch(path).await {
            warn!(repository = %path, error = %err, "Failed to stop watching repository");
        }
        state.monitored.remove(index);
        state.error_counts.remove(path);

        info!(
            repository = %path,
            monitored = state.monitored.len(),
            "Repository removed"
        );
        self.sink
            .broadcast(&SyncMessage::repository_removed(path))
            .await;

        true
    }

    async fn handle_registry_event(&self, event: RegistryEvent) {
        let mut state = self.state.lock().await;

        if !state.initialized {
            trace!("Orchestrator not initialized, dropping registry event");
            return;
        }

        match event {
            RegistryEvent::FileChanged(change) => {
                if !state.monitored.contains(&change.repository_path) {
                    trace!(repository = %change.repository_path, "Dropping change for unmonitored repository");
                    return;
                }
                state.error_counts.remove(&change.repository_path);

                let message = SyncMessage::tasks_updated(
                    change.repository_path,
                    change.change_type,
                    change.file_path,
                    change.content,
                );
                self.sink.broadcast(&message).await;
            }

            RegistryEvent::Error {
                repository_path,
                error,
                ..
            } => {
                if !state.monitored.contains(&repository_path) {
                    return;
                }

                self.sink
                    .broadcast(&SyncMessage::tasks_error(&repository_path, &error))
                    .await;

                let Some(threshold) = self.config.error_threshold else {
                    return;
                };
                let count = state
                    .error_counts
                    .entry(repository_path.clone())
                    .or_insert(0);
                *count += 1;

                if *count >= threshold {
                    warn!(
                        repository = %repository_path,
                        consecutive_errors = *count,
                        "Repository keeps failing, deregistering"
                    );
                    self.remove_locked(&mut state, &repository_path).await;
                }
            }

            RegistryEvent::Ready { repository_path } => {
                debug!(repository = %repository_path, "Watcher ready");
            }
        }
    }
}

/// Translates registry events into sync messages until the registry stops
/// or the orchestrator is dropped.
async fn forward_registry_events(
    inner: Weak<Inner>,
    mut events: mpsc::UnboundedReceiver<RegistryEvent>,
) {
    while let Some(event) = events.recv().await {
        let Some(inner) = inner.upgrade() else {
            break;
        };
        inner.handle_registry_event(event).await;
    }

    debug!("Registry event forwarder shutting down");
}
