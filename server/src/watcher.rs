//! File watch registry for repository `tasks.json` files.
//!
//! The registry keeps one [`WatchEntry`] per repository: an OS-level watcher on
//! `<repository>/.taskmaster/tasks/tasks.json` plus at most one pending
//! debounce timer. When the timer elapses the file is read, parsed
//! best-effort, and a [`RegistryEvent::FileChanged`] is published.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐ try_send ┌─────────────────────────────┐ unbounded ┌──────────────┐
//! │ notify thread│─────────>│        registry task        │──────────>│ orchestrator │
//! │ (per entry)  │ RawEvent │ entries + deadlines + reads │ Registry  └──────────────┘
//! └──────────────┘          └─────────────────────────────┘ Event
//!                                       ^
//!                  watch / unwatch / stats commands (oneshot reply)
//! ```
//!
//! All mutation of the entry map happens on the registry task. Notify
//! callbacks only forward raw events, tagged with the generation of the entry
//! that produced them, so events from a removed entry are recognised and
//! dropped. Because removal happens on the same task that fires timers, a
//! timer can never fire once `unwatch` has returned.
//!
//! The target file's parent directory is watched rather than the file itself,
//! so editors that save through a temporary file and a rename keep being seen.
//! If that directory disappears (a branch switch, `rm -rf .taskmaster`), the
//! entry reports an error and re-arms on the nearest existing ancestor inside
//! the repository, moving back down once the directory is recreated.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use notify::{
    event::{ModifyKind, RenameMode},
    Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher,
};
use serde_json::Value;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::error::{validate_repository_path, Result, SyncError};
use crate::types::{display_path, now_timestamp, ChangeType, WatcherStats};

/// Location of the watched file relative to a repository root.
pub const TASKS_FILE_RELATIVE_PATH: &str = ".taskmaster/tasks/tasks.json";

/// Capacity of the channel between notify callbacks and the registry task.
const RAW_EVENT_CAPACITY: usize = 1000;

/// Capacity of the command channel into the registry task.
const COMMAND_CAPACITY: usize = 64;

/// Upper bound on a single read of the target file.
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Returns the target file for a repository.
///
/// # Example
///
/// ```rust
/// use std::path::Path;
/// use tasksync_server::watcher::tasks_file_path;
///
/// let path = tasks_file_path(Path::new("/repo"));
/// assert_eq!(path, Path::new("/repo/.taskmaster/tasks/tasks.json"));
/// ```
#[must_use]
pub fn tasks_file_path(repository_path: &Path) -> PathBuf {
    repository_path.join(TASKS_FILE_RELATIVE_PATH)
}

/// A settled change to a repository's target file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileChange {
    pub change_type: ChangeType,
    pub file_path: String,
    pub repository_path: String,
    pub timestamp: String,
    /// Parsed JSON content; `None` for deletions and unparseable content.
    pub content: Option<Value>,
}

/// Events published by the registry to its single subscriber.
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    /// The target file settled after a burst of raw events.
    FileChanged(FileChange),

    /// The watch mechanism or a file read reported an I/O problem.
    ///
    /// The repository's entry (if any) is left in place.
    Error {
        repository_path: String,
        error: String,
        timestamp: String,
    },

    /// OS-level watching is established for a repository.
    Ready { repository_path: String },
}

/// Raw notification forwarded from a notify callback.
#[derive(Debug)]
enum RawEvent {
    Changed {
        repository_path: String,
        generation: u64,
        change_type: ChangeType,
    },
    Failed {
        repository_path: String,
        generation: u64,
        error: String,
    },
    /// The watched directory went away, or a missing one on the way to the
    /// target came back.
    Rearm {
        repository_path: String,
        generation: u64,
    },
}

impl RawEvent {
    fn origin(&self) -> (&str, u64) {
        match self {
            Self::Changed {
                repository_path,
                generation,
                ..
            }
            | Self::Failed {
                repository_path,
                generation,
                ..
            }
            | Self::Rearm {
                repository_path,
                generation,
            } => (repository_path, *generation),
        }
    }
}

/// Requests handled by the registry task.
enum Command {
    Watch {
        repository_path: String,
        reply: oneshot::Sender<bool>,
    },
    Unwatch {
        repository_path: String,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<WatcherStats>,
    },
}

/// The debounce timer of a watch entry.
#[derive(Debug, Clone, Copy)]
struct PendingChange {
    change_type: ChangeType,
    deadline: Instant,
}

/// One repository's watcher handle and pending debounce timer.
struct WatchEntry {
    file_path: PathBuf,
    generation: u64,

    /// Kept alive to maintain the OS watch. Dropping it stops watching.
    /// `None` only when no directory of the repository exists any more.
    #[allow(dead_code)]
    watcher: Option<RecommendedWatcher>,

    /// Directory the watcher is armed on: the target's parent, or an
    /// ancestor of it while the parent is missing.
    armed_dir: Option<PathBuf>,

    timer: Option<PendingChange>,
}

impl WatchEntry {
    fn target_dir(&self) -> Option<&Path> {
        self.file_path.parent()
    }

    /// Whether the watcher currently sees events for the target file.
    fn is_on_target(&self) -> bool {
        self.armed_dir.is_some() && self.armed_dir.as_deref() == self.target_dir()
    }
}

/// Handle to the running registry task.
struct RegistryWorker {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// Owns the mapping from repository path to [`WatchEntry`].
///
/// # Example
///
/// ```no_run
/// use std::time::Duration;
/// use tokio::sync::mpsc;
/// use tasksync_server::watcher::{RegistryEvent, WatchRegistry};
///
/// # async fn example() -> tasksync_server::error::Result<()> {
/// let (tx, mut rx) = mpsc::unbounded_channel();
/// let mut registry = WatchRegistry::new(Duration::from_millis(100));
/// registry.initialize(tx);
///
/// registry.watch("/home/user/project").await?;
/// while let Some(event) = rx.recv().await {
///     if let RegistryEvent::FileChanged(change) = event {
///         println!("{} changed: {:?}", change.file_path, change.change_type);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct WatchRegistry {
    debounce: Duration,
    worker: Option<RegistryWorker>,
}

impl WatchRegistry {
    /// Creates a registry with the given debounce window. Nothing runs until
    /// [`initialize`](Self::initialize) is called.
    #[must_use]
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            worker: None,
        }
    }

    /// Returns the configured debounce window.
    #[must_use]
    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Returns whether the registry task is running.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.worker.is_some()
    }

    /// Starts the registry task, publishing events on `events`.
    ///
    /// Subsequent calls are no-ops until [`shutdown_all`](Self::shutdown_all).
    /// Does not watch anything by itself.
    pub fn initialize(&mut self, events: mpsc::UnboundedSender<RegistryEvent>) {
        if self.worker.is_some() {
            debug!("Watch registry already initialized");
            return;
        }

        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let debounce = self.debounce;
        let task = tokio::spawn(async move {
            run_registry_loop(debounce, command_rx, events).await;
        });

        info!(
            debounce_ms = debounce.as_millis(),
            "Initialized watch registry"
        );

        self.worker = Some(RegistryWorker { commands, task });
    }

    /// Starts watching a repository's `tasks.json`.
    ///
    /// Returns `Ok(true)` if the repository is watched after the call and
    /// `Ok(false)` if its target file does not exist (or watch setup failed,
    /// which is reported as a [`RegistryEvent::Error`]). Watching an already
    /// watched repository is a no-op.
    ///
    /// # Errors
    ///
    /// - [`SyncError::InvalidArgument`] if `repository_path` is empty
    /// - [`SyncError::NotInitialized`] before [`initialize`](Self::initialize)
    pub async fn watch(&self, repository_path: &str) -> Result<bool> {
        validate_repository_path(repository_path)?;
        let repository_path = repository_path.to_string();
        self.request(|reply| Command::Watch {
            repository_path,
            reply,
        })
        .await
    }

    /// Stops watching a repository, cancelling any pending debounce timer.
    ///
    /// Returns whether an entry was removed. Unknown paths, and calls on an
    /// uninitialized registry, resolve to `Ok(false)`.
    pub async fn unwatch(&self, repository_path: &str) -> Result<bool> {
        if self.worker.is_none() {
            return Ok(false);
        }
        let repository_path = repository_path.to_string();
        self.request(|reply| Command::Unwatch {
            repository_path,
            reply,
        })
        .await
    }

    /// Returns entry, handle and timer counts.
    pub async fn stats(&self) -> WatcherStats {
        if self.worker.is_none() {
            return WatcherStats::default();
        }
        self.request(|reply| Command::Stats { reply })
            .await
            .unwrap_or_default()
    }

    /// Stops the registry task, closing every OS handle and dropping every
    /// pending timer. Idempotent.
    pub async fn shutdown_all(&mut self) {
        let Some(RegistryWorker { commands, task }) = self.worker.take() else {
            return;
        };

        // Closing the command channel ends the loop.
        drop(commands);
        if let Err(err) = task.await {
            warn!(error = %err, "Watch registry task ended abnormally");
        }

        info!("Watch registry shut down");
    }

    async fn request<T>(&self, command: impl FnOnce(oneshot::Sender<T>) -> Command) -> Result<T> {
        let worker = self.worker.as_ref().ok_or(SyncError::NotInitialized)?;
        let (reply, response) = oneshot::channel();

        worker
            .commands
            .send(command(reply))
            .await
            .map_err(|_| SyncError::RegistryClosed)?;

        response.await.map_err(|_| SyncError::RegistryClosed)
    }
}

impl std::fmt::Debug for WatchRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatchRegistry")
            .field("debounce", &self.debounce)
            .field("initialized", &self.worker.is_some())
            .finish()
    }
}

/// Owns the entry map and runs every debounce timer.
async fn run_registry_loop(
    debounce: Duration,
    mut commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<RegistryEvent>,
) {
    let (raw_tx, mut raw_rx) = mpsc::channel::<RawEvent>(RAW_EVENT_CAPACITY);
    let mut entries: HashMap<String, WatchEntry> = HashMap::new();
    let mut next_generation: u64 = 0;

    debug!("Starting watch registry loop");

    loop {
        let next_deadline = entries
            .values()
            .filter_map(|entry| entry.timer.map(|t| t.deadline))
            .min();

        tokio::select! {
            // Commands first so an unwatch wins over a timer due at the same instant.
            biased;

            command = commands.recv() => {
                match command {
                    Some(Command::Watch { repository_path, reply }) => {
                        next_generation += 1;
                        let watched = add_entry(
                            &mut entries,
                            repository_path,
                            next_generation,
                            &raw_tx,
                            &events,
                        )
                        .await;
                        let _ = reply.send(watched);
                    }
                    Some(Command::Unwatch { repository_path, reply }) => {
                        let removed = entries.remove(&repository_path);
                        if let Some(entry) = &removed {
                            info!(
                                repository = %repository_path,
                                had_pending_timer = entry.timer.is_some(),
                                "Stopped watching repository"
                            );
                        }
                        let _ = reply.send(removed.is_some());
                    }
                    Some(Command::Stats { reply }) => {
                        let _ = reply.send(collect_stats(&entries));
                    }
                    None => break,
                }
            }

            Some(raw) = raw_rx.recv() => {
                handle_raw_event(&mut entries, raw, debounce, &mut next_generation, &raw_tx, &events);
            }

            _ = async {
                match next_deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending::<()>().await,
                }
            } => {
                fire_expired_timers(&mut entries, &events).await;
            }
        }
    }

    debug!(
        remaining = entries.len(),
        "Watch registry loop terminated, releasing entries"
    );
}

/// Creates a watch entry for `repository_path` if its target file exists.
async fn add_entry(
    entries: &mut HashMap<String, WatchEntry>,
    repository_path: String,
    generation: u64,
    raw_tx: &mpsc::Sender<RawEvent>,
    events: &mpsc::UnboundedSender<RegistryEvent>,
) -> bool {
    if entries.contains_key(&repository_path) {
        trace!(repository = %repository_path, "Repository already watched");
        return true;
    }

    let file_path = tasks_file_path(Path::new(&repository_path));
    match tokio::fs::try_exists(&file_path).await {
        Ok(true) => {}
        Ok(false) => {
            debug!(
                repository = %repository_path,
                file = %file_path.display(),
                "No tasks file found, not watching"
            );
            return false;
        }
        Err(err) => {
            publish_error(events, &repository_path, format!("failed to stat tasks file: {err}"));
            return false;
        }
    }

    let watch_dir = file_path
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));

    match create_watcher(raw_tx.clone(), &repository_path, &file_path, &watch_dir, generation) {
        Ok(watcher) => {
            info!(
                repository = %repository_path,
                file = %file_path.display(),
                "Started watching tasks file"
            );
            entries.insert(
                repository_path.clone(),
                WatchEntry {
                    file_path,
                    generation,
                    watcher: Some(watcher),
                    armed_dir: Some(watch_dir),
                    timer: None,
                },
            );
            publish(events, RegistryEvent::Ready { repository_path });
            true
        }
        Err(err) => {
            publish_error(events, &repository_path, format!("failed to watch tasks file: {err}"));
            false
        }
    }
}

/// Creates the notify watcher for one entry, armed on `watch_dir`, with a
/// lightweight callback.
fn create_watcher(
    raw_tx: mpsc::Sender<RawEvent>,
    repository_path: &str,
    file_path: &Path,
    watch_dir: &Path,
    generation: u64,
) -> notify::Result<RecommendedWatcher> {
    let file_name = file_path.file_name().map(|name| name.to_os_string());
    let target_dir = file_path.parent().map(Path::to_path_buf).unwrap_or_default();
    let armed_dir = watch_dir.to_path_buf();
    let on_target = armed_dir == target_dir;
    let repository_path = repository_path.to_string();

    let mut watcher = RecommendedWatcher::new(
        move |res: std::result::Result<Event, notify::Error>| {
            let raw = match res {
                Ok(event) if needs_rearm(&event, &armed_dir, &target_dir) => RawEvent::Rearm {
                    repository_path: repository_path.clone(),
                    generation,
                },
                Ok(event) => {
                    if !on_target {
                        return;
                    }
                    let Some(change_type) = classify_event(&event, file_name.as_deref()) else {
                        return;
                    };
                    RawEvent::Changed {
                        repository_path: repository_path.clone(),
                        generation,
                        change_type,
                    }
                }
                Err(err) => RawEvent::Failed {
                    repository_path: repository_path.clone(),
                    generation,
                    error: err.to_string(),
                },
            };

            // Never block the notify thread.
            if let Err(err) = raw_tx.try_send(raw) {
                warn!(error = %err, "Failed to queue raw watch event, channel may be full");
            }
        },
        Config::default(),
    )?;

    watcher.watch(watch_dir, RecursiveMode::NonRecursive)?;
    Ok(watcher)
}

/// Whether an event means the entry must re-arm: the armed directory itself
/// was removed or moved, or, while armed on an ancestor, a directory on the
/// path down to the target appeared or was renamed.
fn needs_rearm(event: &Event, armed_dir: &Path, target_dir: &Path) -> bool {
    event.paths.iter().any(|path| {
        if path == armed_dir {
            return matches!(
                event.kind,
                EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
            );
        }

        armed_dir != target_dir
            && target_dir.starts_with(path)
            && matches!(
                event.kind,
                EventKind::Create(_) | EventKind::Modify(ModifyKind::Name(_))
            )
    })
}

/// Returns the deepest existing directory between the target file and the
/// repository root.
fn nearest_existing_dir(file_path: &Path, repository_root: &Path) -> Option<PathBuf> {
    file_path
        .ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(repository_root))
        .find(|dir| dir.is_dir())
        .map(Path::to_path_buf)
}

/// Moves an entry's watcher to the nearest existing directory on the way to
/// its target, reporting when the target directory is lost.
fn rearm_entry(
    repository_path: &str,
    entry: &mut WatchEntry,
    generation: u64,
    debounce: Duration,
    raw_tx: &mpsc::Sender<RawEvent>,
    events: &mpsc::UnboundedSender<RegistryEvent>,
) {
    let was_on_target = entry.is_on_target();

    entry.watcher = None;
    entry.armed_dir = None;
    entry.generation = generation;

    let Some(dir) = nearest_existing_dir(&entry.file_path, Path::new(repository_path)) else {
        warn!(repository = %repository_path, "Repository directory is gone, watching stopped");
        publish_error(
            events,
            repository_path,
            "repository directory no longer exists".to_string(),
        );
        return;
    };

    match create_watcher(raw_tx.clone(), repository_path, &entry.file_path, &dir, generation) {
        Ok(watcher) => {
            entry.watcher = Some(watcher);
            entry.armed_dir = Some(dir);
        }
        Err(err) => {
            publish_error(events, repository_path, format!("failed to watch tasks file: {err}"));
            return;
        }
    }

    if was_on_target && !entry.is_on_target() {
        warn!(
            repository = %repository_path,
            armed = ?entry.armed_dir,
            "Tasks directory removed, waiting for it to reappear"
        );
        publish_error(
            events,
            repository_path,
            "tasks directory was removed, waiting for it to reappear".to_string(),
        );
    } else if !was_on_target && entry.is_on_target() {
        info!(repository = %repository_path, "Tasks directory is back, watching again");
        // The file may have been written before the new watch existed.
        if entry.file_path.is_file() {
            let merged = merge_change(entry.timer.map(|t| t.change_type), ChangeType::Add);
            entry.timer = Some(PendingChange {
                change_type: merged,
                deadline: Instant::now() + debounce,
            });
        }
    } else {
        trace!(repository = %repository_path, armed = ?entry.armed_dir, "Watcher re-armed");
    }
}

/// Maps a notify event to a change on the target file, if it concerns it.
fn classify_event(event: &Event, file_name: Option<&std::ffi::OsStr>) -> Option<ChangeType> {
    let position = event
        .paths
        .iter()
        .position(|path| path.file_name().is_some() && path.file_name() == file_name)?;

    let change_type = match event.kind {
        EventKind::Create(_) => ChangeType::Add,
        EventKind::Remove(_) => ChangeType::Unlink,
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => ChangeType::Unlink,
        // paths are [from, to]
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if position == 0 => {
            ChangeType::Unlink
        }
        EventKind::Modify(ModifyKind::Metadata(_)) => return None,
        EventKind::Modify(_) => ChangeType::Change,
        EventKind::Access(_) | EventKind::Any | EventKind::Other => return None,
    };

    trace!(kind = ?event.kind, ?change_type, "Classified watch event");
    Some(change_type)
}

/// Folds a new raw change into the one already pending for an entry.
fn merge_change(pending: Option<ChangeType>, incoming: ChangeType) -> ChangeType {
    match (pending, incoming) {
        (Some(ChangeType::Add), ChangeType::Change) => ChangeType::Add,
        (Some(ChangeType::Unlink), ChangeType::Add) => ChangeType::Change,
        (_, incoming) => incoming,
    }
}

/// Restarts an entry's debounce timer, re-arms its watcher, or reports a
/// watcher error.
fn handle_raw_event(
    entries: &mut HashMap<String, WatchEntry>,
    raw: RawEvent,
    debounce: Duration,
    next_generation: &mut u64,
    raw_tx: &mpsc::Sender<RawEvent>,
    events: &mpsc::UnboundedSender<RegistryEvent>,
) {
    let (repository_path, generation) = raw.origin();
    let Some(entry) = entries
        .get_mut(repository_path)
        .filter(|entry| entry.generation == generation)
    else {
        trace!(repository = %repository_path, "Dropping raw event from a removed watcher");
        return;
    };

    match raw {
        RawEvent::Changed {
            repository_path,
            change_type,
            ..
        } => {
            let merged = merge_change(entry.timer.map(|t| t.change_type), change_type);
            entry.timer = Some(PendingChange {
                change_type: merged,
                deadline: Instant::now() + debounce,
            });
            trace!(repository = %repository_path, ?merged, "Debounce timer restarted");
        }
        RawEvent::Failed {
            repository_path,
            error,
            ..
        } => {
            warn!(repository = %repository_path, error = %error, "File watcher error");
            publish_error(events, &repository_path, error);
        }
        RawEvent::Rearm {
            repository_path, ..
        } => {
            *next_generation += 1;
            rearm_entry(&repository_path, entry, *next_generation, debounce, raw_tx, events);
        }
    }
}

/// Emits one event for every entry whose debounce window has elapsed.
async fn fire_expired_timers(
    entries: &mut HashMap<String, WatchEntry>,
    events: &mpsc::UnboundedSender<RegistryEvent>,
) {
    let now = Instant::now();
    let expired: Vec<(String, PathBuf, ChangeType)> = entries
        .iter_mut()
        .filter_map(|(repository_path, entry)| {
            let timer = entry.timer.filter(|t| t.deadline <= now)?;
            entry.timer = None;
            Some((repository_path.clone(), entry.file_path.clone(), timer.change_type))
        })
        .collect();

    for (repository_path, file_path, change_type) in expired {
        match settle_change(&file_path, change_type).await {
            Ok((change_type, content)) => {
                debug!(
                    repository = %repository_path,
                    change_type = change_type.as_str(),
                    parsed = content.is_some(),
                    "Tasks file settled"
                );
                publish(
                    events,
                    RegistryEvent::FileChanged(FileChange {
                        change_type,
                        file_path: display_path(&file_path),
                        repository_path,
                        timestamp: now_timestamp(),
                        content,
                    }),
                );
            }
            Err(error) => {
                warn!(repository = %repository_path, error = %error, "Failed to read tasks file");
                publish_error(events, &repository_path, error);
            }
        }
    }
}

/// Determines the file's state after a burst and reads it if present.
///
/// Parse failures yield `None` content. Only I/O failures are returned as
/// errors; a file that vanished is reported as [`ChangeType::Unlink`].
async fn settle_change(
    file_path: &Path,
    change_type: ChangeType,
) -> std::result::Result<(ChangeType, Option<Value>), String> {
    let read = tokio::time::timeout(READ_TIMEOUT, tokio::fs::read_to_string(file_path)).await;

    let text = match read {
        Ok(Ok(text)) => text,
        Ok(Err(err)) if err.kind() == ErrorKind::NotFound => {
            return Ok((ChangeType::Unlink, None));
        }
        Ok(Err(err)) => return Err(format!("failed to read tasks file: {err}")),
        Err(_) => {
            return Err(format!(
                "timed out reading tasks file after {}s",
                READ_TIMEOUT.as_secs()
            ))
        }
    };

    // A delete followed by a re-create inside one window is a replacement.
    let change_type = match change_type {
        ChangeType::Unlink => ChangeType::Change,
        other => other,
    };

    Ok((change_type, parse_tasks(&text)))
}

/// Parses file content as JSON, returning `None` when it is not valid JSON.
fn parse_tasks(text: &str) -> Option<Value> {
    match serde_json::from_str(text) {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(error = %err, "Tasks file is not valid JSON, omitting content");
            None
        }
    }
}

fn collect_stats(entries: &HashMap<String, WatchEntry>) -> WatcherStats {
    WatcherStats {
        watched_repositories: entries.len(),
        // Entries parked on an ancestor directory do not see the target.
        active_watchers: entries.values().filter(|e| e.is_on_target()).count(),
        pending_timers: entries.values().filter(|e| e.timer.is_some()).count(),
    }
}

fn publish_error(events: &mpsc::UnboundedSender<RegistryEvent>, repository_path: &str, error: String) {
    publish(
        events,
        RegistryEvent::Error {
            repository_path: repository_path.to_string(),
            error,
            timestamp: now_timestamp(),
        },
    );
}

fn publish(events: &mpsc::UnboundedSender<RegistryEvent>, event: RegistryEvent) {
    if events.send(event).is_err() {
        debug!("Registry event subscriber dropped, discarding event");
    }
}
