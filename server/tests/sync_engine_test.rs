//! End-to-end tests for the sync engine against real files.
//!
//! Each test builds the full pipeline (watch registry → orchestrator →
//! broadcast sink) around temporary repositories and observes it the way a
//! client would: through a [`ClientConnection`] registered with the sink.

use std::path::Path;
use std::time::Duration;

use serde_json::{json, Value};
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

use tasksync_server::broadcast::{BroadcastSink, ClientConnection, TransportHandle};
use tasksync_server::config::SyncConfig;
use tasksync_server::sync::{AddOutcome, SyncOrchestrator};
use tasksync_server::watcher::{tasks_file_path, WatchRegistry};

// ============================================================================
// Test Helpers
// ============================================================================

const DEBOUNCE: Duration = Duration::from_millis(50);

/// How long to wait for an expected message.
const RECEIVE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long to listen when asserting that nothing arrives.
const QUIET_PERIOD: Duration = Duration::from_millis(400);

struct Harness {
    orchestrator: SyncOrchestrator,
    sink: BroadcastSink,
    client: ClientConnection,
}

impl Harness {
    async fn new(config: SyncConfig) -> Self {
        let sink = BroadcastSink::new();
        sink.initialize(TransportHandle::detached()).await;

        let mut client = sink.connect().await;
        let connected = next_frame(&mut client).await;
        assert_eq!(connected["type"], "connected");

        let registry = WatchRegistry::new(config.debounce);
        let orchestrator = SyncOrchestrator::new(config, registry, sink.clone());
        orchestrator.initialize().await;

        Self {
            orchestrator,
            sink,
            client,
        }
    }

    async fn with_defaults() -> Self {
        Self::new(SyncConfig {
            debounce: DEBOUNCE,
            ..SyncConfig::default()
        })
        .await
    }

    /// Adds a repository and consumes its `REPOSITORY_ADDED` message.
    async fn add(&mut self, path: &str) {
        assert_eq!(
            self.orchestrator.add_repository(path).await,
            Ok(AddOutcome::Added)
        );
        let message = self.next_message().await;
        assert_eq!(message["event"], "REPOSITORY_ADDED");
        assert_eq!(message["repositoryPath"], path);
    }

    async fn next_message(&mut self) -> Value {
        let frame = next_frame(&mut self.client).await;
        assert_eq!(frame["type"], "broadcast");
        frame["data"].clone()
    }

    async fn assert_quiet(&mut self) {
        if let Ok(Some(frame)) = timeout(QUIET_PERIOD, self.client.recv()).await {
            panic!("unexpected broadcast: {frame}");
        }
    }
}

async fn next_frame(client: &mut ClientConnection) -> Value {
    let frame = timeout(RECEIVE_TIMEOUT, client.recv())
        .await
        .expect("timed out waiting for frame")
        .expect("connection closed");
    serde_json::from_str(&frame).expect("frame is JSON")
}

/// Creates a repository containing a `tasks.json` with `content`.
fn create_repo(content: &str) -> TempDir {
    let dir = TempDir::new().unwrap();
    let file = tasks_file_path(dir.path());
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, content).unwrap();
    dir
}

fn repo_key(dir: &TempDir) -> String {
    dir.path().to_string_lossy().into_owned()
}

fn write_tasks(repo: &Path, content: &str) {
    std::fs::write(tasks_file_path(repo), content).unwrap();
}

// ============================================================================
// Scenario
// ============================================================================

#[tokio::test]
async fn write_valid_json_broadcasts_parsed_tasks() {
    let mut harness = Harness::with_defaults().await;
    let repo = create_repo("{}");
    let key = repo_key(&repo);
    harness.add(&key).await;

    write_tasks(repo.path(), r#"{"proj":{"tasks":[{"id":1}]}}"#);

    let message = harness.next_message().await;
    assert_eq!(message["event"], "TASKS_UPDATED");
    assert_eq!(message["repositoryPath"], key.as_str());
    assert_eq!(message["payload"]["changeType"], "change");
    assert_eq!(
        message["payload"]["filePath"],
        &*tasks_file_path(repo.path()).to_string_lossy()
    );
    assert_eq!(message["payload"]["tasks"]["proj"]["tasks"][0]["id"], 1);

    harness.orchestrator.shutdown().await;
}

// ============================================================================
// Debounce coalescing
// ============================================================================

#[tokio::test]
async fn burst_of_writes_yields_one_update_with_final_content() {
    // 20 ms cadence against a wide window leaves room for scheduler jitter.
    let mut harness = Harness::new(SyncConfig {
        debounce: Duration::from_millis(150),
        ..SyncConfig::default()
    })
    .await;
    let repo = create_repo("{}");
    harness.add(&repo_key(&repo)).await;

    for i in 1..=5 {
        write_tasks(repo.path(), &json!({"master": {"tasks": [{"id": i}]}}).to_string());
        sleep(Duration::from_millis(20)).await;
    }

    let message = harness.next_message().await;
    assert_eq!(message["event"], "TASKS_UPDATED");
    assert_eq!(message["payload"]["tasks"]["master"]["tasks"][0]["id"], 5);
    harness.assert_quiet().await;

    harness.orchestrator.shutdown().await;
}

// ============================================================================
// Admission control and idempotency
// ============================================================================

#[tokio::test]
async fn capacity_one_keeps_first_repository_only() {
    let mut harness = Harness::new(SyncConfig {
        max_repositories: 1,
        debounce: DEBOUNCE,
        ..SyncConfig::default()
    })
    .await;
    let a = create_repo("{}");
    let b = create_repo("{}");

    harness.add(&repo_key(&a)).await;
    assert_eq!(
        harness.orchestrator.add_repository(&repo_key(&b)).await,
        Ok(AddOutcome::AtCapacity)
    );
    harness.assert_quiet().await;

    assert_eq!(
        harness.orchestrator.get_monitored_repositories().await,
        vec![repo_key(&a)]
    );

    // B is not watched either
    write_tasks(b.path(), r#"{"ignored":true}"#);
    harness.assert_quiet().await;

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn duplicate_add_and_unknown_remove_are_silent() {
    let mut harness = Harness::with_defaults().await;
    let repo = create_repo("{}");
    let key = repo_key(&repo);

    harness.add(&key).await;
    assert_eq!(
        harness.orchestrator.add_repository(&key).await,
        Ok(AddOutcome::AlreadyMonitored)
    );
    assert!(!harness.orchestrator.remove_repository("/never/added").await);
    harness.assert_quiet().await;

    assert_eq!(harness.orchestrator.get_monitored_repositories().await.len(), 1);

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn removed_repository_stops_producing_updates() {
    let mut harness = Harness::with_defaults().await;
    let repo = create_repo("{}");
    let key = repo_key(&repo);
    harness.add(&key).await;

    assert!(harness.orchestrator.remove_repository(&key).await);
    let message = harness.next_message().await;
    assert_eq!(message["event"], "REPOSITORY_REMOVED");
    assert_eq!(message["repositoryPath"], key.as_str());

    write_tasks(repo.path(), r#"{"after":"removal"}"#);
    harness.assert_quiet().await;

    harness.orchestrator.shutdown().await;
}

// ============================================================================
// Stats reconciliation
// ============================================================================

#[tokio::test]
async fn readding_picks_up_tasks_file_created_later() {
    let mut harness = Harness::with_defaults().await;
    let repo = TempDir::new().unwrap();
    let key = repo_key(&repo);
    harness.add(&key).await;

    let stats = harness.orchestrator.get_stats().await;
    assert_eq!(stats.monitored_repositories, 1);
    assert_eq!(stats.watcher_stats.watched_repositories, 0);

    let file = tasks_file_path(repo.path());
    std::fs::create_dir_all(file.parent().unwrap()).unwrap();
    std::fs::write(&file, "{}").unwrap();

    assert_eq!(
        harness.orchestrator.add_repository(&key).await,
        Ok(AddOutcome::AlreadyMonitored)
    );
    let stats = harness.orchestrator.get_stats().await;
    assert_eq!(stats.watcher_stats.watched_repositories, 1);
    assert_eq!(stats.watcher_stats.active_watchers, 1);

    write_tasks(repo.path(), r#"{"late":true}"#);
    let message = harness.next_message().await;
    assert_eq!(message["event"], "TASKS_UPDATED");
    assert_eq!(message["payload"]["tasks"]["late"], true);

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn stats_agree_with_monitored_set() {
    let mut harness = Harness::with_defaults().await;
    let repos: Vec<TempDir> = (0..3).map(|_| create_repo("{}")).collect();

    for repo in &repos {
        harness.add(&repo_key(repo)).await;
    }
    assert!(harness.orchestrator.remove_repository(&repo_key(&repos[1])).await);
    harness.next_message().await;

    let stats = harness.orchestrator.get_stats().await;
    let monitored = harness.orchestrator.get_monitored_repositories().await;

    assert!(stats.is_initialized);
    assert_eq!(stats.monitored_repositories, 2);
    assert_eq!(stats.monitored_repositories, monitored.len());
    assert_eq!(stats.watcher_stats.watched_repositories, monitored.len());
    assert_eq!(stats.watcher_stats.active_watchers, monitored.len());
    assert_eq!(stats.connected_clients, 1);
    assert_eq!(monitored, vec![repo_key(&repos[0]), repo_key(&repos[2])]);

    harness.orchestrator.shutdown().await;
}

// ============================================================================
// Shutdown completeness
// ============================================================================

#[tokio::test]
async fn shutdown_cancels_pending_updates() {
    let debounce = Duration::from_millis(200);
    let mut harness = Harness::new(SyncConfig {
        debounce,
        ..SyncConfig::default()
    })
    .await;
    let repo = create_repo("{}");
    let key = repo_key(&repo);
    harness.add(&key).await;

    write_tasks(repo.path(), r#"{"pending":true}"#);
    harness.orchestrator.shutdown().await;

    let message = harness.next_message().await;
    assert_eq!(message["event"], "REPOSITORY_REMOVED");

    sleep(debounce * 2).await;
    harness.assert_quiet().await;

    let stats = harness.orchestrator.get_stats().await;
    assert!(!stats.is_initialized);
    assert_eq!(stats.watcher_stats.pending_timers, 0);
    assert!(harness.orchestrator.get_monitored_repositories().await.is_empty());
}

// ============================================================================
// Content handling
// ============================================================================

#[tokio::test]
async fn malformed_content_still_broadcasts_update() {
    let mut harness = Harness::with_defaults().await;
    let repo = create_repo("{}");
    harness.add(&repo_key(&repo)).await;

    write_tasks(repo.path(), "{ this is not json");

    let message = harness.next_message().await;
    assert_eq!(message["event"], "TASKS_UPDATED");
    assert_eq!(message["payload"]["changeType"], "change");
    assert!(message["payload"].get("tasks").is_none());

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn deleting_tasks_file_broadcasts_unlink() {
    let mut harness = Harness::with_defaults().await;
    let repo = create_repo("{}");
    harness.add(&repo_key(&repo)).await;

    std::fs::remove_file(tasks_file_path(repo.path())).unwrap();

    let message = harness.next_message().await;
    assert_eq!(message["event"], "TASKS_UPDATED");
    assert_eq!(message["payload"]["changeType"], "unlink");
    assert!(message["payload"].get("tasks").is_none());

    harness.orchestrator.shutdown().await;
}

#[tokio::test]
async fn every_client_receives_updates() {
    let mut harness = Harness::with_defaults().await;
    let mut second = harness.sink.connect().await;
    assert_eq!(next_frame(&mut second).await["type"], "connected");

    let repo = create_repo("{}");
    harness.add(&repo_key(&repo)).await;
    assert_eq!(next_frame(&mut second).await["data"]["event"], "REPOSITORY_ADDED");

    write_tasks(repo.path(), r#"{"shared":1}"#);

    assert_eq!(harness.next_message().await["payload"]["tasks"]["shared"], 1);
    assert_eq!(next_frame(&mut second).await["data"]["payload"]["tasks"]["shared"], 1);

    harness.orchestrator.shutdown().await;
    harness.sink.close().await;
    assert!(second.recv().await.is_some()); // REPOSITORY_REMOVED
    assert!(second.recv().await.is_none());
}
