//! HTTP route handlers for the TaskSync server.
//!
//! This module provides the network surface of the broadcast sink:
//!
//! - `GET /ws` - WebSocket endpoint; every connected client receives every
//!   sync message
//! - `GET /health` - Health check with sync statistics
//!
//! # Architecture
//!
//! All routes share application state through [`AppState`], which contains:
//! - The sync orchestrator (for statistics)
//! - The broadcast sink that WebSocket connections register with
//! - Server start time for uptime reporting
//!
//! [`serve`] runs the router on a listener and returns the
//! [`TransportHandle`] the sink is initialized with, so closing the sink also
//! stops accepting connections.
//!
//! # Example
//!
//! ```rust,no_run
//! use tasksync_server::broadcast::BroadcastSink;
//! use tasksync_server::config::SyncConfig;
//! use tasksync_server::routes::{create_router, serve, AppState};
//! use tasksync_server::sync::SyncOrchestrator;
//! use tasksync_server::watcher::WatchRegistry;
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = SyncConfig::default();
//!     let sink = BroadcastSink::new();
//!     let registry = WatchRegistry::new(config.debounce);
//!     let orchestrator = SyncOrchestrator::new(config, registry, sink.clone());
//!
//!     let app = create_router(AppState::new(orchestrator, sink.clone()));
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3001").await.unwrap();
//!     sink.initialize(serve(listener, app)).await;
//! }
//! ```

use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::Response,
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, trace, warn};

use crate::broadcast::{BroadcastSink, TransportHandle};
use crate::sync::{AddOutcome, SyncOrchestrator};
use crate::types::SyncStats;

// ============================================================================
// Application State
// ============================================================================

/// Shared application state for all route handlers.
#[derive(Clone)]
pub struct AppState {
    /// Orchestrator queried for sync statistics.
    pub orchestrator: SyncOrchestrator,

    /// Sink that WebSocket connections register with.
    pub sink: BroadcastSink,

    /// Server start time for uptime calculation.
    pub start_time: Instant,
}

impl AppState {
    /// Creates application state around an orchestrator and the sink it
    /// broadcasts through.
    #[must_use]
    pub fn new(orchestrator: SyncOrchestrator, sink: BroadcastSink) -> Self {
        Self {
            orchestrator,
            sink,
            start_time: Instant::now(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("orchestrator", &self.orchestrator)
            .field("sink", &self.sink)
            .field("start_time", &self.start_time)
            .finish()
    }
}

// ============================================================================
// Router
// ============================================================================

/// Creates the application router.
///
/// Routes:
/// - `GET /ws` - WebSocket subscription endpoint
/// - `GET /health` - Health check endpoint
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(get_ws))
        .route("/health", get(get_health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves `router` on `listener` in a background task.
///
/// The returned handle stops the server gracefully when closed; pass it to
/// [`BroadcastSink::initialize`].
pub fn serve(listener: TcpListener, router: Router) -> TransportHandle {
    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async {
                let _ = shutdown_rx.await;
            })
            .await;

        match result {
            Ok(()) => debug!("HTTP server stopped"),
            Err(err) => error!(error = %err, "Server error"),
        }
    });

    TransportHandle::new(task, shutdown_tx)
}

/// Brings the whole server up on `listener`.
///
/// The transport is attached to the sink before the orchestrator starts, so
/// the `REPOSITORY_ADDED` messages for `repositories` are broadcast rather
/// than dropped.
pub async fn start_server(
    listener: TcpListener,
    orchestrator: &SyncOrchestrator,
    sink: &BroadcastSink,
    repositories: &[String],
) {
    let app = create_router(AppState::new(orchestrator.clone(), sink.clone()));
    sink.initialize(serve(listener, app)).await;

    orchestrator.initialize().await;
    if !orchestrator.config().enabled {
        return;
    }

    for repository in repositories {
        match orchestrator.add_repository(repository).await {
            Ok(AddOutcome::AtCapacity) => {
                warn!(repository = %repository, "Skipping repository, capacity reached");
            }
            Ok(_) => {}
            Err(err) => {
                warn!(repository = %repository, error = %err, "Failed to add repository");
            }
        }
    }
}

// ============================================================================
// GET /ws - WebSocket
// ============================================================================

/// GET /ws - WebSocket subscription endpoint.
///
/// # WebSocket Protocol
///
/// The server sends a `{"type":"connected"}` frame on connect, then one
/// `{"type":"broadcast","data":...}` text frame per sync message. Messages
/// from the client are ignored. The server closes the socket when the sink
/// shuts down.
async fn get_ws(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    debug!("WebSocket client connecting");
    ws.on_upgrade(move |socket| handle_websocket(socket, state.sink))
}

/// Handles an established WebSocket connection.
///
/// Registers with the sink and forwards its outbound queue to the client
/// until either side goes away.
async fn handle_websocket(socket: WebSocket, sink: BroadcastSink) {
    use futures_util::{SinkExt, StreamExt};

    let (mut sender, mut receiver) = socket.split();
    let mut connection = sink.connect().await;
    let id = connection.id();

    info!(connection_id = %id, "WebSocket client connected");

    let mut forward_task = tokio::spawn(async move {
        while let Some(frame) = connection.recv().await {
            trace!(len = frame.len(), "Sending frame to WebSocket client");
            if let Err(err) = sender.send(Message::Text(frame.into())).await {
                debug!(error = %err, "Failed to send frame to WebSocket client");
                return;
            }
        }

        // The sink dropped this connection.
        let _ = sender.send(Message::Close(None)).await;
    });

    loop {
        tokio::select! {
            _ = &mut forward_task => break,
            msg = receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("WebSocket client sent close frame");
                    break;
                }
                Some(Ok(Message::Ping(data))) => {
                    // axum handles pong automatically
                    trace!(data_len = data.len(), "Received ping");
                }
                Some(Ok(_)) => {
                    // Ignore other messages from client
                }
                Some(Err(err)) => {
                    debug!(error = %err, "WebSocket error");
                    break;
                }
            },
        }
    }

    forward_task.abort();
    sink.disconnect(id).await;
    info!(connection_id = %id, "WebSocket client disconnected");
}

// ============================================================================
// GET /health - Health Check
// ============================================================================

/// Response body for health check endpoint.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// Server status (always "ok" if responding).
    pub status: String,

    /// Server uptime in seconds.
    pub uptime_seconds: u64,

    /// Orchestrator, watcher and connection statistics.
    pub sync: SyncStats,
}

/// GET /health - Health check endpoint.
///
/// # Response
///
/// ```json
/// {
///   "status": "ok",
///   "uptimeSeconds": 3600,
///   "sync": {
///     "isInitialized": true,
///     "enabled": true,
///     "monitoredRepositories": 2,
///     "watcherStats": { "watchedRepositories": 2, "activeWatchers": 2, "pendingTimers": 0 },
///     "connectedClients": 1
///   }
/// }
/// ```
async fn get_health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        sync: state.orchestrator.get_stats().await,
    })
}

// ============================================================================
// Tests
// ============================================================================
