//! Broadcast sink for fanning sync messages out to connected clients.
//!
//! The sink owns the connection set. Each connection is represented by a
//! bounded outbound queue of serialized text frames; the transport (the
//! WebSocket handler in [`routes`](crate::routes)) drains that queue into the
//! socket. Broadcasting never waits on a peer: a full queue skips that peer
//! for the current message and a closed queue is treated as not open.
//!
//! # Example
//!
//! ```rust
//! use tasksync_server::broadcast::{BroadcastSink, TransportHandle};
//! use tasksync_server::types::SyncMessage;
//!
//! # async fn example() {
//! let sink = BroadcastSink::new();
//! sink.initialize(TransportHandle::detached()).await;
//!
//! let mut client = sink.connect().await;
//! let connected = client.recv().await.unwrap();
//! assert!(connected.contains(r#""type":"connected""#));
//!
//! sink.broadcast(&SyncMessage::repository_added("/repo")).await;
//! let frame = client.recv().await.unwrap();
//! assert!(frame.contains("REPOSITORY_ADDED"));
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use crate::types::{Envelope, SyncMessage};

/// Default capacity of each connection's outbound queue.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// How long [`TransportHandle::close`] waits for the accept loop to stop.
const TRANSPORT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// A running connection-accepting transport.
///
/// Wraps the task serving connections and a trigger that asks it to stop.
#[derive(Debug)]
pub struct TransportHandle {
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl TransportHandle {
    /// Wraps a serving task that stops when `shutdown` fires.
    #[must_use]
    pub fn new(task: JoinHandle<()>, shutdown: oneshot::Sender<()>) -> Self {
        Self {
            shutdown: Some(shutdown),
            task: Some(task),
        }
    }

    /// A transport with no listener, for embedding the sink where connections
    /// are registered directly through [`BroadcastSink::connect`].
    #[must_use]
    pub fn detached() -> Self {
        Self {
            shutdown: None,
            task: None,
        }
    }

    /// Signals the transport to stop and waits a bounded time for it.
    pub async fn close(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }

        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(TRANSPORT_CLOSE_TIMEOUT, &mut task).await {
                Ok(Ok(())) => debug!("Transport stopped"),
                Ok(Err(err)) => warn!(error = %err, "Transport task ended abnormally"),
                Err(_) => {
                    warn!(
                        timeout_secs = TRANSPORT_CLOSE_TIMEOUT.as_secs(),
                        "Transport did not stop in time, aborting"
                    );
                    task.abort();
                }
            }
        }
    }
}

/// The receiving half of a registered connection.
///
/// Yields serialized frames until the sink drops the connection, after which
/// [`recv`](Self::recv) returns `None` and the transport should close the peer.
#[derive(Debug)]
pub struct ClientConnection {
    id: Uuid,
    outbound: mpsc::Receiver<String>,
}

impl ClientConnection {
    /// Returns the connection's identifier within the sink.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Waits for the next frame to deliver.
    pub async fn recv(&mut self) -> Option<String> {
        self.outbound.recv().await
    }
}

/// A member of the connection set.
#[derive(Debug)]
struct Peer {
    id: Uuid,
    outbound: mpsc::Sender<String>,
}

#[derive(Debug, Default)]
struct SinkState {
    transport: Option<TransportHandle>,
    /// Kept in connect order; broadcast delivers in this order.
    connections: Vec<Peer>,
}

/// Owns the set of live client connections.
///
/// Cheap to clone; clones share the same connection set.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    state: Arc<Mutex<SinkState>>,
    outbound_capacity: usize,
}

impl BroadcastSink {
    /// Creates a sink with the default per-connection queue capacity.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_OUTBOUND_CAPACITY)
    }

    /// Creates a sink whose connections buffer up to `capacity` frames.
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is 0.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "outbound capacity must be greater than 0");
        Self {
            state: Arc::new(Mutex::new(SinkState::default())),
            outbound_capacity: capacity,
        }
    }

    /// Attaches the sink to a transport.
    ///
    /// Initializing again replaces the previous transport: it is closed and
    /// every connection accepted under it is dropped.
    pub async fn initialize(&self, transport: TransportHandle) {
        let (previous, dropped) = {
            let mut state = self.state.lock().await;
            let previous = state.transport.replace(transport);
            let dropped = if previous.is_some() {
                std::mem::take(&mut state.connections).len()
            } else {
                0
            };
            (previous, dropped)
        };

        match previous {
            Some(previous) => {
                info!(dropped_connections = dropped, "Replacing broadcast transport");
                previous.close().await;
            }
            None => info!("Broadcast sink initialized"),
        }
    }

    /// Returns whether a transport is attached.
    pub async fn is_initialized(&self) -> bool {
        self.state.lock().await.transport.is_some()
    }

    /// Registers a new connection and queues the `connected` envelope on it.
    pub async fn connect(&self) -> ClientConnection {
        let id = Uuid::new_v4();
        let (tx, rx) = mpsc::channel(self.outbound_capacity);

        match serde_json::to_string(&Envelope::connected()) {
            Ok(frame) => {
                // The queue is empty and exclusively ours at this point.
                let _ = tx.try_send(frame);
            }
            Err(err) => warn!(error = %err, "Failed to serialize connected envelope"),
        }

        let count = {
            let mut state = self.state.lock().await;
            state.connections.push(Peer { id, outbound: tx });
            state.connections.len()
        };

        info!(connection_id = %id, clients = count, "Client connected");

        ClientConnection { id, outbound: rx }
    }

    /// Removes a connection from the set. Unknown ids are ignored.
    pub async fn disconnect(&self, id: Uuid) {
        let mut state = self.state.lock().await;
        let before = state.connections.len();
        state.connections.retain(|peer| peer.id != id);

        if state.connections.len() < before {
            info!(
                connection_id = %id,
                clients = state.connections.len(),
                "Client disconnected"
            );
        }
    }

    /// Serializes `message` once and queues it on every open connection.
    ///
    /// Returns the number of connections the frame was queued on. Before
    /// [`initialize`](Self::initialize) this logs a warning and returns 0.
    pub async fn broadcast(&self, message: &SyncMessage) -> usize {
        let mut state = self.state.lock().await;

        if state.transport.is_none() {
            warn!(
                event = message.event_name(),
                "Broadcast sink not initialized, dropping message"
            );
            return 0;
        }

        let frame = match serde_json::to_string(&Envelope::broadcast(message.clone())) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(error = %err, "Failed to serialize broadcast envelope");
                return 0;
            }
        };

        let mut delivered = 0;
        for peer in &state.connections {
            match peer.outbound.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(connection_id = %peer.id, "Client queue full, skipping message");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!(connection_id = %peer.id, "Skipping closed connection");
                }
            }
        }

        // Peers whose transport side went away without a disconnect call.
        state.connections.retain(|peer| !peer.outbound.is_closed());

        debug!(
            event = message.event_name(),
            repository = message.repository_path(),
            delivered,
            "Broadcast sync message"
        );

        delivered
    }

    /// Returns the size of the connection set.
    pub async fn client_count(&self) -> usize {
        self.state.lock().await.connections.len()
    }

    /// Closes the transport and drops every connection. Idempotent.
    pub async fn close(&self) {
        let (transport, dropped) = {
            let mut state = self.state.lock().await;
            let dropped = std::mem::take(&mut state.connections).len();
            (state.transport.take(), dropped)
        };

        if transport.is_none() && dropped == 0 {
            return;
        }

        if let Some(transport) = transport {
            transport.close().await;
        }

        info!(dropped_connections = dropped, "Broadcast sink closed");
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new()
    }
}
