//! The listening side: lifecycle, accept loop and per-connection read loops.

use crate::config::ServerConfig;
use crate::core::codec::PacketCodec;
use crate::core::serialization::Serialization;
use crate::error::constants::{
    ERR_ALREADY_BOUND, ERR_CONNECTIONS_LOCK, ERR_NOT_STARTED, ERR_STOPPED,
};
use crate::error::{RemoteError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::message::Message;
use crate::transport::connection::{Connection, ConnectionId, ConnectionReader};
use crate::transport::observer::ConnectionObserver;
use crate::transport::stream::StreamProvider;
use crate::utils::metrics::Metrics;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Started,
    Listening,
    Stopped,
}

struct ServerState {
    lifecycle: Lifecycle,
    local_addr: Option<SocketAddr>,
    accept_task: Option<JoinHandle<()>>,
}

/// State shared between the server handle, its accept loop and every
/// connection task.
struct Shared {
    config: ServerConfig,
    envelope: Envelope,
    observers: RwLock<Vec<Arc<dyn ConnectionObserver>>>,
    connections: Mutex<HashMap<ConnectionId, Arc<Connection>>>,
    next_id: AtomicU64,
    metrics: Arc<Metrics>,
    shutdown: CancellationToken,
    tasks: TaskTracker,
}

/// Remote invocation server.
///
/// ```no_run
/// use remote_space::prelude::*;
/// use std::sync::Arc;
///
/// # async fn run() -> remote_space::error::Result<()> {
/// let server = Server::new(
///     ServerConfig::default(),
///     Arc::new(FormatSerialization::default()),
///     Arc::new(PlainStreams::default()),
/// );
/// let space = ObjectSpace::new();
/// server.add_observer(Arc::new(space.clone()));
///
/// server.start()?;
/// server.bind(9001).await?;
/// // ...
/// server.stop().await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    shared: Arc<Shared>,
    codec: PacketCodec,
    state: Mutex<ServerState>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        serialization: Arc<dyn Serialization>,
        streams: Arc<dyn StreamProvider>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                envelope: Envelope::new(serialization, streams),
                observers: RwLock::new(Vec::new()),
                connections: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(1),
                metrics: Arc::new(Metrics::new()),
                shutdown: CancellationToken::new(),
                tasks: TaskTracker::new(),
            }),
            codec: PacketCodec::default(),
            state: Mutex::new(ServerState {
                lifecycle: Lifecycle::Created,
                local_addr: None,
                accept_task: None,
            }),
        }
    }

    /// Cap inbound and outbound frame payloads below the protocol maximum.
    pub fn with_max_payload(mut self, max_payload: usize) -> Self {
        self.codec = PacketCodec::new(max_payload);
        self
    }

    /// Subscribe to connection lifecycle events. Observers run in
    /// registration order and see events raised after they were added.
    pub fn add_observer(&self, observer: Arc<dyn ConnectionObserver>) {
        match self.shared.observers.write() {
            Ok(mut observers) => observers.push(observer),
            Err(poisoned) => poisoned.into_inner().push(observer),
        }
    }

    /// Prepare to accept. Idempotent until the server is stopped.
    pub fn start(&self) -> Result<()> {
        let mut state = self.lock_state()?;
        match state.lifecycle {
            Lifecycle::Created => {
                state.lifecycle = Lifecycle::Started;
                debug!("Server started");
                Ok(())
            }
            Lifecycle::Started | Lifecycle::Listening => Ok(()),
            Lifecycle::Stopped => Err(RemoteError::InvalidState(ERR_STOPPED)),
        }
    }

    /// Open the listening socket on `port` (0 picks a free port) and begin
    /// accepting. Fails with `RemoteError::Bind` when the port is taken.
    #[instrument(skip(self), fields(host = %self.shared.config.host))]
    pub async fn bind(&self, port: u16) -> Result<SocketAddr> {
        self.expect_state(Lifecycle::Started)?;

        let address = format!("{}:{}", self.shared.config.host, port);
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| RemoteError::Bind {
                address: address.clone(),
                source,
            })?;
        let local_addr = listener.local_addr()?;

        {
            let mut state = self.lock_state()?;
            // stop() or another bind() may have won while we were binding
            if state.lifecycle != Lifecycle::Started {
                return Err(Self::state_error(state.lifecycle));
            }
            let shared = self.shared.clone();
            let codec = self.codec;
            state.accept_task = Some(tokio::spawn(accept_loop(listener, shared, codec)));
            state.local_addr = Some(local_addr);
            state.lifecycle = Lifecycle::Listening;
        }

        info!(port = local_addr.port(), "Server started on port {}", local_addr.port());
        Ok(local_addr)
    }

    /// Close the listener and every live connection.
    ///
    /// Safe to call repeatedly; only the first call does any work. Waits at
    /// most `shutdown_timeout` for connection tasks to finish.
    pub async fn stop(&self) -> Result<()> {
        let (accept_task, local_addr) = {
            let mut state = self.lock_state()?;
            if state.lifecycle == Lifecycle::Stopped {
                return Ok(());
            }
            state.lifecycle = Lifecycle::Stopped;
            (state.accept_task.take(), state.local_addr)
        };

        self.shared.shutdown.cancel();
        if let Some(handle) = accept_task {
            if let Err(e) = handle.await {
                warn!(error = %e, "Accept loop ended abnormally");
            }
        }

        let live = self.connections();
        info!(connections = live.len(), "Shutting down server. Closing connections...");
        for connection in &live {
            connection.close();
        }

        self.shared.tasks.close();
        let grace = self.shared.config.shutdown_timeout;
        if tokio::time::timeout(grace, self.shared.tasks.wait())
            .await
            .is_err()
        {
            warn!(
                remaining = self.connection_count(),
                "Shutdown timeout reached, abandoning connection tasks"
            );
        }

        match local_addr {
            Some(addr) => info!(port = addr.port(), "Server stopped"),
            None => info!("Server stopped"),
        }
        self.shared.metrics.log_metrics();
        Ok(())
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock_state().ok().and_then(|state| state.local_addr)
    }

    /// Bound port, once listening
    pub fn port(&self) -> Option<u16> {
        self.local_addr().map(|addr| addr.port())
    }

    pub fn is_listening(&self) -> bool {
        self.lock_state()
            .map(|state| state.lifecycle == Lifecycle::Listening)
            .unwrap_or(false)
    }

    pub fn connection_count(&self) -> usize {
        self.shared.connection_count()
    }

    /// Live connections, ordered by id
    pub fn connections(&self) -> Vec<Arc<Connection>> {
        let mut live: Vec<Arc<Connection>> = self
            .shared
            .connections
            .lock()
            .map(|connections| connections.values().cloned().collect())
            .unwrap_or_default();
        live.sort_by_key(|c| c.id());
        live
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.shared.metrics.clone()
    }

    pub fn config(&self) -> &ServerConfig {
        &self.shared.config
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, ServerState>> {
        self.state
            .lock()
            .map_err(|_| RemoteError::LockPoisoned("server state"))
    }

    fn expect_state(&self, expected: Lifecycle) -> Result<()> {
        let state = self.lock_state()?;
        if state.lifecycle == expected {
            Ok(())
        } else {
            Err(Self::state_error(state.lifecycle))
        }
    }

    fn state_error(actual: Lifecycle) -> RemoteError {
        match actual {
            Lifecycle::Created => RemoteError::InvalidState(ERR_NOT_STARTED),
            Lifecycle::Listening => RemoteError::InvalidState(ERR_ALREADY_BOUND),
            Lifecycle::Started | Lifecycle::Stopped => RemoteError::InvalidState(ERR_STOPPED),
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        // Let the accept loop and read loops wind down if stop() was skipped.
        self.shared.shutdown.cancel();
    }
}

impl Shared {
    fn observers(&self) -> Vec<Arc<dyn ConnectionObserver>> {
        match self.observers.read() {
            Ok(observers) => observers.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn connection_count(&self) -> usize {
        self.connections.lock().map(|c| c.len()).unwrap_or(0)
    }

    /// Build and register a connection, then hand it to its own task.
    fn admit(self: &Arc<Self>, stream: TcpStream, peer: SocketAddr, codec: PacketCodec) {
        let mut connections = match self.connections.lock() {
            Ok(connections) => connections,
            Err(_) => {
                error!(%peer, "{ERR_CONNECTIONS_LOCK}");
                return;
            }
        };

        if connections.len() >= self.config.max_connections {
            warn!(
                %peer,
                max = self.config.max_connections,
                "Connection rejected: max connections reached"
            );
            self.metrics.connection_rejected();
            return;
        }

        let id = ConnectionId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (connection, reader) = match Connection::from_stream(
            id,
            stream,
            self.envelope.clone(),
            codec,
            self.metrics.clone(),
        ) {
            Ok(parts) => parts,
            Err(e) => {
                warn!(%peer, error = %e, "Failed to set up connection");
                return;
            }
        };

        connections.insert(id, connection.clone());
        drop(connections);
        self.metrics.connection_established();

        self.tasks
            .spawn(run_connection(self.clone(), connection, reader));
    }

    fn remove(&self, id: ConnectionId) {
        if let Ok(mut connections) = self.connections.lock() {
            connections.remove(&id);
        }
    }
}

async fn accept_loop(listener: TcpListener, shared: Arc<Shared>, codec: PacketCodec) {
    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => {
                debug!("Accept loop stopping");
                break;
            }

            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, peer)) => {
                        debug!(%peer, "Accepted socket");
                        shared.admit(stream, peer, codec);
                    }
                    Err(e) => {
                        error!(error = %e, "Error accepting connection");
                        // Back off so fd exhaustion does not spin the loop
                        tokio::time::sleep(Duration::from_millis(50)).await;
                    }
                }
            }
        }
    }
    // listener dropped here, releasing the port
}

#[instrument(skip_all, fields(connection = %connection.id(), peer = %connection.peer_addr()))]
async fn run_connection(shared: Arc<Shared>, connection: Arc<Connection>, mut reader: ConnectionReader) {
    for observer in shared.observers() {
        observer.connected(&connection).await;
    }
    info!("Connection established");

    let idle_timeout = shared.config.idle_timeout;

    loop {
        let next = tokio::select! {
            _ = connection.closed() => break,
            _ = shared.shutdown.cancelled() => break,
            next = tokio::time::timeout(idle_timeout, reader.next_message()) => next,
        };

        let message = match next {
            Err(_) => {
                warn!(idle_ms = idle_timeout.as_millis() as u64, "Idle timeout, closing connection");
                break;
            }
            Ok(None) => {
                debug!("Peer closed the stream");
                break;
            }
            Ok(Some(Err(e))) => {
                if e.is_protocol_violation() {
                    warn!(error = %e, "Unreadable frame, closing connection");
                } else {
                    debug!(error = %e, "Transport error, closing connection");
                }
                break;
            }
            Ok(Some(Ok(message))) => message,
        };

        connection.touch();
        match message {
            Message::Ping { id } => {
                if let Err(e) = connection.send(&Message::Pong { id }).await {
                    debug!(error = %e, "Failed to answer ping");
                    break;
                }
            }
            Message::Pong { .. } => {}
            Message::Disconnect => {
                debug!("Peer requested disconnect");
                break;
            }
            message => {
                for observer in shared.observers() {
                    observer.received(&connection, message.clone()).await;
                }
            }
        }
    }

    connection.shutdown().await;
    for observer in shared.observers() {
        observer.disconnected(&connection).await;
    }
    shared.remove(connection.id());
    shared.metrics.connection_closed();
    info!("Connection closed");
}
