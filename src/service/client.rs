use crate::core::codec::PacketCodec;
use crate::core::serialization::Serialization;
use crate::error::{RemoteError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::message::{Fault, InvocationRequest, Message, ObjectId};
use crate::protocol::value::Value;
use crate::transport::connection::{Connection, ConnectionId, ConnectionReader};
use crate::transport::stream::StreamProvider;
use crate::utils::metrics::Metrics;
use crate::utils::timeout::{with_timeout_error, DEFAULT_TIMEOUT};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};

type Pending = Mutex<HashMap<u64, oneshot::Sender<Message>>>;

/// Outcome of a remote call: the returned value or the fault the server
/// reported.
pub type CallResult = std::result::Result<Value, Fault>;

/// Peer that issues invocations against a remote object space.
///
/// Calls may run concurrently; responses are matched to callers by request
/// id. Must use the same serialization format and stream treatment as the
/// server.
pub struct Client {
    connection: Arc<Connection>,
    pending: Arc<Pending>,
    next_id: AtomicU64,
    reader: JoinHandle<()>,
    timeout: Duration,
    metrics: Arc<Metrics>,
}

impl Client {
    #[instrument(skip(addr, serialization, streams))]
    pub async fn connect<A: ToSocketAddrs>(
        addr: A,
        serialization: Arc<dyn Serialization>,
        streams: Arc<dyn StreamProvider>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let metrics = Arc::new(Metrics::new());
        let (connection, reader) = Connection::from_stream(
            ConnectionId::new(0),
            stream,
            Envelope::new(serialization, streams),
            PacketCodec::default(),
            metrics.clone(),
        )?;
        debug!(peer = %connection.peer_addr(), "Client connected");

        let pending: Arc<Pending> = Arc::new(Mutex::new(HashMap::new()));
        let reader = tokio::spawn(read_replies(connection.clone(), reader, pending.clone()));

        Ok(Self {
            connection,
            pending,
            next_id: AtomicU64::new(1),
            reader,
            timeout: DEFAULT_TIMEOUT,
            metrics,
        })
    }

    /// How long a call waits for its response
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Call `method` on `object_id` and wait for the response.
    ///
    /// The outer `Result` is the transport outcome; the inner one is what
    /// the remote side answered.
    pub async fn invoke(
        &self,
        object_id: impl Into<ObjectId>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<CallResult> {
        let request_id = self.next_id();
        let request = InvocationRequest::new(request_id, object_id, method, args);
        match self.request(request_id, Message::Request(request)).await? {
            Message::Response(response) => Ok(response.result),
            other => Err(RemoteError::Custom(format!(
                "Unexpected reply to request {request_id}: {}",
                other.kind()
            ))),
        }
    }

    /// Call `method` without waiting for, or receiving, a response.
    pub async fn notify(
        &self,
        object_id: impl Into<ObjectId>,
        method: &str,
        args: Vec<Value>,
    ) -> Result<()> {
        let request = InvocationRequest::new(self.next_id(), object_id, method, args).one_way();
        self.connection.send(&Message::Request(request)).await
    }

    /// Round trip time of a keep-alive ping
    pub async fn ping(&self) -> Result<Duration> {
        let id = self.next_id();
        let started = Instant::now();
        match self.request(id, Message::Ping { id }).await? {
            Message::Pong { id: echoed } if echoed == id => Ok(started.elapsed()),
            other => Err(RemoteError::Custom(format!(
                "Unexpected reply to ping {id}: {}",
                other.kind()
            ))),
        }
    }

    /// Send a message as is. Replies, if any, are not awaited.
    pub async fn send(&self, message: &Message) -> Result<()> {
        self.connection.send(message).await
    }

    /// Handle bound to one remote object
    pub fn proxy(&self, object_id: impl Into<ObjectId>) -> RemoteHandle<'_> {
        RemoteHandle {
            client: self,
            object_id: object_id.into(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// Resolves once the server side has gone away or `close` was called
    pub async fn closed(&self) {
        self.connection.closed().await
    }

    pub fn metrics(&self) -> Arc<Metrics> {
        self.metrics.clone()
    }

    /// Say goodbye and close the socket. Outstanding calls fail with
    /// `ConnectionClosed`.
    pub async fn close(self) -> Result<()> {
        if !self.connection.is_closed() {
            if let Err(e) = self.connection.send(&Message::Disconnect).await {
                debug!(error = %e, "Disconnect notice not sent");
            }
        }
        self.connection.shutdown().await;
        Ok(())
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request(&self, id: u64, message: Message) -> Result<Message> {
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .map_err(|_| RemoteError::LockPoisoned("client pending calls"))?
            .insert(id, tx);
        // also runs when the caller drops this future mid-call
        let _entry = PendingCall {
            pending: &self.pending,
            id,
        };

        self.connection.send(&message).await?;
        with_timeout_error(
            async { rx.await.map_err(|_| RemoteError::ConnectionClosed) },
            self.timeout,
        )
        .await
    }

    /// Calls still waiting for a reply
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().map(|p| p.len()).unwrap_or(0)
    }
}

/// Removes a call's pending entry however the call ends.
struct PendingCall<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingCall<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.remove(&self.id);
        }
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.connection.close();
        self.reader.abort();
    }
}

/// Route replies to their waiting callers until the stream ends.
async fn read_replies(connection: Arc<Connection>, mut reader: ConnectionReader, pending: Arc<Pending>) {
    loop {
        let next = tokio::select! {
            _ = connection.closed() => break,
            next = reader.next_message() => next,
        };

        let reply = match next {
            Some(Ok(message)) => message,
            Some(Err(e)) => {
                warn!(error = %e, "Unreadable reply, closing client");
                break;
            }
            None => {
                debug!("Server closed the stream");
                break;
            }
        };

        let id = match &reply {
            Message::Response(response) => response.request_id,
            Message::Pong { id } => *id,
            Message::Ping { id } => {
                let _ = connection.send(&Message::Pong { id: *id }).await;
                continue;
            }
            Message::Disconnect => break,
            Message::Request(_) => {
                debug!("Ignoring request sent to client");
                continue;
            }
        };

        let waiter = pending.lock().ok().and_then(|mut p| p.remove(&id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id, "Reply for unknown or abandoned call"),
        }
    }

    connection.close();
    // Dropping the senders fails every outstanding call
    if let Ok(mut pending) = pending.lock() {
        pending.clear();
    }
}

/// A remote object seen through a [`Client`].
#[derive(Clone)]
pub struct RemoteHandle<'a> {
    client: &'a Client,
    object_id: ObjectId,
}

impl RemoteHandle<'_> {
    pub fn object_id(&self) -> &ObjectId {
        &self.object_id
    }

    pub async fn call(&self, method: &str, args: Vec<Value>) -> Result<CallResult> {
        self.client
            .invoke(self.object_id.clone(), method, args)
            .await
    }

    pub async fn notify(&self, method: &str, args: Vec<Value>) -> Result<()> {
        self.client
            .notify(self.object_id.clone(), method, args)
            .await
    }
}
