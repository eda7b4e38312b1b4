//! One client session: a socket, the shared envelope, and liveness state.
//!
//! The read half is handed out separately as a [`ConnectionReader`] so the
//! read loop can own it; everything that writes goes through the
//! [`Connection`], whose write lock keeps each frame contiguous on the wire.

use crate::core::codec::PacketCodec;
use crate::error::{RemoteError, Result};
use crate::protocol::envelope::Envelope;
use crate::protocol::message::{Message, ObjectId};
use crate::utils::metrics::Metrics;
use crate::utils::timeout::WRITE_TIMEOUT;
use futures::{SinkExt, StreamExt};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Connection {
    id: ConnectionId,
    peer: SocketAddr,
    envelope: Envelope,
    writer: Mutex<FramedWrite<OwnedWriteHalf, PacketCodec>>,
    closed: CancellationToken,
    created: Instant,
    last_activity: StdMutex<Instant>,
    remote_objects: StdMutex<HashSet<ObjectId>>,
    metrics: Arc<Metrics>,
}

impl Connection {
    /// Wrap a connected socket. The stream provider prepares the socket
    /// before it is split.
    pub fn from_stream(
        id: ConnectionId,
        stream: TcpStream,
        envelope: Envelope,
        codec: PacketCodec,
        metrics: Arc<Metrics>,
    ) -> Result<(Arc<Self>, ConnectionReader)> {
        let peer = stream.peer_addr()?;
        envelope.streams().prepare(&stream)?;
        let (read_half, write_half) = stream.into_split();

        let now = Instant::now();
        let connection = Arc::new(Self {
            id,
            peer,
            envelope: envelope.clone(),
            writer: Mutex::new(FramedWrite::new(write_half, codec)),
            closed: CancellationToken::new(),
            created: now,
            last_activity: StdMutex::new(now),
            remote_objects: StdMutex::new(HashSet::new()),
            metrics: metrics.clone(),
        });

        let reader = ConnectionReader {
            id,
            frames: FramedRead::new(read_half, codec),
            envelope,
            metrics,
        };

        Ok((connection, reader))
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn age(&self) -> Duration {
        self.created.elapsed()
    }

    /// Time since the last inbound frame
    pub fn idle_time(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|t| t.elapsed())
            .unwrap_or_default()
    }

    pub(crate) fn touch(&self) {
        if let Ok(mut t) = self.last_activity.lock() {
            *t = Instant::now();
        }
    }

    /// Remember that this connection reached `object_id`.
    pub(crate) fn record_object(&self, object_id: &ObjectId) {
        if let Ok(mut objects) = self.remote_objects.lock() {
            if !objects.contains(object_id) {
                objects.insert(object_id.clone());
            }
        }
    }

    /// Registered objects this connection has successfully invoked
    pub fn remote_objects(&self) -> Vec<ObjectId> {
        let mut ids: Vec<ObjectId> = self
            .remote_objects
            .lock()
            .map(|objects| objects.iter().cloned().collect())
            .unwrap_or_default();
        ids.sort();
        ids
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Resolves once the connection is closed
    pub fn closed(&self) -> WaitForCancellationFuture<'_> {
        self.closed.cancelled()
    }

    /// Mark the connection closed. Pending and future writes are refused;
    /// the read loop notices and tears the session down.
    pub fn close(&self) {
        if !self.closed.is_cancelled() {
            debug!(connection = %self.id, "Closing connection");
            self.closed.cancel();
        }
    }

    /// Close and flush the socket's write side.
    pub async fn shutdown(&self) {
        self.close();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.get_mut().shutdown().await {
            debug!(connection = %self.id, error = %e, "Socket shutdown failed");
        }
    }

    /// Waits until no write is in progress.
    pub async fn write_barrier(&self) {
        drop(self.writer.lock().await);
    }

    /// Send one message as one frame.
    pub async fn send(&self, message: &Message) -> Result<()> {
        if self.write(message, None).await? {
            Ok(())
        } else {
            Err(RemoteError::ConnectionClosed)
        }
    }

    /// Send unless `live` has been cancelled by the time the write lock is
    /// held. Returns `Ok(false)` when the message was discarded.
    pub async fn send_while(&self, live: &CancellationToken, message: &Message) -> Result<bool> {
        self.write(message, Some(live)).await
    }

    async fn write(&self, message: &Message, live: Option<&CancellationToken>) -> Result<bool> {
        if self.is_closed() {
            return Ok(false);
        }
        let packet = self.envelope.seal(message)?;
        let len = packet.encoded_len() as u64;

        let mut writer = self.writer.lock().await;
        if self.is_closed() || live.is_some_and(CancellationToken::is_cancelled) {
            return Ok(false);
        }

        // A peer that stops reading must not pin the write lock: closing
        // the connection or unbinding it abandons the frame.
        let abandoned = async {
            match live {
                Some(live) => tokio::select! {
                    _ = self.closed.cancelled() => {}
                    _ = live.cancelled() => {}
                },
                None => self.closed.cancelled().await,
            }
        };
        let outcome = tokio::select! {
            sent = tokio::time::timeout(WRITE_TIMEOUT, writer.send(packet)) => sent,
            _ = abandoned => {
                // part of the frame may already be out, the stream is unusable
                debug!(connection = %self.id, "Write abandoned, closing connection");
                self.close();
                return Ok(false);
            }
        };
        match outcome {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(connection = %self.id, error = %e, "Write failed, closing connection");
                self.close();
                return Err(e);
            }
            Err(_) => {
                warn!(connection = %self.id, "Write timed out, closing connection");
                self.close();
                return Err(RemoteError::Timeout);
            }
        }
        self.metrics.message_sent(len);
        Ok(true)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Read half of a connection, owned by its read loop.
pub struct ConnectionReader {
    id: ConnectionId,
    frames: FramedRead<OwnedReadHalf, PacketCodec>,
    envelope: Envelope,
    metrics: Arc<Metrics>,
}

impl ConnectionReader {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Next decoded message; `None` when the peer closed the stream.
    ///
    /// Frame errors (bad magic, oversized length) and codec errors are both
    /// returned as `Err`; either way the stream cannot be trusted further.
    pub async fn next_message(&mut self) -> Option<Result<Message>> {
        let packet = match self.frames.next().await? {
            Ok(packet) => packet,
            Err(e) => return Some(Err(e)),
        };
        self.metrics.message_received(packet.encoded_len() as u64);

        let limit = self.frames.decoder().max_payload();
        let opened = self.envelope.open(packet, limit);
        if opened.is_err() {
            self.metrics.serialization_error();
        }
        Some(opened)
    }
}
