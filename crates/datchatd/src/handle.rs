//! Per-connection identity and write capability.
//!
//! A [`ConnectionHandle`] is what the registry stores and what a broadcast
//! writes to. It is cheap to clone: clones share the same outbound queue and
//! the same close signal. Sending only enqueues; one [`OutboundWriter`] task
//! per connection drains the queue onto the transport, so a recipient that
//! stops reading never stalls the sender. The read half is never part of the
//! handle; it is owned by exactly one read-loop.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::SinkExt;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::timeout;
use tokio_util::codec::FramedWrite;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use datchat_core::{OnlineStatus, PresenceRecord, Username};
use datchat_protocol::{Envelope, EnvelopeCodec};

use crate::server::ConnectionError;

/// Type-erased read half of a transport.
pub type BoxedReader = Box<dyn AsyncRead + Send + Sync + Unpin>;

/// Type-erased write half of a transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Sync + Unpin>;

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_QUEUE_LEN: usize = 1024;

// ============================================================================
// Connection Ids
// ============================================================================

/// Process-unique connection identifier, assigned at accept time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
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

/// Monotonic id allocator owned by the acceptor.
///
/// Ids start at 1 and are never reused for the life of the allocator.
#[derive(Debug, Default)]
pub struct ConnectionIds {
    last: AtomicU64,
}

impl ConnectionIds {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates the next id.
    pub fn next_id(&self) -> ConnectionId {
        ConnectionId(self.last.fetch_add(1, Ordering::Relaxed).wrapping_add(1))
    }
}

// ============================================================================
// Connection Handle
// ============================================================================

/// A registered, live connection.
///
/// Created only after the username handshake succeeds; the username and
/// connection time never change afterwards.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    username: Username,
    remote_host: String,
    connected_at: DateTime<Utc>,
    outbound: mpsc::Sender<Envelope>,
    closed: CancellationToken,
}

impl ConnectionHandle {
    /// Creates a handle around a connection's outbound queue.
    ///
    /// `closed` is the connection's close signal: cancelling it makes the
    /// owning read-loop stop reading and tear the connection down.
    pub fn new(
        id: ConnectionId,
        username: Username,
        remote_host: impl Into<String>,
        connected_at: DateTime<Utc>,
        outbound: mpsc::Sender<Envelope>,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            username,
            remote_host: remote_host.into(),
            connected_at,
            outbound,
            closed,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn remote_host(&self) -> &str {
        &self.remote_host
    }

    pub fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// This connection's presence record with the given status.
    pub fn presence(&self, status: OnlineStatus) -> PresenceRecord {
        PresenceRecord::new(
            self.username.clone(),
            self.remote_host.clone(),
            self.connected_at,
            status,
        )
    }

    /// Queues one envelope for this connection's writer task.
    ///
    /// Never waits. Fails if the connection is closed or its queue is full;
    /// either way the recipient is considered dead.
    pub fn send(&self, envelope: Envelope) -> Result<(), ConnectionError> {
        if self.closed.is_cancelled() {
            return Err(ConnectionError::Closed);
        }

        self.outbound.try_send(envelope).map_err(|e| match e {
            TrySendError::Full(_) => ConnectionError::Backlogged,
            TrySendError::Closed(_) => ConnectionError::Closed,
        })
    }

    /// Signals the owning read-loop to close the transport.
    ///
    /// Idempotent; the read-loop performs the actual shutdown.
    pub fn close(&self) {
        self.closed.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("username", &self.username)
            .field("remote_host", &self.remote_host)
            .field("connected_at", &self.connected_at)
            .field("closed", &self.closed.is_cancelled())
            .finish()
    }
}

// ============================================================================
// Outbound Writer
// ============================================================================

/// Drains one connection's outbound queue onto its transport.
///
/// Each write is bounded by the write timeout. A failed or timed-out write
/// fires the close signal so the read-loop tears the connection down. On
/// exit the writer flushes whatever is still queued (unless the transport
/// already failed) and shuts the transport down, all within one more write
/// timeout.
pub struct OutboundWriter {
    id: ConnectionId,
    framed: FramedWrite<BoxedWriter, EnvelopeCodec>,
    queue: mpsc::Receiver<Envelope>,
    write_timeout: Duration,
    closed: CancellationToken,
}

impl OutboundWriter {
    pub fn new(
        id: ConnectionId,
        writer: BoxedWriter,
        max_frame_bytes: usize,
        queue: mpsc::Receiver<Envelope>,
        write_timeout: Duration,
        closed: CancellationToken,
    ) -> Self {
        Self {
            id,
            framed: FramedWrite::new(writer, EnvelopeCodec::with_max_frame_bytes(max_frame_bytes)),
            queue,
            write_timeout,
            closed,
        }
    }

    /// Runs until the close signal fires or every queue sender is gone.
    pub async fn run(mut self) {
        let healthy = loop {
            let envelope = tokio::select! {
                biased;
                _ = self.closed.cancelled() => break true,
                next = self.queue.recv() => match next {
                    Some(envelope) => envelope,
                    None => break true,
                },
            };

            if let Err(e) = self.write(envelope).await {
                debug!(conn_id = %self.id, error = %e, "Write failed, closing connection");
                self.closed.cancel();
                break false;
            }
        };

        self.finish(healthy).await;
    }

    async fn write(&mut self, envelope: Envelope) -> Result<(), ConnectionError> {
        match timeout(self.write_timeout, self.framed.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(ConnectionError::from_codec(e)),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    async fn finish(mut self, flush_pending: bool) {
        self.queue.close();
        let write_timeout = self.write_timeout;
        let id = self.id;

        let shutdown = async {
            if flush_pending {
                while let Some(envelope) = self.queue.recv().await {
                    if let Err(e) = self.framed.feed(envelope).await {
                        return Err(e);
                    }
                }
            }
            self.framed.close().await
        };

        match timeout(write_timeout, shutdown).await {
            Ok(Ok(())) => trace!(conn_id = %id, "Transport shut down"),
            Ok(Err(e)) => debug!(conn_id = %id, error = %e, "Error closing transport"),
            Err(_) => debug!(conn_id = %id, "Timed out closing transport"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! Queue-backed handles for unit tests.

    use super::*;

    /// Receiving end of a test handle's outbound queue.
    pub type Peer = mpsc::Receiver<Envelope>;

    pub fn handle(id: u64, name: &str) -> (ConnectionHandle, Peer) {
        handle_with_queue(id, name, 64)
    }

    pub fn handle_with_queue(id: u64, name: &str, queue_len: usize) -> (ConnectionHandle, Peer) {
        let (tx, rx) = mpsc::channel(queue_len);
        let handle = ConnectionHandle::new(
            ConnectionId::new(id),
            Username::new_unchecked(name),
            "127.0.0.1",
            Utc::now(),
            tx,
            CancellationToken::new(),
        );
        (handle, rx)
    }

    pub async fn next(peer: &mut Peer) -> Option<Envelope> {
        tokio::time::timeout(Duration::from_secs(2), peer.recv())
            .await
            .ok()
            .flatten()
    }
}
