//! Per-connection read-loop.
//!
//! Each accepted transport gets its own `ConnectionHandler` that:
//! - Reads the username handshake
//! - Registers the connection and announces it
//! - Relays chat lines until LOGOUT, EOF, a decode error, or a close signal
//! - Tears the connection down and announces the departure exactly once
//!
//! ```text
//! Handshaking ──ok──▶ Registered ──logout/eof/error/close──▶ Closing
//!      │
//!      └──bad envelope / eof / invalid name / full──▶ abandoned (never seen)
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?` or pattern matching
//! - Errors are contained to the owning connection

use std::sync::Arc;

use chrono::{Local, Utc};
use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use datchat_core::{format_chat_line, ChatSink, DomainError, OnlineStatus, Username};
use datchat_protocol::{CodecError, Envelope, EnvelopeCodec, EnvelopeKind};

use crate::broadcast::Broadcaster;
use crate::config::{BrokerConfig, JoinPolicy};
use crate::handle::{BoxedReader, BoxedWriter, ConnectionHandle, ConnectionId, OutboundWriter};
use crate::registry::{RegistryError, RegistryHandle};
use crate::sinks::SinkSet;

// ============================================================================
// Errors
// ============================================================================

/// Why a handshake was refused.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("expected TEXT username envelope, got {0}")]
    UnexpectedKind(EnvelopeKind),

    #[error("invalid username: {0}")]
    InvalidUsername(#[from] DomainError),
}

/// Errors that can occur during connection handling.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    #[error("Decode error: {0}")]
    Decode(CodecError),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Connection closed by peer")]
    Eof,

    #[error("Connection closed")]
    Closed,

    #[error("Write timeout")]
    WriteTimeout,

    #[error("Outbound queue full")]
    Backlogged,

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),
}

impl ConnectionError {
    /// Splits codec failures into transport and decode errors.
    pub fn from_codec(error: CodecError) -> Self {
        match error {
            CodecError::Io(e) => Self::Io(e.to_string()),
            other => Self::Decode(other),
        }
    }
}

/// How a registered connection ended.
#[derive(Debug)]
pub enum DisconnectReason {
    /// The client sent LOGOUT.
    Logout,
    /// The transport reached end of stream.
    Eof,
    /// A read failed or a frame did not decode.
    Error(ConnectionError),
    /// The close signal fired (broker shutdown, a failed write, or a full
    /// outbound queue).
    Closed,
}

impl DisconnectReason {
    pub fn is_graceful(&self) -> bool {
        matches!(self, Self::Logout)
    }
}

// ============================================================================
// Shared Context
// ============================================================================

/// Everything a read-loop needs from the broker.
pub struct ConnectionContext {
    pub config: BrokerConfig,
    pub registry: RegistryHandle,
    pub broadcaster: Broadcaster,
    pub sinks: SinkSet,
}

impl ConnectionContext {
    pub fn new(config: BrokerConfig, registry: RegistryHandle, sinks: SinkSet) -> Self {
        let broadcaster = Broadcaster::new(registry.clone());
        Self {
            config,
            registry,
            broadcaster,
            sinks,
        }
    }

    /// Formats a room line from the configured server name.
    fn server_line(&self, text: &str) -> String {
        format_chat_line(
            &self.config.server_name,
            text,
            self.config.max_username_chars,
            &Local::now(),
        )
    }

    /// Broadcasts a room line and reports it to the sinks.
    async fn announce(&self, line: String) {
        self.sinks.on_chat_line(&line);
        self.broadcaster.broadcast(&Envelope::Text(line)).await;
    }
}

// ============================================================================
// Connection Handler
// ============================================================================

/// Read-loop for a single accepted transport.
///
/// The write half belongs to an [`OutboundWriter`] task spawned when the
/// handler starts running; the handler itself only ever reads.
pub struct ConnectionHandler {
    id: ConnectionId,
    remote_host: String,
    reader: FramedRead<BoxedReader, EnvelopeCodec>,
    outbound: mpsc::Sender<Envelope>,
    writer: Option<OutboundWriter>,
    closed: CancellationToken,
    ctx: Arc<ConnectionContext>,
}

impl ConnectionHandler {
    /// Creates a handler in the Handshaking state.
    ///
    /// `closed` becomes the connection's close signal; the broker passes a
    /// child of its shutdown token.
    pub fn new(
        id: ConnectionId,
        remote_host: impl Into<String>,
        reader: BoxedReader,
        writer: BoxedWriter,
        closed: CancellationToken,
        ctx: Arc<ConnectionContext>,
    ) -> Self {
        let max_frame_bytes = ctx.config.max_frame_bytes;
        let (outbound, queue) = mpsc::channel(ctx.config.outbound_queue_len);
        let writer = OutboundWriter::new(
            id,
            writer,
            max_frame_bytes,
            queue,
            ctx.config.write_timeout(),
            closed.clone(),
        );
        Self {
            id,
            remote_host: remote_host.into(),
            reader: FramedRead::new(reader, EnvelopeCodec::with_max_frame_bytes(max_frame_bytes)),
            outbound,
            writer: Some(writer),
            closed,
            ctx,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Runs the connection to completion.
    ///
    /// Returns `Err` if the connection was abandoned before registration;
    /// nothing was broadcast in that case.
    pub async fn run(mut self) -> Result<DisconnectReason, ConnectionError> {
        debug!(conn_id = %self.id, host = %self.remote_host, "New connection");
        let writer_task = self.writer.take().map(|writer| tokio::spawn(writer.run()));

        let username = match self.handshake().await {
            Ok(username) => username,
            Err(e) => {
                debug!(conn_id = %self.id, error = %e, "Handshake failed, abandoning connection");
                self.stop_writer(writer_task).await;
                return Err(e);
            }
        };

        let handle = match self.register(username).await {
            Ok(handle) => handle,
            Err(e) => {
                if matches!(&e, ConnectionError::Registry(r) if r.is_invariant_violation()) {
                    error!(conn_id = %self.id, error = %e, "Registry invariant violated");
                } else {
                    warn!(conn_id = %self.id, error = %e, "Registration refused");
                }
                self.stop_writer(writer_task).await;
                return Err(e);
            }
        };

        info!(
            conn_id = %self.id,
            username = %handle.username(),
            host = %self.remote_host,
            "Client connected"
        );

        self.announce_join(&handle).await;
        let reason = self.receive_loop(&handle).await;
        self.close(&handle, &reason, writer_task).await;
        Ok(reason)
    }

    // ------------------------------------------------------------------------
    // Handshaking
    // ------------------------------------------------------------------------

    /// Reads exactly one envelope and extracts the username from it.
    async fn handshake(&mut self) -> Result<Username, ConnectionError> {
        let first = tokio::select! {
            _ = self.closed.cancelled() => return Err(ConnectionError::Closed),
            frame = self.reader.next() => frame,
        };

        match first {
            Some(Ok(Envelope::Text(raw))) => {
                let username = Username::parse(&raw, self.ctx.config.max_username_chars)
                    .map_err(HandshakeError::from)?;
                Ok(username)
            }
            Some(Ok(other)) => Err(HandshakeError::UnexpectedKind(other.kind()).into()),
            Some(Err(e)) => Err(ConnectionError::from_codec(e)),
            None => Err(ConnectionError::Eof),
        }
    }

    // ------------------------------------------------------------------------
    // Registered
    // ------------------------------------------------------------------------

    /// Inserts the connection; under roster replay the newcomer's queue
    /// receives everyone already online in the same registry step.
    async fn register(&self, username: Username) -> Result<ConnectionHandle, ConnectionError> {
        let handle = ConnectionHandle::new(
            self.id,
            username,
            self.remote_host.clone(),
            Utc::now(),
            self.outbound.clone(),
            self.closed.clone(),
        );

        let registry = &self.ctx.registry;
        match self.ctx.config.join_policy {
            JoinPolicy::RosterReplay => registry.register_with_roster(handle.clone()).await?,
            JoinPolicy::AnnounceOnly => registry.register(handle.clone()).await?,
        }
        Ok(handle)
    }

    /// Tells everyone, the newcomer included, that the newcomer is online.
    async fn announce_join(&self, handle: &ConnectionHandle) {
        let ctx = &self.ctx;

        let online = handle.presence(OnlineStatus::Online);
        ctx.sinks.on_presence_changed(&online);
        ctx.broadcaster.broadcast(&Envelope::Presence(online)).await;

        if ctx.config.announce_joins {
            let line = ctx.server_line(&format!("{} has connected.", handle.username()));
            ctx.announce(line).await;
        }
    }

    /// Relays chat until the connection ends.
    async fn receive_loop(&mut self, handle: &ConnectionHandle) -> DisconnectReason {
        loop {
            let frame = tokio::select! {
                _ = self.closed.cancelled() => return DisconnectReason::Closed,
                frame = self.reader.next() => frame,
            };

            match frame {
                Some(Ok(Envelope::Text(text))) => {
                    let line = format_chat_line(
                        handle.username().as_str(),
                        &text,
                        self.ctx.config.max_username_chars,
                        &Local::now(),
                    );
                    self.ctx.announce(line).await;
                }
                Some(Ok(Envelope::Logout)) => return DisconnectReason::Logout,
                Some(Ok(Envelope::Presence(record))) => {
                    debug!(
                        conn_id = %self.id,
                        claimed = %record.username,
                        "Ignoring client-sent presence"
                    );
                }
                Some(Err(e)) => return DisconnectReason::Error(ConnectionError::from_codec(e)),
                None => return DisconnectReason::Eof,
            }
        }
    }

    // ------------------------------------------------------------------------
    // Closing
    // ------------------------------------------------------------------------

    async fn close(
        &self,
        handle: &ConnectionHandle,
        reason: &DisconnectReason,
        writer_task: Option<JoinHandle<()>>,
    ) {
        let ctx = &self.ctx;

        ctx.registry.unregister(handle.id()).await;
        self.stop_writer(writer_task).await;

        let username = handle.username();
        let event = match reason {
            DisconnectReason::Logout => format!("{username} disconnected with a LOGOUT message."),
            DisconnectReason::Eof => format!("{username} closed the connection."),
            DisconnectReason::Error(e) => format!("{username} connection lost: {e}"),
            DisconnectReason::Closed => format!("{username} closed by server."),
        };
        info!(conn_id = %self.id, username = %username, reason = ?reason, "Client disconnected");
        ctx.sinks.on_server_event(&event);

        if ctx.config.announce_joins {
            let line = ctx.server_line(&format!("{} disconnected.", handle.username()));
            ctx.announce(line).await;
        }

        let offline = handle.presence(OnlineStatus::Offline);
        ctx.sinks.on_presence_changed(&offline);
        ctx.broadcaster.broadcast(&Envelope::Presence(offline)).await;
    }

    /// Fires the close signal and waits for the writer task to flush and
    /// shut the transport down. The writer bounds that by the write timeout.
    async fn stop_writer(&self, writer_task: Option<JoinHandle<()>>) {
        self.closed.cancel();
        if let Some(task) = writer_task {
            if let Err(e) = task.await {
                warn!(conn_id = %self.id, error = %e, "Writer task failed");
            }
        }
    }
}
