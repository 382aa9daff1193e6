//! Broker connection for chat front ends.
//!
//! This module provides the `ChatClient` which handles:
//! - Connecting to the broker over TCP
//! - The username handshake
//! - Forwarding broker envelopes to a [`ChatSink`]
//! - Sending chat lines and the LOGOUT notice
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::{FramedRead, FramedWrite};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use datchat_core::{ChatSink, Username, DEFAULT_MAX_USERNAME_CHARS};
use datchat_protocol::{Envelope, EnvelopeCodec, DEFAULT_MAX_FRAME_BYTES};

use crate::error::{ClientError, Result};

/// Default broker port.
pub const DEFAULT_PORT: u16 = 55200;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for a chat client.
///
/// # Example
///
/// ```rust
/// use datchat_client::ClientConfig;
///
/// let config = ClientConfig {
///     host: "chat.example.org".to_string(),
///     username: "alice".to_string(),
///     ..Default::default()
/// };
/// assert_eq!(config.addr(), "chat.example.org:55200");
/// ```
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Broker host name or address.
    pub host: String,

    /// Broker port.
    pub port: u16,

    /// Name to log in with.
    pub username: String,

    /// Longest username accepted before connecting; must match the broker.
    pub max_username_chars: usize,

    /// Maximum encoded envelope size in bytes.
    pub max_frame_bytes: usize,

    /// How long to wait for the TCP connect.
    pub connect_timeout: Duration,

    /// How long a single send may take.
    pub write_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: DEFAULT_PORT,
            username: String::new(),
            max_username_chars: DEFAULT_MAX_USERNAME_CHARS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            connect_timeout: Duration::from_secs(10),
            write_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// `host:port` as used for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Chat Client
// ============================================================================

type EnvelopeWriter = FramedWrite<OwnedWriteHalf, EnvelopeCodec>;
type EnvelopeReader = FramedRead<OwnedReadHalf, EnvelopeCodec>;

/// A logged-in connection to a broker.
///
/// # Connection Lifecycle
///
/// 1. [`connect`](Self::connect) opens the transport and sends the username
/// 2. A reader task forwards TEXT lines and PRESENCE records to the sink
/// 3. [`send`](Self::send) writes chat lines
/// 4. [`logout`](Self::logout) sends LOGOUT and closes the transport
///
/// If the broker goes away first, the sink receives
/// [`on_connection_lost`](ChatSink::on_connection_lost) exactly once and
/// further sends fail with [`ClientError::NotConnected`].
pub struct ChatClient {
    username: Username,
    writer: Mutex<EnvelopeWriter>,
    write_timeout: Duration,
    connected: Arc<AtomicBool>,
    cancel_token: CancellationToken,
    reader_task: Option<JoinHandle<()>>,
}

impl ChatClient {
    /// Connects to the broker and logs in.
    ///
    /// The username is validated locally first so an obviously bad name
    /// never reaches the broker, which would silently drop the connection.
    pub async fn connect(config: ClientConfig, sink: Arc<dyn ChatSink>) -> Result<Self> {
        let username = Username::parse(&config.username, config.max_username_chars)?;
        let addr = config.addr();

        let stream = match timeout(config.connect_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                return Err(ClientError::Connect {
                    addr,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ClientError::Connect {
                    addr,
                    reason: "timed out".to_string(),
                })
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "Failed to set TCP_NODELAY");
        }

        let (reader, writer) = stream.into_split();
        let codec = EnvelopeCodec::with_max_frame_bytes(config.max_frame_bytes);
        let mut writer = FramedWrite::new(writer, codec.clone());
        let reader = FramedRead::new(reader, codec);

        writer.send(Envelope::text(username.as_str())).await?;
        info!(addr = %addr, username = %username, "Connected to broker");

        let connected = Arc::new(AtomicBool::new(true));
        let cancel_token = CancellationToken::new();
        let reader_task = tokio::spawn(read_loop(
            reader,
            sink,
            Arc::clone(&connected),
            cancel_token.clone(),
        ));

        Ok(Self {
            username,
            writer: Mutex::new(writer),
            write_timeout: config.write_timeout,
            connected,
            cancel_token,
            reader_task: Some(reader_task),
        })
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Sends one chat line.
    pub async fn send(&self, text: impl Into<String>) -> Result<()> {
        self.write(Envelope::Text(text.into())).await
    }

    /// Sends LOGOUT, closes the transport and stops the reader.
    ///
    /// Does not report a lost connection to the sink.
    pub async fn logout(mut self) -> Result<()> {
        self.cancel_token.cancel();
        let result = self.write(Envelope::Logout).await;

        {
            let mut writer = self.writer.lock().await;
            if let Err(e) = writer.close().await {
                debug!(error = %e, "Error closing transport");
            }
        }
        self.connected.store(false, Ordering::SeqCst);

        if let Some(task) = self.reader_task.take() {
            if let Err(e) = task.await {
                warn!(error = %e, "Reader task failed");
            }
        }
        info!(username = %self.username, "Logged out");
        result
    }

    async fn write(&self, envelope: Envelope) -> Result<()> {
        if !self.is_connected() {
            return Err(ClientError::NotConnected);
        }

        let mut writer = self.writer.lock().await;
        match timeout(self.write_timeout, writer.send(envelope)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                "write timed out",
            ))),
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        self.cancel_token.cancel();
    }
}

/// Forwards broker envelopes to the sink until EOF, error, or logout.
async fn read_loop(
    mut reader: EnvelopeReader,
    sink: Arc<dyn ChatSink>,
    connected: Arc<AtomicBool>,
    cancel_token: CancellationToken,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel_token.cancelled() => {
                debug!("Reader stopping (logout)");
                return;
            }
            frame = reader.next() => frame,
        };

        match frame {
            Some(Ok(Envelope::Text(line))) => sink.on_chat_line(&line),
            Some(Ok(Envelope::Presence(record))) => sink.on_presence_changed(&record),
            Some(Ok(Envelope::Logout)) => debug!("Ignoring LOGOUT from broker"),
            Some(Err(e)) => {
                warn!(error = %e, "Broker connection failed");
                break;
            }
            None => {
                info!("Broker closed the connection");
                break;
            }
        }
    }

    connected.store(false, Ordering::SeqCst);
    if !cancel_token.is_cancelled() {
        sink.on_connection_lost();
    }
}
