//! TCP front end and lifecycle for the chat broker.
//!
//! The broker:
//! - Listens on a TCP endpoint for chat clients
//! - Spawns a ConnectionHandler for each accepted transport
//! - Reports registry activity to the server event log
//! - Supports cooperative shutdown via CancellationToken
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │     Broker      │
//! │                 │
//! │   TcpListener   │
//! └───────┬─────────┘
//!         │ accept()
//!         ▼
//! ┌─────────────────┐     ┌─────────────────┐
//! │ConnectionHandler│────▶│  RegistryHandle │
//! │ (per connection)│     │                 │
//! └─────────────────┘     └─────────────────┘
//!         │                       ▲
//!         │ broadcast             │ snapshot / prune
//!         ▼                       │
//! ┌─────────────────┐             │
//! │   Broadcaster   │─────────────┘
//! └─────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations use `?` or pattern matching
//! - Accept errors are logged and the loop keeps running

mod connection;

pub use connection::{
    ConnectionContext, ConnectionError, ConnectionHandler, DisconnectReason, HandshakeError,
};

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use datchat_core::ChatSink;

use crate::broadcast::Broadcaster;
use crate::config::{BrokerConfig, ConfigError};
use crate::handle::ConnectionIds;
use crate::registry::{spawn_registry, RegistryEvent, RegistryHandle};
use crate::sinks::SinkSet;

/// How long in-flight connections get to finish tearing down on stop.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Pause after a failed accept so a persistent error cannot spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Errors that can occur in broker operations.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("Failed to bind {addr}: {error}")]
    Bind { addr: SocketAddr, error: String },

    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Broker is already running")]
    AlreadyRunning,

    #[error("Broker has been stopped")]
    Stopped,
}

/// The chat broker.
///
/// Cheap to clone; clones drive and observe the same broker, so one clone
/// can run [`start`](Self::start) while another calls [`stop`](Self::stop).
/// A broker serves at most once: after it stops it cannot be restarted.
#[derive(Clone)]
pub struct Broker {
    ctx: Arc<ConnectionContext>,
    ids: Arc<ConnectionIds>,
    cancel_token: CancellationToken,
    running: Arc<AtomicBool>,
}

impl Broker {
    /// Creates a broker and spawns its registry.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: BrokerConfig, sinks: SinkSet) -> Result<Self, BrokerError> {
        config.validate()?;
        let registry = spawn_registry(config.max_connections);
        Ok(Self {
            ctx: Arc::new(ConnectionContext::new(config, registry, sinks)),
            ids: Arc::new(ConnectionIds::new()),
            cancel_token: CancellationToken::new(),
            running: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.ctx.config
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.ctx.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.ctx.broadcaster
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Binds the configured listen address.
    pub async fn bind(&self) -> Result<TcpListener, BrokerError> {
        let addr = self.ctx.config.bind;
        TcpListener::bind(addr).await.map_err(|e| BrokerError::Bind {
            addr,
            error: e.to_string(),
        })
    }

    /// Binds the configured address and serves until [`stop`](Self::stop).
    pub async fn start(&self) -> Result<(), BrokerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already-bound listener until stopped.
    ///
    /// Returns `Ok(())` once shutdown completes; every connection has been
    /// closed and announced as offline by then.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), BrokerError> {
        if self.cancel_token.is_cancelled() {
            return Err(BrokerError::Stopped);
        }
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Err(BrokerError::AlreadyRunning);
        }

        let local = listener
            .local_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| self.ctx.config.bind.to_string());
        info!(addr = %local, "Broker listening");
        self.ctx
            .sinks
            .on_server_event(&format!("Server waiting for clients on {local}."));

        self.spawn_event_logger();

        let mut tasks = JoinSet::new();
        loop {
            tokio::select! {
                _ = self.cancel_token.cancelled() => {
                    info!("Broker shutdown requested");
                    break;
                }

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Connection task panicked");
                        }
                    }
                }

                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => self.spawn_connection(&mut tasks, stream, addr),
                        Err(e) => {
                            error!(error = %e, "Failed to accept connection");
                            tokio::time::sleep(ACCEPT_BACKOFF).await;
                        }
                    }
                }
            }
        }

        drop(listener);
        self.shutdown_connections(tasks).await;
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Requests shutdown. A no-op unless the broker is serving.
    pub fn stop(&self) {
        if !self.is_running() {
            debug!("Stop requested while not running, ignoring");
            return;
        }
        self.ctx.sinks.on_server_event("Stop requested.");
        self.cancel_token.cancel();
    }

    fn spawn_connection(&self, tasks: &mut JoinSet<()>, stream: TcpStream, addr: SocketAddr) {
        if let Err(e) = stream.set_nodelay(true) {
            debug!(peer = %addr, error = %e, "Failed to set TCP_NODELAY");
        }

        let id = self.ids.next_id();
        let (reader, writer) = stream.into_split();
        let handler = ConnectionHandler::new(
            id,
            addr.ip().to_string(),
            Box::new(reader),
            Box::new(writer),
            self.cancel_token.child_token(),
            Arc::clone(&self.ctx),
        );

        tasks.spawn(async move {
            match handler.run().await {
                Ok(reason) => debug!(conn_id = %id, reason = ?reason, "Connection finished"),
                Err(e) => debug!(conn_id = %id, error = %e, "Connection abandoned"),
            }
        });
    }

    /// Closes every live connection and waits for the read-loops to finish.
    async fn shutdown_connections(&self, mut tasks: JoinSet<()>) {
        self.ctx
            .sinks
            .on_server_event("Closing down all client connections.");

        // Child tokens already observe the cancel; close explicitly anyway
        for handle in self.ctx.registry.snapshot().await {
            handle.close();
        }

        let drain = async { while tasks.join_next().await.is_some() {} };
        if timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!(remaining = tasks.len(), "Connections did not close in time, aborting");
            tasks.abort_all();
        }

        info!("Broker stopped");
    }

    /// Mirrors registry activity into the server event log.
    fn spawn_event_logger(&self) {
        let mut event_rx = self.ctx.registry.subscribe();
        let sinks = self.ctx.sinks.clone();
        let cancel_token = self.cancel_token.clone();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel_token.cancelled() => {
                        debug!("Event logger shutting down");
                        break;
                    }

                    result = event_rx.recv() => {
                        match result {
                            Ok(event) => sinks.on_server_event(&describe_event(&event)),
                            Err(broadcast::error::RecvError::Lagged(n)) => {
                                warn!(skipped = n, "Event logger lagged, skipped events");
                            }
                            Err(broadcast::error::RecvError::Closed) => {
                                debug!("Registry event channel closed");
                                break;
                            }
                        }
                    }
                }
            }
        });
    }
}

/// Server event log line for a registry event.
fn describe_event(event: &RegistryEvent) -> String {
    match event {
        RegistryEvent::Registered {
            id,
            username,
            online,
        } => format!("Added client:  {username} ({id}), {online} online"),
        RegistryEvent::Unregistered {
            id,
            username,
            online,
        } => format!("Removed client:  {username} ({id}), {online} online"),
    }
}
