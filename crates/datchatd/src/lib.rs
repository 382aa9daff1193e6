//! datchat broker - presence registry and broadcast server
//!
//! This crate provides the broker side of datchat:
//! - `registry` - Presence registry actor, the single owner of live connections
//! - `broadcast` - Fail-isolated fan-out of one envelope to every connection
//! - `server` - TCP accept loop and per-connection read-loops
//! - `sinks` - Tracing and file log sinks for chat lines and server events
//! - `config` - TOML broker configuration
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       datchatd broker                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │                                                             │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │     Broker      │────▶│     RegistryActor           │   │
//! │  │  (TcpListener)  │     │  (connection set owner)     │   │
//! │  └────────┬────────┘     └──────────────┬──────────────┘   │
//! │           │                             │                   │
//! │           │ connections                 │ snapshots         │
//! │           ▼                             ▼                   │
//! │  ┌─────────────────┐     ┌─────────────────────────────┐   │
//! │  │ConnectionHandler│────▶│       Broadcaster           │   │
//! │  │ (per connection)│     │  (queued fan-out)           │   │
//! │  └─────────────────┘     └─────────────────────────────┘   │
//! │                                                             │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Panic-Free Guarantees
//!
//! All production code in this crate is panic-free:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - All fallible operations return `Result` or `Option`
//! - Channel operations handle closure gracefully

pub mod broadcast;
pub mod config;
pub mod handle;
pub mod registry;
pub mod server;
pub mod sinks;

pub use broadcast::{BroadcastReport, Broadcaster};
pub use config::{BrokerConfig, ConfigError, JoinPolicy, DEFAULT_PORT};
pub use handle::{ConnectionHandle, ConnectionId, ConnectionIds};
pub use registry::{spawn_registry, RegistryError, RegistryEvent, RegistryHandle};
pub use server::{Broker, BrokerError, ConnectionError, DisconnectReason, HandshakeError};
pub use sinks::{FileLogSink, SinkSet, TracingSink};
