//! Presence registry using the Actor pattern.
//!
//! The registry is the authoritative set of live connections. It receives
//! commands via a tokio mpsc channel and is the only place that mutates
//! that set.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐     ┌─────────────────┐     ┌──────────────────┐
//! │   Read-loops    │────▶│  RegistryActor  │────▶│ Broadcast Channel│
//! └─────────────────┘     └─────────────────┘     └──────────────────┘
//!         │                       │                       │
//!         │   RegistryCommand     │   RegistryEvent       │
//!         │   (mpsc channel)      │   (broadcast)         │
//!         ▼                       ▼                       ▼
//!   register/unregister   BTreeMap<ConnectionId,     server event log
//!   snapshot              ConnectionHandle>
//! ```

use tokio::sync::{broadcast, mpsc};

mod actor;
mod commands;
mod handle;

pub use actor::{RegistryActor, DEFAULT_MAX_CONNECTIONS};
pub use commands::{RegistryCommand, RegistryError, RegistryEvent};
pub use handle::RegistryHandle;

/// Channel buffer sizes
const COMMAND_BUFFER: usize = 100;
const EVENT_BUFFER: usize = 100;

/// Spawn the registry actor and return a handle for interaction.
///
/// Must be called from within a tokio runtime. The actor stops once every
/// clone of the returned handle has been dropped.
///
/// # Example
///
/// ```no_run
/// use datchatd::registry::spawn_registry;
///
/// #[tokio::main]
/// async fn main() {
///     let registry = spawn_registry(16);
///     assert!(registry.snapshot().await.is_empty());
/// }
/// ```
pub fn spawn_registry(max_connections: usize) -> RegistryHandle {
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (event_tx, _) = broadcast::channel(EVENT_BUFFER);

    let actor = RegistryActor::new(cmd_rx, event_tx.clone(), max_connections);
    tokio::spawn(actor.run());

    RegistryHandle::new(cmd_tx, event_tx)
}
