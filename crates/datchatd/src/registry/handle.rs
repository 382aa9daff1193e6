//! Client interface for interacting with the RegistryActor.
//!
//! The `RegistryHandle` provides a cheap-to-clone interface for sending commands
//! to the registry actor and subscribing to registry events.
//!
//! # Panic-Free Guarantees
//!
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel errors are mapped to `RegistryError::ChannelClosed` or empty results

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::handle::{ConnectionHandle, ConnectionId};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// Handle for interacting with the registry actor.
///
/// This is a cheap-to-clone handle that can be shared across tasks.
/// All methods are async and communicate with the actor via channels.
#[derive(Clone)]
pub struct RegistryHandle {
    /// Command sender to the actor
    sender: mpsc::Sender<RegistryCommand>,

    /// Event broadcaster for subscribing to updates
    event_sender: broadcast::Sender<RegistryEvent>,
}

impl RegistryHandle {
    /// Create a new registry handle.
    pub fn new(
        sender: mpsc::Sender<RegistryCommand>,
        event_sender: broadcast::Sender<RegistryEvent>,
    ) -> Self {
        Self {
            sender,
            event_sender,
        }
    }

    /// Register a connection.
    ///
    /// # Errors
    ///
    /// - `RegistryError::DuplicateId` if the id is already registered
    /// - `RegistryError::RegistryFull` if the registry is at maximum capacity
    /// - `RegistryError::ChannelClosed` if the actor has shut down
    pub async fn register(&self, handle: ConnectionHandle) -> Result<(), RegistryError> {
        self.send_register(handle, false).await
    }

    /// Register a connection after queueing PRESENCE(ONLINE) for every
    /// already-registered connection on it.
    ///
    /// The replay and the insert happen in one actor step, so a departure
    /// processed afterwards always reaches the newcomer after the replay.
    ///
    /// # Errors
    ///
    /// As [`register`](Self::register), plus `RegistryError::RosterReplay`
    /// if the newcomer's queue refused the roster.
    pub async fn register_with_roster(
        &self,
        handle: ConnectionHandle,
    ) -> Result<(), RegistryError> {
        self.send_register(handle, true).await
    }

    async fn send_register(
        &self,
        handle: ConnectionHandle,
        replay_roster: bool,
    ) -> Result<(), RegistryError> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Register {
                handle: Box::new(handle),
                replay_roster,
                respond_to: tx,
            })
            .await
            .map_err(|_| RegistryError::ChannelClosed)?;

        rx.await.map_err(|_| RegistryError::ChannelClosed)?
    }

    /// Remove a connection, returning its handle if it was present.
    ///
    /// Removing an absent id (or talking to a stopped actor) returns `None`;
    /// it is never an error.
    pub async fn unregister(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        let (tx, rx) = oneshot::channel();

        self.sender
            .send(RegistryCommand::Unregister { id, respond_to: tx })
            .await
            .ok()?;

        rx.await.ok()?
    }

    /// Point-in-time copy of all registered handles, ascending by id.
    ///
    /// Safe to iterate while registrations continue. Returns an empty
    /// vector if communication with the actor fails.
    pub async fn snapshot(&self) -> Vec<ConnectionHandle> {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Snapshot { respond_to: tx })
            .await
            .is_err()
        {
            return Vec::new();
        }

        rx.await.unwrap_or_default()
    }

    /// Number of registered connections (0 if the actor is gone).
    pub async fn len(&self) -> usize {
        let (tx, rx) = oneshot::channel();

        if self
            .sender
            .send(RegistryCommand::Count { respond_to: tx })
            .await
            .is_err()
        {
            return 0;
        }

        rx.await.unwrap_or_default()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Subscribe to registry events.
    ///
    /// This is a synchronous operation - it doesn't communicate with the actor.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_sender.subscribe()
    }

    /// Check if the actor is still running.
    pub fn is_connected(&self) -> bool {
        !self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::test_support::handle;

    fn create_test_handle() -> (RegistryHandle, mpsc::Receiver<RegistryCommand>) {
        let (cmd_tx, cmd_rx) = mpsc::channel(16);
        let (event_tx, _event_rx) = broadcast::channel(16);
        (RegistryHandle::new(cmd_tx, event_tx), cmd_rx)
    }

    #[tokio::test]
    async fn test_register_sends_command() {
        let (registry, mut rx) = create_test_handle();
        let (h, _peer) = handle(9, "alice");

        let cmd_handler = tokio::spawn(async move {
            if let Some(RegistryCommand::Register {
                handle,
                replay_roster,
                respond_to,
            }) = rx.recv().await
            {
                assert_eq!(handle.id().get(), 9);
                assert!(replay_roster);
                let _ = respond_to.send(Ok(()));
                return true;
            }
            false
        });

        assert!(registry.register_with_roster(h).await.is_ok());
        assert!(cmd_handler.await.unwrap());
    }

    #[tokio::test]
    async fn test_register_channel_closed_error() {
        let (registry, rx) = create_test_handle();
        drop(rx);

        let (h, _peer) = handle(1, "alice");
        assert_eq!(
            registry.register(h).await,
            Err(RegistryError::ChannelClosed)
        );
    }

    #[tokio::test]
    async fn test_queries_degrade_on_channel_close() {
        let (registry, rx) = create_test_handle();
        drop(rx);

        assert!(registry.snapshot().await.is_empty());
        assert!(registry.unregister(ConnectionId::new(1)).await.is_none());
        assert_eq!(registry.len().await, 0);
        assert!(!registry.is_connected());
    }
}
