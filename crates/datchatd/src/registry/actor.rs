//! Registry actor - owns the set of live connections and processes commands.
//!
//! # Panic-Free Guarantees
//!
//! This module follows the panic-free policy:
//! - No `.unwrap()`, `.expect()`, `panic!()`, `unreachable!()`, `todo!()`
//! - Channel send failures are logged but don't panic

use std::collections::BTreeMap;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use datchat_core::OnlineStatus;
use datchat_protocol::Envelope;

use crate::handle::{ConnectionHandle, ConnectionId};

use super::commands::{RegistryCommand, RegistryError, RegistryEvent};

/// Default maximum number of registered connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 256;

/// The registry actor - the single owner of the presence registry.
///
/// Receives commands via mpsc channel, processes them one at a time, and
/// publishes events to subscribers. Because every register, unregister and
/// snapshot runs inside this one task, the operations are mutually
/// exclusive without an explicit lock. No I/O happens here: a snapshot
/// hands out clones and the caller queues envelopes on them. The one
/// exception is roster replay, which only enqueues on the newcomer and so
/// lands ahead of any presence change broadcast after the insert.
pub struct RegistryActor {
    /// Command receiver
    receiver: mpsc::Receiver<RegistryCommand>,

    /// Live connections; BTreeMap keeps snapshots in ascending id order
    connections: BTreeMap<ConnectionId, ConnectionHandle>,

    /// Capacity limit
    max_connections: usize,

    /// Event publisher for registry changes
    event_publisher: broadcast::Sender<RegistryEvent>,
}

impl RegistryActor {
    /// Creates a new registry actor.
    ///
    /// # Arguments
    ///
    /// * `receiver` - Channel for receiving commands
    /// * `event_publisher` - Broadcast channel for publishing events
    /// * `max_connections` - Capacity limit for registrations
    pub fn new(
        receiver: mpsc::Receiver<RegistryCommand>,
        event_publisher: broadcast::Sender<RegistryEvent>,
        max_connections: usize,
    ) -> Self {
        Self {
            receiver,
            connections: BTreeMap::new(),
            max_connections,
            event_publisher,
        }
    }

    /// Runs the actor event loop.
    ///
    /// Processes commands until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        info!(max_connections = self.max_connections, "Registry actor starting");

        while let Some(cmd) = self.receiver.recv().await {
            self.handle_command(cmd);
        }

        info!(
            connections = self.connections.len(),
            "Registry actor stopped"
        );
    }

    /// Dispatches a command to the appropriate handler.
    fn handle_command(&mut self, cmd: RegistryCommand) {
        match cmd {
            RegistryCommand::Register {
                handle,
                replay_roster,
                respond_to,
            } => {
                let result = self.handle_register(*handle, replay_roster);
                // Ignore send error - client may have dropped the receiver
                let _ = respond_to.send(result);
            }
            RegistryCommand::Unregister { id, respond_to } => {
                let removed = self.handle_unregister(id);
                let _ = respond_to.send(removed);
            }
            RegistryCommand::Snapshot { respond_to } => {
                let _ = respond_to.send(self.connections.values().cloned().collect());
            }
            RegistryCommand::Count { respond_to } => {
                let _ = respond_to.send(self.connections.len());
            }
        }
    }

    fn handle_register(
        &mut self,
        handle: ConnectionHandle,
        replay_roster: bool,
    ) -> Result<(), RegistryError> {
        let id = handle.id();

        if self.connections.contains_key(&id) {
            error!(
                conn_id = %id,
                username = %handle.username(),
                "Duplicate connection id - id allocation invariant violated"
            );
            return Err(RegistryError::DuplicateId(id));
        }

        if self.connections.len() >= self.max_connections {
            warn!(
                conn_id = %id,
                current = self.connections.len(),
                max = self.max_connections,
                "Registry is full, rejecting registration"
            );
            return Err(RegistryError::RegistryFull {
                max: self.max_connections,
            });
        }

        if replay_roster {
            self.replay_roster(&handle)?;
        }

        let username = handle.username().clone();
        self.connections.insert(id, handle);
        debug!(conn_id = %id, username = %username, online = self.connections.len(), "Registered connection");

        self.publish(RegistryEvent::Registered {
            id,
            username,
            online: self.connections.len(),
        });
        Ok(())
    }

    /// Queues PRESENCE(ONLINE) for every registered connection on `newcomer`.
    fn replay_roster(&self, newcomer: &ConnectionHandle) -> Result<(), RegistryError> {
        for existing in self.connections.values() {
            let online = Envelope::Presence(existing.presence(OnlineStatus::Online));
            if let Err(e) = newcomer.send(online) {
                debug!(
                    conn_id = %newcomer.id(),
                    error = %e,
                    "Roster replay failed, rejecting registration"
                );
                return Err(RegistryError::RosterReplay(newcomer.id()));
            }
        }
        Ok(())
    }

    fn handle_unregister(&mut self, id: ConnectionId) -> Option<ConnectionHandle> {
        let removed = self.connections.remove(&id)?;
        debug!(conn_id = %id, username = %removed.username(), "Unregistered connection");

        self.publish(RegistryEvent::Unregistered {
            id,
            username: removed.username().clone(),
            online: self.connections.len(),
        });
        Some(removed)
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.event_publisher.send(event);
    }
}
