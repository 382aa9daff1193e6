//! Registry actor commands, errors, and events.
//!
//! This module defines the message types for communicating with the `RegistryActor`:
//! - `RegistryCommand`: Commands sent to the actor
//! - `RegistryError`: Errors that can occur during registry operations
//! - `RegistryEvent`: Events published by the registry for subscribers

use datchat_core::Username;
use thiserror::Error;
use tokio::sync::oneshot;

use crate::handle::{ConnectionHandle, ConnectionId};

// ============================================================================
// Registry Commands
// ============================================================================

/// Commands sent to the registry actor.
///
/// Each command uses a oneshot channel for the response, enabling
/// request-response patterns in async code without blocking.
#[derive(Debug)]
pub enum RegistryCommand {
    /// Insert a freshly handshaken connection.
    ///
    /// With `replay_roster`, the newcomer's queue first receives one
    /// PRESENCE(ONLINE) per connection already registered, in the same
    /// step as the insert.
    ///
    /// # Errors
    /// - `RegistryError::DuplicateId` if the id is already present
    /// - `RegistryError::RegistryFull` if at maximum capacity
    /// - `RegistryError::RosterReplay` if the newcomer could not take the roster
    Register {
        /// The handle to insert (boxed to reduce enum size variance)
        handle: Box<ConnectionHandle>,
        /// Queue the current roster on the newcomer before inserting
        replay_roster: bool,
        /// Channel to send the result
        respond_to: oneshot::Sender<Result<(), RegistryError>>,
    },

    /// Remove a connection. Removing an absent id answers `None`.
    Unregister {
        /// ID of the connection to remove
        id: ConnectionId,
        /// Channel to send the removed handle, if any
        respond_to: oneshot::Sender<Option<ConnectionHandle>>,
    },

    /// Point-in-time copy of every registered handle, ascending by id.
    Snapshot {
        /// Channel to send the results
        respond_to: oneshot::Sender<Vec<ConnectionHandle>>,
    },

    /// Number of registered handles.
    Count {
        /// Channel to send the count
        respond_to: oneshot::Sender<usize>,
    },
}

// ============================================================================
// Registry Errors
// ============================================================================

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// An id was registered twice. Ids are allocated monotonically, so
    /// this is an internal invariant violation.
    #[error("connection id {0} is already registered")]
    DuplicateId(ConnectionId),

    /// The registry has reached its maximum connection capacity.
    #[error("registry is full (max: {max} connections)")]
    RegistryFull {
        /// Maximum number of connections allowed
        max: usize,
    },

    /// The newcomer's queue refused the roster; it was not inserted.
    #[error("roster replay to connection {0} failed")]
    RosterReplay(ConnectionId),

    /// The response channel was closed before receiving a response.
    ///
    /// This typically indicates the actor was shut down.
    #[error("response channel closed")]
    ChannelClosed,
}

impl RegistryError {
    /// True for errors that indicate a bug rather than a runtime condition.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::DuplicateId(_))
    }
}

// ============================================================================
// Registry Events
// ============================================================================

/// Events published by the registry to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryEvent {
    /// A connection was inserted.
    Registered {
        id: ConnectionId,
        username: Username,
        /// Registry size after the insert
        online: usize,
    },

    /// A connection was removed.
    Unregistered {
        id: ConnectionId,
        username: Username,
        /// Registry size after the removal
        online: usize,
    },
}
