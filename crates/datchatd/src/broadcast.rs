//! Fan-out of one envelope to every registered connection.
//!
//! The broadcaster takes a registry snapshot, then enqueues a copy of the
//! envelope on every handle in it, outside the registry actor. Enqueueing
//! never waits on a recipient's transport; each connection's writer task
//! does the actual I/O. A recipient whose queue is closed or full is dead:
//! it is unregistered and closed, and delivery to everyone else carries on.
//! Departure announcements are not sent from here; the dead connection's
//! own read-loop issues them while tearing down.

use tracing::{debug, trace};

use datchat_protocol::Envelope;

use crate::handle::{ConnectionHandle, ConnectionId};
use crate::registry::RegistryHandle;

/// Outcome of a single broadcast call.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Recipients the envelope was queued for, ascending by id
    pub delivered: Vec<ConnectionId>,
    /// Recipients that could not take it and were pruned
    pub pruned: Vec<ConnectionId>,
}

impl BroadcastReport {
    pub fn recipients(&self) -> usize {
        self.delivered.len() + self.pruned.len()
    }
}

/// Broadcast engine bound to one registry.
#[derive(Clone)]
pub struct Broadcaster {
    registry: RegistryHandle,
}

impl Broadcaster {
    pub fn new(registry: RegistryHandle) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &RegistryHandle {
        &self.registry
    }

    /// Sends `envelope` to every connection registered at snapshot time.
    ///
    /// Returns once the envelope is queued for every recipient. Any pruned
    /// recipient is already absent from the registry on return.
    pub async fn broadcast(&self, envelope: &Envelope) -> BroadcastReport {
        let recipients = self.registry.snapshot().await;
        self.deliver(&recipients, envelope).await
    }

    /// Sends `envelope` to an explicit recipient list with the same
    /// failure handling as [`broadcast`](Self::broadcast).
    pub async fn deliver(
        &self,
        recipients: &[ConnectionHandle],
        envelope: &Envelope,
    ) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for handle in recipients {
            match handle.send(envelope.clone()) {
                Ok(()) => report.delivered.push(handle.id()),
                Err(e) => {
                    debug!(
                        conn_id = %handle.id(),
                        username = %handle.username(),
                        error = %e,
                        "Recipient cannot take envelope, pruning connection"
                    );
                    self.prune(handle).await;
                    report.pruned.push(handle.id());
                }
            }
        }

        trace!(
            kind = %envelope.kind(),
            delivered = report.delivered.len(),
            pruned = report.pruned.len(),
            "Broadcast complete"
        );
        report
    }

    /// Removes a dead connection and signals its read-loop to close it.
    async fn prune(&self, handle: &ConnectionHandle) {
        // Idempotent: the read-loop may have unregistered it already
        self.registry.unregister(handle.id()).await;
        handle.close();
    }
}
