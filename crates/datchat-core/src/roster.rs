//! Client-side view of who is online.

use std::collections::BTreeMap;

use tracing::debug;

use crate::presence::{OnlineStatus, PresenceRecord};
use crate::username::Username;

/// Online users as seen by one client, deduplicated by (username, host).
///
/// Presence updates arrive as individual PRESENCE envelopes: the roster
/// replay at join time, then one per join or departure. Applying an
/// ONLINE record inserts or refreshes the user; OFFLINE removes it.
#[derive(Debug, Default, Clone)]
pub struct Roster {
    users: BTreeMap<(Username, String), PresenceRecord>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a presence record. Returns true if the roster changed.
    pub fn apply(&mut self, record: &PresenceRecord) -> bool {
        let key = (record.username.clone(), record.remote_host.clone());
        match record.status {
            OnlineStatus::Online => {
                let changed = self.users.get(&key) != Some(record);
                self.users.insert(key, record.clone());
                changed
            }
            OnlineStatus::Offline => {
                let removed = self.users.remove(&key).is_some();
                if !removed {
                    debug!(username = %record.username, "OFFLINE for unknown user ignored");
                }
                removed
            }
        }
    }

    /// Online users sorted by username, then host.
    pub fn users(&self) -> Vec<&PresenceRecord> {
        self.users.values().collect()
    }

    pub fn contains(&self, username: &str) -> bool {
        self.users.keys().any(|(name, _)| name.as_str() == username)
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn clear(&mut self) {
        self.users.clear();
    }
}
