//! Presence records: one user's online/offline visibility.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::username::Username;

/// Online state carried by a presence record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OnlineStatus {
    Online,
    Offline,
}

impl fmt::Display for OnlineStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Online => write!(f, "ONLINE"),
            Self::Offline => write!(f, "OFFLINE"),
        }
    }
}

/// Visibility state for one connected (or departed) user.
///
/// Two records describe the same user when both `username` and
/// `remote_host` match; the connection id is deliberately not part of
/// the record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceRecord {
    pub username: Username,
    pub remote_host: String,
    pub connected_at_epoch_millis: i64,
    pub status: OnlineStatus,
}

impl PresenceRecord {
    pub fn new(
        username: Username,
        remote_host: impl Into<String>,
        connected_at: DateTime<Utc>,
        status: OnlineStatus,
    ) -> Self {
        Self {
            username,
            remote_host: remote_host.into(),
            connected_at_epoch_millis: connected_at.timestamp_millis(),
            status,
        }
    }

    /// Returns true if `other` identifies the same (username, host) pair.
    pub fn is_same_user(&self, other: &PresenceRecord) -> bool {
        self.username == other.username && self.remote_host == other.remote_host
    }

    /// Copy of this record with a different status.
    #[must_use]
    pub fn with_status(&self, status: OnlineStatus) -> Self {
        Self {
            status,
            ..self.clone()
        }
    }

    /// Connection time as a timestamp, if the millis are in range.
    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.connected_at_epoch_millis).single()
    }

    pub fn is_online(&self) -> bool {
        self.status == OnlineStatus::Online
    }
}

impl fmt::Display for PresenceRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "User Status:  {} - {} - {} - {}",
            self.username, self.status, self.remote_host, self.connected_at_epoch_millis
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(name: &str, host: &str) -> PresenceRecord {
        PresenceRecord {
            username: Username::new_unchecked(name),
            remote_host: host.to_string(),
            connected_at_epoch_millis: 1_700_000_000_000,
            status: OnlineStatus::Online,
        }
    }

    #[test]
    fn test_same_user_ignores_status_and_time() {
        let a = record("alice", "10.0.0.1");
        let mut b = a.with_status(OnlineStatus::Offline);
        b.connected_at_epoch_millis = 0;
        assert!(a.is_same_user(&b));
    }

    #[test]
    fn test_same_name_different_host_is_different_user() {
        assert!(!record("alice", "10.0.0.1").is_same_user(&record("alice", "10.0.0.2")));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(record("alice", "localhost")).unwrap();
        assert_eq!(json["username"], "alice");
        assert_eq!(json["remoteHost"], "localhost");
        assert_eq!(json["connectedAtEpochMillis"], 1_700_000_000_000_i64);
        assert_eq!(json["status"], "ONLINE");
    }

    #[test]
    fn test_connected_at_roundtrip() {
        let now = Utc.timestamp_millis_opt(1_700_000_000_123).single().unwrap();
        let rec = PresenceRecord::new(
            Username::new_unchecked("bob"),
            "host",
            now,
            OnlineStatus::Online,
        );
        assert_eq!(rec.connected_at(), Some(now));
    }

    #[test]
    fn test_display() {
        let text = record("alice", "h").to_string();
        assert!(text.contains("alice"));
        assert!(text.contains("ONLINE"));
    }
}
