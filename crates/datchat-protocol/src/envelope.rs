//! Protocol message types exchanged between clients and the broker.

use datchat_core::PresenceRecord;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The unit of wire communication.
///
/// The payload type is fixed by the variant: TEXT carries a string,
/// LOGOUT carries nothing, PRESENCE carries a [`PresenceRecord`].
///
/// Serialized shape: `{"kind":"TEXT","payload":"hi"}`, `{"kind":"LOGOUT"}`,
/// `{"kind":"PRESENCE","payload":{...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Envelope {
    /// Chat text. Client to broker: the raw line (or the username during
    /// the handshake). Broker to client: a formatted room line.
    Text(String),

    /// Client is leaving deliberately.
    Logout,

    /// A user's presence, only sent by the broker.
    Presence(PresenceRecord),
}

impl Envelope {
    /// Creates a text envelope.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text(text.into())
    }

    /// Creates a presence envelope.
    pub fn presence(record: PresenceRecord) -> Self {
        Self::Presence(record)
    }

    /// The text payload, if this is a TEXT envelope.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// The presence payload, if this is a PRESENCE envelope.
    pub fn as_presence(&self) -> Option<&PresenceRecord> {
        match self {
            Self::Presence(record) => Some(record),
            _ => None,
        }
    }

    /// Returns the discriminant of this envelope.
    pub fn kind(&self) -> EnvelopeKind {
        match self {
            Self::Text(_) => EnvelopeKind::Text,
            Self::Logout => EnvelopeKind::Logout,
            Self::Presence(_) => EnvelopeKind::Presence,
        }
    }
}

/// Envelope discriminant, mostly useful for logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvelopeKind {
    Text,
    Logout,
    Presence,
}

impl fmt::Display for EnvelopeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text => write!(f, "TEXT"),
            Self::Logout => write!(f, "LOGOUT"),
            Self::Presence => write!(f, "PRESENCE"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datchat_core::{OnlineStatus, Username};

    #[test]
    fn test_text_serialization() {
        let json = serde_json::to_string(&Envelope::text("hi")).unwrap();
        assert_eq!(json, r#"{"kind":"TEXT","payload":"hi"}"#);
    }

    #[test]
    fn test_logout_has_no_payload() {
        let json = serde_json::to_string(&Envelope::Logout).unwrap();
        assert_eq!(json, r#"{"kind":"LOGOUT"}"#);

        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, Envelope::Logout);
    }

    #[test]
    fn test_presence_serialization() {
        let env = Envelope::presence(PresenceRecord {
            username: Username::new_unchecked("alice"),
            remote_host: "127.0.0.1".to_string(),
            connected_at_epoch_millis: 42,
            status: OnlineStatus::Offline,
        });
        let value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["kind"], "PRESENCE");
        assert_eq!(value["payload"]["username"], "alice");
        assert_eq!(value["payload"]["status"], "OFFLINE");
    }

    #[test]
    fn test_payload_type_must_match_kind() {
        assert!(serde_json::from_str::<Envelope>(r#"{"kind":"TEXT","payload":{"a":1}}"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"kind":"PRESENCE","payload":"x"}"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"kind":"SHOUT","payload":"x"}"#).is_err());
    }

    #[test]
    fn test_kind_display() {
        assert_eq!(Envelope::Logout.kind().to_string(), "LOGOUT");
        assert_eq!(Envelope::text("x").kind(), EnvelopeKind::Text);
    }
}
