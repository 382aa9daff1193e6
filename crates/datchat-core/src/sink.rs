//! Outbound capability interface for whichever collaborator is active.
//!
//! The broker and the client engine report chat lines, presence changes,
//! connection loss and server events through [`ChatSink`]. A terminal UI,
//! a log writer, or a test harness implements it; the core never depends
//! on a concrete front end.

use crate::presence::PresenceRecord;

/// Receiver of chat activity. All methods default to no-ops.
pub trait ChatSink: Send + Sync {
    /// A formatted room line (already time-stamped and prefixed).
    fn on_chat_line(&self, _line: &str) {}

    /// A user's presence flipped or was replayed.
    fn on_presence_changed(&self, _record: &PresenceRecord) {}

    /// The local connection to the broker is gone.
    fn on_connection_lost(&self) {}

    /// Broker-side operational event (the server log).
    fn on_server_event(&self, _line: &str) {}
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ChatSink for NullSink {}

/// Owned form of a sink callback, for forwarding over channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    ChatLine(String),
    PresenceChanged(PresenceRecord),
    ConnectionLost,
    ServerEvent(String),
}

impl ChatEvent {
    /// Replays this event into a sink.
    pub fn dispatch(&self, sink: &dyn ChatSink) {
        match self {
            Self::ChatLine(line) => sink.on_chat_line(line),
            Self::PresenceChanged(record) => sink.on_presence_changed(record),
            Self::ConnectionLost => sink.on_connection_lost(),
            Self::ServerEvent(line) => sink.on_server_event(line),
        }
    }
}

impl<S: ChatSink + ?Sized> ChatSink for std::sync::Arc<S> {
    fn on_chat_line(&self, line: &str) {
        (**self).on_chat_line(line);
    }

    fn on_presence_changed(&self, record: &PresenceRecord) {
        (**self).on_presence_changed(record);
    }

    fn on_connection_lost(&self) {
        (**self).on_connection_lost();
    }

    fn on_server_event(&self, line: &str) {
        (**self).on_server_event(line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl ChatSink for Recorder {
        fn on_chat_line(&self, line: &str) {
            self.0.lock().unwrap().push(format!("chat:{line}"));
        }

        fn on_connection_lost(&self) {
            self.0.lock().unwrap().push("lost".to_string());
        }
    }

    #[test]
    fn test_dispatch_routes_to_matching_callback() {
        let rec = Recorder::default();
        ChatEvent::ChatLine("hello".to_string()).dispatch(&rec);
        ChatEvent::ConnectionLost.dispatch(&rec);
        // Default no-op for server events
        ChatEvent::ServerEvent("ignored".to_string()).dispatch(&rec);
        assert_eq!(*rec.0.lock().unwrap(), vec!["chat:hello", "lost"]);
    }
}
