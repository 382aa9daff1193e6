//! Channel-backed sink.
//!
//! Sink callbacks run on the client's reader task. [`ChannelSink`] turns
//! each callback into a [`ChatEvent`] and forwards it, so a front end can
//! handle chat activity in its own event loop.

use tokio::sync::mpsc;
use tracing::trace;

use datchat_core::{ChatEvent, ChatSink, PresenceRecord};

/// Forwards every callback as a [`ChatEvent`].
///
/// Events are dropped once the receiver is gone.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<ChatEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::UnboundedSender<ChatEvent>) -> Self {
        Self { tx }
    }

    /// Creates a sink together with its receiving end.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ChatEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    fn forward(&self, event: ChatEvent) {
        if self.tx.send(event).is_err() {
            trace!("Chat event receiver dropped");
        }
    }
}

impl ChatSink for ChannelSink {
    fn on_chat_line(&self, line: &str) {
        self.forward(ChatEvent::ChatLine(line.to_string()));
    }

    fn on_presence_changed(&self, record: &PresenceRecord) {
        self.forward(ChatEvent::PresenceChanged(record.clone()));
    }

    fn on_connection_lost(&self) {
        self.forward(ChatEvent::ConnectionLost);
    }

    fn on_server_event(&self, line: &str) {
        self.forward(ChatEvent::ServerEvent(line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwards_in_order() {
        let (sink, mut rx) = ChannelSink::channel();
        sink.on_chat_line("one");
        sink.on_connection_lost();

        assert_eq!(rx.try_recv().unwrap(), ChatEvent::ChatLine("one".into()));
        assert_eq!(rx.try_recv().unwrap(), ChatEvent::ConnectionLost);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (sink, rx) = ChannelSink::channel();
        drop(rx);
        sink.on_chat_line("nobody home");
    }
}
