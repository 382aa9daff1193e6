//! Error types for the chat client.

use std::io;

use thiserror::Error;

use datchat_core::DomainError;
use datchat_protocol::CodecError;

/// Chat client errors.
#[derive(Error, Debug)]
pub enum ClientError {
    /// The broker could not be reached.
    ///
    /// Check that `datchatd` is running and the host/port are right.
    #[error("Failed to connect to {addr}: {reason}")]
    Connect { addr: String, reason: String },

    /// The configured username would be refused by the broker.
    #[error("Invalid username: {0}")]
    Handshake(#[from] DomainError),

    /// Transport failure after the connection was established.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// An envelope could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Codec(#[from] CodecError),

    /// The connection is gone; reconnect to continue.
    #[error("Not connected to broker")]
    NotConnected,
}

impl ClientError {
    /// True when reconnecting might help.
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Self::Connect { .. } | Self::Io(_) | Self::NotConnected)
    }
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_error_display() {
        let err = ClientError::Connect {
            addr: "localhost:55200".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to connect to localhost:55200: connection refused"
        );
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_handshake_error_is_not_connection_error() {
        let err = ClientError::from(DomainError::EmptyUsername);
        assert!(!err.is_connection_error());
        assert!(err.to_string().starts_with("Invalid username"));
    }
}
