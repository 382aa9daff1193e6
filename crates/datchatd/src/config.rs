//! Broker configuration.
//!
//! Loaded from a TOML file; every field has a default so an empty file (or
//! no file at all) yields a working broker.
//!
//! ```toml
//! bind = "0.0.0.0:55200"
//! server_name = "SERVER"
//! max_username_chars = 12
//! join_policy = "roster_replay"
//! announce_joins = true
//! outbound_queue_len = 1024
//! log_dir = "./logs"
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use datchat_core::DEFAULT_MAX_USERNAME_CHARS;
use datchat_protocol::DEFAULT_MAX_FRAME_BYTES;

use crate::handle::DEFAULT_OUTBOUND_QUEUE_LEN;
use crate::registry::DEFAULT_MAX_CONNECTIONS;

/// Default listen port.
pub const DEFAULT_PORT: u16 = 55200;

/// Errors loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid config value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// What a newly registered connection is told about who is online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinPolicy {
    /// The newcomer receives one PRESENCE(ONLINE) per existing user, then
    /// its own PRESENCE(ONLINE) is broadcast to everyone including itself.
    #[default]
    RosterReplay,

    /// Only the newcomer's own PRESENCE(ONLINE) broadcast is sent.
    AnnounceOnly,
}

/// Broker configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BrokerConfig {
    /// Address to listen on.
    pub bind: SocketAddr,

    /// Sender name used on server-generated room lines.
    pub server_name: String,

    /// Maximum username length accepted at handshake (characters).
    pub max_username_chars: usize,

    /// Maximum number of registered connections.
    pub max_connections: usize,

    /// Maximum encoded envelope size in bytes.
    pub max_frame_bytes: usize,

    /// Per-recipient write timeout in milliseconds.
    pub write_timeout_ms: u64,

    /// Envelopes that may wait for one connection's writer before that
    /// connection is dropped as too slow. Must exceed `max_connections` so a
    /// full roster replay always fits.
    pub outbound_queue_len: usize,

    /// Roster handling for newcomers.
    pub join_policy: JoinPolicy,

    /// Broadcast "<user> has connected." / "<user> disconnected." room lines.
    pub announce_joins: bool,

    /// Directory for chat and event log files; disabled when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            server_name: "SERVER".to_string(),
            max_username_chars: DEFAULT_MAX_USERNAME_CHARS,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            write_timeout_ms: 10_000,
            outbound_queue_len: DEFAULT_OUTBOUND_QUEUE_LEN,
            join_policy: JoinPolicy::default(),
            announce_joins: true,
            log_dir: None,
        }
    }
}

impl BrokerConfig {
    /// Loads and validates configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parses and validates configuration from a TOML string.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: BrokerConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "server_name",
                reason: "must not be empty".to_string(),
            });
        }
        if self.max_username_chars == 0 {
            return Err(ConfigError::Invalid {
                field: "max_username_chars",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Invalid {
                field: "max_connections",
                reason: "must be at least 1".to_string(),
            });
        }
        // Room for at least a LOGOUT frame
        if self.max_frame_bytes < 64 {
            return Err(ConfigError::Invalid {
                field: "max_frame_bytes",
                reason: format!("{} is below the 64 byte minimum", self.max_frame_bytes),
            });
        }
        if self.write_timeout_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "write_timeout_ms",
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.outbound_queue_len <= self.max_connections {
            return Err(ConfigError::Invalid {
                field: "outbound_queue_len",
                reason: format!(
                    "{} must exceed max_connections ({})",
                    self.outbound_queue_len, self.max_connections
                ),
            });
        }
        Ok(())
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }
}
