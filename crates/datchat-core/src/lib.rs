//! datchat core - shared types for the chat relay
//!
//! This crate provides the domain types shared between
//! the broker (datchatd) and the client engine (datchat-client).
//!
//! All code follows the panic-free policy: no `.unwrap()`, `.expect()`,
//! `panic!()`, `unreachable!()`, `todo!()`, or direct indexing `[i]`.

pub mod error;
pub mod format;
pub mod presence;
pub mod roster;
pub mod sink;
pub mod username;

// Re-exports for convenience
pub use error::{DomainError, DomainResult};
pub use format::{format_chat_line, CHAT_TIME_FORMAT};
pub use presence::{OnlineStatus, PresenceRecord};
pub use roster::Roster;
pub use sink::{ChatEvent, ChatSink, NullSink};
pub use username::{Username, DEFAULT_MAX_USERNAME_CHARS};
