//! datchat client - connection engine for chat front ends
//!
//! This crate connects to a datchat broker, performs the username
//! handshake, and reports everything the broker sends to a
//! [`ChatSink`](datchat_core::ChatSink):
//! - `client` - [`ChatClient`] connection and send/logout operations
//! - `sink` - [`ChannelSink`] for forwarding sink callbacks to an event loop
//! - `error` - [`ClientError`]
//!
//! **Panic-Free Policy:** No `.unwrap()`, `.expect()`, `panic!()`,
//! `unreachable!()`, or `todo!()` outside tests.

pub mod client;
pub mod error;
pub mod sink;

pub use client::{ChatClient, ClientConfig};
pub use error::{ClientError, Result};
pub use sink::ChannelSink;
