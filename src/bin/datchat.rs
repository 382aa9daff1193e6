//! datchat - terminal chat client
//!
//! # Usage
//!
//! ```bash
//! datchat localhost 55200 alice
//! ```
//!
//! Type a line and press enter to send it to the room.
//!
//! - `/who` lists who is online
//! - `/quit` logs out and exits
//!
//! Logs go to stderr; set `RUST_LOG=datchat_client=debug` for detail.

use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use datchat_client::{ChannelSink, ChatClient, ClientConfig};
use datchat_core::{ChatEvent, Roster};

/// datchat terminal client
#[derive(Parser, Debug)]
#[command(name = "datchat", version, about)]
struct Args {
    /// Broker host
    host: String,

    /// Broker port
    port: u16,

    /// Name to chat as
    username: String,
}

/// What the user typed.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Who,
    Say(&'a str),
    Nothing,
}

fn parse_input(line: &str) -> Input<'_> {
    match line.trim_end_matches(['\r', '\n']) {
        "/quit" => Input::Quit,
        "/who" => Input::Who,
        "" => Input::Nothing,
        text => Input::Say(text),
    }
}

fn print_roster(roster: &Roster) {
    println!("-- {} online --", roster.len());
    for record in roster.users() {
        println!("   {}  ({})", record.username, record.remote_host);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("datchat_client=warn".parse()?),
        )
        .init();

    let config = ClientConfig {
        host: args.host,
        port: args.port,
        username: args.username,
        ..Default::default()
    };
    let addr = config.addr();

    let (sink, mut events) = ChannelSink::channel();
    let client = ChatClient::connect(config, Arc::new(sink))
        .await
        .with_context(|| format!("Could not join chat at {addr}"))?;
    println!("Connected to {addr} as {}. /who lists users, /quit exits.", client.username());

    let mut roster = Roster::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(ChatEvent::ChatLine(line)) => println!("{line}"),
                Some(ChatEvent::PresenceChanged(record)) => {
                    if roster.apply(&record) && record.username != *client.username() {
                        let verb = if record.is_online() { "is online" } else { "went offline" };
                        println!("* {} {verb}", record.username);
                    }
                }
                Some(ChatEvent::ServerEvent(line)) => println!("* {line}"),
                Some(ChatEvent::ConnectionLost) | None => {
                    eprintln!("connection lost");
                    process::exit(1);
                }
            },

            line = lines.next_line() => {
                let line = line.context("Failed to read stdin")?;
                match line.as_deref().map(parse_input) {
                    None | Some(Input::Quit) => break,
                    Some(Input::Who) => print_roster(&roster),
                    Some(Input::Say(text)) => {
                        if let Err(e) = client.send(text).await {
                            eprintln!("send failed: {e}");
                        }
                    }
                    Some(Input::Nothing) => {}
                }
            }
        }
    }

    client.logout().await.context("Logout failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_input() {
        assert_eq!(parse_input("/quit"), Input::Quit);
        assert_eq!(parse_input("/who\r"), Input::Who);
        assert_eq!(parse_input(""), Input::Nothing);
        assert_eq!(parse_input("hello there"), Input::Say("hello there"));
        // Only exact commands are commands
        assert_eq!(parse_input("/quit now"), Input::Say("/quit now"));
    }
}
