//! datchat broker - presence registry and chat relay
//!
//! Accepts chat clients over TCP, relays every chat line to everyone in
//! the room, and keeps every client's roster up to date.
//!
//! # Usage
//!
//! ```bash
//! # Listen on the default 0.0.0.0:55200
//! datchatd
//!
//! # Custom address, config file, and log directory
//! datchatd --bind 127.0.0.1:6000 --config datchatd.toml --log-dir ./logs
//!
//! # Same, via environment
//! DATCHAT_BIND=127.0.0.1:6000 DATCHAT_CONFIG=datchatd.toml datchatd
//!
//! # Enable debug logging
//! RUST_LOG=datchatd=debug datchatd
//! ```
//!
//! # Signal Handling
//!
//! - SIGTERM/SIGINT: Graceful shutdown; every client sees the others go offline

use std::net::SocketAddr;
use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use datchatd::{Broker, BrokerConfig, FileLogSink, SinkSet, TracingSink};

/// datchat broker
#[derive(Parser, Debug)]
#[command(name = "datchatd", version, about)]
struct Args {
    /// Address to listen on (overrides the config file)
    #[arg(short, long, env = "DATCHAT_BIND")]
    bind: Option<SocketAddr>,

    /// TOML configuration file
    #[arg(short, long, env = "DATCHAT_CONFIG")]
    config: Option<PathBuf>,

    /// Directory for chat and event log files (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

impl Args {
    /// Resolves the effective configuration: flags, then file, then defaults.
    fn broker_config(&self) -> Result<BrokerConfig> {
        let mut config = match &self.config {
            Some(path) => BrokerConfig::load(path)
                .with_context(|| format!("Failed to load {}", path.display()))?,
            None => BrokerConfig::default(),
        };

        if let Some(bind) = self.bind {
            config.bind = bind;
        }
        if let Some(dir) = &self.log_dir {
            config.log_dir = Some(dir.clone());
        }
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("datchatd=info".parse()?)
                .add_directive("datchat_core=info".parse()?)
                .add_directive("datchat_protocol=info".parse()?),
        )
        .init();

    let config = args.broker_config()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        pid = process::id(),
        bind = %config.bind,
        "datchat broker starting"
    );

    let mut sinks = SinkSet::new().with(Arc::new(TracingSink));
    if let Some(dir) = &config.log_dir {
        let file_sink = FileLogSink::create(dir)
            .with_context(|| format!("Failed to open log files in {}", dir.display()))?;
        info!(
            chat = %file_sink.chat_path().display(),
            events = %file_sink.event_path().display(),
            "Logging to files"
        );
        sinks.push(Arc::new(file_sink));
    }

    let broker = Broker::new(config, sinks)?;

    let signal_broker = broker.clone();
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            error!(error = %e, "Error waiting for shutdown signal");
        }
        info!("Shutdown signal received");
        signal_broker.stop();
    });

    if let Err(e) = broker.start().await {
        error!(error = %e, "Broker error");
        return Err(e.into());
    }

    info!("datchat broker stopped");
    Ok(())
}

/// Waits for a shutdown signal (SIGTERM or SIGINT).
async fn wait_for_shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut sigint = signal(SignalKind::interrupt())?;

        tokio::select! {
            _ = sigterm.recv() => {
                info!("Received SIGTERM");
            }
            _ = sigint.recv() => {
                info!("Received SIGINT");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
        info!("Received Ctrl+C");
    }

    Ok(())
}
