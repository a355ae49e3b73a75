//! resl-daemon - Code execution daemon
//!
//! Loads the language table, primes every sandbox image, then serves
//! execution requests over a Unix socket. Every request runs its own
//! pipeline; nothing is shared between executions.

use anyhow::{Context, Result};
use clap::Parser;
use futures::StreamExt;
use resl_core::{LanguageRegistry, Pipeline};
use signal_hook::consts::signal::{SIGINT, SIGTERM};
use signal_hook_tokio::Signals;
use std::path::PathBuf;
use tokio::net::UnixListener;
use tracing_subscriber::EnvFilter;

mod config;
mod server;

use config::DaemonConfig;

#[derive(Parser)]
#[command(name = "resl-daemon")]
#[command(author, version, about = "Sandboxed code execution daemon")]
struct Args {
    /// JSON config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket path (overrides config and RESL_SOCKET)
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Language table (overrides config and RESL_LANGUAGES)
    #[arg(short, long)]
    languages: Option<PathBuf>,

    /// Skip pulling images at startup
    #[arg(long)]
    no_pull: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("resl=info".parse()?))
        .init();

    tracing::info!("resl-daemon starting");

    let args = Args::parse();

    // Load config
    let mut config = match &args.config {
        Some(path) => DaemonConfig::from_file(path)?,
        None => DaemonConfig::default(),
    };
    if let Some(socket) = args.socket {
        config.socket_path = socket;
    }
    if let Some(languages) = args.languages {
        config.languages = Some(languages);
    }
    if args.no_pull {
        config.pull_on_start = false;
    }
    tracing::info!(
        socket = ?config.socket_path,
        runtime = ?config.sandbox.runtime,
        timeout_ms = config.sandbox.timeout.as_millis() as u64,
        "configuration loaded"
    );

    let registry = LanguageRegistry::load(config.languages.as_deref())
        .context("failed to load language table")?;
    tracing::info!(languages = registry.len(), "language table ready");

    let pipeline = Pipeline::new(config.sandbox.clone(), registry);

    // An image that cannot be pulled fails startup rather than the first request
    if config.pull_on_start {
        pipeline.prime().await.context("failed to prime sandbox images")?;
    }

    // Create socket directory if needed
    if let Some(parent) = config.socket_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // Remove existing socket
    let _ = std::fs::remove_file(&config.socket_path);

    // Bind socket
    let listener = UnixListener::bind(&config.socket_path)?;
    tracing::info!(socket = ?config.socket_path, "listening");

    let mut signals = Signals::new([SIGTERM, SIGINT])?;
    let handle = signals.handle();
    let shutdown = async move {
        if let Some(signal) = signals.next().await {
            tracing::info!(signal, "received signal");
        }
    };

    // Run server
    let result = server::run(listener, pipeline, shutdown, config.drain_timeout()).await;
    handle.close();
    let _ = std::fs::remove_file(&config.socket_path);
    result.map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!("resl-daemon stopped");
    Ok(())
}
