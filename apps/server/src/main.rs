//! Castpoint Server - standalone single-listener streaming server.
//!
//! Serves an MP3 file, fed in real time and looped, to one Icecast/SHOUTcast
//! client at a time, with optional ICY stream-title metadata.

mod config;
mod feed;

use std::net::IpAddr;
use std::path::PathBuf;

use anyhow::{Context, Result};
use castpoint_core::{BufferPool, EventLoop};
use clap::Parser;
use tokio::signal;

use crate::config::ServerConfig;
use crate::feed::FileFeed;

/// Castpoint Server - single-listener Icecast/SHOUTcast compatible server.
#[derive(Parser, Debug)]
#[command(name = "castpoint-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "CASTPOINT_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// MP3 file to stream (overrides config file).
    #[arg(short, long, value_name = "FILE")]
    input: Option<PathBuf>,

    /// Bind address (overrides config file).
    #[arg(short, long, env = "CASTPOINT_BIND_ADDRESS")]
    bind_address: Option<IpAddr>,

    /// Bind port (overrides config file).
    #[arg(short, long, env = "CASTPOINT_BIND_PORT")]
    port: Option<u16>,

    /// Stream title sent as ICY metadata (overrides config file).
    #[arg(short, long, env = "CASTPOINT_STREAM_TITLE")]
    title: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Castpoint Server v{}", env!("CARGO_PKG_VERSION"));

    // Load configuration
    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    // Apply CLI overrides
    if let Some(input) = args.input {
        config.source_file = Some(input);
    }
    if let Some(ip) = args.bind_address {
        config.bind_address = ip;
    }
    if let Some(port) = args.port {
        config.bind_port = port;
    }
    if let Some(title) = args.title {
        config.stream_title = title;
    }

    let source_file = config
        .source_file
        .clone()
        .context("No input file. Pass --input or set source_file in the config file.")?;
    let format = config.audio_format();

    log::info!(
        "Configuration: bind={}, bitrate={}, channels={}, sample_rate={}, input={}",
        config.bind_addr(),
        format.bitrate,
        format.channels,
        format.sample_rate,
        source_file.display()
    );

    let feed = FileFeed::load(&source_file, config.chunk_size, &format)?;
    let pool = BufferPool::new(config.pool_capacity);

    let (event_loop, handle) =
        EventLoop::bind(config.bind_addr(), pool.clone(), format, config.to_mountpoint())
            .context("Failed to start server")?;

    if !config.stream_title.is_empty() {
        handle
            .set_stream_title(config.stream_title.as_str())
            .context("Failed to set stream title")?;
    }

    let feed_task = tokio::spawn(feed.run(pool));
    let server_task = tokio::spawn(event_loop.run());

    log::info!("Streaming on http://{}/", handle.local_addr());

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    feed_task.abort();
    if handle.shutdown().is_ok() {
        if let Err(e) = server_task.await {
            log::error!("Server task failed: {}", e);
        }
    }

    log::info!("Shutdown complete");
    Ok(())
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
