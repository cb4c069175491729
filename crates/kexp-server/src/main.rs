//! kexp stream server - multiplexed calls over WebSocket.
//!
//! Serves the call stream at `/api/stream/v1/` and a health check at
//! `/health`. Every WebSocket connection gets its own call registry; closing
//! it cancels all calls it started.

mod config;
mod handlers;
mod logging;
mod server;
mod stream;

use anyhow::Result;
use clap::Parser;
use config::ServerConfig;
use kexp_stream::rpc::{CallRouter, MESSAGE_TYPE_CALL};
use kexp_stream::{CancelScope, DispatcherOptions, MessageRouter, StreamConfig};
use logging::LogFormat;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "kexp-server", version)]
#[command(about = "Multiplexed call stream over WebSocket")]
struct Args {
    /// Listening host
    #[arg(long, default_value = ServerConfig::DEFAULT_HOST)]
    host: String,

    /// Listening port (0 = auto-assign)
    #[arg(short, long, default_value_t = ServerConfig::DEFAULT_PORT)]
    port: u16,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Maximum concurrently active calls per connection
    #[arg(long, default_value_t = StreamConfig::MAX_ACTIVE_CALLS)]
    max_active_calls: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Set up logging
    logging::init(args.debug, args.log_format);

    info!("Starting kexp stream server");

    let options = DispatcherOptions::default().with_max_active_calls(args.max_active_calls)?;
    let mut calls = CallRouter::new().with_options(options);
    handlers::register_all(&mut calls)?;
    info!("Registered call methods: {:?}", calls.methods());

    let mut router = MessageRouter::new();
    router.register(MESSAGE_TYPE_CALL, calls);

    let shutdown = CancelScope::new("server");
    let state = server::AppState::new(router, shutdown.clone());

    // Start the server
    let handle = server::start_server(state, &args.host, args.port).await?;

    // Print port for the parent process to read (intentional stdout for IPC)
    println!("{}{}", ServerConfig::PORT_ANNOUNCE_PREFIX, handle.addr.port());

    info!("Stream server running on {}", handle.addr);

    // Wait for shutdown signal
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received, closing connections");
    shutdown.cancel();

    let grace = StreamConfig::SHUTDOWN_GRACE_PERIOD + Duration::from_secs(1);
    if tokio::time::timeout(grace, handle.join()).await.is_err() {
        warn!("Server did not stop within {:?}, exiting anyway", grace);
    }

    Ok(())
}
