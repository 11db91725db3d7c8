//! Emitter Server - standalone headless server for the stream emitter.
//!
//! Accepts TCP client connections, registers each one as a session, and
//! pushes responses back through the shared stream emitter.

mod config;
mod connection;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use emitter_core::{IdleSweeper, SessionEvent, SessionRegistry, StreamEmitter, TokioSpawner};
use tokio::net::TcpListener;
use tokio::signal;

use crate::config::ServerConfig;

/// Emitter Server - pushes event-mesh responses to connected clients.
#[derive(Parser, Debug)]
#[command(name = "emitter-server")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (YAML).
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace).
    #[arg(short, long, default_value = "info", env = "EMITTER_LOG_LEVEL")]
    log_level: log::LevelFilter,

    /// Bind port (overrides config file).
    #[arg(short = 'p', long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    env_logger::Builder::new()
        .filter_level(args.log_level)
        .format_timestamp_millis()
        .init();

    log::info!("Emitter Server v{}", env!("CARGO_PKG_VERSION"));

    let mut config =
        ServerConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(port) = args.port {
        config.bind_port = port;
    }

    log::info!(
        "Configuration: bind={}:{}, queue_capacity={}, backpressure={:?}, idle_timeout={}s",
        config.bind_address,
        config.bind_port,
        config.emitter.queue_capacity,
        config.emitter.backpressure,
        config.emitter.idle_timeout_secs
    );

    let spawner = TokioSpawner::current();
    let registry = Arc::new(
        SessionRegistry::new(config.emitter.clone()).context("Invalid emitter configuration")?,
    );
    let emitter = StreamEmitter::new(Arc::clone(&registry));

    let sweeper = IdleSweeper::from_config(Arc::clone(&registry));
    match &sweeper {
        Some(sweeper) => sweeper.start(&spawner),
        None => log::info!("Idle sweeping disabled"),
    }

    spawn_event_logger(&registry);

    let bind_addr = SocketAddr::new(config.bind_address, config.bind_port);
    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", bind_addr))?;

    log::info!("Listening on {}", bind_addr);

    let accept_handle = {
        let emitter = emitter.clone();
        let spawner = spawner.clone();
        let max_request_len = config.max_request_len;
        tokio::spawn(async move { accept_loop(listener, emitter, spawner, max_request_len).await })
    };

    // Wait for shutdown signal
    shutdown_signal().await;

    log::info!("Shutdown signal received, cleaning up...");

    accept_handle.abort();
    if let Some(sweeper) = &sweeper {
        sweeper.stop();
    }
    let closed = registry.close_all();

    log::info!("Shutdown complete ({} session(s) closed)", closed);
    Ok(())
}

async fn accept_loop(
    listener: TcpListener,
    emitter: StreamEmitter,
    spawner: TokioSpawner,
    max_request_len: usize,
) {
    loop {
        let (stream, peer) = match listener.accept().await {
            Ok(accepted) => accepted,
            Err(e) => {
                log::warn!("Accept failed: {}", e);
                continue;
            }
        };
        if let Err(e) = stream.set_nodelay(true) {
            log::debug!("Failed to set TCP_NODELAY for {}: {}", peer, e);
        }

        log::info!("Connection from {}", peer);
        let emitter = emitter.clone();
        let spawner = spawner.clone();
        tokio::spawn(async move {
            let served = connection::serve(stream, peer, emitter, spawner, max_request_len).await;
            if let Err(e) = served {
                log::warn!("Connection {} ended: {:#}", peer, e);
            }
        });
    }
}

/// Logs session lifecycle events as JSON.
fn spawn_event_logger(registry: &SessionRegistry) {
    let mut events = registry.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => log_event(&event),
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("Session event logger lagged by {} event(s)", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });
}

fn log_event(event: &SessionEvent) {
    match serde_json::to_string(event) {
        Ok(json) => log::debug!("Session event: {}", json),
        Err(e) => log::warn!("Failed to serialize session event: {}", e),
    }
}

/// Waits for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            log::error!("Failed to install Ctrl+C handler: {}", e);
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
