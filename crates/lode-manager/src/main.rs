//! Driver manager entry point.
//!
//! Dials the storage host, announces the driver catalog, and serves requests
//! until the connection drops, then reconnects after a fixed pause. Runs
//! until interrupted.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use lode_driver::{DriverRegistry, LocalDriver};
use lode_manager::{InstanceManager, ProtocolHandler};
use lode_rpc::{DEFAULT_PORT, Session, Timeouts};

/// Lode driver manager - hosts storage drivers in a separate process
#[derive(Parser, Debug)]
#[command(name = "lode-manager")]
#[command(version, about, long_about = None)]
struct Args {
    /// Host address to connect to
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Host port to connect to
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Identifier announced in the handshake (defaults to a generated id)
    #[arg(long)]
    manager_id: Option<String>,

    /// Seconds to wait between reconnection attempts
    #[arg(long, default_value_t = 5)]
    reconnect_interval: u64,
}

fn setup_logging() {
    let default_level = if cfg!(debug_assertions) { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("lode={default_level}")));

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn generated_manager_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or_default();
    format!("dm-{nanos}")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_logging();

    let manager_id = args.manager_id.unwrap_or_else(generated_manager_id);
    let address = format!("{}:{}", args.host, args.port);

    let mut registry = DriverRegistry::new();
    LocalDriver::register(&mut registry);
    let registry = Arc::new(registry);

    info!(
        "Starting driver manager {} with {} drivers, host {}",
        manager_id,
        registry.len(),
        address
    );

    let instances = Arc::new(InstanceManager::new(registry));
    let handler = ProtocolHandler::new(manager_id, instances);

    let timeouts = Timeouts {
        reconnect_backoff: Duration::from_secs(args.reconnect_interval),
        ..Timeouts::default()
    };
    let shutdown = CancellationToken::new();

    tokio::select! {
        () = run(&handler, &address, &timeouts, &shutdown) => {}
        res = tokio::signal::ctrl_c() => {
            if let Err(e) = res {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down driver manager");
            shutdown.cancel();
            // Give the serve loop a moment to close its connection.
            tokio::time::sleep(timeouts.shutdown_grace.min(Duration::from_secs(1))).await;
        }
    }

    info!("Driver manager stopped");
    Ok(())
}

/// Connect, serve, reconnect. Never returns unless `shutdown` fires.
async fn run(handler: &ProtocolHandler, address: &str, timeouts: &Timeouts, shutdown: &CancellationToken) {
    loop {
        if shutdown.is_cancelled() {
            return;
        }

        match connect(address, timeouts, shutdown).await {
            Ok(session) => {
                info!("Connected to host at {}", address);
                if let Err(e) = handler.serve(&session).await {
                    warn!("Connection to {} ended: {}", address, e);
                }
                session.close();
            }
            Err(e) => {
                warn!(
                    "Failed to connect to {}: {} (retrying in {:?})",
                    address, e, timeouts.reconnect_backoff
                );
            }
        }

        tokio::select! {
            () = shutdown.cancelled() => return,
            () = tokio::time::sleep(timeouts.reconnect_backoff) => {}
        }
    }
}

async fn connect(
    address: &str,
    timeouts: &Timeouts,
    shutdown: &CancellationToken,
) -> std::io::Result<Session> {
    let stream = tokio::time::timeout(timeouts.connect, tokio::net::TcpStream::connect(address))
        .await
        .map_err(|_| std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out"))??;

    Ok(Session::spawn(
        stream,
        address.to_string(),
        timeouts.clone(),
        shutdown.child_token(),
    ))
}
