//! cpustream - push live CPU utilization to browser clients.
//!
//! Serves a small browser UI and a WebSocket endpoint on one port; every
//! connected client gets its own periodic stream of readings.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use clap::Parser;
use cpustream::server::{self, ServerConfig};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Live CPU utilization streamed to browser clients
#[derive(Parser, Debug)]
#[command(name = "cpustream")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TCP port to listen on
    #[arg(short, long, default_value = "3000")]
    port: u16,

    /// Sampling interval in seconds
    #[arg(short = 'i', long, default_value = "1")]
    interval: f64,

    /// Directory of browser UI files
    #[arg(long, default_value = "public")]
    assets: PathBuf,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    ensure!(
        args.interval.is_finite() && args.interval > 0.0,
        "sampling interval must be a positive number of seconds"
    );

    let config = ServerConfig {
        sample_period: Duration::from_secs_f64(args.interval),
        assets_dir: args.assets,
    };

    let listener = TcpListener::bind(("0.0.0.0", args.port))
        .await
        .with_context(|| format!("failed to bind port {}", args.port))?;
    info!("server running on http://localhost:{}", args.port);

    server::run(listener, config)
        .await
        .context("server error")?;

    Ok(())
}
