//! Spotcast Daemon - parking availability broadcast service
//!
//! Serves map clients over WebSocket (`ws://<listen_addr>/api/v1/ws`) and takes
//! occupancy changes from local producers over a Unix socket (`feed.sock`).

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use spotcast_broadcaster::AvailabilityServer;
use spotcast_daemon::{DaemonConfig, FeedServer};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "spotcast-daemon")]
#[command(about = "Real-time parking availability broadcaster")]
struct Args {
    /// Config file (default: <config_dir>/spotcast/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the WebSocket listen address
    #[arg(short, long)]
    listen: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spotcast_daemon=info".parse()?)
                .add_directive("spotcast_broadcaster=info".parse()?),
        )
        .with_target(false)
        .with_level(true)
        .init();

    let args = Args::parse();

    info!("Starting Spotcast Daemon v{}", env!("CARGO_PKG_VERSION"));

    let mut config = match &args.config {
        Some(path) => DaemonConfig::load_from(path),
        None => DaemonConfig::load(),
    }
    .context("Failed to load configuration")?;
    if let Some(listen) = args.listen {
        config.listen_addr = listen;
    }

    info!("Configuration loaded from {}", config.config_path.display());

    let server = AvailabilityServer::new(config.server_config());
    let addr = server
        .start(config.listen_addr.as_str())
        .await
        .with_context(|| format!("Failed to listen on {}", config.listen_addr))?;

    let feed_path = config.feed_socket_path()?;
    let feed = FeedServer::bind(&feed_path, server.broadcaster())
        .context("Failed to start occupancy feed")?;

    info!("Spotcast daemon ready");
    info!("  - Clients: ws://{}{}", addr, server.config().path);
    info!("  - Feed:    {}", feed.socket_path().display());

    tokio::select! {
        result = feed.run() => {
            if let Err(e) = result {
                error!("Feed server error: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
        }
    }

    info!(
        "Shutting down ({} clients connected)",
        server.connection_count()
    );
    server.stop().await.context("Failed to stop server")?;
    drop(feed);

    Ok(())
}
