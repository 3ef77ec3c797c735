//! Print availability updates for an area
//!
//! # Usage
//!
//! ```bash
//! spotcast-watch --min-lat 40.70 --max-lat 40.72 --min-lng -74.02 --max-lng -74.00
//! spotcast-watch --url ws://parking.example:8000/api/v1/ws --heartbeat-secs 10
//! ```

use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use spotcast_client::{ClientSession, EventKind, SessionConfig, SessionEvent};
use spotcast_protocol::Bounds;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Spotcast availability watcher
#[derive(Parser, Debug)]
#[command(name = "spotcast-watch")]
#[command(about = "Stream parking availability updates for a bounding box")]
struct Args {
    /// Availability endpoint
    #[arg(long, default_value = "ws://127.0.0.1:8000/api/v1/ws")]
    url: String,

    #[arg(long, allow_negative_numbers = true)]
    min_lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    max_lat: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    min_lng: Option<f64>,

    #[arg(long, allow_negative_numbers = true)]
    max_lng: Option<f64>,

    /// Seconds between pings
    #[arg(long, default_value = "30")]
    heartbeat_secs: u64,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("spotcast_client=info".parse()?)
                .add_directive("spotcast_watch=info".parse()?),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let bounds = Bounds::from_parts(args.min_lat, args.max_lat, args.min_lng, args.max_lng)
        .context("Invalid bounding box")?;

    let config = SessionConfig::new(args.url)
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_secs));
    let session = ClientSession::new(config);

    session.on(EventKind::AvailabilityUpdate, |event| {
        if let SessionEvent::AvailabilityUpdate(update) = event {
            let eta = update
                .estimated_availability_time
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "-".to_string());
            println!(
                "{}\t{}\t{}\t{}",
                update.timestamp.to_rfc3339(),
                update.spot_id,
                if update.is_occupied { "occupied" } else { "free" },
                eta
            );
        }
    });
    for kind in [
        EventKind::Connected,
        EventKind::Disconnected,
        EventKind::Subscribed,
        EventKind::Reconnecting,
    ] {
        session.on(kind, |event| info!("{:?}", event));
    }
    session.on(EventKind::Pong, |_| debug!("pong"));
    session.on(EventKind::Error, |event| {
        if let SessionEvent::Error(e) = event {
            warn!("{}", e);
        }
    });

    let gave_up = std::sync::Arc::new(Notify::new());
    let notify = std::sync::Arc::clone(&gave_up);
    session.on(EventKind::MaxReconnectAttempts, move |_| {
        notify.notify_one();
    });

    if bounds.is_none() {
        warn!("No bounding box given; the server will not send updates");
    }
    if let Err(e) = session.connect(bounds).await {
        warn!("Initial connect failed: {} (retrying)", e);
    }

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
        _ = gave_up.notified() => {
            error!("Server unreachable, giving up");
        }
    }

    session.disconnect();
    Ok(())
}
