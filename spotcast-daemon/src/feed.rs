//! Unix socket feed for occupancy producers
//!
//! Newline-delimited JSON: one [`OccupancyChange`] per request line, one
//! [`FeedReply`] per response line.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use spotcast_broadcaster::{BroadcastError, BroadcastReport, Broadcaster};
use spotcast_protocol::{AvailabilityUpdate, GeoPoint};
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info, warn};

/// A spot changed occupancy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OccupancyChange {
    pub spot_id: String,
    pub is_occupied: bool,
    #[serde(default)]
    pub estimated_availability_time: Option<DateTime<Utc>>,
    /// Defaults to the time the line is received
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    pub lat: f64,
    pub lng: f64,
}

impl OccupancyChange {
    pub fn location(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }

    pub fn into_update(self) -> AvailabilityUpdate {
        AvailabilityUpdate {
            spot_id: self.spot_id,
            is_occupied: self.is_occupied,
            estimated_availability_time: self.estimated_availability_time,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum FeedReply {
    Ok {
        matched: usize,
        delivered: usize,
        dropped: usize,
        pruned: usize,
        stale: bool,
    },
    Error {
        message: String,
    },
}

impl From<BroadcastReport> for FeedReply {
    fn from(report: BroadcastReport) -> Self {
        FeedReply::Ok {
            matched: report.matched,
            delivered: report.delivered,
            dropped: report.dropped,
            pruned: report.pruned,
            stale: report.stale,
        }
    }
}

#[derive(Error, Debug)]
pub enum FeedError {
    #[error("Invalid occupancy change: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Broadcast(#[from] BroadcastError),
}

/// Parse one feed line and fan it out
pub fn apply_line(broadcaster: &Broadcaster, line: &str) -> std::result::Result<BroadcastReport, FeedError> {
    let change: OccupancyChange = serde_json::from_str(line)?;
    let location = change.location();
    let update = change.into_update();
    Ok(broadcaster.broadcast(location, &update)?)
}

/// Local socket accepting occupancy changes
pub struct FeedServer {
    listener: UnixListener,
    socket_path: PathBuf,
    broadcaster: Arc<Broadcaster>,
}

impl FeedServer {
    /// Bind the feed socket, replacing a stale one
    pub fn bind(socket_path: impl Into<PathBuf>, broadcaster: Arc<Broadcaster>) -> Result<Self> {
        let socket_path = socket_path.into();

        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create socket directory {}", parent.display())
            })?;
        }
        let _ = std::fs::remove_file(&socket_path);

        let listener = UnixListener::bind(&socket_path)
            .with_context(|| format!("Failed to bind feed socket {}", socket_path.display()))?;
        spotcast_paths::secure_socket_permissions(&socket_path)?;

        info!("Occupancy feed listening on {}", socket_path.display());

        Ok(Self {
            listener,
            socket_path,
            broadcaster,
        })
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Accept producers until the task is dropped
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    let broadcaster = Arc::clone(&self.broadcaster);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, broadcaster).await {
                            warn!("Feed connection failed: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept feed connection: {}", e);
                }
            }
        }
    }
}

impl Drop for FeedServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.socket_path);
    }
}

async fn handle_connection(stream: UnixStream, broadcaster: Arc<Broadcaster>) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read from feed socket")? {
        if line.trim().is_empty() {
            continue;
        }
        debug!("Feed line: {}", line);

        let reply = match apply_line(&broadcaster, &line) {
            Ok(report) => FeedReply::from(report),
            Err(e) => {
                warn!("Rejected feed line: {}", e);
                FeedReply::Error {
                    message: e.to_string(),
                }
            }
        };

        let mut response = serde_json::to_string(&reply)?;
        response.push('\n');
        writer.write_all(response.as_bytes()).await?;
        writer.flush().await?;
    }

    Ok(())
}
