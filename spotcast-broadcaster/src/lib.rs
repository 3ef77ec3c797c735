//! Real-time parking availability broadcaster
//!
//! This crate provides a WebSocket server that pushes occupancy changes to
//! map clients, each interested only in a geographic sub-region. It manages
//! many concurrent connections, per-connection subscriptions, heartbeats and
//! idle detection.
//!
//! # Features
//!
//! - WebSocket endpoint (default path `/api/v1/ws`)
//! - JSON `{"type", "data"}` protocol (see `spotcast-protocol`)
//! - Bounding-box subscriptions via query parameters or `subscribe` messages
//! - Registry snapshots so slow sockets never block fan-out or registration
//! - Best-effort, at-most-once delivery with dead-connection pruning
//! - Idle connections closed after `idle_timeout` without inbound frames
//!
//! # Example Usage
//!
//! ```no_run
//! use spotcast_broadcaster::{AvailabilityServer, ServerConfig};
//! use spotcast_protocol::{AvailabilityUpdate, GeoPoint};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let server = AvailabilityServer::new(ServerConfig::default());
//!     server.start("127.0.0.1:8000").await?;
//!
//!     // Called by whatever observes occupancy changes
//!     let broadcaster = server.broadcaster();
//!     let report = broadcaster.broadcast(
//!         GeoPoint::new(40.713, -74.006),
//!         &AvailabilityUpdate::new("spot-17", true),
//!     )?;
//!     println!("delivered to {} clients", report.delivered);
//!
//!     server.stop().await?;
//!     Ok(())
//! }
//! ```

pub mod broadcaster;
pub mod config;
mod connection;
pub mod error;
pub mod registry;
pub mod server;

// Re-exports
pub use broadcaster::{BroadcastReport, Broadcaster};
pub use config::ServerConfig;
pub use error::{BroadcastError, RegistryError, Result, ServerError};
pub use registry::{ConnectionHandle, ConnectionId, ConnectionRegistry, Delivery};
pub use server::AvailabilityServer;
