//! Reconnecting client for spotcast availability streams
//!
//! A [`ClientSession`] keeps one WebSocket open to the availability server:
//!
//! - Remembers the subscribed [`Bounds`](spotcast_protocol::Bounds) and re-sends them after every reconnect
//! - Sends `ping` on a fixed heartbeat interval while connected
//! - Retries with exponential backoff (1s, 2s, 4s, ... capped at 30s) and gives up after 5 attempts
//! - Reports everything through [`SessionEvent`] listeners
//!
//! # Example
//!
//! ```no_run
//! use spotcast_client::{ClientSession, EventKind, SessionConfig, SessionEvent};
//! use spotcast_protocol::Bounds;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let session = ClientSession::new(SessionConfig::new("ws://127.0.0.1:8000/api/v1/ws"));
//!
//!     session.on(EventKind::AvailabilityUpdate, |event| {
//!         if let SessionEvent::AvailabilityUpdate(update) = event {
//!             println!("{} occupied={}", update.spot_id, update.is_occupied);
//!         }
//!     });
//!
//!     let downtown = Bounds::new(40.70, 40.72, -74.02, -74.00)?;
//!     session.connect(Some(downtown)).await?;
//!
//!     tokio::signal::ctrl_c().await?;
//!     session.disconnect();
//!     Ok(())
//! }
//! ```

pub mod backoff;
pub mod config;
pub mod error;
pub mod events;
pub mod session;

pub use backoff::{Backoff, ReconnectPolicy};
pub use config::SessionConfig;
pub use error::{Result, SessionError};
pub use events::{EventKind, ListenerId, SessionEvent};
pub use session::{ClientSession, ConnectionState};
