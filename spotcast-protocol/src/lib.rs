//! Shared wire protocol for spotcast
//!
//! Types used by both the availability server and its clients:
//!
//! - [`Bounds`] - inclusive geographic bounding box (a subscription)
//! - [`GeoPoint`] - a spot location
//! - [`AvailabilityUpdate`] - occupancy change payload
//! - [`ClientMessage`] / [`ServerMessage`] - `{"type", "data"}` frames
//!
//! # Protocol
//!
//! ```json
//! // Client -> Server
//! {"type": "subscribe", "data": {"min_lat": 40.70, "max_lat": 40.72, "min_lng": -74.02, "max_lng": -74.00}}
//! {"type": "ping", "data": {}}
//!
//! // Server -> Client
//! {"type": "connected", "data": {"message": "...", "timestamp": "..."}}
//! {"type": "subscribed", "data": {"min_lat": 40.70, ...}}
//! {"type": "pong", "data": {"timestamp": "..."}}
//! {"type": "error", "data": {"message": "..."}}
//! {"type": "availability_update", "data": {"spot_id": "s1", "is_occupied": true, "estimated_availability_time": null, "timestamp": "..."}}
//! ```

pub mod error;
pub mod messages;
pub mod models;

pub use error::{BoundsError, ProtocolError, Result};
pub use messages::{ClientMessage, ServerMessage};
pub use models::{AvailabilityUpdate, Bounds, GeoPoint};
