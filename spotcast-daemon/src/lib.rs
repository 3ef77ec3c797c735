//! Spotcast daemon library
//!
//! Configuration and the occupancy feed, exposed for the binary and integration tests.

pub mod config;
pub mod feed;

pub use config::DaemonConfig;
pub use feed::{apply_line, FeedError, FeedReply, FeedServer, OccupancyChange};
