use spotcast_protocol::BoundsError;
use thiserror::Error;

use crate::registry::ConnectionId;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Server not started")]
    NotStarted,

    #[error("Server already running")]
    AlreadyRunning,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    #[error("Invalid bounds: {0}")]
    InvalidBounds(#[from] BoundsError),
}

/// Rejected before any fan-out; the caller must fix the update
#[derive(Error, Debug)]
pub enum BroadcastError {
    #[error("Update has an empty spot_id")]
    MissingSpotId,

    #[error("Invalid spot location: {0}")]
    InvalidLocation(#[from] BoundsError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, ServerError>;
