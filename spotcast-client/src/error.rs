use std::time::Duration;

use spotcast_protocol::BoundsError;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Connection attempt timed out after {0:?}")]
    ConnectTimeout(Duration),

    #[error("Connection attempt failed")]
    ConnectFailed,

    #[error("Session was disconnected by the caller")]
    Cancelled,

    #[error("Invalid bounds: {0}")]
    InvalidBounds(#[from] BoundsError),

    #[error("Server rejected request: {0}")]
    ServerRejected(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for SessionError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SessionError::WebSocket(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
