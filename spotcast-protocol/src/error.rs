use thiserror::Error;

/// Reasons a bounding box or point is rejected
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum BoundsError {
    #[error("Bounds must include min_lat, max_lat, min_lng and max_lng together")]
    Incomplete,

    #[error("Coordinates must be finite numbers")]
    NonFinite,

    #[error("Latitude {0} is outside [-90, 90]")]
    LatitudeOutOfRange(f64),

    #[error("Longitude {0} is outside [-180, 180]")]
    LongitudeOutOfRange(f64),

    #[error("min_lat ({min}) is greater than max_lat ({max})")]
    InvertedLatitude { min: f64, max: f64 },

    #[error("min_lng ({min}) is greater than max_lng ({max})")]
    InvertedLongitude { min: f64, max: f64 },
}

#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} payload: {source}")]
    InvalidPayload {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid bounds: {0}")]
    InvalidBounds(#[from] BoundsError),
}

pub type Result<T> = std::result::Result<T, ProtocolError>;
