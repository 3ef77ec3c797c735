//! Wire messages exchanged over the availability socket
//!
//! Every frame is a JSON object `{"type": ..., "data": {...}}`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{ProtocolError, Result};
use crate::models::{AvailabilityUpdate, Bounds};

/// Client-to-server control message
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Replace the connection's subscription
    Subscribe(Bounds),
    /// Heartbeat
    Ping {},
}

/// Server-to-client message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Sent once, right after the handshake
    Connected {
        #[serde(default)]
        message: String,
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Subscription accepted
    Subscribed(Bounds),
    /// Heartbeat reply
    Pong {
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Request rejected; the connection stays open
    Error { message: String },
    /// Occupancy change inside the subscribed area
    AvailabilityUpdate(AvailabilityUpdate),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: Value,
}

/// `subscribe` data is either the bounds themselves or `{"bounds": {...}}`
#[derive(Deserialize)]
#[serde(untagged)]
enum SubscribePayload {
    Wrapped { bounds: Bounds },
    Bare(Bounds),
}

impl ClientMessage {
    /// Decode an inbound frame.
    ///
    /// Structural problems only; bounds are range-checked by whoever applies them.
    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;

        match envelope.kind.as_str() {
            "ping" => Ok(ClientMessage::Ping {}),
            "subscribe" => {
                let payload: SubscribePayload = serde_json::from_value(envelope.data)
                    .map_err(|source| ProtocolError::InvalidPayload {
                        kind: "subscribe",
                        source,
                    })?;
                let bounds = match payload {
                    SubscribePayload::Wrapped { bounds } => bounds,
                    SubscribePayload::Bare(bounds) => bounds,
                };
                Ok(ClientMessage::Subscribe(bounds))
            }
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl ServerMessage {
    pub fn connected() -> Self {
        ServerMessage::Connected {
            message: "Connected to parking availability updates".to_string(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            timestamp: Some(Utc::now()),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }

    /// Wire type name, as it appears in the `type` field
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Connected { .. } => "connected",
            ServerMessage::Subscribed(_) => "subscribed",
            ServerMessage::Pong { .. } => "pong",
            ServerMessage::Error { .. } => "error",
            ServerMessage::AvailabilityUpdate(_) => "availability_update",
        }
    }

    pub fn decode(text: &str) -> Result<Self> {
        let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Malformed)?;
        let kind = match envelope.kind.as_str() {
            "connected" => "connected",
            "subscribed" => "subscribed",
            "pong" => "pong",
            "error" => "error",
            "availability_update" => "availability_update",
            other => return Err(ProtocolError::UnknownType(other.to_string())),
        };

        let data = if envelope.data.is_null() {
            serde_json::json!({})
        } else {
            envelope.data
        };

        serde_json::from_value(serde_json::json!({ "type": kind, "data": data }))
            .map_err(|source| ProtocolError::InvalidPayload { kind, source })
    }

    pub fn to_json(&self) -> std::result::Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
