//! WebSocket connection handler
//!
//! One task per socket: handshake, registration, inbound control messages,
//! draining the outbound queue and idle detection.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use futures_util::{SinkExt, StreamExt};
use spotcast_protocol::{Bounds, ClientMessage, ProtocolError, ServerMessage};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::Message;

use crate::broadcaster::Broadcaster;
use crate::config::ServerConfig;
use crate::registry::{ConnectionId, ConnectionRegistry};

/// Shared state handed to every connection task
pub(crate) struct Endpoint {
    pub registry: Arc<ConnectionRegistry>,
    pub broadcaster: Arc<Broadcaster>,
    pub config: ServerConfig,
}

/// Unregisters the connection however the task ends
struct Registration {
    id: ConnectionId,
    registry: Arc<ConnectionRegistry>,
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.id);
    }
}

/// Handle a single WebSocket connection
pub(crate) async fn handle_connection(stream: TcpStream, peer: SocketAddr, endpoint: Arc<Endpoint>) {
    let expected_path = endpoint.config.path.clone();
    let mut query: Option<String> = None;

    let callback = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
        if request.uri().path() != expected_path {
            let mut rejection = ErrorResponse::new(Some("Not Found".to_string()));
            *rejection.status_mut() = StatusCode::NOT_FOUND;
            return Err(rejection);
        }
        query = request.uri().query().map(str::to_owned);
        Ok(response)
    };

    let handshake = tokio::time::timeout(
        endpoint.config.idle_timeout,
        accept_hdr_async(stream, callback),
    );
    let mut ws = match handshake.await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!("WebSocket handshake with {} failed: {}", peer, e);
            return;
        }
        Err(_) => {
            tracing::warn!(
                "WebSocket handshake with {} timed out after {:?}",
                peer,
                endpoint.config.idle_timeout
            );
            return;
        }
    };

    let (tx, mut rx) = mpsc::channel(endpoint.config.outbound_buffer);
    let id = endpoint.registry.register(tx, Some(peer));
    let _registration = Registration {
        id,
        registry: Arc::clone(&endpoint.registry),
    };

    endpoint.broadcaster.send_direct(id, &ServerMessage::connected());

    match parse_query_bounds(query.as_deref()) {
        Ok(Some(bounds)) => match endpoint.registry.set_subscription(id, bounds) {
            Ok(_) => tracing::debug!("{} subscribed via query parameters: {:?}", id, bounds),
            Err(e) => {
                endpoint.broadcaster.send_direct(id, &ServerMessage::error(e.to_string()));
            }
        },
        Ok(None) => {}
        Err(e) => {
            tracing::warn!("Ignoring query bounds from {}: {}", id, e);
            endpoint
                .broadcaster
                .send_direct(id, &ServerMessage::error(format!("Invalid bounds: {}", e)));
        }
    }

    let idle_timeout = endpoint.config.idle_timeout;
    let idle = tokio::time::sleep(idle_timeout);
    tokio::pin!(idle);

    loop {
        tokio::select! {
            frame = rx.recv() => {
                let Some(frame) = frame else {
                    tracing::debug!("{} removed from registry, closing", id);
                    break;
                };
                if let Err(e) = ws.send(Message::Text(frame.to_string())).await {
                    tracing::warn!("Write to {} failed: {}", id, e);
                    break;
                }
            }

            msg = ws.next() => {
                match msg {
                    Some(Ok(message)) => {
                        idle.as_mut().reset(Instant::now() + idle_timeout);
                        match message {
                            Message::Text(text) => handle_text(&endpoint, id, &text),
                            Message::Binary(_) => {
                                tracing::warn!("Dropping binary frame from {}", id);
                                endpoint.broadcaster.send_direct(id, &ServerMessage::error("Invalid JSON"));
                            }
                            Message::Close(_) => {
                                tracing::info!("{} requested close", id);
                                break;
                            }
                            // Ping/pong frames are answered by tungstenite
                            _ => {}
                        }
                    }
                    Some(Err(e)) => {
                        tracing::warn!("WebSocket error on {}: {}", id, e);
                        break;
                    }
                    None => break,
                }
            }

            _ = &mut idle => {
                tracing::warn!("Closing idle connection {} (silent for {:?})", id, idle_timeout);
                let _ = ws.close(None).await;
                break;
            }
        }
    }

    tracing::info!("Connection {} from {} closed", id, peer);
}

fn handle_text(endpoint: &Endpoint, id: ConnectionId, text: &str) {
    let reply = match ClientMessage::decode(text) {
        Ok(ClientMessage::Ping {}) => ServerMessage::pong(),
        Ok(ClientMessage::Subscribe(bounds)) => match endpoint.registry.set_subscription(id, bounds) {
            Ok(_) => {
                tracing::debug!("{} subscribed to {:?}", id, bounds);
                ServerMessage::Subscribed(bounds)
            }
            Err(e) => ServerMessage::error(e.to_string()),
        },
        Err(ProtocolError::Malformed(e)) => {
            tracing::warn!("Dropping malformed frame from {}: {}", id, e);
            ServerMessage::error("Invalid JSON")
        }
        Err(e) => {
            tracing::warn!("Rejected frame from {}: {}", id, e);
            ServerMessage::error(e.to_string())
        }
    };

    endpoint.broadcaster.send_direct(id, &reply);
}

/// Read `min_lat`, `max_lat`, `min_lng`, `max_lng` from a query string
fn parse_query_bounds(query: Option<&str>) -> anyhow::Result<Option<Bounds>> {
    let Some(query) = query else {
        return Ok(None);
    };

    let (mut min_lat, mut max_lat, mut min_lng, mut max_lng) = (None, None, None, None);
    for (key, value) in form_urlencoded::parse(query.as_bytes()) {
        let slot = match &*key {
            "min_lat" => &mut min_lat,
            "max_lat" => &mut max_lat,
            "min_lng" => &mut min_lng,
            "max_lng" => &mut max_lng,
            _ => continue,
        };
        let parsed: f64 = value
            .parse()
            .with_context(|| format!("{} is not a number: {:?}", key, value))?;
        *slot = Some(parsed);
    }

    Ok(Bounds::from_parts(min_lat, max_lat, min_lng, max_lng)?)
}
