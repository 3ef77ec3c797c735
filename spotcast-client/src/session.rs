//! Reconnecting client session
//!
//! One [`ClientSession`] owns at most one live socket. Socket callbacks carry the
//! generation they were opened under; once the session moves on (disconnect,
//! explicit connect, reconnect) callbacks from older sockets are ignored.

use std::sync::{Arc, Weak};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use spotcast_protocol::{Bounds, ClientMessage, ServerMessage};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::backoff::Backoff;
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{EventKind, ListenerId, Listeners, SessionEvent};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// Last socket failed; a close always follows
    Error,
}

struct Core {
    state: ConnectionState,
    generation: u64,
    /// Set by `disconnect`, cleared by `connect`
    stopped: bool,
    backoff: Backoff,
    bounds: Option<Bounds>,
    last_error: Option<SessionError>,
    outbound: Option<mpsc::UnboundedSender<Message>>,
    socket_task: Option<JoinHandle<()>>,
    heartbeat_task: Option<JoinHandle<()>>,
    reconnect_task: Option<JoinHandle<()>>,
}

struct Inner {
    config: SessionConfig,
    core: Mutex<Core>,
    state_tx: watch::Sender<ConnectionState>,
    listeners: Listeners,
}

/// Client side of the availability stream.
///
/// Cheap to clone; clones share the same session. Requires a Tokio runtime.
#[derive(Clone)]
pub struct ClientSession {
    inner: Arc<Inner>,
}

impl ClientSession {
    pub fn new(config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let backoff = Backoff::new(config.reconnect);

        Self {
            inner: Arc::new(Inner {
                config,
                core: Mutex::new(Core {
                    state: ConnectionState::Disconnected,
                    generation: 0,
                    stopped: false,
                    backoff,
                    bounds: None,
                    last_error: None,
                    outbound: None,
                    socket_task: None,
                    heartbeat_task: None,
                    reconnect_task: None,
                }),
                state_tx,
                listeners: Listeners::default(),
            }),
        }
    }

    /// Open the socket, remembering `bounds` for this and every later connection.
    ///
    /// Resolves once the session is connected. Concurrent calls share one attempt.
    /// Failure still leaves the reconnect loop running; `disconnect` stops it.
    pub async fn connect(&self, bounds: Option<Bounds>) -> Result<()> {
        if let Some(bounds) = &bounds {
            bounds.validate()?;
        }

        let mut state_rx = {
            let mut core = self.inner.core.lock();
            if bounds.is_some() {
                core.bounds = bounds;
            }

            match core.state {
                ConnectionState::Connected => {
                    if let Some(bounds) = bounds {
                        self.inner.send_locked(&core, &ClientMessage::Subscribe(bounds));
                    }
                    return Ok(());
                }
                ConnectionState::Connecting => {}
                ConnectionState::Disconnected | ConnectionState::Error => {
                    core.stopped = false;
                    core.backoff.reset();
                    if let Some(task) = core.reconnect_task.take() {
                        task.abort();
                    }
                    self.inner.open_socket(&mut core);
                }
            }
            self.inner.state_tx.subscribe()
        };

        let settled = *state_rx
            .wait_for(|state| *state != ConnectionState::Connecting)
            .await
            .map_err(|_| SessionError::Cancelled)?;

        if settled == ConnectionState::Connected {
            return Ok(());
        }

        let core = self.inner.core.lock();
        if core.stopped {
            Err(SessionError::Cancelled)
        } else {
            Err(core.last_error.clone().unwrap_or(SessionError::ConnectFailed))
        }
    }

    /// Stop heartbeat and retries, close the socket. Emits `Disconnected` unless
    /// the session already was.
    pub fn disconnect(&self) {
        let was_disconnected = {
            let mut core = self.inner.core.lock();
            core.stopped = true;
            core.generation += 1;

            if let Some(task) = core.reconnect_task.take() {
                task.abort();
            }
            if let Some(task) = core.heartbeat_task.take() {
                task.abort();
            }

            match core.outbound.take() {
                // Socket task writes the close frame and exits
                Some(outbound) => {
                    let _ = outbound.send(Message::Close(None));
                    core.socket_task = None;
                }
                None => {
                    if let Some(task) = core.socket_task.take() {
                        task.abort();
                    }
                }
            }

            let was = core.state;
            self.inner.set_state(&mut core, ConnectionState::Disconnected);
            was == ConnectionState::Disconnected
        };

        if !was_disconnected {
            info!("Disconnected from {}", self.inner.config.url);
            self.inner.listeners.dispatch(&SessionEvent::Disconnected);
        }
    }

    /// Replace the remembered subscription; sent right away when connected
    pub fn subscribe(&self, bounds: Bounds) -> Result<()> {
        bounds.validate()?;

        let mut core = self.inner.core.lock();
        core.bounds = Some(bounds);
        if core.state == ConnectionState::Connected {
            self.inner.send_locked(&core, &ClientMessage::Subscribe(bounds));
        }
        Ok(())
    }

    /// Send a raw control message. Returns false when not connected.
    pub fn send(&self, message: &ClientMessage) -> bool {
        let core = self.inner.core.lock();
        core.state == ConnectionState::Connected && self.inner.send_locked(&core, message)
    }

    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(kind, Arc::new(listener))
    }

    pub fn off(&self, id: ListenerId) -> bool {
        self.inner.listeners.remove(id)
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.core.lock().state
    }

    pub fn bounds(&self) -> Option<Bounds> {
        self.inner.core.lock().bounds
    }

    /// Heartbeat or reconnect timer still scheduled
    pub fn has_pending_timers(&self) -> bool {
        let core = self.inner.core.lock();
        core.heartbeat_task.is_some() || core.reconnect_task.is_some()
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.inner.core.lock().backoff.attempts()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Watch state transitions
    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state_tx.subscribe()
    }
}

impl Inner {
    fn set_state(&self, core: &mut Core, state: ConnectionState) {
        core.state = state;
        self.state_tx.send_replace(state);
    }

    fn send_locked(&self, core: &Core, message: &ClientMessage) -> bool {
        let Some(outbound) = &core.outbound else {
            return false;
        };
        match message.to_json() {
            Ok(json) => outbound.send(Message::Text(json)).is_ok(),
            Err(e) => {
                warn!("Failed to serialize {:?}: {}", message, e);
                false
            }
        }
    }

    fn is_current(core: &Core, generation: u64) -> bool {
        core.generation == generation && !core.stopped
    }

    /// Start a new socket under a fresh generation
    fn open_socket(self: &Arc<Self>, core: &mut Core) {
        core.generation += 1;
        let generation = core.generation;
        self.set_state(core, ConnectionState::Connecting);

        debug!("Opening {} (generation {})", self.config.url, generation);
        core.socket_task = Some(tokio::spawn(run_socket(
            Arc::downgrade(self),
            generation,
            self.config.url.clone(),
            self.config.connect_timeout,
        )));
    }

    /// Handshake done. Returns false if this socket is no longer wanted.
    fn handle_open(&self, generation: u64, outbound: mpsc::UnboundedSender<Message>) -> bool {
        {
            let mut core = self.core.lock();
            if !Self::is_current(&core, generation) {
                return false;
            }

            core.backoff.reset();
            core.last_error = None;
            core.outbound = Some(outbound.clone());

            if let Some(bounds) = core.bounds {
                self.send_locked(&core, &ClientMessage::Subscribe(bounds));
            }

            if let Some(task) = core.heartbeat_task.take() {
                task.abort();
            }
            core.heartbeat_task = Some(spawn_heartbeat(outbound, self.config.heartbeat_interval));

            self.set_state(&mut core, ConnectionState::Connected);
        }

        info!("Connected to {}", self.config.url);
        self.listeners.dispatch(&SessionEvent::Connected);
        true
    }

    fn handle_frame(&self, generation: u64, text: &str) {
        if !Self::is_current(&self.core.lock(), generation) {
            return;
        }

        match ServerMessage::decode(text) {
            Ok(ServerMessage::AvailabilityUpdate(update)) => {
                self.listeners.dispatch(&SessionEvent::AvailabilityUpdate(update));
            }
            Ok(ServerMessage::Subscribed(bounds)) => {
                self.listeners.dispatch(&SessionEvent::Subscribed(bounds));
            }
            Ok(ServerMessage::Pong { .. }) => {
                self.listeners.dispatch(&SessionEvent::Pong);
            }
            Ok(ServerMessage::Connected { message, .. }) => {
                debug!("Server greeting: {}", message);
            }
            Ok(ServerMessage::Error { message }) => {
                warn!("Server rejected request: {}", message);
                self.listeners
                    .dispatch(&SessionEvent::Error(SessionError::ServerRejected(message)));
            }
            Err(e) => {
                warn!("Ignoring undecodable frame: {}", e);
            }
        }
    }

    fn handle_error(&self, generation: u64, error: SessionError) {
        {
            let mut core = self.core.lock();
            if !Self::is_current(&core, generation) {
                return;
            }
            core.last_error = Some(error.clone());
            self.set_state(&mut core, ConnectionState::Error);
        }

        warn!("Connection error: {}", error);
        self.listeners.dispatch(&SessionEvent::Error(error));
    }

    fn handle_close(self: &Arc<Self>, generation: u64) {
        let mut events = vec![SessionEvent::Disconnected];
        {
            let mut core = self.core.lock();
            if !Self::is_current(&core, generation) {
                return;
            }

            if let Some(task) = core.heartbeat_task.take() {
                task.abort();
            }
            core.outbound = None;
            core.socket_task = None;
            self.set_state(&mut core, ConnectionState::Disconnected);

            match core.backoff.next_delay() {
                Some(delay) => {
                    let attempt = core.backoff.attempts();
                    info!(
                        "Reconnecting to {} in {:?} (attempt {})",
                        self.config.url, delay, attempt
                    );
                    core.reconnect_task = Some(tokio::spawn(reconnect_after(
                        Arc::downgrade(self),
                        generation,
                        delay,
                    )));
                    events.push(SessionEvent::Reconnecting { attempt, delay });
                }
                None => {
                    warn!(
                        "Giving up on {} after {} attempts",
                        self.config.url,
                        core.backoff.attempts()
                    );
                    events.push(SessionEvent::MaxReconnectAttempts);
                }
            }
        }

        for event in &events {
            self.listeners.dispatch(event);
        }
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        let core = self.core.get_mut();
        for task in [
            core.socket_task.take(),
            core.heartbeat_task.take(),
            core.reconnect_task.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }
}

fn spawn_heartbeat(outbound: mpsc::UnboundedSender<Message>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let ping = match (ClientMessage::Ping {}).to_json() {
            Ok(json) => json,
            Err(e) => {
                warn!("Failed to serialize ping: {}", e);
                return;
            }
        };

        let mut ticker = interval_at(Instant::now() + interval, interval);
        loop {
            ticker.tick().await;
            if outbound.send(Message::Text(ping.clone())).is_err() {
                break;
            }
        }
    })
}

async fn reconnect_after(session: Weak<Inner>, generation: u64, delay: Duration) {
    sleep(delay).await;

    let Some(inner) = session.upgrade() else {
        return;
    };
    let mut core = inner.core.lock();
    if !Inner::is_current(&core, generation) {
        return;
    }
    // This task is the pending timer; drop its own handle
    core.reconnect_task = None;
    inner.open_socket(&mut core);
}

async fn run_socket(session: Weak<Inner>, generation: u64, url: String, connect_timeout: Duration) {
    let failure = |error: SessionError| {
        if let Some(inner) = session.upgrade() {
            inner.handle_error(generation, error);
            inner.handle_close(generation);
        }
    };

    let ws = match tokio::time::timeout(connect_timeout, connect_async(url.as_str())).await {
        Ok(Ok((ws, _response))) => ws,
        Ok(Err(e)) => return failure(SessionError::from(e)),
        Err(_) => return failure(SessionError::ConnectTimeout(connect_timeout)),
    };

    let (mut sink, mut stream) = ws.split();
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<Message>();

    let opened = match session.upgrade() {
        Some(inner) => inner.handle_open(generation, outbound_tx),
        None => false,
    };
    if !opened {
        let _ = sink.close().await;
        return;
    }

    let outcome = loop {
        tokio::select! {
            outgoing = outbound_rx.recv() => match outgoing {
                Some(message) => {
                    let closing = matches!(message, Message::Close(_));
                    if let Err(e) = sink.send(message).await {
                        break Some(SessionError::from(e));
                    }
                    if closing {
                        break None;
                    }
                }
                None => {
                    let _ = sink.close().await;
                    break None;
                }
            },
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => match session.upgrade() {
                    Some(inner) => inner.handle_frame(generation, &text),
                    None => break None,
                },
                Some(Ok(Message::Close(frame))) => {
                    debug!("Server closed the socket: {:?}", frame);
                    break None;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Some(SessionError::from(e)),
                None => break None,
            }
        }
    };

    if let Some(inner) = session.upgrade() {
        if let Some(error) = outcome {
            inner.handle_error(generation, error);
        }
        inner.handle_close(generation);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_new_session_is_idle() {
        let session = ClientSession::new(SessionConfig::new("ws://127.0.0.1:1/api/v1/ws"));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.bounds(), None);
        assert!(!session.has_pending_timers());
        assert!(!session.send(&ClientMessage::Ping {}));
    }

    #[tokio::test]
    async fn test_subscribe_while_disconnected_is_remembered() {
        let session = ClientSession::new(SessionConfig::new("ws://127.0.0.1:1/api/v1/ws"));
        let bounds = Bounds::new(40.70, 40.72, -74.02, -74.00).unwrap();

        session.subscribe(bounds).unwrap();
        assert_eq!(session.bounds(), Some(bounds));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_invalid_bounds_rejected_locally() {
        let session = ClientSession::new(SessionConfig::new("ws://127.0.0.1:1/api/v1/ws"));
        let inverted = Bounds {
            min_lat: 41.0,
            max_lat: 40.0,
            min_lng: -74.02,
            max_lng: -74.00,
        };

        assert!(matches!(
            session.subscribe(inverted),
            Err(SessionError::InvalidBounds(_))
        ));
        assert!(matches!(
            session.connect(Some(inverted)).await,
            Err(SessionError::InvalidBounds(_))
        ));
        assert_eq!(session.bounds(), None);
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_disconnect_when_idle_emits_nothing() {
        let session = ClientSession::new(SessionConfig::new("ws://127.0.0.1:1/api/v1/ws"));
        let hits = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        session.on(EventKind::Disconnected, move |_| {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        });

        session.disconnect();
        assert_eq!(hits.load(std::sync::atomic::Ordering::SeqCst), 0);
    }
}
