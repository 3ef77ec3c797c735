//! Session events and listener registration

use std::any::Any;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use spotcast_protocol::{AvailabilityUpdate, Bounds};

use crate::error::SessionError;

/// Something that happened to a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Handshake finished; the remembered subscription has already been re-sent
    Connected,
    /// Socket closed, or the caller disconnected
    Disconnected,
    /// Transport failure, or a request the server rejected
    Error(SessionError),
    AvailabilityUpdate(AvailabilityUpdate),
    /// Server acknowledged a subscription
    Subscribed(Bounds),
    Pong,
    /// A retry is scheduled
    Reconnecting { attempt: u32, delay: Duration },
    /// Retries are used up; only an explicit `connect` starts over
    MaxReconnectAttempts,
}

/// Listener key for [`SessionEvent`] variants
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    AvailabilityUpdate,
    Subscribed,
    Pong,
    Reconnecting,
    MaxReconnectAttempts,
}

impl SessionEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            SessionEvent::Connected => EventKind::Connected,
            SessionEvent::Disconnected => EventKind::Disconnected,
            SessionEvent::Error(_) => EventKind::Error,
            SessionEvent::AvailabilityUpdate(_) => EventKind::AvailabilityUpdate,
            SessionEvent::Subscribed(_) => EventKind::Subscribed,
            SessionEvent::Pong => EventKind::Pong,
            SessionEvent::Reconnecting { .. } => EventKind::Reconnecting,
            SessionEvent::MaxReconnectAttempts => EventKind::MaxReconnectAttempts,
        }
    }
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Connected => "connected",
            EventKind::Disconnected => "disconnected",
            EventKind::Error => "error",
            EventKind::AvailabilityUpdate => "availability_update",
            EventKind::Subscribed => "subscribed",
            EventKind::Pong => "pong",
            EventKind::Reconnecting => "reconnecting",
            EventKind::MaxReconnectAttempts => "max_reconnect_attempts",
        }
    }
}

/// Token returned by `on`, used to remove the listener again
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub(crate) type Listener = Arc<dyn Fn(&SessionEvent) + Send + Sync>;

/// Listener table keyed by event kind
#[derive(Default)]
pub(crate) struct Listeners {
    table: Mutex<HashMap<EventKind, Vec<(ListenerId, Listener)>>>,
    next_id: AtomicU64,
}

impl Listeners {
    pub fn add(&self, kind: EventKind, listener: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.table.lock().entry(kind).or_default().push((id, listener));
        id
    }

    pub fn remove(&self, id: ListenerId) -> bool {
        let mut table = self.table.lock();
        for listeners in table.values_mut() {
            if let Some(pos) = listeners.iter().position(|(lid, _)| *lid == id) {
                listeners.remove(pos);
                return true;
            }
        }
        false
    }

    #[cfg(test)]
    pub fn count(&self, kind: EventKind) -> usize {
        self.table.lock().get(&kind).map_or(0, Vec::len)
    }

    /// Invoke every listener for the event's kind, in registration order.
    ///
    /// Works on a snapshot, so listeners may call `on`/`off` while running.
    /// A panicking listener is logged and skipped.
    pub fn dispatch(&self, event: &SessionEvent) {
        let kind = event.kind();
        let snapshot: Vec<Listener> = self
            .table
            .lock()
            .get(&kind)
            .map(|listeners| listeners.iter().map(|(_, l)| Arc::clone(l)).collect())
            .unwrap_or_default();

        for listener in snapshot {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| listener(event))) {
                tracing::error!(
                    "Listener for '{}' panicked: {}",
                    kind.as_str(),
                    panic_message(panic.as_ref())
                );
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "<non-string panic>"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn counter(listeners: &Listeners, kind: EventKind) -> Arc<AtomicUsize> {
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        listeners.add(
            kind,
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );
        hits
    }

    #[test]
    fn test_dispatch_by_kind() {
        let listeners = Listeners::default();
        let pongs = counter(&listeners, EventKind::Pong);
        let drops = counter(&listeners, EventKind::Disconnected);

        listeners.dispatch(&SessionEvent::Pong);
        listeners.dispatch(&SessionEvent::Pong);

        assert_eq!(pongs.load(Ordering::SeqCst), 2);
        assert_eq!(drops.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_off_removes_listener() {
        let listeners = Listeners::default();
        let hits = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&hits);
        let id = listeners.add(
            EventKind::Connected,
            Arc::new(move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
            }),
        );

        assert!(listeners.remove(id));
        assert!(!listeners.remove(id));
        listeners.dispatch(&SessionEvent::Connected);

        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert_eq!(listeners.count(EventKind::Connected), 0);
    }

    #[test]
    fn test_panicking_listener_does_not_stop_others() {
        let listeners = Listeners::default();
        listeners.add(EventKind::Pong, Arc::new(|_| panic!("listener bug")));
        let hits = counter(&listeners, EventKind::Pong);

        listeners.dispatch(&SessionEvent::Pong);

        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_listener_added_during_dispatch_waits_for_next_event() {
        let listeners = Arc::new(Listeners::default());
        let late_hits = Arc::new(AtomicUsize::new(0));

        let table = Arc::clone(&listeners);
        let late = Arc::clone(&late_hits);
        listeners.add(
            EventKind::Pong,
            Arc::new(move |_| {
                let late = Arc::clone(&late);
                table.add(
                    EventKind::Pong,
                    Arc::new(move |_| {
                        late.fetch_add(1, Ordering::SeqCst);
                    }),
                );
            }),
        );

        listeners.dispatch(&SessionEvent::Pong);
        assert_eq!(late_hits.load(Ordering::SeqCst), 0);
        assert_eq!(listeners.count(EventKind::Pong), 2);

        listeners.dispatch(&SessionEvent::Pong);
        assert_eq!(late_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_event_kind_names() {
        let event = SessionEvent::Reconnecting {
            attempt: 2,
            delay: Duration::from_secs(2),
        };
        assert_eq!(event.kind(), EventKind::Reconnecting);
        assert_eq!(EventKind::MaxReconnectAttempts.as_str(), "max_reconnect_attempts");
        assert_eq!(
            SessionEvent::Error(SessionError::ConnectFailed).kind().as_str(),
            "error"
        );
    }
}
