use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use spotcast_protocol::{Bounds, GeoPoint};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::error::RegistryError;

/// Serialized frame queued for a connection
pub type Frame = Arc<str>;

/// Registry-assigned connection identifier, increasing in registration order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Live connection record
struct Connection {
    outbound: mpsc::Sender<Frame>,
    subscription: Option<Bounds>,
    connected_at: DateTime<Utc>,
    peer: Option<SocketAddr>,
}

/// Result of a non-blocking enqueue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Queue full; this frame was dropped for this connection only
    Dropped,
    /// Socket task has gone away
    Closed,
}

/// Copy of a connection's outbound handle, detached from the registry lock
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<Frame>,
}

impl ConnectionHandle {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Enqueue a frame without waiting
    pub fn try_deliver(&self, frame: &Frame) -> Delivery {
        match self.outbound.try_send(Arc::clone(frame)) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => Delivery::Dropped,
            Err(TrySendError::Closed(_)) => Delivery::Closed,
        }
    }
}

/// Thread-safe set of live connections and their subscriptions
pub struct ConnectionRegistry {
    connections: RwLock<BTreeMap<ConnectionId, Connection>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Add a connection with no subscription
    pub fn register(&self, outbound: mpsc::Sender<Frame>, peer: Option<SocketAddr>) -> ConnectionId {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let connection = Connection {
            outbound,
            subscription: None,
            connected_at: Utc::now(),
            peer,
        };

        let mut connections = self.connections.write();
        connections.insert(id, connection);
        tracing::info!("Connection {} registered ({:?}). Total: {}", id, peer, connections.len());
        id
    }

    /// Remove a connection. Returns false if it was already gone.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let mut connections = self.connections.write();
        match connections.remove(&id) {
            Some(connection) => {
                let lifetime = Utc::now() - connection.connected_at;
                tracing::info!(
                    "Connection {} ({:?}) unregistered after {}s. Remaining: {}",
                    id,
                    connection.peer,
                    lifetime.num_seconds(),
                    connections.len()
                );
                true
            }
            None => false,
        }
    }

    /// Replace a connection's subscription, returning the previous one.
    ///
    /// Invalid bounds leave the current subscription untouched.
    pub fn set_subscription(
        &self,
        id: ConnectionId,
        bounds: Bounds,
    ) -> Result<Option<Bounds>, RegistryError> {
        bounds.validate()?;

        let mut connections = self.connections.write();
        let connection = connections
            .get_mut(&id)
            .ok_or(RegistryError::UnknownConnection(id))?;
        Ok(connection.subscription.replace(bounds))
    }

    pub fn subscription(&self, id: ConnectionId) -> Option<Bounds> {
        self.connections.read().get(&id).and_then(|c| c.subscription)
    }

    /// Point-in-time copy of every connection whose subscription contains `location`,
    /// in ascending id order. Holds the read lock only for the copy.
    pub fn snapshot_matching(&self, location: GeoPoint) -> Vec<ConnectionHandle> {
        self.connections
            .read()
            .iter()
            .filter(|(_, c)| c.subscription.is_some_and(|bounds| bounds.contains(location)))
            .map(|(id, c)| ConnectionHandle {
                id: *id,
                outbound: c.outbound.clone(),
            })
            .collect()
    }

    pub fn handle(&self, id: ConnectionId) -> Option<ConnectionHandle> {
        self.connections.read().get(&id).map(|c| ConnectionHandle {
            id,
            outbound: c.outbound.clone(),
        })
    }

    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.read().contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spotcast_protocol::BoundsError;

    fn downtown() -> Bounds {
        Bounds::new(40.70, 40.72, -74.02, -74.00).unwrap()
    }

    fn register(registry: &ConnectionRegistry) -> (ConnectionId, mpsc::Receiver<Frame>) {
        let (tx, rx) = mpsc::channel(8);
        (registry.register(tx, None), rx)
    }

    #[test]
    fn test_register_starts_without_subscription() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = register(&registry);

        assert!(registry.contains(id));
        assert_eq!(registry.subscription(id), None);
        assert!(registry.snapshot_matching(GeoPoint::new(40.713, -74.006)).is_empty());
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = register(&registry);
        let (other, _rx2) = register(&registry);

        assert!(registry.unregister(id));
        assert!(!registry.unregister(id));
        assert_eq!(registry.len(), 1);
        assert!(registry.contains(other));
    }

    #[test]
    fn test_last_subscription_wins() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = register(&registry);
        let uptown = Bounds::new(40.80, 40.82, -73.96, -73.94).unwrap();

        assert_eq!(registry.set_subscription(id, downtown()).unwrap(), None);
        assert_eq!(registry.set_subscription(id, uptown).unwrap(), Some(downtown()));
        assert_eq!(registry.subscription(id), Some(uptown));

        assert!(registry.snapshot_matching(GeoPoint::new(40.713, -74.006)).is_empty());
        assert_eq!(registry.snapshot_matching(GeoPoint::new(40.81, -73.95)).len(), 1);
    }

    #[test]
    fn test_invalid_bounds_keep_previous_subscription() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = register(&registry);
        registry.set_subscription(id, downtown()).unwrap();

        let inverted = Bounds {
            min_lat: 40.72,
            max_lat: 40.70,
            min_lng: -74.02,
            max_lng: -74.00,
        };
        assert_eq!(
            registry.set_subscription(id, inverted),
            Err(RegistryError::InvalidBounds(BoundsError::InvertedLatitude {
                min: 40.72,
                max: 40.70
            }))
        );
        assert_eq!(registry.subscription(id), Some(downtown()));
    }

    #[test]
    fn test_set_subscription_unknown_connection() {
        let registry = ConnectionRegistry::new();
        let (id, _rx) = register(&registry);
        registry.unregister(id);

        assert_eq!(
            registry.set_subscription(id, downtown()),
            Err(RegistryError::UnknownConnection(id))
        );
    }

    #[test]
    fn test_snapshot_matching_is_ordered_and_filtered() {
        let registry = ConnectionRegistry::new();
        let (a, _ra) = register(&registry);
        let (_unsubscribed, _rb) = register(&registry);
        let (c, _rc) = register(&registry);
        let (d, _rd) = register(&registry);

        registry.set_subscription(c, downtown()).unwrap();
        registry.set_subscription(a, downtown()).unwrap();
        registry
            .set_subscription(d, Bounds::new(41.0, 42.0, -75.0, -73.0).unwrap())
            .unwrap();

        let ids: Vec<ConnectionId> = registry
            .snapshot_matching(GeoPoint::new(40.713, -74.006))
            .iter()
            .map(|h| h.id())
            .collect();
        assert_eq!(ids, vec![a, c]);

        // Edge of the box counts as inside
        let edge = registry.snapshot_matching(GeoPoint::new(40.72, -74.02));
        assert_eq!(edge.len(), 2);
    }

    #[test]
    fn test_snapshot_survives_unregister() {
        let registry = ConnectionRegistry::new();
        let (id, rx) = register(&registry);
        registry.set_subscription(id, downtown()).unwrap();

        let snapshot = registry.snapshot_matching(GeoPoint::new(40.71, -74.01));
        registry.unregister(id);
        drop(rx);

        assert_eq!(snapshot.len(), 1);
        let frame: Frame = Arc::from("{}");
        assert_eq!(snapshot[0].try_deliver(&frame), Delivery::Closed);
    }

    #[test]
    fn test_try_deliver_drops_when_full() {
        let registry = ConnectionRegistry::new();
        let (tx, mut rx) = mpsc::channel(1);
        let id = registry.register(tx, None);
        let handle = registry.handle(id).unwrap();
        let frame: Frame = Arc::from("{}");

        assert_eq!(handle.try_deliver(&frame), Delivery::Sent);
        assert_eq!(handle.try_deliver(&frame), Delivery::Dropped);
        assert_eq!(rx.try_recv().unwrap().as_ref(), "{}");
    }

    #[test]
    fn test_concurrent_registration() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut threads = Vec::new();

        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                let mut ids = Vec::new();
                for _ in 0..50 {
                    let (tx, rx) = mpsc::channel(1);
                    let id = registry.register(tx, None);
                    registry.set_subscription(id, downtown()).unwrap();
                    let _ = registry.snapshot_matching(GeoPoint::new(40.71, -74.01));
                    ids.push((id, rx));
                }
                for (id, _) in ids.iter().step_by(2) {
                    registry.unregister(*id);
                }
                ids.len()
            }));
        }

        let total: usize = threads.into_iter().map(|t| t.join().unwrap()).sum();
        assert_eq!(total, 400);
        assert_eq!(registry.len(), 200);
    }
}
