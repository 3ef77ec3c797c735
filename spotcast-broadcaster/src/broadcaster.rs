use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use spotcast_protocol::{AvailabilityUpdate, GeoPoint, ServerMessage};

use crate::error::BroadcastError;
use crate::registry::{ConnectionId, ConnectionRegistry, Delivery, Frame};

/// Outcome of one fan-out
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Connections whose subscription contained the location
    pub matched: usize,
    /// Frames queued for delivery
    pub delivered: usize,
    /// Frames dropped because a connection's queue was full
    pub dropped: usize,
    /// Closed connections removed from the registry during fan-out
    pub pruned: usize,
    /// Update was older than the last one sent for this spot and was skipped
    pub stale: bool,
}

/// Geo-filtered fan-out of availability updates.
///
/// Delivery is best-effort and at-most-once: per-connection failures are
/// absorbed here and never reach the caller.
///
/// The last timestamp of every spot ever broadcast is kept for stale
/// detection, so memory grows with the number of distinct `spot_id`s. That
/// set is assumed to be the fixed inventory of a parking operator.
pub struct Broadcaster {
    registry: Arc<ConnectionRegistry>,
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl Broadcaster {
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            registry,
            last_sent: Mutex::new(HashMap::new()),
        }
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Deliver `update` to every connection subscribed to an area containing `location`
    pub fn broadcast(
        &self,
        location: GeoPoint,
        update: &AvailabilityUpdate,
    ) -> Result<BroadcastReport, BroadcastError> {
        if update.spot_id.trim().is_empty() {
            return Err(BroadcastError::MissingSpotId);
        }
        location.validate()?;

        let frame: Frame = ServerMessage::AvailabilityUpdate(update.clone()).to_json()?.into();
        let mut report = BroadcastReport::default();

        // Held through the enqueue so a spot's updates reach every queue in timestamp order
        let mut last_sent = self.last_sent.lock();
        if let Some(previous) = last_sent.get(&update.spot_id) {
            if update.timestamp < *previous {
                tracing::debug!(
                    "Skipping stale update for spot {} ({} < {})",
                    update.spot_id,
                    update.timestamp,
                    previous
                );
                report.stale = true;
                return Ok(report);
            }
        }
        last_sent.insert(update.spot_id.clone(), update.timestamp);

        let targets = self.registry.snapshot_matching(location);
        report.matched = targets.len();

        for target in targets {
            match target.try_deliver(&frame) {
                Delivery::Sent => report.delivered += 1,
                Delivery::Dropped => {
                    tracing::warn!("Dropping update for spot {} to slow connection {}", update.spot_id, target.id());
                    report.dropped += 1;
                }
                Delivery::Closed => {
                    if self.registry.unregister(target.id()) {
                        report.pruned += 1;
                    }
                }
            }
        }
        drop(last_sent);

        tracing::debug!(
            "Broadcast spot {} (occupied: {}): {} matched, {} delivered",
            update.spot_id,
            update.is_occupied,
            report.matched,
            report.delivered
        );
        Ok(report)
    }

    /// Unicast a control message. Returns true if it was queued.
    pub fn send_direct(&self, id: ConnectionId, message: &ServerMessage) -> bool {
        let Some(handle) = self.registry.handle(id) else {
            return false;
        };

        let frame: Frame = match message.to_json() {
            Ok(json) => json.into(),
            Err(e) => {
                tracing::warn!("Failed to serialize {} for {}: {}", message.kind(), id, e);
                return false;
            }
        };

        match handle.try_deliver(&frame) {
            Delivery::Sent => true,
            Delivery::Dropped => {
                tracing::warn!("Dropping {} to slow connection {}", message.kind(), id);
                false
            }
            Delivery::Closed => {
                self.registry.unregister(id);
                false
            }
        }
    }
}
