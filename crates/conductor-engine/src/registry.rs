//! Run id → status channel mapping.

use conductor_types::StatusEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Buffered events per connection. Beyond this the consumer is too slow and
/// events are dropped.
pub const CONNECTION_BUFFER: usize = 256;

/// Type alias for the channel map to satisfy clippy complexity checks.
type ChannelMap = HashMap<String, (Uuid, mpsc::Sender<String>)>;

/// The receiving half of a registered status channel.
#[derive(Debug)]
pub struct StatusConnection {
    /// Unique id of this registration; used for stale-safe removal.
    pub id: Uuid,
    pub run_id: String,
    /// Serialized [`StatusEvent`] JSON, in publish order.
    pub receiver: mpsc::Receiver<String>,
}

/// Maps run ids to open status connections.
///
/// Delivery is best-effort and at-most-once: events for a run with no
/// connection are dropped, nothing is buffered for late subscribers.
///
/// Uses `std::sync::RwLock` intentionally: every acquisition is a brief
/// HashMap operation that never spans an `.await`, which lets the engine
/// publish from synchronous retry callbacks.
#[derive(Clone, Default)]
pub struct StatusRegistry {
    channels: Arc<RwLock<ChannelMap>>,
}

impl StatusRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, ChannelMap> {
        self.channels.read().unwrap_or_else(|poisoned| {
            tracing::error!("status registry lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    fn write(&self) -> RwLockWriteGuard<'_, ChannelMap> {
        self.channels.write().unwrap_or_else(|poisoned| {
            tracing::error!("status registry lock poisoned; recovering");
            poisoned.into_inner()
        })
    }

    /// Opens a status channel for `run_id`.
    ///
    /// A run id maps to at most one connection: registering an id that is
    /// already present replaces the previous connection, whose receiver then
    /// sees the channel close.
    pub fn register(&self, run_id: impl Into<String>) -> StatusConnection {
        let run_id = run_id.into();
        let (sender, receiver) = mpsc::channel(CONNECTION_BUFFER);
        let id = Uuid::new_v4();

        let previous = self.write().insert(run_id.clone(), (id, sender));
        if previous.is_some() {
            tracing::info!(run_id = %run_id, "replaced existing status connection");
        } else {
            tracing::debug!(run_id = %run_id, "registered status connection");
        }

        StatusConnection {
            id,
            run_id,
            receiver,
        }
    }

    /// Removes whatever connection is registered for `run_id`. Idempotent.
    pub fn unregister(&self, run_id: &str) -> bool {
        let removed = self.write().remove(run_id).is_some();
        if removed {
            tracing::debug!(run_id = %run_id, "unregistered status connection");
        }
        removed
    }

    /// Removes the connection for `run_id` only if it is still `connection_id`.
    ///
    /// A connection that was replaced by a newer registration must not tear
    /// down its successor when it closes.
    pub fn remove_connection(&self, run_id: &str, connection_id: Uuid) -> bool {
        let mut channels = self.write();
        match channels.get(run_id) {
            Some((current, _)) if *current == connection_id => {
                channels.remove(run_id);
                true
            }
            _ => false,
        }
    }

    /// Whether `connection_id` is the active connection for `run_id`.
    pub fn is_current(&self, run_id: &str, connection_id: Uuid) -> bool {
        matches!(self.read().get(run_id), Some((current, _)) if *current == connection_id)
    }

    pub fn is_registered(&self, run_id: &str) -> bool {
        self.read().contains_key(run_id)
    }

    /// Number of open connections.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Delivers `event` to its run's connection, if one is open.
    ///
    /// Never blocks and never fails; returns whether the event was queued.
    pub fn publish(&self, event: &StatusEvent) -> bool {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                tracing::error!(run_id = %event.run_id, "failed to serialize status event: {}", e);
                return false;
            }
        };

        let channels = self.read();
        let Some((_, sender)) = channels.get(&event.run_id) else {
            tracing::trace!(
                run_id = %event.run_id,
                status = %event.status,
                "no status connection; dropping event"
            );
            return false;
        };

        match sender.try_send(json) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!(
                    run_id = %event.run_id,
                    status = %event.status,
                    "dropping status event for slow consumer"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(
                    run_id = %event.run_id,
                    status = %event.status,
                    "status connection closed; dropping event"
                );
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_types::EventStatus;

    #[tokio::test]
    async fn publish_reaches_registered_connection() {
        let registry = StatusRegistry::new();
        let mut conn = registry.register("run-1");

        assert!(registry.publish(&StatusEvent::start("run-1", "audio_pipeline")));

        let json = conn.receiver.recv().await.expect("event should arrive");
        let event: StatusEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event.status, EventStatus::Start);
        assert_eq!(event.run_id, "run-1");
    }

    #[test]
    fn publish_without_connection_is_noop() {
        let registry = StatusRegistry::new();
        assert!(!registry.publish(&StatusEvent::error("ghost", "nobody listening")));
    }

    #[tokio::test]
    async fn second_registration_replaces_first() {
        let registry = StatusRegistry::new();
        let mut first = registry.register("run-1");
        let mut second = registry.register("run-1");

        assert_eq!(registry.len(), 1);
        assert!(registry.publish(&StatusEvent::error("run-1", "boom")));

        // The replaced sender was dropped, so the first receiver is closed.
        assert!(first.receiver.recv().await.is_none());
        assert!(second.receiver.recv().await.is_some());
    }

    #[test]
    fn stale_removal_keeps_successor() {
        let registry = StatusRegistry::new();
        let first = registry.register("run-1");
        let second = registry.register("run-1");

        assert!(!registry.remove_connection("run-1", first.id));
        assert!(registry.is_current("run-1", second.id));
        assert!(registry.remove_connection("run-1", second.id));
        assert!(registry.is_empty());
    }

    #[test]
    fn unregister_is_idempotent() {
        let registry = StatusRegistry::new();
        let _conn = registry.register("run-1");

        assert!(registry.unregister("run-1"));
        assert!(!registry.unregister("run-1"));
        assert!(!registry.publish(&StatusEvent::error("run-1", "late")));
    }

    #[test]
    fn full_buffer_drops_instead_of_blocking() {
        let registry = StatusRegistry::new();
        let _conn = registry.register("run-1");

        for _ in 0..CONNECTION_BUFFER {
            assert!(registry.publish(&StatusEvent::error("run-1", "fill")));
        }
        assert!(!registry.publish(&StatusEvent::error("run-1", "overflow")));
    }
}
