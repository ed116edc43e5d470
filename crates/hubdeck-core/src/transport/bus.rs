// ── Remote update bus ──
//
// Both transports publish every state they observe (pushed events and
// fetched results alike) onto one broadcast bus. Stores subscribe per
// entity and never learn which transport produced an update.

use std::sync::Arc;

use futures_core::Stream;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tracing::warn;

use crate::model::{EntityId, RemoteReading};

const BUS_CAPACITY: usize = 512;

/// One remote observation, stamped with when it was received.
#[derive(Debug, Clone)]
pub struct EntityUpdate {
    pub reading: RemoteReading,
    /// Local receive time; used to fence results that predate an ack.
    pub observed_at: Instant,
}

impl EntityUpdate {
    pub fn now(reading: RemoteReading) -> Self {
        Self {
            reading,
            observed_at: Instant::now(),
        }
    }

    /// Stamp a reading with an earlier time, e.g. when its request started.
    pub fn observed(reading: RemoteReading, observed_at: Instant) -> Self {
        Self {
            reading,
            observed_at,
        }
    }

    pub fn entity_id(&self) -> &EntityId {
        &self.reading.entity_id
    }
}

/// Cloneable publisher shared by every transport of a session.
#[derive(Debug, Clone)]
pub struct UpdateBus {
    tx: broadcast::Sender<Arc<EntityUpdate>>,
}

impl UpdateBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BUS_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, update: EntityUpdate) {
        // No subscribers yet is fine
        let _ = self.tx.send(Arc::new(update));
    }

    /// Updates for a single entity.
    pub fn subscribe(&self, entity_id: &EntityId) -> Subscription {
        Subscription {
            entity_id: entity_id.clone(),
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for UpdateBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Per-entity view of the update bus.
///
/// Sees every remote change for its entity, including echoes of the
/// engine's own commands.
pub struct Subscription {
    entity_id: EntityId,
    rx: broadcast::Receiver<Arc<EntityUpdate>>,
}

impl Subscription {
    pub fn entity_id(&self) -> &EntityId {
        &self.entity_id
    }

    /// Next update for this entity; `None` once the bus is gone.
    ///
    /// A lagging receiver skips the overflowed updates: a later one for
    /// the same entity supersedes them anyway.
    pub async fn recv(&mut self) -> Option<Arc<EntityUpdate>> {
        loop {
            match self.rx.recv().await {
                Ok(update) if update.entity_id() == &self.entity_id => return Some(update),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => {
                    warn!(entity_id = %self.entity_id, skipped, "Update subscription lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }

    /// Convert into a `Stream` for use with `StreamExt` combinators.
    pub fn into_stream(self) -> impl Stream<Item = Arc<EntityUpdate>> + Send + Unpin {
        Box::pin(futures_util::stream::unfold(self, |mut sub| async move {
            sub.recv().await.map(|update| (update, sub))
        }))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[tokio::test]
    async fn subscription_filters_by_entity() {
        let bus = UpdateBus::new();
        let mut door = bus.subscribe(&id("light.door"));

        bus.publish(EntityUpdate::now(RemoteReading::value(id("light.hall"), 10.0)));
        bus.publish(EntityUpdate::now(RemoteReading::value(id("light.door"), 55.0)));

        let update = door.recv().await.unwrap();
        assert_eq!(update.entity_id().as_str(), "light.door");
        assert_eq!(update.reading.value, Some(55.0));
    }

    #[test]
    fn recv_stays_pending_until_its_entity_updates() {
        let bus = UpdateBus::new();
        let mut door = bus.subscribe(&id("light.door"));
        let mut recv = tokio_test::task::spawn(door.recv());
        tokio_test::assert_pending!(recv.poll());

        bus.publish(EntityUpdate::now(RemoteReading::value(id("light.hall"), 10.0)));
        tokio_test::assert_pending!(recv.poll());

        bus.publish(EntityUpdate::now(RemoteReading::value(id("light.door"), 40.0)));
        let update = tokio_test::assert_ready!(recv.poll()).unwrap();
        assert_eq!(update.reading.value, Some(40.0));
    }

    #[tokio::test]
    async fn stream_ends_when_bus_dropped() {
        let bus = UpdateBus::new();
        let stream = bus.subscribe(&id("light.door")).into_stream();
        bus.publish(EntityUpdate::now(RemoteReading::value(id("light.door"), 1.0)));
        drop(bus);

        let collected: Vec<_> = stream.collect().await;
        assert_eq!(collected.len(), 1);
    }
}
