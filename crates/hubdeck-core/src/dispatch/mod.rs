// ── Command dispatcher ──
//
// Turns a burst of continuous adjustments into a single outbound
// command per entity. Each change restarts that entity's settle timer;
// when it expires the most recent value fires. Discrete commands skip
// the timer and cancel whatever was pending for the entity.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::model::{CommandIntent, EntityId};

/// A settled value ready to go to the hub.
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRequest {
    pub entity_id: EntityId,
    pub value: f64,
}

struct PendingFire {
    generation: u64,
    value: f64,
    cancel: CancellationToken,
}

/// Per-entity debouncer feeding an mpsc channel.
pub struct CommandDispatcher {
    window: Duration,
    pending: Arc<DashMap<EntityId, PendingFire>>,
    generation: AtomicU64,
    fire_tx: mpsc::UnboundedSender<DispatchRequest>,
    cancel: CancellationToken,
}

impl CommandDispatcher {
    /// Create a dispatcher and the receiver its fires arrive on.
    pub fn new(window: Duration) -> (Self, mpsc::UnboundedReceiver<DispatchRequest>) {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let dispatcher = Self {
            window,
            pending: Arc::new(DashMap::new()),
            generation: AtomicU64::new(0),
            fire_tx,
            cancel: CancellationToken::new(),
        };
        (dispatcher, fire_rx)
    }

    /// Queue `value` for `entity_id`.
    pub fn schedule(&self, entity_id: &EntityId, value: f64, intent: CommandIntent) {
        if self.cancel.is_cancelled() {
            return;
        }
        match intent {
            CommandIntent::Discrete => {
                self.cancel(entity_id);
                trace!(%entity_id, value, "discrete command fires immediately");
                let _ = self.fire_tx.send(DispatchRequest {
                    entity_id: entity_id.clone(),
                    value,
                });
            }
            CommandIntent::Continuous => self.debounce(entity_id, value),
        }
    }

    fn debounce(&self, entity_id: &EntityId, value: f64) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let token = self.cancel.child_token();

        if let Some(previous) = self.pending.insert(
            entity_id.clone(),
            PendingFire {
                generation,
                value,
                cancel: token.clone(),
            },
        ) {
            previous.cancel.cancel();
        }

        let pending = Arc::clone(&self.pending);
        let fire_tx = self.fire_tx.clone();
        let window = self.window;
        let entity_id = entity_id.clone();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                () = token.cancelled() => {}
                () = tokio::time::sleep(window) => {
                    if let Some((entity_id, fire)) =
                        pending.remove_if(&entity_id, |_, p| p.generation == generation)
                    {
                        trace!(%entity_id, value = fire.value, "debounced command fires");
                        let _ = fire_tx.send(DispatchRequest { entity_id, value: fire.value });
                    }
                }
            }
        });
    }

    /// Drop any pending fire for `entity_id`.
    pub fn cancel(&self, entity_id: &EntityId) {
        if let Some((_, previous)) = self.pending.remove(entity_id) {
            previous.cancel.cancel();
        }
    }

    pub fn is_pending(&self, entity_id: &EntityId) -> bool {
        self.pending.contains_key(entity_id)
    }

    /// Cancel every timer; later schedules are ignored.
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.pending.clear();
    }
}

impl Drop for CommandDispatcher {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(300);

    fn id(raw: &str) -> EntityId {
        EntityId::parse(raw).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn burst_coalesces_to_last_value() {
        let (dispatcher, mut rx) = CommandDispatcher::new(WINDOW);
        let door = id("light.door");

        for value in [10.0, 20.0, 30.0, 40.0, 50.0] {
            dispatcher.schedule(&door, value, CommandIntent::Continuous);
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(dispatcher.is_pending(&door));

        tokio::time::sleep(WINDOW).await;
        let fire = rx.recv().await.unwrap();
        assert_eq!(fire.value, 50.0);
        assert!(rx.try_recv().is_err());
        assert!(!dispatcher.is_pending(&door));
    }

    #[tokio::test(start_paused = true)]
    async fn discrete_cancels_pending_fire() {
        let (dispatcher, mut rx) = CommandDispatcher::new(WINDOW);
        let door = id("light.door");

        dispatcher.schedule(&door, 30.0, CommandIntent::Continuous);
        dispatcher.schedule(&door, 0.0, CommandIntent::Discrete);

        assert_eq!(rx.recv().await.unwrap().value, 0.0);
        tokio::time::sleep(WINDOW * 2).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn entities_debounce_independently() {
        let (dispatcher, mut rx) = CommandDispatcher::new(WINDOW);

        dispatcher.schedule(&id("light.door"), 10.0, CommandIntent::Continuous);
        dispatcher.schedule(&id("light.hall"), 90.0, CommandIntent::Continuous);
        tokio::time::sleep(WINDOW + Duration::from_millis(10)).await;

        let mut fired = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        fired.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        assert_eq!(fired[0].entity_id.as_str(), "light.door");
        assert_eq!(fired[1].value, 90.0);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_timers() {
        let (dispatcher, mut rx) = CommandDispatcher::new(WINDOW);
        dispatcher.schedule(&id("light.door"), 10.0, CommandIntent::Continuous);
        dispatcher.shutdown();
        tokio::time::sleep(WINDOW * 2).await;
        assert!(rx.try_recv().is_err());
    }
}
