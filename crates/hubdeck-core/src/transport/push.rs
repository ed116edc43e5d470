// ── WebSocket push transport ──

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use hubdeck_api::{HubClient, PushChannel, StateChange};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::{
    EntityUpdate, Subscription, Transport, UpdateBus, fetch_one_via_rest, fetch_via_rest,
    send_via_rest,
};
use crate::connection::ConnectionMode;
use crate::error::CoreError;
use crate::model::{EntityId, HubCommand, RemoteReading};

/// Push channel for inbound changes, REST for reads and commands.
pub struct PushTransport {
    client: HubClient,
    channel: Arc<PushChannel>,
    bus: UpdateBus,
    cancel: CancellationToken,
}

impl PushTransport {
    /// Wrap a connected channel and start forwarding its events onto `bus`.
    pub fn start(client: HubClient, channel: PushChannel, bus: UpdateBus) -> Self {
        let channel = Arc::new(channel);
        let cancel = CancellationToken::new();

        let rx = channel.subscribe();
        let task_bus = bus.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            forward_events(rx, task_bus, task_cancel).await;
        });

        Self {
            client,
            channel,
            bus,
            cancel,
        }
    }

    /// Hub version reported during the handshake.
    pub fn hub_version(&self) -> Option<&str> {
        self.channel.hub_version()
    }
}

async fn forward_events(
    mut rx: tokio::sync::broadcast::Receiver<Arc<StateChange>>,
    bus: UpdateBus,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            change = rx.recv() => match change {
                Ok(change) => publish_change(&bus, &change),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Push event forwarder lagged");
                }
                Err(RecvError::Closed) => {
                    debug!("Push channel event stream closed");
                    break;
                }
            },
        }
    }
}

fn publish_change(bus: &UpdateBus, change: &StateChange) {
    let Some(state) = change.new_state.as_ref() else {
        trace!(entity_id = %change.entity_id, "Entity removed on hub");
        return;
    };
    // Entities outside the engine's domains still parse; stores filter
    match EntityId::parse(&change.entity_id) {
        Ok(id) => bus.publish(EntityUpdate::now(RemoteReading::from_hub(&id, state))),
        Err(e) => trace!(error = %e, "Ignoring event with malformed entity id"),
    }
}

#[async_trait]
impl Transport for PushTransport {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Push
    }

    fn is_connected(&self) -> bool {
        !self.cancel.is_cancelled() && self.channel.is_alive()
    }

    fn subscribe(&self, entity_id: &EntityId) -> Subscription {
        self.bus.subscribe(entity_id)
    }

    async fn get_state(&self, entity_id: &EntityId) -> Result<RemoteReading, CoreError> {
        fetch_one_via_rest(&self.client, &self.bus, entity_id).await
    }

    async fn get_states(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RemoteReading>, CoreError> {
        fetch_via_rest(&self.client, &self.bus, entity_ids).await
    }

    async fn send_command(&self, entity_id: &EntityId, command: HubCommand) -> Result<(), CoreError> {
        debug!(%entity_id, %command, "Sending command (push transport)");
        send_via_rest(&self.client, entity_id, command).await
    }

    async fn check_alive(&self) -> Result<(), CoreError> {
        if !self.is_connected() {
            return Err(CoreError::Transport {
                reason: "push channel closed".into(),
            });
        }
        self.channel.ping().await.map_err(CoreError::from)
    }

    async fn close(&self) {
        self.cancel.cancel();
        self.channel.shutdown();
    }
}

impl Drop for PushTransport {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use hubdeck_api::HubEntityState;

    #[tokio::test]
    async fn publish_change_maps_and_publishes() {
        let bus = UpdateBus::new();
        let id = EntityId::parse("light.door").unwrap();
        let mut sub = bus.subscribe(&id);

        let state: HubEntityState = serde_json::from_value(serde_json::json!({
            "entity_id": "light.door",
            "state": "on",
            "attributes": { "brightness": 255 }
        }))
        .unwrap();
        publish_change(
            &bus,
            &StateChange {
                entity_id: "light.door".into(),
                new_state: Some(state),
            },
        );
        // Removed entities produce nothing
        publish_change(
            &bus,
            &StateChange {
                entity_id: "light.door".into(),
                new_state: None,
            },
        );
        publish_change(
            &bus,
            &StateChange {
                entity_id: "light.door".into(),
                new_state: Some(
                    serde_json::from_value(serde_json::json!({
                        "entity_id": "light.door", "state": "off"
                    }))
                    .unwrap(),
                ),
            },
        );

        assert_eq!(sub.recv().await.unwrap().reading.value, Some(100.0));
        assert_eq!(sub.recv().await.unwrap().reading.value, Some(0.0));
    }
}
