// ── Transport abstraction ──
//
// A uniform surface over the two ways of talking to the hub: the
// WebSocket push channel (with REST for reads and commands) and plain
// HTTP polling. The connection manager owns exactly one active
// transport at a time and swaps it through a `TransportFactory`.

mod bus;
mod factory;
mod poll;
mod push;

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::time::Instant;

pub use bus::{EntityUpdate, Subscription, UpdateBus};
pub use factory::{HubTransportFactory, TransportFactory};
pub use poll::PollTransport;
pub use push::PushTransport;

use crate::connection::ConnectionMode;
use crate::error::CoreError;
use crate::model::{EntityId, HubCommand, RemoteReading};

/// One way of exchanging state with the hub.
///
/// Fetched states are returned *and* published on the session's
/// [`UpdateBus`], so subscribers see pulls and pushes alike.
#[async_trait]
pub trait Transport: Send + Sync {
    fn mode(&self) -> ConnectionMode;

    /// Cheap, local liveness flag (no I/O).
    fn is_connected(&self) -> bool;

    /// Remote changes for one entity.
    fn subscribe(&self, entity_id: &EntityId) -> Subscription;

    async fn get_state(&self, entity_id: &EntityId) -> Result<RemoteReading, CoreError>;

    /// Entities the hub does not know are absent from the result.
    async fn get_states(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RemoteReading>, CoreError>;

    async fn send_command(&self, entity_id: &EntityId, command: HubCommand) -> Result<(), CoreError>;

    /// Heartbeat probe. Callers bound it with their own timeout.
    async fn check_alive(&self) -> Result<(), CoreError>;

    async fn close(&self);
}

/// Dispatch a [`HubCommand`] through the REST client.
pub(crate) async fn send_via_rest(
    client: &hubdeck_api::HubClient,
    entity_id: &EntityId,
    command: HubCommand,
) -> Result<(), CoreError> {
    let id = entity_id.as_str();
    let result = match command {
        HubCommand::SetBrightness(pct) => client.set_brightness(id, pct).await,
        HubCommand::SetVolume(level) => client.set_volume(id, level).await,
        HubCommand::TurnOn => client.turn_on(id).await,
        HubCommand::TurnOff => client.turn_off(id).await,
    };
    result.map_err(CoreError::from)
}

/// Fetch and map many states, publishing each reading on the bus.
///
/// Readings are stamped with the request start time so results that
/// raced an acknowledgment can be fenced off.
pub(crate) async fn fetch_via_rest(
    client: &hubdeck_api::HubClient,
    bus: &UpdateBus,
    entity_ids: &[EntityId],
) -> Result<HashMap<EntityId, RemoteReading>, CoreError> {
    let started = Instant::now();
    let raw_ids: Vec<String> = entity_ids.iter().map(ToString::to_string).collect();
    let mut raw = client.get_states(&raw_ids).await?;

    let mut readings = HashMap::with_capacity(raw.len());
    for id in entity_ids {
        if let Some(state) = raw.remove(id.as_str()) {
            let reading = RemoteReading::from_hub(id, &state);
            bus.publish(EntityUpdate::observed(reading.clone(), started));
            readings.insert(id.clone(), reading);
        }
    }
    Ok(readings)
}

/// Fetch and map one state, publishing it on the bus.
pub(crate) async fn fetch_one_via_rest(
    client: &hubdeck_api::HubClient,
    bus: &UpdateBus,
    entity_id: &EntityId,
) -> Result<RemoteReading, CoreError> {
    let started = Instant::now();
    let state = client.get_state(entity_id.as_str()).await?;
    let reading = RemoteReading::from_hub(entity_id, &state);
    bus.publish(EntityUpdate::observed(reading.clone(), started));
    Ok(reading)
}
