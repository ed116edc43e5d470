// ── HTTP pull transport ──

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use hubdeck_api::HubClient;
use tracing::debug;

use super::{Subscription, Transport, UpdateBus, fetch_one_via_rest, fetch_via_rest, send_via_rest};
use crate::connection::ConnectionMode;
use crate::error::CoreError;
use crate::model::{EntityId, HubCommand, RemoteReading};

/// Polling fallback: every read is a REST round trip.
///
/// "Connected" means the most recent request reached the hub.
pub struct PollTransport {
    client: HubClient,
    bus: UpdateBus,
    reachable: AtomicBool,
    closed: AtomicBool,
}

impl PollTransport {
    pub fn new(client: HubClient, bus: UpdateBus) -> Self {
        Self {
            client,
            bus,
            reachable: AtomicBool::new(true),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), CoreError> {
        if self.closed.load(Ordering::SeqCst) {
            Err(CoreError::NotConnected)
        } else {
            Ok(())
        }
    }

    /// Record reachability from a request result.
    fn track<T>(&self, result: Result<T, CoreError>) -> Result<T, CoreError> {
        match &result {
            Ok(_) => self.reachable.store(true, Ordering::SeqCst),
            Err(e) if e.is_transport() => self.reachable.store(false, Ordering::SeqCst),
            Err(_) => {}
        }
        result
    }
}

#[async_trait]
impl Transport for PollTransport {
    fn mode(&self) -> ConnectionMode {
        ConnectionMode::Poll
    }

    fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.reachable.load(Ordering::SeqCst)
    }

    fn subscribe(&self, entity_id: &EntityId) -> Subscription {
        self.bus.subscribe(entity_id)
    }

    async fn get_state(&self, entity_id: &EntityId) -> Result<RemoteReading, CoreError> {
        self.ensure_open()?;
        self.track(fetch_one_via_rest(&self.client, &self.bus, entity_id).await)
    }

    async fn get_states(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RemoteReading>, CoreError> {
        self.ensure_open()?;
        self.track(fetch_via_rest(&self.client, &self.bus, entity_ids).await)
    }

    async fn send_command(&self, entity_id: &EntityId, command: HubCommand) -> Result<(), CoreError> {
        self.ensure_open()?;
        debug!(%entity_id, %command, "Sending command (poll transport)");
        self.track(send_via_rest(&self.client, entity_id, command).await)
    }

    async fn check_alive(&self) -> Result<(), CoreError> {
        self.ensure_open()?;
        self.track(self.client.ping().await.map_err(CoreError::from))
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
