// Shared fakes for the sync engine integration tests: an in-memory hub,
// transports over it, and a factory whose outcomes tests can flip.

#![allow(dead_code, clippy::unwrap_used)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use secrecy::SecretString;
use tokio::time::Instant;
use url::Url;

use hubdeck_core::{
    ConnectionMode, CoreError, Domain, EntityId, EntityUpdate, HubCommand, HubConfig, Notification,
    NotificationSink, RemoteReading, Subscription, SyncTuning, Transport, TransportFactory,
    UpdateBus,
};

pub fn id(raw: &str) -> EntityId {
    EntityId::parse(raw).unwrap()
}

pub fn config() -> HubConfig {
    HubConfig::new(
        Url::parse("http://hub.test:8123").unwrap(),
        SecretString::from("token".to_owned()),
    )
    .with_entity("door", id("light.door"))
    .with_entity("hall", id("light.hall"))
    .with_entity("speaker", id("media_player.living"))
    .with_entity("temperature", id("sensor.hall_temp"))
}

pub fn tuning() -> SyncTuning {
    SyncTuning::default()
}

// ── In-memory hub ───────────────────────────────────────────────────

/// The fake hub every transport talks to.
#[derive(Default)]
pub struct Hub {
    pub levels: Mutex<HashMap<EntityId, f64>>,
    pub commands: Mutex<Vec<(EntityId, HubCommand)>>,
    pub fail_commands: AtomicBool,
    /// Accept commands but never answer them.
    pub hang_commands: AtomicBool,
    pub command_delay: Mutex<Duration>,
    /// Publish the applied level back on the bus, like a push echo.
    pub echo: AtomicBool,
    pub fetches: AtomicU32,
    pub fail_fetches: AtomicBool,
    /// Refuse fetches that touch this domain only.
    pub fail_domain: Mutex<Option<Domain>>,
}

impl Hub {
    pub fn set_level(&self, entity_id: &EntityId, value: f64) {
        self.levels.lock().unwrap().insert(entity_id.clone(), value);
    }

    pub fn commands(&self) -> Vec<(EntityId, HubCommand)> {
        self.commands.lock().unwrap().clone()
    }

    fn apply(&self, entity_id: &EntityId, command: HubCommand) -> f64 {
        let level = match command {
            HubCommand::SetBrightness(pct) => f64::from(pct),
            HubCommand::SetVolume(v) => (v * 100.0).round(),
            HubCommand::TurnOn => 100.0,
            HubCommand::TurnOff => 0.0,
        };
        self.set_level(entity_id, level);
        level
    }
}

// ── Transport ───────────────────────────────────────────────────────

pub struct FakeTransport {
    pub mode: ConnectionMode,
    pub hub: Arc<Hub>,
    pub bus: UpdateBus,
    pub connected: AtomicBool,
    pub fail_probe: AtomicBool,
    pub probes: AtomicU32,
    pub closed: AtomicBool,
}

#[async_trait]
impl Transport for FakeTransport {
    fn mode(&self) -> ConnectionMode {
        self.mode
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && !self.closed.load(Ordering::SeqCst)
    }

    fn subscribe(&self, entity_id: &EntityId) -> Subscription {
        self.bus.subscribe(entity_id)
    }

    async fn get_state(&self, entity_id: &EntityId) -> Result<RemoteReading, CoreError> {
        let states = self.get_states(std::slice::from_ref(entity_id)).await?;
        states.get(entity_id).cloned().ok_or_else(|| CoreError::NotFound {
            entity_id: entity_id.to_string(),
        })
    }

    async fn get_states(
        &self,
        entity_ids: &[EntityId],
    ) -> Result<HashMap<EntityId, RemoteReading>, CoreError> {
        self.hub.fetches.fetch_add(1, Ordering::SeqCst);
        let failing = *self.hub.fail_domain.lock().unwrap();
        let domain_down = failing.is_some_and(|d| entity_ids.iter().any(|id| id.domain() == Some(d)));
        if domain_down || self.hub.fail_fetches.load(Ordering::SeqCst) {
            return Err(CoreError::Transport {
                reason: "fetch refused".into(),
            });
        }
        let started = Instant::now();
        let levels = self.hub.levels.lock().unwrap().clone();
        let mut out = HashMap::new();
        for id in entity_ids {
            if let Some(level) = levels.get(id) {
                let reading = RemoteReading::value(id.clone(), *level);
                self.bus.publish(EntityUpdate::observed(reading.clone(), started));
                out.insert(id.clone(), reading);
            }
        }
        Ok(out)
    }

    async fn send_command(&self, entity_id: &EntityId, command: HubCommand) -> Result<(), CoreError> {
        let delay = *self.hub.command_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.hub
            .commands
            .lock()
            .unwrap()
            .push((entity_id.clone(), command));
        if self.hub.hang_commands.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.hub.fail_commands.load(Ordering::SeqCst) {
            return Err(CoreError::Command {
                target: entity_id.to_string(),
                message: "hub said no".into(),
            });
        }
        let level = self.hub.apply(entity_id, command);
        if self.hub.echo.load(Ordering::SeqCst) {
            self.bus
                .publish(EntityUpdate::now(RemoteReading::value(entity_id.clone(), level)));
        }
        Ok(())
    }

    async fn check_alive(&self) -> Result<(), CoreError> {
        self.probes.fetch_add(1, Ordering::SeqCst);
        if self.fail_probe.load(Ordering::SeqCst) {
            Err(CoreError::Transport {
                reason: "probe failed".into(),
            })
        } else {
            Ok(())
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

// ── Factory ─────────────────────────────────────────────────────────

pub struct FakeFactory {
    pub hub: Arc<Hub>,
    pub push_ok: AtomicBool,
    pub poll_ok: AtomicBool,
    pub reject_token: AtomicBool,
    /// Leave the push handshake unanswered.
    pub hang_push: AtomicBool,
    pub push_opens: AtomicU32,
    pub poll_opens: AtomicU32,
    pub opened: Mutex<Vec<Arc<FakeTransport>>>,
}

impl FakeFactory {
    pub fn new(hub: Arc<Hub>) -> Arc<Self> {
        Arc::new(Self {
            hub,
            push_ok: AtomicBool::new(true),
            poll_ok: AtomicBool::new(true),
            reject_token: AtomicBool::new(false),
            hang_push: AtomicBool::new(false),
            push_opens: AtomicU32::new(0),
            poll_opens: AtomicU32::new(0),
            opened: Mutex::new(Vec::new()),
        })
    }

    /// The most recently opened transport.
    pub fn last(&self) -> Arc<FakeTransport> {
        Arc::clone(self.opened.lock().unwrap().last().unwrap())
    }

    pub fn fail_everything(&self) {
        self.push_ok.store(false, Ordering::SeqCst);
        self.poll_ok.store(false, Ordering::SeqCst);
    }

    fn open(&self, mode: ConnectionMode, bus: UpdateBus) -> Arc<dyn Transport> {
        let transport = Arc::new(FakeTransport {
            mode,
            hub: Arc::clone(&self.hub),
            bus,
            connected: AtomicBool::new(true),
            fail_probe: AtomicBool::new(false),
            probes: AtomicU32::new(0),
            closed: AtomicBool::new(false),
        });
        self.opened.lock().unwrap().push(Arc::clone(&transport));
        transport
    }
}

#[async_trait]
impl TransportFactory for FakeFactory {
    async fn open_push(
        &self,
        _config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError> {
        self.push_opens.fetch_add(1, Ordering::SeqCst);
        if self.hang_push.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.reject_token.load(Ordering::SeqCst) {
            return Err(CoreError::Authentication {
                message: "auth_invalid".into(),
            });
        }
        if !self.push_ok.load(Ordering::SeqCst) {
            return Err(CoreError::Transport {
                reason: "socket refused".into(),
            });
        }
        Ok(self.open(ConnectionMode::Push, bus))
    }

    async fn open_poll(
        &self,
        _config: &HubConfig,
        bus: UpdateBus,
    ) -> Result<Arc<dyn Transport>, CoreError> {
        self.poll_opens.fetch_add(1, Ordering::SeqCst);
        if !self.poll_ok.load(Ordering::SeqCst) {
            return Err(CoreError::Transport {
                reason: "connection refused".into(),
            });
        }
        Ok(self.open(ConnectionMode::Poll, bus))
    }
}

// ── Notification capture ────────────────────────────────────────────

#[derive(Default)]
pub struct RecordingSink {
    pub seen: Mutex<Vec<Notification>>,
}

impl RecordingSink {
    pub fn seen(&self) -> Vec<Notification> {
        self.seen.lock().unwrap().clone()
    }

    pub fn count(&self, wanted: &Notification) -> usize {
        self.seen().iter().filter(|n| *n == wanted).count()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, notification: Notification) {
        self.seen.lock().unwrap().push(notification);
    }
}

/// Let spawned tasks run without advancing the paused clock much.
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
