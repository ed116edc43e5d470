// ── Sync session ──
//
// Composition root for one dashboard session: a connection manager,
// one store per configured domain and the poll scheduler, wired so that
// polling pauses while push is healthy and every store is force-synced
// whenever the connection is restored.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::FutureExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::HubConfig;
use crate::connection::{ConnectionManager, ConnectionSnapshot};
use crate::error::CoreError;
use crate::model::{ChangeSource, CommandIntent, Domain, EntityId};
use crate::notify::{Notification, NotificationSink};
use crate::poll::{FetchFn, PollingScheduler};
use crate::store::EntitySyncStore;
use crate::transport::{HubTransportFactory, TransportFactory};

const DOMAINS: [Domain; 3] = [Domain::Light, Domain::MediaPlayer, Domain::Sensor];

/// Forwards notifications to the caller's sink and to the session's
/// own reactor.
struct SessionSink {
    outer: Arc<dyn NotificationSink>,
    events: mpsc::UnboundedSender<Notification>,
}

impl NotificationSink for SessionSink {
    fn notify(&self, notification: Notification) {
        let _ = self.events.send(notification.clone());
        self.outer.notify(notification);
    }
}

/// A running sync engine for one hub.
pub struct SyncSession {
    config: HubConfig,
    manager: ConnectionManager,
    stores: HashMap<Domain, EntitySyncStore>,
    poller: Arc<PollingScheduler>,
    events: std::sync::Mutex<Option<mpsc::UnboundedReceiver<Notification>>>,
    cancel: CancellationToken,
}

impl SyncSession {
    /// Build a session that talks to a real hub.
    pub fn new(config: HubConfig, sink: Arc<dyn NotificationSink>) -> Self {
        Self::with_factory(config, Arc::new(HubTransportFactory), sink)
    }

    /// Build a session over a custom transport factory.
    pub fn with_factory(
        config: HubConfig,
        factory: Arc<dyn TransportFactory>,
        sink: Arc<dyn NotificationSink>,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let sink: Arc<dyn NotificationSink> = Arc::new(SessionSink {
            outer: sink,
            events: events_tx,
        });
        let manager = ConnectionManager::new(factory, Arc::clone(&sink));

        let stores = DOMAINS
            .into_iter()
            .filter_map(|domain| {
                let ids = config.entities_in(domain);
                (!ids.is_empty()).then(|| {
                    let store = EntitySyncStore::new(
                        domain,
                        ids,
                        manager.clone(),
                        Arc::clone(&sink),
                        config.tuning.clone(),
                    );
                    (domain, store)
                })
            })
            .collect();

        let poller = Arc::new(PollingScheduler::new(manager.clone()));

        Self {
            config,
            manager,
            stores,
            poller,
            events: std::sync::Mutex::new(Some(events_rx)),
            cancel: CancellationToken::new(),
        }
    }

    // ── Accessors ────────────────────────────────────────────────────

    pub fn config(&self) -> &HubConfig {
        &self.config
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    pub fn poller(&self) -> &PollingScheduler {
        &self.poller
    }

    pub fn store(&self, domain: Domain) -> Option<&EntitySyncStore> {
        self.stores.get(&domain)
    }

    pub fn stores(&self) -> impl Iterator<Item = &EntitySyncStore> {
        DOMAINS.iter().filter_map(|d| self.stores.get(d))
    }

    /// Resolve a logical device name (or entity ID) to its store.
    pub fn resolve(&self, device: &str) -> Result<(EntityId, &EntitySyncStore), CoreError> {
        let id = self.config.resolve(device)?;
        let store = id
            .domain()
            .and_then(|d| self.stores.get(&d))
            .ok_or_else(|| CoreError::UnknownEntity {
                entity_id: id.to_string(),
            })?;
        Ok((id, store))
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect, load initial state and start the background wiring.
    /// Returns whether a transport came up.
    pub async fn start(&self) -> bool {
        self.spawn_reactors();

        let connected = self.manager.connect(self.config.clone()).await;
        if connected {
            self.sync_all().await;
        } else {
            warn!("session started without a hub connection");
        }

        self.poller
            .start(self.fetch_fn(), self.config.tuning.poll_interval);
        self.apply_poll_policy(&self.manager.snapshot());
        connected
    }

    /// Stop timers, debouncers, background tasks and the transport.
    pub async fn shutdown(&self) {
        info!("shutting down sync session");
        self.cancel.cancel();
        self.poller.stop();
        for store in self.stores.values() {
            store.shutdown();
        }
        self.manager.shutdown().await;
    }

    /// Force-sync every store from the hub.
    pub async fn sync_all(&self) {
        force_sync_all(&self.stores.values().cloned().collect::<Vec<_>>()).await;
    }

    fn fetch_fn(&self) -> FetchFn {
        let stores: Arc<Vec<EntitySyncStore>> = Arc::new(self.stores().cloned().collect());
        Arc::new(move || {
            let stores = Arc::clone(&stores);
            async move {
                // Every store gets its poll; the first error is reported
                let mut first = None;
                for store in stores.iter() {
                    if let Err(e) = store.refresh().await {
                        warn!(domain = %store.domain(), error = %e, "poll refresh failed");
                        first.get_or_insert(e);
                    }
                }
                first.map_or(Ok(()), Err)
            }
            .boxed()
        })
    }

    fn apply_poll_policy(&self, snapshot: &ConnectionSnapshot) {
        apply_poll_policy(&self.poller, snapshot);
    }

    fn spawn_reactors(&self) {
        let Some(mut events) = crate::lock(&self.events).take() else {
            return;
        };

        // Pause polling while push carries updates
        let mut watch = self.manager.watch();
        let poller = Arc::clone(&self.poller);
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    changed = watch.changed() => {
                        if changed.is_err() { break; }
                        let snapshot = watch.borrow_and_update().clone();
                        apply_poll_policy(&poller, &snapshot);
                    }
                }
            }
        });

        // Resynchronize after every restored connection
        let stores: Vec<EntitySyncStore> = self.stores.values().cloned().collect();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break,
                    event = events.recv() => match event {
                        Some(Notification::SyncRestored) => {
                            info!("connection restored, resynchronizing");
                            force_sync_all(&stores).await;
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }
        });
    }

    // ── User actions ─────────────────────────────────────────────────

    /// Set a device's level (0-100).
    pub fn set(&self, device: &str, value: f64, intent: CommandIntent) -> Result<EntityId, CoreError> {
        let (id, store) = self.resolve(device)?;
        store.set_value(&id, value, ChangeSource::User, intent)?;
        Ok(id)
    }

    /// Toggle a device on/off. Returns the entity and its new target.
    pub fn toggle(&self, device: &str) -> Result<(EntityId, f64), CoreError> {
        let (id, store) = self.resolve(device)?;
        let target = store.toggle(&id)?;
        Ok((id, target))
    }

    /// Retry every failed command across all stores.
    pub fn retry_all(&self) -> usize {
        self.stores().map(EntitySyncStore::retry_all).sum()
    }

    // ── External stimuli ─────────────────────────────────────────────

    pub fn handle_focus(&self, focused: bool) {
        self.poller.handle_focus(focused);
    }

    pub async fn handle_visibility(&self, visible: bool) {
        self.manager.handle_visibility(visible).await;
    }

    pub async fn handle_online(&self) -> bool {
        self.manager.handle_online().await
    }

    pub async fn handle_offline(&self) {
        self.manager.handle_offline().await;
    }
}

fn apply_poll_policy(poller: &PollingScheduler, snapshot: &ConnectionSnapshot) {
    if snapshot.push_healthy() {
        poller.pause();
    } else {
        poller.resume();
    }
}

async fn force_sync_all(stores: &[EntitySyncStore]) {
    for store in stores {
        match store.force_sync().await {
            Ok(applied) => debug!(domain = %store.domain(), applied, "store synced"),
            Err(e) => warn!(domain = %store.domain(), error = %e, "store sync failed"),
        }
    }
}
