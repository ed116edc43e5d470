// ── Entity sync store ──
//
// One store per domain. Holds a `SyncRecord` per configured entity in a
// `DashMap`; every mutation runs under that entity's map guard and then
// republishes an immutable snapshot on a `watch` channel, so observers
// never see a half-applied change.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use super::record::{AfterCommand, InFlight, ReconcileOutcome, SyncRecord};
use crate::config::SyncTuning;
use crate::connection::ConnectionManager;
use crate::dispatch::{CommandDispatcher, DispatchRequest};
use crate::error::CoreError;
use crate::model::{
    ChangeSource, CommandIntent, Domain, EntityId, EntityState, HubCommand, RemoteReading,
};
use crate::notify::{Notification, NotificationSink};
use crate::stream::{EntityStream, Snapshot};
use crate::transport::Subscription;

/// Local, optimistic mirror of one domain's entities.
///
/// Cheaply cloneable; clones share state. Call [`shutdown`](Self::shutdown)
/// to stop the background tasks.
#[derive(Clone)]
pub struct EntitySyncStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    domain: Domain,
    tuning: SyncTuning,
    manager: ConnectionManager,
    sink: Arc<dyn NotificationSink>,
    records: DashMap<EntityId, SyncRecord>,
    snapshot: watch::Sender<Snapshot>,
    dispatcher: CommandDispatcher,
    next_command_id: AtomicU64,
    cancel: CancellationToken,
}

impl EntitySyncStore {
    /// Create the store with zero-valued entities and start listening
    /// for remote updates and debounced fires.
    pub fn new(
        domain: Domain,
        entity_ids: impl IntoIterator<Item = EntityId>,
        manager: ConnectionManager,
        sink: Arc<dyn NotificationSink>,
        tuning: SyncTuning,
    ) -> Self {
        let records = DashMap::new();
        for id in entity_ids {
            records.insert(id.clone(), SyncRecord::new(id));
        }
        let (dispatcher, fire_rx) = CommandDispatcher::new(tuning.debounce_window);
        let (snapshot, _) = watch::channel(Arc::new(Vec::new()));

        let store = Self {
            inner: Arc::new(StoreInner {
                domain,
                tuning,
                manager,
                sink,
                records,
                snapshot,
                dispatcher,
                next_command_id: AtomicU64::new(1),
                cancel: CancellationToken::new(),
            }),
        };
        store.publish();
        store.spawn_tasks(fire_rx);
        store
    }

    fn spawn_tasks(&self, fire_rx: mpsc::UnboundedReceiver<DispatchRequest>) {
        for id in self.entity_ids() {
            let subscription = self.inner.manager.updates().subscribe(&id);
            tokio::spawn(update_task(self.clone(), subscription));
        }
        tokio::spawn(fire_task(self.clone(), fire_rx));
    }

    // ── Reads ────────────────────────────────────────────────────────

    pub fn domain(&self) -> Domain {
        self.inner.domain
    }

    pub fn entity_ids(&self) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self.inner.records.iter().map(|r| r.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, entity_id: &EntityId) -> bool {
        self.inner.records.contains_key(entity_id)
    }

    pub fn get(&self, entity_id: &EntityId) -> Option<EntityState> {
        self.inner.records.get(entity_id).map(|r| r.state.clone())
    }

    pub fn snapshot(&self) -> Snapshot {
        self.inner.snapshot.borrow().clone()
    }

    /// Read-only observable view of every entity in this store.
    pub fn stream(&self) -> EntityStream {
        EntityStream::new(self.inner.snapshot.subscribe())
    }

    // ── Mutation plumbing ────────────────────────────────────────────

    /// Run `f` under the record's guard, then republish.
    fn mutate<R>(
        &self,
        entity_id: &EntityId,
        f: impl FnOnce(&mut SyncRecord) -> R,
    ) -> Result<R, CoreError> {
        let result = {
            let mut record =
                self.inner
                    .records
                    .get_mut(entity_id)
                    .ok_or_else(|| CoreError::UnknownEntity {
                        entity_id: entity_id.to_string(),
                    })?;
            f(&mut record)
        };
        self.publish();
        Ok(result)
    }

    fn publish(&self) {
        let mut states: Vec<Arc<EntityState>> = self
            .inner
            .records
            .iter()
            .map(|r| Arc::new(r.state.clone()))
            .collect();
        states.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));

        self.inner.snapshot.send_if_modified(|current| {
            if **current == states {
                false
            } else {
                *current = Arc::new(states);
                true
            }
        });
    }

    fn next_command_id(&self) -> u64 {
        self.inner.next_command_id.fetch_add(1, Ordering::SeqCst)
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Apply a value change from `source`.
    ///
    /// `User` changes are optimistic and schedule a command (debounced
    /// for `Continuous`, immediate for `Discrete`). `Initial` applies
    /// without a command. `External` goes through reconciliation.
    pub fn set_value(
        &self,
        entity_id: &EntityId,
        target: f64,
        source: ChangeSource,
        intent: CommandIntent,
    ) -> Result<(), CoreError> {
        match source {
            ChangeSource::Initial => self.mutate(entity_id, |r| r.apply_initial(target)),
            ChangeSource::External => {
                if !self.contains(entity_id) {
                    return Err(CoreError::UnknownEntity {
                        entity_id: entity_id.to_string(),
                    });
                }
                let now = Instant::now();
                self.reconcile(&RemoteReading::value(entity_id.clone(), target), now);
                Ok(())
            }
            ChangeSource::User => {
                if !self.inner.domain.is_controllable() {
                    return Err(CoreError::ReadOnly {
                        entity_id: entity_id.to_string(),
                    });
                }
                let target = target.clamp(0.0, 100.0);
                let now = Instant::now();
                self.mutate(entity_id, |r| r.apply_user(target, now))?;
                debug!(%entity_id, target, %intent, "user change");
                self.inner.dispatcher.schedule(entity_id, target, intent);
                Ok(())
            }
        }
    }

    /// Discrete on/off shortcut. Returns the new target.
    pub fn toggle(&self, entity_id: &EntityId) -> Result<f64, CoreError> {
        let (current, last_on) = self
            .inner
            .records
            .get(entity_id)
            .map(|r| (r.state.target_value, r.last_on_level))
            .ok_or_else(|| CoreError::UnknownEntity {
                entity_id: entity_id.to_string(),
            })?;

        let next = if current > 0.0 {
            0.0
        } else {
            last_on.unwrap_or(100.0)
        };
        self.set_value(entity_id, next, ChangeSource::User, CommandIntent::Discrete)?;
        Ok(next)
    }

    /// Re-issue the last failed value. Returns whether anything was sent.
    pub fn retry(&self, entity_id: &EntityId) -> Result<bool, CoreError> {
        let failed = self
            .inner
            .records
            .get(entity_id)
            .ok_or_else(|| CoreError::UnknownEntity {
                entity_id: entity_id.to_string(),
            })?
            .failed_value;

        match failed {
            Some(value) => {
                debug!(%entity_id, value, "retrying failed command");
                self.set_value(entity_id, value, ChangeSource::User, CommandIntent::Discrete)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Retry every entity whose last command failed.
    pub fn retry_all(&self) -> usize {
        let failed: Vec<EntityId> = self
            .inner
            .records
            .iter()
            .filter(|r| r.failed_value.is_some())
            .map(|r| r.key().clone())
            .collect();

        failed
            .iter()
            .filter(|id| self.retry(id).unwrap_or(false))
            .count()
    }

    /// A debounced value fired: send it, or queue it behind the command
    /// already in flight.
    fn on_fire(&self, request: &DispatchRequest) {
        let command_id = self.next_command_id();
        match self.mutate(&request.entity_id, |r| r.on_fire(request.value, command_id)) {
            Ok(Some(command)) => {
                tokio::spawn(self.clone().run_command(request.entity_id.clone(), command));
            }
            Ok(None) => trace!(entity_id = %request.entity_id, "command queued behind in-flight"),
            Err(e) => warn!(error = %e, "dropping fire for unknown entity"),
        }
    }

    /// Send `command` and any values that queue up behind it.
    async fn run_command(self, entity_id: EntityId, mut command: InFlight) {
        loop {
            let result = self.send(&entity_id, command.value).await;
            let after = match result {
                Ok(()) => {
                    self.inner.manager.mark_successful_sync();
                    let now = Instant::now();
                    let blocking = self.inner.tuning.blocking_window;
                    self.mutate(&entity_id, |r| {
                        r.on_ack(command.command_id, now, blocking, || self.next_command_id())
                    })
                    .unwrap_or(AfterCommand::Ignored)
                }
                Err(e) => {
                    self.on_command_error(&entity_id, command, &e);
                    AfterCommand::Idle
                }
            };

            match after {
                AfterCommand::Next(next) => command = next,
                AfterCommand::Idle => break,
                AfterCommand::Ignored => {
                    trace!(%entity_id, command_id = command.command_id, "superseded command result");
                    break;
                }
            }
        }
    }

    async fn send(&self, entity_id: &EntityId, value: f64) -> Result<(), CoreError> {
        let command = HubCommand::for_level(entity_id, value)?;
        let transport = self
            .inner
            .manager
            .transport()
            .ok_or(CoreError::NotConnected)?;

        let timeout = self.inner.tuning.command_timeout;
        debug!(%entity_id, %command, "sending command");
        tokio::time::timeout(timeout, transport.send_command(entity_id, command))
            .await
            .unwrap_or_else(|_| Err(CoreError::timeout(format!("command {command}"), timeout)))
    }

    fn on_command_error(&self, entity_id: &EntityId, command: InFlight, error: &CoreError) {
        warn!(%entity_id, command_id = command.command_id, error = %error, "command failed, rolling back");
        if error.is_transport() {
            self.inner.manager.report_sync_failure();
        }
        let rolled_back = self
            .mutate(entity_id, |r| r.on_failure(command.command_id))
            .ok()
            .flatten();
        if rolled_back.is_some() {
            self.inner.sink.notify(Notification::CommandFailed {
                entity_id: entity_id.clone(),
                message: error.to_string(),
            });
        }
    }

    // ── Reconciliation ───────────────────────────────────────────────

    /// Offer a remote reading observed at `observed_at`.
    pub fn reconcile(&self, reading: &RemoteReading, observed_at: Instant) -> ReconcileOutcome {
        let now = Instant::now();
        let grace = self.inner.tuning.grace_window;
        let outcome = self
            .mutate(&reading.entity_id, |r| {
                r.reconcile(reading, observed_at, now, grace)
            })
            .unwrap_or(ReconcileOutcome::Unchanged);

        if let ReconcileOutcome::Discarded(reason) = outcome {
            let stale = CoreError::StaleUpdate {
                entity_id: reading.entity_id.to_string(),
                reason: reason.to_string(),
            };
            trace!(error = %stale, value = ?reading.value, "discarding remote update");
        }
        outcome
    }

    /// Pull every entity's state and reconcile it normally.
    pub async fn refresh(&self) -> Result<usize, CoreError> {
        let started = Instant::now();
        let readings = self.fetch_all().await?;
        for reading in &readings {
            self.reconcile(reading, started);
        }
        Ok(readings.len())
    }

    /// Pull every entity's state and apply it, bypassing race
    /// suppression. Pending debounced fires are dropped.
    pub async fn force_sync(&self) -> Result<usize, CoreError> {
        let readings = self.fetch_all().await?;
        let mut applied = 0;
        for reading in &readings {
            self.inner.dispatcher.cancel(&reading.entity_id);
            if self.mutate(&reading.entity_id, |r| r.force(reading))? {
                applied += 1;
            }
        }
        debug!(domain = %self.inner.domain, applied, "forced sync");
        Ok(applied)
    }

    async fn fetch_all(&self) -> Result<Vec<RemoteReading>, CoreError> {
        if self.inner.records.is_empty() {
            return Ok(Vec::new());
        }
        let transport = self
            .inner
            .manager
            .transport()
            .ok_or(CoreError::NotConnected)?;
        let ids = self.entity_ids();
        let timeout = self.inner.tuning.command_timeout;

        let mut readings = tokio::time::timeout(timeout, transport.get_states(&ids))
            .await
            .unwrap_or_else(|_| Err(CoreError::timeout("state fetch", timeout)))?;
        Ok(ids.iter().filter_map(|id| readings.remove(id)).collect())
    }

    // ── Teardown ─────────────────────────────────────────────────────

    /// Stop background tasks and cancel debounce timers.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
        self.inner.dispatcher.shutdown();
    }
}

// ── Background tasks ─────────────────────────────────────────────────

async fn update_task(store: EntitySyncStore, mut subscription: Subscription) {
    let cancel = store.inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            update = subscription.recv() => {
                let Some(update) = update else { break };
                store.reconcile(&update.reading, update.observed_at);
            }
        }
    }
}

async fn fire_task(store: EntitySyncStore, mut rx: mpsc::UnboundedReceiver<DispatchRequest>) {
    let cancel = store.inner.cancel.clone();
    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            request = rx.recv() => {
                let Some(request) = request else { break };
                store.on_fire(&request);
            }
        }
    }
}
