// ── Connection manager ──
//
// Owns the single active transport and the connection lifecycle:
// push-then-poll selection, heartbeat, idle health check and
// exponential-backoff reconnection. Every transition is published on a
// `watch` channel and fanned out to registered listeners.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use arc_swap::ArcSwapOption;
use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::backoff::calculate_backoff;
use super::state::{ConnectionMode, ConnectionSnapshot, ConnectionState};
use crate::config::{HubConfig, SyncTuning};
use crate::error::CoreError;
use crate::lock;
use crate::notify::{Notification, NotificationSink};
use crate::transport::{Transport, TransportFactory, UpdateBus};

type Listener = Arc<dyn Fn(&ConnectionSnapshot) + Send + Sync>;

/// The transport currently in charge.
pub struct ActiveTransport {
    pub transport: Arc<dyn Transport>,
    pub mode: ConnectionMode,
}

// ── ConnectionManager ────────────────────────────────────────────────

/// Supervises the hub connection for one session.
///
/// Cheaply cloneable via `Arc<ManagerInner>`; clones share all state.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    factory: Arc<dyn TransportFactory>,
    sink: Arc<dyn NotificationSink>,
    bus: UpdateBus,
    config: Mutex<Option<HubConfig>>,
    snapshot: watch::Sender<ConnectionSnapshot>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener_id: AtomicU64,
    active: ArcSwapOption<ActiveTransport>,
    /// Only one reconnection loop may run at a time.
    reconnecting: AtomicBool,
    heartbeat_failures: AtomicU32,
    sync_failures: AtomicU32,
    last_sync: Mutex<Option<Instant>>,
    hidden_since: Mutex<Option<Instant>>,
    cancel: CancellationToken,
    /// Child token for the current connection's timers, replaced on
    /// every successful connect.
    timers_cancel: Mutex<CancellationToken>,
    /// Child token for the running reconnection loop.
    reconnect_cancel: Mutex<CancellationToken>,
    task_handles: Mutex<Vec<JoinHandle<()>>>,
}

impl ConnectionManager {
    pub fn new(factory: Arc<dyn TransportFactory>, sink: Arc<dyn NotificationSink>) -> Self {
        let (snapshot, _) = watch::channel(ConnectionSnapshot::default());
        let cancel = CancellationToken::new();
        let timers_cancel = cancel.child_token();
        let reconnect_cancel = cancel.child_token();

        Self {
            inner: Arc::new(ManagerInner {
                factory,
                sink,
                bus: UpdateBus::new(),
                config: Mutex::new(None),
                snapshot,
                listeners: Mutex::new(Vec::new()),
                next_listener_id: AtomicU64::new(1),
                active: ArcSwapOption::empty(),
                reconnecting: AtomicBool::new(false),
                heartbeat_failures: AtomicU32::new(0),
                sync_failures: AtomicU32::new(0),
                last_sync: Mutex::new(None),
                hidden_since: Mutex::new(None),
                cancel,
                timers_cancel: Mutex::new(timers_cancel),
                reconnect_cancel: Mutex::new(reconnect_cancel),
                task_handles: Mutex::new(Vec::new()),
            }),
        }
    }

    // ── Observation ──────────────────────────────────────────────────

    pub fn snapshot(&self) -> ConnectionSnapshot {
        self.inner.snapshot.borrow().clone()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot.borrow().state
    }

    pub fn mode(&self) -> ConnectionMode {
        self.inner.snapshot.borrow().mode
    }

    /// Receiver that wakes on every state or mode transition.
    pub fn watch(&self) -> watch::Receiver<ConnectionSnapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Register a listener. It is called right away with the current
    /// snapshot and then on every transition, until unsubscribed.
    pub fn subscribe<F>(&self, callback: F) -> ListenerHandle
    where
        F: Fn(&ConnectionSnapshot) + Send + Sync + 'static,
    {
        let id = self.inner.next_listener_id.fetch_add(1, Ordering::Relaxed);
        let listener: Listener = Arc::new(callback);
        lock(&self.inner.listeners).push((id, Arc::clone(&listener)));
        listener(&self.snapshot());

        ListenerHandle {
            id,
            manager: Arc::downgrade(&self.inner),
        }
    }

    /// Session-wide bus every transport publishes remote states on.
    pub fn updates(&self) -> &UpdateBus {
        &self.inner.bus
    }

    /// The transport currently in charge, if any.
    pub fn transport(&self) -> Option<Arc<dyn Transport>> {
        self.inner
            .active
            .load_full()
            .map(|active| Arc::clone(&active.transport))
    }

    /// Last config passed to [`connect`](Self::connect).
    pub fn config(&self) -> Option<HubConfig> {
        lock(&self.inner.config).clone()
    }

    fn tuning(&self) -> SyncTuning {
        lock(&self.inner.config)
            .as_ref()
            .map(|c| c.tuning.clone())
            .unwrap_or_default()
    }

    pub fn is_reconnecting(&self) -> bool {
        self.inner.reconnecting.load(Ordering::SeqCst)
    }

    // ── Lifecycle ────────────────────────────────────────────────────

    /// Connect with push first, then poll. Returns whether any transport
    /// came up. Configuration errors fail fast without backoff. A running
    /// reconnect loop is abandoned.
    pub async fn connect(&self, config: HubConfig) -> bool {
        self.cancel_reconnect_loop();
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.connect_inner(config, false).await
    }

    /// Reset the attempt counter and connect again with the last config.
    pub async fn reconnect(&self) -> bool {
        let Some(config) = self.config() else {
            warn!("reconnect requested before any connect");
            return false;
        };
        self.cancel_reconnect_loop();
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.connect_inner(config, true).await
    }

    /// Stop timers, close the active transport, go `Disconnected`.
    pub async fn disconnect(&self) {
        self.cancel_reconnect_loop();
        self.stop_timers();
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.close_active().await;
        self.transition(|s| {
            s.state = ConnectionState::Disconnected;
            s.mode = ConnectionMode::None;
            s.reconnect_attempts = 0;
        });
        info!("disconnected from hub");
    }

    /// Tear everything down for good.
    pub async fn shutdown(&self) {
        self.disconnect().await;
        self.inner.cancel.cancel();
        let handles: Vec<_> = lock(&self.inner.task_handles).drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }

    async fn connect_inner(&self, config: HubConfig, restored: bool) -> bool {
        if let Err(e) = config.validate() {
            self.fail_setup(&e);
            return false;
        }

        *lock(&self.inner.config) = Some(config.clone());
        self.stop_timers();
        self.transition(|s| {
            s.state = ConnectionState::Connecting;
            s.reconnect_attempts = 0;
        });

        match self.open_transport(&config).await {
            Ok(transport) => {
                let mode = self.install(transport).await;
                self.on_connected(mode, restored);
                true
            }
            Err(e) => {
                self.close_active().await;
                self.fail_setup(&e);
                false
            }
        }
    }

    /// Push first (when enabled), then poll. Each attempt is bounded by
    /// `connect_timeout`; an authentication or configuration failure on
    /// push skips the poll attempt.
    async fn open_transport(&self, config: &HubConfig) -> Result<Arc<dyn Transport>, CoreError> {
        let timeout = config.tuning.connect_timeout;

        if config.push_enabled {
            let push = tokio::time::timeout(
                timeout,
                self.inner.factory.open_push(config, self.inner.bus.clone()),
            )
            .await
            .unwrap_or_else(|_| Err(CoreError::timeout("push connect", timeout)));

            match push {
                Ok(transport) => return Ok(transport),
                Err(e) if e.is_configuration() => return Err(e),
                Err(e) => warn!(error = %e, "push transport unavailable, falling back to polling"),
            }
        }

        tokio::time::timeout(
            timeout,
            self.inner.factory.open_poll(config, self.inner.bus.clone()),
        )
        .await
        .unwrap_or_else(|_| Err(CoreError::timeout("poll connect", timeout)))
    }

    /// Make `transport` the active one, closing its predecessor.
    async fn install(&self, transport: Arc<dyn Transport>) -> ConnectionMode {
        let mode = transport.mode();
        let previous = self
            .inner
            .active
            .swap(Some(Arc::new(ActiveTransport { transport, mode })));
        if let Some(old) = previous {
            debug!(mode = %old.mode, "closing previous transport");
            old.transport.close().await;
        }
        mode
    }

    async fn close_active(&self) {
        if let Some(old) = self.inner.active.swap(None) {
            old.transport.close().await;
        }
    }

    fn on_connected(&self, mode: ConnectionMode, restored: bool) {
        self.inner.heartbeat_failures.store(0, Ordering::SeqCst);
        self.inner.sync_failures.store(0, Ordering::SeqCst);
        self.mark_successful_sync();
        self.transition(|s| {
            s.state = ConnectionState::Connected;
            s.mode = mode;
            s.reconnect_attempts = 0;
            s.last_error = None;
        });
        self.start_timers();

        info!(%mode, "connected to hub");
        self.inner.sink.notify(Notification::Connected { mode });
        if restored {
            self.inner.sink.notify(Notification::SyncRestored);
        }
    }

    fn fail_setup(&self, error: &CoreError) {
        warn!(error = %error, "hub connection failed");
        let reason = error.to_string();
        self.transition(|s| {
            s.state = ConnectionState::Disconnected;
            s.mode = ConnectionMode::None;
            s.last_error = Some(reason.clone());
        });
        self.inner.sink.notify(Notification::SetupFailed { reason });
    }

    // ── Health signals ───────────────────────────────────────────────

    /// Record a successful data exchange with the hub.
    pub fn mark_successful_sync(&self) {
        self.inner.sync_failures.store(0, Ordering::SeqCst);
        *lock(&self.inner.last_sync) = Some(Instant::now());
        let now = Utc::now();
        // Timestamps alone do not wake watchers
        self.inner.snapshot.send_if_modified(|s| {
            s.last_successful_sync_at = Some(now);
            false
        });
    }

    /// Record a failed poll or fetch. Reconnects once the configured
    /// number of consecutive failures is reached.
    pub fn report_sync_failure(&self) {
        if self.is_reconnecting() || !self.state().is_connected() {
            return;
        }
        let failures = self.inner.sync_failures.fetch_add(1, Ordering::SeqCst) + 1;
        let threshold = self.tuning().poll_failure_threshold.max(1);
        debug!(failures, threshold, "sync failure reported");
        if failures >= threshold {
            self.schedule_reconnect("repeated sync failures");
        }
    }

    // ── External stimuli ─────────────────────────────────────────────

    /// Network came back: reset and reconnect unless already healthy.
    pub async fn handle_online(&self) -> bool {
        info!("network online");
        if self.state().is_connected() && self.transport().is_some_and(|t| t.is_connected()) {
            return true;
        }
        self.reconnect().await
    }

    /// Network went away: stop everything and report `Disconnected`.
    pub async fn handle_offline(&self) {
        info!("network offline");
        self.cancel_reconnect_loop();
        self.stop_timers();
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.close_active().await;
        self.transition(|s| {
            s.state = ConnectionState::Disconnected;
            s.mode = ConnectionMode::None;
        });
        self.inner.sink.notify(Notification::Disconnected);
    }

    /// App became visible or hidden. After a long absence, verify the
    /// connection (or reconnect if it is down).
    pub async fn handle_visibility(&self, visible: bool) {
        if !visible {
            *lock(&self.inner.hidden_since) = Some(Instant::now());
            return;
        }

        let hidden_since = lock(&self.inner.hidden_since).take();
        let Some(since) = hidden_since else { return };
        if since.elapsed() < self.tuning().hidden_threshold {
            return;
        }

        debug!(hidden_for = ?since.elapsed(), "visible after long absence");
        if self.state().is_connected() {
            self.probe(true).await;
        } else if !self.is_reconnecting() {
            self.reconnect().await;
        }
    }

    // ── Heartbeat / health check ─────────────────────────────────────

    fn start_timers(&self) {
        let token = self.inner.cancel.child_token();
        let previous = std::mem::replace(&mut *lock(&self.inner.timers_cancel), token.clone());
        previous.cancel();

        let tuning = self.tuning();
        let heartbeat = tokio::spawn(timer_task(
            self.clone(),
            tuning.heartbeat_interval,
            token.clone(),
            TimerKind::Heartbeat,
        ));
        let health = tokio::spawn(timer_task(
            self.clone(),
            tuning.health_check_interval,
            token,
            TimerKind::HealthCheck,
        ));

        let mut handles = lock(&self.inner.task_handles);
        handles.retain(|h| !h.is_finished());
        handles.push(heartbeat);
        handles.push(health);
    }

    fn stop_timers(&self) {
        lock(&self.inner.timers_cancel).cancel();
    }

    /// Probe the active transport. `immediate` reconnects on the first
    /// failure; otherwise failures count toward the heartbeat threshold.
    async fn probe(&self, immediate: bool) {
        if self.is_reconnecting() || !self.state().is_connected() {
            return;
        }
        let Some(active) = self.inner.active.load_full() else {
            return;
        };

        if !active.transport.is_connected() {
            warn!(mode = %active.mode, "transport reports disconnected");
            self.schedule_reconnect("transport disconnected");
            return;
        }

        let timeout = self.tuning().command_timeout;
        let result = tokio::time::timeout(timeout, active.transport.check_alive())
            .await
            .unwrap_or_else(|_| Err(CoreError::timeout("heartbeat", timeout)));

        match result {
            Ok(()) => {
                self.inner.heartbeat_failures.store(0, Ordering::SeqCst);
                self.mark_successful_sync();
            }
            Err(e) => {
                let failures = self.inner.heartbeat_failures.fetch_add(1, Ordering::SeqCst) + 1;
                let threshold = self.tuning().heartbeat_failure_threshold.max(1);
                warn!(error = %e, failures, threshold, "heartbeat failed");
                if immediate || failures >= threshold {
                    self.schedule_reconnect("heartbeat failed");
                }
            }
        }
    }

    async fn health_check(&self) {
        let interval = self.tuning().health_check_interval;
        let idle = lock(&self.inner.last_sync).is_none_or(|at| at.elapsed() >= interval);
        if idle {
            debug!("no recent sync, probing connection");
            self.probe(false).await;
        }
    }

    // ── Reconnection ─────────────────────────────────────────────────

    /// Start the reconnection loop unless one is already running.
    fn schedule_reconnect(&self, reason: &str) {
        if self
            .inner
            .reconnecting
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!(reason, "reconnection already in progress");
            return;
        }
        info!(reason, "scheduling reconnection");
        self.stop_timers();

        let token = self.inner.cancel.child_token();
        let previous = std::mem::replace(&mut *lock(&self.inner.reconnect_cancel), token.clone());
        previous.cancel();

        let manager = self.clone();
        let handle = tokio::spawn(async move {
            manager.reconnect_loop(token).await;
        });
        lock(&self.inner.task_handles).push(handle);
    }

    fn cancel_reconnect_loop(&self) {
        lock(&self.inner.reconnect_cancel).cancel();
    }

    /// Retry with exponential backoff until a transport comes up, the
    /// attempt cap is hit, or the loop is cancelled. The old transport
    /// stays installed meanwhile so pulls can continue.
    async fn reconnect_loop(&self, cancel: CancellationToken) {
        let Some(config) = self.config() else {
            self.inner.reconnecting.store(false, Ordering::SeqCst);
            return;
        };
        let tuning = config.tuning.clone();

        for attempt in 1..=tuning.max_reconnect_attempts {
            self.transition(|s| {
                s.state = ConnectionState::Reconnecting { attempt };
                s.reconnect_attempts = attempt;
            });
            // One notification per outage; the snapshot carries the count
            if attempt == 1 {
                self.inner.sink.notify(Notification::Reconnecting { attempt });
            }

            let delay = calculate_backoff(attempt, tuning.backoff_base, tuning.backoff_cap);
            debug!(attempt, delay_ms = delay.as_millis(), "waiting before reconnect");

            let opened = tokio::select! {
                biased;
                () = cancel.cancelled() => return,
                opened = async {
                    tokio::time::sleep(delay).await;
                    self.open_transport(&config).await
                } => opened,
            };

            match opened {
                Ok(transport) => {
                    let mode = self.install(transport).await;
                    self.inner.reconnecting.store(false, Ordering::SeqCst);
                    self.on_connected(mode, true);
                    return;
                }
                Err(e) => {
                    warn!(attempt, error = %e, "reconnect attempt failed");
                    let reason = e.to_string();
                    self.inner
                        .snapshot
                        .send_if_modified(|s| {
                            s.last_error = Some(reason);
                            false
                        });
                    if e.is_configuration() {
                        break;
                    }
                }
            }
        }

        warn!("giving up on reconnection");
        self.close_active().await;
        self.transition(|s| {
            s.state = ConnectionState::Disconnected;
            s.mode = ConnectionMode::None;
        });
        self.inner.reconnecting.store(false, Ordering::SeqCst);
        self.inner.sink.notify(Notification::Disconnected);
    }

    // ── Transitions ──────────────────────────────────────────────────

    /// Apply `update` to the snapshot; notify watchers and listeners if
    /// the state or mode changed.
    fn transition(&self, update: impl FnOnce(&mut ConnectionSnapshot)) {
        let changed = self.inner.snapshot.send_if_modified(|s| {
            let before = (s.state, s.mode);
            update(s);
            before != (s.state, s.mode)
        });
        if !changed {
            return;
        }

        let snapshot = self.snapshot();
        debug!(state = ?snapshot.state, mode = %snapshot.mode, "connection transition");
        let listeners: Vec<Listener> = lock(&self.inner.listeners)
            .iter()
            .map(|(_, l)| Arc::clone(l))
            .collect();
        for listener in listeners {
            listener(&snapshot);
        }
    }
}

// ── Timers ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
enum TimerKind {
    Heartbeat,
    HealthCheck,
}

async fn timer_task(
    manager: ConnectionManager,
    period: Duration,
    cancel: CancellationToken,
    kind: TimerKind,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            _ = interval.tick() => match kind {
                TimerKind::Heartbeat => manager.probe(false).await,
                TimerKind::HealthCheck => manager.health_check().await,
            },
        }
    }
}

// ── ListenerHandle ───────────────────────────────────────────────────

/// Registration returned by [`ConnectionManager::subscribe`].
pub struct ListenerHandle {
    id: u64,
    manager: Weak<ManagerInner>,
}

impl ListenerHandle {
    /// Stop receiving transitions.
    pub fn unsubscribe(self) {
        if let Some(inner) = self.manager.upgrade() {
            lock(&inner.listeners).retain(|(id, _)| *id != self.id);
        }
    }
}
