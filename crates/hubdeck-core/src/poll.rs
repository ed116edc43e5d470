// ── Polling scheduler ──
//
// Fallback driver that pulls hub state at a fixed cadence. Ticks are
// skipped while paused (push healthy); explicit triggers (start, focus
// regained) always poll. Outcomes feed the connection manager's health
// signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::future::BoxFuture;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::connection::ConnectionManager;
use crate::error::CoreError;
use crate::lock;

/// One poll pass. Cloned into the scheduler task.
pub type FetchFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), CoreError>> + Send + Sync>;

/// Drives periodic polls for one session.
pub struct PollingScheduler {
    manager: ConnectionManager,
    paused: Arc<AtomicBool>,
    focused: AtomicBool,
    trigger: Arc<Notify>,
    running: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl PollingScheduler {
    pub fn new(manager: ConnectionManager) -> Self {
        Self {
            manager,
            paused: Arc::new(AtomicBool::new(false)),
            focused: AtomicBool::new(true),
            trigger: Arc::new(Notify::new()),
            running: Mutex::new(None),
        }
    }

    /// Start polling with `fetch` every `interval`, replacing any
    /// previous schedule. Polls once immediately.
    pub fn start(&self, fetch: FetchFn, interval: Duration) {
        self.stop();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(poll_task(
            fetch,
            interval,
            self.manager.clone(),
            Arc::clone(&self.paused),
            Arc::clone(&self.trigger),
            cancel.clone(),
        ));
        *lock(&self.running) = Some((cancel, handle));
        debug!(interval_ms = interval.as_millis(), "polling started");
    }

    pub fn stop(&self) {
        if let Some((cancel, _handle)) = lock(&self.running).take() {
            cancel.cancel();
            debug!("polling stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.running)
            .as_ref()
            .is_some_and(|(_, handle)| !handle.is_finished())
    }

    /// Skip periodic ticks (push is carrying updates).
    pub fn pause(&self) {
        if !self.paused.swap(true, Ordering::SeqCst) {
            debug!("polling paused");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            debug!("polling resumed");
        }
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Poll immediately on each unfocused → focused edge.
    pub fn handle_focus(&self, focused: bool) {
        let was_focused = self.focused.swap(focused, Ordering::SeqCst);
        if focused && !was_focused {
            trace!("focus regained, polling now");
            self.trigger.notify_one();
        }
    }
}

impl Drop for PollingScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn poll_task(
    fetch: FetchFn,
    period: Duration,
    manager: ConnectionManager,
    paused: Arc<AtomicBool>,
    trigger: Arc<Notify>,
    cancel: CancellationToken,
) {
    poll_once(&fetch, &manager).await;

    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            () = trigger.notified() => poll_once(&fetch, &manager).await,
            _ = interval.tick() => {
                if paused.load(Ordering::SeqCst) {
                    trace!("poll tick skipped (paused)");
                } else {
                    poll_once(&fetch, &manager).await;
                }
            }
        }
    }
}

async fn poll_once(fetch: &FetchFn, manager: &ConnectionManager) {
    match fetch().await {
        Ok(()) => manager.mark_successful_sync(),
        Err(e) => {
            warn!(error = %e, "poll failed");
            manager.report_sync_failure();
        }
    }
}
