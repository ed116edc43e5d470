// ── User-facing notifications ──
//
// The engine renders nothing itself. Status changes worth telling a
// human about go to a `NotificationSink`; the presentation layer decides
// how (toast, status line, log).

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::connection::ConnectionMode;
use crate::model::EntityId;

/// A user-facing status message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Notification {
    Connected { mode: ConnectionMode },
    Disconnected,
    Reconnecting { attempt: u32 },
    CommandFailed { entity_id: EntityId, message: String },
    SyncRestored,
    SetupFailed { reason: String },
}

/// Receiver of [`Notification`]s. Called synchronously from engine tasks,
/// so implementations must not block.
pub trait NotificationSink: Send + Sync + 'static {
    fn notify(&self, notification: Notification);
}

// ── Broadcast sink ───────────────────────────────────────────────────

/// Fans notifications out to any number of async subscribers.
#[derive(Debug, Clone)]
pub struct BroadcastSink {
    tx: broadcast::Sender<Notification>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastSink {
    fn default() -> Self {
        Self::new(64)
    }
}

impl NotificationSink for BroadcastSink {
    fn notify(&self, notification: Notification) {
        // No subscribers is fine
        let _ = self.tx.send(notification);
    }
}

// ── Tracing sink ─────────────────────────────────────────────────────

/// Logs notifications; the default when nobody is listening.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, notification: Notification) {
        match notification {
            Notification::Connected { mode } => info!(%mode, "Connected to hub"),
            Notification::Disconnected => warn!("Disconnected from hub"),
            Notification::Reconnecting { attempt } => info!(attempt, "Reconnecting to hub"),
            Notification::CommandFailed { entity_id, message } => {
                warn!(%entity_id, %message, "Command failed");
            }
            Notification::SyncRestored => info!("Sync restored"),
            Notification::SetupFailed { reason } => warn!(%reason, "Hub setup failed"),
        }
    }
}
