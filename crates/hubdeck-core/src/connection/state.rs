// ── Connection state types ──

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

/// Lifecycle state of the hub connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting { attempt: u32 },
}

impl ConnectionState {
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected)
    }
}

/// Which transport is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionMode {
    Push,
    Poll,
    None,
}

/// Everything a listener learns on each transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionSnapshot {
    pub state: ConnectionState,
    pub mode: ConnectionMode,
    pub last_successful_sync_at: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    /// Text of the most recent connection failure.
    pub last_error: Option<String>,
}

impl ConnectionSnapshot {
    /// Push is the active transport and it is healthy.
    pub fn push_healthy(&self) -> bool {
        self.state.is_connected() && self.mode == ConnectionMode::Push
    }
}

impl Default for ConnectionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            mode: ConnectionMode::None,
            last_successful_sync_at: None,
            reconnect_attempts: 0,
            last_error: None,
        }
    }
}
