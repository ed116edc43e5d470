// ── Core error types ──
//
// The sync engine's error taxonomy. Consumers never see HTTP status
// codes or socket errors directly: the `From<hubdeck_api::Error>` impl
// folds transport-layer failures into the few categories the engine
// actually recovers from differently.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Transport (recovered by reconnection backoff) ────────────────
    #[error("Transport error: {reason}")]
    Transport { reason: String },

    #[error("{operation} timed out after {timeout_ms}ms")]
    Timeout { operation: String, timeout_ms: u64 },

    #[error("Not connected to the hub")]
    NotConnected,

    // ── Command (recovered by rollback) ──────────────────────────────
    #[error("Command for {target} failed: {message}")]
    Command { target: String, message: String },

    #[error("Entity {entity_id} is read-only")]
    ReadOnly { entity_id: String },

    // ── Data ─────────────────────────────────────────────────────────
    #[error("Entity not found on hub: {entity_id}")]
    NotFound { entity_id: String },

    #[error("Entity {entity_id} is not managed by this store")]
    UnknownEntity { entity_id: String },

    /// Internal only: a remote update lost a race and was discarded.
    #[error("Stale update for {entity_id}: {reason}")]
    StaleUpdate { entity_id: String, reason: String },

    // ── Configuration (fails fast, no backoff) ───────────────────────
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Internal ─────────────────────────────────────────────────────
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Failures that reconnection can cure.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            Self::Transport { .. } | Self::Timeout { .. } | Self::NotConnected
        )
    }

    /// Failures that no amount of retrying will fix.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::Authentication { .. }
        )
    }

    pub(crate) fn timeout(operation: impl Into<String>, after: std::time::Duration) -> Self {
        Self::Timeout {
            operation: operation.into(),
            timeout_ms: u64::try_from(after.as_millis()).unwrap_or(u64::MAX),
        }
    }
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<hubdeck_api::Error> for CoreError {
    fn from(err: hubdeck_api::Error) -> Self {
        use hubdeck_api::Error as Api;

        match err {
            Api::Authentication { message } => CoreError::Authentication { message },
            Api::InvalidUrl(e) => CoreError::Configuration {
                message: format!("Invalid URL: {e}"),
            },
            Api::Tls(msg) => CoreError::Configuration {
                message: format!("TLS setup failed: {msg}"),
            },
            Api::Timeout { timeout_ms } => CoreError::Timeout {
                operation: "hub request".into(),
                timeout_ms,
            },
            Api::NotFound { entity_id } => CoreError::NotFound { entity_id },
            Api::Command {
                service,
                status,
                message,
            } => CoreError::Command {
                target: service,
                message: format!("HTTP {status}: {message}"),
            },
            Api::Api { status, message } => CoreError::Transport {
                reason: format!("HTTP {status}: {message}"),
            },
            Api::Transport(e) => CoreError::Transport {
                reason: e.to_string(),
            },
            Api::WebSocketConnect(reason) => CoreError::Transport { reason },
            Api::WebSocketClosed { code, reason } => CoreError::Transport {
                reason: format!("push channel closed ({code}): {reason}"),
            },
            Api::Deserialization { message, .. } => CoreError::Transport {
                reason: format!("unreadable hub response: {message}"),
            },
        }
    }
}
