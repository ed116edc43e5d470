use thiserror::Error;

/// Top-level error type for the `hubdeck-api` crate.
///
/// Covers every failure mode across both API surfaces: REST calls and
/// the WebSocket push channel. `hubdeck-core` maps these into its sync
/// error taxonomy.
#[derive(Debug, Error)]
pub enum Error {
    // ── Authentication ──────────────────────────────────────────────
    /// Access token rejected (HTTP 401 or WebSocket `auth_invalid`).
    #[error("Authentication failed: {message}")]
    Authentication { message: String },

    // ── Transport ───────────────────────────────────────────────────
    /// HTTP transport error (connection refused, DNS failure, etc.)
    #[error("HTTP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// URL parsing error.
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// Request timed out.
    #[error("Request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// TLS or HTTP client construction error.
    #[error("TLS error: {0}")]
    Tls(String),

    // ── REST API ────────────────────────────────────────────────────
    /// The hub does not know the requested entity.
    #[error("Entity not found: {entity_id}")]
    NotFound { entity_id: String },

    /// A service call was rejected or failed on the hub.
    #[error("Command {service} failed (HTTP {status}): {message}")]
    Command {
        service: String,
        status: u16,
        message: String,
    },

    /// Any other non-success REST response.
    #[error("Hub API error (HTTP {status}): {message}")]
    Api { status: u16, message: String },

    // ── WebSocket ───────────────────────────────────────────────────
    /// WebSocket connection or handshake failed.
    #[error("WebSocket connection failed: {0}")]
    WebSocketConnect(String),

    /// WebSocket closed unexpectedly.
    #[error("WebSocket closed (code {code}): {reason}")]
    WebSocketClosed { code: u16, reason: String },

    // ── Data ────────────────────────────────────────────────────────
    /// JSON deserialization failed, with the raw body for debugging.
    #[error("Deserialization error: {message}")]
    Deserialization { message: String, body: String },
}

impl Error {
    /// Returns `true` if the access token was rejected.
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, Self::Authentication { .. })
    }

    /// Returns `true` if this is a connectivity-level failure worth
    /// retrying with backoff.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            Self::Timeout { .. } | Self::WebSocketConnect(_) | Self::WebSocketClosed { .. } => {
                true
            }
            Self::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns `true` if this is a "not found" error.
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::Transport(e) => e.status() == Some(reqwest::StatusCode::NOT_FOUND),
            Self::NotFound { .. } => true,
            _ => false,
        }
    }
}
