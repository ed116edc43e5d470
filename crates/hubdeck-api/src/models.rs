// Wire models for the hub REST and WebSocket APIs.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw entity state as the hub reports it.
///
/// `attributes` is kept as a free-form JSON object so that domain-specific
/// fields (`brightness`, `volume_level`, `group_members`, ...) survive
/// untouched until the core interprets them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HubEntityState {
    pub entity_id: String,

    /// Primary state string: `"on"`, `"off"`, `"playing"`, `"21.5"`, ...
    pub state: String,

    #[serde(default)]
    pub attributes: serde_json::Map<String, serde_json::Value>,

    #[serde(default)]
    pub last_changed: Option<DateTime<Utc>>,

    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

impl HubEntityState {
    /// Numeric attribute lookup (integers and floats both accepted).
    pub fn attr_f64(&self, key: &str) -> Option<f64> {
        self.attributes.get(key).and_then(serde_json::Value::as_f64)
    }

    /// String attribute lookup.
    pub fn attr_str(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).and_then(serde_json::Value::as_str)
    }

    /// `friendly_name` attribute, falling back to the entity ID.
    pub fn friendly_name(&self) -> &str {
        self.attr_str("friendly_name").unwrap_or(&self.entity_id)
    }
}

/// Response of `GET /api/`.
#[derive(Debug, Deserialize)]
pub(crate) struct ApiStatus {
    #[serde(default)]
    pub message: Option<String>,
}

/// Subset of `GET /api/config` used for version reporting.
#[derive(Debug, Deserialize)]
pub(crate) struct HubConfigInfo {
    #[serde(default)]
    pub version: Option<String>,
}

/// Result of a connection probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionTest {
    pub success: bool,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// A `state_changed` notification delivered over the push channel.
#[derive(Debug, Clone, PartialEq)]
pub struct StateChange {
    pub entity_id: String,
    /// `None` when the entity was removed from the hub.
    pub new_state: Option<HubEntityState>,
}
