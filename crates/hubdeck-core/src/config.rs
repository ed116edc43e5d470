// ── Runtime session configuration ──
//
// These types describe *what* to mirror and *how* the sync engine times
// itself. They carry credentials and tuning but never touch disk: the
// CLI builds a `HubConfig` (usually via `hubdeck-config`) and hands it in.

use std::collections::BTreeMap;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use url::Url;

pub use hubdeck_api::TlsMode;

use crate::error::CoreError;
use crate::model::{Domain, EntityId};

/// Every timing knob of the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncTuning {
    /// Settle time for continuous adjustments before a command fires.
    pub debounce_window: Duration,
    /// Remote echoes this soon after a local change are stale.
    pub grace_window: Duration,
    /// Disagreeing remote updates are ignored this long after an ack.
    pub blocking_window: Duration,
    /// Poll cadence while push is unavailable.
    pub poll_interval: Duration,
    pub heartbeat_interval: Duration,
    /// Consecutive heartbeat probe failures before reconnecting.
    pub heartbeat_failure_threshold: u32,
    pub health_check_interval: Duration,
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub max_reconnect_attempts: u32,
    pub command_timeout: Duration,
    pub connect_timeout: Duration,
    /// Hidden longer than this → verify the connection on return.
    pub hidden_threshold: Duration,
    /// Consecutive failed polls before the manager reconnects.
    pub poll_failure_threshold: u32,
}

impl Default for SyncTuning {
    fn default() -> Self {
        Self {
            debounce_window: Duration::from_millis(300),
            grace_window: Duration::from_millis(500),
            blocking_window: Duration::from_millis(600),
            poll_interval: Duration::from_secs(5),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_failure_threshold: 3,
            health_check_interval: Duration::from_secs(60),
            backoff_base: Duration::from_secs(1),
            backoff_cap: Duration::from_secs(30),
            max_reconnect_attempts: 10,
            command_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(10),
            hidden_threshold: Duration::from_secs(60),
            poll_failure_threshold: 3,
        }
    }
}

/// Configuration for one sync session against one hub.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Hub base URL (e.g., `http://homeassistant.local:8123`).
    pub url: Url,
    /// Long-lived access token.
    pub access_token: SecretString,
    pub tls: TlsMode,
    /// Logical device name → hub entity.
    pub entities: BTreeMap<String, EntityId>,
    /// Try the WebSocket push channel before falling back to polling.
    pub push_enabled: bool,
    pub tuning: SyncTuning,
}

impl HubConfig {
    pub fn new(url: Url, access_token: SecretString) -> Self {
        Self {
            url,
            access_token,
            tls: TlsMode::default(),
            entities: BTreeMap::new(),
            push_enabled: true,
            tuning: SyncTuning::default(),
        }
    }

    /// Builder-style entity registration.
    pub fn with_entity(mut self, name: impl Into<String>, entity_id: EntityId) -> Self {
        self.entities.insert(name.into(), entity_id);
        self
    }

    /// Resolve a logical device name, falling back to a raw entity ID.
    pub fn resolve(&self, device: &str) -> Result<EntityId, CoreError> {
        if let Some(id) = self.entities.get(device) {
            return Ok(id.clone());
        }
        EntityId::parse(device)
            .ok()
            .filter(|id| self.entities.values().any(|known| known == id))
            .ok_or_else(|| CoreError::UnknownEntity {
                entity_id: device.to_owned(),
            })
    }

    /// Configured entities in one domain, deduplicated and ordered.
    pub fn entities_in(&self, domain: Domain) -> Vec<EntityId> {
        let mut ids: Vec<EntityId> = self
            .entities
            .values()
            .filter(|id| id.domain() == Some(domain))
            .cloned()
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Reject configurations no amount of retrying would fix.
    pub fn validate(&self) -> Result<(), CoreError> {
        if !matches!(self.url.scheme(), "http" | "https") {
            return Err(config_error(format!(
                "hub URL must be http or https, got '{}'",
                self.url.scheme()
            )));
        }
        if self.access_token.expose_secret().trim().is_empty() {
            return Err(config_error("access token is empty"));
        }
        if let Some((name, id)) = self.entities.iter().find(|(_, id)| id.domain().is_none()) {
            return Err(config_error(format!(
                "device '{name}' maps to unsupported domain '{}'",
                id.domain_str()
            )));
        }

        let t = &self.tuning;
        if t.max_reconnect_attempts == 0 {
            return Err(config_error("max_reconnect_attempts must be at least 1"));
        }
        if t.backoff_base.is_zero() || t.backoff_base > t.backoff_cap {
            return Err(config_error("backoff base must be non-zero and not exceed the cap"));
        }
        if t.poll_interval.is_zero() || t.heartbeat_interval.is_zero() {
            return Err(config_error("poll and heartbeat intervals must be non-zero"));
        }
        Ok(())
    }
}

fn config_error(message: impl Into<String>) -> CoreError {
    CoreError::Configuration {
        message: message.into(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn config() -> HubConfig {
        HubConfig::new(
            Url::parse("http://hub.local:8123").unwrap(),
            SecretString::from("token".to_owned()),
        )
        .with_entity("door", EntityId::parse("light.door").unwrap())
        .with_entity("speaker", EntityId::parse("media_player.living").unwrap())
        .with_entity("hall", EntityId::parse("sensor.hall_temp").unwrap())
    }

    #[test]
    fn default_config_validates() {
        config().validate().unwrap();
    }

    #[test]
    fn resolve_by_name_or_id() {
        let cfg = config();
        assert_eq!(cfg.resolve("door").unwrap().as_str(), "light.door");
        assert_eq!(cfg.resolve("light.door").unwrap().as_str(), "light.door");
        assert!(matches!(
            cfg.resolve("light.attic"),
            Err(CoreError::UnknownEntity { .. })
        ));
        assert!(matches!(
            cfg.resolve("attic"),
            Err(CoreError::UnknownEntity { .. })
        ));
    }

    #[test]
    fn entities_grouped_by_domain() {
        let cfg = config();
        assert_eq!(cfg.entities_in(Domain::Light).len(), 1);
        assert_eq!(cfg.entities_in(Domain::Sensor)[0].as_str(), "sensor.hall_temp");
    }

    #[test]
    fn empty_token_is_rejected() {
        let mut cfg = config();
        cfg.access_token = SecretString::from("  ".to_owned());
        assert!(cfg.validate().unwrap_err().is_configuration());
    }

    #[test]
    fn unsupported_domain_is_rejected() {
        let cfg = config().with_entity("fan", EntityId::parse("climate.hall").unwrap());
        assert!(matches!(cfg.validate(), Err(CoreError::Configuration { .. })));
    }

    #[test]
    fn inverted_backoff_is_rejected() {
        let mut cfg = config();
        cfg.tuning.backoff_base = Duration::from_secs(60);
        assert!(cfg.validate().is_err());
    }
}
