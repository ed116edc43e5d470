// Hub REST client
//
// Wraps `reqwest::Client` with hub URL construction, bearer auth and
// status-code translation. State reads and service calls are the only
// surfaces the sync engine needs.

use std::collections::{HashMap, HashSet};

use reqwest::StatusCode;
use secrecy::SecretString;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, trace};
use url::Url;

use crate::error::Error;
use crate::models::{ApiStatus, ConnectionTest, HubConfigInfo, HubEntityState};
use crate::transport::TransportConfig;

/// Raw HTTP client for the hub's REST API.
///
/// Cheap to clone: the inner `reqwest::Client` is reference counted.
#[derive(Debug, Clone)]
pub struct HubClient {
    http: reqwest::Client,
    base_url: Url,
}

impl HubClient {
    /// Create a client from a `TransportConfig` and access token.
    ///
    /// `base_url` is the hub root, e.g. `http://homeassistant.local:8123`.
    pub fn new(
        base_url: Url,
        token: &SecretString,
        transport: &TransportConfig,
    ) -> Result<Self, Error> {
        let http = transport.build_client(token)?;
        Ok(Self { http, base_url })
    }

    /// Create a client with a pre-built `reqwest::Client`.
    pub fn with_client(http: reqwest::Client, base_url: Url) -> Self {
        Self { http, base_url }
    }

    /// The hub base URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    // ── URL builders ─────────────────────────────────────────────────

    /// Build `{base}/api/{path}`.
    pub(crate) fn api_url(&self, path: &str) -> Result<Url, Error> {
        let base = self.base_url.as_str().trim_end_matches('/');
        Ok(Url::parse(&format!("{base}/api/{path}"))?)
    }

    // ── Request helpers ──────────────────────────────────────────────

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<T, Error> {
        debug!("GET {}", url);
        let resp = self.http.get(url).send().await.map_err(map_send_error)?;
        let status = resp.status();
        let body = resp.text().await.map_err(Error::Transport)?;

        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication {
                message: "access token rejected".into(),
            });
        }
        if !status.is_success() {
            return Err(Error::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| Error::Deserialization {
            message: e.to_string(),
            body,
        })
    }

    async fn post_service<B: Serialize + Sync>(
        &self,
        domain: &str,
        service: &str,
        body: &B,
    ) -> Result<(), Error> {
        let url = self.api_url(&format!("services/{domain}/{service}"))?;
        debug!("POST {}", url);

        let resp = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(map_send_error)?;
        let status = resp.status();

        if status.is_success() {
            trace!(domain, service, "service call accepted");
            return Ok(());
        }

        let message = resp.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            return Err(Error::Authentication { message });
        }
        Err(Error::Command {
            service: format!("{domain}.{service}"),
            status: status.as_u16(),
            message,
        })
    }

    // ── State reads ──────────────────────────────────────────────────

    /// Fetch one entity's state. Unknown entities yield [`Error::NotFound`].
    pub async fn get_state(&self, entity_id: &str) -> Result<HubEntityState, Error> {
        let url = self.api_url(&format!("states/{entity_id}"))?;
        match self.get_json(url).await {
            Err(Error::Api { status: 404, .. }) => Err(Error::NotFound {
                entity_id: entity_id.to_owned(),
            }),
            other => other,
        }
    }

    /// Fetch the states of many entities in one round trip.
    ///
    /// Partial results are normal: IDs the hub does not know are simply
    /// absent from the returned map.
    pub async fn get_states(
        &self,
        entity_ids: &[String],
    ) -> Result<HashMap<String, HubEntityState>, Error> {
        let wanted: HashSet<&str> = entity_ids.iter().map(String::as_str).collect();
        let url = self.api_url("states")?;
        let all: Vec<HubEntityState> = self.get_json(url).await?;

        Ok(all
            .into_iter()
            .filter(|s| wanted.contains(s.entity_id.as_str()))
            .map(|s| (s.entity_id.clone(), s))
            .collect())
    }

    // ── Commands ─────────────────────────────────────────────────────

    /// Set a light's brightness in percent (0-100). Zero turns the light off.
    pub async fn set_brightness(&self, entity_id: &str, percent: u8) -> Result<(), Error> {
        if percent == 0 {
            return self.turn_off(entity_id).await;
        }
        self.post_service(
            "light",
            "turn_on",
            &serde_json::json!({ "entity_id": entity_id, "brightness_pct": percent.min(100) }),
        )
        .await
    }

    /// Set a media player's volume (0.0-1.0).
    pub async fn set_volume(&self, entity_id: &str, level: f64) -> Result<(), Error> {
        self.post_service(
            "media_player",
            "volume_set",
            &serde_json::json!({ "entity_id": entity_id, "volume_level": level.clamp(0.0, 1.0) }),
        )
        .await
    }

    /// Turn an entity on via `{domain}.turn_on`.
    pub async fn turn_on(&self, entity_id: &str) -> Result<(), Error> {
        self.post_service(
            entity_domain(entity_id),
            "turn_on",
            &serde_json::json!({ "entity_id": entity_id }),
        )
        .await
    }

    /// Turn an entity off via `{domain}.turn_off`.
    pub async fn turn_off(&self, entity_id: &str) -> Result<(), Error> {
        self.post_service(
            entity_domain(entity_id),
            "turn_off",
            &serde_json::json!({ "entity_id": entity_id }),
        )
        .await
    }

    // ── Probes ───────────────────────────────────────────────────────

    /// Lightweight liveness call: `GET /api/`.
    pub async fn ping(&self) -> Result<(), Error> {
        let status: ApiStatus = self.get_json(self.api_url("")?).await?;
        trace!(message = ?status.message, "hub API status");
        Ok(())
    }

    /// Probe the hub and report reachability and version. Never fails:
    /// errors are folded into the returned [`ConnectionTest`].
    pub async fn test_connection(&self) -> ConnectionTest {
        if let Err(e) = self.ping().await {
            return ConnectionTest {
                success: false,
                version: None,
                error: Some(e.to_string()),
            };
        }

        let version = match self.api_url("config") {
            Ok(url) => self
                .get_json::<HubConfigInfo>(url)
                .await
                .ok()
                .and_then(|c| c.version),
            Err(_) => None,
        };

        ConnectionTest {
            success: true,
            version,
            error: None,
        }
    }
}

/// `light.door` → `light`. IDs without a dot map to `homeassistant`,
/// the hub's generic service domain.
pub fn entity_domain(entity_id: &str) -> &str {
    entity_id
        .split_once('.')
        .map_or("homeassistant", |(domain, _)| domain)
}

fn map_send_error(e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout { timeout_ms: 0 }
    } else {
        Error::Transport(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_domain_splits_on_first_dot() {
        assert_eq!(entity_domain("light.door"), "light");
        assert_eq!(entity_domain("media_player.living.room"), "media_player");
        assert_eq!(entity_domain("bare"), "homeassistant");
    }

    #[test]
    fn api_url_handles_trailing_slash() {
        let client = HubClient::with_client(
            reqwest::Client::new(),
            Url::parse("http://hub.local:8123/").expect("valid url"),
        );
        let url = client.api_url("states/light.door").expect("valid url");
        assert_eq!(url.as_str(), "http://hub.local:8123/api/states/light.door");
    }
}
