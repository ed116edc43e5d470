#![allow(clippy::unwrap_used)]
// Integration tests for `HubClient` using wiremock.

use serde_json::json;
use url::Url;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use hubdeck_api::{Error, HubClient, TransportConfig};

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HubClient) {
    let server = MockServer::start().await;
    let base_url = Url::parse(&server.uri()).unwrap();
    let token: secrecy::SecretString = "test-token".to_string().into();
    let client = HubClient::new(base_url, &token, &TransportConfig::default()).unwrap();
    (server, client)
}

fn light_json(entity_id: &str, state: &str, brightness: Option<u8>) -> serde_json::Value {
    json!({
        "entity_id": entity_id,
        "state": state,
        "attributes": { "brightness": brightness, "friendly_name": "Spot" },
        "last_changed": "2026-02-10T12:00:00+00:00",
        "last_updated": "2026-02-10T12:00:00+00:00"
    })
}

// ── State reads ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_get_state_sends_bearer_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/states/light.door"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(light_json(
            "light.door",
            "on",
            Some(255),
        )))
        .mount(&server)
        .await;

    let state = client.get_state("light.door").await.unwrap();
    assert_eq!(state.entity_id, "light.door");
    assert_eq!(state.state, "on");
    assert_eq!(state.attr_f64("brightness"), Some(255.0));
}

#[tokio::test]
async fn test_get_state_unknown_entity() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/states/light.nope"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({"message": "Entity not found."})))
        .mount(&server)
        .await;

    let result = client.get_state("light.nope").await;
    assert!(
        matches!(result, Err(Error::NotFound { ref entity_id }) if entity_id == "light.nope"),
        "expected NotFound, got: {result:?}"
    );
}

#[tokio::test]
async fn test_get_state_rejected_token() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/states/light.door"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let result = client.get_state("light.door").await;
    assert!(result.unwrap_err().is_auth_failure());
}

#[tokio::test]
async fn test_get_states_returns_partial_map() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/states"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            light_json("light.door", "on", Some(128)),
            light_json("light.hall", "off", None),
            light_json("light.unrelated", "on", Some(10)),
        ])))
        .mount(&server)
        .await;

    let ids = vec![
        "light.door".to_string(),
        "light.hall".to_string(),
        "light.missing".to_string(),
    ];
    let states = client.get_states(&ids).await.unwrap();

    assert_eq!(states.len(), 2);
    assert_eq!(states["light.door"].state, "on");
    assert_eq!(states["light.hall"].state, "off");
    assert!(!states.contains_key("light.missing"));
    assert!(!states.contains_key("light.unrelated"));
}

// ── Commands ────────────────────────────────────────────────────────

#[tokio::test]
async fn test_set_brightness_posts_percent() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_on"))
        .and(body_json(json!({ "entity_id": "light.door", "brightness_pct": 75 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client.set_brightness("light.door", 75).await.unwrap();
}

#[tokio::test]
async fn test_set_brightness_zero_turns_off() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/services/light/turn_off"))
        .and(body_json(json!({ "entity_id": "light.door" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client.set_brightness("light.door", 0).await.unwrap();
}

#[tokio::test]
async fn test_set_volume_clamps_level() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/services/media_player/volume_set"))
        .and(body_json(json!({ "entity_id": "media_player.living", "volume_level": 1.0 })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    client.set_volume("media_player.living", 1.7).await.unwrap();
}

#[tokio::test]
async fn test_command_failure_maps_to_command_error() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/services/switch/turn_on"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let result = client.turn_on("switch.fan").await;
    match result {
        Err(Error::Command {
            service,
            status,
            message,
        }) => {
            assert_eq!(service, "switch.turn_on");
            assert_eq!(status, 500);
            assert_eq!(message, "boom");
        }
        other => panic!("expected Command error, got: {other:?}"),
    }
}

// ── Probes ──────────────────────────────────────────────────────────

#[tokio::test]
async fn test_connection_reports_version() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "API running."})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"version": "2026.2.1"})))
        .mount(&server)
        .await;

    let probe = client.test_connection().await;
    assert!(probe.success);
    assert_eq!(probe.version.as_deref(), Some("2026.2.1"));
    assert!(probe.error.is_none());
}

#[tokio::test]
async fn test_connection_folds_errors() {
    let (server, client) = setup().await;

    Mock::given(method("GET"))
        .and(path("/api/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let probe = client.test_connection().await;
    assert!(!probe.success);
    assert!(probe.version.is_none());
    assert!(probe.error.unwrap().contains("Authentication"));
}
