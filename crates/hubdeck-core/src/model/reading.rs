// ── Hub state → engine value ──
//
// Each domain encodes its "level" differently on the hub. Readings
// normalize them onto the store's 0-100 scale (sensors keep their raw
// number) and carry the metadata that rides along with a value.

use hubdeck_api::HubEntityState;

use super::entity_id::{Domain, EntityId};
use super::playback::PlaybackTarget;

/// States that carry no usable value.
const UNAVAILABLE: [&str; 2] = ["unavailable", "unknown"];

/// A remote observation of one entity, already mapped to engine units.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteReading {
    pub entity_id: EntityId,
    /// `None` when the hub reports nothing usable; metadata still applies.
    pub value: Option<f64>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub playback: Option<PlaybackTarget>,
}

impl RemoteReading {
    /// A bare value with no metadata.
    pub fn value(entity_id: EntityId, value: f64) -> Self {
        Self {
            entity_id,
            value: Some(value),
            name: None,
            unit: None,
            playback: None,
        }
    }

    /// Map a raw hub state according to the entity's domain.
    pub fn from_hub(entity_id: &EntityId, state: &HubEntityState) -> Self {
        let available = !UNAVAILABLE.contains(&state.state.as_str());
        let name = state.attr_str("friendly_name").map(str::to_owned);

        let (value, unit, playback) = match entity_id.domain() {
            Some(Domain::Light) => (available.then(|| light_level(state)), None, None),
            Some(Domain::MediaPlayer) => (
                state
                    .attr_f64("volume_level")
                    .filter(|_| available)
                    .map(|v| (v.clamp(0.0, 1.0) * 100.0).round()),
                None,
                available.then(|| PlaybackTarget::from_attributes(state)),
            ),
            Some(Domain::Sensor) | None => (
                state.state.trim().parse::<f64>().ok().filter(|v| v.is_finite()),
                state.attr_str("unit_of_measurement").map(str::to_owned),
                None,
            ),
        };

        Self {
            entity_id: entity_id.clone(),
            value,
            name,
            unit,
            playback,
        }
    }
}

/// `off` → 0, otherwise `brightness` (0-255) as a percentage; on without
/// a brightness attribute (non-dimmable) → 100.
fn light_level(state: &HubEntityState) -> f64 {
    if state.state == "off" {
        return 0.0;
    }
    state
        .attr_f64("brightness")
        .map_or(100.0, |b| (b.clamp(0.0, 255.0) / 255.0 * 100.0).round())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hub(entity_id: &str, state: &str, attributes: &serde_json::Value) -> (EntityId, HubEntityState) {
        let id = EntityId::parse(entity_id).unwrap();
        let raw = serde_json::from_value(json!({
            "entity_id": entity_id,
            "state": state,
            "attributes": attributes,
        }))
        .unwrap();
        (id, raw)
    }

    #[test]
    fn light_off_is_zero() {
        let (id, raw) = hub("light.door", "off", &json!({ "brightness": null }));
        assert_eq!(RemoteReading::from_hub(&id, &raw).value, Some(0.0));
    }

    #[test]
    fn light_brightness_scales_to_percent() {
        let (id, raw) = hub("light.door", "on", &json!({ "brightness": 191, "friendly_name": "Door" }));
        let reading = RemoteReading::from_hub(&id, &raw);
        assert_eq!(reading.value, Some(75.0));
        assert_eq!(reading.name.as_deref(), Some("Door"));
    }

    #[test]
    fn light_on_without_brightness_is_full() {
        let (id, raw) = hub("light.switch", "on", &json!({}));
        assert_eq!(RemoteReading::from_hub(&id, &raw).value, Some(100.0));
    }

    #[test]
    fn unavailable_light_has_no_value() {
        let (id, raw) = hub("light.door", "unavailable", &json!({}));
        assert_eq!(RemoteReading::from_hub(&id, &raw).value, None);
    }

    #[test]
    fn media_volume_and_playback() {
        let (id, raw) = hub(
            "media_player.living",
            "playing",
            &json!({ "volume_level": 0.42, "friendly_name": "Living" }),
        );
        let reading = RemoteReading::from_hub(&id, &raw);
        assert_eq!(reading.value, Some(42.0));
        assert_eq!(reading.playback.unwrap().name(), "Living");
    }

    #[test]
    fn media_without_volume_is_unchanged() {
        let (id, raw) = hub("media_player.living", "off", &json!({}));
        assert_eq!(RemoteReading::from_hub(&id, &raw).value, None);
    }

    #[test]
    fn sensor_parses_number_and_unit() {
        let (id, raw) = hub("sensor.hall_temp", "21.5", &json!({ "unit_of_measurement": "°C" }));
        let reading = RemoteReading::from_hub(&id, &raw);
        assert_eq!(reading.value, Some(21.5));
        assert_eq!(reading.unit.as_deref(), Some("°C"));
    }

    #[test]
    fn non_numeric_sensor_is_ignored() {
        let (id, raw) = hub("sensor.hall_temp", "unknown", &json!({}));
        assert_eq!(RemoteReading::from_hub(&id, &raw).value, None);
    }
}
