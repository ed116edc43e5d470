// ── Per-entity sync state ──
//
// The local/remote/target triple every store keeps for each entity,
// plus the provenance flags used to resolve update races.

use chrono::{DateTime, Utc};
use serde::Serialize;
use strum::Display;

use super::entity_id::EntityId;
use super::playback::PlaybackTarget;

/// Where the last applied change came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum ChangeSource {
    /// Seeded at session start or by a forced sync.
    Initial,
    /// A local user action.
    User,
    /// The hub (push update or poll result).
    External,
}

/// How an outbound user change should be dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "snake_case")]
pub enum CommandIntent {
    /// Slider-style adjustment: debounced, only the settled value is sent.
    Continuous,
    /// Toggle or shortcut: sent immediately.
    Discrete,
}

/// Observable state of one entity.
///
/// Values are on a 0-100 scale for controllable domains; sensors carry
/// their raw reading.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EntityState {
    pub entity_id: EntityId,
    /// Human-readable name from the hub, when known.
    pub name: Option<String>,
    /// The value the user most recently requested.
    pub target_value: f64,
    /// What a presentation layer should show (interpolation is its business).
    pub display_value: f64,
    /// The last value the hub is known to have accepted.
    pub confirmed_value: f64,
    /// An outbound command is scheduled or in flight and unconfirmed.
    pub is_pending: bool,
    pub last_local_change_at: Option<DateTime<Utc>>,
    pub source: ChangeSource,
    /// The last outbound command failed and has not been retried successfully.
    pub has_error: bool,
    /// Unit of measurement (sensors).
    pub unit: Option<String>,
    /// Current output routing (media players).
    pub playback: Option<PlaybackTarget>,
}

impl EntityState {
    /// Zero-valued state created at session start.
    pub fn new(entity_id: EntityId) -> Self {
        Self {
            entity_id,
            name: None,
            target_value: 0.0,
            display_value: 0.0,
            confirmed_value: 0.0,
            is_pending: false,
            last_local_change_at: None,
            source: ChangeSource::Initial,
            has_error: false,
            unit: None,
            playback: None,
        }
    }

    /// `display_value` agrees with what the hub confirmed and nothing is pending.
    pub fn is_settled(&self) -> bool {
        !self.is_pending
            && same_value(
                self.display_value,
                self.confirmed_value,
                self.entity_id.value_tolerance(),
            )
    }
}

/// Values closer than `tolerance` are the same value. See
/// [`Domain::value_tolerance`](super::Domain::value_tolerance).
pub fn same_value(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() < tolerance
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::model::Domain;

    #[test]
    fn new_state_is_zeroed_and_settled() {
        let state = EntityState::new(EntityId::parse("light.door").unwrap());
        assert!(state.target_value.abs() < f64::EPSILON);
        assert_eq!(state.source, ChangeSource::Initial);
        assert!(state.is_settled());
    }

    #[test]
    fn same_value_tolerates_hub_rounding() {
        // 75% → brightness 191 → 74.9%
        let level = Domain::Light.value_tolerance();
        assert!(same_value(75.0, 191.0 / 255.0 * 100.0, level));
        assert!(!same_value(75.0, 40.0, level));
    }

    #[test]
    fn sensor_values_compare_exactly() {
        let exact = Domain::Sensor.value_tolerance();
        assert!(same_value(21.6, 21.6, exact));
        assert!(!same_value(21.2, 21.6, exact));
        assert!(!same_value(21.2, 21.3, exact));
    }
}
