// ── Outbound hub commands ──

use std::fmt;

use super::entity_id::{Domain, EntityId};
use crate::error::CoreError;

/// A service call the engine can ask a transport to perform.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HubCommand {
    /// Light brightness in percent (1-100).
    SetBrightness(u8),
    /// Media volume, 0.0-1.0.
    SetVolume(f64),
    TurnOn,
    TurnOff,
}

impl HubCommand {
    /// Translate a 0-100 store level into the domain's service call.
    pub fn for_level(entity_id: &EntityId, level: f64) -> Result<Self, CoreError> {
        let level = level.clamp(0.0, 100.0);
        match entity_id.domain() {
            Some(Domain::Light) => Ok(match percent(level) {
                0 => Self::TurnOff,
                pct => Self::SetBrightness(pct),
            }),
            Some(Domain::MediaPlayer) => Ok(Self::SetVolume(level / 100.0)),
            Some(Domain::Sensor) | None => Err(CoreError::ReadOnly {
                entity_id: entity_id.to_string(),
            }),
        }
    }
}

impl fmt::Display for HubCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SetBrightness(pct) => write!(f, "set_brightness({pct}%)"),
            Self::SetVolume(level) => write!(f, "set_volume({level:.2})"),
            Self::TurnOn => f.write_str("turn_on"),
            Self::TurnOff => f.write_str("turn_off"),
        }
    }
}

/// Round a clamped 0-100 level to a whole percent.
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
fn percent(level: f64) -> u8 {
    level.round().clamp(0.0, 100.0) as u8
}
