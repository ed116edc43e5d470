// ── Core identity types ──
//
// Every hub entity is addressed by a `domain.object_id` string
// (`light.door`, `media_player.living_room`, `sensor.hall_temperature`).
// The domain prefix decides how its state is interpreted and commanded.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

use crate::error::CoreError;

// ── Domain ──────────────────────────────────────────────────────────

/// Entity domains the sync engine knows how to mirror.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, IntoStaticStr,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Domain {
    Light,
    MediaPlayer,
    Sensor,
}

impl Domain {
    /// Whether the store accepts user-sourced changes for this domain.
    pub fn is_controllable(self) -> bool {
        !matches!(self, Self::Sensor)
    }

    /// Largest difference between two readings that still counts as the
    /// same value. Levels absorb the hub's 0-255 and two-decimal rounding;
    /// sensors report raw units and compare exactly.
    pub fn value_tolerance(self) -> f64 {
        match self {
            Self::Light | Self::MediaPlayer => LEVEL_TOLERANCE,
            Self::Sensor => EXACT_TOLERANCE,
        }
    }
}

const LEVEL_TOLERANCE: f64 = 0.5;
const EXACT_TOLERANCE: f64 = 1e-9;

// ── EntityId ────────────────────────────────────────────────────────

/// Canonical identifier for a hub entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntityId(String);

impl EntityId {
    /// Parse and validate a `domain.object_id` string.
    pub fn parse(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let raw = raw.as_ref().trim();
        match raw.split_once('.') {
            Some((domain, object)) if !domain.is_empty() && !object.is_empty() => {
                Ok(Self(raw.to_ascii_lowercase()))
            }
            _ => Err(CoreError::Configuration {
                message: format!("invalid entity id '{raw}': expected 'domain.object_id'"),
            }),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The raw domain prefix (`light` for `light.door`).
    pub fn domain_str(&self) -> &str {
        self.0.split_once('.').map_or("", |(d, _)| d)
    }

    /// The known [`Domain`], if this engine supports it.
    pub fn domain(&self) -> Option<Domain> {
        Domain::from_str(self.domain_str()).ok()
    }

    /// [`Domain::value_tolerance`]; unknown domains compare exactly.
    pub fn value_tolerance(&self) -> f64 {
        self.domain().map_or(EXACT_TOLERANCE, Domain::value_tolerance)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntityId {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for EntityId {
    type Error = CoreError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::parse(s)
    }
}

impl From<EntityId> for String {
    fn from(id: EntityId) -> Self {
        id.0
    }
}

impl AsRef<str> for EntityId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
