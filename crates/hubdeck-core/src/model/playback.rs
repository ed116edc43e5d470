// ── Media output routing ──

use hubdeck_api::HubEntityState;
use serde::Serialize;

/// Where a media player is currently sending audio.
///
/// Derived from the player's attributes on every accepted update; never
/// written locally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PlaybackTarget {
    Spotify {
        name: String,
    },
    Speaker {
        name: String,
        entity_ids: Vec<String>,
    },
    Group {
        name: String,
        entity_ids: Vec<String>,
        group_id: String,
    },
}

impl PlaybackTarget {
    /// Derive the target from `source`, `group_members` and `friendly_name`.
    pub fn from_attributes(state: &HubEntityState) -> Self {
        if let Some(source) = state
            .attr_str("source")
            .filter(|s| s.eq_ignore_ascii_case("spotify"))
        {
            return Self::Spotify {
                name: source.to_owned(),
            };
        }

        let members: Vec<String> = state
            .attributes
            .get("group_members")
            .and_then(serde_json::Value::as_array)
            .map(|arr| {
                arr.iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let name = state.friendly_name().to_owned();
        match members.first() {
            Some(leader) if members.len() > 1 => Self::Group {
                name,
                group_id: leader.clone(),
                entity_ids: members,
            },
            _ => Self::Speaker {
                name,
                entity_ids: vec![state.entity_id.clone()],
            },
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Spotify { name } | Self::Speaker { name, .. } | Self::Group { name, .. } => name,
        }
    }
}
