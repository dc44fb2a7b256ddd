//! Room configuration.

use serde::{Deserialize, Serialize};
use tether_schema::{DEFAULT_DISPLAY_NAME, SkinCatalog, SpawnRing};
use tracing::warn;

/// Settings shared by every room a server creates.
///
/// All fields have defaults, so a partial JSON object is a valid config.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Maximum concurrent sessions per room.
    pub max_clients: usize,

    /// Number of selectable skins. Requested indices are clamped into it.
    pub skin_catalog: SkinCatalog,

    /// Patch flushes per second. Membership changes always flush at once;
    /// 0 flushes on every mutation.
    pub patch_rate_hz: u32,

    /// Send every session a full snapshot every this many patch ticks.
    /// 0 disables keyframes.
    pub keyframe_interval: u64,

    /// Where new players appear.
    pub spawn: SpawnRing,

    /// Capacity of each session's outbound queue. A session whose queue is
    /// full when the room broadcasts is disconnected.
    pub outbound_capacity: usize,

    /// Name given to players that join with a blank one.
    pub default_display_name: String,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            max_clients: 16,
            skin_catalog: SkinCatalog::default(),
            patch_rate_hz: 20,
            keyframe_interval: 100,
            spawn: SpawnRing::default(),
            outbound_capacity: 64,
            default_display_name: DEFAULT_DISPLAY_NAME.to_owned(),
        }
    }
}

impl RoomConfig {
    /// Returns the config with values that would make a room unusable
    /// raised to their minimum.
    pub fn validated(mut self) -> Self {
        if self.max_clients == 0 {
            warn!("max_clients is 0, using 1");
            self.max_clients = 1;
        }
        if self.outbound_capacity == 0 {
            warn!("outbound_capacity is 0, using 1");
            self.outbound_capacity = 1;
        }
        if self.default_display_name.trim().is_empty() {
            self.default_display_name = DEFAULT_DISPLAY_NAME.to_owned();
        }
        self
    }

    /// Picks the display name for a joining player.
    pub fn display_name_for(&self, requested: &str) -> String {
        let trimmed = requested.trim();
        if trimmed.is_empty() {
            self.default_display_name.clone()
        } else {
            trimmed.to_owned()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_room_config_default() {
        let config = RoomConfig::default();
        assert_eq!(config.max_clients, 16);
        assert_eq!(config.skin_catalog.size(), 5);
        assert_eq!(config.patch_rate_hz, 20);
        assert_eq!(config.keyframe_interval, 100);
        assert_eq!(config.outbound_capacity, 64);
    }

    #[test]
    fn test_partial_json_fills_defaults() {
        let config: RoomConfig =
            serde_json::from_str(r#"{ "max_clients": 4, "skin_catalog": 3 }"#).unwrap();
        assert_eq!(config.max_clients, 4);
        assert_eq!(config.skin_catalog.size(), 3);
        assert_eq!(config.patch_rate_hz, 20);
    }

    #[test]
    fn test_validated_raises_zero_capacity() {
        let config = RoomConfig {
            max_clients: 0,
            outbound_capacity: 0,
            ..RoomConfig::default()
        }
        .validated();
        assert_eq!(config.max_clients, 1);
        assert_eq!(config.outbound_capacity, 1);
    }

    #[test]
    fn test_blank_display_name_gets_default() {
        let config = RoomConfig::default();
        assert_eq!(config.display_name_for("   "), "Player");
        assert_eq!(config.display_name_for(" Ada "), "Ada");
    }
}
