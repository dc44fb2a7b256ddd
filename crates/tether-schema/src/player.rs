//! The replicated player entity.

use serde::{Deserialize, Serialize};

use crate::{Rotation, Vec3};

/// Name given to players that join without one.
pub const DEFAULT_DISPLAY_NAME: &str = "Player";

fn default_name() -> String {
    DEFAULT_DISPLAY_NAME.to_owned()
}

/// One player entity, keyed by session id in [`RoomState`](crate::RoomState).
///
/// Every field has a serde default. A peer running an older build that
/// doesn't send (or know about) a trailing field decodes it to its default
/// instead of failing the whole message:
///
/// ```rust
/// use tether_schema::Player;
///
/// let p: Player = serde_json::from_str(r#"{ "x": 1.0 }"#).unwrap();
/// assert_eq!(p.x, 1.0);
/// assert_eq!(p.name, "Player");
/// assert_eq!(p.skin_id, 0);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,

    #[serde(default)]
    pub rot_x: f32,
    #[serde(default)]
    pub rot_y: f32,
    #[serde(default)]
    pub rot_z: f32,

    #[serde(default = "default_name")]
    pub name: String,

    /// Index into the skin catalog. Always within range on the authority.
    #[serde(default)]
    pub skin_id: u32,
}

impl Default for Player {
    fn default() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            z: 0.0,
            rot_x: 0.0,
            rot_y: 0.0,
            rot_z: 0.0,
            name: default_name(),
            skin_id: 0,
        }
    }
}

impl Player {
    /// Creates a player at `position` with zero rotation.
    pub fn new(name: impl Into<String>, skin_id: u32, position: Vec3) -> Self {
        Self {
            x: position.x,
            y: position.y,
            z: position.z,
            name: name.into(),
            skin_id,
            ..Self::default()
        }
    }

    pub fn position(&self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    pub fn rotation(&self) -> Rotation {
        Rotation {
            x: self.rot_x,
            y: self.rot_y,
            z: self.rot_z,
        }
    }
}

// ---------------------------------------------------------------------------
// SkinCatalog
// ---------------------------------------------------------------------------

/// The configured number of cosmetic variants.
///
/// Skin indices outside `[0, size - 1]` are clamped into range, never
/// rejected. A misbehaving client can pick a wrong skin but can't break
/// the room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SkinCatalog {
    size: u32,
}

impl SkinCatalog {
    pub const fn new(size: u32) -> Self {
        Self { size }
    }

    pub fn size(&self) -> u32 {
        self.size
    }

    /// Returns `true` if `raw` is already a valid index.
    pub fn contains(&self, raw: i64) -> bool {
        raw >= 0 && raw < i64::from(self.size)
    }

    /// Clamps any integer into the catalog range. An empty catalog maps
    /// everything to 0.
    pub fn clamp(&self, raw: i64) -> u32 {
        if self.size == 0 {
            return 0;
        }
        let max = i64::from(self.size) - 1;
        // In range of u32 after clamping, so the cast can't truncate.
        raw.clamp(0, max) as u32
    }
}

impl Default for SkinCatalog {
    fn default() -> Self {
        Self::new(5)
    }
}
