//! Incremental patches: the "what changed" side of the schema.

use serde::{Deserialize, Serialize};

use crate::{Player, SessionId};

/// Names one replicated field of a [`Player`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum PlayerField {
    X,
    Y,
    Z,
    RotX,
    RotY,
    RotZ,
    Name,
    SkinId,
}

/// A partial update of one player. `None` means "unchanged".
///
/// Absent fields are skipped on the wire, so a rotation-only update
/// serializes to just `{"rotY": 90.0}`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot_x: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot_y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rot_z: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skin_id: Option<u32>,
}

/// Invokes `$mac!(field, Tag)` once per replicated field.
macro_rules! for_each_field {
    ($mac:ident) => {
        $mac!(x, X);
        $mac!(y, Y);
        $mac!(z, Z);
        $mac!(rot_x, RotX);
        $mac!(rot_y, RotY);
        $mac!(rot_z, RotZ);
        $mac!(name, Name);
        $mac!(skin_id, SkinId);
    };
}

impl PlayerPatch {
    /// A patch that sets every field to `player`'s values.
    pub fn full(player: &Player) -> Self {
        Self::default().with_all_fields(player)
    }

    /// The fields where `to` differs from `from`, carrying `to`'s values.
    pub fn diff(from: &Player, to: &Player) -> Self {
        let mut patch = Self::default();
        macro_rules! diff_field {
            ($f:ident, $tag:ident) => {
                if from.$f != to.$f {
                    patch.$f = Some(to.$f.clone());
                }
            };
        }
        for_each_field!(diff_field);
        patch
    }

    fn with_all_fields(mut self, player: &Player) -> Self {
        macro_rules! fill_field {
            ($f:ident, $tag:ident) => {
                self.$f = Some(player.$f.clone());
            };
        }
        for_each_field!(fill_field);
        self
    }

    /// Returns `true` if no field is set.
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    /// The fields this patch touches, in declaration order.
    pub fn fields(&self) -> Vec<PlayerField> {
        let mut fields = Vec::new();
        macro_rules! collect_field {
            ($f:ident, $tag:ident) => {
                if self.$f.is_some() {
                    fields.push(PlayerField::$tag);
                }
            };
        }
        for_each_field!(collect_field);
        fields
    }

    /// Folds a newer patch into this one. Fields set in `newer` win.
    pub fn merge(&mut self, newer: PlayerPatch) {
        macro_rules! merge_field {
            ($f:ident, $tag:ident) => {
                if newer.$f.is_some() {
                    self.$f = newer.$f;
                }
            };
        }
        for_each_field!(merge_field);
    }

    /// Writes the set fields into `player`.
    ///
    /// Returns the *effective* patch: only the fields whose value actually
    /// changed. Setting `x` to its current value is not a change.
    pub fn apply_to(&self, player: &mut Player) -> PlayerPatch {
        let mut effective = PlayerPatch::default();
        macro_rules! apply_field {
            ($f:ident, $tag:ident) => {
                if let Some(value) = &self.$f {
                    if player.$f != *value {
                        player.$f = value.clone();
                        effective.$f = Some(value.clone());
                    }
                }
            };
        }
        for_each_field!(apply_field);
        effective
    }
}

// ---------------------------------------------------------------------------
// Map changes
// ---------------------------------------------------------------------------

/// One change to the `players` map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum MapChange {
    /// A new entity (carries its full value).
    Add { id: SessionId, player: Player },
    /// The entity is gone.
    Remove { id: SessionId },
    /// Some fields of an existing entity changed.
    Update { id: SessionId, patch: PlayerPatch },
}

impl MapChange {
    /// The session id this change is keyed by.
    pub fn id(&self) -> &SessionId {
        match self {
            Self::Add { id, .. } | Self::Remove { id } | Self::Update { id, .. } => id,
        }
    }
}

/// Everything that changed in a room since the previous patch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatePatch {
    #[serde(default)]
    pub changes: Vec<MapChange>,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}
