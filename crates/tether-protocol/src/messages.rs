//! Room-level messages: client intents and server state replication.
//!
//! These travel codec-encoded inside [`Payload::Room`](crate::Payload::Room).
//! Both enums are tagged by `kind`, with camelCase names on the wire.

use serde::{Deserialize, Serialize};
use tether_schema::{RoomState, SessionId, StatePatch, Vec3};

/// Client → room intents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Overwrite the sender's position (and any rotation component given).
    #[serde(rename_all = "camelCase")]
    UpdatePosition {
        x: f32,
        y: f32,
        z: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rot_x: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rot_y: Option<f32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        rot_z: Option<f32>,
    },

    /// Select a skin. Any integer is accepted and clamped by the room.
    #[serde(rename_all = "camelCase")]
    ChangeSkin { skin_id: i64 },

    /// A kind this build doesn't know. Ignored by the room.
    #[serde(other)]
    Unknown,
}

impl ClientMessage {
    /// A position-only update.
    pub fn position(position: Vec3) -> Self {
        Self::UpdatePosition {
            x: position.x,
            y: position.y,
            z: position.z,
            rot_x: None,
            rot_y: None,
            rot_z: None,
        }
    }

    /// The wire name of this message kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UpdatePosition { .. } => "updatePosition",
            Self::ChangeSkin { .. } => "changeSkin",
            Self::Unknown => "unknown",
        }
    }
}

/// Room → client replication.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The complete room state (on join, and as periodic keyframes).
    StateSnapshot { state: RoomState },

    /// Changes since the previous patch.
    StatePatch { patch: StatePatch },

    /// Fast-path cosmetic notice, sent to everyone but the changer.
    #[serde(rename_all = "camelCase")]
    SkinChanged { player_id: SessionId, skin_id: u32 },
}
