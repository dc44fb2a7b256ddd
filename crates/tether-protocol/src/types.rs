//! Framework-level wire types: identities, room selection, system messages
//! and the envelope every frame travels in.

use std::fmt;

use serde::{Deserialize, Serialize};
use tether_schema::{DEFAULT_DISPLAY_NAME, SessionId};

/// Protocol version carried in the handshake.
pub const PROTOCOL_VERSION: u32 = 1;

/// Error code: malformed or out-of-order message.
pub const ERR_BAD_REQUEST: u16 = 400;
/// Error code: the requested room does not exist.
pub const ERR_ROOM_NOT_FOUND: u16 = 404;
/// Error code: the room is full, or the session is already in a room.
pub const ERR_CONFLICT: u16 = 409;
/// Error code: the room is shutting down.
pub const ERR_UNAVAILABLE: u16 = 503;

// ---------------------------------------------------------------------------
// Identity types
// ---------------------------------------------------------------------------

/// Identifies one room instance. Serialized as a plain number.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(pub u64);

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Channel
// ---------------------------------------------------------------------------

/// The delivery guarantee a message asks for.
///
/// WebSocket delivers everything reliably and in order; the tag tells a
/// transport with an unreliable lane which messages may use it (position
/// intents are superseded by the next one anyway).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "PascalCase")]
pub enum Channel {
    #[default]
    ReliableOrdered,
    Unreliable,
}

// ---------------------------------------------------------------------------
// Room selection
// ---------------------------------------------------------------------------

/// How a client picks the room it wants to be in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum RoomSelector {
    /// Quick play: any room with a free slot, else a new one.
    #[default]
    Any,
    /// The room registered under `name`, created on first use.
    Named { name: String },
    /// One exact room instance. Fails if it no longer exists.
    #[serde(rename_all = "camelCase")]
    Id { room_id: RoomId },
}

impl RoomSelector {
    pub fn named(name: impl Into<String>) -> Self {
        Self::Named { name: name.into() }
    }
}

fn default_display_name() -> String {
    DEFAULT_DISPLAY_NAME.to_owned()
}

/// What a client tells the room about itself when joining.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinOptions {
    #[serde(default = "default_display_name")]
    pub display_name: String,
    /// Requested skin index. Clamped by the room, so any integer is valid.
    #[serde(default)]
    pub cosmetic_index: i64,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            cosmetic_index: 0,
        }
    }
}

impl JoinOptions {
    pub fn new(display_name: impl Into<String>, cosmetic_index: i64) -> Self {
        Self {
            display_name: display_name.into(),
            cosmetic_index,
        }
    }
}

/// A summary of an open room, returned by `ListRooms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomListEntry {
    pub room_id: RoomId,
    /// Registered name, if the room was created by name.
    pub name: Option<String>,
    pub player_count: usize,
    pub max_players: usize,
}

// ---------------------------------------------------------------------------
// SystemMessage
// ---------------------------------------------------------------------------

/// Messages handled by the server plumbing itself rather than by a room.
///
/// Internally tagged, so `Heartbeat { client_time: 5 }` is
/// `{ "type": "Heartbeat", "client_time": 5 }` on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SystemMessage {
    // -- Connection lifecycle --
    /// Client → Server: first message on every connection.
    Handshake { version: u32 },

    /// Server → Client: handshake accepted.
    HandshakeAck { server_time: u64 },

    /// Either direction: "I'm disconnecting."
    Disconnect { reason: String },

    // -- Heartbeat --
    Heartbeat { client_time: u64 },

    HeartbeatAck { client_time: u64, server_time: u64 },

    // -- Room management --
    /// Client → Server: join a room matching `selector`, creating one if
    /// the selector allows it.
    JoinOrCreate {
        selector: RoomSelector,
        options: JoinOptions,
    },

    /// Server → Client: the join succeeded.
    RoomJoined {
        room_id: RoomId,
        session_id: SessionId,
    },

    /// Client → Server: leave the current room. Idempotent.
    LeaveRoom,

    ListRooms,

    RoomList { rooms: Vec<RoomListEntry> },

    // -- Errors --
    /// Server → Client: HTTP-style `code` (see the `ERR_*` constants).
    Error { code: u16, message: String },
}

impl SystemMessage {
    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self::Error {
            code,
            message: message.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Payload and Envelope
// ---------------------------------------------------------------------------

/// The content of a frame: a system message, or codec-encoded room data.
///
/// ```text
/// { "type": "System", "data": { "type": "Heartbeat", "client_time": 123 } }
/// { "type": "Room",   "data": [123, 34, 107, ...] }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum Payload {
    System(SystemMessage),
    /// A [`ClientMessage`](crate::ClientMessage) or
    /// [`ServerMessage`](crate::ServerMessage), encoded by the codec.
    Room(Vec<u8>),
}

/// Every frame on the wire is an `Envelope`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender sequence number.
    pub seq: u64,
    /// Milliseconds since the sender started.
    pub timestamp: u64,
    #[serde(default)]
    pub channel: Channel,
    pub payload: Payload,
}

impl Envelope {
    pub fn system(seq: u64, timestamp: u64, message: SystemMessage) -> Self {
        Self {
            seq,
            timestamp,
            channel: Channel::ReliableOrdered,
            payload: Payload::System(message),
        }
    }

    pub fn room(seq: u64, timestamp: u64, channel: Channel, data: Vec<u8>) -> Self {
        Self {
            seq,
            timestamp,
            channel,
            payload: Payload::Room(data),
        }
    }
}
