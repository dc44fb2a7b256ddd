//! Room error types.

use tether_protocol::{ERR_CONFLICT, ERR_ROOM_NOT_FOUND, ERR_UNAVAILABLE, RoomId};
use tether_schema::SessionId;

/// Errors returned by room and matchmaking operations.
#[derive(Debug, thiserror::Error)]
pub enum RoomError {
    /// The requested room does not exist (or was disposed).
    #[error("room {0} not found")]
    NotFound(RoomId),

    /// The room already holds `max_clients` sessions.
    #[error("room {0} is full")]
    CapacityExceeded(RoomId),

    #[error("session {0} already in room {1}")]
    AlreadyJoined(SessionId, RoomId),

    /// The room actor has stopped.
    #[error("room {0} is unavailable")]
    Unavailable(RoomId),
}

impl RoomError {
    /// The wire error code reported to clients.
    pub fn code(&self) -> u16 {
        match self {
            Self::NotFound(_) => ERR_ROOM_NOT_FOUND,
            Self::CapacityExceeded(_) | Self::AlreadyJoined(..) => ERR_CONFLICT,
            Self::Unavailable(_) => ERR_UNAVAILABLE,
        }
    }
}
