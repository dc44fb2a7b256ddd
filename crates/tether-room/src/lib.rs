//! Authoritative rooms for Tether.
//!
//! A room owns the canonical [`RoomState`](tether_schema::RoomState) of its
//! players and is the only writer of it. The [`RoomManager`] creates rooms,
//! resolves a [`RoomSelector`](tether_protocol::RoomSelector) to one, and
//! drops rooms once their last session leaves.
//!
//! # Broadcast cadence
//!
//! - Join, leave and eviction flush pending changes at once.
//! - Other changes coalesce and flush on the room's patch tick
//!   ([`RoomConfig::patch_rate_hz`]), or immediately when that rate is 0.
//! - Every [`RoomConfig::keyframe_interval`] ticks each session also gets a
//!   full snapshot.
//!
//! Each session has a bounded outbound queue. A session that can't keep up
//! is disconnected instead of slowing the room down.

mod config;
mod error;
mod manager;
mod room;

pub use config::RoomConfig;
pub use error::RoomError;
pub use manager::{DEFAULT_ROOM_NAME, JoinTicket, RoomManager, generate_session_id};
pub use room::{
    LeaveOutcome, Outbound, RoomHandle, RoomInfo, SessionReceiver, SessionSender,
};
