//! Wire protocol for Tether.
//!
//! - **Types** ([`Envelope`], [`SystemMessage`], [`RoomSelector`], …): the
//!   framework-level structures every frame is made of.
//! - **Messages** ([`ClientMessage`], [`ServerMessage`]): room-level intents
//!   and state replication, carried inside [`Payload::Room`].
//! - **Codec** ([`Codec`], [`JsonCodec`]): how those are turned into bytes.
//!
//! ```text
//! Transport (bytes) → Envelope → SystemMessage | Room(bytes → Client/ServerMessage)
//! ```

mod codec;
mod error;
mod messages;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::{ProtocolError, check_version};
pub use messages::{ClientMessage, ServerMessage};
pub use types::{
    Channel, ERR_BAD_REQUEST, ERR_CONFLICT, ERR_ROOM_NOT_FOUND, ERR_UNAVAILABLE, Envelope,
    JoinOptions, PROTOCOL_VERSION, Payload, RoomId, RoomListEntry, RoomSelector, SystemMessage,
};
