use tether_client::ClientError;
use tether_protocol::ProtocolError;
use tether_room::RoomError;
use tether_transport::TransportError;

use crate::ConfigError;

/// Any failure surfaced by the server or by the re-exported client.
#[derive(Debug, thiserror::Error)]
pub enum TetherError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Room(#[from] RoomError),

    #[error(transparent)]
    Client(#[from] ClientError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}
