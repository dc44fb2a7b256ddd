//! Client error types.

use tether_protocol::ProtocolError;
use tether_transport::TransportError;

use crate::{ClientState, SettingsError};

/// Errors surfaced by the session client.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The transport could not be established. Not retried.
    #[error("connection failed: {0}")]
    ConnectionFailure(#[source] TransportError),

    /// The server did not answer within the configured timeout.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    #[error("room not found: {0}")]
    RoomNotFound(String),

    #[error("room is full: {0}")]
    CapacityExceeded(String),

    /// Any other error reply from the server.
    #[error("server rejected request ({code}): {message}")]
    Rejected { code: u16, message: String },

    /// The operation is not valid in the client's current state.
    #[error("not allowed while {0:?}")]
    InvalidState(ClientState),

    /// The connection closed underneath the client.
    #[error("connection closed")]
    Disconnected,

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Settings(#[from] SettingsError),
}
