use crate::PROTOCOL_VERSION;

/// Ways a frame or an exchange can break the protocol.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[cfg(feature = "json")]
    #[error("encoding failed: {0}")]
    Encode(#[source] serde_json::Error),

    /// Malformed JSON, a missing required field or a wrong type.
    #[cfg(feature = "json")]
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("protocol version {got} not supported (expected {expected})")]
    VersionMismatch { expected: u32, got: u32 },

    /// A well-formed message arrived where another one was required.
    #[error("expected {0}")]
    Unexpected(&'static str),

    #[error("peer closed during {0}")]
    ClosedDuring(&'static str),

    #[error("{0} timed out")]
    TimedOut(&'static str),
}

/// Accepts only the version this build speaks.
pub fn check_version(got: u32) -> Result<(), ProtocolError> {
    if got == PROTOCOL_VERSION {
        Ok(())
    } else {
        Err(ProtocolError::VersionMismatch {
            expected: PROTOCOL_VERSION,
            got,
        })
    }
}
