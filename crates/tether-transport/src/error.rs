use std::io;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failures below the protocol: sockets, upgrades and frames.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("cannot listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accepting a connection failed: {0}")]
    Accept(#[source] io::Error),

    /// TCP came up but the WebSocket upgrade did not complete.
    #[error("websocket upgrade failed: {0}")]
    Upgrade(#[source] BoxError),

    #[error("cannot reach {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: BoxError,
    },

    #[error("write failed: {0}")]
    Write(#[source] BoxError),

    #[error("read failed: {0}")]
    Read(#[source] BoxError),
}

impl TransportError {
    /// Whether an established link broke, as opposed to one never forming.
    pub fn is_link_failure(&self) -> bool {
        matches!(self, Self::Write(_) | Self::Read(_))
    }
}
