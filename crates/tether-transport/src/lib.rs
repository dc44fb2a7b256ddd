//! Message transport for Tether.
//!
//! A [`Transport`] hands out [`Connection`]s; a connection moves whole
//! frames (one encoded envelope each) in both directions. Reading and
//! writing are independent, so one task may sit in
//! [`recv`](Connection::recv) while others [`send`](Connection::send).
//!
//! The `websocket` feature (on by default) provides the listener, the
//! client connector and the connection type over `tokio-tungstenite`.

#![allow(async_fn_in_trait)]

mod error;
#[cfg(feature = "websocket")]
mod websocket;

pub use error::TransportError;
#[cfg(feature = "websocket")]
pub use websocket::{ClientConnection, WebSocketConnection, WebSocketTransport, connect};

use std::fmt;
use std::net::SocketAddr;

/// Process-unique connection number, used to tag log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Source of inbound connections.
pub trait Transport: Send + Sync + 'static {
    type Connection: Connection;
    type Error: std::error::Error + Send + Sync;

    /// Waits for the next peer and completes its upgrade.
    async fn accept(&mut self) -> Result<Self::Connection, Self::Error>;
}

/// One frame-oriented link to a peer.
pub trait Connection: Send + Sync + 'static {
    type Error: std::error::Error + Send + Sync;

    async fn send(&self, frame: &[u8]) -> Result<(), Self::Error>;

    /// Next frame from the peer; `Ok(None)` once the peer has closed.
    async fn recv(&self) -> Result<Option<Vec<u8>>, Self::Error>;

    async fn close(&self) -> Result<(), Self::Error>;

    fn id(&self) -> ConnectionId;

    /// Remote address, when the transport knows it.
    fn peer(&self) -> Option<SocketAddr>;
}
