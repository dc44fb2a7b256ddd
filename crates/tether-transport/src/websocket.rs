//! WebSocket listener, connector and connection.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::{Connection, ConnectionId, Transport, TransportError};

static CONNECTIONS: AtomicU64 = AtomicU64::new(1);

/// Listens for WebSocket peers on a TCP address.
pub struct WebSocketTransport {
    listener: TcpListener,
}

impl WebSocketTransport {
    /// Binds the listener. Port 0 picks a free port; read it back with
    /// [`local_addr`](Self::local_addr).
    pub async fn bind(addr: &str) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| TransportError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let transport = Self { listener };
        tracing::info!(local = %transport.local_addr()?, "listening for websocket peers");
        Ok(transport)
    }

    pub fn local_addr(&self) -> Result<SocketAddr, TransportError> {
        self.listener.local_addr().map_err(TransportError::Accept)
    }
}

impl Transport for WebSocketTransport {
    type Connection = WebSocketConnection;
    type Error = TransportError;

    async fn accept(&mut self) -> Result<WebSocketConnection, TransportError> {
        let (tcp, peer) = self.listener.accept().await.map_err(TransportError::Accept)?;
        let ws = tokio_tungstenite::accept_async(tcp)
            .await
            .map_err(|e| TransportError::Upgrade(e.into()))?;
        let conn = WebSocketConnection::from_stream(ws, Some(peer));
        tracing::debug!(conn = %conn.id, %peer, "websocket peer accepted");
        Ok(conn)
    }
}

/// Connection type produced by [`connect`].
pub type ClientConnection = WebSocketConnection<MaybeTlsStream<TcpStream>>;

/// Dials `url` (for example `ws://127.0.0.1:8080`).
pub async fn connect(url: &str) -> Result<ClientConnection, TransportError> {
    let (ws, _) = tokio_tungstenite::connect_async(url)
        .await
        .map_err(|e| TransportError::Connect {
            url: url.to_owned(),
            source: e.into(),
        })?;
    let peer = match ws.get_ref() {
        MaybeTlsStream::Plain(tcp) => tcp.peer_addr().ok(),
        _ => None,
    };
    let conn = WebSocketConnection::from_stream(ws, peer);
    tracing::debug!(conn = %conn.id, url, "websocket connected");
    Ok(conn)
}

/// An upgraded WebSocket, split so reads and writes lock separately.
pub struct WebSocketConnection<S = TcpStream> {
    id: ConnectionId,
    peer: Option<SocketAddr>,
    writer: Mutex<SplitSink<WebSocketStream<S>, Message>>,
    reader: Mutex<SplitStream<WebSocketStream<S>>>,
}

impl<S> WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    fn from_stream(ws: WebSocketStream<S>, peer: Option<SocketAddr>) -> Self {
        let (writer, reader) = ws.split();
        Self {
            id: ConnectionId::new(CONNECTIONS.fetch_add(1, Ordering::Relaxed)),
            peer,
            writer: Mutex::new(writer),
            reader: Mutex::new(reader),
        }
    }
}

fn write_failed(e: tungstenite::Error) -> TransportError {
    TransportError::Write(e.into())
}

impl<S> Connection for WebSocketConnection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    type Error = TransportError;

    async fn send(&self, frame: &[u8]) -> Result<(), TransportError> {
        self.writer
            .lock()
            .await
            .send(Message::Binary(frame.to_vec().into()))
            .await
            .map_err(write_failed)
    }

    async fn recv(&self) -> Result<Option<Vec<u8>>, TransportError> {
        let mut reader = self.reader.lock().await;
        while let Some(message) = reader.next().await {
            match message.map_err(|e| TransportError::Read(e.into()))? {
                Message::Binary(data) => return Ok(Some(data.into())),
                // Text frames carry the same JSON envelopes.
                Message::Text(text) => return Ok(Some(text.as_bytes().to_vec())),
                Message::Close(_) => return Ok(None),
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
        Ok(None)
    }

    async fn close(&self) -> Result<(), TransportError> {
        self.writer.lock().await.close().await.map_err(write_failed)
    }

    fn id(&self) -> ConnectionId {
        self.id
    }

    fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }
}
