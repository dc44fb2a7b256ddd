//! `TetherServer` builder and server loop.
//!
//! This is the entry point for running a Tether server. It ties together
//! all the layers: transport → protocol → room manager → room actors.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tether_protocol::JsonCodec;
use tether_room::{RoomConfig, RoomManager};
use tether_transport::{Transport, WebSocketTransport};
use tokio::sync::Mutex;

use crate::handler::handle_connection;
use crate::{ServerConfig, TetherError};

/// Shared server state passed to each connection handler task.
pub(crate) struct ServerState {
    pub(crate) rooms: Mutex<RoomManager>,
    pub(crate) codec: JsonCodec,
    pub(crate) config: ServerConfig,
    /// Set once shutdown starts; rooms closing after this aren't evictions.
    pub(crate) shutting_down: AtomicBool,
}

impl ServerState {
    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }
}

/// Builder for configuring and starting a Tether server.
///
/// # Example
///
/// ```rust,no_run
/// use tether::prelude::*;
///
/// # async fn run() -> Result<(), TetherError> {
/// let server = TetherServer::builder()
///     .bind("0.0.0.0:8080")
///     .room_config(RoomConfig {
///         max_clients: 8,
///         ..RoomConfig::default()
///     })
///     .build()
///     .await?;
/// server.run().await
/// # }
/// ```
pub struct TetherServerBuilder {
    config: ServerConfig,
}

impl TetherServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
        }
    }

    /// Replaces the whole configuration, e.g. one read with
    /// [`ServerConfig::load`].
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to. Port 0 picks a free port.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_owned();
        self
    }

    pub fn room_config(mut self, config: RoomConfig) -> Self {
        self.config.room = config;
        self
    }

    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.config.handshake_timeout_ms = millis(timeout);
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.config.idle_timeout_ms = millis(timeout);
        self
    }

    /// Binds the listener. The server doesn't accept anything until
    /// [`TetherServer::run`].
    pub async fn build(self) -> Result<TetherServer, TetherError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;

        let state = Arc::new(ServerState {
            rooms: Mutex::new(RoomManager::new(self.config.room.clone())),
            codec: JsonCodec,
            config: self.config,
            shutting_down: AtomicBool::new(false),
        });

        Ok(TetherServer { transport, state })
    }
}

impl Default for TetherServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// A bound Tether server.
///
/// Call [`run()`](Self::run) to start accepting connections.
pub struct TetherServer {
    transport: WebSocketTransport,
    state: Arc<ServerState>,
}

impl TetherServer {
    pub fn builder() -> TetherServerBuilder {
        TetherServerBuilder::new()
    }

    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, TetherError> {
        Ok(self.transport.local_addr()?)
    }

    pub fn config(&self) -> &ServerConfig {
        &self.state.config
    }

    /// Runs the accept loop, one handler task per connection, until the
    /// task running it is dropped.
    pub async fn run(self) -> Result<(), TetherError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs the accept loop until `shutdown` completes, then stops every
    /// room. Members get `Disconnect` and their connections close.
    pub async fn run_until(
        mut self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), TetherError> {
        tracing::info!("Tether server running");
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                accepted = self.transport.accept() => match accepted {
                    Ok(conn) => {
                        let state = Arc::clone(&self.state);
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(conn, state).await {
                                tracing::debug!(error = %e, "connection ended with error");
                            }
                        });
                    }
                    Err(e) => {
                        tracing::error!(error = %e, "accept failed");
                    }
                },
                () = &mut shutdown => break,
            }
        }

        self.state.shutting_down.store(true, Ordering::Relaxed);
        let mut rooms = self.state.rooms.lock().await;
        let count = rooms.room_count();
        rooms.shutdown_all().await;
        tracing::info!(rooms = count, "Tether server stopped");
        Ok(())
    }
}
