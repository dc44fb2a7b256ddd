//! Per-connection handler: handshake, room membership, and message routing.
//!
//! Each accepted connection gets its own Tokio task running this handler.
//! The flow is:
//!   1. Receive Handshake → validate version → send HandshakeAck
//!   2. Loop: receive envelopes → dispatch system or room messages
//!
//! While the connection is in a room, a second task forwards the session's
//! outbound queue to the socket. If the room evicts the session, that queue
//! closes and the handler drops the connection.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use tether_protocol::{
    Channel, ClientMessage, Codec, ERR_BAD_REQUEST, ERR_CONFLICT, Envelope, JoinOptions, Payload,
    ProtocolError, RoomId, RoomSelector, ServerMessage, SystemMessage, check_version,
};
use tether_room::{RoomHandle, SessionReceiver};
use tether_schema::SessionId;
use tether_transport::{Connection, WebSocketConnection};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::TetherError;
use crate::server::ServerState;

/// The write side of one connection, shared with its forwarder task.
struct Outgoing {
    conn: WebSocketConnection,
    state: Arc<ServerState>,
    seq: AtomicU64,
    start: Instant,
}

impl Outgoing {
    fn elapsed_ms(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }

    async fn send(&self, channel: Channel, payload: Payload) -> Result<(), TetherError> {
        let envelope = Envelope {
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
            timestamp: self.elapsed_ms(),
            channel,
            payload,
        };
        let bytes = self.state.codec.encode(&envelope)?;
        self.conn.send(&bytes).await?;
        Ok(())
    }

    async fn system(&self, message: SystemMessage) -> Result<(), TetherError> {
        self.send(Channel::ReliableOrdered, Payload::System(message))
            .await
    }

    async fn error(&self, code: u16, message: impl Into<String>) -> Result<(), TetherError> {
        self.system(SystemMessage::error(code, message)).await
    }

    async fn room(&self, message: &ServerMessage) -> Result<(), TetherError> {
        let data = self.state.codec.encode(message)?;
        self.send(Channel::ReliableOrdered, Payload::Room(data)).await
    }
}

/// The room this connection is currently in.
struct Membership {
    session_id: SessionId,
    room_id: RoomId,
    /// Cached so room messages don't go through the manager's lock.
    handle: RoomHandle,
    forwarder: JoinHandle<()>,
    generation: u64,
}

/// Owns the connection's membership and leaves the room when dropped.
///
/// The handler leaves explicitly on every normal exit. The drop path covers
/// early returns and panics; since `Drop` is synchronous, it spawns a
/// fire-and-forget task for the async leave.
struct SessionGuard {
    state: Arc<ServerState>,
    membership: Option<Membership>,
}

impl SessionGuard {
    fn current(&self) -> Option<&Membership> {
        self.membership.as_ref()
    }

    /// Leaves the current room, if any. Safe to call repeatedly.
    async fn leave(&mut self) {
        let Some(membership) = self.membership.take() else {
            return;
        };
        membership.forwarder.abort();

        let result = self.state.rooms.lock().await.leave(&membership.session_id).await;
        match result {
            Ok(_) => tracing::info!(
                session = %membership.session_id,
                room_id = %membership.room_id,
                "session left room"
            ),
            Err(e) => tracing::debug!(
                session = %membership.session_id,
                error = %e,
                "leave failed"
            ),
        }
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        let Some(membership) = self.membership.take() else {
            return;
        };
        membership.forwarder.abort();
        let state = Arc::clone(&self.state);
        tokio::spawn(async move {
            let mut rooms = state.rooms.lock().await;
            let _ = rooms.leave(&membership.session_id).await;
        });
    }
}

/// What the message loop should do after a message.
enum Flow {
    Continue,
    Close,
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection(
    conn: WebSocketConnection,
    state: Arc<ServerState>,
) -> Result<(), TetherError> {
    let conn_id = conn.id();
    tracing::debug!(%conn_id, peer = ?conn.peer(), "handling new connection");

    let out = Arc::new(Outgoing {
        conn,
        state: Arc::clone(&state),
        seq: AtomicU64::new(0),
        start: Instant::now(),
    });

    // --- Step 1: Handshake ---
    perform_handshake(&out, &state).await?;
    tracing::debug!(%conn_id, "handshake complete");

    // --- Step 2: Message loop ---
    let mut guard = SessionGuard {
        state: Arc::clone(&state),
        membership: None,
    };
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel::<u64>();
    let mut generation = 0u64;
    let idle = state.config.idle_timeout();

    loop {
        tokio::select! {
            received = tokio::time::timeout(idle, out.conn.recv()) => {
                let data = match received {
                    Ok(Ok(Some(data))) => data,
                    Ok(Ok(None)) => {
                        tracing::debug!(%conn_id, "connection closed cleanly");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!(%conn_id, error = %e, "recv error");
                        break;
                    }
                    Err(_) => {
                        tracing::info!(%conn_id, "connection timed out");
                        break;
                    }
                };

                let envelope: Envelope = match state.codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(%conn_id, error = %e, "failed to decode envelope");
                        continue;
                    }
                };

                let flow = match envelope.payload {
                    Payload::System(message) => {
                        handle_system_message(
                            &out,
                            &state,
                            &mut guard,
                            message,
                            &closed_tx,
                            &mut generation,
                        )
                        .await?
                    }
                    Payload::Room(data) => {
                        handle_room_message(&out, &state, &guard, &data).await?;
                        Flow::Continue
                    }
                };
                if let Flow::Close = flow {
                    break;
                }
            }

            Some(closed) = closed_rx.recv() => {
                // Only the current membership's queue matters; an older one
                // closes because we left that room ourselves.
                if guard.current().map(|m| m.generation) == Some(closed) {
                    let reason = if state.is_shutting_down() {
                        tracing::info!(%conn_id, "room stopped for shutdown, closing connection");
                        "server shutting down"
                    } else {
                        tracing::warn!(%conn_id, "session evicted by room, closing connection");
                        "evicted"
                    };
                    guard.leave().await;
                    let _ = out
                        .system(SystemMessage::Disconnect {
                            reason: reason.into(),
                        })
                        .await;
                    break;
                }
            }
        }
    }

    guard.leave().await;
    let _ = out.conn.close().await;
    Ok(())
}

/// Receives the Handshake, checks the version and sends the ack.
async fn perform_handshake(
    out: &Outgoing,
    state: &Arc<ServerState>,
) -> Result<(), TetherError> {
    let data = match tokio::time::timeout(state.config.handshake_timeout(), out.conn.recv()).await
    {
        Ok(Ok(Some(data))) => data,
        Ok(Ok(None)) => return Err(ProtocolError::ClosedDuring("handshake").into()),
        Ok(Err(e)) => return Err(TetherError::Transport(e)),
        Err(_) => return Err(ProtocolError::TimedOut("handshake").into()),
    };

    let envelope: Envelope = state.codec.decode(&data)?;
    let Payload::System(SystemMessage::Handshake { version }) = envelope.payload else {
        out.error(ERR_BAD_REQUEST, "expected Handshake").await?;
        return Err(ProtocolError::Unexpected("Handshake").into());
    };

    if let Err(e) = check_version(version) {
        out.error(ERR_BAD_REQUEST, e.to_string()).await?;
        return Err(e.into());
    }

    out.system(SystemMessage::HandshakeAck {
        server_time: out.elapsed_ms(),
    })
    .await
}

/// Handles a system message.
async fn handle_system_message(
    out: &Arc<Outgoing>,
    state: &Arc<ServerState>,
    guard: &mut SessionGuard,
    message: SystemMessage,
    closed_tx: &mpsc::UnboundedSender<u64>,
    generation: &mut u64,
) -> Result<Flow, TetherError> {
    match message {
        SystemMessage::Heartbeat { client_time } => {
            out.system(SystemMessage::HeartbeatAck {
                client_time,
                server_time: out.elapsed_ms(),
            })
            .await?;
        }

        SystemMessage::JoinOrCreate { selector, options } => {
            if let Some(current) = guard.current() {
                out.error(
                    ERR_CONFLICT,
                    format!("already in room {}", current.room_id),
                )
                .await?;
                return Ok(Flow::Continue);
            }
            join(out, state, guard, &selector, options, closed_tx, generation).await?;
        }

        SystemMessage::LeaveRoom => {
            guard.leave().await;
        }

        SystemMessage::ListRooms => {
            let rooms = state.rooms.lock().await.list_rooms().await;
            out.system(SystemMessage::RoomList { rooms }).await?;
        }

        SystemMessage::Disconnect { reason } => {
            tracing::info!(%reason, "client disconnected");
            return Ok(Flow::Close);
        }

        _ => {
            tracing::debug!("ignoring unexpected system message");
        }
    }

    Ok(Flow::Continue)
}

async fn join(
    out: &Arc<Outgoing>,
    state: &Arc<ServerState>,
    guard: &mut SessionGuard,
    selector: &RoomSelector,
    options: JoinOptions,
    closed_tx: &mpsc::UnboundedSender<u64>,
    generation: &mut u64,
) -> Result<(), TetherError> {
    // Lock only for matchmaking, drop before network I/O.
    let result = {
        let mut rooms = state.rooms.lock().await;
        let (sender, receiver) = rooms.session_channel();
        rooms
            .create_or_join(selector, options, sender)
            .await
            .map(|ticket| (ticket, receiver))
    };

    let (ticket, receiver) = match result {
        Ok(joined) => joined,
        Err(e) => {
            tracing::debug!(error = %e, "join rejected");
            return out.error(e.code(), e.to_string()).await;
        }
    };

    tracing::info!(
        session = %ticket.session_id,
        room_id = %ticket.room_id,
        "session joined room"
    );

    *generation += 1;
    // The answer goes out before the forwarder starts, so the client sees
    // RoomJoined ahead of the initial snapshot.
    let forwarder_out = Arc::clone(out);
    let answer = out
        .system(SystemMessage::RoomJoined {
            room_id: ticket.room_id,
            session_id: ticket.session_id.clone(),
        })
        .await;
    guard.membership = Some(Membership {
        session_id: ticket.session_id,
        room_id: ticket.room_id,
        handle: ticket.handle,
        forwarder: tokio::spawn(forward(
            forwarder_out,
            receiver,
            closed_tx.clone(),
            *generation,
        )),
        generation: *generation,
    });
    answer
}

/// Copies a session's outbound queue onto the socket. Reports `generation`
/// on `closed` when the room drops the queue.
async fn forward(
    out: Arc<Outgoing>,
    mut receiver: SessionReceiver,
    closed: mpsc::UnboundedSender<u64>,
    generation: u64,
) {
    while let Some(message) = receiver.recv().await {
        if let Err(e) = out.room(&message).await {
            tracing::debug!(error = %e, "forward failed");
            break;
        }
    }
    let _ = closed.send(generation);
}

/// Handles a room message: decode, route to the session's room.
async fn handle_room_message(
    out: &Outgoing,
    state: &Arc<ServerState>,
    guard: &SessionGuard,
    data: &[u8],
) -> Result<(), TetherError> {
    let message: ClientMessage = match state.codec.decode(data) {
        Ok(message) => message,
        Err(e) => {
            tracing::debug!(error = %e, "malformed room message");
            return out
                .error(ERR_BAD_REQUEST, format!("invalid room message: {e}"))
                .await;
        }
    };

    let Some(membership) = guard.current() else {
        tracing::debug!(kind = message.kind(), "room message before join ignored");
        return Ok(());
    };

    if let Err(e) = membership
        .handle
        .send_message(membership.session_id.clone(), message)
        .await
    {
        tracing::debug!(session = %membership.session_id, error = %e, "room message not delivered");
    }
    Ok(())
}
