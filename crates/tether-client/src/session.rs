//! The session client: one connection to a server, one room at a time.
//!
//! ```text
//! Disconnected ──connect()──→ Connecting ──join_or_create()──→ Joined
//!      ↑                                                          │
//!      └──────────────────────── leave() ── Leaving ←─────────────┘
//! ```
//!
//! Network I/O runs on three background tasks per connection:
//!
//! - **read**: decodes frames and buffers them for [`SessionClient::drain_updates`],
//! - **write**: drains the outbound queue onto the socket,
//! - **heartbeat**: queues a `Heartbeat` every `heartbeat_interval_ms`.
//!
//! Nothing received is applied behind the caller's back. The driver pulls
//! buffered updates once per presentation tick and feeds them to a
//! [`Replica`](crate::Replica).

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tether_protocol::{
    Channel, ClientMessage, Codec, ERR_CONFLICT, ERR_ROOM_NOT_FOUND, Envelope, JoinOptions,
    JsonCodec, PROTOCOL_VERSION, Payload, ProtocolError, RoomId, RoomListEntry, RoomSelector,
    ServerMessage, SystemMessage,
};
use tether_schema::{SessionId, SkinCatalog, Transform};
use tether_tick::RateLimiter;
use tether_transport::{ClientConnection, Connection};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{TryRecvError, TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

use crate::settings::{SKIN_ID_KEY, SettingsStore};
use crate::{ClientError, IntentSink};

/// Sentinel for "no heartbeat answered yet".
const RTT_UNKNOWN: u64 = u64::MAX;

/// Client timing and queue settings. All durations in milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Minimum time between two `updatePosition` sends.
    pub position_interval_ms: u64,
    /// Bound on connecting plus the protocol handshake.
    pub connect_timeout_ms: u64,
    /// Bound on waiting for a join (or room list) answer.
    pub request_timeout_ms: u64,
    /// Bound on the graceful part of [`SessionClient::leave`].
    pub leave_timeout_ms: u64,
    /// 0 disables heartbeats.
    pub heartbeat_interval_ms: u64,
    /// Capacity of the outbound queue. Intents that don't fit are dropped.
    pub outbound_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            position_interval_ms: 50,
            connect_timeout_ms: 5_000,
            request_timeout_ms: 5_000,
            leave_timeout_ms: 1_000,
            heartbeat_interval_ms: 5_000,
            outbound_capacity: 64,
        }
    }
}

impl ClientConfig {
    pub fn position_interval(&self) -> Duration {
        Duration::from_millis(self.position_interval_ms)
    }
}

/// Where the client is in its lifecycle.
///
/// `Connecting` covers both the handshake and the time between a
/// successful connect and a successful join.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientState {
    Disconnected,
    Connecting,
    Joined,
    Leaving,
}

/// Something the read task buffered.
#[derive(Debug)]
enum Inbound {
    System(SystemMessage),
    Room(ServerMessage),
    Closed,
}

/// A live connection and its background tasks. Dropping it aborts them.
struct Link {
    conn: Arc<ClientConnection>,
    outbound: mpsc::Sender<Envelope>,
    inbound: mpsc::UnboundedReceiver<Inbound>,
    seq: Arc<AtomicU64>,
    start: Instant,
    tasks: Vec<JoinHandle<()>>,
}

impl Link {
    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::Relaxed)
    }

    fn now_ms(&self) -> u64 {
        elapsed_ms(self.start)
    }

    fn system(&self, message: SystemMessage) -> Envelope {
        Envelope::system(self.next_seq(), self.now_ms(), message)
    }

    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.abort_tasks();
    }
}

/// A connection to a Tether server.
pub struct SessionClient {
    config: ClientConfig,
    codec: JsonCodec,
    state: ClientState,
    link: Option<Link>,
    session_id: Option<SessionId>,
    room_id: Option<RoomId>,
    position_limiter: RateLimiter,
    /// Room messages that arrived while waiting for a request's answer.
    backlog: VecDeque<ServerMessage>,
    rtt_ms: Arc<AtomicU64>,
}

impl SessionClient {
    pub fn new(config: ClientConfig) -> Self {
        let position_limiter = RateLimiter::new(config.position_interval());
        Self {
            config,
            codec: JsonCodec,
            state: ClientState::Disconnected,
            link: None,
            session_id: None,
            room_id: None,
            position_limiter,
            backlog: VecDeque::new(),
            rtt_ms: Arc::new(AtomicU64::new(RTT_UNKNOWN)),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn state(&self) -> ClientState {
        self.state
    }

    /// This client's session id, once joined.
    pub fn session_id(&self) -> Option<&SessionId> {
        self.session_id.as_ref()
    }

    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    /// Round-trip time measured by the most recent heartbeat.
    pub fn last_rtt(&self) -> Option<Duration> {
        match self.rtt_ms.load(Ordering::Relaxed) {
            RTT_UNKNOWN => None,
            ms => Some(Duration::from_millis(ms)),
        }
    }

    /// Opens a connection to `url` and performs the protocol handshake.
    ///
    /// # Errors
    ///
    /// [`ClientError::ConnectionFailure`] if the server can't be reached,
    /// [`ClientError::Timeout`] if the handshake doesn't complete within
    /// `connect_timeout_ms`. Either way the client stays `Disconnected`;
    /// nothing is retried.
    pub async fn connect(&mut self, url: &str) -> Result<(), ClientError> {
        if self.state != ClientState::Disconnected {
            return Err(ClientError::InvalidState(self.state));
        }
        self.state = ClientState::Connecting;

        let timeout = Duration::from_millis(self.config.connect_timeout_ms);
        let result = match tokio::time::timeout(timeout, self.handshake(url)).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout("handshake")),
        };

        match result {
            Ok((conn, start)) => {
                self.link = Some(self.start_tasks(conn, start));
                info!(url, "connected");
                Ok(())
            }
            Err(e) => {
                self.state = ClientState::Disconnected;
                debug!(url, error = %e, "connect failed");
                Err(e)
            }
        }
    }

    async fn handshake(&self, url: &str) -> Result<(Arc<ClientConnection>, Instant), ClientError> {
        let conn = tether_transport::connect(url)
            .await
            .map_err(ClientError::ConnectionFailure)?;
        let start = Instant::now();

        let hello = Envelope::system(
            0,
            0,
            SystemMessage::Handshake {
                version: PROTOCOL_VERSION,
            },
        );
        let bytes = self.codec.encode(&hello)?;
        conn.send(&bytes)
            .await
            .map_err(ClientError::ConnectionFailure)?;

        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => return Err(ClientError::Disconnected),
            Err(e) => return Err(ClientError::ConnectionFailure(e)),
        };
        let envelope: Envelope = self.codec.decode(&data)?;
        match envelope.payload {
            Payload::System(SystemMessage::HandshakeAck { server_time }) => {
                trace!(server_time, "handshake acknowledged");
                Ok((Arc::new(conn), start))
            }
            Payload::System(SystemMessage::Error { code, message }) => {
                Err(ClientError::Rejected { code, message })
            }
            _ => Err(ProtocolError::Unexpected("HandshakeAck").into()),
        }
    }

    fn start_tasks(&self, conn: Arc<ClientConnection>, start: Instant) -> Link {
        let (out_tx, out_rx) = mpsc::channel(self.config.outbound_capacity.max(1));
        let (in_tx, in_rx) = mpsc::unbounded_channel();
        let seq = Arc::new(AtomicU64::new(1));
        self.rtt_ms.store(RTT_UNKNOWN, Ordering::Relaxed);

        let mut tasks = vec![
            tokio::spawn(read_loop(
                Arc::clone(&conn),
                self.codec,
                in_tx,
                Arc::clone(&self.rtt_ms),
                start,
            )),
            tokio::spawn(write_loop(Arc::clone(&conn), self.codec, out_rx)),
        ];
        if self.config.heartbeat_interval_ms > 0 {
            tasks.push(tokio::spawn(heartbeat_loop(
                out_tx.clone(),
                Arc::clone(&seq),
                start,
                Duration::from_millis(self.config.heartbeat_interval_ms),
            )));
        }

        Link {
            conn,
            outbound: out_tx,
            inbound: in_rx,
            seq,
            start,
            tasks,
        }
    }

    /// Joins a room matching `selector` and returns this client's session
    /// id within it.
    ///
    /// Room messages that arrive before the answer are kept for the next
    /// [`drain_updates`](Self::drain_updates).
    ///
    /// # Errors
    ///
    /// [`ClientError::RoomNotFound`] and [`ClientError::CapacityExceeded`]
    /// leave the connection open so another selector can be tried. A
    /// timeout or a dropped connection disconnects.
    pub async fn join_or_create(
        &mut self,
        selector: RoomSelector,
        options: JoinOptions,
    ) -> Result<SessionId, ClientError> {
        if self.state != ClientState::Connecting {
            return Err(ClientError::InvalidState(self.state));
        }
        let Some(link) = self.link.as_mut() else {
            return Err(ClientError::InvalidState(self.state));
        };

        let request = link.system(SystemMessage::JoinOrCreate { selector, options });
        if link.outbound.send(request).await.is_err() {
            self.teardown("outbound queue closed");
            return Err(ClientError::Disconnected);
        }

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let answer = tokio::time::timeout(
            timeout,
            await_system(link, &mut self.backlog, |msg| match msg {
                SystemMessage::RoomJoined {
                    room_id,
                    session_id,
                } => Some(Ok((room_id, session_id))),
                SystemMessage::Error { code, message } => Some(Err(join_error(code, message))),
                _ => None,
            }),
        )
        .await;

        match answer {
            Ok(Ok(Ok((room_id, session_id)))) => {
                info!(%room_id, session = %session_id, "joined room");
                self.state = ClientState::Joined;
                self.room_id = Some(room_id);
                self.session_id = Some(session_id.clone());
                self.position_limiter.reset();
                Ok(session_id)
            }
            Ok(Ok(Err(e))) => {
                debug!(error = %e, "join rejected");
                Err(e)
            }
            Ok(Err(e)) => {
                self.teardown("connection closed during join");
                Err(e)
            }
            Err(_) => {
                self.teardown("join timed out");
                Err(ClientError::Timeout("join"))
            }
        }
    }

    /// Asks the server for rooms that still have space.
    pub async fn list_rooms(&mut self) -> Result<Vec<RoomListEntry>, ClientError> {
        let Some(link) = self.link.as_mut() else {
            return Err(ClientError::InvalidState(self.state));
        };
        let request = link.system(SystemMessage::ListRooms);
        if link.outbound.send(request).await.is_err() {
            self.teardown("outbound queue closed");
            return Err(ClientError::Disconnected);
        }

        let timeout = Duration::from_millis(self.config.request_timeout_ms);
        let answer = tokio::time::timeout(
            timeout,
            await_system(link, &mut self.backlog, |msg| match msg {
                SystemMessage::RoomList { rooms } => Some(Ok(rooms)),
                SystemMessage::Error { code, message } => {
                    Some(Err(ClientError::Rejected { code, message }))
                }
                _ => None,
            }),
        )
        .await;

        match answer {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => {
                self.teardown("connection closed during room list");
                Err(e)
            }
            Err(_) => Err(ClientError::Timeout("room list")),
        }
    }

    /// Queues a room intent. Fire-and-forget.
    ///
    /// `updatePosition` is rate limited to one per `position_interval_ms`
    /// of elapsed time; calls in between return `Ok(false)` and send
    /// nothing. An intent that doesn't fit in the outbound queue is dropped
    /// the same way.
    pub fn send_intent(&mut self, message: ClientMessage) -> Result<bool, ClientError> {
        if self.state != ClientState::Joined {
            return Err(ClientError::InvalidState(self.state));
        }
        let Some(link) = self.link.as_ref() else {
            return Err(ClientError::InvalidState(self.state));
        };

        let channel = match message {
            ClientMessage::UpdatePosition { .. } => {
                if !self.position_limiter.try_acquire() {
                    trace!("position update throttled");
                    return Ok(false);
                }
                Channel::Unreliable
            }
            _ => Channel::ReliableOrdered,
        };

        let data = self.codec.encode(&message)?;
        let envelope = Envelope::room(link.next_seq(), link.now_ms(), channel, data);
        match link.outbound.try_send(envelope) {
            Ok(()) => Ok(true),
            Err(TrySendError::Full(_)) => {
                debug!(kind = message.kind(), "outbound queue full, intent dropped");
                Ok(false)
            }
            Err(TrySendError::Closed(_)) => {
                self.teardown("outbound queue closed");
                Err(ClientError::Disconnected)
            }
        }
    }

    /// Selects a skin: clamps `index` into the catalog, remembers it in
    /// `settings`, and tells the room if joined. Returns the clamped index.
    pub fn change_skin(
        &mut self,
        index: i64,
        catalog: SkinCatalog,
        settings: &mut impl SettingsStore,
    ) -> Result<u32, ClientError> {
        let skin = catalog.clamp(index);
        settings.set_int(SKIN_ID_KEY, i64::from(skin))?;
        if self.state == ClientState::Joined {
            self.send_intent(ClientMessage::ChangeSkin {
                skin_id: i64::from(skin),
            })?;
        }
        Ok(skin)
    }

    /// Every room message received since the last call, in arrival order.
    ///
    /// If the connection has dropped, the client moves to `Disconnected`
    /// after returning what was still buffered.
    pub fn drain_updates(&mut self) -> Vec<ServerMessage> {
        let mut updates: Vec<ServerMessage> = self.backlog.drain(..).collect();
        let Some(link) = self.link.as_mut() else {
            return updates;
        };

        let mut closed = false;
        loop {
            match link.inbound.try_recv() {
                Ok(Inbound::Room(message)) => updates.push(message),
                Ok(Inbound::System(SystemMessage::Error { code, message })) => {
                    warn!(code, %message, "server error");
                }
                Ok(Inbound::System(SystemMessage::Disconnect { reason })) => {
                    info!(%reason, "server is disconnecting us");
                }
                Ok(Inbound::System(other)) => {
                    debug!(message = ?other, "unexpected system message ignored");
                }
                Ok(Inbound::Closed) | Err(TryRecvError::Disconnected) => {
                    closed = true;
                    break;
                }
                Err(TryRecvError::Empty) => break,
            }
        }

        if closed {
            self.teardown("connection closed by server");
        }
        updates
    }

    /// Leaves the room and closes the connection.
    ///
    /// Background tasks are stopped first, so anything still queued is
    /// dropped. The goodbye itself is bounded by `leave_timeout_ms`; the
    /// client is `Disconnected` when this returns, whether or not the
    /// server heard it.
    pub async fn leave(&mut self) {
        let Some(mut link) = self.link.take() else {
            self.state = ClientState::Disconnected;
            return;
        };
        let was_joined = self.state == ClientState::Joined;
        self.state = ClientState::Leaving;
        link.abort_tasks();

        let mut goodbye = Vec::with_capacity(2);
        if was_joined {
            goodbye.push(link.system(SystemMessage::LeaveRoom));
        }
        goodbye.push(link.system(SystemMessage::Disconnect {
            reason: "client leaving".into(),
        }));

        let codec = self.codec;
        let conn = Arc::clone(&link.conn);
        let graceful = async move {
            for envelope in &goodbye {
                let bytes = codec.encode(envelope)?;
                conn.send(&bytes)
                    .await
                    .map_err(ClientError::ConnectionFailure)?;
            }
            conn.close().await.map_err(ClientError::ConnectionFailure)?;
            Ok::<(), ClientError>(())
        };

        let timeout = Duration::from_millis(self.config.leave_timeout_ms);
        match tokio::time::timeout(timeout, graceful).await {
            Ok(Ok(())) => debug!("left cleanly"),
            Ok(Err(e)) => debug!(error = %e, "goodbye not delivered"),
            Err(_) => warn!("leave timed out"),
        }

        self.reset_session();
        self.state = ClientState::Disconnected;
        info!("disconnected");
    }

    fn teardown(&mut self, reason: &str) {
        if self.link.take().is_some() {
            warn!(reason, "connection lost");
        }
        self.reset_session();
        self.state = ClientState::Disconnected;
    }

    fn reset_session(&mut self) {
        self.session_id = None;
        self.room_id = None;
        self.position_limiter.reset();
    }
}

impl IntentSink for SessionClient {
    fn send_position(&mut self, transform: Transform) -> bool {
        let Transform { position, rotation } = transform;
        let message = ClientMessage::UpdatePosition {
            x: position.x,
            y: position.y,
            z: position.z,
            rot_x: Some(rotation.x),
            rot_y: Some(rotation.y),
            rot_z: Some(rotation.z),
        };
        match self.send_intent(message) {
            Ok(sent) => sent,
            Err(e) => {
                debug!(error = %e, "position not sent");
                false
            }
        }
    }
}

/// Maps a join rejection to its client error.
fn join_error(code: u16, message: String) -> ClientError {
    match code {
        ERR_ROOM_NOT_FOUND => ClientError::RoomNotFound(message),
        ERR_CONFLICT => ClientError::CapacityExceeded(message),
        _ => ClientError::Rejected { code, message },
    }
}

/// Waits for the first system message `pick` accepts. Room messages seen
/// on the way go to `backlog`; other system messages are skipped.
async fn await_system<T>(
    link: &mut Link,
    backlog: &mut VecDeque<ServerMessage>,
    mut pick: impl FnMut(SystemMessage) -> Option<T>,
) -> Result<T, ClientError> {
    loop {
        match link.inbound.recv().await {
            Some(Inbound::System(message)) => {
                if let Some(answer) = pick(message) {
                    return Ok(answer);
                }
                debug!("system message skipped while waiting");
            }
            Some(Inbound::Room(message)) => backlog.push_back(message),
            Some(Inbound::Closed) | None => return Err(ClientError::Disconnected),
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

async fn read_loop(
    conn: Arc<ClientConnection>,
    codec: JsonCodec,
    inbound: mpsc::UnboundedSender<Inbound>,
    rtt_ms: Arc<AtomicU64>,
    start: Instant,
) {
    loop {
        let data = match conn.recv().await {
            Ok(Some(data)) => data,
            Ok(None) => {
                debug!("server closed the connection");
                break;
            }
            Err(e) => {
                debug!(error = %e, "recv error");
                break;
            }
        };

        let envelope: Envelope = match codec.decode(&data) {
            Ok(envelope) => envelope,
            Err(e) => {
                debug!(error = %e, "undecodable frame dropped");
                continue;
            }
        };

        let item = match envelope.payload {
            Payload::System(SystemMessage::HeartbeatAck { client_time, .. }) => {
                let rtt = elapsed_ms(start).saturating_sub(client_time);
                rtt_ms.store(rtt, Ordering::Relaxed);
                trace!(rtt_ms = rtt, "heartbeat acknowledged");
                continue;
            }
            Payload::System(message) => Inbound::System(message),
            Payload::Room(data) => match codec.decode::<ServerMessage>(&data) {
                Ok(message) => Inbound::Room(message),
                Err(e) => {
                    debug!(error = %e, "undecodable room message dropped");
                    continue;
                }
            },
        };

        if inbound.send(item).is_err() {
            return;
        }
    }
    let _ = inbound.send(Inbound::Closed);
}

async fn write_loop(
    conn: Arc<ClientConnection>,
    codec: JsonCodec,
    mut outbound: mpsc::Receiver<Envelope>,
) {
    while let Some(envelope) = outbound.recv().await {
        let bytes = match codec.encode(&envelope) {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "encode failed, frame dropped");
                continue;
            }
        };
        if let Err(e) = conn.send(&bytes).await {
            debug!(error = %e, "send failed, writer stopping");
            break;
        }
    }
}

async fn heartbeat_loop(
    outbound: mpsc::Sender<Envelope>,
    seq: Arc<AtomicU64>,
    start: Instant,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick completes immediately.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let now = elapsed_ms(start);
        let beat = Envelope::system(
            seq.fetch_add(1, Ordering::Relaxed),
            now,
            SystemMessage::Heartbeat { client_time: now },
        );
        if outbound.send(beat).await.is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_config_defaults() {
        let config = ClientConfig::default();
        assert_eq!(config.position_interval(), Duration::from_millis(50));
        assert_eq!(config.outbound_capacity, 64);
    }

    #[test]
    fn test_join_error_maps_codes() {
        assert!(matches!(
            join_error(404, "R-9".into()),
            ClientError::RoomNotFound(_)
        ));
        assert!(matches!(
            join_error(409, "full".into()),
            ClientError::CapacityExceeded(_)
        ));
        assert!(matches!(
            join_error(503, "gone".into()),
            ClientError::Rejected { code: 503, .. }
        ));
    }

    #[test]
    fn test_new_client_is_disconnected() {
        let client = SessionClient::new(ClientConfig::default());
        assert_eq!(client.state(), ClientState::Disconnected);
        assert!(client.session_id().is_none());
        assert!(client.last_rtt().is_none());
    }

    #[test]
    fn test_send_intent_before_join_is_invalid_state() {
        let mut client = SessionClient::new(ClientConfig::default());
        let result = client.send_intent(ClientMessage::ChangeSkin { skin_id: 1 });
        assert!(matches!(
            result,
            Err(ClientError::InvalidState(ClientState::Disconnected))
        ));
    }

    #[test]
    fn test_change_skin_offline_only_persists() {
        let mut client = SessionClient::new(ClientConfig::default());
        let mut settings = crate::MemorySettings::new();
        let skin = client
            .change_skin(99, SkinCatalog::new(5), &mut settings)
            .unwrap();
        assert_eq!(skin, 4);
        assert_eq!(settings.get_int(SKIN_ID_KEY, -1), 4);
    }

    #[tokio::test]
    async fn test_leave_when_disconnected_is_noop() {
        let mut client = SessionClient::new(ClientConfig::default());
        client.leave().await;
        assert_eq!(client.state(), ClientState::Disconnected);
    }
}
