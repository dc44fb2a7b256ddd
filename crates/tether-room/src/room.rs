//! The room actor and its handle.
//!
//! Each room runs as one tokio task that owns the canonical state. Every
//! operation reaches it as a [`RoomCommand`] on an mpsc channel and is
//! applied in arrival order, so join, leave and intents for the same room
//! never race.
//!
//! ```text
//! RoomHandle ──RoomCommand──→ RoomActor ──try_send──→ session queues
//!                   ↑ oneshot reply │
//!                   └───────────────┘
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use tether_protocol::{ClientMessage, JoinOptions, RoomId, ServerMessage};
use tether_schema::{Axis, Player, SessionId, TrackedState, Vec3, spawn_point};
use tether_tick::{TickConfig, TickInfo, TickScheduler};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, trace, warn};

use crate::{RoomConfig, RoomError};

/// One message queued for a session. Shared between recipients of a
/// broadcast.
pub type Outbound = Arc<ServerMessage>;

/// The sending half of a session's bounded outbound queue.
pub type SessionSender = mpsc::Sender<Outbound>;

/// The receiving half, drained by the session's connection handler.
pub type SessionReceiver = mpsc::Receiver<Outbound>;

pub(crate) enum RoomCommand {
    Join {
        session_id: SessionId,
        options: JoinOptions,
        sender: SessionSender,
        reply: oneshot::Sender<Result<(), RoomError>>,
    },
    Leave {
        session_id: SessionId,
        reply: oneshot::Sender<LeaveOutcome>,
    },
    Message {
        session_id: SessionId,
        msg: ClientMessage,
    },
    GetInfo {
        reply: oneshot::Sender<RoomInfo>,
    },
    GetState {
        reply: oneshot::Sender<tether_schema::RoomState>,
    },
    Shutdown,
}

/// Result of a leave request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaveOutcome {
    /// `false` if the session was not (or no longer) a member.
    pub removed: bool,
    /// Members left after the leave. At 0 the room has disposed itself.
    pub remaining: usize,
}

/// A point-in-time summary of a room.
#[derive(Debug, Clone)]
pub struct RoomInfo {
    pub room_id: RoomId,
    pub name: Option<String>,
    pub player_count: usize,
    pub max_players: usize,
}

/// A cheap, cloneable handle for talking to a room actor.
///
/// Every method fails with [`RoomError::Unavailable`] once the actor has
/// stopped.
#[derive(Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    sender: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Adds a session. On success the session's queue has already
    /// received a full snapshot.
    pub async fn join(
        &self,
        session_id: SessionId,
        options: JoinOptions,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Join {
            session_id,
            options,
            sender,
            reply,
        })
        .await?;
        rx.await.map_err(|_| self.unavailable())?
    }

    /// Removes a session. Leaving twice is not an error.
    pub async fn leave(&self, session_id: SessionId) -> Result<LeaveOutcome, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::Leave { session_id, reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// Queues a client intent. Fire-and-forget: no reply is awaited.
    pub async fn send_message(
        &self,
        session_id: SessionId,
        msg: ClientMessage,
    ) -> Result<(), RoomError> {
        self.send(RoomCommand::Message { session_id, msg }).await
    }

    pub async fn get_info(&self) -> Result<RoomInfo, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::GetInfo { reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    /// A copy of the canonical state.
    pub async fn get_state(&self) -> Result<tether_schema::RoomState, RoomError> {
        let (reply, rx) = oneshot::channel();
        self.send(RoomCommand::GetState { reply }).await?;
        rx.await.map_err(|_| self.unavailable())
    }

    pub async fn shutdown(&self) -> Result<(), RoomError> {
        self.send(RoomCommand::Shutdown).await
    }

    /// Returns `true` once the actor has stopped.
    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }

    async fn send(&self, cmd: RoomCommand) -> Result<(), RoomError> {
        self.sender.send(cmd).await.map_err(|_| self.unavailable())
    }

    fn unavailable(&self) -> RoomError {
        RoomError::Unavailable(self.room_id)
    }
}

// ---------------------------------------------------------------------------
// Actor
// ---------------------------------------------------------------------------

struct RoomActor {
    room_id: RoomId,
    name: Option<String>,
    config: RoomConfig,
    state: TrackedState,
    sessions: HashMap<SessionId, SessionSender>,
    ticker: TickScheduler,
    receiver: mpsc::Receiver<RoomCommand>,
    ever_joined: bool,
}

impl RoomActor {
    async fn run(mut self) {
        info!(room_id = %self.room_id, name = ?self.name, "room actor started");

        loop {
            tokio::select! {
                cmd = self.receiver.recv() => {
                    let Some(cmd) = cmd else { break };
                    if !self.handle_command(cmd) {
                        break;
                    }
                }
                tick = self.ticker.wait_for_tick() => self.on_tick(tick),
            }

            if self.ever_joined && self.sessions.is_empty() {
                break;
            }
        }

        self.dispose();
    }

    /// Returns `false` when the actor should stop.
    fn handle_command(&mut self, cmd: RoomCommand) -> bool {
        match cmd {
            RoomCommand::Join {
                session_id,
                options,
                sender,
                reply,
            } => {
                let result = self.on_join(session_id, options, sender);
                let _ = reply.send(result);
            }
            RoomCommand::Leave { session_id, reply } => {
                let removed = self.on_leave(&session_id);
                let _ = reply.send(LeaveOutcome {
                    removed,
                    remaining: self.sessions.len(),
                });
            }
            RoomCommand::Message { session_id, msg } => self.on_message(&session_id, msg),
            RoomCommand::GetInfo { reply } => {
                let _ = reply.send(self.info());
            }
            RoomCommand::GetState { reply } => {
                let _ = reply.send(self.state.snapshot());
            }
            RoomCommand::Shutdown => {
                info!(room_id = %self.room_id, "room shutting down");
                return false;
            }
        }
        true
    }

    fn on_join(
        &mut self,
        session_id: SessionId,
        options: JoinOptions,
        sender: SessionSender,
    ) -> Result<(), RoomError> {
        if self.sessions.contains_key(&session_id) {
            return Err(RoomError::AlreadyJoined(session_id, self.room_id));
        }
        if self.sessions.len() >= self.config.max_clients {
            return Err(RoomError::CapacityExceeded(self.room_id));
        }

        let position = spawn_point(self.state.len(), &self.config.spawn);
        let player = Player::new(
            self.config.display_name_for(&options.display_name),
            self.config.skin_catalog.clamp(options.cosmetic_index),
            position,
        );
        info!(
            room_id = %self.room_id,
            session = %session_id,
            name = %player.name,
            skin = player.skin_id,
            players = self.sessions.len() + 1,
            "session joined"
        );

        self.state.insert(session_id.clone(), player);
        self.sessions.insert(session_id.clone(), sender);
        self.ever_joined = true;

        let snapshot = Arc::new(ServerMessage::StateSnapshot {
            state: self.state.snapshot(),
        });
        if !self.send_to(&session_id, snapshot) {
            self.evict(&session_id);
        }
        self.flush();
        Ok(())
    }

    fn on_leave(&mut self, session_id: &SessionId) -> bool {
        let had_queue = self.sessions.remove(session_id).is_some();
        let had_entity = self.state.remove(session_id).is_some();
        if !(had_queue || had_entity) {
            debug!(room_id = %self.room_id, session = %session_id, "leave for non-member ignored");
            return false;
        }
        info!(
            room_id = %self.room_id,
            session = %session_id,
            players = self.sessions.len(),
            "session left"
        );
        self.flush();
        true
    }

    fn on_message(&mut self, session_id: &SessionId, msg: ClientMessage) {
        if !self.state.contains(session_id) {
            debug!(
                room_id = %self.room_id,
                session = %session_id,
                kind = msg.kind(),
                "message from non-member ignored"
            );
            return;
        }

        match msg {
            // Trusted verbatim: no plausibility check on client positions.
            ClientMessage::UpdatePosition {
                x,
                y,
                z,
                rot_x,
                rot_y,
                rot_z,
            } => {
                self.state.set_position(session_id, Vec3::new(x, y, z));
                for (axis, value) in [(Axis::X, rot_x), (Axis::Y, rot_y), (Axis::Z, rot_z)] {
                    if let Some(value) = value {
                        self.state.set_rotation_component(session_id, axis, value);
                    }
                }
            }
            ClientMessage::ChangeSkin { skin_id } => {
                let clamped = self.config.skin_catalog.clamp(skin_id);
                if i64::from(clamped) != skin_id {
                    debug!(
                        room_id = %self.room_id,
                        session = %session_id,
                        requested = skin_id,
                        clamped,
                        "skin index clamped"
                    );
                }
                self.state.set_skin(session_id, clamped);
                let notice = Arc::new(ServerMessage::SkinChanged {
                    player_id: session_id.clone(),
                    skin_id: clamped,
                });
                self.broadcast(notice, Some(session_id));
            }
            ClientMessage::Unknown => {
                debug!(room_id = %self.room_id, session = %session_id, "unknown message kind ignored");
                return;
            }
        }

        if self.ticker.flushes_on_change() {
            self.flush();
        }
    }

    fn on_tick(&mut self, tick: TickInfo) {
        self.flush();

        if tick.keyframe {
            trace!(room_id = %self.room_id, tick = tick.tick, "keyframe");
            let snapshot = Arc::new(ServerMessage::StateSnapshot {
                state: self.state.snapshot(),
            });
            self.broadcast(snapshot, None);
            // Evictions during the keyframe still have to reach the others.
            self.flush();
        }
    }

    /// Sends every pending change to every session.
    ///
    /// Evicting a session while broadcasting records its removal, so this
    /// repeats until nothing is pending.
    fn flush(&mut self) {
        while self.state.has_pending() {
            let patch = self.state.take_patch();
            trace!(room_id = %self.room_id, changes = patch.len(), "flushing patch");
            self.broadcast(Arc::new(ServerMessage::StatePatch { patch }), None);
        }
    }

    /// Queues `msg` for every session except `except`, evicting sessions
    /// whose queue is full or closed.
    fn broadcast(&mut self, msg: Outbound, except: Option<&SessionId>) {
        let failed: Vec<SessionId> = self
            .sessions
            .keys()
            .filter(|id| Some(*id) != except)
            .filter(|id| !self.send_to(id, Arc::clone(&msg)))
            .cloned()
            .collect();
        for id in failed {
            self.evict(&id);
        }
    }

    /// Returns `false` if the session must be evicted.
    fn send_to(&self, session_id: &SessionId, msg: Outbound) -> bool {
        let Some(sender) = self.sessions.get(session_id) else {
            return true;
        };
        match sender.try_send(msg) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    room_id = %self.room_id,
                    session = %session_id,
                    capacity = self.config.outbound_capacity,
                    "outbound queue full, disconnecting slow session"
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!(room_id = %self.room_id, session = %session_id, "outbound queue closed");
                false
            }
        }
    }

    /// Drops a session's queue and entity. Dropping the queue is what tells
    /// the connection handler to close the transport.
    fn evict(&mut self, session_id: &SessionId) {
        self.sessions.remove(session_id);
        if self.state.remove(session_id).is_some() {
            info!(room_id = %self.room_id, session = %session_id, "session evicted");
        }
    }

    fn info(&self) -> RoomInfo {
        RoomInfo {
            room_id: self.room_id,
            name: self.name.clone(),
            player_count: self.sessions.len(),
            max_players: self.config.max_clients,
        }
    }

    fn dispose(&mut self) {
        self.receiver.close();
        self.sessions.clear();
        info!(room_id = %self.room_id, ticks = self.ticker.ticks_fired(), "room disposed");
    }
}

pub(crate) fn spawn_room(
    room_id: RoomId,
    name: Option<String>,
    config: RoomConfig,
    channel_size: usize,
) -> RoomHandle {
    let (tx, rx) = mpsc::channel(channel_size);
    let ticker = TickScheduler::new(
        TickConfig::with_rate(config.patch_rate_hz).keyframes(config.keyframe_interval),
    );

    let actor = RoomActor {
        room_id,
        name,
        config,
        state: TrackedState::new(),
        sessions: HashMap::new(),
        ticker,
        receiver: rx,
        ever_joined: false,
    };
    tokio::spawn(actor.run());

    RoomHandle {
        room_id,
        sender: tx,
    }
}
