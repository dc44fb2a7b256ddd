//! Room registry and matchmaking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use rand::Rng;
use rand::distr::Alphanumeric;
use tether_protocol::{JoinOptions, RoomId, RoomListEntry, RoomSelector};
use tether_schema::SessionId;
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::room::spawn_room;
use crate::{RoomConfig, RoomError, RoomHandle, SessionReceiver, SessionSender};

static NEXT_ROOM_ID: AtomicU64 = AtomicU64::new(1);

/// Capacity of each room's command channel.
const COMMAND_CHANNEL_SIZE: usize = 256;

/// Length of generated session ids.
const SESSION_ID_LEN: usize = 9;

/// Name used when a client asks for a room by a blank name.
pub const DEFAULT_ROOM_NAME: &str = "default";

/// A successful join.
#[derive(Clone)]
pub struct JoinTicket {
    pub session_id: SessionId,
    pub room_id: RoomId,
    /// Handle for routing this session's intents without going through
    /// the manager.
    pub handle: RoomHandle,
}

struct RoomEntry {
    handle: RoomHandle,
    name: Option<String>,
}

/// Owns every live room and knows which session is in which room.
///
/// The manager is not itself shared; the server wraps it in a mutex, which
/// also serializes matchmaking so two quick-play joins can't both decide to
/// create a room.
pub struct RoomManager {
    config: RoomConfig,
    rooms: HashMap<RoomId, RoomEntry>,
    names: HashMap<String, RoomId>,
    sessions: HashMap<SessionId, RoomId>,
}

impl RoomManager {
    pub fn new(config: RoomConfig) -> Self {
        Self {
            config: config.validated(),
            rooms: HashMap::new(),
            names: HashMap::new(),
            sessions: HashMap::new(),
        }
    }

    pub fn config(&self) -> &RoomConfig {
        &self.config
    }

    /// A fresh outbound queue sized for this manager's rooms.
    pub fn session_channel(&self) -> (SessionSender, SessionReceiver) {
        mpsc::channel(self.config.outbound_capacity)
    }

    /// Resolves `selector` to a room, creating one if the selector allows,
    /// and joins a new session to it.
    ///
    /// - [`RoomSelector::Any`]: the first room (lowest id) with a free slot,
    ///   else a new unnamed room.
    /// - [`RoomSelector::Named`]: the room registered under that name,
    ///   created if absent. A blank name means [`DEFAULT_ROOM_NAME`].
    /// - [`RoomSelector::Id`]: exactly that room.
    ///
    /// # Errors
    ///
    /// [`RoomError::NotFound`] for an unknown id, and
    /// [`RoomError::CapacityExceeded`] when a named or id-selected room is
    /// full.
    pub async fn create_or_join(
        &mut self,
        selector: &RoomSelector,
        options: JoinOptions,
        sender: SessionSender,
    ) -> Result<JoinTicket, RoomError> {
        let session_id = self.new_session_id();

        let handle = match selector {
            RoomSelector::Any => self.join_any(&session_id, &options, &sender).await?,
            RoomSelector::Named { name } => {
                let name = match name.trim() {
                    "" => DEFAULT_ROOM_NAME,
                    trimmed => trimmed,
                };
                self.join_named(name, &session_id, &options, &sender).await?
            }
            RoomSelector::Id { room_id } => {
                self.join_by_id(*room_id, &session_id, &options, &sender)
                    .await?
            }
        };

        let room_id = handle.room_id();
        self.sessions.insert(session_id.clone(), room_id);
        Ok(JoinTicket {
            session_id,
            room_id,
            handle,
        })
    }

    async fn join_any(
        &mut self,
        session_id: &SessionId,
        options: &JoinOptions,
        sender: &SessionSender,
    ) -> Result<RoomHandle, RoomError> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort_by_key(|id| id.0);

        for room_id in ids {
            let Some(handle) = self.rooms.get(&room_id).map(|e| e.handle.clone()) else {
                continue;
            };
            match handle
                .join(session_id.clone(), options.clone(), sender.clone())
                .await
            {
                Ok(()) => return Ok(handle),
                Err(RoomError::CapacityExceeded(_)) => continue,
                Err(RoomError::Unavailable(_)) => self.forget_room(room_id),
                Err(e) => return Err(e),
            }
        }

        let handle = self.create_room(None);
        handle
            .join(session_id.clone(), options.clone(), sender.clone())
            .await?;
        Ok(handle)
    }

    async fn join_named(
        &mut self,
        name: &str,
        session_id: &SessionId,
        options: &JoinOptions,
        sender: &SessionSender,
    ) -> Result<RoomHandle, RoomError> {
        if let Some(room_id) = self.names.get(name).copied() {
            if let Some(handle) = self.rooms.get(&room_id).map(|e| e.handle.clone()) {
                match handle
                    .join(session_id.clone(), options.clone(), sender.clone())
                    .await
                {
                    Ok(()) => return Ok(handle),
                    // The room disposed itself; fall through and recreate it.
                    Err(RoomError::Unavailable(_)) => self.forget_room(room_id),
                    Err(e) => return Err(e),
                }
            }
        }

        let handle = self.create_room(Some(name.to_owned()));
        handle
            .join(session_id.clone(), options.clone(), sender.clone())
            .await?;
        Ok(handle)
    }

    async fn join_by_id(
        &mut self,
        room_id: RoomId,
        session_id: &SessionId,
        options: &JoinOptions,
        sender: &SessionSender,
    ) -> Result<RoomHandle, RoomError> {
        let handle = self
            .rooms
            .get(&room_id)
            .map(|e| e.handle.clone())
            .ok_or(RoomError::NotFound(room_id))?;
        match handle
            .join(session_id.clone(), options.clone(), sender.clone())
            .await
        {
            Ok(()) => Ok(handle),
            Err(RoomError::Unavailable(_)) => {
                self.forget_room(room_id);
                Err(RoomError::NotFound(room_id))
            }
            Err(e) => Err(e),
        }
    }

    /// Removes a session from its room.
    ///
    /// Idempotent: returns `Ok(false)` for a session that is not in any
    /// room. When the last session leaves, the room is dropped.
    pub async fn leave(&mut self, session_id: &SessionId) -> Result<bool, RoomError> {
        let Some(room_id) = self.sessions.remove(session_id) else {
            debug!(session = %session_id, "leave for unknown session ignored");
            return Ok(false);
        };
        let Some(handle) = self.rooms.get(&room_id).map(|e| e.handle.clone()) else {
            return Ok(false);
        };

        match handle.leave(session_id.clone()).await {
            Ok(outcome) => {
                if outcome.remaining == 0 {
                    self.forget_room(room_id);
                }
                Ok(outcome.removed)
            }
            Err(RoomError::Unavailable(_)) => {
                self.forget_room(room_id);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// The handle of the room `session_id` is in.
    pub fn handle_for(&self, session_id: &SessionId) -> Option<RoomHandle> {
        let room_id = self.sessions.get(session_id)?;
        self.rooms.get(room_id).map(|e| e.handle.clone())
    }

    pub fn room_of(&self, session_id: &SessionId) -> Option<RoomId> {
        self.sessions.get(session_id).copied()
    }

    pub fn handle(&self, room_id: RoomId) -> Option<RoomHandle> {
        self.rooms.get(&room_id).map(|e| e.handle.clone())
    }

    /// Lists rooms that still have a free slot, ordered by id.
    pub async fn list_rooms(&mut self) -> Vec<RoomListEntry> {
        let mut ids: Vec<RoomId> = self.rooms.keys().copied().collect();
        ids.sort_by_key(|id| id.0);

        let mut entries = Vec::with_capacity(ids.len());
        for room_id in ids {
            let Some(handle) = self.handle(room_id) else {
                continue;
            };
            match handle.get_info().await {
                Ok(info) if info.player_count < info.max_players => {
                    entries.push(RoomListEntry {
                        room_id: info.room_id,
                        name: info.name,
                        player_count: info.player_count,
                        max_players: info.max_players,
                    });
                }
                Ok(_) => {}
                Err(_) => self.forget_room(room_id),
            }
        }
        entries
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Stops every room.
    pub async fn shutdown_all(&mut self) {
        for (room_id, entry) in self.rooms.drain() {
            let _ = entry.handle.shutdown().await;
            debug!(%room_id, "room shut down");
        }
        self.names.clear();
        self.sessions.clear();
    }

    fn create_room(&mut self, name: Option<String>) -> RoomHandle {
        let room_id = RoomId(NEXT_ROOM_ID.fetch_add(1, Ordering::Relaxed));
        let handle = spawn_room(
            room_id,
            name.clone(),
            self.config.clone(),
            COMMAND_CHANNEL_SIZE,
        );
        if let Some(name) = &name {
            self.names.insert(name.clone(), room_id);
        }
        self.rooms.insert(
            room_id,
            RoomEntry {
                handle: handle.clone(),
                name,
            },
        );
        info!(%room_id, "room created");
        handle
    }

    fn forget_room(&mut self, room_id: RoomId) {
        let Some(entry) = self.rooms.remove(&room_id) else {
            return;
        };
        if let Some(name) = entry.name {
            if self.names.get(&name) == Some(&room_id) {
                self.names.remove(&name);
            }
        }
        self.sessions.retain(|_, rid| *rid != room_id);
        debug!(%room_id, "room dropped from registry");
    }

    fn new_session_id(&self) -> SessionId {
        loop {
            let id = generate_session_id();
            if !self.sessions.contains_key(&id) {
                return id;
            }
        }
    }
}

/// A random alphanumeric session id.
pub fn generate_session_id() -> SessionId {
    let id: String = rand::rng()
        .sample_iter(Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect();
    SessionId::new(id)
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new(RoomConfig::default())
    }
}
