//! The client's copy of room state.

use tether_protocol::ServerMessage;
use tether_schema::{ChangeEvent, PlayerField, RoomState};
use tracing::{debug, trace};

/// Room state as last reported by the server.
///
/// Fed with the messages [`SessionClient::drain_updates`] returns, in order.
/// Each change is applied on its own, so one entry that doesn't match the
/// local view never stops the rest of a patch from landing.
///
/// [`SessionClient::drain_updates`]: crate::SessionClient::drain_updates
#[derive(Debug, Default)]
pub struct Replica {
    state: RoomState,
}

impl Replica {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> &RoomState {
        &self.state
    }

    /// Applies one server message and returns the changes it caused.
    pub fn apply(&mut self, message: ServerMessage) -> Vec<ChangeEvent> {
        match message {
            ServerMessage::StateSnapshot { state } => {
                trace!(players = state.len(), "applying snapshot");
                self.state.replace_with(state)
            }
            ServerMessage::StatePatch { patch } => {
                trace!(changes = patch.len(), "applying patch");
                self.state.apply_patch(&patch)
            }
            ServerMessage::SkinChanged { player_id, skin_id } => {
                match self.state.players.get_mut(&player_id) {
                    Some(player) if player.skin_id != skin_id => {
                        player.skin_id = skin_id;
                        vec![ChangeEvent::Updated {
                            id: player_id,
                            fields: vec![PlayerField::SkinId],
                        }]
                    }
                    Some(_) => Vec::new(),
                    None => {
                        debug!(session = %player_id, "skin notice for unknown player skipped");
                        Vec::new()
                    }
                }
            }
        }
    }

    /// Applies every message in order.
    pub fn apply_all(&mut self, messages: impl IntoIterator<Item = ServerMessage>) -> Vec<ChangeEvent> {
        messages
            .into_iter()
            .flat_map(|message| self.apply(message))
            .collect()
    }

    /// Forgets everything, as after a disconnect.
    pub fn clear(&mut self) {
        self.state = RoomState::new();
    }
}
