//! The plain (untracked) room state and its change events.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{MapChange, Player, PlayerField, PlayerPatch, SessionId, StatePatch};

/// A change observed while applying a snapshot or patch.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    /// A player appeared.
    Added { id: SessionId },
    /// A player disappeared.
    Removed { id: SessionId },
    /// Some fields of an existing player changed value.
    Updated {
        id: SessionId,
        fields: Vec<PlayerField>,
    },
}

impl ChangeEvent {
    pub fn id(&self) -> &SessionId {
        match self {
            Self::Added { id } | Self::Removed { id } | Self::Updated { id, .. } => id,
        }
    }
}

/// The replicated state of one room: a map of players keyed by session id.
///
/// This is the value that travels in full snapshots. The authority wraps
/// it in a [`TrackedState`](crate::TrackedState); replicas hold it bare.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoomState {
    #[serde(default)]
    pub players: HashMap<SessionId, Player>,
}

impl RoomState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<&Player> {
        self.players.get(id)
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }

    /// Applies an incremental patch, returning what actually changed.
    ///
    /// Changes that don't match the local view are tolerated: an update or
    /// removal for an unknown id is skipped, and an add for a known id
    /// replaces the value and reports the differing fields.
    pub fn apply_patch(&mut self, patch: &StatePatch) -> Vec<ChangeEvent> {
        let mut events = Vec::with_capacity(patch.changes.len());
        for change in &patch.changes {
            match change {
                MapChange::Add { id, player } => match self.players.get_mut(id) {
                    Some(existing) => {
                        let fields = PlayerPatch::diff(existing, player).fields();
                        *existing = player.clone();
                        if !fields.is_empty() {
                            events.push(ChangeEvent::Updated {
                                id: id.clone(),
                                fields,
                            });
                        }
                    }
                    None => {
                        self.players.insert(id.clone(), player.clone());
                        events.push(ChangeEvent::Added { id: id.clone() });
                    }
                },
                MapChange::Remove { id } => {
                    if self.players.remove(id).is_some() {
                        events.push(ChangeEvent::Removed { id: id.clone() });
                    } else {
                        debug!(session = %id, "remove for unknown player skipped");
                    }
                }
                MapChange::Update { id, patch } => match self.players.get_mut(id) {
                    Some(player) => {
                        let fields = patch.apply_to(player).fields();
                        if !fields.is_empty() {
                            events.push(ChangeEvent::Updated {
                                id: id.clone(),
                                fields,
                            });
                        }
                    }
                    None => {
                        debug!(session = %id, "update for unknown player skipped");
                    }
                },
            }
        }
        events
    }

    /// Replaces the whole state with `snapshot`, returning the difference
    /// as change events (removals first, then additions and updates).
    pub fn replace_with(&mut self, snapshot: RoomState) -> Vec<ChangeEvent> {
        let mut events = Vec::new();

        let mut gone: Vec<SessionId> = self
            .players
            .keys()
            .filter(|id| !snapshot.players.contains_key(*id))
            .cloned()
            .collect();
        gone.sort();
        for id in gone {
            self.players.remove(&id);
            events.push(ChangeEvent::Removed { id });
        }

        let mut incoming: Vec<(SessionId, Player)> = snapshot.players.into_iter().collect();
        incoming.sort_by(|a, b| a.0.cmp(&b.0));
        for (id, player) in incoming {
            match self.players.get_mut(&id) {
                Some(existing) => {
                    let fields = PlayerPatch::diff(existing, &player).fields();
                    *existing = player;
                    if !fields.is_empty() {
                        events.push(ChangeEvent::Updated { id, fields });
                    }
                }
                None => {
                    self.players.insert(id.clone(), player);
                    events.push(ChangeEvent::Added { id });
                }
            }
        }
        events
    }
}
