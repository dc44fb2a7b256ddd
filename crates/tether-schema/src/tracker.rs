//! Authority-side state with per-field change tracking.

use std::collections::HashMap;

use crate::{Axis, MapChange, Player, PlayerPatch, RoomState, SessionId, StatePatch, Vec3};

/// What is pending for one id since the last flush.
#[derive(Debug, Clone)]
enum Pending {
    /// Not present at the last flush. The full value is read at flush time.
    Added,
    /// Present at the last flush, removed, then inserted again.
    Replaced,
    Removed,
    Updated(PlayerPatch),
}

/// A [`RoomState`] that remembers what changed since the last
/// [`take_patch`](Self::take_patch).
///
/// Changes to the same id coalesce between flushes:
///
/// | sequence              | flushed as           |
/// |-----------------------|----------------------|
/// | add, update…          | one `Add` (latest)   |
/// | add, remove           | nothing              |
/// | update, remove        | `Remove`             |
/// | remove, add           | `Add`                |
/// | remove, add, remove   | `Remove`             |
/// | update, update        | one merged `Update`  |
///
/// Writes that don't change a value are not recorded at all.
#[derive(Debug, Default)]
pub struct TrackedState {
    state: RoomState,
    pending: HashMap<SessionId, Pending>,
    /// First-touch order of ids in `pending`, so patches are deterministic.
    order: Vec<SessionId>,
}

impl TrackedState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &SessionId) -> Option<&Player> {
        self.state.players.get(id)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.state.players.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.state.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.players.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &SessionId> {
        self.state.players.keys()
    }

    /// Returns `true` if a flush would produce a non-empty patch.
    pub fn has_pending(&self) -> bool {
        !self.pending.is_empty()
    }

    /// A full copy of the current state, for snapshots.
    pub fn snapshot(&self) -> RoomState {
        self.state.clone()
    }

    /// Inserts or replaces a player. Returns the previous value, if any.
    pub fn insert(&mut self, id: SessionId, player: Player) -> Option<Player> {
        match self.state.players.get(&id) {
            Some(existing) => {
                let diff = PlayerPatch::diff(existing, &player);
                let previous = self.state.players.insert(id.clone(), player);
                self.record_update(id, diff);
                previous
            }
            None => {
                self.state.players.insert(id.clone(), player);
                let entry = match self.pending.get(&id) {
                    Some(Pending::Removed) => Pending::Replaced,
                    _ => Pending::Added,
                };
                self.touch(&id);
                self.pending.insert(id, entry);
                None
            }
        }
    }

    /// Removes a player. Returns its last value, or `None` if it wasn't present.
    pub fn remove(&mut self, id: &SessionId) -> Option<Player> {
        let removed = self.state.players.remove(id)?;
        match self.pending.get(id) {
            Some(Pending::Added) => {
                self.pending.remove(id);
                self.order.retain(|o| o != id);
            }
            _ => {
                self.touch(id);
                self.pending.insert(id.clone(), Pending::Removed);
            }
        }
        Some(removed)
    }

    /// Applies a partial update to an existing player.
    ///
    /// Returns the effective patch (possibly empty), or `None` if the id is
    /// unknown.
    pub fn apply(&mut self, id: &SessionId, patch: &PlayerPatch) -> Option<PlayerPatch> {
        let player = self.state.players.get_mut(id)?;
        let effective = patch.apply_to(player);
        self.record_update(id.clone(), effective.clone());
        Some(effective)
    }

    /// Sets the position. Returns `false` if the id is unknown.
    pub fn set_position(&mut self, id: &SessionId, position: Vec3) -> bool {
        let patch = PlayerPatch {
            x: Some(position.x),
            y: Some(position.y),
            z: Some(position.z),
            ..PlayerPatch::default()
        };
        self.apply(id, &patch).is_some()
    }

    /// Sets a single rotation component, leaving the other two untouched.
    pub fn set_rotation_component(&mut self, id: &SessionId, axis: Axis, value: f32) -> bool {
        let mut patch = PlayerPatch::default();
        match axis {
            Axis::X => patch.rot_x = Some(value),
            Axis::Y => patch.rot_y = Some(value),
            Axis::Z => patch.rot_z = Some(value),
        }
        self.apply(id, &patch).is_some()
    }

    pub fn set_skin(&mut self, id: &SessionId, skin_id: u32) -> bool {
        let patch = PlayerPatch {
            skin_id: Some(skin_id),
            ..PlayerPatch::default()
        };
        self.apply(id, &patch).is_some()
    }

    pub fn set_name(&mut self, id: &SessionId, name: impl Into<String>) -> bool {
        let patch = PlayerPatch {
            name: Some(name.into()),
            ..PlayerPatch::default()
        };
        self.apply(id, &patch).is_some()
    }

    /// Drains the pending changes into a patch, in first-touch order.
    pub fn take_patch(&mut self) -> StatePatch {
        let mut changes = Vec::with_capacity(self.order.len());
        let mut pending = std::mem::take(&mut self.pending);
        for id in self.order.drain(..) {
            let Some(entry) = pending.remove(&id) else {
                continue;
            };
            let change = match entry {
                Pending::Added | Pending::Replaced => match self.state.players.get(&id) {
                    Some(player) => MapChange::Add {
                        id,
                        player: player.clone(),
                    },
                    None => continue,
                },
                Pending::Removed => MapChange::Remove { id },
                Pending::Updated(patch) => MapChange::Update { id, patch },
            };
            changes.push(change);
        }
        StatePatch { changes }
    }

    fn record_update(&mut self, id: SessionId, effective: PlayerPatch) {
        if effective.is_empty() {
            return;
        }
        match self.pending.get_mut(&id) {
            // An add already carries the latest value; a removed id can't
            // be updated.
            Some(Pending::Added | Pending::Replaced | Pending::Removed) => {}
            Some(Pending::Updated(existing)) => existing.merge(effective),
            None => {
                self.touch(&id);
                self.pending.insert(id, Pending::Updated(effective));
            }
        }
    }

    fn touch(&mut self, id: &SessionId) {
        if !self.pending.contains_key(id) {
            self.order.push(id.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PlayerField;

    fn id(s: &str) -> SessionId {
        SessionId::from(s)
    }

    fn flushed(state: &mut TrackedState) -> StatePatch {
        let patch = state.take_patch();
        assert!(!state.has_pending());
        patch
    }

    #[test]
    fn test_insert_then_updates_flush_as_single_add_with_latest_value() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        state.set_position(&id("a"), Vec3::new(1.0, 0.0, 2.0));
        state.set_skin(&id("a"), 3);

        let patch = flushed(&mut state);
        assert_eq!(patch.len(), 1);
        match &patch.changes[0] {
            MapChange::Add { player, .. } => {
                assert_eq!(player.x, 1.0);
                assert_eq!(player.z, 2.0);
                assert_eq!(player.skin_id, 3);
            }
            other => panic!("expected add, got {other:?}"),
        }
    }

    #[test]
    fn test_insert_then_remove_flushes_nothing() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        state.remove(&id("a"));
        assert!(!state.has_pending());
        assert!(state.take_patch().is_empty());
    }

    #[test]
    fn test_update_then_remove_flushes_remove() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        state.set_skin(&id("a"), 2);
        state.remove(&id("a"));
        let patch = flushed(&mut state);
        assert_eq!(patch.changes, vec![MapChange::Remove { id: id("a") }]);
    }

    #[test]
    fn test_remove_then_reinsert_flushes_add() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        state.remove(&id("a"));
        state.insert(id("a"), Player::new("Again", 1, Vec3::ZERO));
        let patch = flushed(&mut state);
        assert_eq!(patch.len(), 1);
        assert!(matches!(&patch.changes[0], MapChange::Add { player, .. } if player.name == "Again"));
    }

    #[test]
    fn test_remove_reinsert_remove_flushes_remove() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        let mut peer = RoomState::default();
        peer.apply_patch(&flushed(&mut state));
        assert!(peer.players.contains_key(&id("a")));

        state.remove(&id("a"));
        state.insert(id("a"), Player::new("Again", 1, Vec3::ZERO));
        state.remove(&id("a"));
        let patch = flushed(&mut state);
        assert_eq!(patch.changes, vec![MapChange::Remove { id: id("a") }]);

        peer.apply_patch(&patch);
        assert!(!peer.players.contains_key(&id("a")));
    }

    #[test]
    fn test_reinserted_id_stays_add_through_updates() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        state.remove(&id("a"));
        state.insert(id("a"), Player::default());
        state.set_skin(&id("a"), 4);
        let patch = flushed(&mut state);
        assert_eq!(patch.len(), 1);
        assert!(matches!(&patch.changes[0], MapChange::Add { player, .. } if player.skin_id == 4));
    }

    #[test]
    fn test_single_rotation_axis_is_only_field_in_patch() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        state.set_rotation_component(&id("a"), Axis::Y, 90.0);
        let patch = flushed(&mut state);
        match &patch.changes[0] {
            MapChange::Update { patch, .. } => {
                assert_eq!(patch.fields(), vec![PlayerField::RotY]);
            }
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_unchanged_write_records_nothing() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        assert!(state.set_position(&id("a"), Vec3::ZERO));
        assert!(!state.has_pending());
    }

    #[test]
    fn test_updates_merge_between_flushes() {
        let mut state = TrackedState::new();
        state.insert(id("a"), Player::default());
        flushed(&mut state);

        state.set_position(&id("a"), Vec3::new(1.0, 0.0, 0.0));
        state.set_position(&id("a"), Vec3::new(2.0, 0.0, 0.0));
        let patch = flushed(&mut state);
        assert_eq!(patch.len(), 1);
        match &patch.changes[0] {
            MapChange::Update { patch, .. } => assert_eq!(patch.x, Some(2.0)),
            other => panic!("expected update, got {other:?}"),
        }
    }

    #[test]
    fn test_flush_preserves_first_touch_order() {
        let mut state = TrackedState::new();
        state.insert(id("b"), Player::default());
        state.insert(id("a"), Player::default());
        let patch = flushed(&mut state);
        let ids: Vec<_> = patch.changes.iter().map(|c| c.id().as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn test_unknown_id_mutations_return_false() {
        let mut state = TrackedState::new();
        assert!(!state.set_skin(&id("ghost"), 1));
        assert!(state.remove(&id("ghost")).is_none());
        assert!(!state.has_pending());
    }
}
