//! Shared state schema for Tether.
//!
//! This crate describes the replicated "shape" of a room: which entities
//! exist and which fields each of them carries. Both sides depend on it:
//!
//! - the **authority** mutates a [`TrackedState`], which remembers which
//!   fields changed since the last flush and turns them into a
//!   [`StatePatch`];
//! - the **client** applies snapshots and patches to a plain [`RoomState`]
//!   and receives [`ChangeEvent`]s (add/remove/update keyed by session id).
//!
//! ```text
//! TrackedState ──take_patch()──→ StatePatch ──wire──→ RoomState::apply_patch()
//!                                                         │
//!                                                         ▼
//!                                                   Vec<ChangeEvent>
//! ```
//!
//! Every field is independently observable. In particular the three rotation
//! components are three separate fields: an update that only turns the
//! player around the Y axis carries only `rotY`.

mod patch;
mod player;
mod spawn;
mod state;
mod tracker;
mod types;

pub use patch::{MapChange, PlayerField, PlayerPatch, StatePatch};
pub use player::{DEFAULT_DISPLAY_NAME, Player, SkinCatalog};
pub use spawn::{SPAWN_STEP_DEGREES, SpawnRing, spawn_point};
pub use state::{ChangeEvent, RoomState};
pub use tracker::TrackedState;
pub use types::{Axis, Rotation, SessionId, Transform, Vec3};
