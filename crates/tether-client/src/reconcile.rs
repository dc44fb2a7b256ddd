//! The per-frame reconciliation loop.
//!
//! Each presentation tick, [`Reconciler::tick`] brings the local mirror (one
//! presentation object per replicated player) in line with the room state
//! the [`Replica`](crate::Replica) holds:
//!
//! 1. spawn objects for players the mirror hasn't seen,
//! 2. destroy objects whose player is gone,
//! 3. push the local player's predicted transform to the server,
//! 4. smooth remote players toward their authoritative position,
//! 5. apply each player's authoritative skin if it changed.
//!
//! The loop never fails as a whole. A spawn or skin application that the
//! presentation rejects is logged and tried again on the next tick.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tether_schema::{
    Player, RoomState, SessionId, SkinCatalog, SpawnRing, Transform, Vec3, spawn_point,
};
use tracing::{debug, trace, warn};

/// Whose object this is. Decided once, at spawn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityRole {
    /// The local player: driven by local prediction, reported to the server.
    Owned,
    /// Someone else: driven by replicated state.
    Remote,
}

/// Animation state derived from how a remote player is moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MotionFlags {
    pub moving: bool,
    pub airborne: bool,
}

/// The engine side: creates, moves and dresses visible objects.
pub trait Presentation {
    type Handle;
    type Error: std::fmt::Display;

    fn spawn(
        &mut self,
        id: &SessionId,
        role: EntityRole,
        position: Vec3,
    ) -> Result<Self::Handle, Self::Error>;

    fn destroy(&mut self, handle: Self::Handle);

    fn apply_skin(&mut self, handle: &Self::Handle, skin_id: u32) -> Result<(), Self::Error>;

    /// Places a remote object. `yaw` is in degrees around the Y axis, with
    /// 0 facing +Z.
    fn set_pose(&mut self, handle: &Self::Handle, position: Vec3, yaw: f32);

    fn set_motion(&mut self, handle: &Self::Handle, flags: MotionFlags);
}

/// Source of the local player's predicted transform.
pub trait LocalPrediction {
    /// `None` while the local player has no physical body yet.
    fn current_transform(&self) -> Option<Transform>;
}

/// Where the local player's transform goes. Implementations rate-limit.
pub trait IntentSink {
    /// Returns `true` if the update was actually sent.
    fn send_position(&mut self, transform: Transform) -> bool;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Exponential smoothing rate (per second) toward the authoritative
    /// position.
    pub smoothing_rate: f32,
    /// Horizontal gap above which a remote player counts as moving.
    pub move_threshold: f32,
    /// Vertical gap above which a remote player counts as airborne.
    pub vertical_threshold: f32,
    /// Height above which a remote player counts as airborne regardless of
    /// vertical motion.
    pub ground_height: f32,
    pub skin_catalog: SkinCatalog,
    /// Placeholder positions for newly spawned objects.
    pub spawn: SpawnRing,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            smoothing_rate: 15.0,
            move_threshold: 0.02,
            vertical_threshold: 0.1,
            ground_height: 0.6,
            skin_catalog: SkinCatalog::default(),
            spawn: SpawnRing {
                radius: 5.0,
                height: 1.0,
            },
        }
    }
}

impl ReconcileConfig {
    /// Blend factor for one tick of `dt` seconds. Frame-rate independent:
    /// two ticks of `dt / 2` cover the same fraction of the gap as one of
    /// `dt`.
    pub fn smoothing_alpha(&self, dt: f32) -> f32 {
        if dt <= 0.0 {
            return 0.0;
        }
        1.0 - (-self.smoothing_rate * dt).exp()
    }

    /// Classifies motion from the rendered position toward `target`.
    pub fn classify(&self, rendered: Vec3, target: Vec3) -> MotionFlags {
        MotionFlags {
            moving: rendered.horizontal_distance(target) > self.move_threshold,
            airborne: (target.y - rendered.y).abs() > self.vertical_threshold
                || target.y > self.ground_height,
        }
    }
}

/// One presentation object in the mirror.
#[derive(Debug)]
pub struct MirrorEntry<H> {
    pub handle: H,
    pub role: EntityRole,
    /// Where the object is currently drawn.
    pub rendered: Vec3,
    pub yaw: f32,
    /// The skin last applied successfully. `None` until the first one.
    pub applied_skin: Option<u32>,
    pub motion: MotionFlags,
}

/// What one tick did, for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub spawned: Vec<SessionId>,
    pub despawned: Vec<SessionId>,
    /// Ids whose spawn failed this tick and will be retried.
    pub spawn_failures: Vec<SessionId>,
    pub skin_failures: Vec<SessionId>,
    pub position_sent: bool,
}

/// Owns the local mirror and keeps it converged with replicated state.
pub struct Reconciler<P: Presentation> {
    config: ReconcileConfig,
    local_id: SessionId,
    mirror: HashMap<SessionId, MirrorEntry<P::Handle>>,
}

impl<P: Presentation> Reconciler<P> {
    /// A reconciler for the session `local_id`, as returned by the join.
    pub fn new(config: ReconcileConfig, local_id: SessionId) -> Self {
        Self {
            config,
            local_id,
            mirror: HashMap::new(),
        }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    pub fn local_id(&self) -> &SessionId {
        &self.local_id
    }

    pub fn entry(&self, id: &SessionId) -> Option<&MirrorEntry<P::Handle>> {
        self.mirror.get(id)
    }

    pub fn len(&self) -> usize {
        self.mirror.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mirror.is_empty()
    }

    /// Runs one reconciliation pass. `dt` is the frame time in seconds.
    pub fn tick(
        &mut self,
        state: &RoomState,
        dt: f32,
        presentation: &mut P,
        prediction: &impl LocalPrediction,
        intents: &mut impl IntentSink,
    ) -> TickReport {
        let mut report = TickReport::default();

        self.spawn_new(state, presentation, &mut report);
        self.despawn_gone(state, presentation, &mut report);

        if let Some(transform) = prediction.current_transform() {
            if let Some(own) = self.mirror.get_mut(&self.local_id) {
                own.rendered = transform.position;
                report.position_sent = intents.send_position(transform);
            }
        }

        let alpha = self.config.smoothing_alpha(dt);
        for (id, entry) in &mut self.mirror {
            let Some(player) = state.get(id) else {
                continue;
            };
            if entry.role == EntityRole::Remote {
                follow(&self.config, entry, player, alpha, presentation);
            }

            let skin = self.config.skin_catalog.clamp(i64::from(player.skin_id));
            if entry.applied_skin != Some(skin) {
                match presentation.apply_skin(&entry.handle, skin) {
                    Ok(()) => {
                        entry.applied_skin = Some(skin);
                        debug!(session = %id, skin, "skin applied");
                    }
                    Err(e) => {
                        warn!(session = %id, skin, error = %e, "skin apply failed, will retry");
                        report.skin_failures.push(id.clone());
                    }
                }
            }
        }

        report
    }

    /// Destroys every presentation object, as on disconnect.
    pub fn clear(&mut self, presentation: &mut P) {
        for (id, entry) in self.mirror.drain() {
            presentation.destroy(entry.handle);
            trace!(session = %id, "destroyed on clear");
        }
    }

    fn spawn_new(&mut self, state: &RoomState, presentation: &mut P, report: &mut TickReport) {
        let mut unseen: Vec<&SessionId> = state
            .players
            .keys()
            .filter(|id| !self.mirror.contains_key(*id))
            .collect();
        unseen.sort();

        for id in unseen {
            let role = if *id == self.local_id {
                EntityRole::Owned
            } else {
                EntityRole::Remote
            };
            let position = spawn_point(self.mirror.len(), &self.config.spawn);
            match presentation.spawn(id, role, position) {
                Ok(handle) => {
                    debug!(session = %id, ?role, "spawned");
                    self.mirror.insert(
                        id.clone(),
                        MirrorEntry {
                            handle,
                            role,
                            rendered: position,
                            yaw: 0.0,
                            applied_skin: None,
                            motion: MotionFlags::default(),
                        },
                    );
                    report.spawned.push(id.clone());
                }
                Err(e) => {
                    warn!(session = %id, error = %e, "spawn failed, will retry");
                    report.spawn_failures.push(id.clone());
                }
            }
        }
    }

    fn despawn_gone(&mut self, state: &RoomState, presentation: &mut P, report: &mut TickReport) {
        let mut gone: Vec<SessionId> = self
            .mirror
            .keys()
            .filter(|id| state.get(id).is_none())
            .cloned()
            .collect();
        gone.sort();

        for id in gone {
            if let Some(entry) = self.mirror.remove(&id) {
                presentation.destroy(entry.handle);
                debug!(session = %id, "despawned");
                report.despawned.push(id);
            }
        }
    }
}

/// Moves a remote entry one step toward its authoritative position.
fn follow<P: Presentation>(
    config: &ReconcileConfig,
    entry: &mut MirrorEntry<P::Handle>,
    player: &Player,
    alpha: f32,
    presentation: &mut P,
) {
    let target = player.position();
    let flags = config.classify(entry.rendered, target);
    if flags != entry.motion {
        presentation.set_motion(&entry.handle, flags);
        entry.motion = flags;
    }

    if flags.moving {
        let heading = (target.x - entry.rendered.x).atan2(target.z - entry.rendered.z);
        entry.yaw = lerp_angle(entry.yaw, heading.to_degrees(), alpha);
    }
    entry.rendered = entry.rendered.lerp(target, alpha);
    presentation.set_pose(&entry.handle, entry.rendered, entry.yaw);
}

/// Interpolates between two angles in degrees along the shorter arc.
fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    let delta = (to - from + 180.0).rem_euclid(360.0) - 180.0;
    let angle = from + delta * t;
    (angle + 180.0).rem_euclid(360.0) - 180.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-3
    }

    #[test]
    fn test_smoothing_alpha_is_frame_rate_independent() {
        let config = ReconcileConfig::default();
        let one = config.smoothing_alpha(0.1);
        let half = config.smoothing_alpha(0.05);
        // Two half steps leave (1 - half)^2 of the gap; one full step 1 - one.
        assert!(approx(1.0 - one, (1.0 - half) * (1.0 - half)));
        assert_eq!(config.smoothing_alpha(0.0), 0.0);
    }

    #[test]
    fn test_classify_thresholds() {
        let config = ReconcileConfig::default();
        let here = Vec3::new(0.0, 0.0, 0.0);

        assert_eq!(config.classify(here, here), MotionFlags::default());
        assert!(!config.classify(here, Vec3::new(0.01, 0.0, 0.0)).moving);
        assert!(config.classify(here, Vec3::new(0.5, 0.0, 0.0)).moving);
        assert!(config.classify(here, Vec3::new(0.0, 0.2, 0.0)).airborne);
        // High but level: still airborne.
        let high = Vec3::new(0.0, 0.7, 0.0);
        assert!(config.classify(high, high).airborne);
    }

    #[test]
    fn test_lerp_angle_takes_short_way_round() {
        // 170 -> -170 crosses the seam: 20 degrees, not 340.
        assert!(approx(lerp_angle(170.0, -170.0, 0.5).abs(), 180.0));
        assert!(approx(lerp_angle(0.0, 90.0, 0.5), 45.0));
        assert!(approx(lerp_angle(-10.0, 10.0, 1.0), 10.0));
    }
}
