//! Deterministic spawn placement.

use serde::{Deserialize, Serialize};

use crate::Vec3;

/// Angular step between consecutive spawn slots.
pub const SPAWN_STEP_DEGREES: f32 = 45.0;

/// The ring new players are placed on.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpawnRing {
    pub radius: f32,
    pub height: f32,
}

impl Default for SpawnRing {
    fn default() -> Self {
        Self {
            radius: 5.0,
            height: 0.0,
        }
    }
}

/// Spawn position for a player joining a room that already holds
/// `occupancy` players.
///
/// Slot `n` sits at `n * 45°` on the ring, so the ninth player lands on
/// the first player's slot again.
pub fn spawn_point(occupancy: usize, ring: &SpawnRing) -> Vec3 {
    let slot = (occupancy % 8) as f32;
    let angle = (slot * SPAWN_STEP_DEGREES).to_radians();
    Vec3::new(
        angle.cos() * ring.radius,
        ring.height,
        angle.sin() * ring.radius,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: Vec3, b: Vec3) -> bool {
        a.distance(b) < 1e-4
    }

    #[test]
    fn test_first_slot_is_on_positive_x() {
        let p = spawn_point(0, &SpawnRing::default());
        assert!(approx(p, Vec3::new(5.0, 0.0, 0.0)));
    }

    #[test]
    fn test_third_slot_is_quarter_turn() {
        let p = spawn_point(2, &SpawnRing::default());
        assert!(approx(p, Vec3::new(0.0, 0.0, 5.0)));
    }

    #[test]
    fn test_slots_wrap_after_full_circle() {
        let ring = SpawnRing::default();
        assert!(approx(spawn_point(8, &ring), spawn_point(0, &ring)));
    }

    #[test]
    fn test_every_slot_is_on_the_ring() {
        let ring = SpawnRing {
            radius: 3.0,
            height: 1.5,
        };
        for n in 0..8 {
            let p = spawn_point(n, &ring);
            assert!((p.horizontal_distance(Vec3::ZERO) - 3.0).abs() < 1e-4);
            assert_eq!(p.y, 1.5);
        }
    }
}
