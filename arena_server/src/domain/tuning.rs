// Gameplay tuning for participants, projectiles and the arena itself.
//
// Keep this separate from runtime/server configuration (tick rates, buffer sizes, etc.).

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct ParticipantTuning {
    /// Health a participant spawns with; damage never pushes it above this.
    pub max_health: i32,

    /// World units per second at full move input.
    pub move_speed: f32,

    /// World-space collision radius (server-side hit checks).
    pub radius: f32,

    /// Minimum time between two accepted shots from the same participant.
    pub shoot_cooldown: Duration,
}

impl Default for ParticipantTuning {
    fn default() -> Self {
        Self {
            max_health: 100,
            move_speed: 1.0,
            radius: 0.5,
            shoot_cooldown: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ProjectileTuning {
    /// Slowest speed a shoot command may request.
    pub min_speed: f32,

    /// Fastest speed a shoot command may request.
    pub max_speed: f32,

    /// Lifetime before the projectile despawns on its own.
    pub time_to_live: Duration,

    /// World-space collision radius. Zero leaves projectiles without a collider.
    pub radius: f32,

    /// Health removed from a participant on hit.
    pub damage: i32,
}

impl Default for ProjectileTuning {
    fn default() -> Self {
        Self {
            min_speed: 5.0,
            max_speed: 5.0,
            time_to_live: Duration::from_secs(5),
            radius: 0.1,
            damage: 10,
        }
    }
}

/// Playable area; positions wrap around at the edges.
#[derive(Debug, Clone, Copy)]
pub struct ArenaBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl Default for ArenaBounds {
    fn default() -> Self {
        Self {
            min_x: -9.0,
            max_x: 9.0,
            min_y: -5.0,
            max_y: 5.0,
        }
    }
}
