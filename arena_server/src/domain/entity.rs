// Domain-level arena entities and the snapshots the world loop publishes.

use std::ops::{Add, Mul, Sub};
use std::time::Duration;

use crate::domain::color::Color;
use crate::domain::replicated::Replicated;

pub type EntityId = u64;

/// Which side of the session holds write access to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Authority,
    Observer,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length_squared(self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    pub fn length(self) -> f32 {
        self.x.hypot(self.y)
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    /// Unit vector with the same heading, or `None` for zero or non-finite input.
    pub fn normalized(self) -> Option<Vec2> {
        if !self.is_finite() {
            return None;
        }
        // Scaled into [-1, 1] first so huge and subnormal components keep their heading.
        let scale = self.x.abs().max(self.y.abs());
        if scale == 0.0 {
            return None;
        }
        let scaled = Vec2::new(self.x / scale, self.y / scale);
        let len = scaled.length();
        let unit = Vec2::new(scaled.x / len, scaled.y / len);
        (unit.is_finite() && unit.length() > 0.0).then_some(unit)
    }

    pub fn clamp_length(self, max: f32) -> Vec2 {
        match self.normalized() {
            Some(unit) if self.length() > max => unit * max,
            _ => self,
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f32) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Participant,
    Projectile,
}

/// Optional behaviour an entity was spawned with.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Capabilities {
    /// Collision radius; `None` leaves the entity inert for hit checks.
    pub collider_radius: Option<f32>,
}

impl Capabilities {
    pub fn with_collider(radius: f32) -> Self {
        let collider_radius = (radius.is_finite() && radius > 0.0).then_some(radius);
        Self { collider_radius }
    }
}

/// Combat lifecycle; `Dead` is terminal and the entity leaves the registry with it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifeState {
    Alive,
    Dying,
    Dead,
}

pub struct Participant {
    pub display_name: String,
    pub max_health: i32,
    pub health: Replicated<i32>,
    pub color: Replicated<Color>,
    pub position: Vec2,
    // Last accepted move input, already scaled to world units per second.
    pub velocity: Vec2,
    pub life: LifeState,
    // Authority clock reading of the last accepted shot.
    pub last_shot_at: Option<Duration>,
}

impl Participant {
    pub fn new(display_name: String, max_health: i32, color: Color, position: Vec2) -> Self {
        Self {
            display_name,
            max_health,
            health: Replicated::new(max_health),
            color: Replicated::new(color),
            position,
            velocity: Vec2::ZERO,
            life: LifeState::Alive,
            last_shot_at: None,
        }
    }

    pub fn current_health(&self) -> i32 {
        *self.health.read()
    }

    pub fn is_alive(&self) -> bool {
        self.current_health() > 0
    }
}

#[derive(Debug, Clone)]
pub struct Projectile {
    pub owner_id: EntityId,
    pub position: Vec2,
    pub velocity: Vec2,
    pub spawned_at: Duration,
    pub time_to_live: Duration,
    // Set by the single despawn gate; later triggers become no-ops.
    pub despawned: bool,
}

pub enum EntityBody {
    Participant(Participant),
    Projectile(Projectile),
}

/// Registry record: identity, ownership and capabilities around the gameplay body.
pub struct Entity {
    pub id: EntityId,
    pub owner_id: Option<EntityId>,
    pub authority: Role,
    pub capabilities: Capabilities,
    pub body: EntityBody,
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self.body {
            EntityBody::Participant(_) => EntityKind::Participant,
            EntityBody::Projectile(_) => EntityKind::Projectile,
        }
    }

    pub fn as_participant(&self) -> Option<&Participant> {
        match &self.body {
            EntityBody::Participant(p) => Some(p),
            EntityBody::Projectile(_) => None,
        }
    }

    pub fn as_participant_mut(&mut self) -> Option<&mut Participant> {
        match &mut self.body {
            EntityBody::Participant(p) => Some(p),
            EntityBody::Projectile(_) => None,
        }
    }

    pub fn as_projectile(&self) -> Option<&Projectile> {
        match &self.body {
            EntityBody::Projectile(p) => Some(p),
            EntityBody::Participant(_) => None,
        }
    }

    pub fn as_projectile_mut(&mut self) -> Option<&mut Projectile> {
        match &mut self.body {
            EntityBody::Projectile(p) => Some(p),
            EntityBody::Participant(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParticipantSnapshot {
    pub id: EntityId,
    pub x: f32,
    pub y: f32,
    pub hp: i32,
    pub color: Color,
    // Replication sequence of `hp` and `color` at snapshot time.
    pub health_seq: u64,
    pub color_seq: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectileSnapshot {
    pub id: EntityId,
    pub owner_id: EntityId,
    pub x: f32,
    pub y: f32,
}

impl ParticipantSnapshot {
    pub fn new(id: EntityId, p: &Participant) -> Self {
        Self {
            id,
            x: p.position.x,
            y: p.position.y,
            hp: p.current_health(),
            color: *p.color.read(),
            health_seq: p.health.seq(),
            color_seq: p.color.seq(),
        }
    }
}

impl ProjectileSnapshot {
    pub fn new(id: EntityId, p: &Projectile) -> Self {
        Self {
            id,
            owner_id: p.owner_id,
            x: p.position.x,
            y: p.position.y,
        }
    }
}
