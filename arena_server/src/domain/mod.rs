// Domain layer: arena entities, replication primitives and gameplay rules.

pub mod color;
pub mod entity;
pub mod errors;
pub mod registry;
pub mod replicated;
pub mod tuning;

pub use color::{Allocation, Color, ColorPool, DEFAULT_COLOR, PALETTE};
pub use entity::{
    Capabilities, Entity, EntityBody, EntityId, EntityKind, LifeState, Participant,
    ParticipantSnapshot, Projectile, ProjectileSnapshot, Role, Vec2,
};
pub use errors::{ArenaError, ValidationError};
pub use registry::EntityRegistry;
pub use replicated::{Change, ObserverId, Replica, Replicated};
