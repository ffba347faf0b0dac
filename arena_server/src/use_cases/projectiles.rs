// Projectile lifecycle: spawn, scheduled expiry, collision, and a single despawn gate.
//
// Both exits (collision and expiry) go through `ProjectileLifecycle::despawn`, which checks
// the `despawned` flag and the registry before doing anything, so a projectile is destroyed at
// most once whichever trigger fires first.

use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use super::combat::CombatResolver;
use super::types::ServerEvent;
use crate::domain::tuning::ProjectileTuning;
use crate::domain::{
    ArenaError, Capabilities, EntityBody, EntityId, EntityKind, EntityRegistry, Projectile, Vec2,
};

/// Port for delayed, cancellable expiry callbacks keyed by entity id.
pub trait ExpiryTimer: Send {
    fn schedule(&mut self, id: EntityId, after: Duration);
    fn cancel(&mut self, id: EntityId);
}

/// Sleeps on the tokio runtime and reports expired ids back to the world task.
pub struct TokioExpiryTimer {
    expired_tx: mpsc::UnboundedSender<EntityId>,
    tasks: HashMap<EntityId, AbortHandle>,
}

impl TokioExpiryTimer {
    pub fn new(expired_tx: mpsc::UnboundedSender<EntityId>) -> Self {
        Self {
            expired_tx,
            tasks: HashMap::new(),
        }
    }

    #[cfg(test)]
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }
}

impl ExpiryTimer for TokioExpiryTimer {
    fn schedule(&mut self, id: EntityId, after: Duration) {
        let expired_tx = self.expired_tx.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(after).await;
            // The world task re-checks the registry; a closed channel means it is gone.
            let _ = expired_tx.send(id);
        });
        if let Some(previous) = self.tasks.insert(id, handle.abort_handle()) {
            previous.abort();
        }
    }

    fn cancel(&mut self, id: EntityId) {
        if let Some(handle) = self.tasks.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioExpiryTimer {
    fn drop(&mut self) {
        for (_, handle) in self.tasks.drain() {
            handle.abort();
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollisionOutcome {
    Hit,
    // Projectiles never damage the participant that fired them.
    OwnerImmune,
}

pub struct ProjectileLifecycle<T> {
    timer: T,
    tuning: ProjectileTuning,
}

impl<T: ExpiryTimer> ProjectileLifecycle<T> {
    pub fn new(timer: T, tuning: ProjectileTuning) -> Self {
        Self { timer, tuning }
    }

    pub fn tuning(&self) -> &ProjectileTuning {
        &self.tuning
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    /// Registers a projectile and schedules its expiry. `direction` must already be a unit vector.
    #[allow(clippy::too_many_arguments)]
    pub fn spawn(
        &mut self,
        registry: &mut EntityRegistry,
        owner_id: EntityId,
        position: Vec2,
        direction: Vec2,
        speed: f32,
        now: Duration,
        events: &mut Vec<ServerEvent>,
    ) -> Result<EntityId, ArenaError> {
        let capabilities = Capabilities::with_collider(self.tuning.radius);
        let projectile = Projectile {
            owner_id,
            position,
            velocity: direction * speed,
            spawned_at: now,
            time_to_live: self.tuning.time_to_live,
            despawned: false,
        };
        let id = registry.spawn(
            Some(owner_id),
            capabilities,
            EntityBody::Projectile(projectile),
        )?;

        if capabilities.collider_radius.is_none() {
            // Still flies and expires, it just never hits anything.
            warn!(
                projectile_id = id,
                error = %ArenaError::MissingDependency("collider"),
                "projectile spawned inert"
            );
        }

        self.timer.schedule(id, self.tuning.time_to_live);
        events.push(ServerEvent::Spawned {
            entity_id: id,
            kind: EntityKind::Projectile,
            owner_id: Some(owner_id),
        });
        debug!(projectile_id = id, owner_id, "projectile spawned");
        Ok(id)
    }

    /// Resolves a projectile touching a participant: owner immunity, damage, then despawn.
    pub fn on_collision(
        &mut self,
        registry: &mut EntityRegistry,
        combat: &mut CombatResolver,
        projectile_id: EntityId,
        target_id: EntityId,
        events: &mut Vec<ServerEvent>,
    ) -> Result<CollisionOutcome, ArenaError> {
        let entity = registry
            .lookup(projectile_id)
            .ok_or(ArenaError::DuplicateTransition)?;
        let projectile = entity
            .as_projectile()
            .ok_or(ArenaError::MissingDependency("projectile body"))?;
        if projectile.despawned {
            return Err(ArenaError::DuplicateTransition);
        }
        if entity.capabilities.collider_radius.is_none() {
            return Err(ArenaError::MissingDependency("collider"));
        }
        if projectile.owner_id == target_id {
            return Ok(CollisionOutcome::OwnerImmune);
        }
        if registry.participant(target_id).is_none() {
            return Err(ArenaError::MissingDependency("health"));
        }
        let owner_id = projectile.owner_id;

        match combat.take_damage(registry, target_id, self.tuning.damage, events) {
            Ok(_) => {
                debug!(
                    projectile_id,
                    shooter_id = owner_id,
                    victim_id = target_id,
                    "projectile hit"
                );
            }
            // The projectile still stops on a body that is already dying.
            Err(ArenaError::DuplicateTransition) => {}
            Err(other) => return Err(other),
        }

        self.despawn(registry, projectile_id, events)?;
        Ok(CollisionOutcome::Hit)
    }

    /// Expiry callback. Re-checks the registry; an already-gone projectile is a no-op.
    pub fn on_expired(
        &mut self,
        registry: &mut EntityRegistry,
        projectile_id: EntityId,
        events: &mut Vec<ServerEvent>,
    ) -> Result<(), ArenaError> {
        self.despawn(registry, projectile_id, events)?;
        debug!(projectile_id, "projectile expired");
        Ok(())
    }

    /// The single exit gate. Cancels the expiry task and removes the registry entry once.
    pub fn despawn(
        &mut self,
        registry: &mut EntityRegistry,
        projectile_id: EntityId,
        events: &mut Vec<ServerEvent>,
    ) -> Result<(), ArenaError> {
        let projectile = registry
            .lookup_mut(projectile_id)
            .and_then(|e| e.as_projectile_mut())
            .ok_or(ArenaError::DuplicateTransition)?;
        if projectile.despawned {
            return Err(ArenaError::DuplicateTransition);
        }
        projectile.despawned = true;

        self.timer.cancel(projectile_id);
        registry.despawn(projectile_id);
        events.push(ServerEvent::Despawned {
            entity_id: projectile_id,
        });
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::ManualTimer;
    use super::*;
    use crate::domain::{Color, Participant};

    struct Fixture {
        registry: EntityRegistry,
        combat: CombatResolver,
        lifecycle: ProjectileLifecycle<ManualTimer>,
        events: Vec<ServerEvent>,
    }

    impl Fixture {
        fn new(tuning: ProjectileTuning) -> Self {
            Self {
                registry: EntityRegistry::new(),
                combat: CombatResolver::new(),
                lifecycle: ProjectileLifecycle::new(ManualTimer::default(), tuning),
                events: Vec::new(),
            }
        }

        fn participant(&mut self) -> EntityId {
            let id = self
                .registry
                .spawn(
                    None,
                    Capabilities::with_collider(0.5),
                    EntityBody::Participant(Participant::new(
                        "Pilot".to_string(),
                        100,
                        Color::Green,
                        Vec2::ZERO,
                    )),
                )
                .expect("spawn");
            self.combat.register_spawn();
            id
        }

        fn shoot(&mut self, owner: EntityId) -> EntityId {
            self.lifecycle
                .spawn(
                    &mut self.registry,
                    owner,
                    Vec2::ZERO,
                    Vec2::new(1.0, 0.0),
                    5.0,
                    Duration::ZERO,
                    &mut self.events,
                )
                .expect("projectile spawn")
        }

        fn despawn_events(&self, id: EntityId) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, ServerEvent::Despawned { entity_id } if *entity_id == id))
                .count()
        }
    }

    #[test]
    fn when_projectile_spawns_then_expiry_is_scheduled_for_its_ttl() {
        let mut fx = Fixture::new(ProjectileTuning::default());
        let owner = fx.participant();
        let id = fx.shoot(owner);

        assert_eq!(
            fx.lifecycle.timer().scheduled,
            vec![(id, Duration::from_secs(5))]
        );
        let projectile = fx.registry.projectile(id).expect("registered");
        assert_eq!(projectile.owner_id, owner);
        assert_eq!(projectile.velocity, Vec2::new(5.0, 0.0));
    }

    #[test]
    fn when_collision_and_expiry_both_fire_then_projectile_is_destroyed_once() {
        let mut fx = Fixture::new(ProjectileTuning::default());
        let owner = fx.participant();
        let target = fx.participant();
        let id = fx.shoot(owner);

        let hit = fx.lifecycle.on_collision(
            &mut fx.registry,
            &mut fx.combat,
            id,
            target,
            &mut fx.events,
        );
        let expired = fx.lifecycle.on_expired(&mut fx.registry, id, &mut fx.events);

        assert_eq!(hit, Ok(CollisionOutcome::Hit));
        assert_eq!(expired, Err(ArenaError::DuplicateTransition));
        assert_eq!(fx.despawn_events(id), 1);
        assert_eq!(fx.lifecycle.timer().cancelled, vec![id]);
        assert_eq!(
            fx.registry.participant(target).map(|p| p.current_health()),
            Some(90)
        );
    }

    #[test]
    fn when_expiry_fires_first_then_late_collision_is_a_no_op() {
        let mut fx = Fixture::new(ProjectileTuning::default());
        let owner = fx.participant();
        let target = fx.participant();
        let id = fx.shoot(owner);

        fx.lifecycle
            .on_expired(&mut fx.registry, id, &mut fx.events)
            .expect("first expiry despawns");
        let late = fx.lifecycle.on_collision(
            &mut fx.registry,
            &mut fx.combat,
            id,
            target,
            &mut fx.events,
        );

        assert_eq!(late, Err(ArenaError::DuplicateTransition));
        assert_eq!(fx.despawn_events(id), 1);
        assert_eq!(
            fx.registry.participant(target).map(|p| p.current_health()),
            Some(100)
        );
    }

    #[test]
    fn when_projectile_touches_its_owner_then_owner_takes_no_damage() {
        let mut fx = Fixture::new(ProjectileTuning::default());
        let owner = fx.participant();
        let id = fx.shoot(owner);

        let outcome = fx.lifecycle.on_collision(
            &mut fx.registry,
            &mut fx.combat,
            id,
            owner,
            &mut fx.events,
        );

        assert_eq!(outcome, Ok(CollisionOutcome::OwnerImmune));
        assert!(fx.registry.contains(id));
        assert_eq!(
            fx.registry.participant(owner).map(|p| p.current_health()),
            Some(100)
        );
    }

    #[test]
    fn when_projectile_has_no_collider_then_it_is_inert_but_still_expires() {
        let mut fx = Fixture::new(ProjectileTuning {
            radius: 0.0,
            ..ProjectileTuning::default()
        });
        let owner = fx.participant();
        let target = fx.participant();
        let id = fx.shoot(owner);

        let hit = fx.lifecycle.on_collision(
            &mut fx.registry,
            &mut fx.combat,
            id,
            target,
            &mut fx.events,
        );
        assert_eq!(hit, Err(ArenaError::MissingDependency("collider")));

        fx.lifecycle
            .on_expired(&mut fx.registry, id, &mut fx.events)
            .expect("expiry despawns");
        assert!(!fx.registry.contains(id));
    }

    #[tokio::test(start_paused = true)]
    async fn when_ttl_elapses_then_tokio_timer_reports_the_id() {
        let (expired_tx, mut expired_rx) = mpsc::unbounded_channel();
        let mut timer = TokioExpiryTimer::new(expired_tx);

        timer.schedule(11, Duration::from_secs(5));
        timer.schedule(12, Duration::from_secs(5));
        timer.cancel(12);
        assert_eq!(timer.pending(), 1);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(expired_rx.recv().await, Some(11));

        tokio::time::advance(Duration::from_secs(10)).await;
        assert!(expired_rx.try_recv().is_err());
    }
}
