// The authoritative arena: every state mutation of a session goes through here.
//
// An `Arena` is owned by exactly one world task and driven one event at a time, which is the
// only serialization the session relies on. Directed commands are untrusted and re-validated
// against the registry on arrival; rejected commands are logged and dropped.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use super::combat::CombatResolver;
use super::projectiles::{CollisionOutcome, ExpiryTimer, ProjectileLifecycle};
use super::types::{ArenaStatus, Command, GameEvent, JoinAck, MatchState, ServerEvent, WorldUpdate};
use crate::domain::tuning::{ArenaBounds, ParticipantTuning, ProjectileTuning};
use crate::domain::{
    Allocation, ArenaError, Capabilities, ColorPool, DEFAULT_COLOR, EntityBody, EntityId,
    EntityKind, EntityRegistry, LifeState, Participant, ParticipantSnapshot, ProjectileSnapshot,
    ValidationError, Vec2,
};

/// Longest chat text accepted, in bytes.
pub const MAX_TEXT_BYTES: usize = 128;
const MAX_DISPLAY_NAME_CHARS: usize = 32;

/// When a disconnected participant's color goes back to the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColorReclaim {
    OnDisconnect,
    OnReset,
}

#[derive(Debug, Clone)]
pub struct ArenaSettings {
    pub participant: ParticipantTuning,
    pub projectile: ProjectileTuning,
    pub bounds: ArenaBounds,
    pub color_reclaim: ColorReclaim,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            participant: ParticipantTuning::default(),
            projectile: ProjectileTuning::default(),
            bounds: ArenaBounds::default(),
            color_reclaim: ColorReclaim::OnDisconnect,
        }
    }
}

pub struct Arena<T> {
    settings: ArenaSettings,
    registry: EntityRegistry,
    colors: ColorPool,
    combat: CombatResolver,
    projectiles: ProjectileLifecycle<T>,
    // Broadcasts produced by the current step, drained by the world task.
    events: Vec<ServerEvent>,
    tick: u64,
    rng: StdRng,
}

impl<T: ExpiryTimer> Arena<T> {
    pub fn new(settings: ArenaSettings, colors: ColorPool, timer: T) -> Self {
        Self::with_rng(settings, colors, timer, StdRng::from_entropy())
    }

    /// Deterministic spawn positions for tests.
    #[cfg(test)]
    pub fn with_seed(settings: ArenaSettings, colors: ColorPool, timer: T, seed: u64) -> Self {
        Self::with_rng(settings, colors, timer, StdRng::seed_from_u64(seed))
    }

    fn with_rng(settings: ArenaSettings, colors: ColorPool, timer: T, rng: StdRng) -> Self {
        let projectiles = ProjectileLifecycle::new(timer, settings.projectile);
        Self {
            settings,
            registry: EntityRegistry::new(),
            colors,
            combat: CombatResolver::new(),
            projectiles,
            events: Vec::new(),
            tick: 0,
            rng,
        }
    }

    /// Whole-session reset, run once before the first round.
    pub fn reset_session(&mut self) {
        self.colors.reset();
    }

    pub fn handle(&mut self, event: GameEvent, now: Duration) {
        match event {
            GameEvent::Join {
                display_name,
                reply,
            } => match self.join(display_name) {
                Ok(ack) => {
                    if reply.send(ack).is_err() {
                        // The connection went away mid-handshake; nobody will ever send Leave.
                        warn!(
                            participant_id = ack.participant_id,
                            "join reply dropped; removing participant"
                        );
                        self.leave(ack.participant_id);
                    }
                }
                // Dropping `reply` tells the connection the join was refused.
                Err(err) => warn!(error = %err, "join rejected"),
            },
            GameEvent::Command { sender, command } => {
                let result = match command {
                    Command::Leave => {
                        self.leave(sender);
                        Ok(())
                    }
                    Command::SubmitText { text } => self.submit_text(sender, text),
                    Command::Move { direction } => self.move_participant(sender, direction),
                    Command::Shoot { direction, speed } => {
                        self.shoot(sender, direction, speed, now).map(|_| ())
                    }
                };
                if let Err(err) = result {
                    log_rejection(sender, &err);
                }
            }
        }
    }

    /// Spawns a participant with full health and a pool color (or the default on exhaustion).
    pub fn join(&mut self, display_name: String) -> Result<JoinAck, ArenaError> {
        let display_name = validate_display_name(&display_name)?;
        let tuning = self.settings.participant;
        let capabilities = Capabilities::with_collider(tuning.radius);
        let position = self.random_position();

        let id = self.registry.spawn(
            None,
            capabilities,
            EntityBody::Participant(Participant::new(
                display_name,
                tuning.max_health,
                DEFAULT_COLOR,
                position,
            )),
        )?;
        self.events.push(ServerEvent::Spawned {
            entity_id: id,
            kind: EntityKind::Participant,
            owner_id: None,
        });

        let color = match self.colors.allocate(id) {
            Allocation::Assigned(color) => color,
            Allocation::Exhausted => {
                warn!(
                    participant_id = id,
                    error = %ArenaError::ResourceExhausted,
                    "falling back to default color"
                );
                DEFAULT_COLOR
            }
        };

        if let Some(entity) = self.registry.lookup_mut(id) {
            let authority = entity.authority;
            if let Some(participant) = entity.as_participant_mut() {
                participant.health.subscribe(move |previous: &i32, current: &i32| {
                    debug!(
                        participant_id = id,
                        previous = *previous,
                        current = *current,
                        "health changed"
                    );
                });
                if let Some(change) = participant.color.write(authority, color)? {
                    self.events.push(ServerEvent::ColorChanged {
                        participant_id: id,
                        change,
                    });
                }
            }
        }

        if capabilities.collider_radius.is_none() {
            warn!(
                participant_id = id,
                error = %ArenaError::MissingDependency("collider"),
                "participant cannot be hit"
            );
        }

        self.combat.register_spawn();
        info!(participant_id = id, ?color, "participant joined");
        Ok(JoinAck {
            participant_id: id,
            color,
        })
    }

    /// Disconnect: despawns the participant and its projectiles. Safe to call more than once.
    pub fn leave(&mut self, participant_id: EntityId) {
        for projectile_id in self.registry.projectiles_owned_by(participant_id) {
            let _ = self
                .projectiles
                .despawn(&mut self.registry, projectile_id, &mut self.events);
        }

        let removed =
            self.combat
                .remove_participant(&mut self.registry, participant_id, &mut self.events);

        if self.settings.color_reclaim == ColorReclaim::OnDisconnect {
            if let Some(color) = self.colors.release_owner(participant_id) {
                debug!(participant_id, ?color, "color reclaimed on disconnect");
            }
        }
        info!(participant_id, removed, "participant left");
    }

    pub fn submit_text(&mut self, sender: EntityId, text: String) -> Result<(), ArenaError> {
        if self.registry.participant(sender).is_none() {
            return Err(ValidationError::UnknownSender.into());
        }
        let text = text.trim_end();
        if text.is_empty() {
            return Err(ValidationError::EmptyText.into());
        }
        if text.len() > MAX_TEXT_BYTES {
            return Err(ValidationError::TextTooLong { len: text.len() }.into());
        }

        self.events.push(ServerEvent::EchoText {
            from: sender,
            text: text.to_string(),
        });
        Ok(())
    }

    /// Sets the sender's velocity from a move input clamped to unit length.
    pub fn move_participant(&mut self, sender: EntityId, direction: Vec2) -> Result<(), ArenaError> {
        if !direction.is_finite() {
            return Err(ValidationError::NonFiniteInput.into());
        }
        let speed = self.settings.participant.move_speed;
        let participant = self.alive_sender_mut(sender)?;
        participant.velocity = direction.clamp_length(1.0) * speed;
        Ok(())
    }

    /// Fires a projectile from the sender's position, subject to the shoot cooldown.
    pub fn shoot(
        &mut self,
        sender: EntityId,
        direction: Vec2,
        speed: f32,
        now: Duration,
    ) -> Result<EntityId, ArenaError> {
        if !direction.is_finite() || !speed.is_finite() {
            return Err(ValidationError::NonFiniteInput.into());
        }
        let direction = direction
            .normalized()
            .ok_or(ValidationError::ZeroDirection)?;
        let tuning = *self.projectiles.tuning();
        let speed = speed.clamp(tuning.min_speed, tuning.max_speed);
        let cooldown = self.settings.participant.shoot_cooldown;

        let participant = self.alive_sender_mut(sender)?;
        if let Some(last) = participant.last_shot_at {
            if now.saturating_sub(last) < cooldown {
                return Err(ValidationError::CooldownActive.into());
            }
        }
        participant.last_shot_at = Some(now);
        let position = participant.position;

        self.projectiles.spawn(
            &mut self.registry,
            sender,
            position,
            direction,
            speed,
            now,
            &mut self.events,
        )
    }

    /// Expiry callback from the timer; re-checks that the projectile is still registered.
    pub fn expire(&mut self, projectile_id: EntityId) {
        if let Err(err) = self
            .projectiles
            .on_expired(&mut self.registry, projectile_id, &mut self.events)
        {
            debug!(projectile_id, error = %err, "expiry ignored");
        }
    }

    /// Resolves one projectile/participant contact. Deaths complete on the next settle.
    pub fn collide(
        &mut self,
        projectile_id: EntityId,
        target_id: EntityId,
    ) -> Result<CollisionOutcome, ArenaError> {
        self.projectiles.on_collision(
            &mut self.registry,
            &mut self.combat,
            projectile_id,
            target_id,
            &mut self.events,
        )
    }

    pub fn settle_deaths(&mut self) -> Vec<EntityId> {
        self.combat.settle(&mut self.registry, &mut self.events)
    }

    /// One fixed simulation step: integrate, collide, settle deaths, snapshot.
    pub fn step(&mut self, dt: f32) -> WorldUpdate {
        let bounds = self.settings.bounds;
        for entity in self.registry.iter_mut() {
            match &mut entity.body {
                EntityBody::Participant(p) => {
                    if p.life == LifeState::Alive {
                        p.position = wrap(p.position + p.velocity * dt, bounds);
                    }
                }
                EntityBody::Projectile(p) => {
                    p.position = p.position + p.velocity * dt;
                }
            }
        }

        for (projectile_id, target_id) in self.detect_collisions() {
            match self.collide(projectile_id, target_id) {
                Ok(_) | Err(ArenaError::DuplicateTransition) => {}
                Err(err) => debug!(projectile_id, target_id, error = %err, "collision ignored"),
            }
        }
        self.settle_deaths();

        self.tick += 1;
        self.snapshot()
    }

    // Circle overlap between projectiles and alive, non-owner participants. Each projectile
    // hits at most one participant per step, the lowest id first.
    fn detect_collisions(&self) -> Vec<(EntityId, EntityId)> {
        let targets: Vec<(EntityId, Vec2, f32)> = self
            .registry
            .iter()
            .filter_map(|e| {
                let radius = e.capabilities.collider_radius?;
                let p = e.as_participant()?;
                p.is_alive().then_some((e.id, p.position, radius))
            })
            .collect();

        let mut hits = Vec::new();
        for entity in self.registry.iter() {
            let Some(projectile) = entity.as_projectile() else {
                continue;
            };
            let Some(radius) = entity.capabilities.collider_radius else {
                continue;
            };
            let hit = targets.iter().find(|(id, position, target_radius)| {
                let reach = radius + target_radius;
                *id != projectile.owner_id
                    && (*position - projectile.position).length_squared() <= reach * reach
            });
            if let Some((target_id, _, _)) = hit {
                hits.push((entity.id, *target_id));
            }
        }
        hits
    }

    pub fn snapshot(&self) -> WorldUpdate {
        WorldUpdate {
            tick: self.tick,
            participants: self
                .registry
                .participants()
                .map(|(id, p)| ParticipantSnapshot::new(id, p))
                .collect(),
            projectiles: self
                .registry
                .projectiles()
                .map(|(id, p)| ProjectileSnapshot::new(id, p))
                .collect(),
        }
    }

    pub fn drain_events(&mut self) -> Vec<ServerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn status(&self) -> ArenaStatus {
        self.combat.status()
    }

    pub fn match_state(&self) -> MatchState {
        self.combat.match_state()
    }

    pub fn alive_count(&self) -> usize {
        self.combat.alive_count()
    }

    pub fn registry(&self) -> &EntityRegistry {
        &self.registry
    }

    pub fn colors(&self) -> &ColorPool {
        &self.colors
    }

    fn alive_sender_mut(&mut self, sender: EntityId) -> Result<&mut Participant, ArenaError> {
        let participant = self
            .registry
            .participant_mut(sender)
            .ok_or(ValidationError::UnknownSender)?;
        if participant.life != LifeState::Alive {
            return Err(ValidationError::SenderNotAlive.into());
        }
        Ok(participant)
    }

    fn random_position(&mut self) -> Vec2 {
        let b = self.settings.bounds;
        Vec2::new(
            self.rng.gen_range(b.min_x..=b.max_x),
            self.rng.gen_range(b.min_y..=b.max_y),
        )
    }
}

fn wrap(mut position: Vec2, bounds: ArenaBounds) -> Vec2 {
    if position.x < bounds.min_x {
        position.x = bounds.max_x;
    } else if position.x > bounds.max_x {
        position.x = bounds.min_x;
    }

    if position.y < bounds.min_y {
        position.y = bounds.max_y;
    } else if position.y > bounds.max_y {
        position.y = bounds.min_y;
    }
    position
}

fn validate_display_name(value: &str) -> Result<String, ArenaError> {
    let name = value.trim();
    let len = name.chars().count();
    if !(1..=MAX_DISPLAY_NAME_CHARS).contains(&len) || name.chars().any(char::is_control) {
        return Err(ValidationError::InvalidDisplayName.into());
    }
    Ok(name.to_string())
}

fn log_rejection(sender: EntityId, err: &ArenaError) {
    match err {
        ArenaError::Validation(_) | ArenaError::DuplicateTransition => {
            debug!(sender, error = %err, "command dropped")
        }
        _ => warn!(sender, error = %err, "command failed"),
    }
}
