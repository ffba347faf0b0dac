// Damage, death and win detection.
//
// Participants move `Alive -> Dying -> Dead`. Damage flips a participant to `Dying` the moment
// its health reaches zero; `CombatResolver::settle` then completes each death as a single
// step on the authority: decrement the alive counter, drop the registry entry, tell the loser,
// and check the win condition against the decremented count. Colors are not touched here: a
// dead participant keeps its color assigned until the session reset or its disconnect.

use std::collections::VecDeque;

use tracing::{debug, info};

use super::types::{ArenaStatus, MatchState, Outcome, ServerEvent};
use crate::domain::{ArenaError, EntityId, EntityRegistry, LifeState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamageOutcome {
    Applied { remaining: i32 },
    Dying,
}

#[derive(Debug)]
pub struct CombatResolver {
    // Participants counted alive: everyone registered that has not completed `Dead`.
    alive: usize,
    // Deaths waiting for `settle`, in the order they happened.
    dying: VecDeque<EntityId>,
    match_state: MatchState,
}

impl CombatResolver {
    pub fn new() -> Self {
        Self {
            alive: 0,
            dying: VecDeque::new(),
            match_state: MatchState::Waiting,
        }
    }

    pub fn alive_count(&self) -> usize {
        self.alive
    }

    pub fn match_state(&self) -> MatchState {
        self.match_state
    }

    pub fn status(&self) -> ArenaStatus {
        ArenaStatus {
            match_state: self.match_state,
            alive: self.alive,
        }
    }

    /// Counts a newly spawned participant. The match starts once two are alive.
    pub fn register_spawn(&mut self) {
        self.alive += 1;
        if self.match_state == MatchState::Waiting && self.alive >= 2 {
            self.match_state = MatchState::Running;
            info!(alive = self.alive, "match running");
        }
    }

    /// Applies damage to a participant. Authority only.
    ///
    /// `amount` is used as given; bounding it is the caller's job. Negative amounts heal, capped
    /// at max health. Damage to a dying, dead or absent participant is a `DuplicateTransition`.
    pub fn take_damage(
        &mut self,
        registry: &mut EntityRegistry,
        participant_id: EntityId,
        amount: i32,
        events: &mut Vec<ServerEvent>,
    ) -> Result<DamageOutcome, ArenaError> {
        let entity = registry
            .lookup_mut(participant_id)
            .ok_or(ArenaError::DuplicateTransition)?;
        let authority = entity.authority;
        let participant = entity
            .as_participant_mut()
            .ok_or(ArenaError::MissingDependency("health"))?;

        if participant.life != LifeState::Alive || !participant.is_alive() {
            return Err(ArenaError::DuplicateTransition);
        }

        let next = participant
            .current_health()
            .saturating_sub(amount)
            .clamp(0, participant.max_health);
        if let Some(change) = participant.health.write(authority, next)? {
            events.push(ServerEvent::HealthChanged {
                participant_id,
                change,
            });
        }
        info!(participant_id, amount, hp = next, "participant took damage");

        if next > 0 {
            return Ok(DamageOutcome::Applied { remaining: next });
        }

        participant.life = LifeState::Dying;
        self.dying.push_back(participant_id);
        Ok(DamageOutcome::Dying)
    }

    /// Completes every pending death. Returns the ids that reached `Dead`.
    pub fn settle(
        &mut self,
        registry: &mut EntityRegistry,
        events: &mut Vec<ServerEvent>,
    ) -> Vec<EntityId> {
        let mut dead = Vec::new();
        while let Some(id) = self.dying.pop_front() {
            // A disconnect may already have removed and uncounted it.
            let Some(mut entity) = registry.despawn(id) else {
                continue;
            };
            if let Some(participant) = entity.as_participant_mut() {
                participant.life = LifeState::Dead;
            }

            self.alive = self.alive.saturating_sub(1);
            info!(participant_id = id, alive = self.alive, "participant died");
            events.push(ServerEvent::AnnounceResult {
                to: id,
                outcome: Outcome::Lose,
            });
            events.push(ServerEvent::Despawned { entity_id: id });

            self.evaluate_win(registry, events);
            dead.push(id);
        }
        dead
    }

    /// Removes a participant that disconnected. Counts as leaving the match.
    pub fn remove_participant(
        &mut self,
        registry: &mut EntityRegistry,
        participant_id: EntityId,
        events: &mut Vec<ServerEvent>,
    ) -> bool {
        if registry.participant(participant_id).is_none() {
            return false;
        }
        registry.despawn(participant_id);
        // Alive and dying participants are both still counted.
        self.dying.retain(|id| *id != participant_id);
        self.alive = self.alive.saturating_sub(1);
        debug!(participant_id, alive = self.alive, "participant removed");
        events.push(ServerEvent::Despawned {
            entity_id: participant_id,
        });

        self.evaluate_win(registry, events);
        true
    }

    fn evaluate_win(&mut self, registry: &EntityRegistry, events: &mut Vec<ServerEvent>) {
        if self.match_state != MatchState::Running {
            return;
        }

        match self.alive {
            0 => {
                self.match_state = MatchState::Ended { winner: None };
                info!("match ended without a winner");
            }
            1 => {
                // Walk the live index, not a cached list: the last counted participant may be
                // dying in this same step, in which case the tie is decided on its own death.
                let survivors = registry.alive_participant_ids();
                let Some(winner) = survivors.first().copied() else {
                    return;
                };
                for id in &survivors {
                    events.push(ServerEvent::AnnounceResult {
                        to: *id,
                        outcome: Outcome::Win,
                    });
                }
                self.match_state = MatchState::Ended {
                    winner: Some(winner),
                };
                info!(winner, "match won");
            }
            _ => {}
        }
    }
}

impl Default for CombatResolver {
    fn default() -> Self {
        Self::new()
    }
}
