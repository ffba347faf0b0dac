// Per-connection view of the replicated state.
//
// Each connection holds replicas of the health and color of every participant it has heard
// about. Changes are applied in sequence order; stale or duplicate changes are dropped instead
// of being forwarded to the client.

use std::collections::HashMap;

use super::types::{Outcome, ServerEvent, WorldUpdate};
use crate::domain::{Change, Color, EntityId, Replica};

pub struct ObserverView {
    me: EntityId,
    health: HashMap<EntityId, Replica<i32>>,
    colors: HashMap<EntityId, Replica<Color>>,
    outcome: Option<Outcome>,
}

impl ObserverView {
    pub fn new(me: EntityId) -> Self {
        Self {
            me,
            health: HashMap::new(),
            colors: HashMap::new(),
            outcome: None,
        }
    }

    /// Applies one broadcast. Returns whether the event is meant for this connection.
    pub fn apply(&mut self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::Spawned { .. } | ServerEvent::EchoText { .. } => true,
            ServerEvent::Despawned { entity_id } => {
                self.health.remove(entity_id);
                self.colors.remove(entity_id);
                true
            }
            ServerEvent::HealthChanged {
                participant_id,
                change,
            } => apply_change(&mut self.health, *participant_id, change),
            ServerEvent::ColorChanged {
                participant_id,
                change,
            } => apply_change(&mut self.colors, *participant_id, change),
            ServerEvent::AnnounceResult { to, outcome } => {
                if *to != self.me || self.outcome.is_some() {
                    return false;
                }
                self.outcome = Some(*outcome);
                true
            }
        }
    }

    /// Catches replicas up from a snapshot, e.g. after missed broadcasts. Replicas only move
    /// forward: a snapshot older than what was already applied changes nothing.
    pub fn observe_snapshot(&mut self, update: &WorldUpdate) {
        for p in &update.participants {
            resync(&mut self.health, p.id, p.health_seq, p.hp);
            resync(&mut self.colors, p.id, p.color_seq, p.color);
        }
    }

    #[cfg(test)]
    pub fn health_of(&self, id: EntityId) -> Option<i32> {
        self.health.get(&id).map(|r| *r.read())
    }

    #[cfg(test)]
    pub fn color_of(&self, id: EntityId) -> Option<Color> {
        self.colors.get(&id).map(|r| *r.read())
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.outcome
    }
}

fn apply_change<T: Clone>(
    replicas: &mut HashMap<EntityId, Replica<T>>,
    id: EntityId,
    change: &Change<T>,
) -> bool {
    replicas
        .entry(id)
        .or_insert_with(|| Replica::new(change.seq.saturating_sub(1), change.previous.clone()))
        .apply(change)
}

fn resync<T: Clone + PartialEq>(
    replicas: &mut HashMap<EntityId, Replica<T>>,
    id: EntityId,
    seq: u64,
    value: T,
) {
    match replicas.get_mut(&id) {
        Some(replica) => {
            replica.resync(seq, value);
        }
        None => {
            replicas.insert(id, Replica::new(seq, value));
        }
    }
}
