// Authoritative index of live entities.
//
// The registry is the only place that knows whether an entity exists. Everything else looks
// entities up here by id instead of holding on to references or cached lists.

use std::collections::BTreeMap;

use crate::domain::entity::{
    Capabilities, Entity, EntityBody, EntityId, Participant, Projectile, Role,
};
use crate::domain::errors::ArenaError;

pub struct EntityRegistry {
    next_id: EntityId,
    // Ordered so snapshots and collision passes iterate deterministically.
    entities: BTreeMap<EntityId, Entity>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self {
            next_id: 1,
            entities: BTreeMap::new(),
        }
    }

    /// Registers a new entity under a fresh id. Ids are never reused within a session.
    pub fn spawn(
        &mut self,
        owner_id: Option<EntityId>,
        capabilities: Capabilities,
        body: EntityBody,
    ) -> Result<EntityId, ArenaError> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(ArenaError::IdSpaceExhausted)?;
        self.entities.insert(
            id,
            Entity {
                id,
                owner_id,
                authority: Role::Authority,
                capabilities,
                body,
            },
        );
        Ok(id)
    }

    /// Removes an entity. Removing an absent id is a no-op and returns `None`.
    pub fn despawn(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    pub fn lookup(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn lookup_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn participant(&self, id: EntityId) -> Option<&Participant> {
        self.lookup(id).and_then(Entity::as_participant)
    }

    pub fn participant_mut(&mut self, id: EntityId) -> Option<&mut Participant> {
        self.lookup_mut(id).and_then(Entity::as_participant_mut)
    }

    pub fn projectile(&self, id: EntityId) -> Option<&Projectile> {
        self.lookup(id).and_then(Entity::as_projectile)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    pub fn participants(&self) -> impl Iterator<Item = (EntityId, &Participant)> {
        self.entities
            .values()
            .filter_map(|e| e.as_participant().map(|p| (e.id, p)))
    }

    pub fn projectiles(&self) -> impl Iterator<Item = (EntityId, &Projectile)> {
        self.entities
            .values()
            .filter_map(|e| e.as_projectile().map(|p| (e.id, p)))
    }

    /// Ids of participants whose health is above zero, read from the live index.
    pub fn alive_participant_ids(&self) -> Vec<EntityId> {
        self.participants()
            .filter(|(_, p)| p.is_alive())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn projectiles_owned_by(&self, owner_id: EntityId) -> Vec<EntityId> {
        self.projectiles()
            .filter(|(_, p)| p.owner_id == owner_id)
            .map(|(id, _)| id)
            .collect()
    }

    #[cfg(test)]
    pub fn count_kind(&self, kind: crate::domain::entity::EntityKind) -> usize {
        self.entities.values().filter(|e| e.kind() == kind).count()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}
