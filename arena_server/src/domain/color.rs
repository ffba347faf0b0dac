// Unique participant colors drawn from a fixed palette.
//
// The pool is owned by the authority's world task and mutated through `&mut self` only, so two
// allocations can never interleave and hand out the same color.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::{debug, info, warn};

use crate::domain::entity::EntityId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Color {
    Red,
    Green,
    Blue,
    Yellow,
    Magenta,
    Cyan,
    White,
}

pub const PALETTE: [Color; 6] = [
    Color::Red,
    Color::Green,
    Color::Blue,
    Color::Yellow,
    Color::Magenta,
    Color::Cyan,
];

/// Substitute callers use when the pool is exhausted. Not part of the palette.
pub const DEFAULT_COLOR: Color = Color::White;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Allocation {
    Assigned(Color),
    Exhausted,
}

pub struct ColorPool {
    available: Vec<Color>,
    assigned: HashMap<EntityId, Color>,
    rng: StdRng,
}

impl ColorPool {
    pub fn new(palette: &[Color]) -> Self {
        Self::with_rng(palette, StdRng::from_entropy())
    }

    /// Deterministic pick order for tests and replays.
    pub fn with_seed(palette: &[Color], seed: u64) -> Self {
        Self::with_rng(palette, StdRng::seed_from_u64(seed))
    }

    fn with_rng(palette: &[Color], rng: StdRng) -> Self {
        let mut available: Vec<Color> = Vec::with_capacity(palette.len());
        for color in palette {
            if !available.contains(color) {
                available.push(*color);
            }
        }
        Self {
            available,
            assigned: HashMap::new(),
            rng,
        }
    }

    /// Removes a random available color and records it against `owner`.
    ///
    /// An owner that already holds a color gets the same color back.
    pub fn allocate(&mut self, owner: EntityId) -> Allocation {
        if let Some(color) = self.assigned.get(&owner) {
            return Allocation::Assigned(*color);
        }
        if self.available.is_empty() {
            warn!(owner, "no more unique colors available");
            return Allocation::Exhausted;
        }

        let index = self.rng.gen_range(0..self.available.len());
        let color = self.available.swap_remove(index);
        self.assigned.insert(owner, color);
        debug!(owner, ?color, left = self.available.len(), "assigned color");
        Allocation::Assigned(color)
    }

    /// Returns one assigned color to the pool. Releasing an unassigned color is a no-op.
    pub fn release(&mut self, color: Color) -> bool {
        let Some(owner) = self
            .assigned
            .iter()
            .find_map(|(owner, held)| (*held == color).then_some(*owner))
        else {
            return false;
        };
        self.assigned.remove(&owner);
        self.available.push(color);
        debug!(owner, ?color, "released color");
        true
    }

    /// Releases whatever `owner` holds, if anything.
    pub fn release_owner(&mut self, owner: EntityId) -> Option<Color> {
        let color = self.assigned.get(&owner).copied()?;
        self.release(color);
        Some(color)
    }

    /// Moves every assigned color back into the available set.
    pub fn reset(&mut self) {
        self.available
            .extend(self.assigned.drain().map(|(_, color)| color));
        info!(available = self.available.len(), "colors reset");
    }

    #[cfg(test)]
    pub fn color_of(&self, owner: EntityId) -> Option<Color> {
        self.assigned.get(&owner).copied()
    }

    pub fn available(&self) -> &[Color] {
        &self.available
    }

    #[cfg(test)]
    pub fn assigned_len(&self) -> usize {
        self.assigned.len()
    }

    #[cfg(test)]
    pub fn is_assigned(&self, color: Color) -> bool {
        self.assigned.values().any(|held| *held == color)
    }
}

impl Default for ColorPool {
    fn default() -> Self {
        Self::new(&PALETTE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn all_colors(pool: &ColorPool) -> HashSet<Color> {
        let mut colors: HashSet<Color> = pool.available().iter().copied().collect();
        colors.extend(pool.assigned.values().copied());
        colors
    }

    #[test]
    fn when_palette_has_six_colors_then_six_owners_get_distinct_colors() {
        let mut pool = ColorPool::with_seed(&PALETTE, 7);
        let mut seen = HashSet::new();
        for owner in 1..=6 {
            match pool.allocate(owner) {
                Allocation::Assigned(color) => assert!(seen.insert(color)),
                Allocation::Exhausted => panic!("pool exhausted early"),
            }
        }
        assert!(pool.available().is_empty());
        assert_eq!(pool.assigned_len(), 6);
    }

    #[test]
    fn when_pool_is_empty_then_allocate_returns_exhausted() {
        let mut pool = ColorPool::with_seed(&[Color::Red], 1);
        assert_eq!(pool.allocate(1), Allocation::Assigned(Color::Red));
        assert_eq!(pool.allocate(2), Allocation::Exhausted);
        assert_eq!(pool.color_of(2), None);
    }

    #[test]
    fn when_allocating_then_returned_color_was_not_already_assigned() {
        let mut pool = ColorPool::with_seed(&PALETTE, 42);
        for owner in 1..=6 {
            let held: HashSet<Color> = pool.assigned.values().copied().collect();
            if let Allocation::Assigned(color) = pool.allocate(owner) {
                assert!(!held.contains(&color));
                assert!(!pool.available().contains(&color));
            }
        }
    }

    #[test]
    fn when_colors_are_allocated_and_released_then_union_is_constant() {
        let mut pool = ColorPool::with_seed(&PALETTE, 3);
        let initial = all_colors(&pool);

        let Allocation::Assigned(a) = pool.allocate(1) else {
            panic!("expected a color");
        };
        pool.allocate(2);
        assert_eq!(all_colors(&pool), initial);

        assert!(pool.release(a));
        assert!(!pool.release(a));
        assert_eq!(all_colors(&pool), initial);
        assert_eq!(pool.color_of(1), None);
        assert!(!pool.is_assigned(a));
    }

    #[test]
    fn when_reset_then_pool_returns_to_initial_partition() {
        let mut pool = ColorPool::with_seed(&PALETTE, 9);
        for owner in 1..=4 {
            pool.allocate(owner);
        }

        pool.reset();

        let available: HashSet<Color> = pool.available().iter().copied().collect();
        assert_eq!(available, PALETTE.iter().copied().collect());
        assert_eq!(pool.available().len(), PALETTE.len());
        assert_eq!(pool.assigned_len(), 0);
    }

    #[test]
    fn when_owner_allocates_twice_then_it_keeps_its_color() {
        let mut pool = ColorPool::with_seed(&PALETTE, 11);
        let first = pool.allocate(5);
        let second = pool.allocate(5);
        assert_eq!(first, second);
        assert_eq!(pool.available().len(), PALETTE.len() - 1);
    }

    #[test]
    fn when_owner_is_released_then_its_color_is_available_again() {
        let mut pool = ColorPool::with_seed(&PALETTE, 13);
        let Allocation::Assigned(color) = pool.allocate(8) else {
            panic!("expected a color");
        };
        assert_eq!(pool.release_owner(8), Some(color));
        assert_eq!(pool.release_owner(8), None);
        assert!(pool.available().contains(&color));
    }
}
