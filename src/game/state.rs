//! Simulation State
//!
//! The full deterministic world at one tick. Every collection is a `BTreeMap`
//! so iteration order is fixed, and the RNG travels with the state so a
//! restored copy continues exactly where the original left off.

use std::collections::BTreeMap;
use serde::{Serialize, Deserialize};

use crate::core::fixed::{SPAWN_SPACING, Fixed};
use crate::core::vec2::FixedVec2;
use crate::core::rng::DeterministicRng;
use crate::core::hash::{StateHash, StateHasher, compute_state_hash};
use crate::game::input::{ParticipantId, Tick};

/// Health every participant starts with.
pub const START_HEALTH: u32 = 100;

/// Spawn points per row of the spawn grid.
const SPAWN_COLUMNS: u32 = 8;

/// Errors decoding or encoding a state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    /// bincode failure
    #[error("State codec error: {0}")]
    Codec(#[from] bincode::Error),
}

// =============================================================================
// PARTICIPANT STATE
// =============================================================================

/// Simulated body of one participant.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantState {
    /// Participant
    pub id: ParticipantId,
    /// Position (fixed-point)
    pub position: FixedVec2,
    /// Displacement applied on the last tick
    pub velocity: FixedVec2,
    /// Remaining health; zero means knocked out
    pub health: u32,
    /// Collected item value
    pub score: u32,
}

impl ParticipantState {
    /// Fresh participant at a position.
    pub fn new(id: ParticipantId, position: FixedVec2) -> Self {
        Self {
            id,
            position,
            velocity: FixedVec2::ZERO,
            health: START_HEALTH,
            score: 0,
        }
    }

    /// Still able to move and collect.
    #[inline]
    pub fn is_active(&self) -> bool {
        self.health > 0
    }

    fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_vec2(self.position);
        hasher.update_vec2(self.velocity);
        hasher.update_u32(self.health);
        hasher.update_u32(self.score);
    }
}

// =============================================================================
// ITEMS
// =============================================================================

/// A collectible world object.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemState {
    /// Unique id within the state
    pub id: u32,
    /// Position (fixed-point)
    pub position: FixedVec2,
    /// Score awarded on pickup
    pub value: u32,
}

// =============================================================================
// SIMULATION STATE
// =============================================================================

/// Complete world snapshot.
///
/// `Clone` is a deep copy: two clones share nothing, so a snapshot can never
/// observe later mutation of the working state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationState {
    /// Tick this state represents
    pub tick: Tick,
    /// Carried generator; the only source of randomness in a step
    pub rng: DeterministicRng,
    /// Participants by id
    pub participants: BTreeMap<ParticipantId, ParticipantState>,
    /// Live items by id
    pub items: BTreeMap<u32, ItemState>,
    /// Next item id to assign
    pub next_item_id: u32,
}

impl SimulationState {
    /// Initial state (tick 0) for a seed.
    pub fn new(seed: u64) -> Self {
        Self {
            tick: 0,
            rng: DeterministicRng::new(seed),
            participants: BTreeMap::new(),
            items: BTreeMap::new(),
            next_item_id: 1,
        }
    }

    /// Deterministic spawn point for a participant id.
    ///
    /// Ids fill an 8 by 8 grid centred on the origin, then wrap.
    pub fn spawn_point(id: ParticipantId) -> FixedVec2 {
        let slot = id.0.saturating_sub(1) % (SPAWN_COLUMNS * SPAWN_COLUMNS);
        let col = (slot % SPAWN_COLUMNS) as i32 - (SPAWN_COLUMNS / 2) as i32;
        let row = (slot / SPAWN_COLUMNS) as i32 - (SPAWN_COLUMNS / 2) as i32;
        FixedVec2::new(col * SPAWN_SPACING, row * SPAWN_SPACING)
    }

    /// Add a participant at its spawn point. Returns false if already present.
    pub fn add_participant(&mut self, id: ParticipantId) -> bool {
        if self.participants.contains_key(&id) {
            return false;
        }
        self.participants
            .insert(id, ParticipantState::new(id, Self::spawn_point(id)));
        true
    }

    /// Look up a participant.
    pub fn participant(&self, id: ParticipantId) -> Option<&ParticipantState> {
        self.participants.get(&id)
    }

    /// Place a new item and return its id.
    pub fn spawn_item(&mut self, position: FixedVec2, value: u32) -> u32 {
        let id = self.next_item_id;
        self.next_item_id = self.next_item_id.wrapping_add(1);
        self.items.insert(id, ItemState { id, position, value });
        id
    }

    /// Position of a participant, if present.
    pub fn position_of(&self, id: ParticipantId) -> Option<FixedVec2> {
        self.participant(id).map(|p| p.position)
    }

    /// Sum of all scores; handy for logging.
    pub fn total_score(&self) -> u32 {
        self.participants.values().map(|p| p.score).sum()
    }

    /// SHA-256 over every field in fixed order.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.rng.state(), |hasher| {
            hasher.update_u32(self.participants.len() as u32);
            for participant in self.participants.values() {
                participant.hash_into(hasher);
            }

            hasher.update_u32(self.items.len() as u32);
            for item in self.items.values() {
                hasher.update_u32(item.id);
                hasher.update_vec2(item.position);
                hasher.update_u32(item.value);
            }

            hasher.update_u32(self.next_item_id);
        })
    }

    /// Lossless binary encoding.
    pub fn to_bytes(&self) -> Result<Vec<u8>, StateError> {
        Ok(bincode::serialize(self)?)
    }

    /// Decode a state produced by [`to_bytes`](Self::to_bytes).
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StateError> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Half-extent check used by tests and debug assertions.
pub fn within_bounds(position: FixedVec2, half_extent: Fixed) -> bool {
    position.x.abs() <= half_extent && position.y.abs() <= half_extent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::ARENA_HALF_EXTENT;

    #[test]
    fn test_spawn_points_distinct_and_in_bounds() {
        let points: Vec<FixedVec2> = (1..=64)
            .map(|i| SimulationState::spawn_point(ParticipantId(i)))
            .collect();

        for (i, a) in points.iter().enumerate() {
            assert!(within_bounds(*a, ARENA_HALF_EXTENT));
            for b in &points[i + 1..] {
                assert_ne!(a, b, "spawn grid slots must not collide");
            }
        }
    }

    #[test]
    fn test_clone_is_independent() {
        let mut state = SimulationState::new(9);
        state.add_participant(ParticipantId(1));

        let snapshot = state.clone();
        state.participants.get_mut(&ParticipantId(1)).unwrap().score = 50;
        state.rng.next_u64();

        assert_eq!(snapshot.participant(ParticipantId(1)).unwrap().score, 0);
        assert_ne!(snapshot.rng, state.rng);
    }

    #[test]
    fn test_bytes_roundtrip_is_lossless() {
        let mut state = SimulationState::new(3);
        state.add_participant(ParticipantId(2));
        state.spawn_item(FixedVec2::from_ints(1, 1), 10);
        state.rng.next_u64();

        let restored = SimulationState::from_bytes(&state.to_bytes().unwrap()).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.compute_hash(), state.compute_hash());
    }

    #[test]
    fn test_hash_covers_rng() {
        let a = SimulationState::new(1);
        let mut b = a.clone();
        b.rng.next_u64();
        assert_ne!(a.compute_hash(), b.compute_hash());
    }

    #[test]
    fn test_add_participant_once() {
        let mut state = SimulationState::new(1);
        assert!(state.add_participant(ParticipantId(4)));
        assert!(!state.add_participant(ParticipantId(4)));
        assert_eq!(state.participants.len(), 1);
    }
}
