//! Item Spawning and Collection
//!
//! Items appear in waves drawn from the state's own RNG, so spawn positions
//! replay identically on every machine.

use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::game::input::ParticipantId;
use crate::game::state::SimulationState;
use crate::game::events::GameEvent;

/// Configuration for item waves.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemSpawnConfig {
    /// Ticks between spawn waves; 0 disables spawning
    pub spawn_interval: u32,
    /// Items per wave
    pub spawn_count: u32,
    /// Maximum live items
    pub max_items: u32,
    /// Score awarded per item
    pub value: u32,
}

impl Default for ItemSpawnConfig {
    fn default() -> Self {
        Self {
            spawn_interval: 20,
            spawn_count: 2,
            max_items: 6,
            value: 10,
        }
    }
}

/// Spawn a wave if this tick is on the interval.
pub fn maybe_spawn_items(
    state: &mut SimulationState,
    config: &ItemSpawnConfig,
    half_extent: Fixed,
    events: &mut Vec<GameEvent>,
) {
    if config.spawn_interval == 0 || state.tick % config.spawn_interval != 0 {
        return;
    }

    let live = state.items.len() as u32;
    let spawn_count = config.spawn_count.min(config.max_items.saturating_sub(live));

    for _ in 0..spawn_count {
        let position = state.rng.random_position(half_extent);
        let item_id = state.spawn_item(position, config.value);
        events.push(GameEvent::item_spawned(state.tick, item_id, position));
    }
}

/// Remove an item and credit it to a participant.
pub fn collect_item(state: &mut SimulationState, pid: ParticipantId, item_id: u32) -> Option<GameEvent> {
    let participant = state.participants.get_mut(&pid)?;
    if !participant.is_active() {
        return None;
    }
    let item = state.items.remove(&item_id)?;

    participant.score = participant.score.saturating_add(item.value);
    Some(GameEvent::item_collected(
        state.tick,
        pid,
        item_id,
        item.value,
        participant.score,
    ))
}
