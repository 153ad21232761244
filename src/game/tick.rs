//! Deterministic Step Function
//!
//! `(state, bundle) -> (state', events)` with no clock, no I/O and no
//! randomness beyond the generator carried in the state.
//!
//! The client machinery is generic over [`StepFunction`]; [`ArenaSimulation`]
//! is the arena rule set shipped with the crate.

use std::fmt;

use serde::{Serialize, Deserialize};

use crate::core::fixed::{Fixed, ARENA_HALF_EXTENT, MOVE_SPEED, CAPTURE_RADIUS};
use crate::core::vec2::FixedVec2;
use crate::core::hash::StateHash;
use crate::game::input::InputBundle;
use crate::game::state::SimulationState;
use crate::game::collision::resolve_pickups;
use crate::game::item::{maybe_spawn_items, collect_item, ItemSpawnConfig};
use crate::game::events::{GameEvent, EventId, sort_events};

/// A pure simulation step.
///
/// Implementations must return a state that shares nothing with the input
/// state and must order events identically for identical inputs.
pub trait StepFunction {
    /// World state
    type State: Clone;
    /// Side-effect record
    type Event: Clone + fmt::Debug;
    /// Deterministic event identity
    type EventKey: Ord + Clone + fmt::Debug;

    /// Advance one tick.
    fn step(&self, state: &Self::State, bundle: &InputBundle) -> (Self::State, Vec<Self::Event>);

    /// Identity of an event.
    fn event_key(&self, event: &Self::Event) -> Self::EventKey;

    /// Digest compared against the server's hash for the same tick.
    fn checksum(&self, state: &Self::State) -> StateHash;
}

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Events generated this tick, in canonical order
    pub events: Vec<GameEvent>,
}

/// Arena rule parameters.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArenaConfig {
    /// Arena half-extent on both axes
    pub half_extent: Fixed,
    /// Displacement per tick per unit of input
    pub move_speed: Fixed,
    /// Item capture radius
    pub capture_radius: Fixed,
    /// Health lost per tick spent pushing into the wall
    pub bump_damage: u32,
    /// Item waves
    pub items: ItemSpawnConfig,
}

impl Default for ArenaConfig {
    fn default() -> Self {
        Self {
            half_extent: ARENA_HALF_EXTENT,
            move_speed: MOVE_SPEED,
            capture_radius: CAPTURE_RADIUS,
            bump_damage: 5,
            items: ItemSpawnConfig::default(),
        }
    }
}

/// Run one simulation tick in place.
///
/// Phases, in order:
/// 1. advance the tick counter
/// 2. spawn participants seen for the first time
/// 3. movement and boundary damage, ascending participant id
/// 4. pickups, ascending item id
/// 5. item waves
pub fn tick(state: &mut SimulationState, bundle: &InputBundle, config: &ArenaConfig) -> TickResult {
    let mut events = Vec::new();

    // 1. Advance tick counter
    state.tick = state.tick.wrapping_add(1);

    // 2. Newcomers
    spawn_newcomers(state, bundle, &mut events);

    // 3. Movement
    apply_movement(state, bundle, config, &mut events);

    // 4. Pickups
    for pickup in resolve_pickups(state, config.capture_radius) {
        if let Some(event) = collect_item(state, pickup.participant, pickup.item_id) {
            events.push(event);
        }
    }

    // 5. Item waves
    maybe_spawn_items(state, &config.items, config.half_extent, &mut events);

    sort_events(&mut events);
    TickResult { events }
}

fn spawn_newcomers(state: &mut SimulationState, bundle: &InputBundle, events: &mut Vec<GameEvent>) {
    for pid in bundle.participants() {
        if state.add_participant(pid) {
            events.push(GameEvent::joined(state.tick, pid, SimulationState::spawn_point(pid)));
        }
    }
}

fn apply_movement(
    state: &mut SimulationState,
    bundle: &InputBundle,
    config: &ArenaConfig,
    events: &mut Vec<GameEvent>,
) {
    let tick = state.tick;

    for participant in state.participants.values_mut() {
        if !participant.is_active() {
            participant.velocity = FixedVec2::ZERO;
            continue;
        }

        let input = bundle.input_for(participant.id);
        let velocity = FixedVec2::new(
            (input.x() as i32).wrapping_mul(config.move_speed),
            (input.y() as i32).wrapping_mul(config.move_speed),
        );
        participant.velocity = velocity;

        let target = participant.position + velocity;
        let clamped = target.clamp_box(config.half_extent);
        participant.position = clamped;

        if clamped != target {
            let amount = config.bump_damage.min(participant.health);
            if amount > 0 {
                participant.health -= amount;
                events.push(GameEvent::damaged(tick, participant.id, amount, participant.health));
            }
        }
    }
}

/// The arena rule set as a [`StepFunction`].
#[derive(Clone, Debug, Default)]
pub struct ArenaSimulation {
    config: ArenaConfig,
}

impl ArenaSimulation {
    /// Rule set with custom parameters.
    pub fn new(config: ArenaConfig) -> Self {
        Self { config }
    }

    /// Active parameters.
    pub fn config(&self) -> &ArenaConfig {
        &self.config
    }
}

impl StepFunction for ArenaSimulation {
    type State = SimulationState;
    type Event = GameEvent;
    type EventKey = EventId;

    fn step(&self, state: &SimulationState, bundle: &InputBundle) -> (SimulationState, Vec<GameEvent>) {
        let mut next = state.clone();
        let result = tick(&mut next, bundle, &self.config);
        (next, result.events)
    }

    fn event_key(&self, event: &GameEvent) -> EventId {
        event.id
    }

    fn checksum(&self, state: &SimulationState) -> StateHash {
        state.compute_hash()
    }
}

/// Replay recorded bundles from an initial state.
///
/// Returns the final state and every event in emission order.
pub fn replay<'a, I>(initial: &SimulationState, bundles: I, config: &ArenaConfig) -> (SimulationState, Vec<GameEvent>)
where
    I: IntoIterator<Item = &'a InputBundle>,
{
    let mut state = initial.clone();
    let mut all_events = Vec::new();
    for bundle in bundles {
        all_events.extend(tick(&mut state, bundle, config).events);
    }
    (state, all_events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use crate::game::events::GameEventData;
    use crate::game::input::{Input, ParticipantId};
    use crate::game::state::ParticipantState;

    const P1: ParticipantId = ParticipantId(1);
    const P2: ParticipantId = ParticipantId(2);

    fn right() -> Input {
        Input::new(1, 0)
    }

    #[test]
    fn test_step_determinism() {
        let sim = ArenaSimulation::default();
        let mut state = SimulationState::new(12345);
        let bundle = InputBundle::new().with(P1, right()).with(P2, Input::new(0, -1));

        for _ in 0..50 {
            let (a, events_a) = sim.step(&state, &bundle);
            let (b, events_b) = sim.step(&state, &bundle);
            assert_eq!(a, b);
            assert_eq!(events_a, events_b);
            assert_eq!(sim.checksum(&a), sim.checksum(&b));
            state = a;
        }
    }

    #[test]
    fn test_step_does_not_touch_input_state() {
        let sim = ArenaSimulation::default();
        let state = SimulationState::new(5);
        let before = state.clone();

        let (next, _) = sim.step(&state, &InputBundle::new().with(P1, right()));
        assert_eq!(state, before);
        assert_eq!(next.tick, 1);
    }

    #[test]
    fn test_newcomer_spawns_and_moves_same_tick() {
        let mut state = SimulationState::new(1);
        let result = tick(&mut state, &InputBundle::new().with(P1, right()), &ArenaConfig::default());

        let spawn = SimulationState::spawn_point(P1);
        assert_eq!(state.position_of(P1), Some(spawn + FixedVec2::from_ints(1, 0)));
        assert!(matches!(result.events[0].data, GameEventData::Joined { .. }));
    }

    #[test]
    fn test_missing_participant_is_neutral() {
        let mut state = SimulationState::new(1);
        state.add_participant(P2);
        let start = state.position_of(P2);

        tick(&mut state, &InputBundle::new().with(P1, right()), &ArenaConfig::default());
        assert_eq!(state.position_of(P2), start);
    }

    #[test]
    fn test_boundary_clamp_and_damage() {
        let config = ArenaConfig::default();
        let mut state = SimulationState::new(1);
        let edge = FixedVec2::new(config.half_extent, 0);
        state.participants.insert(P1, ParticipantState::new(P1, edge));

        let result = tick(&mut state, &InputBundle::new().with(P1, right()), &config);
        let p1 = state.participant(P1).unwrap();
        assert_eq!(p1.position, edge);
        assert_eq!(p1.health, 100 - config.bump_damage);
        assert_eq!(
            result.events[0].data,
            GameEventData::Damaged { amount: config.bump_damage, health: p1.health }
        );
    }

    #[test]
    fn test_simultaneous_pickup_lower_id_wins() {
        let config = ArenaConfig::default();
        let mut state = SimulationState::new(1);
        let spot = FixedVec2::from_ints(3, 3);
        // Higher id inserted first.
        state.participants.insert(P2, ParticipantState::new(P2, spot));
        state.participants.insert(P1, ParticipantState::new(P1, spot));
        let item = state.spawn_item(spot, 10);

        let bundle = InputBundle::new().with(P2, Input::NEUTRAL).with(P1, Input::NEUTRAL);
        let result = tick(&mut state, &bundle, &config);

        let pickups: Vec<&GameEvent> = result
            .events
            .iter()
            .filter(|e| matches!(e.data, GameEventData::ItemCollected { .. }))
            .collect();
        assert_eq!(pickups.len(), 1, "exactly one pickup per item");
        assert_eq!(pickups[0].id.actor, Some(P1));
        assert_eq!(
            pickups[0].data,
            GameEventData::ItemCollected { item_id: item, value: 10, new_score: 10 }
        );
        assert_eq!(state.participant(P2).unwrap().score, 0);
    }

    #[test]
    fn test_replay_matches_stepwise() {
        let config = ArenaConfig::default();
        let sim = ArenaSimulation::new(config.clone());
        let initial = SimulationState::new(99);
        let bundles: Vec<InputBundle> = (0..60)
            .map(|t| {
                InputBundle::new()
                    .with(P1, Input::new((t % 3) - 1, 0))
                    .with(P2, Input::new(0, (t % 2) * 2 - 1))
            })
            .collect();

        let (replayed, _) = replay(&initial, &bundles, &config);

        let mut stepped = initial;
        for bundle in &bundles {
            stepped = sim.step(&stepped, bundle).0;
        }
        assert_eq!(replayed, stepped);
        assert_eq!(replayed.tick, 60);
    }

    fn arb_input() -> impl Strategy<Value = Input> {
        (-1i64..=1, -1i64..=1).prop_map(|(x, y)| Input::new(x, y))
    }

    fn arb_bundles() -> impl Strategy<Value = Vec<InputBundle>> {
        prop::collection::vec(
            prop::collection::btree_map(1u32..5, arb_input(), 0..4).prop_map(|m| {
                m.into_iter()
                    .map(|(pid, input)| (ParticipantId(pid), input))
                    .collect::<InputBundle>()
            }),
            1..80,
        )
    }

    proptest! {
        #[test]
        fn prop_replay_is_bit_exact(seed in any::<u64>(), bundles in arb_bundles()) {
            let config = ArenaConfig::default();
            let initial = SimulationState::new(seed);
            let (a, events_a) = replay(&initial, &bundles, &config);
            let (b, events_b) = replay(&initial, &bundles, &config);
            prop_assert_eq!(a.compute_hash(), b.compute_hash());
            prop_assert_eq!(a, b);
            prop_assert_eq!(events_a, events_b);
        }

        #[test]
        fn prop_split_replay_equals_full(seed in any::<u64>(), bundles in arb_bundles(), cut in 0usize..80) {
            let config = ArenaConfig::default();
            let initial = SimulationState::new(seed);
            let cut = cut.min(bundles.len());

            let (full, _) = replay(&initial, &bundles, &config);
            let (mid, _) = replay(&initial, &bundles[..cut], &config);
            let (resumed, _) = replay(&mid, &bundles[cut..], &config);
            prop_assert_eq!(full, resumed);
        }
    }
}
