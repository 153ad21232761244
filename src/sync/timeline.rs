//! Client timeline.
//!
//! The working state plus everything recorded per simulated tick: the state
//! snapshot, the bundle actually used, whether it was predicted, and the
//! event ids it produced. All mutation goes through [`Timeline::apply`] so the
//! four records can never disagree about a tick.

use crate::game::input::{InputBundle, Tick};
use crate::game::tick::StepFunction;
use crate::sync::journal::EventJournal;
use crate::sync::prediction::PredictionMarks;
use crate::sync::snapshot::SnapshotStore;
use crate::sync::window::TickWindow;

/// Outcome of simulating one tick.
#[derive(Debug, Clone, PartialEq)]
pub struct Advanced<E, K> {
    /// Tick simulated
    pub tick: Tick,
    /// Events not reported for this tick before, in step order
    pub events: Vec<E>,
    /// Events reported earlier that this run no longer produced
    pub retracted: Vec<K>,
    /// Bundle was synthesized locally
    pub predicted: bool,
    /// Tick had been simulated before (rollback or rebase)
    pub resimulated: bool,
}

/// [`Advanced`] for a step function.
pub type AdvancedTick<F> = Advanced<<F as StepFunction>::Event, <F as StepFunction>::EventKey>;

/// Working state and per-tick history.
pub struct Timeline<F: StepFunction> {
    sim: F,
    state: F::State,
    working_tick: Tick,
    local_tick: Tick,
    snapshots: SnapshotStore<F::State>,
    used: TickWindow<InputBundle>,
    marks: PredictionMarks,
    journal: EventJournal<F::EventKey>,
}

impl<F: StepFunction> Timeline<F> {
    /// Timeline whose history starts at `base_tick` with `base_state`.
    pub fn new(sim: F, base_tick: Tick, base_state: F::State, horizon: u32) -> Self {
        let mut snapshots = SnapshotStore::new(horizon);
        snapshots.save(base_tick, base_state.clone());
        Self {
            sim,
            state: base_state,
            working_tick: base_tick,
            local_tick: base_tick,
            snapshots,
            used: TickWindow::new(horizon),
            marks: PredictionMarks::new(),
            journal: EventJournal::new(horizon),
        }
    }

    /// Step function.
    pub fn sim(&self) -> &F {
        &self.sim
    }

    /// State at the local tick.
    pub fn state(&self) -> &F::State {
        &self.state
    }

    /// Last fully simulated tick.
    pub fn local_tick(&self) -> Tick {
        self.local_tick
    }

    /// Snapshot store.
    pub fn snapshots(&self) -> &SnapshotStore<F::State> {
        &self.snapshots
    }

    /// Bundle used for a tick.
    pub fn used(&self, tick: Tick) -> Option<&InputBundle> {
        self.used.get(tick)
    }

    /// Prediction marks.
    pub fn marks(&self) -> &PredictionMarks {
        &self.marks
    }

    /// Clear the mark for a tick whose prediction was confirmed.
    pub fn clear_mark(&mut self, tick: Tick) -> bool {
        self.marks.clear(tick)
    }

    /// Drop marks at or before `tick`; an authoritative state covers them.
    pub(crate) fn settle_through(&mut self, tick: Tick) {
        self.marks.evict_before(tick.saturating_add(1));
    }

    /// Replace the working state with `state` as of `tick` without touching
    /// anything recorded after it. Resimulation continues from here.
    pub(crate) fn restore_working(&mut self, tick: Tick, state: F::State) {
        self.snapshots.save(tick, state.clone());
        self.state = state;
        self.working_tick = tick;
    }

    /// Simulate `tick` on top of the working state and record the result.
    ///
    /// The working state must be at `tick - 1`.
    pub(crate) fn apply(&mut self, tick: Tick, bundle: InputBundle, predicted: bool) -> AdvancedTick<F> {
        debug_assert_eq!(self.working_tick.wrapping_add(1), tick, "working state must precede the tick");
        let resimulated = tick <= self.local_tick;
        let (next, events) = self.sim.step(&self.state, &bundle);

        if predicted {
            self.marks.mark(tick);
        } else {
            self.marks.clear(tick);
        }
        self.used.insert(tick, bundle);
        self.snapshots.save(tick, next.clone());
        self.state = next;
        self.working_tick = tick;
        self.local_tick = self.local_tick.max(tick);

        let keys: Vec<F::EventKey> = events.iter().map(|e| self.sim.event_key(e)).collect();
        let delta = self.journal.record(tick, &keys);
        let events = events
            .into_iter()
            .zip(delta.fresh)
            .filter_map(|(event, fresh)| fresh.then_some(event))
            .collect();

        self.used.trim_to(self.local_tick);
        self.journal.trim_to(self.local_tick);

        Advanced {
            tick,
            events,
            retracted: delta.retracted,
            predicted,
            resimulated,
        }
    }

    /// Discard history and continue from `state` at `tick`.
    ///
    /// Records older than `tick` are dropped; all marks are cleared.
    pub(crate) fn reset_to(&mut self, tick: Tick, state: F::State) {
        self.snapshots.evict_before(tick);
        self.used.evict_before(tick);
        self.journal.evict_before(tick);
        self.marks.clear_all();
        self.snapshots.save(tick, state.clone());
        self.state = state;
        self.local_tick = tick;
        self.working_tick = tick;
    }
}
