//! State Snapshot Store
//!
//! One state copy per simulated tick. Snapshots are the base points rollback
//! restores from and the anchors a hard resync falls back to.

use crate::game::input::Tick;
use crate::sync::window::TickWindow;

/// Per-tick state copies within a retention horizon.
#[derive(Debug)]
pub struct SnapshotStore<S> {
    states: TickWindow<S>,
}

impl<S: Clone> SnapshotStore<S> {
    /// Store retaining `horizon` ticks.
    pub fn new(horizon: u32) -> Self {
        Self {
            states: TickWindow::new(horizon),
        }
    }

    /// Record the state reached at `tick`, replacing any earlier copy, and
    /// drop snapshots that fell out of the horizon.
    pub fn save(&mut self, tick: Tick, state: S) {
        self.states.insert(tick, state);
        if self.states.newest() == Some(tick) {
            self.states.trim_to(tick);
        }
    }

    /// Snapshot at exactly `tick`.
    pub fn get(&self, tick: Tick) -> Option<&S> {
        self.states.get(tick)
    }

    /// Independent copy of the snapshot at `tick`.
    pub fn restore(&self, tick: Tick) -> Option<S> {
        self.states.get(tick).cloned()
    }

    /// Newest snapshot at or before `tick`.
    pub fn nearest_at_or_before(&self, tick: Tick) -> Option<(Tick, &S)> {
        self.states.nearest_at_or_before(tick)
    }

    /// Drop snapshots older than `tick`.
    pub fn evict_before(&mut self, tick: Tick) -> usize {
        self.states.evict_before(tick)
    }

    /// Oldest retained tick.
    pub fn oldest(&self) -> Option<Tick> {
        self.states.oldest()
    }

    /// Number of retained snapshots.
    pub fn len(&self) -> usize {
        self.states.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::ParticipantId;
    use crate::game::state::SimulationState;

    #[test]
    fn test_save_trims_to_horizon() {
        let mut store = SnapshotStore::new(3);
        for t in 0..=5u32 {
            store.save(t, t);
        }
        assert_eq!(store.len(), 3);
        assert_eq!(store.oldest(), Some(3));
        assert!(store.get(2).is_none());
    }

    #[test]
    fn test_overwrite_older_tick_keeps_newer() {
        let mut store = SnapshotStore::new(8);
        for t in 1..=4u32 {
            store.save(t, t);
        }
        store.save(2, 20);
        assert_eq!(store.get(2), Some(&20));
        assert_eq!(store.get(4), Some(&4));
    }

    #[test]
    fn test_restore_is_independent_copy() {
        let mut store = SnapshotStore::new(8);
        let mut state = SimulationState::new(1);
        state.add_participant(ParticipantId(1));
        store.save(0, state.clone());

        let mut restored = store.restore(0).unwrap();
        restored.participants.clear();

        assert_eq!(store.get(0), Some(&state), "restoring must not alias the stored copy");
    }

    #[test]
    fn test_nearest_at_or_before() {
        let mut store = SnapshotStore::new(8);
        store.save(2, 'a');
        store.save(6, 'b');
        assert_eq!(store.nearest_at_or_before(5), Some((2, &'a')));
        assert_eq!(store.nearest_at_or_before(1), None);
    }
}
