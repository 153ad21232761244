//! Event journal.
//!
//! Remembers which event ids each simulated tick produced. When a tick is
//! simulated again after a rollback, only events that did not exist before
//! are reported as fresh, and events that disappeared are reported as
//! retracted. Presentation therefore sees every occurrence exactly once.

use std::collections::BTreeSet;

use crate::game::input::Tick;
use crate::sync::window::TickWindow;

/// Difference between a tick's previous and current events.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JournalDelta<K> {
    /// Per event of the new list: true if it was not recorded before
    pub fresh: Vec<bool>,
    /// Ids recorded before that the new list no longer contains
    pub retracted: Vec<K>,
}

/// Event ids per tick.
#[derive(Debug)]
pub struct EventJournal<K> {
    ticks: TickWindow<BTreeSet<K>>,
}

impl<K: Ord + Clone> EventJournal<K> {
    /// Journal retaining `horizon` ticks.
    pub fn new(horizon: u32) -> Self {
        Self {
            ticks: TickWindow::new(horizon),
        }
    }

    /// Replace the ids recorded for `tick` and report what changed.
    pub fn record(&mut self, tick: Tick, keys: &[K]) -> JournalDelta<K> {
        let current: BTreeSet<K> = keys.iter().cloned().collect();
        let previous = self.ticks.insert(tick, current.clone()).unwrap_or_default();

        let fresh = keys.iter().map(|key| !previous.contains(key)).collect();
        let retracted = previous.difference(&current).cloned().collect();

        JournalDelta { fresh, retracted }
    }

    /// Drop ticks older than `tick`.
    pub fn evict_before(&mut self, tick: Tick) {
        self.ticks.evict_before(tick);
    }

    /// Drop ticks outside the horizon ending at `newest`.
    pub fn trim_to(&mut self, newest: Tick) {
        self.ticks.trim_to(newest);
    }
}
