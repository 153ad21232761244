//! Input Ledger
//!
//! Confirmed bundles as received from the server, keyed by tick. A tick is
//! confirmed at most once; a second, different bundle for the same tick means
//! the server broke its own ordering guarantee.

use crate::game::input::{InputBundle, Tick};
use crate::sync::window::TickWindow;

/// Ledger failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LedgerError {
    /// Two different bundles confirmed for one tick
    #[error("Conflicting confirmation for tick {tick}")]
    Conflict {
        /// Tick confirmed twice
        tick: Tick,
    },
}

/// What `put` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// First confirmation for the tick
    Stored,
    /// Identical re-confirmation; nothing changed
    Duplicate,
    /// Older than the retention floor; ignored
    Stale,
}

/// Confirmed bundles within a bounded window.
#[derive(Debug)]
pub struct InputLedger {
    bundles: TickWindow<InputBundle>,
    latest: Tick,
    floor: Tick,
}

impl InputLedger {
    /// Empty ledger retaining `horizon` ticks of history.
    pub fn new(horizon: u32) -> Self {
        Self {
            bundles: TickWindow::new(horizon),
            latest: 0,
            floor: 0,
        }
    }

    /// Ledger whose history starts after `start_tick`.
    pub fn starting_at(horizon: u32, start_tick: Tick) -> Self {
        let mut ledger = Self::new(horizon);
        ledger.latest = start_tick;
        ledger.floor = start_tick.saturating_add(1);
        ledger
    }

    /// Whether a tick is confirmed and retained.
    pub fn has(&self, tick: Tick) -> bool {
        self.bundles.contains(tick)
    }

    /// Confirmed bundle for a tick.
    pub fn get(&self, tick: Tick) -> Option<&InputBundle> {
        self.bundles.get(tick)
    }

    /// Record a confirmation.
    ///
    /// Re-confirming with identical content is a no-op. Different content is
    /// [`LedgerError::Conflict`].
    pub fn put(&mut self, tick: Tick, bundle: InputBundle) -> Result<PutOutcome, LedgerError> {
        if tick < self.floor {
            return Ok(PutOutcome::Stale);
        }

        if let Some(existing) = self.bundles.get(tick) {
            if *existing == bundle {
                return Ok(PutOutcome::Duplicate);
            }
            return Err(LedgerError::Conflict { tick });
        }

        self.bundles.insert(tick, bundle);
        self.latest = self.latest.max(tick);

        // Never hold more than the horizon behind the newest confirmation.
        let floor = self.latest.saturating_sub(self.bundles.horizon() - 1);
        if floor > self.floor {
            self.evict_before(floor);
        }
        Ok(PutOutcome::Stored)
    }

    /// Highest tick ever confirmed.
    pub fn latest(&self) -> Tick {
        self.latest
    }

    /// Forget everything older than `tick`. Later puts for those ticks are
    /// reported as stale, and they count as confirmed for [`latest`](Self::latest).
    pub fn evict_before(&mut self, tick: Tick) -> usize {
        self.floor = self.floor.max(tick);
        self.latest = self.latest.max(tick.saturating_sub(1));
        self.bundles.evict_before(tick)
    }

    /// Oldest tick still accepted.
    pub fn floor(&self) -> Tick {
        self.floor
    }

    /// Number of retained bundles.
    pub fn len(&self) -> usize {
        self.bundles.len()
    }

    /// True when nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.bundles.is_empty()
    }

    /// Retained ticks, ascending.
    pub fn ticks(&self) -> impl Iterator<Item = Tick> + '_ {
        self.bundles.range(..).map(|(tick, _)| tick)
    }
}
