//! Bounded per-tick storage.
//!
//! Every per-tick map on the client is a [`TickWindow`]: an ordered map keyed
//! by tick whose old end is cut off with `split_off`, so eviction never scans
//! entries it keeps.

use std::collections::BTreeMap;
use std::ops::RangeBounds;

use crate::game::input::Tick;

/// Ordered per-tick map with a retention horizon.
#[derive(Clone, Debug)]
pub struct TickWindow<T> {
    entries: BTreeMap<Tick, T>,
    horizon: u32,
}

impl<T> TickWindow<T> {
    /// Window keeping at most `horizon` ticks behind the newest trim point.
    pub fn new(horizon: u32) -> Self {
        Self {
            entries: BTreeMap::new(),
            horizon: horizon.max(1),
        }
    }

    /// Retention horizon in ticks.
    pub fn horizon(&self) -> u32 {
        self.horizon
    }

    /// Insert or replace the entry for a tick.
    pub fn insert(&mut self, tick: Tick, value: T) -> Option<T> {
        self.entries.insert(tick, value)
    }

    /// Entry for a tick.
    pub fn get(&self, tick: Tick) -> Option<&T> {
        self.entries.get(&tick)
    }

    /// Whether a tick has an entry.
    pub fn contains(&self, tick: Tick) -> bool {
        self.entries.contains_key(&tick)
    }

    /// Drop every entry older than `tick`. Returns how many were dropped.
    pub fn evict_before(&mut self, tick: Tick) -> usize {
        let kept = self.entries.split_off(&tick);
        let dropped = self.entries.len();
        self.entries = kept;
        dropped
    }

    /// Keep only the `horizon` ticks ending at `newest`.
    pub fn trim_to(&mut self, newest: Tick) -> usize {
        match newest.checked_sub(self.horizon - 1) {
            Some(floor) if floor > 0 => self.evict_before(floor),
            _ => 0,
        }
    }

    /// Newest entry at or before `tick`.
    pub fn nearest_at_or_before(&self, tick: Tick) -> Option<(Tick, &T)> {
        self.entries.range(..=tick).next_back().map(|(t, v)| (*t, v))
    }

    /// Oldest retained tick.
    pub fn oldest(&self) -> Option<Tick> {
        self.entries.keys().next().copied()
    }

    /// Newest retained tick.
    pub fn newest(&self) -> Option<Tick> {
        self.entries.keys().next_back().copied()
    }

    /// Entries within a tick range, ascending.
    pub fn range<R: RangeBounds<Tick>>(&self, range: R) -> impl Iterator<Item = (Tick, &T)> {
        self.entries.range(range).map(|(t, v)| (*t, v))
    }

    /// Number of retained entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is retained.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(horizon: u32, ticks: std::ops::RangeInclusive<Tick>) -> TickWindow<Tick> {
        let mut window = TickWindow::new(horizon);
        for t in ticks {
            window.insert(t, t * 10);
        }
        window
    }

    #[test]
    fn test_evict_before() {
        let mut window = filled(100, 1..=10);
        assert_eq!(window.evict_before(4), 3);
        assert_eq!(window.oldest(), Some(4));
        assert_eq!(window.newest(), Some(10));
        assert!(!window.contains(3));
    }

    #[test]
    fn test_trim_to_horizon() {
        let mut window = filled(4, 1..=10);
        window.trim_to(10);
        assert_eq!(window.range(..).map(|(t, _)| t).collect::<Vec<_>>(), vec![7, 8, 9, 10]);

        let mut young = filled(4, 0..=2);
        assert_eq!(young.trim_to(2), 0, "nothing is older than the horizon yet");
        assert_eq!(young.len(), 3);
    }

    #[test]
    fn test_nearest_at_or_before() {
        let mut window = TickWindow::new(100);
        window.insert(2, "a");
        window.insert(5, "b");

        assert_eq!(window.nearest_at_or_before(5), Some((5, &"b")));
        assert_eq!(window.nearest_at_or_before(4), Some((2, &"a")));
        assert_eq!(window.nearest_at_or_before(1), None);
    }
}
