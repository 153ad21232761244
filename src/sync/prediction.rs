//! Prediction
//!
//! Builds the bundle used for a tick the server has not confirmed yet: every
//! remote participant from the newest confirmed roster keeps its last input
//! (or goes neutral), and the local participant uses whatever is held right
//! now.

use std::collections::BTreeSet;

use serde::{Serialize, Deserialize};

use crate::game::input::{Input, InputBundle, ParticipantId, Tick};

/// Supplies the local participant's held input.
pub trait InputSource {
    /// Input held at this moment.
    fn current_input(&mut self) -> Input;
}

impl<F> InputSource for F
where
    F: FnMut() -> Input,
{
    fn current_input(&mut self) -> Input {
        self()
    }
}

/// How remote participants are predicted.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionMode {
    /// Repeat each participant's last confirmed input
    #[default]
    RepeatLast,
    /// Assume remote participants hold nothing
    Neutral,
}

/// Synthesizes predicted bundles from the newest confirmed roster.
#[derive(Debug, Clone)]
pub struct Predictor {
    local: ParticipantId,
    mode: PredictionMode,
    roster: InputBundle,
    roster_tick: Option<Tick>,
}

impl Predictor {
    /// Predictor for a local participant.
    pub fn new(local: ParticipantId, mode: PredictionMode) -> Self {
        Self {
            local,
            mode,
            roster: InputBundle::new(),
            roster_tick: None,
        }
    }

    /// Local participant.
    pub fn local(&self) -> ParticipantId {
        self.local
    }

    /// Feed a confirmed bundle. Only the newest confirmation becomes the
    /// roster.
    pub fn observe(&mut self, tick: Tick, confirmed: &InputBundle) {
        if self.roster_tick.map_or(true, |current| tick >= current) {
            self.roster = confirmed.clone();
            self.roster_tick = Some(tick);
        }
    }

    /// Tick of the roster in use.
    pub fn roster_tick(&self) -> Option<Tick> {
        self.roster_tick
    }

    /// Build a predicted bundle around a local input.
    pub fn predict(&self, local_input: Input) -> InputBundle {
        let mut bundle: InputBundle = match self.mode {
            PredictionMode::RepeatLast => self.roster.clone(),
            PredictionMode::Neutral => self
                .roster
                .participants()
                .map(|pid| (pid, Input::NEUTRAL))
                .collect(),
        };
        bundle.insert(self.local, local_input);
        bundle
    }

    /// Poll the input source once and build a predicted bundle.
    pub fn predict_from<I: InputSource + ?Sized>(&self, source: &mut I) -> InputBundle {
        self.predict(source.current_input())
    }
}

/// Ticks simulated with a predicted bundle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PredictionMarks {
    ticks: BTreeSet<Tick>,
}

impl PredictionMarks {
    /// Empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a tick as predicted.
    pub fn mark(&mut self, tick: Tick) {
        self.ticks.insert(tick);
    }

    /// Clear one mark. Returns whether it was set.
    pub fn clear(&mut self, tick: Tick) -> bool {
        self.ticks.remove(&tick)
    }

    /// Whether a tick is marked.
    pub fn is_marked(&self, tick: Tick) -> bool {
        self.ticks.contains(&tick)
    }

    /// Oldest marked tick.
    pub fn first(&self) -> Option<Tick> {
        self.ticks.iter().next().copied()
    }

    /// Drop marks older than `tick`.
    pub fn evict_before(&mut self, tick: Tick) {
        self.ticks = self.ticks.split_off(&tick);
    }

    /// Drop every mark.
    pub fn clear_all(&mut self) {
        self.ticks.clear();
    }

    /// Number of marks.
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    /// True when nothing is marked.
    pub fn is_empty(&self) -> bool {
        self.ticks.is_empty()
    }
}
