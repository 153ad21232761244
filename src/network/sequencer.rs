//! Authoritative Tick Sequencer
//!
//! Closes ticks on a fixed wall-clock cadence and decides the final input
//! bundle of each. The sequencer never reads the clock itself; callers pass
//! `now` so cadence and drift behaviour are testable.
//!
//! A closed tick uses, per participant:
//! 1. the input submitted for that tick, else
//! 2. the participant's last known input, else
//! 3. neutral.

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use tracing::{debug, trace};

use crate::game::input::{Input, InputBundle, ParticipantId, Tick};
use crate::sync::window::TickWindow;

/// Sequencer lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequencerPhase {
    /// Waiting for enough participants.
    Idle,
    /// Closing ticks on cadence.
    Running,
    /// Torn down; no further ticks.
    Closed,
}

/// What happened to a submitted input. Informational only; rejected inputs
/// are dropped without telling the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Queued for its tick
    Accepted,
    /// Tick already closed
    Late,
    /// Tick beyond the allowed lead
    TooFarAhead,
    /// Sender is not on the roster
    UnknownParticipant,
    /// Sequencer no longer running
    Closed,
}

/// Sequencer parameters.
#[derive(Debug, Clone)]
pub struct SequencerConfig {
    /// Simulated duration of one tick
    pub tick_duration: Duration,
    /// Participants required before ticking starts (0 = run unconditionally)
    pub min_participants: usize,
    /// Furthest future tick accepted, relative to the last closed tick
    pub max_input_lead: u32,
    /// Closed bundles retained
    pub history: u32,
}

impl Default for SequencerConfig {
    fn default() -> Self {
        Self {
            tick_duration: Duration::from_millis(50),
            min_participants: 1,
            max_input_lead: 32,
            history: 256,
        }
    }
}

/// Server-side tick clock and input aggregator.
#[derive(Debug)]
pub struct TickSequencer {
    config: SequencerConfig,
    phase: SequencerPhase,
    /// Last closed tick
    current: Tick,
    /// Wall-clock origin and the tick that was current at that instant
    epoch: Option<(Instant, Tick)>,
    /// Active participants and their last known input
    roster: BTreeMap<ParticipantId, Input>,
    /// Submissions for ticks not yet closed
    pending: BTreeMap<Tick, BTreeMap<ParticipantId, Input>>,
    history: TickWindow<InputBundle>,
}

impl TickSequencer {
    /// Create an idle sequencer whose next tick is `start_tick + 1`.
    pub fn new(config: SequencerConfig, start_tick: Tick) -> Self {
        Self {
            history: TickWindow::new(config.history),
            config,
            phase: SequencerPhase::Idle,
            current: start_tick,
            epoch: None,
            roster: BTreeMap::new(),
            pending: BTreeMap::new(),
        }
    }

    /// Current phase.
    pub fn phase(&self) -> SequencerPhase {
        self.phase
    }

    /// Last closed tick.
    pub fn current_tick(&self) -> Tick {
        self.current
    }

    /// Parameters.
    pub fn config(&self) -> &SequencerConfig {
        &self.config
    }

    /// Active participants in ascending order.
    pub fn participants(&self) -> impl Iterator<Item = ParticipantId> + '_ {
        self.roster.keys().copied()
    }

    /// Number of active participants.
    pub fn participant_count(&self) -> usize {
        self.roster.len()
    }

    /// Add a participant. Starts ticking once enough have joined.
    pub fn join(&mut self, pid: ParticipantId, now: Instant) -> bool {
        if self.phase == SequencerPhase::Closed || self.roster.contains_key(&pid) {
            return false;
        }
        self.roster.insert(pid, Input::NEUTRAL);
        self.maybe_start(now);
        true
    }

    /// Remove a participant. Later bundles no longer name it.
    pub fn leave(&mut self, pid: ParticipantId) -> bool {
        if self.roster.remove(&pid).is_none() {
            return false;
        }
        for inputs in self.pending.values_mut() {
            inputs.remove(&pid);
        }
        true
    }

    /// Queue an input for a future tick. A later submission for the same
    /// tick replaces an earlier one.
    pub fn submit(&mut self, pid: ParticipantId, tick: Tick, input: Input) -> SubmitOutcome {
        let outcome = if self.phase == SequencerPhase::Closed {
            SubmitOutcome::Closed
        } else if !self.roster.contains_key(&pid) {
            SubmitOutcome::UnknownParticipant
        } else if tick <= self.current {
            SubmitOutcome::Late
        } else if tick - self.current > self.config.max_input_lead {
            SubmitOutcome::TooFarAhead
        } else {
            self.pending.entry(tick).or_default().insert(pid, input);
            SubmitOutcome::Accepted
        };

        if outcome != SubmitOutcome::Accepted {
            trace!(%pid, tick, current = self.current, ?outcome, "Input dropped");
        }
        outcome
    }

    /// Close every tick whose cadence boundary has passed.
    ///
    /// Ticks are counted from the running epoch, so a late evaluation closes
    /// several ticks at once instead of stretching the tick duration.
    pub fn poll(&mut self, now: Instant) -> Vec<(Tick, InputBundle)> {
        self.maybe_start(now);

        let Some((epoch, epoch_tick)) = self.epoch else {
            return Vec::new();
        };
        if self.phase != SequencerPhase::Running {
            return Vec::new();
        }

        let step = self.config.tick_duration.as_nanos().max(1);
        let elapsed = now.saturating_duration_since(epoch).as_nanos() / step;
        let due = epoch_tick.saturating_add(u32::try_from(elapsed).unwrap_or(u32::MAX));

        let mut closed = Vec::new();
        while self.current < due {
            closed.push(self.close_next());
        }

        if closed.len() > 1 {
            debug!(count = closed.len(), through = self.current, "Closed several ticks in one evaluation");
        }
        closed
    }

    /// Stop for good.
    pub fn close(&mut self) {
        self.phase = SequencerPhase::Closed;
        self.pending.clear();
    }

    /// Retained bundle for a closed tick.
    pub fn bundle(&self, tick: Tick) -> Option<&InputBundle> {
        self.history.get(tick)
    }

    /// Retained bundles for ticks after `tick`, ascending.
    pub fn bundles_since(&self, tick: Tick) -> Vec<(Tick, InputBundle)> {
        self.history
            .range(tick.saturating_add(1)..)
            .map(|(t, bundle)| (t, bundle.clone()))
            .collect()
    }

    fn maybe_start(&mut self, now: Instant) {
        if self.phase == SequencerPhase::Idle && self.roster.len() >= self.config.min_participants {
            self.phase = SequencerPhase::Running;
            self.epoch = Some((now, self.current));
            debug!(participants = self.roster.len(), tick = self.current, "Sequencer running");
        }
    }

    fn close_next(&mut self) -> (Tick, InputBundle) {
        let tick = self.current + 1;

        // Everything at or below the closing tick is resolved now.
        let later = self.pending.split_off(&(tick + 1));
        let submitted = std::mem::replace(&mut self.pending, later)
            .remove(&tick)
            .unwrap_or_default();

        let mut bundle = InputBundle::new();
        for (pid, last_known) in self.roster.iter_mut() {
            if let Some(input) = submitted.get(pid) {
                *last_known = *input;
            }
            bundle.insert(*pid, *last_known);
        }

        self.history.insert(tick, bundle.clone());
        self.history.trim_to(tick);
        self.current = tick;
        (tick, bundle)
    }
}
