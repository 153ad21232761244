//! Client Session
//!
//! The frame-driven client core. It owns the ledger, the timeline, the
//! predictor and the catch-up controller, and is the only thing that mutates
//! them.
//!
//! ## Frame Order
//!
//! ```text
//! advance_frame(elapsed)
//!   1. drain queued server messages
//!        confirmations -> ledger, mark check, one rollback from the earliest mismatch
//!        authoritative states -> rebase
//!   2. plan: paused | advance N+extra steps | hard resync
//!   3. step: confirmed bundle if present, else predict
//!   4. queue the local input for latest + lead
//!   5. compare state hashes over the fully confirmed prefix
//! ```
//!
//! Server messages are only ever applied at step 1, never in the middle of a
//! step or a resimulation.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Serialize, Deserialize};
use tracing::{debug, info, warn};

use crate::core::hash::{short_hex, StateHash};
use crate::game::input::{Input, InputBundle, ParticipantId, Tick};
use crate::game::tick::StepFunction;
use crate::sync::catchup::{CatchupConfig, CatchupController, FramePlan};
use crate::sync::ledger::{InputLedger, LedgerError, PutOutcome};
use crate::sync::prediction::{InputSource, PredictionMarks, PredictionMode, Predictor};
use crate::sync::reconcile::{self, RollbackError, Verdict};
use crate::sync::timeline::{AdvancedTick, Timeline};
use crate::sync::window::TickWindow;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// Client synchronization parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Simulated milliseconds per tick
    pub tick_ms: u64,
    /// Ticks to trail the server by (D)
    pub playback_delay: u32,
    /// How far past the newest confirmed tick local input is submitted
    pub input_lead: u32,
    /// Ticks of snapshots, bundles and hashes retained
    pub history: u32,
    /// How far past the newest confirmed tick the client may predict
    pub max_prediction: u32,
    /// Backlog that triggers a hard resync
    pub hard_resync_threshold: u32,
    /// Extra catch-up steps allowed per frame
    pub max_extra_steps: u32,
    /// Backlog ticks per extra step
    pub backlog_divisor: u32,
    /// How remote participants are predicted
    pub prediction: PredictionMode,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            tick_ms: 50,
            playback_delay: 2,
            input_lead: 2,
            history: 128,
            max_prediction: 16,
            hard_resync_threshold: 40,
            max_extra_steps: 4,
            backlog_divisor: 4,
            prediction: PredictionMode::RepeatLast,
        }
    }
}

impl SyncConfig {
    /// Reject parameter combinations the session cannot honour.
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.tick_ms == 0 {
            return Err(SyncError::InvalidConfig("tick_ms must be positive".into()));
        }
        if self.backlog_divisor == 0 {
            return Err(SyncError::InvalidConfig("backlog_divisor must be positive".into()));
        }
        if self.history <= self.max_prediction.saturating_add(1) {
            return Err(SyncError::InvalidConfig(format!(
                "history ({}) must exceed max_prediction + 1 ({})",
                self.history,
                self.max_prediction.saturating_add(1)
            )));
        }
        // Every tick incremental catch-up may still step must stay in the ledger.
        let reach = self
            .hard_resync_threshold
            .saturating_add(self.playback_delay)
            .saturating_add(1);
        if reach > self.history {
            return Err(SyncError::InvalidConfig(format!(
                "history ({}) must cover hard_resync_threshold + playback_delay + 1 ({})",
                self.history, reach
            )));
        }
        Ok(())
    }

    /// Duration of one tick.
    pub fn tick_duration(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    fn catchup(&self) -> CatchupConfig {
        CatchupConfig {
            tick_duration: self.tick_duration(),
            playback_delay: self.playback_delay,
            hard_threshold: self.hard_resync_threshold,
            max_extra_steps: self.max_extra_steps,
            backlog_divisor: self.backlog_divisor,
        }
    }
}

// =============================================================================
// ERRORS & MESSAGES
// =============================================================================

/// Session failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Server confirmed one tick twice with different content
    #[error("Protocol violation: {0}")]
    Ledger(#[from] LedgerError),

    /// Forced rollback could not find its base snapshot
    #[error("Rollback unavailable: {0}")]
    Rollback(#[from] RollbackError),

    /// Bad parameters
    #[error("Invalid sync config: {0}")]
    InvalidConfig(String),

    /// An earlier protocol violation ended the session
    #[error("Session failed earlier and cannot continue")]
    Failed,
}

/// Server data queued for the next frame.
#[derive(Debug, Clone)]
pub enum Inbound<S> {
    /// A closed tick
    Confirmed {
        /// Tick
        tick: Tick,
        /// Final inputs
        bundle: InputBundle,
        /// Server state hash after the tick
        checksum: Option<StateHash>,
    },
    /// A full server state
    Authoritative {
        /// Tick the state is at
        tick: Tick,
        /// State
        state: S,
    },
}

/// Client data for the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Submit the local input for a tick
    SubmitInput {
        /// Target tick
        tick: Tick,
        /// Held input
        input: Input,
    },
    /// Ask the server for its full state
    SyncRequest,
}

/// What a frame did.
#[derive(Debug)]
pub struct FrameReport<F: StepFunction> {
    /// Ticks simulated this frame, including resimulated ones, in order
    pub advanced: Vec<AdvancedTick<F>>,
    /// Earliest tick rolled back from
    pub rollback_from: Option<Tick>,
    /// Hard resync target
    pub resynced_to: Option<Tick>,
    /// Tick an authoritative state was adopted at
    pub rebased_to: Option<Tick>,
    /// First tick whose hash disagreed with the server
    pub desync_at: Option<Tick>,
    /// Wall-clock steps taken
    pub normal_steps: u32,
    /// Catch-up steps taken
    pub extra_steps: u32,
    /// Stopped early at the prediction limit
    pub stalled: bool,
}

impl<F: StepFunction> Default for FrameReport<F> {
    fn default() -> Self {
        Self {
            advanced: Vec::new(),
            rollback_from: None,
            resynced_to: None,
            rebased_to: None,
            desync_at: None,
            normal_steps: 0,
            extra_steps: 0,
            stalled: false,
        }
    }
}

impl<F: StepFunction> FrameReport<F> {
    /// Fresh events of every simulated tick, in order.
    pub fn events(&self) -> impl Iterator<Item = &F::Event> {
        self.advanced.iter().flat_map(|a| a.events.iter())
    }

    /// Ids of events withdrawn by resimulation.
    pub fn retracted(&self) -> impl Iterator<Item = &F::EventKey> {
        self.advanced.iter().flat_map(|a| a.retracted.iter())
    }
}

// =============================================================================
// CLIENT SESSION
// =============================================================================

/// Client-side synchronization state machine.
pub struct ClientSession<F: StepFunction> {
    config: SyncConfig,
    local: ParticipantId,
    base_tick: Tick,
    base_state: F::State,
    timeline: Timeline<F>,
    ledger: InputLedger,
    predictor: Predictor,
    catchup: CatchupController,
    hashes: TickWindow<StateHash>,
    verified_through: Tick,
    inbound: VecDeque<Inbound<F::State>>,
    outbound: VecDeque<Outbound>,
    last_submitted: Option<(Tick, Input)>,
    sync_pending: bool,
    failed: bool,
}

impl<F: StepFunction> ClientSession<F> {
    /// Start a session from the server's greeting state.
    pub fn new(
        sim: F,
        config: SyncConfig,
        local: ParticipantId,
        start_tick: Tick,
        initial_state: F::State,
    ) -> Result<Self, SyncError> {
        config.validate()?;

        info!(%local, start_tick, delay = config.playback_delay, "Client session started");

        Ok(Self {
            local,
            base_tick: start_tick,
            base_state: initial_state.clone(),
            timeline: Timeline::new(sim, start_tick, initial_state, config.history),
            ledger: InputLedger::starting_at(config.history, start_tick),
            predictor: Predictor::new(local, config.prediction),
            catchup: CatchupController::new(config.catchup()),
            hashes: TickWindow::new(config.history),
            verified_through: start_tick,
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            last_submitted: None,
            sync_pending: false,
            failed: false,
            config,
        })
    }

    // -------------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------------

    /// Local participant.
    pub fn local_participant(&self) -> ParticipantId {
        self.local
    }

    /// Current working state.
    pub fn state(&self) -> &F::State {
        self.timeline.state()
    }

    /// Last fully simulated tick.
    pub fn local_tick(&self) -> Tick {
        self.timeline.local_tick()
    }

    /// Highest tick the server has confirmed.
    pub fn latest_server_tick(&self) -> Tick {
        self.ledger.latest()
    }

    /// `latest - D - local`.
    pub fn backlog(&self) -> i64 {
        self.catchup.backlog(self.ledger.latest(), self.local_tick())
    }

    /// Ticks currently simulated with predictions.
    pub fn marks(&self) -> &PredictionMarks {
        self.timeline.marks()
    }

    /// Confirmed bundles.
    pub fn ledger(&self) -> &InputLedger {
        &self.ledger
    }

    /// Retained snapshot for a tick.
    pub fn snapshot(&self, tick: Tick) -> Option<&F::State> {
        self.timeline.snapshots().get(tick)
    }

    /// Bundle used to simulate a tick.
    pub fn used_bundle(&self, tick: Tick) -> Option<&InputBundle> {
        self.timeline.used(tick)
    }

    /// Active parameters.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// Whether a protocol violation ended the session.
    pub fn is_failed(&self) -> bool {
        self.failed
    }

    // -------------------------------------------------------------------------
    // Queues
    // -------------------------------------------------------------------------

    /// Queue a server message for the next frame.
    pub fn enqueue(&mut self, message: Inbound<F::State>) {
        self.inbound.push_back(message);
    }

    /// Take everything the transport should send.
    pub fn drain_outbound(&mut self) -> Vec<Outbound> {
        self.outbound.drain(..).collect()
    }

    // -------------------------------------------------------------------------
    // Lifecycle
    // -------------------------------------------------------------------------

    /// Stop advancing. Elapsed time while paused is never owed.
    pub fn pause(&mut self) {
        info!(local_tick = self.local_tick(), "Session paused");
        self.catchup.pause();
    }

    /// Resume and immediately check the backlog.
    pub fn resume<I: InputSource + ?Sized>(&mut self, source: &mut I) -> Result<FrameReport<F>, SyncError> {
        info!(local_tick = self.local_tick(), latest = self.ledger.latest(), "Session resumed");
        self.catchup.resume();
        self.advance_frame(Duration::ZERO, source)
    }

    // -------------------------------------------------------------------------
    // Frame
    // -------------------------------------------------------------------------

    /// Run one presentation frame.
    pub fn advance_frame<I: InputSource + ?Sized>(
        &mut self,
        elapsed: Duration,
        source: &mut I,
    ) -> Result<FrameReport<F>, SyncError> {
        if self.failed {
            return Err(SyncError::Failed);
        }

        let mut report = FrameReport::default();
        self.drain_inbound(&mut report)?;
        self.check_lost_confirmations();

        match self.catchup.plan(elapsed, self.ledger.latest(), self.local_tick()) {
            FramePlan::Paused => return Ok(report),
            FramePlan::Resync { target } => {
                self.hard_resync(target);
                report.resynced_to = Some(target);
            }
            FramePlan::Advance { normal, extra } => {
                let taken = self.step_many(normal + extra, source, &mut report);
                report.normal_steps = taken.min(normal);
                report.extra_steps = taken.saturating_sub(normal);
            }
        }

        self.submit_input(source);
        self.verify_checksums(&mut report);
        Ok(report)
    }

    /// Roll back and resimulate from `tick` even without a new confirmation.
    pub fn resimulate_from(&mut self, tick: Tick) -> Result<Vec<AdvancedTick<F>>, SyncError> {
        if self.failed {
            return Err(SyncError::Failed);
        }
        let advanced = reconcile::rollback(&mut self.timeline, &self.ledger, &self.predictor, tick)?;
        self.verified_through = self.verified_through.min(tick.saturating_sub(1));
        Ok(advanced)
    }

    fn drain_inbound(&mut self, report: &mut FrameReport<F>) -> Result<(), SyncError> {
        let mut earliest_mismatch: Option<Tick> = None;

        while let Some(message) = self.inbound.pop_front() {
            match message {
                Inbound::Confirmed { tick, bundle, checksum } => {
                    let expected = self.ledger.latest().saturating_add(1);
                    if tick > expected {
                        warn!(expected, got = tick, "Confirmations missing");
                        self.request_sync();
                    }
                    match self.ledger.put(tick, bundle.clone()) {
                        Ok(PutOutcome::Stored) => {}
                        Ok(PutOutcome::Duplicate) | Ok(PutOutcome::Stale) => continue,
                        Err(err) => {
                            warn!(tick, "Conflicting confirmation; session failed");
                            self.failed = true;
                            self.inbound.clear();
                            return Err(err.into());
                        }
                    }

                    if let Some(hash) = checksum {
                        self.hashes.insert(tick, hash);
                    }
                    self.predictor.observe(tick, &bundle);

                    if reconcile::check_confirmation(&mut self.timeline, tick, &bundle) == Verdict::Mismatched {
                        earliest_mismatch = Some(earliest_mismatch.map_or(tick, |t| t.min(tick)));
                    }
                }
                Inbound::Authoritative { tick, state } => {
                    if self.rebase(tick, state, report) {
                        // The rebase resimulated everything after `tick` with current confirmations.
                        earliest_mismatch = None;
                    }
                }
            }
        }

        if let Some(tick) = earliest_mismatch {
            report.rollback_from = Some(tick);
            match reconcile::rollback(&mut self.timeline, &self.ledger, &self.predictor, tick) {
                Ok(advanced) => {
                    self.verified_through = self.verified_through.min(tick.saturating_sub(1));
                    report.advanced.extend(advanced);
                }
                Err(err) => {
                    warn!(tick, error = %err, "Rollback base lost");
                    let target = self.catchup.target(self.ledger.latest());
                    self.hard_resync(target);
                    report.resynced_to = Some(target);
                }
            }
        }

        Ok(())
    }

    fn step_many<I: InputSource + ?Sized>(&mut self, count: u32, source: &mut I, report: &mut FrameReport<F>) -> u32 {
        let limit = self.ledger.latest().saturating_add(self.config.max_prediction);
        let mut taken = 0;

        while taken < count {
            let tick = self.local_tick() + 1;
            if tick > limit {
                report.stalled = true;
                self.catchup.clamp_accumulator();
                debug!(tick, limit, "Prediction limit reached");
                break;
            }

            let (bundle, predicted) = match self.ledger.get(tick) {
                Some(confirmed) => (confirmed.clone(), false),
                None => (self.predictor.predict_from(source), true),
            };

            #[cfg(feature = "debug-tracing")]
            tracing::trace!(tick, predicted, "Step");

            report.advanced.push(self.timeline.apply(tick, bundle, predicted));
            taken += 1;
        }

        if taken > 0 {
            let floor = self.local_tick().saturating_sub(self.config.history);
            self.ledger.evict_before(floor);
            self.hashes.evict_before(floor);
        }
        taken
    }

    /// Jump to `target`, keeping only history from `target` on.
    fn hard_resync(&mut self, target: Tick) {
        let from = self.local_tick();
        let (base_tick, state) = match self.timeline.snapshots().nearest_at_or_before(target) {
            Some((tick, state)) => (tick, state.clone()),
            None if self.base_tick <= target => (self.base_tick, self.base_state.clone()),
            // Nothing at or before the target; the current state stands in.
            None => (self.local_tick(), self.timeline.state().clone()),
        };

        warn!(
            from,
            to = target,
            base_tick,
            latest = self.ledger.latest(),
            "Backlog over threshold, hard resync"
        );

        self.timeline.reset_to(target, state);
        self.ledger.evict_before(target);
        self.hashes.evict_before(target.saturating_add(1));
        self.verified_through = target;
        self.catchup.reset();

        if base_tick != target {
            // The working state no longer matches the server's; ask for it.
            self.request_sync();
        }
    }

    /// Adopt a server state. Returns false if it was too old to use.
    fn rebase(&mut self, tick: Tick, state: F::State, report: &mut FrameReport<F>) -> bool {
        self.sync_pending = false;

        if tick < self.ledger.floor().saturating_sub(1) {
            debug!(tick, floor = self.ledger.floor(), "Ignoring stale authoritative state");
            return false;
        }

        self.base_tick = tick;
        self.base_state = state.clone();
        report.rebased_to = Some(tick);

        // The server state settles every tick up to and including `tick`.
        self.ledger.evict_before(tick.saturating_add(1));
        self.hashes.evict_before(tick.saturating_add(1));

        if tick > self.local_tick() {
            info!(from = self.local_tick(), to = tick, "Rebased ahead to server state");
            self.timeline.reset_to(tick, state);
            self.catchup.reset();
        } else {
            info!(tick, local_tick = self.local_tick(), "Rebased on server state");
            self.timeline.settle_through(tick);
            let advanced = reconcile::resimulate(&mut self.timeline, &self.ledger, &self.predictor, tick, state);
            report.advanced.extend(advanced);
        }

        self.verified_through = tick;
        true
    }

    /// A predicted tick below the ledger floor can never be confirmed.
    fn check_lost_confirmations(&mut self) {
        if let Some(first) = self.timeline.marks().first() {
            if first < self.ledger.floor() {
                warn!(tick = first, floor = self.ledger.floor(), "Confirmation for predicted tick lost");
                self.request_sync();
            }
        }
    }

    fn request_sync(&mut self) {
        if !self.sync_pending {
            self.sync_pending = true;
            self.outbound.push_back(Outbound::SyncRequest);
        }
    }

    fn submit_input<I: InputSource + ?Sized>(&mut self, source: &mut I) {
        let target = self.ledger.latest().saturating_add(self.config.input_lead);
        let input = source.current_input();

        let due = match self.last_submitted {
            None => true,
            Some((tick, last)) => target > tick || (target == tick && input != last),
        };
        if due {
            self.outbound.push_back(Outbound::SubmitInput { tick: target, input });
            self.last_submitted = Some((target, input));
        }
    }

    /// Compare hashes for ticks simulated only from confirmed bundles.
    fn verify_checksums(&mut self, report: &mut FrameReport<F>) {
        let local = self.local_tick();
        let limit = match self.timeline.marks().first() {
            Some(first_predicted) => first_predicted.saturating_sub(1).min(local),
            None => local,
        };
        if limit <= self.verified_through {
            return;
        }

        let mut mismatch = None;
        for (tick, expected) in self.hashes.range(self.verified_through + 1..=limit) {
            let Some(state) = self.timeline.snapshots().get(tick) else {
                continue;
            };
            let actual = self.timeline.sim().checksum(state);
            if actual != *expected {
                warn!(
                    tick,
                    expected = %short_hex(expected),
                    actual = %short_hex(&actual),
                    "State hash mismatch"
                );
                mismatch = Some(tick);
                break;
            }
        }

        self.verified_through = limit;
        if let Some(tick) = mismatch {
            report.desync_at = Some(tick);
            self.request_sync();
        }
    }
}
