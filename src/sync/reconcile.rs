//! Rollback Reconciler
//!
//! When the server confirms a tick this client simulated with a predicted
//! bundle, compare the two. A match clears the mark. A mismatch restores the
//! snapshot from just before that tick and simulates forward again through
//! the local tick, using confirmed bundles wherever they exist now.

use tracing::debug;

use crate::game::input::{Input, InputBundle, Tick};
use crate::game::tick::StepFunction;
use crate::sync::ledger::InputLedger;
use crate::sync::prediction::Predictor;
use crate::sync::timeline::{AdvancedTick, Timeline};

/// Result of comparing a confirmation with what was used.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    /// Tick was not simulated with a prediction
    Unpredicted,
    /// Prediction equalled the confirmation; mark cleared
    Matched,
    /// Prediction differed; rollback required
    Mismatched,
}

/// Rollback failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RollbackError {
    /// The snapshot preceding the tick is no longer retained
    #[error("No snapshot retained before tick {tick}")]
    BaseEvicted {
        /// Tick that needed rollback
        tick: Tick,
    },
}

/// Compare a confirmation against the bundle used for the same tick.
pub fn check_confirmation<F: StepFunction>(
    timeline: &mut Timeline<F>,
    tick: Tick,
    confirmed: &InputBundle,
) -> Verdict {
    if !timeline.marks().is_marked(tick) {
        return Verdict::Unpredicted;
    }

    let matched = match timeline.used(tick) {
        Some(used) if used == confirmed => true,
        Some(used) => {
            debug!(tick, differing = ?used.differing(confirmed), "Misprediction");
            false
        }
        None => false,
    };

    if matched {
        timeline.clear_mark(tick);
        Verdict::Matched
    } else {
        Verdict::Mismatched
    }
}

/// Restore the snapshot at `tick - 1` and resimulate through the local tick.
pub fn rollback<F: StepFunction>(
    timeline: &mut Timeline<F>,
    ledger: &InputLedger,
    predictor: &Predictor,
    tick: Tick,
) -> Result<Vec<AdvancedTick<F>>, RollbackError> {
    let base_tick = tick.checked_sub(1).ok_or(RollbackError::BaseEvicted { tick })?;
    let base = timeline
        .snapshots()
        .restore(base_tick)
        .ok_or(RollbackError::BaseEvicted { tick })?;

    Ok(resimulate(timeline, ledger, predictor, base_tick, base))
}

/// Put `base` in place as the state at `base_tick` and simulate every tick
/// after it up to the current local tick.
///
/// Confirmed bundles replace whatever was used before. Ticks still
/// unconfirmed get a fresh prediction that keeps the local input used the
/// first time around.
pub fn resimulate<F: StepFunction>(
    timeline: &mut Timeline<F>,
    ledger: &InputLedger,
    predictor: &Predictor,
    base_tick: Tick,
    base: F::State,
) -> Vec<AdvancedTick<F>> {
    let end = timeline.local_tick();
    timeline.restore_working(base_tick, base);

    let mut advanced = Vec::new();
    let mut tick = base_tick;
    while tick < end {
        tick += 1;
        let (bundle, predicted) = match ledger.get(tick) {
            Some(confirmed) => (confirmed.clone(), false),
            None => {
                let local_input = timeline
                    .used(tick)
                    .and_then(|used| used.get(predictor.local()))
                    .unwrap_or(Input::NEUTRAL);
                (predictor.predict(local_input), true)
            }
        };
        advanced.push(timeline.apply(tick, bundle, predicted));
    }

    debug!(from = base_tick + 1, to = end, "Resimulated");
    advanced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::input::ParticipantId;
    use crate::game::state::SimulationState;
    use crate::game::tick::ArenaSimulation;
    use crate::sync::prediction::PredictionMode;

    const P1: ParticipantId = ParticipantId(1);
    const P2: ParticipantId = ParticipantId(2);

    fn both(p1: Input, p2: Input) -> InputBundle {
        InputBundle::new().with(P1, p1).with(P2, p2)
    }

    struct Fixture {
        timeline: Timeline<ArenaSimulation>,
        ledger: InputLedger,
        predictor: Predictor,
    }

    /// Ticks 1..=3 confirmed with both idle, 4..=6 predicted.
    fn fixture() -> Fixture {
        let mut timeline = Timeline::new(ArenaSimulation::default(), 0, SimulationState::new(7), 32);
        let mut ledger = InputLedger::new(32);
        let mut predictor = Predictor::new(P1, PredictionMode::RepeatLast);

        for tick in 1..=3 {
            let bundle = both(Input::NEUTRAL, Input::NEUTRAL);
            ledger.put(tick, bundle.clone()).unwrap();
            predictor.observe(tick, &bundle);
            timeline.apply(tick, bundle, false);
        }
        for tick in 4..=6 {
            let bundle = predictor.predict(Input::NEUTRAL);
            timeline.apply(tick, bundle, true);
        }

        Fixture { timeline, ledger, predictor }
    }

    #[test]
    fn test_matching_confirmation_clears_mark() {
        let mut f = fixture();
        let state_before = f.timeline.state().clone();

        let verdict = check_confirmation(&mut f.timeline, 4, &both(Input::NEUTRAL, Input::NEUTRAL));
        assert_eq!(verdict, Verdict::Matched);
        assert!(!f.timeline.marks().is_marked(4));
        assert_eq!(f.timeline.state(), &state_before, "agreement must not resimulate");
    }

    #[test]
    fn test_unpredicted_tick() {
        let mut f = fixture();
        let verdict = check_confirmation(&mut f.timeline, 2, &both(Input::NEUTRAL, Input::NEUTRAL));
        assert_eq!(verdict, Verdict::Unpredicted);
    }

    #[test]
    fn test_rollback_applies_confirmed_input() {
        let mut f = fixture();
        let confirmed = both(Input::NEUTRAL, Input::new(1, 0));
        f.ledger.put(4, confirmed.clone()).unwrap();
        f.predictor.observe(4, &confirmed);

        assert_eq!(check_confirmation(&mut f.timeline, 4, &confirmed), Verdict::Mismatched);
        let advanced = rollback(&mut f.timeline, &f.ledger, &f.predictor, 4).unwrap();

        assert_eq!(advanced.iter().map(|a| a.tick).collect::<Vec<_>>(), vec![4, 5, 6]);
        assert!(advanced.iter().all(|a| a.resimulated));
        assert!(!f.timeline.marks().is_marked(4));
        assert!(f.timeline.marks().is_marked(5), "still unconfirmed");

        // Tick 4 confirmed, 5 and 6 re-predicted from the tick-4 roster.
        let expected = SimulationState::spawn_point(P2) + crate::core::vec2::FixedVec2::from_ints(3, 0);
        assert_eq!(f.timeline.state().position_of(P2), Some(expected));
        assert_eq!(f.timeline.local_tick(), 6);
    }

    #[test]
    fn test_rollback_twice_is_idempotent() {
        let mut f = fixture();
        let confirmed = both(Input::NEUTRAL, Input::new(0, 1));
        f.ledger.put(4, confirmed.clone()).unwrap();
        f.predictor.observe(4, &confirmed);

        rollback(&mut f.timeline, &f.ledger, &f.predictor, 4).unwrap();
        let first = f.timeline.state().clone();

        let again = rollback(&mut f.timeline, &f.ledger, &f.predictor, 4).unwrap();
        assert_eq!(f.timeline.state(), &first);
        assert!(
            again.iter().all(|a| a.events.is_empty() && a.retracted.is_empty()),
            "a repeated rollback reports nothing new"
        );
    }

    #[test]
    fn test_rollback_keeps_local_input() {
        let mut timeline = Timeline::new(ArenaSimulation::default(), 0, SimulationState::new(7), 32);
        let ledger = InputLedger::new(32);
        let predictor = Predictor::new(P1, PredictionMode::RepeatLast);

        timeline.apply(1, predictor.predict(Input::new(0, 1)), true);
        rollback(&mut timeline, &ledger, &predictor, 1).unwrap();

        assert_eq!(timeline.used(1).unwrap().input_for(P1), Input::new(0, 1));
    }

    #[test]
    fn test_rollback_without_base_fails() {
        let mut timeline = Timeline::new(ArenaSimulation::default(), 0, SimulationState::new(7), 4);
        let predictor = Predictor::new(P1, PredictionMode::RepeatLast);
        for tick in 1..=10 {
            timeline.apply(tick, predictor.predict(Input::NEUTRAL), true);
        }
        let ledger = InputLedger::new(4);
        assert_eq!(
            rollback(&mut timeline, &ledger, &predictor, 3).unwrap_err(),
            RollbackError::BaseEvicted { tick: 3 }
        );
    }
}
