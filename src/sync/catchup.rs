//! Catch-up / Resync Controller
//!
//! Turns elapsed wall time into fixed steps, spends a bounded number of extra
//! steps when the client trails the server, and calls for a hard resync when
//! the gap is too large to close incrementally.

use std::time::Duration;

use tracing::debug;

use crate::game::input::Tick;

/// Pacing parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatchupConfig {
    /// Simulated duration of one tick
    pub tick_duration: Duration,
    /// Ticks the client deliberately trails the server (D)
    pub playback_delay: u32,
    /// Backlog above which incremental catch-up is abandoned
    pub hard_threshold: u32,
    /// Maximum extra steps per frame
    pub max_extra_steps: u32,
    /// Backlog ticks per extra step
    pub backlog_divisor: u32,
}

/// What a frame should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePlan {
    /// Paused; do nothing
    Paused,
    /// Advance `normal` wall-clock steps plus `extra` catch-up steps
    Advance {
        /// Steps owed to elapsed wall time
        normal: u32,
        /// Additional steps to shrink backlog
        extra: u32,
    },
    /// Jump to `target` and discard older history
    Resync {
        /// New local tick
        target: Tick,
    },
}

/// Accumulator plus backlog policy.
#[derive(Debug)]
pub struct CatchupController {
    config: CatchupConfig,
    accumulator: Duration,
    paused: bool,
}

impl CatchupController {
    /// Controller with a zero accumulator.
    pub fn new(config: CatchupConfig) -> Self {
        Self {
            config,
            accumulator: Duration::ZERO,
            paused: false,
        }
    }

    /// Active parameters.
    pub fn config(&self) -> &CatchupConfig {
        &self.config
    }

    /// `latest - D - local`; negative when the client is ahead of its target.
    pub fn backlog(&self, latest: Tick, local: Tick) -> i64 {
        latest as i64 - self.config.playback_delay as i64 - local as i64
    }

    /// Tick the client aims to be at.
    pub fn target(&self, latest: Tick) -> Tick {
        latest.saturating_sub(self.config.playback_delay)
    }

    /// Plan one frame.
    ///
    /// Whole ticks are taken out of the accumulator and the remainder is
    /// carried to the next frame.
    pub fn plan(&mut self, elapsed: Duration, latest: Tick, local: Tick) -> FramePlan {
        if self.paused {
            return FramePlan::Paused;
        }

        self.accumulator += elapsed;
        let normal = self.take_whole_ticks();

        let backlog = self.backlog(latest, local);
        if backlog > self.config.hard_threshold as i64 {
            self.accumulator = Duration::ZERO;
            return FramePlan::Resync { target: self.target(latest) };
        }

        let remaining = backlog - normal as i64;
        let extra = if remaining > 0 {
            let divisor = self.config.backlog_divisor.max(1) as i64;
            let wanted = (remaining + divisor - 1) / divisor;
            wanted.min(self.config.max_extra_steps as i64) as u32
        } else {
            0
        };

        if extra > 0 {
            debug!(backlog, normal, extra, "Catching up");
        }
        FramePlan::Advance { normal, extra }
    }

    fn take_whole_ticks(&mut self) -> u32 {
        let tick = self.config.tick_duration;
        if tick.is_zero() {
            return 0;
        }
        let whole = (self.accumulator.as_nanos() / tick.as_nanos()) as u32;
        self.accumulator -= tick * whole;
        whole
    }

    /// Cap the carried time at one tick. Used while the session refuses to
    /// predict further so the stall does not turn into a burst later.
    pub fn clamp_accumulator(&mut self) {
        self.accumulator = self.accumulator.min(self.config.tick_duration);
    }

    /// Time carried into the next frame.
    pub fn accumulator(&self) -> Duration {
        self.accumulator
    }

    /// Process went to background.
    pub fn pause(&mut self) {
        self.paused = true;
        self.accumulator = Duration::ZERO;
    }

    /// Process came back. Suspended wall time is not owed.
    pub fn resume(&mut self) {
        self.paused = false;
        self.accumulator = Duration::ZERO;
    }

    /// Whether paused.
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    /// Forget carried time.
    pub fn reset(&mut self) {
        self.accumulator = Duration::ZERO;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> CatchupController {
        CatchupController::new(CatchupConfig {
            tick_duration: Duration::from_millis(50),
            playback_delay: 2,
            hard_threshold: 30,
            max_extra_steps: 4,
            backlog_divisor: 4,
        })
    }

    #[test]
    fn test_accumulator_carries_remainder() {
        let mut c = controller();
        // latest - D == local keeps backlog out of the picture.
        assert_eq!(c.plan(Duration::from_millis(70), 12, 10), FramePlan::Advance { normal: 1, extra: 0 });
        assert_eq!(c.accumulator(), Duration::from_millis(20));
        assert_eq!(c.plan(Duration::from_millis(30), 13, 11), FramePlan::Advance { normal: 1, extra: 0 });
        assert_eq!(c.accumulator(), Duration::ZERO);
    }

    #[test]
    fn test_extra_steps_scale_and_cap() {
        let mut c = controller();
        // backlog 6 -> ceil(6 / 4) = 2
        assert_eq!(c.plan(Duration::ZERO, 18, 10), FramePlan::Advance { normal: 0, extra: 2 });
        // backlog 28 -> ceil(28 / 4) = 7, capped at 4
        assert_eq!(c.plan(Duration::ZERO, 40, 10), FramePlan::Advance { normal: 0, extra: 4 });
    }

    #[test]
    fn test_normal_steps_count_against_backlog() {
        let mut c = controller();
        assert_eq!(c.plan(Duration::from_millis(100), 14, 10), FramePlan::Advance { normal: 2, extra: 0 });
    }

    #[test]
    fn test_hard_threshold_triggers_resync() {
        let mut c = controller();
        c.plan(Duration::from_millis(40), 0, 0);
        assert_eq!(c.plan(Duration::ZERO, 100, 10), FramePlan::Resync { target: 98 });
        assert_eq!(c.accumulator(), Duration::ZERO);
    }

    #[test]
    fn test_pause_resume() {
        let mut c = controller();
        c.plan(Duration::from_millis(40), 0, 0);
        c.pause();
        assert!(c.is_paused());
        assert_eq!(c.plan(Duration::from_secs(60), 5, 0), FramePlan::Paused);
        c.resume();
        assert!(!c.is_paused());
        assert_eq!(c.accumulator(), Duration::ZERO);
        assert_eq!(c.plan(Duration::ZERO, 2, 0), FramePlan::Advance { normal: 0, extra: 0 });
    }
}
