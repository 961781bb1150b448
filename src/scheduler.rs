use serde::{Deserialize, Serialize};

/// Saturn polls its pads once per video field; the host tick tracks that.
pub const DEFAULT_TICK_PERIOD_US: u64 = 16_667;

/// Ticks replayed after a stall before the backlog is dropped. A long
/// suspend must not turn into a catch-up storm.
const MAX_CATCHUP_TICKS: u32 = 4;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TickStats {
    pub ticks_run: u32,
    pub ticks_dropped: u32,
    pub max_lag_us: u64,
}

/// Fixed-period cooperative ticker.
///
/// The owner calls [`TickScheduler::advance`] with the current monotonic
/// time and runs each registered spy once per returned tick. The scheduler
/// never sleeps; pacing stays with the caller.
#[derive(Debug)]
pub struct TickScheduler {
    period_us: u64,
    next_due_us: Option<u64>,
    stats: TickStats,
}

impl TickScheduler {
    pub fn new(period_us: u64) -> Self {
        debug_assert!(period_us > 0, "tick period must be nonzero");
        Self {
            period_us,
            next_due_us: None,
            stats: TickStats::default(),
        }
    }

    pub fn period_us(&self) -> u64 {
        self.period_us
    }

    /// Number of ticks to run at `now_us`. The first call always yields one
    /// tick; later calls yield zero until the period elapses. Lag beyond
    /// the catch-up cap is dropped and recorded.
    pub fn advance(&mut self, now_us: u64) -> u32 {
        let Some(due) = self.next_due_us else {
            self.next_due_us = Some(now_us + self.period_us);
            self.stats.ticks_run += 1;
            return 1;
        };

        if now_us < due {
            return 0;
        }

        let lag = now_us - due;
        if lag > self.stats.max_lag_us {
            self.stats.max_lag_us = lag;
        }

        let pending = (lag / self.period_us) as u32 + 1;
        let run = pending.min(MAX_CATCHUP_TICKS);
        self.stats.ticks_dropped += pending - run;
        self.stats.ticks_run += run;
        self.next_due_us = Some(due + u64::from(pending) * self.period_us);

        run
    }

    pub fn stats(&self) -> &TickStats {
        &self.stats
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new(DEFAULT_TICK_PERIOD_US)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_advance_ticks_immediately() {
        let mut scheduler = TickScheduler::new(1_000);
        assert_eq!(scheduler.advance(500), 1);
        assert_eq!(scheduler.advance(600), 0);
    }

    #[test]
    fn on_time_calls_yield_one_tick_each() {
        let mut scheduler = TickScheduler::new(1_000);
        scheduler.advance(0);
        assert_eq!(scheduler.advance(1_000), 1);
        assert_eq!(scheduler.advance(2_000), 1);
        assert_eq!(scheduler.stats().ticks_dropped, 0);
    }

    #[test]
    fn moderate_lag_is_caught_up() {
        let mut scheduler = TickScheduler::new(1_000);
        scheduler.advance(0);
        // Three periods late: three ticks owed, all within the cap.
        assert_eq!(scheduler.advance(3_100), 3);
        assert_eq!(scheduler.stats().max_lag_us, 2_100);
        // Back on schedule afterwards.
        assert_eq!(scheduler.advance(4_000), 1);
    }

    #[test]
    fn excess_backlog_is_dropped() {
        let mut scheduler = TickScheduler::new(1_000);
        scheduler.advance(0);
        let run = scheduler.advance(50_000);
        assert_eq!(run, 4);
        assert!(scheduler.stats().ticks_dropped > 0);
        // The schedule does not owe the dropped ticks again.
        assert_eq!(scheduler.advance(50_100), 0);
    }
}
