// Wall-clock budget for one scan invocation.
//
// The total budget is split into two phases that share one clock: metrics
// refresh ends at `metrics_share * total`, batch analysis ends at `total`.
// A safety buffer is held back from each deadline, so a unit of work only
// starts if `elapsed + buffer < deadline`.

use std::time::{Duration, Instant};

use crate::config::ScanSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Metrics,
    Analysis,
}

#[derive(Debug, Clone)]
pub struct TimeBudget {
    started: Instant,
    /// Time considered spent before `started`.
    already_spent: Duration,
    total: Duration,
    buffer: Duration,
    metrics_share: f64,
}

impl TimeBudget {
    pub fn new(total: Duration, buffer: Duration, metrics_share: f64) -> Self {
        Self {
            started: Instant::now(),
            already_spent: Duration::ZERO,
            total,
            buffer,
            metrics_share: metrics_share.clamp(0.0, 1.0),
        }
    }

    pub fn from_settings(settings: &ScanSettings) -> Self {
        Self::new(
            settings.total_budget,
            settings.safety_buffer,
            settings.metrics_share,
        )
    }

    /// Start the clock as if `spent` had already elapsed.
    pub fn with_elapsed(mut self, spent: Duration) -> Self {
        self.already_spent = spent;
        self
    }

    pub fn elapsed(&self) -> Duration {
        self.already_spent + self.started.elapsed()
    }

    /// Offset from the start of the run at which `phase` must stop.
    pub fn deadline(&self, phase: Phase) -> Duration {
        match phase {
            Phase::Metrics => self.total.mul_f64(self.metrics_share),
            Phase::Analysis => self.total,
        }
    }

    /// Whether another unit of work may start in `phase`.
    pub fn can_continue(&self, phase: Phase) -> bool {
        self.elapsed() + self.buffer < self.deadline(phase)
    }

    /// Usable time left in `phase`, after the buffer.
    pub fn remaining(&self, phase: Phase) -> Duration {
        self.deadline(phase)
            .saturating_sub(self.elapsed() + self.buffer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget() -> TimeBudget {
        TimeBudget::new(Duration::from_secs(300), Duration::from_secs(10), 0.6)
    }

    #[test]
    fn test_phase_deadlines() {
        let b = budget();
        assert_eq!(b.deadline(Phase::Metrics), Duration::from_secs(180));
        assert_eq!(b.deadline(Phase::Analysis), Duration::from_secs(300));
    }

    #[test]
    fn test_fresh_budget_allows_both_phases() {
        let b = budget();
        assert!(b.can_continue(Phase::Metrics));
        assert!(b.can_continue(Phase::Analysis));
    }

    #[test]
    fn test_buffer_is_never_spent() {
        // 290s spent of 300 with a 10s buffer: nothing may start.
        let b = budget().with_elapsed(Duration::from_secs(290));
        assert!(!b.can_continue(Phase::Analysis));
        assert_eq!(b.remaining(Phase::Analysis), Duration::ZERO);
    }

    #[test]
    fn test_metrics_phase_closes_before_analysis() {
        let b = budget().with_elapsed(Duration::from_secs(175));
        assert!(!b.can_continue(Phase::Metrics));
        assert!(b.can_continue(Phase::Analysis));
    }

    #[test]
    fn test_share_is_clamped() {
        let b = TimeBudget::new(Duration::from_secs(100), Duration::ZERO, 4.0);
        assert_eq!(b.deadline(Phase::Metrics), Duration::from_secs(100));
    }
}
