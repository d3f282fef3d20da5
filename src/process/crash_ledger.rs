//! Crash Ledger (C2): a sliding-window crash counter, grounded in
//! `original_source/src/process/health_monitor.py` (`threshold`, `window`,
//! `crash_history`, `record_crash`/`should_restart`/`reset`).

use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct CrashLedger {
    threshold: u32,
    window: Duration,
    crashes: Vec<Instant>,
}

impl CrashLedger {
    pub fn new(threshold: u32, window: Duration) -> Self {
        Self {
            threshold,
            window,
            crashes: Vec::new(),
        }
    }

    fn prune(&mut self, now: Instant) {
        let window = self.window;
        self.crashes.retain(|t| now.duration_since(*t) <= window);
    }

    /// Records a crash at `now` and prunes entries older than `window`.
    pub fn record(&mut self) {
        self.record_at(Instant::now());
    }

    pub fn record_at(&mut self, now: Instant) {
        self.prune(now);
        self.crashes.push(now);
    }

    /// True iff the count after pruning is strictly less than `threshold`.
    pub fn should_restart(&self) -> bool {
        self.should_restart_at(Instant::now())
    }

    pub fn should_restart_at(&self, now: Instant) -> bool {
        let count = self
            .crashes
            .iter()
            .filter(|t| now.duration_since(**t) <= self.window)
            .count();
        (count as u32) < self.threshold
    }

    /// Called once the instance has been observed healthy; prevents
    /// long-lived instances from accumulating ancient crashes.
    pub fn reset(&mut self) {
        self.crashes.clear();
    }

    pub fn crash_count(&self) -> usize {
        self.crashes.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_restart_below_threshold() {
        let mut ledger = CrashLedger::new(3, Duration::from_secs(60));
        let t0 = Instant::now();
        ledger.record_at(t0);
        ledger.record_at(t0);
        assert!(ledger.should_restart_at(t0));
    }

    #[test]
    fn should_not_restart_at_or_above_threshold() {
        let mut ledger = CrashLedger::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        ledger.record_at(t0);
        ledger.record_at(t0);
        assert!(!ledger.should_restart_at(t0));
    }

    #[test]
    fn prunes_entries_outside_the_window() {
        let mut ledger = CrashLedger::new(2, Duration::from_secs(60));
        let t0 = Instant::now();
        ledger.record_at(t0);
        let t1 = t0 + Duration::from_secs(120);
        ledger.record_at(t1);
        assert_eq!(ledger.crash_count(), 1);
        assert!(ledger.should_restart_at(t1));
    }

    #[test]
    fn reset_clears_history() {
        let mut ledger = CrashLedger::new(1, Duration::from_secs(60));
        ledger.record();
        ledger.reset();
        assert!(ledger.should_restart());
        assert_eq!(ledger.crash_count(), 0);
    }

    #[test]
    fn invariant_k_plus_one_calls_matches_threshold_comparison() {
        // should_restart() after (k+1) calls within window == (k+1 < threshold)
        let threshold = 3u32;
        let mut ledger = CrashLedger::new(threshold, Duration::from_secs(60));
        let t0 = Instant::now();
        for k in 0..5u32 {
            ledger.record_at(t0);
            let expected = (k + 1) < threshold;
            assert_eq!(ledger.should_restart_at(t0), expected, "k={k}");
        }
    }
}
