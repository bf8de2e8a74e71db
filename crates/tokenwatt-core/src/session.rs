//! Per-run measurement state shared between the generation loop and the
//! correlator.
//!
//! One [`Session`] exists per measurement run. A new run gets a new `Session`
//! instead of resetting an old one, so no counter can carry over between runs.
//!
//! The token counter is written by the generation loop and read by the
//! correlator on every enriched row, so it is atomic. The energy counters are
//! written only by the correlator but read by the report, so they sit behind
//! a mutex.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime};

use crate::JOULES_PER_KWH;

/// Energy accumulated from the power trace so far.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct EnergyTotals {
    pub power_sum_mw: u64,
    pub sample_count: u64,
    pub energy_j: f64,
    pub energy_kwh: f64,
}

/// Shared aggregate for one measurement run.
#[derive(Debug)]
pub struct Session {
    started_at: SystemTime,
    started: Instant,
    tokens: AtomicU64,
    energy: Mutex<EnergyTotals>,
}

impl Session {
    /// Start a fresh session: all counters zero, clock starting now.
    pub fn new() -> Self {
        Self {
            started_at: SystemTime::now(),
            started: Instant::now(),
            tokens: AtomicU64::new(0),
            energy: Mutex::new(EnergyTotals::default()),
        }
    }

    /// Add `n` generated tokens.
    pub fn add_tokens(&self, n: u64) {
        self.tokens.fetch_add(n, Ordering::SeqCst);
    }

    pub fn tokens(&self) -> u64 {
        self.tokens.load(Ordering::SeqCst)
    }

    /// Fold one power reading into the energy counters.
    ///
    /// Returns the cumulative energy in joules and kWh after this reading.
    pub fn record_sample(&self, power_mw: u64, interval: Duration) -> (f64, f64) {
        let increment_j = (power_mw as f64 / 1000.0) * interval.as_secs_f64();
        let mut totals = self.energy.lock().unwrap_or_else(|e| e.into_inner());
        totals.power_sum_mw = totals.power_sum_mw.saturating_add(power_mw);
        totals.sample_count = totals.sample_count.saturating_add(1);
        totals.energy_j += increment_j;
        totals.energy_kwh = totals.energy_j / JOULES_PER_KWH;
        (totals.energy_j, totals.energy_kwh)
    }

    pub fn energy(&self) -> EnergyTotals {
        *self.energy.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Wall-clock time the session started.
    pub fn started_at(&self) -> SystemTime {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Consistent copy of every counter, with elapsed time measured now.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            elapsed: self.elapsed(),
            total_tokens: self.tokens(),
            energy: self.energy(),
        }
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

/// Frozen counters handed to the report.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionSnapshot {
    pub elapsed: Duration,
    pub total_tokens: u64,
    pub energy: EnergyTotals,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const INTERVAL: Duration = Duration::from_millis(100);

    #[test]
    fn test_new_session_is_zeroed() {
        let s = Session::new();
        let snap = s.snapshot();
        assert_eq!(snap.total_tokens, 0);
        assert_eq!(snap.energy, EnergyTotals::default());
    }

    #[test]
    fn test_record_sample_integrates_energy() {
        let s = Session::new();
        let mut last = (0.0, 0.0);
        for _ in 0..10 {
            last = s.record_sample(5000, INTERVAL);
        }
        assert!((last.0 - 5.0).abs() < 1e-9);
        assert!((last.1 - 5.0 / 3_600_000.0).abs() < 1e-15);

        let e = s.energy();
        assert_eq!(e.sample_count, 10);
        assert_eq!(e.power_sum_mw, 50_000);
    }

    #[test]
    fn test_energy_is_monotonic() {
        let s = Session::new();
        let mut prev = 0.0;
        for mw in [0, 1200, 0, 37, 99_999] {
            let (j, _) = s.record_sample(mw, INTERVAL);
            assert!(j >= prev);
            prev = j;
        }
    }

    #[test]
    fn test_huge_reading_saturates_power_sum() {
        let s = Session::new();
        s.record_sample(u64::MAX, INTERVAL);
        s.record_sample(5000, INTERVAL);
        let e = s.energy();
        assert_eq!(e.power_sum_mw, u64::MAX);
        assert_eq!(e.sample_count, 2);
        assert!(e.energy_j.is_finite());
    }

    #[test]
    fn test_new_run_starts_from_zero() {
        let first = Session::new();
        first.add_tokens(512);
        first.record_sample(4000, INTERVAL);

        let second = Session::new();
        assert_eq!(second.tokens(), 0);
        assert_eq!(second.energy(), EnergyTotals::default());
        assert_eq!(first.tokens(), 512);
    }

    #[test]
    fn test_concurrent_token_increments() {
        let s = Arc::new(Session::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        s.add_tokens(1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(s.tokens(), 8000);
    }
}
