//! Simulated time for deterministic timeline tests.
//!
//! Timeline operations take `now` explicitly; tests read it from a
//! [`SimulatedClock`] and advance it manually to cross time thresholds
//! without sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};

/// Manually advanced clock.
#[derive(Debug)]
pub struct SimulatedClock {
    /// Base time (start of simulation).
    base: DateTime<Utc>,
    /// Elapsed milliseconds since base.
    elapsed_ms: AtomicU64,
}

impl SimulatedClock {
    /// Creates a new simulated clock starting at the given time.
    #[must_use]
    pub fn new(base: DateTime<Utc>) -> Self {
        Self {
            base,
            elapsed_ms: AtomicU64::new(0),
        }
    }

    /// Creates a clock anchored at 2024-01-01T00:00:00Z.
    #[must_use]
    pub fn deterministic() -> Self {
        let base = Utc
            .with_ymd_and_hms(2024, 1, 1, 0, 0, 0)
            .single()
            .expect("valid base timestamp");
        Self::new(base)
    }

    /// Returns the current simulated time.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let elapsed = self.elapsed_ms.load(Ordering::Relaxed);
        self.base + chrono::Duration::milliseconds(i64::try_from(elapsed).expect("elapsed fits i64"))
    }

    /// Advances the clock by the given duration.
    pub fn advance(&self, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).expect("duration fits u64");
        self.elapsed_ms.fetch_add(millis, Ordering::Relaxed);
    }

    /// Advances the clock to a specific point in time.
    ///
    /// # Panics
    ///
    /// Panics if the target time is before the base or current simulated time.
    pub fn advance_to(&self, target: DateTime<Utc>) {
        assert!(
            target >= self.base,
            "Cannot move clock before base: base={:?}, target={target:?}",
            self.base
        );
        let target_ms = (target - self.base)
            .num_milliseconds()
            .try_into()
            .expect("non-negative target duration");
        let current = self.elapsed_ms.load(Ordering::Relaxed);
        assert!(
            target_ms >= current,
            "Cannot move clock backwards: current={current}ms, target={target_ms}ms"
        );
        self.elapsed_ms.store(target_ms, Ordering::Relaxed);
    }

    /// Returns elapsed time since simulation start.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_millis(self.elapsed_ms.load(Ordering::Relaxed))
    }
}

impl Default for SimulatedClock {
    fn default() -> Self {
        Self::deterministic()
    }
}
