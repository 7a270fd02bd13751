//! Time source abstraction.
//!
//! Every component reads "now" through a [`Clock`] so TTLs, retention and
//! pattern recency can be driven deterministically in tests.

use chrono::{DateTime, Utc};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// Start at the current wall-clock instant.
    pub fn starting_now() -> Self {
        Self::new(Utc::now())
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let delta = chrono::TimeDelta::from_std(by).unwrap_or(chrono::TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Whether at least `span` has passed between `since` and `now`.
///
/// A `since` in the future never counts as elapsed.
pub fn elapsed_at_least(now: DateTime<Utc>, since: DateTime<Utc>, span: Duration) -> bool {
    (now - since).to_std().map(|e| e >= span).unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances() {
        let start = Utc::now();
        let clock = ManualClock::new(start);
        clock.advance(Duration::from_millis(1500));
        assert_eq!((clock.now() - start).num_milliseconds(), 1500);
    }

    #[test]
    fn elapsed_boundaries() {
        let start = Utc::now();
        let later = start + chrono::TimeDelta::milliseconds(900_000);
        assert!(elapsed_at_least(later, start, Duration::from_millis(900_000)));
        assert!(!elapsed_at_least(later, start, Duration::from_millis(900_001)));
        // Future timestamps are never expired.
        assert!(!elapsed_at_least(start, later, Duration::from_millis(1)));
    }
}
