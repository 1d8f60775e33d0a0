//! Injectable time source.
//!
//! Every wall-clock and monotonic read in the pipeline goes through a
//! [`Clock`] implementation so tests can control backoff, decay, and
//! dedup-cooldown timing deterministically instead of racing real time.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// A source of both monotonic and wall-clock time.
///
/// `monotonic` is used for window ordering and hop-accurate timestamps;
/// `wall_clock_ms` is used only for user-facing fields and clip extraction,
/// matching the processor's split between the two time domains.
pub trait Clock: Send + Sync {
    fn monotonic(&self) -> Instant;
    fn wall_clock_ms(&self) -> i64;
}

/// Default clock backed by the OS.
#[derive(Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn monotonic(&self) -> Instant {
        Instant::now()
    }

    fn wall_clock_ms(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }
}

/// Deterministic clock for tests: time advances only when explicitly
/// asked to, via [`FixtureClock::advance`].
pub struct FixtureClock {
    start: Instant,
    elapsed_ms: AtomicI64,
    wall_origin_ms: i64,
}

impl FixtureClock {
    pub fn new(wall_origin_ms: i64) -> Self {
        Self {
            start: Instant::now(),
            elapsed_ms: AtomicI64::new(0),
            wall_origin_ms,
        }
    }

    /// Advance both time domains by `ms` milliseconds.
    pub fn advance(&self, ms: i64) {
        self.elapsed_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

impl Default for FixtureClock {
    fn default() -> Self {
        Self::new(0)
    }
}

impl Clock for FixtureClock {
    fn monotonic(&self) -> Instant {
        self.start + Duration::from_millis(self.elapsed_ms.load(Ordering::SeqCst).max(0) as u64)
    }

    fn wall_clock_ms(&self) -> i64 {
        self.wall_origin_ms + self.elapsed_ms.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_clock_advances_both_domains_together() {
        let clock = FixtureClock::new(1_000);
        let t0 = clock.monotonic();
        let w0 = clock.wall_clock_ms();
        clock.advance(500);
        assert!(clock.monotonic() > t0);
        assert_eq!(clock.wall_clock_ms(), w0 + 500);
    }

    #[test]
    fn fixture_clock_defaults_to_zero_origin() {
        let clock = FixtureClock::default();
        assert_eq!(clock.wall_clock_ms(), 0);
    }
}
