use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Time source for the reducer. Indirected behind a trait so cooldowns and
/// VAD-window transitions can be driven deterministically in tests, per the
/// Design Notes' "coroutine/async flow" re-architecture (explicit reducer +
/// virtual clock rather than awaitable sleeps inline in the state machine).
pub trait Clock: Send + Sync {
    /// Monotonic instant, used for interval comparisons (cooldowns, timers).
    fn now(&self) -> Instant;
    /// Wall-clock seconds since the epoch, used for envelope timestamps.
    fn unix_secs(&self) -> f64;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_secs(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs_f64()
    }
}

/// A manually-advanced clock for unit tests. `now()` is anchored at
/// construction and offset by an atomic counter of elapsed nanoseconds so the
/// reducer's `Instant` comparisons behave exactly as they would against a
/// real clock, without any real sleeping.
pub struct TestClock {
    epoch: Instant,
    elapsed_nanos: AtomicU64,
}

impl TestClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            elapsed_nanos: AtomicU64::new(0),
        }
    }

    pub fn advance(&self, d: Duration) {
        self.elapsed_nanos
            .fetch_add(d.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now(&self) -> Instant {
        self.epoch + Duration::from_nanos(self.elapsed_nanos.load(Ordering::SeqCst))
    }

    fn unix_secs(&self) -> f64 {
        self.elapsed_nanos.load(Ordering::SeqCst) as f64 / 1_000_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn advancing_moves_now_forward() {
        let clock = TestClock::new();
        let t0 = clock.now();
        clock.advance(Duration::from_secs(5));
        let t1 = clock.now();
        assert_eq!(t1 - t0, Duration::from_secs(5));
    }
}
