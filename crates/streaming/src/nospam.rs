use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

type Clock = Arc<dyn Fn() -> Duration + Send + Sync>;

/// Allows at most one emission per time window, across all threads that
/// share it.
///
/// One instance is meant to be shared by every transfer of a node, so a
/// burst of bad keys over many concurrent segments still produces a single
/// warning per window.
pub struct NoSpamLogger {
    interval: Duration,
    clock: Clock,
    /// Clock reading (nanos) at which the next emission is allowed,
    /// `u64::MAX` before the first one.
    next_allowed: AtomicU64,
    emitted: AtomicU64,
}

impl NoSpamLogger {
    /// A limiter driven by the monotonic clock.
    pub fn new(interval: Duration) -> Self {
        let start = Instant::now();
        Self::with_clock(interval, Arc::new(move || start.elapsed()))
    }

    /// A limiter reading time from `clock`, which must never go backwards.
    pub fn with_clock(interval: Duration, clock: Clock) -> Self {
        Self {
            interval,
            clock,
            next_allowed: AtomicU64::new(u64::MAX),
            emitted: AtomicU64::new(0),
        }
    }

    /// Returns `true` if the caller may emit now, claiming the current
    /// window.
    pub fn should_log(&self) -> bool {
        let now = nanos((self.clock)());
        let next = now.saturating_add(nanos(self.interval));
        let mut current = self.next_allowed.load(Ordering::Acquire);
        loop {
            if current != u64::MAX && now < current {
                return false;
            }
            match self.next_allowed.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.emitted.fetch_add(1, Ordering::Relaxed);
                    return true;
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Emissions allowed so far.
    #[must_use]
    pub fn emitted(&self) -> u64 {
        self.emitted.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl std::fmt::Debug for NoSpamLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NoSpamLogger")
            .field("interval", &self.interval)
            .field("emitted", &self.emitted())
            .finish()
    }
}

fn nanos(d: Duration) -> u64 {
    u64::try_from(d.as_nanos()).unwrap_or(u64::MAX - 1)
}
