//! Timestamp source for snapshots
//!
//! Snapshot timestamps are the second half of the store's primary key, so a
//! clock must never hand out the same value twice.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Clock trait for testable time
pub trait Clock: Send + Sync {
    /// Milliseconds since the Unix epoch, strictly greater than any value
    /// previously returned by this clock
    fn now_millis(&self) -> i64;
}

/// Wall clock with a strictly increasing guarantee
///
/// When two reads land in the same millisecond (or the wall clock steps
/// backwards) the previous value plus one is returned instead.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    /// Create a new system clock
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared handle suitable for the coordinator
    pub fn shared() -> Arc<dyn Clock> {
        Arc::new(Self::new())
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Acquire);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Manually advanced clock for tests and replays
///
/// Each read returns the current value and then advances it by `step`.
#[derive(Debug)]
pub struct ManualClock {
    next: AtomicI64,
    step: i64,
}

impl ManualClock {
    /// Start at `start`, advancing by one millisecond per read
    pub fn new(start: i64) -> Self {
        Self::with_step(start, 1)
    }

    /// Start at `start`, advancing by `step` per read
    pub fn with_step(start: i64, step: i64) -> Self {
        Self {
            next: AtomicI64::new(start),
            step: step.max(1),
        }
    }

    /// Jump the next returned value forward to `value`
    pub fn set(&self, value: i64) {
        self.next.store(value, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.next.fetch_add(self.step, Ordering::SeqCst)
    }
}
