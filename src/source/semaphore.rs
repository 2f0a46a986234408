//! Counting semaphore with a bounded wait.

use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Counting semaphore capped at a maximum count.
///
/// Signals beyond `max` are coalesced, so a binary semaphore (`max = 1`)
/// remembers at most one pending wake-up.
pub struct Semaphore {
    count: Mutex<u32>,
    max: u32,
    available: Condvar,
}

impl Semaphore {
    /// Create a semaphore with `initial` permits, capped at `max` (at least 1).
    pub fn new(initial: u32, max: u32) -> Self {
        let max = max.max(1);
        Self {
            count: Mutex::new(initial.min(max)),
            max,
            available: Condvar::new(),
        }
    }

    /// Binary semaphore with no initial permit.
    pub fn binary() -> Self {
        Self::new(0, 1)
    }

    /// Release one permit and wake a waiter.
    pub fn signal(&self) {
        let mut count = self.count.lock();
        if *count < self.max {
            *count += 1;
        }
        self.available.notify_one();
    }

    /// Take one permit, waiting at most `timeout`.
    ///
    /// Returns `false` if the timeout elapsed without a permit.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.count.lock();
        while *count == 0 {
            if self.available.wait_until(&mut count, deadline).timed_out() {
                break;
            }
        }
        if *count > 0 {
            *count -= 1;
            true
        } else {
            false
        }
    }

    /// Permits currently available.
    pub fn available(&self) -> u32 {
        *self.count.lock()
    }
}

impl std::fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Semaphore")
            .field("available", &self.available())
            .field("max", &self.max)
            .finish()
    }
}
