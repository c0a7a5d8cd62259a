//! Bounded polling with exponential backoff.

use std::time::{Duration, Instant};

/// Backoff schedule for a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollBackoff {
    /// Upper bound on the whole poll
    pub timeout: Duration,
    /// First delay between checks
    pub min_delay: Duration,
    /// Ceiling for the doubling delay
    pub max_delay: Duration,
}

impl PollBackoff {
    /// Create a backoff schedule
    #[must_use]
    pub const fn new(timeout: Duration, min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            timeout,
            min_delay,
            max_delay,
        }
    }

    /// Poll `done` until it returns true or the bound elapses
    ///
    /// The condition is checked once more after the deadline so that a
    /// condition satisfied during the last sleep is not reported as a timeout.
    ///
    /// # Errors
    ///
    /// Returns the time spent polling if the condition never held
    pub fn poll<F: FnMut() -> bool>(&self, mut done: F) -> Result<Duration, Duration> {
        let start = Instant::now();
        let deadline = start + self.timeout;
        let mut delay = self.min_delay;
        loop {
            if done() {
                return Ok(start.elapsed());
            }
            let now = Instant::now();
            if now >= deadline {
                return Err(start.elapsed());
            }
            std::thread::sleep(delay.min(deadline - now));
            delay = (delay * 2).min(self.max_delay);
        }
    }
}
