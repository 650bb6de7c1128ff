//! Time source for the endpoint drivers.
//!
//! The protocol state machines take time as `f64` seconds and never read a clock themselves.
//! [`Clock`] is what the async runners use to produce those timestamps.

use std::time::Instant;

/// Monotonic seconds since the clock was created.
#[derive(Debug, Clone, Copy)]
pub struct Clock {
    start: Instant,
}

impl Default for Clock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn now(&self) -> f64 {
        self.seconds_at(Instant::now())
    }

    pub fn seconds_at(&self, instant: Instant) -> f64 {
        instant.saturating_duration_since(self.start).as_secs_f64()
    }
}
