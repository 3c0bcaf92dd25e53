//! Session-relative time

use std::time::Duration;
use tokio::time::Instant;

/// Monotonic clock anchored at session start.
///
/// Built on tokio's clock so paused-time tests drive it deterministically.
#[derive(Debug, Clone, Copy)]
pub struct SessionClock {
    origin: Instant,
}

impl SessionClock {
    pub fn start() -> Self {
        Self {
            origin: Instant::now(),
        }
    }

    /// Time since session start
    pub fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    /// Absolute instant for a session offset, for `sleep_until`
    pub fn instant_at(&self, offset: Duration) -> Instant {
        self.origin + offset
    }
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::start()
    }
}
