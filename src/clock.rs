//! Time source shared by the rate limiter and the credential authenticator.
//!
//! Rate windows are measured on the monotonic clock; credential lifetimes are
//! unix timestamps because they travel inside the token.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Source of the current time.
pub trait Clock: Send + Sync + std::fmt::Debug + 'static {
    /// Monotonic instant for measuring windows.
    fn now(&self) -> Instant;

    /// Seconds since the unix epoch.
    fn unix_now(&self) -> i64;
}

/// Wall clock backed by the operating system.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    fn unix_now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// A clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    origin: Instant,
    unix_origin: i64,
    offset: Mutex<Duration>,
}

impl ManualClock {
    /// Create a clock frozen at the current time.
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
            unix_origin: chrono::Utc::now().timestamp(),
            offset: Mutex::new(Duration::ZERO),
        }
    }

    /// Move the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut offset = self.offset.lock().expect("manual clock mutex poisoned");
        *offset += by;
    }

    fn offset(&self) -> Duration {
        *self.offset.lock().expect("manual clock mutex poisoned")
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        self.origin + self.offset()
    }

    fn unix_now(&self) -> i64 {
        self.unix_origin + self.offset().as_secs() as i64
    }
}
