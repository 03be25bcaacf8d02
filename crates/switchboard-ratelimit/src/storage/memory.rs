use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use switchboard_core::{SharedClock, clock};

use crate::error::RateLimitError;

struct Window {
    start: Timestamp,
    count: u32,
}

/// Process-local fixed-window counters
///
/// The rollover check and the increment happen under the key's shard lock,
/// so concurrent callers can never both take the last slot.
pub struct MemoryLimiter {
    windows: DashMap<String, Window>,
    max_requests: u32,
    window: Duration,
    clock: SharedClock,
}

impl MemoryLimiter {
    pub fn new(max_requests: u32, window: Duration, clock: SharedClock) -> Result<Self, RateLimitError> {
        if max_requests == 0 {
            return Err(RateLimitError::Config("max_requests must be > 0".to_owned()));
        }
        if window.is_zero() {
            return Err(RateLimitError::Config("rate limit window must be > 0".to_owned()));
        }

        Ok(Self {
            windows: DashMap::new(),
            max_requests,
            window,
            clock,
        })
    }

    /// Count one request against `key`
    pub fn check(&self, key: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let mut window = self.windows.entry(key.to_owned()).or_insert_with(|| Window { start: now, count: 0 });

        let elapsed = clock::since(window.start, now);
        if elapsed >= self.window {
            window.start = now;
            window.count = 0;
        }

        if window.count >= self.max_requests {
            let remaining = self.window.saturating_sub(clock::since(window.start, now));
            return Err(RateLimitError::Exceeded {
                retry_after: ceil_secs(remaining),
            });
        }

        window.count += 1;
        Ok(())
    }

    /// Forget the window for `key`
    pub fn reset(&self, key: &str) {
        self.windows.remove(key);
    }

    /// Drop windows that have rolled over, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let before = self.windows.len();
        self.windows.retain(|_, w| clock::since(w.start, now) < self.window);
        before.saturating_sub(self.windows.len())
    }
}

pub(crate) fn ceil_secs(duration: Duration) -> u64 {
    let secs = duration.as_secs() + u64::from(duration.subsec_nanos() > 0);
    secs.max(1)
}
