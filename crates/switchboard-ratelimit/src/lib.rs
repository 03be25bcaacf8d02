#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod error;
mod limiter;
pub mod storage;

pub use error::RateLimitError;
pub use limiter::RateLimiter;

use switchboard_config::RateLimitConfig;
use switchboard_core::SharedClock;

/// Create a rate limiter from configuration
pub fn create_rate_limiter(config: &RateLimitConfig, clock: SharedClock) -> Result<RateLimiter, RateLimitError> {
    RateLimiter::new(config, clock)
}
