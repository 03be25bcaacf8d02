use thiserror::Error;

/// Rate limiting errors
#[derive(Debug, Error)]
pub enum RateLimitError {
    /// Configuration error
    #[error("rate limit configuration error: {0}")]
    Config(String),

    /// Counter store could not be reached
    #[error("redis error: {0}")]
    Redis(String),

    /// Caller is over its limit
    #[error("rate limit exceeded, retry in {retry_after}s")]
    Exceeded {
        /// Seconds until the window resets
        retry_after: u64,
    },
}
