use std::time::Duration;

use crate::error::RateLimitError;

/// Fixed-window counters shared through Redis/Valkey
///
/// `INCR` is atomic on the server; the first hit in a window sets its
/// expiry, so the key vanishing is the window rolling over.
#[derive(Clone)]
pub struct RedisLimiter {
    client: redis::Client,
    key_prefix: String,
    max_requests: u32,
    window: Duration,
}

impl RedisLimiter {
    pub fn new(url: &str, key_prefix: &str, max_requests: u32, window: Duration) -> Result<Self, RateLimitError> {
        let client =
            redis::Client::open(url).map_err(|e| RateLimitError::Redis(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.to_owned(),
            max_requests,
            window,
        })
    }

    fn key(&self, key: &str) -> String {
        format!("{}:{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, RateLimitError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| RateLimitError::Redis(format!("failed to get connection: {e}")))
    }

    /// Count one request against `key`
    pub async fn check(&self, key: &str) -> Result<(), RateLimitError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let rate_key = self.key(key);
        let window_secs = self.window.as_secs().max(1);

        let count: u32 = conn
            .incr(&rate_key, 1)
            .await
            .map_err(|e| RateLimitError::Redis(format!("INCR failed: {e}")))?;

        if count == 1 {
            let _: () = conn
                .expire(&rate_key, i64::try_from(window_secs).unwrap_or(i64::MAX))
                .await
                .map_err(|e| RateLimitError::Redis(format!("EXPIRE failed: {e}")))?;
        }

        if count > self.max_requests {
            let ttl: i64 = conn
                .ttl(&rate_key)
                .await
                .map_err(|e| RateLimitError::Redis(format!("TTL failed: {e}")))?;

            return Err(RateLimitError::Exceeded {
                retry_after: u64::try_from(ttl).unwrap_or(window_secs).max(1),
            });
        }

        Ok(())
    }

    /// Delete the counter for `key`
    pub async fn reset(&self, key: &str) -> Result<(), RateLimitError> {
        use redis::AsyncCommands;

        let mut conn = self.connection().await?;
        let _: () = conn
            .del(self.key(key))
            .await
            .map_err(|e| RateLimitError::Redis(format!("DEL failed: {e}")))?;
        Ok(())
    }
}
