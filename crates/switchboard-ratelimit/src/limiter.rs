use std::collections::HashMap;
use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use switchboard_config::{RateLimitConfig, RateLimitStorage};
use switchboard_core::{SharedClock, clock};

use crate::{
    error::RateLimitError,
    storage::{
        memory::{MemoryLimiter, ceil_secs},
        redis::RedisLimiter,
    },
};

const DEFAULT_KEY_PREFIX: &str = "switchboard:ratelimit";

/// Per-caller admission gate
///
/// Every caller gets one fixed window. Models listed in the config add a
/// second, per caller and model, window that is only consumed once the
/// caller window admits the request.
pub struct RateLimiter {
    caller: Limiter,
    models: HashMap<String, Limiter>,
    penalty: Option<Duration>,
    penalties: DashMap<String, Timestamp>,
    fail_open: bool,
    clock: SharedClock,
}

enum Limiter {
    Memory(MemoryLimiter),
    Redis(RedisLimiter),
}

impl RateLimiter {
    /// Create from configuration
    pub fn new(config: &RateLimitConfig, clock: SharedClock) -> Result<Self, RateLimitError> {
        let caller = build_limiter(&config.storage, config.requests, &config.window, "caller", &clock)?;

        let models = config
            .models
            .iter()
            .map(|(model, limit)| {
                build_limiter(&config.storage, limit.requests, &limit.window, "model", &clock)
                    .map(|limiter| (model.clone(), limiter))
            })
            .collect::<Result<HashMap<_, _>, _>>()?;

        let penalty = config.penalty.as_deref().map(parse_duration).transpose()?;

        Ok(Self {
            caller,
            models,
            penalty,
            penalties: DashMap::new(),
            fail_open: config.fail_open,
            clock,
        })
    }

    /// Admit or reject a request from `caller` for `model`
    ///
    /// Runs before any cache or provider work, so a rejection costs nothing
    /// downstream.
    pub async fn check(&self, caller: &str, model: &str) -> Result<(), RateLimitError> {
        self.check_penalty(caller)?;

        let admitted = match check_limiter(&self.caller, caller).await {
            Ok(()) => match self.models.get(model) {
                Some(limiter) => check_limiter(limiter, &format!("{caller}:{model}")).await,
                None => Ok(()),
            },
            err @ Err(_) => err,
        };

        match admitted {
            Err(RateLimitError::Redis(e)) if self.fail_open => {
                tracing::warn!(caller, error = %e, "rate limit store unavailable, admitting request");
                Ok(())
            }
            Err(RateLimitError::Exceeded { retry_after }) => {
                tracing::debug!(caller, model, retry_after, "rate limit exceeded");
                Err(self.apply_penalty(caller).unwrap_or(RateLimitError::Exceeded { retry_after }))
            }
            other => other,
        }
    }

    /// Caller-window admission only, as a plain yes/no
    pub async fn allow(&self, caller: &str) -> bool {
        if self.check_penalty(caller).is_err() {
            return false;
        }

        match check_limiter(&self.caller, caller).await {
            Ok(()) => true,
            Err(RateLimitError::Redis(e)) => {
                tracing::warn!(caller, error = %e, "rate limit store unavailable");
                self.fail_open
            }
            Err(_) => false,
        }
    }

    /// Clear every window and any lockout for `caller`
    pub async fn reset(&self, caller: &str) -> Result<(), RateLimitError> {
        self.penalties.remove(caller);
        reset_limiter(&self.caller, caller).await?;
        for (model, limiter) in &self.models {
            reset_limiter(limiter, &format!("{caller}:{model}")).await?;
        }
        tracing::info!(caller, "rate limit reset");
        Ok(())
    }

    /// Drop rolled-over in-memory windows and lapsed lockouts
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        self.penalties.retain(|_, until| *until > now);

        std::iter::once(&self.caller)
            .chain(self.models.values())
            .map(|limiter| match limiter {
                Limiter::Memory(m) => m.purge_expired(),
                Limiter::Redis(_) => 0,
            })
            .sum()
    }

    fn check_penalty(&self, caller: &str) -> Result<(), RateLimitError> {
        let now = self.clock.now();
        let Some(until) = self.penalties.get(caller).map(|until| *until) else {
            return Ok(());
        };

        if now < until {
            return Err(RateLimitError::Exceeded {
                retry_after: ceil_secs(clock::since(now, until)),
            });
        }

        self.penalties.remove_if(caller, |_, until| *until <= now);
        Ok(())
    }

    fn apply_penalty(&self, caller: &str) -> Option<RateLimitError> {
        let penalty = self.penalty?;
        let until = clock::shift(self.clock.now(), penalty);
        self.penalties.insert(caller.to_owned(), until);
        tracing::info!(caller, penalty_secs = penalty.as_secs(), "caller locked out after exceeding rate limit");

        Some(RateLimitError::Exceeded {
            retry_after: ceil_secs(penalty),
        })
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("models", &self.models.len())
            .field("fail_open", &self.fail_open)
            .finish_non_exhaustive()
    }
}

fn build_limiter(
    storage: &RateLimitStorage,
    requests: u32,
    window: &str,
    scope: &str,
    clock: &SharedClock,
) -> Result<Limiter, RateLimitError> {
    let window = parse_duration(window)?;

    match storage {
        RateLimitStorage::Memory => Ok(Limiter::Memory(MemoryLimiter::new(requests, window, clock.clone())?)),
        RateLimitStorage::Redis(redis) => {
            let base = redis.key_prefix.as_deref().unwrap_or(DEFAULT_KEY_PREFIX);
            let prefix = format!("{base}:{scope}");
            Ok(Limiter::Redis(RedisLimiter::new(redis.url.as_str(), &prefix, requests, window)?))
        }
    }
}

async fn check_limiter(limiter: &Limiter, key: &str) -> Result<(), RateLimitError> {
    match limiter {
        Limiter::Memory(m) => m.check(key),
        Limiter::Redis(r) => r.check(key).await,
    }
}

async fn reset_limiter(limiter: &Limiter, key: &str) -> Result<(), RateLimitError> {
    match limiter {
        Limiter::Memory(m) => {
            m.reset(key);
            Ok(())
        }
        Limiter::Redis(r) => r.reset(key).await,
    }
}

fn parse_duration(s: &str) -> Result<Duration, RateLimitError> {
    duration_str::parse(s).map_err(|e| RateLimitError::Config(format!("invalid duration '{s}': {e}")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use indexmap::IndexMap;
    use switchboard_config::ModelRateLimit;
    use switchboard_core::ManualClock;

    use super::*;

    fn config(requests: u32) -> RateLimitConfig {
        RateLimitConfig {
            requests,
            window: "60s".to_owned(),
            ..RateLimitConfig::default()
        }
    }

    #[tokio::test]
    async fn eleventh_request_in_window_is_rejected() {
        let clock = Arc::new(ManualClock::default());
        let limiter = RateLimiter::new(&config(10), clock.clone()).unwrap();

        for _ in 0..10 {
            limiter.check("alice", "openai/gpt-4o").await.unwrap();
        }
        assert!(matches!(
            limiter.check("alice", "openai/gpt-4o").await,
            Err(RateLimitError::Exceeded { .. })
        ));

        clock.advance(Duration::from_secs(60));
        limiter.check("alice", "openai/gpt-4o").await.unwrap();
    }

    #[tokio::test]
    async fn allow_reports_admission() {
        let limiter = RateLimiter::new(&config(1), Arc::new(ManualClock::default())).unwrap();
        assert!(limiter.allow("alice").await);
        assert!(!limiter.allow("alice").await);
        assert!(limiter.allow("bob").await);
    }

    #[tokio::test]
    async fn model_limit_applies_per_caller() {
        let mut models = IndexMap::new();
        models.insert(
            "openai/gpt-4o".to_owned(),
            ModelRateLimit {
                requests: 1,
                window: "60s".to_owned(),
            },
        );
        let config = RateLimitConfig {
            models,
            ..config(10)
        };
        let limiter = RateLimiter::new(&config, Arc::new(ManualClock::default())).unwrap();

        limiter.check("alice", "openai/gpt-4o").await.unwrap();
        assert!(limiter.check("alice", "openai/gpt-4o").await.is_err());
        limiter.check("alice", "anthropic/claude").await.unwrap();
        limiter.check("bob", "openai/gpt-4o").await.unwrap();
    }

    #[tokio::test]
    async fn penalty_locks_caller_out_past_the_window() {
        let clock = Arc::new(ManualClock::default());
        let config = RateLimitConfig {
            penalty: Some("5m".to_owned()),
            ..config(1)
        };
        let limiter = RateLimiter::new(&config, clock.clone()).unwrap();

        limiter.check("alice", "m").await.unwrap();
        let err = limiter.check("alice", "m").await.unwrap_err();
        assert!(matches!(err, RateLimitError::Exceeded { retry_after: 300 }));

        // Window rolled over but the lockout still holds
        clock.advance(Duration::from_secs(61));
        assert!(limiter.check("alice", "m").await.is_err());

        clock.advance(Duration::from_secs(240));
        limiter.check("alice", "m").await.unwrap();
    }

    #[tokio::test]
    async fn reset_clears_windows_and_lockout() {
        let config = RateLimitConfig {
            penalty: Some("1h".to_owned()),
            ..config(1)
        };
        let limiter = RateLimiter::new(&config, Arc::new(ManualClock::default())).unwrap();

        limiter.check("alice", "m").await.unwrap();
        assert!(limiter.check("alice", "m").await.is_err());

        limiter.reset("alice").await.unwrap();
        limiter.check("alice", "m").await.unwrap();
    }

    #[test]
    fn invalid_window_is_a_config_error() {
        let config = RateLimitConfig {
            window: "whenever".to_owned(),
            ..RateLimitConfig::default()
        };
        assert!(matches!(
            RateLimiter::new(&config, Arc::new(ManualClock::default())),
            Err(RateLimitError::Config(_))
        ));
    }
}
