//! Exponential backoff between attempts against one provider

use std::collections::HashMap;
use std::time::Duration;

use rand::Rng;
use switchboard_config::RetryConfig;

use crate::RoutingError;

/// Attempt budget and delay curve for one provider
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Random spread as a fraction of the delay
    pub jitter: f64,
}

impl RetryPolicy {
    /// First attempt plus retries
    pub const fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Delay before retry number `attempt` (0-indexed), without jitter
    ///
    /// `initial_delay * multiplier^attempt`, capped at `max_delay`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt).unwrap_or(i32::MAX);
        let secs = self.initial_delay.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Delay before retry number `attempt`, spread by the jitter ratio
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base = self.base_delay(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }

        let spread = rand::rng().random_range(-self.jitter..=self.jitter);
        let secs = (base.as_secs_f64() * (1.0 + spread)).max(0.0);
        Duration::try_from_secs_f64(secs)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    /// Retries disabled
    pub const fn none() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            multiplier: 1.0,
            jitter: 0.0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.25,
        }
    }
}

/// Default policy plus per-provider overrides
#[derive(Debug, Clone, Default)]
pub struct RetryPolicies {
    default: RetryPolicy,
    providers: HashMap<String, RetryPolicy>,
}

impl RetryPolicies {
    pub fn from_config(config: &RetryConfig) -> Result<Self, RoutingError> {
        let default = RetryPolicy {
            max_retries: config.max_retries,
            initial_delay: parse_duration(&config.initial_delay)?,
            max_delay: parse_duration(&config.max_delay)?,
            multiplier: config.multiplier,
            jitter: config.jitter,
        };

        let providers = config
            .providers
            .iter()
            .map(|(provider, over)| {
                let policy = RetryPolicy {
                    max_retries: over.max_retries.unwrap_or(default.max_retries),
                    initial_delay: over
                        .initial_delay
                        .as_deref()
                        .map(parse_duration)
                        .transpose()?
                        .unwrap_or(default.initial_delay),
                    max_delay: over
                        .max_delay
                        .as_deref()
                        .map(parse_duration)
                        .transpose()?
                        .unwrap_or(default.max_delay),
                    ..default.clone()
                };
                Ok((provider.clone(), policy))
            })
            .collect::<Result<HashMap<_, _>, RoutingError>>()?;

        Ok(Self { default, providers })
    }

    /// Same policy for every provider
    pub fn uniform(policy: RetryPolicy) -> Self {
        Self {
            default: policy,
            providers: HashMap::new(),
        }
    }

    pub fn for_provider(&self, provider: &str) -> &RetryPolicy {
        self.providers.get(provider).unwrap_or(&self.default)
    }
}

fn parse_duration(s: &str) -> Result<Duration, RoutingError> {
    duration_str::parse(s).map_err(|e| RoutingError::Config(format!("invalid duration '{s}': {e}")))
}
