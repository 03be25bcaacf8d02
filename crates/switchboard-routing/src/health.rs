//! Provider health tracking
//!
//! Each provider moves between healthy, degraded and down based on its run
//! of consecutive errors. Successes reset the run and, once enough of them
//! arrive in a row, bring a degraded or down provider back to healthy.

use std::time::Duration;

use dashmap::DashMap;
use jiff::Timestamp;
use serde::Serialize;
use switchboard_config::HealthConfig;
use switchboard_core::{SharedClock, clock};

use crate::RoutingError;

/// Availability of a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, strum::Display, strum::AsRefStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

/// Health of one provider
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthRecord {
    pub provider_id: String,
    pub status: HealthStatus,
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
    pub last_checked_at: Option<Timestamp>,
    pub down_since: Option<Timestamp>,
    pub success_streak: u32,
    #[serde(skip)]
    last_error_at: Option<Timestamp>,
}

impl HealthRecord {
    fn new(provider: &str) -> Self {
        Self {
            provider_id: provider.to_owned(),
            status: HealthStatus::Healthy,
            consecutive_errors: 0,
            last_error: None,
            last_checked_at: None,
            down_since: None,
            success_streak: 0,
            last_error_at: None,
        }
    }
}

/// Provider counts per status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HealthSummary {
    pub healthy: usize,
    pub degraded: usize,
    pub down: usize,
}

/// Thresholds driving the state machine
#[derive(Debug, Clone)]
pub struct HealthPolicy {
    /// Consecutive errors that degrade a healthy provider
    pub degrade_after: u32,
    /// Consecutive errors that take a degraded provider down
    pub down_after: u32,
    /// Errors further apart than this restart the count
    pub error_window: Duration,
    /// Consecutive successes that restore a degraded or down provider
    pub recovery_successes: u32,
}

impl HealthPolicy {
    pub fn from_config(config: &HealthConfig) -> Result<Self, RoutingError> {
        let error_window = duration_str::parse(&config.error_window)
            .map_err(|e| RoutingError::Config(format!("invalid error_window '{}': {e}", config.error_window)))?;

        Ok(Self {
            degrade_after: config.degrade_after.max(1),
            down_after: config.down_after.max(1),
            error_window,
            recovery_successes: config.recovery_successes.max(1),
        })
    }
}

impl Default for HealthPolicy {
    fn default() -> Self {
        Self {
            degrade_after: 3,
            down_after: 5,
            error_window: Duration::from_secs(300),
            recovery_successes: 1,
        }
    }
}

/// Tracks provider health from the outcome of every attempt
pub struct ProviderHealthTracker {
    providers: DashMap<String, HealthRecord>,
    policy: HealthPolicy,
    clock: SharedClock,
}

impl ProviderHealthTracker {
    pub fn new(policy: HealthPolicy, clock: SharedClock) -> Self {
        Self {
            providers: DashMap::new(),
            policy,
            clock,
        }
    }

    /// Start tracking `provider` as healthy so it shows up in reports
    pub fn register(&self, provider: &str) {
        self.providers
            .entry(provider.to_owned())
            .or_insert_with(|| HealthRecord::new(provider));
    }

    /// Record a failed attempt against a provider
    pub fn record_error(&self, provider: &str, message: &str) -> HealthStatus {
        let now = self.clock.now();
        let mut record = self
            .providers
            .entry(provider.to_owned())
            .or_insert_with(|| HealthRecord::new(provider));

        let stale = record
            .last_error_at
            .is_some_and(|previous| clock::since(previous, now) > self.policy.error_window);
        if stale {
            record.consecutive_errors = 0;
        }

        record.consecutive_errors = record.consecutive_errors.saturating_add(1);
        record.success_streak = 0;
        record.last_error = Some(message.to_owned());
        record.last_error_at = Some(now);
        record.last_checked_at = Some(now);

        let count = record.consecutive_errors;
        let status = record.status;
        match status {
            HealthStatus::Healthy if count >= self.policy.degrade_after => {
                record.status = HealthStatus::Degraded;
                tracing::warn!(provider, consecutive_errors = count, error = message, "provider degraded");
            }
            HealthStatus::Degraded if count >= self.policy.down_after => {
                record.status = HealthStatus::Down;
                record.down_since = Some(now);
                tracing::warn!(provider, consecutive_errors = count, error = message, "provider marked down");
            }
            _ => {}
        }

        record.status
    }

    /// Record a successful attempt against a provider
    pub fn record_success(&self, provider: &str) -> HealthStatus {
        let now = self.clock.now();
        let mut record = self
            .providers
            .entry(provider.to_owned())
            .or_insert_with(|| HealthRecord::new(provider));

        record.consecutive_errors = 0;
        record.success_streak = record.success_streak.saturating_add(1);
        record.last_checked_at = Some(now);

        if record.status != HealthStatus::Healthy && record.success_streak >= self.policy.recovery_successes {
            let previous = record.status;
            record.status = HealthStatus::Healthy;
            record.down_since = None;
            tracing::info!(provider, from = %previous, "provider recovered");
        }

        record.status
    }

    /// Current status; providers never seen are healthy
    pub fn status(&self, provider: &str) -> HealthStatus {
        self.providers
            .get(provider)
            .map_or(HealthStatus::Healthy, |record| record.status)
    }

    pub fn is_down(&self, provider: &str) -> bool {
        self.status(provider) == HealthStatus::Down
    }

    pub fn down_since(&self, provider: &str) -> Option<Timestamp> {
        self.providers.get(provider).and_then(|record| record.down_since)
    }

    pub fn record(&self, provider: &str) -> Option<HealthRecord> {
        self.providers.get(provider).map(|record| record.value().clone())
    }

    /// Every tracked provider, sorted by id
    pub fn all_statuses(&self) -> Vec<HealthRecord> {
        let mut records: Vec<_> = self.providers.iter().map(|record| record.value().clone()).collect();
        records.sort_by(|a, b| a.provider_id.cmp(&b.provider_id));
        records
    }

    pub fn summary(&self) -> HealthSummary {
        self.providers
            .iter()
            .fold(HealthSummary::default(), |mut summary, record| {
                match record.status {
                    HealthStatus::Healthy => summary.healthy += 1,
                    HealthStatus::Degraded => summary.degraded += 1,
                    HealthStatus::Down => summary.down += 1,
                }
                summary
            })
    }

    /// Force a provider back to healthy
    pub fn reset(&self, provider: &str) {
        if let Some(mut record) = self.providers.get_mut(provider) {
            *record = HealthRecord::new(provider);
            tracing::info!(provider, "provider health reset");
        }
    }
}

impl std::fmt::Debug for ProviderHealthTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderHealthTracker")
            .field("providers", &self.providers.len())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}
