#![allow(clippy::must_use_candidate)]

pub mod cache;
mod env;
pub mod fallback;
pub mod health;
pub mod ledger;
mod loader;
pub mod pricing;
pub mod rate_limit;
pub mod retry;
pub mod telemetry;

use serde::Deserialize;

pub use cache::*;
pub use env::ExpandError;
pub use fallback::*;
pub use health::*;
pub use ledger::*;
pub use pricing::*;
pub use rate_limit::*;
pub use retry::*;
pub use telemetry::{ExportProtocol, ExporterConfig, LogFormat, TelemetryConfig};

/// Top-level orchestration configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Per-caller admission control; absent means unlimited
    #[serde(default)]
    pub rate_limit: Option<RateLimitConfig>,
    /// Response cache
    #[serde(default)]
    pub cache: CacheConfig,
    /// In-flight request sharing
    #[serde(default)]
    pub dedup: DedupConfig,
    /// Provider health thresholds
    #[serde(default)]
    pub health: HealthConfig,
    /// Alternatives tried when a provider fails
    #[serde(default)]
    pub fallback: FallbackConfig,
    /// Backoff between attempts
    #[serde(default)]
    pub retry: RetryConfig,
    /// Token prices
    #[serde(default)]
    pub pricing: PricingConfig,
    /// Usage ledger and budgets
    #[serde(default)]
    pub ledger: LedgerConfig,
    /// Logging and OTLP export
    #[serde(default)]
    pub telemetry: Option<TelemetryConfig>,
}

/// In-flight deduplication
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DedupConfig {
    #[serde(default = "default_dedup_enabled")]
    pub enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_dedup_enabled() -> bool {
    true
}
