//! Metric names and recording helpers

use std::time::Instant;

use opentelemetry::metrics::Histogram;

/// Record the seconds elapsed since `start`
pub fn record_duration(histogram: &Histogram<f64>, start: Instant, attributes: &[opentelemetry::KeyValue]) {
    histogram.record(start.elapsed().as_secs_f64(), attributes);
}

/// Meter scope used by every switchboard instrument
pub const METER_NAME: &str = "switchboard";

// Request lifecycle
pub const REQUEST_DURATION: &str = "switchboard.request.duration";
pub const REQUEST_COUNT: &str = "switchboard.request.count";
pub const RATE_LIMITED_COUNT: &str = "switchboard.request.rate_limited";

// Cache and dedup short-circuits
pub const CACHE_HIT_COUNT: &str = "switchboard.cache.hit";
pub const CACHE_MISS_COUNT: &str = "switchboard.cache.miss";
pub const DEDUP_JOIN_COUNT: &str = "switchboard.dedup.join";

// Upstream calls
pub const PROVIDER_ATTEMPT_COUNT: &str = "switchboard.provider.attempt";
pub const PROVIDER_FAILOVER_COUNT: &str = "switchboard.provider.failover";
pub const TOKEN_USAGE: &str = "switchboard.token.usage";
pub const COST_USD: &str = "switchboard.cost.usd";
