use std::collections::BTreeMap;

use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use switchboard_core::Fingerprint;
use uuid::Uuid;

/// How a logical request ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum UsageOutcome {
    Success,
    ProviderError,
    Cancelled,
}

/// One logical request that reached a terminal outcome
///
/// Cost is carried by the row of the caller that triggered the upstream
/// call. Cache hits and dedup waiters get their own zero-cost rows, linked
/// to the paying row through `fingerprint`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageRecord {
    pub id: Uuid,
    pub caller_id: String,
    /// Provider that served the response, empty when none did
    pub provider_id: String,
    /// Concrete model that served the response, or the logical one requested
    pub model_id: String,
    pub fingerprint: Fingerprint,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub cached: bool,
    pub dedup_sourced: bool,
    pub outcome: UsageOutcome,
    pub timestamp: Timestamp,
}

impl UsageRecord {
    /// Whether this row stands for an upstream provider call
    pub const fn is_provider_call(&self) -> bool {
        !self.cached && !self.dedup_sourced
    }

    /// `provider/model` key used for per-model breakdowns
    pub fn qualified_model(&self) -> String {
        if self.provider_id.is_empty() {
            self.model_id.clone()
        } else {
            format!("{}/{}", self.provider_id, self.model_id)
        }
    }
}

/// Selects records for summaries and spend
#[derive(Debug, Clone, Default)]
pub struct UsageFilter {
    pub caller: Option<String>,
    /// Matches `provider/model`
    pub model: Option<String>,
    /// Inclusive lower bound
    pub since: Option<Timestamp>,
    /// Exclusive upper bound
    pub until: Option<Timestamp>,
}

impl UsageFilter {
    pub fn caller(mut self, caller: impl Into<String>) -> Self {
        self.caller = Some(caller.into());
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub const fn since(mut self, since: Timestamp) -> Self {
        self.since = Some(since);
        self
    }

    pub const fn until(mut self, until: Timestamp) -> Self {
        self.until = Some(until);
        self
    }

    pub fn matches(&self, record: &UsageRecord) -> bool {
        self.caller.as_ref().is_none_or(|caller| *caller == record.caller_id)
            && self.model.as_ref().is_none_or(|model| *model == record.qualified_model())
            && self.since.is_none_or(|since| record.timestamp >= since)
            && self.until.is_none_or(|until| record.timestamp < until)
    }
}

/// Aggregate usage over a filtered set of records
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub total_requests: u64,
    /// Requests that reached a provider
    pub provider_calls: u64,
    pub cached_hits: u64,
    pub dedup_hits: u64,
    pub failed: u64,
    /// Billable tokens, counted on provider calls only
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_cost_usd: f64,
    pub avg_latency_ms: f64,
    /// Fraction of requests served from cache
    pub cache_hit_rate: f64,
    pub by_model: BTreeMap<String, ModelUsage>,
}

/// Per-model slice of a [`UsageSummary`]
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelUsage {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub avg_latency_ms: f64,
    pub p95_latency_ms: u64,
}
