use serde::{Deserialize, Serialize};
use switchboard_cache::CacheStats;
use switchboard_core::{Fingerprint, GenerationParams, Message, Role};
use switchboard_routing::{HealthRecord, HealthStatus, HealthSummary};

use crate::OrchestratorError;

/// A logical "ask model X to answer" request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub caller_id: String,
    pub messages: Vec<Message>,
    /// Alias or `provider/model`
    pub model: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(default = "default_true")]
    pub enable_cache: bool,
    #[serde(default = "default_true")]
    pub enable_dedup: bool,
    #[serde(default = "default_true")]
    pub enable_fallback: bool,
}

impl GenerateRequest {
    pub fn new(caller_id: impl Into<String>, model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            caller_id: caller_id.into(),
            messages,
            model: model.into(),
            temperature: None,
            max_tokens: None,
            enable_cache: true,
            enable_dedup: true,
            enable_fallback: true,
        }
    }

    #[must_use]
    pub const fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    #[must_use]
    pub const fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    #[must_use]
    pub const fn cache(mut self, enabled: bool) -> Self {
        self.enable_cache = enabled;
        self
    }

    #[must_use]
    pub const fn dedup(mut self, enabled: bool) -> Self {
        self.enable_dedup = enabled;
        self
    }

    #[must_use]
    pub const fn fallback(mut self, enabled: bool) -> Self {
        self.enable_fallback = enabled;
        self
    }

    pub const fn params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        }
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(&self.messages, &self.model, &self.params())
    }

    /// Content of the last user turn
    pub fn prompt(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
    }

    pub(crate) fn validate(&self) -> Result<(), OrchestratorError> {
        if self.caller_id.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("callerId must not be empty".to_owned()));
        }
        if self.model.trim().is_empty() {
            return Err(OrchestratorError::InvalidRequest("model must not be empty".to_owned()));
        }
        if self.messages.is_empty() {
            return Err(OrchestratorError::InvalidRequest("messages must not be empty".to_owned()));
        }
        if self.temperature.is_some_and(|t| !t.is_finite() || t < 0.0) {
            return Err(OrchestratorError::InvalidRequest(
                "temperature must be a non-negative number".to_owned(),
            ));
        }
        Ok(())
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub const fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens.saturating_add(output_tokens),
        }
    }
}

/// How the response was obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseMetadata {
    /// Served by a provider other than the requested one
    pub fallback_used: bool,
    /// Provider calls made, retries included
    pub attempts: u32,
    /// Health of the serving provider after the call
    pub provider_status: HealthStatus,
}

/// Result of [`Orchestrator::generate`](crate::Orchestrator::generate)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    pub content: String,
    /// Qualified `provider/model` that produced the content
    pub model_used: String,
    pub provider: String,
    pub token_usage: TokenUsage,
    /// What this caller is charged
    pub cost_usd: f64,
    pub latency_ms: u64,
    pub cached: bool,
    pub from_dedup: bool,
    pub fingerprint: Fingerprint,
    pub metadata: ResponseMetadata,
}

/// Outcome of a provider call, shared with dedup waiters
#[derive(Debug, Clone)]
pub(crate) struct Served {
    pub content: String,
    pub provider: String,
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
    pub cost_usd: f64,
    pub fallback_used: bool,
    pub attempts: u32,
}

impl Served {
    pub fn model_used(&self) -> String {
        format!("{}/{}", self.provider, self.model)
    }
}

/// Flights currently sharing an upstream call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightStats {
    pub buffered: usize,
    pub streams: usize,
}

/// Snapshot for the health query surface
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthReport {
    pub summary: HealthSummary,
    pub providers: Vec<HealthRecord>,
    /// Absent when caching is off or the store could not be read
    pub cache: Option<CacheStats>,
    pub in_flight: InFlightStats,
}

/// What a maintenance sweep removed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceReport {
    pub cache_entries: usize,
    pub rate_limit_windows: usize,
    pub usage_records: usize,
}
