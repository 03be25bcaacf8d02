use jiff::Timestamp;
use serde::{Deserialize, Serialize};
use switchboard_core::Fingerprint;

/// Fixed per-entry bookkeeping added to the payload size estimate
const ENTRY_OVERHEAD_BYTES: usize = 128;

/// What a cache hit hands back to the orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    /// Generated text
    pub content: String,
    /// Provider that produced it
    pub provider: String,
    /// Concrete model that produced it
    pub model: String,
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// A stored response and its lifetime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub fingerprint: Fingerprint,
    pub response: CachedResponse,
    /// Logical model the request asked for
    pub logical_model: String,
    pub created_at: Timestamp,
    pub expires_at: Timestamp,
    /// Approximate memory footprint
    pub size_bytes: usize,
    /// Prompt-prefix cluster this entry belongs to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub semantic_key: Option<String>,
}

impl CacheEntry {
    /// Whether the entry may still be served at `now`
    pub fn is_live(&self, now: Timestamp) -> bool {
        now < self.expires_at
    }

    pub(crate) fn estimate_size(fingerprint: &Fingerprint, response: &CachedResponse, logical_model: &str) -> usize {
        ENTRY_OVERHEAD_BYTES
            + fingerprint.as_str().len()
            + response.content.len()
            + response.provider.len()
            + response.model.len()
            + logical_model.len()
    }
}
