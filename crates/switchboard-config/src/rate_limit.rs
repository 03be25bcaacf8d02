use indexmap::IndexMap;
use serde::Deserialize;
use url::Url;

/// Per-caller admission limits
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateLimitConfig {
    /// Whether admission is gated at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Where window counters live
    #[serde(default)]
    pub storage: RateLimitStorage,
    /// Requests a caller may make per window
    #[serde(default = "default_requests")]
    pub requests: u32,
    /// Fixed window length (e.g. "60s", "1h")
    #[serde(default = "default_window")]
    pub window: String,
    /// Lockout applied after a caller exceeds the limit
    #[serde(default)]
    pub penalty: Option<String>,
    /// Admit requests when the storage backend cannot be reached
    #[serde(default = "default_true")]
    pub fail_open: bool,
    /// Tighter limits for specific logical models, applied per caller
    #[serde(default)]
    pub models: IndexMap<String, ModelRateLimit>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: RateLimitStorage::default(),
            requests: default_requests(),
            window: default_window(),
            penalty: None,
            fail_open: true,
            models: IndexMap::new(),
        }
    }
}

/// Rate limit counter storage
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RateLimitStorage {
    /// Process-local counters
    #[default]
    Memory,
    /// Counters shared through Redis/Valkey
    Redis(RedisStorageConfig),
}

/// Redis/Valkey connection settings shared by the limiter and the cache
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RedisStorageConfig {
    /// Connection URL
    pub url: Url,
    /// Prefix for every key written
    #[serde(default)]
    pub key_prefix: Option<String>,
}

/// Limit for one logical model
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelRateLimit {
    pub requests: u32,
    pub window: String,
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_requests() -> u32 {
    60
}

fn default_window() -> String {
    "60s".to_owned()
}
