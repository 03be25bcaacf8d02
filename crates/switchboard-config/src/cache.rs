use serde::Deserialize;

use crate::RedisStorageConfig;

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether responses are cached at all
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Backing store
    #[serde(default)]
    pub storage: CacheStorage,
    /// Index entries by prompt prefix for near-duplicate lookups
    #[serde(default = "default_true")]
    pub semantic: bool,
    /// Lifetime classes chosen per prompt
    #[serde(default)]
    pub ttl: CacheTtlConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            storage: CacheStorage::default(),
            semantic: true,
            ttl: CacheTtlConfig::default(),
        }
    }
}

/// Cache backing store
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CacheStorage {
    /// Process-local map bounded by an approximate byte ceiling
    Memory {
        #[serde(default = "default_max_size_bytes")]
        max_size_bytes: usize,
    },
    /// Redis/Valkey with server-side expiry
    Redis(RedisStorageConfig),
}

impl Default for CacheStorage {
    fn default() -> Self {
        Self::Memory {
            max_size_bytes: default_max_size_bytes(),
        }
    }
}

/// TTL classes
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CacheTtlConfig {
    /// Time-sensitive prompts
    #[serde(default = "default_short")]
    pub short: String,
    /// Everything without a more specific class
    #[serde(default = "default_medium")]
    pub medium: String,
    #[serde(default = "default_long")]
    pub long: String,
    /// Reference prompts ("what is", "define", ...)
    #[serde(default = "default_very_long")]
    pub very_long: String,
}

impl Default for CacheTtlConfig {
    fn default() -> Self {
        Self {
            short: default_short(),
            medium: default_medium(),
            long: default_long(),
            very_long: default_very_long(),
        }
    }
}

#[allow(clippy::missing_const_for_fn)]
fn default_true() -> bool {
    true
}

#[allow(clippy::missing_const_for_fn)]
fn default_max_size_bytes() -> usize {
    64 * 1024 * 1024
}

fn default_short() -> String {
    "5m".to_owned()
}

fn default_medium() -> String {
    "30m".to_owned()
}

fn default_long() -> String {
    "1h".to_owned()
}

fn default_very_long() -> String {
    "24h".to_owned()
}
