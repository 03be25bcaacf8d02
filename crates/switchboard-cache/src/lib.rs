//! Response cache keyed by request fingerprint
//!
//! Entries live either in process memory, bounded by an approximate byte
//! ceiling, or in Redis/Valkey where the server enforces expiry. Each entry
//! can also be indexed under a prompt-prefix cluster for near-duplicate
//! lookups.

#![allow(clippy::missing_errors_doc, clippy::must_use_candidate)]

mod entry;
mod memory;
pub mod policy;
mod redis;
pub mod semantic;

use std::time::Duration;

use serde::Serialize;
use switchboard_config::{CacheConfig, CacheStorage};
use switchboard_core::{Fingerprint, SharedClock};
use thiserror::Error;

pub use entry::{CacheEntry, CachedResponse};
pub use policy::{CacheDecision, CachePolicy};
pub use semantic::semantic_key;

use crate::{memory::MemoryStore, redis::RedisStore};

const DEFAULT_KEY_PREFIX: &str = "switchboard:cache";

/// Cache errors
#[derive(Debug, Error)]
pub enum CacheError {
    /// Valkey connection or command error
    #[error("cache backend: {0}")]
    Backend(String),
    /// Serialization error
    #[error("serialization: {0}")]
    Serialization(String),
    /// Invalid cache configuration
    #[error("cache config: {0}")]
    Config(String),
}

/// Point-in-time cache occupancy
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub total_keys: usize,
    pub semantic_keys: usize,
    pub estimated_size_bytes: usize,
}

enum Backend {
    Memory(MemoryStore),
    Redis(RedisStore),
}

/// Fingerprint-keyed response cache
pub struct ResponseCache {
    backend: Backend,
    semantic: bool,
}

impl ResponseCache {
    /// Create from configuration
    pub fn new(config: &CacheConfig, clock: SharedClock) -> Result<Self, CacheError> {
        let backend = match &config.storage {
            CacheStorage::Memory { max_size_bytes } => Backend::Memory(MemoryStore::new(*max_size_bytes, clock)),
            CacheStorage::Redis(redis) => {
                let prefix = redis.key_prefix.as_deref().unwrap_or(DEFAULT_KEY_PREFIX);
                Backend::Redis(RedisStore::new(redis.url.as_str(), prefix, clock)?)
            }
        };

        Ok(Self {
            backend,
            semantic: config.semantic,
        })
    }

    /// In-memory cache with semantic indexing enabled
    pub fn in_memory(max_size_bytes: usize, clock: SharedClock) -> Self {
        Self {
            backend: Backend::Memory(MemoryStore::new(max_size_bytes, clock)),
            semantic: true,
        }
    }

    /// Live entry for `fingerprint`, if any
    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let entry = match &self.backend {
            Backend::Memory(m) => m.get(fingerprint),
            Backend::Redis(r) => r.get(fingerprint).await?,
        };

        if entry.is_some() {
            tracing::debug!(fingerprint = %fingerprint.short(), "cache hit");
        } else {
            tracing::debug!(fingerprint = %fingerprint.short(), "cache miss");
        }
        Ok(entry)
    }

    /// Store `response`, replacing any entry for `fingerprint` and resetting its TTL
    ///
    /// `cluster` is the request's [`semantic_key`]; it is indexed only when
    /// near-duplicate lookup is enabled.
    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        logical_model: &str,
        cluster: Option<String>,
        ttl: Duration,
    ) -> Result<CacheEntry, CacheError> {
        let semantic_key = cluster.filter(|_| self.semantic);

        let entry = match &self.backend {
            Backend::Memory(m) => m.put(fingerprint, response, logical_model, semantic_key, ttl),
            Backend::Redis(r) => r.put(fingerprint, response, logical_model, semantic_key, ttl).await?,
        };

        tracing::debug!(
            fingerprint = %fingerprint.short(),
            ttl_secs = ttl.as_secs(),
            size_bytes = entry.size_bytes,
            "cached response"
        );
        Ok(entry)
    }

    /// First live entry in the `key` cluster produced for the same logical model
    pub async fn get_similar(&self, key: &str, logical_model: &str) -> Result<Option<CacheEntry>, CacheError> {
        if !self.semantic {
            return Ok(None);
        }

        let cluster = match &self.backend {
            Backend::Memory(m) => m.cluster(key),
            Backend::Redis(r) => r.cluster(key).await?,
        };

        let hit = cluster.into_iter().find(|entry| entry.logical_model == logical_model);
        if hit.is_some() {
            tracing::debug!(semantic_key = %key, logical_model, "semantic cache hit");
        }
        Ok(hit)
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        match &self.backend {
            Backend::Memory(m) => Ok(m.invalidate(fingerprint)),
            Backend::Redis(r) => r.invalidate(fingerprint).await,
        }
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        match &self.backend {
            Backend::Memory(m) => m.clear(),
            Backend::Redis(r) => r.clear().await?,
        }
        tracing::info!("response cache cleared");
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        match &self.backend {
            Backend::Memory(m) => Ok(m.stats()),
            Backend::Redis(r) => r.stats().await,
        }
    }

    /// Sweep expired in-memory entries; Redis expires keys itself
    pub fn purge_expired(&self) -> usize {
        match &self.backend {
            Backend::Memory(m) => m.purge_expired(),
            Backend::Redis(_) => 0,
        }
    }
}

impl std::fmt::Debug for ResponseCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match self.backend {
            Backend::Memory(_) => "memory",
            Backend::Redis(_) => "redis",
        };
        f.debug_struct("ResponseCache")
            .field("backend", &backend)
            .field("semantic", &self.semantic)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use switchboard_core::{GenerationParams, ManualClock, Message};

    use super::*;

    fn fingerprint(prompt: &str, model: &str) -> Fingerprint {
        Fingerprint::compute(&[Message::user(prompt)], model, &GenerationParams::default())
    }

    fn cluster(messages: &[Message]) -> String {
        semantic_key(messages, &GenerationParams::default()).unwrap()
    }

    fn response(content: &str) -> CachedResponse {
        CachedResponse {
            content: content.to_owned(),
            provider: "openai".to_owned(),
            model: "gpt-4o".to_owned(),
            input_tokens: 10,
            output_tokens: 20,
        }
    }

    #[tokio::test]
    async fn config_builds_memory_backend() {
        let cache = ResponseCache::new(&CacheConfig::default(), Arc::new(ManualClock::default())).unwrap();
        let fp = fingerprint("hello", "openai/gpt-4o");

        assert!(cache.get(&fp).await.unwrap().is_none());
        cache
            .put(
                &fp,
                response("hi"),
                "openai/gpt-4o",
                Some(cluster(&[Message::user("hello")])),
                Duration::from_secs(60),
            )
            .await
            .unwrap();
        assert_eq!(cache.get(&fp).await.unwrap().unwrap().response, response("hi"));
        assert_eq!(cache.stats().await.unwrap().total_keys, 1);
    }

    #[tokio::test]
    async fn similar_lookup_matches_prefix_and_model() {
        let cache = ResponseCache::in_memory(usize::MAX, Arc::new(ManualClock::default()));
        let prompt = "Explain how the tokio scheduler balances work across worker threads in detail";
        cache
            .put(
                &fingerprint(prompt, "openai/gpt-4o"),
                response("answer"),
                "openai/gpt-4o",
                Some(cluster(&[Message::user(prompt)])),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        let similar = cluster(&[Message::user(
            "explain how the tokio scheduler balances work across worker threads briefly, please",
        )]);
        let hit = cache.get_similar(&similar, "openai/gpt-4o").await.unwrap();
        assert_eq!(hit.unwrap().response.content, "answer");

        assert!(cache.get_similar(&similar, "anthropic/claude").await.unwrap().is_none());
        let unrelated = cluster(&[Message::user("something else entirely")]);
        assert!(cache.get_similar(&unrelated, "openai/gpt-4o").await.unwrap().is_none());

        let instructed = cluster(&[
            Message::system("answer in French"),
            Message::user("explain how the tokio scheduler balances work across worker threads briefly"),
        ]);
        assert!(cache.get_similar(&instructed, "openai/gpt-4o").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn semantic_index_can_be_disabled() {
        let config = CacheConfig {
            semantic: false,
            ..CacheConfig::default()
        };
        let cache = ResponseCache::new(&config, Arc::new(ManualClock::default())).unwrap();
        cache
            .put(
                &fingerprint("what is rust", "m"),
                response("a language"),
                "m",
                Some(cluster(&[Message::user("what is rust")])),
                Duration::from_secs(60),
            )
            .await
            .unwrap();

        assert!(
            cache
                .get_similar(&cluster(&[Message::user("what is rust")]), "m")
                .await
                .unwrap()
                .is_none()
        );
        assert_eq!(cache.stats().await.unwrap().semantic_keys, 0);
    }

    #[tokio::test]
    async fn expired_entries_are_purged() {
        let clock = Arc::new(ManualClock::default());
        let cache = ResponseCache::in_memory(usize::MAX, clock.clone());
        let fp = fingerprint("hello", "m");
        cache.put(&fp, response("hi"), "m", None, Duration::from_secs(1)).await.unwrap();

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.stats().await.unwrap(), CacheStats::default());
    }

    #[tokio::test]
    async fn invalidate_then_clear() {
        let cache = ResponseCache::in_memory(usize::MAX, Arc::new(ManualClock::default()));
        let fp = fingerprint("hello", "m");
        cache.put(&fp, response("hi"), "m", None, Duration::from_secs(60)).await.unwrap();

        assert!(cache.invalidate(&fp).await.unwrap());
        assert!(cache.get(&fp).await.unwrap().is_none());

        cache.put(&fp, response("hi"), "m", None, Duration::from_secs(60)).await.unwrap();
        cache.clear().await.unwrap();
        assert!(cache.get(&fp).await.unwrap().is_none());
    }
}
