use std::time::Duration;

use jiff::Timestamp;
use redis::AsyncCommands;
use switchboard_core::{Fingerprint, SharedClock, clock};

use crate::{CacheEntry, CacheError, CacheStats, CachedResponse};

/// Keys fetched per `SCAN` round trip
const SCAN_BATCH: usize = 200;

/// Cache stored in Redis/Valkey, expiry enforced by the server
///
/// Entries are JSON under `{prefix}:entry:{fingerprint}`; semantic clusters
/// are sets of fingerprints under `{prefix}:semantic:{key}`.
#[derive(Clone)]
pub struct RedisStore {
    client: redis::Client,
    key_prefix: String,
    clock: SharedClock,
}

impl RedisStore {
    pub fn new(url: &str, key_prefix: &str, clock: SharedClock) -> Result<Self, CacheError> {
        let client = redis::Client::open(url).map_err(|e| CacheError::Backend(format!("invalid URL: {e}")))?;

        Ok(Self {
            client,
            key_prefix: key_prefix.to_owned(),
            clock,
        })
    }

    fn entry_key(&self, fingerprint: &Fingerprint) -> String {
        format!("{}:entry:{fingerprint}", self.key_prefix)
    }

    fn semantic_key(&self, key: &str) -> String {
        format!("{}:semantic:{key}", self.key_prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| CacheError::Backend(format!("connection failed: {e}")))
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Result<Option<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let raw: Option<String> = conn
            .get(self.entry_key(fingerprint))
            .await
            .map_err(|e| CacheError::Backend(format!("GET failed: {e}")))?;

        let Some(raw) = raw else {
            return Ok(None);
        };

        let entry: CacheEntry =
            serde_json::from_str(&raw).map_err(|e| CacheError::Serialization(format!("deserialize: {e}")))?;

        // Server expiry has second granularity; never serve past expires_at
        Ok(entry.is_live(self.clock.now()).then_some(entry))
    }

    pub async fn put(
        &self,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        logical_model: &str,
        semantic_key: Option<String>,
        ttl: Duration,
    ) -> Result<CacheEntry, CacheError> {
        let now: Timestamp = self.clock.now();
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            size_bytes: CacheEntry::estimate_size(fingerprint, &response, logical_model),
            response,
            logical_model: logical_model.to_owned(),
            created_at: now,
            expires_at: clock::shift(now, ttl),
            semantic_key,
        };

        let data =
            serde_json::to_string(&entry).map_err(|e| CacheError::Serialization(format!("serialize: {e}")))?;
        let ttl_secs = ttl.as_secs().max(1);

        let mut conn = self.connection().await?;
        let _: () = conn
            .set_ex(self.entry_key(fingerprint), &data, ttl_secs)
            .await
            .map_err(|e| CacheError::Backend(format!("SET failed: {e}")))?;

        if let Some(ref key) = entry.semantic_key {
            let set_key = self.semantic_key(key);
            let _: () = conn
                .sadd(&set_key, fingerprint.as_str())
                .await
                .map_err(|e| CacheError::Backend(format!("SADD failed: {e}")))?;
            let _: () = conn
                .expire(&set_key, i64::try_from(ttl_secs).unwrap_or(i64::MAX))
                .await
                .map_err(|e| CacheError::Backend(format!("EXPIRE failed: {e}")))?;
        }

        Ok(entry)
    }

    pub async fn cluster(&self, semantic_key: &str) -> Result<Vec<CacheEntry>, CacheError> {
        let mut conn = self.connection().await?;
        let members: Vec<String> = conn
            .smembers(self.semantic_key(semantic_key))
            .await
            .map_err(|e| CacheError::Backend(format!("SMEMBERS failed: {e}")))?;

        let mut live = Vec::with_capacity(members.len());
        for member in members {
            if let Some(entry) = self.get(&Fingerprint::from_hex(member)).await? {
                live.push(entry);
            }
        }
        Ok(live)
    }

    pub async fn invalidate(&self, fingerprint: &Fingerprint) -> Result<bool, CacheError> {
        let mut conn = self.connection().await?;
        let removed: u32 = conn
            .del(self.entry_key(fingerprint))
            .await
            .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;
        Ok(removed > 0)
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        let mut conn = self.connection().await?;
        let keys = self.scan(&mut conn, &format!("{}:*", self.key_prefix)).await?;
        for chunk in keys.chunks(SCAN_BATCH) {
            let _: () = conn
                .del(chunk)
                .await
                .map_err(|e| CacheError::Backend(format!("DEL failed: {e}")))?;
        }
        Ok(())
    }

    pub async fn stats(&self) -> Result<CacheStats, CacheError> {
        let mut conn = self.connection().await?;
        let entries = self.scan(&mut conn, &format!("{}:entry:*", self.key_prefix)).await?;
        let clusters = self.scan(&mut conn, &format!("{}:semantic:*", self.key_prefix)).await?;

        let mut estimated_size_bytes = 0usize;
        for key in &entries {
            let len: usize = conn
                .strlen(key)
                .await
                .map_err(|e| CacheError::Backend(format!("STRLEN failed: {e}")))?;
            estimated_size_bytes += len;
        }

        Ok(CacheStats {
            total_keys: entries.len(),
            semantic_keys: clusters.len(),
            estimated_size_bytes,
        })
    }

    async fn scan(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        pattern: &str,
    ) -> Result<Vec<String>, CacheError> {
        let mut cursor = 0u64;
        let mut keys = Vec::new();

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(conn)
                .await
                .map_err(|e| CacheError::Backend(format!("SCAN failed: {e}")))?;

            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}
