use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use switchboard_core::{Fingerprint, SharedClock, clock};

use crate::{CacheEntry, CacheStats, CachedResponse};

/// Process-local cache bounded by an approximate byte ceiling
///
/// Expiry is checked while the entry's shard lock is held, so a sweep
/// running concurrently can never hand out an expired entry.
pub struct MemoryStore {
    entries: DashMap<Fingerprint, CacheEntry>,
    semantic: DashMap<String, Vec<Fingerprint>>,
    size_bytes: AtomicUsize,
    max_size_bytes: usize,
    clock: SharedClock,
}

impl MemoryStore {
    pub fn new(max_size_bytes: usize, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            semantic: DashMap::new(),
            size_bytes: AtomicUsize::new(0),
            max_size_bytes,
            clock,
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<CacheEntry> {
        let now = self.clock.now();

        let hit = self.entries.get(fingerprint).map(|entry| entry.is_live(now).then(|| entry.value().clone()));
        match hit {
            Some(Some(entry)) => Some(entry),
            Some(None) => {
                if let Some((_, expired)) = self.entries.remove_if(fingerprint, |_, e| !e.is_live(now)) {
                    self.forget(&expired);
                }
                None
            }
            None => None,
        }
    }

    pub fn put(
        &self,
        fingerprint: &Fingerprint,
        response: CachedResponse,
        logical_model: &str,
        semantic_key: Option<String>,
        ttl: Duration,
    ) -> CacheEntry {
        let now = self.clock.now();
        let entry = CacheEntry {
            fingerprint: fingerprint.clone(),
            size_bytes: CacheEntry::estimate_size(fingerprint, &response, logical_model),
            response,
            logical_model: logical_model.to_owned(),
            created_at: now,
            expires_at: clock::shift(now, ttl),
            semantic_key,
        };

        self.size_bytes.fetch_add(entry.size_bytes, Ordering::Relaxed);
        if let Some(ref key) = entry.semantic_key {
            let mut members = self.semantic.entry(key.clone()).or_default();
            if !members.contains(fingerprint) {
                members.push(fingerprint.clone());
            }
        }

        if let Some(replaced) = self.entries.insert(fingerprint.clone(), entry.clone()) {
            self.size_bytes.fetch_sub(replaced.size_bytes, Ordering::Relaxed);
            if replaced.semantic_key != entry.semantic_key {
                self.unindex(&replaced);
            }
        }

        self.enforce_ceiling();
        entry
    }

    /// Live entries sharing a semantic cluster
    pub fn cluster(&self, semantic_key: &str) -> Vec<CacheEntry> {
        let members = self.semantic.get(semantic_key).map(|m| m.value().clone()).unwrap_or_default();
        members.iter().filter_map(|fingerprint| self.get(fingerprint)).collect()
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        match self.entries.remove(fingerprint) {
            Some((_, entry)) => {
                self.forget(&entry);
                true
            }
            None => false,
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
        self.semantic.clear();
        self.size_bytes.store(0, Ordering::Relaxed);
    }

    /// Remove every expired entry, returning how many went
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now();
        let mut expired = Vec::new();

        self.entries.retain(|_, entry| {
            let live = entry.is_live(now);
            if !live {
                expired.push((entry.size_bytes, entry.semantic_key.clone(), entry.fingerprint.clone()));
            }
            live
        });

        for (size, semantic_key, fingerprint) in &expired {
            self.size_bytes.fetch_sub(*size, Ordering::Relaxed);
            if let Some(key) = semantic_key {
                self.remove_member(key, fingerprint);
            }
        }

        expired.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            total_keys: self.entries.len(),
            semantic_keys: self.semantic.len(),
            estimated_size_bytes: self.size_bytes.load(Ordering::Relaxed),
        }
    }

    /// Evict oldest-`expires_at`-first until the size estimate fits
    fn enforce_ceiling(&self) {
        if self.size_bytes.load(Ordering::Relaxed) <= self.max_size_bytes {
            return;
        }

        self.purge_expired();

        let mut by_expiry: Vec<_> = self
            .entries
            .iter()
            .map(|entry| (entry.expires_at, entry.key().clone()))
            .collect();
        by_expiry.sort_unstable();

        let mut evicted = 0usize;
        for (_, fingerprint) in by_expiry {
            if self.size_bytes.load(Ordering::Relaxed) <= self.max_size_bytes {
                break;
            }
            if self.invalidate(&fingerprint) {
                evicted += 1;
            }
        }

        if evicted > 0 {
            tracing::debug!(
                evicted,
                size_bytes = self.size_bytes.load(Ordering::Relaxed),
                max_size_bytes = self.max_size_bytes,
                "evicted cache entries over size ceiling"
            );
        }
    }

    fn forget(&self, entry: &CacheEntry) {
        self.size_bytes.fetch_sub(entry.size_bytes, Ordering::Relaxed);
        self.unindex(entry);
    }

    fn unindex(&self, entry: &CacheEntry) {
        if let Some(ref key) = entry.semantic_key {
            self.remove_member(key, &entry.fingerprint);
        }
    }

    fn remove_member(&self, semantic_key: &str, fingerprint: &Fingerprint) {
        if let Some(mut members) = self.semantic.get_mut(semantic_key) {
            members.retain(|member| member != fingerprint);
        }
        self.semantic.remove_if(semantic_key, |_, members| members.is_empty());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use switchboard_core::{GenerationParams, ManualClock, Message};

    use super::*;

    fn fingerprint(prompt: &str) -> Fingerprint {
        Fingerprint::compute(&[Message::user(prompt)], "openai/gpt-4o", &GenerationParams::default())
    }

    fn response(content: &str) -> CachedResponse {
        CachedResponse {
            content: content.to_owned(),
            provider: "openai".to_owned(),
            model: "gpt-4o".to_owned(),
            input_tokens: 3,
            output_tokens: 5,
        }
    }

    fn store(max_size_bytes: usize) -> (MemoryStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::default());
        (MemoryStore::new(max_size_bytes, clock.clone()), clock)
    }

    #[test]
    fn entry_is_never_served_after_expiry() {
        let (store, clock) = store(usize::MAX);
        let fp = fingerprint("hello");
        store.put(&fp, response("hi"), "openai/gpt-4o", None, Duration::from_secs(10));

        clock.advance(Duration::from_millis(9_999));
        assert_eq!(store.get(&fp).unwrap().response.content, "hi");

        clock.advance(Duration::from_millis(1));
        assert!(store.get(&fp).is_none());
        assert_eq!(store.stats().total_keys, 0);
        assert_eq!(store.stats().estimated_size_bytes, 0);
    }

    #[test]
    fn put_replaces_and_resets_ttl() {
        let (store, clock) = store(usize::MAX);
        let fp = fingerprint("hello");
        store.put(&fp, response("first"), "openai/gpt-4o", None, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));
        store.put(&fp, response("second"), "openai/gpt-4o", None, Duration::from_secs(10));
        clock.advance(Duration::from_secs(8));

        let entry = store.get(&fp).unwrap();
        assert_eq!(entry.response.content, "second");
        assert_eq!(store.stats().total_keys, 1);
        assert_eq!(store.stats().estimated_size_bytes, entry.size_bytes);
    }

    #[test]
    fn ceiling_evicts_soonest_expiring_first() {
        let entry_size = CacheEntry::estimate_size(&fingerprint("a"), &response("x"), "openai/gpt-4o");
        let (store, _) = store(entry_size * 2);

        let short = fingerprint("a");
        let long = fingerprint("b");
        let newest = fingerprint("c");
        store.put(&short, response("x"), "openai/gpt-4o", None, Duration::from_secs(10));
        store.put(&long, response("x"), "openai/gpt-4o", None, Duration::from_secs(1000));
        store.put(&newest, response("x"), "openai/gpt-4o", None, Duration::from_secs(500));

        assert!(store.get(&short).is_none());
        assert!(store.get(&long).is_some());
        assert!(store.get(&newest).is_some());
        assert!(store.stats().estimated_size_bytes <= entry_size * 2);
    }

    #[test]
    fn purge_removes_only_expired() {
        let (store, clock) = store(usize::MAX);
        store.put(&fingerprint("a"), response("x"), "m", Some("k".to_owned()), Duration::from_secs(5));
        store.put(&fingerprint("b"), response("x"), "m", None, Duration::from_secs(50));
        clock.advance(Duration::from_secs(6));

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.stats().total_keys, 1);
        assert_eq!(store.stats().semantic_keys, 0);
    }

    #[test]
    fn cluster_returns_live_members() {
        let (store, clock) = store(usize::MAX);
        store.put(&fingerprint("a"), response("one"), "m", Some("k".to_owned()), Duration::from_secs(5));
        store.put(&fingerprint("b"), response("two"), "m", Some("k".to_owned()), Duration::from_secs(50));
        assert_eq!(store.cluster("k").len(), 2);

        clock.advance(Duration::from_secs(6));
        let live = store.cluster("k");
        assert_eq!(live.len(), 1);
        assert_eq!(live[0].response.content, "two");
    }

    #[test]
    fn invalidate_and_clear() {
        let (store, _) = store(usize::MAX);
        let fp = fingerprint("a");
        store.put(&fp, response("x"), "m", Some("k".to_owned()), Duration::from_secs(5));
        assert!(store.invalidate(&fp));
        assert!(!store.invalidate(&fp));
        assert_eq!(store.stats().semantic_keys, 0);

        store.put(&fp, response("x"), "m", None, Duration::from_secs(5));
        store.clear();
        assert_eq!(store.stats(), CacheStats::default());
    }
}
