//! Bounded in-process backend.
//!
//! Entries live in a single LRU map; the least recently read entry is evicted
//! once capacity is reached. Expiry is passive: an expired entry is dropped
//! the next time it is read or checked.

use std::num::NonZeroUsize;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use lru::LruCache;
use metrics::counter;
use tracing::debug;

use super::{Kv, StorageBackend, StorageConfig};
use crate::cache::config::CacheConfig;
use crate::cache::error::CacheError;
use crate::cache::lock::mutex_lock;

const SOURCE: &str = "cache::storage::memory";
const METRIC_MEMORY_EVICT: &str = "sqlcache_memory_evict_total";

struct Entry {
    value: String,
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

pub struct MemoryStore {
    entries: Mutex<LruCache<String, Entry>>,
    ttl_ms: AtomicU64,
    debug: AtomicBool,
}

impl MemoryStore {
    pub fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl_ms: AtomicU64::new(0),
            debug: AtomicBool::new(false),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.memory_capacity_non_zero())
    }

    /// Number of stored entries, including expired ones not yet dropped.
    pub fn len(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        mutex_lock(&self.entries, SOURCE, "capacity").cap().get()
    }

    fn expiry(&self, now: Instant) -> Option<Instant> {
        match self.ttl_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => now.checked_add(Duration::from_millis(ms)),
        }
    }

    fn trace(&self, op: &'static str, key: &str, outcome: &'static str) {
        if self.debug.load(Ordering::Relaxed) {
            debug!(op, key, outcome, "memory store");
        }
    }

    fn insert(&self, entries: &mut LruCache<String, Entry>, kv: Kv, now: Instant) {
        let entry = Entry {
            value: kv.value,
            expires_at: self.expiry(now),
        };
        if let Some((evicted, _)) = entries.push(kv.key.clone(), entry)
            && evicted != kv.key
        {
            counter!(METRIC_MEMORY_EVICT).increment(1);
            self.trace("evict", &evicted, "evicted");
        }
    }

    /// Look up a live entry, dropping it if it has expired.
    fn live<'a>(
        entries: &'a mut LruCache<String, Entry>,
        key: &str,
        now: Instant,
    ) -> Option<&'a Entry> {
        let expired = entries.peek(key)?.is_expired(now);
        if expired {
            entries.pop(key);
            return None;
        }
        entries.get(key)
    }

    fn exists(entries: &mut LruCache<String, Entry>, key: &str, now: Instant) -> bool {
        match entries.peek(key) {
            Some(entry) if entry.is_expired(now) => {
                entries.pop(key);
                false
            }
            Some(_) => true,
            None => false,
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

#[async_trait]
impl StorageBackend for MemoryStore {
    async fn init(&self, config: &StorageConfig) -> Result<(), CacheError> {
        let ttl_ms = u64::try_from(config.ttl.as_millis())
            .map_err(|_| CacheError::init("ttl exceeds supported range"))?;
        self.ttl_ms.store(ttl_ms, Ordering::Relaxed);
        self.debug.store(config.debug, Ordering::Relaxed);
        Ok(())
    }

    async fn get_value(&self, key: &str) -> Result<String, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "get_value");
        let value = Self::live(&mut entries, key, now).map(|entry| entry.value.clone());
        drop(entries);

        match value {
            Some(value) => {
                self.trace("get_value", key, "hit");
                Ok(value)
            }
            None => {
                self.trace("get_value", key, "miss");
                Err(CacheError::not_found(key))
            }
        }
    }

    async fn batch_get_values(&self, keys: &[String]) -> Result<Vec<String>, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "batch_get_values");
        let mut values = Vec::with_capacity(keys.len());
        for key in keys {
            match Self::live(&mut entries, key, now) {
                Some(entry) => values.push(entry.value.clone()),
                None => return Err(CacheError::not_found(key.as_str())),
            }
        }
        Ok(values)
    }

    async fn set_key(&self, kv: Kv) -> Result<(), CacheError> {
        let now = Instant::now();
        self.trace("set_key", &kv.key, "stored");
        let mut entries = mutex_lock(&self.entries, SOURCE, "set_key");
        self.insert(&mut entries, kv, now);
        Ok(())
    }

    async fn batch_set_keys(&self, kvs: Vec<Kv>) -> Result<(), CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "batch_set_keys");
        for kv in kvs {
            self.insert(&mut entries, kv, now);
        }
        Ok(())
    }

    async fn key_exists(&self, key: &str) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "key_exists");
        Ok(Self::exists(&mut entries, key, now))
    }

    async fn batch_key_exist(&self, keys: &[String]) -> Result<bool, CacheError> {
        let now = Instant::now();
        let mut entries = mutex_lock(&self.entries, SOURCE, "batch_key_exist");
        Ok(keys.iter().all(|key| Self::exists(&mut entries, key, now)))
    }

    async fn delete_key(&self, key: &str) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "delete_key").pop(key);
        self.trace("delete_key", key, "deleted");
        Ok(())
    }

    async fn batch_delete_keys(&self, keys: &[String]) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "batch_delete_keys");
        for key in keys {
            entries.pop(key.as_str());
        }
        Ok(())
    }

    async fn delete_keys_with_prefix(&self, prefix: &str) -> Result<(), CacheError> {
        let mut entries = mutex_lock(&self.entries, SOURCE, "delete_keys_with_prefix");
        let doomed: Vec<String> = entries
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect();
        for key in &doomed {
            entries.pop(key.as_str());
        }
        drop(entries);
        self.trace("delete_keys_with_prefix", prefix, "deleted");
        Ok(())
    }

    async fn clean_cache(&self) -> Result<(), CacheError> {
        mutex_lock(&self.entries, SOURCE, "clean_cache").clear();
        Ok(())
    }
}
