//! Pluggable storage backends.
//!
//! A backend is a plain key/value store with TTL, batch operations, and
//! prefix-scoped deletion. It knows nothing about tables or queries; the
//! facade owns key layout. Implementations must be safe to call from many
//! tasks at once.

mod memory;
#[cfg(test)]
pub(crate) mod testing;

use std::time::Duration;

use async_trait::async_trait;

use super::error::CacheError;

pub use memory::MemoryStore;

/// A stored key/value pair. The value is an opaque serialized payload.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Kv {
    pub key: String,
    pub value: String,
}

impl Kv {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// Settings handed to [`StorageBackend::init`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StorageConfig {
    /// Entry lifetime. `Duration::ZERO` disables expiry.
    pub ttl: Duration,
    /// Emit per-operation debug events.
    pub debug: bool,
}

#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// One-time setup. A second call must not lose data.
    async fn init(&self, config: &StorageConfig) -> Result<(), CacheError>;

    /// Fails with [`CacheError::NotFound`] when the key is absent or expired.
    async fn get_value(&self, key: &str) -> Result<String, CacheError>;

    /// Values in the order of `keys`; fails with `NotFound` if any key is missing.
    async fn batch_get_values(&self, keys: &[String]) -> Result<Vec<String>, CacheError>;

    async fn set_key(&self, kv: Kv) -> Result<(), CacheError>;

    /// Not atomic across keys, but must never disturb keys outside the batch.
    async fn batch_set_keys(&self, kvs: Vec<Kv>) -> Result<(), CacheError>;

    async fn key_exists(&self, key: &str) -> Result<bool, CacheError>;

    /// True only if every key exists. An empty batch is trivially warm.
    async fn batch_key_exist(&self, keys: &[String]) -> Result<bool, CacheError>;

    async fn delete_key(&self, key: &str) -> Result<(), CacheError>;

    async fn batch_delete_keys(&self, keys: &[String]) -> Result<(), CacheError>;

    /// Remove every key starting with `prefix`, and nothing else.
    async fn delete_keys_with_prefix(&self, prefix: &str) -> Result<(), CacheError>;

    /// Remove every entry owned by this backend.
    async fn clean_cache(&self) -> Result<(), CacheError>;
}
