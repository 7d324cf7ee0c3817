//! Post-commit invalidation.
//!
//! A write to a table drops the exact primary-key entries of the rows it
//! touched and the table's entire search namespace. Search results are not
//! tracked per row, so any cached query over the table is treated as stale.
//!
//! Every invalidation first advances the table's epoch. A reader that loaded
//! under an older epoch must not write its result back.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use metrics::counter;
use tracing::{error, info};

use super::error::CacheError;
use super::keys::KeyCodec;
use super::stats::CacheStats;
use super::storage::StorageBackend;

const METRIC_INVALIDATE_TOTAL: &str = "sqlcache_invalidate_total";

/// The committed mutation that triggered invalidation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Create,
    Update,
    Delete,
}

impl WriteKind {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteKind::Create => "create",
            WriteKind::Update => "update",
            WriteKind::Delete => "delete",
        }
    }
}

pub struct InvalidationManager {
    backend: Arc<dyn StorageBackend>,
    keys: KeyCodec,
    instance_id: String,
    epochs: DashMap<String, AtomicU64>,
    generation: AtomicU64,
}

impl InvalidationManager {
    pub fn new(backend: Arc<dyn StorageBackend>, keys: KeyCodec, instance_id: String) -> Self {
        Self {
            backend,
            keys,
            instance_id,
            epochs: DashMap::new(),
            generation: AtomicU64::new(0),
        }
    }

    /// Invalidation epoch of `table`. It only moves forward and changes
    /// whenever the table (or the whole cache) is invalidated.
    pub fn epoch(&self, table: &str) -> u64 {
        let table_epoch = self
            .epochs
            .get(table)
            .map(|epoch| epoch.load(Ordering::SeqCst))
            .unwrap_or(0);
        self.generation.load(Ordering::SeqCst) + table_epoch
    }

    fn advance(&self, table: &str) {
        if let Some(epoch) = self.epochs.get(table) {
            epoch.fetch_add(1, Ordering::SeqCst);
            return;
        }
        self.epochs
            .entry(table.to_owned())
            .or_default()
            .fetch_add(1, Ordering::SeqCst);
    }

    /// Invalidate after a committed write of `primary_keys` in `table`.
    pub async fn on_write(
        &self,
        kind: WriteKind,
        table: &str,
        primary_keys: &[String],
    ) -> Result<(), CacheError> {
        let result = self.apply_write(table, primary_keys).await;
        if let Err(err) = &result {
            error!(
                table,
                write = kind.as_str(),
                rows = primary_keys.len(),
                error = %err,
                "Cache invalidation failed after committed write"
            );
        }
        result
    }

    async fn apply_write(&self, table: &str, primary_keys: &[String]) -> Result<(), CacheError> {
        if !primary_keys.is_empty() {
            self.batch_invalidate_primary(table, primary_keys).await?;
        }
        self.invalidate_search(table).await
    }

    pub async fn invalidate_primary(
        &self,
        table: &str,
        primary_key: &str,
    ) -> Result<(), CacheError> {
        self.advance(table);
        let key = self.keys.primary_key(&self.instance_id, table, primary_key);
        self.backend.delete_key(&key).await?;
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "primary").increment(1);
        Ok(())
    }

    pub async fn batch_invalidate_primary(
        &self,
        table: &str,
        primary_keys: &[String],
    ) -> Result<(), CacheError> {
        let keys: Vec<String> = primary_keys
            .iter()
            .map(|pk| self.keys.primary_key(&self.instance_id, table, pk))
            .collect();
        self.advance(table);
        self.backend.batch_delete_keys(&keys).await?;
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "primary").increment(keys.len() as u64);
        Ok(())
    }

    /// Drop every primary-key entry of `table`.
    pub async fn invalidate_all_primary(&self, table: &str) -> Result<(), CacheError> {
        let prefix = self.keys.primary_prefix(&self.instance_id, table);
        self.advance(table);
        self.backend.delete_keys_with_prefix(&prefix).await?;
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "primary_table").increment(1);
        Ok(())
    }

    /// Drop every search entry of `table`.
    pub async fn invalidate_search(&self, table: &str) -> Result<(), CacheError> {
        let prefix = self.keys.search_prefix(&self.instance_id, table);
        self.advance(table);
        self.backend.delete_keys_with_prefix(&prefix).await?;
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "search_table").increment(1);
        Ok(())
    }

    /// Wipe the whole backend, every instance included, and zero the counters.
    pub async fn reset(&self, stats: &CacheStats) -> Result<(), CacheError> {
        stats.reset_hit_count();
        self.generation.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.backend.clean_cache().await {
            error!(error = %err, "Cache reset failed");
            return Err(err);
        }
        counter!(METRIC_INVALIDATE_TOTAL, "scope" => "all").increment(1);
        info!(instance_id = %self.instance_id, "Cache reset");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::cache::outcome::HitKind;
    use crate::cache::storage::testing::UnreachableStore;
    use crate::cache::storage::{Kv, MemoryStore, StorageConfig};

    async fn manager() -> (Arc<MemoryStore>, InvalidationManager) {
        let store = Arc::new(MemoryStore::default());
        store
            .init(&StorageConfig {
                ttl: Duration::ZERO,
                debug: false,
            })
            .await
            .expect("init");
        let manager = InvalidationManager::new(store.clone(), KeyCodec::default(), "i".into());
        (store, manager)
    }

    #[tokio::test]
    async fn write_drops_rows_and_table_search_namespace() {
        let (store, manager) = manager().await;
        let keys = KeyCodec::default();

        let user_1 = keys.primary_key("i", "users", "1");
        let user_2 = keys.primary_key("i", "users", "2");
        let user_search = keys.search_key("i", "users", "SELECT * FROM users", &[]);
        let order_search = keys.search_key("i", "orders", "SELECT * FROM orders", &[json!(1)]);
        store
            .batch_set_keys(vec![
                Kv::new(user_1.clone(), "a"),
                Kv::new(user_2.clone(), "b"),
                Kv::new(user_search.clone(), "[]"),
                Kv::new(order_search.clone(), "[]"),
            ])
            .await
            .expect("seed");

        manager
            .on_write(WriteKind::Update, "users", &["1".to_string()])
            .await
            .expect("invalidate");

        assert!(!store.key_exists(&user_1).await.expect("exists"));
        assert!(store.key_exists(&user_2).await.expect("exists"));
        assert!(!store.key_exists(&user_search).await.expect("exists"));
        assert!(store.key_exists(&order_search).await.expect("exists"));
    }

    #[tokio::test]
    async fn all_primary_invalidation_keeps_search_entries() {
        let (store, manager) = manager().await;
        let keys = KeyCodec::default();
        let user_1 = keys.primary_key("i", "users", "1");
        let user_search = keys.search_key("i", "users", "SELECT 1", &[]);
        store
            .batch_set_keys(vec![
                Kv::new(user_1.clone(), "a"),
                Kv::new(user_search.clone(), "b"),
            ])
            .await
            .expect("seed");

        manager
            .invalidate_all_primary("users")
            .await
            .expect("invalidate");

        assert!(!store.key_exists(&user_1).await.expect("exists"));
        assert!(store.key_exists(&user_search).await.expect("exists"));
    }

    #[tokio::test]
    async fn every_invalidation_advances_the_table_epoch() {
        let (_store, manager) = manager().await;
        assert_eq!(manager.epoch("users"), 0);

        manager
            .invalidate_primary("users", "1")
            .await
            .expect("invalidate");
        let after_primary = manager.epoch("users");
        assert!(after_primary > 0);

        manager
            .on_write(WriteKind::Create, "users", &["2".to_string()])
            .await
            .expect("invalidate");
        let after_write = manager.epoch("users");
        assert!(after_write > after_primary);
        assert_eq!(manager.epoch("orders"), 0);

        manager.reset(&CacheStats::new()).await.expect("reset");
        assert!(manager.epoch("users") > after_write);
        assert!(manager.epoch("orders") > 0);
    }

    #[tokio::test]
    async fn reset_clears_backend_and_counters() {
        let (store, manager) = manager().await;
        let stats = CacheStats::new();
        stats.record_hit(HitKind::Search);
        store.set_key(Kv::new("other:key", "v")).await.expect("seed");

        manager.reset(&stats).await.expect("reset");

        assert!(store.is_empty());
        assert_eq!(stats.hit_count(), 0);
    }

    #[tokio::test]
    async fn backend_faults_surface_to_the_writer() {
        let manager =
            InvalidationManager::new(Arc::new(UnreachableStore), KeyCodec::default(), "i".into());

        let error = manager
            .on_write(WriteKind::Delete, "users", &["1".to_string()])
            .await
            .expect_err("invalidation must report backend faults");
        assert!(matches!(error, CacheError::Backend { .. }));

        let error = manager
            .on_write(WriteKind::Create, "users", &[])
            .await
            .expect_err("search invalidation must report backend faults");
        assert!(matches!(error, CacheError::Backend { .. }));
        assert!(manager.epoch("users") >= 2);
    }
}
