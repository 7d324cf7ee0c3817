//! Test backends for fault paths.

use async_trait::async_trait;

use super::{Kv, StorageBackend, StorageConfig};
use crate::cache::error::CacheError;

/// Accepts `init` and fails every other operation.
pub(crate) struct UnreachableStore;

#[async_trait]
impl StorageBackend for UnreachableStore {
    async fn init(&self, _: &StorageConfig) -> Result<(), CacheError> {
        Ok(())
    }
    async fn get_value(&self, _: &str) -> Result<String, CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn batch_get_values(&self, _: &[String]) -> Result<Vec<String>, CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn set_key(&self, _: Kv) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn batch_set_keys(&self, _: Vec<Kv>) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn key_exists(&self, _: &str) -> Result<bool, CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn batch_key_exist(&self, _: &[String]) -> Result<bool, CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn delete_key(&self, _: &str) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn batch_delete_keys(&self, _: &[String]) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn delete_keys_with_prefix(&self, _: &str) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
    async fn clean_cache(&self) -> Result<(), CacheError> {
        Err(CacheError::backend("unreachable"))
    }
}
