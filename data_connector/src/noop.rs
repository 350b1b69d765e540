//! NoOp cache implementation
//!
//! Every lookup misses and every write is discarded; used when caching is
//! disabled. The account store has no no-op variant since the gate fails
//! closed without one.

use std::time::Duration;

use async_trait::async_trait;

use super::core::*;

#[derive(Default, Debug, Clone, Copy)]
pub struct NoOpCacheStorage;

impl NoOpCacheStorage {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CacheStorage for NoOpCacheStorage {
    async fn get(&self, _key: &str) -> StorageResult<Option<String>> {
        Ok(None)
    }

    async fn set_ex(&self, _key: &str, _value: String, _ttl: Duration) -> StorageResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> StorageResult<()> {
        Ok(())
    }

    async fn append_log(&self, _key: &str, _entry: String, _max_len: usize) -> StorageResult<()> {
        Ok(())
    }
}
