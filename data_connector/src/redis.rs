//! Redis cache implementation
//!
//! Cache entries are plain string keys written with `SETEX`; activity logs
//! are lists maintained with `LPUSH` + `LTRIM` in one pipeline.

use std::time::Duration;

use async_trait::async_trait;
use deadpool_redis::{Config, Pool, Runtime};
use redis::AsyncCommands;

use crate::{
    common::{backend_error, ttl_secs, unavailable},
    config::RedisConfig,
    core::{CacheStorage, StorageResult},
};

#[derive(Clone)]
pub(crate) struct RedisStore {
    pool: Pool,
}

impl RedisStore {
    pub fn new(config: RedisConfig) -> Result<Self, String> {
        let mut cfg = Config::from_url(config.url);
        cfg.pool = Some(deadpool_redis::PoolConfig::new(config.pool_max));
        let pool = cfg
            .create_pool(Some(Runtime::Tokio1))
            .map_err(|e| e.to_string())?;
        Ok(Self { pool })
    }

    async fn conn(&self) -> StorageResult<deadpool_redis::Connection> {
        self.pool.get().await.map_err(unavailable)
    }

    /// Round-trip a `PING` to surface bad URLs and credentials at startup.
    pub async fn ping(&self) -> StorageResult<()> {
        let mut conn = self.conn().await?;
        redis::cmd("PING")
            .query_async::<String>(&mut conn)
            .await
            .map_err(backend_error)?;
        Ok(())
    }
}

pub(super) struct RedisCacheStorage {
    store: RedisStore,
}

impl RedisCacheStorage {
    pub fn new(store: RedisStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl CacheStorage for RedisCacheStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let mut conn = self.store.conn().await?;
        conn.get(key).await.map_err(backend_error)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()> {
        let mut conn = self.store.conn().await?;
        conn.set_ex::<_, _, ()>(key, value, ttl_secs(ttl))
            .await
            .map_err(backend_error)
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        let mut conn = self.store.conn().await?;
        conn.del::<_, ()>(key).await.map_err(backend_error)
    }

    async fn append_log(&self, key: &str, entry: String, max_len: usize) -> StorageResult<()> {
        let mut conn = self.store.conn().await?;
        let stop = max_len.saturating_sub(1) as isize;

        let mut pipe = redis::pipe();
        pipe.lpush(key, entry).ignore();
        pipe.ltrim(key, 0, stop).ignore();
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(backend_error)
    }
}
