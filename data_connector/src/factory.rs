//! Storage factory: builds the configured backends and verifies connectivity
//! once, so that the caller can hold them for the life of the process.

use std::sync::Arc;

use tracing::info;

use crate::{
    config::{AccountBackend, CacheBackend, PostgresConfig, RedisConfig},
    core::{AccountStanding, AccountStorage, CacheStorage},
    memory::{MemoryAccountStorage, MemoryCacheStorage},
    noop::NoOpCacheStorage,
    postgres::{PostgresAccountStorage, PostgresStore},
    redis::{RedisCacheStorage, RedisStore},
};

/// Everything needed to build both stores.
#[derive(Debug, Clone, Default)]
pub struct StorageFactoryConfig {
    pub account_backend: AccountBackend,
    pub cache_backend: CacheBackend,
    pub postgres: Option<PostgresConfig>,
    pub redis: Option<RedisConfig>,
    /// Accounts preloaded into the memory backend.
    pub seed_accounts: Vec<AccountStanding>,
}

pub async fn create_account_storage(
    config: &StorageFactoryConfig,
) -> Result<Arc<dyn AccountStorage>, String> {
    match config.account_backend {
        AccountBackend::Memory => {
            info!(
                seeded = config.seed_accounts.len(),
                "Initializing in-memory account storage"
            );
            Ok(Arc::new(MemoryAccountStorage::with_accounts(
                config.seed_accounts.iter().cloned(),
            )))
        }
        AccountBackend::Postgres => {
            let pg = config
                .postgres
                .clone()
                .ok_or("account backend is postgres but no postgres config was given")?;
            pg.validate()?;
            info!(pool_max = pg.pool_max, table = %pg.table, "Initializing Postgres account storage");
            let store = PostgresStore::new(pg)?;
            store.check().await.map_err(|e| e.to_string())?;
            Ok(Arc::new(PostgresAccountStorage::new(store)))
        }
    }
}

pub async fn create_cache_storage(
    config: &StorageFactoryConfig,
) -> Result<Arc<dyn CacheStorage>, String> {
    match config.cache_backend {
        CacheBackend::Memory => {
            info!("Initializing in-memory cache storage");
            Ok(Arc::new(MemoryCacheStorage::new()))
        }
        CacheBackend::None => {
            info!("Cache storage disabled");
            Ok(Arc::new(NoOpCacheStorage::new()))
        }
        CacheBackend::Redis => {
            let redis = config
                .redis
                .clone()
                .ok_or("cache backend is redis but no redis config was given")?;
            redis.validate()?;
            info!(pool_max = redis.pool_max, "Initializing Redis cache storage");
            let store = RedisStore::new(redis)?;
            store.ping().await.map_err(|e| e.to_string())?;
            Ok(Arc::new(RedisCacheStorage::new(store)))
        }
    }
}
