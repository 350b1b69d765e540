//! Data connector module for account standing and cache/log storage.
//!
//! Provides storage backends for:
//! - Accounts (credit balance, subscription expiry, atomic deduction)
//! - Cache entries and activity logs
//!
//! Supported backends:
//! - Memory (default)
//! - None (no-op, cache only)
//! - Postgres (accounts)
//! - Redis (cache)

mod common;
pub mod config;
mod core;
mod factory;
mod memory;
mod noop;
mod postgres;
mod redis;

// Re-export core types and traits
pub use core::{
    AccountStanding, AccountStorage, ActivityRecord, CacheStorage, StorageError, StorageResult,
};

// Re-export config types
pub use config::{AccountBackend, CacheBackend, PostgresConfig, RedisConfig};
// Re-export factory
pub use factory::{create_account_storage, create_cache_storage, StorageFactoryConfig};
// Re-export memory implementations for testing and local development
pub use memory::{MemoryAccountStorage, MemoryCacheStorage};
pub use noop::NoOpCacheStorage;
