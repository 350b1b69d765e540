// core.rs
//
// Core types for the data connector module.
// Contains the traits, data types and error type shared by all backends.
//
// Structure:
// 1. Account types + trait
// 2. Cache/log trait

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Result alias for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Error type for storage operations
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Storage error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// ============================================================================
// PART 1: Account Storage
// ============================================================================

/// Balance and subscription state of one caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AccountStanding {
    pub email: String,
    pub credits: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subscription_expires_at: Option<DateTime<Utc>>,
}

impl AccountStanding {
    pub fn new(email: impl Into<String>, credits: i64) -> Self {
        Self {
            email: email.into(),
            credits,
            subscription_expires_at: None,
        }
    }

    pub fn with_subscription(mut self, expires_at: DateTime<Utc>) -> Self {
        self.subscription_expires_at = Some(expires_at);
        self
    }

    pub fn has_active_subscription(&self, now: DateTime<Utc>) -> bool {
        self.subscription_expires_at
            .is_some_and(|expires_at| expires_at > now)
    }

    pub fn can_afford(&self, cost: i64) -> bool {
        self.credits >= cost
    }
}

/// A best-effort log line describing one gated action.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActivityRecord {
    pub email: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub outcome: String,
    pub at: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        email: impl Into<String>,
        action: impl Into<String>,
        model: Option<String>,
        outcome: impl Into<String>,
    ) -> Self {
        Self {
            email: email.into(),
            action: action.into(),
            model,
            outcome: outcome.into(),
            at: Utc::now(),
        }
    }
}

/// Authoritative store of caller balances and subscriptions.
#[async_trait]
pub trait AccountStorage: Send + Sync + 'static {
    /// Look up a caller by (normalized) email.
    async fn get_account(&self, email: &str) -> StorageResult<Option<AccountStanding>>;

    /// Deduct `amount` credits only if the balance covers it, as one atomic
    /// operation. Returns `false` when the balance was insufficient or the
    /// account does not exist.
    async fn try_deduct(&self, email: &str, amount: i64) -> StorageResult<bool>;
}

// ============================================================================
// PART 2: Cache / Log Storage
// ============================================================================

/// Key-value cache with expiry plus bounded append-only logs.
#[async_trait]
pub trait CacheStorage: Send + Sync + 'static {
    async fn get(&self, key: &str) -> StorageResult<Option<String>>;

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()>;

    async fn delete(&self, key: &str) -> StorageResult<()>;

    /// Prepend `entry` to the list at `key`, keeping at most `max_len` entries.
    async fn append_log(&self, key: &str, entry: String, max_len: usize) -> StorageResult<()>;
}
