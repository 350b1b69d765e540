//! In-memory storage implementations
//!
//! Used by default and in tests. Accounts live in a `DashMap`; a deduction
//! holds the entry's shard lock for the check and the subtraction, which
//! makes it atomic with respect to concurrent deductions.

use std::{collections::VecDeque, time::Duration};

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;

use crate::{
    common::normalize_email,
    core::{AccountStanding, AccountStorage, CacheStorage, StorageResult},
};

// ============================================================================
// PART 1: MemoryAccountStorage
// ============================================================================

#[derive(Default)]
pub struct MemoryAccountStorage {
    accounts: DashMap<String, AccountStanding>,
}

impl MemoryAccountStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_accounts(accounts: impl IntoIterator<Item = AccountStanding>) -> Self {
        let storage = Self::new();
        for account in accounts {
            storage.upsert(account);
        }
        storage
    }

    /// Insert or replace an account.
    pub fn upsert(&self, mut account: AccountStanding) {
        account.email = normalize_email(&account.email);
        self.accounts.insert(account.email.clone(), account);
    }

    pub fn credits(&self, email: &str) -> Option<i64> {
        self.accounts
            .get(&normalize_email(email))
            .map(|entry| entry.credits)
    }
}

#[async_trait]
impl AccountStorage for MemoryAccountStorage {
    async fn get_account(&self, email: &str) -> StorageResult<Option<AccountStanding>> {
        Ok(self
            .accounts
            .get(&normalize_email(email))
            .map(|entry| entry.value().clone()))
    }

    async fn try_deduct(&self, email: &str, amount: i64) -> StorageResult<bool> {
        let Some(mut entry) = self.accounts.get_mut(&normalize_email(email)) else {
            return Ok(false);
        };
        if entry.credits < amount {
            return Ok(false);
        }
        entry.credits -= amount;
        Ok(true)
    }
}

// ============================================================================
// PART 2: MemoryCacheStorage
// ============================================================================

#[derive(Default)]
pub struct MemoryCacheStorage {
    entries: DashMap<String, (String, Instant)>,
    logs: DashMap<String, VecDeque<String>>,
}

impl MemoryCacheStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of a log list, newest first.
    pub fn log_entries(&self, key: &str) -> Vec<String> {
        self.logs
            .get(key)
            .map(|list| list.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl CacheStorage for MemoryCacheStorage {
    async fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let now = Instant::now();
        let hit = self
            .entries
            .get(key)
            .filter(|entry| entry.1 > now)
            .map(|entry| entry.0.clone());
        if hit.is_none() {
            self.entries.remove_if(key, |_, (_, expires)| *expires <= now);
        }
        Ok(hit)
    }

    async fn set_ex(&self, key: &str, value: String, ttl: Duration) -> StorageResult<()> {
        self.entries
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> StorageResult<()> {
        self.entries.remove(key);
        Ok(())
    }

    async fn append_log(&self, key: &str, entry: String, max_len: usize) -> StorageResult<()> {
        let mut list = self.logs.entry(key.to_string()).or_default();
        list.push_front(entry);
        list.truncate(max_len);
        Ok(())
    }
}
