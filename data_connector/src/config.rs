//! Storage backend configuration types.

use serde::{Deserialize, Serialize};
use url::Url;

/// Account backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AccountBackend {
    #[default]
    Memory,
    Postgres,
}

/// Cache backend configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    None,
    Redis,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostgresConfig {
    // Database connection URL,
    // postgres://[user[:password]@][netloc][:port][/dbname][?param1=value1&...]
    pub db_url: String,
    // Database pool max size
    pub pool_max: usize,
    // Table holding `email`, `credits` and `subscription_expires_at`
    #[serde(default = "default_accounts_table")]
    pub table: String,
}

fn default_accounts_table() -> String {
    "users".to_string()
}

impl PostgresConfig {
    pub fn default_pool_max() -> usize {
        16
    }

    pub fn new(db_url: impl Into<String>) -> Self {
        Self {
            db_url: db_url.into(),
            pool_max: Self::default_pool_max(),
            table: default_accounts_table(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let s = self.db_url.trim();
        if s.is_empty() {
            return Err("db_url should not be empty".to_string());
        }

        let url = Url::parse(s).map_err(|e| format!("invalid db_url: {e}"))?;

        let scheme = url.scheme();
        if scheme != "postgres" && scheme != "postgresql" {
            return Err(format!("unsupported URL scheme: {scheme}"));
        }

        if url.host().is_none() {
            return Err("db_url must have a host".to_string());
        }

        let dbname = url.path().strip_prefix('/').filter(|p| !p.is_empty());
        if dbname.is_none() {
            return Err("db_url must name a database".to_string());
        }

        if self.pool_max == 0 {
            return Err("pool_max must be greater than 0, default is 16".to_string());
        }

        if self.table.is_empty()
            || !self
                .table
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '.')
        {
            return Err(format!("invalid accounts table name: {:?}", self.table));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedisConfig {
    // Redis connection URL
    // redis://[:password@]host[:port][/db]
    pub url: String,
    // Connection pool max size
    #[serde(default = "default_redis_pool_max")]
    pub pool_max: usize,
}

fn default_redis_pool_max() -> usize {
    16
}

impl RedisConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            pool_max: default_redis_pool_max(),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let s = self.url.trim();
        if s.is_empty() {
            return Err("redis url should not be empty".to_string());
        }

        let url = Url::parse(s).map_err(|e| format!("invalid redis url: {e}"))?;

        let scheme = url.scheme();
        if scheme != "redis" && scheme != "rediss" {
            return Err(format!("unsupported URL scheme: {scheme}"));
        }

        if url.host().is_none() {
            return Err("redis url must have a host".to_string());
        }

        if self.pool_max == 0 {
            return Err("pool_max must be greater than 0".to_string());
        }

        Ok(())
    }
}
