//! Postgres account storage
//!
//! Reads `email`, `credits` and `subscription_expires_at` from the configured
//! accounts table. Deduction is a single conditional `UPDATE`, so the balance
//! check and the write cannot interleave with another request.

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod};
use tokio_postgres::NoTls;

use crate::{
    common::{backend_error, normalize_email, unavailable},
    config::PostgresConfig,
    core::{AccountStanding, AccountStorage, StorageResult},
};

#[derive(Clone)]
pub(crate) struct PostgresStore {
    pool: Pool,
    select_sql: String,
    deduct_sql: String,
}

impl PostgresStore {
    pub fn new(config: PostgresConfig) -> Result<Self, String> {
        let pg_config =
            tokio_postgres::Config::from_str(&config.db_url).map_err(|e| e.to_string())?;
        let manager = Manager::from_config(
            pg_config,
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );
        let pool = Pool::builder(manager)
            .max_size(config.pool_max)
            .build()
            .map_err(|e| e.to_string())?;

        let table = config.table;
        Ok(Self {
            pool,
            select_sql: format!(
                "SELECT email, credits, subscription_expires_at FROM {table} WHERE email = $1"
            ),
            deduct_sql: format!(
                "UPDATE {table} SET credits = credits - $2 WHERE email = $1 AND credits >= $2"
            ),
        })
    }

    async fn client(&self) -> StorageResult<deadpool_postgres::Client> {
        self.pool.get().await.map_err(unavailable)
    }

    /// Check out one connection to surface bad URLs and credentials at startup.
    pub async fn check(&self) -> StorageResult<()> {
        let client = self.client().await?;
        client.simple_query("SELECT 1").await.map_err(backend_error)?;
        Ok(())
    }
}

pub(super) struct PostgresAccountStorage {
    store: PostgresStore,
}

impl PostgresAccountStorage {
    pub fn new(store: PostgresStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl AccountStorage for PostgresAccountStorage {
    async fn get_account(&self, email: &str) -> StorageResult<Option<AccountStanding>> {
        let email = normalize_email(email);
        let client = self.store.client().await?;
        let row = client
            .query_opt(self.store.select_sql.as_str(), &[&email])
            .await
            .map_err(backend_error)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let credits: i64 = row.try_get("credits").map_err(backend_error)?;
        let subscription_expires_at: Option<DateTime<Utc>> = row
            .try_get("subscription_expires_at")
            .map_err(backend_error)?;

        Ok(Some(AccountStanding {
            email,
            credits,
            subscription_expires_at,
        }))
    }

    async fn try_deduct(&self, email: &str, amount: i64) -> StorageResult<bool> {
        let email = normalize_email(email);
        let client = self.store.client().await?;
        let affected = client
            .execute(self.store.deduct_sql.as_str(), &[&email, &amount])
            .await
            .map_err(backend_error)?;
        Ok(affected > 0)
    }
}
