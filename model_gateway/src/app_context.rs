//! Process-wide resources shared by every handler.
//!
//! Built once at startup and handed to axum as `State<Arc<AppContext>>`.
//! The account and cache stores are opened on first use, single-flight.

use std::{sync::Arc, time::Duration};

use data_connector::{create_account_storage, create_cache_storage, AccountStorage, CacheStorage};
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    config::GatewayConfig,
    gate::CapabilityGate,
    routers::{
        chat::{adapter_for, ChatAdapter},
        error::GatewayError,
        faceswap::{Pause, TokioPause},
        models::{ModelTable, ProviderFamily},
    },
};

const CONNECT_TIMEOUT_SECS: u64 = 10;
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

pub struct AppContext {
    pub config: GatewayConfig,
    pub http: reqwest::Client,
    pub models: ModelTable,
    pub pause: Arc<dyn Pause>,
    pub shutdown: CancellationToken,
    native: Arc<dyn ChatAdapter>,
    openai: Arc<dyn ChatAdapter>,
    gate: OnceCell<Arc<CapabilityGate>>,
}

impl std::fmt::Debug for AppContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppContext")
            .field("config", &self.config)
            .field("gate_ready", &self.gate.initialized())
            .finish()
    }
}

impl AppContext {
    pub fn from_config(config: GatewayConfig) -> Result<Self, String> {
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {e}"))?;
        Ok(Self::with_client(config, http))
    }

    pub fn with_client(config: GatewayConfig, http: reqwest::Client) -> Self {
        let models = ModelTable::new(config.providers.clone(), &config.models);
        Self {
            native: adapter_for(ProviderFamily::NativeMultimodal, http.clone()),
            openai: adapter_for(ProviderFamily::OpenAiCompatible, http.clone()),
            models,
            http,
            pause: Arc::new(TokioPause),
            shutdown: CancellationToken::new(),
            gate: OnceCell::new(),
            config,
        }
    }

    /// Use the given stores instead of the configured backends.
    pub fn with_stores(self, accounts: Arc<dyn AccountStorage>, cache: Arc<dyn CacheStorage>) -> Self {
        let gate = CapabilityGate::new(accounts, cache, self.config.gate.clone());
        Self {
            gate: OnceCell::new_with(Some(Arc::new(gate))),
            ..self
        }
    }

    pub fn with_pause(self, pause: Arc<dyn Pause>) -> Self {
        Self { pause, ..self }
    }

    pub fn adapter(&self, family: ProviderFamily) -> Arc<dyn ChatAdapter> {
        match family {
            ProviderFamily::NativeMultimodal => Arc::clone(&self.native),
            ProviderFamily::OpenAiCompatible => Arc::clone(&self.openai),
        }
    }

    /// The capability gate, opening both stores on first call.
    pub async fn gate(&self) -> Result<Arc<CapabilityGate>, GatewayError> {
        let gate = self
            .gate
            .get_or_try_init(|| async {
                let storage = &self.config.storage;
                let accounts = create_account_storage(storage).await.map_err(|e| {
                    error!(error = %e, "Failed to open account storage");
                    GatewayError::configuration(format!("Account storage unavailable: {e}"))
                })?;
                let cache = create_cache_storage(storage).await.map_err(|e| {
                    error!(error = %e, "Failed to open cache storage");
                    GatewayError::configuration(format!("Cache storage unavailable: {e}"))
                })?;
                info!(
                    accounts = ?storage.account_backend,
                    cache = ?storage.cache_backend,
                    "Storage initialized"
                );
                Ok::<_, GatewayError>(Arc::new(CapabilityGate::new(
                    accounts,
                    cache,
                    self.config.gate.clone(),
                )))
            })
            .await?;
        Ok(Arc::clone(gate))
    }
}

#[cfg(test)]
mod tests {
    use data_connector::{AccountBackend, PostgresConfig};

    use super::*;

    #[tokio::test]
    async fn test_gate_is_built_once() {
        let ctx = AppContext::from_config(GatewayConfig::default()).unwrap();
        let first = ctx.gate().await.unwrap();
        let second = ctx.gate().await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn test_storage_failure_is_configuration_error() {
        let mut config = GatewayConfig::default();
        config.storage.account_backend = AccountBackend::Postgres;
        config.storage.postgres = Some(PostgresConfig::new("mysql://nope"));
        let ctx = AppContext::from_config(config).unwrap();

        let err = ctx.gate().await.unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
        assert!(!ctx.gate.initialized());
    }
}
