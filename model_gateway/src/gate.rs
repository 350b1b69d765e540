//! Capability gate
//!
//! Pre-flight policy for paid and premium actions. Decisions come from the
//! account store, fronted by a short-lived cache; any lookup failure denies.
//! Metered actions are charged with one atomic conditional deduction before
//! the upstream call.

use std::sync::Arc;

use assistant_protocol::assistant::Action;
use chrono::Utc;
use data_connector::{AccountStanding, AccountStorage, ActivityRecord, CacheStorage, StorageResult};
use tracing::{debug, info, warn};

use crate::{config::GateConfig, observability::metrics::Metrics, routers::error::GatewayError};

/// Outcome of a gate evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapabilityDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl CapabilityDecision {
    pub fn allow() -> Self {
        Self {
            allowed: true,
            reason: None,
        }
    }

    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            allowed: false,
            reason: Some(reason.into()),
        }
    }

    pub fn into_result(self) -> Result<(), GatewayError> {
        if self.allowed {
            Ok(())
        } else {
            Err(GatewayError::denied(
                self.reason.unwrap_or_else(|| "Access denied".to_string()),
            ))
        }
    }
}

fn standing_key(email: &str) -> String {
    format!("standing:{email}")
}

fn activity_key(email: &str) -> String {
    format!("activity:{email}")
}

pub struct CapabilityGate {
    accounts: Arc<dyn AccountStorage>,
    cache: Arc<dyn CacheStorage>,
    config: GateConfig,
}

impl std::fmt::Debug for CapabilityGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityGate")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CapabilityGate {
    pub fn new(
        accounts: Arc<dyn AccountStorage>,
        cache: Arc<dyn CacheStorage>,
        config: GateConfig,
    ) -> Self {
        Self {
            accounts,
            cache,
            config,
        }
    }

    pub fn is_admin(&self, caller: Option<&str>) -> bool {
        match (caller, self.config.admin_email.as_deref()) {
            (Some(caller), Some(admin)) => caller == admin,
            _ => false,
        }
    }

    pub fn is_premium_model(&self, model: &str) -> bool {
        self.config.premium_models.iter().any(|m| m == model)
    }

    fn is_gated(&self, action: Action, model: Option<&str>) -> bool {
        match action {
            Action::GenerateImages
            | Action::EditImage
            | Action::FaceSwap
            | Action::SynthesizeSpeech => true,
            Action::GenerateContentStream => model.is_some_and(|m| self.is_premium_model(m)),
            Action::Translate => false,
        }
    }

    /// Credits charged for `units` of `action`; zero for unmetered actions.
    pub fn cost(&self, action: Action, units: u8) -> i64 {
        let costs = self.config.costs;
        match action {
            Action::GenerateImages => costs.image_generation * i64::from(units.max(1)),
            Action::EditImage => costs.image_edit,
            Action::FaceSwap => costs.face_swap,
            _ => 0,
        }
    }

    /// Decide whether `caller` may run `action` (on `model`, for chat).
    pub async fn evaluate(
        &self,
        caller: Option<&str>,
        action: Action,
        model: Option<&str>,
    ) -> CapabilityDecision {
        if !self.is_gated(action, model) || self.is_admin(caller) {
            return CapabilityDecision::allow();
        }

        let feature = match (action, model) {
            (Action::GenerateContentStream, Some(model)) => model.to_string(),
            _ => action.feature_name().to_string(),
        };

        let decision = match caller {
            None => CapabilityDecision::deny(format!("Sign in to use {feature}")),
            Some(email) => match self.standing(email).await {
                Err(e) => {
                    warn!(caller = %email, error = %e, "Account lookup failed, denying");
                    CapabilityDecision::deny("Could not verify your account right now")
                }
                Ok(None) => CapabilityDecision::deny(format!("No account found for {email}")),
                Ok(Some(standing)) => self.decide(&standing, action, &feature),
            },
        };

        if !decision.allowed {
            Metrics::record_capability_denied(action.as_str());
            info!(action = %action, reason = ?decision.reason, "Capability denied");
        }
        decision
    }

    fn decide(&self, standing: &AccountStanding, action: Action, feature: &str) -> CapabilityDecision {
        let cost = self.cost(action, 1);
        if cost > 0 {
            return if standing.can_afford(cost) {
                CapabilityDecision::allow()
            } else {
                CapabilityDecision::deny(format!(
                    "Insufficient credits for {feature}: {cost} required, {} available",
                    standing.credits
                ))
            };
        }

        if standing.has_active_subscription(Utc::now()) || standing.credits > 0 {
            CapabilityDecision::allow()
        } else {
            CapabilityDecision::deny(format!(
                "{feature} requires an active subscription or credits"
            ))
        }
    }

    /// Atomically deduct `cost` credits. A refused or failed deduction is a
    /// denial; the caller must not contact the upstream afterwards.
    pub async fn charge(&self, caller: Option<&str>, action: Action, cost: i64) -> Result<(), GatewayError> {
        if cost <= 0 || self.is_admin(caller) {
            return Ok(());
        }
        let Some(email) = caller else {
            return Err(GatewayError::denied(format!(
                "Sign in to use {}",
                action.feature_name()
            )));
        };

        match self.accounts.try_deduct(email, cost).await {
            Ok(true) => {
                debug!(caller = %email, cost, action = %action, "Credits deducted");
                if let Err(e) = self.cache.delete(&standing_key(email)).await {
                    warn!(caller = %email, error = %e, "Failed to invalidate cached standing");
                }
                Ok(())
            }
            Ok(false) => {
                Metrics::record_capability_denied(action.as_str());
                Err(GatewayError::denied(format!(
                    "Insufficient credits for {}",
                    action.feature_name()
                )))
            }
            Err(e) => {
                warn!(caller = %email, error = %e, "Credit deduction failed, denying");
                Metrics::record_capability_denied(action.as_str());
                Err(GatewayError::denied("Could not verify your account right now"))
            }
        }
    }

    /// Append an activity record. Failures are logged and ignored.
    pub async fn record_activity(
        &self,
        caller: Option<&str>,
        action: Action,
        model: Option<&str>,
        outcome: &str,
    ) {
        let Some(email) = caller else {
            return;
        };
        let record = ActivityRecord::new(email, action.as_str(), model.map(str::to_string), outcome);
        let entry = match serde_json::to_string(&record) {
            Ok(entry) => entry,
            Err(e) => {
                warn!(error = %e, "Failed to serialize activity record");
                return;
            }
        };
        if let Err(e) = self
            .cache
            .append_log(&activity_key(email), entry, self.config.activity_log_len)
            .await
        {
            debug!(caller = %email, error = %e, "Activity log unavailable");
        }
    }

    /// Standing from the cache, else from the store (refilling the cache).
    async fn standing(&self, email: &str) -> StorageResult<Option<AccountStanding>> {
        let key = standing_key(email);
        match self.cache.get(&key).await {
            Ok(Some(cached)) => match serde_json::from_str::<AccountStanding>(&cached) {
                Ok(standing) => return Ok(Some(standing)),
                Err(e) => debug!(caller = %email, error = %e, "Ignoring unreadable cached standing"),
            },
            Ok(None) => {}
            Err(e) => warn!(caller = %email, error = %e, "Cache lookup failed, using account store"),
        }

        let standing = self.accounts.get_account(email).await?;
        if let Some(standing) = &standing {
            match serde_json::to_string(standing) {
                Ok(json) => {
                    if let Err(e) = self.cache.set_ex(&key, json, self.config.cache_ttl).await {
                        debug!(caller = %email, error = %e, "Failed to cache standing");
                    }
                }
                Err(e) => debug!(error = %e, "Failed to serialize standing"),
            }
        }
        Ok(standing)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use chrono::Duration as ChronoDuration;
    use data_connector::{MemoryAccountStorage, MemoryCacheStorage, StorageError};

    use super::*;
    use crate::config::{ActionCosts, GatewayConfig};

    fn gate_config() -> GateConfig {
        GateConfig {
            admin_email: Some("admin@example.com".into()),
            premium_models: vec!["gpt-4o".into()],
            costs: ActionCosts {
                image_generation: 1,
                image_edit: 2,
                face_swap: 3,
            },
            ..GatewayConfig::default().gate
        }
    }

    fn gate_with(accounts: Vec<AccountStanding>) -> (CapabilityGate, Arc<MemoryAccountStorage>, Arc<MemoryCacheStorage>) {
        let store = Arc::new(MemoryAccountStorage::with_accounts(accounts));
        let cache = Arc::new(MemoryCacheStorage::new());
        let gate = CapabilityGate::new(store.clone(), cache.clone(), gate_config());
        (gate, store, cache)
    }

    struct BrokenStore;

    #[async_trait]
    impl AccountStorage for BrokenStore {
        async fn get_account(&self, _: &str) -> StorageResult<Option<AccountStanding>> {
            Err(StorageError::Unavailable("db down".into()))
        }

        async fn try_deduct(&self, _: &str, _: i64) -> StorageResult<bool> {
            Err(StorageError::Unavailable("db down".into()))
        }
    }

    #[tokio::test]
    async fn test_ungated_actions_pass_without_identity() {
        let (gate, _, _) = gate_with(vec![]);
        assert!(gate.evaluate(None, Action::Translate, None).await.allowed);
        assert!(
            gate.evaluate(None, Action::GenerateContentStream, Some("gemini-2.0-flash"))
                .await
                .allowed
        );
    }

    #[tokio::test]
    async fn test_premium_model_needs_subscription_or_credits() {
        let now = Utc::now();
        let (gate, _, _) = gate_with(vec![
            AccountStanding::new("broke@example.com", 0),
            AccountStanding::new("sub@example.com", 0).with_subscription(now + ChronoDuration::days(3)),
            AccountStanding::new("lapsed@example.com", 0).with_subscription(now - ChronoDuration::days(3)),
        ]);

        let check = |who: &'static str| {
            let gate = &gate;
            async move {
                gate.evaluate(Some(who), Action::GenerateContentStream, Some("gpt-4o"))
                    .await
            }
        };
        assert!(!check("broke@example.com").await.allowed);
        assert!(check("sub@example.com").await.allowed);
        assert!(!check("lapsed@example.com").await.allowed);
        assert!(!gate.evaluate(None, Action::GenerateContentStream, Some("gpt-4o")).await.allowed);
    }

    #[tokio::test]
    async fn test_admin_bypasses_everything() {
        let (gate, _, _) = gate_with(vec![]);
        assert!(gate.is_admin(Some("admin@example.com")));
        assert!(gate.evaluate(Some("admin@example.com"), Action::FaceSwap, None).await.allowed);
        assert!(gate.charge(Some("admin@example.com"), Action::FaceSwap, 3).await.is_ok());
    }

    #[tokio::test]
    async fn test_metered_action_checks_cost() {
        let (gate, _, _) = gate_with(vec![AccountStanding::new("a@example.com", 2)]);
        assert!(gate.evaluate(Some("a@example.com"), Action::EditImage, None).await.allowed);

        let denied = gate.evaluate(Some("a@example.com"), Action::FaceSwap, None).await;
        assert!(!denied.allowed);
        assert!(denied.reason.unwrap().contains("3 required, 2 available"));
    }

    #[tokio::test]
    async fn test_store_failure_fails_closed() {
        let gate = CapabilityGate::new(
            Arc::new(BrokenStore),
            Arc::new(MemoryCacheStorage::new()),
            gate_config(),
        );
        let decision = gate.evaluate(Some("a@example.com"), Action::SynthesizeSpeech, None).await;
        assert!(!decision.allowed);

        let err = gate
            .charge(Some("a@example.com"), Action::EditImage, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::CapabilityDenied(_)));
    }

    #[tokio::test]
    async fn test_standing_is_cached_and_invalidated_on_charge() {
        let (gate, store, cache) = gate_with(vec![AccountStanding::new("a@example.com", 5)]);

        assert!(gate.evaluate(Some("a@example.com"), Action::EditImage, None).await.allowed);
        assert!(cache.get("standing:a@example.com").await.unwrap().is_some());

        gate.charge(Some("a@example.com"), Action::EditImage, 2).await.unwrap();
        assert_eq!(store.credits("a@example.com"), Some(3));
        assert!(cache.get("standing:a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_charge_refuses_insufficient_balance() {
        let (gate, store, _) = gate_with(vec![AccountStanding::new("a@example.com", 1)]);
        let err = gate
            .charge(Some("a@example.com"), Action::FaceSwap, 3)
            .await
            .unwrap_err();
        assert_eq!(err, GatewayError::denied("Insufficient credits for face swap"));
        assert_eq!(store.credits("a@example.com"), Some(1));
    }

    #[tokio::test]
    async fn test_concurrent_charges_only_one_succeeds() {
        let (gate, store, _) = gate_with(vec![AccountStanding::new("a@example.com", 2)]);
        let gate = Arc::new(gate);

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let gate = gate.clone();
                tokio::spawn(async move {
                    gate.charge(Some("a@example.com"), Action::EditImage, 2).await
                })
            })
            .collect();

        let mut successes = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                successes += 1;
            }
        }
        assert_eq!(successes, 1);
        assert_eq!(store.credits("a@example.com"), Some(0));
    }

    #[tokio::test]
    async fn test_activity_is_logged() {
        let (gate, _, cache) = gate_with(vec![]);
        gate.record_activity(Some("a@example.com"), Action::Translate, None, "ok")
            .await;
        let entries = cache.log_entries("activity:a@example.com");
        assert_eq!(entries.len(), 1);
        assert!(entries[0].contains("\"action\":\"translate\""));
    }

    #[test]
    fn test_image_cost_scales_with_count() {
        let (gate, _, _) = gate_with(vec![]);
        assert_eq!(gate.cost(Action::GenerateImages, 4), 4);
        assert_eq!(gate.cost(Action::GenerateImages, 0), 1);
        assert_eq!(gate.cost(Action::Translate, 1), 0);
    }
}
