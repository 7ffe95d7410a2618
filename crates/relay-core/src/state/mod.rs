use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use arc_swap::ArcSwap;

use relay_common::{GlobalConfig, GlobalConfigPatch};
use relay_provider_core::cache::{ConcurrencyCache, SessionCache};
use relay_provider_core::{
    Account, AccountId, Credential, EventHub, ProviderConfig, ProviderRegistry,
};
use relay_provider_core::scheduler::Scheduler;
use relay_storage::{AccountRow, StorageSnapshot};

/// Config-plane + scheduling state shared across every request. The request
/// path never touches storage directly; it reads through whichever of these
/// ArcSwaps is currently live, so a config reload or account edit is a
/// single atomic pointer swap with no lock held across an upstream call.
pub struct AppState {
    pub global: ArcSwap<GlobalConfig>,
    pub scheduler: Scheduler,
    pub registry: Arc<ProviderRegistry>,
    pub configs: ArcSwap<HashMap<AccountId, ProviderConfig>>,
    pub snapshot: ArcSwap<StorageSnapshot>,
    pub events: EventHub,
}

fn decode_account(row: &AccountRow) -> anyhow::Result<(Account, ProviderConfig)> {
    let credential: Credential = serde_json::from_value(row.secret_json.clone())
        .with_context(|| format!("decode secret_json for account_id={}", row.id))?;
    let config: ProviderConfig = serde_json::from_value(row.config_json.clone())
        .with_context(|| format!("decode config_json for account_id={}", row.id))?;
    let allowed_models = row
        .allowed_models
        .clone()
        .and_then(|v| serde_json::from_value::<Vec<String>>(v).ok())
        .unwrap_or_default();

    let account = Account {
        id: row.id,
        provider: row.kind.clone(),
        credential,
        proxy: row.proxy_url.clone(),
        concurrency_limit: (row.max_concurrency > 0).then_some(row.max_concurrency as u32),
        priority: row.priority,
        cost_weight: row.weight as f64,
        allowed_models,
    };
    Ok((account, config))
}

impl AppState {
    pub async fn from_bootstrap(
        global: GlobalConfig,
        snapshot: StorageSnapshot,
        events: EventHub,
        registry: Arc<ProviderRegistry>,
    ) -> anyhow::Result<Self> {
        let pool = relay_provider_core::CredentialPool::new(events.clone());
        let mut configs = HashMap::new();

        for row in &snapshot.accounts {
            if !row.enabled {
                continue;
            }
            let (account, config) = decode_account(row)?;
            configs.insert(account.id, config);
            pool.insert(account).await;
        }

        let scheduler = Scheduler::new(
            pool,
            SessionCache::new(
                Duration::from_secs(global.session_ttl_secs),
                Duration::from_secs(global.session_renewal_threshold_secs),
            ),
            ConcurrencyCache::new(),
            global.default_account_concurrency,
        );

        Ok(Self {
            global: ArcSwap::from_pointee(global),
            scheduler,
            registry,
            configs: ArcSwap::from_pointee(configs),
            snapshot: ArcSwap::from_pointee(snapshot),
            events,
        })
    }

    pub fn config_for(&self, account_id: AccountId) -> Option<ProviderConfig> {
        self.configs.load().get(&account_id).cloned()
    }

    pub fn apply_global_config(&self, config: GlobalConfig) {
        self.global.store(Arc::new(config));
    }

    pub fn apply_global_config_patch(
        &self,
        patch: GlobalConfigPatch,
    ) -> anyhow::Result<GlobalConfig> {
        let current = self.global.load().as_ref().clone();
        let mut merged = GlobalConfigPatch::from(current);
        merged.overlay(patch);
        let next = merged.into_config()?;
        self.global.store(Arc::new(next.clone()));
        Ok(next)
    }

    pub async fn apply_account_upsert(&self, row: AccountRow) -> anyhow::Result<()> {
        if row.enabled {
            let (account, config) = decode_account(&row)?;
            self.scheduler.pool().insert(account).await;
            let mut configs = self.configs.load().as_ref().clone();
            configs.insert(row.id, config);
            self.configs.store(Arc::new(configs));
        } else {
            self.scheduler
                .pool()
                .set_enabled(&row.kind, row.id, false)
                .await;
        }

        let mut snap = self.snapshot.load().as_ref().clone();
        match snap.accounts.iter_mut().find(|a| a.id == row.id) {
            Some(existing) => *existing = row,
            None => snap.accounts.push(row),
        }
        self.snapshot.store(Arc::new(snap));
        Ok(())
    }

    pub async fn apply_account_enabled(&self, account_id: AccountId, enabled: bool) {
        let mut snap = self.snapshot.load().as_ref().clone();
        let Some(row) = snap.accounts.iter_mut().find(|a| a.id == account_id) else {
            return;
        };
        row.enabled = enabled;
        let kind = row.kind.clone();
        let row_clone = row.clone();
        self.snapshot.store(Arc::new(snap));

        if enabled {
            if let Ok((account, config)) = decode_account(&row_clone) {
                self.scheduler.pool().insert(account).await;
                let mut configs = self.configs.load().as_ref().clone();
                configs.insert(account_id, config);
                self.configs.store(Arc::new(configs));
            }
        }
        self.scheduler.pool().set_enabled(&kind, account_id, enabled).await;
    }

    pub fn apply_account_delete(&self, account_id: AccountId) {
        // Pool removal is best-effort: disabling via `apply_account_enabled`
        // drops the id from candidate lists immediately; a delete without a
        // prior disable just stops the snapshot from listing it.
        let mut snap = self.snapshot.load().as_ref().clone();
        snap.accounts.retain(|a| a.id != account_id);
        self.snapshot.store(Arc::new(snap));
        let mut configs = self.configs.load().as_ref().clone();
        configs.remove(&account_id);
        self.configs.store(Arc::new(configs));
    }
}
