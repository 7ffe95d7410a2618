use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::events::{Event, ModelUnavailableStartEvent, OperationalEvent, UnavailableStartEvent};
use crate::{Credential, EventHub, UnavailableReason};

use super::model_unavailable_queue::ModelUnavailableQueue;
use super::state::{AccountId, AccountState};
use super::unavailable_queue::UnavailableQueue;

type ModelStateKey = (AccountId, String);
type ModelStateValue = (Instant, UnavailableReason);

#[derive(Debug, Clone)]
pub enum AcquireError {
    ProviderUnknown,
    NoActiveCredentials,
}

/// Static per-account metadata the scheduler weighs candidates by. Secrets
/// live in `Credential`; this is everything else an operator configures.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub provider: String,
    pub credential: Credential,
    pub proxy: Option<String>,
    pub concurrency_limit: Option<u32>,
    pub priority: i32,
    pub cost_weight: f64,
    pub allowed_models: Vec<String>,
}

/// Tracks every configured account plus its live availability state, keyed
/// by provider name so the scheduler can pull all candidates for a route in
/// one read-lock.
pub struct CredentialPool {
    accounts: RwLock<HashMap<AccountId, Account>>,
    by_provider: RwLock<HashMap<String, Vec<AccountId>>>,
    states: Arc<RwLock<HashMap<AccountId, AccountState>>>,
    model_states: Arc<RwLock<HashMap<ModelStateKey, ModelStateValue>>>,
    events: EventHub,
    queue: Arc<UnavailableQueue>,
    model_queue: Arc<ModelUnavailableQueue>,
}

impl CredentialPool {
    pub fn new(events: EventHub) -> Self {
        let states = Arc::new(RwLock::new(HashMap::new()));
        let model_states = Arc::new(RwLock::new(HashMap::new()));
        let queue = Arc::new(UnavailableQueue::new());
        let model_queue = Arc::new(ModelUnavailableQueue::new());
        queue
            .clone()
            .spawn_recover_task(states.clone(), events.clone());
        model_queue
            .clone()
            .spawn_recover_task(model_states.clone(), events.clone());
        Self {
            accounts: RwLock::new(HashMap::new()),
            by_provider: RwLock::new(HashMap::new()),
            states,
            model_states,
            events,
            queue,
            model_queue,
        }
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub async fn insert(&self, account: Account) {
        let provider = account.provider.clone();
        let id = account.id;
        self.accounts.write().await.insert(id, account);
        let mut by_provider = self.by_provider.write().await;
        let ids = by_provider.entry(provider).or_default();
        if !ids.contains(&id) {
            ids.push(id);
        }
        self.states
            .write()
            .await
            .entry(id)
            .or_insert(AccountState::Active);
    }

    pub async fn update_credential(&self, id: AccountId, credential: Credential) {
        if let Some(account) = self.accounts.write().await.get_mut(&id) {
            account.credential = credential;
        }
    }

    pub async fn set_enabled(&self, provider: &str, id: AccountId, enabled: bool) {
        if enabled {
            let mut by_provider = self.by_provider.write().await;
            let ids = by_provider.entry(provider.to_string()).or_default();
            if !ids.contains(&id) {
                ids.push(id);
            }
            drop(by_provider);
            self.states
                .write()
                .await
                .entry(id)
                .or_insert(AccountState::Active);
        } else {
            let mut by_provider = self.by_provider.write().await;
            if let Some(ids) = by_provider.get_mut(provider) {
                ids.retain(|x| *x != id);
            }
            let mut model_states = self.model_states.write().await;
            model_states.retain(|(acct_id, _), _| *acct_id != id);
        }
    }

    /// All accounts for a provider that are currently `Active` and not
    /// individually unavailable for `model`. This is step one of the
    /// scheduler's candidate filter; the scheduler applies stickiness and
    /// weighting on top.
    pub async fn candidates(&self, provider: &str, model: &str) -> Vec<Account> {
        let ids = {
            let guard = self.by_provider.read().await;
            guard.get(provider).cloned().unwrap_or_default()
        };
        let states = self.states.read().await;
        let model_states = self.model_states.read().await;
        let accounts = self.accounts.read().await;

        let mut out = Vec::new();
        for id in ids {
            if !matches!(states.get(&id), Some(AccountState::Active)) {
                continue;
            }
            let key = (id, model.to_string());
            if let Some((until, _)) = model_states.get(&key)
                && *until > Instant::now()
            {
                continue;
            }
            if let Some(account) = accounts.get(&id) {
                if !account.allowed_models.is_empty()
                    && !account.allowed_models.iter().any(|m| m == model)
                {
                    continue;
                }
                out.push(account.clone());
            }
        }
        out
    }

    pub async fn get(&self, id: AccountId) -> Option<Account> {
        self.accounts.read().await.get(&id).cloned()
    }

    pub async fn mark_unavailable(
        &self,
        account_id: AccountId,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let until_instant = Instant::now() + duration;
        {
            let mut guard = self.states.write().await;
            guard.insert(
                account_id,
                AccountState::Unavailable {
                    until: until_instant,
                    reason,
                },
            );
        }
        self.queue.push(until_instant, account_id).await;

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::UnavailableStart(
                UnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id: account_id,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    pub async fn mark_model_unavailable(
        &self,
        account_id: AccountId,
        model: impl Into<String>,
        duration: Duration,
        reason: UnavailableReason,
    ) {
        let model = model.into();
        let until_instant = Instant::now() + duration;
        {
            let mut guard = self.model_states.write().await;
            guard.insert((account_id, model.clone()), (until_instant, reason));
        }
        self.model_queue
            .push(until_instant, account_id, model.clone())
            .await;

        let until_wall = SystemTime::now()
            .checked_add(duration)
            .unwrap_or_else(SystemTime::now);
        self.events
            .emit(Event::Operational(OperationalEvent::ModelUnavailableStart(
                ModelUnavailableStartEvent {
                    at: SystemTime::now(),
                    credential_id: account_id,
                    model,
                    reason,
                    until: until_wall,
                },
            )))
            .await;
    }

    pub async fn state(&self, account_id: AccountId) -> Option<AccountState> {
        self.states.read().await.get(&account_id).cloned()
    }

    pub async fn model_states(
        &self,
        account_id: AccountId,
    ) -> Vec<(String, Instant, UnavailableReason)> {
        let now = Instant::now();
        let guard = self.model_states.read().await;
        let mut rows = Vec::new();
        for ((id, model), (until, reason)) in guard.iter() {
            if *id != account_id || *until <= now {
                continue;
            }
            rows.push((model.clone(), *until, *reason));
        }
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }
}
