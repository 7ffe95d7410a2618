//! Picks which account handles a request: candidate filter, health overlay,
//! session stickiness, then weighted-random selection among what's left,
//! breaking ties by priority, current concurrency, and cost. Generalizes the
//! credential pool's bare "first active in insertion order" lookup into the
//! full algorithm this proxy needs.

use rand::Rng;

use crate::cache::{ConcurrencyCache, ConcurrencySlot, SessionCache};
use crate::credential::{Account, AcquireError, CredentialPool};
use crate::{AccountId, Credential};

pub struct Scheduler {
    pool: CredentialPool,
    sessions: SessionCache,
    concurrency: ConcurrencyCache,
    default_account_concurrency: u32,
}

/// A scheduled request: the chosen account, its credential, and a
/// concurrency slot that releases automatically when dropped.
pub struct Dispatch {
    pub account_id: AccountId,
    pub credential: Credential,
    _slot: ConcurrencySlot,
}

impl Scheduler {
    pub fn new(
        pool: CredentialPool,
        sessions: SessionCache,
        concurrency: ConcurrencyCache,
        default_account_concurrency: u32,
    ) -> Self {
        Self {
            pool,
            sessions,
            concurrency,
            default_account_concurrency,
        }
    }

    pub fn pool(&self) -> &CredentialPool {
        &self.pool
    }

    pub fn sessions(&self) -> &SessionCache {
        &self.sessions
    }

    /// Selects and reserves an account for `provider`/`model`, optionally
    /// honoring a sticky `session_id`. On success the returned [`Dispatch`]
    /// holds the concurrency slot for the request's lifetime; on a
    /// concurrency conflict this retries candidate selection (excluding the
    /// contended account) up to the candidate-list size, per the scheduler's
    /// "concurrency acquire with retry-from-step-4" contract.
    pub async fn dispatch(
        &self,
        provider: &str,
        model: &str,
        session_id: Option<&str>,
    ) -> Result<Dispatch, AcquireError> {
        let mut excluded: Vec<AccountId> = Vec::new();

        loop {
            let mut candidates = self.pool.candidates(provider, model).await;
            candidates.retain(|a| !excluded.contains(&a.id));
            if candidates.is_empty() {
                return Err(AcquireError::NoActiveCredentials);
            }

            let sticky = self.pick_sticky(session_id, &candidates).await;
            let chosen = sticky.unwrap_or_else(|| weighted_pick(&candidates));

            let limit = chosen.concurrency_limit.unwrap_or(self.default_account_concurrency);
            let key = ConcurrencyCache::account_key(chosen.id);
            match self.concurrency.acquire(key, limit).await {
                Some(slot) => {
                    if let Some(session_id) = session_id {
                        self.sessions.set(session_id, chosen.id, None).await;
                    }
                    return Ok(Dispatch {
                        account_id: chosen.id,
                        credential: chosen.credential.clone(),
                        _slot: slot,
                    });
                }
                None => {
                    excluded.push(chosen.id);
                    continue;
                }
            }
        }
    }

    async fn pick_sticky<'a>(
        &self,
        session_id: Option<&str>,
        candidates: &'a [Account],
    ) -> Option<&'a Account> {
        let session_id = session_id?;
        let bound = self.sessions.get(session_id).await?;
        candidates.iter().find(|a| a.id == bound)
    }
}

/// Weighted-random selection among active candidates: weight is
/// `cost_weight` scaled down by current concurrency load, with `priority`
/// acting as a hard pre-filter (only the highest-priority tier competes).
fn weighted_pick(candidates: &[Account]) -> &Account {
    let top_priority = candidates.iter().map(|a| a.priority).max().unwrap_or(0);
    let tier: Vec<&Account> = candidates
        .iter()
        .filter(|a| a.priority == top_priority)
        .collect();

    let weights: Vec<f64> = tier
        .iter()
        .map(|a| if a.cost_weight > 0.0 { a.cost_weight } else { 1.0 })
        .collect();
    let total: f64 = weights.iter().sum();

    if total <= 0.0 {
        return tier[0];
    }

    let mut roll = rand::rng().random_range(0.0..total);
    for (account, weight) in tier.iter().zip(weights.iter()) {
        if roll < *weight {
            return account;
        }
        roll -= weight;
    }
    tier[tier.len() - 1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Credential, EventHub};
    use std::time::Duration;

    fn test_account(id: AccountId, priority: i32, cost_weight: f64) -> Account {
        Account {
            id,
            provider: "claude-official".to_string(),
            credential: Credential::ClaudeConsole(crate::credential::ApiKeyCredential {
                api_key: "k".to_string(),
            }),
            proxy: None,
            concurrency_limit: Some(5),
            priority,
            cost_weight,
            allowed_models: Vec::new(),
        }
    }

    fn scheduler() -> Scheduler {
        Scheduler::new(
            CredentialPool::new(EventHub::new(16)),
            SessionCache::new(Duration::from_secs(60), Duration::from_secs(10)),
            ConcurrencyCache::new(),
            5,
        )
    }

    #[tokio::test]
    async fn dispatch_fails_when_no_accounts_registered() {
        let scheduler = scheduler();
        let err = scheduler
            .dispatch("claude-official", "claude-3-5-sonnet", None)
            .await
            .unwrap_err();
        assert!(matches!(err, AcquireError::NoActiveCredentials));
    }

    #[tokio::test]
    async fn dispatch_picks_a_registered_account() {
        let scheduler = scheduler();
        scheduler.pool().insert(test_account(1, 0, 1.0)).await;
        let dispatch = scheduler
            .dispatch("claude-official", "claude-3-5-sonnet", None)
            .await
            .unwrap();
        assert_eq!(dispatch.account_id, 1);
    }

    #[tokio::test]
    async fn sticky_session_returns_same_account_repeatedly() {
        let scheduler = scheduler();
        scheduler.pool().insert(test_account(1, 0, 1.0)).await;
        scheduler.pool().insert(test_account(2, 0, 1.0)).await;

        let first = scheduler
            .dispatch("claude-official", "claude-3-5-sonnet", Some("sess-1"))
            .await
            .unwrap();
        let bound = first.account_id;
        drop(first);

        for _ in 0..20 {
            let dispatch = scheduler
                .dispatch("claude-official", "claude-3-5-sonnet", Some("sess-1"))
                .await
                .unwrap();
            assert_eq!(dispatch.account_id, bound);
        }
    }

    #[tokio::test]
    async fn higher_priority_tier_always_wins() {
        let scheduler = scheduler();
        scheduler.pool().insert(test_account(1, 0, 1.0)).await;
        scheduler.pool().insert(test_account(2, 10, 1.0)).await;

        for _ in 0..10 {
            let dispatch = scheduler
                .dispatch("claude-official", "claude-3-5-sonnet", None)
                .await
                .unwrap();
            assert_eq!(dispatch.account_id, 2);
        }
    }

    #[tokio::test]
    async fn concurrency_exhaustion_falls_through_to_another_candidate() {
        let scheduler = scheduler();
        let mut low_limit = test_account(1, 0, 1.0);
        low_limit.concurrency_limit = Some(1);
        scheduler.pool().insert(low_limit).await;
        scheduler.pool().insert(test_account(2, 0, 1.0)).await;

        // Saturate account 1's single slot and hold it.
        let held = scheduler
            .concurrency
            .acquire(ConcurrencyCache::account_key(1), 1)
            .await
            .unwrap();

        let dispatch = scheduler
            .dispatch("claude-official", "claude-3-5-sonnet", None)
            .await
            .unwrap();
        assert_eq!(dispatch.account_id, 2);
        drop(held);
    }
}
