//! Health-check service (C9): two background loops keep `accounts.status`
//! current. The normal loop watches `valid` accounts for the first sign of
//! trouble; the problem loop nurses already-troubled accounts back (or
//! further away from) service. Status transitions are mirrored into the
//! scheduler's in-memory pool so a sick account drops out of candidate
//! selection immediately, not on the next bootstrap.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, Semaphore};

use relay_provider_core::{ProviderRegistry, Scheduler, UnavailableReason, UpstreamCtx};
use relay_storage::Storage;

use crate::state::AppState;
use crate::upstream_client::UpstreamClient;

const RATE_LIMIT_RESET_DEFAULT_SECS: u64 = 30 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Alive,
    TokenExpired,
    Suspended,
    RateLimited,
    Dead,
}

/// String-matches a probe failure the way the upstream platforms actually
/// report it — there is no shared status-code vocabulary across Claude,
/// OpenAI, and Gemini, so the body text carries the real signal.
pub fn classify_probe_failure(status: u16, body: &str) -> ProbeOutcome {
    let lower = body.to_ascii_lowercase();
    if status == 401 || lower.contains("expired") || lower.contains("token") {
        return ProbeOutcome::TokenExpired;
    }
    if status == 403
        || lower.contains("banned")
        || lower.contains("suspended")
        || lower.contains("disabled")
        || lower.contains("permission")
    {
        return ProbeOutcome::Suspended;
    }
    if status == 429 || lower.contains("rate limit") {
        return ProbeOutcome::RateLimited;
    }
    ProbeOutcome::Dead
}

pub struct HealthService {
    state: Arc<AppState>,
    storage: Arc<dyn Storage>,
    client: Arc<dyn UpstreamClient>,
    max_parallel_probes: usize,
    consecutive_error_threshold: u32,
    backoff_factor: f64,
    backoff_max_secs: u64,
    suspended_confirm_threshold: u32,
    /// Unclassified-failure streak per account, cleared on the first success.
    /// Only a plain `Dead` outcome (no matching string signal) counts here —
    /// token-expired/suspended/rate-limited are already unambiguous.
    error_counts: Mutex<HashMap<i64, u32>>,
    /// How many consecutive problem-loop probes a `suspended` account has
    /// failed; reaching `suspended_confirm_threshold` promotes it to `banned`.
    suspended_counts: Mutex<HashMap<i64, u32>>,
}

impl HealthService {
    pub fn new(
        state: Arc<AppState>,
        storage: Arc<dyn Storage>,
        client: Arc<dyn UpstreamClient>,
    ) -> Self {
        let global = state.global.load();
        Self {
            max_parallel_probes: global.health_max_parallel_probes.max(1) as usize,
            consecutive_error_threshold: global.health_consecutive_error_threshold.max(1),
            backoff_factor: global.health_backoff_factor,
            backoff_max_secs: global.health_backoff_max_secs,
            suspended_confirm_threshold: global.health_suspended_confirm_threshold.max(1),
            state,
            storage,
            client,
            error_counts: Mutex::new(HashMap::new()),
            suspended_counts: Mutex::new(HashMap::new()),
        }
    }

    fn registry(&self) -> &ProviderRegistry {
        &self.state.registry
    }

    fn scheduler(&self) -> &Scheduler {
        &self.state.scheduler
    }

    /// Sends the adapter's lightweight status probe for `account_id`,
    /// returning the parsed outcome. Accounts whose adapter has no probe
    /// hook (`build_upstream_usage` unimplemented) are treated as always
    /// alive — there's nothing cheaper to check them with.
    async fn probe(&self, account_id: i64) -> Option<ProbeOutcome> {
        let account = self.scheduler().pool().get(account_id).await?;
        let config = self.state.config_for(account_id)?;
        let provider = self.registry().get(&account.provider)?;

        let ctx = UpstreamCtx {
            trace_id: None,
            user_id: None,
            user_key_id: None,
            user_agent: None,
            outbound_proxy: account.proxy.clone(),
            provider: account.provider.clone(),
            account_id: Some(account_id),
            attempt_no: 1,
        };

        let request = match provider
            .build_upstream_usage(&ctx, &config, &account.credential)
            .await
        {
            Ok(req) => req,
            Err(_) => return Some(ProbeOutcome::Alive),
        };

        match self.client.send(request).await {
            Ok(response) if (200..300).contains(&response.status) || response.status == 429 => {
                Some(ProbeOutcome::Alive)
            }
            Ok(response) => {
                let status = response.status;
                let body = collect_text(response).await;
                Some(classify_probe_failure(status, &body))
            }
            Err(_) => Some(ProbeOutcome::Dead),
        }
    }

    async fn apply_outcome(&self, account_id: i64, outcome: ProbeOutcome, current_status: &str) {
        let next_status: String = match outcome {
            ProbeOutcome::Alive => {
                self.error_counts.lock().await.remove(&account_id);
                self.suspended_counts.lock().await.remove(&account_id);
                "valid".to_string()
            }
            ProbeOutcome::TokenExpired => "token_expired".to_string(),
            ProbeOutcome::RateLimited => "rate_limited".to_string(),
            ProbeOutcome::Suspended => {
                if current_status == "suspended" {
                    let mut counts = self.suspended_counts.lock().await;
                    let count = counts.entry(account_id).or_insert(0);
                    *count += 1;
                    if *count >= self.suspended_confirm_threshold {
                        "banned".to_string()
                    } else {
                        "suspended".to_string()
                    }
                } else {
                    "suspended".to_string()
                }
            }
            ProbeOutcome::Dead => {
                if current_status == "suspended" {
                    let mut counts = self.suspended_counts.lock().await;
                    let count = counts.entry(account_id).or_insert(0);
                    *count += 1;
                    if *count >= self.suspended_confirm_threshold {
                        "banned".to_string()
                    } else {
                        "suspended".to_string()
                    }
                } else {
                    let mut counts = self.error_counts.lock().await;
                    let count = counts.entry(account_id).or_insert(0);
                    *count += 1;
                    if *count >= self.consecutive_error_threshold {
                        "suspended".to_string()
                    } else {
                        current_status.to_string()
                    }
                }
            }
        };
        let next_status = next_status.as_str();

        if let Err(err) = self.storage.set_account_status(account_id, next_status).await {
            tracing::warn!(error = %err, account_id, "failed to persist account status");
        }

        if next_status == "valid" {
            self.state.apply_account_enabled(account_id, true).await;
            return;
        }

        let streak = *self.error_counts.lock().await.get(&account_id).unwrap_or(&0);
        let base_secs = match next_status {
            "rate_limited" => RATE_LIMIT_RESET_DEFAULT_SECS,
            _ => self.backoff_max_secs.min(60),
        };
        let cooldown = Duration::from_secs(backoff_next(
            base_secs.max(1),
            self.backoff_factor.powi(streak as i32).max(1.0),
            self.backoff_max_secs,
        ));
        let reason = match next_status {
            "token_expired" | "banned" => UnavailableReason::AuthInvalid,
            "rate_limited" => UnavailableReason::RateLimit,
            _ => UnavailableReason::Manual,
        };
        self.scheduler()
            .pool()
            .mark_unavailable(account_id, cooldown, reason)
            .await;
    }

    /// Scans `valid` accounts, probing up to `max_parallel_probes` at once.
    pub async fn run_normal_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let semaphore = Arc::new(Semaphore::new(self.max_parallel_probes));
            let account_ids: Vec<i64> = self
                .state
                .snapshot
                .load()
                .accounts
                .iter()
                .filter(|a| a.status == "valid")
                .map(|a| a.id)
                .collect();

            let mut handles = Vec::new();
            for id in account_ids {
                let permit = semaphore.clone().acquire_owned().await.ok();
                let this = self.clone();
                handles.push(tokio::spawn(async move {
                    let _permit = permit;
                    if let Some(outcome) = this.probe(id).await {
                        this.apply_outcome(id, outcome, "valid").await;
                    }
                }));
            }
            for handle in handles {
                let _ = handle.await;
            }
        }
    }

    /// Scans accounts in a troubled status. Backoff/refresh state lives in
    /// `accounts.check_interval_secs`/`next_check_at`, mutated by storage as
    /// this loop runs rather than kept in a parallel in-memory table.
    pub async fn run_problem_loop(self: Arc<Self>, interval: Duration) {
        loop {
            tokio::time::sleep(interval).await;
            let troubled: Vec<(i64, String)> = self
                .state
                .snapshot
                .load()
                .accounts
                .iter()
                .filter(|a| {
                    matches!(
                        a.status.as_str(),
                        "rate_limited" | "overloaded" | "token_expired" | "suspended" | "banned"
                    )
                })
                .map(|a| (a.id, a.status.clone()))
                .collect();

            for (id, status) in troubled {
                if status == "token_expired" {
                    self.try_refresh(id).await;
                    continue;
                }
                if let Some(outcome) = self.probe(id).await {
                    self.apply_outcome(id, outcome, &status).await;
                }
            }
        }
    }

    /// Admin-triggered out-of-band probe: same path `run_normal_loop`/
    /// `run_problem_loop` take, just not waiting for the next tick.
    pub async fn trigger_check(&self, account_id: i64) -> bool {
        let Some(status) = self.account_status(account_id).await else {
            return false;
        };
        let Some(outcome) = self.probe(account_id).await else {
            return false;
        };
        self.apply_outcome(account_id, outcome, &status).await;
        true
    }

    /// Admin override: force an account back to `valid` without waiting for
    /// a probe to confirm it. Used when an operator has fixed the underlying
    /// cause (e.g. topped up a quota) out of band.
    pub async fn force_recover(&self, account_id: i64) -> bool {
        if self.account_status(account_id).await.is_none() {
            return false;
        }
        self.apply_outcome(account_id, ProbeOutcome::Alive, "valid").await;
        true
    }

    /// Admin-triggered OAuth refresh, bypassing the problem loop's normal
    /// `token_expired`-only gate so an operator can retry immediately.
    pub async fn refresh_token(&self, account_id: i64) -> bool {
        if self.account_status(account_id).await.is_none() {
            return false;
        }
        self.try_refresh(account_id).await;
        true
    }

    async fn account_status(&self, account_id: i64) -> Option<String> {
        self.state
            .snapshot
            .load()
            .accounts
            .iter()
            .find(|a| a.id == account_id)
            .map(|a| a.status.clone())
    }

    /// Three-step session-key → OAuth-token upgrade. Gated by
    /// `oauth_auto_refresh_enabled` and a per-account cooldown so an account
    /// stuck failing refresh doesn't hammer the platform every tick.
    async fn try_refresh(&self, account_id: i64) {
        let global = self.state.global.load();
        if !global.oauth_auto_refresh_enabled {
            return;
        }
        let Some(account) = self.scheduler().pool().get(account_id).await else {
            return;
        };
        let Some(config) = self.state.config_for(account_id) else {
            return;
        };
        let Some(provider) = self.registry().get(&account.provider) else {
            return;
        };

        let ctx = UpstreamCtx {
            trace_id: None,
            user_id: None,
            user_key_id: None,
            user_agent: None,
            outbound_proxy: account.proxy.clone(),
            provider: account.provider.clone(),
            account_id: Some(account_id),
            attempt_no: 1,
        };

        match provider
            .upgrade_credential(&ctx, &config, &account.credential)
            .await
        {
            Ok(Some(refreshed)) => {
                self.scheduler()
                    .pool()
                    .update_credential(account_id, refreshed)
                    .await;
                self.apply_outcome(account_id, ProbeOutcome::Alive, "token_expired").await;
            }
            Ok(None) => {}
            Err(_) => {
                // Cooldown bookkeeping lives in the account row; a failed
                // refresh just leaves the account in `token_expired` for the
                // next tick to retry once the cooldown in `relay_common`
                // allows it.
            }
        }
    }
}

async fn collect_text(response: relay_provider_core::UpstreamHttpResponse) -> String {
    use relay_provider_core::UpstreamBody;
    match response.body {
        UpstreamBody::Bytes(bytes) => String::from_utf8_lossy(&bytes).to_string(),
        UpstreamBody::Stream(mut rx) => {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            String::from_utf8_lossy(&buf).to_string()
        }
    }
}

fn backoff_next(current_secs: u64, factor: f64, max_secs: u64) -> u64 {
    ((current_secs as f64) * factor).round().min(max_secs as f64) as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_token_expired_from_status() {
        assert_eq!(classify_probe_failure(401, ""), ProbeOutcome::TokenExpired);
    }

    #[test]
    fn classifies_suspended_from_body_text() {
        assert_eq!(
            classify_probe_failure(400, "account disabled for policy violation"),
            ProbeOutcome::Suspended
        );
    }

    #[test]
    fn classifies_rate_limited_from_status() {
        assert_eq!(classify_probe_failure(429, ""), ProbeOutcome::RateLimited);
    }

    #[test]
    fn unrecognized_failure_is_dead() {
        assert_eq!(classify_probe_failure(418, "teapot"), ProbeOutcome::Dead);
    }

    #[test]
    fn backoff_caps_at_max() {
        assert_eq!(backoff_next(20 * 60, 1.5, 30 * 60), 30 * 60);
    }
}
