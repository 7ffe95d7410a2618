//! Usage recorder (C10): fire-and-forget persistence of one completed
//! request. Cost is model price × the caller's price multiplier, applied to
//! the already-multiplied token counts the client saw (see `stream::RateWriter`
//! for the multiplier itself) — the DB never needs to re-derive it.

use std::sync::Arc;

use relay_storage::{NewRequestLog, Storage};
use time::{Date, OffsetDateTime};

use crate::stream::UsageTotals;

/// Flat per-1k-token price table. A real deployment would load this from
/// the model table alongside the account config; this proxy keeps a small
/// built-in default and falls back to a flat rate for anything unlisted, so
/// cost accounting never silently returns zero for an unrecognized model.
fn price_per_1k_tokens(model: &str) -> f64 {
    match model {
        m if m.starts_with("gpt-4o") => 0.005,
        m if m.starts_with("gpt-4") => 0.01,
        m if m.starts_with("claude-3-opus") => 0.015,
        m if m.starts_with("claude-3-5-sonnet") || m.starts_with("claude-3-7-sonnet") => 0.003,
        m if m.starts_with("claude-3-5-haiku") => 0.0008,
        m if m.starts_with("gemini") => 0.00025,
        _ => 0.002,
    }
}

pub struct CompletedRequest {
    pub trace_id: String,
    pub user_id: Option<i64>,
    pub api_key_id: Option<i64>,
    pub account_id: Option<i64>,
    pub package_id: Option<i64>,
    pub platform: String,
    pub operation: String,
    pub model: String,
    pub is_stream: bool,
    pub upstream_status: i32,
    pub duration_ms: i64,
    pub usage: UsageTotals,
    pub request_headers: String,
    pub request_body: String,
    pub response_headers: String,
    pub response_body: String,
    pub error: Option<String>,
}

fn cost_for(model: &str, usage: &UsageTotals) -> f64 {
    let price = price_per_1k_tokens(model);
    (usage.total() as f64 / 1000.0) * price
}

/// Persists the log row, then the four downstream counters the testable
/// properties require to stay commutative under concurrent writers: daily
/// rollup, API key totals, account cost, and (if bound) package usage.
/// Every step is independently fire-and-forget — a failure here is logged,
/// never surfaced to the client whose response already went out.
pub async fn record(storage: Arc<dyn Storage>, completed: CompletedRequest) {
    let cost = cost_for(&completed.model, &completed.usage);
    let now = OffsetDateTime::now_utc();

    let log = NewRequestLog {
        trace_id: Some(completed.trace_id.clone()),
        user_id: completed.user_id,
        api_key_id: completed.api_key_id,
        account_id: completed.account_id,
        platform: completed.platform.clone(),
        operation: completed.operation.clone(),
        model: Some(completed.model.clone()),
        is_stream: completed.is_stream,
        upstream_status: Some(completed.upstream_status),
        duration_ms: completed.duration_ms,
        input_tokens: Some(completed.usage.input_tokens),
        output_tokens: Some(completed.usage.output_tokens),
        cache_creation_tokens: Some(completed.usage.cache_creation_tokens),
        cache_read_tokens: Some(completed.usage.cache_read_tokens),
        cost: Some(cost),
        request_headers: completed.request_headers,
        request_body: completed.request_body,
        response_headers: completed.response_headers,
        response_body: completed.response_body,
        error: completed.error,
    };

    if let Err(err) = storage.append_request_log(log).await {
        tracing::warn!(error = %err, "failed to persist request log");
    }

    let Some(user_id) = completed.user_id else {
        return;
    };
    let today: Date = now.date();
    if let Err(err) = storage
        .increment_daily_rollup(
            user_id,
            today,
            &completed.model,
            1,
            completed.usage.input_tokens,
            completed.usage.output_tokens,
            cost,
        )
        .await
    {
        tracing::warn!(error = %err, "failed to increment daily rollup");
    }

    if let Some(key_id) = completed.api_key_id
        && let Err(err) = storage.increment_api_key_usage(key_id, 1, cost).await
    {
        tracing::warn!(error = %err, "failed to increment api key usage");
    }

    if let Some(account_id) = completed.account_id
        && let Err(err) = storage.record_account_cost(account_id, cost).await
    {
        tracing::warn!(error = %err, "failed to record account cost");
    }

    if let Some(package_id) = completed.package_id
        && let Err(err) = storage.increment_package_usage(package_id, cost).await
    {
        tracing::warn!(error = %err, "failed to increment package usage");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cost_scales_with_multiplied_tokens() {
        let usage = UsageTotals {
            input_tokens: 1000,
            output_tokens: 1000,
            cache_creation_tokens: 0,
            cache_read_tokens: 0,
        };
        let cost = cost_for("gpt-4o-mini", &usage);
        assert!((cost - 0.01).abs() < 1e-9);
    }

    #[test]
    fn unknown_model_falls_back_to_flat_rate() {
        assert_eq!(price_per_1k_tokens("some-unlisted-model"), 0.002);
    }
}
