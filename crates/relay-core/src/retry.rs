//! Retry engine (C5): bounded-attempt failover across accounts for the same
//! request. Retries only ever happen before the first response byte reaches
//! the client — once a response is committed to streaming, failure handling
//! moves to the stream forwarder, which never retries.

use std::sync::Arc;

use bytes::Bytes;

use relay_provider_core::{
    Account, AccountId, AcquireError, ProviderConfig, ProviderRegistry, Scheduler, UpstreamCtx,
    UpstreamFailure, UpstreamHttpRequest, UpstreamHttpResponse,
};

use crate::classify::ProxyClassified;
use crate::upstream_client::UpstreamClient;

#[derive(Debug)]
pub enum RetryError {
    NoAvailableAccount,
    AllAccountsFailed { last: UpstreamFailure },
    UnsupportedModel(&'static str),
}

pub struct RetryOutcome {
    pub account_id: AccountId,
    pub response: UpstreamHttpResponse,
}

/// Everything one attempt needs besides the scheduler dispatch: the
/// registered adapter, that account's config, and the original peeked
/// request. `build_upstream_request` is the one place that fans out across
/// the four wire formats to the matching `UpstreamProvider` hook.
async fn build_upstream_request(
    registry: &ProviderRegistry,
    account: &Account,
    config: &ProviderConfig,
    ctx: &UpstreamCtx,
    classified: &ProxyClassified,
    raw_body: &Bytes,
) -> Result<UpstreamHttpRequest, RetryError> {
    let provider = registry
        .get(&account.provider)
        .ok_or(RetryError::UnsupportedModel("no adapter registered for account kind"))?;

    let result = match classified {
        ProxyClassified::ClaudeMessages { peek, .. } => {
            provider
                .build_messages(ctx, config, &account.credential, peek, raw_body)
                .await
        }
        ProxyClassified::ChatCompletions { peek, .. } => {
            provider
                .build_chat_completions(ctx, config, &account.credential, peek, raw_body)
                .await
        }
        ProxyClassified::Responses { peek } => {
            provider
                .build_responses(ctx, config, &account.credential, peek, raw_body)
                .await
        }
        ProxyClassified::GenerateContent { peek, model, stream } => {
            provider
                .build_generate_content(ctx, config, &account.credential, peek, raw_body, model, *stream)
                .await
        }
    };

    result.map_err(|_| RetryError::UnsupportedModel("account kind cannot serve this wire format"))
}

/// Drains an upstream response body fully so the retry engine can classify
/// and, if not retryable, forward it to the client. Only used for the
/// non-2xx path — a successful response's body is handed untouched to the
/// stream forwarder / caller instead.
async fn collect_body(response: UpstreamHttpResponse) -> (u16, relay_provider_core::Headers, Bytes) {
    use relay_provider_core::UpstreamBody;
    let status = response.status;
    let headers = response.headers;
    let body = match response.body {
        UpstreamBody::Bytes(bytes) => bytes,
        UpstreamBody::Stream(mut rx) => {
            let mut buf = Vec::new();
            while let Some(chunk) = rx.recv().await {
                buf.extend_from_slice(&chunk);
            }
            Bytes::from(buf)
        }
    };
    (status, headers, body)
}

/// Runs the dispatch→build→send loop up to `max_attempts` times, excluding
/// whichever account just failed (via `pool.mark_unavailable`, which the
/// scheduler's candidate filter already respects on the next `dispatch`).
pub async fn execute(
    scheduler: &Scheduler,
    registry: &ProviderRegistry,
    config_for: impl Fn(AccountId) -> Option<ProviderConfig>,
    client: &dyn UpstreamClient,
    provider_name: &str,
    ctx: &mut UpstreamCtx,
    classified: &ProxyClassified,
    raw_body: &Bytes,
    max_attempts: u32,
) -> Result<RetryOutcome, RetryError> {
    let mut last_failure: Option<UpstreamFailure> = None;

    for attempt in 1..=max_attempts.max(1) {
        ctx.attempt_no = attempt;

        let dispatch = match scheduler
            .dispatch(provider_name, classified.model(), classified.derived_session_id().as_deref())
            .await
        {
            Ok(dispatch) => dispatch,
            Err(AcquireError::NoActiveCredentials | AcquireError::ProviderUnknown) => {
                return Err(RetryError::NoAvailableAccount);
            }
        };

        let Some(account) = scheduler.pool().get(dispatch.account_id).await else {
            continue;
        };
        let Some(config) = config_for(dispatch.account_id) else {
            continue;
        };
        ctx.account_id = Some(dispatch.account_id);

        let request = match build_upstream_request(registry, &account, &config, ctx, classified, raw_body).await
        {
            Ok(req) => req,
            Err(err) => return Err(err),
        };

        match client.send(request).await {
            Ok(response) if (200..300).contains(&response.status) => {
                return Ok(RetryOutcome {
                    account_id: dispatch.account_id,
                    response,
                });
            }
            Ok(response) => {
                let (status, headers, body) = collect_body(response).await;
                let failure = UpstreamFailure::Http { status, headers, body };
                apply_failure_decision(scheduler, registry, &account, &config, ctx, &failure).await;
                last_failure = Some(failure);
            }
            Err(failure) => {
                apply_failure_decision(scheduler, registry, &account, &config, ctx, &failure).await;
                last_failure = Some(failure);
            }
        }
    }

    Err(RetryError::AllAccountsFailed {
        last: last_failure.unwrap_or(UpstreamFailure::Transport {
            kind: relay_provider_core::UpstreamTransportErrorKind::Other,
            message: "no attempts made".to_string(),
        }),
    })
}

async fn apply_failure_decision(
    scheduler: &Scheduler,
    registry: &ProviderRegistry,
    account: &Account,
    config: &ProviderConfig,
    ctx: &UpstreamCtx,
    failure: &UpstreamFailure,
) {
    let Some(provider) = registry.get(&account.provider) else {
        return;
    };
    if let Some(decision) = provider.decide_unavailable(ctx, config, &account.credential, failure) {
        scheduler
            .pool()
            .mark_unavailable(account.id, decision.duration, decision.reason)
            .await;
    }
}
