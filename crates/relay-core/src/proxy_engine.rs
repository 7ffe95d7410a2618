//! Proxy engine: the request hot path. Composes, in order, route
//! classification, API-key auth + per-minute rate limiting, the client
//! filter, scheduler dispatch with retry-on-failover, rate-scaled response
//! forwarding (streaming or buffered), and fire-and-forget usage recording.
//! Everything downstream of classification is wire-format agnostic — it
//! only ever touches `ProxyClassified` and raw bytes.

use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::Response;
use bytes::Bytes;
use http::header::USER_AGENT;
use uuid::Uuid;

use relay_provider_core::{AccountId, ProviderRegistry, UpstreamBody, UpstreamCtx};
use relay_storage::Storage;

use crate::auth::{self, AuthContext, AuthError, AuthProvider, MemoryAuth, RateLimiter};
use crate::classify::{self, ProxyClassified};
use crate::client_filter::{ClientFilter, ClientRule, Verdict};
use crate::error::ProxyError;
use crate::retry::{self, RetryError};
use crate::state::AppState;
use crate::stream::{RateWriter, StreamForwarder, UsageTotals};
use crate::upstream_client::UpstreamClient;
use crate::usage_recorder::{self, CompletedRequest};

pub struct ProxyEngine {
    state: Arc<AppState>,
    registry: Arc<ProviderRegistry>,
    upstream_client: Arc<dyn UpstreamClient>,
    storage: Arc<dyn Storage>,
    auth: MemoryAuth,
    rate_limiter: RateLimiter,
    client_filter: ClientFilter,
}

impl ProxyEngine {
    pub fn new(
        state: Arc<AppState>,
        registry: Arc<ProviderRegistry>,
        upstream_client: Arc<dyn UpstreamClient>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        let auth = MemoryAuth::new(auth::snapshot_from_storage(&state.snapshot.load()));
        let client_filter = client_filter_from_global(&state);

        Self {
            state,
            registry,
            upstream_client,
            storage,
            auth,
            rate_limiter: RateLimiter::new(),
            client_filter,
        }
    }

    /// Re-derives the in-memory auth snapshot and client filter from the
    /// latest storage snapshot / global config. Call after an admin mutation
    /// lands so the next request sees it without a restart.
    pub fn refresh(&self) {
        self.auth
            .replace_snapshot(auth::snapshot_from_storage(&self.state.snapshot.load()));
    }

    pub async fn handle(&self, path: &str, headers: HeaderMap, body: Bytes) -> Response {
        let trace_id = Uuid::new_v4().to_string();
        let started = Instant::now();

        let classified = match classify::classify_request(path, &headers, &body) {
            Ok(classified) => classified,
            Err(err) => return proxy_error_response(err, &trace_id),
        };

        let auth_ctx = match self.auth.authenticate(&headers) {
            Ok(ctx) => ctx,
            Err(err) => return auth_error_response(err, &trace_id),
        };

        let key_id_str = auth_ctx.key_id.clone().unwrap_or_default();
        if !self
            .rate_limiter
            .check(&key_id_str, auth_ctx.rate_limit_per_minute)
            .await
        {
            return json_error(
                StatusCode::TOO_MANY_REQUESTS,
                "rate_limited",
                "rate limit exceeded",
                &trace_id,
            );
        }

        let platform = platform_for(&classified);
        if !auth::list_allows(&auth_ctx.allowed_platforms, platform)
            || !auth::list_allows(&auth_ctx.allowed_models, classified.model())
        {
            return json_error(
                StatusCode::FORBIDDEN,
                "client_forbidden",
                "platform or model not permitted for this key",
                &trace_id,
            );
        }

        let user_agent = headers
            .get(USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        if let Some(clients) = &auth_ctx.allowed_clients
            && !clients.is_empty()
            && !user_agent
                .as_deref()
                .is_some_and(|ua| clients.iter().any(|allowed| ua.contains(allowed.as_str())))
        {
            return json_error(
                StatusCode::FORBIDDEN,
                "client_forbidden",
                "client not permitted for this key",
                &trace_id,
            );
        }

        let verdict = self.client_filter.check(
            user_agent.as_deref(),
            path,
            &headers,
            classified.system_prompt_text().as_deref(),
        );
        if verdict == Verdict::Deny {
            return json_error(
                StatusCode::FORBIDDEN,
                "client_forbidden",
                "client system prompt failed verification",
                &trace_id,
            );
        }

        let mut ctx = UpstreamCtx {
            trace_id: Some(trace_id.clone()),
            user_id: parse_id(auth_ctx.user_id.as_deref()),
            user_key_id: parse_id(auth_ctx.key_id.as_deref()),
            user_agent: user_agent.clone(),
            outbound_proxy: None,
            provider: platform.to_string(),
            account_id: None,
            attempt_no: 1,
        };

        let max_attempts = self.state.global.load().retry_max_attempts;
        let state = self.state.clone();
        let config_for = move |id: AccountId| state.config_for(id);

        let outcome = retry::execute(
            &self.state.scheduler,
            &self.registry,
            config_for,
            self.upstream_client.as_ref(),
            platform,
            &mut ctx,
            &classified,
            &body,
            max_attempts,
        )
        .await;

        match outcome {
            Ok(retry::RetryOutcome { account_id, response }) => {
                self.respond_success(response, &classified, &auth_ctx, Some(account_id), platform, &trace_id, started)
                    .await
            }
            Err(err) => {
                self.respond_failure(err, &classified, &auth_ctx, platform, &trace_id, started)
                    .await
            }
        }
    }

    async fn respond_success(
        &self,
        response: relay_provider_core::UpstreamHttpResponse,
        classified: &ProxyClassified,
        auth_ctx: &AuthContext,
        account_id: Option<AccountId>,
        platform: &str,
        trace_id: &str,
        started: Instant,
    ) -> Response {
        let rate = if auth_ctx.price_rate > 0.0 { auth_ctx.price_rate } else { 1.0 };
        let tail_capacity = self.state.global.load().stream_tail_bytes;

        let result = if classified.is_stream() {
            self.respond_stream(response, rate, tail_capacity, classified, auth_ctx, account_id, platform, trace_id, started)
        } else {
            self.respond_buffered(response, rate, classified, auth_ctx, account_id, platform, trace_id, started)
                .await
        };
        result.unwrap_or_else(|| internal_error_response(trace_id))
    }

    fn respond_stream(
        &self,
        response: relay_provider_core::UpstreamHttpResponse,
        rate: f64,
        tail_capacity: usize,
        classified: &ProxyClassified,
        auth_ctx: &AuthContext,
        account_id: Option<AccountId>,
        platform: &str,
        trace_id: &str,
        started: Instant,
    ) -> Option<Response> {
        let UpstreamBody::Stream(mut rx) = response.body else {
            return None;
        };

        let storage = self.storage.clone();
        let trace_id = trace_id.to_string();
        let model = classified.model().to_string();
        let operation = classified.operation().to_string();
        let platform = platform.to_string();
        let auth_ctx = auth_ctx.clone();
        let status = response.status;
        let elapsed_started = started;

        let (tx, body_stream) = tokio::sync::mpsc::channel::<Result<Bytes, std::io::Error>>(16);
        tokio::spawn(async move {
            let mut forwarder = StreamForwarder::new(rate, tail_capacity);
            while let Some(chunk) = rx.recv().await {
                let out = forwarder.push_chunk(&chunk);
                if !out.is_empty() && tx.send(Ok(out)).await.is_err() {
                    break;
                }
            }
            let tail = forwarder.finish();
            if !tail.is_empty() {
                let _ = tx.send(Ok(tail)).await;
            }

            usage_recorder::record(
                storage,
                CompletedRequest {
                    trace_id,
                    user_id: parse_id(auth_ctx.user_id.as_deref()),
                    api_key_id: parse_id(auth_ctx.key_id.as_deref()),
                    account_id,
                    package_id: auth_ctx.package_id,
                    platform,
                    operation,
                    model,
                    is_stream: true,
                    upstream_status: status as i32,
                    duration_ms: elapsed_started.elapsed().as_millis() as i64,
                    usage: forwarder.totals(),
                    request_headers: String::new(),
                    request_body: String::new(),
                    response_headers: String::new(),
                    response_body: String::from_utf8_lossy(&forwarder.tail()).to_string(),
                    error: None,
                },
            )
            .await;
        });

        let stream = tokio_stream::wrappers::ReceiverStream::new(body_stream);
        let mut resp = Response::new(Body::from_stream(stream));
        *resp.status_mut() = axum::http::StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        apply_sse_headers(&mut resp);
        extend_headers(&mut resp, &response.headers);
        if let Ok(value) = HeaderValue::from_str(trace_id.as_str()) {
            resp.headers_mut().insert("x-relay-trace-id", value);
        }
        Some(resp)
    }

    async fn respond_buffered(
        &self,
        response: relay_provider_core::UpstreamHttpResponse,
        rate: f64,
        classified: &ProxyClassified,
        auth_ctx: &AuthContext,
        account_id: Option<AccountId>,
        platform: &str,
        trace_id: &str,
        started: Instant,
    ) -> Option<Response> {
        let status = response.status;
        let headers = response.headers.clone();
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

        let mut totals = UsageTotals::default();
        let out_body = match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(mut value) => {
                RateWriter::new(rate).rewrite(&mut value, &mut totals);
                Bytes::from(serde_json::to_vec(&value).unwrap_or_else(|_| body.to_vec()))
            }
            Err(_) => body.clone(),
        };

        usage_recorder::record(
            self.storage.clone(),
            CompletedRequest {
                trace_id: trace_id.to_string(),
                user_id: parse_id(auth_ctx.user_id.as_deref()),
                api_key_id: parse_id(auth_ctx.key_id.as_deref()),
                account_id,
                package_id: auth_ctx.package_id,
                platform: platform.to_string(),
                operation: classified.operation().to_string(),
                model: classified.model().to_string(),
                is_stream: false,
                upstream_status: status as i32,
                duration_ms: started.elapsed().as_millis() as i64,
                usage: totals,
                request_headers: String::new(),
                request_body: String::new(),
                response_headers: String::new(),
                response_body: String::from_utf8_lossy(&out_body).to_string(),
                error: None,
            },
        )
        .await;

        let mut resp = Response::new(Body::from(out_body));
        *resp.status_mut() = axum::http::StatusCode::from_u16(status).unwrap_or(StatusCode::OK);
        extend_headers(&mut resp, &headers);
        if let Ok(value) = HeaderValue::from_str(trace_id) {
            resp.headers_mut().insert("x-relay-trace-id", value);
        }
        Some(resp)
    }

    async fn respond_failure(
        &self,
        err: RetryError,
        classified: &ProxyClassified,
        auth_ctx: &AuthContext,
        platform: &str,
        trace_id: &str,
        started: Instant,
    ) -> Response {
        let (status, code, message) = match &err {
            RetryError::NoAvailableAccount => (StatusCode::SERVICE_UNAVAILABLE, "no_available_account", "no account available".to_string()),
            RetryError::UnsupportedModel(reason) => (StatusCode::BAD_GATEWAY, "unsupported_model", reason.to_string()),
            RetryError::AllAccountsFailed { last } => (StatusCode::BAD_GATEWAY, "all_accounts_failed", format!("{last:?}")),
        };

        usage_recorder::record(
            self.storage.clone(),
            CompletedRequest {
                trace_id: trace_id.to_string(),
                user_id: parse_id(auth_ctx.user_id.as_deref()),
                api_key_id: parse_id(auth_ctx.key_id.as_deref()),
                account_id: None,
                package_id: auth_ctx.package_id,
                platform: platform.to_string(),
                operation: classified.operation().to_string(),
                model: classified.model().to_string(),
                is_stream: classified.is_stream(),
                upstream_status: status.as_u16() as i32,
                duration_ms: started.elapsed().as_millis() as i64,
                usage: UsageTotals::default(),
                request_headers: String::new(),
                request_body: String::new(),
                response_headers: String::new(),
                response_body: String::new(),
                error: Some(message.clone()),
            },
        )
        .await;

        json_error(status, code, &message, trace_id)
    }
}

fn client_filter_from_global(state: &AppState) -> ClientFilter {
    let global = state.global.load();
    ClientFilter::new(
        Vec::<ClientRule>::new(),
        global.client_filter_strict_claude_code,
        global.client_filter_dice_threshold,
        global.client_filter_default_allow_unknown,
    )
}

fn platform_for(classified: &ProxyClassified) -> &'static str {
    match classified {
        ProxyClassified::ClaudeMessages { pin, .. } => match pin {
            Some(crate::classify::PinnedKind::Claude) => "claude-official",
            _ => "claude-official",
        },
        ProxyClassified::ChatCompletions { pin, .. } => match pin {
            Some(crate::classify::PinnedKind::OpenAi) => "openai",
            _ => "openai",
        },
        ProxyClassified::Responses { .. } => "openai-responses",
        ProxyClassified::GenerateContent { .. } => "gemini",
    }
}

fn parse_id(value: Option<&str>) -> Option<i64> {
    value.and_then(|v| v.parse::<i64>().ok())
}

/// Upstream adapters hand back headers as plain string pairs; only the ones
/// that survive `HeaderName`/`HeaderValue` parsing make it onto the response
/// (an upstream emitting a malformed header shouldn't break the proxy).
fn extend_headers(resp: &mut Response, headers: &relay_provider_core::Headers) {
    for (name, value) in headers {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(value)) {
            resp.headers_mut().insert(name, value);
        }
    }
}

fn apply_sse_headers(resp: &mut Response) {
    let headers = resp.headers_mut();
    headers.insert(axum::http::header::CONTENT_TYPE, HeaderValue::from_static("text/event-stream"));
    headers.insert(axum::http::header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(axum::http::header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
}

fn proxy_error_response(err: ProxyError, trace_id: &str) -> Response {
    let mut resp = Response::new(Body::from(err.body));
    *resp.status_mut() = err.status;
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert("x-relay-trace-id", value);
    }
    resp
}

fn auth_error_response(err: AuthError, trace_id: &str) -> Response {
    let mut resp = Response::new(Body::from(err.body));
    *resp.status_mut() = err.status;
    resp.headers_mut().extend(err.headers);
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert("x-relay-trace-id", value);
    }
    resp
}

fn json_error(status: StatusCode, code: &str, message: &str, trace_id: &str) -> Response {
    let body = serde_json::json!({ "code": code, "message": message });
    let mut resp = Response::new(Body::from(body.to_string()));
    *resp.status_mut() = status;
    resp.headers_mut().insert(
        axum::http::header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = HeaderValue::from_str(trace_id) {
        resp.headers_mut().insert("x-relay-trace-id", value);
    }
    resp
}

fn internal_error_response(trace_id: &str) -> Response {
    json_error(StatusCode::INTERNAL_SERVER_ERROR, "internal_error", "internal error", trace_id)
}
