//! Proxy router: one route per wire-format entry point, all dispatching
//! into the same `ProxyEngine::handle`. The route table itself carries no
//! per-dialect logic — classification happens inside the engine, keyed off
//! the matched path.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use bytes::Bytes;

use relay_core::ProxyEngine;

pub fn proxy_router(engine: Arc<ProxyEngine>) -> Router {
    Router::new()
        .route("/claude/v1/messages", post(dispatch))
        .route("/v1/messages", post(dispatch))
        .route("/api/v1/messages", post(dispatch))
        .route("/openai/v1/chat/completions", post(dispatch))
        .route("/v1/chat/completions", post(dispatch))
        .route("/gemini/v1/chat", post(dispatch))
        .route("/responses", post(dispatch))
        .route("/v1/responses", post(dispatch))
        .route("/responses/compact", post(dispatch))
        .route("/v1/responses/compact", post(dispatch))
        .route("/openai/responses", post(dispatch))
        .route("/openai/v1/responses", post(dispatch))
        .route("/health", get(health))
        .with_state(engine)
}

async fn dispatch(
    State(engine): State<Arc<ProxyEngine>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    engine.handle(uri.path(), headers, body).await
}

async fn health() -> impl IntoResponse {
    (StatusCode::OK, axum::Json(serde_json::json!({ "status": "ok" })))
}
