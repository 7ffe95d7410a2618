//! Admin router: the minimal operator surface the core itself needs —
//! manual health actions, global config read/reload, and a live event
//! feed. Everything here is gated by the admin key (hashed the same way
//! `bootstrap` hashes it); full account/user/key CRUD is an external
//! collaborator's job, not this proxy's.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use tokio::select;

use relay_common::GlobalConfigPatch;
use relay_core::auth::hash_api_key;
use relay_core::{AppState, HealthService};
use relay_storage::Storage;

#[derive(Clone)]
pub struct AdminState {
    app: Arc<AppState>,
    storage: Arc<dyn Storage>,
    health: Arc<HealthService>,
}

pub fn admin_router(
    state: Arc<AppState>,
    storage: Arc<dyn Storage>,
    health: Arc<HealthService>,
) -> Router {
    let admin = AdminState {
        app: state,
        storage,
        health,
    };

    Router::new()
        .route("/health", get(health_check))
        .route("/global", get(get_global).patch(patch_global))
        .route("/accounts", get(list_accounts))
        .route("/accounts/{id}/trigger-check", post(trigger_check))
        .route("/accounts/{id}/force-recover", post(force_recover))
        .route("/accounts/{id}/refresh-token", post(refresh_token))
        .route("/events/ws", get(events_ws))
        .layer(middleware::from_fn_with_state(admin.clone(), admin_auth))
        .with_state(admin)
}

async fn admin_auth(
    State(state): State<AdminState>,
    headers: HeaderMap,
    req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, StatusCode> {
    let presented = extract_admin_key(&headers, req.uri()).ok_or(StatusCode::UNAUTHORIZED)?;
    let expected = state.app.global.load().admin_key_hash.clone();
    if hash_api_key(&presented) != expected {
        return Err(StatusCode::UNAUTHORIZED);
    }
    Ok(next.run(req).await)
}

fn extract_admin_key(headers: &HeaderMap, uri: &axum::http::Uri) -> Option<String> {
    if let Some(value) = headers.get("x-admin-key")
        && let Ok(s) = value.to_str()
    {
        let s = s.trim();
        if !s.is_empty() {
            return Some(s.to_string());
        }
    }

    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(auth) = value.to_str()
    {
        let auth = auth.trim();
        if let Some(token) = auth.strip_prefix("Bearer ").or_else(|| auth.strip_prefix("bearer ")) {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    let query = uri.query()?;
    let parsed: std::collections::HashMap<String, String> =
        serde_urlencoded::from_str(query).ok()?;
    let key = parsed.get("admin_key")?.trim();
    (!key.is_empty()).then(|| key.to_string())
}

async fn health_check() -> impl IntoResponse {
    (StatusCode::OK, Json(serde_json::json!({ "status": "ok" })))
}

async fn get_global(State(state): State<AdminState>) -> impl IntoResponse {
    Json(state.app.global.load().as_ref().clone())
}

async fn patch_global(
    State(state): State<AdminState>,
    Json(patch): Json<GlobalConfigPatch>,
) -> Response {
    match state.app.apply_global_config_patch(patch) {
        Ok(next) => {
            if let Err(err) = state.storage.upsert_global_config(&next).await {
                tracing::warn!(error = %err, "failed to persist patched global config");
            }
            (StatusCode::OK, Json(next)).into_response()
        }
        Err(err) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": err.to_string() })),
        )
            .into_response(),
    }
}

async fn list_accounts(State(state): State<AdminState>) -> impl IntoResponse {
    let snapshot = state.app.snapshot.load();
    let accounts: Vec<_> = snapshot
        .accounts
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "name": a.name,
                "kind": a.kind,
                "platform": a.platform,
                "enabled": a.enabled,
                "status": a.status,
                "priority": a.priority,
                "weight": a.weight,
            })
        })
        .collect();
    Json(serde_json::json!({ "accounts": accounts }))
}

async fn trigger_check(State(state): State<AdminState>, Path(id): Path<i64>) -> impl IntoResponse {
    admin_action_result(state.health.trigger_check(id).await)
}

async fn force_recover(State(state): State<AdminState>, Path(id): Path<i64>) -> impl IntoResponse {
    admin_action_result(state.health.force_recover(id).await)
}

async fn refresh_token(State(state): State<AdminState>, Path(id): Path<i64>) -> impl IntoResponse {
    admin_action_result(state.health.refresh_token(id).await)
}

fn admin_action_result(ok: bool) -> Response {
    if ok {
        (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "account_not_found" })),
        )
            .into_response()
    }
}

async fn events_ws(ws: WebSocketUpgrade, State(state): State<AdminState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_events_ws(socket, state.app.clone()))
}

async fn handle_events_ws(mut socket: WebSocket, app: Arc<AppState>) {
    let mut rx = app.events.subscribe();

    loop {
        select! {
            msg = socket.recv() => {
                if msg.is_none() {
                    break;
                }
            }
            evt = rx.recv() => {
                let Ok(evt) = evt else {
                    break;
                };
                if let Ok(text) = serde_json::to_string(&evt)
                    && socket.send(Message::Text(text.into())).await.is_err()
                {
                    break;
                }
            }
        }
    }
}
