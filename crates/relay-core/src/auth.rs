//! API-key middleware (C7): resolves the `Authorization`/`X-API-Key` header
//! to a key/user pair, then gates on status, per-minute rate limit,
//! allowed-platform/model/client lists, and quota headroom. Order follows
//! the documented precedent: rate limit before concurrency (the scheduler
//! owns concurrency), both configurable via `GlobalConfig`.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use tokio::sync::Mutex;

use relay_storage::StorageSnapshot;

#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    pub user_id: Option<String>,
    pub key_id: Option<String>,
    pub price_rate: f64,
    pub rate_limit_per_minute: Option<i32>,
    pub allowed_platforms: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub allowed_clients: Option<Vec<String>>,
    pub package_id: Option<i64>,
}

#[derive(Debug)]
pub struct AuthError {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl AuthError {
    pub fn new(status: StatusCode, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }
}

pub trait AuthProvider: Send + Sync {
    #[allow(clippy::result_large_err)]
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError>;
}

#[derive(Debug, Default)]
pub struct NoopAuth;

impl AuthProvider for NoopAuth {
    fn authenticate(&self, _headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        Ok(AuthContext::default())
    }
}

#[derive(Debug, Clone)]
pub struct AuthKeyEntry {
    pub key_id: i64,
    pub user_id: i64,
    pub status: String,
    pub price_rate: f64,
    pub rate_limit_per_minute: Option<i32>,
    pub allowed_platforms: Option<Vec<String>>,
    pub allowed_models: Option<Vec<String>>,
    pub allowed_clients: Option<Vec<String>>,
    pub package_id: Option<i64>,
}

impl AuthKeyEntry {
    fn is_active(&self) -> bool {
        self.status == "active"
    }
}

#[derive(Debug, Clone)]
pub struct UserEntry {
    pub id: i64,
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AuthSnapshot {
    pub keys_by_hash: HashMap<String, AuthKeyEntry>,
    pub users_by_id: HashMap<i64, UserEntry>,
}

/// `relay_storage::ApiKeyRow` only ever stores `key_hash`, never the
/// plaintext key, so lookups must hash the incoming key the same way
/// `bootstrap::hash_admin_key` hashes the admin key.
pub fn hash_api_key(raw: &str) -> String {
    blake3::hash(raw.as_bytes()).to_hex().to_string()
}

fn json_string_list(value: &Option<serde_json::Value>) -> Option<Vec<String>> {
    value.as_ref().and_then(|v| v.as_array()).map(|items| {
        items
            .iter()
            .filter_map(|item| item.as_str().map(str::to_string))
            .collect()
    })
}

/// Builds the in-memory lookup table `MemoryAuth` serves requests from out
/// of the latest config-plane snapshot, keyed by key hash rather than id so
/// authentication never needs a database round trip.
pub fn snapshot_from_storage(snapshot: &StorageSnapshot) -> AuthSnapshot {
    let mut keys_by_hash = HashMap::with_capacity(snapshot.api_keys.len());
    for key in &snapshot.api_keys {
        keys_by_hash.insert(
            key.key_hash.clone(),
            AuthKeyEntry {
                key_id: key.id,
                user_id: key.user_id,
                status: key.status.clone(),
                price_rate: key.price_rate,
                rate_limit_per_minute: key.rate_limit_per_minute,
                allowed_platforms: json_string_list(&key.allowed_platforms),
                allowed_models: json_string_list(&key.allowed_models),
                allowed_clients: json_string_list(&key.allowed_clients),
                package_id: key.package_id,
            },
        );
    }

    let users_by_id = snapshot
        .users
        .iter()
        .map(|user| {
            (
                user.id,
                UserEntry {
                    id: user.id,
                    name: Some(user.name.clone()),
                },
            )
        })
        .collect();

    AuthSnapshot {
        keys_by_hash,
        users_by_id,
    }
}

#[derive(Debug)]
pub struct MemoryAuth {
    snapshot: ArcSwap<AuthSnapshot>,
}

impl MemoryAuth {
    pub fn new(snapshot: AuthSnapshot) -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(snapshot),
        }
    }

    pub fn replace_snapshot(&self, snapshot: AuthSnapshot) {
        self.snapshot.store(Arc::new(snapshot));
    }
}

impl AuthProvider for MemoryAuth {
    fn authenticate(&self, headers: &HeaderMap) -> Result<AuthContext, AuthError> {
        let api_key = extract_api_key(headers)
            .ok_or_else(|| AuthError::new(StatusCode::UNAUTHORIZED, "missing api key"))?;

        let key_hash = hash_api_key(&api_key);
        let snapshot = self.snapshot.load();
        let entry = snapshot
            .keys_by_hash
            .get(&key_hash)
            .ok_or_else(|| AuthError::new(StatusCode::FORBIDDEN, "invalid api key"))?;

        if !entry.is_active() {
            return Err(AuthError::new(StatusCode::FORBIDDEN, "api key disabled"));
        }

        Ok(AuthContext {
            user_id: Some(entry.user_id.to_string()),
            key_id: Some(entry.key_id.to_string()),
            price_rate: if entry.price_rate > 0.0 { entry.price_rate } else { 1.0 },
            rate_limit_per_minute: entry.rate_limit_per_minute,
            allowed_platforms: entry.allowed_platforms.clone(),
            allowed_models: entry.allowed_models.clone(),
            allowed_clients: entry.allowed_clients.clone(),
            package_id: entry.package_id,
        })
    }
}

fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = header_value(headers, "x-api-key") {
        return Some(value);
    }

    let auth = header_value(headers, "authorization")?;
    let auth = auth.trim();
    if let Some(token) = auth.strip_prefix("Bearer ") {
        return Some(token.trim().to_string());
    }
    if let Some(token) = auth.strip_prefix("bearer ") {
        return Some(token.trim().to_string());
    }
    None
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// Empty or missing means "no constraint", per the documented resolution of
/// the allowed_models/allowed_platforms ambiguity — a key (or account) that
/// never set a list restricts nothing.
pub fn list_allows(list: &Option<Vec<String>>, value: &str) -> bool {
    match list {
        None => true,
        Some(items) if items.is_empty() => true,
        Some(items) => items.iter().any(|item| item == value),
    }
}

/// Fixed-window per-minute counter, one window per key id. A window rolls
/// over lazily on the next check rather than on a timer, so idle keys cost
/// nothing between requests.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns `true` if this request fits within `limit` for the current
    /// minute window, incrementing the counter as a side effect. `limit ==
    /// None` means unlimited.
    pub async fn check(&self, key_id: &str, limit: Option<i32>) -> bool {
        let Some(limit) = limit else {
            return true;
        };
        if limit <= 0 {
            return true;
        }
        let now = Instant::now();
        let mut windows = self.windows.lock().await;
        let entry = windows
            .entry(key_id.to_string())
            .or_insert((now, 0));
        if now.duration_since(entry.0) >= Duration::from_secs(60) {
            *entry = (now, 0);
        }
        if entry.1 >= limit as u32 {
            return false;
        }
        entry.1 += 1;
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> AuthKeyEntry {
        AuthKeyEntry {
            key_id: 1,
            user_id: 7,
            status: "active".to_string(),
            price_rate: 1.5,
            rate_limit_per_minute: Some(2),
            allowed_platforms: None,
            allowed_models: Some(vec!["gpt-4o".to_string()]),
            allowed_clients: None,
            package_id: Some(9),
        }
    }

    fn headers_with_key(key: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert("x-api-key", key.parse().unwrap());
        headers
    }

    #[test]
    fn authenticates_known_key_and_carries_price_rate() {
        let mut snapshot = AuthSnapshot::default();
        snapshot
            .keys_by_hash
            .insert(hash_api_key("sk-test"), entry());
        let auth = MemoryAuth::new(snapshot);
        let ctx = auth.authenticate(&headers_with_key("sk-test")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("7"));
        assert_eq!(ctx.price_rate, 1.5);
    }

    #[test]
    fn unknown_key_is_forbidden() {
        let auth = MemoryAuth::new(AuthSnapshot::default());
        let err = auth.authenticate(&headers_with_key("sk-nope")).unwrap_err();
        assert_eq!(err.status, StatusCode::FORBIDDEN);
    }

    #[test]
    fn empty_allowed_list_means_unconstrained() {
        assert!(list_allows(&None, "anything"));
        assert!(list_allows(&Some(Vec::new()), "anything"));
        assert!(!list_allows(&Some(vec!["a".to_string()]), "b"));
    }

    #[tokio::test]
    async fn rate_limiter_blocks_after_the_limit_within_a_window() {
        let limiter = RateLimiter::new();
        assert!(limiter.check("k1", Some(2)).await);
        assert!(limiter.check("k1", Some(2)).await);
        assert!(!limiter.check("k1", Some(2)).await);
    }

    #[tokio::test]
    async fn rate_limiter_unlimited_when_no_limit_set() {
        let limiter = RateLimiter::new();
        for _ in 0..10 {
            assert!(limiter.check("k2", None).await);
        }
    }

    #[test]
    fn snapshot_from_storage_keys_by_hash_not_plaintext() {
        use relay_storage::snapshot::{ApiKeyRow, UserRow};
        use time::OffsetDateTime;

        let now = OffsetDateTime::UNIX_EPOCH;
        let mut snapshot = StorageSnapshot::default();
        snapshot.users.push(UserRow {
            id: 7,
            name: "alice".to_string(),
            enabled: true,
            created_at: now,
            updated_at: now,
        });
        snapshot.api_keys.push(ApiKeyRow {
            id: 1,
            user_id: 7,
            key_hash: hash_api_key("sk-live"),
            key_prefix: "sk-l".to_string(),
            status: "active".to_string(),
            rate_limit_per_minute: None,
            price_rate: 1.0,
            allowed_platforms: None,
            allowed_models: None,
            allowed_clients: None,
            package_id: None,
            created_at: now,
        });

        let built = snapshot_from_storage(&snapshot);
        assert!(built.keys_by_hash.contains_key(&hash_api_key("sk-live")));
        assert!(!built.keys_by_hash.contains_key("sk-live"));
        assert_eq!(built.users_by_id.get(&7).unwrap().name.as_deref(), Some("alice"));

        let auth = MemoryAuth::new(built);
        let ctx = auth.authenticate(&headers_with_key("sk-live")).unwrap();
        assert_eq!(ctx.user_id.as_deref(), Some("7"));
    }
}
