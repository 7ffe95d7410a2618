use std::collections::HashMap;
use std::time::{Duration, SystemTime};

use tokio::sync::RwLock;

use crate::AccountId;

#[derive(Debug, Clone)]
struct SessionEntry {
    account_id: AccountId,
    user_id: Option<i64>,
    expires_at: SystemTime,
}

/// Sticky-session binding between a derived session id (conversation hash,
/// or an explicit client-supplied id) and the account it was last routed to.
/// Entries are touched on every hit so an active conversation never expires
/// mid-stream, and evicted lazily plus by a periodic sweep.
pub struct SessionCache {
    entries: RwLock<HashMap<String, SessionEntry>>,
    ttl: Duration,
    renewal_threshold: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration, renewal_threshold: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            renewal_threshold,
        }
    }

    /// Returns the bound account id if the session exists and has not
    /// expired, renewing its TTL when within the renewal threshold of expiry.
    pub async fn get(&self, session_id: &str) -> Option<AccountId> {
        let now = SystemTime::now();
        let mut entries = self.entries.write().await;
        let entry = entries.get_mut(session_id)?;
        if entry.expires_at <= now {
            entries.remove(session_id);
            return None;
        }
        if entry.expires_at.duration_since(now).unwrap_or_default() < self.renewal_threshold {
            entry.expires_at = now + self.ttl;
        }
        Some(entry.account_id)
    }

    pub async fn set(&self, session_id: impl Into<String>, account_id: AccountId, user_id: Option<i64>) {
        let mut entries = self.entries.write().await;
        entries.insert(
            session_id.into(),
            SessionEntry {
                account_id,
                user_id,
                expires_at: SystemTime::now() + self.ttl,
            },
        );
    }

    pub async fn touch(&self, session_id: &str) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(session_id) {
            entry.expires_at = SystemTime::now() + self.ttl;
        }
    }

    pub async fn delete(&self, session_id: &str) {
        self.entries.write().await.remove(session_id);
    }

    pub async fn list_by_account(&self, account_id: AccountId) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.account_id == account_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn list_by_user(&self, user_id: i64) -> Vec<String> {
        self.entries
            .read()
            .await
            .iter()
            .filter(|(_, e)| e.user_id == Some(user_id))
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn clear_by_account(&self, account_id: AccountId) {
        self.entries
            .write()
            .await
            .retain(|_, e| e.account_id != account_id);
    }

    /// Evicts every expired entry; intended to run on a periodic interval
    /// alongside the unavailable-mark sweepers.
    pub async fn sweep(&self) {
        let now = SystemTime::now();
        self.entries.write().await.retain(|_, e| e.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_binding() {
        let cache = SessionCache::new(Duration::from_secs(60), Duration::from_secs(10));
        cache.set("sess-1", 7, Some(42)).await;
        assert_eq!(cache.get("sess-1").await, Some(7));
        assert_eq!(cache.list_by_account(7).await, vec!["sess-1".to_string()]);
        assert_eq!(cache.list_by_user(42).await, vec!["sess-1".to_string()]);
    }

    #[tokio::test]
    async fn expired_entry_returns_none_and_is_evicted() {
        let cache = SessionCache::new(Duration::from_millis(10), Duration::from_millis(1));
        cache.set("sess-1", 7, None).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(cache.get("sess-1").await, None);
    }

    #[tokio::test]
    async fn clear_by_account_removes_all_its_sessions() {
        let cache = SessionCache::new(Duration::from_secs(60), Duration::from_secs(10));
        cache.set("a", 1, None).await;
        cache.set("b", 1, None).await;
        cache.set("c", 2, None).await;
        cache.clear_by_account(1).await;
        assert_eq!(cache.get("a").await, None);
        assert_eq!(cache.get("c").await, Some(2));
    }
}
