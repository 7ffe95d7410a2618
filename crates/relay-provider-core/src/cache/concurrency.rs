use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

/// Per-account and per-user in-flight request counters. Namespaced keys
/// (`acct:<id>`, `user:<id>`) share one table since both are simple integer
/// slot counts with the same acquire/release contract.
#[derive(Clone)]
pub struct ConcurrencyCache {
    counts: Arc<RwLock<HashMap<String, u32>>>,
}

/// Releases its slot when dropped, so every exit path — including an error
/// propagated with `?` or a panic unwinding through the call stack — frees
/// the counter without the caller having to remember to call `release`.
pub struct ConcurrencySlot {
    counts: Arc<RwLock<HashMap<String, u32>>>,
    key: String,
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        let counts = self.counts.clone();
        let key = std::mem::take(&mut self.key);
        tokio::spawn(async move {
            let mut guard = counts.write().await;
            if let Some(count) = guard.get_mut(&key) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    guard.remove(&key);
                }
            }
        });
    }
}

impl ConcurrencyCache {
    pub fn new() -> Self {
        Self {
            counts: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub fn account_key(account_id: i64) -> String {
        format!("acct:{account_id}")
    }

    pub fn user_key(user_id: i64) -> String {
        format!("user:{user_id}")
    }

    /// Attempts to take a slot under `key`, failing if `limit` is already
    /// reached. `limit == 0` means unlimited.
    pub async fn acquire(&self, key: impl Into<String>, limit: u32) -> Option<ConcurrencySlot> {
        let key = key.into();
        let mut guard = self.counts.write().await;
        let count = guard.entry(key.clone()).or_insert(0);
        if limit != 0 && *count >= limit {
            return None;
        }
        *count += 1;
        Some(ConcurrencySlot {
            counts: self.counts.clone(),
            key,
        })
    }

    pub async fn get(&self, key: &str) -> u32 {
        self.counts.read().await.get(key).copied().unwrap_or(0)
    }

    pub async fn reset(&self, key: &str) {
        self.counts.write().await.remove(key);
    }
}

impl Default for ConcurrencyCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_respects_limit() {
        let cache = ConcurrencyCache::new();
        let key = ConcurrencyCache::account_key(1);
        let _a = cache.acquire(key.clone(), 2).await.unwrap();
        let _b = cache.acquire(key.clone(), 2).await.unwrap();
        assert!(cache.acquire(key.clone(), 2).await.is_none());
        assert_eq!(cache.get(&key).await, 2);
    }

    #[tokio::test]
    async fn dropping_a_slot_releases_it() {
        let cache = ConcurrencyCache::new();
        let key = ConcurrencyCache::account_key(9);
        let slot = cache.acquire(key.clone(), 1).await.unwrap();
        assert_eq!(cache.get(&key).await, 1);
        drop(slot);
        // Release runs on a spawned task; give the runtime a tick.
        tokio::task::yield_now().await;
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        assert_eq!(cache.get(&key).await, 0);
    }

    #[tokio::test]
    async fn zero_limit_means_unlimited() {
        let cache = ConcurrencyCache::new();
        let key = ConcurrencyCache::account_key(3);
        for _ in 0..50 {
            std::mem::forget(cache.acquire(key.clone(), 0).await.unwrap());
        }
        assert_eq!(cache.get(&key).await, 50);
    }
}
