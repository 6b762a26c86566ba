//! Short-lived key/value hints with a time-to-live.
//!
//! Nothing correctness-critical lives here: the lobby writes presence
//! hints ("user U is live in room T") so other surfaces can show them,
//! and a lost or expired entry only means the hint is missing.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::StoreError;

/// A TTL cache.
pub trait EphemeralStore: Send + Sync + 'static {
    /// Stores `value` under `key`, replacing any previous value. The entry
    /// disappears after `ttl`; a `ttl` too large to represent never
    /// expires.
    fn set(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> impl Future<Output = Result<(), StoreError>> + Send;

    /// The live value under `key`, if any.
    fn get(&self, key: &str) -> impl Future<Output = Result<Option<String>, StoreError>> + Send;
}

// ---------------------------------------------------------------------------
// MemoryEphemeralStore
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct Entry {
    value: String,
    /// `None` when the TTL overflows the clock.
    expires_at: Option<Instant>,
}

impl Entry {
    fn is_live(&self, now: Instant) -> bool {
        self.expires_at.is_none_or(|at| at > now)
    }
}

/// In-process [`EphemeralStore`] on tokio's clock, so paused-time tests
/// can expire entries with `tokio::time::advance`.
///
/// Expired entries are dropped lazily on read and swept on every write.
#[derive(Debug, Clone, Default)]
pub struct MemoryEphemeralStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
}

impl MemoryEphemeralStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of entries that have not yet expired.
    pub async fn len(&self) -> usize {
        let now = Instant::now();
        self.entries
            .lock()
            .await
            .values()
            .filter(|e| e.is_live(now))
            .count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl EphemeralStore for MemoryEphemeralStore {
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        entries.retain(|_, e| e.is_live(now));
        entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: now.checked_add(ttl),
            },
        );
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        match entries.get(key) {
            Some(entry) if entry.is_live(now) => Ok(Some(entry.value.clone())),
            Some(_) => {
                entries.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_get_before_ttl_returns_value() {
        let store = MemoryEphemeralStore::new();
        store
            .set("presence:U-1", "T1".into(), Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(29)).await;

        assert_eq!(
            store.get("presence:U-1").await.unwrap().as_deref(),
            Some("T1")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_after_ttl_returns_none() {
        let store = MemoryEphemeralStore::new();
        store
            .set("presence:U-1", "T1".into(), Duration::from_secs(30))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;

        assert_eq!(store.get("presence:U-1").await.unwrap(), None);
        assert!(store.is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_replaces_value_and_ttl() {
        let store = MemoryEphemeralStore::new();
        store.set("k", "old".into(), Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;
        store.set("k", "new".into(), Duration::from_secs(5)).await.unwrap();
        tokio::time::advance(Duration::from_secs(4)).await;

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("new"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_set_huge_ttl_never_expires() {
        let store = MemoryEphemeralStore::new();
        store.set("k", "v".into(), Duration::MAX).await.unwrap();
        tokio::time::advance(Duration::from_secs(365 * 24 * 3600)).await;

        // A later write sweeps expired entries but keeps this one.
        store.set("other", "w".into(), Duration::from_secs(1)).await.unwrap();

        assert_eq!(store.get("k").await.unwrap().as_deref(), Some("v"));
        assert_eq!(store.len().await, 2);
    }

    #[tokio::test]
    async fn test_get_unknown_key_returns_none() {
        let store = MemoryEphemeralStore::new();
        assert_eq!(store.get("missing").await.unwrap(), None);
    }
}
