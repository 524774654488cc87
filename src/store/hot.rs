//! Hot (keyed, TTL) store — an in-process analogue of the reference
//! engine's Redis-backed cache, implemented without an external dependency
//! since this is a single-process service with no cross-process or
//! multi-tenant coordination in scope.

use serde::{de::DeserializeOwned, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// A keyed string store with per-entry TTL. Values are stored as their
/// serialized form (JSON for structured values, raw for plain strings) so
/// the store itself stays type-erased, matching the "hash of fields" /
/// "ordered list of JSON strings" shapes each hot key takes.
pub struct HotStore {
    entries: RwLock<HashMap<String, Entry>>,
}

impl HotStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn get_string(&self, key: &str) -> Option<String> {
        let entries = self.entries.read().await;
        entries.get(key).and_then(|e| {
            if e.expires_at > Instant::now() {
                Some(e.value.clone())
            } else {
                None
            }
        })
    }

    pub async fn set_string(&self, key: &str, value: &str, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
    }

    pub async fn get_json<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = self.get_string(key).await?;
        serde_json::from_str(&raw).ok()
    }

    pub async fn set_json<T: Serialize>(&self, key: &str, value: &T, ttl: Duration) {
        if let Ok(raw) = serde_json::to_string(value) {
            self.set_string(key, &raw, ttl).await;
        }
    }

    /// Refreshes a key's TTL without changing its value, if present.
    /// Used by the Dialogue Log to extend a session's hot list on every
    /// persistence round-trip.
    pub async fn touch(&self, key: &str, ttl: Duration) {
        let mut entries = self.entries.write().await;
        if let Some(entry) = entries.get_mut(key) {
            entry.expires_at = Instant::now() + ttl;
        }
    }

    pub async fn remove(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

impl Default for HotStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn expires_after_ttl() {
        let store = HotStore::new();
        store.set_string("k", "v", Duration::from_millis(10)).await;
        assert_eq!(store.get_string("k").await, Some("v".to_string()));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(store.get_string("k").await, None, "entry should have expired");
    }

    #[tokio::test]
    async fn touch_extends_ttl() {
        let store = HotStore::new();
        store.set_string("k", "v", Duration::from_millis(20)).await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.touch("k", Duration::from_millis(200)).await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(
            store.get_string("k").await,
            Some("v".to_string()),
            "touch should have extended the TTL past the original expiry"
        );
    }

    #[tokio::test]
    async fn json_roundtrip() {
        #[derive(serde::Serialize, serde::Deserialize, PartialEq, Debug)]
        struct V {
            a: i32,
        }
        let store = HotStore::new();
        store.set_json("k", &V { a: 7 }, Duration::from_secs(5)).await;
        assert_eq!(store.get_json::<V>("k").await, Some(V { a: 7 }));
    }
}
