//! Ephemeral key/value cache with per-entry TTL.
//!
//! Writes are best-effort: a failure to serialize or store never surfaces to
//! the caller beyond a warning, and readers fall back to the store.

use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
struct CacheEntry {
    value: serde_json::Value,
    expires_at: DateTime<Utc>,
}

pub struct Cache {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl Cache {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::with_capacity(64))),
        }
    }

    /// Store a value for `ttl_seconds`. Serialization failures are logged
    /// and swallowed.
    pub async fn put<T: Serialize>(&self, key: &str, value: &T, ttl_seconds: i64) {
        let value = match serde_json::to_value(value) {
            Ok(v) => v,
            Err(e) => {
                warn!("Cache write for '{}' skipped, serialization failed: {}", key, e);
                return;
            }
        };

        let entry = CacheEntry {
            value,
            expires_at: Utc::now() + Duration::seconds(ttl_seconds),
        };

        let mut entries = self.entries.write().await;
        entries.insert(key.to_string(), entry);
    }

    /// Read a value. Expired entries are dropped on access.
    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let expired = {
            let entries = self.entries.read().await;
            match entries.get(key) {
                Some(entry) if entry.expires_at > Utc::now() => {
                    return match serde_json::from_value(entry.value.clone()) {
                        Ok(v) => Some(v),
                        Err(e) => {
                            warn!("Cache entry '{}' unreadable, dropping: {}", key, e);
                            None
                        }
                    };
                }
                Some(_) => true,
                None => false,
            }
        };

        if expired {
            let mut entries = self.entries.write().await;
            entries.remove(key);
        }

        None
    }

    pub async fn contains(&self, key: &str) -> bool {
        let entries = self.entries.read().await;
        entries
            .get(key)
            .map(|e| e.expires_at > Utc::now())
            .unwrap_or(false)
    }

    pub async fn delete(&self, key: &str) {
        let mut entries = self.entries.write().await;
        entries.remove(key);
    }

    /// Drop every expired entry. Runs on the app heartbeat tick.
    pub async fn sweep(&self) -> usize {
        let now = Utc::now();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();

        if removed > 0 {
            debug!("Cache sweep removed {} expired entries", removed);
        }

        removed
    }
}

impl Clone for Cache {
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
        }
    }
}

impl Default for Cache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache key builders, one per contract entry.
pub mod keys {
    pub fn latest_sample(host_id: i64) -> String {
        format!("latest_sample:{}", host_id)
    }

    pub fn alert_state(host_id: i64) -> String {
        format!("alert_state:{}", host_id)
    }

    pub fn anomaly_summary(host_id: i64) -> String {
        format!("anomaly:{}:summary", host_id)
    }

    pub fn app_heartbeat() -> String {
        "app_heartbeat".to_string()
    }

    pub fn connection_state(host_id: i64) -> String {
        format!("connection_state:{}", host_id)
    }

    pub fn suspend_epoch(host_id: i64) -> String {
        format!("suspend_epoch:{}", host_id)
    }

    pub fn resume_epoch(host_id: i64) -> String {
        format!("resume_epoch:{}", host_id)
    }

    pub fn service_failure_count(host_id: i64, service: &str) -> String {
        format!("service_failures:{}:{}", host_id, service)
    }

    pub fn service_alert_sent(host_id: i64, service: &str) -> String {
        format!("service_alert_sent:{}:{}", host_id, service)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = Cache::new();
        cache.put("k", &42i64, 60).await;
        assert_eq!(cache.get::<i64>("k").await, Some(42));
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let cache = Cache::new();
        cache.put("k", &"v".to_string(), -1).await;
        assert_eq!(cache.get::<String>("k").await, None);
        assert!(!cache.contains("k").await);
    }

    #[tokio::test]
    async fn test_delete_removes_entry() {
        let cache = Cache::new();
        cache.put("k", &1i64, 60).await;
        cache.delete("k").await;
        assert_eq!(cache.get::<i64>("k").await, None);
    }

    #[tokio::test]
    async fn test_sweep_removes_only_expired() {
        let cache = Cache::new();
        cache.put("dead", &1i64, -1).await;
        cache.put("alive", &2i64, 60).await;

        let removed = cache.sweep().await;
        assert_eq!(removed, 1);
        assert_eq!(cache.get::<i64>("alive").await, Some(2));
    }
}
