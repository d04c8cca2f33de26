//! In-process cache backend.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::backend::{CacheBackend, CacheEntry};
use crate::error::CacheError;

/// Cache entries in a `HashMap` behind a tokio `RwLock`.
///
/// Cloning shares the same map.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    entries: Arc<RwLock<HashMap<String, CacheEntry>>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        self.entries.write().await.insert(entry.key.clone(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let mut entries = self.entries.write().await;
        if entries.get(key).is_some_and(|entry| entry.is_expired(now)) {
            entries.remove(key);
            return Ok(true);
        }
        Ok(false)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        Ok(keys.iter().filter(|k| entries.remove(k.as_str()).is_some()).count() as u64)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|key, _| !key.starts_with(prefix));
        Ok((before - entries.len()) as u64)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.is_expired(now));
        Ok((before - entries.len()) as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(key: &str, expires_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry { key: key.into(), value: "{}".into(), expires_at }
    }

    #[tokio::test]
    async fn test_set_get_delete() {
        let backend = MemoryBackend::new();
        backend.set(entry("user:id:1", None)).await.unwrap();
        assert!(backend.get("user:id:1").await.unwrap().is_some());
        assert!(backend.delete("user:id:1").await.unwrap());
        assert!(!backend.delete("user:id:1").await.unwrap());
        assert!(backend.get("user:id:1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix_only_touches_namespace() {
        let backend = MemoryBackend::new();
        backend.set(entry("user:abc", None)).await.unwrap();
        backend.set(entry("user:id:1", None)).await.unwrap();
        backend.set(entry("post:abc", None)).await.unwrap();

        assert_eq!(backend.delete_prefix("user:").await.unwrap(), 2);
        assert_eq!(backend.len().await, 1);
        assert!(backend.get("post:abc").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_expired_spares_rewritten_entry() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.set(entry("user:abc", Some(now - Duration::seconds(1)))).await.unwrap();
        backend.set(entry("user:abc", Some(now + Duration::seconds(60)))).await.unwrap();

        assert!(!backend.delete_expired("user:abc", now).await.unwrap());
        assert!(backend.get("user:abc").await.unwrap().is_some());

        backend.set(entry("user:abc", Some(now))).await.unwrap();
        assert!(backend.delete_expired("user:abc", now).await.unwrap());
        assert!(backend.is_empty().await);
    }

    #[tokio::test]
    async fn test_delete_many() {
        let backend = MemoryBackend::new();
        backend.set(entry("a", None)).await.unwrap();
        backend.set(entry("b", None)).await.unwrap();
        let deleted = backend.delete_many(&["a".into(), "missing".into()]).await.unwrap();
        assert_eq!(deleted, 1);
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let backend = MemoryBackend::new();
        let now = Utc::now();
        backend.set(entry("old", Some(now - Duration::seconds(1)))).await.unwrap();
        backend.set(entry("fresh", Some(now + Duration::hours(1)))).await.unwrap();
        backend.set(entry("forever", None)).await.unwrap();

        assert_eq!(backend.purge_expired(now).await.unwrap(), 1);
        assert_eq!(backend.len().await, 2);
    }
}
