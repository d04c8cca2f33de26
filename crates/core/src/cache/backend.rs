//! Pluggable cache backend interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;

/// One stored cache entry.
///
/// The payload is written whole; readers never see a partially stored value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub value: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl CacheEntry {
    /// True once `now` has reached the expiry instant.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Key/value store behind the cache coordinator.
///
/// Backends report raw entries, including expired ones; expiry is decided by
/// the coordinator against its clock. No cross-key atomicity is assumed.
#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Insert or overwrite an entry.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError>;

    /// Returns whether an entry was removed.
    async fn delete(&self, key: &str) -> Result<bool, CacheError>;

    /// Delete `key` only if the stored entry has expired at `now`.
    ///
    /// An entry rewritten since it was read survives. The default reads then
    /// deletes, so a write landing between the two is lost; backends override
    /// it with a conditional delete.
    async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool, CacheError> {
        match self.get(key).await? {
            Some(entry) if entry.is_expired(now) => self.delete(key).await,
            _ => Ok(false),
        }
    }

    /// Delete every listed key; returns the number removed.
    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let mut deleted = 0;
        for key in keys {
            if self.delete(key).await? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }

    /// Delete every key starting with `prefix`; returns the number removed.
    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError>;

    /// Delete entries that expired at or before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_expiry_boundary() {
        let now = Utc::now();
        let entry = CacheEntry { key: "k".into(), value: "v".into(), expires_at: Some(now + Duration::seconds(5)) };
        assert!(!entry.is_expired(now + Duration::seconds(4)));
        assert!(entry.is_expired(now + Duration::seconds(5)));
    }

    #[test]
    fn test_no_expiry() {
        let entry = CacheEntry { key: "k".into(), value: "v".into(), expires_at: None };
        assert!(!entry.is_expired(Utc::now() + Duration::days(3650)));
    }
}
