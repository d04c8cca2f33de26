//! Cache entry operations on the shared SQLite database.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use tokio_rusqlite::{params, rusqlite};

use super::backend::{CacheBackend, CacheEntry};
use super::connection::SqliteBackend;
use crate::error::CacheError;

// Fixed-width UTC timestamps so text comparison in SQL matches time order.
fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, CacheError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|at| at.with_timezone(&Utc))
        .map_err(|e| CacheError::Backend(format!("corrupt expires_at `{raw}`: {e}")))
}

#[async_trait]
impl CacheBackend for SqliteBackend {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<CacheEntry>, CacheError> {
                let mut stmt = conn.prepare("SELECT key, value, expires_at FROM cache_entries WHERE key = ?1")?;

                let result = stmt.query_row(params![key], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, Option<String>>(2)?))
                });

                match result {
                    Ok((key, value, expires_at)) => {
                        let expires_at = expires_at.as_deref().map(parse_timestamp).transpose()?;
                        Ok(Some(CacheEntry { key, value, expires_at }))
                    }
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
            .map_err(CacheError::from)
    }

    /// Uses UPSERT semantics: a single statement replaces the whole entry.
    async fn set(&self, entry: CacheEntry) -> Result<(), CacheError> {
        let expires_at = entry.expires_at.map(timestamp);
        let written_at = timestamp(Utc::now());
        self.conn
            .call(move |conn| -> Result<(), CacheError> {
                conn.execute(
                    "INSERT INTO cache_entries (key, value, expires_at, written_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(key) DO UPDATE SET
                        value = excluded.value,
                        expires_at = excluded.expires_at,
                        written_at = excluded.written_at",
                    params![entry.key, entry.value, expires_at, written_at],
                )?;
                Ok(())
            })
            .await
            .map_err(CacheError::from)
    }

    async fn delete(&self, key: &str) -> Result<bool, CacheError> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<bool, CacheError> {
                let count = conn.execute("DELETE FROM cache_entries WHERE key = ?1", params![key])?;
                Ok(count > 0)
            })
            .await
            .map_err(CacheError::from)
    }

    async fn delete_expired(&self, key: &str, now: DateTime<Utc>) -> Result<bool, CacheError> {
        let key = key.to_string();
        let now = timestamp(now);
        self.conn
            .call(move |conn| -> Result<bool, CacheError> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE key = ?1 AND expires_at IS NOT NULL AND expires_at <= ?2",
                    params![key, now],
                )?;
                Ok(count > 0)
            })
            .await
            .map_err(CacheError::from)
    }

    async fn delete_many(&self, keys: &[String]) -> Result<u64, CacheError> {
        let keys = keys.to_vec();
        self.conn
            .call(move |conn| -> Result<u64, CacheError> {
                let tx = conn.transaction()?;
                let mut deleted = 0u64;
                {
                    let mut stmt = tx.prepare("DELETE FROM cache_entries WHERE key = ?1")?;
                    for key in &keys {
                        deleted += stmt.execute(params![key])? as u64;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(CacheError::from)
    }

    async fn delete_prefix(&self, prefix: &str) -> Result<u64, CacheError> {
        let prefix = prefix.to_string();
        self.conn
            .call(move |conn| -> Result<u64, CacheError> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE substr(key, 1, length(?1)) = ?1",
                    params![prefix],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(CacheError::from)
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64, CacheError> {
        let now = timestamp(now);
        self.conn
            .call(move |conn| -> Result<u64, CacheError> {
                let count = conn.execute(
                    "DELETE FROM cache_entries WHERE expires_at IS NOT NULL AND expires_at <= ?1",
                    params![now],
                )?;
                Ok(count as u64)
            })
            .await
            .map_err(CacheError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn entry(key: &str, value: &str, expires_at: Option<DateTime<Utc>>) -> CacheEntry {
        CacheEntry { key: key.into(), value: value.into(), expires_at }
    }

    #[tokio::test]
    async fn test_set_and_get() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let expires = Utc::now() + Duration::seconds(60);
        db.set(entry("user:abc", r#"{"kind":"count","data":2}"#, Some(expires)))
            .await
            .unwrap();

        let got = db.get("user:abc").await.unwrap().unwrap();
        assert_eq!(got.value, r#"{"kind":"count","data":2}"#);
        assert_eq!(got.expires_at.unwrap().timestamp_micros(), expires.timestamp_micros());
    }

    #[tokio::test]
    async fn test_get_missing() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        assert!(db.get("nonexistent").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set(entry("k", "old", None)).await.unwrap();
        db.set(entry("k", "new", None)).await.unwrap();
        let got = db.get("k").await.unwrap().unwrap();
        assert_eq!(got.value, "new");
        assert!(got.expires_at.is_none());
    }

    #[tokio::test]
    async fn test_delete_prefix_treats_wildcards_literally() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        db.set(entry("user:1", "a", None)).await.unwrap();
        db.set(entry("user:id:1", "b", None)).await.unwrap();
        db.set(entry("users:1", "c", None)).await.unwrap();
        db.set(entry("u%er:1", "d", None)).await.unwrap();

        assert_eq!(db.delete_prefix("user:").await.unwrap(), 2);
        assert!(db.get("users:1").await.unwrap().is_some());
        assert_eq!(db.delete_prefix("u%").await.unwrap(), 1);
        assert!(db.get("users:1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_and_delete_many() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        for key in ["a", "b", "c"] {
            db.set(entry(key, "v", None)).await.unwrap();
        }
        assert!(db.delete("a").await.unwrap());
        assert!(!db.delete("a").await.unwrap());
        assert_eq!(db.delete_many(&["b".into(), "c".into(), "zz".into()]).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_delete_expired_is_conditional() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let now = Utc::now();
        db.set(entry("stale", "v", Some(now - Duration::seconds(1)))).await.unwrap();
        db.set(entry("fresh", "v", Some(now + Duration::hours(1)))).await.unwrap();
        db.set(entry("forever", "v", None)).await.unwrap();

        assert!(db.delete_expired("stale", now).await.unwrap());
        assert!(!db.delete_expired("fresh", now).await.unwrap());
        assert!(!db.delete_expired("forever", now).await.unwrap());
        assert!(db.get("fresh").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_purge_expired() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let now = Utc::now();
        db.set(entry("expiring", "v", Some(now - Duration::seconds(1)))).await.unwrap();
        db.set(entry("fresh", "v", Some(now + Duration::hours(1)))).await.unwrap();
        db.set(entry("forever", "v", None)).await.unwrap();

        assert_eq!(db.purge_expired(now).await.unwrap(), 1);
        assert!(db.get("expiring").await.unwrap().is_none());
        assert!(db.get("fresh").await.unwrap().is_some());
        assert!(db.get("forever").await.unwrap().is_some());
    }
}
