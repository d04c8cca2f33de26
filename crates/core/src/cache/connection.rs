//! Shared SQLite cache database.
//!
//! Every process that opens the same path sees the same entries, which makes
//! this the external, networked-style backend: WAL mode lets several
//! processes read while one writes.

use std::path::Path;

use tokio_rusqlite::Connection;

use super::migrations;
use crate::error::CacheError;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA busy_timeout=5000;";

/// Cache database handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteBackend {
    pub(crate) conn: Connection,
}

impl SqliteBackend {
    /// Open a cache database at the specified path.
    ///
    /// Creates the file if it doesn't exist, applies pragmas, and runs any
    /// pending migrations.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, CacheError> {
        let conn = Connection::open(path).await.map_err(|e| CacheError::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open an in-memory cache database for testing.
    pub async fn open_in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| CacheError::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, CacheError> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(CacheError::Database)?;

        migrations::run(&conn).await?;

        Ok(Self { conn })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory() {
        let db = SqliteBackend::open_in_memory().await.unwrap();
        let version = db
            .conn
            .call(|conn| conn.query_row("SELECT sqlite_version()", [], |row| row.get::<_, String>(0)))
            .await
            .unwrap();
        assert!(!version.is_empty());
    }
}
