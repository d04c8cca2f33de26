//! Database connection management with pragma configuration.

use std::path::Path;

use quarry_core::StorageError;
use quarry_core::model::Schema;
use tokio_rusqlite::Connection;

use crate::sql;

const PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA synchronous=NORMAL;
     PRAGMA temp_store=MEMORY;
     PRAGMA foreign_keys=ON;";

/// SQLite storage handle.
///
/// Wraps a tokio-rusqlite Connection that runs database operations
/// on a background thread.
#[derive(Clone, Debug)]
pub struct SqliteStorage {
    pub(crate) conn: Connection,
}

impl SqliteStorage {
    /// Open a database at the specified path, creating the file if needed.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let conn = Connection::open(path).await.map_err(|e| StorageError::Database(e.into()))?;
        Self::init(conn).await
    }

    /// Open an in-memory database for testing.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StorageError::Database(e.into()))?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self, StorageError> {
        conn.call(|conn| {
            conn.execute_batch(PRAGMAS)?;
            Ok(())
        })
        .await
        .map_err(StorageError::Database)?;

        Ok(Self { conn })
    }

    /// Create the model's table if it does not exist yet.
    pub async fn ensure_table(&self, schema: &Schema) -> Result<(), StorageError> {
        let ddl = sql::create_table(schema)?;
        tracing::debug!(model = schema.name(), "ensuring table");
        self.conn
            .call(move |conn| -> Result<(), StorageError> {
                conn.execute_batch(&ddl)?;
                Ok(())
            })
            .await
            .map_err(StorageError::from)
    }
}
