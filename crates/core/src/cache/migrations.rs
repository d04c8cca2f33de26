//! Schema versioning for the SQLite cache store.
//!
//! The `cache_entries` layout is tracked in `_migrations`; opening a store
//! applies every step newer than the highest recorded version.

use tokio_rusqlite::{Connection, params, rusqlite};

use crate::error::CacheError;

struct Step {
    version: i64,
    batch: &'static str,
}

const STEPS: &[Step] = &[Step { version: 1, batch: include_str!("../../migrations/001_cache_entries.sql") }];

const VERSION_TABLE: &str = "CREATE TABLE IF NOT EXISTS _migrations (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
)";

fn schema_version(conn: &rusqlite::Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM _migrations", [], |row| row.get(0))
}

/// Bring the cache schema up to the latest version.
///
/// Each step runs in its own transaction together with its version row.
///
/// # Errors
///
/// Returns `MIGRATION_FAILED` naming the step whose batch was rejected.
pub async fn run(conn: &Connection) -> Result<(), CacheError> {
    conn.call(|conn| -> Result<(), CacheError> {
        conn.execute(VERSION_TABLE, [])?;
        let applied = schema_version(conn)?;

        for step in STEPS.iter().filter(|step| step.version > applied) {
            let tx = conn.transaction()?;
            tx.execute_batch(step.batch)
                .map_err(|e| CacheError::MigrationFailed(format!("step {}: {e}", step.version)))?;
            tx.execute(
                "INSERT INTO _migrations (version, applied_at) VALUES (?1, ?2)",
                params![step.version, chrono::Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            tracing::debug!(version = step.version, "cache schema upgraded");
        }

        Ok(())
    })
    .await
    .map_err(CacheError::from)
}
