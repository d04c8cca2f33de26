//! Storage collaborator interface.
//!
//! The core never talks to a database directly; it hands filtered queries and
//! committed writes to a [`Storage`] implementation. `MemoryStorage` is the
//! in-process implementation; the SQLite one lives in `quarry-store`.

mod eval;
mod memory;

pub use eval::{like_to_regex, matches};
pub use memory::MemoryStorage;

use std::collections::BTreeSet;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::model::Schema;
use crate::query::{OrderBy, Predicate};
use crate::value::Row;

/// Everything storage needs to run one filtered read.
#[derive(Debug, Clone, Copy)]
pub struct FilteredQuery<'a> {
    pub schema: &'a Schema,
    pub predicates: &'a [Predicate],
    pub order: &'a [OrderBy],
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    /// Eager-load hint; the resolver loads relations itself, so storage may
    /// ignore this.
    pub includes: &'a BTreeSet<String>,
}

/// Kind of committed write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    Delete,
}

#[async_trait]
pub trait Storage: Send + Sync {
    /// Rows matching every predicate, ordered, then offset, then limited.
    async fn execute_filtered_query(&self, query: FilteredQuery<'_>) -> Result<Vec<Row>, StorageError>;

    /// Count rows matching every predicate without materializing them.
    ///
    /// `Ok(None)` means the collaborator cannot count natively; the resolver
    /// then counts materialized rows instead.
    async fn count(&self, _schema: &Schema, _predicates: &[Predicate]) -> Result<Option<u64>, StorageError> {
        Ok(None)
    }

    /// Apply a write and return only after it is durable.
    ///
    /// Returns the committed row (with generated keys filled in for creates).
    async fn commit_write(&self, schema: &Schema, op: WriteOp, row: Row) -> Result<Row, StorageError>;
}
