//! In-process storage collaborator.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::eval::matches;
use super::{FilteredQuery, Storage, WriteOp};
use crate::error::StorageError;
use crate::model::{FieldType, Schema};
use crate::query::{Direction, Predicate};
use crate::value::{Row, Value};

#[derive(Default)]
struct Table {
    rows: Vec<Row>,
    next_id: i64,
}

/// Tables of rows held in memory, keyed by model name.
///
/// Integer primary keys are assigned on create when missing. Cloning shares
/// the same tables.
#[derive(Clone, Default)]
pub struct MemoryStorage {
    tables: Arc<RwLock<HashMap<String, Table>>>,
    reads: Arc<AtomicU64>,
    native_count: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self { native_count: true, ..Self::default() }
    }

    /// A storage that reports no native count support.
    pub fn without_native_count() -> Self {
        Self { native_count: false, ..Self::default() }
    }

    /// Insert rows directly, bypassing callbacks and invalidation.
    pub async fn seed(&self, schema: &Schema, rows: impl IntoIterator<Item = Row>) -> Result<(), StorageError> {
        for row in rows {
            self.commit_write(schema, WriteOp::Create, row).await?;
        }
        Ok(())
    }

    /// Number of filtered reads and counts served so far.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::SeqCst)
    }
}

fn primary_key(schema: &Schema, row: &Row) -> Option<Value> {
    row.get(schema.primary_key_field()).filter(|v| !v.is_null()).cloned()
}

fn same_key(schema: &Schema, row: &Row, key: &Value) -> bool {
    row.get(schema.primary_key_field())
        .and_then(|v| v.compare(key))
        .is_some_and(|o| o == std::cmp::Ordering::Equal)
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn execute_filtered_query(&self, query: FilteredQuery<'_>) -> Result<Vec<Row>, StorageError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        let Some(table) = tables.get(query.schema.name()) else {
            return Ok(Vec::new());
        };

        let mut rows: Vec<Row> = table.rows.iter().filter(|row| matches(row, query.predicates)).cloned().collect();

        rows.sort_by(|a, b| {
            for clause in query.order {
                let left = a.get(&clause.field).unwrap_or(&Value::Null);
                let right = b.get(&clause.field).unwrap_or(&Value::Null);
                let ord = match clause.direction {
                    Direction::Asc => left.sort_cmp(right),
                    Direction::Desc => right.sort_cmp(left),
                };
                if ord != std::cmp::Ordering::Equal {
                    return ord;
                }
            }
            std::cmp::Ordering::Equal
        });

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map_or(usize::MAX, |l| l as usize);
        Ok(rows.into_iter().skip(offset).take(limit).collect())
    }

    async fn count(&self, schema: &Schema, predicates: &[Predicate]) -> Result<Option<u64>, StorageError> {
        if !self.native_count {
            return Ok(None);
        }
        self.reads.fetch_add(1, Ordering::SeqCst);
        let tables = self.tables.read().await;
        let count = tables
            .get(schema.name())
            .map_or(0, |t| t.rows.iter().filter(|row| matches(row, predicates)).count());
        Ok(Some(count as u64))
    }

    async fn commit_write(&self, schema: &Schema, op: WriteOp, mut row: Row) -> Result<Row, StorageError> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(schema.name().to_string()).or_default();

        match op {
            WriteOp::Create => {
                let key = match primary_key(schema, &row) {
                    Some(key) => key,
                    None if schema.field_type(schema.primary_key_field()) == Some(FieldType::Integer) => {
                        table.next_id += 1;
                        let key = Value::Int(table.next_id);
                        row.insert(schema.primary_key_field().to_string(), key.clone());
                        key
                    }
                    None => {
                        return Err(StorageError::Write(format!(
                            "`{}` create needs a `{}` value",
                            schema.name(),
                            schema.primary_key_field()
                        )));
                    }
                };
                if table.rows.iter().any(|r| same_key(schema, r, &key)) {
                    return Err(StorageError::Write(format!("duplicate `{}` key {key}", schema.name())));
                }
                if let Value::Int(id) = key {
                    table.next_id = table.next_id.max(id);
                }
                table.rows.push(row.clone());
                Ok(row)
            }
            WriteOp::Update => {
                let key = primary_key(schema, &row)
                    .ok_or_else(|| StorageError::Write(format!("`{}` update without a key", schema.name())))?;
                let existing = table
                    .rows
                    .iter_mut()
                    .find(|r| same_key(schema, r, &key))
                    .ok_or_else(|| StorageError::Write(format!("no `{}` row with key {key}", schema.name())))?;
                *existing = row.clone();
                Ok(row)
            }
            WriteOp::Delete => {
                let key = primary_key(schema, &row)
                    .ok_or_else(|| StorageError::Write(format!("`{}` delete without a key", schema.name())))?;
                let index = table
                    .rows
                    .iter()
                    .position(|r| same_key(schema, r, &key))
                    .ok_or_else(|| StorageError::Write(format!("no `{}` row with key {key}", schema.name())))?;
                Ok(table.rows.remove(index))
            }
        }
    }
}
