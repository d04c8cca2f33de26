//! Resolution of query specs against the storage collaborator.
//!
//! The resolver is only reached on a cache miss or when caching is off for a
//! call. It never retries: a storage failure or timeout is returned to the
//! caller as [`Error::Storage`] immediately.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use crate::Error;
use crate::error::StorageError;
use crate::model::{Registry, Relation, RelationKind};
use crate::query::{Operator, Predicate, QuerySpec};
use crate::storage::{FilteredQuery, Storage};
use crate::value::{Row, Value};

/// Translates specs into storage calls and eager-loads requested relations.
pub struct Resolver<'a> {
    storage: &'a dyn Storage,
    registry: &'a Registry,
    timeout: Duration,
}

impl<'a> Resolver<'a> {
    pub fn new(storage: &'a dyn Storage, registry: &'a Registry, timeout: Duration) -> Self {
        Self { storage, registry, timeout }
    }

    /// Rows for the spec, with included relations attached under their names.
    pub async fn resolve(&self, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        let query = FilteredQuery {
            schema: spec.schema(),
            predicates: spec.predicates(),
            order: spec.order_by(),
            limit: spec.limit_value(),
            offset: spec.offset_value(),
            includes: spec.include_set(),
        };
        let mut rows = self.bounded(self.storage.execute_filtered_query(query)).await?;
        tracing::debug!(model = spec.model(), rows = rows.len(), "resolved from storage");

        for name in spec.include_set() {
            let Some(relation) = spec.schema().relation_named(name) else {
                continue;
            };
            self.load_relation(spec, relation, &mut rows).await?;
        }

        Ok(rows)
    }

    /// `resolve` with `limit = 1`, keeping the head.
    pub async fn first(&self, spec: &QuerySpec) -> Result<Option<Row>, Error> {
        Ok(self.resolve(&spec.with_limit(1)).await?.into_iter().next())
    }

    /// Number of rows the spec would return, honoring offset and limit.
    ///
    /// Uses the storage's native count when it has one; otherwise counts
    /// materialized rows.
    pub async fn count(&self, spec: &QuerySpec) -> Result<u64, Error> {
        let native = self.bounded(self.storage.count(spec.schema(), spec.predicates())).await?;
        match native {
            Some(total) => {
                let after_offset = total.saturating_sub(spec.offset_value().unwrap_or(0));
                Ok(spec.limit_value().map_or(after_offset, |limit| after_offset.min(limit)))
            }
            None => {
                tracing::debug!(model = spec.model(), "storage has no native count, materializing");
                let query = FilteredQuery {
                    schema: spec.schema(),
                    predicates: spec.predicates(),
                    order: &[],
                    limit: spec.limit_value(),
                    offset: spec.offset_value(),
                    includes: &Default::default(),
                };
                Ok(self.bounded(self.storage.execute_filtered_query(query)).await?.len() as u64)
            }
        }
    }

    async fn load_relation(&self, spec: &QuerySpec, relation: &Relation, rows: &mut [Row]) -> Result<(), Error> {
        let related = self.registry.require(&relation.model)?;
        let related_schema = related.schema();

        // Parent column whose value links each row to its related rows, and the
        // related column it is matched against.
        let (local, remote) = match relation.kind {
            RelationKind::HasMany => (spec.schema().primary_key_field(), relation.foreign_key.as_str()),
            RelationKind::BelongsTo => (relation.foreign_key.as_str(), related_schema.primary_key_field()),
        };

        let mut keys: Vec<Value> = Vec::new();
        for row in rows.iter() {
            if let Some(value) = row.get(local).filter(|v| !v.is_null())
                && !keys.contains(value)
            {
                keys.push(value.clone());
            }
        }

        let mut grouped: HashMap<String, Vec<Row>> = HashMap::new();
        if !keys.is_empty() {
            let predicate = Predicate::new(remote, Operator::In, Value::List(keys))?;
            let predicates = [predicate];
            let query = FilteredQuery {
                schema: related_schema,
                predicates: &predicates,
                order: &[],
                limit: None,
                offset: None,
                includes: &Default::default(),
            };
            for child in self.bounded(self.storage.execute_filtered_query(query)).await? {
                if let Some(link) = child.get(remote) {
                    grouped.entry(link.canonical()).or_default().push(child);
                }
            }
        }

        for row in rows.iter_mut() {
            let matched = row
                .get(local)
                .and_then(|v| grouped.get(&v.canonical()))
                .cloned()
                .unwrap_or_default();
            let attached = match relation.kind {
                RelationKind::HasMany => Value::List(matched.into_iter().map(Value::Map).collect()),
                RelationKind::BelongsTo => matched.into_iter().next().map_or(Value::Null, Value::Map),
            };
            row.insert(relation.name.clone(), attached);
        }

        tracing::debug!(model = spec.model(), relation = %relation.name, "eager-loaded relation");
        Ok(())
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T, StorageError>>) -> Result<T, Error> {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => Ok(result?),
            Err(_) => Err(StorageError::Timeout(self.timeout).into()),
        }
    }
}
