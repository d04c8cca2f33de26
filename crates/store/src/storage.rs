//! `Storage` implementation over SQLite.
//!
//! SQLite has no notion of an absent column, so every declared field comes
//! back on read, as null when unset.

use async_trait::async_trait;
use quarry_core::model::Schema;
use quarry_core::query::Predicate;
use quarry_core::{FilteredQuery, Row, Storage, StorageError, Value, WriteOp};
use tokio_rusqlite::rusqlite::{self, params_from_iter};

use crate::connection::SqliteStorage;
use crate::sql::{self, Statement};

fn key_of(schema: &Schema, row: &Row) -> Result<Value, StorageError> {
    row.get(schema.primary_key_field())
        .filter(|v| !v.is_null())
        .cloned()
        .ok_or_else(|| StorageError::Write(format!("`{}` row has no `{}`", schema.name(), schema.primary_key_field())))
}

#[async_trait]
impl Storage for SqliteStorage {
    async fn execute_filtered_query(&self, query: FilteredQuery<'_>) -> Result<Vec<Row>, StorageError> {
        let Statement { sql, params } = sql::select(&query)?;
        let columns = sql::columns(query.schema);
        tracing::debug!(model = query.schema.name(), sql = %sql, "select");

        self.conn
            .call(move |conn| -> Result<Vec<Row>, StorageError> {
                let mut stmt = conn.prepare(&sql)?;
                let mut rows = stmt.query(params_from_iter(params.iter()))?;
                let mut out = Vec::new();
                while let Some(row) = rows.next()? {
                    let mut record = Row::new();
                    for (index, (name, ty)) in columns.iter().enumerate() {
                        let raw: rusqlite::types::Value = row.get(index)?;
                        record.insert(name.clone(), sql::from_sql(raw, *ty));
                    }
                    out.push(record);
                }
                Ok(out)
            })
            .await
            .map_err(StorageError::from)
    }

    async fn count(&self, schema: &Schema, predicates: &[Predicate]) -> Result<Option<u64>, StorageError> {
        let Statement { sql, params } = sql::count(schema, predicates)?;
        self.conn
            .call(move |conn| -> Result<Option<u64>, StorageError> {
                let total: i64 = conn.query_row(&sql, params_from_iter(params.iter()), |row| row.get(0))?;
                Ok(Some(u64::try_from(total).unwrap_or(0)))
            })
            .await
            .map_err(StorageError::from)
    }

    async fn commit_write(&self, schema: &Schema, op: WriteOp, row: Row) -> Result<Row, StorageError> {
        let pk = schema.primary_key_field().to_string();
        let statement = match op {
            WriteOp::Create => sql::insert(schema, &row)?,
            WriteOp::Update => sql::update(schema, &row, &key_of(schema, &row)?)?,
            WriteOp::Delete => sql::delete(schema, &key_of(schema, &row)?)?,
        };
        let model = schema.name().to_string();

        self.conn
            .call(move |conn| -> Result<Row, StorageError> {
                let tx = conn.transaction()?;
                let changed = tx.execute(&statement.sql, params_from_iter(statement.params.iter()))?;
                if changed == 0 {
                    return Err(StorageError::Write(format!("no `{model}` row matched the {op:?}")));
                }

                let mut committed = row;
                if op == WriteOp::Create && committed.get(&pk).is_none_or(Value::is_null) {
                    committed.insert(pk, Value::Int(tx.last_insert_rowid()));
                }
                tx.commit()?;
                Ok(committed)
            })
            .await
            .map_err(StorageError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quarry_core::model::FieldType;
    use quarry_core::query::OrderBy;
    use std::collections::BTreeSet;

    fn schema() -> Schema {
        Schema::new("user")
            .field("name", FieldType::Text)
            .field("age", FieldType::Integer)
            .field("admin", FieldType::Boolean)
    }

    fn user(name: &str, age: Option<i64>, admin: bool) -> Row {
        let mut row = Row::new();
        row.insert("name".into(), Value::from(name));
        row.insert("age".into(), Value::from(age));
        row.insert("admin".into(), Value::Bool(admin));
        row
    }

    async fn seeded() -> (SqliteStorage, Schema) {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let schema = schema();
        storage.ensure_table(&schema).await.unwrap();
        for row in [user("ada", Some(36), true), user("bob", None, false), user("Cy", Some(19), false)] {
            storage.commit_write(&schema, WriteOp::Create, row).await.unwrap();
        }
        (storage, schema)
    }

    async fn select(storage: &SqliteStorage, schema: &Schema, predicates: &[Predicate], order: &[OrderBy]) -> Vec<Row> {
        let includes = BTreeSet::new();
        storage
            .execute_filtered_query(FilteredQuery { schema, predicates, order, limit: None, offset: None, includes: &includes })
            .await
            .unwrap()
    }

    fn p(keyword: &str, value: impl Into<Value>) -> Predicate {
        Predicate::parse(keyword, value.into()).unwrap()
    }

    #[tokio::test]
    async fn test_create_assigns_rowid() {
        let (storage, schema) = seeded().await;
        let created = storage.commit_write(&schema, WriteOp::Create, user("di", Some(50), false)).await.unwrap();
        assert_eq!(created.get("id"), Some(&Value::Int(4)));
    }

    #[tokio::test]
    async fn test_filters_and_types_round_trip() {
        let (storage, schema) = seeded().await;

        let admins = select(&storage, &schema, &[p("admin", true)], &[]).await;
        assert_eq!(admins.len(), 1);
        assert_eq!(admins[0]["admin"], Value::Bool(true));
        assert_eq!(admins[0]["age"], Value::Int(36));

        let no_age = select(&storage, &schema, &[p("age", Value::Null)], &[]).await;
        assert_eq!(no_age[0]["name"], Value::from("bob"));

        let like = select(&storage, &schema, &[p("name__like", "c%")], &[]).await;
        assert_eq!(like.len(), 1);

        let none = select(&storage, &schema, &[p("id__in", Vec::<i64>::new())], &[]).await;
        assert!(none.is_empty());
    }

    #[tokio::test]
    async fn test_order_and_paging() {
        let (storage, schema) = seeded().await;
        let includes = BTreeSet::new();
        let order = [OrderBy::parse("-age").unwrap()];
        let rows = storage
            .execute_filtered_query(FilteredQuery {
                schema: &schema,
                predicates: &[],
                order: &order,
                limit: Some(1),
                offset: Some(1),
                includes: &includes,
            })
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], Value::from("Cy"));
    }

    #[tokio::test]
    async fn test_native_count() {
        let (storage, schema) = seeded().await;
        assert_eq!(storage.count(&schema, &[p("age__gt", 18)]).await.unwrap(), Some(2));
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let (storage, schema) = seeded().await;
        let mut row = user("ada", Some(37), true);
        row.insert("id".into(), Value::Int(1));
        storage.commit_write(&schema, WriteOp::Update, row.clone()).await.unwrap();
        assert_eq!(select(&storage, &schema, &[p("id", 1)], &[]).await[0]["age"], Value::Int(37));

        storage.commit_write(&schema, WriteOp::Delete, row.clone()).await.unwrap();
        let err = storage.commit_write(&schema, WriteOp::Delete, row).await.unwrap_err();
        assert!(matches!(err, StorageError::Write(_)));
    }

    #[tokio::test]
    async fn test_missing_table_is_a_storage_error() {
        let storage = SqliteStorage::open_in_memory().await.unwrap();
        let includes = BTreeSet::new();
        let schema = schema();
        let result = storage
            .execute_filtered_query(FilteredQuery {
                schema: &schema,
                predicates: &[],
                order: &[],
                limit: None,
                offset: None,
                includes: &includes,
            })
            .await;
        assert!(matches!(result, Err(StorageError::Database(_))));
    }
}
