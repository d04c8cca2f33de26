//! SQL text and parameters for specs and writes.
//!
//! Identifiers come from model metadata and are validated and quoted before
//! they are spliced into SQL text; every value travels as a bound parameter.

use std::sync::LazyLock;

use quarry_core::model::{FieldType, Schema};
use quarry_core::query::{Direction, Operator, OrderBy, Predicate};
use quarry_core::{FilteredQuery, Row, StorageError, Value};
use regex::Regex;
use tokio_rusqlite::rusqlite::types::Value as SqlValue;

static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

/// SQL text with its positional parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

/// Quote a table or column name, rejecting anything that is not a plain
/// identifier.
pub fn ident(name: &str) -> Result<String, StorageError> {
    if IDENTIFIER.is_match(name) {
        Ok(format!("\"{name}\""))
    } else {
        Err(StorageError::Query(format!("invalid identifier `{name}`")))
    }
}

fn column_type(ty: FieldType) -> &'static str {
    match ty {
        FieldType::Integer | FieldType::Boolean => "INTEGER",
        FieldType::Real => "REAL",
        FieldType::Text => "TEXT",
    }
}

/// `CREATE TABLE IF NOT EXISTS` for the schema. An integer primary key is a
/// rowid alias, so SQLite assigns it on insert.
pub fn create_table(schema: &Schema) -> Result<String, StorageError> {
    let mut columns = Vec::with_capacity(schema.fields().len());
    for (name, ty) in schema.fields() {
        let mut column = format!("{} {}", ident(name)?, column_type(*ty));
        if name == schema.primary_key_field() {
            column.push_str(" PRIMARY KEY");
        }
        columns.push(column);
    }
    Ok(format!("CREATE TABLE IF NOT EXISTS {} ({})", ident(schema.name())?, columns.join(", ")))
}

pub fn to_sql(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Int(i) => SqlValue::Integer(*i),
        Value::Float(x) => SqlValue::Real(*x),
        Value::Text(s) => SqlValue::Text(s.clone()),
        Value::List(_) | Value::Map(_) => SqlValue::Text(value.canonical()),
    }
}

/// Convert a stored value back using the declared column type.
pub fn from_sql(raw: SqlValue, ty: FieldType) -> Value {
    match (raw, ty) {
        (SqlValue::Null, _) => Value::Null,
        (SqlValue::Integer(i), FieldType::Boolean) => Value::Bool(i != 0),
        (SqlValue::Integer(i), FieldType::Real) => Value::Float(i as f64),
        (SqlValue::Integer(i), _) => Value::Int(i),
        (SqlValue::Real(x), _) => Value::Float(x),
        (SqlValue::Text(s), _) => Value::Text(s),
        (SqlValue::Blob(bytes), _) => Value::Text(String::from_utf8_lossy(&bytes).into_owned()),
    }
}

fn where_clause(predicates: &[Predicate], params: &mut Vec<SqlValue>) -> Result<String, StorageError> {
    if predicates.is_empty() {
        return Ok(String::new());
    }

    let mut terms = Vec::with_capacity(predicates.len());
    for predicate in predicates {
        let column = ident(predicate.field())?;
        let term = match (predicate.op(), predicate.value()) {
            (Operator::IsNull, _) => format!("{column} IS NULL"),
            (Operator::IsNotNull, _) => format!("{column} IS NOT NULL"),
            (Operator::In, Value::List(items)) if items.is_empty() => "0 = 1".to_string(),
            (Operator::In, Value::List(items)) => {
                params.extend(items.iter().map(to_sql));
                format!("{column} IN ({})", vec!["?"; items.len()].join(", "))
            }
            (op, value) => {
                let operator = match op {
                    Operator::Eq => "=",
                    Operator::Ne => "<>",
                    Operator::Gt => ">",
                    Operator::Gte => ">=",
                    Operator::Lt => "<",
                    Operator::Lte => "<=",
                    Operator::Like => "LIKE",
                    other => return Err(StorageError::Query(format!("cannot translate `{other}` with {value}"))),
                };
                params.push(to_sql(value));
                format!("{column} {operator} ?")
            }
        };
        terms.push(term);
    }
    Ok(format!(" WHERE {}", terms.join(" AND ")))
}

fn order_clause(order: &[OrderBy]) -> Result<String, StorageError> {
    if order.is_empty() {
        return Ok(String::new());
    }
    let terms = order
        .iter()
        .map(|clause| {
            let direction = match clause.direction {
                Direction::Asc => "ASC",
                Direction::Desc => "DESC",
            };
            Ok(format!("{} {direction}", ident(&clause.field)?))
        })
        .collect::<Result<Vec<_>, StorageError>>()?;
    Ok(format!(" ORDER BY {}", terms.join(", ")))
}

fn paging(limit: Option<u64>, offset: Option<u64>, params: &mut Vec<SqlValue>) -> String {
    let clamp = |n: u64| SqlValue::Integer(i64::try_from(n).unwrap_or(i64::MAX));
    match (limit, offset) {
        (None, None) => String::new(),
        (Some(limit), None) => {
            params.push(clamp(limit));
            " LIMIT ?".to_string()
        }
        (limit, Some(offset)) => {
            params.push(limit.map_or(SqlValue::Integer(-1), clamp));
            params.push(clamp(offset));
            " LIMIT ? OFFSET ?".to_string()
        }
    }
}

/// Column names of the schema, in the order `select` returns them.
pub fn columns(schema: &Schema) -> Vec<(String, FieldType)> {
    schema.fields().iter().map(|(name, ty)| (name.clone(), *ty)).collect()
}

pub fn select(query: &FilteredQuery<'_>) -> Result<Statement, StorageError> {
    let mut params = Vec::new();
    let projection =
        columns(query.schema).iter().map(|(name, _)| ident(name)).collect::<Result<Vec<_>, _>>()?.join(", ");
    let mut sql = format!("SELECT {projection} FROM {}", ident(query.schema.name())?);
    sql.push_str(&where_clause(query.predicates, &mut params)?);
    sql.push_str(&order_clause(query.order)?);
    sql.push_str(&paging(query.limit, query.offset, &mut params));
    Ok(Statement { sql, params })
}

pub fn count(schema: &Schema, predicates: &[Predicate]) -> Result<Statement, StorageError> {
    let mut params = Vec::new();
    let mut sql = format!("SELECT COUNT(*) FROM {}", ident(schema.name())?);
    sql.push_str(&where_clause(predicates, &mut params)?);
    Ok(Statement { sql, params })
}

fn persisted<'r>(schema: &Schema, row: &'r Row) -> Result<Vec<(&'r str, &'r Value)>, StorageError> {
    row.iter()
        .map(|(name, value)| {
            if schema.has_field(name) {
                Ok((name.as_str(), value))
            } else {
                Err(StorageError::Write(format!("`{}` has no column `{name}`", schema.name())))
            }
        })
        .collect()
}

/// `INSERT`, leaving out a null primary key so SQLite assigns one.
pub fn insert(schema: &Schema, row: &Row) -> Result<Statement, StorageError> {
    let pk = schema.primary_key_field();
    let fields: Vec<_> =
        persisted(schema, row)?.into_iter().filter(|(name, value)| !(*name == pk && value.is_null())).collect();
    let table = ident(schema.name())?;

    if fields.is_empty() {
        return Ok(Statement { sql: format!("INSERT INTO {table} DEFAULT VALUES"), params: Vec::new() });
    }

    let names = fields.iter().map(|(name, _)| ident(name)).collect::<Result<Vec<_>, _>>()?;
    let params = fields.iter().map(|(_, value)| to_sql(value)).collect();
    Ok(Statement {
        sql: format!("INSERT INTO {table} ({}) VALUES ({})", names.join(", "), vec!["?"; fields.len()].join(", ")),
        params,
    })
}

/// `UPDATE ... WHERE <pk> = ?` over every other column present in the row.
pub fn update(schema: &Schema, row: &Row, key: &Value) -> Result<Statement, StorageError> {
    let pk = schema.primary_key_field();
    let fields: Vec<_> = persisted(schema, row)?.into_iter().filter(|(name, _)| *name != pk).collect();
    if fields.is_empty() {
        return Err(StorageError::Write(format!("`{}` update has no columns to set", schema.name())));
    }

    let assignments =
        fields.iter().map(|(name, _)| Ok(format!("{} = ?", ident(name)?))).collect::<Result<Vec<_>, StorageError>>()?;
    let mut params: Vec<SqlValue> = fields.iter().map(|(_, value)| to_sql(value)).collect();
    params.push(to_sql(key));
    Ok(Statement {
        sql: format!("UPDATE {} SET {} WHERE {} = ?", ident(schema.name())?, assignments.join(", "), ident(pk)?),
        params,
    })
}

pub fn delete(schema: &Schema, key: &Value) -> Result<Statement, StorageError> {
    Ok(Statement {
        sql: format!("DELETE FROM {} WHERE {} = ?", ident(schema.name())?, ident(schema.primary_key_field())?),
        params: vec![to_sql(key)],
    })
}
