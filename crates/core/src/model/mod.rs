//! Model metadata consumed by the query core.
//!
//! Field declarations, scopes, callbacks and invalidation keys are supplied by
//! the model-definition layer through [`Model::describe`]; the core only reads
//! them.

mod meta;
mod registry;
mod schema;

pub use meta::{CallbackFn, ModelMeta, ScopeFn, Trigger};
pub use registry::Registry;
pub use schema::{FieldType, Relation, RelationKind, Schema};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::Error;
use crate::value::{Row, Value};

/// A record type mapped to one storage table.
pub trait Model: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Model type identifier; also the cache namespace.
    const NAME: &'static str;

    /// Schema and registrations for this model.
    fn describe() -> ModelMeta;
}

/// Convert a record into a raw row.
pub fn to_row<M: Serialize>(record: &M) -> Result<Row, Error> {
    match serde_json::to_value(record)? {
        serde_json::Value::Object(map) => Ok(serde_json::from_value(serde_json::Value::Object(map))?),
        other => Err(Error::Serialization(format!("record must serialize to an object, got {other}"))),
    }
}

/// Materialize a raw row into a record.
pub fn from_row<M: DeserializeOwned>(row: Row) -> Result<M, Error> {
    Ok(serde_json::from_value(serde_json::to_value(row)?)?)
}

/// The record's primary key value, which must be present and non-null.
pub fn identity(schema: &Schema, row: &Row) -> Result<Value, Error> {
    match row.get(schema.primary_key_field()) {
        Some(value) if !value.is_null() => Ok(value.clone()),
        _ => Err(Error::InvalidArgument(format!(
            "`{}` record has no `{}` value",
            schema.name(),
            schema.primary_key_field()
        ))),
    }
}
