//! Static description of a model's table: name, primary key, fields, relations.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value::Value;

/// Storage type of a field.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    Integer,
    Real,
    Text,
    Boolean,
}

impl FieldType {
    /// Convert a scalar to this column's type, `None` when it has no faithful form.
    ///
    /// `"7"` and `7` name the same integer key; `7.5` names no integer key.
    pub fn coerce(self, value: Value) -> Option<Value> {
        match (self, value) {
            (FieldType::Integer, Value::Int(i)) => Some(Value::Int(i)),
            (FieldType::Integer, Value::Float(x)) if x.fract() == 0.0 && x.abs() < i64::MAX as f64 => {
                Some(Value::Int(x as i64))
            }
            (FieldType::Integer, Value::Text(s)) => s.trim().parse().ok().map(Value::Int),
            (FieldType::Real, Value::Float(x)) => Some(Value::Float(x)),
            (FieldType::Real, Value::Int(i)) => Some(Value::Float(i as f64)),
            (FieldType::Real, Value::Text(s)) => s.trim().parse().ok().map(Value::Float),
            (FieldType::Text, Value::Text(s)) => Some(Value::Text(s)),
            (FieldType::Text, Value::Int(i)) => Some(Value::Text(i.to_string())),
            (FieldType::Boolean, Value::Bool(b)) => Some(Value::Bool(b)),
            _ => None,
        }
    }
}

/// Cardinality of a relation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationKind {
    /// Related rows carry `foreign_key` pointing at this model's primary key.
    HasMany,
    /// This model carries `foreign_key` pointing at the related primary key.
    BelongsTo,
}

/// A named relation that `includes` can eager-load.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub name: String,
    pub model: String,
    pub kind: RelationKind,
    pub foreign_key: String,
}

/// Table-level model description.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schema {
    name: String,
    primary_key: String,
    fields: BTreeMap<String, FieldType>,
    relations: BTreeMap<String, Relation>,
}

impl Schema {
    /// Start a schema with an integer `id` primary key.
    pub fn new(name: impl Into<String>) -> Self {
        let mut fields = BTreeMap::new();
        fields.insert("id".to_string(), FieldType::Integer);
        Self { name: name.into(), primary_key: "id".to_string(), fields, relations: BTreeMap::new() }
    }

    /// Replace the primary key column.
    pub fn primary_key(mut self, field: impl Into<String>, ty: FieldType) -> Self {
        self.fields.remove(&self.primary_key);
        self.primary_key = field.into();
        self.fields.insert(self.primary_key.clone(), ty);
        self
    }

    pub fn field(mut self, name: impl Into<String>, ty: FieldType) -> Self {
        self.fields.insert(name.into(), ty);
        self
    }

    pub fn has_many(self, name: impl Into<String>, model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.relation(name.into(), model.into(), RelationKind::HasMany, foreign_key.into())
    }

    pub fn belongs_to(self, name: impl Into<String>, model: impl Into<String>, foreign_key: impl Into<String>) -> Self {
        self.relation(name.into(), model.into(), RelationKind::BelongsTo, foreign_key.into())
    }

    fn relation(mut self, name: String, model: String, kind: RelationKind, foreign_key: String) -> Self {
        self.relations.insert(name.clone(), Relation { name, model, kind, foreign_key });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn primary_key_field(&self) -> &str {
        &self.primary_key
    }

    pub fn fields(&self) -> &BTreeMap<String, FieldType> {
        &self.fields
    }

    pub fn field_type(&self, name: &str) -> Option<FieldType> {
        self.fields.get(name).copied()
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn relation_named(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }
}
