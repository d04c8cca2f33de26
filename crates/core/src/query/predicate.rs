//! Predicate model.
//!
//! A predicate is an immutable `(field, operator, value)` triple. Predicates on
//! one spec are AND-combined. Filter keywords are parsed once, at builder-call
//! time, from a `field__op` suffix grammar; an unsuffixed key means equality.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::value::Value;

/// Separator between a field name and its operator suffix.
pub const OPERATOR_SEPARATOR: &str = "__";

/// Comparison operator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    In,
    Like,
    IsNull,
    IsNotNull,
}

impl Operator {
    /// Parse a keyword suffix (the part after `__`).
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        let op = match suffix {
            "eq" => Operator::Eq,
            "ne" => Operator::Ne,
            "gt" => Operator::Gt,
            "gte" => Operator::Gte,
            "lt" => Operator::Lt,
            "lte" => Operator::Lte,
            "in" => Operator::In,
            "like" => Operator::Like,
            _ => return None,
        };
        Some(op)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Operator::Eq => "eq",
            Operator::Ne => "ne",
            Operator::Gt => "gt",
            Operator::Gte => "gte",
            Operator::Lt => "lt",
            Operator::Lte => "lte",
            Operator::In => "in",
            Operator::Like => "like",
            Operator::IsNull => "is_null",
            Operator::IsNotNull => "is_not_null",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single filter condition.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Predicate {
    field: String,
    op: Operator,
    value: Value,
}

impl Predicate {
    /// Build a predicate, checking that the value shape fits the operator.
    ///
    /// A null value turns `eq` into `is_null` and `ne` into `is_not_null`.
    pub fn new(field: impl Into<String>, op: Operator, value: Value) -> Result<Self, Error> {
        let field = field.into();
        if field.is_empty() {
            return Err(Error::InvalidPredicate("field name must not be empty".into()));
        }

        let (op, value) = match (op, value) {
            (Operator::Eq | Operator::IsNull, Value::Null) => (Operator::IsNull, Value::Null),
            (Operator::Ne | Operator::IsNotNull, Value::Null) => (Operator::IsNotNull, Value::Null),
            (Operator::IsNull | Operator::IsNotNull, other) => {
                return Err(Error::InvalidPredicate(format!(
                    "`{field}__{op}` takes no value, got {}",
                    other.kind()
                )));
            }
            (op, Value::Null) => {
                return Err(Error::InvalidPredicate(format!("`{field}__{op}` cannot compare against null")));
            }
            (Operator::In, Value::List(items)) => {
                if let Some(bad) = items.iter().find(|v| !v.is_scalar() || v.is_null()) {
                    return Err(Error::InvalidPredicate(format!(
                        "`{field}__in` list items must be non-null scalars, got {}",
                        bad.kind()
                    )));
                }
                (Operator::In, Value::List(items))
            }
            (Operator::In, other) => {
                return Err(Error::InvalidPredicate(format!("`{field}__in` requires a list, got {}", other.kind())));
            }
            (Operator::Like, Value::Text(pattern)) => (Operator::Like, Value::Text(pattern)),
            (Operator::Like, other) => {
                return Err(Error::InvalidPredicate(format!("`{field}__like` requires text, got {}", other.kind())));
            }
            (op, value) if !value.is_scalar() => {
                return Err(Error::InvalidPredicate(format!("`{field}__{op}` requires a scalar, got {}", value.kind())));
            }
            (op, value) => (op, value),
        };

        Ok(Self { field, op, value })
    }

    /// Parse a `field__op` keyword and value into a predicate.
    ///
    /// Only the last `__` separates the operator, so a field name may itself
    /// contain double underscores as long as the suffix is a known operator.
    pub fn parse(keyword: &str, value: Value) -> Result<Self, Error> {
        match keyword.rsplit_once(OPERATOR_SEPARATOR) {
            Some((field, suffix)) => {
                let op = Operator::from_suffix(suffix)
                    .ok_or_else(|| Error::InvalidPredicate(format!("unknown operator `{suffix}` in `{keyword}`")))?;
                Self::new(field, op, value)
            }
            None => Self::new(keyword, Operator::Eq, value),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn op(&self) -> Operator {
        self.op
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.op {
            Operator::IsNull | Operator::IsNotNull => write!(f, "{} {}", self.field, self.op),
            _ => write!(f, "{} {} {}", self.field, self.op, self.value.canonical()),
        }
    }
}

/// Sort direction of an order clause.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Asc,
    Desc,
}

/// One `(field, direction)` ordering term.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

impl OrderBy {
    /// Parse an order term; a leading `-` means descending.
    pub fn parse(term: &str) -> Result<Self, Error> {
        let (field, direction) = match term.strip_prefix('-') {
            Some(rest) => (rest, Direction::Desc),
            None => (term, Direction::Asc),
        };
        if field.is_empty() {
            return Err(Error::InvalidArgument(format!("empty order field in `{term}`")));
        }
        Ok(Self { field: field.to_string(), direction })
    }
}
