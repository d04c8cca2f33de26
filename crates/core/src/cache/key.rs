//! Deterministic cache key derivation.
//!
//! Query keys are content-addressed: the normalized spec is encoded as JSON
//! and hashed with SHA-256. Predicates are sorted before encoding so the order
//! in which filters were chained never changes the key. Ordering terms, limit
//! and offset are encoded positionally because they change the result.
//!
//! The per-query cache policy is not part of the key; two calls that differ
//! only in TTL share an entry.

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::query::{Operator, OrderBy, QuerySpec};
use crate::value::Value;

/// What a cached payload holds for a given spec.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Rows,
    Count,
}

#[derive(Serialize)]
struct CanonicalPredicate<'a> {
    field: &'a str,
    op: Operator,
    value: String,
}

#[derive(Serialize)]
struct CanonicalSpec<'a> {
    kind: ResultKind,
    predicates: Vec<CanonicalPredicate<'a>>,
    order: &'a [OrderBy],
    limit: Option<u64>,
    offset: Option<u64>,
    includes: Vec<&'a str>,
}

/// Derive the cache key for a spec's row results.
pub fn derive(spec: &QuerySpec) -> String {
    derive_for(spec, ResultKind::Rows)
}

/// Derive the cache key for a spec and the kind of result being cached.
pub fn derive_for(spec: &QuerySpec, kind: ResultKind) -> String {
    let mut predicates: Vec<CanonicalPredicate<'_>> = spec
        .predicates()
        .iter()
        .map(|p| CanonicalPredicate { field: p.field(), op: p.op(), value: p.value().canonical() })
        .collect();
    predicates.sort_by(|a, b| (a.field, a.op, &a.value).cmp(&(b.field, b.op, &b.value)));

    let canonical = CanonicalSpec {
        kind,
        predicates,
        order: spec.order_by(),
        limit: spec.limit_value(),
        offset: spec.offset_value(),
        includes: spec.include_set().iter().map(String::as_str).collect(),
    };

    let encoded = serde_json::to_vec(&canonical).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&encoded);
    format!("{}:{}", spec.model(), hex::encode(hasher.finalize()))
}

/// Key for a single-record lookup: `<model>:id:<identifier>`.
pub fn record_key(model: &str, id: &Value) -> String {
    format!("{model}:id:{id}")
}

/// Prefix shared by every key in a model's namespace.
pub fn model_prefix(model: &str) -> String {
    format!("{model}:")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{FieldType, Schema};
    use std::sync::Arc;

    fn spec() -> QuerySpec {
        QuerySpec::new(Arc::new(
            Schema::new("user")
                .field("status", FieldType::Text)
                .field("age", FieldType::Integer)
                .field("name", FieldType::Text),
        ))
    }

    #[test]
    fn test_key_stability() {
        let a = spec().filter([("status", "active")]).unwrap();
        assert_eq!(derive(&a), derive(&a.clone()));
    }

    #[test]
    fn test_predicate_order_independent() {
        let a = spec()
            .filter([("status", Value::from("active")), ("age__gte", Value::from(18))])
            .unwrap()
            .filter([("name__like", "a%")])
            .unwrap();
        let b = spec()
            .filter([("name__like", "a%")])
            .unwrap()
            .filter([("age__gte", Value::from(18)), ("status", Value::from("active"))])
            .unwrap();
        assert_eq!(derive(&a), derive(&b));
    }

    #[test]
    fn test_same_field_operator_different_values_order_independent() {
        let a = spec().filter([("age__gt", 1)]).unwrap().filter([("age__gt", 5)]).unwrap();
        let b = spec().filter([("age__gt", 5)]).unwrap().filter([("age__gt", 1)]).unwrap();
        assert_eq!(derive(&a), derive(&b));
    }

    #[test]
    fn test_order_is_significant() {
        let a = spec().order(["age", "-name"]).unwrap();
        let b = spec().order(["-name", "age"]).unwrap();
        let c = spec().order(["age", "name"]).unwrap();
        assert_ne!(derive(&a), derive(&b));
        assert_ne!(derive(&a), derive(&c));
    }

    #[test]
    fn test_limit_offset_significant() {
        let base = spec().filter([("status", "active")]).unwrap();
        assert_ne!(derive(&base), derive(&base.limit(2).unwrap()));
        assert_ne!(derive(&base.limit(2).unwrap()), derive(&base.limit(3).unwrap()));
        assert_ne!(derive(&base.offset(1).unwrap()), derive(&base.limit(1).unwrap()));
    }

    #[test]
    fn test_value_type_significant() {
        let a = spec().filter([("status", "1")]).unwrap();
        let b = spec().filter([("status", 1)]).unwrap();
        assert_ne!(derive(&a), derive(&b));
    }

    #[test]
    fn test_cache_policy_not_significant() {
        let base = spec().filter([("status", "active")]).unwrap();
        let cached = base.cache(std::time::Duration::from_secs(60));
        assert_eq!(derive(&base), derive(&cached));
    }

    #[test]
    fn test_count_key_differs_from_rows() {
        let base = spec();
        assert_ne!(derive_for(&base, ResultKind::Rows), derive_for(&base, ResultKind::Count));
    }

    #[test]
    fn test_key_format() {
        let key = derive(&spec());
        let (model, hash) = key.split_once(':').unwrap();
        assert_eq!(model, "user");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(key.starts_with(&model_prefix("user")));
    }

    #[test]
    fn test_record_key() {
        assert_eq!(record_key("user", &Value::Int(7)), "user:id:7");
        assert_eq!(record_key("session", &Value::from("abc")), "session:id:abc");
    }
}
