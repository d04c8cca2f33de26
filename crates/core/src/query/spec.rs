//! Immutable query specification.
//!
//! Every builder method borrows the current spec and returns a new one. The
//! collections are behind `Arc`, so a derived spec copies the parent's
//! contents once and appends; nothing reachable from an existing spec is ever
//! mutated. Specs can be shared across tasks and forked freely.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::model::Schema;
use crate::query::predicate::{OrderBy, Predicate};
use crate::value::Value;

/// Per-query cache policy.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    pub enabled: bool,
    /// `None` falls back to the configured default TTL.
    pub ttl: Option<Duration>,
}

/// Immutable description of a filtered, ordered, limited query on one model.
#[derive(Clone, Debug)]
pub struct QuerySpec {
    schema: Arc<Schema>,
    predicates: Arc<Vec<Predicate>>,
    order: Arc<Vec<OrderBy>>,
    limit: Option<u64>,
    offset: Option<u64>,
    includes: Arc<BTreeSet<String>>,
    cache: Option<CacheConfig>,
}

impl QuerySpec {
    /// An empty spec for the model: no predicates, no ordering, no paging.
    pub fn new(schema: Arc<Schema>) -> Self {
        Self {
            schema,
            predicates: Arc::default(),
            order: Arc::default(),
            limit: None,
            offset: None,
            includes: Arc::default(),
            cache: None,
        }
    }

    /// Add one predicate per `(keyword, value)` pair.
    ///
    /// Keywords use the `field__op` grammar. Fields are checked against the
    /// model schema; nothing is appended unless every condition is valid.
    pub fn filter<I, K, V>(&self, conditions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        let parsed = conditions
            .into_iter()
            .map(|(keyword, value)| Predicate::parse(keyword.as_ref(), value.into()))
            .collect::<Result<Vec<_>, _>>()?;
        self.with_predicates(parsed)
    }

    /// Add a single `keyword = value` condition.
    pub fn filter_by(&self, keyword: &str, value: impl Into<Value>) -> Result<Self, Error> {
        self.filter([(keyword, value.into())])
    }

    /// Append already-built predicates.
    pub fn with_predicates(&self, predicates: impl IntoIterator<Item = Predicate>) -> Result<Self, Error> {
        let predicates: Vec<Predicate> = predicates.into_iter().collect();
        for predicate in &predicates {
            if !self.schema.has_field(predicate.field()) {
                return Err(Error::InvalidPredicate(format!(
                    "unknown field `{}` on model `{}`",
                    predicate.field(),
                    self.schema.name()
                )));
            }
        }

        let mut next = (*self.predicates).clone();
        next.extend(predicates);
        Ok(Self { predicates: Arc::new(next), ..self.clone() })
    }

    /// Append ordering terms; a leading `-` sorts descending.
    ///
    /// Later calls append after earlier ones.
    pub fn order<I, S>(&self, terms: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = (*self.order).clone();
        for term in terms {
            let clause = OrderBy::parse(term.as_ref())?;
            if !self.schema.has_field(&clause.field) {
                return Err(Error::InvalidArgument(format!(
                    "cannot order by unknown field `{}` on model `{}`",
                    clause.field,
                    self.schema.name()
                )));
            }
            next.push(clause);
        }
        Ok(Self { order: Arc::new(next), ..self.clone() })
    }

    pub fn limit(&self, limit: i64) -> Result<Self, Error> {
        let limit = non_negative("limit", limit)?;
        Ok(Self { limit: Some(limit), ..self.clone() })
    }

    pub fn offset(&self, offset: i64) -> Result<Self, Error> {
        let offset = non_negative("offset", offset)?;
        Ok(Self { offset: Some(offset), ..self.clone() })
    }

    /// Request eager loading of declared relations.
    pub fn includes<I, S>(&self, relations: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut next = (*self.includes).clone();
        for relation in relations {
            let relation = relation.as_ref();
            if self.schema.relation_named(relation).is_none() {
                return Err(Error::InvalidArgument(format!(
                    "model `{}` has no relation `{relation}`",
                    self.schema.name()
                )));
            }
            next.insert(relation.to_string());
        }
        Ok(Self { includes: Arc::new(next), ..self.clone() })
    }

    /// Enable result caching; `None` uses the configured default TTL.
    pub fn cache(&self, ttl: impl Into<Option<Duration>>) -> Self {
        Self { cache: Some(CacheConfig { enabled: true, ttl: ttl.into() }), ..self.clone() }
    }

    /// Disable result caching for this query regardless of the global policy.
    pub fn no_cache(&self) -> Self {
        Self { cache: Some(CacheConfig { enabled: false, ttl: None }), ..self.clone() }
    }

    pub(crate) fn with_limit(&self, limit: u64) -> Self {
        Self { limit: Some(limit), ..self.clone() }
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn model(&self) -> &str {
        self.schema.name()
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn order_by(&self) -> &[OrderBy] {
        &self.order
    }

    pub fn limit_value(&self) -> Option<u64> {
        self.limit
    }

    pub fn offset_value(&self) -> Option<u64> {
        self.offset
    }

    pub fn include_set(&self) -> &BTreeSet<String> {
        &self.includes
    }

    pub fn cache_config(&self) -> Option<CacheConfig> {
        self.cache
    }
}

fn non_negative(name: &str, value: i64) -> Result<u64, Error> {
    u64::try_from(value).map_err(|_| Error::InvalidArgument(format!("{name} must not be negative, got {value}")))
}
