//! Typed query builder bound to a session.
//!
//! A [`Query`] pairs an immutable [`QuerySpec`] with the per-call options that
//! do not affect what is being asked for (strictness, timeout). Chain methods
//! return a new `Query`; terminals run through the cache and then the
//! resolver.

use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::cache::{Payload, ResultKind, derive, derive_for};
use crate::model::{Model, ModelMeta, from_row};
use crate::options::CallOptions;
use crate::query::QuerySpec;
use crate::session::Quarry;
use crate::value::{Row, Value};

pub struct Query<'q, M> {
    session: &'q Quarry,
    meta: Arc<ModelMeta>,
    spec: QuerySpec,
    opts: CallOptions,
    _model: PhantomData<fn() -> M>,
}

impl<M> Clone for Query<'_, M> {
    fn clone(&self) -> Self {
        Self {
            session: self.session,
            meta: Arc::clone(&self.meta),
            spec: self.spec.clone(),
            opts: self.opts,
            _model: PhantomData,
        }
    }
}

impl<M> fmt::Debug for Query<'_, M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query").field("spec", &self.spec).field("opts", &self.opts).finish()
    }
}

impl<'q, M: Model> Query<'q, M> {
    pub(crate) fn new(session: &'q Quarry, meta: Arc<ModelMeta>, spec: QuerySpec) -> Self {
        Self { session, meta, spec, opts: session.call_options(), _model: PhantomData }
    }

    fn with_spec(&self, spec: QuerySpec) -> Self {
        Self { spec, ..self.clone() }
    }

    /// Add `field__op = value` conditions, AND-combined with existing ones.
    pub fn filter<I, K, V>(&self, conditions: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<Value>,
    {
        Ok(self.with_spec(self.spec.filter(conditions)?))
    }

    pub fn filter_by(&self, keyword: &str, value: impl Into<Value>) -> Result<Self, Error> {
        Ok(self.with_spec(self.spec.filter_by(keyword, value)?))
    }

    /// Append ordering terms (`"name"`, `"-created_at"`).
    pub fn order<I, S>(&self, terms: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.with_spec(self.spec.order(terms)?))
    }

    pub fn limit(&self, limit: i64) -> Result<Self, Error> {
        Ok(self.with_spec(self.spec.limit(limit)?))
    }

    pub fn offset(&self, offset: i64) -> Result<Self, Error> {
        Ok(self.with_spec(self.spec.offset(offset)?))
    }

    pub fn includes<I, S>(&self, relations: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Ok(self.with_spec(self.spec.includes(relations)?))
    }

    /// Apply a named scope registered on the model.
    pub fn scope<I, V>(&self, name: &str, args: I) -> Result<Self, Error>
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        let args: Vec<Value> = args.into_iter().map(Into::into).collect();
        Ok(self.with_spec(self.meta.apply_scope(&self.spec, name, &args)?))
    }

    /// Start over from an empty spec without the default scope.
    pub fn unscoped(&self) -> Self {
        self.with_spec(self.meta.unscoped_query())
    }

    /// Cache results; `None` uses the configured default TTL.
    pub fn cache(&self, ttl: impl Into<Option<Duration>>) -> Self {
        self.with_spec(self.spec.cache(ttl))
    }

    pub fn no_cache(&self) -> Self {
        self.with_spec(self.spec.no_cache())
    }

    /// Fail with `CacheUnavailable` instead of degrading when the cache is down.
    pub fn strict(&self) -> Self {
        Self { opts: CallOptions { strict: true, ..self.opts }, ..self.clone() }
    }

    pub fn timeout(&self, timeout: Duration) -> Self {
        Self { opts: CallOptions { timeout, ..self.opts }, ..self.clone() }
    }

    pub fn spec(&self) -> &QuerySpec {
        &self.spec
    }

    /// Key the row results of this query are cached under.
    pub fn cache_key(&self) -> String {
        derive(&self.spec)
    }

    pub async fn all(&self) -> Result<Vec<M>, Error> {
        self.rows(&self.spec).await?.into_iter().map(from_row).collect()
    }

    /// Raw rows, including any eager-loaded relations under their names.
    pub async fn all_rows(&self) -> Result<Vec<Row>, Error> {
        self.rows(&self.spec).await
    }

    /// The first match, or `None`. An empty result is not an error.
    ///
    /// Cached as the same query with `limit(1)`.
    pub async fn first(&self) -> Result<Option<M>, Error> {
        let key = derive(&self.spec.with_limit(1));
        let resolver = self.session.resolver(self.opts.timeout);
        let ttl = self.session.cache_ttl(self.spec.cache_config());

        let payload = self
            .session
            .through_cache(&key, ttl, self.opts, async {
                resolver.first(&self.spec).await.map(|head| Payload::Rows(head.into_iter().collect()))
            })
            .await?;
        let rows = payload
            .into_rows()
            .ok_or_else(|| Error::Serialization(format!("cached entry `{key}` does not hold rows")))?;
        rows.into_iter().next().map(from_row).transpose()
    }

    /// Like [`first`](Self::first), failing with `RecordNotFound` whose id
    /// lists the query's predicates.
    pub async fn first_or_not_found(&self) -> Result<M, Error> {
        self.first().await?.ok_or_else(|| Error::RecordNotFound {
            model: M::NAME.to_string(),
            id: self.spec.predicates().iter().map(ToString::to_string).collect::<Vec<_>>().join(" and "),
        })
    }

    /// Matching rows after offset and limit, without materializing them when
    /// storage can count natively.
    pub async fn count(&self) -> Result<u64, Error> {
        let key = derive_for(&self.spec, ResultKind::Count);
        let resolver = self.session.resolver(self.opts.timeout);
        let ttl = self.session.cache_ttl(self.spec.cache_config());

        let payload = self
            .session
            .through_cache(&key, ttl, self.opts, async { resolver.count(&self.spec).await.map(Payload::Count) })
            .await?;
        payload
            .as_count()
            .ok_or_else(|| Error::Serialization(format!("cached entry `{key}` does not hold a count")))
    }

    async fn rows(&self, spec: &QuerySpec) -> Result<Vec<Row>, Error> {
        let key = derive(spec);
        let resolver = self.session.resolver(self.opts.timeout);
        let ttl = self.session.cache_ttl(spec.cache_config());

        let payload = self
            .session
            .through_cache(&key, ttl, self.opts, async { resolver.resolve(spec).await.map(Payload::Rows) })
            .await?;
        payload
            .into_rows()
            .ok_or_else(|| Error::Serialization(format!("cached entry `{key}` does not hold rows")))
    }
}
