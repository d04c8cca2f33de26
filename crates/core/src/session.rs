//! The session: settings, model registry, storage and cache wired together
//! once at startup and shared by every query.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::Error;
use crate::cache::{CacheCoordinator, Payload, model_prefix, record_key};
use crate::config::Settings;
use crate::error::StorageError;
use crate::invalidation::{self, InvalidationReport};
use crate::model::{Model, ModelMeta, Registry, Trigger, from_row, identity, to_row};
use crate::options::CallOptions;
use crate::query::{CacheConfig, Operator, Predicate, Query};
use crate::resolver::Resolver;
use crate::storage::{Storage, WriteOp};
use crate::value::{Row, Value};

struct Inner {
    settings: Settings,
    registry: Registry,
    storage: Arc<dyn Storage>,
    cache: CacheCoordinator,
}

/// Shared entry point for queries, single-record lookups and writes.
///
/// Cheap to clone; clones share the same storage and cache.
#[derive(Clone)]
pub struct Quarry {
    inner: Arc<Inner>,
}

/// Collects what a [`Quarry`] needs before it is built.
pub struct QuarryBuilder {
    settings: Settings,
    registry: Registry,
    storage: Option<Arc<dyn Storage>>,
    cache: Option<CacheCoordinator>,
}

impl QuarryBuilder {
    pub fn storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use this coordinator instead of building one from the settings.
    pub fn cache(mut self, cache: CacheCoordinator) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn register<M: Model>(mut self) -> Self {
        self.registry.register::<M>();
        self
    }

    /// Register metadata directly, replacing any earlier registration for the
    /// same model name.
    pub fn model(mut self, meta: ModelMeta) -> Self {
        self.registry.insert(meta);
        self
    }

    pub async fn build(self) -> Result<Quarry, Error> {
        self.settings.validate()?;
        let storage = self
            .storage
            .ok_or_else(|| Error::InvalidArgument("a storage collaborator is required".into()))?;
        let cache = match self.cache {
            Some(cache) => cache,
            None => CacheCoordinator::from_settings(&self.settings).await.map_err(Error::CacheUnavailable)?,
        };

        tracing::info!(
            models = self.registry.len(),
            cache_enabled = self.settings.cache_enabled,
            backend = ?self.settings.cache_backend,
            "quarry session ready"
        );

        Ok(Quarry { inner: Arc::new(Inner { settings: self.settings, registry: self.registry, storage, cache }) })
    }
}

impl Quarry {
    pub fn builder(settings: Settings) -> QuarryBuilder {
        QuarryBuilder { settings, registry: Registry::new(), storage: None, cache: None }
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }

    pub fn cache(&self) -> &CacheCoordinator {
        &self.inner.cache
    }

    /// New query on `M` with its default scope applied.
    pub fn query<M: Model>(&self) -> Result<Query<'_, M>, Error> {
        let meta = self.meta::<M>()?;
        let spec = meta.base_query()?;
        Ok(Query::new(self, meta, spec))
    }

    /// New query on `M` that skips the default scope.
    pub fn unscoped<M: Model>(&self) -> Result<Query<'_, M>, Error> {
        let meta = self.meta::<M>()?;
        let spec = meta.unscoped_query();
        Ok(Query::new(self, meta, spec))
    }

    /// Look a record up by primary key.
    ///
    /// The id is converted to the primary key's type first, so `"7"` and `7`
    /// share one entry under `<model>:id:<id>`, cached when caching is enabled
    /// globally. Scopes do not apply.
    pub async fn get<M: Model>(&self, id: impl Into<Value>) -> Result<Option<M>, Error> {
        let meta = self.meta::<M>()?;
        let id = id.into();
        if id.is_null() {
            return Err(Error::InvalidArgument(format!("`{}` lookup needs a non-null id", meta.name())));
        }
        let pk = meta.schema().primary_key_field();
        let id = meta
            .schema()
            .field_type(pk)
            .and_then(|ty| ty.coerce(id.clone()))
            .ok_or_else(|| Error::InvalidArgument(format!("`{id}` is not a valid `{}` {pk}", meta.name())))?;

        let spec = meta
            .unscoped_query()
            .with_predicates([Predicate::new(pk, Operator::Eq, id.clone())?])?
            .with_limit(1);
        let key = record_key(meta.name(), &id);
        let opts = self.call_options();
        let resolver = self.resolver(opts.timeout);

        let payload = self
            .through_cache(&key, self.cache_ttl(None), opts, async {
                resolver.resolve(&spec).await.map(Payload::Rows)
            })
            .await?;
        let rows = payload
            .into_rows()
            .ok_or_else(|| Error::Serialization(format!("cached entry `{key}` does not hold rows")))?;
        rows.into_iter().next().map(from_row).transpose()
    }

    /// Like [`get`](Self::get), failing with `RecordNotFound` when absent.
    pub async fn find<M: Model>(&self, id: impl Into<Value>) -> Result<M, Error> {
        let id = id.into();
        self.get::<M>(id.clone())
            .await?
            .ok_or_else(|| Error::RecordNotFound { model: M::NAME.to_string(), id: id.to_string() })
    }

    pub async fn create<M: Model>(&self, record: &M) -> Result<M, Error> {
        self.persist(WriteOp::Create, record).await
    }

    pub async fn update<M: Model>(&self, record: &M) -> Result<M, Error> {
        self.persist(WriteOp::Update, record).await
    }

    /// Delete a record, returning the row storage removed.
    pub async fn delete<M: Model>(&self, record: &M) -> Result<M, Error> {
        self.persist(WriteOp::Delete, record).await
    }

    /// Drop every cached entry in `M`'s namespace.
    pub async fn invalidate_model<M: Model>(&self) -> Result<u64, Error> {
        let prefix = model_prefix(M::NAME);
        let deleted = self.inner.cache.delete_prefix(&prefix, self.call_options()).await?;
        tracing::info!(model = M::NAME, deleted, "model cache invalidated");
        Ok(deleted)
    }

    pub async fn invalidate_keys(&self, keys: &[String]) -> Result<u64, Error> {
        self.inner.cache.delete_keys(keys, self.call_options()).await
    }

    /// Remove expired entries now instead of on their next read.
    pub async fn purge_expired(&self) -> Result<u64, Error> {
        self.inner.cache.purge_expired(self.call_options()).await
    }

    pub(crate) fn call_options(&self) -> CallOptions {
        CallOptions { strict: self.inner.settings.strict_cache, timeout: self.inner.settings.timeout() }
    }

    pub(crate) fn resolver(&self, timeout: Duration) -> Resolver<'_> {
        Resolver::new(self.inner.storage.as_ref(), &self.inner.registry, timeout)
    }

    /// TTL to cache under, or `None` when this call must not touch the cache.
    pub(crate) fn cache_ttl(&self, config: Option<CacheConfig>) -> Option<Duration> {
        let settings = &self.inner.settings;
        match config {
            Some(CacheConfig { enabled: false, .. }) => None,
            Some(CacheConfig { ttl, .. }) => Some(ttl.unwrap_or_else(|| settings.default_ttl())),
            None => settings.cache_enabled.then(|| settings.default_ttl()),
        }
    }

    /// Serve `key` from the cache, or run `load` and store its payload.
    ///
    /// The entry is written only once `load` has produced a complete payload.
    pub(crate) async fn through_cache(
        &self, key: &str, ttl: Option<Duration>, opts: CallOptions, load: impl Future<Output = Result<Payload, Error>>,
    ) -> Result<Payload, Error> {
        let Some(ttl) = ttl else {
            return load.await;
        };
        if let Some(payload) = self.inner.cache.fetch(key, opts).await? {
            return Ok(payload);
        }
        let payload = load.await?;
        self.inner.cache.write(key, &payload, Some(ttl), opts).await?;
        Ok(payload)
    }

    fn meta<M: Model>(&self) -> Result<Arc<ModelMeta>, Error> {
        self.inner.registry.require(M::NAME).cloned()
    }

    async fn persist<M: Model>(&self, op: WriteOp, record: &M) -> Result<M, Error> {
        let meta = self.meta::<M>()?;
        let mut row = to_row(record)?;
        let (before, after) = triggers(op);

        for trigger in before {
            meta.run_callbacks(*trigger, &mut row)?;
        }

        let mut committed = self.commit(&meta, op, row).await?;
        let id = identity(meta.schema(), &committed).ok();

        let callbacks = after.iter().try_for_each(|trigger| meta.run_callbacks(*trigger, &mut committed));

        let report: InvalidationReport =
            invalidation::after_commit(&self.inner.cache, &meta, id.as_ref(), self.inner.settings.timeout()).await;
        if report.failed > 0 {
            tracing::warn!(model = meta.name(), failed = report.failed, "some cache keys may be stale after write");
        }

        callbacks?;
        from_row(committed)
    }

    async fn commit(&self, meta: &ModelMeta, op: WriteOp, row: Row) -> Result<Row, Error> {
        let timeout = self.inner.settings.timeout();
        let committed = tokio::time::timeout(timeout, self.inner.storage.commit_write(meta.schema(), op, row))
            .await
            .map_err(|_| StorageError::Timeout(timeout))??;
        tracing::debug!(model = meta.name(), op = ?op, "write committed");
        Ok(committed)
    }
}

/// Callback triggers run before and after the commit, in order.
fn triggers(op: WriteOp) -> (&'static [Trigger], &'static [Trigger]) {
    match op {
        WriteOp::Create => {
            (&[Trigger::BeforeSave, Trigger::BeforeCreate], &[Trigger::AfterCreate, Trigger::AfterSave])
        }
        WriteOp::Update => {
            (&[Trigger::BeforeSave, Trigger::BeforeUpdate], &[Trigger::AfterUpdate, Trigger::AfterSave])
        }
        WriteOp::Delete => (&[Trigger::BeforeDelete], &[Trigger::AfterDelete]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryBackend;
    use crate::config::{CacheBackendKind, configure};
    use crate::model::{FieldType, Schema};
    use crate::storage::MemoryStorage;
    use serde::{Deserialize, Serialize};
    use std::sync::Mutex;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        id: Option<i64>,
        email: String,
        active: bool,
    }

    impl Model for Account {
        const NAME: &'static str = "account";

        fn describe() -> ModelMeta {
            ModelMeta::new(Schema::new("account").field("email", FieldType::Text).field("active", FieldType::Boolean))
                .default_scope(|spec, _| spec.filter([("active", true)]))
                .invalidate_on_write("account:directory")
        }
    }

    fn account(email: &str, active: bool) -> Account {
        Account { id: None, email: email.into(), active }
    }

    async fn session(storage: &MemoryStorage, meta: ModelMeta) -> Quarry {
        let settings = configure(true, CacheBackendKind::Memory, "", Duration::from_secs(60)).unwrap();
        Quarry::builder(settings)
            .storage(Arc::new(storage.clone()))
            .cache(CacheCoordinator::new(Arc::new(MemoryBackend::new())))
            .model(meta)
            .build()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_build_requires_storage() {
        let err = Quarry::builder(Settings::default()).build().await.err().unwrap();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_get_is_cached_and_bypasses_scopes() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        let created = quarry.create(&account("off@example.com", false)).await.unwrap();
        let id = created.id.unwrap();

        let reads = storage.reads();
        let found: Account = quarry.find(id).await.unwrap();
        assert_eq!(found.email, "off@example.com");
        assert_eq!(storage.reads(), reads + 1);

        quarry.find::<Account>(id).await.unwrap();
        assert_eq!(storage.reads(), reads + 1);
    }

    #[tokio::test]
    async fn test_find_missing_is_not_found() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        assert!(quarry.get::<Account>(42).await.unwrap().is_none());
        let err = quarry.find::<Account>(42).await.unwrap_err();
        assert!(matches!(err, Error::RecordNotFound { ref id, .. } if id == "42"));
    }

    #[tokio::test]
    async fn test_text_and_int_ids_share_one_entry() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        let id = quarry.create(&account("a@example.com", true)).await.unwrap().id.unwrap();

        let by_text = quarry.get::<Account>(id.to_string()).await.unwrap();
        assert_eq!(by_text.map(|a| a.email).as_deref(), Some("a@example.com"));

        let reads = storage.reads();
        let by_int = quarry.get::<Account>(id).await.unwrap();
        assert_eq!(by_int.map(|a| a.email).as_deref(), Some("a@example.com"));
        assert_eq!(storage.reads(), reads);

        let err = quarry.get::<Account>("not-a-number").await.unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_write_invalidates_record_key() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        let mut record = quarry.create(&account("a@example.com", true)).await.unwrap();
        let id = record.id.unwrap();

        quarry.find::<Account>(id).await.unwrap();
        let key = record_key("account", &Value::Int(id));
        assert!(quarry.cache().fetch(&key, CallOptions::default()).await.unwrap().is_some());

        record.email = "b@example.com".into();
        quarry.update(&record).await.unwrap();
        assert!(quarry.cache().fetch(&key, CallOptions::default()).await.unwrap().is_none());
        assert_eq!(quarry.find::<Account>(id).await.unwrap().email, "b@example.com");

        quarry.delete(&record).await.unwrap();
        assert!(quarry.get::<Account>(id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_registered_keys_dropped_on_write() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        let opts = CallOptions::default();
        quarry.cache().write("account:directory", &Payload::Count(3), None, opts).await.unwrap();

        quarry.create(&account("a@example.com", true)).await.unwrap();
        assert!(quarry.cache().fetch("account:directory", opts).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_callbacks_run_around_commit() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let push = |name: &'static str| {
            let log = Arc::clone(&log);
            move |_: &mut Row| {
                log.lock().unwrap().push(name);
                Ok::<(), String>(())
            }
        };
        let meta = Account::describe()
            .on(Trigger::AfterSave, push("after_save"))
            .on(Trigger::AfterCreate, push("after_create"))
            .on(Trigger::BeforeCreate, push("before_create"))
            .on(Trigger::BeforeSave, |row| {
                if let Some(Value::Text(email)) = row.get_mut("email") {
                    *email = email.to_lowercase();
                }
                Ok(())
            })
            .on(Trigger::BeforeSave, push("before_save"));

        let storage = MemoryStorage::new();
        let quarry = session(&storage, meta).await;
        let created = quarry.create(&account("Ada@Example.COM", true)).await.unwrap();

        assert_eq!(created.email, "ada@example.com");
        assert_eq!(*log.lock().unwrap(), vec!["before_save", "before_create", "after_create", "after_save"]);
    }

    #[tokio::test]
    async fn test_before_callback_aborts_write() {
        let meta = Account::describe().on(Trigger::BeforeCreate, |_| Err("signups closed".into()));
        let storage = MemoryStorage::new();
        let quarry = session(&storage, meta).await;

        let err = quarry.create(&account("a@example.com", true)).await.unwrap_err();
        assert!(matches!(err, Error::Callback { trigger: Trigger::BeforeCreate, .. }));
        assert_eq!(quarry.unscoped::<Account>().unwrap().count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_after_callback_error_still_invalidates() {
        let meta = Account::describe().on(Trigger::AfterSave, |_| Err("mailer down".into()));
        let storage = MemoryStorage::new();
        let quarry = session(&storage, meta).await;
        let opts = CallOptions::default();
        quarry.cache().write("account:directory", &Payload::Count(0), None, opts).await.unwrap();

        let err = quarry.create(&account("a@example.com", true)).await.unwrap_err();
        assert!(matches!(err, Error::Callback { trigger: Trigger::AfterSave, .. }));
        assert!(quarry.cache().fetch("account:directory", opts).await.unwrap().is_none());
        assert_eq!(quarry.unscoped::<Account>().unwrap().no_cache().count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalidate_model_and_purge() {
        let storage = MemoryStorage::new();
        let quarry = session(&storage, Account::describe()).await;
        let opts = CallOptions::default();
        for key in ["account:a", "account:b", "accounting:c"] {
            quarry.cache().write(key, &Payload::Count(1), None, opts).await.unwrap();
        }

        assert_eq!(quarry.invalidate_model::<Account>().await.unwrap(), 2);
        assert!(quarry.cache().fetch("accounting:c", opts).await.unwrap().is_some());
        assert_eq!(quarry.invalidate_keys(&["accounting:c".to_string()]).await.unwrap(), 1);
        assert_eq!(quarry.purge_expired().await.unwrap(), 0);
    }
}
