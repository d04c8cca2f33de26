//! Per-model metadata: named scopes, the default scope, lifecycle callbacks and
//! the cache keys to drop after every committed write.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::Error;
use crate::model::Schema;
use crate::query::QuerySpec;
use crate::value::{Row, Value};

/// A named, reusable transformation of a query spec.
pub type ScopeFn = Arc<dyn Fn(&QuerySpec, &[Value]) -> Result<QuerySpec, Error> + Send + Sync>;

/// A lifecycle callback. Before-callbacks may edit the row being written.
pub type CallbackFn = Arc<dyn Fn(&mut Row) -> Result<(), String> + Send + Sync>;

/// When a callback runs relative to the storage commit.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trigger {
    BeforeSave,
    AfterSave,
    BeforeCreate,
    AfterCreate,
    BeforeUpdate,
    AfterUpdate,
    BeforeDelete,
    AfterDelete,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::BeforeSave => "before_save",
            Trigger::AfterSave => "after_save",
            Trigger::BeforeCreate => "before_create",
            Trigger::AfterCreate => "after_create",
            Trigger::BeforeUpdate => "before_update",
            Trigger::AfterUpdate => "after_update",
            Trigger::BeforeDelete => "before_delete",
            Trigger::AfterDelete => "after_delete",
        };
        f.write_str(name)
    }
}

/// Everything the core knows about one model type.
///
/// Built once at startup and registered with the session; never mutated
/// afterwards.
#[derive(Clone)]
pub struct ModelMeta {
    schema: Arc<Schema>,
    scopes: BTreeMap<String, ScopeFn>,
    default_scope: Option<ScopeFn>,
    callbacks: Vec<(Trigger, CallbackFn)>,
    invalidate_on_write: Vec<String>,
}

impl ModelMeta {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema: Arc::new(schema),
            scopes: BTreeMap::new(),
            default_scope: None,
            callbacks: Vec::new(),
            invalidate_on_write: Vec::new(),
        }
    }

    /// Register a named scope.
    pub fn scope<F>(mut self, name: impl Into<String>, scope: F) -> Self
    where
        F: Fn(&QuerySpec, &[Value]) -> Result<QuerySpec, Error> + Send + Sync + 'static,
    {
        self.scopes.insert(name.into(), Arc::new(scope));
        self
    }

    /// Register the scope applied to every query unless `unscoped` is used.
    pub fn default_scope<F>(mut self, scope: F) -> Self
    where
        F: Fn(&QuerySpec, &[Value]) -> Result<QuerySpec, Error> + Send + Sync + 'static,
    {
        self.default_scope = Some(Arc::new(scope));
        self
    }

    /// Register a callback. Callbacks for one trigger run in registration order.
    pub fn on<F>(mut self, trigger: Trigger, callback: F) -> Self
    where
        F: Fn(&mut Row) -> Result<(), String> + Send + Sync + 'static,
    {
        self.callbacks.push((trigger, Arc::new(callback)));
        self
    }

    /// Register a cache key pattern to delete after every committed write.
    ///
    /// `{id}` is replaced by the written record's identifier; a trailing `*`
    /// deletes every key with that prefix.
    pub fn invalidate_on_write(mut self, pattern: impl Into<String>) -> Self {
        self.invalidate_on_write.push(pattern.into());
        self
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn invalidation_patterns(&self) -> &[String] {
        &self.invalidate_on_write
    }

    /// Spec for a new query: empty, with the default scope applied once.
    pub fn base_query(&self) -> Result<QuerySpec, Error> {
        let spec = QuerySpec::new(Arc::clone(&self.schema));
        match &self.default_scope {
            Some(scope) => scope(&spec, &[]),
            None => Ok(spec),
        }
    }

    /// Spec for a new query that skips the default scope.
    pub fn unscoped_query(&self) -> QuerySpec {
        QuerySpec::new(Arc::clone(&self.schema))
    }

    /// Apply a named scope.
    pub fn apply_scope(&self, spec: &QuerySpec, name: &str, args: &[Value]) -> Result<QuerySpec, Error> {
        let scope = self
            .scopes
            .get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("model `{}` has no scope `{name}`", self.name())))?;
        scope(spec, args)
    }

    /// Run every callback registered for `trigger`, in order, stopping at the
    /// first failure.
    pub fn run_callbacks(&self, trigger: Trigger, row: &mut Row) -> Result<(), Error> {
        for (registered, callback) in &self.callbacks {
            if *registered != trigger {
                continue;
            }
            callback(row).map_err(|message| Error::Callback { model: self.name().to_string(), trigger, message })?;
        }
        Ok(())
    }
}

impl fmt::Debug for ModelMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelMeta")
            .field("schema", &self.schema)
            .field("scopes", &self.scopes.keys().collect::<Vec<_>>())
            .field("default_scope", &self.default_scope.is_some())
            .field("callbacks", &self.callbacks.iter().map(|(t, _)| *t).collect::<Vec<_>>())
            .field("invalidate_on_write", &self.invalidate_on_write)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FieldType;
    use std::sync::Mutex;

    fn meta() -> ModelMeta {
        ModelMeta::new(
            Schema::new("user")
                .field("status", FieldType::Text)
                .field("deleted", FieldType::Boolean)
                .field("age", FieldType::Integer),
        )
    }

    #[test]
    fn test_default_scope_applied_by_base_query() {
        let meta = meta().default_scope(|spec, _| spec.filter([("deleted", false)]));
        assert_eq!(meta.base_query().unwrap().predicates().len(), 1);
        assert!(meta.unscoped_query().predicates().is_empty());
    }

    #[test]
    fn test_named_scope_with_args() {
        let meta = meta().scope("older_than", |spec, args| match args {
            [Value::Int(age)] => spec.filter([("age__gt", *age)]),
            _ => Err(Error::InvalidArgument("older_than expects one integer".into())),
        });
        let spec = meta.unscoped_query();

        let scoped = meta.apply_scope(&spec, "older_than", &[Value::Int(30)]).unwrap();
        assert_eq!(scoped.predicates().len(), 1);

        let bad = meta.apply_scope(&spec, "older_than", &[Value::from("x")]);
        assert!(matches!(bad, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_unknown_scope() {
        let meta = meta();
        let err = meta.apply_scope(&meta.unscoped_query(), "missing", &[]).unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(msg) if msg.contains("missing")));
    }

    #[test]
    fn test_callbacks_run_in_registration_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let (first, second) = (Arc::clone(&log), Arc::clone(&log));
        let meta = meta()
            .on(Trigger::BeforeSave, move |_| {
                first.lock().unwrap().push("first");
                Ok(())
            })
            .on(Trigger::AfterSave, |_| Err("should not run".into()))
            .on(Trigger::BeforeSave, move |row| {
                second.lock().unwrap().push("second");
                row.insert("status".into(), Value::from("touched"));
                Ok(())
            });

        let mut row = Row::new();
        meta.run_callbacks(Trigger::BeforeSave, &mut row).unwrap();
        assert_eq!(*log.lock().unwrap(), vec!["first", "second"]);
        assert_eq!(row.get("status"), Some(&Value::from("touched")));
    }

    #[test]
    fn test_callback_failure_reports_trigger() {
        let meta = meta().on(Trigger::BeforeDelete, |_| Err("locked".into()));
        let err = meta.run_callbacks(Trigger::BeforeDelete, &mut Row::new()).unwrap_err();
        assert!(matches!(err, Error::Callback { trigger: Trigger::BeforeDelete, .. }));
        assert!(err.to_string().contains("before_delete"));
    }
}
