//! Post-commit cache invalidation.
//!
//! Runs only after the storage collaborator has durably committed a write.
//! Deletes the written record's `<model>:id:<id>` key and every key the model
//! registered with [`ModelMeta::invalidate_on_write`].
//!
//! Previously cached query results are NOT invalidated: knowing which cached
//! queries a write affects would need per-row dependency tracking. Those
//! entries stay until their TTL runs out or the caller drops the model's
//! namespace with [`Quarry::invalidate_model`](crate::Quarry::invalidate_model).
//!
//! Failures are logged and counted, never returned; the write has already
//! happened.

use std::time::Duration;

use crate::cache::{CacheCoordinator, record_key};
use crate::model::ModelMeta;
use crate::options::CallOptions;
use crate::value::Value;

const ID_PLACEHOLDER: &str = "{id}";

/// Outcome of one invalidation pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Entries actually removed from the cache.
    pub deleted: u64,
    /// Keys or prefixes whose deletion failed.
    pub failed: u64,
}

/// One thing to remove from the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Key(String),
    Prefix(String),
}

/// Expand a registered pattern for the written record.
///
/// Returns `None` when the pattern needs an identifier that is not known.
pub fn expand(pattern: &str, id: Option<&Value>) -> Option<Target> {
    let pattern = if pattern.contains(ID_PLACEHOLDER) {
        pattern.replace(ID_PLACEHOLDER, &id?.to_string())
    } else {
        pattern.to_string()
    };

    match pattern.strip_suffix('*') {
        Some(prefix) => Some(Target::Prefix(prefix.to_string())),
        None => Some(Target::Key(pattern)),
    }
}

/// Every target for a write to `meta`'s model.
pub fn targets(meta: &ModelMeta, id: Option<&Value>) -> Vec<Target> {
    let mut targets = Vec::new();
    if let Some(id) = id {
        targets.push(Target::Key(record_key(meta.name(), id)));
    }
    for pattern in meta.invalidation_patterns() {
        match expand(pattern, id) {
            Some(target) if !targets.contains(&target) => targets.push(target),
            Some(_) => {}
            None => tracing::warn!(model = meta.name(), pattern, "invalidation pattern needs an id, skipping"),
        }
    }
    targets
}

/// Delete every target for a committed write.
pub async fn after_commit(
    cache: &CacheCoordinator, meta: &ModelMeta, id: Option<&Value>, timeout: Duration,
) -> InvalidationReport {
    // Strict so failures come back here to be logged at error level instead of
    // being absorbed by the coordinator.
    let opts = CallOptions { strict: true, timeout };
    let mut report = InvalidationReport::default();

    let mut keys = Vec::new();
    for target in targets(meta, id) {
        match target {
            Target::Key(key) => keys.push(key),
            Target::Prefix(prefix) => match cache.delete_prefix(&prefix, opts).await {
                Ok(deleted) => report.deleted += deleted,
                Err(err) => {
                    tracing::error!(model = meta.name(), prefix = %prefix, error = %err, "post-commit invalidation failed");
                    report.failed += 1;
                }
            },
        }
    }

    match cache.delete_keys(&keys, opts).await {
        Ok(deleted) => report.deleted += deleted,
        Err(err) => {
            tracing::error!(model = meta.name(), keys = ?keys, error = %err, "post-commit invalidation failed");
            report.failed += keys.len() as u64;
        }
    }

    tracing::debug!(model = meta.name(), deleted = report.deleted, failed = report.failed, "write invalidation");
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::coordinator::tests::DownBackend;
    use crate::cache::{MemoryBackend, Payload};
    use crate::model::Schema;
    use std::sync::Arc;

    fn meta() -> ModelMeta {
        ModelMeta::new(Schema::new("post"))
            .invalidate_on_write("post:trending")
            .invalidate_on_write("post:by_id:{id}")
            .invalidate_on_write("feed:*")
    }

    #[test]
    fn test_expand_patterns() {
        let id = Value::Int(7);
        assert_eq!(expand("post:trending", Some(&id)), Some(Target::Key("post:trending".into())));
        assert_eq!(expand("post:{id}:comments", Some(&id)), Some(Target::Key("post:7:comments".into())));
        assert_eq!(expand("feed:{id}:*", Some(&id)), Some(Target::Prefix("feed:7:".into())));
        assert_eq!(expand("post:{id}", None), None);
    }

    #[test]
    fn test_targets_start_with_record_key() {
        let targets = targets(&meta(), Some(&Value::Int(3)));
        assert_eq!(targets[0], Target::Key("post:id:3".into()));
        assert_eq!(targets.len(), 4);
    }

    #[tokio::test]
    async fn test_after_commit_deletes_record_and_registered_keys() {
        let cache = CacheCoordinator::new(Arc::new(MemoryBackend::new()));
        let opts = CallOptions::default();
        let payload = Payload::Count(1);
        for key in ["post:id:3", "post:trending", "post:by_id:3", "feed:a", "feed:b", "post:id:4"] {
            cache.write(key, &payload, None, opts).await.unwrap();
        }

        let report = after_commit(&cache, &meta(), Some(&Value::Int(3)), Duration::from_secs(1)).await;
        assert_eq!(report, InvalidationReport { deleted: 5, failed: 0 });
        assert!(cache.fetch("post:id:3", opts).await.unwrap().is_none());
        assert!(cache.fetch("post:id:4", opts).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_failures_are_reported_not_raised() {
        let cache = CacheCoordinator::new(Arc::new(DownBackend));
        let report = after_commit(&cache, &meta(), Some(&Value::Int(3)), Duration::from_secs(1)).await;
        assert_eq!(report.deleted, 0);
        assert_eq!(report.failed, 4);
    }
}
