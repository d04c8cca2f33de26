//! Static table of model metadata, filled once at startup.

use std::collections::HashMap;
use std::sync::Arc;

use crate::Error;
use crate::model::{Model, ModelMeta};

/// Model metadata keyed by model name.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    models: HashMap<String, Arc<ModelMeta>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `M` using its own description.
    pub fn register<M: Model>(&mut self) {
        self.insert(M::describe());
    }

    /// Register metadata directly. A later registration replaces an earlier
    /// one with the same name.
    pub fn insert(&mut self, meta: ModelMeta) {
        tracing::debug!(model = meta.name(), "registered model");
        self.models.insert(meta.name().to_string(), Arc::new(meta));
    }

    pub fn get(&self, name: &str) -> Option<&Arc<ModelMeta>> {
        self.models.get(name)
    }

    /// Metadata for `name`, failing for unregistered models.
    pub fn require(&self, name: &str) -> Result<&Arc<ModelMeta>, Error> {
        self.get(name)
            .ok_or_else(|| Error::InvalidArgument(format!("model `{name}` is not registered")))
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Schema;

    #[test]
    fn test_require_unregistered() {
        let registry = Registry::new();
        assert!(matches!(registry.require("ghost"), Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_insert_and_get() {
        let mut registry = Registry::new();
        registry.insert(ModelMeta::new(Schema::new("user")));
        assert_eq!(registry.len(), 1);
        assert_eq!(registry.require("user").unwrap().name(), "user");
    }
}
