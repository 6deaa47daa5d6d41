//! Store Registry - explicitly constructed set of store collaborators
//!
//! Built once at startup and handed to the mediator; registration order is
//! the final tie-break when two stores score the same.

use crate::error::{MediatorError, Result};
use crate::query::Dialect;
use crate::store::{DataStore, StoreDescriptor};
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Default, Clone)]
pub struct StoreRegistry {
    stores: Vec<Arc<dyn DataStore>>,
}

impl StoreRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a store. Names must be unique.
    pub fn register(&mut self, store: Arc<dyn DataStore>) -> Result<()> {
        if self.stores.iter().any(|s| s.name() == store.name()) {
            return Err(MediatorError::Config(format!(
                "store '{}' registered twice",
                store.name()
            )));
        }
        self.stores.push(store);
        Ok(())
    }

    pub fn with(mut self, store: Arc<dyn DataStore>) -> Result<Self> {
        self.register(store)?;
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.stores.is_empty()
    }

    pub fn len(&self) -> usize {
        self.stores.len()
    }

    pub fn names(&self) -> Vec<String> {
        self.stores.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn descriptors(&self) -> Vec<StoreDescriptor> {
        self.stores.iter().map(|s| s.descriptor().clone()).collect()
    }

    /// Look up a store by name; unknown names are rejected before anything is contacted.
    pub fn get(&self, name: &str) -> Result<Arc<dyn DataStore>> {
        self.stores
            .iter()
            .find(|s| s.name() == name)
            .cloned()
            .ok_or_else(|| {
                MediatorError::UnknownStore(format!(
                    "'{}' (available: {})",
                    name,
                    self.names().join(", ")
                ))
            })
    }

    /// Registration index, used as the last tie-break.
    pub fn position(&self, name: &str) -> usize {
        self.stores
            .iter()
            .position(|s| s.name() == name)
            .unwrap_or(usize::MAX)
    }

    /// Stores that natively serve `dialect`, in registration order.
    pub fn serving(&self, dialect: Dialect) -> Vec<Arc<dyn DataStore>> {
        self.stores
            .iter()
            .filter(|s| s.descriptor().serves(dialect))
            .cloned()
            .collect()
    }

    /// Default store for a dialect: the configured one if registered, else the
    /// first store serving the dialect, else the first registered store.
    pub fn default_for(&self, dialect: Dialect, configured: Option<&str>) -> Result<Arc<dyn DataStore>> {
        if let Some(name) = configured {
            match self.get(name) {
                Ok(store) => return Ok(store),
                Err(_) => warn!(
                    "Configured default store '{}' for {} is not registered",
                    name, dialect
                ),
            }
        }

        self.serving(dialect)
            .into_iter()
            .next()
            .or_else(|| self.stores.first().cloned())
            .ok_or_else(|| MediatorError::NoStoreForDialect(dialect.to_string()))
    }

    /// Connect every store. Failures are logged and returned, never fatal.
    pub async fn connect_all(&self) -> Vec<(String, MediatorError)> {
        let mut failures = Vec::new();
        for store in &self.stores {
            match store.connect().await {
                Ok(()) => info!("Store '{}' connected", store.name()),
                Err(e) => {
                    warn!("Store '{}' failed to connect: {}", store.name(), e);
                    failures.push((store.name().to_string(), e));
                }
            }
        }
        failures
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryDocumentStore, MemoryKeyValueStore, MemoryRelationalStore};

    fn registry() -> StoreRegistry {
        StoreRegistry::new()
            .with(Arc::new(MemoryRelationalStore::new("postgres")))
            .unwrap()
            .with(Arc::new(MemoryDocumentStore::new("mongo")))
            .unwrap()
            .with(Arc::new(MemoryKeyValueStore::new("redis")))
            .unwrap()
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut reg = registry();
        assert!(reg.register(Arc::new(MemoryKeyValueStore::new("redis"))).is_err());
        assert_eq!(reg.len(), 3);
    }

    #[test]
    fn test_unknown_store() {
        let err = registry().get("cassandra").err().unwrap();
        assert!(matches!(err, MediatorError::UnknownStore(_)));
    }

    #[test]
    fn test_serving_and_defaults() {
        let reg = registry();
        assert_eq!(reg.serving(Dialect::Document)[0].name(), "mongo");
        assert_eq!(reg.default_for(Dialect::KeyValue, None).unwrap().name(), "redis");
        assert_eq!(reg.default_for(Dialect::KeyValue, Some("postgres")).unwrap().name(), "postgres");
        // Misconfigured default falls back to the dialect's first store
        assert_eq!(reg.default_for(Dialect::Relational, Some("nope")).unwrap().name(), "postgres");
        assert_eq!(reg.position("redis"), 2);
    }

    #[test]
    fn test_empty_registry_has_no_default() {
        let reg = StoreRegistry::new();
        assert!(reg.default_for(Dialect::Relational, None).is_err());
    }
}
