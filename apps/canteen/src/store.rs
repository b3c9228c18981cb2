//! # Store
//!
//! Opens the configured adapter, binds the declared schemas to it, and
//! reconciles indexes when asked to.

use crate::config::{BackendKind, CanteenConfig};
use canteen_model::{
    AdapterRegistry, InMemoryAdapter, Key, ModelAdapter, ModelError, RedbBackend, RedisAdapter,
    Schema,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// An open store with its bound schemas.
pub struct Store {
    adapter: Arc<dyn ModelAdapter>,
    schemas: BTreeMap<String, Arc<Schema>>,
    reconciled: Option<usize>,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("adapter", &self.adapter.name())
            .field("kinds", &self.schemas.keys().collect::<Vec<_>>())
            .field("reconciled", &self.reconciled)
            .finish()
    }
}

impl Store {
    pub fn open(config: &CanteenConfig) -> Result<Self, ModelError> {
        let mut registry = AdapterRegistry::new();
        let mut redis = None;
        match config.store.backend {
            BackendKind::Redis => {
                let backend = RedbBackend::open(&config.store.path)?;
                let adapter = Arc::new(RedisAdapter::with_config(backend, config.adapter.clone()));
                registry.register(BackendKind::Redis.name(), adapter.clone());
                redis = Some(adapter);
            }
            BackendKind::Memory => {
                let adapter = Arc::new(InMemoryAdapter::with_config(config.adapter.clone()));
                registry.register(BackendKind::Memory.name(), adapter);
            }
        }

        let schemas = config.bind(&registry)?;

        // Reconciliation resolves kinds through the bound schemas
        let reconciled = match &redis {
            Some(adapter) => adapter.reconcile_on_open()?,
            None => None,
        };
        if let Some(count) = reconciled {
            tracing::info!(records = count, "indexes reconciled on open");
        }

        let adapter = registry.acquire(Some(config.store.backend.name()))?;
        tracing::debug!(
            adapter = adapter.name(),
            kinds = schemas.len(),
            "store opened"
        );
        Ok(Self {
            adapter,
            schemas,
            reconciled,
        })
    }

    pub fn adapter(&self) -> &Arc<dyn ModelAdapter> {
        &self.adapter
    }

    /// Records re-indexed on open, when reconciliation ran.
    pub fn reconciled(&self) -> Option<usize> {
        self.reconciled
    }

    pub fn kinds(&self) -> impl Iterator<Item = &str> {
        self.schemas.keys().map(String::as_str)
    }

    pub fn schema(&self, kind: &str) -> Result<&Arc<Schema>, ModelError> {
        self.schemas
            .get(kind)
            .ok_or_else(|| ModelError::UnknownKind(kind.to_string()))
    }

    /// Schema owning `key`.
    pub fn schema_for(&self, key: &Key) -> Result<&Arc<Schema>, ModelError> {
        self.schema(key.kind())
    }
}
