use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use crate::source::StateSource;
use crate::timeline::DeterminismClass;

#[derive(Debug, Error)]
pub enum RegistryError {
    /// Duplicate source id; the caller must choose a different id.
    #[error("source id already registered: {0}")]
    Conflict(String),

    #[error("source id not registered: {0}")]
    NotFound(String),
}

/// Observes registry mutations. Callbacks fire after the mutation has
/// committed, outside the registry lock.
pub trait RegistryListener: Send + Sync {
    fn on_registered(&self, source_id: &str, class: DeterminismClass);
    fn on_unregistered(&self, source_id: &str);
}

/// Unique-id map of registered state sources.
///
/// The host owns each source; the registry holds a shared back-reference.
/// Reads are concurrent; writes serialize listener dispatch.
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<HashMap<String, Arc<dyn StateSource>>>,
    listeners: Mutex<Vec<Arc<dyn RegistryListener>>>,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_listener(&self, listener: Arc<dyn RegistryListener>) {
        self.listeners.lock().push(listener);
    }

    pub fn register(&self, source: Arc<dyn StateSource>) -> Result<(), RegistryError> {
        let id = source.source_id().to_string();
        let class = source.determinism_class();
        {
            let mut sources = self.sources.write();
            if sources.contains_key(&id) {
                return Err(RegistryError::Conflict(id));
            }
            sources.insert(id.clone(), source);
        }
        tracing::debug!(class = %class, "state source registered");
        for listener in self.listeners.lock().iter() {
            listener.on_registered(&id, class);
        }
        Ok(())
    }

    pub fn unregister(&self, source_id: &str) -> Result<(), RegistryError> {
        let removed = self.sources.write().remove(source_id);
        if removed.is_none() {
            return Err(RegistryError::NotFound(source_id.to_string()));
        }
        for listener in self.listeners.lock().iter() {
            listener.on_unregistered(source_id);
        }
        Ok(())
    }

    pub fn get(&self, source_id: &str) -> Option<Arc<dyn StateSource>> {
        self.sources.read().get(source_id).cloned()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.sources.read().contains_key(source_id)
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Point-in-time snapshot of every registered source.
    pub fn get_all(&self) -> Vec<Arc<dyn StateSource>> {
        self.sources.read().values().cloned().collect()
    }

    /// Registered source ids, sorted for stable output.
    pub fn source_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.sources.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Snapshot filtered to sources declaring one of the given classes.
    pub fn get_by_class(&self, classes: &[DeterminismClass]) -> Vec<Arc<dyn StateSource>> {
        self.sources
            .read()
            .values()
            .filter(|s| classes.contains(&s.determinism_class()))
            .cloned()
            .collect()
    }

    pub fn has_unsafe_sources(&self) -> bool {
        self.sources
            .read()
            .values()
            .any(|s| s.determinism_class() == DeterminismClass::Unsafe)
    }
}
