use super::{FileProvider, MemoryProvider, PersistenceProvider};
use crate::config::StoreSettings;
use crate::core::{Result, StoreError};
use lazy_static::lazy_static;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard};
use tracing::debug;

/// Builds a provider from the store settings
pub type ProviderFactory =
    Arc<dyn Fn(&StoreSettings) -> Result<Arc<dyn PersistenceProvider>> + Send + Sync>;

// Global registry, pre-populated with the built-in backends
lazy_static! {
    static ref GLOBAL_REGISTRY: Arc<ProviderRegistry> =
        Arc::new(ProviderRegistry::with_default_providers());
}

/// Name-keyed registry of provider factories
///
/// Backends register under a name at process init; the `type` setting picks
/// one. Names are case-insensitive.
pub struct ProviderRegistry {
    factories: RwLock<HashMap<String, ProviderFactory>>,
}

impl ProviderRegistry {
    /// Get the process-wide registry
    pub fn global() -> &'static Arc<ProviderRegistry> {
        &GLOBAL_REGISTRY
    }

    pub fn new() -> Self {
        Self {
            factories: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with the built-in `memory` and `file` (alias `json`) backends
    pub fn with_default_providers() -> Self {
        let registry = Self::new();

        registry.register("memory", |settings: &StoreSettings| {
            Ok(Arc::new(MemoryProvider::with_size(settings.size)) as Arc<dyn PersistenceProvider>)
        });

        let file: ProviderFactory = Arc::new(
            |settings: &StoreSettings| -> Result<Arc<dyn PersistenceProvider>> {
                let path = settings.path.as_ref().ok_or_else(|| {
                    StoreError::Configuration("'path' is required for file error stores".to_string())
                })?;
                Ok(Arc::new(FileProvider::new(path, settings.size)?))
            },
        );
        registry.register_factory("file", Arc::clone(&file));
        registry.register_factory("json", file);

        registry
    }

    /// Register a factory under `name`, replacing any previous one
    pub fn register<F>(&self, name: &str, factory: F)
    where
        F: Fn(&StoreSettings) -> Result<Arc<dyn PersistenceProvider>> + Send + Sync + 'static,
    {
        self.register_factory(name, Arc::new(factory));
    }

    pub fn register_factory(&self, name: &str, factory: ProviderFactory) {
        debug!(provider = name, "registered error store provider");
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_ascii_lowercase(), factory);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.read_factories().contains_key(&name.to_ascii_lowercase())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read_factories().keys().cloned().collect();
        names.sort();
        names
    }

    /// Build the provider selected by `settings.store_type`
    pub fn create(&self, settings: &StoreSettings) -> Result<Arc<dyn PersistenceProvider>> {
        let factory = {
            let factories = self.read_factories();
            factories
                .get(&settings.store_type.to_ascii_lowercase())
                .cloned()
                .ok_or_else(|| {
                    StoreError::Configuration(format!(
                        "No error store provider registered for type '{}'",
                        settings.store_type
                    ))
                })?
        };
        factory(settings)
    }

    // Factories are inserted whole, so a poisoned map is still usable
    fn read_factories(&self) -> RwLockReadGuard<'_, HashMap<String, ProviderFactory>> {
        self.factories.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for ProviderRegistry {
    fn default() -> Self {
        Self::with_default_providers()
    }
}
