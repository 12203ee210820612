use super::{PersistenceProvider, ProviderRegistry};
use crate::config::StoreSettings;
use crate::core::{Result, StoreError};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use tokio::sync::OnceCell;
use tracing::{info, warn};

/// Observable lifecycle of a [`ProviderResolver`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolverPhase {
    Unresolved,
    Resolving,
    Resolved,
    Unresolvable,
}

enum Resolution {
    Resolved(Arc<dyn PersistenceProvider>),
    Unresolvable(String),
}

/// Finds the provider for the configured store type, once.
///
/// Discovery runs at most once per resolver, even under concurrent first
/// calls, and its outcome (failure included) is kept for the resolver's
/// lifetime. A provider set with [`ProviderResolver::set_provider`] always
/// takes precedence over discovery.
pub struct ProviderResolver {
    settings: Arc<StoreSettings>,
    registry: Arc<ProviderRegistry>,
    explicit: RwLock<Option<Arc<dyn PersistenceProvider>>>,
    discovered: OnceCell<Resolution>,
    resolving: AtomicBool,
    attempts: AtomicUsize,
}

impl ProviderResolver {
    pub fn new(settings: Arc<StoreSettings>, registry: Arc<ProviderRegistry>) -> Self {
        Self {
            settings,
            registry,
            explicit: RwLock::new(None),
            discovered: OnceCell::new(),
            resolving: AtomicBool::new(false),
            attempts: AtomicUsize::new(0),
        }
    }

    /// Resolver backed by the process-wide registry
    pub fn with_global_registry(settings: Arc<StoreSettings>) -> Self {
        Self::new(settings, Arc::clone(ProviderRegistry::global()))
    }

    /// Resolver that is already resolved to `provider`; no discovery ever runs
    pub fn with_provider(settings: Arc<StoreSettings>, provider: Arc<dyn PersistenceProvider>) -> Self {
        let resolver = Self::new(settings, Arc::new(ProviderRegistry::new()));
        resolver.set_provider(provider);
        resolver
    }

    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    /// Explicitly choose the provider
    pub fn set_provider(&self, provider: Arc<dyn PersistenceProvider>) {
        info!(provider = provider.name(), "error store provider set explicitly");
        match self.explicit.write() {
            Ok(mut slot) => *slot = Some(provider),
            Err(poisoned) => *poisoned.into_inner() = Some(provider),
        }
    }

    /// The provider to use, or a configuration error
    pub async fn resolve(&self) -> Result<Arc<dyn PersistenceProvider>> {
        if let Some(provider) = self.explicit()? {
            return Ok(provider);
        }

        let resolution = self
            .discovered
            .get_or_init(|| async { self.discover() })
            .await;

        match resolution {
            Resolution::Resolved(provider) => Ok(Arc::clone(provider)),
            Resolution::Unresolvable(reason) => Err(StoreError::Configuration(reason.clone())),
        }
    }

    pub fn phase(&self) -> ResolverPhase {
        if matches!(self.explicit(), Ok(Some(_))) {
            return ResolverPhase::Resolved;
        }
        match self.discovered.get() {
            Some(Resolution::Resolved(_)) => ResolverPhase::Resolved,
            Some(Resolution::Unresolvable(_)) => ResolverPhase::Unresolvable,
            None if self.resolving.load(Ordering::SeqCst) => ResolverPhase::Resolving,
            None => ResolverPhase::Unresolved,
        }
    }

    /// How many times discovery actually ran (0 or 1)
    pub fn discovery_attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    fn explicit(&self) -> Result<Option<Arc<dyn PersistenceProvider>>> {
        Ok(self.explicit.read()?.clone())
    }

    fn discover(&self) -> Resolution {
        self.resolving.store(true, Ordering::SeqCst);
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let resolution = match self.registry.create(&self.settings) {
            Ok(provider) => {
                info!(
                    store_type = %self.settings.store_type,
                    provider = provider.name(),
                    "error store provider resolved"
                );
                Resolution::Resolved(provider)
            }
            Err(e) => {
                warn!(store_type = %self.settings.store_type, error = %e, "error store provider unresolvable");
                Resolution::Unresolvable(e.to_string())
            }
        };

        self.resolving.store(false, Ordering::SeqCst);
        resolution
    }
}
