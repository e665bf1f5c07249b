use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::str::FromStr;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OnceCell, RwLock};

use crate::providers::{self, ChatProvider, Model, ProviderAccess, ProviderIdentifier};

#[derive(Error, Debug)]
pub(crate) enum Error {
    /// The same provider was registered twice
    #[error("provider \"{0}\" is registered more than once")]
    DuplicateProvider(ProviderIdentifier),
    /// The configured default provider is not part of the registry
    #[error("the default provider \"{0}\" is not registered")]
    DefaultProviderMissing(ProviderIdentifier),
}

/// Fetched model lists are keyed by provider and by the access they were
/// fetched with, since different credentials may see different models.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct CacheKey {
    provider: ProviderIdentifier,
    fingerprint: u64,
}

impl CacheKey {
    fn new(provider: ProviderIdentifier, access: &ProviderAccess) -> CacheKey {
        let mut hasher = DefaultHasher::new();

        access.api_base.hash(&mut hasher);
        access.api_key.hash(&mut hasher);

        CacheKey {
            provider,
            fingerprint: hasher.finish(),
        }
    }
}

type ModelCell = Arc<OnceCell<Arc<Vec<Model>>>>;

/// Distinct provider and access pairs whose model lists are kept. Callers
/// may bring their own keys, so the cache cannot grow with every new one.
const MODEL_CACHE_CAPACITY: usize = 64;

pub(crate) struct Registry {
    providers: Vec<Arc<dyn ChatProvider>>,
    default_provider: ProviderIdentifier,
    model_cache: RwLock<HashMap<CacheKey, ModelCell>>,
    cache_capacity: usize,
}

/// Collects providers before the registry is frozen.
pub(crate) struct RegistryBuilder {
    providers: Vec<Arc<dyn ChatProvider>>,
    default_provider: ProviderIdentifier,
}

impl RegistryBuilder {
    pub(crate) fn new(default_provider: ProviderIdentifier) -> RegistryBuilder {
        RegistryBuilder {
            providers: Vec::new(),
            default_provider,
        }
    }

    pub(crate) fn register(mut self, provider: Box<dyn ChatProvider>) -> Result<Self, Error> {
        let id = provider.id();

        if self.providers.iter().any(|p| p.id() == id) {
            return Err(Error::DuplicateProvider(id));
        }

        tracing::debug!(provider = %id, "registered provider");

        self.providers.push(Arc::from(provider));

        Ok(self)
    }

    pub(crate) fn build(self) -> Result<Registry, Error> {
        if !self.providers.iter().any(|p| p.id() == self.default_provider) {
            return Err(Error::DefaultProviderMissing(self.default_provider));
        }

        Ok(Registry {
            providers: self.providers,
            default_provider: self.default_provider,
            model_cache: RwLock::new(HashMap::new()),
            cache_capacity: MODEL_CACHE_CAPACITY,
        })
    }
}

impl Registry {
    pub(crate) fn builder(default_provider: ProviderIdentifier) -> RegistryBuilder {
        RegistryBuilder::new(default_provider)
    }

    #[cfg(test)]
    fn with_cache_capacity(mut self, capacity: usize) -> Registry {
        self.cache_capacity = capacity;
        self
    }

    pub(crate) fn provider(&self, id: ProviderIdentifier) -> Option<&Arc<dyn ChatProvider>> {
        self.providers.iter().find(|p| p.id() == id)
    }

    /// Look a provider up by identifier or display name, ignoring case.
    pub(crate) fn get(&self, name: &str) -> Option<&Arc<dyn ChatProvider>> {
        if let Ok(id) = ProviderIdentifier::from_str(name) {
            return self.provider(id);
        }

        self.providers
            .iter()
            .find(|p| p.descriptor().name.eq_ignore_ascii_case(name))
    }

    /// Registered providers, in registration order.
    pub(crate) fn list(&self) -> impl Iterator<Item = &Arc<dyn ChatProvider>> {
        self.providers.iter()
    }

    pub(crate) fn default_provider(&self) -> &Arc<dyn ChatProvider> {
        // `RegistryBuilder::build` refuses registries without the default
        match self.provider(self.default_provider) {
            Some(provider) => provider,
            None => unreachable!("default provider missing from a built registry"),
        }
    }

    /// The models `provider` serves beyond its static list, fetched once per
    /// access and then served from the cache for the life of the process.
    /// Failed fetches are not cached. Once the cache holds
    /// `MODEL_CACHE_CAPACITY` entries, lists for new accesses are fetched on
    /// every call.
    pub(crate) async fn dynamic_models(
        &self,
        provider: &dyn ChatProvider,
        access: &ProviderAccess,
    ) -> Result<Arc<Vec<Model>>, providers::Error> {
        if !provider.descriptor().dynamic_models {
            return Ok(Arc::new(Vec::new()));
        }

        let key = CacheKey::new(provider.id(), access);

        let cell = {
            let cache = self.model_cache.read().await;
            cache.get(&key).cloned()
        };

        let cell = match cell {
            Some(cell) => cell,
            None => {
                let mut cache = self.model_cache.write().await;

                if !cache.contains_key(&key) && cache.len() >= self.cache_capacity {
                    drop(cache);

                    tracing::debug!(provider = %provider.id(), "model cache full, fetching uncached");

                    return Ok(Arc::new(provider.fetch_models(access).await?));
                }

                cache.entry(key).or_default().clone()
            }
        };

        let models = cell
            .get_or_try_init(|| async {
                tracing::debug!(provider = %provider.id(), "fetching model list");

                let models = provider.fetch_models(access).await?;

                Ok::<_, providers::Error>(Arc::new(models))
            })
            .await?;

        Ok(models.clone())
    }
}
