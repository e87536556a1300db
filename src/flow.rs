//! The provider registry a resolver is built from.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8PathBuf;

use crate::cache::{ArtifactCache, CACHE_ENTITY, CacheHandle, FileCache};
use crate::error::ResolverError;
use crate::protocol::OpaqueProtocol;
use crate::provider::{Provider, ValueProvider};

/// Maps entity names to the providers that produce them.
///
/// A `Flow` is assembled with builder-style `register` calls and consumed by
/// [`Resolver::new`](crate::Resolver::new). A provider with several output
/// names is registered under each of them, sharing one instance.
#[derive(Default)]
pub struct Flow {
    providers_by_name: BTreeMap<String, Arc<dyn Provider>>,
}

impl Flow {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(self, provider: impl Provider + 'static) -> Self {
        self.register_arc(Arc::new(provider))
    }

    pub fn register_arc(mut self, provider: Arc<dyn Provider>) -> Self {
        for name in &provider.attrs().names {
            self.providers_by_name.insert(name.clone(), provider.clone());
        }
        self
    }

    /// Registers `cache` as the value of the `core__persistent_cache`
    /// bootstrap entity.
    pub fn with_cache(self, cache: Arc<dyn ArtifactCache>) -> Self {
        self.register(
            ValueProvider::new(CACHE_ENTITY, Arc::new(OpaqueProtocol))
                .value(Arc::new(CacheHandle(cache))),
        )
    }

    /// Registers a [`FileCache`] rooted at `root` as the persistent cache.
    pub fn with_file_cache(self, root: impl Into<Utf8PathBuf>) -> Self {
        self.with_cache(Arc::new(FileCache::new(root)))
    }

    /// All registered entity names, in name order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.providers_by_name.keys().map(String::as_str)
    }

    pub fn get_provider(&self, entity_name: &str) -> Result<Arc<dyn Provider>, ResolverError> {
        self.providers_by_name
            .get(entity_name)
            .cloned()
            .ok_or_else(|| ResolverError::UndefinedEntity(entity_name.to_string()))
    }
}
