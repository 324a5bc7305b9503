//! Service type to catalog module dispatch.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::{CatalogError, CatalogResult};
use crate::module::CatalogModule;
use crate::redis::RedisCatalog;
use crate::telegraf::TelegrafCatalog;

/// Catalog modules keyed by service type, resolved once at start-up.
#[derive(Clone)]
pub struct CatalogRegistry {
    modules: BTreeMap<&'static str, Arc<dyn CatalogModule>>,
}

impl CatalogRegistry {
    pub fn new() -> Self {
        Self {
            modules: BTreeMap::new(),
        }
    }

    /// Registry with every shipped module.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(RedisCatalog));
        registry.register(Arc::new(TelegrafCatalog));
        registry
    }

    /// Register a module, replacing any module of the same type.
    pub fn register(&mut self, module: Arc<dyn CatalogModule>) {
        self.modules.insert(module.service_type(), module);
    }

    pub fn get(&self, service_type: &str) -> CatalogResult<Arc<dyn CatalogModule>> {
        self.modules
            .get(service_type)
            .cloned()
            .ok_or_else(|| CatalogError::UnknownServiceType(service_type.to_string()))
    }

    pub fn service_types(&self) -> Vec<&'static str> {
        self.modules.keys().copied().collect()
    }
}

impl Default for CatalogRegistry {
    fn default() -> Self {
        Self::new()
    }
}
