use super::error::ResolveError;
use super::external::{DylibLoader, ModuleLoader};
use super::registry::BuiltinRegistry;
use super::{Filter, FilterSpec};
use std::sync::Arc;

/// Turns a single [`FilterSpec`] into a live filter.
#[derive(Clone)]
pub struct FilterFactory {
    registry: BuiltinRegistry,
    loader: Arc<dyn ModuleLoader>,
}

impl FilterFactory {
    pub fn new(registry: BuiltinRegistry, loader: Arc<dyn ModuleLoader>) -> Self {
        Self { registry, loader }
    }

    /// Standard built-ins plus shared-library loading.
    pub fn standard() -> Self {
        Self::new(BuiltinRegistry::standard(), Arc::new(DylibLoader))
    }

    pub fn registry(&self) -> &BuiltinRegistry {
        &self.registry
    }

    pub fn resolve(&self, spec: &FilterSpec) -> Result<Arc<dyn Filter>, ResolveError> {
        // External specs never fall back to the built-in table, even when the
        // name collides with a canonical identifier.
        if let Some(path) = spec.external_module_path() {
            return self.loader.load(path);
        }

        let construct = self
            .registry
            .lookup(spec.name())
            .ok_or_else(|| ResolveError::UnknownKind {
                name: spec.name().to_string(),
            })?;
        Ok(construct(spec.parameters()))
    }
}

impl Default for FilterFactory {
    fn default() -> Self {
        Self::standard()
    }
}
