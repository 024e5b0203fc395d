//! Adapter registry, keyed by name, so the scheduler stays closed to new
//! batch systems — adding one means registering an implementation, not
//! touching scheduling logic.

use std::collections::HashMap;
use std::sync::Arc;

use super::BatchSystemAdapter;

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<&'static str, Arc<dyn BatchSystemAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, adapter: Arc<dyn BatchSystemAdapter>) {
        self.adapters.insert(adapter.name(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn BatchSystemAdapter>> {
        self.adapters.get(name).cloned()
    }

    /// A registry seeded with the built-in reference adapters.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(super::BackgroundAdapter));
        registry.register(Arc::new(super::PbsAdapter));
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_resolves_by_name() {
        let registry = AdapterRegistry::with_builtins();
        assert!(registry.get("background").is_some());
        assert!(registry.get("pbs").is_some());
        assert!(registry.get("nonexistent").is_none());
    }
}
