//! Thread-safe function registry using DashMap.
//!
//! Maps function names to their configuration. Loaded once from the config
//! file at startup; the invocation path only reads from it.

use std::sync::Arc;

use dashmap::DashMap;

use crate::config::FunctionConfig;
use crate::error::{EmberError, EmberResult};
use crate::types::FunctionName;

/// Thread-safe registry of deployable functions.
/// Uses DashMap for lock-free concurrent access.
#[derive(Debug, Default)]
pub struct FunctionRegistry {
    functions: DashMap<FunctionName, FunctionConfig>,
}

impl FunctionRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self {
            functions: DashMap::new(),
        }
    }

    /// Build a registry from validated function definitions.
    /// Returns FunctionAlreadyExists on duplicate names.
    pub fn from_functions(functions: Vec<FunctionConfig>) -> EmberResult<Self> {
        let registry = Self::new();
        for config in functions {
            registry.register(config)?;
        }
        Ok(registry)
    }

    /// Build a shared registry wrapped in an Arc.
    pub fn new_shared(functions: Vec<FunctionConfig>) -> EmberResult<Arc<Self>> {
        Ok(Arc::new(Self::from_functions(functions)?))
    }

    /// Register a new function.
    pub fn register(&self, config: FunctionConfig) -> EmberResult<()> {
        let name = config.name.clone();

        // Check for duplicate - fail fast
        if self.functions.contains_key(&name) {
            return Err(EmberError::FunctionAlreadyExists(name));
        }

        self.functions.insert(name, config);
        Ok(())
    }

    /// Look up the configuration for a function.
    pub fn get(&self, name: &FunctionName) -> Option<FunctionConfig> {
        self.functions.get(name).map(|entry| entry.value().clone())
    }

    /// Check if a function is registered.
    pub fn contains(&self, name: &FunctionName) -> bool {
        self.functions.contains_key(name)
    }

    /// Get the number of registered functions.
    pub fn len(&self) -> usize {
        self.functions.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.functions.is_empty()
    }

    /// Get a list of all registered function names.
    pub fn names(&self) -> Vec<FunctionName> {
        self.functions.iter().map(|r| r.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn make_config(name: &str) -> FunctionConfig {
        FunctionConfig {
            name: FunctionName::new(name).unwrap(),
            image: format!("{}:latest", name),
            environment: HashMap::new(),
        }
    }

    #[test]
    fn test_register_and_get() {
        let registry = FunctionRegistry::new();
        registry.register(make_config("test-func")).unwrap();

        let name = FunctionName::new("test-func").unwrap();
        assert!(registry.contains(&name));
        assert_eq!(registry.get(&name).unwrap().image, "test-func:latest");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_lookup_missing() {
        let registry = FunctionRegistry::new();
        let name = FunctionName::new("ghost").unwrap();
        assert!(registry.get(&name).is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let registry = FunctionRegistry::new();
        assert!(registry.register(make_config("test-func")).is_ok());
        assert!(registry.register(make_config("test-func")).is_err());
    }

    #[test]
    fn test_from_functions() {
        let registry =
            FunctionRegistry::from_functions(vec![make_config("f1"), make_config("f2")]).unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.names().len(), 2);
    }

    #[test]
    fn test_concurrent_access() {
        use std::thread;

        let registry = Arc::new(FunctionRegistry::new());

        let handles: Vec<_> = (0..10)
            .map(|i| {
                let reg = Arc::clone(&registry);
                thread::spawn(move || {
                    reg.register(make_config(&format!("func-{}", i))).unwrap();
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(registry.len(), 10);
    }
}
