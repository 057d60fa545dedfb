//! Configuration Registry
//!
//! Maps class names to their tree configuration and lazily resolves each one
//! into a [`TreeMapping`] the first time the engine sees an object of that
//! class. Resolved mappings are cached and shared with `Arc`; the cache is
//! read-only after first population per class, so concurrent readers only
//! contend on the first lookup.
//!
//! # Examples
//!
//! ```rust
//! use treepath_core::mapping::ConfigurationRegistry;
//!
//! let registry = ConfigurationRegistry::from_json(r#"{
//!     "Category": {
//!         "parent_field": "parent",
//!         "path_field": "path",
//!         "path_source_field": "title",
//!         "path_separator": "/"
//!     }
//! }"#).unwrap();
//!
//! assert_eq!(registry.config("Category").unwrap().path_separator, '/');
//! ```

use crate::db::ObjectManager;
use crate::error::{Result, TreeError};
use crate::mapping::{TreeConfig, TreeMapping};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Source of per-class tree mappings
pub trait ConfigurationProvider: Send + Sync {
    /// Mapping for `class`, `None` when the class is not a tree
    fn configuration(&self, om: &dyn ObjectManager, class: &str) -> Result<Option<Arc<TreeMapping>>>;
}

/// Class name → tree configuration, with a lazily built mapping cache
#[derive(Debug, Default)]
pub struct ConfigurationRegistry {
    configs: HashMap<String, TreeConfig>,
    mappings: RwLock<HashMap<String, Arc<TreeMapping>>>,
}

impl ConfigurationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class configuration
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidConfiguration` if `config` fails validation.
    pub fn register(&mut self, class: impl Into<String>, config: TreeConfig) -> Result<()> {
        config.validate()?;
        let class = class.into();
        if let Ok(mut mappings) = self.mappings.write() {
            mappings.remove(&class);
        }
        self.configs.insert(class, config);
        Ok(())
    }

    /// Builder form of [`ConfigurationRegistry::register`]
    pub fn with(mut self, class: impl Into<String>, config: TreeConfig) -> Result<Self> {
        self.register(class, config)?;
        Ok(self)
    }

    /// Load a JSON object keyed by class name
    pub fn from_json(json: &str) -> Result<Self> {
        let configs: HashMap<String, TreeConfig> = serde_json::from_str(json)
            .map_err(|e| TreeError::invalid_configuration(format!("Malformed tree configuration: {}", e)))?;

        let mut registry = Self::new();
        for (class, config) in configs {
            registry.register(class, config)?;
        }
        Ok(registry)
    }

    pub fn config(&self, class: &str) -> Option<&TreeConfig> {
        self.configs.get(class)
    }

    pub fn classes(&self) -> impl Iterator<Item = &str> {
        self.configs.keys().map(String::as_str)
    }

    fn cached(&self, class: &str) -> Option<Arc<TreeMapping>> {
        let mappings = match self.mappings.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        mappings.get(class).cloned()
    }
}

impl ConfigurationProvider for ConfigurationRegistry {
    fn configuration(&self, om: &dyn ObjectManager, class: &str) -> Result<Option<Arc<TreeMapping>>> {
        let Some(config) = self.configs.get(class) else {
            return Ok(None);
        };
        if let Some(mapping) = self.cached(class) {
            return Ok(Some(mapping));
        }

        let metadata = om
            .class_metadata(class)
            .ok_or_else(|| TreeError::missing_configuration(class))?;
        let mapping = Arc::new(TreeMapping::new(config.clone(), metadata)?);
        tracing::debug!(class, "Resolved tree mapping");

        let mut mappings = match self.mappings.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let entry = mappings.entry(class.to_string()).or_insert(mapping);
        Ok(Some(Arc::clone(entry)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::MemoryObjectManager;
    use crate::mapping::{ClassMetadata, FieldType};

    fn om() -> MemoryObjectManager {
        let mut om = MemoryObjectManager::relational();
        om.register_class(
            ClassMetadata::new("Category", "id")
                .with_field("title", FieldType::String)
                .with_field("path", FieldType::String)
                .with_association("parent", "Category"),
        );
        om
    }

    #[test]
    fn test_unknown_class_has_no_mapping() {
        let registry = ConfigurationRegistry::new();
        assert!(registry.configuration(&om(), "Category").unwrap().is_none());
    }

    #[test]
    fn test_mapping_is_cached() {
        let registry = ConfigurationRegistry::new()
            .with("Category", TreeConfig::builder("parent", "path", "title").build().unwrap())
            .unwrap();
        let om = om();

        let first = registry.configuration(&om, "Category").unwrap().unwrap();
        let second = registry.configuration(&om, "Category").unwrap().unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[test]
    fn test_configured_class_without_metadata_fails() {
        let registry = ConfigurationRegistry::new()
            .with("Menu", TreeConfig::builder("parent", "path", "title").build().unwrap())
            .unwrap();

        let err = registry.configuration(&om(), "Menu").unwrap_err();
        assert!(matches!(err, TreeError::MissingConfiguration { .. }));
    }

    #[test]
    fn test_from_json_validates() {
        let result = ConfigurationRegistry::from_json(
            r#"{ "Category": {
                "parent_field": "parent",
                "path_field": "path",
                "path_source_field": "title",
                "activate_locking": true
            } }"#,
        );
        assert!(matches!(result, Err(TreeError::InvalidConfiguration(_))));

        assert!(ConfigurationRegistry::from_json("not json").is_err());
    }
}
