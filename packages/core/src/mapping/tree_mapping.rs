//! Resolved tree mapping for one class: validated configuration, class
//! metadata, bound accessors and the derived path policy.

use crate::error::{Result, TreeError};
use crate::mapping::{AppendIdPolicy, ClassMetadata, FieldAccessor, FieldType, TreeConfig};
use crate::strategy::path_builder::PathPolicy;
use std::sync::Arc;

#[derive(Debug)]
pub struct TreeMapping {
    pub config: TreeConfig,
    pub metadata: Arc<ClassMetadata>,
    pub accessor: FieldAccessor,
    policy: PathPolicy,
}

impl TreeMapping {
    /// Validate `config` against `metadata` and bind its accessors
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidConfiguration` when the configuration is
    /// inconsistent or names a role the class does not declare.
    pub fn new(config: TreeConfig, metadata: Arc<ClassMetadata>) -> Result<Self> {
        config.validate()?;

        if !metadata.has_association(&config.parent_field) {
            return Err(TreeError::invalid_configuration(format!(
                "Unable to find ancestor/parent child relation through ancestor field \"{}\" in class {}",
                config.parent_field, metadata.name
            )));
        }
        if !metadata.has_field(&config.path_source_field) {
            return Err(TreeError::invalid_configuration(format!(
                "Tree path source field \"{}\" is not mapped in class {}",
                config.path_source_field, metadata.name
            )));
        }
        if let Some(field) = &config.lock_time_field {
            if config.activate_locking && metadata.field_type(field) != Some(FieldType::DateTime) {
                return Err(TreeError::invalid_configuration(format!(
                    "Tree lock time field \"{}\" must be a date field in class {}",
                    field, metadata.name
                )));
            }
        }

        let accessor = FieldAccessor::new(&config, &metadata);
        let policy = PathPolicy::from(&config);

        Ok(Self {
            config,
            metadata,
            accessor,
            policy,
        })
    }

    pub fn class(&self) -> &str {
        &self.metadata.name
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    /// Whether `-<identifier>` is appended to this class's path segments
    pub fn append_identifier(&self) -> bool {
        match self.config.path_append_id {
            AppendIdPolicy::Always => true,
            AppendIdPolicy::Never => false,
            AppendIdPolicy::Auto => self
                .metadata
                .field_type(&self.config.path_source_field)
                .is_some_and(|ty| ty.is_textual()),
        }
    }

    /// Whether the path can only be computed once the identifier is assigned
    pub fn requires_identifier(&self) -> bool {
        self.append_identifier() || self.metadata.is_identifier(&self.config.path_source_field)
    }

    pub fn locking_enabled(&self) -> bool {
        self.config.activate_locking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metadata() -> Arc<ClassMetadata> {
        Arc::new(
            ClassMetadata::new("Category", "id")
                .with_field("title", FieldType::String)
                .with_field("position", FieldType::Integer)
                .with_field("path", FieldType::String)
                .with_field("lockTime", FieldType::DateTime)
                .with_association("parent", "Category"),
        )
    }

    #[test]
    fn test_auto_append_follows_source_type() {
        let textual = TreeConfig::builder("parent", "path", "title").build().unwrap();
        let mapping = TreeMapping::new(textual, metadata()).unwrap();
        assert!(mapping.append_identifier());
        assert!(mapping.requires_identifier());

        let numeric = TreeConfig::builder("parent", "path", "position").build().unwrap();
        let mapping = TreeMapping::new(numeric, metadata()).unwrap();
        assert!(!mapping.append_identifier());
        assert!(!mapping.requires_identifier());
    }

    #[test]
    fn test_identifier_source_requires_identifier() {
        let config = TreeConfig::builder("parent", "path", "id")
            .append_id(AppendIdPolicy::Never)
            .build()
            .unwrap();
        let mapping = TreeMapping::new(config, metadata()).unwrap();
        assert!(!mapping.append_identifier());
        assert!(mapping.requires_identifier());
    }

    #[test]
    fn test_unknown_parent_association_is_rejected() {
        let config = TreeConfig::builder("owner", "path", "title").build().unwrap();
        let err = TreeMapping::new(config, metadata()).unwrap_err();
        assert!(matches!(err, TreeError::InvalidConfiguration(_)));
    }

    #[test]
    fn test_lock_time_must_be_date() {
        let config = TreeConfig::builder("parent", "path", "title")
            .locking("title", 3)
            .build()
            .unwrap();
        assert!(TreeMapping::new(config, metadata()).is_err());

        let config = TreeConfig::builder("parent", "path", "title")
            .locking("lockTime", 3)
            .build()
            .unwrap();
        assert!(TreeMapping::new(config, metadata()).unwrap().locking_enabled());
    }
}
