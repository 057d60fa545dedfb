//! Tree Configuration
//!
//! Per-class description of which field plays which structural role in a
//! materialized-path tree, plus path formatting and locking options.
//!
//! Defaults follow the usual mapping defaults for materialized paths:
//!
//! | option                       | default |
//! |------------------------------|---------|
//! | `path_separator`             | `,`     |
//! | `path_append_id`             | auto    |
//! | `path_starts_with_separator` | false   |
//! | `path_ends_with_separator`   | true    |
//! | `activate_locking`           | false   |
//! | `locking_timeout`            | 3 s     |
//!
//! # Examples
//!
//! ```rust
//! use treepath_core::mapping::{AppendIdPolicy, TreeConfig};
//!
//! let config = TreeConfig::builder("parent", "path", "title")
//!     .separator('/')
//!     .level_field("level")
//!     .root_field("root")
//!     .append_id(AppendIdPolicy::Always)
//!     .locking("lockTime", 5)
//!     .build()
//!     .unwrap();
//!
//! assert!(config.activate_locking);
//! assert_eq!(config.path_separator, '/');
//! ```

use crate::error::{Result, TreeError};
use serde::{Deserialize, Serialize};

/// Default path separator
pub const DEFAULT_SEPARATOR: char = ',';

/// Default lock staleness window in seconds
pub const DEFAULT_LOCKING_TIMEOUT: u64 = 3;

/// Whether the node identifier is appended to its path segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppendIdPolicy {
    /// Always append `-<identifier>`
    Always,
    /// Never append
    Never,
    /// Append when the path source field is textual
    #[default]
    Auto,
}

impl From<Option<bool>> for AppendIdPolicy {
    fn from(flag: Option<bool>) -> Self {
        match flag {
            Some(true) => AppendIdPolicy::Always,
            Some(false) => AppendIdPolicy::Never,
            None => AppendIdPolicy::Auto,
        }
    }
}

fn default_separator() -> char {
    DEFAULT_SEPARATOR
}

fn default_ends_with_separator() -> bool {
    true
}

fn default_locking_timeout() -> u64 {
    DEFAULT_LOCKING_TIMEOUT
}

/// Materialized path configuration for one mapped class
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    /// Association pointing at the parent node
    pub parent_field: String,

    /// Field holding the materialized path
    pub path_field: String,

    /// Field whose value becomes the node's own path segment
    pub path_source_field: String,

    /// Field receiving the MD5 of the path
    #[serde(default)]
    pub path_hash_field: Option<String>,

    /// Field receiving the depth of the node
    #[serde(default)]
    pub level_field: Option<String>,

    /// Field receiving the first path segment (scalar or association)
    #[serde(default)]
    pub root_field: Option<String>,

    /// Field on the root node that identifies it in lock errors
    #[serde(default)]
    pub root_identifier_method: Option<String>,

    #[serde(default = "default_separator")]
    pub path_separator: char,

    #[serde(default)]
    pub path_append_id: AppendIdPolicy,

    #[serde(default)]
    pub path_starts_with_separator: bool,

    #[serde(default = "default_ends_with_separator")]
    pub path_ends_with_separator: bool,

    #[serde(default)]
    pub activate_locking: bool,

    /// Lock staleness window in seconds
    #[serde(default = "default_locking_timeout")]
    pub locking_timeout: u64,

    /// Date field on the root node holding the lock timestamp
    #[serde(default)]
    pub lock_time_field: Option<String>,
}

impl TreeConfig {
    /// Start a builder with the three mandatory roles
    pub fn builder(
        parent_field: impl Into<String>,
        path_field: impl Into<String>,
        path_source_field: impl Into<String>,
    ) -> TreeConfigBuilder {
        TreeConfigBuilder {
            config: TreeConfig {
                parent_field: parent_field.into(),
                path_field: path_field.into(),
                path_source_field: path_source_field.into(),
                path_hash_field: None,
                level_field: None,
                root_field: None,
                root_identifier_method: None,
                path_separator: DEFAULT_SEPARATOR,
                path_append_id: AppendIdPolicy::Auto,
                path_starts_with_separator: false,
                path_ends_with_separator: true,
                activate_locking: false,
                locking_timeout: DEFAULT_LOCKING_TIMEOUT,
                lock_time_field: None,
            },
        }
    }

    /// Check the configuration is self-consistent
    ///
    /// # Errors
    ///
    /// Returns `TreeError::InvalidConfiguration` if:
    /// - a mandatory role names an empty field
    /// - locking is active without a lock time field
    /// - the locking timeout is below one second
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.parent_field.is_empty() {
            missing.push("ancestor");
        }
        if self.path_field.is_empty() {
            missing.push("path");
        }
        if self.path_source_field.is_empty() {
            missing.push("path_source");
        }
        if !missing.is_empty() {
            return Err(TreeError::invalid_configuration(format!(
                "Missing properties: {}",
                missing.join(", ")
            )));
        }

        if self.activate_locking {
            if self.lock_time_field.as_deref().map_or(true, str::is_empty) {
                return Err(TreeError::invalid_configuration(
                    "You need to map a date field as the tree lock time field to activate locking support",
                ));
            }
            if self.locking_timeout < 1 {
                return Err(TreeError::invalid_configuration(
                    "Tree locking timeout must be at least 1 second",
                ));
            }
        }

        Ok(())
    }
}

/// Fluent builder for [`TreeConfig`]
#[derive(Debug, Clone)]
pub struct TreeConfigBuilder {
    config: TreeConfig,
}

impl TreeConfigBuilder {
    pub fn separator(mut self, separator: char) -> Self {
        self.config.path_separator = separator;
        self
    }

    pub fn hash_field(mut self, field: impl Into<String>) -> Self {
        self.config.path_hash_field = Some(field.into());
        self
    }

    pub fn level_field(mut self, field: impl Into<String>) -> Self {
        self.config.level_field = Some(field.into());
        self
    }

    pub fn root_field(mut self, field: impl Into<String>) -> Self {
        self.config.root_field = Some(field.into());
        self
    }

    pub fn root_identifier_method(mut self, field: impl Into<String>) -> Self {
        self.config.root_identifier_method = Some(field.into());
        self
    }

    pub fn append_id(mut self, policy: AppendIdPolicy) -> Self {
        self.config.path_append_id = policy;
        self
    }

    pub fn starts_with_separator(mut self, enabled: bool) -> Self {
        self.config.path_starts_with_separator = enabled;
        self
    }

    pub fn ends_with_separator(mut self, enabled: bool) -> Self {
        self.config.path_ends_with_separator = enabled;
        self
    }

    /// Activate locking with the given lock time field and timeout (seconds)
    pub fn locking(mut self, lock_time_field: impl Into<String>, timeout_secs: u64) -> Self {
        self.config.activate_locking = true;
        self.config.lock_time_field = Some(lock_time_field.into());
        self.config.locking_timeout = timeout_secs;
        self
    }

    /// Validate and return the configuration
    pub fn build(self) -> Result<TreeConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
