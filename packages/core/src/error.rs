//! Tree Error Types
//!
//! This module defines the error type shared by every layer of the tree
//! behavior: configuration, path building, locking and the collaborator
//! traits implemented by host mappers.
//!
//! All errors abort the lifecycle callback that raised them. The core never
//! retries; the host mapper decides whether the surrounding flush is rolled
//! back.

use crate::models::NodeHandle;
use thiserror::Error;

/// Result alias used throughout the crate
pub type Result<T, E = TreeError> = std::result::Result<T, E>;

/// Tree behavior errors
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TreeError {
    /// Path source value contains the configured path separator
    ///
    /// Raised before any structural field is written, so the node is left
    /// exactly as it was.
    #[error("You can't use the path separator (\"{separator}\") as a character for your path source value \"{value}\"")]
    InvalidPathSource { separator: char, value: String },

    /// Tree root is held by an unexpired lock
    #[error("Tree with root id \"{root_id}\" is locked")]
    TreeLocked { root_id: String },

    /// Tree configuration is unusable
    #[error("Invalid tree configuration: {0}")]
    InvalidConfiguration(String),

    /// Action tag outside insert/update/remove
    #[error("\"{0}\" is not a valid action")]
    UnsupportedAction(String),

    /// Class has no tree configuration registered
    #[error("Tree object class {class} must have tree metadata at this point")]
    MissingConfiguration { class: String },

    /// Handle does not resolve to a managed node
    #[error("Node not found: {handle}")]
    NodeNotFound { handle: NodeHandle },

    /// Node needs an identifier that has not been assigned yet
    #[error("Node {handle} has no identifier yet")]
    MissingIdentifier { handle: NodeHandle },

    /// Storage collaborator failed
    #[error("Store operation failed: {0}")]
    Store(String),
}

impl TreeError {
    /// Create an invalid path source error
    pub fn invalid_path_source(separator: char, value: impl Into<String>) -> Self {
        Self::InvalidPathSource {
            separator,
            value: value.into(),
        }
    }

    /// Create a tree locked error
    pub fn tree_locked(root_id: impl Into<String>) -> Self {
        Self::TreeLocked {
            root_id: root_id.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Create an unsupported action error
    pub fn unsupported_action(action: impl Into<String>) -> Self {
        Self::UnsupportedAction(action.into())
    }

    /// Create a missing configuration error
    pub fn missing_configuration(class: impl Into<String>) -> Self {
        Self::MissingConfiguration {
            class: class.into(),
        }
    }

    /// Create a node not found error
    pub fn node_not_found(handle: NodeHandle) -> Self {
        Self::NodeNotFound { handle }
    }

    /// Create a missing identifier error
    pub fn missing_identifier(handle: NodeHandle) -> Self {
        Self::MissingIdentifier { handle }
    }

    /// Create a store error
    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store(msg.into())
    }

    /// Whether a caller may retry the operation later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TreeLocked { .. })
    }
}
